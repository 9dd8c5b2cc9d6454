use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use url::Url;

use crate::note::Note;
use crate::remote::{DeleteOutcome, RemoteError, RemoteNotes};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON REST client for the notes endpoint.
#[derive(Clone)]
pub struct NotesClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl NotesClient {
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: normalize_base(base_url)?,
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn list_notes(&self) -> Result<Vec<Note>, RemoteError> {
        let url = self.collection()?;
        let response = self.authorize(self.http.get(url)).send().await?;
        Self::handle_response(response).await
    }

    pub async fn create_note(&self, note: &Note) -> Result<Note, RemoteError> {
        let url = self.collection()?;
        let response = self.authorize(self.http.post(url)).json(note).send().await?;
        Self::handle_response(response).await
    }

    pub async fn update_note(&self, id: &str, note: &Note) -> Result<Note, RemoteError> {
        let url = self.member(id)?;
        let response = self.authorize(self.http.put(url)).json(note).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(id.to_string()));
        }
        Self::handle_response(response).await
    }

    pub async fn delete_note(&self, id: &str) -> Result<DeleteOutcome, RemoteError> {
        let url = self.member(id)?;
        let response = self.authorize(self.http.delete(url)).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(DeleteOutcome::AlreadyGone);
        }
        if status.is_success() {
            return Ok(DeleteOutcome::Deleted);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Api { status, body })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn collection(&self) -> Result<Url, RemoteError> {
        Ok(self.base_url.join("notes")?)
    }

    fn member(&self, id: &str) -> Result<Url, RemoteError> {
        let mut url = self.collection()?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::CannotBeABase(self.base_url.to_string()))?
            .push(id);
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RemoteError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(RemoteError::Api { status, body })
        }
    }
}

#[async_trait]
impl RemoteNotes for NotesClient {
    async fn list(&self) -> Result<Vec<Note>, RemoteError> {
        self.list_notes().await
    }

    async fn create(&self, note: &Note) -> Result<Note, RemoteError> {
        self.create_note(note).await
    }

    async fn update(&self, id: &str, note: &Note) -> Result<Note, RemoteError> {
        self.update_note(id, note).await
    }

    async fn delete(&self, id: &str) -> Result<DeleteOutcome, RemoteError> {
        self.delete_note(id).await
    }
}

fn normalize_base(base_url: &str) -> Result<Url, RemoteError> {
    let mut url = Url::parse(base_url)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
