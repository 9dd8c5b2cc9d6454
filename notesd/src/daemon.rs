use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use notes_core::NotesClient;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use zbus::connection::Builder as ConnectionBuilder;
use zbus::object_server::SignalEmitter;

use crate::dbus_api::{DBUS_NAME, DBUS_OBJECT_PATH, NotesDbusService};
use crate::service::NotesService;
use crate::sync::backoff::{Backoff, RetryState};
use crate::sync::connectivity::{Connectivity, ConnectivityProbe, TcpProbe, watch_connectivity};
use crate::sync::engine::{SyncEngine, SyncOutcome};
use crate::sync::events::{EventBus, StatusScope, Subscription, SyncStatus};
use crate::sync::status::StatusBoard;
use crate::sync::store::{NoteStore, default_db_path};

const DEFAULT_REMOTE_URL: &str = "http://127.0.0.1:8080/";
const DEFAULT_PROBE_SECS: u64 = 5;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub db_path: PathBuf,
    pub remote_url: String,
    pub remote_token: Option<String>,
    // `None` disables the connectivity watcher.
    pub probe_interval: Option<Duration>,
    pub sync_interval: Duration,
    pub enable_dbus: bool,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let db_path = match std::env::var("NOTES_DB_PATH") {
            Ok(value) => expand_with_home(&value, &home),
            Err(_) => default_db_path().context("cannot resolve default database path")?,
        };
        let remote_url =
            std::env::var("NOTES_REMOTE_URL").unwrap_or_else(|_| DEFAULT_REMOTE_URL.to_string());
        let remote_token = read_optional_env("NOTES_REMOTE_TOKEN");
        let probe_secs = read_u64_env("NOTES_PROBE_SECS", DEFAULT_PROBE_SECS);
        let probe_interval = (probe_secs > 0).then(|| Duration::from_secs(probe_secs));
        let sync_interval = Duration::from_secs(
            read_u64_env("NOTES_SYNC_INTERVAL_SECS", DEFAULT_SYNC_INTERVAL_SECS).max(1),
        );
        let enable_dbus = read_bool_env("NOTES_ENABLE_DBUS", true);

        Ok(Self {
            db_path,
            remote_url,
            remote_token,
            probe_interval,
            sync_interval,
            enable_dbus,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonStatus {
    pub notes: i64,
    pub queued: i64,
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    engine: Arc<SyncEngine>,
    notes: Arc<NotesService>,
    board: Arc<StatusBoard>,
    probe: Option<Arc<dyn ConnectivityProbe>>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let store = NoteStore::open(&config.db_path)
            .await
            .with_context(|| format!("failed to open note store at {:?}", config.db_path))?;
        let store = Arc::new(store);

        let mut client = NotesClient::new(&config.remote_url)
            .with_context(|| format!("invalid remote url {}", config.remote_url))?;
        if let Some(token) = &config.remote_token {
            client = client.with_token(token.clone());
        }

        let probe = TcpProbe::for_url(client.base_url(), PROBE_TIMEOUT)
            .map(|probe| Arc::new(probe) as Arc<dyn ConnectivityProbe>);
        let initial = match &probe {
            Some(probe) => probe.probe().await,
            None => Connectivity::Online,
        };
        info!(state = ?initial, "initial connectivity");

        let board = Arc::new(StatusBoard::attach(store.events()));
        let engine = Arc::new(SyncEngine::new(store, Arc::new(client), initial));
        let notes = Arc::new(NotesService::new(Arc::clone(&engine)));

        Ok(Self {
            config,
            engine,
            notes,
            board,
            probe,
        })
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub async fn sync_once(&self) -> SyncOutcome {
        self.engine.sync_data().await
    }

    pub async fn status(&self) -> anyhow::Result<DaemonStatus> {
        read_status(self.engine.store()).await
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            db = %self.config.db_path.display(),
            remote = %self.config.remote_url,
            probe_secs = self.config.probe_interval.map_or(0, |interval| interval.as_secs()),
            dbus = self.config.enable_dbus,
            "notesd started"
        );

        let dbus_connection = if self.config.enable_dbus {
            let service = NotesDbusService::new(Arc::clone(&self.notes), Arc::clone(&self.board));
            match start_dbus(service).await {
                Ok(connection) => Some(connection),
                Err(err) => {
                    warn!(error = %err, "D-Bus service unavailable");
                    None
                }
            }
        } else {
            None
        };

        let signals = match &dbus_connection {
            Some(connection) => {
                let emitter = SignalEmitter::new(connection, DBUS_OBJECT_PATH)
                    .context("failed to create D-Bus signal emitter")?
                    .into_owned();
                let (bridge, mut signal_rx) = SignalBridge::attach(self.engine.events());
                let handle = tokio::spawn(async move {
                    while let Some(signal) = signal_rx.recv().await {
                        if let Err(err) = emit_signal(&emitter, signal).await {
                            warn!(error = %err, "failed to emit D-Bus signal");
                        }
                    }
                });
                Some((bridge, handle))
            }
            None => None,
        };

        let (connectivity_rx, watcher_handle) = match (&self.probe, self.config.probe_interval) {
            (Some(probe), Some(interval)) => {
                let initial = Connectivity::from_online(self.engine.is_online());
                let (rx, handle) = watch_connectivity(Arc::clone(probe), initial, interval);
                (Some(rx), Some(handle))
            }
            _ => (None, None),
        };

        let scheduler_handle = tokio::spawn(run_scheduler(
            Arc::clone(&self.engine),
            connectivity_rx,
            self.config.sync_interval,
        ));

        tokio::signal::ctrl_c()
            .await
            .context("failed waiting for shutdown signal")?;
        info!("shutting down");

        scheduler_handle.abort();
        if let Some(handle) = watcher_handle {
            handle.abort();
        }
        if let Some((bridge, handle)) = signals {
            bridge.detach();
            handle.abort();
        }
        self.board.detach();
        drop(dbus_connection);
        self.engine.store().close().await;

        Ok(())
    }
}

// A pass at start, on every return to online, every `interval` while online,
// and after a failure once the backoff delay has passed.
async fn run_scheduler(
    engine: Arc<SyncEngine>,
    mut connectivity: Option<watch::Receiver<Connectivity>>,
    interval: Duration,
) {
    let mut retry = RetryState::new(Backoff::for_sync_retries());
    let mut delay = Duration::ZERO;
    loop {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                changed = next_connectivity(&mut connectivity) => match changed {
                    Some(state) if engine.set_connectivity(state) => break,
                    Some(_) => {}
                    None => connectivity = None,
                },
            }
        }

        let outcome = engine.sync_data().await;
        delay = next_delay(&outcome, &mut retry, interval);
    }
}

async fn start_dbus(service: NotesDbusService) -> zbus::Result<zbus::Connection> {
    ConnectionBuilder::session()?
        .name(DBUS_NAME)?
        .serve_at(DBUS_OBJECT_PATH, service)?
        .build()
        .await
}

async fn emit_signal(emitter: &SignalEmitter<'_>, signal: BusSignal) -> zbus::Result<()> {
    match signal {
        BusSignal::QueueChanged => NotesDbusService::queue_changed(emitter).await,
        BusSignal::SyncStatus(scope, status) => {
            NotesDbusService::sync_status_changed(emitter, &scope.to_string(), status.as_str())
                .await
        }
    }
}

pub async fn read_status(store: &NoteStore) -> anyhow::Result<DaemonStatus> {
    Ok(DaemonStatus {
        notes: store.count().await.context("failed to count notes")?,
        queued: store.queue_len().await.context("failed to read queue")?,
    })
}

// Operator commands that must work offline open only the store.
pub async fn open_store(config: &DaemonConfig) -> anyhow::Result<NoteStore> {
    NoteStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open note store at {:?}", config.db_path))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BusSignal {
    QueueChanged,
    SyncStatus(StatusScope, SyncStatus),
}

// Forwards bus events into a channel drained by the D-Bus emitter task. Only
// attached while a connection exists; nothing else reads the channel.
struct SignalBridge {
    queue: Subscription,
    status: Subscription,
}

impl SignalBridge {
    fn attach(events: &EventBus) -> (Self, mpsc::UnboundedReceiver<BusSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue_tx = tx.clone();
        let queue = events.subscribe_queue_change(move || {
            let _ = queue_tx.send(BusSignal::QueueChanged);
        });
        let status = events.subscribe_sync_status(StatusScope::All, move |event| {
            let _ = tx.send(BusSignal::SyncStatus(event.scope.clone(), event.status));
        });
        (Self { queue, status }, rx)
    }

    fn detach(mut self) {
        self.queue.unsubscribe();
        self.status.unsubscribe();
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
