use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, trace};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn from_online(online: bool) -> Self {
        if online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        }
    }

    pub fn is_online(self) -> bool {
        self == Connectivity::Online
    }
}

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self) -> Connectivity;
}

// Online when a TCP connection to the remote host succeeds in time.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    pub fn for_url(url: &Url, timeout: Duration) -> Option<Self> {
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(Self::new(host, port, timeout))
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn probe(&self) -> Connectivity {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_)) => Connectivity::Online,
            Ok(Err(err)) => {
                trace!(address = %self.address(), error = %err, "probe failed");
                Connectivity::Offline
            }
            Err(_) => {
                trace!(address = %self.address(), "probe timed out");
                Connectivity::Offline
            }
        }
    }
}

// Polls `probe` every `interval` and publishes transitions. The task ends
// once every receiver is gone.
pub fn watch_connectivity(
    probe: Arc<dyn ConnectivityProbe>,
    initial: Connectivity,
    interval: Duration,
) -> (watch::Receiver<Connectivity>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(initial);
    let handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if tx.is_closed() {
                break;
            }
            let observed = probe.probe().await;
            let changed = tx.send_if_modified(|current| {
                if *current == observed {
                    return false;
                }
                *current = observed;
                true
            });
            if changed {
                info!(state = ?observed, "connectivity changed");
            }
        }
    });
    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    struct ScriptedProbe {
        script: Mutex<VecDeque<Connectivity>>,
        fallback: Connectivity,
    }

    #[async_trait]
    impl ConnectivityProbe for ScriptedProbe {
        async fn probe(&self) -> Connectivity {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.fallback)
        }
    }

    #[tokio::test]
    async fn tcp_probe_sees_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = TcpProbe::new("127.0.0.1", port, Duration::from_secs(1));

        assert_eq!(probe.probe().await, Connectivity::Online);

        drop(listener);
        assert_eq!(probe.probe().await, Connectivity::Offline);
    }

    #[test]
    fn probe_target_comes_from_url() {
        let url = Url::parse("https://notes.example.org/api/").unwrap();
        let probe = TcpProbe::for_url(&url, Duration::from_secs(1)).unwrap();
        assert_eq!(probe.address(), "notes.example.org:443");

        let url = Url::parse("http://localhost:8080/").unwrap();
        let probe = TcpProbe::for_url(&url, Duration::from_secs(1)).unwrap();
        assert_eq!(probe.address(), "localhost:8080");
    }

    #[tokio::test(start_paused = true)]
    async fn watcher_publishes_only_transitions() {
        let probe = Arc::new(ScriptedProbe {
            script: Mutex::new(VecDeque::from([
                Connectivity::Offline,
                Connectivity::Online,
                Connectivity::Online,
                Connectivity::Offline,
            ])),
            fallback: Connectivity::Offline,
        });
        let (mut rx, handle) =
            watch_connectivity(probe, Connectivity::Offline, Duration::from_secs(5));

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Connectivity::Online);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Connectivity::Offline);

        drop(rx);
        handle.await.unwrap();
    }
}
