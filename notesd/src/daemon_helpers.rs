fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

fn read_optional_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

// Resolves on the next connectivity transition; never resolves without a
// watcher. `None` means the watcher is gone.
async fn next_connectivity(
    connectivity: &mut Option<watch::Receiver<Connectivity>>,
) -> Option<Connectivity> {
    match connectivity {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

// A rejected change needs an operator, so it waits the full interval.
fn next_delay(outcome: &SyncOutcome, retry: &mut RetryState, interval: Duration) -> Duration {
    match outcome {
        SyncOutcome::Completed(_) => {
            retry.record_success();
            interval
        }
        SyncOutcome::Failed(_) => retry.record_failure(),
        SyncOutcome::Rejected(_) | SyncOutcome::Offline | SyncOutcome::AlreadyRunning => {
            interval
        }
    }
}

pub fn describe_outcome(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Offline => "remote unreachable, nothing sent".to_string(),
        SyncOutcome::AlreadyRunning => "another pass is running".to_string(),
        SyncOutcome::Completed(summary) => format!(
            "sent {} change(s), pulled {} note(s), updated {} locally",
            summary.drained, summary.pulled, summary.merged
        ),
        SyncOutcome::Failed(reason) => format!("sync failed: {reason}"),
        SyncOutcome::Rejected(reason) => {
            format!("remote rejected a queued change: {reason} (see --clear-queue)")
        }
    }
}
