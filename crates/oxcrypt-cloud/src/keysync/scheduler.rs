use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::KeySyncConfig;
use super::processor::MissingKeysProcessor;

/// Periodic missing-key maintenance.
///
/// Runs never overlap: the next tick is awaited only after the previous run
/// finished, and ticks missed meanwhile are skipped.
pub struct KeyMaintenanceTask;

impl KeyMaintenanceTask {
    /// Start the task on the current runtime. The first run starts right away.
    pub fn spawn(processor: Arc<MissingKeysProcessor>, config: &KeySyncConfig) -> KeyMaintenanceHandle {
        let cancel = CancellationToken::new();
        let runs = Arc::new(AtomicU64::new(0));
        let period = config.period;
        info!(?period, "Starting key maintenance");

        let join = tokio::spawn({
            let cancel = cancel.clone();
            let runs = Arc::clone(&runs);
            async move {
                let mut interval = time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        _ = interval.tick() => {}
                    }
                    let processed = tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        processed = processor.process() => processed,
                    };
                    let run = runs.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(run, submitted = processed.len(), "Key maintenance run finished");
                }
                info!("Key maintenance stopped");
            }
        });

        KeyMaintenanceHandle { cancel, join, runs }
    }
}

/// Control over a running [`KeyMaintenanceTask`].
pub struct KeyMaintenanceHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
    runs: Arc<AtomicU64>,
}

impl KeyMaintenanceHandle {
    /// Completed runs so far.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the task, interrupting a run in progress, and wait for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            debug!(error = %e, "Key maintenance task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::keysync::credentials::PasswordStore;
    use crate::keysync::processor::tests::{ScriptedPrompt, fixture};

    #[tokio::test(start_paused = true)]
    async fn test_keeps_ticking_after_canceled_prompt() {
        let (api, _, _) = fixture();
        let api = Arc::new(api);
        let processor = Arc::new(MissingKeysProcessor::new(
            api.clone(),
            Arc::new(ScriptedPrompt::default()),
            Arc::new(PasswordStore::new()),
            "host",
        ));

        let handle = KeyMaintenanceTask::spawn(
            processor,
            &KeySyncConfig::default().period(Duration::from_secs(10)),
        );
        time::sleep(Duration::from_secs(35)).await;
        assert!(handle.runs() >= 3);
        assert!(!handle.is_finished());
        assert!(api.submitted.lock().is_empty());

        handle.shutdown().await;
    }
}
