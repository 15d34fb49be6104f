//! Background maintenance: idle eviction on a slow tick, permission-prompt
//! answering on a fast one.
//!
//! Runs as a tokio task. Orchestrator calls block on driver I/O, so each tick
//! hands its work to `spawn_blocking`. The task stops when the handle's stop
//! channel fires or is dropped.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::orchestrator::Orchestrator;

pub struct MaintenanceHandle {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Signal the task and wait for the tick in progress to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        if let Err(e) = self.task.await {
            log::warn!("maintenance: task ended abnormally: {e}");
        }
    }
}

/// Start the maintenance loop. Must be called from within a tokio runtime.
pub fn start_maintenance(orchestrator: Arc<Orchestrator>) -> MaintenanceHandle {
    let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
    let config = orchestrator.config().clone();

    let task = tokio::spawn(async move {
        let mut sweep = interval(config.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut approvals = interval(config.approval_interval());
        approvals.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // The first tick completes immediately; nothing is idle yet.
        sweep.tick().await;

        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = sweep.tick() => {
                    let orch = Arc::clone(&orchestrator);
                    match tokio::task::spawn_blocking(move || orch.sweep()).await {
                        Ok(evicted) if !evicted.is_empty() => {
                            log::info!("maintenance: evicted idle tabs {evicted:?}");
                        }
                        Ok(_) => {}
                        Err(e) => log::warn!("maintenance: sweep panicked: {e}"),
                    }
                }
                _ = approvals.tick(), if config.approval.enabled => {
                    let orch = Arc::clone(&orchestrator);
                    if let Err(e) = tokio::task::spawn_blocking(move || orch.scan_approvals()).await {
                        log::warn!("maintenance: approval scan panicked: {e}");
                    }
                }
            }
        }
        log::debug!("maintenance: stopped");
    });

    MaintenanceHandle { stop_tx, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::testing::{FakeFactory, Sent};
    use conductor_pty::Key;
    use std::time::Duration;

    fn config() -> OrchestratorConfig {
        let mut config = OrchestratorConfig::default();
        config.poll_interval_ms = 5;
        config.ready_timeout_ms = 100;
        config.driver.command = "fake".to_string();
        config.driver.startup_keys = Vec::new();
        config
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_answers_prompt_in_background() {
        let mut config = config();
        config.approval.interval_ms = 10;
        let factory = FakeFactory::new();
        let orch = Arc::new(Orchestrator::new(config, factory.clone(), None).unwrap());

        let create = Arc::clone(&orch);
        tokio::task::spawn_blocking(move || create.create_session("a", None))
            .await
            .unwrap()
            .unwrap();
        let state = factory.driver(0);
        state
            .lock()
            .unwrap()
            .screen
            .extend(["Do you want to proceed?", "❯ 1. Yes"].map(String::from));

        let handle = start_maintenance(Arc::clone(&orch));
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.stop().await;

        let sent = state.lock().unwrap().sent.clone();
        assert_eq!(sent, vec![Sent::Literal("1".to_string()), Sent::Key(Key::Enter)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sweep_evicts_idle_sessions() {
        let mut config = config();
        config.idle_timeout_secs = 0;
        config.sweep_interval_secs = 1;
        config.approval.enabled = false;
        let factory = FakeFactory::new();
        let orch = Arc::new(Orchestrator::new(config, factory, None).unwrap());

        let create = Arc::clone(&orch);
        tokio::task::spawn_blocking(move || create.create_session("a", None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(orch.session_count(), 1);

        let handle = start_maintenance(Arc::clone(&orch));
        tokio::time::sleep(Duration::from_millis(1_300)).await;
        handle.stop().await;

        assert_eq!(orch.session_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_is_prompt() {
        let factory = FakeFactory::new();
        let orch = Arc::new(Orchestrator::new(config(), factory, None).unwrap());
        let handle = start_maintenance(orch);
        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .unwrap();
    }
}
