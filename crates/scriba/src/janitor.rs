//! Periodic retention sweeper.
//!
//! Evicts terminal job records past the retention window and reconciles
//! cancellations whose owning worker never observed the flag. Runs on its
//! own thread and talks to the rest of the system only through the
//! registry's synchronized interface and the pool handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::pool::PoolHandle;
use crate::registry::JobRegistry;

/// What one sweep cycle did, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Terminal records evicted past the retention window.
    pub evicted: usize,
    /// Stuck `cancelling` jobs force-cancelled.
    pub reconciled: usize,
}

pub struct RetentionSweeper {
    registry: Arc<JobRegistry>,
    pool: PoolHandle,
    retention: Duration,
    grace: Duration,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl RetentionSweeper {
    pub fn new(
        registry: Arc<JobRegistry>,
        pool: PoolHandle,
        retention: Duration,
        grace: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            pool,
            retention,
            grace,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts the sweep loop in a background thread. The trigger receiver
    /// forces an immediate cycle, mainly for tests and admin tooling.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let pool = self.pool.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let retention = self.retention;
        let grace = self.grace;
        let interval = self.interval;

        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build sweeper runtime");

            rt.block_on(async {
                let mut interval_timer = tokio::time::interval(interval);
                interval_timer.tick().await; // skip immediate first tick

                loop {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    tokio::select! {
                        _ = interval_timer.tick() => {},
                        Ok(()) = trigger_rx.recv() => {
                            log::debug!("Manual sweep triggered");
                        },
                    }

                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    let stats = run_cycle(&registry, &pool, Utc::now(), retention, grace);
                    if stats != SweepStats::default() {
                        log::info!(
                            "Sweep cycle: evicted {}, reconciled {}",
                            stats.evicted,
                            stats.reconciled
                        );
                    }
                }
            });
        })
    }

    /// Signals the sweeper to stop after its current cycle.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

/// One sweep cycle. A problem with any single record (e.g. the pool handle
/// refusing a reset) is logged and skipped; it never aborts the rest of the
/// cycle.
pub(crate) fn run_cycle(
    registry: &JobRegistry,
    pool: &PoolHandle,
    now: DateTime<Utc>,
    retention: Duration,
    grace: Duration,
) -> SweepStats {
    let mut stats = SweepStats::default();

    let eviction_cutoff = now - chrono_duration(retention);
    for job_id in registry.evict_terminal(eviction_cutoff) {
        log::debug!("Evicted terminal job {job_id} past retention window");
        stats.evicted += 1;
    }

    let grace_cutoff = now - chrono_duration(grace);
    for job_id in registry.stuck_cancelling(grace_cutoff) {
        if !registry.force_cancel(&job_id) {
            // Worker checkpoint won the race since the scan.
            continue;
        }
        stats.reconciled += 1;
        log::warn!("Force-cancelled job {job_id}; its worker never observed the flag");
        if let Err(e) = pool.reset_slot_for(&job_id) {
            log::error!("Could not request slot reset for job {job_id}: {e}");
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    use crate::models::Language;
    use crate::pool::ControlMsg;
    use crate::registry::JobStatus;

    const MODEL: &str = "distil_large_v3_ptbr";

    fn test_pool_handle() -> (PoolHandle, crossbeam_channel::Receiver<ControlMsg>) {
        let (control_tx, control_rx) = unbounded();
        (PoolHandle { control_tx }, control_rx)
    }

    fn hour() -> Duration {
        Duration::from_secs(3600)
    }

    #[test]
    fn young_terminal_records_survive_a_sweep() {
        let registry = Arc::new(JobRegistry::new());
        let (pool, _rx) = test_pool_handle();
        let record = registry.create("s1", "a.wav", MODEL, Language::Portuguese);
        registry.try_claim_for_processing(&record.id).unwrap();
        registry.finish_failure(&record.id, "boom".to_string());

        let stats = run_cycle(&registry, &pool, Utc::now(), hour(), Duration::from_secs(60));
        assert_eq!(stats.evicted, 0);
        assert!(registry.get(&record.id).is_some());
    }

    #[test]
    fn old_terminal_records_are_evicted_and_active_ones_kept() {
        let registry = Arc::new(JobRegistry::new());
        let (pool, _rx) = test_pool_handle();

        let old = registry.create("s1", "old.wav", MODEL, Language::Portuguese);
        registry.try_claim_for_processing(&old.id).unwrap();
        registry.finish_failure(&old.id, "boom".to_string());
        registry.backdate_finished(&old.id, Utc::now() - chrono::Duration::hours(2));

        let active = registry.create("s1", "active.wav", MODEL, Language::Portuguese);
        registry.try_claim_for_processing(&active.id).unwrap();

        let stats = run_cycle(&registry, &pool, Utc::now(), hour(), Duration::from_secs(60));
        assert_eq!(stats.evicted, 1);
        assert!(registry.get(&old.id).is_none());
        assert!(registry.get(&active.id).is_some());
    }

    #[test]
    fn stuck_cancelling_is_forced_and_slot_reset_requested() {
        let registry = Arc::new(JobRegistry::new());
        let (pool, rx) = test_pool_handle();

        let record = registry.create("s1", "a.wav", MODEL, Language::Portuguese);
        registry.try_claim_for_processing(&record.id).unwrap();
        registry.begin_cancel(&record.id);
        registry.backdate_cancel_request(&record.id, Utc::now() - chrono::Duration::minutes(5));

        let stats = run_cycle(&registry, &pool, Utc::now(), hour(), Duration::from_secs(60));
        assert_eq!(stats.reconciled, 1);
        assert_eq!(registry.get(&record.id).unwrap().status, JobStatus::Cancelled);

        match rx.try_recv().unwrap() {
            ControlMsg::ResetFor { job_id } => assert_eq!(job_id, record.id),
            _ => panic!("expected a slot reset request"),
        }
    }

    #[test]
    fn fresh_cancelling_is_left_for_the_worker() {
        let registry = Arc::new(JobRegistry::new());
        let (pool, rx) = test_pool_handle();

        let record = registry.create("s1", "a.wav", MODEL, Language::Portuguese);
        registry.try_claim_for_processing(&record.id).unwrap();
        registry.begin_cancel(&record.id);

        let stats = run_cycle(&registry, &pool, Utc::now(), hour(), Duration::from_secs(60));
        assert_eq!(stats.reconciled, 0);
        assert_eq!(registry.get(&record.id).unwrap().status, JobStatus::Cancelling);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_pool_handle_does_not_abort_the_cycle() {
        let registry = Arc::new(JobRegistry::new());
        let (pool, rx) = test_pool_handle();
        drop(rx);

        for filename in ["a.wav", "b.wav"] {
            let record = registry.create("s1", filename, MODEL, Language::Portuguese);
            registry.try_claim_for_processing(&record.id).unwrap();
            registry.begin_cancel(&record.id);
            registry
                .backdate_cancel_request(&record.id, Utc::now() - chrono::Duration::minutes(5));
        }

        let stats = run_cycle(&registry, &pool, Utc::now(), hour(), Duration::from_secs(60));
        assert_eq!(stats.reconciled, 2);
    }

    #[test]
    fn sweeper_thread_shuts_down() {
        let registry = Arc::new(JobRegistry::new());
        let (pool, _rx) = test_pool_handle();
        let sweeper = RetentionSweeper::new(
            registry,
            pool,
            hour(),
            Duration::from_secs(60),
            Duration::from_millis(50),
        );

        let (trigger_tx, trigger_rx) = broadcast::channel(16);
        let handle = sweeper.start(trigger_rx);

        std::thread::sleep(Duration::from_millis(100));
        sweeper.stop();
        // Wake the select loop so it observes the shutdown flag.
        let _ = trigger_tx.send(());

        handle.join().expect("sweeper thread panicked");
    }
}
