//! Slot threads: one persistent thread per slot, bound to one loaded engine.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};

use crate::cancel::CancellationCoordinator;
use crate::engine::{EngineFactory, EngineInput, EngineOutcome};
use crate::models::ModelSpec;
use crate::pool::{ControlMsg, SlotOutcome};
use crate::registry::{estimate_completion, JobRegistry};

/// One unit of work handed to a slot. The job is already `processing` when
/// the assignment is sent.
pub(crate) struct Assignment {
    pub job_id: String,
    pub input: EngineInput,
    pub started_at: DateTime<Utc>,
}

fn panic_detail(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

/// Body of a slot thread. Loads the engine once, then processes assignments
/// until the sender is dropped. A panic escaping the engine adapter poisons
/// the instance: it is discarded and reloaded before the next assignment.
pub(crate) fn run_slot(
    slot_index: usize,
    generation: u64,
    spec: ModelSpec,
    factory: Arc<dyn EngineFactory>,
    assignments: Receiver<Assignment>,
    events: Sender<ControlMsg>,
    registry: Arc<JobRegistry>,
    coordinator: CancellationCoordinator,
) {
    log::debug!(
        "Slot {slot_index} (gen {generation}) starting for model {}",
        spec.id
    );

    let mut engine = match factory.load(&spec) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("Slot {slot_index} failed to load engine for {}: {e}", spec.id);
            let _ = events.send(ControlMsg::SlotDead {
                slot: slot_index,
                generation,
                reason: e.to_string(),
            });
            return;
        }
    };

    for assignment in assignments.iter() {
        let Assignment {
            job_id,
            input,
            started_at,
        } = assignment;
        log::debug!("Slot {slot_index} processing job {job_id}");

        let progress_registry = Arc::clone(&registry);
        let progress_job = job_id.clone();
        let on_progress = move |percent: u8| {
            let now = Utc::now();
            let eta = estimate_completion(started_at, percent.min(100), now);
            progress_registry.update_progress(&progress_job, percent, eta);
        };
        let is_cancelled = coordinator.check_for(&job_id);

        let run = catch_unwind(AssertUnwindSafe(|| {
            engine.run(&input, &on_progress, &is_cancelled)
        }));

        let outcome = match run {
            Ok(EngineOutcome::Completed(raw)) => SlotOutcome::Completed(raw),
            Ok(EngineOutcome::Cancelled) => SlotOutcome::Cancelled,
            Ok(EngineOutcome::Fault(detail)) => SlotOutcome::EngineFault(detail),
            Err(panic) => {
                log::error!(
                    "Slot {slot_index} executor fault on job {job_id}: {}",
                    panic_detail(panic)
                );
                // The instance may be corrupted; reload before reuse.
                match factory.load(&spec) {
                    Ok(fresh) => engine = fresh,
                    Err(e) => {
                        log::error!(
                            "Slot {slot_index} could not reload engine for {}: {e}",
                            spec.id
                        );
                        let _ = events.send(ControlMsg::SlotDone {
                            slot: slot_index,
                            generation,
                            job_id,
                            outcome: SlotOutcome::ExecutorFault,
                        });
                        let _ = events.send(ControlMsg::SlotDead {
                            slot: slot_index,
                            generation,
                            reason: e.to_string(),
                        });
                        return;
                    }
                }
                SlotOutcome::ExecutorFault
            }
        };

        if events
            .send(ControlMsg::SlotDone {
                slot: slot_index,
                generation,
                job_id,
                outcome,
            })
            .is_err()
        {
            break;
        }
    }

    log::debug!("Slot {slot_index} (gen {generation}) stopped");
}
