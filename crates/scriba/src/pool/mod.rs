//! The worker pool manager: binds queued jobs to idle engine-compatible
//! slots and turns every slot outcome into a registry transition.
//!
//! One control thread owns all dispatch decisions and the slot table; slot
//! threads only ever talk back over the control channel. A dispatch tick is
//! pure bookkeeping; the heavy work happens inside the slots.

pub(crate) mod slot;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Sender};

use crate::cache::ResultCache;
use crate::cancel::CancellationCoordinator;
use crate::engine::{EngineFactory, EngineInput, RawTranscript};
use crate::error::PoolError;
use crate::models::ModelSpec;
use crate::pool::slot::Assignment;
use crate::registry::{FinishDisposition, JobRegistry, JobStatus};
use crate::render;

/// Error detail recorded when a fault escapes the engine adapter instead of
/// being returned as a structured failure.
const EXECUTOR_FAULT_DETAIL: &str =
    "Transcription executor crashed unexpectedly; the worker slot was reset";

/// What a slot reports back for one finished assignment.
#[derive(Debug)]
pub(crate) enum SlotOutcome {
    Completed(RawTranscript),
    Cancelled,
    /// Structured engine failure; detail preserved verbatim.
    EngineFault(String),
    /// Panic escaped the adapter; the job gets a generic detail.
    ExecutorFault,
}

pub(crate) enum ControlMsg {
    Submit(Box<SubmitMsg>),
    SlotDone {
        slot: usize,
        generation: u64,
        job_id: String,
        outcome: SlotOutcome,
    },
    /// Slot thread exited because its engine could not be (re)loaded.
    SlotDead {
        slot: usize,
        generation: u64,
        reason: String,
    },
    /// Sweeper reconciliation: replace whichever slot still claims this job.
    ResetFor {
        job_id: String,
    },
    Shutdown,
}

pub(crate) struct SubmitMsg {
    pub job_id: String,
    pub input: EngineInput,
    /// Content hash for caching the result on success.
    pub content_key: Option<String>,
}

/// Cloneable handle for components that only need to poke the control loop
/// (currently the retention sweeper's slot reset).
#[derive(Clone)]
pub struct PoolHandle {
    pub(crate) control_tx: Sender<ControlMsg>,
}

impl PoolHandle {
    pub fn reset_slot_for(&self, job_id: &str) -> Result<(), PoolError> {
        self.control_tx
            .send(ControlMsg::ResetFor {
                job_id: job_id.to_string(),
            })
            .map_err(|_| PoolError::ChannelClosed)
    }
}

pub struct WorkerPool {
    control_tx: Sender<ControlMsg>,
    controller: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawns one slot thread per configured worker of every enabled model,
    /// plus the control thread, and returns immediately.
    pub fn start(
        registry: Arc<JobRegistry>,
        coordinator: CancellationCoordinator,
        factory: Arc<dyn EngineFactory>,
        cache: Arc<ResultCache>,
        models: Vec<ModelSpec>,
        default_workers: usize,
    ) -> Self {
        let (control_tx, control_rx) = unbounded::<ControlMsg>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut controller = Controller {
            slots: Vec::new(),
            pending: VecDeque::new(),
            inputs: HashMap::new(),
            content_keys: HashMap::new(),
            registry,
            coordinator,
            factory,
            cache,
            control_tx: control_tx.clone(),
        };

        for spec in models {
            let workers = spec.workers.unwrap_or(default_workers).max(1);
            for _ in 0..workers {
                controller.spawn_slot(spec.clone());
            }
        }
        log::info!("Started worker pool with {} slots", controller.slots.len());

        let handle = thread::Builder::new()
            .name("scriba-dispatch".to_string())
            .spawn(move || controller.run(control_rx))
            .expect("failed to spawn dispatch thread");

        Self {
            control_tx,
            controller: Some(handle),
            shutdown,
        }
    }

    /// Hands a queued job to the control loop. The job must already exist in
    /// the registry; dispatch happens on the next tick.
    pub fn submit(
        &self,
        job_id: &str,
        input: EngineInput,
        content_key: Option<String>,
    ) -> Result<(), PoolError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(PoolError::ChannelClosed);
        }
        self.control_tx
            .send(ControlMsg::Submit(Box::new(SubmitMsg {
                job_id: job_id.to_string(),
                input,
                content_key,
            })))
            .map_err(|_| PoolError::ChannelClosed)
    }

    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            control_tx: self.control_tx.clone(),
        }
    }

    /// Signals the control loop to stop. Idle slots exit promptly; a slot in
    /// the middle of an engine call finishes that call first.
    pub fn shutdown(&self) {
        log::info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.control_tx.send(ControlMsg::Shutdown);
    }

    /// Blocks until the control thread (and with it, every live slot) has
    /// exited. A hung engine call blocks this indefinitely, since there is no
    /// hard timeout on external calls.
    pub fn wait(mut self) {
        if let Some(handle) = self.controller.take() {
            if handle.join().is_err() {
                log::error!("Dispatch thread panicked");
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

struct SlotState {
    spec: ModelSpec,
    generation: u64,
    busy_with: Option<String>,
    dead: bool,
    assign_tx: Sender<Assignment>,
    handle: Option<JoinHandle<()>>,
}

struct Controller {
    slots: Vec<SlotState>,
    /// Queued job ids in arrival order.
    pending: VecDeque<String>,
    /// Audio and metadata for jobs not yet assigned.
    inputs: HashMap<String, EngineInput>,
    /// Cache keys for jobs in the pipeline, keyed by job id.
    content_keys: HashMap<String, String>,
    registry: Arc<JobRegistry>,
    coordinator: CancellationCoordinator,
    factory: Arc<dyn EngineFactory>,
    cache: Arc<ResultCache>,
    control_tx: Sender<ControlMsg>,
}

impl Controller {
    fn spawn_slot(&mut self, spec: ModelSpec) {
        let index = self.slots.len();
        let state = self.build_slot(index, spec, 0);
        self.slots.push(state);
    }

    fn build_slot(&self, index: usize, spec: ModelSpec, generation: u64) -> SlotState {
        // Capacity 1: a slot holds at most one assignment.
        let (assign_tx, assign_rx) = bounded::<Assignment>(1);
        let handle = thread::Builder::new()
            .name(format!("scriba-slot-{index}"))
            .spawn({
                let spec = spec.clone();
                let factory = Arc::clone(&self.factory);
                let events = self.control_tx.clone();
                let registry = Arc::clone(&self.registry);
                let coordinator = self.coordinator.clone();
                move || {
                    slot::run_slot(
                        index, generation, spec, factory, assign_rx, events, registry,
                        coordinator,
                    )
                }
            })
            .expect("failed to spawn slot thread");

        SlotState {
            spec,
            generation,
            busy_with: None,
            dead: false,
            assign_tx,
            handle: Some(handle),
        }
    }

    fn run(mut self, control_rx: crossbeam_channel::Receiver<ControlMsg>) {
        for msg in control_rx.iter() {
            match msg {
                ControlMsg::Submit(submit) => {
                    let SubmitMsg {
                        job_id,
                        input,
                        content_key,
                    } = *submit;
                    if let Some(key) = content_key {
                        self.content_keys.insert(job_id.clone(), key);
                    }
                    self.inputs.insert(job_id.clone(), input);
                    self.pending.push_back(job_id);
                    self.dispatch();
                }
                ControlMsg::SlotDone {
                    slot,
                    generation,
                    job_id,
                    outcome,
                } => {
                    if self.slots[slot].generation != generation {
                        // Event from an abandoned slot; its job was already
                        // reconciled by the sweeper.
                        log::debug!("Dropping stale outcome for job {job_id} from slot {slot}");
                        continue;
                    }
                    self.slots[slot].busy_with = None;
                    self.settle(&job_id, outcome);
                    self.dispatch();
                }
                ControlMsg::SlotDead {
                    slot,
                    generation,
                    reason,
                } => {
                    if self.slots[slot].generation != generation {
                        continue;
                    }
                    self.slots[slot].dead = true;
                    self.slots[slot].busy_with = None;
                    let model_id = self.slots[slot].spec.id;
                    log::error!("Slot {slot} for model {model_id} is dead: {reason}");
                    if !self
                        .slots
                        .iter()
                        .any(|s| s.spec.id == model_id && !s.dead)
                    {
                        log::error!(
                            "Model {model_id} has no live slots; its queued jobs will not run"
                        );
                    }
                }
                ControlMsg::ResetFor { job_id } => {
                    if let Some(index) = self
                        .slots
                        .iter()
                        .position(|s| s.busy_with.as_deref() == Some(job_id.as_str()))
                    {
                        log::warn!("Resetting slot {index} still bound to job {job_id}");
                        self.reset_slot(index);
                        self.dispatch();
                    }
                }
                ControlMsg::Shutdown => break,
            }
        }

        // Drop assignment senders so idle slots exit, then join them.
        let handles: Vec<_> = self
            .slots
            .drain(..)
            .filter_map(|mut s| s.handle.take())
            .collect();
        for (index, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() {
                log::error!("Slot thread {index} panicked");
            }
        }
        log::info!("Worker pool stopped");
    }

    /// Replaces a slot with a fresh thread and engine under a bumped
    /// generation. The abandoned thread keeps running its hung call; any
    /// outcome it eventually reports is discarded by the generation check.
    fn reset_slot(&mut self, index: usize) {
        let spec = self.slots[index].spec.clone();
        let generation = self.slots[index].generation + 1;
        let fresh = self.build_slot(index, spec, generation);
        let old = std::mem::replace(&mut self.slots[index], fresh);
        // Dropping the old handle detaches the thread; joining it could
        // block forever on the hung engine call.
        drop(old);
    }

    /// One dispatch tick: scan queued jobs in arrival order and assign each
    /// to an idle slot bound to its model. Jobs whose model has no idle slot
    /// stay queued without blocking later jobs for other models.
    fn dispatch(&mut self) {
        let mut index = 0;
        while index < self.pending.len() {
            let job_id = self.pending[index].clone();

            let model_id = match self.registry.get(&job_id) {
                Some(record) if record.status == JobStatus::Queued => record.model_id,
                // Cancelled before dispatch, or evicted: drop the entry.
                _ => {
                    self.forget(&job_id);
                    let _ = self.pending.remove(index);
                    continue;
                }
            };

            let slot_index = self.slots.iter().position(|s| {
                !s.dead && s.busy_with.is_none() && s.spec.id == model_id
            });
            let Some(slot_index) = slot_index else {
                index += 1;
                continue;
            };

            let Some(started_at) = self.registry.try_claim_for_processing(&job_id) else {
                self.forget(&job_id);
                let _ = self.pending.remove(index);
                continue;
            };
            let Some(input) = self.inputs.remove(&job_id) else {
                // No input means a bookkeeping bug; fail loudly in the record.
                log::error!("No input retained for job {job_id}");
                self.registry
                    .finish_failure(&job_id, EXECUTOR_FAULT_DETAIL.to_string());
                let _ = self.pending.remove(index);
                continue;
            };

            log::debug!(
                "Dispatching job {job_id} to slot {slot_index} ({model_id})"
            );
            self.slots[slot_index].busy_with = Some(job_id.clone());
            if self.slots[slot_index]
                .assign_tx
                .send(Assignment {
                    job_id: job_id.clone(),
                    input,
                    started_at,
                })
                .is_err()
            {
                // Slot thread died between liveness check and send.
                self.slots[slot_index].dead = true;
                self.slots[slot_index].busy_with = None;
                self.registry
                    .finish_failure(&job_id, EXECUTOR_FAULT_DETAIL.to_string());
            }
            let _ = self.pending.remove(index);
        }
    }

    /// Converts a slot outcome into the registry transition it implies.
    /// Every outcome is absorbed here; a fault never escapes into the
    /// dispatch loop itself.
    fn settle(&mut self, job_id: &str, outcome: SlotOutcome) {
        let content_key = self.content_keys.remove(job_id);
        match outcome {
            SlotOutcome::Completed(raw) => {
                let Some(record) = self.registry.get(job_id) else {
                    return;
                };
                let result = render::render(&record.filename, raw);
                match self.registry.finish_success(job_id, result.clone()) {
                    FinishDisposition::Applied => {
                        log::info!("Job {job_id} completed");
                        if let Some(key) = content_key {
                            self.cache.insert(key, result);
                        }
                    }
                    FinishDisposition::CancelledInstead => {
                        log::info!("Job {job_id} finished after cancellation; result discarded");
                    }
                    FinishDisposition::Stale => {}
                }
            }
            SlotOutcome::Cancelled => {
                self.registry.finish_cancelled(job_id);
                log::info!("Job {job_id} cancelled by worker checkpoint");
            }
            SlotOutcome::EngineFault(detail) => {
                log::error!("Job {job_id} failed: {detail}");
                self.registry.finish_failure(job_id, detail);
            }
            SlotOutcome::ExecutorFault => {
                self.registry
                    .finish_failure(job_id, EXECUTOR_FAULT_DETAIL.to_string());
            }
        }
    }

    fn forget(&mut self, job_id: &str) {
        self.inputs.remove(job_id);
        self.content_keys.remove(job_id);
    }
}
