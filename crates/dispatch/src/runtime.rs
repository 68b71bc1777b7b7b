//! The two thread loops: one dispatcher, N data workers. Spawned and joined by
//! [`crate::engine::DispatchEngine`]; the loops themselves only depend on the shared
//! state in [`crate::job`] and [`crate::dispatch`] plus the channels in this module.

use crate::core::{ControlEvent, DataEvent};
use crate::dispatch::{self, DispatchStats, ReadyQueue, WaitGroup};
use crate::effect_impl::{DataWorker, IndexExecutor, JobOutcome};
use crate::error::DispatchError;
use crate::job::{OnceFlag, TableRegistry};
use crate::tap::{DispatchTap, TapEvent};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;

/// Producer/consumer pair for handing dispatched jobs to worker threads. Unlike
/// [`crate::bus::ControlChannel`] this is multi-consumer: every worker thread holds a
/// clone of the receiver, and `crossbeam_channel` delivers each message to exactly one
/// of them, which is what gives us a plain work queue without an explicit routing
/// table.
pub struct JobChannel {
    tx: Sender<DataEvent>,
    rx: Receiver<DataEvent>,
}

impl JobChannel {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub fn sender(&self) -> Sender<DataEvent> {
        self.tx.clone()
    }

    pub fn receiver(&self) -> Receiver<DataEvent> {
        self.rx.clone()
    }
}

impl Default for JobChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the dispatcher thread's loop body needs. Built by
/// [`crate::engine::DispatchEngine`] and owned entirely by that one thread.
pub struct DispatcherContext {
    pub registry: Arc<TableRegistry>,
    pub ready_queue: Arc<ReadyQueue>,
    pub wait_group: Arc<WaitGroup>,
    pub control_rx: crate::bus::ControlChannel,
    pub job_tx: Sender<DataEvent>,
    pub index_executor: Arc<dyn IndexExecutor>,
    pub worker_count: usize,
    pub tap: Arc<dyn DispatchTap>,
    pub stats: Arc<DispatchStats>,
    /// Set once `FILE_TYPE_ENDED` has been observed: the parser will never enqueue
    /// another job. Kept separate from `all_tables_data_terminal` because the
    /// termination check needs both conditions, not either alone. Shared with every
    /// worker thread (`Arc`) since `on_job_complete`/`maybe_finalize` run there too.
    pub all_jobs_enqueued: Arc<OnceFlag>,
    /// Guards against sending `Shutdown` to the job channel more than once — both the
    /// give-up-on-idle path and an explicit `ControlEvent::Shutdown` call
    /// `terminate_data_phase`, and only the first should actually fire.
    terminated: OnceFlag,
}

impl DispatcherContext {
    pub fn new(
        registry: Arc<TableRegistry>,
        ready_queue: Arc<ReadyQueue>,
        wait_group: Arc<WaitGroup>,
        control_rx: crate::bus::ControlChannel,
        job_tx: Sender<DataEvent>,
        index_executor: Arc<dyn IndexExecutor>,
        worker_count: usize,
        tap: Arc<dyn DispatchTap>,
        stats: Arc<DispatchStats>,
        all_jobs_enqueued: Arc<OnceFlag>,
    ) -> Self {
        Self {
            registry,
            ready_queue,
            wait_group,
            control_rx,
            job_tx,
            index_executor,
            worker_count,
            tap,
            stats,
            all_jobs_enqueued,
            terminated: OnceFlag::new(),
        }
    }
}

/// Pushes one `DataEvent::Shutdown` per worker thread so every one of them, parked or
/// not, eventually wakes up and exits. Idempotent: only the first caller actually
/// sends anything.
fn terminate_data_phase(ctx: &DispatcherContext) {
    if ctx.terminated.get() {
        return;
    }
    ctx.terminated.set();
    tracing::debug!(workers = ctx.worker_count, "data phase complete, shutting down workers");
    for _ in 0..ctx.worker_count {
        let _ = ctx.job_tx.send(DataEvent::Shutdown);
    }
}

/// Returns `true` (and has already signaled every worker to shut down) once the
/// parser is done, every table is data-terminal, and every worker is idle. The
/// dispatcher loop exits as soon as this is true — there's nothing left for it to do
/// either.
fn check_termination(ctx: &DispatcherContext) -> bool {
    if ctx.all_jobs_enqueued.get()
        && dispatch::all_tables_data_terminal(&ctx.registry)
        && ctx.wait_group.parked_count() == ctx.worker_count
    {
        terminate_data_phase(ctx);
        true
    } else {
        false
    }
}

/// Try to hand one ready job to a parked worker. Only decrements the wait group's
/// parked count when a job was actually found, so a spurious wakeup signal with
/// nothing ready leaves every parked thread parked.
fn try_wake_one_with_job(ctx: &DispatcherContext) {
    if let Some((table, job)) = dispatch::pick_next_job(&ctx.registry, &ctx.ready_queue, &ctx.stats, ctx.all_jobs_enqueued.get()) {
        ctx.wait_group.wake_one();
        ctx.tap.observe(TapEvent::JobDispatched { job: job.id, table: table.ident.clone() });
        let _ = ctx.job_tx.send(DataEvent::DataJob(job));
    }
}

/// Gives every currently-parked worker one shot at a job, per [`WaitGroup::wake_all`].
/// Any worker that comes up empty is re-parked; it lost nothing by being woken.
fn wake_all_workers(ctx: &DispatcherContext) {
    let parked = ctx.wait_group.wake_all();
    for _ in 0..parked {
        match dispatch::pick_next_job(&ctx.registry, &ctx.ready_queue, &ctx.stats, ctx.all_jobs_enqueued.get()) {
            Some((table, job)) => {
                ctx.tap.observe(TapEvent::JobDispatched { job: job.id, table: table.ident.clone() });
                let _ = ctx.job_tx.send(DataEvent::DataJob(job));
            }
            None => ctx.wait_group.mark_parked(),
        }
    }
}

/// The dispatcher thread's full event loop (spec §4.4's control-event table). Runs
/// until it observes `Shutdown` or its control channel disconnects.
pub fn run_dispatcher_loop(ctx: DispatcherContext) -> Result<(), DispatchError> {
    loop {
        let event = ctx.control_rx.recv()?;
        tracing::trace!(?event, "dispatcher control event");
        match event {
            ControlEvent::RequestDataJob => {
                match dispatch::pick_next_job(&ctx.registry, &ctx.ready_queue, &ctx.stats, ctx.all_jobs_enqueued.get()) {
                    Some((table, job)) => {
                        ctx.tap.observe(TapEvent::JobDispatched { job: job.id, table: table.ident.clone() });
                        let _ = ctx.job_tx.send(DataEvent::DataJob(job));
                    }
                    None => {
                        ctx.wait_group.mark_parked();
                        if check_termination(&ctx) {
                            return Ok(());
                        }
                    }
                }
            }
            ControlEvent::WakeDataThread => {
                try_wake_one_with_job(&ctx);
            }
            ControlEvent::FileTypeSchemaEnded => {
                ctx.registry.refresh();
                wake_all_workers(&ctx);
            }
            ControlEvent::FileTypeEnded => {
                ctx.all_jobs_enqueued.set();
                ctx.registry.refresh();
                // The parser guarantees every job for every table has now been
                // enqueued. Any table still sitting at zero pending/in-flight/expected
                // jobs genuinely never had data work (an empty table, or a view or
                // sequence whose kind already skipped dispatch) and can finalize now
                // rather than waiting on an `on_job_complete` that will never come.
                ctx.registry.for_each(|table| {
                    dispatch::maybe_finalize(table, true);
                    dispatch::maybe_enqueue_indexes(table, ctx.index_executor.as_ref());
                });
                if check_termination(&ctx) {
                    return Ok(());
                }
            }
            ControlEvent::SchemaFailed => {
                // A database's DDL failed; tables in it are now permanently skipped by
                // `is_terminal_for_data`/`fallback_scan_for_ready_table`, which can
                // unblock a fallback scan that was previously starved behind them.
                wake_all_workers(&ctx);
                if check_termination(&ctx) {
                    return Ok(());
                }
            }
            ControlEvent::Shutdown => {
                terminate_data_phase(&ctx);
                return Ok(());
            }
        }
    }
}

/// State a single data-worker thread needs. Cheap to clone per-thread since every
/// field is an `Arc` or a channel handle.
#[derive(Clone)]
pub struct WorkerContext {
    pub job_rx: Receiver<DataEvent>,
    pub control_tx: crate::bus::ControlSender,
    pub registry: Arc<TableRegistry>,
    pub ready_queue: Arc<ReadyQueue>,
    pub index_executor: Arc<dyn IndexExecutor>,
    pub data_worker: Arc<dyn DataWorker>,
    pub inflight: Arc<crate::engine::InflightTracker>,
    pub tap: Arc<dyn DispatchTap>,
    pub all_jobs_enqueued: Arc<OnceFlag>,
    pub thread_label: String,
}

/// A data-worker thread's loop: pull a job, run it, report completion, ask for more.
/// Exits on `DataEvent::Shutdown` or channel disconnection.
pub fn run_data_worker_loop(ctx: WorkerContext) {
    // Kick the dispatcher for an initial assignment; without this a worker that starts
    // with nothing already queued would block forever with nobody ever nudging it.
    ctx.control_tx.push(ControlEvent::RequestDataJob);

    loop {
        match ctx.job_rx.recv() {
            Ok(DataEvent::DataJob(job)) => {
                let Some(table) = ctx.registry.get(&job.table) else {
                    // Every job handed out by the dispatcher came from a table already
                    // in the registry; this would only happen if a collaborator
                    // mutated a job's table field after the fact.
                    tracing::error!(job = %job.id, table = %job.table, "dispatched job for unknown table, dropping");
                    ctx.control_tx.push(ControlEvent::RequestDataJob);
                    continue;
                };
                let outcome = ctx.data_worker.execute(&job);
                match &outcome {
                    JobOutcome::Succeeded => tracing::debug!(job = %job.id, table = %table.ident, "job succeeded"),
                    JobOutcome::Failed(reason) => {
                        tracing::warn!(job = %job.id, table = %table.ident, %reason, "job failed")
                    }
                }
                ctx.tap.observe(TapEvent::JobCompleted {
                    job: job.id,
                    table: table.ident.clone(),
                    outcome: (&outcome).into(),
                });
                dispatch::on_job_complete(&table, &ctx.ready_queue, ctx.all_jobs_enqueued.get());
                if table.schema_state() == crate::core::SchemaState::DataDone {
                    ctx.tap.observe(TapEvent::TableDataDone { table: table.ident.clone() });
                }
                dispatch::maybe_enqueue_indexes(&table, ctx.index_executor.as_ref());
                ctx.inflight.decrement();
                ctx.control_tx.push(ControlEvent::RequestDataJob);
            }
            Ok(DataEvent::Shutdown) | Err(_) => {
                tracing::debug!("worker thread exiting");
                ctx.tap.observe(TapEvent::WorkerShutdown { thread: ctx.thread_label.clone() });
                return;
            }
        }
    }
}
