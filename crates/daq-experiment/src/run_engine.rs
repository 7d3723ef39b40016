//! RunEngine - executes one validated plan
//!
//! The engine is a plain cooperative loop over the Cartesian product of the plan's
//! levels. Per step it sets every input in (level, position) order with a short
//! latch pause after each set, waits the plan's settle delay, reads every output
//! in declared order, and appends the record to the result sink before handing it
//! to the observer.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐  run()  ┌─────────┐  all steps done      ┌───────────┐
//! │ Idle │────────▶│ Running │─────────────────────▶│ Completed │
//! └──────┘         └────┬────┘                      └───────────┘
//!                       │ should_stop()             ┌───────────┐
//!                       ├──────────────────────────▶│  Aborted  │
//!                       │                           └───────────┘
//!                       │ set failure, disconnect   ┌───────────┐
//!                       └──────────────────────────▶│  Failed   │
//!                                                   └───────────┘
//! ```
//!
//! Transitions are one-way. A new run needs a new engine.
//!
//! # Failures
//!
//! - A failed `set` ends the run (`Failed`). No record is written for that step.
//!   Levels marked `restore_on_fail` are put back to the values their quantities
//!   had before the run, best effort.
//! - A failed output read leaves the cell empty, is noted on the record and the run
//!   goes on, unless the link to the instrument is gone.
//! - Cancellation is polled after each record, so a step is never cut in half.

use crate::plans::Plan;
use daq_core::limits::MICRO_SETTLE;
use daq_core::{
    input_column, output_column, DaqError, DaqResult, QuantityId, QuantityIo, ResultRecord, Value,
};
use daq_storage::ResultSink;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, not started
    Idle,
    /// Executing the plan
    Running,
    /// Every step ran
    Completed,
    /// Stopped early on request
    Aborted,
    /// Stopped by a fatal error
    Failed,
}

impl EngineState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            EngineState::Completed | EngineState::Aborted | EngineState::Failed
        )
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running => write!(f, "running"),
            EngineState::Completed => write!(f, "completed"),
            EngineState::Aborted => write!(f, "aborted"),
            EngineState::Failed => write!(f, "failed"),
        }
    }
}

/// Callbacks from a running engine. Called between steps only.
pub trait RunObserver: Send {
    /// A record was appended to the sink. Failed output reads are listed in
    /// [`ResultRecord::failures`].
    fn emit_record(&mut self, _record: &ResultRecord) {}

    /// Progress in percent, `100 * step / total`.
    fn emit_progress(&mut self, _percent: f64) {}

    /// Polled after every record; `true` ends the run as `Aborted`.
    fn should_stop(&mut self) -> bool {
        false
    }
}

/// Observer that ignores everything and never stops.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl RunObserver for NullObserver {}

/// Shareable stop request, e.g. set from a Ctrl-C handler.
#[derive(Debug, Default, Clone)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl RunObserver for StopSignal {
    fn should_stop(&mut self) -> bool {
        self.is_triggered()
    }
}

/// Outcome of a run that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub state: EngineState,
    /// Records appended to the sink.
    pub records: usize,
    /// Output cells left empty because their read failed.
    pub failed_cells: usize,
    /// Result file, when the sink has one.
    pub path: Option<PathBuf>,
}

/// Executes one plan. See the module docs for the step sequence.
#[derive(Debug)]
pub struct RunEngine {
    plan: Plan,
    state: EngineState,
    records: usize,
    failed_cells: usize,
}

impl RunEngine {
    pub fn new(plan: Plan) -> Self {
        Self {
            plan,
            state: EngineState::Idle,
            records: 0,
            failed_cells: 0,
        }
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Records emitted so far.
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn failed_cells(&self) -> usize {
        self.failed_cells
    }

    /// Run the plan to completion, cancellation or failure.
    ///
    /// Returns `Err` with an `Execution` error when the run fails; the engine is
    /// then `Failed` and [`records`](Self::records) tells how far it got.
    pub async fn run(
        &mut self,
        io: &mut dyn QuantityIo,
        observer: &mut dyn RunObserver,
        sink: &mut dyn ResultSink,
    ) -> DaqResult<RunSummary> {
        if self.state != EngineState::Idle {
            return Err(DaqError::Execution {
                step: None,
                message: format!("engine is {}, a run needs a fresh engine", self.state),
                source: None,
            });
        }
        self.state = EngineState::Running;

        let total = self.plan.total_steps();
        info!(
            total_steps = total,
            inputs = self.plan.inputs().count(),
            outputs = self.plan.outputs().len(),
            settle_delay_ms = self.plan.settle_delay().as_millis() as u64,
            "Run started"
        );

        if let Err(e) = sink.open(&self.plan.columns(), self.plan.comment()).await {
            return Err(self.fail(None, e));
        }

        let restore_points = self.snapshot_restore_values(io);
        let radices = self.plan.level_points();
        let mut stopped = false;

        for (step, indices) in crate::sweep::Odometer::new(radices).enumerate() {
            let record = match self.run_step(step, &indices, io).await {
                Ok(record) => record,
                Err(StepFailure::Set { level, error }) => {
                    if self.plan.levels()[level].restore_on_fail {
                        restore(io, &restore_points[level]).await;
                    }
                    finish_quietly(sink).await;
                    return Err(self.fail(Some(step), error));
                }
                Err(StepFailure::Fatal(error)) => {
                    finish_quietly(sink).await;
                    return Err(self.fail(Some(step), error));
                }
            };

            if let Err(e) = sink.append(&record).await {
                finish_quietly(sink).await;
                return Err(self.fail(Some(step), e));
            }
            self.records += 1;
            observer.emit_record(&record);
            observer.emit_progress(100.0 * step as f64 / total as f64);

            if observer.should_stop() {
                info!(step, "Stop requested, ending run after this step");
                stopped = true;
                break;
            }
        }

        if let Err(e) = sink.finish().await {
            return Err(self.fail(None, e));
        }
        self.state = if stopped {
            EngineState::Aborted
        } else {
            if total > 0 {
                observer.emit_progress(100.0);
            }
            EngineState::Completed
        };

        info!(
            state = %self.state,
            records = self.records,
            failed_cells = self.failed_cells,
            "Run finished"
        );
        Ok(RunSummary {
            state: self.state,
            records: self.records,
            failed_cells: self.failed_cells,
            path: sink.path().map(PathBuf::from),
        })
    }

    async fn run_step(
        &mut self,
        step: usize,
        indices: &[usize],
        io: &mut dyn QuantityIo,
    ) -> Result<ResultRecord, StepFailure> {
        let mut record = ResultRecord::new(step);

        for (level_index, (level, &position)) in
            self.plan.levels().iter().zip(indices).enumerate()
        {
            let values = self
                .plan
                .level_values(level_index, position)
                .ok_or_else(|| {
                    StepFailure::Fatal(DaqError::validation(
                        format!("level {}", level_index),
                        format!("no sweep value at position {}", position),
                    ))
                })?;
            for (id, value) in level.quantities.iter().zip(values) {
                match io.set(id, value.clone()).await {
                    Ok(stored) => {
                        debug!(step, quantity = %id, value = %stored, "Input set");
                        record.insert(input_column(id), stored);
                    }
                    Err(e) => {
                        error!(step, quantity = %id, error = %e, "Input set failed");
                        return Err(StepFailure::Set {
                            level: level_index,
                            error: e,
                        });
                    }
                }
                sleep(MICRO_SETTLE).await;
            }
        }

        let settle = self.plan.settle_delay();
        if !settle.is_zero() {
            sleep(settle).await;
        }

        for id in self.plan.outputs() {
            match io.get(id).await {
                Ok(value) => {
                    debug!(step, quantity = %id, value = %value, "Output read");
                    record.insert(output_column(id), value);
                }
                Err(e) if e.is_disconnect() => {
                    error!(step, quantity = %id, error = %e, "Instrument link lost");
                    return Err(StepFailure::Fatal(e));
                }
                Err(e) => {
                    warn!(step, quantity = %id, error = %e, "Output read failed, cell left empty");
                    record.record_failure(output_column(id), e.to_string());
                    self.failed_cells += 1;
                }
            }
        }
        Ok(record)
    }

    /// Cached values of every quantity in a `restore_on_fail` level, taken before
    /// the first step. Empty for other levels.
    fn snapshot_restore_values(&self, io: &dyn QuantityIo) -> Vec<Vec<(QuantityId, Value)>> {
        self.plan
            .levels()
            .iter()
            .map(|level| {
                if !level.restore_on_fail {
                    return Vec::new();
                }
                level
                    .quantities
                    .iter()
                    .filter_map(|id| io.get_latest(id).map(|v| (id.clone(), v)))
                    .collect()
            })
            .collect()
    }

    fn fail(&mut self, step: Option<usize>, cause: DaqError) -> DaqError {
        self.state = EngineState::Failed;
        let error = DaqError::execution(step, cause);
        error!(error = %error, records = self.records, "Run failed");
        error
    }
}

enum StepFailure {
    /// An input set failed in `level`.
    Set { level: usize, error: DaqError },
    Fatal(DaqError),
}

async fn restore(io: &mut dyn QuantityIo, previous: &[(QuantityId, Value)]) {
    for (id, value) in previous {
        match io.set(id, value.clone()).await {
            Ok(_) => info!(quantity = %id, value = %value, "Restored pre-run value"),
            Err(e) => warn!(quantity = %id, error = %e, "Could not restore pre-run value"),
        }
    }
}

async fn finish_quietly(sink: &mut dyn ResultSink) {
    if let Err(e) = sink.finish().await {
        warn!(error = %e, "Closing result sink failed");
    }
}
