//! Experiment plans and their execution.
//!
//! - [`plans`]: the validated [`Plan`] value object and its builders.
//! - [`sweep`]: expansion of sweep specs into value sequences and step order.
//! - [`run_engine`]: the [`RunEngine`] that drives quantities through a plan and
//!   writes every record to a result sink.

pub mod plans;
pub mod run_engine;
pub mod sweep;

pub use plans::{InputDocument, Level, LevelDocument, Plan, PlanBuilder, PlanDocument, SweepValue};
pub use run_engine::{EngineState, NullObserver, RunEngine, RunObserver, RunSummary, StopSignal};
pub use sweep::{Odometer, StepMode, SweepKind, SweepSpec};
