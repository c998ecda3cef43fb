//! Step-pipeline orchestration engine
//!
//! - [`step`]: the `Step` contract (`ready` / `run`)
//! - [`phase`]: fixed-size phases and the two-phase pipeline
//! - [`selection`]: flag validation and resolution into a plan
//! - [`orchestrator`]: gated serial execution of the plan

pub mod orchestrator;
pub mod phase;
pub mod selection;
pub mod step;

pub use orchestrator::{dispatch, run_phase, Outcome};
pub use phase::{Phase, PhaseKind, Pipeline, PipelineStep, STEPS_PER_PHASE};
pub use selection::{PhaseFlags, Selection, StepFlags};
pub use step::Step;
