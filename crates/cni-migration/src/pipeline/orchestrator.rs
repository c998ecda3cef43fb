//! Gated, strictly serial execution of a phase
//!
//! Every position up to the highest requested one is accounted for: it is
//! either run (after its predecessor proves ready) or, when it was skipped
//! over, must itself prove ready. The first failure stops the run; nothing is
//! rolled back because every step is safe to re-enter.

use tracing::{debug, info, info_span, Instrument};

use super::phase::{Phase, PhaseKind, Pipeline, PipelineStep};
use super::selection::{Selection, StepFlags};
use crate::{Error, Result};

/// What a successful invocation did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// No step was requested; nothing was inspected or changed
    NoOp,
    /// The selected steps of this phase were applied or confirmed ready
    Completed(PhaseKind),
}

/// Validate the flags, pick the phase and run it
pub async fn dispatch(pipeline: &Pipeline, flags: &StepFlags, dry_run: bool) -> Result<Outcome> {
    let Some((kind, selection)) = flags.resolve()? else {
        debug!("no steps requested");
        return Ok(Outcome::NoOp);
    };

    info!(phase = %kind, dry_run, "running {} steps", kind);
    run_phase(pipeline.phase(kind), &selection, dry_run).await?;

    Ok(Outcome::Completed(kind))
}

/// Run one phase according to its selection
pub async fn run_phase(phase: &Phase, selection: &Selection, dry_run: bool) -> Result<()> {
    debug!(phase = %phase.kind(), ?selection, "resolved selection");
    match selection {
        Selection::Nothing => Ok(()),
        Selection::EntirePhase => run_all_steps(phase, dry_run).await,
        Selection::UpTo { max, requested } => run_steps(phase, *max, requested, dry_run).await,
    }
}

/// Run every step, each gated on its predecessor being ready
async fn run_all_steps(phase: &Phase, dry_run: bool) -> Result<()> {
    let steps = phase.steps();

    for (position, step) in steps.iter().enumerate() {
        if let Some(previous) = position.checked_sub(1).map(|p| &steps[p]) {
            ensure_step_ready(previous).await?;
        }
        run_step(step, dry_run).await?;
    }

    Ok(())
}

/// Run requested steps up to `max`; steps skipped below `max` must be ready
async fn run_steps(phase: &Phase, max: usize, requested: &[bool], dry_run: bool) -> Result<()> {
    let steps = phase.steps();

    for (position, step) in steps.iter().enumerate().take(max + 1) {
        if requested.get(position).copied().unwrap_or(false) {
            if let Some(previous) = position.checked_sub(1).map(|p| &steps[p]) {
                ensure_step_ready(previous).await?;
            }
            run_step(step, dry_run).await?;
        } else {
            debug!(step = step.ordinal(), name = step.name(), "step not requested, verifying readiness");
            ensure_step_ready(step).await?;
        }
    }

    Ok(())
}

/// Require `Ready() == Ok(true)`
async fn ensure_step_ready(step: &PipelineStep) -> Result<()> {
    let span = info_span!("step", index = step.ordinal(), name = step.name());

    let ready = step
        .step()
        .ready()
        .instrument(span)
        .await
        .map_err(|source| Error::StepFailed {
            index: step.ordinal(),
            name: step.name(),
            source,
        })?;

    if !ready {
        return Err(Error::StepNotReady {
            index: step.ordinal(),
            name: step.name(),
        });
    }

    Ok(())
}

async fn run_step(step: &PipelineStep, dry_run: bool) -> Result<()> {
    let span = info_span!("step", index = step.ordinal(), name = step.name());

    async {
        info!("running step");
        step.step().run(dry_run).await
    }
    .instrument(span)
    .await
    .map_err(|source| Error::StepRun {
        index: step.ordinal(),
        name: step.name(),
        source,
    })
}
