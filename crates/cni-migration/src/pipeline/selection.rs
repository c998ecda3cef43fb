//! Turning the operator's step flags into an execution plan

use super::phase::{PhaseKind, STEPS_PER_PHASE};
use crate::{Error, Result};

/// Flags the operator set for one phase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseFlags {
    /// Run every step of the phase
    pub run_all: bool,
    /// Explicit per-step requests, indexed by position within the phase
    pub steps: [bool; STEPS_PER_PHASE],
}

impl PhaseFlags {
    /// Flags requesting the given positions
    pub fn with_steps(positions: &[usize]) -> Self {
        let mut flags = Self::default();
        for &position in positions {
            if let Some(slot) = flags.steps.get_mut(position) {
                *slot = true;
            }
        }
        flags
    }

    /// Flags requesting the whole phase
    pub fn all() -> Self {
        Self {
            run_all: true,
            ..Self::default()
        }
    }

    /// Whether anything at all was requested for this phase
    pub fn any(&self) -> bool {
        self.run_all || self.steps.iter().any(|&requested| requested)
    }

    /// Resolve the flags into a selection
    ///
    /// "Run all" wins over explicit flags; otherwise the highest requested
    /// position bounds the run.
    pub fn resolve(&self) -> Selection {
        if self.run_all {
            return Selection::EntirePhase;
        }

        match self.steps.iter().rposition(|&requested| requested) {
            Some(max) => Selection::UpTo {
                max,
                requested: self.steps,
            },
            None => Selection::Nothing,
        }
    }
}

/// The resolved plan for one phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Nothing requested
    Nothing,
    /// Run every step, gating each on its predecessor
    EntirePhase,
    /// Cover positions `0..=max`: requested positions run, gaps must already be ready
    UpTo {
        max: usize,
        requested: [bool; STEPS_PER_PHASE],
    },
}

impl Selection {
    pub fn is_nothing(&self) -> bool {
        matches!(self, Selection::Nothing)
    }
}

/// Flags for both phases of one invocation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepFlags {
    pub pre_migration: PhaseFlags,
    pub post_migration: PhaseFlags,
}

impl StepFlags {
    pub fn phase(&self, kind: PhaseKind) -> &PhaseFlags {
        match kind {
            PhaseKind::PreMigration => &self.pre_migration,
            PhaseKind::PostMigration => &self.post_migration,
        }
    }

    /// Reject invocations that touch both phases
    ///
    /// Runs before any step is constructed or inspected.
    pub fn validate(&self) -> Result<()> {
        if self.pre_migration.any() && self.post_migration.any() {
            return Err(Error::selection(
                "running pre-migration and post-migration steps in the same run is not allowed",
            ));
        }
        Ok(())
    }

    /// Pick the single phase to run and its selection
    ///
    /// Pre-migration is consulted first. `None` means nothing was requested.
    pub fn resolve(&self) -> Result<Option<(PhaseKind, Selection)>> {
        self.validate()?;

        for kind in [PhaseKind::PreMigration, PhaseKind::PostMigration] {
            let selection = self.phase(kind).resolve();
            if !selection.is_nothing() {
                return Ok(Some((kind, selection)));
            }
        }

        Ok(None)
    }
}
