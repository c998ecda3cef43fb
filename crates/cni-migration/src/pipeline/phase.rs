//! Phase and pipeline construction
//!
//! A phase is an ordered list of exactly [`STEPS_PER_PHASE`] steps. Position
//! within the phase is the execution order, and `phase offset + position` is
//! the step's global ordinal, which is also its CLI flag (`-0` .. `-9`).

use std::collections::HashSet;
use std::fmt;

use super::step::Step;
use crate::{Error, Result};

/// Number of steps in each phase
pub const STEPS_PER_PHASE: usize = 5;

/// Migration direction a phase belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    /// Steps 0-4: prepare the cluster and install Cilium alongside AWS VPC CNI
    PreMigration,
    /// Steps 5-9: remove AWS VPC CNI and hand nodes over to Cilium
    PostMigration,
}

impl PhaseKind {
    /// Global ordinal of the phase's first step
    pub fn first_ordinal(self) -> usize {
        match self {
            PhaseKind::PreMigration => 0,
            PhaseKind::PostMigration => STEPS_PER_PHASE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseKind::PreMigration => "pre-migration",
            PhaseKind::PostMigration => "post-migration",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A step placed in a phase
pub struct PipelineStep {
    ordinal: usize,
    name: &'static str,
    step: Box<dyn Step>,
}

impl PipelineStep {
    /// Global ordinal (0-9)
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn step(&self) -> &dyn Step {
        self.step.as_ref()
    }
}

impl fmt::Debug for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStep")
            .field("ordinal", &self.ordinal)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// An ordered, fixed-size list of steps
#[derive(Debug)]
pub struct Phase {
    kind: PhaseKind,
    steps: Vec<PipelineStep>,
}

impl Phase {
    /// Build a phase from named steps in execution order
    pub fn new(kind: PhaseKind, steps: Vec<(&'static str, Box<dyn Step>)>) -> Result<Self> {
        if steps.len() != STEPS_PER_PHASE {
            return Err(Error::pipeline(format!(
                "{} phase needs exactly {} steps, got {}",
                kind,
                STEPS_PER_PHASE,
                steps.len()
            )));
        }

        let mut seen = HashSet::new();
        for (name, _) in &steps {
            if name.is_empty() {
                return Err(Error::pipeline(format!("{} phase has an unnamed step", kind)));
            }
            if !seen.insert(*name) {
                return Err(Error::pipeline(format!(
                    "{} phase has duplicate step '{}'",
                    kind, name
                )));
            }
        }

        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(position, (name, step))| PipelineStep {
                ordinal: kind.first_ordinal() + position,
                name,
                step,
            })
            .collect();

        Ok(Self { kind, steps })
    }

    pub fn kind(&self) -> PhaseKind {
        self.kind
    }

    /// Steps in execution order
    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }
}

/// Both phases of a migration, constructed fresh per invocation
#[derive(Debug)]
pub struct Pipeline {
    pre_migration: Phase,
    post_migration: Phase,
}

impl Pipeline {
    /// Pair the two phases; they must be of opposite kinds and share no step
    pub fn new(pre_migration: Phase, post_migration: Phase) -> Result<Self> {
        if pre_migration.kind != PhaseKind::PreMigration {
            return Err(Error::pipeline(format!(
                "expected a pre-migration phase, got {}",
                pre_migration.kind
            )));
        }
        if post_migration.kind != PhaseKind::PostMigration {
            return Err(Error::pipeline(format!(
                "expected a post-migration phase, got {}",
                post_migration.kind
            )));
        }

        let pre_names: HashSet<&str> = pre_migration.steps.iter().map(|s| s.name).collect();
        if let Some(shared) = post_migration
            .steps
            .iter()
            .find(|s| pre_names.contains(s.name))
        {
            return Err(Error::pipeline(format!(
                "step '{}' appears in both phases",
                shared.name
            )));
        }

        Ok(Self {
            pre_migration,
            post_migration,
        })
    }

    pub fn phase(&self, kind: PhaseKind) -> &Phase {
        match kind {
            PhaseKind::PreMigration => &self.pre_migration,
            PhaseKind::PostMigration => &self.post_migration,
        }
    }
}
