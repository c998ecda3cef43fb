//! The ten migration steps and the pipeline they form
//!
//! Pre-migration (0-4) prepares the cluster and installs Cilium next to
//! AWS VPC CNI. Post-migration (5-9) removes AWS VPC CNI and hands every
//! node to Cilium.

mod checks;
mod delete;
mod deploy;
mod disable;
mod enable;
mod finalize;
mod preflight;
mod prepare;
mod priority;
mod remove;
mod update;

#[cfg(test)]
mod test_support;

pub use checks::ReleaseSettle;
pub use delete::Delete;
pub use deploy::Deploy;
pub use disable::Disable;
pub use enable::Enable;
pub use finalize::Finalize;
pub use preflight::Preflight;
pub use prepare::Prepare;
pub use priority::Priority;
pub use remove::Remove;
pub use update::Update;

use crate::context::MigrationContext;
use crate::pipeline::{Phase, PhaseKind, Pipeline, Step};
use crate::Result;

/// Build both phases from the shared context
pub fn build_pipeline(ctx: &MigrationContext) -> Result<Pipeline> {
    let pre_migration: Vec<(&'static str, Box<dyn Step>)> = vec![
        ("preflight", Box::new(Preflight::new(ctx.clone()))),
        ("disable", Box::new(Disable::new(ctx.clone()))),
        ("prepare", Box::new(Prepare::new(ctx.clone()))),
        ("priority", Box::new(Priority::new(ctx.clone()))),
        ("deploy", Box::new(Deploy::new(ctx.clone()))),
    ];

    let post_migration: Vec<(&'static str, Box<dyn Step>)> = vec![
        ("delete", Box::new(Delete::new(ctx.clone()))),
        ("remove", Box::new(Remove::new())),
        ("update", Box::new(Update::new(ctx.clone()))),
        ("finalize", Box::new(Finalize::new(ctx.clone()))),
        ("enable", Box::new(Enable::new(ctx.clone()))),
    ];

    Pipeline::new(
        Phase::new(PhaseKind::PreMigration, pre_migration)?,
        Phase::new(PhaseKind::PostMigration, post_migration)?,
    )
}
