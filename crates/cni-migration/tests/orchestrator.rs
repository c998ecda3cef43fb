//! Gating behaviour of the step pipeline, driven through the public API with
//! recording fake steps.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use cni_migration::pipeline::{
    dispatch, Outcome, Phase, PhaseFlags, PhaseKind, Pipeline, Step, StepFlags,
};
use cni_migration::Error;

const PRE: [&str; 5] = ["preflight", "disable", "prepare", "priority", "deploy"];
const POST: [&str; 5] = ["delete", "remove", "update", "finalize", "enable"];

#[derive(Clone, Debug, PartialEq, Eq)]
enum Event {
    Ready(&'static str),
    Run(&'static str, bool),
    Mutate(&'static str),
}

/// Shared fake cluster: which steps have converged, plus everything observed
#[derive(Default)]
struct World {
    converged: HashSet<&'static str>,
    /// Steps whose `run` never converges
    stuck: HashSet<&'static str>,
    /// Steps whose `ready` cannot inspect state
    broken_ready: HashSet<&'static str>,
    /// Steps whose `run` fails
    broken_run: HashSet<&'static str>,
    events: Vec<Event>,
}

type SharedWorld = Arc<Mutex<World>>;

struct FakeStep {
    name: &'static str,
    world: SharedWorld,
}

#[async_trait]
impl Step for FakeStep {
    async fn ready(&self) -> cni_migration_common::Result<bool> {
        let mut world = self.world.lock().expect("world lock");
        world.events.push(Event::Ready(self.name));
        if world.broken_ready.contains(self.name) {
            return Err(cni_migration_common::Error::internal("api unreachable"));
        }
        Ok(world.converged.contains(self.name))
    }

    async fn run(&self, dry_run: bool) -> cni_migration_common::Result<()> {
        let mut world = self.world.lock().expect("world lock");
        world.events.push(Event::Run(self.name, dry_run));
        if world.broken_run.contains(self.name) {
            return Err(cni_migration_common::Error::internal("patch rejected"));
        }
        if dry_run || world.converged.contains(self.name) {
            return Ok(());
        }
        world.events.push(Event::Mutate(self.name));
        if !world.stuck.contains(self.name) {
            world.converged.insert(self.name);
        }
        Ok(())
    }
}

fn phase(kind: PhaseKind, names: [&'static str; 5], world: &SharedWorld) -> Phase {
    let steps = names
        .into_iter()
        .map(|name| {
            let step: Box<dyn Step> = Box::new(FakeStep {
                name,
                world: world.clone(),
            });
            (name, step)
        })
        .collect();
    Phase::new(kind, steps).expect("valid phase")
}

fn pipeline(world: &SharedWorld) -> Pipeline {
    Pipeline::new(
        phase(PhaseKind::PreMigration, PRE, world),
        phase(PhaseKind::PostMigration, POST, world),
    )
    .expect("valid pipeline")
}

fn world_with(setup: impl FnOnce(&mut World)) -> SharedWorld {
    let mut world = World::default();
    setup(&mut world);
    Arc::new(Mutex::new(world))
}

fn events(world: &SharedWorld) -> Vec<Event> {
    world.lock().expect("world lock").events.clone()
}

fn take_events(world: &SharedWorld) -> Vec<Event> {
    std::mem::take(&mut world.lock().expect("world lock").events)
}

fn runs(world: &SharedWorld) -> Vec<&'static str> {
    events(world)
        .into_iter()
        .filter_map(|e| match e {
            Event::Run(name, _) => Some(name),
            _ => None,
        })
        .collect()
}

fn mutations(events: &[Event]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, Event::Mutate(_)))
        .count()
}

fn pre(flags: PhaseFlags) -> StepFlags {
    StepFlags {
        pre_migration: flags,
        post_migration: PhaseFlags::default(),
    }
}

fn post(flags: PhaseFlags) -> StepFlags {
    StepFlags {
        pre_migration: PhaseFlags::default(),
        post_migration: flags,
    }
}

// =============================================================================
// Story: Re-running a converged phase changes nothing
// =============================================================================

#[tokio::test]
async fn second_run_of_converged_phase_finds_every_step_ready_and_mutates_nothing() {
    let world = world_with(|_| {});
    let pipeline = pipeline(&world);
    let flags = pre(PhaseFlags::all());

    let outcome = dispatch(&pipeline, &flags, false).await.expect("first run");
    assert_eq!(outcome, Outcome::Completed(PhaseKind::PreMigration));
    assert_eq!(mutations(&take_events(&world)), 5);

    dispatch(&pipeline, &flags, false).await.expect("second run");
    let second = take_events(&world);
    assert_eq!(mutations(&second), 0);
    let readiness_checks: Vec<Event> = second
        .into_iter()
        .filter(|e| matches!(e, Event::Ready(_)))
        .collect();
    let expected: Vec<Event> = PRE[..4].iter().map(|name| Event::Ready(*name)).collect();
    assert_eq!(readiness_checks, expected);
}

#[tokio::test]
async fn converged_live_run_and_dry_run_look_the_same_from_outside() {
    let world = world_with(|w| w.converged.extend(PRE));
    let pipeline = pipeline(&world);
    let flags = pre(PhaseFlags::all());

    dispatch(&pipeline, &flags, false).await.expect("live run");
    let live = take_events(&world);
    dispatch(&pipeline, &flags, true).await.expect("dry run");
    let dry = take_events(&world);

    assert_eq!(mutations(&live), 0);
    assert_eq!(mutations(&dry), 0);
    assert_eq!(live.len(), dry.len());
}

// =============================================================================
// Story: Gaps below the highest requested step must already be ready
// =============================================================================

#[tokio::test]
async fn unready_gap_aborts_before_the_later_step_and_names_the_gap() {
    let world = world_with(|w| {
        w.converged.insert("preflight");
    });
    let pipeline = pipeline(&world);

    let err = dispatch(&pipeline, &pre(PhaseFlags::with_steps(&[1, 3])), false)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StepNotReady { index: 2, name: "prepare" }));
    assert_eq!(err.to_string(), "step 2 (prepare) not ready");
    assert_eq!(runs(&world), vec!["disable"]);
}

#[tokio::test]
async fn ready_gap_is_verified_but_not_run() {
    let world = world_with(|w| {
        w.converged.insert("preflight");
        w.converged.insert("prepare");
    });
    let pipeline = pipeline(&world);

    dispatch(&pipeline, &pre(PhaseFlags::with_steps(&[1, 3])), false)
        .await
        .expect("gap is ready");

    assert_eq!(
        events(&world),
        vec![
            Event::Ready("preflight"),
            Event::Ready("preflight"),
            Event::Run("disable", false),
            Event::Mutate("disable"),
            Event::Ready("prepare"),
            Event::Ready("prepare"),
            Event::Run("priority", false),
            Event::Mutate("priority"),
        ]
    );
}

#[tokio::test]
async fn steps_above_the_highest_request_are_never_touched() {
    let world = world_with(|_| {});
    let pipeline = pipeline(&world);

    dispatch(&pipeline, &pre(PhaseFlags::with_steps(&[0])), false)
        .await
        .expect("first step has no predecessor");

    assert_eq!(
        events(&world),
        vec![Event::Run("preflight", false), Event::Mutate("preflight")]
    );
}

#[tokio::test]
async fn post_migration_errors_report_global_ordinals() {
    let world = world_with(|w| {
        w.converged.insert("delete");
        w.converged.insert("remove");
    });
    let pipeline = pipeline(&world);

    let err = dispatch(&pipeline, &post(PhaseFlags::with_steps(&[3])), false)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "step 7 (update) not ready");
    assert_eq!(err.step_index(), Some(7));
    assert!(runs(&world).is_empty());
}

// =============================================================================
// Story: Phases are never mixed
// =============================================================================

#[tokio::test]
async fn flags_in_both_phases_fail_before_any_step_is_touched() {
    let world = world_with(|_| {});
    let pipeline = pipeline(&world);

    let mixed = [
        StepFlags {
            pre_migration: PhaseFlags::with_steps(&[4]),
            post_migration: PhaseFlags::with_steps(&[0]),
        },
        StepFlags {
            pre_migration: PhaseFlags::all(),
            post_migration: PhaseFlags::with_steps(&[2]),
        },
        StepFlags {
            pre_migration: PhaseFlags::with_steps(&[0]),
            post_migration: PhaseFlags::all(),
        },
    ];

    for flags in mixed {
        let err = dispatch(&pipeline, &flags, false).await.unwrap_err();
        assert!(matches!(err, Error::Selection { .. }));
    }
    assert!(events(&world).is_empty());
}

#[tokio::test]
async fn empty_selection_is_a_successful_no_op() {
    let world = world_with(|_| {});
    let pipeline = pipeline(&world);

    let outcome = dispatch(&pipeline, &StepFlags::default(), false)
        .await
        .expect("no-op");

    assert_eq!(outcome, Outcome::NoOp);
    assert!(events(&world).is_empty());
}

// =============================================================================
// Story: Entire-phase runs stop at the first problem
// =============================================================================

#[tokio::test]
async fn step_that_does_not_converge_stops_the_phase() {
    let world = world_with(|w| {
        w.stuck.insert("prepare");
    });
    let pipeline = pipeline(&world);

    let err = dispatch(&pipeline, &pre(PhaseFlags::all()), false)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "step 2 (prepare) not ready");
    assert_eq!(runs(&world), vec!["preflight", "disable", "prepare"]);
    let touched_later = events(&world).into_iter().any(|e| {
        matches!(
            e,
            Event::Ready("priority" | "deploy") | Event::Run("priority" | "deploy", _)
        )
    });
    assert!(!touched_later);
}

#[tokio::test]
async fn readiness_inspection_error_is_wrapped_with_the_step() {
    let world = world_with(|w| {
        w.broken_ready.insert("disable");
    });
    let pipeline = pipeline(&world);

    let err = dispatch(&pipeline, &pre(PhaseFlags::all()), false)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StepFailed { index: 1, .. }));
    assert_eq!(
        err.to_string(),
        "step 1 (disable) failed: internal error [unknown]: api unreachable"
    );
    assert_eq!(runs(&world), vec!["preflight", "disable"]);
}

#[tokio::test]
async fn run_error_halts_without_touching_later_steps() {
    let world = world_with(|w| {
        w.broken_run.insert("remove");
    });
    let pipeline = pipeline(&world);

    let err = dispatch(&pipeline, &post(PhaseFlags::all()), false)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StepRun { index: 6, name: "remove", .. }));
    assert_eq!(runs(&world), vec!["delete", "remove"]);
    assert!(!world.lock().expect("world lock").converged.contains("update"));
}

// =============================================================================
// Story: Dry run reaches every step
// =============================================================================

#[tokio::test]
async fn dry_run_flag_reaches_every_invoked_step() {
    let world = world_with(|w| w.converged.extend(POST));
    let pipeline = pipeline(&world);

    dispatch(&pipeline, &post(PhaseFlags::all()), true)
        .await
        .expect("dry run");

    let recorded = events(&world);
    let dry_runs: Vec<bool> = recorded
        .iter()
        .filter_map(|e| match e {
            Event::Run(_, dry_run) => Some(*dry_run),
            _ => None,
        })
        .collect();
    assert_eq!(dry_runs, vec![true; 5]);
    assert_eq!(mutations(&recorded), 0);
}

#[tokio::test]
async fn dry_run_of_unconverged_phase_never_mutates_and_stops_at_first_gate() {
    let world = world_with(|_| {});
    let pipeline = pipeline(&world);

    let err = dispatch(&pipeline, &pre(PhaseFlags::all()), true)
        .await
        .unwrap_err();

    assert_eq!(err.step_index(), Some(0));
    assert_eq!(
        events(&world),
        vec![Event::Run("preflight", true), Event::Ready("preflight")]
    );
}
