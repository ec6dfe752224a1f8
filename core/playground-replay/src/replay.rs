use std::cell::Cell;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use playground_core::{DispatchOutcome, EmitError, Panel, RawMessage};
use serde::Serialize;
use serde_json::Value;

use crate::transcript::{Step, UserAction};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayStats {
    pub applied: u64,
    pub discarded: u64,
    pub faulted: u64,
    pub ignored: u64,
    pub actions: u64,
    pub rejected_actions: u64,
    pub stalled: u64,
}

/// Shared clock for a replayed panel. `tick` steps move it forward, so run
/// issue times and stall sweeps follow the transcript rather than wall time.
#[derive(Clone)]
pub struct ReplayClock(Rc<Cell<DateTime<Utc>>>);

impl ReplayClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Rc::new(Cell::new(start)))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.0.get()
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.0.set(now);
    }
}

pub fn run(panel: &mut Panel, clock: &ReplayClock, steps: Vec<Step>) -> ReplayStats {
    let mut stats = ReplayStats::default();

    for step in steps {
        match step {
            Step::Host(value) => {
                let raw = match value {
                    Value::String(text) => RawMessage::Text(text),
                    other => RawMessage::Json(other),
                };
                match panel.deliver(raw) {
                    DispatchOutcome::Applied(_) => stats.applied += 1,
                    DispatchOutcome::Discarded(_) => stats.discarded += 1,
                    DispatchOutcome::Faulted(_) => stats.faulted += 1,
                    DispatchOutcome::Ignored => stats.ignored += 1,
                }
            }
            Step::User(action) => {
                stats.actions += 1;
                let name = action.name();
                if let Err(err) = apply(panel, action) {
                    stats.rejected_actions += 1;
                    tracing::warn!(action = name, error = %err, "User action rejected");
                }
            }
            Step::Tick(now) => {
                if now < clock.now() {
                    tracing::warn!(%now, current = %clock.now(), "Tick moves clock backwards");
                }
                clock.set(now);
                stats.stalled += panel.tick().len() as u64;
            }
        }
    }

    stats
}

fn apply(panel: &mut Panel, action: UserAction) -> Result<(), EmitError> {
    match action {
        UserAction::RunTest {
            function,
            test_case,
        } => panel.run_test(&function, &test_case).map(|_| ()),
        UserAction::CancelRun { correlation_id } => panel.cancel_run(&correlation_id),
        UserAction::SelectFunction { function } => panel.select_function(&function),
        UserAction::SelectTestCase { test_case } => panel.select_test_case(&test_case),
        UserAction::SetFilter { filter } => {
            panel.set_filter(&filter);
            Ok(())
        }
        UserAction::RequestSettings { changes } => panel.request_settings(changes),
        UserAction::Reload => panel.reload(),
    }
}
