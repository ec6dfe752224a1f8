//! Command emitter and test-run intent tracking.
//!
//! Every `run-test` gets a fresh, strictly increasing correlation id and a
//! [`TestRunIntent`] that stays live until its result is admitted, the user
//! cancels it, or a newer run of the same (function, case) pair supersedes it.
//! At most one intent per pair is live at a time.
//!
//! Cancelled and superseded intents leave a tombstone so a late result can be
//! classified; tombstones are bounded and the oldest are forgotten first. A
//! forgotten id is still discarded, only as `unknown_correlation`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use playground_protocol::{Command, Settings};
use serde::{Serialize, Serializer};

use crate::config::PanelConfig;
use crate::error::{DiscardReason, EmitError};

const CORRELATION_PREFIX: &str = "corr-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(u64);

impl CorrelationId {
    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn parse(value: &str) -> Option<Self> {
        value
            .strip_prefix(CORRELATION_PREFIX)
            .and_then(|digits| digits.parse::<u64>().ok())
            .filter(|n| *n > 0)
            .map(CorrelationId)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", CORRELATION_PREFIX, self.0)
    }
}

impl Serialize for CorrelationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTarget {
    pub function: String,
    pub test_case: String,
}

impl RunTarget {
    pub fn new(function: impl Into<String>, test_case: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            test_case: test_case.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    Pending,
    /// No result within the stall timeout. Still live.
    Stalled,
    Cancelled,
    Completed,
    Stale,
}

impl IntentStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, IntentStatus::Pending | IntentStatus::Stalled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunIntent {
    pub correlation_id: CorrelationId,
    pub target: RunTarget,
    pub status: IntentStatus,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IssuedRun {
    pub intent: TestRunIntent,
    pub command: Command,
    /// Intent that was live for the same pair and is now stale.
    pub superseded: Option<TestRunIntent>,
}

/// Outcome of matching an inbound result against tracked intents.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The intent was live; it is now completed and no longer tracked.
    Live(TestRunIntent),
    Discard(DiscardReason),
}

pub struct CommandEmitter {
    next_id: u64,
    live: BTreeMap<CorrelationId, TestRunIntent>,
    live_by_target: HashMap<RunTarget, CorrelationId>,
    tombstones: VecDeque<(CorrelationId, IntentStatus)>,
    tombstone_capacity: usize,
    stall_timeout: Duration,
}

impl CommandEmitter {
    pub fn new(config: &PanelConfig) -> Self {
        Self {
            next_id: 1,
            live: BTreeMap::new(),
            live_by_target: HashMap::new(),
            tombstones: VecDeque::new(),
            tombstone_capacity: config.tombstone_capacity,
            stall_timeout: config.stall_timeout(),
        }
    }

    /// The `run-test` command the next [`issue_run`](Self::issue_run) for
    /// `target` will produce. Nothing is recorded, so a run whose command
    /// never reaches the host leaves tracked intents untouched.
    pub fn prepare_run(&self, target: &RunTarget) -> Command {
        Command::run_test(
            &CorrelationId(self.next_id).to_string(),
            &target.function,
            &target.test_case,
        )
    }

    pub fn issue_run(&mut self, target: RunTarget, now: DateTime<Utc>) -> IssuedRun {
        let command = self.prepare_run(&target);
        let correlation_id = CorrelationId(self.next_id);
        self.next_id += 1;

        let superseded = self
            .live_by_target
            .get(&target)
            .copied()
            .and_then(|previous| self.retire(previous, IntentStatus::Stale));
        if let Some(previous) = &superseded {
            tracing::info!(
                correlation_id = %previous.correlation_id,
                superseded_by = %correlation_id,
                function = %target.function,
                test_case = %target.test_case,
                "Run superseded"
            );
        }

        let intent = TestRunIntent {
            correlation_id,
            target: target.clone(),
            status: IntentStatus::Pending,
            issued_at: now,
        };
        self.live.insert(correlation_id, intent.clone());
        self.live_by_target.insert(target, correlation_id);

        IssuedRun {
            intent,
            command,
            superseded,
        }
    }

    pub fn cancel_run(
        &mut self,
        correlation_id: CorrelationId,
    ) -> Result<(TestRunIntent, Command), EmitError> {
        let intent = self
            .retire(correlation_id, IntentStatus::Cancelled)
            .ok_or_else(|| EmitError::NotLive(correlation_id.to_string()))?;
        tracing::info!(correlation_id = %correlation_id, "Run cancelled");
        Ok((intent, Command::cancel_run(&correlation_id.to_string())))
    }

    /// Marks every live intent stale. Used when the host is asked to reload.
    pub fn supersede_all(&mut self) -> Vec<TestRunIntent> {
        let ids: Vec<CorrelationId> = self.live.keys().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.retire(id, IntentStatus::Stale))
            .collect()
    }

    pub fn admit_result(&mut self, correlation_id: &str) -> Admission {
        let unknown = || {
            Admission::Discard(DiscardReason::UnknownCorrelation {
                correlation_id: correlation_id.to_string(),
            })
        };
        let Some(id) = CorrelationId::parse(correlation_id) else {
            return unknown();
        };

        if let Some(mut intent) = self.live.remove(&id) {
            self.live_by_target.remove(&intent.target);
            intent.status = IntentStatus::Completed;
            return Admission::Live(intent);
        }

        match self.tombstone_status(id) {
            Some(IntentStatus::Cancelled) => Admission::Discard(DiscardReason::Cancelled {
                correlation_id: id.to_string(),
            }),
            Some(IntentStatus::Stale) => Admission::Discard(DiscardReason::Superseded {
                correlation_id: id.to_string(),
            }),
            _ => unknown(),
        }
    }

    /// Moves pending intents older than the stall timeout to `Stalled`.
    /// Returns only the intents that changed on this sweep.
    pub fn sweep_stalled(&mut self, now: DateTime<Utc>) -> Vec<TestRunIntent> {
        let mut stalled = Vec::new();
        for intent in self.live.values_mut() {
            if intent.status == IntentStatus::Pending
                && now.signed_duration_since(intent.issued_at) >= self.stall_timeout
            {
                intent.status = IntentStatus::Stalled;
                stalled.push(intent.clone());
            }
        }
        for intent in &stalled {
            tracing::warn!(
                correlation_id = %intent.correlation_id,
                function = %intent.target.function,
                test_case = %intent.target.test_case,
                "Run stalled"
            );
        }
        stalled
    }

    pub fn select_function(&self, function: &str) -> Command {
        Command::select_function(function)
    }

    pub fn request_settings(&self, changes: Option<Settings>) -> Command {
        Command::request_settings(changes)
    }

    pub fn reload(&self) -> Command {
        Command::reload()
    }

    pub fn live_intent(&self, target: &RunTarget) -> Option<&TestRunIntent> {
        self.live_by_target
            .get(target)
            .and_then(|id| self.live.get(id))
    }

    pub fn live_intents(&self) -> impl Iterator<Item = &TestRunIntent> {
        self.live.values()
    }

    /// Status of a live intent or a remembered cancelled/stale one.
    pub fn status_of(&self, correlation_id: CorrelationId) -> Option<IntentStatus> {
        self.live
            .get(&correlation_id)
            .map(|intent| intent.status)
            .or_else(|| self.tombstone_status(correlation_id))
    }

    pub fn clear(&mut self) {
        self.live.clear();
        self.live_by_target.clear();
        self.tombstones.clear();
    }

    fn retire(&mut self, id: CorrelationId, status: IntentStatus) -> Option<TestRunIntent> {
        let mut intent = self.live.remove(&id)?;
        self.live_by_target.remove(&intent.target);
        intent.status = status;
        if self.tombstone_capacity > 0 {
            while self.tombstones.len() >= self.tombstone_capacity {
                self.tombstones.pop_front();
            }
            self.tombstones.push_back((id, status));
        }
        Some(intent)
    }

    fn tombstone_status(&self, id: CorrelationId) -> Option<IntentStatus> {
        self.tombstones
            .iter()
            .rev()
            .find(|(candidate, _)| *candidate == id)
            .map(|(_, status)| *status)
    }
}
