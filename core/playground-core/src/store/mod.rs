//! Reactive state store for one panel instance.
//!
//! # Contract
//!
//! - **Single writer**: only the dispatcher commits, through
//!   [`Store::commit`] (crate-private). Everything else reads.
//! - **Atomic commits**: a commit applies a whole batch of [`Mutation`]s before
//!   any subscriber runs, so no reader sees a half-applied event.
//! - **Precise invalidation**: each commit bumps the revision of exactly the
//!   [`Slice`]s it touched. Derived views declare their slices and recompute
//!   only when one of them moved.
//!
//! # Module Structure
//!
//! - [`snapshot`]: project snapshot and per-file diagnostics
//! - [`derived`]: the memo cell behind derived views
//! - [`view`]: owned, serializable read models for the render layer

mod derived;
mod snapshot;
mod view;

use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use playground_protocol::{
    Diagnostic, DiagnosticsPayload, FunctionDefinition, InboundKind, ProjectPayload,
    TestResultPayload, TestStatus,
};
use serde::Serialize;

use crate::decoder::Readiness;
use crate::emitter::{CorrelationId, IntentStatus, RunTarget, TestRunIntent};
use crate::error::DiscardReason;

pub use derived::Memo;
pub use snapshot::{DiagnosticIndex, ProjectSnapshot};
pub use view::{FunctionSummary, PanelView, ReadinessView, RunStatus, RunView, TestCaseView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Slice {
    Readiness,
    Snapshot,
    Diagnostics,
    Selection,
    Filter,
    Runs,
    Discards,
}

impl Slice {
    pub const ALL: [Slice; 7] = [
        Slice::Readiness,
        Slice::Snapshot,
        Slice::Diagnostics,
        Slice::Selection,
        Slice::Filter,
        Slice::Runs,
        Slice::Discards,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceSet(u8);

impl SliceSet {
    pub fn from_slices(slices: &[Slice]) -> Self {
        let mut set = Self::default();
        for slice in slices {
            set.insert(*slice);
        }
        set
    }

    pub fn insert(&mut self, slice: Slice) {
        self.0 |= 1 << slice.index();
    }

    pub fn contains(&self, slice: Slice) -> bool {
        self.0 & (1 << slice.index()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Slice> + '_ {
        Slice::ALL.into_iter().filter(move |slice| self.contains(*slice))
    }
}

/// Per-slice revision counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Revisions([u64; 7]);

impl Revisions {
    pub fn get(&self, slice: Slice) -> u64 {
        self.0[slice.index()]
    }

    fn bump(&mut self, slice: Slice) {
        self.0[slice.index()] += 1;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub function: Option<String>,
    pub test_case: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRun {
    pub correlation_id: CorrelationId,
    pub status: IntentStatus,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedRun {
    pub correlation_id: CorrelationId,
    pub result: TestResultPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscardRecord {
    /// Position of the message in the inbound stream, starting at 1.
    pub ordinal: u64,
    pub kind: Option<InboundKind>,
    #[serde(flatten)]
    pub reason: DiscardReason,
}

/// A single state change. Batches of these are committed atomically.
#[derive(Debug, Clone)]
pub(crate) enum Mutation {
    SetReadiness(Readiness),
    ReplaceSnapshot(ProjectSnapshot),
    MergeSnapshot {
        sequence: u64,
        payload: ProjectPayload,
    },
    ClearSnapshot,
    MergeDiagnostics(DiagnosticsPayload),
    Select(Selection),
    SetFilter(String),
    RunPending(TestRunIntent),
    RunStalled(TestRunIntent),
    /// Drops the pending entry for the intent's target if it still belongs to it.
    RunCleared(TestRunIntent),
    ClearPending,
    RunCompleted {
        intent: TestRunIntent,
        result: TestResultPayload,
    },
    RecordDiscard(DiscardRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreChange {
    /// Store-wide commit counter.
    pub revision: u64,
    pub slices: SliceSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn FnMut(&StoreChange, &Store)>;

struct Views {
    filtered_functions: Memo<Vec<FunctionDefinition>>,
    selected_function: Memo<Option<FunctionDefinition>>,
    selected_results: Memo<Vec<TestCaseView>>,
    selected_diagnostics: Memo<Vec<Diagnostic>>,
}

impl Views {
    fn new() -> Self {
        Self {
            filtered_functions: Memo::new(&[Slice::Snapshot, Slice::Filter]),
            selected_function: Memo::new(&[Slice::Snapshot, Slice::Selection]),
            selected_results: Memo::new(&[Slice::Snapshot, Slice::Selection, Slice::Runs]),
            selected_diagnostics: Memo::new(&[
                Slice::Snapshot,
                Slice::Diagnostics,
                Slice::Selection,
            ]),
        }
    }
}

pub struct Store {
    readiness: Readiness,
    snapshot: Option<ProjectSnapshot>,
    selection: Selection,
    filter: String,
    pending: BTreeMap<RunTarget, PendingRun>,
    results: BTreeMap<RunTarget, CompletedRun>,
    discards: VecDeque<DiscardRecord>,
    discard_capacity: usize,
    discarded_total: u64,
    revisions: Revisions,
    revision: u64,
    views: Views,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
}

impl Store {
    pub fn new(discard_capacity: usize) -> Self {
        Self {
            readiness: Readiness::Uninitialized,
            snapshot: None,
            selection: Selection::default(),
            filter: String::new(),
            pending: BTreeMap::new(),
            results: BTreeMap::new(),
            discards: VecDeque::new(),
            discard_capacity,
            discarded_total: 0,
            revisions: Revisions::default(),
            revision: 0,
            views: Views::new(),
            subscribers: Vec::new(),
            next_subscription: 1,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Subscription
    // ─────────────────────────────────────────────────────────────────────

    /// Registers a callback fired once per committed batch, after the batch
    /// is fully applied. Callbacks run in registration order.
    pub fn subscribe(&mut self, callback: impl FnMut(&StoreChange, &Store) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(candidate, _)| *candidate != id);
        self.subscribers.len() != before
    }

    pub(crate) fn clear_subscribers(&mut self) {
        self.subscribers.clear();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Commit
    // ─────────────────────────────────────────────────────────────────────

    pub(crate) fn commit(&mut self, mutations: Vec<Mutation>) -> Option<StoreChange> {
        let mut touched = SliceSet::default();
        for mutation in mutations {
            self.apply(mutation, &mut touched);
        }
        if touched.contains(Slice::Snapshot) {
            self.reconcile_selection(&mut touched);
            self.prune_results(&mut touched);
        }
        if touched.is_empty() {
            return None;
        }

        for slice in touched.iter() {
            self.revisions.bump(slice);
        }
        self.revision += 1;
        let change = StoreChange {
            revision: self.revision,
            slices: touched,
        };

        let mut subscribers = std::mem::take(&mut self.subscribers);
        for (_, callback) in subscribers.iter_mut() {
            callback(&change, self);
        }
        self.subscribers = subscribers;
        Some(change)
    }

    fn apply(&mut self, mutation: Mutation, touched: &mut SliceSet) {
        match mutation {
            Mutation::SetReadiness(readiness) => {
                if self.readiness != readiness {
                    self.readiness = readiness;
                    touched.insert(Slice::Readiness);
                }
            }
            Mutation::ReplaceSnapshot(snapshot) => {
                self.snapshot = Some(snapshot);
                touched.insert(Slice::Snapshot);
                touched.insert(Slice::Diagnostics);
            }
            Mutation::MergeSnapshot { sequence, payload } => {
                if let Some(snapshot) = self.snapshot.as_mut() {
                    if !payload.diagnostics.is_empty() {
                        touched.insert(Slice::Diagnostics);
                    }
                    snapshot.merge(sequence, payload);
                    touched.insert(Slice::Snapshot);
                }
            }
            Mutation::ClearSnapshot => {
                if self.snapshot.take().is_some() {
                    touched.insert(Slice::Snapshot);
                    touched.insert(Slice::Diagnostics);
                }
            }
            Mutation::MergeDiagnostics(payload) => {
                if let Some(snapshot) = self.snapshot.as_mut() {
                    snapshot.merge_diagnostics(payload);
                    touched.insert(Slice::Diagnostics);
                }
            }
            Mutation::Select(selection) => {
                if self.selection != selection {
                    self.selection = selection;
                    touched.insert(Slice::Selection);
                }
            }
            Mutation::SetFilter(filter) => {
                if self.filter != filter {
                    self.filter = filter;
                    touched.insert(Slice::Filter);
                }
            }
            Mutation::RunPending(intent) => {
                self.pending.insert(
                    intent.target,
                    PendingRun {
                        correlation_id: intent.correlation_id,
                        status: intent.status,
                        issued_at: intent.issued_at,
                    },
                );
                touched.insert(Slice::Runs);
            }
            Mutation::RunStalled(intent) => {
                if let Some(pending) = self.pending.get_mut(&intent.target) {
                    if pending.correlation_id == intent.correlation_id {
                        pending.status = IntentStatus::Stalled;
                        touched.insert(Slice::Runs);
                    }
                }
            }
            Mutation::RunCleared(intent) => {
                let owned = self
                    .pending
                    .get(&intent.target)
                    .map(|pending| pending.correlation_id == intent.correlation_id)
                    .unwrap_or(false);
                if owned {
                    self.pending.remove(&intent.target);
                    touched.insert(Slice::Runs);
                }
            }
            Mutation::ClearPending => {
                if !self.pending.is_empty() {
                    self.pending.clear();
                    touched.insert(Slice::Runs);
                }
            }
            Mutation::RunCompleted { intent, result } => {
                let owned = self
                    .pending
                    .get(&intent.target)
                    .map(|pending| pending.correlation_id == intent.correlation_id)
                    .unwrap_or(false);
                if owned {
                    self.pending.remove(&intent.target);
                }
                self.results.insert(
                    intent.target,
                    CompletedRun {
                        correlation_id: intent.correlation_id,
                        result,
                    },
                );
                touched.insert(Slice::Runs);
            }
            Mutation::RecordDiscard(record) => {
                if self.discard_capacity > 0 {
                    while self.discards.len() >= self.discard_capacity {
                        self.discards.pop_front();
                    }
                    self.discards.push_back(record);
                }
                self.discarded_total += 1;
                touched.insert(Slice::Discards);
            }
        }
    }

    /// Keeps the selection pointing at something that exists: the current
    /// function if it survived, otherwise the first function.
    fn reconcile_selection(&mut self, touched: &mut SliceSet) {
        let next = match self.snapshot.as_ref() {
            None => Selection::default(),
            Some(snapshot) => {
                let function = self
                    .selection
                    .function
                    .as_deref()
                    .and_then(|id| snapshot.function(id))
                    .or_else(|| snapshot.functions().first());
                match function {
                    None => Selection::default(),
                    Some(function) => {
                        let test_case = self
                            .selection
                            .test_case
                            .as_ref()
                            .filter(|_| {
                                self.selection.function.as_deref() == Some(function.id.as_str())
                            })
                            .filter(|case| function.test_cases.contains(*case))
                            .cloned()
                            .or_else(|| function.test_cases.first().cloned());
                        Selection {
                            function: Some(function.id.clone()),
                            test_case,
                        }
                    }
                }
            }
        };
        if next != self.selection {
            self.selection = next;
            touched.insert(Slice::Selection);
        }
    }

    /// Drops completed results whose (function, case) pair is no longer in
    /// the snapshot. A cleared snapshot drops them all. Pending runs are
    /// left alone; the emitter still owns their intents.
    fn prune_results(&mut self, touched: &mut SliceSet) {
        let before = self.results.len();
        match self.snapshot.as_ref() {
            None => self.results.clear(),
            Some(snapshot) => self
                .results
                .retain(|target, _| snapshot.has_test_case(&target.function, &target.test_case)),
        }
        if self.results.len() != before {
            touched.insert(Slice::Runs);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    pub fn snapshot(&self) -> Option<&ProjectSnapshot> {
        self.snapshot.as_ref()
    }

    /// Sequence of the visible snapshot. Never decreases within a load.
    pub fn sequence(&self) -> Option<u64> {
        self.snapshot.as_ref().map(ProjectSnapshot::sequence)
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn revisions(&self) -> &Revisions {
        &self.revisions
    }

    pub fn results(&self) -> &BTreeMap<RunTarget, CompletedRun> {
        &self.results
    }

    pub fn pending(&self) -> &BTreeMap<RunTarget, PendingRun> {
        &self.pending
    }

    pub fn discards(&self) -> impl Iterator<Item = &DiscardRecord> {
        self.discards.iter()
    }

    pub fn discarded_total(&self) -> u64 {
        self.discarded_total
    }

    pub fn run_status(&self, target: &RunTarget) -> RunStatus {
        if let Some(pending) = self.pending.get(target) {
            return match pending.status {
                IntentStatus::Stalled => RunStatus::Stalled {
                    correlation_id: pending.correlation_id,
                },
                _ => RunStatus::Pending {
                    correlation_id: pending.correlation_id,
                },
            };
        }
        match self.results.get(target) {
            None => RunStatus::Unset,
            Some(completed) => match completed.result.status {
                TestStatus::Success => RunStatus::Passed {
                    correlation_id: completed.correlation_id,
                    output: completed.result.output.clone(),
                    duration_ms: completed.result.duration_ms,
                },
                TestStatus::Failure => RunStatus::Failed {
                    correlation_id: completed.correlation_id,
                    error: completed.result.error.clone(),
                    duration_ms: completed.result.duration_ms,
                },
            },
        }
    }

    /// Functions whose id or signature contains the filter, case-insensitively.
    pub fn filtered_functions(&self) -> Rc<Vec<FunctionDefinition>> {
        self.views.filtered_functions.get(&self.revisions, || {
            let Some(snapshot) = self.snapshot.as_ref() else {
                return Vec::new();
            };
            let needle = self.filter.trim().to_lowercase();
            snapshot
                .functions()
                .iter()
                .filter(|function| {
                    needle.is_empty()
                        || function.id.to_lowercase().contains(&needle)
                        || function.signature.to_lowercase().contains(&needle)
                })
                .cloned()
                .collect()
        })
    }

    pub fn selected_function(&self) -> Rc<Option<FunctionDefinition>> {
        self.views.selected_function.get(&self.revisions, || {
            let snapshot = self.snapshot.as_ref()?;
            let id = self.selection.function.as_deref()?;
            snapshot.function(id).cloned()
        })
    }

    /// Run status for every test case of the selected function.
    pub fn selected_results(&self) -> Rc<Vec<TestCaseView>> {
        self.views.selected_results.get(&self.revisions, || {
            let Some(function) = self
                .snapshot
                .as_ref()
                .zip(self.selection.function.as_deref())
                .and_then(|(snapshot, id)| snapshot.function(id))
            else {
                return Vec::new();
            };
            function
                .test_cases
                .iter()
                .map(|case| TestCaseView {
                    test_case: case.clone(),
                    status: self.run_status(&RunTarget::new(function.id.clone(), case.clone())),
                })
                .collect()
        })
    }

    pub fn selected_diagnostics(&self) -> Rc<Vec<Diagnostic>> {
        self.views.selected_diagnostics.get(&self.revisions, || {
            match (self.snapshot.as_ref(), self.selection.function.as_deref()) {
                (Some(snapshot), Some(id)) => {
                    snapshot.diagnostics().for_function(id).cloned().collect()
                }
                _ => Vec::new(),
            }
        })
    }

    /// Recompute counts of the derived views, in declaration order:
    /// filtered functions, selected function, selected results, selected diagnostics.
    pub fn view_computations(&self) -> [u64; 4] {
        [
            self.views.filtered_functions.computations(),
            self.views.selected_function.computations(),
            self.views.selected_results.computations(),
            self.views.selected_diagnostics.computations(),
        ]
    }

    /// Owned read of the whole panel state.
    pub fn read(&self) -> PanelView {
        view::build(self)
    }
}
