//! Routes decoded host events into store mutations.
//!
//! The dispatcher owns the store and is its only writer. Each inbound message
//! is planned into one of three outcomes before anything is written:
//!
//! - **Commit**: a batch of mutations applied atomically.
//! - **Discard**: an accepted event that must not change visible state
//!   (stale results, sequence regressions). Recorded in the discard log.
//! - **Fault**: a global failure. The readiness machine moves to `Error`
//!   once; later messages are ignored until the user reloads.
//!
//! # Sequence policy
//!
//! Only `ready` and `project-updated` are sequence-gated. A lower sequence
//! than the visible one is discarded. An equal sequence is applied
//! (last-write-wins): the host is assumed to deliver each sequence at most
//! once, so an equal sequence is treated as a correction of the same revision.

use playground_protocol::InboundEvent;

use crate::decoder::{self, next_readiness, Readiness, Transition};
use crate::emitter::{Admission, CommandEmitter, TestRunIntent};
use crate::error::{BridgeError, DiscardReason, EmitError, ProtocolError};
use crate::store::{DiscardRecord, Mutation, ProjectSnapshot, Selection, Store};
use crate::transport::RawMessage;

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Applied(InboundEvent),
    Discarded(DiscardReason),
    Faulted(BridgeError),
    /// Received while in the error state; dropped without side effects.
    Ignored,
}

enum Plan {
    Commit(Vec<Mutation>),
    Discard(DiscardReason),
    Fault(BridgeError),
}

pub struct Dispatcher {
    store: Store,
    max_message_bytes: usize,
    received: u64,
}

impl Dispatcher {
    pub fn new(store: Store, max_message_bytes: usize) -> Self {
        Self {
            store,
            max_message_bytes,
            received: 0,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn readiness(&self) -> &Readiness {
        self.store.readiness()
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn mount(&mut self) -> bool {
        self.transition(Transition::Mount)
    }

    /// The single top-level handler: every failure below ends here as either
    /// a discard or the `Error` state.
    pub fn dispatch(&mut self, raw: RawMessage, emitter: &mut CommandEmitter) -> DispatchOutcome {
        self.received += 1;

        if matches!(self.store.readiness(), Readiness::Error(_)) {
            tracing::debug!(ordinal = self.received, "Ignoring message while errored");
            return DispatchOutcome::Ignored;
        }

        let event = match decoder::decode(raw, self.max_message_bytes) {
            Ok(event) => event,
            Err(err) => return self.fault(err),
        };

        tracing::debug!(
            ordinal = self.received,
            kind = event.kind().as_str(),
            sequence = ?event.project_sequence(),
            "Dispatching host event"
        );

        match self.plan(&event, emitter) {
            Plan::Commit(mutations) => {
                self.store.commit(mutations);
                DispatchOutcome::Applied(event)
            }
            Plan::Discard(reason) => {
                self.record_discard(&event, reason.clone());
                DispatchOutcome::Discarded(reason)
            }
            Plan::Fault(err) => self.fault(err),
        }
    }

    fn plan(&self, event: &InboundEvent, emitter: &mut CommandEmitter) -> Plan {
        let readiness = self.store.readiness();
        if *readiness == Readiness::Uninitialized {
            return Plan::Discard(DiscardReason::NotMounted);
        }

        match event {
            InboundEvent::Ready { sequence, project }
            | InboundEvent::ProjectUpdated { sequence, project } => {
                if let Some(current) = self.store.sequence() {
                    if *sequence < current {
                        return Plan::Discard(DiscardReason::SequenceRegression {
                            incoming: *sequence,
                            current,
                        });
                    }
                    if *sequence == current {
                        tracing::debug!(sequence, "Equal sequence; last write wins");
                    }
                }

                if project.incremental {
                    if self.store.snapshot().is_none() {
                        return Plan::Discard(DiscardReason::NoBaseSnapshot {
                            sequence: Some(*sequence),
                        });
                    }
                    return Plan::Commit(vec![Mutation::MergeSnapshot {
                        sequence: *sequence,
                        payload: project.clone(),
                    }]);
                }

                let mut mutations = vec![Mutation::ReplaceSnapshot(ProjectSnapshot::from_payload(
                    *sequence,
                    project.clone(),
                ))];
                if let Some(next) = next_readiness(readiness, Transition::FullSnapshot) {
                    tracing::info!(
                        sequence,
                        functions = project.functions.len(),
                        "First snapshot received; panel ready"
                    );
                    mutations.push(Mutation::SetReadiness(next));
                }
                Plan::Commit(mutations)
            }
            InboundEvent::Diagnostics {
                sequence,
                diagnostics,
            } => {
                if self.store.snapshot().is_none() {
                    return Plan::Discard(DiscardReason::NoBaseSnapshot {
                        sequence: *sequence,
                    });
                }
                Plan::Commit(vec![Mutation::MergeDiagnostics(diagnostics.clone())])
            }
            InboundEvent::TestResult {
                correlation_id,
                result,
            } => match emitter.admit_result(correlation_id) {
                Admission::Live(intent) => {
                    tracing::info!(
                        correlation_id = %intent.correlation_id,
                        function = %intent.target.function,
                        test_case = %intent.target.test_case,
                        status = ?result.status,
                        "Run completed"
                    );
                    Plan::Commit(vec![Mutation::RunCompleted {
                        intent,
                        result: result.clone(),
                    }])
                }
                Admission::Discard(reason) => Plan::Discard(reason),
            },
            InboundEvent::HostError { message } => Plan::Fault(BridgeError::Host {
                message: message.clone(),
            }),
        }
    }

    fn fault(&mut self, err: BridgeError) -> DispatchOutcome {
        tracing::warn!(code = err.code(), error = %err, "Bridge fault; panel entering error state");
        if let Some(next) = next_readiness(self.store.readiness(), Transition::Fault(err.clone())) {
            self.store.commit(vec![Mutation::SetReadiness(next)]);
        }
        DispatchOutcome::Faulted(err)
    }

    fn record_discard(&mut self, event: &InboundEvent, reason: DiscardReason) {
        if reason.is_stale_result() {
            tracing::info!(reason = reason.code(), "Stale result discarded");
        } else if let DiscardReason::SequenceRegression { incoming, current } = &reason {
            let err = ProtocolError::SequenceRegression {
                incoming: *incoming,
                current: *current,
            };
            tracing::warn!(error = %err, "Project update discarded");
        } else {
            tracing::warn!(reason = reason.code(), kind = event.kind().as_str(), "Event discarded");
        }

        self.store.commit(vec![Mutation::RecordDiscard(DiscardRecord {
            ordinal: self.received,
            kind: Some(event.kind()),
            reason,
        })]);
    }

    fn transition(&mut self, transition: Transition) -> bool {
        match next_readiness(self.store.readiness(), transition) {
            Some(next) => {
                tracing::info!(
                    from = self.store.readiness().as_str(),
                    to = next.as_str(),
                    "Readiness changed"
                );
                self.store.commit(vec![Mutation::SetReadiness(next)]);
                true
            }
            None => false,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Local intents. These are the only writes not driven by the host.
    // ─────────────────────────────────────────────────────────────────────

    /// Starts a new load: clears the snapshot (and with it the sequence
    /// floor) and pending runs, then returns to `Loading`.
    pub fn reload(&mut self) -> Result<(), EmitError> {
        let next = next_readiness(self.store.readiness(), Transition::Reload)
            .ok_or(EmitError::ReloadUnavailable)?;
        tracing::info!("Reload requested; waiting for a fresh snapshot");
        self.store.commit(vec![
            Mutation::ClearSnapshot,
            Mutation::ClearPending,
            Mutation::SetReadiness(next),
        ]);
        Ok(())
    }

    pub fn select_function(&mut self, function: &str) -> Result<(), EmitError> {
        let definition = self
            .store
            .snapshot()
            .and_then(|snapshot| snapshot.function(function))
            .ok_or_else(|| EmitError::UnknownFunction(function.to_string()))?;
        let selection = Selection {
            function: Some(definition.id.clone()),
            test_case: definition.test_cases.first().cloned(),
        };
        self.store.commit(vec![Mutation::Select(selection)]);
        Ok(())
    }

    pub fn select_test_case(&mut self, test_case: &str) -> Result<(), EmitError> {
        let function = self
            .store
            .selection()
            .function
            .clone()
            .ok_or(EmitError::NotReady)?;
        let known = self
            .store
            .snapshot()
            .map(|snapshot| snapshot.has_test_case(&function, test_case))
            .unwrap_or(false);
        if !known {
            return Err(EmitError::UnknownTarget {
                function,
                test_case: test_case.to_string(),
            });
        }
        self.store.commit(vec![Mutation::Select(Selection {
            function: Some(function),
            test_case: Some(test_case.to_string()),
        })]);
        Ok(())
    }

    pub fn set_filter(&mut self, filter: &str) {
        self.store
            .commit(vec![Mutation::SetFilter(filter.to_string())]);
    }

    pub fn record_run_started(&mut self, intent: TestRunIntent, superseded: Option<TestRunIntent>) {
        let mut mutations = Vec::with_capacity(2);
        if let Some(previous) = superseded {
            mutations.push(Mutation::RunCleared(previous));
        }
        mutations.push(Mutation::RunPending(intent));
        self.store.commit(mutations);
    }

    pub fn record_run_cancelled(&mut self, intent: TestRunIntent) {
        self.store.commit(vec![Mutation::RunCleared(intent)]);
    }

    pub fn record_runs_stalled(&mut self, intents: Vec<TestRunIntent>) {
        if intents.is_empty() {
            return;
        }
        self.store
            .commit(intents.into_iter().map(Mutation::RunStalled).collect());
    }
}
