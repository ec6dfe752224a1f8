//! One panel instance: transport, dispatcher, store, emitter and event bus
//! wired together.
//!
//! Inbound and outbound paths are independent. Host messages flow
//! transport → dispatcher → store → bus; user intents flow
//! panel → emitter → transport, with the resulting local state committed
//! through the dispatcher so the store keeps a single writer.

use chrono::{DateTime, Utc};
use playground_protocol::{InboundKind, Settings};

use crate::bus::{EventBus, ListenerId};
use crate::config::PanelConfig;
use crate::decoder::Readiness;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::emitter::{CommandEmitter, CorrelationId, RunTarget, TestRunIntent};
use crate::error::EmitError;
use crate::store::{PanelView, RunStatus, Store, StoreChange, SubscriptionId};
use crate::transport::{HostChannel, RawMessage, Transport};

type Clock = Box<dyn Fn() -> DateTime<Utc>>;

pub struct Panel {
    config: PanelConfig,
    transport: Transport,
    dispatcher: Dispatcher,
    emitter: CommandEmitter,
    bus: EventBus,
    clock: Clock,
}

impl Panel {
    pub fn new(config: PanelConfig, channel: Box<dyn HostChannel>) -> Self {
        let store = Store::new(config.discard_log_capacity);
        Self {
            transport: Transport::new(channel),
            dispatcher: Dispatcher::new(store, config.max_message_bytes),
            emitter: CommandEmitter::new(&config),
            bus: EventBus::new(),
            clock: Box::new(Utc::now),
            config,
        }
    }

    /// Replaces the wall clock used for intent issue times and stall sweeps.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    /// `Uninitialized → Loading`. Returns false if already mounted.
    pub fn mount(&mut self) -> bool {
        self.dispatcher.mount()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────

    /// Queues a raw host message without processing it.
    pub fn receive(&mut self, raw: impl Into<RawMessage>) {
        self.transport.receive(raw.into());
    }

    /// Drains queued messages in arrival order. Each applied event is
    /// published to the bus after its commit and before the next message.
    pub fn pump(&mut self) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::with_capacity(self.transport.pending_inbound());
        while let Some(raw) = self.transport.next_inbound() {
            let outcome = self.dispatcher.dispatch(raw, &mut self.emitter);
            if let DispatchOutcome::Applied(event) = &outcome {
                self.bus.publish(event, self.dispatcher.store());
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Queues and processes one message, after anything already queued.
    pub fn deliver(&mut self, raw: impl Into<RawMessage>) -> DispatchOutcome {
        self.receive(raw);
        self.pump().pop().unwrap_or(DispatchOutcome::Ignored)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Outbound
    // ─────────────────────────────────────────────────────────────────────

    /// Sends `run-test` for a pair in the current snapshot. Once sent, any
    /// live run of the same pair becomes stale. A failed send changes nothing.
    pub fn run_test(&mut self, function: &str, test_case: &str) -> Result<CorrelationId, EmitError> {
        if !self.dispatcher.readiness().is_ready() {
            return Err(EmitError::NotReady);
        }
        let known = self
            .dispatcher
            .store()
            .snapshot()
            .map(|snapshot| snapshot.has_test_case(function, test_case))
            .unwrap_or(false);
        if !known {
            return Err(EmitError::UnknownTarget {
                function: function.to_string(),
                test_case: test_case.to_string(),
            });
        }

        // Nothing is recorded until the host has the command.
        let target = RunTarget::new(function, test_case);
        let command = self.emitter.prepare_run(&target);
        if let Err(err) = self.transport.send(&command) {
            tracing::warn!(function, test_case, error = %err, "Failed to send run-test");
            return Err(err.into());
        }

        let now = (self.clock)();
        let issued = self.emitter.issue_run(target, now);
        let correlation_id = issued.intent.correlation_id;

        tracing::info!(
            correlation_id = %correlation_id,
            function,
            test_case,
            "Run requested"
        );
        self.dispatcher
            .record_run_started(issued.intent, issued.superseded);
        Ok(correlation_id)
    }

    /// Cancels a live run. Its result, if it still arrives, is discarded.
    pub fn cancel_run(&mut self, correlation_id: &str) -> Result<(), EmitError> {
        let id = CorrelationId::parse(correlation_id)
            .ok_or_else(|| EmitError::NotLive(correlation_id.to_string()))?;
        let (intent, command) = self.emitter.cancel_run(id)?;
        self.dispatcher.record_run_cancelled(intent);
        self.transport.send(&command)?;
        Ok(())
    }

    /// Selects a function locally and tells the host about it.
    pub fn select_function(&mut self, function: &str) -> Result<(), EmitError> {
        self.dispatcher.select_function(function)?;
        let command = self.emitter.select_function(function);
        self.transport.send(&command)?;
        Ok(())
    }

    pub fn select_test_case(&mut self, test_case: &str) -> Result<(), EmitError> {
        self.dispatcher.select_test_case(test_case)
    }

    pub fn set_filter(&mut self, filter: &str) {
        self.dispatcher.set_filter(filter);
    }

    /// Asks the host for settings, optionally with changes to apply. The
    /// host answers with a snapshot carrying the new settings.
    pub fn request_settings(&mut self, changes: Option<Settings>) -> Result<(), EmitError> {
        let command = self.emitter.request_settings(changes);
        self.transport.send(&command)?;
        Ok(())
    }

    /// Leaves the error state: drops the snapshot and every live run, returns
    /// to `Loading` and asks the host for a fresh snapshot.
    pub fn reload(&mut self) -> Result<(), EmitError> {
        self.dispatcher.reload()?;
        let retired = self.emitter.supersede_all();
        if !retired.is_empty() {
            tracing::info!(count = retired.len(), "Live runs superseded by reload");
        }
        let command = self.emitter.reload();
        self.transport.send(&command)?;
        Ok(())
    }

    /// Runs the stall sweep against the panel clock.
    pub fn tick(&mut self) -> Vec<TestRunIntent> {
        let now = (self.clock)();
        self.tick_at(now)
    }

    pub fn tick_at(&mut self, now: DateTime<Utc>) -> Vec<TestRunIntent> {
        let stalled = self.emitter.sweep_stalled(now);
        self.dispatcher.record_runs_stalled(stalled.clone());
        stalled
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads and registration
    // ─────────────────────────────────────────────────────────────────────

    pub fn store(&self) -> &Store {
        self.dispatcher.store()
    }

    pub fn readiness(&self) -> &Readiness {
        self.dispatcher.readiness()
    }

    pub fn read(&self) -> PanelView {
        self.dispatcher.store().read()
    }

    pub fn run_status(&self, function: &str, test_case: &str) -> RunStatus {
        self.dispatcher
            .store()
            .run_status(&RunTarget::new(function, test_case))
    }

    pub fn emitter(&self) -> &CommandEmitter {
        &self.emitter
    }

    pub fn sent_count(&self) -> u64 {
        self.transport.sent_count()
    }

    pub fn subscribe(
        &mut self,
        callback: impl FnMut(&StoreChange, &Store) + 'static,
    ) -> SubscriptionId {
        self.dispatcher.store_mut().subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.dispatcher.store_mut().unsubscribe(id)
    }

    pub fn on(
        &mut self,
        kind: InboundKind,
        listener: impl FnMut(&playground_protocol::InboundEvent, &Store) + 'static,
    ) -> ListenerId {
        self.bus.on(kind, listener)
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        self.bus.off(id)
    }

    /// Tears the panel down. Queued messages are dropped unprocessed and no
    /// callback fires after this returns.
    pub fn close(mut self) {
        let dropped = self.transport.pending_inbound();
        self.transport.clear_inbound();
        self.dispatcher.store_mut().clear_subscribers();
        self.bus.clear();
        self.emitter.clear();
        tracing::info!(
            dropped,
            received = self.dispatcher.received(),
            sent = self.transport.sent_count(),
            "Panel closed"
        );
    }
}
