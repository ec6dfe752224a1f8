//! End-to-end scenarios for the panel bridge: host messages in, commands out,
//! store state observed through the public read surface.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use playground_core::{
    DiscardReason, DispatchOutcome, EmitError, MemoryChannel, Panel, PanelConfig, Readiness,
    RunStatus, Slice,
};
use playground_protocol::{InboundEvent, InboundKind, OutboundKind};
use serde_json::{json, Value};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

fn panel() -> (Panel, MemoryChannel) {
    let channel = MemoryChannel::new();
    let mut panel = Panel::new(PanelConfig::default(), Box::new(channel.clone()));
    panel.mount();
    (panel, channel)
}

fn three_functions() -> Value {
    json!([
        { "id": "ExtractResume", "signature": "ExtractResume(text: string) -> Resume", "testCases": ["short", "long"] },
        { "id": "ClassifyTicket", "signature": "ClassifyTicket(body: string) -> Category", "testCases": ["billing"] },
        { "id": "Summarize", "signature": "Summarize(doc: string) -> string", "testCases": [] }
    ])
}

fn ready(sequence: u64, functions: Value) -> Value {
    json!({ "kind": "ready", "sequence": sequence, "payload": { "functions": functions } })
}

fn project_updated(sequence: u64, functions: Value) -> Value {
    json!({ "kind": "project-updated", "sequence": sequence, "payload": { "functions": functions } })
}

fn success(correlation_id: &str, output: &str) -> Value {
    json!({
        "kind": "test-result",
        "correlationId": correlation_id,
        "payload": { "status": "success", "output": output, "durationMs": 40 }
    })
}

#[test]
fn test_ready_with_three_functions_selects_first() {
    let (mut panel, _) = panel();
    panel.deliver(ready(1, three_functions()));

    let view = panel.read();
    assert_eq!(view.readiness.state, "ready");
    assert_eq!(view.functions.len(), 3);
    assert_eq!(view.selection.function.as_deref(), Some("ExtractResume"));
    assert_eq!(view.selection.test_case.as_deref(), Some("short"));
}

#[test]
fn test_cancelled_run_result_leaves_status_unset() {
    let (mut panel, channel) = panel();
    panel.deliver(ready(1, three_functions()));

    let id = panel.run_test("ExtractResume", "short").expect("run");
    assert_eq!(id.to_string(), "corr-1");
    panel.cancel_run("corr-1").expect("cancel");

    let commands = channel.commands();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[0].kind, OutboundKind::RunTest);
    assert_eq!(commands[0].correlation_id.as_deref(), Some("corr-1"));
    assert_eq!(
        commands[0].payload,
        json!({ "function": "ExtractResume", "testCase": "short" })
    );
    assert_eq!(commands[1].kind, OutboundKind::CancelRun);
    assert_eq!(commands[1].correlation_id.as_deref(), Some("corr-1"));

    let before = panel.store().results().clone();
    let outcome = panel.deliver(success("corr-1", "late"));
    assert_eq!(
        outcome,
        DispatchOutcome::Discarded(DiscardReason::Cancelled {
            correlation_id: "corr-1".to_string()
        })
    );
    assert_eq!(panel.store().results(), &before);
    assert_eq!(panel.run_status("ExtractResume", "short"), RunStatus::Unset);
}

#[test]
fn test_regressed_sequence_is_discarded_and_recorded() {
    let (mut panel, _) = panel();
    panel.deliver(ready(7, three_functions()));
    let snapshot_revision = panel.store().revisions().get(Slice::Snapshot);

    let outcome = panel.deliver(project_updated(
        5,
        json!([{ "id": "Other", "signature": "Other()", "testCases": [] }]),
    ));

    assert_eq!(
        outcome,
        DispatchOutcome::Discarded(DiscardReason::SequenceRegression {
            incoming: 5,
            current: 7
        })
    );
    assert_eq!(panel.store().sequence(), Some(7));
    assert_eq!(panel.read().functions.len(), 3);
    assert_eq!(
        panel.store().revisions().get(Slice::Snapshot),
        snapshot_revision
    );
    let discards: Vec<_> = panel.store().discards().collect();
    assert_eq!(discards.len(), 1);
    assert_eq!(discards[0].kind, Some(InboundKind::ProjectUpdated));
    assert_eq!(discards[0].reason.code(), "sequence_regression");
}

#[test]
fn test_malformed_kind_enters_error_once_until_reload() {
    let (mut panel, channel) = panel();
    panel.deliver(ready(1, three_functions()));

    let transitions = Rc::new(Cell::new(0));
    let sink = Rc::clone(&transitions);
    panel.subscribe(move |change, _| {
        if change.slices.contains(Slice::Readiness) {
            sink.set(sink.get() + 1);
        }
    });

    assert!(matches!(
        panel.deliver(json!({ "kind": "mystery", "payload": {} })),
        DispatchOutcome::Faulted(_)
    ));
    for message in [
        json!({ "kind": "mystery" }),
        json!({ "sequence": 3 }),
        json!({ "kind": "ready" }),
    ] {
        assert_eq!(panel.deliver(message), DispatchOutcome::Ignored);
    }
    assert_eq!(panel.deliver("not json"), DispatchOutcome::Ignored);

    assert_eq!(transitions.get(), 1);
    assert_eq!(panel.read().readiness.error_code, Some("unknown_kind"));

    panel.reload().expect("reload");
    assert_eq!(*panel.readiness(), Readiness::Loading);
    assert_eq!(
        channel.commands().last().map(|c| c.kind),
        Some(OutboundKind::Reload)
    );

    assert!(matches!(
        panel.deliver(json!({ "kind": "mystery" })),
        DispatchOutcome::Faulted(_)
    ));
    assert_eq!(transitions.get(), 3);
}

#[test]
fn test_new_run_supersedes_prior_intent() {
    let (mut panel, _) = panel();
    panel.deliver(ready(1, three_functions()));

    panel.run_test("ClassifyTicket", "billing").expect("first run");
    panel.run_test("ClassifyTicket", "billing").expect("second run");
    assert_eq!(panel.emitter().live_intents().count(), 1);

    let stale = panel.deliver(success("corr-1", "old"));
    assert!(matches!(
        stale,
        DispatchOutcome::Discarded(DiscardReason::Superseded { .. })
    ));
    assert_eq!(
        panel.run_status("ClassifyTicket", "billing"),
        RunStatus::Pending {
            correlation_id: playground_core::CorrelationId::parse("corr-2").expect("id")
        }
    );

    panel.deliver(success("corr-2", "new"));
    match panel.run_status("ClassifyTicket", "billing") {
        RunStatus::Passed { output, .. } => assert_eq!(output, Some(json!("new"))),
        other => panic!("unexpected status {:?}", other),
    }
}

#[test]
fn test_observed_sequence_never_decreases() {
    let (mut panel, _) = panel();
    let observed = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&observed);
    panel.subscribe(move |_, store| {
        if let Some(sequence) = store.sequence() {
            sink.borrow_mut().push(sequence);
        }
    });

    panel.deliver(ready(2, three_functions()));
    for sequence in [4, 3, 9, 9, 1, 5, 12, 11] {
        panel.deliver(project_updated(sequence, three_functions()));
    }

    let observed = observed.borrow();
    assert!(observed.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(observed.last(), Some(&12));
    assert_eq!(panel.store().discarded_total(), 4);
}

/// Equal sequence numbers are applied: the most recently arrived event wins.
#[test]
fn test_equal_sequence_is_last_write_wins() {
    let (mut panel, _) = panel();
    panel.deliver(ready(4, three_functions()));

    let outcome = panel.deliver(project_updated(
        4,
        json!([{ "id": "Replacement", "signature": "Replacement()", "testCases": [] }]),
    ));

    assert!(matches!(outcome, DispatchOutcome::Applied(_)));
    let view = panel.read();
    assert_eq!(view.functions.len(), 1);
    assert_eq!(view.functions[0].id, "Replacement");
    assert_eq!(view.selection.function.as_deref(), Some("Replacement"));
}

#[test]
fn test_incremental_update_merges_and_keeps_selection() {
    let (mut panel, _) = panel();
    panel.deliver(ready(1, three_functions()));
    panel.select_function("ClassifyTicket").expect("select");

    panel.deliver(json!({
        "kind": "project-updated",
        "sequence": 2,
        "payload": {
            "incremental": true,
            "functions": [
                { "id": "ClassifyTicket", "signature": "ClassifyTicket(body: string, lang: string) -> Category", "testCases": ["billing", "refund"] }
            ],
            "removed": ["Summarize"]
        }
    }));

    let view = panel.read();
    let ids: Vec<&str> = view.functions.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["ExtractResume", "ClassifyTicket"]);
    assert_eq!(view.selection.function.as_deref(), Some("ClassifyTicket"));
    assert_eq!(view.selection.test_case.as_deref(), Some("billing"));
    assert_eq!(panel.store().selected_results().len(), 2);
}

#[test]
fn test_stalled_run_is_reported_and_can_still_complete() {
    let now = Rc::new(Cell::new(t0()));
    let clock = Rc::clone(&now);
    let channel = MemoryChannel::new();
    let mut panel = Panel::new(
        PanelConfig {
            stall_timeout_secs: 5,
            ..PanelConfig::default()
        },
        Box::new(channel),
    )
    .with_clock(move || clock.get());
    panel.mount();
    panel.deliver(ready(1, three_functions()));

    panel.run_test("ExtractResume", "long").expect("run");
    now.set(t0() + Duration::seconds(4));
    assert!(panel.tick().is_empty());

    now.set(t0() + Duration::seconds(6));
    let stalled = panel.tick();
    assert_eq!(stalled.len(), 1);
    assert!(matches!(
        panel.run_status("ExtractResume", "long"),
        RunStatus::Stalled { .. }
    ));

    panel.deliver(success("corr-1", "eventually"));
    assert!(matches!(
        panel.run_status("ExtractResume", "long"),
        RunStatus::Passed { .. }
    ));
}

#[test]
fn test_diagnostics_merge_and_follow_selection() {
    let (mut panel, _) = panel();
    panel.deliver(ready(1, three_functions()));
    let outcome = panel.deliver(json!({
        "kind": "diagnostics",
        "payload": {
            "diagnostics": [
                { "file": "resume.baml", "severity": "error", "message": "unknown type Resume", "function": "ExtractResume" },
                { "file": "ticket.baml", "severity": "warning", "message": "unused field", "function": "ClassifyTicket" }
            ]
        }
    }));
    assert!(matches!(outcome, DispatchOutcome::Applied(_)));

    assert_eq!(panel.store().selected_diagnostics().len(), 1);
    let view = panel.read();
    assert_eq!(view.diagnostic_count, 2);
    assert_eq!(view.error_count, 1);
    assert_eq!(view.functions[0].error_count, 1);

    panel.deliver(json!({
        "kind": "diagnostics",
        "payload": { "clearedFiles": ["resume.baml"] }
    }));
    assert!(panel.store().selected_diagnostics().is_empty());
    assert_eq!(panel.read().error_count, 0);
}

#[test]
fn test_listeners_see_committed_state_in_order() {
    let (mut panel, _) = panel();
    let seen = Rc::new(RefCell::new(Vec::new()));

    let sink = Rc::clone(&seen);
    panel.on(InboundKind::Ready, move |event, store| {
        if let InboundEvent::Ready { sequence, .. } = event {
            sink.borrow_mut()
                .push(format!("ready:{}:{:?}", sequence, store.sequence()));
        }
    });
    let sink = Rc::clone(&seen);
    panel.on(InboundKind::ProjectUpdated, move |_, store| {
        sink.borrow_mut()
            .push(format!("updated:{:?}", store.sequence()));
    });

    panel.deliver(ready(1, three_functions()));
    panel.deliver(project_updated(0, three_functions()));
    panel.deliver(project_updated(2, three_functions()));

    assert_eq!(
        *seen.borrow(),
        vec!["ready:1:Some(1)".to_string(), "updated:Some(2)".to_string()]
    );
}

#[test]
fn test_reload_is_rejected_outside_error_state() {
    let (mut panel, channel) = panel();
    panel.deliver(ready(1, three_functions()));
    assert_eq!(panel.reload(), Err(EmitError::ReloadUnavailable));
    assert!(channel.sent().is_empty());
}

#[test]
fn test_reload_supersedes_live_runs() {
    let (mut panel, _) = panel();
    panel.deliver(ready(3, three_functions()));
    panel.run_test("ExtractResume", "short").expect("run");
    panel.deliver(json!({ "kind": "error", "payload": { "message": "runtime crashed" } }));
    assert_eq!(panel.read().readiness.error_code, Some("host_error"));

    panel.reload().expect("reload");
    assert!(panel.store().pending().is_empty());
    assert_eq!(panel.store().sequence(), None);

    panel.deliver(ready(1, three_functions()));
    assert!(panel.readiness().is_ready());
    assert!(matches!(
        panel.deliver(success("corr-1", "from before reload")),
        DispatchOutcome::Discarded(DiscardReason::Superseded { .. })
    ));
    assert_eq!(panel.run_status("ExtractResume", "short"), RunStatus::Unset);
}

#[test]
fn test_oversized_message_faults() {
    let channel = MemoryChannel::new();
    let mut panel = Panel::new(
        PanelConfig {
            max_message_bytes: 64,
            ..PanelConfig::default()
        },
        Box::new(channel),
    );
    panel.mount();
    let outcome = panel.deliver(ready(1, three_functions()));
    assert!(matches!(outcome, DispatchOutcome::Faulted(_)));
    assert_eq!(panel.read().readiness.error_code, Some("message_too_large"));
}

#[test]
fn test_close_stops_callbacks() {
    let (mut panel, _) = panel();
    let hits = Rc::new(Cell::new(0));
    let sink = Rc::clone(&hits);
    panel.subscribe(move |_, _| sink.set(sink.get() + 1));
    panel.receive(ready(1, three_functions()));
    panel.close();
    assert_eq!(hits.get(), 0);
}
