//! Wire protocol types and validation for the playground panel bridge.
//!
//! This crate is shared by the panel core and host-side tooling to prevent
//! schema drift. The panel remains the authority on validation, but hosts can
//! reuse the same types to construct valid envelopes.
//!
//! Every message in either direction is an [`Envelope`]:
//!
//! ```json
//! { "kind": "test-result", "correlationId": "corr-3", "payload": { "status": "success" } }
//! ```

use std::collections::HashSet;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_ID_LEN: usize = 256;

/// Host-supplied settings object. Opaque to the panel.
pub type Settings = Map<String, Value>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

// The kind stays a plain string here so an unrecognized kind is a protocol
// fault rather than a schema fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Envelope {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InboundKind {
    Ready,
    ProjectUpdated,
    Diagnostics,
    TestResult,
    Error,
}

impl InboundKind {
    pub const ALL: [InboundKind; 5] = [
        InboundKind::Ready,
        InboundKind::ProjectUpdated,
        InboundKind::Diagnostics,
        InboundKind::TestResult,
        InboundKind::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InboundKind::Ready => "ready",
            InboundKind::ProjectUpdated => "project-updated",
            InboundKind::Diagnostics => "diagnostics",
            InboundKind::TestResult => "test-result",
            InboundKind::Error => "error",
        }
    }

    /// Looks up a kind by its wire name.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutboundKind {
    RunTest,
    CancelRun,
    SelectFunction,
    RequestSettings,
    Reload,
}

impl OutboundKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboundKind::RunTest => "run-test",
            OutboundKind::CancelRun => "cancel-run",
            OutboundKind::SelectFunction => "select-function",
            OutboundKind::RequestSettings => "request-settings",
            OutboundKind::Reload => "reload",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound payloads
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FunctionDefinition {
    pub id: String,
    pub signature: String,
    #[serde(default)]
    pub test_cases: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Diagnostic {
    pub file: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

/// Payload of `ready` and `project-updated`.
///
/// `incremental: true` upserts `functions` by id and drops `removed`; anything
/// else replaces the whole project.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProjectPayload {
    #[serde(default)]
    pub functions: Vec<FunctionDefinition>,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    #[serde(default)]
    pub incremental: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DiagnosticsPayload {
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleared_files: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Success,
    Failure,
}

/// Execution failure reported by the host for one test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TestResultPayload {
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RuntimeError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostErrorPayload {
    pub message: String,
}

/// A fully validated inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Ready {
        sequence: u64,
        project: ProjectPayload,
    },
    ProjectUpdated {
        sequence: u64,
        project: ProjectPayload,
    },
    Diagnostics {
        sequence: Option<u64>,
        diagnostics: DiagnosticsPayload,
    },
    TestResult {
        correlation_id: String,
        result: TestResultPayload,
    },
    HostError {
        message: String,
    },
}

impl InboundEvent {
    pub fn kind(&self) -> InboundKind {
        match self {
            InboundEvent::Ready { .. } => InboundKind::Ready,
            InboundEvent::ProjectUpdated { .. } => InboundKind::ProjectUpdated,
            InboundEvent::Diagnostics { .. } => InboundKind::Diagnostics,
            InboundEvent::TestResult { .. } => InboundKind::TestResult,
            InboundEvent::HostError { .. } => InboundKind::Error,
        }
    }

    /// Sequence number for sequence-gated kinds only.
    pub fn project_sequence(&self) -> Option<u64> {
        match self {
            InboundEvent::Ready { sequence, .. } | InboundEvent::ProjectUpdated { sequence, .. } => {
                Some(*sequence)
            }
            _ => None,
        }
    }
}

pub fn parse_envelope(value: Value) -> Result<Envelope, ErrorInfo> {
    serde_json::from_value(value).map_err(|err| {
        ErrorInfo::new(
            "invalid_envelope",
            format!("envelope does not match schema: {}", err),
        )
    })
}

/// Decodes the kind-specific payload of an envelope whose kind is already known.
pub fn parse_inbound(kind: InboundKind, envelope: Envelope) -> Result<InboundEvent, ErrorInfo> {
    let Envelope {
        sequence,
        correlation_id,
        payload,
        ..
    } = envelope;

    match kind {
        InboundKind::Ready | InboundKind::ProjectUpdated => {
            let sequence = require_sequence(sequence, kind)?;
            let project: ProjectPayload = parse_payload(payload, kind)?;
            validate_project(&project)?;
            if kind == InboundKind::Ready {
                if project.incremental {
                    return Err(ErrorInfo::new(
                        "invalid_payload",
                        "ready must carry a full snapshot",
                    ));
                }
                Ok(InboundEvent::Ready { sequence, project })
            } else {
                Ok(InboundEvent::ProjectUpdated { sequence, project })
            }
        }
        InboundKind::Diagnostics => {
            let diagnostics: DiagnosticsPayload = parse_payload(payload, kind)?;
            for diagnostic in &diagnostics.diagnostics {
                validate_diagnostic(diagnostic)?;
            }
            for file in &diagnostics.cleared_files {
                require_non_empty(file, "clearedFiles")?;
            }
            Ok(InboundEvent::Diagnostics {
                sequence,
                diagnostics,
            })
        }
        InboundKind::TestResult => {
            let correlation_id = match correlation_id {
                Some(value) => value,
                None => {
                    return Err(ErrorInfo::new(
                        "missing_field",
                        "correlationId is required for test-result",
                    ))
                }
            };
            validate_id(&correlation_id, "correlationId")?;
            let result: TestResultPayload = parse_payload(payload, kind)?;
            validate_test_result(&result)?;
            Ok(InboundEvent::TestResult {
                correlation_id,
                result,
            })
        }
        InboundKind::Error => {
            let error: HostErrorPayload = parse_payload(payload, kind)?;
            Ok(InboundEvent::HostError {
                message: error.message,
            })
        }
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(
    payload: Value,
    kind: InboundKind,
) -> Result<T, ErrorInfo> {
    serde_json::from_value(payload).map_err(|err| {
        ErrorInfo::new(
            "invalid_payload",
            format!("{} payload is invalid: {}", kind.as_str(), err),
        )
    })
}

fn require_sequence(sequence: Option<u64>, kind: InboundKind) -> Result<u64, ErrorInfo> {
    sequence.ok_or_else(|| {
        ErrorInfo::new(
            "missing_field",
            format!("sequence is required for {}", kind.as_str()),
        )
    })
}

fn validate_project(project: &ProjectPayload) -> Result<(), ErrorInfo> {
    let mut seen = HashSet::new();
    for function in &project.functions {
        validate_id(&function.id, "function id")?;
        if !seen.insert(function.id.as_str()) {
            return Err(ErrorInfo::new(
                "duplicate_id",
                format!("function {} appears more than once", function.id),
            ));
        }
        let mut cases = HashSet::new();
        for case in &function.test_cases {
            validate_id(case, "test case id")?;
            if !cases.insert(case.as_str()) {
                return Err(ErrorInfo::new(
                    "duplicate_id",
                    format!("test case {} appears more than once in {}", case, function.id),
                ));
            }
        }
    }

    if !project.incremental && !project.removed.is_empty() {
        return Err(ErrorInfo::new(
            "invalid_payload",
            "removed is only valid on incremental updates",
        ));
    }
    for id in &project.removed {
        validate_id(id, "removed function id")?;
    }

    for diagnostic in &project.diagnostics {
        validate_diagnostic(diagnostic)?;
    }
    Ok(())
}

fn validate_diagnostic(diagnostic: &Diagnostic) -> Result<(), ErrorInfo> {
    require_non_empty(&diagnostic.file, "file")?;
    if let Some(span) = diagnostic.span {
        if span.start > span.end {
            return Err(ErrorInfo::new(
                "invalid_span",
                format!("span start {} is past end {}", span.start, span.end),
            ));
        }
    }
    Ok(())
}

fn validate_test_result(result: &TestResultPayload) -> Result<(), ErrorInfo> {
    if result.status == TestStatus::Failure && result.error.is_none() {
        return Err(ErrorInfo::new(
            "missing_field",
            "error is required when status is failure",
        ));
    }
    if let Some(completed_at) = &result.completed_at {
        if DateTime::parse_from_rfc3339(completed_at).is_err() {
            return Err(ErrorInfo::new(
                "invalid_timestamp",
                "completedAt must be RFC3339",
            ));
        }
    }
    Ok(())
}

pub fn validate_id(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new("invalid_id", format!("{} is required", field)));
    }
    if value.chars().count() > MAX_ID_LEN {
        return Err(ErrorInfo::new(
            "invalid_id",
            format!("{} must be {} characters or fewer", field, MAX_ID_LEN),
        ));
    }
    Ok(())
}

fn require_non_empty(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound commands
// ─────────────────────────────────────────────────────────────────────────────

/// A command sent from the panel to the host. Serializes as an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Command {
    pub kind: OutboundKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RunTestPayload {
    pub function: String,
    pub test_case: String,
}

impl Command {
    pub fn run_test(correlation_id: &str, function: &str, test_case: &str) -> Self {
        Self {
            kind: OutboundKind::RunTest,
            correlation_id: Some(correlation_id.to_string()),
            payload: serde_json::json!({ "function": function, "testCase": test_case }),
        }
    }

    pub fn cancel_run(correlation_id: &str) -> Self {
        Self {
            kind: OutboundKind::CancelRun,
            correlation_id: Some(correlation_id.to_string()),
            payload: Value::Null,
        }
    }

    pub fn select_function(function: &str) -> Self {
        Self {
            kind: OutboundKind::SelectFunction,
            correlation_id: None,
            payload: serde_json::json!({ "function": function }),
        }
    }

    pub fn request_settings(changes: Option<Settings>) -> Self {
        let payload = match changes {
            Some(changes) => serde_json::json!({ "changes": changes }),
            None => Value::Null,
        };
        Self {
            kind: OutboundKind::RequestSettings,
            correlation_id: None,
            payload,
        }
    }

    pub fn reload() -> Self {
        Self {
            kind: OutboundKind::Reload,
            correlation_id: None,
            payload: Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(value: Value) -> Envelope {
        parse_envelope(value).expect("envelope")
    }

    fn project_envelope(kind: &str, sequence: Option<u64>, payload: Value) -> Envelope {
        Envelope {
            kind: kind.to_string(),
            sequence,
            correlation_id: None,
            payload,
        }
    }

    #[test]
    fn kinds_round_trip_through_strings() {
        for kind in InboundKind::ALL {
            assert_eq!(InboundKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(InboundKind::parse("project_updated"), None);
    }

    #[test]
    fn envelope_requires_kind() {
        let err = parse_envelope(json!({ "sequence": 1 })).unwrap_err();
        assert_eq!(err.code, "invalid_envelope");
    }

    #[test]
    fn envelope_rejects_unknown_fields() {
        assert!(parse_envelope(json!({ "kind": "ready", "seq": 1 })).is_err());
    }

    #[test]
    fn envelope_rejects_negative_sequence() {
        assert!(parse_envelope(json!({ "kind": "ready", "sequence": -1 })).is_err());
    }

    #[test]
    fn ready_requires_sequence() {
        let env = project_envelope("ready", None, json!({ "functions": [] }));
        let err = parse_inbound(InboundKind::Ready, env).unwrap_err();
        assert_eq!(err.code, "missing_field");
    }

    #[test]
    fn ready_rejects_incremental_payload() {
        let env = project_envelope("ready", Some(1), json!({ "incremental": true }));
        assert!(parse_inbound(InboundKind::Ready, env).is_err());
    }

    #[test]
    fn parses_project_with_test_cases() {
        let env = envelope(json!({
            "kind": "ready",
            "sequence": 3,
            "payload": {
                "functions": [
                    { "id": "ExtractResume", "signature": "(text: string) -> Resume", "testCases": ["t1", "t2"] }
                ],
                "settings": { "proxy": true }
            }
        }));
        match parse_inbound(InboundKind::Ready, env).expect("parse") {
            InboundEvent::Ready { sequence, project } => {
                assert_eq!(sequence, 3);
                assert_eq!(project.functions[0].test_cases, vec!["t1", "t2"]);
                assert_eq!(
                    project.settings.and_then(|s| s.get("proxy").cloned()),
                    Some(json!(true))
                );
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn rejects_duplicate_function_ids() {
        let env = project_envelope(
            "project-updated",
            Some(2),
            json!({ "functions": [
                { "id": "f1", "signature": "()" },
                { "id": "f1", "signature": "()" }
            ]}),
        );
        let err = parse_inbound(InboundKind::ProjectUpdated, env).unwrap_err();
        assert_eq!(err.code, "duplicate_id");
    }

    #[test]
    fn rejects_removed_on_full_update() {
        let env = project_envelope("project-updated", Some(2), json!({ "removed": ["f1"] }));
        assert!(parse_inbound(InboundKind::ProjectUpdated, env).is_err());
    }

    #[test]
    fn test_result_requires_correlation_id() {
        let env = envelope(json!({ "kind": "test-result", "payload": { "status": "success" } }));
        let err = parse_inbound(InboundKind::TestResult, env).unwrap_err();
        assert_eq!(err.code, "missing_field");
    }

    #[test]
    fn failure_requires_error_payload() {
        let env = envelope(json!({
            "kind": "test-result",
            "correlationId": "corr-1",
            "payload": { "status": "failure" }
        }));
        assert!(parse_inbound(InboundKind::TestResult, env).is_err());
    }

    #[test]
    fn rejects_bad_completed_at() {
        let env = envelope(json!({
            "kind": "test-result",
            "correlationId": "corr-1",
            "payload": { "status": "success", "completedAt": "yesterday" }
        }));
        let err = parse_inbound(InboundKind::TestResult, env).unwrap_err();
        assert_eq!(err.code, "invalid_timestamp");
    }

    #[test]
    fn rejects_inverted_span() {
        let env = envelope(json!({
            "kind": "diagnostics",
            "payload": { "diagnostics": [
                { "file": "main.baml", "severity": "error", "message": "x", "span": { "start": 9, "end": 2 } }
            ]}
        }));
        let err = parse_inbound(InboundKind::Diagnostics, env).unwrap_err();
        assert_eq!(err.code, "invalid_span");
    }

    #[test]
    fn rejects_long_ids() {
        assert!(validate_id(&"a".repeat(MAX_ID_LEN + 1), "id").is_err());
        // Limit counts characters, not UTF-8 bytes.
        assert!(validate_id(&"é".repeat(MAX_ID_LEN), "id").is_ok());
        assert!(validate_id(&"é".repeat(MAX_ID_LEN + 1), "id").is_err());
        assert!(validate_id("  ", "id").is_err());
        assert!(validate_id("f1", "id").is_ok());
    }

    #[test]
    fn commands_serialize_as_envelopes() {
        let value = serde_json::to_value(Command::run_test("corr-1", "f1", "c1")).expect("json");
        assert_eq!(
            value,
            json!({
                "kind": "run-test",
                "correlationId": "corr-1",
                "payload": { "function": "f1", "testCase": "c1" }
            })
        );
        let reload = serde_json::to_value(Command::reload()).expect("json");
        assert_eq!(reload, json!({ "kind": "reload" }));
    }
}
