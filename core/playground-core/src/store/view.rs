//! Owned read models handed to the render layer.

use playground_protocol::{RuntimeError, Settings};
use serde::Serialize;
use serde_json::Value;

use super::{Selection, Store};
use crate::decoder::Readiness;
use crate::emitter::{CorrelationId, RunTarget};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RunStatus {
    Unset,
    Pending {
        correlation_id: CorrelationId,
    },
    /// No result within the stall timeout; the UI offers a retry.
    Stalled {
        correlation_id: CorrelationId,
    },
    Passed {
        correlation_id: CorrelationId,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    Failed {
        correlation_id: CorrelationId,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<RuntimeError>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseView {
    pub test_case: String,
    pub status: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunView {
    #[serde(flatten)]
    pub target: RunTarget,
    pub status: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSummary {
    pub id: String,
    pub signature: String,
    pub test_cases: Vec<String>,
    pub error_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessView {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&Readiness> for ReadinessView {
    fn from(readiness: &Readiness) -> Self {
        Self {
            state: readiness.as_str(),
            error_code: readiness.error().map(|err| err.code()),
            error_message: readiness.error().map(|err| err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelView {
    pub readiness: ReadinessView,
    pub sequence: Option<u64>,
    /// Functions after the filter is applied.
    pub functions: Vec<FunctionSummary>,
    pub total_functions: usize,
    pub selection: Selection,
    pub filter: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    pub diagnostic_count: usize,
    pub error_count: usize,
    pub runs: Vec<RunView>,
    pub discarded: u64,
}

pub(super) fn build(store: &Store) -> PanelView {
    let snapshot = store.snapshot();

    let functions = store
        .filtered_functions()
        .iter()
        .map(|function| FunctionSummary {
            id: function.id.clone(),
            signature: function.signature.clone(),
            test_cases: function.test_cases.clone(),
            error_count: snapshot
                .map(|s| {
                    s.diagnostics()
                        .for_function(&function.id)
                        .filter(|d| d.severity == playground_protocol::Severity::Error)
                        .count()
                })
                .unwrap_or(0),
        })
        .collect();

    let mut targets: Vec<&RunTarget> = store.pending().keys().collect();
    targets.extend(store.results().keys());
    targets.sort();
    targets.dedup();
    let runs = targets
        .into_iter()
        .map(|target| RunView {
            target: target.clone(),
            status: store.run_status(target),
        })
        .collect();

    PanelView {
        readiness: ReadinessView::from(store.readiness()),
        sequence: store.sequence(),
        functions,
        total_functions: snapshot.map(|s| s.functions().len()).unwrap_or(0),
        selection: store.selection().clone(),
        filter: store.filter().to_string(),
        settings: snapshot.and_then(|s| s.settings().cloned()),
        diagnostic_count: snapshot.map(|s| s.diagnostics().len()).unwrap_or(0),
        error_count: snapshot
            .map(|s| s.diagnostics().error_count())
            .unwrap_or(0),
        runs,
        discarded: store.discarded_total(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    #[test]
    fn readiness_view_carries_error_code() {
        let view = ReadinessView::from(&Readiness::Error(BridgeError::Host {
            message: "wasm panic".to_string(),
        }));
        assert_eq!(view.state, "error");
        assert_eq!(view.error_code, Some("host_error"));
        assert!(view.error_message.unwrap_or_default().contains("wasm panic"));
    }

    #[test]
    fn run_status_serializes_with_state_tag() {
        let status = RunStatus::Pending {
            correlation_id: CorrelationId::parse("corr-4").expect("id"),
        };
        let value = serde_json::to_value(&status).expect("json");
        assert_eq!(value, serde_json::json!({ "state": "pending", "correlationId": "corr-4" }));
    }

    #[test]
    fn empty_store_reads_as_uninitialized() {
        let store = Store::new(4);
        let view = store.read();
        assert_eq!(view.readiness.state, "uninitialized");
        assert_eq!(view.sequence, None);
        assert!(view.functions.is_empty());
        assert!(view.runs.is_empty());
    }
}
