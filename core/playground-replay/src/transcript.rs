//! Transcript format: one JSON object per line.
//!
//! ```text
//! {"host": {"kind": "ready", "sequence": 1, "payload": {...}}}
//! {"user": {"action": "run-test", "function": "f1", "testCase": "c1"}}
//! {"tick": "2026-03-02T09:00:30Z"}
//! ```
//!
//! A `host` value that is a JSON string is delivered as raw text, so
//! transcripts can carry messages that are not valid JSON.

use chrono::{DateTime, Utc};
use playground_protocol::Settings;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum TranscriptError {
    #[error("Failed to read transcript {source_name}: {source}")]
    Read {
        source_name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transcript line {line}: {details}")]
    Line { line: usize, details: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase", deny_unknown_fields)]
pub enum Step {
    Host(Value),
    User(UserAction),
    Tick(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(
    tag = "action",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase",
    deny_unknown_fields
)]
pub enum UserAction {
    RunTest { function: String, test_case: String },
    CancelRun { correlation_id: String },
    SelectFunction { function: String },
    SelectTestCase { test_case: String },
    SetFilter { filter: String },
    RequestSettings {
        #[serde(default)]
        changes: Option<Settings>,
    },
    Reload,
}

impl UserAction {
    pub fn name(&self) -> &'static str {
        match self {
            UserAction::RunTest { .. } => "run-test",
            UserAction::CancelRun { .. } => "cancel-run",
            UserAction::SelectFunction { .. } => "select-function",
            UserAction::SelectTestCase { .. } => "select-test-case",
            UserAction::SetFilter { .. } => "set-filter",
            UserAction::RequestSettings { .. } => "request-settings",
            UserAction::Reload => "reload",
        }
    }
}

/// Blank lines and lines starting with `//` are skipped.
pub fn parse(text: &str) -> Result<Vec<Step>, TranscriptError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with("//")
        })
        .map(|(index, line)| {
            serde_json::from_str::<Step>(line).map_err(|err| TranscriptError::Line {
                line: index + 1,
                details: err.to_string(),
            })
        })
        .collect()
}
