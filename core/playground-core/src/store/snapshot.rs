//! Project snapshot and per-file diagnostics.

use std::collections::BTreeMap;

use playground_protocol::{
    Diagnostic, DiagnosticsPayload, FunctionDefinition, ProjectPayload, Settings, Severity,
};

/// Diagnostics grouped by file. A merge replaces whole files and leaves the
/// rest untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticIndex {
    by_file: BTreeMap<String, Vec<Diagnostic>>,
}

impl DiagnosticIndex {
    pub fn from_list(diagnostics: Vec<Diagnostic>) -> Self {
        let mut index = Self::default();
        index.insert_grouped(diagnostics);
        index
    }

    pub fn merge(&mut self, payload: DiagnosticsPayload) {
        for file in &payload.cleared_files {
            self.by_file.remove(file);
        }
        self.insert_grouped(payload.diagnostics);
    }

    fn insert_grouped(&mut self, diagnostics: Vec<Diagnostic>) {
        let mut grouped: BTreeMap<String, Vec<Diagnostic>> = BTreeMap::new();
        for diagnostic in diagnostics {
            grouped
                .entry(diagnostic.file.clone())
                .or_default()
                .push(diagnostic);
        }
        self.by_file.extend(grouped);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.by_file.values().flatten()
    }

    pub fn for_file(&self, file: &str) -> &[Diagnostic] {
        self.by_file.get(file).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn for_function<'a>(&'a self, function: &'a str) -> impl Iterator<Item = &'a Diagnostic> {
        self.iter()
            .filter(move |diagnostic| diagnostic.function.as_deref() == Some(function))
    }

    pub fn len(&self) -> usize {
        self.by_file.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn error_count(&self) -> usize {
        self.iter()
            .filter(|diagnostic| diagnostic.severity == Severity::Error)
            .count()
    }
}

/// Materialized project state at one sequence number.
///
/// Function definitions are never edited in place; an incremental update goes
/// through [`ProjectSnapshot::merge`], which swaps whole definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectSnapshot {
    sequence: u64,
    functions: Vec<FunctionDefinition>,
    diagnostics: DiagnosticIndex,
    settings: Option<Settings>,
}

impl ProjectSnapshot {
    pub fn from_payload(sequence: u64, payload: ProjectPayload) -> Self {
        Self {
            sequence,
            functions: payload.functions,
            diagnostics: DiagnosticIndex::from_list(payload.diagnostics),
            settings: payload.settings,
        }
    }

    /// Applies an incremental payload: upserts functions by id (existing ones
    /// keep their position, new ones are appended), drops `removed`, merges
    /// diagnostics per file and replaces settings when present.
    pub fn merge(&mut self, sequence: u64, payload: ProjectPayload) {
        self.sequence = sequence;
        self.functions
            .retain(|function| !payload.removed.contains(&function.id));

        for function in payload.functions {
            match self
                .functions
                .iter_mut()
                .find(|existing| existing.id == function.id)
            {
                Some(existing) => *existing = function,
                None => self.functions.push(function),
            }
        }

        if !payload.diagnostics.is_empty() {
            self.diagnostics.merge(DiagnosticsPayload {
                diagnostics: payload.diagnostics,
                cleared_files: Vec::new(),
            });
        }
        if payload.settings.is_some() {
            self.settings = payload.settings;
        }
    }

    pub fn merge_diagnostics(&mut self, payload: DiagnosticsPayload) {
        self.diagnostics.merge(payload);
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn functions(&self) -> &[FunctionDefinition] {
        &self.functions
    }

    pub fn function(&self, id: &str) -> Option<&FunctionDefinition> {
        self.functions.iter().find(|function| function.id == id)
    }

    pub fn has_test_case(&self, function: &str, test_case: &str) -> bool {
        self.function(function)
            .map(|definition| definition.test_cases.iter().any(|case| case == test_case))
            .unwrap_or(false)
    }

    pub fn diagnostics(&self) -> &DiagnosticIndex {
        &self.diagnostics
    }

    pub fn settings(&self) -> Option<&Settings> {
        self.settings.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn function(id: &str, signature: &str, cases: &[&str]) -> FunctionDefinition {
        FunctionDefinition {
            id: id.to_string(),
            signature: signature.to_string(),
            test_cases: cases.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn diagnostic(file: &str, severity: Severity, message: &str) -> Diagnostic {
        Diagnostic {
            file: file.to_string(),
            severity,
            message: message.to_string(),
            span: None,
            function: None,
        }
    }

    #[test]
    fn merge_upserts_in_place_and_appends() {
        let mut snapshot = ProjectSnapshot::from_payload(
            1,
            ProjectPayload {
                functions: vec![function("f1", "()", &["c1"]), function("f2", "()", &[])],
                ..ProjectPayload::default()
            },
        );

        snapshot.merge(
            2,
            ProjectPayload {
                functions: vec![function("f3", "()", &[]), function("f1", "(x: int)", &["c1", "c2"])],
                incremental: true,
                ..ProjectPayload::default()
            },
        );

        let ids: Vec<&str> = snapshot.functions().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["f1", "f2", "f3"]);
        assert_eq!(snapshot.function("f1").map(|f| f.signature.as_str()), Some("(x: int)"));
        assert!(snapshot.has_test_case("f1", "c2"));
        assert_eq!(snapshot.sequence(), 2);
    }

    #[test]
    fn merge_removes_and_keeps_settings_unless_replaced() {
        let mut settings = Settings::new();
        settings.insert("proxy".to_string(), json!(true));
        let mut snapshot = ProjectSnapshot::from_payload(
            1,
            ProjectPayload {
                functions: vec![function("f1", "()", &[]), function("f2", "()", &[])],
                settings: Some(settings),
                ..ProjectPayload::default()
            },
        );

        snapshot.merge(
            2,
            ProjectPayload {
                removed: vec!["f1".to_string()],
                incremental: true,
                ..ProjectPayload::default()
            },
        );

        assert!(snapshot.function("f1").is_none());
        assert_eq!(
            snapshot.settings().and_then(|s| s.get("proxy")),
            Some(&json!(true))
        );
    }

    #[test]
    fn diagnostics_merge_replaces_per_file() {
        let mut index = DiagnosticIndex::from_list(vec![
            diagnostic("a.baml", Severity::Error, "old a"),
            diagnostic("b.baml", Severity::Warning, "keep b"),
        ]);

        index.merge(DiagnosticsPayload {
            diagnostics: vec![diagnostic("a.baml", Severity::Info, "new a")],
            cleared_files: Vec::new(),
        });

        assert_eq!(index.len(), 2);
        assert_eq!(index.for_file("a.baml")[0].message, "new a");
        assert_eq!(index.for_file("b.baml")[0].message, "keep b");
        assert_eq!(index.error_count(), 0);

        index.merge(DiagnosticsPayload {
            diagnostics: Vec::new(),
            cleared_files: vec!["b.baml".to_string()],
        });
        assert_eq!(index.len(), 1);
        assert!(index.for_file("b.baml").is_empty());
    }

    #[test]
    fn diagnostics_filter_by_function() {
        let mut owned = diagnostic("a.baml", Severity::Error, "bad type");
        owned.function = Some("f1".to_string());
        let index =
            DiagnosticIndex::from_list(vec![owned, diagnostic("a.baml", Severity::Error, "global")]);
        assert_eq!(index.for_function("f1").count(), 1);
        assert_eq!(index.error_count(), 2);
    }
}
