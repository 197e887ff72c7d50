//! Evidence records backing agent claims.

use serde::{Deserialize, Serialize};

/// Kind of external source an evidence record points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    CodeReference,
    SchemaDefinition,
    DocumentationCitation,
    PriorVerifiedFact,
}

/// A pointer to an externally verifiable source supporting one enhancement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub source_kind: SourceKind,
    /// Opaque pointer to the source (file:line, URL, CRD path, ...).
    pub locator: String,
    /// Confidence in the source, 0.0–1.0.
    pub confidence: f64,
    /// Key of the enhancement this record supports.
    pub supports: String,
    /// What the source shows at `locator`, when the agent captured it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<serde_json::Value>,
}

impl EvidenceRecord {
    pub fn new(
        source_kind: SourceKind,
        locator: impl Into<String>,
        supports: impl Into<String>,
    ) -> Self {
        Self {
            source_kind,
            locator: locator.into(),
            confidence: 1.0,
            supports: supports.into(),
            observed: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn observing(mut self, value: serde_json::Value) -> Self {
        self.observed = Some(value);
        self
    }
}
