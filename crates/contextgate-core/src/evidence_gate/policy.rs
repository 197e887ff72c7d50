//! Evidence policy table: which enhancement categories are gated, and which
//! source kinds satisfy them.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::{EnhancementCategory, SourceKind};

/// Maps gated enhancement categories to the evidence kinds that satisfy them.
///
/// Categories absent from the table are not gated. The table is
/// configuration; [`EvidencePolicy::standard`] is only a starting point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidencePolicy {
    requirements: BTreeMap<EnhancementCategory, BTreeSet<SourceKind>>,
}

impl EvidencePolicy {
    /// No category is gated.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Gate UI workflow, schema field and deployment claims.
    pub fn standard() -> Self {
        Self::permissive()
            .with_requirement(EnhancementCategory::UiWorkflow, [SourceKind::CodeReference])
            .with_requirement(
                EnhancementCategory::SchemaField,
                [SourceKind::SchemaDefinition],
            )
            .with_requirement(
                EnhancementCategory::WorkflowDeployment,
                [
                    SourceKind::CodeReference,
                    SourceKind::DocumentationCitation,
                    SourceKind::PriorVerifiedFact,
                ],
            )
    }

    /// Gate `category`, accepting any of `kinds` (builder pattern).
    pub fn with_requirement<I>(mut self, category: EnhancementCategory, kinds: I) -> Self
    where
        I: IntoIterator<Item = SourceKind>,
    {
        self.requirements
            .entry(category)
            .or_default()
            .extend(kinds);
        self
    }

    pub fn is_gated(&self, category: EnhancementCategory) -> bool {
        self.requirements
            .get(&category)
            .is_some_and(|kinds| !kinds.is_empty())
    }

    /// Whether evidence of `kind` satisfies the requirement for `category`.
    pub fn accepts(&self, category: EnhancementCategory, kind: SourceKind) -> bool {
        self.requirements
            .get(&category)
            .is_some_and(|kinds| kinds.contains(&kind))
    }

    pub fn gated_categories(&self) -> impl Iterator<Item = EnhancementCategory> + '_ {
        self.requirements
            .iter()
            .filter(|(_, kinds)| !kinds.is_empty())
            .map(|(c, _)| *c)
    }
}
