//! Context Store: the append-only history of snapshots for one work item.
//!
//! Readers get `Arc<ContextSnapshot>` handles to fully formed versions and
//! never block writers for longer than a `Vec` push. Writers are serialized
//! through a single async mutex; a commit succeeds only when the snapshot
//! was derived from the current head (compare-and-swap on version).
//!
//! Admission of agent output ([`ContextStore::admit_fork`]) runs the evidence
//! gate while holding the writer lock, so every contribution is checked
//! against the head it will actually be merged onto.
//!
//! A mirrored ledger never holds a version the history lacks. It may miss a
//! version whose commit was cancelled while the append was in flight.

use std::sync::{Arc, RwLock, RwLockReadGuard};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use contextgate_state::{SnapshotEntry, SnapshotLedger};

use crate::context::manager::{ContextManager, ContributionDraft};
use crate::domain::{
    AgentName, BlockReason, ConflictRecord, ContextError, ContextSnapshot, Result,
};
use crate::evidence_gate::{AdmitDecision, EvidenceGate};
use crate::metrics::Metrics;

/// Result of [`ContextStore::commit_fork`].
#[derive(Debug, Clone)]
pub struct ForkCommit {
    pub snapshot: Arc<ContextSnapshot>,
    /// Whether the fork had to be replayed onto a newer head.
    pub rebased: bool,
}

/// Result of [`ContextStore::admit_fork`].
#[derive(Debug, Clone)]
pub enum Admission {
    Committed(ForkCommit),
    /// The gate refused the contribution; nothing was committed.
    Blocked {
        reason: BlockReason,
        keys: Vec<String>,
        conflicts: Vec<ConflictRecord>,
    },
}

pub struct ContextStore {
    history: RwLock<Vec<Arc<ContextSnapshot>>>,
    writer: Mutex<()>,
    ledger: Option<Arc<dyn SnapshotLedger>>,
    metrics: Arc<Metrics>,
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore")
            .field("versions", &self.read().len())
            .field("ledger", &self.ledger.is_some())
            .finish()
    }
}

impl ContextStore {
    pub fn new() -> Self {
        Self {
            history: RwLock::new(Vec::new()),
            writer: Mutex::new(()),
            ledger: None,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Mirror every commit into `ledger`.
    pub fn with_ledger(mut self, ledger: Arc<dyn SnapshotLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Count commits and gate blocks into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<ContextSnapshot>>> {
        self.history.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn head(&self) -> Option<Arc<ContextSnapshot>> {
        self.read().last().cloned()
    }

    /// Every committed version, oldest first.
    pub fn history(&self) -> Vec<Arc<ContextSnapshot>> {
        self.read().clone()
    }

    pub fn at_version(&self, version: u64) -> Option<Arc<ContextSnapshot>> {
        self.read()
            .iter()
            .find(|s| s.metadata.version == version)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Append `snapshot` if it was derived from the current head.
    ///
    /// The first commit must be a root snapshot (no parent). Anything else
    /// derived from an older version fails with `StaleSnapshot`.
    #[instrument(skip(self, snapshot), fields(version = snapshot.metadata.version))]
    pub async fn commit(&self, snapshot: ContextSnapshot) -> Result<Arc<ContextSnapshot>> {
        let _guard = self.writer.lock().await;
        self.commit_locked(snapshot).await
    }

    /// Commit a snapshot produced from a possibly outdated ancestor.
    ///
    /// A fork derived from the head is committed as is. A fork derived from an
    /// older version is rebased onto the head first, so concurrent siblings
    /// are merged rather than overwriting each other.
    #[instrument(skip(self, fork, manager, now), fields(parent = ?fork.metadata.parent_version))]
    pub async fn commit_fork(
        &self,
        fork: ContextSnapshot,
        manager: &ContextManager,
        now: DateTime<Utc>,
    ) -> Result<ForkCommit> {
        let _guard = self.writer.lock().await;
        self.commit_fork_locked(fork, manager, now).await
    }

    /// Gate `agent`'s output against the current head and, if allowed, merge
    /// it as a fork of `base`.
    ///
    /// The gate and the commit share one critical section: a sibling that
    /// commits first is always part of the ancestor the gate sees.
    #[instrument(
        skip(self, gate, manager, base, draft, now),
        fields(%agent, base = base.metadata.version)
    )]
    pub async fn admit_fork(
        &self,
        gate: &EvidenceGate,
        manager: &ContextManager,
        base: &ContextSnapshot,
        agent: AgentName,
        draft: ContributionDraft,
        now: DateTime<Utc>,
    ) -> Result<Admission> {
        let _guard = self.writer.lock().await;
        let candidate = draft.to_candidate(agent, manager.score(&draft), now);
        let head = self.head();
        let (decision, conflicts) = gate.admit(&candidate, head.as_deref().unwrap_or(base));
        if let AdmitDecision::Blocked { reason, keys } = decision {
            self.metrics.inc_gate_blocks();
            return Ok(Admission::Blocked {
                reason,
                keys,
                conflicts,
            });
        }
        let fork = manager.inherit_at(base, agent, draft, now)?;
        let commit = self.commit_fork_locked(fork, manager, now).await?;
        Ok(Admission::Committed(commit))
    }

    async fn commit_fork_locked(
        &self,
        fork: ContextSnapshot,
        manager: &ContextManager,
        now: DateTime<Utc>,
    ) -> Result<ForkCommit> {
        match self.head() {
            Some(h) if fork.metadata.parent_version != Some(h.metadata.version) => {
                let rebased = manager.rebase(&h, &fork, now)?;
                self.metrics.inc_forks_rebased();
                debug!(
                    head = h.metadata.version,
                    new_version = rebased.metadata.version,
                    "fork rebased onto head"
                );
                let snapshot = self.commit_locked(rebased).await?;
                Ok(ForkCommit {
                    snapshot,
                    rebased: true,
                })
            }
            _ => {
                let snapshot = self.commit_locked(fork).await?;
                Ok(ForkCommit {
                    snapshot,
                    rebased: false,
                })
            }
        }
    }

    async fn commit_locked(&self, snapshot: ContextSnapshot) -> Result<Arc<ContextSnapshot>> {
        let head = self.head();
        match &head {
            None => {
                if snapshot.metadata.parent_version.is_some() {
                    return Err(ContextError::StaleSnapshot {
                        parent: snapshot.metadata.parent_version,
                        head: 0,
                    });
                }
            }
            Some(h) => {
                let fast_forward = snapshot.metadata.parent_version == Some(h.metadata.version)
                    && snapshot.metadata.version == h.metadata.version + 1;
                if !fast_forward {
                    return Err(ContextError::StaleSnapshot {
                        parent: snapshot.metadata.parent_version,
                        head: h.metadata.version,
                    });
                }
                if snapshot.work_item != h.work_item {
                    return Err(ContextError::InvalidContribution(format!(
                        "snapshot for {} committed to the history of {}",
                        snapshot.work_item, h.work_item
                    )));
                }
            }
        }

        let entry = match &self.ledger {
            Some(_) => Some(SnapshotEntry::new(
                snapshot.work_item.as_str(),
                snapshot.metadata.version,
                snapshot.metadata.parent_version,
                serde_json::to_value(&snapshot)?,
            )?),
            None => None,
        };

        let snapshot = Arc::new(snapshot);
        self.history
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&snapshot));

        if let (Some(ledger), Some(entry)) = (&self.ledger, entry) {
            if let Err(e) = ledger.append(entry).await {
                warn!(
                    version = snapshot.metadata.version,
                    error = %e,
                    "ledger append failed; rolling back"
                );
                self.history
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .pop();
                return Err(e.into());
            }
        }

        self.metrics.inc_snapshots_committed();
        debug!(version = snapshot.metadata.version, "snapshot committed");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfidenceConfig;
    use crate::context::ContributionDraft;
    use crate::domain::{AgentName, FoundationData, TicketInfo, VersionContext, WorkItem};
    use crate::evidence_gate::EvidencePolicy;
    use crate::domain::{Enhancement, EvidenceRecord, SourceKind};
    use async_trait::async_trait;
    use contextgate_state::fakes::MemorySnapshotLedger;
    use contextgate_state::StorageResult;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn manager() -> ContextManager {
        ContextManager::new(
            Arc::new(EvidencePolicy::standard()),
            ConfidenceConfig::default(),
        )
    }

    fn root() -> ContextSnapshot {
        manager()
            .bootstrap(
                WorkItem::new("OCPBUGS-3"),
                FoundationData {
                    ticket_info: TicketInfo {
                        id: "OCPBUGS-3".into(),
                        summary: "s".into(),
                        status: "New".into(),
                        fields: BTreeMap::new(),
                    },
                    version_context: VersionContext::default(),
                    environment_baseline: BTreeMap::new(),
                },
            )
            .unwrap()
    }

    #[tokio::test]
    async fn commit_requires_fast_forward() {
        let store = ContextStore::new();
        let m = manager();
        let base = store.commit(root()).await.unwrap();
        let a = m
            .inherit(&base, AgentName::JiraAnalysis, ContributionDraft::new())
            .unwrap();
        let b = m
            .inherit(&base, AgentName::EnvironmentAnalysis, ContributionDraft::new())
            .unwrap();
        store.commit(a).await.unwrap();
        let err = store.commit(b).await.unwrap_err();
        assert!(matches!(
            err,
            ContextError::StaleSnapshot {
                parent: Some(1),
                head: 2
            }
        ));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn first_commit_must_be_root() {
        let store = ContextStore::new();
        let child = manager()
            .inherit(&root(), AgentName::JiraAnalysis, ContributionDraft::new())
            .unwrap();
        assert!(store.commit(child).await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn commit_fork_rebases_siblings() {
        let store = ContextStore::new();
        let m = manager();
        let base = store.commit(root()).await.unwrap();
        let a = m
            .inherit(&base, AgentName::JiraAnalysis, ContributionDraft::new())
            .unwrap();
        let b = m
            .inherit(&base, AgentName::EnvironmentAnalysis, ContributionDraft::new())
            .unwrap();
        let first = store.commit_fork(a, &m, Utc::now()).await.unwrap();
        assert!(!first.rebased);
        let second = store.commit_fork(b, &m, Utc::now()).await.unwrap();
        assert!(second.rebased);
        let head = store.head().unwrap();
        assert_eq!(head.version(), 3);
        assert!(head.has_contribution(AgentName::JiraAnalysis));
        assert!(head.has_contribution(AgentName::EnvironmentAnalysis));
        assert_eq!(store.at_version(2).unwrap().contributions.len(), 1);
    }

    #[tokio::test]
    async fn commits_are_mirrored_to_ledger() {
        let ledger = Arc::new(MemorySnapshotLedger::new());
        let store = ContextStore::new().with_ledger(ledger.clone());
        let base = store.commit(root()).await.unwrap();
        let next = manager()
            .inherit(&base, AgentName::JiraAnalysis, ContributionDraft::new())
            .unwrap();
        store.commit(next).await.unwrap();

        let history = ledger.history("OCPBUGS-3").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].parent_version, Some(1));
        assert_eq!(
            history[0].digest,
            contextgate_state::ContentDigest::from_json(&history[0].state).unwrap()
        );
    }

    fn deployment(deployed: bool) -> ContributionDraft {
        ContributionDraft::new()
            .with_enhancement(
                "deployed",
                Enhancement::WorkflowDeployment {
                    workflow: "upgrade".into(),
                    deployed,
                },
            )
            .with_evidence(
                EvidenceRecord::new(
                    SourceKind::PriorVerifiedFact,
                    "cluster/deploy/upgrade",
                    "deployed",
                )
                .observing(json!(deployed)),
            )
    }

    #[tokio::test]
    async fn admission_sees_siblings_committed_after_the_fork_base() {
        let store = ContextStore::new();
        let m = manager();
        let gate = EvidenceGate::new(Arc::new(EvidencePolicy::standard()));
        let base = store.commit(root()).await.unwrap();

        let first = store
            .admit_fork(
                &gate,
                &m,
                &base,
                AgentName::JiraAnalysis,
                deployment(true),
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(matches!(first, Admission::Committed(ForkCommit { rebased: false, .. })));

        // Same base, opposite observation: blocked against the new head.
        let second = store
            .admit_fork(
                &gate,
                &m,
                &base,
                AgentName::EnvironmentAnalysis,
                deployment(false),
                Utc::now(),
            )
            .await
            .unwrap();
        match second {
            Admission::Blocked {
                reason, conflicts, ..
            } => {
                assert_eq!(reason, BlockReason::RealityContradiction);
                assert_eq!(conflicts.len(), 1);
            }
            other => panic!("expected a block, got {other:?}"),
        }
        assert_eq!(store.len(), 2);
        assert_eq!(store.metrics().snapshot().gate_blocks, 1);
    }

    #[tokio::test]
    async fn failed_ledger_append_rolls_back() {
        let ledger = Arc::new(MemorySnapshotLedger::new());
        ledger
            .append(SnapshotEntry::new("OCPBUGS-3", 5, None, json!({})).unwrap())
            .await
            .unwrap();
        let store = ContextStore::new().with_ledger(ledger.clone());

        let err = store.commit(root()).await.unwrap_err();
        assert!(matches!(err, ContextError::Storage(_)));
        assert!(store.is_empty());
        assert_eq!(store.metrics().snapshot().snapshots_committed, 0);
    }

    /// Ledger whose append of one version never completes.
    struct StallingLedger {
        inner: MemorySnapshotLedger,
        stall_at: u64,
    }

    #[async_trait]
    impl SnapshotLedger for StallingLedger {
        async fn append(&self, entry: SnapshotEntry) -> StorageResult<()> {
            if entry.version == self.stall_at {
                std::future::pending::<()>().await;
            }
            self.inner.append(entry).await
        }

        async fn head(&self, work_item: &str) -> StorageResult<Option<SnapshotEntry>> {
            self.inner.head(work_item).await
        }

        async fn get(&self, work_item: &str, version: u64) -> StorageResult<SnapshotEntry> {
            self.inner.get(work_item, version).await
        }

        async fn history(&self, work_item: &str) -> StorageResult<Vec<SnapshotEntry>> {
            self.inner.history(work_item).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_append_never_puts_ledger_ahead() {
        let ledger = Arc::new(StallingLedger {
            inner: MemorySnapshotLedger::new(),
            stall_at: 2,
        });
        let store = ContextStore::new().with_ledger(ledger.clone());
        let m = manager();
        let base = store.commit(root()).await.unwrap();
        let a = m
            .inherit(&base, AgentName::JiraAnalysis, ContributionDraft::new())
            .unwrap();
        let cancelled =
            tokio::time::timeout(std::time::Duration::from_millis(10), store.commit(a)).await;
        assert!(cancelled.is_err());

        let head = store.head().unwrap();
        assert_eq!(head.version(), 2);
        let b = m
            .inherit(&head, AgentName::EnvironmentAnalysis, ContributionDraft::new())
            .unwrap();
        store.commit(b).await.unwrap();

        let versions: Vec<u64> = ledger
            .history("OCPBUGS-3")
            .await
            .unwrap()
            .iter()
            .map(|e| e.version)
            .collect();
        assert_eq!(versions, vec![1, 3]);
    }
}
