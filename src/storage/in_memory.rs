//! Process-local store with the same transactional behaviour as the
//! Postgres store: writes stay private to a transaction until commit,
//! savepoints restore earlier state, and counter increments are applied
//! relative to the committed value.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{FeedbackStore, StoreTransaction};
use crate::error::{Result, TriageError};
use crate::extraction::models::{
    FeedbackRecord, NewPendingRecord, NewPendingResolution, PendingIssue, PendingIssueView,
    PendingResolution, PositiveAspect, ServiceCategory, TaskKind,
};
use crate::review::{FeedbackFilter, Issue, IssueUpdate, PendingIssueUpdate, RejectedIssue};

/// Injected failures, checked when the matching write is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailPoint {
    ResolutionInsert,
    FeedbackInsert { customer_name: String },
    /// Sleep before every pending-pool insert.
    StallPendingInsert(Duration),
}

#[derive(Debug, Clone)]
struct PoolRow {
    seq: i64,
    id: Uuid,
    title: String,
    description: String,
    category: ServiceCategory,
    confidence_score: f64,
    feedback_count: i32,
    detected_from_feedback_id: Option<Uuid>,
    created_at: chrono::DateTime<Utc>,
}

impl PoolRow {
    fn to_pending_issue(&self) -> PendingIssue {
        PendingIssue {
            id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            category: self.category,
            confidence_score: self.confidence_score,
            feedback_count: self.feedback_count,
            detected_from_feedback_id: self.detected_from_feedback_id,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct State {
    feedback: Vec<FeedbackRecord>,
    issues: Vec<PoolRow>,
    resolutions: Vec<PendingResolution>,
    aspects: Vec<PoolRow>,
    approved: Vec<Issue>,
    rejected: Vec<RejectedIssue>,
    next_seq: i64,
}

impl State {
    /// Remove a pending issue and its resolutions. `false` when absent.
    fn remove_pending_issue(&mut self, id: Uuid) -> bool {
        let before = self.issues.len();
        self.issues.retain(|row| row.id != id);
        if self.issues.len() == before {
            return false;
        }
        self.resolutions.retain(|r| r.pending_issue_id != id);
        true
    }

    fn consume_pending_issue(&mut self, id: Option<Uuid>) -> Result<()> {
        match id {
            Some(id) if !self.remove_pending_issue(id) => Err(TriageError::NotFound {
                entity: "Pending issue",
                id: id.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn pool(&self, kind: TaskKind) -> &Vec<PoolRow> {
        match kind {
            TaskKind::Issues => &self.issues,
            TaskKind::PositiveAspects => &self.aspects,
        }
    }

    fn pool_mut(&mut self, kind: TaskKind) -> &mut Vec<PoolRow> {
        match kind {
            TaskKind::Issues => &mut self.issues,
            TaskKind::PositiveAspects => &mut self.aspects,
        }
    }

    fn apply(&mut self, op: &Op) -> Result<()> {
        match op {
            Op::InsertFeedback(record) => {
                if self.feedback.iter().any(|f| f.id == record.id) {
                    return Err(TriageError::Persistence {
                        message: format!("duplicate feedback id {}", record.id),
                    });
                }
                self.feedback.push(record.clone());
            }
            Op::InsertPending(kind, record) => {
                self.next_seq += 1;
                let row = PoolRow {
                    seq: self.next_seq,
                    id: record.id,
                    title: record.title.clone(),
                    description: record.description.clone(),
                    category: record.category,
                    confidence_score: record.confidence_score,
                    feedback_count: 1,
                    detected_from_feedback_id: Some(record.detected_from_feedback_id),
                    created_at: Utc::now(),
                };
                self.pool_mut(*kind).push(row);
            }
            Op::Increment(kind, id) => {
                let row = self
                    .pool_mut(*kind)
                    .iter_mut()
                    .find(|row| row.id == *id)
                    .ok_or_else(|| TriageError::Persistence {
                        message: format!("{} {} disappeared before increment", kind.label(), id),
                    })?;
                row.feedback_count += 1;
            }
            Op::InsertResolution(resolution) => {
                if !self.issues.iter().any(|i| i.id == resolution.pending_issue_id) {
                    return Err(TriageError::Persistence {
                        message: format!(
                            "pending issue {} does not exist",
                            resolution.pending_issue_id
                        ),
                    });
                }
                self.resolutions.push(PendingResolution {
                    id: resolution.id,
                    pending_issue_id: resolution.pending_issue_id,
                    resolution_text: resolution.resolution_text.clone(),
                    confidence_score: resolution.confidence_score,
                    created_at: Utc::now(),
                });
            }
            Op::RecordDetection(feedback_id, kind, finding) => {
                let record = self
                    .feedback
                    .iter_mut()
                    .find(|f| f.id == *feedback_id)
                    .ok_or_else(|| TriageError::NotFound {
                        entity: "Feedback",
                        id: feedback_id.to_string(),
                    })?;
                match kind {
                    TaskKind::Issues => record.detected_issues = Some(finding.clone()),
                    TaskKind::PositiveAspects => {
                        record.detected_positive_aspects = Some(finding.clone())
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Op {
    InsertFeedback(FeedbackRecord),
    InsertPending(TaskKind, NewPendingRecord),
    Increment(TaskKind, Uuid),
    InsertResolution(NewPendingResolution),
    RecordDetection(Uuid, TaskKind, Value),
}

#[derive(Debug, Default)]
struct Shared {
    state: RwLock<State>,
    failures: RwLock<Vec<FailPoint>>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryFeedbackStore {
    shared: Arc<Shared>,
}

impl InMemoryFeedbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn inject_failure(&self, point: FailPoint) {
        self.shared.failures.write().await.push(point);
    }

    pub async fn clear_failures(&self) {
        self.shared.failures.write().await.clear();
    }

    /// Committed feedback rows in insertion order.
    pub async fn feedback_records(&self) -> Vec<FeedbackRecord> {
        self.shared.state.read().await.feedback.clone()
    }

    /// Committed resolutions in insertion order.
    pub async fn resolutions(&self) -> Vec<PendingResolution> {
        self.shared.state.read().await.resolutions.clone()
    }
}

#[async_trait]
impl FeedbackStore for InMemoryFeedbackStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let working = self.shared.state.read().await.clone();
        Ok(Box::new(InMemoryTransaction {
            shared: self.shared.clone(),
            working,
            ops: Vec::new(),
            savepoints: Vec::new(),
        }))
    }

    async fn get_feedback(&self, id: Uuid) -> Result<Option<FeedbackRecord>> {
        let state = self.shared.state.read().await;
        Ok(state.feedback.iter().find(|f| f.id == id).cloned())
    }

    async fn list_pending_issues(&self) -> Result<Vec<PendingIssueView>> {
        let state = self.shared.state.read().await;
        let mut rows: Vec<&PoolRow> = state.issues.iter().collect();
        rows.sort_by(|a, b| b.seq.cmp(&a.seq));

        Ok(rows
            .into_iter()
            .map(|row| PendingIssueView {
                resolutions: state
                    .resolutions
                    .iter()
                    .filter(|r| r.pending_issue_id == row.id)
                    .cloned()
                    .collect(),
                issue: row.to_pending_issue(),
            })
            .collect())
    }

    async fn list_positive_aspects(&self) -> Result<Vec<PositiveAspect>> {
        let state = self.shared.state.read().await;
        let mut rows = state.aspects.clone();
        rows.sort_by(|a, b| b.seq.cmp(&a.seq));

        Ok(rows
            .into_iter()
            .map(|row| PositiveAspect {
                id: row.id,
                title: row.title,
                description: row.description,
                category: row.category,
                confidence_score: row.confidence_score,
                feedback_count: row.feedback_count,
                detected_from_feedback_id: row.detected_from_feedback_id,
                created_at: row.created_at,
            })
            .collect())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn list_feedback(&self, filter: &FeedbackFilter) -> Result<Vec<FeedbackRecord>> {
        let state = self.shared.state.read().await;
        // Newest first; rows sharing a timestamp keep reverse insertion order.
        let mut rows: Vec<FeedbackRecord> = state
            .feedback
            .iter()
            .rev()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn update_pending_issue(
        &self,
        id: Uuid,
        update: &PendingIssueUpdate,
    ) -> Result<Option<PendingIssue>> {
        let mut state = self.shared.state.write().await;
        let Some(row) = state.issues.iter_mut().find(|row| row.id == id) else {
            return Ok(None);
        };
        if let Some(title) = &update.title {
            row.title = title.clone();
        }
        if let Some(description) = &update.description {
            row.description = description.clone();
        }
        if let Some(category) = update.category {
            row.category = category;
        }
        if let Some(score) = update.confidence_score {
            row.confidence_score = score;
        }
        Ok(Some(row.to_pending_issue()))
    }

    async fn delete_pending_issue(&self, id: Uuid) -> Result<bool> {
        Ok(self.shared.state.write().await.remove_pending_issue(id))
    }

    async fn add_pending_resolution(
        &self,
        resolution: &NewPendingResolution,
    ) -> Result<Option<PendingResolution>> {
        let mut state = self.shared.state.write().await;
        if !state.issues.iter().any(|i| i.id == resolution.pending_issue_id) {
            return Ok(None);
        }
        let row = PendingResolution {
            id: resolution.id,
            pending_issue_id: resolution.pending_issue_id,
            resolution_text: resolution.resolution_text.clone(),
            confidence_score: resolution.confidence_score,
            created_at: Utc::now(),
        };
        state.resolutions.push(row.clone());
        Ok(Some(row))
    }

    async fn update_pending_resolution(
        &self,
        id: Uuid,
        resolution_text: &str,
    ) -> Result<Option<PendingResolution>> {
        let mut state = self.shared.state.write().await;
        Ok(state
            .resolutions
            .iter_mut()
            .find(|r| r.id == id)
            .map(|r| {
                r.resolution_text = resolution_text.to_string();
                r.clone()
            }))
    }

    async fn insert_issue(&self, issue: &Issue) -> Result<()> {
        let mut state = self.shared.state.write().await;
        state.consume_pending_issue(issue.source_pending_issue_id)?;
        state.approved.push(issue.clone());
        Ok(())
    }

    async fn list_issues(&self, status: Option<&str>) -> Result<Vec<Issue>> {
        let state = self.shared.state.read().await;
        let mut issues: Vec<Issue> = state
            .approved
            .iter()
            .rev()
            .filter(|issue| status.map_or(true, |s| issue.status == s))
            .cloned()
            .collect();
        issues.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(issues)
    }

    async fn update_issue(&self, id: Uuid, update: &IssueUpdate) -> Result<Option<Issue>> {
        let mut state = self.shared.state.write().await;
        Ok(state
            .approved
            .iter_mut()
            .find(|issue| issue.id == id)
            .map(|issue| {
                update.apply(issue);
                issue.clone()
            }))
    }

    async fn insert_rejected_issue(&self, rejected: &RejectedIssue) -> Result<()> {
        let mut state = self.shared.state.write().await;
        state.consume_pending_issue(rejected.original_pending_issue_id)?;
        state.rejected.push(rejected.clone());
        Ok(())
    }

    async fn list_rejected_issues(&self) -> Result<Vec<RejectedIssue>> {
        let state = self.shared.state.read().await;
        let mut rejected: Vec<RejectedIssue> = state.rejected.iter().rev().cloned().collect();
        rejected.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rejected)
    }
}

pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    working: State,
    ops: Vec<Op>,
    savepoints: Vec<(String, State, usize)>,
}

impl InMemoryTransaction {
    async fn should_fail(&self, check: impl Fn(&FailPoint) -> bool) -> bool {
        self.shared.failures.read().await.iter().any(check)
    }

    fn record(&mut self, op: Op) -> Result<()> {
        self.working.apply(&op)?;
        self.ops.push(op);
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn insert_feedback(&mut self, record: &FeedbackRecord) -> Result<()> {
        let name = record.customer_name.clone();
        if self
            .should_fail(|p| matches!(p, FailPoint::FeedbackInsert { customer_name } if *customer_name == name))
            .await
        {
            return Err(TriageError::Persistence {
                message: "injected failure on feedback insert".to_string(),
            });
        }
        self.record(Op::InsertFeedback(record.clone()))
    }

    async fn find_similar(
        &mut self,
        kind: TaskKind,
        category: ServiceCategory,
        title_fragment: &str,
        description_fragment: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Uuid>> {
        let title_fragment = title_fragment.to_lowercase();
        let description_fragment = description_fragment.map(str::to_lowercase);

        let mut rows: Vec<&PoolRow> = self
            .working
            .pool(kind)
            .iter()
            .filter(|row| row.category == category)
            .filter(|row| {
                row.title.to_lowercase().contains(&title_fragment)
                    || description_fragment
                        .as_deref()
                        .is_some_and(|d| row.description.to_lowercase().contains(d))
            })
            .collect();
        rows.sort_by_key(|row| row.seq);

        Ok(rows
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|row| row.id)
            .collect())
    }

    async fn increment_feedback_count(&mut self, kind: TaskKind, id: Uuid) -> Result<()> {
        self.record(Op::Increment(kind, id))
    }

    async fn insert_pending_record(
        &mut self,
        kind: TaskKind,
        record: &NewPendingRecord,
    ) -> Result<()> {
        let stall = self.shared.failures.read().await.iter().find_map(|p| match p {
            FailPoint::StallPendingInsert(delay) => Some(*delay),
            _ => None,
        });
        if let Some(delay) = stall {
            debug!(?delay, "Stalling pending insert");
            tokio::time::sleep(delay).await;
        }
        self.record(Op::InsertPending(kind, record.clone()))
    }

    async fn insert_pending_resolution(&mut self, resolution: &NewPendingResolution) -> Result<()> {
        if self
            .should_fail(|p| *p == FailPoint::ResolutionInsert)
            .await
        {
            return Err(TriageError::Persistence {
                message: "injected failure on resolution insert".to_string(),
            });
        }
        self.record(Op::InsertResolution(resolution.clone()))
    }

    async fn record_detection(
        &mut self,
        feedback_id: Uuid,
        kind: TaskKind,
        finding: &Value,
    ) -> Result<()> {
        self.record(Op::RecordDetection(feedback_id, kind, finding.clone()))
    }

    async fn savepoint(&mut self, name: &str) -> Result<()> {
        self.savepoints
            .push((name.to_string(), self.working.clone(), self.ops.len()));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        let position = self
            .savepoints
            .iter()
            .rposition(|(n, _, _)| n == name)
            .ok_or_else(|| TriageError::Persistence {
                message: format!("savepoint {name} does not exist"),
            })?;
        // The savepoint itself survives a rollback to it; later ones do not.
        self.savepoints.truncate(position + 1);
        let (_, state, ops_len) = &self.savepoints[position];
        self.working = state.clone();
        self.ops.truncate(*ops_len);
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        let position = self
            .savepoints
            .iter()
            .rposition(|(n, _, _)| n == name)
            .ok_or_else(|| TriageError::Persistence {
                message: format!("savepoint {name} does not exist"),
            })?;
        self.savepoints.truncate(position);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.shared.state.write().await;
        let mut next = state.clone();
        for op in &self.ops {
            next.apply(op)?;
        }
        *state = next;
        debug!(ops = self.ops.len(), "In-memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!(ops = self.ops.len(), "In-memory transaction rolled back");
        Ok(())
    }
}
