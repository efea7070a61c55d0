//! Persistence for feedback and the two pending pools.
//!
//! The pipeline talks to storage only through [`FeedbackStore`] and the
//! [`StoreTransaction`] it hands out, so the Postgres store and the
//! in-memory store are interchangeable.

pub mod connection;
pub mod dedup;
pub mod in_memory;
pub mod postgres;
pub mod schema;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::config::ExtractionConfig;
use crate::error::Result;
use crate::extraction::models::{
    FeedbackRecord, NewPendingRecord, NewPendingResolution, PendingIssue, PendingIssueView,
    PendingResolution, PositiveAspect, ServiceCategory, TaskKind,
};
use crate::review::{FeedbackFilter, Issue, IssueUpdate, PendingIssueUpdate, RejectedIssue};

pub use connection::create_pool;
pub use dedup::{persist_detection, MatchOutcome};
pub use in_memory::InMemoryFeedbackStore;
pub use postgres::PgFeedbackStore;
pub use schema::run_migrations;

/// How candidates are compared against stored records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchPolicy {
    /// Leading characters of title and description used as the search fragment.
    pub fragment_chars: usize,
    /// Maximum rows returned by one lookup.
    pub limit: i64,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            fragment_chars: 50,
            limit: 5,
        }
    }
}

impl From<&ExtractionConfig> for MatchPolicy {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            fragment_chars: config.match_fragment_chars,
            limit: config.match_limit,
        }
    }
}

impl MatchPolicy {
    pub fn fragment(&self, text: &str) -> String {
        text.chars().take(self.fragment_chars).collect()
    }
}

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    async fn get_feedback(&self, id: Uuid) -> Result<Option<FeedbackRecord>>;

    /// Pending issues with their resolutions, newest first.
    async fn list_pending_issues(&self) -> Result<Vec<PendingIssueView>>;

    /// Positive aspects, newest first.
    async fn list_positive_aspects(&self) -> Result<Vec<PositiveAspect>>;

    async fn health_check(&self) -> Result<bool>;

    /// Feedback matching `filter`, newest first.
    async fn list_feedback(&self, filter: &FeedbackFilter) -> Result<Vec<FeedbackRecord>>;

    /// `None` when no pending issue has this id.
    async fn update_pending_issue(
        &self,
        id: Uuid,
        update: &PendingIssueUpdate,
    ) -> Result<Option<PendingIssue>>;

    /// Delete a pending issue and its resolutions. `false` when absent.
    async fn delete_pending_issue(&self, id: Uuid) -> Result<bool>;

    /// `None` when the referenced pending issue does not exist.
    async fn add_pending_resolution(
        &self,
        resolution: &NewPendingResolution,
    ) -> Result<Option<PendingResolution>>;

    async fn update_pending_resolution(
        &self,
        id: Uuid,
        resolution_text: &str,
    ) -> Result<Option<PendingResolution>>;

    /// Insert an approved issue. When `source_pending_issue_id` is set that
    /// pending issue is deleted atomically with the insert, and a missing
    /// one fails with `NotFound`.
    async fn insert_issue(&self, issue: &Issue) -> Result<()>;

    /// Approved issues, newest first, optionally restricted to one status.
    async fn list_issues(&self, status: Option<&str>) -> Result<Vec<Issue>>;

    async fn update_issue(&self, id: Uuid, update: &IssueUpdate) -> Result<Option<Issue>>;

    /// Insert a rejection, consuming `original_pending_issue_id` like
    /// [`FeedbackStore::insert_issue`].
    async fn insert_rejected_issue(&self, rejected: &RejectedIssue) -> Result<()>;

    /// Rejections, newest first.
    async fn list_rejected_issues(&self) -> Result<Vec<RejectedIssue>>;
}

/// One unit of work. Dropping a transaction without committing discards it.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn insert_feedback(&mut self, record: &FeedbackRecord) -> Result<()>;

    /// Ids of rows in the pool for `kind` within `category` whose title
    /// contains `title_fragment` or whose description contains
    /// `description_fragment`, case-insensitively, in insertion order.
    async fn find_similar(
        &mut self,
        kind: TaskKind,
        category: ServiceCategory,
        title_fragment: &str,
        description_fragment: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Uuid>>;

    async fn increment_feedback_count(&mut self, kind: TaskKind, id: Uuid) -> Result<()>;

    async fn insert_pending_record(&mut self, kind: TaskKind, record: &NewPendingRecord)
        -> Result<()>;

    async fn insert_pending_resolution(&mut self, resolution: &NewPendingResolution) -> Result<()>;

    /// Write the full finding for `kind` onto the feedback row.
    async fn record_detection(
        &mut self,
        feedback_id: Uuid,
        kind: TaskKind,
        finding: &Value,
    ) -> Result<()>;

    async fn savepoint(&mut self, name: &str) -> Result<()>;

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()>;

    async fn release_savepoint(&mut self, name: &str) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Table backing the pool for a task.
pub(crate) fn pool_table(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Issues => "pending_issues",
        TaskKind::PositiveAspects => "positive_aspects",
    }
}

/// Feedback column holding the audit copy of a task's finding.
pub(crate) fn detection_column(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Issues => "detected_issues",
        TaskKind::PositiveAspects => "detected_positive_aspects",
    }
}
