use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{detection_column, pool_table, FeedbackStore, StoreTransaction};
use crate::error::{Result, TriageError};
use crate::extraction::models::{
    FeedbackRecord, NewPendingRecord, NewPendingResolution, PendingIssue, PendingIssueView,
    PendingResolution, PositiveAspect, ServiceCategory, TaskKind,
};
use crate::review::{FeedbackFilter, Issue, IssueUpdate, PendingIssueUpdate, RejectedIssue};

const PENDING_ISSUE_COLUMNS: &str = "id, title, description, category, confidence_score, \
     feedback_count, detected_from_feedback_id, created_at";

#[derive(Debug, Clone)]
pub struct PgFeedbackStore {
    pool: PgPool,
}

impl PgFeedbackStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl FeedbackStore for PgFeedbackStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }

    async fn get_feedback(&self, id: Uuid) -> Result<Option<FeedbackRecord>> {
        let record = sqlx::query_as::<_, FeedbackRecord>("SELECT * FROM feedback WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list_pending_issues(&self) -> Result<Vec<PendingIssueView>> {
        let sql = format!(
            "SELECT {PENDING_ISSUE_COLUMNS} FROM pending_issues ORDER BY created_at DESC, seq DESC"
        );
        let issues = sqlx::query_as::<_, PendingIssue>(&sql)
            .fetch_all(&self.pool)
            .await?;

        let ids: Vec<Uuid> = issues.iter().map(|issue| issue.id).collect();
        let resolutions = sqlx::query_as::<_, PendingResolution>(
            r#"
            SELECT id, pending_issue_id, resolution_text, confidence_score, created_at
            FROM pending_resolutions
            WHERE pending_issue_id = ANY($1)
            ORDER BY created_at
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_issue: HashMap<Uuid, Vec<PendingResolution>> = HashMap::new();
        for resolution in resolutions {
            by_issue
                .entry(resolution.pending_issue_id)
                .or_default()
                .push(resolution);
        }

        Ok(issues
            .into_iter()
            .map(|issue| PendingIssueView {
                resolutions: by_issue.remove(&issue.id).unwrap_or_default(),
                issue,
            })
            .collect())
    }

    async fn list_positive_aspects(&self) -> Result<Vec<PositiveAspect>> {
        let aspects = sqlx::query_as::<_, PositiveAspect>(
            r#"
            SELECT id, title, description, category, confidence_score, feedback_count,
                   detected_from_feedback_id, created_at
            FROM positive_aspects
            ORDER BY created_at DESC, seq DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(aspects)
    }

    async fn health_check(&self) -> Result<bool> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    #[instrument(skip(self))]
    async fn list_feedback(&self, filter: &FeedbackFilter) -> Result<Vec<FeedbackRecord>> {
        let records = sqlx::query_as::<_, FeedbackRecord>(
            r#"
            SELECT * FROM feedback
            WHERE ($1::service_category IS NULL OR service_type = $1)
              AND ($2::text IS NULL OR issue_location = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at <= $4)
            ORDER BY created_at DESC
            "#,
        )
        .bind(filter.service)
        .bind(&filter.location)
        .bind(filter.created_from)
        .bind(filter.created_to)
        .fetch_all(&self.pool)
        .await?;

        debug!(rows = records.len(), "Feedback listed");
        Ok(records)
    }

    async fn update_pending_issue(
        &self,
        id: Uuid,
        update: &PendingIssueUpdate,
    ) -> Result<Option<PendingIssue>> {
        let sql = format!(
            r#"
            UPDATE pending_issues
            SET title = COALESCE($2, title),
                description = COALESCE($3, description),
                category = COALESCE($4, category),
                confidence_score = COALESCE($5, confidence_score)
            WHERE id = $1
            RETURNING {PENDING_ISSUE_COLUMNS}
            "#
        );
        let issue = sqlx::query_as::<_, PendingIssue>(&sql)
            .bind(id)
            .bind(&update.title)
            .bind(&update.description)
            .bind(update.category)
            .bind(update.confidence_score)
            .fetch_optional(&self.pool)
            .await?;
        Ok(issue)
    }

    async fn delete_pending_issue(&self, id: Uuid) -> Result<bool> {
        // Resolutions go with it through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM pending_issues WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_pending_resolution(
        &self,
        resolution: &NewPendingResolution,
    ) -> Result<Option<PendingResolution>> {
        let row = sqlx::query_as::<_, PendingResolution>(
            r#"
            INSERT INTO pending_resolutions (id, pending_issue_id, resolution_text, confidence_score)
            SELECT $1, id, $3, $4 FROM pending_issues WHERE id = $2
            RETURNING id, pending_issue_id, resolution_text, confidence_score, created_at
            "#,
        )
        .bind(resolution.id)
        .bind(resolution.pending_issue_id)
        .bind(&resolution.resolution_text)
        .bind(resolution.confidence_score)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_pending_resolution(
        &self,
        id: Uuid,
        resolution_text: &str,
    ) -> Result<Option<PendingResolution>> {
        let row = sqlx::query_as::<_, PendingResolution>(
            r#"
            UPDATE pending_resolutions SET resolution_text = $2
            WHERE id = $1
            RETURNING id, pending_issue_id, resolution_text, confidence_score, created_at
            "#,
        )
        .bind(id)
        .bind(resolution_text)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self, issue), fields(issue_id = %issue.id))]
    async fn insert_issue(&self, issue: &Issue) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        consume_pending_issue(&mut tx, issue.source_pending_issue_id).await?;

        sqlx::query(
            r#"
            INSERT INTO issues (
                id, title, description, category, resolution, status, confidence_score,
                feedback_count, approved_by, approved_date, source_pending_issue_id,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(issue.id)
        .bind(&issue.title)
        .bind(&issue.description)
        .bind(issue.category)
        .bind(&issue.resolution)
        .bind(&issue.status)
        .bind(issue.confidence_score)
        .bind(issue.feedback_count)
        .bind(&issue.approved_by)
        .bind(issue.approved_date)
        .bind(issue.source_pending_issue_id)
        .bind(issue.created_at)
        .bind(issue.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_issues(&self, status: Option<&str>) -> Result<Vec<Issue>> {
        let issues = sqlx::query_as::<_, Issue>(
            r#"
            SELECT * FROM issues
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC
            "#,
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(issues)
    }

    async fn update_issue(&self, id: Uuid, update: &IssueUpdate) -> Result<Option<Issue>> {
        let issue = sqlx::query_as::<_, Issue>(
            r#"
            UPDATE issues
            SET title = COALESCE($2, title),
                description = COALESCE($3, description),
                category = COALESCE($4, category),
                resolution = COALESCE($5, resolution),
                status = COALESCE($6, status),
                confidence_score = COALESCE($7, confidence_score),
                feedback_count = COALESCE($8, feedback_count),
                approved_by = COALESCE($9, approved_by),
                approved_date = COALESCE($10, approved_date),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&update.title)
        .bind(&update.description)
        .bind(update.category)
        .bind(&update.resolution)
        .bind(&update.status)
        .bind(update.confidence_score)
        .bind(update.feedback_count)
        .bind(&update.approved_by)
        .bind(update.approved_date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(issue)
    }

    #[instrument(skip(self, rejected), fields(rejected_id = %rejected.id))]
    async fn insert_rejected_issue(&self, rejected: &RejectedIssue) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        consume_pending_issue(&mut tx, rejected.original_pending_issue_id).await?;

        sqlx::query(
            r#"
            INSERT INTO rejected_issues (
                id, original_title, original_description, category, rejection_reason,
                rejected_by, original_pending_issue_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(rejected.id)
        .bind(&rejected.original_title)
        .bind(&rejected.original_description)
        .bind(rejected.category)
        .bind(&rejected.rejection_reason)
        .bind(&rejected.rejected_by)
        .bind(rejected.original_pending_issue_id)
        .bind(rejected.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_rejected_issues(&self) -> Result<Vec<RejectedIssue>> {
        let rejected = sqlx::query_as::<_, RejectedIssue>(
            "SELECT * FROM rejected_issues ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rejected)
    }
}

/// Delete the named pending issue inside `tx`; a missing one is `NotFound`.
async fn consume_pending_issue(
    tx: &mut Transaction<'static, Postgres>,
    id: Option<Uuid>,
) -> Result<()> {
    let Some(id) = id else { return Ok(()) };
    let result = sqlx::query("DELETE FROM pending_issues WHERE id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(TriageError::NotFound {
            entity: "Pending issue",
            id: id.to_string(),
        });
    }
    Ok(())
}

pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    #[instrument(skip(self, record), fields(feedback_id = %record.id))]
    async fn insert_feedback(&mut self, record: &FeedbackRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO feedback (
                id, customer_name, customer_phone, customer_email, customer_id,
                service_type, review_text, review_rating, issue_location,
                contacted_bank_person, status, sentiment, positive_flag, negative_flag,
                detected_issues, detected_positive_aspects, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(record.id)
        .bind(&record.customer_name)
        .bind(&record.customer_phone)
        .bind(&record.customer_email)
        .bind(&record.customer_id)
        .bind(record.service_type)
        .bind(&record.review_text)
        .bind(record.review_rating)
        .bind(&record.issue_location)
        .bind(&record.contacted_bank_person)
        .bind(&record.status)
        .bind(record.sentiment)
        .bind(record.positive_flag)
        .bind(record.negative_flag)
        .bind(&record.detected_issues)
        .bind(&record.detected_positive_aspects)
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_similar(
        &mut self,
        kind: TaskKind,
        category: ServiceCategory,
        title_fragment: &str,
        description_fragment: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Uuid>> {
        let sql = format!(
            r#"
            SELECT id FROM {table}
            WHERE category = $1
              AND (title ILIKE $2 OR ($3::text IS NOT NULL AND description ILIKE $3))
            ORDER BY seq
            LIMIT $4
            "#,
            table = pool_table(kind)
        );

        let ids: Vec<Uuid> = sqlx::query_scalar(&sql)
            .bind(category)
            .bind(contains_pattern(title_fragment))
            .bind(description_fragment.map(contains_pattern))
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await?;

        debug!(matches = ids.len(), "Similarity lookup in {}", pool_table(kind));
        Ok(ids)
    }

    async fn increment_feedback_count(&mut self, kind: TaskKind, id: Uuid) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET feedback_count = feedback_count + 1 WHERE id = $1",
            pool_table(kind)
        );
        let result = sqlx::query(&sql).bind(id).execute(&mut *self.tx).await?;
        if result.rows_affected() == 0 {
            return Err(TriageError::Persistence {
                message: format!("{} {} disappeared before increment", kind.label(), id),
            });
        }
        Ok(())
    }

    async fn insert_pending_record(
        &mut self,
        kind: TaskKind,
        record: &NewPendingRecord,
    ) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {} (id, title, description, category, confidence_score,
                            feedback_count, detected_from_feedback_id)
            VALUES ($1, $2, $3, $4, $5, 1, $6)
            "#,
            pool_table(kind)
        );
        sqlx::query(&sql)
            .bind(record.id)
            .bind(&record.title)
            .bind(&record.description)
            .bind(record.category)
            .bind(record.confidence_score)
            .bind(record.detected_from_feedback_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_pending_resolution(&mut self, resolution: &NewPendingResolution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_resolutions (id, pending_issue_id, resolution_text, confidence_score)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(resolution.id)
        .bind(resolution.pending_issue_id)
        .bind(&resolution.resolution_text)
        .bind(resolution.confidence_score)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn record_detection(
        &mut self,
        feedback_id: Uuid,
        kind: TaskKind,
        finding: &Value,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE feedback SET {} = $1 WHERE id = $2",
            detection_column(kind)
        );
        let result = sqlx::query(&sql)
            .bind(finding)
            .bind(feedback_id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TriageError::NotFound {
                entity: "Feedback",
                id: feedback_id.to_string(),
            });
        }
        Ok(())
    }

    async fn savepoint(&mut self, name: &str) -> Result<()> {
        let sql = format!("SAVEPOINT {}", savepoint_ident(name)?);
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        let sql = format!("ROLLBACK TO SAVEPOINT {}", savepoint_ident(name)?);
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        let sql = format!("RELEASE SAVEPOINT {}", savepoint_ident(name)?);
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// `%fragment%` with LIKE metacharacters escaped.
pub(crate) fn contains_pattern(fragment: &str) -> String {
    let mut pattern = String::with_capacity(fragment.len() + 2);
    pattern.push('%');
    for c in fragment.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Savepoint names are interpolated into SQL, so only plain identifiers pass.
fn savepoint_ident(name: &str) -> Result<&str> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(name)
    } else {
        Err(TriageError::Validation(format!(
            "Invalid savepoint name: {name}"
        )))
    }
}
