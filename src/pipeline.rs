//! Feedback pipeline - orchestration of extraction and persistence
//!
//! Extraction (prompting, inference, recovery, fallback) runs first and
//! never holds a transaction. Persistence of one submission, or of one
//! import batch, then happens inside a single transaction bounded by the
//! configured deadline.
//!
//! # Batch import
//! - All rows are extracted before the transaction opens
//! - Each row is wrapped in a savepoint; a failing row is rolled back to it,
//!   counted as failed, and the batch continues

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::Config;
use crate::error::{Result, TriageError};
use crate::extraction::detector::{Detection, Detector};
use crate::extraction::ollama_client::InferenceClient;
use crate::extraction::models::{FeedbackRecord, NewFeedback, ServiceCategory, TaskKind};
use crate::storage::{persist_detection, FeedbackStore, MatchOutcome, MatchPolicy, StoreTransaction};

/// Result of one committed submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOutcome {
    pub id: Uuid,
    /// Matched-or-created pending issue ids, in candidate order.
    pub issue_ids: Vec<Uuid>,
    pub positive_ids: Vec<Uuid>,
    pub used_fallback: bool,
}

impl SubmissionOutcome {
    pub fn issue_detected(&self) -> bool {
        !self.issue_ids.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub issues_detected: usize,
    pub failed: usize,
}

/// One loosely shaped import row, as decoded from a spreadsheet export.
///
/// Any JSON value decodes; rows that are not objects are rejected later and
/// counted as failed rather than failing the whole batch.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ImportRow(Value);

const NAME_KEYS: &[&str] = &["customer_name", "name", "customer"];
const SERVICE_KEYS: &[&str] = &["service_type", "service"];
const TEXT_KEYS: &[&str] = &["review_text", "review", "feedback", "comment"];
const RATING_KEYS: &[&str] = &["review_rating", "rating"];
const PHONE_KEYS: &[&str] = &["customer_phone", "phone"];
const EMAIL_KEYS: &[&str] = &["customer_email", "email"];
const CUSTOMER_ID_KEYS: &[&str] = &["customer_id", "id"];
const LOCATION_KEYS: &[&str] = &["issue_location", "location"];

impl ImportRow {
    /// Normalise the row into a validated submission. Within each alias group
    /// the first key carrying a usable value wins.
    pub fn into_submission(self) -> Result<NewFeedback> {
        let Value::Object(fields) = self.0 else {
            return Err(TriageError::Validation(
                "Import row must be a JSON object".to_string(),
            ));
        };

        let review_rating = match first_present(&fields, RATING_KEYS) {
            None => 3,
            Some(value) => parse_rating(value).ok_or_else(|| {
                TriageError::Validation(format!("Invalid review_rating: {value}"))
            })?,
        };

        let service_type = first_text(&fields, SERVICE_KEYS)
            .map(|label| ServiceCategory::normalize(&label))
            .unwrap_or(ServiceCategory::Atm);

        let submission = NewFeedback {
            customer_name: first_text(&fields, NAME_KEYS)
                .unwrap_or_else(|| "Anonymous".to_string()),
            customer_phone: first_text(&fields, PHONE_KEYS),
            customer_email: first_text(&fields, EMAIL_KEYS),
            customer_id: first_text(&fields, CUSTOMER_ID_KEYS),
            service_type,
            review_text: first_text(&fields, TEXT_KEYS).unwrap_or_default(),
            review_rating,
            issue_location: first_text(&fields, LOCATION_KEYS),
            contacted_bank_person: None,
            status: None,
        };

        submission.validate()?;
        Ok(submission)
    }
}

impl From<Value> for ImportRow {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// First value under `keys` that is neither null nor blank text.
fn first_present<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|key| fields.get(*key)).find(|value| match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    })
}

fn first_text(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .find_map(loose_text)
}

fn loose_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Leading integer of a number or numeric string; fractional parts are cut.
fn parse_rating(value: &Value) -> Option<i32> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Some(3);
            }
            s.parse::<f64>().ok()?
        }
        _ => return None,
    };
    if !number.is_finite() {
        return None;
    }
    i32::try_from(number.trunc() as i64).ok()
}

/// Runtime statistics of the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStats {
    /// Feedback records committed since startup
    pub total_feedback_processed: u64,
    /// Import rows rejected or rolled back
    pub total_failed_rows: u64,
    /// Pending issues created
    pub issues_created: u64,
    /// Candidates merged into existing pending issues
    pub issues_merged: u64,
    /// Positive aspects created
    pub positives_created: u64,
    /// Candidates merged into existing positive aspects
    pub positives_merged: u64,
    /// Issue findings synthesised by the keyword fallback
    pub fallback_findings: u64,
    /// Last successful commit
    pub last_processed_at: Option<DateTime<Utc>>,
    /// Errors by type
    pub error_counts: HashMap<String, u64>,
}

impl Default for ProcessingStats {
    fn default() -> Self {
        Self {
            total_feedback_processed: 0,
            total_failed_rows: 0,
            issues_created: 0,
            issues_merged: 0,
            positives_created: 0,
            positives_merged: 0,
            fallback_findings: 0,
            last_processed_at: None,
            error_counts: HashMap::new(),
        }
    }
}

impl ProcessingStats {
    fn record_outcomes(&mut self, kind: TaskKind, outcomes: &[MatchOutcome]) {
        let created = outcomes.iter().filter(|o| o.is_new()).count() as u64;
        let merged = outcomes.len() as u64 - created;
        match kind {
            TaskKind::Issues => {
                self.issues_created += created;
                self.issues_merged += merged;
            }
            TaskKind::PositiveAspects => {
                self.positives_created += created;
                self.positives_merged += merged;
            }
        }
    }

    fn record_error(&mut self, error: &TriageError) {
        let error_type = match error {
            TriageError::Database(_) => "database_error",
            TriageError::Persistence { .. } => "persistence_error",
            TriageError::OperationTimeout { .. } => "timeout",
            TriageError::Validation(_) => "validation_error",
            _ => "other_error",
        };
        *self.error_counts.entry(error_type.to_string()).or_insert(0) += 1;
    }
}

struct Extracted {
    record: FeedbackRecord,
    issues: Detection,
    positives: Detection,
}

struct Persisted {
    issues: Vec<MatchOutcome>,
    positives: Vec<MatchOutcome>,
}

#[derive(Clone)]
pub struct FeedbackPipeline {
    store: Arc<dyn FeedbackStore>,
    detector: Detector,
    policy: MatchPolicy,
    transaction_timeout: Duration,
    stats: Arc<Mutex<ProcessingStats>>,
}

impl FeedbackPipeline {
    pub fn new(store: Arc<dyn FeedbackStore>, detector: Detector) -> Self {
        let policy = MatchPolicy::from(detector.config());
        Self {
            store,
            detector,
            policy,
            transaction_timeout: Duration::from_secs(30),
            stats: Arc::new(Mutex::new(ProcessingStats::default())),
        }
    }

    /// Wire a pipeline from loaded configuration.
    pub fn from_config(
        store: Arc<dyn FeedbackStore>,
        client: Arc<dyn InferenceClient>,
        config: &Config,
    ) -> Self {
        let detector = Detector::new(client, config.extraction.clone());
        Self::new(store, detector).with_transaction_timeout(Duration::from_secs(
            config.operational.transaction_timeout_seconds,
        ))
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn FeedbackStore> {
        &self.store
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub async fn stats(&self) -> ProcessingStats {
        self.stats.lock().await.clone()
    }

    /// Validate, extract, then persist one submission atomically.
    #[instrument(skip(self, submission), fields(service = %submission.service_type, rating = submission.review_rating))]
    pub async fn submit_feedback(&self, submission: NewFeedback) -> Result<SubmissionOutcome> {
        submission.validate()?;

        let record = FeedbackRecord::from_submission(submission);
        let extracted = self.extract(record).await;
        let id = extracted.record.id;
        let used_fallback = extracted.issues.used_fallback();

        let persisted = match self.with_deadline(self.persist_single(&extracted)).await {
            Ok(persisted) => persisted,
            Err(e) => {
                error!(feedback_id = %id, error = %e, "Feedback persistence failed, rolled back");
                self.stats.lock().await.record_error(&e);
                return Err(e);
            }
        };

        {
            let mut stats = self.stats.lock().await;
            stats.total_feedback_processed += 1;
            stats.record_outcomes(TaskKind::Issues, &persisted.issues);
            stats.record_outcomes(TaskKind::PositiveAspects, &persisted.positives);
            if used_fallback {
                stats.fallback_findings += 1;
            }
            stats.last_processed_at = Some(Utc::now());
        }

        info!(
            feedback_id = %id,
            issues = persisted.issues.len(),
            positives = persisted.positives.len(),
            "Feedback committed"
        );

        Ok(SubmissionOutcome {
            id,
            issue_ids: persisted.issues.iter().map(MatchOutcome::id).collect(),
            positive_ids: persisted.positives.iter().map(MatchOutcome::id).collect(),
            used_fallback,
        })
    }

    /// Import a batch of loose rows in one transaction with a savepoint per row.
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn import_batch(&self, rows: Vec<ImportRow>) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        let mut extracted = Vec::with_capacity(rows.len());

        for (index, row) in rows.into_iter().enumerate() {
            match row.into_submission() {
                Ok(submission) => {
                    let record = FeedbackRecord::from_submission(submission);
                    extracted.push(self.extract(record).await);
                }
                Err(e) => {
                    warn!(row = index, error = %e, "Skipping invalid import row");
                    summary.failed += 1;
                    self.stats.lock().await.record_error(&e);
                }
            }
        }

        let batch = self.with_deadline(self.persist_batch(&extracted)).await;
        let (persisted, row_failures) = match batch {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Import batch failed, rolled back");
                self.stats.lock().await.record_error(&e);
                return Err(e);
            }
        };

        {
            let mut stats = self.stats.lock().await;
            for failure in &row_failures {
                stats.record_error(failure);
            }
            for (item, outcome) in extracted.iter().zip(&persisted) {
                let Some(outcome) = outcome else { continue };
                summary.imported += 1;
                if !outcome.issues.is_empty() {
                    summary.issues_detected += 1;
                }
                if item.issues.used_fallback() {
                    stats.fallback_findings += 1;
                }
                stats.record_outcomes(TaskKind::Issues, &outcome.issues);
                stats.record_outcomes(TaskKind::PositiveAspects, &outcome.positives);
            }
            summary.failed += row_failures.len();
            stats.total_feedback_processed += summary.imported as u64;
            stats.total_failed_rows += summary.failed as u64;
            stats.last_processed_at = Some(Utc::now());
        }

        info!(
            imported = summary.imported,
            issues_detected = summary.issues_detected,
            failed = summary.failed,
            "Import batch committed"
        );
        Ok(summary)
    }

    /// Run both extraction tasks for a record. Never touches storage.
    async fn extract(&self, record: FeedbackRecord) -> Extracted {
        let (issues, positives) = tokio::join!(
            self.detector.detect(TaskKind::Issues, &record),
            self.detector.detect(TaskKind::PositiveAspects, &record),
        );
        Extracted {
            record,
            issues,
            positives,
        }
    }

    async fn persist_single(&self, item: &Extracted) -> Result<Persisted> {
        let mut tx = self.store.begin().await?;
        match write_feedback(tx.as_mut(), item, &self.policy).await {
            Ok(persisted) => {
                tx.commit().await?;
                Ok(persisted)
            }
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(error = %rollback_error, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Persist every row under its own savepoint. Returns per-row results
    /// (`None` for rolled-back rows) plus the row errors.
    async fn persist_batch(
        &self,
        items: &[Extracted],
    ) -> Result<(Vec<Option<Persisted>>, Vec<TriageError>)> {
        let mut tx = self.store.begin().await?;
        let mut results = Vec::with_capacity(items.len());
        let mut failures = Vec::new();

        for (index, item) in items.iter().enumerate() {
            let savepoint = format!("import_row_{index}");
            tx.savepoint(&savepoint).await?;

            match write_feedback(tx.as_mut(), item, &self.policy).await {
                Ok(persisted) => {
                    tx.release_savepoint(&savepoint).await?;
                    results.push(Some(persisted));
                }
                Err(e) => {
                    warn!(row = index, feedback_id = %item.record.id, error = %e, "Import row rolled back");
                    tx.rollback_to_savepoint(&savepoint).await?;
                    tx.release_savepoint(&savepoint).await?;
                    results.push(None);
                    failures.push(e);
                }
            }
        }

        tx.commit().await?;
        debug!(rows = items.len(), failed = failures.len(), "Batch transaction committed");
        Ok((results, failures))
    }

    async fn with_deadline<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.transaction_timeout, work)
            .await
            .map_err(|_| TriageError::OperationTimeout {
                message: format!(
                    "persistence exceeded {}s and was rolled back",
                    self.transaction_timeout.as_secs()
                ),
            })?
    }
}

async fn write_feedback(
    tx: &mut dyn StoreTransaction,
    item: &Extracted,
    policy: &MatchPolicy,
) -> Result<Persisted> {
    tx.insert_feedback(&item.record).await?;
    let issues = persist_detection(tx, TaskKind::Issues, item.record.id, &item.issues, policy).await?;
    let positives = persist_detection(
        tx,
        TaskKind::PositiveAspects,
        item.record.id,
        &item.positives,
        policy,
    )
    .await?;
    Ok(Persisted { issues, positives })
}
