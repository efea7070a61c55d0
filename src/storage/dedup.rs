//! Merge-or-insert of extracted candidates into the pending pools.

use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{MatchPolicy, StoreTransaction};
use crate::error::Result;
use crate::extraction::detector::Detection;
use crate::extraction::models::{Candidate, NewPendingRecord, NewPendingResolution, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// An existing record absorbed the candidate; its counter was bumped.
    Matched(Uuid),
    Created(Uuid),
}

impl MatchOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            MatchOutcome::Matched(id) | MatchOutcome::Created(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, MatchOutcome::Created(_))
    }
}

/// First stored record similar to `candidate`, in insertion order.
pub async fn find_match(
    tx: &mut dyn StoreTransaction,
    kind: TaskKind,
    candidate: &Candidate,
    policy: &MatchPolicy,
) -> Result<Option<Uuid>> {
    let title_fragment = policy.fragment(&candidate.title);
    let description_fragment = policy.fragment(&candidate.description);
    let description_fragment =
        (!description_fragment.trim().is_empty()).then_some(description_fragment.as_str());

    let ids = tx
        .find_similar(
            kind,
            candidate.category,
            &title_fragment,
            description_fragment,
            policy.limit,
        )
        .await?;

    Ok(ids.into_iter().next())
}

pub async fn persist_candidate(
    tx: &mut dyn StoreTransaction,
    kind: TaskKind,
    feedback_id: Uuid,
    candidate: &Candidate,
    policy: &MatchPolicy,
) -> Result<MatchOutcome> {
    if let Some(existing) = find_match(tx, kind, candidate, policy).await? {
        tx.increment_feedback_count(kind, existing).await?;
        debug!(id = %existing, title = %candidate.title, "Merged into existing {}", kind.label());
        return Ok(MatchOutcome::Matched(existing));
    }

    let record = NewPendingRecord::from_candidate(candidate, feedback_id);
    tx.insert_pending_record(kind, &record).await?;

    if kind.requires_resolution() {
        tx.insert_pending_resolution(&NewPendingResolution {
            id: Uuid::new_v4(),
            pending_issue_id: record.id,
            resolution_text: candidate.resolution.clone().unwrap_or_default(),
            confidence_score: candidate.confidence_score,
        })
        .await?;
    }

    debug!(id = %record.id, title = %candidate.title, "Created new {}", kind.label());
    Ok(MatchOutcome::Created(record.id))
}

/// Persist every candidate of a detection, then write its audit copy onto
/// the feedback row once. Outcomes are returned in candidate order.
#[instrument(skip(tx, detection, policy), fields(task = kind.label()))]
pub async fn persist_detection(
    tx: &mut dyn StoreTransaction,
    kind: TaskKind,
    feedback_id: Uuid,
    detection: &Detection,
    policy: &MatchPolicy,
) -> Result<Vec<MatchOutcome>> {
    let Detection::Found {
        audit, candidates, ..
    } = detection
    else {
        return Ok(Vec::new());
    };

    let mut outcomes = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        outcomes.push(persist_candidate(tx, kind, feedback_id, candidate, policy).await?);
    }

    tx.record_detection(feedback_id, kind, audit).await?;

    info!(
        created = outcomes.iter().filter(|o| o.is_new()).count(),
        merged = outcomes.iter().filter(|o| !o.is_new()).count(),
        "Persisted {} candidates",
        kind.label()
    );
    Ok(outcomes)
}
