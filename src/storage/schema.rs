use sqlx::PgPool;
use tracing::{debug, info};

use crate::error::Result;

const SCHEMA: &[&str] = &[
    r#"
    DO $$ BEGIN
        CREATE TYPE service_category AS ENUM ('ATM', 'OnlineBanking', 'CoreBanking');
    EXCEPTION WHEN duplicate_object THEN NULL;
    END $$
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE feedback_sentiment AS ENUM ('positive', 'negative');
    EXCEPTION WHEN duplicate_object THEN NULL;
    END $$
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS feedback (
        id UUID PRIMARY KEY,
        customer_name VARCHAR(255) NOT NULL,
        customer_phone VARCHAR(50),
        customer_email VARCHAR(255),
        customer_id VARCHAR(100),
        service_type service_category NOT NULL,
        review_text TEXT NOT NULL,
        review_rating INTEGER NOT NULL CHECK (review_rating BETWEEN 1 AND 5),
        issue_location VARCHAR(255),
        contacted_bank_person VARCHAR(255),
        status VARCHAR(50) NOT NULL DEFAULT 'new',
        sentiment feedback_sentiment NOT NULL,
        positive_flag BOOLEAN NOT NULL DEFAULT FALSE,
        negative_flag BOOLEAN NOT NULL DEFAULT FALSE,
        detected_issues JSONB,
        detected_positive_aspects JSONB,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pending_issues (
        id UUID PRIMARY KEY,
        seq BIGSERIAL NOT NULL UNIQUE,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        category service_category NOT NULL,
        confidence_score DOUBLE PRECISION NOT NULL DEFAULT 0.5,
        feedback_count INTEGER NOT NULL DEFAULT 1 CHECK (feedback_count >= 1),
        detected_from_feedback_id UUID REFERENCES feedback(id) ON DELETE SET NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pending_resolutions (
        id UUID PRIMARY KEY,
        pending_issue_id UUID NOT NULL REFERENCES pending_issues(id) ON DELETE CASCADE,
        resolution_text TEXT NOT NULL DEFAULT '',
        confidence_score DOUBLE PRECISION NOT NULL DEFAULT 0.5,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS positive_aspects (
        id UUID PRIMARY KEY,
        seq BIGSERIAL NOT NULL UNIQUE,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        category service_category NOT NULL,
        confidence_score DOUBLE PRECISION NOT NULL DEFAULT 0.5,
        feedback_count INTEGER NOT NULL DEFAULT 1 CHECK (feedback_count >= 1),
        detected_from_feedback_id UUID REFERENCES feedback(id) ON DELETE SET NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS issues (
        id UUID PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        category service_category NOT NULL,
        resolution TEXT NOT NULL DEFAULT '',
        status VARCHAR(50) NOT NULL DEFAULT 'approved',
        confidence_score DOUBLE PRECISION NOT NULL DEFAULT 0.5,
        feedback_count INTEGER NOT NULL DEFAULT 1 CHECK (feedback_count >= 1),
        approved_by VARCHAR(255),
        approved_date TIMESTAMPTZ,
        source_pending_issue_id UUID,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rejected_issues (
        id UUID PRIMARY KEY,
        original_title TEXT NOT NULL,
        original_description TEXT NOT NULL DEFAULT '',
        category service_category NOT NULL,
        rejection_reason TEXT,
        rejected_by VARCHAR(255),
        original_pending_issue_id UUID,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    // Databases created before titles became unbounded.
    "ALTER TABLE pending_issues ALTER COLUMN title TYPE TEXT",
    "ALTER TABLE positive_aspects ALTER COLUMN title TYPE TEXT",
    "CREATE INDEX IF NOT EXISTS feedback_created_at_idx ON feedback (created_at DESC)",
    "CREATE INDEX IF NOT EXISTS pending_issues_category_seq_idx ON pending_issues (category, seq)",
    "CREATE INDEX IF NOT EXISTS pending_resolutions_issue_idx ON pending_resolutions (pending_issue_id)",
    "CREATE INDEX IF NOT EXISTS positive_aspects_category_seq_idx ON positive_aspects (category, seq)",
    "CREATE INDEX IF NOT EXISTS issues_status_idx ON issues (status, created_at DESC)",
];

/// Create enum types, tables and indexes. Safe to run repeatedly.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Applying feedback schema");

    let mut tx = pool.begin().await?;
    for statement in SCHEMA {
        debug!("Executing schema statement: {}", statement.trim().lines().next().unwrap_or(""));
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    info!("Feedback schema is up to date");
    Ok(())
}
