//! SQL schema for the Quipu SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS documents (
    document_id    TEXT PRIMARY KEY,
    tenant_id      TEXT NOT NULL,
    kind           TEXT NOT NULL,    -- discriminant of DocumentKind
    series         TEXT NOT NULL,
    sequence       INTEGER NOT NULL,
    issuer_tax_id  TEXT NOT NULL,
    issuer_name    TEXT NOT NULL,
    customer_kind  TEXT NOT NULL,    -- discriminant of PartyIdKind
    customer_value TEXT NOT NULL,
    customer_name  TEXT NOT NULL,
    currency       TEXT NOT NULL,
    taxable_cents  INTEGER NOT NULL,
    tax_cents      INTEGER NOT NULL,
    total_cents    INTEGER NOT NULL,
    issued_at      TEXT NOT NULL,    -- ISO 8601 UTC
    created_at     TEXT NOT NULL,
    reference_id   TEXT,
    status         TEXT NOT NULL DEFAULT 'draft',
    artifacts      TEXT,             -- JSON SignedArtifacts; written once
    remote         TEXT NOT NULL DEFAULT '{\"state\":\"idle\"}',
    cdr            BLOB,             -- opaque receipt archive, never parsed
    UNIQUE (tenant_id, series, sequence)
);

CREATE TABLE IF NOT EXISTS jobs (
    job_id       TEXT PRIMARY KEY,
    tenant_id    TEXT NOT NULL,
    document_id  TEXT NOT NULL REFERENCES documents(document_id),
    kind         TEXT NOT NULL,      -- discriminant of JobKind
    status       TEXT NOT NULL DEFAULT 'queued',
    attempts     INTEGER NOT NULL DEFAULT 0,
    last_error   TEXT,
    next_run_at  TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    completed_at TEXT
);

-- At most one queued/processing job per (document, kind). The claim
-- transition below is what makes the worker safe across processes; this
-- index is what makes enqueue idempotent.
CREATE UNIQUE INDEX IF NOT EXISTS jobs_active_idx
    ON jobs(document_id, kind)
    WHERE status IN ('queued', 'processing');

CREATE INDEX IF NOT EXISTS jobs_due_idx        ON jobs(status, next_run_at);
CREATE INDEX IF NOT EXISTS jobs_document_idx   ON jobs(document_id);
CREATE INDEX IF NOT EXISTS documents_status_idx ON documents(status);
CREATE INDEX IF NOT EXISTS documents_tenant_idx ON documents(tenant_id);

PRAGMA user_version = 1;
";
