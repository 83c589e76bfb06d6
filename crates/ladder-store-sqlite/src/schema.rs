//! SQL schema for the Ladder SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE ... IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Graphs are never deleted; abandonment is a status.
CREATE TABLE IF NOT EXISTS graphs (
    graph_id     TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'active',  -- 'active' | 'completed' | 'abandoned'
    root_node_id TEXT,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS nodes (
    node_id            TEXT PRIMARY KEY,
    graph_id           TEXT NOT NULL REFERENCES graphs(graph_id) ON DELETE CASCADE,
    label              TEXT NOT NULL,
    description        TEXT,
    depth              INTEGER NOT NULL DEFAULT 0,
    mastery_score      REAL NOT NULL DEFAULT 0 CHECK (mastery_score BETWEEN 0 AND 1),
    mastery_status     TEXT NOT NULL DEFAULT 'unseen',
    ease_factor        REAL NOT NULL DEFAULT 2.5 CHECK (ease_factor >= 1.3),
    repetitions        INTEGER NOT NULL DEFAULT 0 CHECK (repetitions >= 0),
    last_interval_days REAL NOT NULL DEFAULT 0,
    next_review_at     TEXT,
    last_reviewed_at   TEXT,
    effort_estimate    INTEGER,
    sequence           INTEGER,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);

-- Prerequisite edges form a DAG; enforced by the store before insert.
CREATE TABLE IF NOT EXISTS edges (
    edge_id    TEXT PRIMARY KEY,
    graph_id   TEXT NOT NULL REFERENCES graphs(graph_id) ON DELETE CASCADE,
    parent_id  TEXT NOT NULL REFERENCES nodes(node_id) ON DELETE CASCADE,
    child_id   TEXT NOT NULL REFERENCES nodes(node_id) ON DELETE CASCADE,
    kind       TEXT NOT NULL,   -- 'prerequisite' | 'related'
    created_at TEXT NOT NULL,
    UNIQUE (parent_id, child_id, kind)
);

-- Strictly append-only. No UPDATE is ever issued against this table.
CREATE TABLE IF NOT EXISTS quiz_responses (
    response_id   TEXT PRIMARY KEY,
    node_id       TEXT NOT NULL REFERENCES nodes(node_id) ON DELETE CASCADE,
    graph_id      TEXT NOT NULL REFERENCES graphs(graph_id) ON DELETE CASCADE,
    question_text TEXT NOT NULL,
    user_answer   TEXT NOT NULL,
    quality       INTEGER NOT NULL CHECK (quality BETWEEN 0 AND 5),
    response_type TEXT NOT NULL,   -- 'diagnostic' | 'teach' | 'review'
    responded_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS flow_states (
    graph_id           TEXT PRIMARY KEY REFERENCES graphs(graph_id) ON DELETE CASCADE,
    phase              TEXT NOT NULL,
    current_node_id    TEXT,
    diagnostic_results TEXT NOT NULL DEFAULT '{}',
    last_activity_at   TEXT NOT NULL,
    abandoned_from     TEXT,
    version            INTEGER NOT NULL CHECK (version > 0)
);

CREATE TABLE IF NOT EXISTS analytics_snapshots (
    graph_id      TEXT NOT NULL REFERENCES graphs(graph_id) ON DELETE CASCADE,
    snapshot_date TEXT NOT NULL,   -- YYYY-MM-DD
    metrics_json  TEXT NOT NULL,
    computed_at   TEXT NOT NULL,
    PRIMARY KEY (graph_id, snapshot_date)
);

-- One pending review request per node, as issued to the external scheduler.
CREATE TABLE IF NOT EXISTS review_slots (
    node_id       TEXT PRIMARY KEY REFERENCES nodes(node_id) ON DELETE CASCADE,
    graph_id      TEXT NOT NULL REFERENCES graphs(graph_id) ON DELETE CASCADE,
    kind          TEXT NOT NULL,   -- 'individual' | 'batch'
    schedule_name TEXT NOT NULL,
    fire_at       TEXT NOT NULL,
    until_at      TEXT NOT NULL,
    repetitions   INTEGER NOT NULL,
    ease_factor   REAL NOT NULL,
    created_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS nodes_graph_status_idx   ON nodes(graph_id, mastery_status);
CREATE INDEX IF NOT EXISTS nodes_next_review_idx    ON nodes(next_review_at);
CREATE INDEX IF NOT EXISTS edges_graph_idx          ON edges(graph_id);
CREATE INDEX IF NOT EXISTS edges_parent_idx         ON edges(parent_id, kind);
CREATE INDEX IF NOT EXISTS edges_child_idx          ON edges(child_id, kind);
CREATE INDEX IF NOT EXISTS responses_node_idx       ON quiz_responses(node_id, responded_at DESC);
CREATE INDEX IF NOT EXISTS responses_graph_idx      ON quiz_responses(graph_id, responded_at);
CREATE INDEX IF NOT EXISTS review_slots_graph_idx   ON review_slots(graph_id, kind, until_at);

PRAGMA user_version = 1;
";
