//! SQL migration definitions for the regraph database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: nodes, edges",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Graph nodes. Ids are deterministic (UUIDv5 of stable inputs), so an
-- upsert from a re-crawl lands on the same row. Nodes are never deleted;
-- stale is a flag.
CREATE TABLE IF NOT EXISTS nodes (
    id          TEXT PRIMARY KEY,
    kind        TEXT NOT NULL,
    url         TEXT,
    title       TEXT,
    fingerprint TEXT,
    payload     TEXT,
    chunk_index INTEGER,
    parent_id   TEXT,
    embedding   BLOB,
    stale       INTEGER NOT NULL DEFAULT 0,
    first_seen  TEXT NOT NULL,
    last_seen   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_nodes_url ON nodes(url);
CREATE INDEX IF NOT EXISTS idx_nodes_fingerprint ON nodes(fingerprint);
CREATE INDEX IF NOT EXISTS idx_nodes_kind ON nodes(kind);
CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id);
-- Repair passes look for live chunks without embeddings.
CREATE INDEX IF NOT EXISTS idx_nodes_missing_embedding
    ON nodes(kind, stale) WHERE embedding IS NULL;

-- Graph edges, deduplicated by the full triple. to_id may reference a node
-- that has not been upserted yet (forward reference).
CREATE TABLE IF NOT EXISTS edges (
    from_id    TEXT NOT NULL,
    to_id      TEXT NOT NULL,
    kind       TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (from_id, to_id, kind)
);

CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
