//! Knowledge store (`knowledge.db`) — spec.md §6: Learnings, error-pattern
//! history, human guidance, and permanent failures, persisted as embedded
//! SQLite via `rusqlite`.
//!
//! There is no teacher precedent for a relational store (`bobisme-maw` keeps
//! all state as git objects or JSON), so this module is grounded on the
//! pack's general preference for self-contained, bundled-feature crates
//! (`gix`'s vendored git, `tempfile`'s vendored temp-dir handling) — see
//! `DESIGN.md` for the dependency note.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::ids::LearningId;
use crate::learnings::{Learning, LearningCategory};

#[derive(Debug)]
pub enum KnowledgeError {
    Sqlite(rusqlite::Error),
}

impl fmt::Display for KnowledgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "knowledge store error: {e}"),
        }
    }
}

impl std::error::Error for KnowledgeError {}

impl From<rusqlite::Error> for KnowledgeError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

fn category_str(c: LearningCategory) -> &'static str {
    match c {
        LearningCategory::ErrorPattern => "error_pattern",
        LearningCategory::HumanGuidance => "human_guidance",
        LearningCategory::PermanentFailure => "permanent_failure",
    }
}

fn category_from_str(s: &str) -> LearningCategory {
    match s {
        "human_guidance" => LearningCategory::HumanGuidance,
        "permanent_failure" => LearningCategory::PermanentFailure,
        _ => LearningCategory::ErrorPattern,
    }
}

/// Embedded SQLite-backed store for Learnings (spec.md §3's Knowledge
/// collaborator).
pub struct KnowledgeStore {
    conn: Connection,
}

impl KnowledgeStore {
    /// Open (creating if absent) the database at `path`, running the schema
    /// migration if the `learnings` table doesn't yet exist.
    pub fn open(path: &Path) -> Result<Self, KnowledgeError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS learnings (
                id TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                summary TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_used_at TEXT,
                use_count INTEGER NOT NULL,
                confidence REAL NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }

    /// In-memory store, for tests that don't need persistence across runs.
    pub fn open_in_memory() -> Result<Self, KnowledgeError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE learnings (
                id TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                summary TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_used_at TEXT,
                use_count INTEGER NOT NULL,
                confidence REAL NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }

    pub fn upsert(&self, learning: &Learning) -> Result<(), KnowledgeError> {
        self.conn.execute(
            "INSERT INTO learnings (id, category, summary, created_at, last_used_at, use_count, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                summary = excluded.summary,
                last_used_at = excluded.last_used_at,
                use_count = excluded.use_count,
                confidence = excluded.confidence",
            params![
                learning.id.as_str(),
                category_str(learning.category),
                learning.summary,
                learning.created_at.to_rfc3339(),
                learning.last_used_at.map(|t| t.to_rfc3339()),
                learning.use_count,
                learning.confidence,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &LearningId) -> Result<Option<Learning>, KnowledgeError> {
        self.conn
            .query_row(
                "SELECT id, category, summary, created_at, last_used_at, use_count, confidence
                 FROM learnings WHERE id = ?1",
                params![id.as_str()],
                Self::row_to_learning,
            )
            .optional()
            .map_err(KnowledgeError::from)
    }

    /// All Learnings in a given category, most-confident first.
    pub fn by_category(&self, category: LearningCategory) -> Result<Vec<Learning>, KnowledgeError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, category, summary, created_at, last_used_at, use_count, confidence
             FROM learnings WHERE category = ?1 ORDER BY confidence DESC",
        )?;
        let rows = stmt
            .query_map(params![category_str(category)], Self::row_to_learning)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn row_to_learning(row: &rusqlite::Row<'_>) -> rusqlite::Result<Learning> {
        let id_str: String = row.get(0)?;
        let category_s: String = row.get(1)?;
        let created_at: String = row.get(3)?;
        let last_used_at: Option<String> = row.get(4)?;
        Ok(Learning {
            id: LearningId::new(id_str).expect("stored ids are always valid"),
            category: category_from_str(&category_s),
            summary: row.get(2)?,
            created_at: parse_rfc3339(&created_at),
            last_used_at: last_used_at.map(|s| parse_rfc3339(&s)),
            use_count: row.get(5)?,
            confidence: row.get(6)?,
        })
    }
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_then_get_round_trips() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let learning = Learning::new(LearningCategory::ErrorPattern, "flaky network mock");
        store.upsert(&learning).unwrap();
        let back = store.get(&learning.id).unwrap().unwrap();
        assert_eq!(back.summary, "flaky network mock");
    }

    #[test]
    fn missing_learning_returns_none() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        assert!(store.get(&LearningId::new("nope").unwrap()).unwrap().is_none());
    }

    #[test]
    fn upsert_updates_existing_row() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let mut learning = Learning::new(LearningCategory::HumanGuidance, "initial");
        store.upsert(&learning).unwrap();
        learning.mark_used(Utc::now());
        learning.summary = "updated".to_owned();
        store.upsert(&learning).unwrap();

        let back = store.get(&learning.id).unwrap().unwrap();
        assert_eq!(back.summary, "updated");
        assert_eq!(back.use_count, 1);
    }

    #[test]
    fn by_category_filters_and_orders_by_confidence() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let mut low = Learning::new(LearningCategory::ErrorPattern, "low confidence");
        low.confidence = 0.1;
        let mut high = Learning::new(LearningCategory::ErrorPattern, "high confidence");
        high.confidence = 0.9;
        let other = Learning::new(LearningCategory::HumanGuidance, "different category");
        store.upsert(&low).unwrap();
        store.upsert(&high).unwrap();
        store.upsert(&other).unwrap();

        let results = store.by_category(LearningCategory::ErrorPattern).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].summary, "high confidence");
    }
}
