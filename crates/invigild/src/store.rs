//! SQLite persistence for enrollment records and attendance events.
//!
//! Enrollment stills live on disk under the stills directory; the database
//! holds one row per user with the ordered reference list, written wholesale.
//! Attendance uniqueness is enforced by the schema, not by a read-then-write
//! dance: `UNIQUE (user_id, session_key)` plus a conditional insert means a
//! racing double-submission loses at the database, not in the application.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use invigil_core::{AttendanceEvent, EnrollmentRecord, Still};
use rusqlite::params;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("image storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored record for user {0} is corrupt")]
    Corrupt(String),
    #[error("invalid user id: {0:?}")]
    InvalidUserId(String),
}

/// User ids become path components under the stills directory, so anything
/// that could traverse out of it is rejected outright.
fn valid_user_id(user: &str) -> bool {
    !user.is_empty()
        && user != "."
        && user != ".."
        && !user.contains(['/', '\\', '\0'])
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS enrollments (
    user_id    TEXT PRIMARY KEY,
    image_refs TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS attendance (
    id          TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    session_key TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    confidence  REAL NOT NULL,
    present     INTEGER NOT NULL,
    UNIQUE (user_id, session_key)
);
";

/// Handle to the daemon's persistent state.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
    stills_dir: PathBuf,
}

impl Store {
    /// Open (or create) the database at `db_path` and apply the schema.
    pub async fn open(db_path: PathBuf, stills_dir: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::create_dir_all(&stills_dir).await?;
        let conn = Connection::open(db_path).await?;
        Self::init(conn, stills_dir).await
    }

    /// In-memory store for tests.
    pub async fn open_in_memory(stills_dir: PathBuf) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&stills_dir).await?;
        let conn = Connection::open_in_memory().await?;
        Self::init(conn, stills_dir).await
    }

    async fn init(conn: Connection, stills_dir: PathBuf) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn, stills_dir })
    }

    /// Persist a full enrollment: write every still to disk, then replace the
    /// user's record in one statement.
    ///
    /// Each save writes into a fresh per-record directory and only repoints
    /// the row once every file landed, so the previously enrolled images are
    /// never overwritten in place — an aborted save leaves the live record
    /// intact. The caller guarantees one still per capture step (the state
    /// machine cannot hand over fewer); anything else is a corrupt record.
    pub async fn save_enrollment(
        &self,
        user: &str,
        stills: Vec<Still>,
    ) -> Result<EnrollmentRecord, StoreError> {
        if !valid_user_id(user) {
            return Err(StoreError::InvalidUserId(user.to_string()));
        }

        let previous = self.load_enrollment(user).await.ok().flatten();

        let rel_dir = format!("{user}/{}", uuid::Uuid::new_v4());
        tokio::fs::create_dir_all(self.stills_dir.join(&rel_dir)).await?;

        let mut image_refs = Vec::with_capacity(stills.len());
        for (i, still) in stills.iter().enumerate() {
            let rel = format!("{rel_dir}/step{i}.jpg");
            tokio::fs::write(self.stills_dir.join(&rel), &still.jpeg).await?;
            image_refs.push(rel);
        }

        let record = EnrollmentRecord::new(user, image_refs)
            .ok_or_else(|| StoreError::Corrupt(user.to_string()))?;

        let refs_json = serde_json::to_string(&record.image_refs)
            .map_err(|_| StoreError::Corrupt(user.to_string()))?;
        let row = record.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO enrollments (user_id, image_refs, created_at)
                     VALUES (?1, ?2, ?3)",
                    params![row.user, refs_json, row.created_at.to_rfc3339()],
                )?;
                Ok(())
            })
            .await?;

        // The row now points at the new directory; the replaced images are
        // unreferenced and removed best-effort.
        if let Some(old) = previous {
            for rel in &old.image_refs {
                let path = self.stills_dir.join(rel);
                let _ = tokio::fs::remove_file(&path).await;
                if let Some(parent) = path.parent() {
                    let _ = tokio::fs::remove_dir(parent).await;
                }
            }
        }

        tracing::info!(user, refs = record.image_refs.len(), "enrollment saved");
        Ok(record)
    }

    /// Load a user's enrollment record, if one exists.
    pub async fn load_enrollment(&self, user: &str) -> Result<Option<EnrollmentRecord>, StoreError> {
        let user_owned = user.to_string();
        let row: Option<(String, String, String)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT user_id, image_refs, created_at FROM enrollments WHERE user_id = ?1",
                )?;
                let mut rows = stmt.query_map(params![user_owned], |r| {
                    Ok((r.get(0)?, r.get(1)?, r.get(2)?))
                })?;
                Ok(rows.next().transpose()?)
            })
            .await?;

        let Some((user_id, refs_json, created_at)) = row else {
            return Ok(None);
        };
        let image_refs: Vec<String> = serde_json::from_str(&refs_json)
            .map_err(|_| StoreError::Corrupt(user_id.clone()))?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|_| StoreError::Corrupt(user_id.clone()))?
            .with_timezone(&Utc);

        let mut record = EnrollmentRecord::new(user_id.clone(), image_refs)
            .ok_or(StoreError::Corrupt(user_id))?;
        record.created_at = created_at;
        Ok(Some(record))
    }

    /// Read the reference image bytes for a record, in capture order.
    pub async fn load_reference_images(
        &self,
        record: &EnrollmentRecord,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut images = Vec::with_capacity(record.image_refs.len());
        for rel in &record.image_refs {
            images.push(tokio::fs::read(self.stills_dir.join(rel)).await?);
        }
        Ok(images)
    }

    /// Conditionally insert an attendance event.
    ///
    /// Returns false when an event for (user, session_key) already exists —
    /// the constraint, not the caller's earlier existence check, is what
    /// prevents duplicates under concurrent submission.
    pub async fn insert_attendance(&self, event: &AttendanceEvent) -> Result<bool, StoreError> {
        let e = event.clone();
        let inserted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "INSERT INTO attendance
                         (id, user_id, session_key, recorded_at, confidence, present)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT (user_id, session_key) DO NOTHING",
                    params![
                        e.id.to_string(),
                        e.user,
                        e.session_key,
                        e.recorded_at.to_rfc3339(),
                        e.confidence as f64,
                        e.present,
                    ],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(inserted)
    }

    /// Whether an event already exists for (user, session_key).
    ///
    /// Best-effort UI affordance only — used to disable the capture action
    /// before the camera is touched. [`insert_attendance`](Self::insert_attendance)
    /// remains the enforcement.
    pub async fn attendance_exists(
        &self,
        user: &str,
        session_key: &str,
    ) -> Result<bool, StoreError> {
        let user = user.to_string();
        let key = session_key.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT 1 FROM attendance WHERE user_id = ?1 AND session_key = ?2",
                )?;
                Ok(stmt.exists(params![user, key])?)
            })
            .await?;
        Ok(exists)
    }
}
