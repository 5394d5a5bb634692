// ============================
// classroom-backend-lib/src/persist.rs
// ============================
//! Persistence bridge to the durable `LiveSession` record.
//!
//! The coordinator translates selected session events into idempotent
//! updates against the external store. Writes are best-effort and
//! out-of-band: a failure is logged and never rolls back or delays the
//! real-time path. The durable record is never authoritative for in-memory
//! room existence: a crash-restarted process starts with an empty
//! registry even if the record still says "live".

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use classroom_common::{Role, RoomId};
use serde::{Deserialize, Serialize};
use tokio::fs as tokio_fs;
use tokio::io::AsyncWriteExt;

use crate::error::AppError;

/// Lifecycle of the durable session record. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Scheduled,
    Live,
    Ended,
}

/// Append-only attendance log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEntry {
    pub user_id: String,
    pub name: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
    #[serde(default)]
    pub left_at: Option<DateTime<Utc>>,
}

/// Append-only slide display log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlideEntry {
    pub url: String,
    pub index: u32,
    pub displayed_at: DateTime<Utc>,
}

/// The durable session record, keyed by room id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub participants: Vec<AttendanceEntry>,
    #[serde(default)]
    pub slides: Vec<SlideEntry>,
    #[serde(default)]
    pub is_recording: bool,
    #[serde(default)]
    pub recording_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recording_ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recording_url: Option<String>,
}

/// One durable update produced by an event handler. Handlers stay pure by
/// describing the effect; the coordinator applies it fire-and-forget.
#[derive(Debug, Clone)]
pub enum PersistOp {
    MarkLive {
        room_id: RoomId,
        at: DateTime<Utc>,
    },
    ParticipantJoined {
        room_id: RoomId,
        user_id: String,
        name: String,
        role: Role,
        at: DateTime<Utc>,
    },
    ParticipantLeft {
        room_id: RoomId,
        user_id: String,
        at: DateTime<Utc>,
    },
    SlideShown {
        room_id: RoomId,
        url: String,
        index: u32,
        at: DateTime<Utc>,
    },
    RecordingStarted {
        room_id: RoomId,
        at: DateTime<Utc>,
    },
    /// Buffered media bytes handed off to the artifact file.
    RecordingData {
        room_id: RoomId,
        artifact: String,
        bytes: Vec<u8>,
    },
    RecordingStopped {
        room_id: RoomId,
        artifact: String,
        at: DateTime<Utc>,
    },
    MarkEnded {
        room_id: RoomId,
        at: DateTime<Utc>,
    },
}

impl PersistOp {
    pub fn room_id(&self) -> &str {
        match self {
            PersistOp::MarkLive { room_id, .. }
            | PersistOp::ParticipantJoined { room_id, .. }
            | PersistOp::ParticipantLeft { room_id, .. }
            | PersistOp::SlideShown { room_id, .. }
            | PersistOp::RecordingStarted { room_id, .. }
            | PersistOp::RecordingData { room_id, .. }
            | PersistOp::RecordingStopped { room_id, .. }
            | PersistOp::MarkEnded { room_id, .. } => room_id,
        }
    }
}

/// Trait for durable session stores
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Apply one idempotent update to the record for its room.
    async fn apply(&self, op: PersistOp) -> Result<(), AppError>;

    /// Read the current record, if one exists.
    async fn load(&self, room_id: &str) -> Result<Option<SessionRecord>, AppError>;
}

/// Flat-file implementation of the `SessionStore` trait: one JSON document
/// per room under `sessions/`, raw artifact bytes under `recordings/`.
#[derive(Clone)]
pub struct FlatFileSessionStore {
    root: PathBuf,
}

impl FlatFileSessionStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, AppError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("sessions"))?;
        std::fs::create_dir_all(root.join("recordings"))?;
        Ok(Self { root })
    }

    fn record_path(&self, room_id: &str) -> PathBuf {
        self.root.join("sessions").join(format!("{room_id}.json"))
    }

    async fn read_record(&self, room_id: &str) -> Result<Option<SessionRecord>, AppError> {
        let path = self.record_path(room_id);
        if !path.exists() {
            return Ok(None);
        }

        let content = tokio_fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn write_record(&self, room_id: &str, record: &SessionRecord) -> Result<(), AppError> {
        let path = self.record_path(room_id);
        let json = serde_json::to_string_pretty(record)?;
        tokio_fs::write(path, json).await?;
        Ok(())
    }

    /// Read-modify-write one record, creating it if absent.
    async fn update_record<F>(&self, room_id: &str, mutate: F) -> Result<(), AppError>
    where
        F: FnOnce(&mut SessionRecord),
    {
        let mut record = self.read_record(room_id).await?.unwrap_or_default();
        mutate(&mut record);
        self.write_record(room_id, &record).await
    }

    /// Append raw media bytes to the artifact file named by the reference.
    async fn append_artifact(&self, artifact: &str, bytes: &[u8]) -> Result<(), AppError> {
        let path = self.root.join(artifact);
        if let Some(parent) = path.parent() {
            tokio_fs::create_dir_all(parent).await?;
        }

        let mut file = tokio_fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FlatFileSessionStore {
    async fn apply(&self, op: PersistOp) -> Result<(), AppError> {
        match op {
            PersistOp::MarkLive { room_id, .. } => {
                self.update_record(&room_id, |record| {
                    if record.status < SessionStatus::Live {
                        record.status = SessionStatus::Live;
                    }
                })
                .await
            },
            PersistOp::ParticipantJoined {
                room_id,
                user_id,
                name,
                role,
                at,
            } => {
                self.update_record(&room_id, |record| {
                    record.participants.push(AttendanceEntry {
                        user_id,
                        name,
                        role,
                        joined_at: at,
                        left_at: None,
                    });
                })
                .await
            },
            PersistOp::ParticipantLeft { room_id, user_id, at } => {
                self.update_record(&room_id, |record| {
                    // close the most recent open entry for this user; a
                    // replayed update finds none and is a no-op
                    if let Some(entry) = record
                        .participants
                        .iter_mut()
                        .rev()
                        .find(|e| e.user_id == user_id && e.left_at.is_none())
                    {
                        entry.left_at = Some(at);
                    }
                })
                .await
            },
            PersistOp::SlideShown {
                room_id,
                url,
                index,
                at,
            } => {
                self.update_record(&room_id, |record| {
                    record.slides.push(SlideEntry {
                        url,
                        index,
                        displayed_at: at,
                    });
                })
                .await
            },
            PersistOp::RecordingStarted { room_id, at } => {
                self.update_record(&room_id, |record| {
                    record.is_recording = true;
                    record.recording_started_at = Some(at);
                })
                .await
            },
            PersistOp::RecordingData {
                artifact, bytes, ..
            } => self.append_artifact(&artifact, &bytes).await,
            PersistOp::RecordingStopped {
                room_id,
                artifact,
                at,
            } => {
                self.update_record(&room_id, |record| {
                    record.is_recording = false;
                    record.recording_ended_at = Some(at);
                    record.recording_url = Some(artifact);
                })
                .await
            },
            PersistOp::MarkEnded { room_id, .. } => {
                self.update_record(&room_id, |record| {
                    record.status = SessionStatus::Ended;
                })
                .await
            },
        }
    }

    async fn load(&self, room_id: &str) -> Result<Option<SessionRecord>, AppError> {
        self.read_record(room_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (FlatFileSessionStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FlatFileSessionStore::new(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn join_then_leave_closes_attendance_entry() {
        let (store, _guard) = setup();
        let joined = Utc::now();

        store
            .apply(PersistOp::ParticipantJoined {
                room_id: "r1".to_string(),
                user_id: "u1".to_string(),
                name: "Ada".to_string(),
                role: Role::Instructor,
                at: joined,
            })
            .await
            .unwrap();

        let left = Utc::now();
        store
            .apply(PersistOp::ParticipantLeft {
                room_id: "r1".to_string(),
                user_id: "u1".to_string(),
                at: left,
            })
            .await
            .unwrap();

        let record = store.load("r1").await.unwrap().unwrap();
        assert_eq!(record.participants.len(), 1);
        assert_eq!(record.participants[0].joined_at, joined);
        assert_eq!(record.participants[0].left_at, Some(left));
    }

    #[tokio::test]
    async fn replayed_leave_is_a_no_op() {
        let (store, _guard) = setup();
        store
            .apply(PersistOp::ParticipantJoined {
                room_id: "r1".to_string(),
                user_id: "u1".to_string(),
                name: "Ada".to_string(),
                role: Role::Student,
                at: Utc::now(),
            })
            .await
            .unwrap();

        let left = Utc::now();
        store
            .apply(PersistOp::ParticipantLeft {
                room_id: "r1".to_string(),
                user_id: "u1".to_string(),
                at: left,
            })
            .await
            .unwrap();
        store
            .apply(PersistOp::ParticipantLeft {
                room_id: "r1".to_string(),
                user_id: "u1".to_string(),
                at: Utc::now(),
            })
            .await
            .unwrap();

        let record = store.load("r1").await.unwrap().unwrap();
        assert_eq!(record.participants[0].left_at, Some(left));
    }

    #[tokio::test]
    async fn status_only_moves_forward() {
        let (store, _guard) = setup();
        store
            .apply(PersistOp::MarkLive {
                room_id: "r1".to_string(),
                at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .apply(PersistOp::MarkEnded {
                room_id: "r1".to_string(),
                at: Utc::now(),
            })
            .await
            .unwrap();
        // a late MarkLive must not resurrect an ended session
        store
            .apply(PersistOp::MarkLive {
                room_id: "r1".to_string(),
                at: Utc::now(),
            })
            .await
            .unwrap();

        let record = store.load("r1").await.unwrap().unwrap();
        assert_eq!(record.status, SessionStatus::Ended);
    }

    #[tokio::test]
    async fn recording_lifecycle_and_artifact_bytes() {
        let (store, guard) = setup();
        let started = Utc::now();
        let artifact = format!("recordings/r1-{}.webm", started.timestamp_millis());

        store
            .apply(PersistOp::RecordingStarted {
                room_id: "r1".to_string(),
                at: started,
            })
            .await
            .unwrap();
        store
            .apply(PersistOp::RecordingData {
                room_id: "r1".to_string(),
                artifact: artifact.clone(),
                bytes: b"chunk-one".to_vec(),
            })
            .await
            .unwrap();
        store
            .apply(PersistOp::RecordingData {
                room_id: "r1".to_string(),
                artifact: artifact.clone(),
                bytes: b"chunk-two".to_vec(),
            })
            .await
            .unwrap();

        let ended = Utc::now();
        store
            .apply(PersistOp::RecordingStopped {
                room_id: "r1".to_string(),
                artifact: artifact.clone(),
                at: ended,
            })
            .await
            .unwrap();

        let record = store.load("r1").await.unwrap().unwrap();
        assert!(!record.is_recording);
        assert_eq!(record.recording_url, Some(artifact.clone()));
        assert!(record.recording_started_at.unwrap() <= record.recording_ended_at.unwrap());

        let bytes = std::fs::read(guard.path().join(&artifact)).unwrap();
        assert_eq!(bytes, b"chunk-onechunk-two");
    }

    #[tokio::test]
    async fn slide_log_is_append_only() {
        let (store, _guard) = setup();
        for (url, index) in [("s1.png", 0), ("s2.png", 1)] {
            store
                .apply(PersistOp::SlideShown {
                    room_id: "r1".to_string(),
                    url: url.to_string(),
                    index,
                    at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let record = store.load("r1").await.unwrap().unwrap();
        let urls: Vec<_> = record.slides.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["s1.png", "s2.png"]);
    }

    #[tokio::test]
    async fn load_missing_room_is_none() {
        let (store, _guard) = setup();
        assert!(store.load("ghost").await.unwrap().is_none());
    }
}
