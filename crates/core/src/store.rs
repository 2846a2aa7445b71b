//! Store traits — persistence contracts for conversations and campus data.
//!
//! The stores are external collaborators: the dispatch loop and tools only
//! ever see these traits. Implementations: in-memory (tests, ephemeral
//! runs) and SQLite.

use crate::error::StoreError;
use crate::message::{Message, SessionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only per-session message log.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// All messages for a session in chronological order.
    ///
    /// Reading performs no mutation; an unknown session yields an empty
    /// history, not an error.
    async fn find_history(
        &self,
        session_id: &SessionId,
    ) -> std::result::Result<Vec<Message>, StoreError>;

    /// Append a message, creating the session on first write.
    async fn append(
        &self,
        session_id: &SessionId,
        message: Message,
    ) -> std::result::Result<(), StoreError>;
}

/// A student record. `student_id` is the canonical public key — every
/// operation addresses students by it, never by an internal row id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentRecord {
    pub student_id: String,
    pub name: String,
    pub department: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StudentRecord {
    pub fn new(
        student_id: impl Into<String>,
        name: impl Into<String>,
        department: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            student_id: student_id.into(),
            name: name.into(),
            department: department.into(),
            email: email.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// An optional-field patch for a student record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudentUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl StudentUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.department.is_none() && self.email.is_none()
    }
}

/// One row of the group-count-by-department aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentCount {
    pub department: String,
    pub count: u64,
}

/// A logged student activity (onboarding, updates, emails, logins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub student_id: String,
    pub activity_type: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn new(
        student_id: impl Into<String>,
        activity_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            student_id: student_id.into(),
            activity_type: activity_type.into(),
            description: description.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A mock-outbox email entry. No real mail transport is ever contacted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRecord {
    pub student_id: String,
    pub to: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// The campus data store: students, activity logs, and the email outbox.
///
/// Simple find/insert/update/delete-by-id plus aggregate counts — the
/// interface the tool catalogue needs, nothing more.
#[async_trait]
pub trait CampusStore: Send + Sync {
    /// The backend name.
    fn name(&self) -> &str;

    /// Insert a new student. Fails with `StoreError::DuplicateKey` when the
    /// `student_id` or `email` is already taken.
    async fn insert_student(
        &self,
        student: StudentRecord,
    ) -> std::result::Result<StudentRecord, StoreError>;

    /// Find a student by `student_id`.
    async fn find_student(
        &self,
        student_id: &str,
    ) -> std::result::Result<Option<StudentRecord>, StoreError>;

    /// Patch a student. `None` when no student has the id; duplicate-email
    /// patches fail with `StoreError::DuplicateKey`.
    async fn update_student(
        &self,
        student_id: &str,
        update: StudentUpdate,
    ) -> std::result::Result<Option<StudentRecord>, StoreError>;

    /// Delete a student. `true` when a record was removed.
    async fn delete_student(&self, student_id: &str) -> std::result::Result<bool, StoreError>;

    /// Most recently created first.
    async fn list_students(
        &self,
        limit: usize,
    ) -> std::result::Result<Vec<StudentRecord>, StoreError>;

    /// Total number of students.
    async fn count_students(&self) -> std::result::Result<u64, StoreError>;

    /// Group-count by department, descending by count.
    async fn count_by_department(&self)
    -> std::result::Result<Vec<DepartmentCount>, StoreError>;

    /// The N most recently created students, creation time descending.
    async fn recent_students(
        &self,
        limit: usize,
    ) -> std::result::Result<Vec<StudentRecord>, StoreError>;

    /// Record a student activity.
    async fn log_activity(
        &self,
        activity: ActivityRecord,
    ) -> std::result::Result<(), StoreError>;

    /// Number of distinct students with at least one activity at or after
    /// the cutoff.
    async fn active_students_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> std::result::Result<u64, StoreError>;

    /// Record a mock outbound email.
    async fn log_email(&self, email: EmailRecord) -> std::result::Result<(), StoreError>;
}
