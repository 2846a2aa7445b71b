//! SQLite backend — durable conversations and campus data.
//!
//! Uses a single SQLite database file with four tables:
//! - `messages`      — append-only per-session conversation log
//! - `students`      — the student collection
//! - `activity_logs` — student activity trail
//! - `email_logs`    — the mock email outbox
//!
//! Schema is created by idempotent migrations at startup.

use async_trait::async_trait;
use campusd_core::error::StoreError;
use campusd_core::message::{FunctionCall, Message, Role, SessionId};
use campusd_core::store::{
    ActivityRecord, CampusStore, ConversationStore, DepartmentCount, EmailRecord, StudentRecord,
    StudentUpdate,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A durable SQLite store for conversations and campus data.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store from a file path.
    ///
    /// The database and all tables/indexes are created automatically.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run schema migrations — creates tables and indexes.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq           INTEGER PRIMARY KEY AUTOINCREMENT,
                id            TEXT UNIQUE NOT NULL,
                session_id    TEXT NOT NULL,
                role          TEXT NOT NULL,
                content       TEXT,
                name          TEXT,
                function_call TEXT,
                timestamp     TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, seq)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS students (
                iid         INTEGER PRIMARY KEY AUTOINCREMENT,
                student_id  TEXT UNIQUE NOT NULL,
                name        TEXT NOT NULL,
                department  TEXT NOT NULL,
                email       TEXT UNIQUE NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("students table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_students_department ON students(department)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("department index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_students_created_at ON students(created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("created_at index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS activity_logs (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                student_id    TEXT NOT NULL,
                activity_type TEXT NOT NULL,
                description   TEXT NOT NULL,
                timestamp     TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("activity_logs table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_activity_timestamp ON activity_logs(timestamp)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("activity index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS email_logs (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                student_id TEXT NOT NULL,
                recipient  TEXT NOT NULL,
                message    TEXT NOT NULL,
                timestamp  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("email_logs table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn parse_timestamp(raw: &str) -> DateTime<Utc> {
        chrono::DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    /// Parse a `Message` from a SQLite row.
    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StoreError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let role_raw: String = row
            .try_get("role")
            .map_err(|e| StoreError::QueryFailed(format!("role column: {e}")))?;
        let content: Option<String> = row
            .try_get("content")
            .map_err(|e| StoreError::QueryFailed(format!("content column: {e}")))?;
        let name: Option<String> = row
            .try_get("name")
            .map_err(|e| StoreError::QueryFailed(format!("name column: {e}")))?;
        let function_call_json: Option<String> = row
            .try_get("function_call")
            .map_err(|e| StoreError::QueryFailed(format!("function_call column: {e}")))?;
        let timestamp_raw: String = row
            .try_get("timestamp")
            .map_err(|e| StoreError::QueryFailed(format!("timestamp column: {e}")))?;

        let role = match role_raw.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "system" => Role::System,
            "tool" => Role::Tool,
            other => {
                return Err(StoreError::QueryFailed(format!("unknown role '{other}'")));
            }
        };

        let function_call: Option<FunctionCall> = function_call_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| StoreError::QueryFailed(format!("function_call decode: {e}")))?;

        Ok(Message {
            id,
            role,
            content,
            name,
            function_call,
            timestamp: Self::parse_timestamp(&timestamp_raw),
        })
    }

    /// Parse a `StudentRecord` from a SQLite row.
    fn row_to_student(row: &sqlx::sqlite::SqliteRow) -> Result<StudentRecord, StoreError> {
        let student_id: String = row
            .try_get("student_id")
            .map_err(|e| StoreError::QueryFailed(format!("student_id column: {e}")))?;
        let name: String = row
            .try_get("name")
            .map_err(|e| StoreError::QueryFailed(format!("name column: {e}")))?;
        let department: String = row
            .try_get("department")
            .map_err(|e| StoreError::QueryFailed(format!("department column: {e}")))?;
        let email: String = row
            .try_get("email")
            .map_err(|e| StoreError::QueryFailed(format!("email column: {e}")))?;
        let created_at_raw: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;
        let updated_at_raw: String = row
            .try_get("updated_at")
            .map_err(|e| StoreError::QueryFailed(format!("updated_at column: {e}")))?;

        Ok(StudentRecord {
            student_id,
            name,
            department,
            email,
            created_at: Self::parse_timestamp(&created_at_raw),
            updated_at: Self::parse_timestamp(&updated_at_raw),
        })
    }

    /// Map a UNIQUE-constraint violation to `DuplicateKey`, everything else
    /// to `Storage`.
    fn map_insert_error(e: sqlx::Error, key: &str) -> StoreError {
        let text = e.to_string();
        if text.contains("UNIQUE constraint failed") {
            StoreError::DuplicateKey(key.to_string())
        } else {
            StoreError::Storage(format!("INSERT failed: {text}"))
        }
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn find_history(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, role, content, name, function_call, timestamp
             FROM messages WHERE session_id = ?1 ORDER BY seq",
        )
        .bind(&session_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("history fetch: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn append(&self, session_id: &SessionId, message: Message) -> Result<(), StoreError> {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        };
        let function_call_json = message
            .function_call
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Storage(format!("function_call encode: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, session_id, role, content, name, function_call, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&message.id)
        .bind(&session_id.0)
        .bind(role)
        .bind(&message.content)
        .bind(&message.name)
        .bind(&function_call_json)
        .bind(message.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("message INSERT: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl CampusStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert_student(&self, student: StudentRecord) -> Result<StudentRecord, StoreError> {
        // Pre-checks give precise duplicate messages; the UNIQUE constraints
        // remain the backstop under concurrent inserts.
        if self.find_student(&student.student_id).await?.is_some() {
            return Err(StoreError::DuplicateKey(format!(
                "student_id {}",
                student.student_id
            )));
        }

        let email_taken =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM students WHERE email = ?1")
                .bind(&student.email)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::QueryFailed(format!("email check: {e}")))?;
        if email_taken > 0 {
            return Err(StoreError::DuplicateKey(format!("email {}", student.email)));
        }

        sqlx::query(
            r#"
            INSERT INTO students (student_id, name, department, email, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&student.student_id)
        .bind(&student.name)
        .bind(&student.department)
        .bind(&student.email)
        .bind(student.created_at.to_rfc3339())
        .bind(student.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_insert_error(e, &student.student_id))?;

        debug!(student_id = %student.student_id, "Inserted student");
        Ok(student)
    }

    async fn find_student(&self, student_id: &str) -> Result<Option<StudentRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM students WHERE student_id = ?1")
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("student fetch: {e}")))?;

        row.as_ref().map(Self::row_to_student).transpose()
    }

    async fn update_student(
        &self,
        student_id: &str,
        update: StudentUpdate,
    ) -> Result<Option<StudentRecord>, StoreError> {
        let Some(mut student) = self.find_student(student_id).await? else {
            return Ok(None);
        };

        if let Some(email) = &update.email {
            let taken = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM students WHERE email = ?1 AND student_id != ?2",
            )
            .bind(email)
            .bind(student_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("email check: {e}")))?;
            if taken > 0 {
                return Err(StoreError::DuplicateKey(format!("email {email}")));
            }
        }

        if let Some(name) = update.name {
            student.name = name;
        }
        if let Some(department) = update.department {
            student.department = department;
        }
        if let Some(email) = update.email {
            student.email = email;
        }
        student.updated_at = Utc::now();

        sqlx::query(
            r#"
            UPDATE students SET name = ?2, department = ?3, email = ?4, updated_at = ?5
            WHERE student_id = ?1
            "#,
        )
        .bind(student_id)
        .bind(&student.name)
        .bind(&student.department)
        .bind(&student.email)
        .bind(student.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("student UPDATE: {e}")))?;

        Ok(Some(student))
    }

    async fn delete_student(&self, student_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM students WHERE student_id = ?1")
            .bind(student_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("student DELETE: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_students(&self, limit: usize) -> Result<Vec<StudentRecord>, StoreError> {
        self.recent_students(limit).await
    }

    async fn count_students(&self) -> Result<u64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM students")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("student count: {e}")))?;
        Ok(count as u64)
    }

    async fn count_by_department(&self) -> Result<Vec<DepartmentCount>, StoreError> {
        let rows = sqlx::query(
            "SELECT department, COUNT(*) AS n FROM students
             GROUP BY department ORDER BY n DESC, department ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("department counts: {e}")))?;

        rows.iter()
            .map(|row| {
                let department: String = row
                    .try_get("department")
                    .map_err(|e| StoreError::QueryFailed(format!("department column: {e}")))?;
                let count: i64 = row
                    .try_get("n")
                    .map_err(|e| StoreError::QueryFailed(format!("count column: {e}")))?;
                Ok(DepartmentCount {
                    department,
                    count: count as u64,
                })
            })
            .collect()
    }

    async fn recent_students(&self, limit: usize) -> Result<Vec<StudentRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM students ORDER BY created_at DESC LIMIT ?1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("recent students: {e}")))?;

        rows.iter().map(Self::row_to_student).collect()
    }

    async fn log_activity(&self, activity: ActivityRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO activity_logs (student_id, activity_type, description, timestamp)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&activity.student_id)
        .bind(&activity.activity_type)
        .bind(&activity.description)
        .bind(activity.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("activity INSERT: {e}")))?;

        Ok(())
    }

    async fn active_students_since(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT student_id) FROM activity_logs WHERE timestamp >= ?1",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("active count: {e}")))?;
        Ok(count as u64)
    }

    async fn log_email(&self, email: EmailRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO email_logs (student_id, recipient, message, timestamp)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&email.student_id)
        .bind(&email.to)
        .bind(&email.message)
        .bind(email.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("email INSERT: {e}")))?;

        Ok(())
    }
}
