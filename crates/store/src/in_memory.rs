//! In-memory store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use campusd_core::error::StoreError;
use campusd_core::message::{Message, SessionId};
use campusd_core::store::{
    ActivityRecord, CampusStore, ConversationStore, DepartmentCount, EmailRecord, StudentRecord,
    StudentUpdate,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// An in-memory store backed by vectors behind async locks.
/// Useful for testing and runs where persistence isn't needed.
#[derive(Default)]
pub struct InMemoryStore {
    conversations: RwLock<HashMap<String, Vec<Message>>>,
    students: RwLock<Vec<StudentRecord>>,
    activities: RwLock<Vec<ActivityRecord>>,
    emails: RwLock<Vec<EmailRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of logged emails (test observability).
    pub async fn email_count(&self) -> usize {
        self.emails.read().await.len()
    }

    /// Number of logged activities (test observability).
    pub async fn activity_count(&self) -> usize {
        self.activities.read().await.len()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn find_history(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(&session_id.0).cloned().unwrap_or_default())
    }

    async fn append(&self, session_id: &SessionId, message: Message) -> Result<(), StoreError> {
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(session_id.0.clone())
            .or_default()
            .push(message);
        Ok(())
    }
}

#[async_trait]
impl CampusStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn insert_student(&self, student: StudentRecord) -> Result<StudentRecord, StoreError> {
        let mut students = self.students.write().await;
        if students.iter().any(|s| s.student_id == student.student_id) {
            return Err(StoreError::DuplicateKey(format!(
                "student_id {}",
                student.student_id
            )));
        }
        if students.iter().any(|s| s.email == student.email) {
            return Err(StoreError::DuplicateKey(format!("email {}", student.email)));
        }
        students.push(student.clone());
        Ok(student)
    }

    async fn find_student(&self, student_id: &str) -> Result<Option<StudentRecord>, StoreError> {
        let students = self.students.read().await;
        Ok(students.iter().find(|s| s.student_id == student_id).cloned())
    }

    async fn update_student(
        &self,
        student_id: &str,
        update: StudentUpdate,
    ) -> Result<Option<StudentRecord>, StoreError> {
        let mut students = self.students.write().await;

        if let Some(email) = &update.email {
            if students
                .iter()
                .any(|s| s.email == *email && s.student_id != student_id)
            {
                return Err(StoreError::DuplicateKey(format!("email {email}")));
            }
        }

        let Some(student) = students.iter_mut().find(|s| s.student_id == student_id) else {
            return Ok(None);
        };

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

        Ok(Some(student.clone()))
    }

    async fn delete_student(&self, student_id: &str) -> Result<bool, StoreError> {
        let mut students = self.students.write().await;
        let len_before = students.len();
        students.retain(|s| s.student_id != student_id);
        Ok(students.len() < len_before)
    }

    async fn list_students(&self, limit: usize) -> Result<Vec<StudentRecord>, StoreError> {
        self.recent_students(limit).await
    }

    async fn count_students(&self) -> Result<u64, StoreError> {
        Ok(self.students.read().await.len() as u64)
    }

    async fn count_by_department(&self) -> Result<Vec<DepartmentCount>, StoreError> {
        let students = self.students.read().await;
        let mut counts: HashMap<String, u64> = HashMap::new();
        for student in students.iter() {
            *counts.entry(student.department.clone()).or_default() += 1;
        }

        let mut result: Vec<DepartmentCount> = counts
            .into_iter()
            .map(|(department, count)| DepartmentCount { department, count })
            .collect();
        // Descending by count, department name breaks ties deterministically
        result.sort_by(|a, b| b.count.cmp(&a.count).then(a.department.cmp(&b.department)));
        Ok(result)
    }

    async fn recent_students(&self, limit: usize) -> Result<Vec<StudentRecord>, StoreError> {
        let students = self.students.read().await;
        let mut result: Vec<StudentRecord> = students.clone();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result.truncate(limit);
        Ok(result)
    }

    async fn log_activity(&self, activity: ActivityRecord) -> Result<(), StoreError> {
        self.activities.write().await.push(activity);
        Ok(())
    }

    async fn active_students_since(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let activities = self.activities.read().await;
        let mut seen: Vec<&str> = activities
            .iter()
            .filter(|a| a.timestamp >= cutoff)
            .map(|a| a.student_id.as_str())
            .collect();
        seen.sort_unstable();
        seen.dedup();
        Ok(seen.len() as u64)
    }

    async fn log_email(&self, email: EmailRecord) -> Result<(), StoreError> {
        self.emails.write().await.push(email);
        Ok(())
    }
}
