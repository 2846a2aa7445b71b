//! Notification tools: mock email and activity logging.
//!
//! `send_email` writes to the email outbox and the activity log; no real
//! mail transport is ever contacted.

use async_trait::async_trait;
use campusd_core::error::ToolError;
use campusd_core::store::{ActivityRecord, CampusStore, EmailRecord};
use campusd_core::tool::Tool;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

pub struct SendEmailTool {
    store: Arc<dyn CampusStore>,
}

impl SendEmailTool {
    pub fn new(store: Arc<dyn CampusStore>) -> Self {
        Self { store }
    }
}

#[derive(Deserialize)]
struct SendEmailArgs {
    student_id: String,
    message: String,
}

#[async_trait]
impl Tool for SendEmailTool {
    fn name(&self) -> &str {
        "send_email"
    }

    fn description(&self) -> &str {
        "Send an email to a student by student_id. The message is logged; no real mail is sent."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "student_id": { "type": "string" },
                "message": { "type": "string" }
            },
            "required": ["student_id", "message"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let args: SendEmailArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let student = self
            .store
            .find_student(&args.student_id)
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?
            .ok_or_else(|| {
                ToolError::execution(
                    self.name(),
                    format!("student {} not found", args.student_id),
                )
            })?;

        self.store
            .log_email(EmailRecord {
                student_id: student.student_id.clone(),
                to: student.email.clone(),
                message: args.message.clone(),
                timestamp: Utc::now(),
            })
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;

        let preview: String = args.message.chars().take(50).collect();
        self.store
            .log_activity(ActivityRecord::new(
                &student.student_id,
                "email_sent",
                format!("Email sent to {}: {preview}", student.email),
            ))
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;

        info!(to = %student.email, "Mock email sent");

        Ok(serde_json::json!({
            "sent": true,
            "to": student.email
        }))
    }
}

pub struct LogActivityTool {
    store: Arc<dyn CampusStore>,
}

impl LogActivityTool {
    pub fn new(store: Arc<dyn CampusStore>) -> Self {
        Self { store }
    }
}

#[derive(Deserialize)]
struct LogActivityArgs {
    student_id: String,
    #[serde(default = "default_activity_type")]
    activity_type: String,
    #[serde(default)]
    description: String,
}

fn default_activity_type() -> String {
    "login".into()
}

#[async_trait]
impl Tool for LogActivityTool {
    fn name(&self) -> &str {
        "log_activity"
    }

    fn description(&self) -> &str {
        "Record a student activity (default type: login)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "student_id": { "type": "string" },
                "activity_type": { "type": "string", "default": "login" },
                "description": { "type": "string" }
            },
            "required": ["student_id"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let args: LogActivityArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let activity =
            ActivityRecord::new(&args.student_id, &args.activity_type, &args.description);
        self.store
            .log_activity(activity.clone())
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;

        serde_json::to_value(activity).map_err(|e| ToolError::execution(self.name(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campusd_core::store::StudentRecord;
    use campusd_store::InMemoryStore;

    #[tokio::test]
    async fn email_logs_outbox_and_activity() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_student(StudentRecord::new("S001", "Ada", "CS", "ada@campus.edu"))
            .await
            .unwrap();

        let tool = SendEmailTool::new(store.clone());
        let payload = tool
            .execute(serde_json::json!({
                "student_id": "S001",
                "message": "Welcome to campus!"
            }))
            .await
            .unwrap();

        assert_eq!(payload["sent"], true);
        assert_eq!(payload["to"], "ada@campus.edu");
        assert_eq!(store.email_count().await, 1);
        assert_eq!(store.activity_count().await, 1);
    }

    #[tokio::test]
    async fn email_to_missing_student_fails_without_side_effects() {
        let store = Arc::new(InMemoryStore::new());
        let tool = SendEmailTool::new(store.clone());

        let err = tool
            .execute(serde_json::json!({
                "student_id": "S404",
                "message": "hello?"
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
        assert_eq!(store.email_count().await, 0);
        assert_eq!(store.activity_count().await, 0);
    }

    #[tokio::test]
    async fn log_activity_defaults_type_to_login() {
        let store = Arc::new(InMemoryStore::new());
        let tool = LogActivityTool::new(store.clone());

        let payload = tool
            .execute(serde_json::json!({"student_id": "S001"}))
            .await
            .unwrap();
        assert_eq!(payload["activity_type"], "login");
        assert_eq!(store.activity_count().await, 1);
    }
}
