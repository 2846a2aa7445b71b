//! Student CRUD tools.
//!
//! Every tool addresses students by `student_id`, the canonical public key.
//! Mutations write an activity record alongside the change.

use async_trait::async_trait;
use campusd_core::error::ToolError;
use campusd_core::store::{ActivityRecord, CampusStore, StudentRecord, StudentUpdate};
use campusd_core::tool::Tool;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

fn parse_args<T: for<'de> Deserialize<'de>>(
    arguments: serde_json::Value,
) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

fn to_payload(
    tool_name: &str,
    value: impl serde::Serialize,
) -> Result<serde_json::Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::execution(tool_name, e))
}

/// Activity logging must never fail the tool call that triggered it.
async fn record_activity(store: &Arc<dyn CampusStore>, activity: ActivityRecord) {
    if let Err(e) = store.log_activity(activity).await {
        warn!(error = %e, "Failed to write activity log");
    }
}

// ── add_student ───────────────────────────────────────────────────────────

pub struct AddStudentTool {
    store: Arc<dyn CampusStore>,
}

impl AddStudentTool {
    pub fn new(store: Arc<dyn CampusStore>) -> Self {
        Self { store }
    }
}

#[derive(Deserialize)]
struct AddStudentArgs {
    student_id: String,
    name: String,
    department: String,
    email: String,
}

#[async_trait]
impl Tool for AddStudentTool {
    fn name(&self) -> &str {
        "add_student"
    }

    fn description(&self) -> &str {
        "Add a new student with a unique student_id, name, department, and email."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "student_id": { "type": "string" },
                "name": { "type": "string" },
                "department": { "type": "string" },
                "email": { "type": "string" }
            },
            "required": ["student_id", "name", "department", "email"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let args: AddStudentArgs = parse_args(arguments)?;

        let record = StudentRecord::new(&args.student_id, &args.name, &args.department, &args.email);
        let inserted = self
            .store
            .insert_student(record)
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;

        record_activity(
            &self.store,
            ActivityRecord::new(
                &inserted.student_id,
                "student_added",
                format!(
                    "Student {} added to {} department",
                    inserted.name, inserted.department
                ),
            ),
        )
        .await;

        to_payload(self.name(), &inserted)
    }
}

// ── get_student ───────────────────────────────────────────────────────────

pub struct GetStudentTool {
    store: Arc<dyn CampusStore>,
}

impl GetStudentTool {
    pub fn new(store: Arc<dyn CampusStore>) -> Self {
        Self { store }
    }
}

#[derive(Deserialize)]
struct StudentIdArgs {
    student_id: String,
}

#[async_trait]
impl Tool for GetStudentTool {
    fn name(&self) -> &str {
        "get_student"
    }

    fn description(&self) -> &str {
        "Retrieve a student record by student_id."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "student_id": { "type": "string" }
            },
            "required": ["student_id"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let args: StudentIdArgs = parse_args(arguments)?;

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

        to_payload(self.name(), &student)
    }
}

// ── update_student ────────────────────────────────────────────────────────

pub struct UpdateStudentTool {
    store: Arc<dyn CampusStore>,
}

impl UpdateStudentTool {
    pub fn new(store: Arc<dyn CampusStore>) -> Self {
        Self { store }
    }
}

#[derive(Deserialize)]
struct UpdateStudentArgs {
    student_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    department: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[async_trait]
impl Tool for UpdateStudentTool {
    fn name(&self) -> &str {
        "update_student"
    }

    fn description(&self) -> &str {
        "Update a student's name, department, or email. Only the provided fields change."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "student_id": { "type": "string" },
                "name": { "type": "string" },
                "department": { "type": "string" },
                "email": { "type": "string" }
            },
            "required": ["student_id"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let args: UpdateStudentArgs = parse_args(arguments)?;

        let update = StudentUpdate {
            name: args.name,
            department: args.department,
            email: args.email,
        };

        if update.is_empty() {
            return Err(ToolError::InvalidArguments(
                "at least one of name, department, email is required".into(),
            ));
        }

        let changed: Vec<&str> = [
            update.name.as_ref().map(|_| "name"),
            update.department.as_ref().map(|_| "department"),
            update.email.as_ref().map(|_| "email"),
        ]
        .into_iter()
        .flatten()
        .collect();

        let updated = self
            .store
            .update_student(&args.student_id, update)
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?
            .ok_or_else(|| {
                ToolError::execution(
                    self.name(),
                    format!("student {} not found", args.student_id),
                )
            })?;

        record_activity(
            &self.store,
            ActivityRecord::new(
                &updated.student_id,
                "student_updated",
                format!("Student information updated: {}", changed.join(", ")),
            ),
        )
        .await;

        to_payload(self.name(), &updated)
    }
}

// ── delete_student ────────────────────────────────────────────────────────

pub struct DeleteStudentTool {
    store: Arc<dyn CampusStore>,
}

impl DeleteStudentTool {
    pub fn new(store: Arc<dyn CampusStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for DeleteStudentTool {
    fn name(&self) -> &str {
        "delete_student"
    }

    fn description(&self) -> &str {
        "Delete a student record by student_id."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "student_id": { "type": "string" }
            },
            "required": ["student_id"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let args: StudentIdArgs = parse_args(arguments)?;

        let student = self
            .store
            .find_student(&args.student_id)
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;

        let deleted = self
            .store
            .delete_student(&args.student_id)
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;

        if deleted {
            let description = match &student {
                Some(s) => format!("Student {} deleted", s.name),
                None => "Student deleted".into(),
            };
            record_activity(
                &self.store,
                ActivityRecord::new(&args.student_id, "student_deleted", description),
            )
            .await;
        }

        Ok(serde_json::json!({ "deleted": deleted }))
    }
}

// ── list_students ─────────────────────────────────────────────────────────

pub struct ListStudentsTool {
    store: Arc<dyn CampusStore>,
}

impl ListStudentsTool {
    pub fn new(store: Arc<dyn CampusStore>) -> Self {
        Self { store }
    }
}

#[derive(Deserialize)]
struct ListStudentsArgs {
    #[serde(default = "default_list_limit")]
    limit: usize,
}

fn default_list_limit() -> usize {
    100
}

#[async_trait]
impl Tool for ListStudentsTool {
    fn name(&self) -> &str {
        "list_students"
    }

    fn description(&self) -> &str {
        "List students, most recently created first. Optional limit (default 100)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "minimum": 1, "default": 100 }
            },
            "required": []
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let args: ListStudentsArgs = parse_args(arguments)?;

        let students = self
            .store
            .list_students(args.limit)
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;

        to_payload(self.name(), &students)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campusd_store::InMemoryStore;

    fn store() -> Arc<InMemoryStore> {
        Arc::new(InMemoryStore::new())
    }

    #[tokio::test]
    async fn add_then_get_roundtrip() {
        let store = store();
        let add = AddStudentTool::new(store.clone());
        let get = GetStudentTool::new(store.clone());

        let payload = add
            .execute(serde_json::json!({
                "student_id": "S001",
                "name": "Ada Lovelace",
                "department": "CS",
                "email": "ada@campus.edu"
            }))
            .await
            .unwrap();
        assert_eq!(payload["student_id"], "S001");

        let fetched = get
            .execute(serde_json::json!({"student_id": "S001"}))
            .await
            .unwrap();
        assert_eq!(fetched["name"], "Ada Lovelace");

        // Mutation logged an activity
        assert_eq!(store.activity_count().await, 1);
    }

    #[tokio::test]
    async fn add_duplicate_is_typed_failure() {
        let store = store();
        let add = AddStudentTool::new(store.clone());

        let args = serde_json::json!({
            "student_id": "S001",
            "name": "Ada",
            "department": "CS",
            "email": "ada@campus.edu"
        });
        add.execute(args.clone()).await.unwrap();

        let err = add.execute(args).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn add_missing_required_field_rejected() {
        let store = store();
        let add = AddStudentTool::new(store);

        let err = add
            .execute(serde_json::json!({"student_id": "S001"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn update_missing_student_fails_and_store_unchanged() {
        let store = store();
        let update = UpdateStudentTool::new(store.clone());

        let err = update
            .execute(serde_json::json!({
                "student_id": "S404",
                "department": "Mathematics"
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
        assert_eq!(store.activity_count().await, 0);
    }

    #[tokio::test]
    async fn update_with_no_fields_rejected() {
        let store = store();
        let update = UpdateStudentTool::new(store);

        let err = update
            .execute(serde_json::json!({"student_id": "S001"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn delete_reports_false_for_missing() {
        let store = store();
        let delete = DeleteStudentTool::new(store);

        let payload = delete
            .execute(serde_json::json!({"student_id": "S404"}))
            .await
            .unwrap();
        assert_eq!(payload["deleted"], false);
    }

    #[tokio::test]
    async fn list_respects_limit() {
        let store = store();
        let add = AddStudentTool::new(store.clone());
        for i in 0..3 {
            add.execute(serde_json::json!({
                "student_id": format!("S{i:03}"),
                "name": format!("Student {i}"),
                "department": "CS",
                "email": format!("s{i}@campus.edu")
            }))
            .await
            .unwrap();
        }

        let list = ListStudentsTool::new(store);
        let payload = list.execute(serde_json::json!({"limit": 2})).await.unwrap();
        assert_eq!(payload.as_array().unwrap().len(), 2);
    }
}
