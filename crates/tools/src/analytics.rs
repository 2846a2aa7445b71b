//! Analytics aggregate tools.

use async_trait::async_trait;
use campusd_core::error::ToolError;
use campusd_core::store::CampusStore;
use campusd_core::tool::Tool;
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;

// ── get_total_students ────────────────────────────────────────────────────

pub struct TotalStudentsTool {
    store: Arc<dyn CampusStore>,
}

impl TotalStudentsTool {
    pub fn new(store: Arc<dyn CampusStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for TotalStudentsTool {
    fn name(&self) -> &str {
        "get_total_students"
    }

    fn description(&self) -> &str {
        "Get the total number of students."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {}, "required": [] })
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let total = self
            .store
            .count_students()
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;
        Ok(serde_json::json!({ "total_students": total }))
    }
}

// ── get_students_by_department ────────────────────────────────────────────

pub struct StudentsByDepartmentTool {
    store: Arc<dyn CampusStore>,
}

impl StudentsByDepartmentTool {
    pub fn new(store: Arc<dyn CampusStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for StudentsByDepartmentTool {
    fn name(&self) -> &str {
        "get_students_by_department"
    }

    fn description(&self) -> &str {
        "Get the student count per department, largest first."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {}, "required": [] })
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let counts = self
            .store
            .count_by_department()
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;
        serde_json::to_value(counts).map_err(|e| ToolError::execution(self.name(), e))
    }
}

// ── get_recent_students ───────────────────────────────────────────────────

pub struct RecentStudentsTool {
    store: Arc<dyn CampusStore>,
}

impl RecentStudentsTool {
    pub fn new(store: Arc<dyn CampusStore>) -> Self {
        Self { store }
    }
}

#[derive(Deserialize)]
struct RecentStudentsArgs {
    #[serde(default = "default_recent_limit")]
    limit: usize,
}

fn default_recent_limit() -> usize {
    5
}

#[async_trait]
impl Tool for RecentStudentsTool {
    fn name(&self) -> &str {
        "get_recent_students"
    }

    fn description(&self) -> &str {
        "Get the most recently onboarded students, newest first. Optional limit (default 5)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "minimum": 1, "default": 5 }
            },
            "required": []
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let args: RecentStudentsArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let students = self
            .store
            .recent_students(args.limit)
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;
        serde_json::to_value(students).map_err(|e| ToolError::execution(self.name(), e))
    }
}

// ── get_active_students_last_7_days ───────────────────────────────────────

pub struct ActiveStudentsTool {
    store: Arc<dyn CampusStore>,
}

impl ActiveStudentsTool {
    pub fn new(store: Arc<dyn CampusStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ActiveStudentsTool {
    fn name(&self) -> &str {
        "get_active_students_last_7_days"
    }

    fn description(&self) -> &str {
        "Count distinct students with logged activity in the trailing 7 days."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {}, "required": [] })
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let cutoff = Utc::now() - Duration::days(7);
        let active = self
            .store
            .active_students_since(cutoff)
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;
        Ok(serde_json::json!({ "active_last_7_days": active }))
    }
}
