//! Static campus-info tools: cafeteria hours, library hours, events.
//!
//! These answer from fixed strings and touch no store.

use async_trait::async_trait;
use campusd_core::error::ToolError;
use campusd_core::tool::Tool;

fn empty_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {}, "required": [] })
}

pub struct CafeteriaTimingsTool;

#[async_trait]
impl Tool for CafeteriaTimingsTool {
    fn name(&self) -> &str {
        "get_cafeteria_timings"
    }

    fn description(&self) -> &str {
        "Get the cafeteria operating hours."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        empty_schema()
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        Ok(serde_json::json!({
            "cafeteria": "Mon-Fri 8:00-20:00, Sat 9:00-16:00"
        }))
    }
}

pub struct LibraryHoursTool;

#[async_trait]
impl Tool for LibraryHoursTool {
    fn name(&self) -> &str {
        "get_library_hours"
    }

    fn description(&self) -> &str {
        "Get the library operating hours."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        empty_schema()
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        Ok(serde_json::json!({
            "library": "Mon-Sun 07:00-23:00"
        }))
    }
}

pub struct EventScheduleTool;

#[async_trait]
impl Tool for EventScheduleTool {
    fn name(&self) -> &str {
        "get_event_schedule"
    }

    fn description(&self) -> &str {
        "Get the upcoming campus event schedule."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        empty_schema()
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        Ok(serde_json::json!([
            { "title": "Orientation", "date": "2025-10-01", "time": "10:00" },
            { "title": "Tech Symposium", "date": "2025-10-15", "location": "Main Auditorium" },
            { "title": "Career Fair", "date": "2025-10-20", "location": "Student Center" }
        ]))
    }
}
