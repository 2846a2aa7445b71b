//! Built-in tool implementations for Campusd.
//!
//! Tools give the reasoning service the ability to act on the campus data
//! store: manage student records, compute analytics aggregates, answer
//! campus-info questions, and send (mock) notifications.
//!
//! There is exactly one catalogue; every tool goes through the same
//! `CampusStore` trait and the same registry dispatch boundary.

pub mod analytics;
pub mod campus_info;
pub mod notify;
pub mod students;

use campusd_core::store::CampusStore;
use campusd_core::tool::ToolRegistry;
use std::sync::Arc;

/// Create the default tool registry with the full campus catalogue.
///
/// The registry presents specs in stable lexicographic order, so the
/// reasoning service sees an identical function list on every call.
pub fn default_registry(store: Arc<dyn CampusStore>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Box::new(students::AddStudentTool::new(store.clone())));
    registry.register(Box::new(students::GetStudentTool::new(store.clone())));
    registry.register(Box::new(students::UpdateStudentTool::new(store.clone())));
    registry.register(Box::new(students::DeleteStudentTool::new(store.clone())));
    registry.register(Box::new(students::ListStudentsTool::new(store.clone())));

    registry.register(Box::new(analytics::TotalStudentsTool::new(store.clone())));
    registry.register(Box::new(analytics::StudentsByDepartmentTool::new(
        store.clone(),
    )));
    registry.register(Box::new(analytics::RecentStudentsTool::new(store.clone())));
    registry.register(Box::new(analytics::ActiveStudentsTool::new(store.clone())));

    registry.register(Box::new(campus_info::CafeteriaTimingsTool));
    registry.register(Box::new(campus_info::LibraryHoursTool));
    registry.register(Box::new(campus_info::EventScheduleTool));

    registry.register(Box::new(notify::SendEmailTool::new(store.clone())));
    registry.register(Box::new(notify::LogActivityTool::new(store)));

    registry
}
