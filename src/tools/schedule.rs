//! Calendar and scheduling toolkit.

use async_trait::async_trait;
use chrono::Local;
use serde_json::{json, Value};

use crate::error::{AttacheError, Result};
use crate::tool::{Tool, ToolRegistry};

use super::{optional_str, required_str, required_str_list};

pub fn schedule_toolkit() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(CurrentTimeTool);
    registry.register(ScheduleMeetingTool);
    registry.register(CreateReminderTool);
    registry.register(AnalyzeScheduleTool);
    registry
}

struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Useful for scheduling and time-sensitive queries."
    }

    async fn call(&self, _input: Value) -> Result<Value> {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        Ok(json!({ "current_time": now }))
    }
}

struct ScheduleMeetingTool;

#[async_trait]
impl Tool for ScheduleMeetingTool {
    fn name(&self) -> &str {
        "schedule_meeting"
    }

    fn description(&self) -> &str {
        "Schedule a meeting. Expects {\"title\": string, \"attendees\": [string], \
         \"date\": \"YYYY-MM-DD\", \"start_time\": \"HH:MM\", \"duration_minutes\": number (optional)}."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "attendees": { "type": "array", "items": { "type": "string" } },
                "date": { "type": "string" },
                "start_time": { "type": "string" },
                "duration_minutes": { "type": "number" }
            },
            "required": ["title", "attendees", "date", "start_time"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let title = required_str(&input, "title", "schedule_meeting")?;
        let attendees = required_str_list(&input, "attendees", "schedule_meeting")?;
        let date = required_str(&input, "date", "schedule_meeting")?;
        let start_time = required_str(&input, "start_time", "schedule_meeting")?;
        let duration_minutes = input
            .get("duration_minutes")
            .and_then(Value::as_i64)
            .unwrap_or(60);

        let end_time = add_minutes(start_time, duration_minutes).ok_or_else(|| {
            AttacheError::InvalidToolInput {
                tool: "schedule_meeting".into(),
                reason: format!("start_time `{start_time}` is not HH:MM"),
            }
        })?;

        Ok(json!({
            "title": title,
            "date": date,
            "start_time": start_time,
            "end_time": end_time,
            "duration_minutes": duration_minutes,
            "attendees": attendees,
            "status": "confirmation pending",
        }))
    }
}

struct CreateReminderTool;

#[async_trait]
impl Tool for CreateReminderTool {
    fn name(&self) -> &str {
        "create_reminder"
    }

    fn description(&self) -> &str {
        "Create a reminder for a task. Expects {\"task\": string, \"due_date\": \"YYYY-MM-DD\", \
         \"due_time\": \"HH:MM\" (optional), \"priority\": string (optional)}."
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let task = required_str(&input, "task", "create_reminder")?;
        let due_date = required_str(&input, "due_date", "create_reminder")?;
        let due_time = optional_str(&input, "due_time");
        let priority = optional_str(&input, "priority").unwrap_or("normal");

        Ok(json!({
            "task": task,
            "due": match due_time {
                Some(time) => format!("{due_date} at {time}"),
                None => format!("{due_date} anytime"),
            },
            "priority": priority.to_uppercase(),
            "status": "active",
            "alert_enabled": true,
        }))
    }
}

struct AnalyzeScheduleTool;

#[async_trait]
impl Tool for AnalyzeScheduleTool {
    fn name(&self) -> &str {
        "analyze_schedule"
    }

    fn description(&self) -> &str {
        "Analyze calendar events and suggest optimizations. Expects {\"events\": [string]}."
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let events = required_str_list(&input, "events", "analyze_schedule")?;
        Ok(json!({
            "events_analyzed": events.len(),
            "recommendations": [
                "Block focus time in the morning (9-11 AM)",
                "Batch meetings in the afternoon",
                "Leave buffer time between meetings",
                "Schedule breaks for administrative work",
            ],
        }))
    }
}

/// Add a duration to an HH:MM wall-clock time, carrying minutes into hours
/// and wrapping past midnight.
fn add_minutes(start: &str, minutes: i64) -> Option<String> {
    let (hours, mins) = start.split_once(':')?;
    let hours: i64 = hours.trim().parse().ok()?;
    let mins: i64 = mins.trim().parse().ok()?;
    if !(0..24).contains(&hours) || !(0..60).contains(&mins) {
        return None;
    }
    let total = (hours * 60 + mins + minutes).rem_euclid(24 * 60);
    Some(format!("{:02}:{:02}", total / 60, total % 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minute_overflow_carries_into_hours() {
        assert_eq!(add_minutes("10:45", 30).as_deref(), Some("11:15"));
        assert_eq!(add_minutes("09:00", 90).as_deref(), Some("10:30"));
    }

    #[test]
    fn end_time_wraps_past_midnight() {
        assert_eq!(add_minutes("23:30", 45).as_deref(), Some("00:15"));
    }

    #[test]
    fn malformed_start_time_is_rejected() {
        assert_eq!(add_minutes("25:00", 30), None);
        assert_eq!(add_minutes("noonish", 30), None);
    }

    #[tokio::test]
    async fn schedules_a_meeting() {
        let registry = schedule_toolkit();
        let result = registry
            .call(
                "schedule_meeting",
                json!({
                    "title": "Quarterly review",
                    "attendees": ["ana@example.com", "kit@example.com"],
                    "date": "2026-09-01",
                    "start_time": "14:00",
                    "duration_minutes": 45,
                }),
            )
            .await
            .unwrap();

        assert_eq!(result["end_time"], "14:45");
        assert_eq!(result["status"], "confirmation pending");
        assert_eq!(result["attendees"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn current_time_has_expected_shape() {
        let registry = schedule_toolkit();
        let result = registry.call("get_current_time", json!({})).await.unwrap();
        let stamp = result["current_time"].as_str().unwrap();
        // YYYY-MM-DD HH:MM:SS
        assert_eq!(stamp.len(), 19);
        assert_eq!(&stamp[4..5], "-");
        assert_eq!(&stamp[10..11], " ");
    }

    #[tokio::test]
    async fn reminder_defaults_to_anytime() {
        let registry = schedule_toolkit();
        let result = registry
            .call(
                "create_reminder",
                json!({"task": "File the report", "due_date": "2026-09-02"}),
            )
            .await
            .unwrap();
        assert_eq!(result["due"], "2026-09-02 anytime");
        assert_eq!(result["priority"], "NORMAL");
    }
}
