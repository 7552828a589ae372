//! Executive-assistant toolkit: notifications, briefings, and task triage.

use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::Local;
use regex::Regex;
use serde_json::{json, Value};

use crate::error::Result;
use crate::tool::{Tool, ToolRegistry};

use super::{optional_str, required_str, required_str_list};

pub fn briefing_toolkit() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(SendNotificationTool);
    registry.register(ExtractActionItemsTool);
    registry.register(ResearchTopicTool);
    registry.register(CreateBriefingTool);
    registry.register(PrioritizeTasksTool);
    registry
}

struct SendNotificationTool;

#[async_trait]
impl Tool for SendNotificationTool {
    fn name(&self) -> &str {
        "send_notification"
    }

    fn description(&self) -> &str {
        "Send a notification. Expects {\"recipient\": string, \"subject\": string, \
         \"message\": string, \"priority\": string (optional: low, normal, high, urgent)}."
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let recipient = required_str(&input, "recipient", "send_notification")?;
        let subject = required_str(&input, "subject", "send_notification")?;
        let _message = required_str(&input, "message", "send_notification")?;
        let priority = optional_str(&input, "priority").unwrap_or("normal");

        Ok(json!({
            "recipient": recipient,
            "subject": subject,
            "priority": priority.to_uppercase(),
            "status": "delivered",
        }))
    }
}

struct ExtractActionItemsTool;

#[async_trait]
impl Tool for ExtractActionItemsTool {
    fn name(&self) -> &str {
        "extract_action_items"
    }

    fn description(&self) -> &str {
        "Extract action items from meeting notes. Expects {\"meeting_notes\": string}."
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let notes = required_str(&input, "meeting_notes", "extract_action_items")?;
        let items = scan_action_items(notes);
        if items.is_empty() {
            return Ok(json!({
                "action_items": [],
                "note": "No action items identified in meeting notes.",
            }));
        }
        Ok(json!({ "action_items": items }))
    }
}

struct ResearchTopicTool;

#[async_trait]
impl Tool for ResearchTopicTool {
    fn name(&self) -> &str {
        "research_topic"
    }

    fn description(&self) -> &str {
        "Research a topic and provide a summary. Expects {\"topic\": string, \
         \"max_sources\": number (optional)}."
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let topic = required_str(&input, "topic", "research_topic")?;
        let max_sources = input
            .get("max_sources")
            .and_then(Value::as_u64)
            .unwrap_or(5);

        Ok(json!({
            "topic": topic,
            "key_findings": [
                format!("Initial research indicates {topic} is an important area"),
                "Multiple perspectives and approaches exist",
                "Further investigation recommended",
            ],
            "sources_analyzed": max_sources,
            "confidence": "medium",
            "last_updated": Local::now().format("%Y-%m-%d").to_string(),
            "note": "For comprehensive research, specify a focus area or specific questions.",
        }))
    }
}

struct CreateBriefingTool;

#[async_trait]
impl Tool for CreateBriefingTool {
    fn name(&self) -> &str {
        "create_briefing"
    }

    fn description(&self) -> &str {
        "Create an executive briefing. Expects {\"topics\": [string], \
         \"briefing_type\": string (optional: daily, weekly, monthly)}."
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let topics = required_str_list(&input, "topics", "create_briefing")?;
        let briefing_type = optional_str(&input, "briefing_type").unwrap_or("daily");

        let sections: Vec<Value> = topics
            .iter()
            .map(|topic| {
                json!({
                    "topic": topic,
                    "status": "in progress",
                    "key_metrics": "TBD",
                    "action_items": "TBD",
                })
            })
            .collect();

        Ok(json!({
            "briefing_type": briefing_type.to_uppercase(),
            "generated": Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            "sections": sections,
        }))
    }
}

struct PrioritizeTasksTool;

#[async_trait]
impl Tool for PrioritizeTasksTool {
    fn name(&self) -> &str {
        "prioritize_tasks"
    }

    fn description(&self) -> &str {
        "Prioritize a list of tasks. Expects {\"tasks\": [string], \
         \"criteria\": string (optional: importance, urgency, impact, deadline)}."
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let mut tasks = required_str_list(&input, "tasks", "prioritize_tasks")?;
        let criteria = optional_str(&input, "criteria").unwrap_or("importance");

        // Longer descriptions rank first; a stand-in for real triage.
        tasks.sort_by_key(|task| std::cmp::Reverse(task.len()));

        Ok(json!({
            "criteria": criteria.to_uppercase(),
            "prioritized": tasks,
        }))
    }
}

/// Sentence-level keyword scan; at most five items survive.
fn scan_action_items(notes: &str) -> Vec<String> {
    static MARKERS: OnceLock<Regex> = OnceLock::new();
    let markers = MARKERS.get_or_init(|| {
        Regex::new(r"(?i)\b(action|todo|follow[- ]?up|need to|must)\b").expect("valid pattern")
    });

    notes
        .split('.')
        .map(str::trim)
        .filter(|sentence| markers.is_match(sentence))
        .take(5)
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toolkit_registers_in_order() {
        let registry = briefing_toolkit();
        assert_eq!(
            registry.names(),
            vec![
                "send_notification",
                "extract_action_items",
                "research_topic",
                "create_briefing",
                "prioritize_tasks",
            ]
        );
    }

    #[test]
    fn action_item_scan_matches_markers_case_insensitively() {
        let notes = "We met at noon. Alice MUST send the deck. \
                     Bob will follow up with legal. The weather was fine.";
        let items = scan_action_items(notes);
        assert_eq!(items.len(), 2);
        assert!(items[0].contains("MUST"));
    }

    #[test]
    fn action_item_scan_caps_at_five() {
        let notes = "todo one. todo two. todo three. todo four. todo five. todo six.";
        assert_eq!(scan_action_items(notes).len(), 5);
    }

    #[tokio::test]
    async fn prioritizes_longest_first() {
        let registry = briefing_toolkit();
        let result = registry
            .call(
                "prioritize_tasks",
                json!({"tasks": ["short", "a much longer task description", "medium task"]}),
            )
            .await
            .unwrap();

        let ranked = result["prioritized"].as_array().unwrap();
        assert_eq!(ranked[0], "a much longer task description");
        assert_eq!(ranked[2], "short");
    }

    #[tokio::test]
    async fn empty_notes_yield_no_items() {
        let registry = briefing_toolkit();
        let result = registry
            .call("extract_action_items", json!({"meeting_notes": "Nothing happened."}))
            .await
            .unwrap();
        assert_eq!(result["action_items"].as_array().unwrap().len(), 0);
    }
}
