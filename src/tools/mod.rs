//! Built-in toolkits and registry assembly.

pub mod briefing;
pub mod calculator;
pub mod schedule;
pub mod web_search;

use serde_json::Value;

use crate::config::AppConfig;
use crate::error::AttacheError;
use crate::tool::ToolRegistry;

pub use web_search::WebSearchConfig;

/// Assemble the full tool registry for a configured agent.
///
/// Order is deterministic: calculator, web search, then the assistant
/// toolkits. The flag-gated toolkits drop out cleanly when disabled; the
/// assistant toolkits are always present.
pub fn build_registry(cfg: &AppConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    if cfg.tools.enable_calculator {
        registry.merge(calculator::calculator_toolkit());
    }
    if cfg.tools.enable_web_search {
        registry.merge(web_search::web_search_toolkit(WebSearchConfig {
            timeout_secs: cfg.agent.timeout_seconds,
            ..WebSearchConfig::default()
        }));
    }
    registry.merge(schedule::schedule_toolkit());
    registry.merge(briefing::briefing_toolkit());

    for toolkit in omitted_builtins(cfg) {
        tracing::warn!(%toolkit, "optional toolkit omitted; its tools are unavailable");
    }
    tracing::info!(tools = registry.len(), "tool registry assembled");
    registry
}

/// Names of the flag-gated built-in toolkits absent from this registry.
fn omitted_builtins(cfg: &AppConfig) -> Vec<&'static str> {
    let mut omitted = Vec::new();
    if !cfg.tools.enable_calculator {
        omitted.push("calculator");
    }
    if !cfg.tools.enable_web_search {
        omitted.push("web_search");
    }
    omitted
}

fn required_str<'a>(input: &'a Value, field: &str, tool: &str) -> crate::error::Result<&'a str> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| AttacheError::InvalidToolInput {
            tool: tool.to_string(),
            reason: format!("missing string field `{field}`"),
        })
}

fn required_str_list(input: &Value, field: &str, tool: &str) -> crate::error::Result<Vec<String>> {
    input
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .ok_or_else(|| AttacheError::InvalidToolInput {
            tool: tool.to_string(),
            reason: format!("missing list field `{field}`"),
        })
}

fn optional_str<'a>(input: &'a Value, field: &str) -> Option<&'a str> {
    input.get(field).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn registry_order_is_deterministic() {
        let cfg = AppConfig::default();
        let registry = build_registry(&cfg);
        let names = registry.names();

        // Calculator and search first, assistant toolkits after.
        assert_eq!(names.first(), Some(&"add"));
        assert!(names.contains(&"web_search"));
        assert!(names.contains(&"get_current_time"));
        assert!(names.contains(&"prioritize_tasks"));

        let time_pos = names.iter().position(|n| *n == "get_current_time").unwrap();
        let search_pos = names.iter().position(|n| *n == "web_search").unwrap();
        assert!(search_pos < time_pos);
    }

    #[test]
    fn disabled_toolkits_drop_out() {
        let mut cfg = AppConfig::default();
        cfg.tools.enable_calculator = false;
        cfg.tools.enable_web_search = false;

        let registry = build_registry(&cfg);
        let names = registry.names();
        assert!(!names.contains(&"add"));
        assert!(!names.contains(&"web_search"));
        // The assistant toolkits are unconditional.
        assert_eq!(names.len(), 9);
        assert_eq!(names.first(), Some(&"get_current_time"));
    }

    #[test]
    fn omitted_builtins_are_reported() {
        let mut cfg = AppConfig::default();
        assert!(omitted_builtins(&cfg).is_empty());

        cfg.tools.enable_calculator = false;
        assert_eq!(omitted_builtins(&cfg), vec!["calculator"]);

        cfg.tools.enable_web_search = false;
        assert_eq!(omitted_builtins(&cfg), vec!["calculator", "web_search"]);
    }
}
