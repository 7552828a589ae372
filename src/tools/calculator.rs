//! Arithmetic toolkit.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{AttacheError, Result};
use crate::tool::{Tool, ToolRegistry};

pub fn calculator_toolkit() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(BinaryOpTool {
        name: "add",
        description: "Add two numbers. Expects {\"a\": number, \"b\": number}.",
        operation: "addition",
        apply: |a, b| Ok(a + b),
    });
    registry.register(BinaryOpTool {
        name: "subtract",
        description: "Subtract the second number from the first. Expects {\"a\": number, \"b\": number}.",
        operation: "subtraction",
        apply: |a, b| Ok(a - b),
    });
    registry.register(BinaryOpTool {
        name: "multiply",
        description: "Multiply two numbers. Expects {\"a\": number, \"b\": number}.",
        operation: "multiplication",
        apply: |a, b| Ok(a * b),
    });
    registry.register(BinaryOpTool {
        name: "divide",
        description: "Divide the first number by the second. Expects {\"a\": number, \"b\": number}.",
        operation: "division",
        apply: |a, b| {
            if b == 0.0 {
                Err("division by zero is undefined")
            } else {
                Ok(a / b)
            }
        },
    });
    registry.register(BinaryOpTool {
        name: "exponentiate",
        description: "Raise the first number to the power of the second. Expects {\"a\": number, \"b\": number}.",
        operation: "exponentiation",
        apply: |a, b| Ok(a.powf(b)),
    });
    registry.register(SquareRootTool);
    registry
}

/// Shared shape for the two-operand operations; keeps each entry to a name,
/// a label, and the arithmetic itself.
struct BinaryOpTool {
    name: &'static str,
    description: &'static str,
    operation: &'static str,
    apply: fn(f64, f64) -> std::result::Result<f64, &'static str>,
}

#[async_trait]
impl Tool for BinaryOpTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "a": { "type": "number" },
                "b": { "type": "number" }
            },
            "required": ["a", "b"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let a = number_field(&input, "a", self.name)?;
        let b = number_field(&input, "b", self.name)?;
        match (self.apply)(a, b) {
            Ok(result) => Ok(json!({ "operation": self.operation, "result": result })),
            // Domain errors are data for the model, not failures.
            Err(reason) => Ok(json!({ "operation": self.operation, "error": reason })),
        }
    }
}

struct SquareRootTool;

#[async_trait]
impl Tool for SquareRootTool {
    fn name(&self) -> &str {
        "square_root"
    }

    fn description(&self) -> &str {
        "Calculate the square root of a non-negative number. Expects {\"n\": number}."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": { "n": { "type": "number" } },
            "required": ["n"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let n = number_field(&input, "n", "square_root")?;
        if n < 0.0 {
            return Ok(json!({
                "operation": "square_root",
                "error": "square root of a negative number is undefined"
            }));
        }
        Ok(json!({ "operation": "square_root", "result": n.sqrt() }))
    }
}

fn number_field(input: &Value, field: &str, tool: &str) -> Result<f64> {
    input
        .get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| AttacheError::InvalidToolInput {
            tool: tool.to_string(),
            reason: format!("missing number field `{field}`"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn adds_numbers() {
        let registry = calculator_toolkit();
        let result = registry.call("add", json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(result["result"], 5.0);
    }

    #[tokio::test]
    async fn division_by_zero_is_reported_as_data() {
        let registry = calculator_toolkit();
        let result = registry
            .call("divide", json!({"a": 1, "b": 0}))
            .await
            .unwrap();
        assert!(result["error"].is_string());
    }

    #[tokio::test]
    async fn missing_operand_is_an_input_error() {
        let registry = calculator_toolkit();
        let err = registry.call("multiply", json!({"a": 2})).await.unwrap_err();
        assert!(matches!(err, AttacheError::ToolExecution { .. }));
    }

    #[tokio::test]
    async fn negative_square_root_is_reported_as_data() {
        let registry = calculator_toolkit();
        let result = registry
            .call("square_root", json!({"n": -4}))
            .await
            .unwrap();
        assert!(result["error"].is_string());
    }
}
