use crate::errors::ToolError;
use crate::utils::suggest::suggest;

pub fn unknown_tool_error(tool: &str, known_tools: &[String]) -> ToolError {
    let suggestions = if tool.trim().is_empty() {
        Vec::new()
    } else {
        suggest(tool, known_tools, 5)
    };
    let hint = if suggestions.is_empty() {
        "Call tools/list to see the available tools.".to_string()
    } else {
        format!(
            "Did you mean: {}? (tools/list has the full catalog)",
            suggestions.join(", ")
        )
    };
    ToolError::not_found(format!("Unknown tool: {}", tool))
        .with_hint(hint)
        .with_details(serde_json::json!({
            "did_you_mean": suggestions,
        }))
}
