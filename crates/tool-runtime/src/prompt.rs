//! System prompt rendering.
//!
//! The agent's `system_prompt` is a minijinja template. It is rendered once
//! per session with the resolved tool catalog available as `tools`, so a
//! text-only model can be told which tools exist and how to call them.

use serde::Serialize;
use serde_json::Value;

use crate::tool::ToolDescriptor;

#[derive(Debug, thiserror::Error)]
#[error("system prompt template error: {0}")]
pub struct TemplateError(String);

/// What one tool looks like inside the template.
#[derive(Debug, Clone, Serialize)]
pub struct PromptTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
}

#[derive(Debug, Serialize)]
struct PromptContext<'a> {
    tools: &'a [PromptTool],
}

fn build_env() -> minijinja::Environment<'static> {
    let mut env = minijinja::Environment::new();
    env.add_filter("tojson_pretty", tojson_pretty);
    env
}

/// Render `template` with `tools` in scope.
pub fn render_system_prompt(template: &str, tools: &[ToolDescriptor]) -> Result<String, TemplateError> {
    let tools: Vec<PromptTool> = tools
        .iter()
        .map(|t| PromptTool {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: t.input_schema.clone(),
            output_schema: t.output_schema.clone(),
        })
        .collect();
    build_env()
        .render_str(template, PromptContext { tools: &tools })
        .map_err(|e| TemplateError(e.to_string()))
}

/// Filter: indented JSON, for schemas.
fn tojson_pretty(value: minijinja::Value) -> Result<String, minijinja::Error> {
    let json: Value = serde_json::to_value(&value).map_err(|e| {
        minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string())
    })?;
    serde_json::to_string_pretty(&json)
        .map_err(|e| minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestria_core::SecretMap;
    use std::path::PathBuf;

    fn tool(name: &str, description: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: serde_json::json!({}),
            entrypoint: vec!["true".into()],
            working_directory: PathBuf::from("."),
            secrets: SecretMap::default(),
        }
    }

    #[test]
    fn test_render_tool_catalog() {
        let tools = vec![tool("weather", "Current weather"), tool("search", "Web search")];
        let template = "Tools:{% for t in tools %}\n- {{ t.name }}: {{ t.description }}{% endfor %}";
        let rendered = render_system_prompt(template, &tools).unwrap();
        assert_eq!(rendered, "Tools:\n- weather: Current weather\n- search: Web search");
    }

    #[test]
    fn test_render_schema_filter() {
        let rendered =
            render_system_prompt("{{ tools[0].input_schema | tojson_pretty }}", &[tool("a", "")]).unwrap();
        assert_eq!(rendered, "{\n  \"type\": \"object\"\n}");
    }

    #[test]
    fn test_render_without_tools() {
        assert_eq!(render_system_prompt("Be brief.", &[]).unwrap(), "Be brief.");
    }

    #[test]
    fn test_invalid_template() {
        assert!(render_system_prompt("{% for t in %}", &[]).is_err());
    }
}
