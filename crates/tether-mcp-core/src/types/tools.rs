use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool definition as listed by a server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// Tool name (unique identifier).
    pub name: String,

    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for input parameters.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,

    /// Optional JSON Schema for structured output.
    #[serde(rename = "outputSchema", skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

/// `tools/list` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResponse {
    pub tools: Vec<Tool>,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// `tools/call` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// `tools/call` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    #[serde(
        rename = "structuredContent",
        skip_serializing_if = "Option::is_none"
    )]
    pub structured_content: Option<Value>,
}

/// Content block inside a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "image")]
    Image {
        /// Base64-encoded payload.
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },

    #[serde(rename = "resource")]
    Resource { resource: Value },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_parses_wire_shape() {
        let raw = r#"{
            "name": "search",
            "description": "Full-text search",
            "inputSchema": {"type": "object", "properties": {"q": {"type": "string"}}}
        }"#;
        let tool: Tool = serde_json::from_str(raw).unwrap();
        assert_eq!(tool.name, "search");
        assert!(tool.output_schema.is_none());
    }

    #[test]
    fn tool_content_tagged_by_type() {
        let raw = r#"[{"type": "text", "text": "hello"},
                      {"type": "image", "data": "aGk=", "mimeType": "image/png"}]"#;
        let content: Vec<ToolContent> = serde_json::from_str(raw).unwrap();
        assert!(matches!(content[0], ToolContent::Text { .. }));
        assert!(matches!(content[1], ToolContent::Image { .. }));
    }
}
