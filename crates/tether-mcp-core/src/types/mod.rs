//! MCP entity types: tools, resources, prompts.

pub mod prompts;
pub mod resources;
pub mod tools;

pub use prompts::{GetPromptRequest, GetPromptResponse, ListPromptsResponse, Prompt};
pub use resources::{
    ListResourceTemplatesResponse, ListResourcesResponse, ReadResourceRequest,
    ReadResourceResponse, Resource, ResourceContents, ResourceTemplate,
};
pub use tools::{ListToolsResponse, Tool, ToolCallRequest, ToolCallResponse, ToolContent};
