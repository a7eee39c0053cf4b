//! Tool/resource/prompt/capability types decoded from raw JSON-RPC payloads
//! (spec §3 "Data model").

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Definition of an MCP tool, as advertised by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Server this tool belongs to.
    pub server: String,
    /// Human-readable description.
    pub description: Option<String>,
    /// JSON Schema for input parameters.
    #[serde(default = "default_schema", rename = "inputSchema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    serde_json::json!({"type": "object"})
}

impl ToolDefinition {
    /// Create a bare tool definition with a permissive schema.
    #[must_use]
    pub fn new(name: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server: server.into(),
            description: None,
            input_schema: default_schema(),
        }
    }

    /// Parse one entry of a `tools/list` result's `tools` array.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` doesn't deserialize as a tool entry.
    pub fn from_json(value: &Value, server: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct Raw {
            name: String,
            description: Option<String>,
            #[serde(rename = "inputSchema", default = "default_schema")]
            input_schema: Value,
        }
        let raw: Raw = serde_json::from_value(value.clone())?;
        Ok(Self {
            name: raw.name,
            server: server.to_string(),
            description: raw.description,
            input_schema: raw.input_schema,
        })
    }

    /// The fully qualified identifier, `<server>:<tool>`.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.server, self.name)
    }

    /// The `mcp://` resource URI for this tool.
    #[must_use]
    pub fn resource_uri(&self) -> String {
        format!("mcp://{}:{}", self.server, self.name)
    }
}

/// Result of calling a tool via `tools/execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the call succeeded.
    pub success: bool,
    /// Content blocks returned by the tool.
    pub content: Vec<ToolContent>,
    /// Error message, set when `is_error` is true.
    pub error: Option<String>,
    /// Whether the server reported `isError: true`.
    pub is_error: bool,
}

impl ToolResult {
    /// Build a successful text result.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: vec![ToolContent::Text {
                text: content.into(),
            }],
            error: None,
            is_error: false,
        }
    }

    /// Build an error result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        let msg = message.into();
        Self {
            success: false,
            content: vec![ToolContent::Text { text: msg.clone() }],
            error: Some(msg),
            is_error: true,
        }
    }

    /// Concatenate all text content blocks with newlines.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parse a `tools/execute` JSON-RPC result payload.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` doesn't deserialize as a tool result.
    pub fn from_json(value: &Value) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            content: Vec<ToolContent>,
            #[serde(default, rename = "isError")]
            is_error: bool,
        }
        let raw: Raw = serde_json::from_value(value.clone())?;
        let error = if raw.is_error {
            let text = raw
                .content
                .iter()
                .filter_map(|c| match c {
                    ToolContent::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            Some(if text.is_empty() {
                "unknown error".to_string()
            } else {
                text
            })
        } else {
            None
        };
        Ok(Self {
            success: !raw.is_error,
            content: raw.content,
            error,
            is_error: raw.is_error,
        })
    }
}

/// Content block returned from a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// Base64-encoded image.
    Image {
        /// Base64-encoded image data.
        data: String,
        /// MIME type.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// An embedded or linked resource.
    Resource {
        /// Resource URI.
        uri: String,
        /// Inline data, if embedded.
        data: Option<String>,
        /// MIME type.
        #[serde(rename = "mimeType")]
        mime_type: Option<String>,
    },
}

/// Definition of an MCP resource, as advertised by `resources/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDefinition {
    /// Resource URI.
    pub uri: String,
    /// Server this resource belongs to.
    pub server: String,
    /// Human-readable name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// MIME type.
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
}

impl ResourceDefinition {
    /// Parse one entry of a `resources/list` result's `resources` array.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` doesn't deserialize as a resource entry.
    pub fn from_json(value: &Value, server: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct Raw {
            uri: String,
            name: String,
            description: Option<String>,
            #[serde(rename = "mimeType")]
            mime_type: Option<String>,
        }
        let raw: Raw = serde_json::from_value(value.clone())?;
        Ok(Self {
            uri: raw.uri,
            server: server.to_string(),
            name: raw.name,
            description: raw.description,
            mime_type: raw.mime_type,
        })
    }
}

/// Content returned from `resources/get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceContent {
    /// Resource URI.
    pub uri: String,
    /// Text content, for text resources.
    pub text: Option<String>,
    /// Base64-encoded binary content, for blob resources.
    pub blob: Option<String>,
    /// MIME type.
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
}

impl ResourceContent {
    /// Parse a `resources/get` JSON-RPC result payload. Accepts either the
    /// bare content object or a `{"contents": [..]}` wrapper, taking the
    /// first entry in the latter case.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` doesn't deserialize as resource content.
    pub fn from_json(value: &Value) -> Result<Self, serde_json::Error> {
        if let Some(contents) = value.get("contents").and_then(Value::as_array) {
            if let Some(first) = contents.first() {
                return serde_json::from_value(first.clone());
            }
        }
        serde_json::from_value(value.clone())
    }
}

/// Definition of an MCP prompt, as advertised by `prompts/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDefinition {
    /// Prompt name.
    pub name: String,
    /// Server this prompt belongs to.
    pub server: String,
    /// Description.
    pub description: Option<String>,
    /// Argument schema, if the prompt takes arguments.
    pub arguments: Option<Vec<PromptArgument>>,
}

impl PromptDefinition {
    /// Parse one entry of a `prompts/list` result's `prompts` array.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` doesn't deserialize as a prompt entry.
    pub fn from_json(value: &Value, server: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct Raw {
            name: String,
            description: Option<String>,
            arguments: Option<Vec<PromptArgument>>,
        }
        let raw: Raw = serde_json::from_value(value.clone())?;
        Ok(Self {
            name: raw.name,
            server: server.to_string(),
            description: raw.description,
            arguments: raw.arguments,
        })
    }
}

/// A single prompt argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Whether the argument is required.
    #[serde(default)]
    pub required: bool,
}

/// Content returned from `prompts/get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptContent {
    /// Description of the rendered prompt.
    pub description: Option<String>,
    /// Rendered messages.
    pub messages: Vec<PromptMessage>,
}

/// A single message within a rendered prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Role of the message sender (`user` or `assistant`).
    pub role: String,
    /// Text content of the message.
    pub content: String,
}

impl PromptContent {
    /// Parse a `prompts/get` JSON-RPC result payload.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` doesn't deserialize as prompt content.
    pub fn from_json(value: &Value) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct RawMessage {
            role: String,
            content: RawMessageContent,
        }
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawMessageContent {
            Text { text: String },
            Other(Value),
        }
        #[derive(Deserialize)]
        struct Raw {
            description: Option<String>,
            #[serde(default)]
            messages: Vec<RawMessage>,
        }
        let raw: Raw = serde_json::from_value(value.clone())?;
        Ok(Self {
            description: raw.description,
            messages: raw
                .messages
                .into_iter()
                .map(|m| PromptMessage {
                    role: m.role,
                    content: match m.content {
                        RawMessageContent::Text { text } => text,
                        RawMessageContent::Other(v) => v.to_string(),
                    },
                })
                .collect(),
        })
    }
}

/// Whether the server supports `tools/list` and/or `tools/execute`,
/// independently — a server may advertise one without the other (spec
/// Invariant 2: a tool may be invoked only if `tools.execute` was
/// advertised).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolsCapability {
    /// Whether the server supports `tools/list`.
    #[serde(default)]
    pub list: bool,
    /// Whether the server supports `tools/execute`.
    #[serde(default)]
    pub execute: bool,
}

/// Capabilities a server advertised during `initialize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ServerCapabilities {
    /// `tools/list` and `tools/execute` support, tracked independently.
    #[serde(default)]
    pub tools: ToolsCapability,
    /// Whether the server supports `resources/*`.
    #[serde(default)]
    pub resources: bool,
    /// Whether the server supports `prompts/*`.
    #[serde(default)]
    pub prompts: bool,
    /// Whether the server supports sampling requests.
    #[serde(default)]
    pub sampling: bool,
    /// Whether the server supports elicitation requests.
    #[serde(default)]
    pub elicitation: bool,
}

impl ServerCapabilities {
    /// Parse the `capabilities` object of an `initialize` result.
    /// `tools.list`/`tools.execute` are read as independent booleans off the
    /// `tools` sub-object (e.g. `{tools:{list:true,execute:false}}`);
    /// `resources`/`prompts`/`sampling`/`elicitation` remain presence-only
    /// flags (any value, including `{}`, indicates support).
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        let tools = value
            .get("tools")
            .map(|t| ToolsCapability {
                list: t.get("list").and_then(Value::as_bool).unwrap_or(false),
                execute: t.get("execute").and_then(Value::as_bool).unwrap_or(false),
            })
            .unwrap_or_default();
        let has = |key: &str| value.get(key).is_some();
        Self {
            tools,
            resources: has("resources"),
            prompts: has("prompts"),
            sampling: has("sampling"),
            elicitation: has("elicitation"),
        }
    }

    /// Check whether `capability` (dotted, e.g. `"tools.execute"`) is
    /// supported, per spec §4.D's capability gating. Matches the full
    /// dotted path, not just its first segment — `tools.list` and
    /// `tools.execute` are distinct checks.
    #[must_use]
    pub fn supports(&self, capability: &str) -> bool {
        match capability {
            "tools" => self.tools.list || self.tools.execute,
            "tools.list" => self.tools.list,
            "tools.execute" => self.tools.execute,
            "resources" | "resources.get" | "resources.list" => self.resources,
            "prompts" | "prompts.get" | "prompts.list" => self.prompts,
            "sampling" => self.sampling,
            "elicitation" => self.elicitation,
            _ => false,
        }
    }
}

/// Server identity and capabilities, captured from the `initialize` result.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    /// Server id.
    pub name: String,
    /// Negotiated protocol version.
    pub protocol_version: String,
    /// Advertised capabilities.
    pub capabilities: ServerCapabilities,
    /// Free-form instructions for the calling agent, if any.
    pub instructions: Option<String>,
}

impl ServerInfo {
    /// Parse an `initialize` JSON-RPC result payload.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` doesn't deserialize as an initialize
    /// result.
    pub fn from_json(value: &Value, name: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "protocolVersion")]
            protocol_version: String,
            #[serde(default)]
            capabilities: Value,
            instructions: Option<String>,
        }
        let raw: Raw = serde_json::from_value(value.clone())?;
        Ok(Self {
            name: name.to_string(),
            protocol_version: raw.protocol_version,
            capabilities: ServerCapabilities::from_json(&raw.capabilities),
            instructions: raw.instructions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_definition_full_name_and_uri() {
        let tool = ToolDefinition::new("read_file", "filesystem");
        assert_eq!(tool.full_name(), "filesystem:read_file");
        assert_eq!(tool.resource_uri(), "mcp://filesystem:read_file");
    }

    #[test]
    fn tool_definition_parses_from_list_entry() {
        let value = json!({
            "name": "read_file",
            "description": "Reads a file",
            "inputSchema": {"type": "object", "required": ["path"]}
        });
        let tool = ToolDefinition::from_json(&value, "filesystem").unwrap();
        assert_eq!(tool.name, "read_file");
        assert_eq!(tool.server, "filesystem");
        assert_eq!(tool.input_schema["required"][0], "path");
    }

    #[test]
    fn tool_result_text_and_error_helpers() {
        let ok = ToolResult::text("hello");
        assert!(ok.success);
        assert_eq!(ok.text_content(), "hello");

        let err = ToolResult::error("boom");
        assert!(err.is_error);
        assert_eq!(err.error, Some("boom".to_string()));
    }

    #[test]
    fn tool_result_parses_error_flag_from_json() {
        let value = json!({
            "content": [{"type": "text", "text": "bad args"}],
            "isError": true
        });
        let result = ToolResult::from_json(&value).unwrap();
        assert!(result.is_error);
        assert_eq!(result.error, Some("bad args".to_string()));
    }

    #[test]
    fn resource_content_unwraps_contents_array() {
        let value = json!({
            "contents": [{"uri": "file:///a.txt", "text": "hi", "mimeType": "text/plain"}]
        });
        let content = ResourceContent::from_json(&value).unwrap();
        assert_eq!(content.uri, "file:///a.txt");
        assert_eq!(content.text, Some("hi".to_string()));
    }

    #[test]
    fn server_capabilities_detect_presence_not_value() {
        let caps = ServerCapabilities::from_json(&json!({"tools": {}, "resources": null}));
        assert!(caps.resources);
        assert!(!caps.prompts);
    }

    #[test]
    fn server_capabilities_tools_list_and_execute_are_independent() {
        let list_only = ServerCapabilities::from_json(&json!({"tools": {"list": true, "execute": false}}));
        assert!(list_only.supports("tools.list"));
        assert!(!list_only.supports("tools.execute"));

        let both = ServerCapabilities::from_json(&json!({"tools": {"list": true, "execute": true}}));
        assert!(both.supports("tools.list"));
        assert!(both.supports("tools.execute"));

        let neither = ServerCapabilities::from_json(&json!({"tools": {}}));
        assert!(!neither.supports("tools.list"));
        assert!(!neither.supports("tools.execute"));
    }

    #[test]
    fn server_capabilities_supports_checks_dotted_names() {
        let caps = ServerCapabilities::from_json(&json!({"tools": {"execute": true}}));
        assert!(caps.supports("tools.execute"));
        assert!(!caps.supports("resources.get"));
    }

    #[test]
    fn server_info_parses_initialize_result() {
        let value = json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {"list": true, "execute": true}},
            "instructions": "be nice"
        });
        let info = ServerInfo::from_json(&value, "srv-1").unwrap();
        assert_eq!(info.protocol_version, "2024-11-05");
        assert!(info.capabilities.supports("tools.execute"));
        assert_eq!(info.instructions, Some("be nice".to_string()));
    }
}
