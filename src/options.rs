//! Request-scoped configuration that shapes accumulation and finalization.

/// Declared response format of the originating request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Plain text; content is never parsed.
    #[default]
    Text,
    /// Free-form JSON mode; not auto-parseable (no schema to trust).
    JsonObject,
    /// Schema-constrained structured output. Content is parsed tolerantly
    /// while streaming and strictly at finalization.
    JsonSchema,
}

/// One tool the request advertised.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    /// Whether the tool's arguments should be parsed into a JSON value as
    /// they stream (the tool was registered with a schema).
    pub auto_parse: bool,
}

impl ToolSpec {
    #[must_use]
    pub fn parseable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auto_parse: true,
        }
    }

    #[must_use]
    pub fn opaque(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auto_parse: false,
        }
    }
}

/// Options carried from the originating request into the stream machinery.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub response_format: ResponseFormat,
    pub tools: Vec<ToolSpec>,
}

impl RequestOptions {
    /// Structured-output requests get tolerant in-flight parsing, strict
    /// final parsing, and the length/content-filter guard.
    #[must_use]
    pub fn auto_parse_content(&self) -> bool {
        self.response_format == ResponseFormat::JsonSchema
    }

    /// Whether the named tool's arguments should be parsed.
    #[must_use]
    pub fn auto_parse_tool(&self, name: &str) -> bool {
        self.tools
            .iter()
            .any(|tool| tool.auto_parse && tool.name == name)
    }

    /// Whether the guard against truncated structured output applies: the
    /// content is auto-parseable or any advertised tool is.
    #[must_use]
    pub fn guards_truncation(&self) -> bool {
        self.auto_parse_content() || self.tools.iter().any(|tool| tool.auto_parse)
    }
}
