//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Image and document blocks sent as base64 sources

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use copilot_core::content::{ContentBlock, DocumentFormat, PromptContent, ToolUse};
use copilot_core::error::ProviderError;
use copilot_core::provider::{Prompt, ProviderResponse, Role};
use copilot_core::tool::{Collection, ResultStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.7,
            client: build_client(DEFAULT_TIMEOUT),
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Whole-request timeout; surfaces as [`ProviderError::Timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    /// Build the JSON body for `prompt`.
    fn request_body(&self, prompt: &Prompt) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "system": prompt.system,
            "messages": to_api_messages(prompt),
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let tools = to_api_tools(&prompt.tool_config.tools);
        if !tools.is_empty() {
            body["tools"] = serde_json::json!(tools);
        }

        body
    }

    /// Convert Anthropic API response to our ProviderResponse.
    fn response_to_provider_response(resp: AnthropicResponse) -> ProviderResponse {
        let mut response = ProviderResponse::default();

        for block in resp.content {
            match block {
                ResponseContentBlock::Text { text } => {
                    if !text.is_empty() {
                        response.content.push(ContentBlock::Text { text });
                    }
                }
                ResponseContentBlock::ToolUse { id, name, input } => {
                    response.tool_uses.push(ToolUse {
                        tool_use_id: id,
                        name,
                        input,
                    });
                }
                ResponseContentBlock::Other => {
                    trace!(provider = "anthropic", "Skipping unsupported response block");
                }
            }
        }

        debug!(
            provider = "anthropic",
            model = %resp.model,
            stop_reason = resp.stop_reason.as_deref().unwrap_or("unknown"),
            input_tokens = resp.usage.input_tokens,
            output_tokens = resp.usage.output_tokens,
            "Received response"
        );

        response
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

#[async_trait]
impl copilot_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn converse(&self, prompt: &Prompt) -> Result<ProviderResponse, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(
                "no API key set (COPILOT_API_KEY or ANTHROPIC_API_KEY)".into(),
            ));
        }

        let url = format!("{}/v1/messages", self.base_url);
        let body = self.request_body(prompt);

        debug!(
            provider = "anthropic",
            model = %self.model,
            messages = prompt.messages.len(),
            tools = prompt.tool_config.tools.len(),
            "Sending converse request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_resp: AnthropicResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse Anthropic response: {e}"),
            })?;

        Ok(Self::response_to_provider_response(api_resp))
    }
}

/// Convert prompt messages to API messages, merging consecutive same-role messages.
fn to_api_messages(prompt: &Prompt) -> Vec<AnthropicMessage> {
    let mut result: Vec<AnthropicMessage> = Vec::new();

    for msg in &prompt.messages {
        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let blocks = to_api_blocks(&msg.content);
        if blocks.is_empty() {
            continue;
        }

        match result.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => result.push(AnthropicMessage {
                role: role.into(),
                content: blocks,
            }),
        }
    }

    result
}

fn to_api_blocks(content: &PromptContent) -> Vec<ApiBlock> {
    match content {
        PromptContent::Content(block) => to_api_content(block).into_iter().collect(),
        PromptContent::ToolUse(tool_use) => vec![ApiBlock::ToolUse {
            id: tool_use.tool_use_id.clone(),
            name: tool_use.name.clone(),
            input: tool_use.input.clone(),
        }],
        PromptContent::ToolResult(result) => vec![ApiBlock::ToolResult {
            tool_use_id: result.tool_use_id.clone(),
            is_error: result.status == ResultStatus::Error,
            content: result.content.iter().filter_map(to_api_content).collect(),
        }],
    }
}

/// `None` for blocks the API would reject (empty text).
fn to_api_content(block: &ContentBlock) -> Option<ApiBlock> {
    match block {
        ContentBlock::Text { text } if text.is_empty() => None,
        ContentBlock::Text { text } => Some(ApiBlock::Text { text: text.clone() }),
        ContentBlock::Image { format, data } => Some(ApiBlock::Image {
            source: Source::Base64 {
                media_type: format.media_type().into(),
                data: STANDARD.encode(data),
            },
        }),
        ContentBlock::Document { name, format, data } => Some(document_block(name, *format, data)),
    }
}

fn document_block(name: &str, format: DocumentFormat, data: &[u8]) -> ApiBlock {
    match format {
        DocumentFormat::Pdf => ApiBlock::Document {
            title: name.into(),
            source: Source::Base64 {
                media_type: "application/pdf".into(),
                data: STANDARD.encode(data),
            },
        },
        f if f.is_textual() => ApiBlock::Document {
            title: name.into(),
            source: Source::Text {
                media_type: "text/plain".into(),
                data: String::from_utf8_lossy(data).into_owned(),
            },
        },
        other => ApiBlock::Text {
            text: format!(
                "[Document \"{name}\" ({}, {} bytes) cannot be attached in this format]",
                serde_json::to_value(other)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default(),
                data.len()
            ),
        },
    }
}

/// Convert the tool collection to Anthropic tool specs.
fn to_api_tools(tools: &Collection) -> Vec<AnthropicTool> {
    tools
        .iter()
        .map(|(name, tool)| AnthropicTool {
            name: name.into(),
            description: tool.description().map(str::to_string),
            input_schema: tool.input_schema(),
        })
        .collect()
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<ApiBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiBlock {
    Text {
        text: String,
    },
    Image {
        source: Source,
    },
    Document {
        title: String,
        source: Source,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        is_error: bool,
        content: Vec<ApiBlock>,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Source {
    Base64 { media_type: String, data: String },
    Text { media_type: String, data: String },
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use copilot_core::Provider;
    use copilot_core::content::{self, ImageFormat, ToolResultBlock};
    use copilot_core::provider::{PromptMessage, PromptMessages, ToolConfig};
    use copilot_core::tool::{ToolResult, tool_fn};

    fn prompt(messages: Vec<PromptMessage>, tools: Collection) -> Prompt {
        Prompt {
            system: "You are Copilot".into(),
            messages: PromptMessages::from_vec(messages).unwrap(),
            tool_config: ToolConfig { tools },
        }
    }

    #[test]
    fn constructor() {
        let provider = AnthropicProvider::new("sk-ant-test");
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
        assert_eq!(provider.model, DEFAULT_MODEL);
    }

    #[test]
    fn constructor_with_base_url() {
        let provider = AnthropicProvider::new("sk-ant-test").with_base_url("https://custom.proxy.com/");
        assert_eq!(provider.base_url, "https://custom.proxy.com");
    }

    #[test]
    fn consecutive_user_messages_are_merged() {
        let p = prompt(
            vec![
                PromptMessage::user(content::text(["context"])),
                PromptMessage::user(content::text(["find my files"])),
                PromptMessage::assistant(content::text(["Sure."])),
            ],
            Collection::new(),
        );
        let api = to_api_messages(&p);
        assert_eq!(api.len(), 2);
        assert_eq!(api[0].role, "user");
        assert_eq!(api[0].content.len(), 2);
        assert_eq!(api[1].role, "assistant");
    }

    #[test]
    fn tool_pairs_serialize_as_native_blocks() {
        let p = prompt(
            vec![
                PromptMessage::user(content::text(["go"])),
                PromptMessage::tool_use(ToolUse {
                    tool_use_id: "toolu_1".into(),
                    name: "search".into(),
                    input: serde_json::json!({"q": "cells"}),
                }),
                PromptMessage::tool_result(ToolResultBlock {
                    tool_use_id: "toolu_1".into(),
                    status: ResultStatus::Error,
                    content: vec![content::text(["Tool \"search\" failed: boom"])],
                }),
            ],
            Collection::new(),
        );
        let json = serde_json::to_value(to_api_messages(&p)).unwrap();
        assert_eq!(json[1]["role"], "assistant");
        assert_eq!(json[1]["content"][0]["type"], "tool_use");
        assert_eq!(json[1]["content"][0]["id"], "toolu_1");
        assert_eq!(json[2]["role"], "user");
        assert_eq!(json[2]["content"][0]["type"], "tool_result");
        assert_eq!(json[2]["content"][0]["is_error"], true);
        assert_eq!(json[2]["content"][0]["content"][0]["type"], "text");
    }

    #[test]
    fn binary_content_uses_base64_sources() {
        let image = to_api_content(&ContentBlock::Image {
            format: ImageFormat::Png,
            data: vec![1, 2, 3],
        })
        .unwrap();
        let json = serde_json::to_value(image).unwrap();
        assert_eq!(json["source"]["type"], "base64");
        assert_eq!(json["source"]["media_type"], "image/png");
        assert_eq!(json["source"]["data"], "AQID");

        let doc = to_api_content(&ContentBlock::Document {
            name: "notes".into(),
            format: DocumentFormat::Md,
            data: b"# Notes".to_vec(),
        })
        .unwrap();
        let json = serde_json::to_value(doc).unwrap();
        assert_eq!(json["type"], "document");
        assert_eq!(json["source"]["type"], "text");
        assert_eq!(json["source"]["data"], "# Notes");
    }

    #[test]
    fn unsupported_document_becomes_text_notice() {
        let block = document_block("report", DocumentFormat::Xlsx, &[0; 10]);
        let json = serde_json::to_value(block).unwrap();
        assert_eq!(json["type"], "text");
        assert!(json["text"].as_str().unwrap().contains("xlsx, 10 bytes"));
    }

    #[test]
    fn empty_text_is_dropped() {
        assert!(to_api_content(&content::text([""])).is_none());
    }

    #[test]
    fn request_body_includes_tools_in_name_order() {
        let noop = || {
            tool_fn(
                Some("does nothing"),
                serde_json::json!({"type": "object"}),
                |_| async { Ok::<Option<ToolResult>, copilot_core::ToolError>(None) },
            )
        };
        let tools = Collection::new().with("search", noop()).with("navigate", noop());
        let provider = AnthropicProvider::new("k").with_model("claude-3-5-haiku-latest");
        let body = provider.request_body(&prompt(vec![PromptMessage::user(content::text(["hi"]))], tools));

        assert_eq!(body["model"], "claude-3-5-haiku-latest");
        assert_eq!(body["system"], "You are Copilot");
        assert_eq!(body["tools"][0]["name"], "navigate");
        assert_eq!(body["tools"][1]["name"], "search");
        assert_eq!(body["tools"][1]["description"], "does nothing");
    }

    #[test]
    fn request_body_omits_empty_tools() {
        let provider = AnthropicProvider::new("k");
        let body = provider.request_body(&prompt(
            vec![PromptMessage::user(content::text(["hi"]))],
            Collection::new(),
        ));
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn parse_tool_use_response() {
        let resp: AnthropicResponse = serde_json::from_str(
            r#"{
                "id": "msg_02",
                "model": "claude-sonnet-4-20250514",
                "content": [
                    {"type": "thinking", "thinking": "I should search"},
                    {"type": "text", "text": "Let me search"},
                    {"type": "tool_use", "id": "toolu_abc", "name": "search", "input": {"q": "cells"}}
                ],
                "usage": {"input_tokens": 20, "output_tokens": 10},
                "stop_reason": "tool_use"
            }"#,
        )
        .unwrap();

        let pr = AnthropicProvider::response_to_provider_response(resp);
        assert_eq!(pr.content, vec![content::text(["Let me search"])]);
        assert_eq!(pr.tool_uses.len(), 1);
        assert_eq!(pr.tool_uses[0].tool_use_id, "toolu_abc");
        assert_eq!(pr.tool_uses[0].input["q"], "cells");
    }

    #[tokio::test]
    async fn missing_api_key_is_not_configured() {
        let provider = AnthropicProvider::new("");
        let err = provider
            .converse(&prompt(vec![PromptMessage::user(content::text(["hi"]))], Collection::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
