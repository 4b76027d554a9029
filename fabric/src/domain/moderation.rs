//! Moderation oracle client.
//!
//! The oracle itself is an external collaborator (see `spec.md` §1); this
//! module only owns the request/response shape and the tagged outcome that
//! replaces exception-based control flow in the source (§9).

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result of classifying one piece of content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationOutcome {
    /// Content passed review.
    Accepted,
    /// Content passed with a non-fatal note attached.
    Warning,
    /// Content was rejected; carries the oracle's stated reason.
    Rejected {
        /// Human-readable rejection reason, forwarded into the violation event.
        reason: String,
    },
}

#[derive(Debug, Deserialize)]
struct OracleResultBody {
    result: OracleResultTag,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
enum OracleResultTag {
    Accepted,
    Warning,
    Rejected,
}

#[derive(Debug, Serialize)]
struct OracleRequest<'a> {
    #[serde(rename = "userId")]
    user_id: &'a str,
    #[serde(rename = "newMessage")]
    new_message: OracleMessage<'a>,
    #[serde(rename = "appName")]
    app_name: &'a str,
    #[serde(rename = "sessionId")]
    session_id: &'a str,
}

#[derive(Debug, Serialize)]
struct OracleMessage<'a> {
    role: &'a str,
    parts: Vec<OraclePart<'a>>,
}

#[derive(Debug, Serialize)]
struct OraclePart<'a> {
    #[serde(rename = "inlineData")]
    inline_data: OracleInlineData<'a>,
}

#[derive(Debug, Serialize)]
struct OracleInlineData<'a> {
    data: String,
    #[serde(rename = "mimeType")]
    mime_type: &'a str,
    #[serde(rename = "displayName")]
    display_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct OracleResponse {
    parts: Vec<OracleResponsePart>,
}

#[derive(Debug, Deserialize)]
struct OracleResponsePart {
    text: String,
}

/// Errors calling the moderation oracle.
#[derive(Debug, Error)]
pub enum ModerationError {
    /// The HTTP request itself failed (network, timeout, non-2xx).
    #[error("moderation oracle request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The oracle replied with no text parts to parse.
    #[error("moderation oracle returned no response parts")]
    EmptyResponse,
    /// The (fence-stripped) response body was not the expected JSON shape.
    #[error("moderation oracle response was not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Thin client for the external moderation oracle (`spec.md` §6).
#[derive(Debug, Clone)]
pub struct ModerationClient {
    http: reqwest::Client,
    base_url: String,
    app_name: String,
}

impl ModerationClient {
    /// Build a client pointed at `base_url` (the oracle's origin, no trailing slash).
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            app_name: app_name.into(),
        }
    }

    /// Submit raw segment bytes for classification.
    ///
    /// `session_id` scopes the oracle's own conversation state; callers
    /// typically pass the `stream_id` being monitored.
    ///
    /// # Errors
    ///
    /// Returns [`ModerationError::Request`] on transport failure,
    /// [`ModerationError::EmptyResponse`] if the oracle returns no parts, and
    /// [`ModerationError::InvalidJson`] if the fence-stripped text is not the
    /// expected `{result, message}` shape.
    pub async fn classify(
        &self,
        user_id: &str,
        session_id: &str,
        segment_bytes: &[u8],
        mime_type: &str,
    ) -> Result<ModerationOutcome, ModerationError> {
        let data = base64::engine::general_purpose::STANDARD.encode(segment_bytes);
        let request = OracleRequest {
            user_id,
            new_message: OracleMessage {
                role: "user",
                parts: vec![OraclePart {
                    inline_data: OracleInlineData {
                        data,
                        mime_type,
                        display_name: "segment",
                    },
                }],
            },
            app_name: &self.app_name,
            session_id,
        };

        let response: OracleResponse = self
            .http
            .post(format!("{}/run", self.base_url))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text = response
            .parts
            .first()
            .map(|part| part.text.as_str())
            .ok_or(ModerationError::EmptyResponse)?;
        let stripped = strip_markdown_fences(text);
        let body: OracleResultBody = serde_json::from_str(stripped)?;

        Ok(match body.result {
            OracleResultTag::Accepted => ModerationOutcome::Accepted,
            OracleResultTag::Warning => ModerationOutcome::Warning,
            OracleResultTag::Rejected => ModerationOutcome::Rejected {
                reason: body.message,
            },
        })
    }
}

/// Strip a leading/trailing ```` ``` ```` or ```` ```json ```` fence, if present.
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\n', '\r']);
    rest.strip_suffix("```").map_or(rest, str::trim_end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        let fenced = "```json\n{\"result\":\"Accepted\",\"message\":\"ok\"}\n```";
        assert_eq!(
            strip_markdown_fences(fenced),
            "{\"result\":\"Accepted\",\"message\":\"ok\"}"
        );
    }

    #[test]
    fn strips_bare_fence() {
        let fenced = "```\n{\"result\":\"Warning\",\"message\":\"borderline\"}\n```";
        assert_eq!(
            strip_markdown_fences(fenced),
            "{\"result\":\"Warning\",\"message\":\"borderline\"}"
        );
    }

    #[test]
    fn passes_through_unfenced_text() {
        let plain = "{\"result\":\"Rejected\",\"message\":\"nope\"}";
        assert_eq!(strip_markdown_fences(plain), plain);
    }

    #[test]
    fn parses_rejected_outcome() {
        let body: OracleResultBody =
            serde_json::from_str("{\"result\":\"Rejected\",\"message\":\"nudity\"}").unwrap();
        assert!(matches!(body.result, OracleResultTag::Rejected));
        assert_eq!(body.message, "nudity");
    }
}
