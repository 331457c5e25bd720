//! Natural-language calendar assistant backed by Gemini function calling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config::{GeminiConfig, SessionConfig};
use crate::error::{AppError, AppResult};
use crate::services::calendar::{CalendarTools, CREATE_EVENT, DELETE_EVENT, LIST_EVENTS};
use crate::services::refresh_gate::ResolvedCredential;
use crate::services::with_timeout;

/// Model round-trips allowed for a single user message.
const MAX_ROUNDS: usize = 5;

const SYSTEM_INSTRUCTION: &str = "You are Hope, a helpful Google Calendar assistant. \
You can create events, delete events by their title and list upcoming events \
using the provided functions. Reply in the language of the user's message. \
When a start time is given without a date, resolve it against today's date. \
You ONLY manage the user's calendar: if asked about anything else, politely refuse \
and explain what you can do.";

// ----------------------------------------------------------------------------
// Wire types
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: vec![Part::text(text)],
        }
    }

    /// A plain user message, as opposed to a turn carrying function results.
    fn is_user_message(&self) -> bool {
        self.role.as_deref() == Some("user")
            && self.parts.iter().all(|p| p.function_response.is_none())
    }

    fn function_calls(&self) -> Vec<FunctionCall> {
        self.parts
            .iter()
            .filter_map(|p| p.function_call.clone())
            .collect()
    }

    fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
    /// Opaque token some models attach to function calls; it must be echoed
    /// back unchanged in the history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content,
    contents: &'a [Content],
    tools: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

fn tool_declarations() -> Value {
    json!([{
        "functionDeclarations": [
            {
                "name": CREATE_EVENT,
                "description": "Create an event in the user's primary calendar.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string", "description": "Event title." },
                        "start_time": {
                            "type": "string",
                            "description": "Start time in ISO-8601, e.g. 2024-06-01T15:00:00."
                        },
                        "duration_hours": {
                            "type": "number",
                            "description": "Duration in hours, 1 by default."
                        }
                    },
                    "required": ["title", "start_time"]
                }
            },
            {
                "name": DELETE_EVENT,
                "description": "Delete the first upcoming event whose title contains the given text.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "event_summary": {
                            "type": "string",
                            "description": "Text to look for in event titles."
                        }
                    },
                    "required": ["event_summary"]
                }
            },
            {
                "name": LIST_EVENTS,
                "description": "List the user's upcoming events.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "max_results": {
                            "type": "integer",
                            "description": "How many events to return, 10 by default."
                        }
                    }
                }
            }
        ]
    }])
}

// ----------------------------------------------------------------------------
// Model client
// ----------------------------------------------------------------------------

/// One generation step: given the conversation so far, return the model turn.
#[async_trait]
pub trait LanguageModel: Send + Sync + 'static {
    async fn generate(&self, contents: &[Content]) -> AppResult<Content>;
}

pub struct GeminiClient {
    http: Client,
    endpoint: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig, api_key: String, timeout: Duration) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AppError::Request)?;
        Ok(Self {
            http,
            endpoint: format!(
                "{}/models/{}:generateContent",
                config.api_url.trim_end_matches('/'),
                config.model
            ),
            api_key,
        })
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate(&self, contents: &[Content]) -> AppResult<Content> {
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part::text(SYSTEM_INSTRUCTION)],
            },
            contents,
            tools: tool_declarations(),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(AppError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!("Gemini returned {}: {}", status, text);
            return Err(match status.as_u16() {
                429 => AppError::RateLimited,
                500..=599 => AppError::ServiceUnavailable(format!("language model: {}", status)),
                _ => AppError::Llm(format!("generateContent failed with {}", status)),
            });
        }

        let parsed: GenerateResponse = response.json().await.map_err(AppError::Request)?;
        let candidate = parsed.candidates.into_iter().next();
        match candidate.and_then(|c| {
            if c.content.is_none() {
                tracing::debug!("Candidate without content, finish reason {:?}", c.finish_reason);
            }
            c.content
        }) {
            Some(mut content) => {
                content.role.get_or_insert_with(|| "model".to_string());
                Ok(content)
            }
            None => Err(AppError::Llm(match parsed.prompt_feedback {
                Some(feedback) => format!("prompt blocked: {}", feedback),
                None => "empty response".to_string(),
            })),
        }
    }
}

// ----------------------------------------------------------------------------
// Sessions
// ----------------------------------------------------------------------------

/// Per-user conversation history, bounded in users and evicted when idle.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Cache<i64, Arc<Mutex<Vec<Content>>>>,
    max_history: usize,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        tracing::debug!(
            max_sessions = config.max_sessions,
            idle_ttl_secs = config.idle_ttl_seconds,
            max_history = config.max_history,
            "Assistant session store configured"
        );
        Self {
            sessions: Cache::builder()
                .max_capacity(config.max_sessions)
                .time_to_idle(Duration::from_secs(config.idle_ttl_seconds))
                .build(),
            max_history: config.max_history,
        }
    }

    async fn session(&self, user_id: i64) -> Arc<Mutex<Vec<Content>>> {
        self.sessions
            .get_with(user_id, async { Arc::new(Mutex::new(Vec::new())) })
            .await
    }

    pub async fn history(&self, user_id: i64) -> Vec<Content> {
        match self.sessions.get(&user_id).await {
            Some(session) => session.lock().await.clone(),
            None => Vec::new(),
        }
    }

    pub async fn clear(&self, user_id: i64) {
        self.sessions.invalidate(&user_id).await;
    }
}

/// Keep at most `max` entries, starting on a plain user message so the
/// history never opens with a dangling function call or result.
pub fn trim_history(mut history: Vec<Content>, max: usize) -> Vec<Content> {
    if history.len() <= max {
        return history;
    }
    let mut start = history.len() - max;
    while start < history.len() && !history[start].is_user_message() {
        start += 1;
    }
    history.split_off(start)
}

// ----------------------------------------------------------------------------
// Assistant
// ----------------------------------------------------------------------------

pub struct Assistant {
    model: Arc<dyn LanguageModel>,
    tools: CalendarTools,
    sessions: SessionStore,
    timeout: Duration,
}

impl Assistant {
    /// Returns `None` when no API key is configured; the bot then answers
    /// free-text messages with a notice instead.
    pub fn from_config(
        gemini: &GeminiConfig,
        sessions: &SessionConfig,
        tools: CalendarTools,
        timeout: Duration,
    ) -> AppResult<Option<Self>> {
        let Some(api_key) = gemini.api_key.clone().filter(|k| !k.trim().is_empty()) else {
            tracing::warn!("GEMINI_API_KEY is not set, the assistant is disabled");
            return Ok(None);
        };
        let client = GeminiClient::new(gemini, api_key, timeout)?;
        tracing::info!("Assistant enabled with model {}", gemini.model);
        Ok(Some(Self::new(
            Arc::new(client),
            tools,
            SessionStore::new(sessions),
            timeout,
        )))
    }

    pub fn new(
        model: Arc<dyn LanguageModel>,
        tools: CalendarTools,
        sessions: SessionStore,
        timeout: Duration,
    ) -> Self {
        Self {
            model,
            tools,
            sessions,
            timeout,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Answer one user message, executing any calendar functions the model
    /// asks for with the caller's own credential. The session is updated only
    /// when a final text answer was produced.
    pub async fn reply(
        &self,
        cred: &ResolvedCredential,
        text: &str,
        lang: Option<&str>,
    ) -> AppResult<String> {
        let session = self.sessions.session(cred.user_id).await;
        let mut history = session.lock().await;

        let mut working = history.clone();
        working.push(Content::user_text(format!(
            "Today's date is {}. User request: {}",
            self.tools.today().format("%Y-%m-%d"),
            text
        )));

        for round in 0..MAX_ROUNDS {
            let turn = with_timeout(
                "language model",
                self.timeout,
                self.model.generate(&working),
            )
            .await?;
            let calls = turn.function_calls();
            working.push(turn);

            if calls.is_empty() {
                let answer = working
                    .last()
                    .map(Content::joined_text)
                    .unwrap_or_default();
                if answer.is_empty() {
                    return Err(AppError::Llm("model returned no text".to_string()));
                }
                *history = trim_history(working, self.sessions.max_history);
                return Ok(answer);
            }

            tracing::debug!(
                "User {} round {}: {} function call(s)",
                cred.user_id,
                round + 1,
                calls.len()
            );
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                let result = self.tools.dispatch(cred, &call.name, &call.args, lang).await;
                results.push(Part {
                    function_response: Some(FunctionResponse {
                        name: call.name,
                        response: json!({ "result": result }),
                    }),
                    ..Default::default()
                });
            }
            working.push(Content {
                role: Some("user".to_string()),
                parts: results,
            });
        }

        Err(AppError::Llm(format!(
            "no answer after {} function-calling rounds",
            MAX_ROUNDS
        )))
    }
}
