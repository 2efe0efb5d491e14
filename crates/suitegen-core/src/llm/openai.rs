//! OpenAI-compatible `/v1/chat/completions` backend (OpenAI, vLLM, llama.cpp
//! server, OpenRouter, ...).

use std::io::{BufRead, BufReader};
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::errors::{ResponseFailure, SuitegenError, SuitegenResult};
use crate::llm::backend::{
    map_status_error, map_transport_error, ChatBackend, ChatReply, ChatRequest, Usage,
};
use crate::models::Platform;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl From<WireUsage> for Usage {
    fn from(u: WireUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            response_tokens: u.completion_tokens,
        }
    }
}

#[derive(Deserialize, Default)]
struct WireContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<WireContent>,
    #[serde(default)]
    delta: Option<WireContent>,
}

#[derive(Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

pub struct OpenAiBackend {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

impl OpenAiBackend {
    pub fn new(base_url: Option<&str>, api_key: Option<String>) -> SuitegenResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| SuitegenError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url
                .unwrap_or(DEFAULT_OPENAI_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

/// OpenAI-style APIs take sampling options at the request root.
pub(crate) fn request_body(request: &ChatRequest<'_>) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(request.model));
    body.insert("messages".into(), json!(request.messages));
    body.insert("stream".into(), json!(request.stream));
    if request.stream {
        body.insert("stream_options".into(), json!({"include_usage": true}));
    }
    for (key, value) in request.options.iter().chain(request.root.iter()) {
        body.insert(key.clone(), value.clone());
    }
    Value::Object(body)
}

fn malformed(e: impl std::fmt::Display) -> SuitegenError {
    SuitegenError::Response {
        kind: ResponseFailure::Unknown,
        message: format!("malformed completion payload: {e}"),
    }
}

pub(crate) fn parse_completion(body: &str) -> SuitegenResult<ChatReply> {
    let completion: Completion = serde_json::from_str(body).map_err(malformed)?;
    let content = completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .ok_or_else(|| malformed("no choices in completion"))?;
    Ok(ChatReply {
        content,
        usage: completion.usage.map(Usage::from),
    })
}

/// Read server-sent events until `[DONE]`, checking `deadline` between events.
pub(crate) fn collect_events<R: BufRead>(
    reader: R,
    deadline: Instant,
) -> SuitegenResult<ChatReply> {
    let mut content = String::new();
    let mut usage = None;
    for line in reader.lines() {
        let line = line.map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut => SuitegenError::ResponseTimedOut(format!(
                "event stream stalled after {} chars",
                content.len()
            )),
            _ => malformed(e),
        })?;
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            return Ok(ChatReply { content, usage });
        }
        let event: Completion = serde_json::from_str(data).map_err(malformed)?;
        if let Some(u) = event.usage {
            usage = Some(Usage::from(u));
        }
        for choice in event.choices {
            if let Some(text) = choice.delta.and_then(|d| d.content) {
                content.push_str(&text);
            }
        }
        if Instant::now() >= deadline {
            return Err(SuitegenError::ResponseTimedOut(format!(
                "deadline reached with a partial response of {} chars",
                content.len()
            )));
        }
    }
    Err(SuitegenError::ResponseTimedOut(format!(
        "event stream ended before [DONE] ({} chars received)",
        content.len()
    )))
}

impl ChatBackend for OpenAiBackend {
    fn platform(&self) -> Platform {
        Platform::OpenAi
    }

    fn send(&self, request: &ChatRequest<'_>, timeout: Duration) -> SuitegenResult<ChatReply> {
        let started = Instant::now();
        let mut builder = self
            .client
            .post(self.endpoint())
            .timeout(timeout)
            .json(&request_body(request));
        if let Some(key) = self.api_key.as_deref() {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(map_status_error(status.as_u16(), &body));
        }

        let reply = if request.stream {
            collect_events(BufReader::new(response), started + timeout)?
        } else {
            let body = response.text().map_err(map_transport_error)?;
            parse_completion(&body)?
        };
        debug!(
            "openai model={} replied with {} chars in {} ms",
            request.model,
            reply.content.len(),
            started.elapsed().as_millis()
        );
        Ok(reply)
    }
}
