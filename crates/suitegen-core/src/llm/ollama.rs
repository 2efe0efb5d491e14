//! Ollama `/api/chat` backend.

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

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Deserialize, Default)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaChunk {
    fn usage(&self) -> Option<Usage> {
        match (self.prompt_eval_count, self.eval_count) {
            (None, None) => None,
            (p, e) => Some(Usage {
                prompt_tokens: p.unwrap_or(0),
                response_tokens: e.unwrap_or(0),
            }),
        }
    }
}

pub struct OllamaBackend {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl OllamaBackend {
    pub fn new(base_url: Option<&str>) -> SuitegenResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| SuitegenError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url
                .unwrap_or(DEFAULT_OLLAMA_URL)
                .trim_end_matches('/')
                .to_string(),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

/// Request body in the shape `/api/chat` expects.
pub(crate) fn request_body(request: &ChatRequest<'_>) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(request.model));
    body.insert("messages".into(), json!(request.messages));
    body.insert("stream".into(), json!(request.stream));
    if !request.options.is_empty() {
        body.insert("options".into(), Value::Object(request.options.clone()));
    }
    for (key, value) in &request.root {
        body.insert(key.clone(), value.clone());
    }
    Value::Object(body)
}

fn parse_chunk(line: &str) -> SuitegenResult<OllamaChunk> {
    let chunk: OllamaChunk = serde_json::from_str(line).map_err(|e| SuitegenError::Response {
        kind: ResponseFailure::Unknown,
        message: format!("malformed Ollama payload: {e}"),
    })?;
    if let Some(error) = chunk.error.as_ref() {
        return Err(SuitegenError::Response {
            kind: ResponseFailure::Known,
            message: error.clone(),
        });
    }
    Ok(chunk)
}

/// Concatenate a stream of NDJSON chunks, checking `deadline` between them.
pub(crate) fn collect_stream<R: BufRead>(
    reader: R,
    deadline: Instant,
) -> SuitegenResult<ChatReply> {
    let mut content = String::new();
    let mut usage = None;
    let mut finished = false;
    for line in reader.lines() {
        let line = line.map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut => SuitegenError::ResponseTimedOut(format!(
                "stream stalled after {} chars",
                content.len()
            )),
            _ => SuitegenError::Response {
                kind: ResponseFailure::Unknown,
                message: format!("stream read failed: {e}"),
            },
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk = parse_chunk(&line)?;
        if let Some(message) = chunk.message.as_ref() {
            content.push_str(&message.content);
        }
        if chunk.done {
            usage = chunk.usage();
            finished = true;
            break;
        }
        if Instant::now() >= deadline {
            return Err(SuitegenError::ResponseTimedOut(format!(
                "deadline reached with a partial response of {} chars",
                content.len()
            )));
        }
    }
    if !finished {
        return Err(SuitegenError::ResponseTimedOut(format!(
            "stream ended before completion ({} chars received)",
            content.len()
        )));
    }
    Ok(ChatReply { content, usage })
}

impl ChatBackend for OllamaBackend {
    fn platform(&self) -> Platform {
        Platform::Ollama
    }

    fn send(&self, request: &ChatRequest<'_>, timeout: Duration) -> SuitegenResult<ChatReply> {
        let started = Instant::now();
        let deadline = started + timeout;
        let response = self
            .client
            .post(self.endpoint())
            .timeout(timeout)
            .json(&request_body(request))
            .send()
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(map_status_error(status.as_u16(), &body));
        }

        let reply = if request.stream {
            collect_stream(BufReader::new(response), deadline)?
        } else {
            let body = response.text().map_err(map_transport_error)?;
            let chunk = parse_chunk(&body)?;
            ChatReply {
                usage: chunk.usage(),
                content: chunk.message.unwrap_or_default().content,
            }
        };
        debug!(
            "ollama model={} replied with {} chars in {} ms",
            request.model,
            reply.content.len(),
            started.elapsed().as_millis()
        );
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMessage, ChatRole};

    #[test]
    fn test_request_body_layout() {
        let messages = vec![ChatMessage::new(ChatRole::User, "hi")];
        let mut options = Map::new();
        options.insert("temperature".into(), json!(0.2));
        let mut root = Map::new();
        root.insert("think".into(), json!(false));
        let request = ChatRequest {
            model: "qwen3:8b",
            messages: &messages,
            options,
            root,
            stream: false,
        };
        let body = request_body(&request);
        assert_eq!(body["model"], "qwen3:8b");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["options"]["temperature"], 0.2);
        assert_eq!(body["think"], false);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn test_collect_stream_concatenates_chunks() {
        let payload = "\
{\"message\":{\"role\":\"assistant\",\"content\":\"def \"},\"done\":false}
{\"message\":{\"role\":\"assistant\",\"content\":\"test_x(): pass\"},\"done\":false}
{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"prompt_eval_count\":12,\"eval_count\":7}
";
        let deadline = Instant::now() + Duration::from_secs(60);
        let reply = collect_stream(payload.as_bytes(), deadline).unwrap();
        assert_eq!(reply.content, "def test_x(): pass");
        assert_eq!(
            reply.usage,
            Some(Usage {
                prompt_tokens: 12,
                response_tokens: 7
            })
        );
    }

    #[test]
    fn test_collect_stream_truncated_is_timeout() {
        let payload = "{\"message\":{\"content\":\"partial\"},\"done\":false}\n";
        let deadline = Instant::now() + Duration::from_secs(60);
        let err = collect_stream(payload.as_bytes(), deadline).unwrap_err();
        assert!(matches!(err, SuitegenError::ResponseTimedOut(_)));
    }

    #[test]
    fn test_collect_stream_past_deadline() {
        let payload = "\
{\"message\":{\"content\":\"a\"},\"done\":false}
{\"message\":{\"content\":\"b\"},\"done\":true}
";
        let deadline = Instant::now() - Duration::from_millis(1);
        let err = collect_stream(payload.as_bytes(), deadline).unwrap_err();
        assert!(matches!(err, SuitegenError::ResponseTimedOut(_)));
    }

    #[test]
    fn test_stream_error_chunk_is_known_response_error() {
        let payload = "{\"error\":\"model requires more system memory\"}\n";
        let deadline = Instant::now() + Duration::from_secs(60);
        let err = collect_stream(payload.as_bytes(), deadline).unwrap_err();
        assert!(matches!(
            err,
            SuitegenError::Response {
                kind: ResponseFailure::Known,
                ..
            }
        ));
    }

    #[test]
    fn test_backend_trims_base_url() {
        let backend = OllamaBackend::new(Some("http://gpu-box:11434/")).unwrap();
        assert_eq!(backend.endpoint(), "http://gpu-box:11434/api/chat");
        assert_eq!(backend.platform(), Platform::Ollama);
    }
}
