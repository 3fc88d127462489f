//! Ollama provider implementation.
//!
//! Talks to the `/api/chat` endpoint, which streams newline-delimited JSON
//! frames. Supports:
//! - Chat completions (non-streaming and streaming NDJSON)
//! - Model listing and health checks via `/api/tags`

use async_trait::async_trait;
use atlas_config::ModelConfig;
use atlas_core::error::ProviderError;
use atlas_core::message::Message;
use atlas_core::provider::*;
use atlas_core::tool::ToolSpec;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// A provider backed by an Ollama server.
pub struct OllamaProvider {
    host: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a provider for `host` (e.g. `http://localhost:11434`).
    ///
    /// `timeout` bounds both connecting and each read from the socket, so a
    /// long generation that keeps producing frames is never cut off.
    pub fn new(host: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            host: host.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(config: &ModelConfig) -> Result<Self, ProviderError> {
        Self::new(&config.host, config.timeout())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn chat_body<'a>(request: &'a ProviderRequest, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                    name: m.name.as_deref(),
                })
                .collect(),
            stream,
            tools: &request.tools,
            options: request.temperature.map(|temperature| ChatOptions { temperature }),
        }
    }

    async fn post_chat(
        &self,
        request: &ProviderRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/api/chat", self.host);
        let body = Self::chat_body(request, stream);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            stream,
            "Sending chat request"
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(&self.host, e))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body.trim(), "Model endpoint returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body.trim().to_string(),
            });
        }

        Ok(response)
    }
}

fn map_transport_error(host: &str, e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(format!("{host}: {e}"))
    } else {
        ProviderError::Network(format!("Failed to reach model endpoint at {host}: {e}"))
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let response = self.post_chat(&request, false).await?;

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("body is not JSON: {e}")))?;

        if let Some(error) = raw.get("error").and_then(|e| e.as_str()) {
            return Err(ProviderError::Remote(error.to_string()));
        }

        let reply = &raw["message"];
        let content = reply["content"].as_str().unwrap_or_default();
        let message = match reply["role"].as_str() {
            Some("system") => Message::system(content),
            Some("user") => Message::user(content),
            _ => Message::assistant(content),
        };
        let model = raw["model"].as_str().unwrap_or(&request.model).to_string();

        Ok(ProviderResponse {
            message,
            model,
            raw,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkStream, ProviderError> {
        let response = self.post_chat(&request, true).await?;
        Ok(decode_ndjson(response.bytes_stream()))
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/api/tags", self.host);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| map_transport_error(&self.host, e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status_code: status.as_u16(),
                message: error_body.trim().to_string(),
            });
        }

        let body: TagsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Ok(body.models.into_iter().map(|m| m.name).collect())
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/api/tags", self.host);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| map_transport_error(&self.host, e))?;

        Ok(response.status().is_success())
    }
}

/// Turn a raw NDJSON byte stream into a chunk stream.
///
/// Lines are split on `\n` at the byte level, so frames (and multi-byte
/// characters) split across network reads are reassembled before decoding.
/// The returned stream owns `bytes`; dropping it drops the transport.
pub fn decode_ndjson<S, B, E>(bytes: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let bytes: BoxStream<'static, Result<Vec<u8>, String>> = bytes
        .map(|item| item.map(|b| b.as_ref().to_vec()).map_err(|e| e.to_string()))
        .boxed();

    let state = DecodeState {
        bytes,
        lines: LineBuffer::default(),
        eof: false,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            if let Some(line) = state.lines.next_line(state.eof) {
                match parse_frame(&line) {
                    None => continue,
                    Some(Ok(chunk)) => {
                        state.finished = chunk.done;
                        return Some((Ok(chunk), state));
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                }
            }

            if state.eof {
                debug!("Stream ended without a terminal frame");
                state.finished = true;
                return Some((Ok(StreamChunk::terminal()), state));
            }

            match state.bytes.next().await {
                Some(Ok(data)) => state.lines.push(&data),
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(ProviderError::StreamInterrupted(e)), state));
                }
                None => state.eof = true,
            }
        }
    })
    .boxed()
}

struct DecodeState {
    bytes: BoxStream<'static, Result<Vec<u8>, String>>,
    lines: LineBuffer,
    eof: bool,
    finished: bool,
}

#[derive(Default)]
struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// The next complete line, or the unterminated remainder once at EOF.
    fn next_line(&mut self, eof: bool) -> Option<Vec<u8>> {
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                line.pop();
                Some(line)
            }
            None if eof && !self.buffer.is_empty() => Some(std::mem::take(&mut self.buffer)),
            None => None,
        }
    }
}

/// Decode one NDJSON line. `None` means the line carries nothing and is skipped.
fn parse_frame(line: &[u8]) -> Option<Result<StreamChunk, ProviderError>> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }

    let frame: ChatFrame = match serde_json::from_slice(line) {
        Ok(frame) => frame,
        Err(e) => {
            trace!(error = %e, line = %String::from_utf8_lossy(line), "Skipping undecodable frame");
            return None;
        }
    };

    if let Some(error) = frame.error {
        return Some(Err(ProviderError::Remote(error)));
    }

    let content = frame
        .message
        .map(|m| m.content)
        .filter(|c| !c.is_empty());

    if content.is_none() && !frame.done {
        return None;
    }

    Some(Ok(StreamChunk {
        content,
        done: frame.done,
    }))
}

// --- Ollama API types ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "<[ToolSpec]>::is_empty")]
    tools: &'a [ToolSpec],
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ChatOptions>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatFrame {
    #[serde(default)]
    message: Option<FrameMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct FrameMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::message::Role;
    use std::convert::Infallible;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn frames(parts: &[&str]) -> ChunkStream {
        let items: Vec<Result<Vec<u8>, Infallible>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        decode_ndjson(stream::iter(items))
    }

    async fn collect(stream: ChunkStream) -> Vec<Result<StreamChunk, ProviderError>> {
        stream.collect().await
    }

    fn texts(items: &[Result<StreamChunk, ProviderError>]) -> String {
        items
            .iter()
            .filter_map(|i| i.as_ref().ok())
            .filter_map(|c| c.content.clone())
            .collect()
    }

    #[tokio::test]
    async fn decodes_deltas_in_order() {
        let items = collect(frames(&[
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        ]))
        .await;

        assert_eq!(items.len(), 3);
        assert_eq!(texts(&items), "Hello");
        assert!(items[2].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn reassembles_frames_split_across_reads() {
        let frame = "{\"message\":{\"content\":\"caf\u{e9} \u{1f4c8}\"},\"done\":false}\n{\"done\":true}\n";
        let bytes = frame.as_bytes();
        // Split inside the multi-byte emoji and mid-JSON.
        let items: Vec<Result<Vec<u8>, Infallible>> = bytes
            .chunks(7)
            .map(|c| Ok(c.to_vec()))
            .collect();

        let items = collect(decode_ndjson(stream::iter(items))).await;
        assert_eq!(texts(&items), "caf\u{e9} \u{1f4c8}");
        assert!(items.last().unwrap().as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn skips_blank_and_garbage_lines() {
        let items = collect(frames(&[
            "\n",
            "not json at all\n",
            "{\"message\":{\"content\":\"ok\"}}\n",
            "\r\n",
            "{\"done\":true}\n",
        ]))
        .await;

        assert_eq!(items.len(), 2);
        assert_eq!(texts(&items), "ok");
    }

    #[tokio::test]
    async fn frame_error_ends_stream() {
        let items = collect(frames(&[
            "{\"message\":{\"content\":\"partial\"}}\n",
            "{\"error\":\"model 'nope' not found\"}\n",
            "{\"message\":{\"content\":\"never seen\"}}\n",
        ]))
        .await;

        assert_eq!(items.len(), 2);
        match &items[1] {
            Err(ProviderError::Remote(msg)) => assert!(msg.contains("not found")),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn nothing_after_terminal_frame() {
        let items = collect(frames(&[
            "{\"message\":{\"content\":\"a\"},\"done\":true}\n{\"message\":{\"content\":\"b\"}}\n",
        ]))
        .await;
        assert_eq!(items.len(), 1);
        assert_eq!(texts(&items), "a");
    }

    #[tokio::test]
    async fn missing_terminal_frame_is_synthesized() {
        // Final line has no trailing newline either.
        let items = collect(frames(&["{\"message\":{\"content\":\"x\"}}\n{\"message\":{\"content\":\"y\"}}"])).await;
        assert_eq!(texts(&items), "xy");
        assert_eq!(items.last().unwrap().as_ref().unwrap(), &StreamChunk::terminal());
    }

    #[tokio::test]
    async fn transport_error_interrupts_stream() {
        let items: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"{\"message\":{\"content\":\"x\"}}\n".to_vec()),
            Err("connection reset".into()),
        ];
        let items = collect(decode_ndjson(stream::iter(items))).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[1], Err(ProviderError::StreamInterrupted(m)) if m == "connection reset"));
    }

    #[test]
    fn request_body_shape() {
        let mut request = ProviderRequest::new(
            "llama3.2",
            vec![Message::system("rules"), Message::tool("quote", "{}")],
            vec![ToolSpec {
                name: "quote".into(),
                description: "Latest quote".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
        );
        request.temperature = Some(0.2);

        let body = serde_json::to_value(OllamaProvider::chat_body(&request, true)).unwrap();
        assert_eq!(body["model"], "llama3.2");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(body["messages"][0].get("name").is_none());
        assert_eq!(body["messages"][1]["role"], "tool");
        assert_eq!(body["messages"][1]["name"], "quote");
        assert_eq!(body["tools"][0]["name"], "quote");
        assert!((body["options"]["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);

        let bare = ProviderRequest::new("m", vec![], vec![]);
        let body = serde_json::to_value(OllamaProvider::chat_body(&bare, false)).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("options").is_none());
    }

    /// Serve exactly one canned HTTP response on a local port.
    async fn serve_once(status_line: &str, body: &str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/x-ndjson\r\nConnection: close\r\n\r\n{body}"
        );

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        format!("http://{addr}")
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    fn provider(host: &str) -> OllamaProvider {
        OllamaProvider::new(host, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn streams_from_http_endpoint() {
        let host = serve_once(
            "200 OK",
            "{\"message\":{\"content\":\"Hi \"}}\n{\"message\":{\"content\":\"there\"}}\n{\"done\":true}\n",
        )
        .await;

        let request = ProviderRequest::new("llama3.2", vec![Message::user("hello")], vec![]);
        let stream = provider(&host).stream(request).await.unwrap();
        let items = collect(stream).await;
        assert_eq!(texts(&items), "Hi there");
        assert!(items.last().unwrap().as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn non_200_status_is_api_error() {
        let host = serve_once("404 Not Found", "model not found").await;
        let request = ProviderRequest::new("nope", vec![Message::user("hello")], vec![]);

        match provider(&host).stream(request).await {
            Err(ProviderError::ApiError {
                status_code,
                message,
            }) => {
                assert_eq!(status_code, 404);
                assert_eq!(message, "model not found");
            }
            Err(other) => panic!("expected ApiError, got {other:?}"),
            Ok(_) => panic!("expected ApiError, got a stream"),
        }
    }

    #[tokio::test]
    async fn complete_defaults_missing_fields() {
        let host = serve_once("200 OK", "{\"message\":{}}").await;
        let request = ProviderRequest::new("llama3.2", vec![Message::user("hello")], vec![]);

        let response = provider(&host).complete(request).await.unwrap();
        assert_eq!(response.message.role, Role::Assistant);
        assert_eq!(response.message.content, "");
        assert_eq!(response.model, "llama3.2");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        // Bind then drop so the port is closed.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let request = ProviderRequest::new("m", vec![Message::user("hi")], vec![]);
        let err = provider(&format!("http://{addr}/"))
            .complete(request)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
    }

    #[tokio::test]
    async fn lists_models_from_tags() {
        let host = serve_once(
            "200 OK",
            "{\"models\":[{\"name\":\"llama3.2:latest\"},{\"name\":\"qwen2.5:7b\"}]}",
        )
        .await;
        let models = provider(&host).list_models().await.unwrap();
        assert_eq!(models, ["llama3.2:latest", "qwen2.5:7b"]);
    }

    #[tokio::test]
    async fn list_models_surfaces_bad_status() {
        let host = serve_once("503 Service Unavailable", "loading\n").await;
        match provider(&host).list_models().await {
            Err(ProviderError::ApiError {
                status_code,
                message,
            }) => {
                assert_eq!(status_code, 503);
                assert_eq!(message, "loading");
            }
            other => panic!("expected ApiError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn health_check_reflects_tags_status() {
        let host = serve_once("200 OK", "{\"models\":[]}").await;
        assert!(provider(&host).health_check().await.unwrap());

        let host = serve_once("500 Internal Server Error", "down").await;
        assert!(!provider(&host).health_check().await.unwrap());
    }
}
