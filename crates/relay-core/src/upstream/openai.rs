//! Streaming chat completions against an OpenAI-compatible API.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;

use super::{CompletionStream, FragmentStream, UpstreamConfig, sse};
use crate::error::RelayError;
use crate::types::{OutputMode, PromptContent, PromptDocument, Role};

const ORGANIZATION_HEADER: &str = "openai-organization";
const PROJECT_HEADER: &str = "openai-project";

/// Longest upstream error body echoed into an error message.
const MAX_ERROR_BODY_CHARS: usize = 512;

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: WireContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent<'a> {
    Text(&'a str),
    Parts(Vec<WirePart<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

impl ResponseFormat {
    fn for_mode(mode: OutputMode) -> Self {
        let kind = match mode {
            OutputMode::Plain => "text",
            OutputMode::Json => "json_object",
        };
        Self { kind }
    }
}

fn wire_messages(document: &PromptDocument) -> Vec<WireMessage<'_>> {
    document
        .parts()
        .iter()
        .map(|part| WireMessage {
            role: part.role,
            content: match &part.content {
                PromptContent::Text(text) => WireContent::Text(text),
                PromptContent::TextWithImage { text, image } => WireContent::Parts(vec![
                    WirePart::Text { text },
                    WirePart::ImageUrl {
                        image_url: ImageUrl {
                            url: image.data_url(),
                        },
                    },
                ]),
            },
        })
        .collect()
}

// ── Client ────────────────────────────────────────────────────────────────────

/// [`CompletionStream`] backed by `POST {base_url}/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    config: UpstreamConfig,
    http: Client,
}

impl OpenAiClient {
    pub fn new(config: UpstreamConfig) -> Result<Self, RelayError> {
        let http = Client::builder()
            .user_agent(concat!("design-relay/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| {
                RelayError::UpstreamStream(format!("failed to build upstream HTTP client: {e}"))
            })?;

        Ok(Self { config, http })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn extra_headers(&self) -> Result<HeaderMap, RelayError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        for (name, value) in [
            (ORGANIZATION_HEADER, self.config.organization.as_deref()),
            (PROJECT_HEADER, self.config.project.as_deref()),
        ] {
            let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
                continue;
            };
            let value = HeaderValue::from_str(value).map_err(|_| {
                RelayError::UpstreamAuth(format!("{name} contains characters not allowed in a header"))
            })?;
            headers.insert(HeaderName::from_static(name), value);
        }

        Ok(headers)
    }
}

#[async_trait]
impl CompletionStream for OpenAiClient {
    async fn stream(
        &self,
        document: &PromptDocument,
        mode: OutputMode,
    ) -> Result<FragmentStream, RelayError> {
        let api_key = self
            .config
            .api_key()
            .ok_or_else(|| RelayError::UpstreamAuth("upstream API key not configured".into()))?;

        let body = CompletionBody {
            model: &self.config.model,
            messages: wire_messages(document),
            stream: true,
            response_format: ResponseFormat::for_mode(mode),
        };

        debug!(
            model = %self.config.model,
            mode = %mode,
            image = document.has_image(),
            "opening upstream completion stream"
        );

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .headers(self.extra_headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::UpstreamStream(format!("failed to reach upstream: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            let detail: String = detail.chars().take(MAX_ERROR_BODY_CHARS).collect();

            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RelayError::UpstreamAuth(
                    format!("upstream rejected credentials ({status}): {detail}"),
                ),
                _ => RelayError::UpstreamStream(format!("upstream returned {status}: {detail}")),
            });
        }

        Ok(sse::fragments(response.bytes_stream()))
    }

    fn is_configured(&self) -> bool {
        self.config.api_key().is_some()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode as AxumStatus, header};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use futures::StreamExt;
    use serde_json::{Value, json};

    use super::*;
    use crate::prompt;
    use crate::types::ChatRequest;

    #[derive(Clone, Default)]
    struct Captured {
        body: Arc<Mutex<Option<Value>>>,
        headers: Arc<Mutex<Option<AxumHeaders>>>,
    }

    /// Serve `reply` for every completion request on an ephemeral port.
    async fn mock_upstream(status: AxumStatus, reply: &'static str) -> (String, Captured) {
        let captured = Captured::default();
        let app = Router::new()
            .route(
                "/v1/chat/completions",
                post(
                    move |State(captured): State<Captured>,
                          headers: AxumHeaders,
                          Json(body): Json<Value>| async move {
                        *captured.body.lock().unwrap() = Some(body);
                        *captured.headers.lock().unwrap() = Some(headers);
                        let response: Response = (
                            status,
                            [(header::CONTENT_TYPE, "text/event-stream")],
                            reply,
                        )
                            .into_response();
                        response
                    },
                ),
            )
            .with_state(captured.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/v1"), captured)
    }

    fn client(base_url: String, api_key: Option<&str>) -> OpenAiClient {
        OpenAiClient::new(UpstreamConfig {
            api_key: api_key.map(str::to_owned),
            organization: Some("org-test".into()),
            base_url,
            ..Default::default()
        })
        .unwrap()
    }

    fn document(image: Option<&str>) -> PromptDocument {
        prompt::build(&ChatRequest::new("hello", image.map(str::to_owned), OutputMode::Plain)).unwrap()
    }

    const HAPPY_STREAM: &str = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );

    #[tokio::test]
    async fn streams_fragments_and_sends_expected_request() {
        let (base_url, captured) = mock_upstream(AxumStatus::OK, HAPPY_STREAM).await;
        let client = client(base_url, Some("sk-test"));

        let fragments: Vec<String> = client
            .stream(&document(None), OutputMode::Json)
            .await
            .unwrap()
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(fragments, vec!["Hi", " there", "!"]);

        let body = captured.body.lock().unwrap().clone().unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream"], true);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1], json!({ "role": "user", "content": "hello" }));

        let headers = captured.headers.lock().unwrap().clone().unwrap();
        assert_eq!(headers[header::AUTHORIZATION], "Bearer sk-test");
        assert_eq!(headers["openai-organization"], "org-test");
        assert!(headers.get("openai-project").is_none());
    }

    #[tokio::test]
    async fn image_is_sent_as_text_and_image_url_parts() {
        let (base_url, captured) = mock_upstream(AxumStatus::OK, HAPPY_STREAM).await;
        let client = client(base_url, Some("sk-test"));

        let mut stream = client
            .stream(&document(Some("data:image/png;base64,QUJD")), OutputMode::Plain)
            .await
            .unwrap();
        while stream.next().await.is_some() {}

        let body = captured.body.lock().unwrap().clone().unwrap();
        assert_eq!(body["response_format"]["type"], "text");
        assert_eq!(
            body["messages"][1]["content"],
            json!([
                { "type": "text", "text": "hello" },
                { "type": "image_url", "image_url": { "url": "data:image/png;base64,QUJD" } }
            ])
        );
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let (base_url, captured) = mock_upstream(AxumStatus::OK, HAPPY_STREAM).await;
        let client = client(base_url, Some("   "));

        assert!(!client.is_configured());
        let err = client.stream(&document(None), OutputMode::Plain).await.err().unwrap();
        assert!(matches!(err, RelayError::UpstreamAuth(_)));
        assert!(captured.body.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn rejected_key_is_an_auth_error() {
        let (base_url, _) =
            mock_upstream(AxumStatus::UNAUTHORIZED, "{\"error\":{\"message\":\"bad key\"}}").await;
        let client = client(base_url, Some("sk-wrong"));

        let err = client.stream(&document(None), OutputMode::Plain).await.err().unwrap();
        match err {
            RelayError::UpstreamAuth(msg) => assert!(msg.contains("bad key")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_before_streaming_is_a_stream_error() {
        let (base_url, _) = mock_upstream(AxumStatus::SERVICE_UNAVAILABLE, "busy").await;
        let client = client(base_url, Some("sk-test"));

        let err = client.stream(&document(None), OutputMode::Plain).await.err().unwrap();
        assert!(matches!(err, RelayError::UpstreamStream(_)));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_stream_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client(format!("http://{addr}/v1"), Some("sk-test"));
        let err = client.stream(&document(None), OutputMode::Plain).await.err().unwrap();
        assert!(matches!(err, RelayError::UpstreamStream(_)));
    }
}
