use crate::error::AnalysisError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default Azure OpenAI REST API version
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-02-15-preview";

const TEMPERATURE: f32 = 0.3;
const MAX_TOKENS: u32 = 1000;

/// What an analysis backend is asked about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    /// The raw error line
    pub error_text: String,
    pub container_name: String,
    /// Image reference, `unknown` when the lookup failed
    pub container_image: String,
}

/// Trait for text-analysis backend implementations
pub trait AnalysisBackend: Send + Sync {
    fn analyze<'a>(
        &'a self,
        request: &'a AnalysisRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, AnalysisError>> + Send + 'a>>;

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// Message format for chat-completions APIs
#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Request body shared by Azure OpenAI and OpenAI chat completions
#[derive(Debug, Serialize)]
struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

/// Response format from chat-completions APIs
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    error: Option<ChatError>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ChatError {
    message: String,
}

/// System prompt asking for type, causes and remedy
pub fn system_prompt() -> &'static str {
    "You are an experienced operations and software engineer who specialises in \
     diagnosing container error logs. For the error log you are given, answer with:\n\
     1. **Error type**: what kind of error this is, in one sentence\n\
     2. **Likely causes**: the 2-3 most probable causes\n\
     3. **Suggested solution**: concrete fixes or where to look next\n\
     Keep the answer short and to the point."
}

/// User prompt carrying the container identity and the error line
pub fn user_prompt(request: &AnalysisRequest) -> String {
    format!(
        "Container:\n- Name: {}\n- Image: {}\n\nError log:\n```\n{}\n```\n\nPlease analyse this error.",
        request.container_name, request.container_image, request.error_text
    )
}

fn chat_messages(request: &AnalysisRequest) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: "system".to_string(),
            content: system_prompt().to_string(),
        },
        ChatMessage {
            role: "user".to_string(),
            content: user_prompt(request),
        },
    ]
}

fn build_client(timeout: Duration) -> Result<Client, AnalysisError> {
    Client::builder()
        .timeout(timeout)
        .no_proxy()
        .build()
        .map_err(|e| AnalysisError::HttpError(format!("Failed to create HTTP client: {}", e)))
}

/// Send a chat request and pull the first choice's text out of the reply
async fn send_chat(
    request: reqwest::RequestBuilder,
    body: &ChatRequest,
    backend: &str,
) -> Result<String, AnalysisError> {
    let response = request.json(body).send().await.map_err(|e| {
        if e.is_timeout() {
            AnalysisError::Timeout
        } else {
            AnalysisError::HttpError(format!("HTTP request failed: {}", e))
        }
    })?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(AnalysisError::BackendError(format!(
            "{} API returned error {}: {}",
            backend, status, error_text
        )));
    }

    let chat: ChatResponse = response.json().await.map_err(|e| {
        AnalysisError::InvalidResponse(format!("Failed to parse {} response: {}", backend, e))
    })?;

    extract_content(chat, backend)
}

fn extract_content(chat: ChatResponse, backend: &str) -> Result<String, AnalysisError> {
    if let Some(error) = chat.error {
        return Err(AnalysisError::BackendError(format!(
            "{} error: {}",
            backend, error.message
        )));
    }

    if let Some(usage) = &chat.usage {
        log::debug!("{} analysis used {} tokens", backend, usage.total_tokens);
    }

    chat.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| {
            AnalysisError::InvalidResponse(format!("No content in {} response", backend))
        })
}

/// Azure OpenAI backend
///
/// Talks to a chat-completions deployment on an Azure OpenAI resource,
/// authenticating with the resource's `api-key` header.
pub struct AzureOpenAIBackend {
    client: Client,
    endpoint: String,
    api_key: String,
    deployment: String,
    api_version: String,
}

impl AzureOpenAIBackend {
    /// Create a new Azure OpenAI backend
    ///
    /// # Arguments
    /// * `endpoint` - Resource URL (e.g., "https://my-resource.openai.azure.com")
    /// * `api_key` - Resource key
    /// * `deployment` - Model deployment name
    /// * `api_version` - REST API version
    /// * `timeout` - Per-request timeout
    pub fn new(
        endpoint: String,
        api_key: String,
        deployment: String,
        api_version: String,
        timeout: Duration,
    ) -> Result<Self, AnalysisError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint,
            api_key,
            deployment,
            api_version,
        })
    }

    /// Format the chat-completions URL for the deployment
    fn api_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint.trim_end_matches('/'),
            self.deployment,
            self.api_version
        )
    }
}

impl AnalysisBackend for AzureOpenAIBackend {
    fn analyze<'a>(
        &'a self,
        request: &'a AnalysisRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, AnalysisError>> + Send + 'a>> {
        Box::pin(async move {
            let body = ChatRequest {
                model: None,
                messages: chat_messages(request),
                temperature: TEMPERATURE,
                max_tokens: MAX_TOKENS,
            };

            let builder = self
                .client
                .post(self.api_url())
                .header("api-key", &self.api_key);

            send_chat(builder, &body, self.name()).await
        })
    }

    fn name(&self) -> &str {
        "Azure OpenAI"
    }
}

/// OpenAI backend for OpenAI or any compatible chat-completions API
pub struct OpenAIBackend {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIBackend {
    /// Create a new OpenAI backend
    ///
    /// # Example
    /// ```
    /// use docker_eyes::ai::backends::OpenAIBackend;
    /// use std::time::Duration;
    ///
    /// let backend = OpenAIBackend::new(
    ///     "sk-...".to_string(),
    ///     "gpt-4o-mini".to_string(),
    ///     Duration::from_secs(30),
    /// ).unwrap();
    /// ```
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self, AnalysisError> {
        Self::with_base_url(
            api_key,
            model,
            "https://api.openai.com/v1".to_string(),
            timeout,
        )
    }

    /// Create a new OpenAI backend with custom base URL
    ///
    /// This allows using OpenAI-compatible APIs or custom endpoints.
    pub fn with_base_url(
        api_key: String,
        model: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self, AnalysisError> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key,
            model,
            base_url,
        })
    }

    fn api_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl AnalysisBackend for OpenAIBackend {
    fn analyze<'a>(
        &'a self,
        request: &'a AnalysisRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, AnalysisError>> + Send + 'a>> {
        Box::pin(async move {
            let body = ChatRequest {
                model: Some(self.model.clone()),
                messages: chat_messages(request),
                temperature: TEMPERATURE,
                max_tokens: MAX_TOKENS,
            };

            let builder = self
                .client
                .post(self.api_url())
                .header("Authorization", format!("Bearer {}", self.api_key));

            send_chat(builder, &body, self.name()).await
        })
    }

    fn name(&self) -> &str {
        "OpenAI"
    }
}

/// Mock backend for tests and dry runs
///
/// Returns its configured responses in order, cycling after the last one.
pub struct MockBackend {
    responses: Vec<Result<String, AnalysisError>>,
    current_index: Arc<Mutex<usize>>,
    delay: Option<Duration>,
    call_count: Arc<Mutex<usize>>,
    last_request: Arc<Mutex<Option<AnalysisRequest>>>,
}

impl MockBackend {
    /// Create a mock backend with a single response
    pub fn with_response(response: Result<String, AnalysisError>) -> Self {
        Self::with_responses(vec![response])
    }

    /// Create a new mock backend with multiple responses
    pub fn with_responses(responses: Vec<Result<String, AnalysisError>>) -> Self {
        Self {
            responses,
            current_index: Arc::new(Mutex::new(0)),
            delay: None,
            call_count: Arc::new(Mutex::new(0)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Create a mock backend that always returns a canned analysis
    pub fn success() -> Self {
        Self::with_response(Ok(
            "Mock analysis: the service hit an error.\nSuggested solution: check the logs."
                .to_string(),
        ))
    }

    /// Create a mock backend that always fails
    pub fn error(message: String) -> Self {
        Self::with_response(Err(AnalysisError::BackendError(message)))
    }

    /// Delay every response
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.lock().map(|count| *count).unwrap_or(0)
    }

    pub fn last_request(&self) -> Option<AnalysisRequest> {
        self.last_request
            .lock()
            .ok()
            .and_then(|request| request.clone())
    }
}

impl AnalysisBackend for MockBackend {
    fn analyze<'a>(
        &'a self,
        request: &'a AnalysisRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, AnalysisError>> + Send + 'a>> {
        Box::pin(async move {
            if let Ok(mut count) = self.call_count.lock() {
                *count += 1;
            }
            if let Ok(mut last) = self.last_request.lock() {
                *last = Some(request.clone());
            }

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            if self.responses.is_empty() {
                return Err(AnalysisError::BackendError(
                    "Mock backend has no responses".to_string(),
                ));
            }

            let response_index = match self.current_index.lock() {
                Ok(mut index) => {
                    let current = *index % self.responses.len();
                    *index += 1;
                    current
                }
                Err(_) => 0,
            };

            self.responses[response_index].clone()
        })
    }

    fn name(&self) -> &str {
        "Mock"
    }
}


#[cfg(test)]
mod mock_backend_tests {
    use super::*;

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            error_text: "boom".to_string(),
            container_name: "web".to_string(),
            container_image: "unknown".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_backend_success() {
        let backend = MockBackend::success();
        let result = backend.analyze(&request()).await;

        assert!(result.unwrap().starts_with("Mock analysis"));
        assert_eq!(backend.call_count(), 1);
        assert_eq!(backend.last_request(), Some(request()));
    }

    #[tokio::test]
    async fn test_mock_backend_error() {
        let backend = MockBackend::error("Mock backend error".to_string());

        match backend.analyze(&request()).await {
            Err(AnalysisError::BackendError(msg)) => assert_eq!(msg, "Mock backend error"),
            other => panic!("Expected BackendError, got {:?}", other),
        }
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_backend_cycles_responses() {
        let backend = MockBackend::with_responses(vec![
            Ok("first".to_string()),
            Err(AnalysisError::Timeout),
        ]);

        assert_eq!(backend.analyze(&request()).await.unwrap(), "first");
        assert_eq!(
            backend.analyze(&request()).await,
            Err(AnalysisError::Timeout)
        );
        assert_eq!(backend.analyze(&request()).await.unwrap(), "first");
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_backend_with_delay() {
        let backend = MockBackend::success().with_delay(Duration::from_millis(20));
        let start = std::time::Instant::now();
        let _ = backend.analyze(&request()).await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
