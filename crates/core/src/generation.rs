use crate::error::{http_cause, GenerationError};
use crate::traits::{GenerationBackend, GenerationRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Local inference is slow, so this is minutes rather than seconds.
    pub timeout_secs: u64,
    pub enabled: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "llama3.1:8b".to_string(),
            base_url: "http://localhost:11434".to_string(),
            max_tokens: 2_000,
            temperature: 0.3,
            timeout_secs: 300,
            enabled: true,
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Ollama chat client.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    client: Client,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: impl Into<String>) -> Result<Self, GenerationError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            model: model.into(),
            client: Client::new(),
        })
    }

    /// Resolves the configured model against the installed ones, falling
    /// back to the first installed model. `None` when the service is down or
    /// has no models.
    pub async fn connect(config: &GenerationConfig) -> Result<Option<Self>, GenerationError> {
        let mut client = Self::new(&config.base_url, config.model.clone())?;
        if !client.is_available().await {
            warn!("generation backend is not reachable");
            return Ok(None);
        }

        let models = client.list_models().await?;
        let Some(first) = models.first() else {
            warn!("generation backend has no models installed");
            return Ok(None);
        };
        if !models.iter().any(|name| name == &config.model) {
            warn!(requested = %config.model, using = %first, "configured model not installed");
            client.model = first.clone();
        }

        info!(model = %client.model, "generation backend connected");
        Ok(Some(client))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn is_available(&self) -> bool {
        let Ok(url) = self.base_url.join("api/tags") else {
            return false;
        };
        match self.client.get(url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    pub async fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        let response = self
            .client
            .get(self.base_url.join("api/tags")?)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|error| self.transport_error(&error, PROBE_TIMEOUT))?;
        if !response.status().is_success() {
            return Err(GenerationError::Status(response.status().as_u16()));
        }
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|_| GenerationError::MalformedResponse)?;
        Ok(tags.models.into_iter().map(|tag| tag.name).collect())
    }

    fn transport_error(&self, error: &reqwest::Error, timeout: Duration) -> GenerationError {
        if error.is_timeout() {
            GenerationError::Timeout(timeout.as_secs())
        } else if error.is_connect() {
            GenerationError::Unreachable(self.base_url.to_string())
        } else {
            GenerationError::Request(http_cause(error))
        }
    }
}

#[async_trait]
impl GenerationBackend for OllamaClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });

        let response = self
            .client
            .post(self.base_url.join("api/chat")?)
            .timeout(request.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|error| self.transport_error(&error, request.timeout))?;

        if !response.status().is_success() {
            return Err(GenerationError::Status(response.status().as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|error| self.transport_error(&error, request.timeout))?;
        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|_| GenerationError::MalformedResponse)?;
        let content = parsed.message.map(|message| message.content).unwrap_or_default();
        if content.trim().is_empty() {
            return Err(GenerationError::EmptyContent);
        }

        info!(chars = content.chars().count(), "generation complete");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn request() -> GenerationRequest {
        GenerationRequest {
            system_prompt: "system".to_string(),
            user_prompt: "user".to_string(),
            max_tokens: 64,
            temperature: 0.3,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn chat_content_is_returned() -> Result<(), Box<dyn std::error::Error>> {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_body(Matcher::PartialJson(json!({
                "model": "llama3.1:8b",
                "stream": false,
                "options": { "num_predict": 64 }
            })))
            .with_status(200)
            .with_body(
                json!({
                    "message": { "role": "assistant", "content": "## Summary\nStable." },
                    "done": true
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = OllamaClient::new(&server.url(), "llama3.1:8b")?;
        let content = client.generate(&request()).await?;

        mock.assert_async().await;
        assert_eq!(content, "## Summary\nStable.");
        Ok(())
    }

    async fn generate_against(status: usize, body: &str) -> Result<String, GenerationError> {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/chat")
            .with_status(status)
            .with_body(body)
            .create_async()
            .await;
        let client = OllamaClient::new(&server.url(), "llama3.1:8b")?;
        client.generate(&request()).await
    }

    #[tokio::test]
    async fn failures_map_to_typed_errors() {
        assert!(matches!(
            generate_against(500, "").await,
            Err(GenerationError::Status(500))
        ));
        assert!(matches!(
            generate_against(200, "not json").await,
            Err(GenerationError::MalformedResponse)
        ));
        assert!(matches!(
            generate_against(200, r#"{"message":{"role":"assistant","content":"  "}}"#).await,
            Err(GenerationError::EmptyContent)
        ));
        assert!(matches!(
            generate_against(200, r#"{"done":true}"#).await,
            Err(GenerationError::EmptyContent)
        ));
    }

    #[tokio::test]
    async fn unreachable_backend_is_reported() -> Result<(), Box<dyn std::error::Error>> {
        let client = OllamaClient::new("http://127.0.0.1:9", "llama3.1:8b")?;
        assert!(!client.is_available().await);
        assert!(client.generate(&request()).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn connect_falls_back_to_an_installed_model() -> Result<(), Box<dyn std::error::Error>> {
        let mut server = Server::new_async().await;
        let _tags = server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[{"name":"mistral:7b"},{"name":"phi3:mini"}]}"#)
            .expect_at_least(1)
            .create_async()
            .await;

        let config = GenerationConfig {
            base_url: server.url(),
            ..GenerationConfig::default()
        };
        let client = OllamaClient::connect(&config).await?.expect("backend available");
        assert_eq!(client.model(), "mistral:7b");
        Ok(())
    }

    #[tokio::test]
    async fn connect_without_models_yields_none() -> Result<(), Box<dyn std::error::Error>> {
        let mut server = Server::new_async().await;
        let _tags = server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[]}"#)
            .expect_at_least(1)
            .create_async()
            .await;

        let config = GenerationConfig {
            base_url: server.url(),
            ..GenerationConfig::default()
        };
        assert!(OllamaClient::connect(&config).await?.is_none());
        Ok(())
    }
}
