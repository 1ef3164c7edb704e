/// OpenAI-compatible chat-completions generator.
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::bridge::generator::{GenerationError, GenerationRequest, Generator};
use crate::bridge::prompt;
use crate::config::BackendConfig;
use crate::schema::persona::PersonaRegistry;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Generator backed by `POST {base}/chat/completions`.
pub struct ChatBackend {
    config: BackendConfig,
    personas: PersonaRegistry,
    client: Client,
}

impl ChatBackend {
    pub fn new(config: BackendConfig, personas: PersonaRegistry) -> Result<Self, GenerationError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            config,
            personas,
            client,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn complete(&self, api_key: &str, messages: Value) -> Result<String, GenerationError> {
        let payload = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "messages": messages,
        });
        let response = self
            .client
            .post(self.config.completions_url())
            .bearer_auth(api_key)
            .header("HTTP-Referer", "http://localhost")
            .header("X-Title", "Animal Crossing LLM Mod")
            .json(&payload)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: ChatResponse = response.json()?;
        extract_content(parsed)
    }
}

impl Generator for ChatBackend {
    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(GenerationError::NotConfigured)?;
        let profile = self.personas.resolve(Some(&request.speaker));
        let system = prompt::system_prompt(&profile, request.gossip.as_ref());
        let messages = build_messages(&system, prompt::USER_PROMPT, &request.images);
        debug!(speaker = %profile.name, images = request.images.len(), "requesting dialogue");
        let raw = self.complete(api_key, messages)?;
        Ok(prompt::postprocess(&raw))
    }
}

/// System message plus a user message with optional image parts. Images
/// that cannot be read are skipped.
pub fn build_messages<P: AsRef<Path>>(system: &str, user: &str, images: &[P]) -> Value {
    let mut content = vec![json!({ "type": "text", "text": user })];
    for path in images {
        let path = path.as_ref();
        match image_data_url(path) {
            Ok(url) => content.push(json!({ "type": "image_url", "image_url": { "url": url } })),
            Err(err) => warn!(path = %path.display(), %err, "could not read screenshot"),
        }
    }
    json!([
        { "role": "system", "content": system },
        { "role": "user", "content": content },
    ])
}

pub fn image_data_url(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(bytes)))
}

fn extract_content(response: ChatResponse) -> Result<String, GenerationError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or(GenerationError::EmptyResponse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn missing_key_is_not_configured() {
        let backend = ChatBackend::new(BackendConfig::default(), PersonaRegistry::new()).unwrap();
        let err = backend.generate(&GenerationRequest::new(Some("Bob"))).unwrap_err();
        assert!(matches!(err, GenerationError::NotConfigured));
    }

    #[test]
    fn messages_without_images() {
        let none: [PathBuf; 0] = [];
        let messages = build_messages("sys", "usr", &none);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "sys");
        assert_eq!(messages[1]["content"][0]["text"], "usr");
        assert_eq!(messages[1]["content"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn images_become_data_urls() {
        let path = std::env::temp_dir().join(format!("shot-{}.png", std::process::id()));
        std::fs::write(&path, b"png!").unwrap();
        let missing = PathBuf::from("/nonexistent/shot.png");
        let messages = build_messages("sys", "usr", &[path.clone(), missing]);
        std::fs::remove_file(&path).ok();

        let parts = messages[1]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,cG5nIQ==");
    }

    #[test]
    fn response_content_is_trimmed() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "  Hi!  "}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_content(parsed).unwrap(), "Hi!");
    }

    #[test]
    fn empty_response_is_an_error() {
        for body in [
            r#"{"choices": []}"#,
            r#"{"choices": [{"message": {"content": null}}]}"#,
            r#"{"choices": [{"message": {"content": "   "}}]}"#,
            r#"{}"#,
        ] {
            let parsed: ChatResponse = serde_json::from_str(body).unwrap();
            assert!(matches!(
                extract_content(parsed),
                Err(GenerationError::EmptyResponse)
            ));
        }
    }
}
