use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::error::{OptimizerError, Result};

/// A remote text-completion service.
pub trait TextCompletion {
    fn complete(&self, model: &str, prompt: &str, temperature: f64) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Client for an OpenAI compatible `/completions` endpoint. The API key is
/// handed in by the caller.
#[derive(Debug, Clone)]
pub struct OpenAiCompletion {
    client: HttpClient,
    api_key: String,
    base_url: String,
}

impl OpenAiCompletion {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    pub fn new(api_key: &str) -> Result<Self> {
        Self::with_base_url(api_key, Self::DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(OptimizerError::MissingCredential);
        }
        let client = HttpClient::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(OpenAiCompletion {
            client,
            api_key: api_key.trim().to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| OptimizerError::MissingCredential)?;
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }
}

impl TextCompletion for OpenAiCompletion {
    fn complete(&self, model: &str, prompt: &str, temperature: f64) -> Result<String> {
        let url = format!("{}/completions", self.base_url);
        let request = CompletionRequest {
            model,
            prompt,
            temperature,
        };
        let response = self
            .client
            .post(url)
            .headers(self.headers()?)
            .json(&request)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|body| body.error.message)
                .unwrap_or(text);
            return Err(OptimizerError::Completion {
                status: status.as_u16(),
                message,
            });
        }

        let body: CompletionResponse = response.json()?;
        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.text)
            .ok_or_else(|| OptimizerError::Completion {
                status: status.as_u16(),
                message: "response contains no choices".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_key_is_rejected() {
        assert!(matches!(OpenAiCompletion::new("  "), Err(OptimizerError::MissingCredential)));
    }

    #[test]
    fn base_url_is_normalised() {
        let client = OpenAiCompletion::with_base_url("sk-test", "http://localhost:8080/v1/").unwrap();
        assert_eq!(client.base_url, "http://localhost:8080/v1");
        let headers = client.headers().unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer sk-test");
    }

    #[test]
    fn request_and_response_shapes() {
        let request = CompletionRequest {
            model: "gpt-3.5-turbo-instruct",
            prompt: "Generate",
            temperature: 0.5,
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"model":"gpt-3.5-turbo-instruct","prompt":"Generate","temperature":0.5}"#
        );
        let body: CompletionResponse =
            serde_json::from_str(r#"{"id":"x","choices":[{"text":"\n\n\"Labour Market\"","index":0}]}"#).unwrap();
        assert_eq!(body.choices[0].text, "\n\n\"Labour Market\"");
    }
}
