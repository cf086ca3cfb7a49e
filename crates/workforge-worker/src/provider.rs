//! Provider abstraction consumed by the Worker Runtime.
//!
//! Per the design note in §9, the engine and worker only ever see an opaque
//! `Generate(ctx, prompt, params) -> text`; this crate models that as a
//! tagged-variant enum so new providers can be added without touching the
//! runtime. Kept deliberately thin: the actual inference call is out of
//! scope (§1), so `Remote` issues a minimal HTTP POST and treats any non-2xx
//! or malformed response as a provider error, while `Local` is a pluggable
//! closure-backed stand-in for an in-process or subprocess model.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::error::{Result, WorkerError};

/// Parameters threaded through to a provider call.
#[derive(Debug, Clone)]
pub struct GenerateParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.2,
        }
    }
}

/// A text-generation backend. `Local` and `Remote` are the two variants named
/// in §9; more can be added as sibling variants without touching callers that
/// only match on `Provider::generate`.
pub enum Provider {
    Local(LocalProvider),
    Remote(RemoteProvider),
}

impl Provider {
    pub fn name(&self) -> &str {
        match self {
            Provider::Local(p) => &p.name,
            Provider::Remote(p) => &p.name,
        }
    }

    pub async fn generate(&self, prompt: &str, params: &GenerateParams) -> Result<String> {
        match self {
            Provider::Local(p) => p.generate(prompt, params).await,
            Provider::Remote(p) => p.generate(prompt, params).await,
        }
    }
}

/// An in-process provider, e.g. a rule-based responder or an embedded model
/// invoked through a caller-supplied closure.
pub struct LocalProvider {
    name: String,
    generate_fn: Arc<dyn Fn(&str, &GenerateParams) -> Result<String> + Send + Sync>,
}

impl LocalProvider {
    pub fn new(
        name: impl Into<String>,
        generate_fn: impl Fn(&str, &GenerateParams) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            generate_fn: Arc::new(generate_fn),
        }
    }

    async fn generate(&self, prompt: &str, params: &GenerateParams) -> Result<String> {
        (self.generate_fn)(prompt, params)
    }
}

/// An HTTP-backed remote provider. The wire format is intentionally generic
/// JSON (`{"prompt": ..., "max_tokens": ..., "temperature": ...}` in,
/// `{"text": ...}` out) since the real inference API is out of scope here.
pub struct RemoteProvider {
    name: String,
    base_url: String,
    api_key: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl RemoteProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    async fn generate(&self, prompt: &str, params: &GenerateParams) -> Result<String> {
        let body = json!({
            "prompt": prompt,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        });

        let response = tokio::time::timeout(
            self.timeout,
            self.client
                .post(&self.base_url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| WorkerError::ProviderTimeout {
            provider: self.name.clone(),
            elapsed_ms: self.timeout.as_millis() as u64,
        })?
        .map_err(|e| WorkerError::ProviderFailed {
            provider: self.name.clone(),
            reason: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(WorkerError::ProviderFailed {
                provider: self.name.clone(),
                reason: format!("http status {}", response.status()),
            });
        }

        let value: serde_json::Value = response.json().await.map_err(|e| WorkerError::ProviderFailed {
            provider: self.name.clone(),
            reason: e.to_string(),
        })?;

        value
            .get("text")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| WorkerError::ProviderFailed {
                provider: self.name.clone(),
                reason: "response missing `text` field".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_provider_invokes_closure() {
        let provider = Provider::Local(LocalProvider::new("echo", |prompt, _params| {
            Ok(format!("echo: {prompt}"))
        }));
        let out = provider.generate("hi", &GenerateParams::default()).await.unwrap();
        assert_eq!(out, "echo: hi");
    }

    #[tokio::test]
    async fn local_provider_propagates_error() {
        let provider = Provider::Local(LocalProvider::new("failer", |_prompt, _params| {
            Err(WorkerError::Internal("boom".to_string()))
        }));
        let err = provider.generate("hi", &GenerateParams::default()).await;
        assert!(err.is_err());
    }
}
