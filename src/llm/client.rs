// src/llm/client.rs

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::{LlmConfig, Provider};
use crate::executor::run::CancelToken;
use crate::llm::prompt::LlmPrompt;

const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("API key missing: set {0}")]
    MissingApiKey(String),
    #[error("LLM request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("LLM API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("LLM response was empty or malformed")]
    EmptyResponse,
    #[error("LLM request cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct LlmRunResult {
    pub text: String,
    pub prompt_hash: String,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
}

impl ProviderConfig {
    pub fn from_config(cfg: &LlmConfig) -> Result<Self, SynthesisError> {
        let api_key = cfg
            .api_key()
            .map_err(|_| SynthesisError::MissingApiKey(cfg.key_env()))?;

        Ok(Self {
            provider: cfg.provider,
            model: cfg.model(),
            api_key,
            base_url: cfg.base_url.clone(),
        })
    }
}

/// Spaces requests out process-wide; every worker shares one instance.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    spacing: Duration,
    next_slot: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            next_slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Reserves the next slot and sleeps until it arrives. Returns `false`
    /// as soon as `cancel` fires; the reserved slot is not given back.
    pub fn wait(&self, cancel: &CancelToken) -> bool {
        let wake_at = {
            let mut slot = self.next_slot.lock().unwrap_or_else(|p| p.into_inner());
            let now = Instant::now();
            let at = slot.map_or(now, |s| s.max(now));
            *slot = Some(at + self.spacing);
            at
        };

        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= wake_at {
                return true;
            }
            thread::sleep(WAIT_SLICE.min(wake_at - now));
        }
    }
}

#[derive(Clone)]
pub struct LlmClient {
    cfg: ProviderConfig,
    http: Client,
    limiter: RateLimiter,
}

impl LlmClient {
    pub fn new(cfg: ProviderConfig, timeout: Duration, spacing: Duration) -> Result<Self, SynthesisError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            cfg,
            http,
            limiter: RateLimiter::new(spacing),
        })
    }

    pub fn from_config(cfg: &LlmConfig) -> Result<Self, SynthesisError> {
        Self::new(
            ProviderConfig::from_config(cfg)?,
            Duration::from_secs(cfg.timeout_secs),
            Duration::from_millis(cfg.request_spacing_ms),
        )
    }

    pub fn provider(&self) -> Provider {
        self.cfg.provider
    }

    /// Execute one LLM request
    pub fn run(&self, prompt: &LlmPrompt, cancel: &CancelToken) -> Result<LlmRunResult, SynthesisError> {
        let prompt_hash = prompt.hash();
        let (url, headers, body) = build_request(&self.cfg, prompt);

        if !self.limiter.wait(cancel) {
            return Err(SynthesisError::Cancelled);
        }
        debug!(provider = ?self.cfg.provider, model = %self.cfg.model, %prompt_hash, "calling LLM");

        let mut req = self.http.post(url).json(&body);
        for (k, v) in headers {
            req = req.header(k, v);
        }

        let resp = req.send()?;
        let status = resp.status();
        let raw = resp.text()?;

        if !status.is_success() {
            return Err(SynthesisError::Api {
                status: status.as_u16(),
                body: raw,
            });
        }

        let json: Value = serde_json::from_str(&raw).map_err(|_| SynthesisError::EmptyResponse)?;
        let text = extract_text(self.cfg.provider, &json).ok_or(SynthesisError::EmptyResponse)?;

        Ok(LlmRunResult { text, prompt_hash })
    }
}

fn build_request(
    cfg: &ProviderConfig,
    prompt: &LlmPrompt,
) -> (String, Vec<(&'static str, String)>, Value) {
    match cfg.provider {
        Provider::Groq | Provider::OpenAi => {
            let default_url = match cfg.provider {
                Provider::Groq => "https://api.groq.com/openai/v1/chat/completions",
                _ => "https://api.openai.com/v1/chat/completions",
            };
            let url = cfg.base_url.clone().unwrap_or_else(|| default_url.into());

            let body = serde_json::json!({
                "model": cfg.model,
                "messages": [
                    { "role": "system", "content": prompt.system },
                    { "role": "user", "content": prompt.user }
                ]
            });

            (
                url,
                vec![("Authorization", format!("Bearer {}", cfg.api_key))],
                body,
            )
        }

        Provider::Gemini => {
            let base = cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".into());
            let url = format!(
                "{}/models/{}:generateContent",
                base.trim_end_matches('/'),
                cfg.model
            );

            let body = serde_json::json!({
                "systemInstruction": { "parts": [ { "text": prompt.system } ] },
                "contents": [
                    { "role": "user", "parts": [ { "text": prompt.user } ] }
                ]
            });

            (url, vec![("x-goog-api-key", cfg.api_key.clone())], body)
        }
    }
}

fn extract_text(provider: Provider, v: &Value) -> Option<String> {
    let text = match provider {
        Provider::Groq | Provider::OpenAi => v.pointer("/choices/0/message/content"),
        Provider::Gemini => v.pointer("/candidates/0/content/parts/0/text"),
    }
    .and_then(Value::as_str)?;

    (!text.trim().is_empty()).then(|| text.to_string())
}
