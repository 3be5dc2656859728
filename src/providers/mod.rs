use anyhow::{Result, anyhow};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

mod chat_completions;
mod retry;

pub use chat_completions::ChatCompletions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Mistral,
    OpenAI,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Mistral => "mistral",
            ProviderKind::OpenAI => "openai",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "mistral" => Ok(ProviderKind::Mistral),
            "openai" => Ok(ProviderKind::OpenAI),
            other => Err(anyhow!(
                "unknown provider '{}' (expected mistral or openai)",
                other
            )),
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Mistral => "https://api.mistral.ai/v1",
            ProviderKind::OpenAI => "https://api.openai.com/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Mistral => "mistral-small-latest",
            ProviderKind::OpenAI => "gpt-4o-mini",
        }
    }

    fn key_env(&self) -> &'static str {
        match self {
            ProviderKind::Mistral => "MISTRAL_API_KEY",
            ProviderKind::OpenAI => "OPENAI_API_KEY",
        }
    }

    fn base_url_env(&self) -> &'static str {
        match self {
            ProviderKind::Mistral => "MISTRAL_BASE_URL",
            ProviderKind::OpenAI => "OPENAI_BASE_URL",
        }
    }
}

/// Sampling parameters sent with every chat-completion request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 2000,
            top_p: 1.0,
        }
    }
}

/// Everything the transport needs, resolved once at pipeline start.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub rate_limit_delay: Duration,
    pub sampling: Sampling,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderResponse {
    pub content: String,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: String) -> Self {
        Self {
            role: MessageRole::System,
            content,
        }
    }

    pub fn user(content: String) -> Self {
        Self {
            role: MessageRole::User,
            content,
        }
    }
}

pub type ProviderFuture = Pin<Box<dyn Future<Output = Result<ProviderResponse>> + Send>>;

/// A chat-completion backend. Builders consume `self` so a configured
/// provider can be cloned per request.
pub trait Provider: Clone + Send + Sync {
    fn append_system_input(self, input: String) -> Self;
    fn append_user_input(self, input: String) -> Self;
    fn complete(self) -> ProviderFuture;
}

pub fn resolve_key(provider: ProviderKind, override_key: Option<&str>) -> Result<String> {
    if let Some(key) = override_key.filter(|key| !key.trim().is_empty()) {
        return Ok(key.trim().to_string());
    }
    get_env(provider.key_env()).ok_or_else(|| {
        anyhow!(
            "API key not found for provider {} (set {} or pass --key)",
            provider.as_str(),
            provider.key_env()
        )
    })
}

/// Explicit override, then the provider env var, then the settings files,
/// then the provider default.
pub fn resolve_base_url(
    provider: ProviderKind,
    override_url: Option<&str>,
    configured: Option<&str>,
) -> String {
    pick_base_url(
        provider,
        override_url,
        get_env(provider.base_url_env()),
        configured,
    )
}

fn pick_base_url(
    provider: ProviderKind,
    override_url: Option<&str>,
    from_env: Option<String>,
    configured: Option<&str>,
) -> String {
    let non_blank = |value: Option<&str>| {
        value
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    non_blank(override_url)
        .or(from_env)
        .or_else(|| non_blank(configured))
        .unwrap_or_else(|| provider.default_base_url().to_string())
}

pub(crate) fn merge_usage(total: ProviderUsage, next: Option<ProviderUsage>) -> ProviderUsage {
    let Some(next) = next else {
        return total;
    };
    ProviderUsage {
        prompt_tokens: Some(total.prompt_tokens.unwrap_or(0) + next.prompt_tokens.unwrap_or(0)),
        completion_tokens: Some(
            total.completion_tokens.unwrap_or(0) + next.completion_tokens.unwrap_or(0),
        ),
        total_tokens: Some(total.total_tokens.unwrap_or(0) + next.total_tokens.unwrap_or(0)),
    }
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_parse_case_insensitively() {
        assert_eq!(ProviderKind::parse("Mistral").unwrap(), ProviderKind::Mistral);
        assert_eq!(ProviderKind::parse(" openai ").unwrap(), ProviderKind::OpenAI);
        assert!(ProviderKind::parse("gemini").is_err());
    }

    #[test]
    fn explicit_key_wins_over_environment() {
        let key = resolve_key(ProviderKind::Mistral, Some(" secret ")).unwrap();
        assert_eq!(key, "secret");
    }

    #[test]
    fn base_url_precedence() {
        let env = || Some("https://env.example/v1".to_string());
        let settings = Some("https://settings.example/v1");
        assert_eq!(
            pick_base_url(ProviderKind::Mistral, Some("https://flag.example/v1"), env(), settings),
            "https://flag.example/v1"
        );
        assert_eq!(
            pick_base_url(ProviderKind::Mistral, Some("  "), env(), settings),
            "https://env.example/v1"
        );
        assert_eq!(
            pick_base_url(ProviderKind::Mistral, None, None, settings),
            "https://settings.example/v1"
        );
        assert_eq!(
            pick_base_url(ProviderKind::OpenAI, None, None, None),
            "https://api.openai.com/v1"
        );
    }

    #[test]
    fn merge_usage_adds_missing_counts_as_zero() {
        let total = ProviderUsage {
            prompt_tokens: Some(10),
            completion_tokens: None,
            total_tokens: Some(10),
        };
        let next = ProviderUsage {
            prompt_tokens: Some(5),
            completion_tokens: Some(7),
            total_tokens: Some(12),
        };
        let merged = merge_usage(total, Some(next));
        assert_eq!(merged.prompt_tokens, Some(15));
        assert_eq!(merged.completion_tokens, Some(7));
        assert_eq!(merged.total_tokens, Some(22));
    }
}
