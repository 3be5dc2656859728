use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::batch::DEFAULT_BATCH_SIZE;
use crate::providers::{ClientConfig, ProviderKind, Sampling, resolve_base_url, resolve_key};
use crate::translations::SplitStrategy;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub target_language: String,
    pub provider: ProviderKind,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub sampling: Sampling,
    pub request_delay: Duration,
    pub timeout: Duration,
    pub batch_size: usize,
    pub concurrency: usize,
    pub strategy: SplitStrategy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_language: "Korean".to_string(),
            provider: ProviderKind::Mistral,
            base_url: None,
            model: None,
            sampling: Sampling::default(),
            request_delay: Duration::from_millis(100),
            timeout: Duration::from_secs(120),
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: 1,
            strategy: SplitStrategy::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    system: Option<SystemSettings>,
    translator: Option<TranslatorSettings>,
    pipeline: Option<PipelineSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct SystemSettings {
    target_language: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TranslatorSettings {
    provider: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    top_p: Option<f32>,
    request_delay_ms: Option<u64>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelineSettings {
    batch_size: Option<usize>,
    concurrency: Option<usize>,
    strategy: Option<String>,
    separator: Option<String>,
}

/// Embedded defaults, then `./settings.toml`, `./settings.local.toml`, the
/// same pair under `$HOME/.doc-translator`, then `extra_path`.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse default settings")?;
    settings.merge(defaults)?;

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings
                .merge(parsed)
                .with_context(|| format!("invalid settings: {}", path.display()))?;
        }
    }

    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) -> Result<()> {
        if let Some(system) = incoming.system
            && let Some(language) = non_blank(system.target_language)
        {
            self.target_language = language;
        }
        if let Some(translator) = incoming.translator {
            if let Some(provider) = non_blank(translator.provider) {
                self.provider = ProviderKind::parse(&provider)?;
            }
            if let Some(base_url) = non_blank(translator.base_url) {
                self.base_url = Some(base_url);
            }
            if let Some(model) = non_blank(translator.model) {
                self.model = Some(model);
            }
            if let Some(temperature) = translator.temperature {
                self.sampling.temperature = temperature;
            }
            if let Some(max_tokens) = translator.max_tokens.filter(|value| *value > 0) {
                self.sampling.max_tokens = max_tokens;
            }
            if let Some(top_p) = translator.top_p {
                self.sampling.top_p = top_p;
            }
            if let Some(delay) = translator.request_delay_ms {
                self.request_delay = Duration::from_millis(delay);
            }
            if let Some(timeout) = translator.timeout_secs.filter(|value| *value > 0) {
                self.timeout = Duration::from_secs(timeout);
            }
        }
        if let Some(pipeline) = incoming.pipeline {
            if let Some(size) = pipeline.batch_size.filter(|value| *value > 0) {
                self.batch_size = size;
            }
            if let Some(concurrency) = pipeline.concurrency.filter(|value| *value > 0) {
                self.concurrency = concurrency;
            }
            let separator = non_blank(pipeline.separator);
            match non_blank(pipeline.strategy) {
                Some(strategy) => {
                    self.strategy = SplitStrategy::parse(&strategy, separator.as_deref())?;
                }
                None => {
                    if let (SplitStrategy::Separator(_), Some(separator)) =
                        (&self.strategy, separator)
                    {
                        self.strategy = SplitStrategy::Separator(separator);
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolves endpoint, key and model into the transport configuration.
    /// Explicit key and base URL overrides beat environment and files.
    pub fn client_config(
        &self,
        override_key: Option<&str>,
        override_base_url: Option<&str>,
    ) -> Result<ClientConfig> {
        let api_key = resolve_key(self.provider, override_key)?;
        Ok(ClientConfig {
            endpoint: resolve_base_url(
                self.provider,
                override_base_url,
                self.base_url.as_deref(),
            ),
            api_key,
            model: self
                .model
                .clone()
                .unwrap_or_else(|| self.provider.default_model().to_string()),
            rate_limit_delay: self.request_delay,
            sampling: self.sampling,
            timeout: self.timeout,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".doc-translator"))
        }
    })
}
