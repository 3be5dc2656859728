use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

pub mod batch;
pub mod classifier;
pub mod documents;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod providers;
pub mod settings;
pub mod translations;
pub mod translator;

#[cfg(test)]
mod test_util;

pub use error::PipelineError;
pub use pipeline::{Job, Pipeline, PipelineOptions, Stage, TranslationStats};
pub use providers::{ChatCompletions, ClientConfig, Provider, ProviderKind, ProviderUsage};
pub use translations::SplitStrategy;
pub use translator::{Status, TranslationResult, Translator};

/// A translation request plus the overrides a caller may layer on top of
/// the settings files.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub mode: String,
    pub source: String,
    pub output: Option<String>,
    pub lang: Option<String>,
    pub max_slides: Option<usize>,
    pub model: Option<String>,
    pub key: Option<String>,
    pub provider: Option<String>,
    pub base_url: Option<String>,
    pub batch_size: Option<usize>,
    pub concurrency: Option<usize>,
    pub strategy: Option<String>,
    pub settings_path: Option<String>,
    pub cancel: Option<Arc<AtomicBool>>,
}

/// Runs one request end to end against the configured chat-completion
/// endpoint. Every outcome, including bad configuration, is a result value.
pub async fn run(config: Config) -> TranslationResult {
    let job = match Job::from_request(&config.mode, &config.source, config.output.as_deref()) {
        Ok(job) => job,
        Err(err) => return TranslationResult::failed(err.to_string()),
    };
    match build_pipeline(&config) {
        Ok(pipeline) => pipeline.run(&job).await,
        Err(err) => TranslationResult::failed(format!("{:#}", err)),
    }
}

fn build_pipeline(config: &Config) -> Result<Pipeline<ChatCompletions>> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let mut settings = settings::load_settings(settings_path)?;

    if let Some(provider) = config.provider.as_deref() {
        settings.provider = ProviderKind::parse(provider)?;
    }
    if let Some(model) = non_blank(config.model.as_deref()) {
        settings.model = Some(model);
    }
    if let Some(lang) = non_blank(config.lang.as_deref()) {
        settings.target_language = lang;
    }
    if let Some(size) = config.batch_size.filter(|value| *value > 0) {
        settings.batch_size = size;
    }
    if let Some(concurrency) = config.concurrency.filter(|value| *value > 0) {
        settings.concurrency = concurrency;
    }
    if let Some(strategy) = config.strategy.as_deref() {
        let configured = match &settings.strategy {
            SplitStrategy::Separator(token) => Some(token.clone()),
            SplitStrategy::Newline => None,
        };
        settings.strategy = SplitStrategy::parse(strategy, configured.as_deref())?;
    }

    let client_config = settings
        .client_config(config.key.as_deref(), config.base_url.as_deref())
        .with_context(|| "no API key found for selected provider")?;
    let provider = ChatCompletions::new(&client_config)?;
    let translator = Translator::new(
        provider,
        settings.strategy.clone(),
        client_config.rate_limit_delay,
    );
    Ok(Pipeline::new(
        translator,
        PipelineOptions {
            target_language: settings.target_language,
            batch_size: settings.batch_size,
            concurrency: settings.concurrency,
            max_slides: config.max_slides,
            cancel: config.cancel.clone(),
        },
    ))
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
