use anyhow::{Result, anyhow};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::classifier::is_translatable;
use crate::providers::{Provider, ProviderUsage, merge_usage};
use crate::translations::{SplitStrategy, render_system_prompt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Completed,
    Failed,
}

/// Tagged outcome: `translated_content` is present exactly when the status
/// is `completed`, `message` exactly when it is `failed`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationResult<T = String> {
    status: Status,
    message: Option<String>,
    translated_content: Option<T>,
}

impl<T> TranslationResult<T> {
    pub fn completed(content: T) -> Self {
        Self {
            status: Status::Completed,
            message: None,
            translated_content: Some(content),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Status::Failed,
            message: Some(message.into()),
            translated_content: None,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_completed(&self) -> bool {
        self.status == Status::Completed
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn translated_content(&self) -> Option<&T> {
        self.translated_content.as_ref()
    }

    pub fn into_result(self) -> std::result::Result<T, String> {
        match (self.translated_content, self.message) {
            (Some(content), _) => Ok(content),
            (None, message) => Err(message.unwrap_or_default()),
        }
    }
}

/// Spaces requests at least `delay` apart across every caller sharing it.
struct RateLimiter {
    delay: Duration,
    next_slot: tokio::sync::Mutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: tokio::sync::Mutex::new(None),
        }
    }

    async fn wait(&self) {
        if self.delay.is_zero() {
            return;
        }
        let at = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let base = match *next {
                Some(slot) if slot > now => slot,
                _ => now,
            };
            let at = base + self.delay;
            *next = Some(at);
            at
        };
        sleep_until(at).await;
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestTally {
    pub requests: usize,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

pub struct Translator<P: Provider> {
    provider: P,
    strategy: SplitStrategy,
    limiter: RateLimiter,
    tally: Mutex<RequestTally>,
}

impl<P: Provider> Translator<P> {
    pub fn new(provider: P, strategy: SplitStrategy, rate_limit_delay: Duration) -> Self {
        Self {
            provider,
            strategy,
            limiter: RateLimiter::new(rate_limit_delay),
            tally: Mutex::new(RequestTally::default()),
        }
    }

    pub fn strategy(&self) -> &SplitStrategy {
        &self.strategy
    }

    /// Requests sent so far, with merged token usage.
    pub fn tally(&self) -> RequestTally {
        self.tally
            .lock()
            .map(|tally| tally.clone())
            .unwrap_or_default()
    }

    pub async fn translate_text(&self, text: &str, target_language: &str) -> TranslationResult {
        match self
            .translate_units(&[text], target_language)
            .await
            .into_result()
        {
            Ok(mut units) => TranslationResult::completed(units.pop().unwrap_or_default()),
            Err(message) => TranslationResult::failed(message),
        }
    }

    /// Translates `units` in one request. Units the classifier rejects are
    /// never sent and come back unchanged at their original position.
    pub async fn translate_units<S: AsRef<str>>(
        &self,
        units: &[S],
        target_language: &str,
    ) -> TranslationResult<Vec<String>> {
        let mut output = units
            .iter()
            .map(|unit| unit.as_ref().to_string())
            .collect::<Vec<_>>();
        let pending = units
            .iter()
            .enumerate()
            .filter(|(_, unit)| is_translatable(unit.as_ref()))
            .map(|(idx, unit)| (idx, unit.as_ref()))
            .collect::<Vec<_>>();
        if pending.is_empty() {
            return TranslationResult::completed(output);
        }

        let segments = pending.iter().map(|(_, text)| *text).collect::<Vec<_>>();
        match self.request(&segments, target_language).await {
            Ok(translated) => {
                for ((idx, _), text) in pending.iter().zip(translated) {
                    output[*idx] = text;
                }
                TranslationResult::completed(output)
            }
            Err(err) => TranslationResult::failed(format!("{:#}", err)),
        }
    }

    async fn request(&self, segments: &[&str], target_language: &str) -> Result<Vec<String>> {
        let system_prompt = render_system_prompt(target_language, &self.strategy, segments.len())?;
        let user_input = self.strategy.join(segments);

        self.limiter.wait().await;
        debug!("sending {} segment(s) to translation", segments.len());
        let response = self
            .provider
            .clone()
            .append_system_input(system_prompt)
            .append_user_input(user_input)
            .complete()
            .await;
        self.record(response.as_ref().ok().map(|response| {
            (response.model.clone(), response.usage.clone())
        }));
        let response = response?;

        let translated = self.strategy.split(&response.content, segments.len());
        if translated.len() != segments.len() {
            return Err(anyhow!(
                "batch integrity failure: sent {} segment(s), received {}",
                segments.len(),
                translated.len()
            ));
        }
        Ok(translated)
    }

    fn record(&self, response: Option<(Option<String>, Option<ProviderUsage>)>) {
        let Ok(mut tally) = self.tally.lock() else {
            return;
        };
        tally.requests += 1;
        if let Some((model, usage)) = response {
            if tally.model.is_none() {
                tally.model = model;
            }
            if usage.is_some() {
                let total = tally.usage.take().unwrap_or_default();
                tally.usage = Some(merge_usage(total, usage));
            }
        }
    }
}
