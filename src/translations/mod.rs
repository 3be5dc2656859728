use anyhow::{Context, Result, anyhow};
use tera::{Context as TeraContext, Tera};

pub const DEFAULT_SEPARATOR: &str = "<--!brk!-->";

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/system_prompt.tera");

/// How several segments share one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitStrategy {
    /// One segment per line. Segments containing line breaks cannot survive
    /// a round trip and end up in per-unit fallback.
    Newline,
    /// Segments joined by an out-of-band token that prose never contains.
    Separator(String),
}

impl Default for SplitStrategy {
    fn default() -> Self {
        SplitStrategy::Separator(DEFAULT_SEPARATOR.to_string())
    }
}

impl SplitStrategy {
    pub fn parse(name: &str, separator: Option<&str>) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "newline" => Ok(SplitStrategy::Newline),
            "separator" => {
                let token = separator
                    .map(str::trim)
                    .filter(|token| !token.is_empty())
                    .unwrap_or(DEFAULT_SEPARATOR);
                Ok(SplitStrategy::Separator(token.to_string()))
            }
            other => Err(anyhow!(
                "unknown split strategy '{}' (expected separator or newline)",
                other
            )),
        }
    }

    pub fn delimiter(&self) -> &str {
        match self {
            SplitStrategy::Newline => "\n",
            SplitStrategy::Separator(token) => token,
        }
    }

    fn label(&self) -> String {
        match self {
            SplitStrategy::Newline => "line breaks (one segment per line)".to_string(),
            SplitStrategy::Separator(token) => format!("the separator {}", token),
        }
    }

    pub fn join<S: AsRef<str>>(&self, segments: &[S]) -> String {
        let glue = match self {
            SplitStrategy::Newline => "\n".to_string(),
            SplitStrategy::Separator(token) => format!("\n{}\n", token),
        };
        segments
            .iter()
            .map(|segment| segment.as_ref().trim())
            .collect::<Vec<_>>()
            .join(&glue)
    }

    /// Splits a reply back into segments. Empty pieces are dropped and the
    /// caller checks the count. With the newline strategy a single-segment
    /// request keeps the whole reply; a separator token is always a boundary.
    pub fn split(&self, response: &str, expected: usize) -> Vec<String> {
        if expected == 1 && *self == SplitStrategy::Newline {
            let trimmed = response.trim();
            return if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed.to_string()]
            };
        }
        response
            .split(self.delimiter())
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect()
    }
}

pub fn render_system_prompt(
    target_language: &str,
    strategy: &SplitStrategy,
    segment_count: usize,
) -> Result<String> {
    let target_language = target_language.trim();
    if target_language.is_empty() {
        return Err(anyhow!("target language is empty"));
    }
    let mut context = TeraContext::new();
    context.insert("target_language", target_language);
    context.insert("segment_count", &segment_count);
    context.insert("delimiter_label", &strategy.label());
    Tera::one_off(SYSTEM_PROMPT_TEMPLATE, &context, false)
        .with_context(|| "failed to render system prompt")
}
