//! Decides which extracted text is worth sending to the translation API.

use regex::Regex;
use std::sync::LazyLock;

const MAX_NON_ALPHABETIC_RATIO: f32 = 0.7;
const MIN_TRANSLATABLE_CHARS: usize = 4;

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://\S+$").expect("valid URL regex")
});

static SYMBOLIC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\W_0-9=+\-*/|^<>{}\[\]]+$").expect("valid symbol regex")
});

/// Why a piece of text was or was not sent to translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    Empty,
    Url,
    Symbolic,
    Normal,
}

impl TextKind {
    pub fn is_translatable(&self) -> bool {
        matches!(self, TextKind::Normal)
    }
}

pub fn classify(text: &str) -> TextKind {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return TextKind::Empty;
    }
    if URL_PATTERN.is_match(trimmed) {
        return TextKind::Url;
    }
    if is_symbolic(trimmed) {
        return TextKind::Symbolic;
    }
    TextKind::Normal
}

pub fn is_translatable(text: &str) -> bool {
    classify(text).is_translatable()
}

fn is_symbolic(trimmed: &str) -> bool {
    let total = trimmed.chars().count();
    if total < MIN_TRANSLATABLE_CHARS {
        return true;
    }
    let non_alphabetic = trimmed.chars().filter(|ch| !ch.is_alphabetic()).count();
    if non_alphabetic as f32 / total as f32 > MAX_NON_ALPHABETIC_RATIO {
        return true;
    }
    SYMBOLIC_PATTERN.is_match(trimmed)
}
