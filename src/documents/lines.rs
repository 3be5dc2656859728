use anyhow::{Result, anyhow};

use super::{Extraction, TranslatableDocument};
use crate::classifier::is_translatable;

/// Line-oriented text. Every line keeps its slot, so blank and skipped lines
/// come back exactly where they were.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDocument {
    lines: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineHandle(pub usize);

impl LineDocument {
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.split('\n').map(str::to_string).collect(),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn to_text(&self) -> String {
        self.lines.join("\n")
    }
}

impl TranslatableDocument for LineDocument {
    type Handle = LineHandle;

    fn extract(&self) -> Extraction<LineHandle> {
        let mut extraction = Extraction::default();
        for (idx, line) in self.lines.iter().enumerate() {
            if is_translatable(line) {
                extraction.push(line.trim().to_string(), LineHandle(idx));
            }
        }
        extraction
    }

    fn replace_text(&mut self, handle: LineHandle, text: &str) -> Result<()> {
        let line = self
            .lines
            .get_mut(handle.0)
            .ok_or_else(|| anyhow!("line {} does not exist", handle.0))?;
        *line = match split_text_bounds(line) {
            Some((start, end)) => format!("{}{}{}", &line[..start], text.trim(), &line[end..]),
            None => text.trim().to_string(),
        };
        Ok(())
    }
}

/// Byte range of `text` without its surrounding whitespace.
pub(crate) fn split_text_bounds(text: &str) -> Option<(usize, usize)> {
    let start = text.find(|ch: char| !ch.is_whitespace())?;
    let end = text
        .char_indices()
        .rev()
        .find(|(_, ch)| !ch.is_whitespace())
        .map(|(idx, ch)| idx + ch.len_utf8())?;
    Some((start, end))
}
