//! Extraction of translatable text and reinsertion of translations.

use anyhow::Result;

mod lines;
mod office;
mod xml;

pub use lines::{LineDocument, LineHandle};
pub use office::{OfficeDocument, OfficeKind, ParagraphHandle};

/// Parallel, index-aligned text units and the places they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction<H> {
    pub units: Vec<String>,
    pub handles: Vec<H>,
}

impl<H> Default for Extraction<H> {
    fn default() -> Self {
        Self {
            units: Vec::new(),
            handles: Vec::new(),
        }
    }
}

impl<H> Extraction<H> {
    pub fn push(&mut self, unit: String, handle: H) {
        self.units.push(unit);
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// A loaded document whose text can be read out and overwritten in place.
/// Handles are only valid for the document that produced them.
pub trait TranslatableDocument {
    type Handle: Copy + Send + Sync + std::fmt::Debug;

    /// Text units that pass the classifier, in document order.
    fn extract(&self) -> Extraction<Self::Handle>;

    /// Replaces the whole text behind `handle`, leaving no fragment of the
    /// previous text behind.
    fn replace_text(&mut self, handle: Self::Handle, text: &str) -> Result<()>;
}
