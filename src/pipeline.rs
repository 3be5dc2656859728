use futures_util::{StreamExt, stream};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::batch::{self, Batch, DEFAULT_BATCH_SIZE};
use crate::documents::{LineDocument, OfficeDocument, OfficeKind, TranslatableDocument};
use crate::error::PipelineError;
use crate::providers::Provider;
use crate::translator::{RequestTally, TranslationResult, Translator};

/// One unit of work, decided once from the caller's mode and paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Pptx { source: PathBuf, output: PathBuf },
    Docx { source: PathBuf, output: PathBuf },
    TextFile { source: PathBuf, output: PathBuf },
    RawText { text: String, output: Option<PathBuf> },
}

impl Job {
    /// `mode` is `pptx`, `docx`, `file` or `text`. In `file` mode the
    /// extension picks the job; in `text` mode `source` is the text itself.
    pub fn from_request(
        mode: &str,
        source: &str,
        output: Option<&str>,
    ) -> Result<Self, PipelineError> {
        let output = output
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);
        match mode.trim().to_lowercase().as_str() {
            "pptx" => Ok(Job::Pptx {
                source: PathBuf::from(source),
                output: output.ok_or(PipelineError::MissingOutput("PPTX"))?,
            }),
            "docx" => Ok(Job::Docx {
                source: PathBuf::from(source),
                output: output.ok_or(PipelineError::MissingOutput("DOCX"))?,
            }),
            "file" => {
                let extension = file_extension(source);
                match extension.as_str() {
                    ".pptx" => Job::from_request("pptx", source, output_str(&output)),
                    ".docx" => Job::from_request("docx", source, output_str(&output)),
                    ".txt" => Ok(Job::TextFile {
                        source: PathBuf::from(source),
                        output: output.ok_or(PipelineError::MissingOutput("text file"))?,
                    }),
                    _ => Err(PipelineError::UnsupportedFileType(extension)),
                }
            }
            "text" => Ok(Job::RawText {
                text: source.to_string(),
                output,
            }),
            _ => Err(PipelineError::UnsupportedMode(mode.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Job::Pptx { .. } => "pptx",
            Job::Docx { .. } => "docx",
            Job::TextFile { .. } => "file",
            Job::RawText { .. } => "text",
        }
    }
}

fn output_str(output: &Option<PathBuf>) -> Option<&str> {
    output.as_deref().and_then(Path::to_str)
}

/// Lower-cased extension with its dot, or an empty string.
fn file_extension(source: &str) -> String {
    Path::new(source)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub target_language: String,
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_slides: Option<usize>,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            target_language: "Korean".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: 1,
            max_slides: None,
            cancel: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Extracting,
    Translating { batch: usize, of: usize },
    Reinserting,
    Persisting,
    Completed,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Idle => write!(f, "idle"),
            Stage::Extracting => write!(f, "extracting"),
            Stage::Translating { batch, of } => write!(f, "translating batch {}/{}", batch, of),
            Stage::Reinserting => write!(f, "reinserting"),
            Stage::Persisting => write!(f, "persisting"),
            Stage::Completed => write!(f, "completed"),
            Stage::Failed => write!(f, "failed"),
        }
    }
}

/// Per-document counters. Request totals and token usage live on the
/// translator's tally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TranslationStats {
    pub units: usize,
    pub batches: usize,
    pub batch_failures: usize,
    pub fallback_requests: usize,
    pub kept_original: usize,
}

struct BatchOutcome {
    offset: usize,
    texts: Vec<String>,
    failed: bool,
    fallback_requests: usize,
    kept_original: usize,
}

pub struct Pipeline<P: Provider> {
    translator: Translator<P>,
    options: PipelineOptions,
    stages: Mutex<Vec<Stage>>,
}

impl<P: Provider> Pipeline<P> {
    pub fn new(translator: Translator<P>, options: PipelineOptions) -> Self {
        Self {
            translator,
            options,
            stages: Mutex::new(vec![Stage::Idle]),
        }
    }

    pub fn translator(&self) -> &Translator<P> {
        &self.translator
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn tally(&self) -> RequestTally {
        self.translator.tally()
    }

    /// Every state entered so far, in order.
    pub fn stages(&self) -> Vec<Stage> {
        self.stages
            .lock()
            .map(|stages| stages.clone())
            .unwrap_or_default()
    }

    fn enter(&self, stage: Stage) {
        let Ok(mut stages) = self.stages.lock() else {
            return;
        };
        if stages.last() != Some(&stage) {
            debug!("stage: {}", stage);
            stages.push(stage);
        }
    }

    fn cancelled(&self) -> bool {
        self.options
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Builds the job from the request and runs it.
    pub async fn run_request(
        &self,
        mode: &str,
        source: &str,
        output: Option<&str>,
    ) -> TranslationResult {
        match Job::from_request(mode, source, output) {
            Ok(job) => self.run(&job).await,
            Err(err) => self.fail(err),
        }
    }

    /// Runs a job to a terminal state. Only pipeline-level errors produce a
    /// failed result; units that cannot be translated keep their source text.
    pub async fn run(&self, job: &Job) -> TranslationResult {
        info!("translation job: {}", job.name());
        match self.execute(job).await {
            Ok(content) => {
                self.enter(Stage::Completed);
                let tally = self.translator.tally();
                let tokens = tally
                    .usage
                    .as_ref()
                    .and_then(|usage| usage.total_tokens)
                    .unwrap_or(0);
                info!(
                    "translation completed: {} request(s), model={}, tokens={}",
                    tally.requests,
                    tally.model.as_deref().unwrap_or("-"),
                    tokens
                );
                TranslationResult::completed(content)
            }
            Err(err) => self.fail(err),
        }
    }

    fn fail(&self, err: PipelineError) -> TranslationResult {
        self.enter(Stage::Failed);
        warn!("translation failed: {}", err);
        TranslationResult::failed(err.to_string())
    }

    async fn execute(&self, job: &Job) -> Result<String, PipelineError> {
        match job {
            Job::Pptx { source, output } => {
                self.translate_package(source, output, OfficeKind::Pptx, self.options.max_slides)
                    .await
            }
            Job::Docx { source, output } => {
                self.translate_package(source, output, OfficeKind::Docx, None)
                    .await
            }
            Job::TextFile { source, output } => {
                self.enter(Stage::Extracting);
                let text =
                    fs::read_to_string(source).map_err(|err| PipelineError::io(source, err))?;
                let mut document = LineDocument::from_text(&text);
                self.translate_document(&mut document).await?;
                self.enter(Stage::Persisting);
                write_output(output, document.to_text().as_bytes())?;
                Ok(output.display().to_string())
            }
            Job::RawText { text, output } => {
                self.enter(Stage::Extracting);
                let mut document = LineDocument::from_text(text);
                self.translate_document(&mut document).await?;
                self.enter(Stage::Persisting);
                let translated = document.to_text();
                match output {
                    Some(output) => {
                        write_output(output, translated.as_bytes())?;
                        Ok(output.display().to_string())
                    }
                    None => Ok(translated),
                }
            }
        }
    }

    async fn translate_package(
        &self,
        source: &Path,
        output: &Path,
        kind: OfficeKind,
        part_limit: Option<usize>,
    ) -> Result<String, PipelineError> {
        self.enter(Stage::Extracting);
        let bytes = fs::read(source).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => PipelineError::PackageNotFound(source.to_path_buf()),
            _ => PipelineError::io(source, err),
        })?;
        let mut document = OfficeDocument::from_bytes(&bytes, kind, part_limit).map_err(|err| {
            debug!("unreadable {} package {}: {:#}", kind.as_str(), source.display(), err);
            PipelineError::PackageNotFound(source.to_path_buf())
        })?;
        info!(
            "{} package: {} part(s) open for translation",
            kind.as_str(),
            document.part_names().len()
        );
        self.translate_document(&mut document).await?;
        self.enter(Stage::Persisting);
        let bytes = document.to_bytes()?;
        write_output(output, &bytes)?;
        Ok(output.display().to_string())
    }

    /// Extracts, translates and reinserts every unit of `document` in place.
    /// Nothing is written back unless every batch has resolved.
    pub async fn translate_document<D: TranslatableDocument>(
        &self,
        document: &mut D,
    ) -> Result<TranslationStats, PipelineError> {
        self.enter(Stage::Extracting);
        let extraction = document.extract();
        let mut stats = TranslationStats {
            units: extraction.len(),
            ..TranslationStats::default()
        };
        if extraction.is_empty() {
            info!("no translatable text found");
            return Ok(stats);
        }

        let batches = batch::split(&extraction.units, self.options.batch_size);
        let total = batches.len();
        stats.batches = total;
        info!(
            "translating {} unit(s) in {} batch(es)",
            extraction.len(),
            total
        );

        let outcomes = stream::iter(batches)
            .map(|batch| self.translate_batch(batch, total))
            .buffer_unordered(self.options.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut resolved = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            resolved.push(outcome.ok_or(PipelineError::Cancelled)?);
        }

        self.enter(Stage::Reinserting);
        for outcome in resolved {
            stats.batch_failures += usize::from(outcome.failed);
            stats.fallback_requests += outcome.fallback_requests;
            stats.kept_original += outcome.kept_original;
            for (pos, text) in outcome.texts.iter().enumerate() {
                let handle = extraction.handles[outcome.offset + pos];
                document.replace_text(handle, text)?;
            }
        }

        info!(
            "batches={} batch_failures={} fallback_requests={} kept_original={}",
            stats.batches, stats.batch_failures, stats.fallback_requests, stats.kept_original
        );
        Ok(stats)
    }

    /// One batched request, then one request per unit if the batch fails.
    /// `None` when cancellation was requested before the batch started.
    async fn translate_batch(&self, batch: Batch<'_, String>, total: usize) -> Option<BatchOutcome> {
        if self.cancelled() {
            info!("cancelled before batch {}/{}", batch.index + 1, total);
            return None;
        }
        self.enter(Stage::Translating {
            batch: batch.index + 1,
            of: total,
        });
        let language = self.options.target_language.as_str();
        let mut outcome = BatchOutcome {
            offset: batch.offset,
            texts: Vec::with_capacity(batch.len()),
            failed: false,
            fallback_requests: 0,
            kept_original: 0,
        };

        match self
            .translator
            .translate_units(batch.units, language)
            .await
            .into_result()
        {
            Ok(texts) => {
                outcome.texts = texts;
                return Some(outcome);
            }
            Err(message) => {
                warn!(
                    "batch {}/{} failed: {}; retrying {} unit(s) individually",
                    batch.index + 1,
                    total,
                    message,
                    batch.len()
                );
                outcome.failed = true;
            }
        }

        for (pos, unit) in batch.units.iter().enumerate() {
            outcome.fallback_requests += 1;
            match self
                .translator
                .translate_text(unit, language)
                .await
                .into_result()
            {
                Ok(text) => outcome.texts.push(text),
                Err(message) => {
                    warn!(
                        "unit {} kept in source language: {}",
                        batch.offset + pos,
                        message
                    );
                    outcome.kept_original += 1;
                    outcome.texts.push(unit.clone());
                }
            }
        }
        Some(outcome)
    }
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    fs::write(path, bytes).map_err(|err| PipelineError::io(path, err))
}
