use std::io::{self, IsTerminal, Read};
use std::process::ExitCode;

use anyhow::{Result, anyhow};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "doc-translator",
    version,
    about = "Translate presentations, documents and text with a chat-completion model"
)]
struct Cli {
    /// Input kind: pptx, docx, file (by extension) or text
    #[arg(long = "mode", default_value = "file")]
    mode: String,

    /// Input path, or the text itself in text mode (stdin when omitted)
    source: Option<String>,

    /// Output path (required for pptx, docx and file modes)
    #[arg(short = 'o', long = "output")]
    output: Option<String>,

    /// Target language (default from settings: Korean)
    #[arg(short = 'l', long = "lang")]
    lang: Option<String>,

    /// Translate only the first N slides
    #[arg(long = "max-slides")]
    max_slides: Option<usize>,

    /// Model name
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// API key (overrides environment variables)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// Provider preset: mistral or openai
    #[arg(long = "provider")]
    provider: Option<String>,

    /// Base URL of the chat-completion API
    #[arg(long = "base-url")]
    base_url: Option<String>,

    /// Units per request
    #[arg(long = "batch-size")]
    batch_size: Option<usize>,

    /// Batches translated at the same time
    #[arg(long = "concurrency")]
    concurrency: Option<usize>,

    /// Segment joining: separator or newline
    #[arg(long = "strategy")]
    strategy: Option<String>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    doc_translator::logging::init(cli.verbose)?;

    let source = match cli.source {
        Some(source) => source,
        None if cli.mode.trim().eq_ignore_ascii_case("text") => read_stdin()?,
        None => return Err(anyhow!("SOURCE is required for {} mode", cli.mode)),
    };

    let result = doc_translator::run(doc_translator::Config {
        mode: cli.mode,
        source,
        output: cli.output,
        lang: cli.lang,
        max_slides: cli.max_slides,
        model: cli.model,
        key: cli.key,
        provider: cli.provider,
        base_url: cli.base_url,
        batch_size: cli.batch_size,
        concurrency: cli.concurrency,
        strategy: cli.strategy,
        settings_path: cli.read_settings,
        cancel: None,
    })
    .await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(if result.is_completed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn read_stdin() -> Result<String> {
    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        return Err(anyhow!("no SOURCE given and stdin is a terminal"));
    }
    let mut buffer = String::new();
    stdin.read_to_string(&mut buffer)?;
    let text = buffer.trim_end_matches(['\r', '\n']);
    if text.trim().is_empty() {
        return Err(anyhow!("stdin is empty"));
    }
    Ok(text.to_string())
}
