use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fatal pipeline errors. The display text is what callers see as the
/// `message` of a failed result.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Unsupported mode: {0}")]
    UnsupportedMode(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Output {0} path required.")]
    MissingOutput(&'static str),

    #[error("{}", describe_io_error(.source, .path))]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Package not found at '{}'", .0.display())]
    PackageNotFound(PathBuf),

    #[error("Translation cancelled")]
    Cancelled,

    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        PipelineError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// `[Errno 2] No such file or directory: '/no/such.txt'`
fn describe_io_error(err: &io::Error, path: &Path) -> String {
    let text = err.to_string();
    match err.raw_os_error() {
        Some(code) => {
            let suffix = format!(" (os error {})", code);
            let description = text.strip_suffix(&suffix).unwrap_or(&text);
            format!("[Errno {}] {}: '{}'", code, description, path.display())
        }
        None => format!("{}: '{}'", text, path.display()),
    }
}
