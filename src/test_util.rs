use std::sync::{Arc, Mutex};

use anyhow::anyhow;

use crate::providers::{Provider, ProviderFuture, ProviderResponse, ProviderUsage};

type Responder = dyn Fn(usize, &str) -> Result<String, String> + Send + Sync;

/// In-process provider: replies are computed from the call number and the
/// user message, and every user message is logged.
#[derive(Clone)]
pub(crate) struct ScriptedProvider {
    responder: Arc<Responder>,
    log: Arc<Mutex<Vec<String>>>,
    user_input: Option<String>,
}

impl ScriptedProvider {
    pub(crate) fn new<F>(responder: F) -> Self
    where
        F: Fn(usize, &str) -> Result<String, String> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            log: Arc::new(Mutex::new(Vec::new())),
            user_input: None,
        }
    }

    /// Prefixes every non-separator line, which keeps segment counts intact.
    pub(crate) fn prefixing(prefix: &str) -> Self {
        let prefix = prefix.to_string();
        Self::new(move |_, input| Ok(prefix_lines(&prefix, input)))
    }

    pub(crate) fn replying(replies: Vec<Result<String, String>>) -> Self {
        let replies = Arc::new(replies);
        Self::new(move |call, _| {
            replies
                .get(call)
                .cloned()
                .unwrap_or_else(|| Err("script exhausted".to_string()))
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.log.lock().expect("log lock").len()
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.log.lock().expect("log lock").clone()
    }
}

pub(crate) fn prefix_lines(prefix: &str, input: &str) -> String {
    input
        .lines()
        .map(|line| {
            if line.trim().is_empty() || line.trim() == crate::translations::DEFAULT_SEPARATOR {
                line.to_string()
            } else {
                format!("{}{}", prefix, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl Provider for ScriptedProvider {
    fn append_system_input(self, _input: String) -> Self {
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.user_input = Some(input);
        self
    }

    fn complete(self) -> ProviderFuture {
        let input = self.user_input.unwrap_or_default();
        let call = {
            let mut log = self.log.lock().expect("log lock");
            log.push(input.clone());
            log.len() - 1
        };
        let reply = (self.responder)(call, &input);
        Box::pin(async move {
            let content = reply.map_err(|message| anyhow!(message))?;
            Ok(ProviderResponse {
                content,
                model: Some("scripted".to_string()),
                usage: Some(ProviderUsage {
                    prompt_tokens: Some(10),
                    completion_tokens: Some(5),
                    total_tokens: Some(15),
                }),
            })
        })
    }
}

pub(crate) fn with_temp_home<F, R>(func: F) -> R
where
    F: FnOnce(&std::path::Path) -> R,
{
    static HOME_MUTEX: Mutex<()> = Mutex::new(());
    let _guard = HOME_MUTEX.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let dir = tempfile::tempdir().expect("tempdir");
    let old_home = std::env::var("HOME").ok();
    // SAFETY: tests touching HOME serialize on HOME_MUTEX.
    unsafe { std::env::set_var("HOME", dir.path()) };
    let result = func(dir.path());
    match old_home {
        Some(old) => unsafe { std::env::set_var("HOME", old) },
        None => unsafe { std::env::remove_var("HOME") },
    }
    result
}
