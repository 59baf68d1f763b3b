//! Decision text sources

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// Produces one decision text per trading cycle
#[async_trait]
pub trait DecisionSource: Send + Sync {
    /// Next decision text, or `None` when there is nothing new to act on
    async fn next_decision(&self) -> anyhow::Result<Option<String>>;
}

/// Reads the decision text from a file written by the external analyst
///
/// A missing file or content identical to the previous read yields `None`,
/// so the same decision is never executed twice.
pub struct FileDecisionSource {
    path: PathBuf,
    last: Mutex<Option<String>>,
}

impl FileDecisionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last: Mutex::new(None),
        }
    }
}

#[async_trait]
impl DecisionSource for FileDecisionSource {
    async fn next_decision(&self) -> anyhow::Result<Option<String>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No decision file");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }
        let mut last = self.last.lock().await;
        if last.as_deref() == Some(content.as_str()) {
            tracing::debug!(path = %self.path.display(), "Decision unchanged");
            return Ok(None);
        }
        *last = Some(content.clone());
        Ok(Some(content))
    }
}
