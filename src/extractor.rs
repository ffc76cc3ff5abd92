//! Boundary to the external structural parser.
//!
//! docweave does not parse Python itself; it consumes the JSON records a
//! tree-sitter-based extractor emits (a mapping from file path to an ordered
//! list of class/function records) and rebuilds the index from them after
//! every pass.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::types::{DocweaveError, FileRecord, Result, StructureIndex};

#[async_trait]
pub trait StructureSource: Send + Sync {
    /// Parse the tree under `root` into a fresh structure index.
    async fn index(&self, root: &Path) -> Result<StructureIndex>;
}

/// Runs the configured extractor command with the tree root as its final
/// argument and reads the record mapping from stdout.
pub struct CommandExtractor {
    command: String,
    args: Vec<String>,
}

impl CommandExtractor {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl StructureSource for CommandExtractor {
    async fn index(&self, root: &Path) -> Result<StructureIndex> {
        debug!(command = %self.command, root = %root.display(), "running structural extractor");

        let output = Command::new(&self.command)
            .args(&self.args)
            .arg(root)
            .output()
            .await
            .map_err(|e| DocweaveError::Extractor(format!("failed to spawn {}: {}", self.command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DocweaveError::Extractor(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let records: BTreeMap<String, Vec<FileRecord>> = serde_json::from_slice(&output.stdout)
            .map_err(|e| DocweaveError::Extractor(format!("unparseable extractor output: {}", e)))?;

        Ok(StructureIndex::from_records(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_extractor_parses_stdout() {
        let payload = r#"{"a.py": [{"type": "function", "details": {"method_name": "f", "source_code": "def f():\n    pass"}}]}"#;
        let extractor = CommandExtractor::new(
            "sh",
            vec!["-c".to_string(), format!("printf '%s' '{}' # root:", payload)],
        );

        let index = extractor.index(Path::new("/tmp")).await.unwrap();
        assert_eq!(index.unit_count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_extractor_failure_is_fatal() {
        let extractor = CommandExtractor::new("sh", vec!["-c".to_string(), "exit 3".to_string()]);
        let err = extractor.index(Path::new("/tmp")).await.unwrap_err();
        assert!(matches!(err, DocweaveError::Extractor(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_extractor_bad_json_is_fatal() {
        let extractor = CommandExtractor::new(
            "sh",
            vec!["-c".to_string(), "echo not-json #".to_string()],
        );
        let err = extractor.index(Path::new("/tmp")).await.unwrap_err();
        assert!(err.to_string().contains("unparseable"));
    }

    #[tokio::test]
    async fn test_missing_command_is_fatal() {
        let extractor = CommandExtractor::new("docweave-no-such-extractor", vec![]);
        assert!(extractor.index(Path::new("/tmp")).await.is_err());
    }
}
