//! Model management through the inference service's own CLI.
//!
//! Listing, pulling and removing models shells out to the service binary
//! rather than talking to its HTTP API, so it works the same whether or
//! not the API port is exposed.

use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum OllamaCliError {
    #[error("failed to execute {program}: {source}")]
    Exec {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The CLI ran but reported failure.
    #[error("{program} {verb} failed: {stderr}")]
    Failed {
        program: String,
        verb: &'static str,
        stderr: String,
    },
}

/// One installed model as reported by `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: String,
}

/// Thin async wrapper over the service CLI.
#[derive(Debug, Clone)]
pub struct OllamaCli {
    program: String,
}

impl OllamaCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// List installed models.
    pub async fn list(&self) -> Result<Vec<ModelInfo>, OllamaCliError> {
        let stdout = self.run("list", &[]).await?;
        Ok(parse_list(&stdout))
    }

    /// Download a model. Blocks until the pull completes.
    pub async fn pull(&self, model: &str) -> Result<(), OllamaCliError> {
        info!(model, "pulling model");
        self.run("pull", &[model]).await?;
        info!(model, "model pulled");
        Ok(())
    }

    /// Remove an installed model.
    pub async fn remove(&self, model: &str) -> Result<(), OllamaCliError> {
        info!(model, "removing model");
        self.run("rm", &[model]).await?;
        Ok(())
    }

    async fn run(&self, verb: &'static str, args: &[&str]) -> Result<String, OllamaCliError> {
        let output = Command::new(&self.program)
            .arg(verb)
            .args(args)
            .output()
            .await
            .map_err(|source| OllamaCliError::Exec {
                program: self.program.clone(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(OllamaCliError::Failed {
                program: self.program.clone(),
                verb,
                stderr: stderr.trim().to_string(),
            });
        }
        if !stderr.trim().is_empty() {
            warn!(verb, stderr = %stderr.trim(), "cli warnings");
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for OllamaCli {
    fn default() -> Self {
        Self::new("ollama")
    }
}

/// Parse `list` output: a NAME/ID/SIZE/MODIFIED header followed by one
/// row per model.
fn parse_list(stdout: &str) -> Vec<ModelInfo> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("NAME"))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let name = (*fields.first()?).to_string();
            // SIZE is two tokens, e.g. "1.2 GB".
            let size = fields.get(2..4).map_or_else(String::new, |f| f.join(" "));
            Some(ModelInfo { name, size })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_parsing_skips_header_and_blank_lines() {
        let stdout = "NAME              ID            SIZE    MODIFIED\n\
                      llama3:latest     365c0bd3c000  4.7 GB  2 weeks ago\n\
                      deepseek-r1:1.5b  a42b25d8c10a  1.1 GB  3 days ago\n\n";
        let models = parse_list(stdout);
        assert_eq!(
            models,
            vec![
                ModelInfo {
                    name: "llama3:latest".into(),
                    size: "4.7 GB".into(),
                },
                ModelInfo {
                    name: "deepseek-r1:1.5b".into(),
                    size: "1.1 GB".into(),
                },
            ]
        );
    }

    #[test]
    fn list_parsing_handles_empty_output() {
        assert!(parse_list("").is_empty());
        assert!(parse_list("NAME  ID  SIZE  MODIFIED\n").is_empty());
    }

    #[tokio::test]
    async fn missing_binary_is_an_exec_error() {
        let cli = OllamaCli::new("definitely-not-a-real-binary-7f3a");
        let err = cli.list().await.unwrap_err();
        assert!(matches!(err, OllamaCliError::Exec { .. }));
    }
}
