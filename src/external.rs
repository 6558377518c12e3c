//! External transform commands (CSS/JS compilers).
//!
//! strata does not compile stylesheets or scripts itself; it runs whatever
//! tool the site configures, one process per file:
//!
//! ```toml
//! [transform.js]
//! command = ["esbuild", "{input}", "--outfile={output}", "--sourcemap"]
//! artifacts = ["map"]
//! ```
//!
//! ## Data flow
//!
//! - `{input}` present: the file is written to a scratch directory under its
//!   own name (so tools can infer the loader from the extension) and the
//!   placeholder replaced by that path. Otherwise it is piped to stdin.
//! - `{output}` present: the result is read from that path. Otherwise it is
//!   read from stdout.
//! - Companions: for each configured suffix, `{output}.<suffix>` is read if
//!   the tool created it. Missing companions are not an error.
//!
//! ## Failure handling
//!
//! A non-zero exit, a spawn failure, or exceeding `timeout_secs` fails the
//! file being transformed. The child is killed when the timeout fires.

use crate::config::CommandConfig;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

const INPUT_PLACEHOLDER: &str = "{input}";
const OUTPUT_PLACEHOLDER: &str = "{output}";

#[derive(Error, Debug)]
pub enum ExternalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("cannot start `{program}`: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("`{program}` timed out after {secs}s")]
    Timeout { program: String, secs: u64 },
    #[error("`{program}` failed ({status}): {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Result of one command invocation.
#[derive(Debug, Default)]
pub struct ExternalOutput {
    pub output: Vec<u8>,
    /// `(suffix, content)` for every companion the tool produced.
    pub companions: Vec<(String, Vec<u8>)>,
}

/// A configured transform command.
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    argv: Vec<String>,
    timeout: Duration,
    companions: Vec<String>,
}

impl ExternalCommand {
    /// `None` when no command is configured.
    pub fn from_config(config: &CommandConfig, companions: Vec<String>) -> Option<Self> {
        if config.command.is_empty() {
            return None;
        }
        Some(Self {
            argv: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            companions,
        })
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    fn uses(&self, placeholder: &str) -> bool {
        self.argv.iter().any(|arg| arg.contains(placeholder))
    }

    /// Run the command on one file.
    ///
    /// `file_name` names the scratch input; `output_extension` the scratch
    /// output (`output.js`).
    pub async fn run(
        &self,
        input: &[u8],
        file_name: &str,
        output_extension: &str,
    ) -> Result<ExternalOutput, ExternalError> {
        let scratch = tempfile::tempdir()?;
        let input_path = scratch.path().join(file_name);
        let output_path = scratch.path().join(format!("output.{output_extension}"));
        let file_input = self.uses(INPUT_PLACEHOLDER);
        let file_output = self.uses(OUTPUT_PLACEHOLDER);

        if file_input {
            tokio::fs::write(&input_path, input).await?;
        }

        let args: Vec<String> = self.argv[1..]
            .iter()
            .map(|arg| {
                arg.replace(INPUT_PLACEHOLDER, &input_path.to_string_lossy())
                    .replace(OUTPUT_PLACEHOLDER, &output_path.to_string_lossy())
            })
            .collect();
        tracing::debug!("running {} {}", self.program(), args.join(" "));

        let mut cmd = Command::new(self.program());
        cmd.args(&args)
            .current_dir(scratch.path())
            .stdin(if file_input { Stdio::null() } else { Stdio::piped() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ExternalError::Spawn {
            program: self.program().to_string(),
            source,
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let bytes = input.to_vec();
            tokio::spawn(async move {
                // A tool that exits without reading closes the pipe; its exit
                // status reports the real problem.
                let _ = stdin.write_all(&bytes).await;
            });
        }

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    "{} timed out after {} seconds",
                    self.program(),
                    self.timeout.as_secs()
                );
                return Err(ExternalError::Timeout {
                    program: self.program().to_string(),
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            return Err(ExternalError::Failed {
                program: self.program().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let result = if file_output {
            tokio::fs::read(&output_path).await?
        } else {
            output.stdout
        };

        let mut companions = Vec::new();
        for suffix in &self.companions {
            let path = scratch
                .path()
                .join(format!("output.{output_extension}.{suffix}"));
            match tokio::fs::read(&path).await {
                Ok(bytes) => companions.push((suffix.clone(), bytes)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(ExternalOutput {
            output: result,
            companions,
        })
    }
}
