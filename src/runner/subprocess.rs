//! Subprocess transport: invokes an external script with `--json`,
//! `--<param> <value>` flags and an input file read from stdin.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::TransportError;

use super::{Input, Runner};

/// Invokes `script_path --json --app <app> --action <action> --<k> <v>...`,
/// piping at most one input file's bytes to stdin.
pub struct SubprocessRunner {
    script_path: String,
    timeout: Duration,
}

impl SubprocessRunner {
    pub fn new(script_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            script_path: script_path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Runner for SubprocessRunner {
    async fn run(&self, input: Input) -> Result<Vec<u8>, TransportError> {
        if input.files.len() > 1 {
            return Err(TransportError::InvalidUsage(
                "subprocess runner accepts at most one input file".to_string(),
            ));
        }

        let mut cmd = Command::new(&self.script_path);
        cmd.arg("--json")
            .arg("--app")
            .arg(&input.app)
            .arg("--action")
            .arg(&input.action)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        for (key, value) in &input.params {
            cmd.arg(format!("--{key}")).arg(value);
        }

        let stdin_bytes = input.files.values().next().map(|f| f.bytes.clone());

        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        if let Some(bytes) = stdin_bytes {
            let mut stdin = child.stdin.take().expect("stdin was piped");
            stdin
                .write_all(&bytes)
                .await
                .map_err(|e| TransportError::Connection(e.to_string()))?;
            drop(stdin);
        } else {
            drop(child.stdin.take());
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        if !output.status.success() {
            return Err(TransportError::NonZeroExit(
                output.status.code().unwrap_or(-1),
            ));
        }

        Ok(output.stdout)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
