// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! External decoder process (e.g. `rtl_433 -F json`).
//!
//! Spawns the configured command with piped stdout and exposes its output as
//! an [`AsyncJsonLines`] reading source. Stderr lines are forwarded to the log
//! at warn level. When stdout closes the source simply ends.

use crate::config::DecoderConfig;
use crate::source::AsyncJsonLines;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// How long a decoder with closed stdout may take to exit before it is killed.
pub const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Decoder process errors.
#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("failed to spawn decoder '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("decoder stdout was not captured")]
    NoStdout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Running decoder process.
pub struct DecoderProcess {
    command: String,
    child: Child,
    readings: AsyncJsonLines<BufReader<ChildStdout>>,
}

impl DecoderProcess {
    /// Spawn the decoder described by `config`.
    ///
    /// The child is killed if the handle is dropped.
    pub fn spawn(config: &DecoderConfig) -> Result<Self, DecoderError> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DecoderError::Spawn {
                command: config.command.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(DecoderError::NoStdout)?;

        if let Some(stderr) = child.stderr.take() {
            let command = config.command.clone();
            tokio::spawn(forward_stderr(command, stderr));
        }

        tracing::info!(
            command = %config.command,
            args = ?config.args,
            pid = ?child.id(),
            "Decoder started"
        );

        Ok(Self {
            command: config.command.clone(),
            child,
            readings: AsyncJsonLines::new(BufReader::new(stdout)),
        })
    }

    /// Readings decoded from stdout.
    pub fn readings(&mut self) -> &mut AsyncJsonLines<BufReader<ChildStdout>> {
        &mut self.readings
    }

    /// Command name.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Stop the decoder (if still running) and reap it.
    ///
    /// A decoder whose output already ended gets [`EXIT_GRACE`] to exit on
    /// its own before it is killed.
    pub async fn shutdown(mut self) -> Result<ExitStatus, DecoderError> {
        if self.readings.is_exhausted() {
            if let Ok(status) = tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
                let status = status?;
                tracing::info!(command = %self.command, %status, "Decoder exited");
                return Ok(status);
            }
        }
        if self.child.try_wait()?.is_none() {
            // May race with a natural exit
            let _ = self.child.start_kill();
        }
        let status = self.child.wait().await?;
        tracing::info!(command = %self.command, %status, "Decoder stopped");
        Ok(status)
    }
}

/// Log decoder stderr until it closes. Lines are read as bytes so invalid
/// UTF-8 never stops the forwarder while the child still writes.
async fn forward_stderr(command: String, stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                tracing::warn!(decoder = %command, "{}", line.trim_end());
            }
            Err(e) => {
                tracing::warn!(decoder = %command, error = %e, "Decoder stderr read failed");
                break;
            }
        }
    }
}
