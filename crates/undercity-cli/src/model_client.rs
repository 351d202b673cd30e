//! The binary's concrete, out-of-process [`ModelClient`].
//!
//! The core treats the model client as opaque (spec.md §1, §6): this is the
//! one concrete wiring the CLI supplies, grounded on `bobisme-maw`'s
//! `src/exec.rs` subprocess-with-captured-stdout pattern. The child process
//! named by `UNDERCITY_MODEL_CMD` is handed a JSON-encoded `ModelRequest` on
//! stdin and must emit one JSON `ModelMessage` per line of stdout.

use std::io::{BufRead, BufReader, Write as _};
use std::process::{Child, ChildStdout, Command, Stdio};

use undercity_core::model_client::{ModelClient, ModelMessage, ModelRequest};

/// Shells out to a configured command for every `query`, feeding it the
/// request as one line of JSON on stdin and reading one `ModelMessage` per
/// line of stdout until the child exits or emits a terminal `Result`.
pub struct ProcessModelClient {
    command: String,
    args: Vec<String>,
}

impl ProcessModelClient {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

impl ModelClient for ProcessModelClient {
    fn query(&self, request: ModelRequest) -> Box<dyn Iterator<Item = ModelMessage> + Send> {
        let mut child = match Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(command = %self.command, error = %e, "failed to spawn model client process");
                return Box::new(std::iter::empty());
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Ok(line) = serde_json::to_string(&request) {
                let _ = writeln!(stdin, "{line}");
            }
        }

        let stdout = child.stdout.take().expect("stdout was piped");
        Box::new(ModelMessageStream {
            _child: child,
            lines: BufReader::new(stdout).lines(),
        })
    }
}

/// Iterates parsed `ModelMessage`s out of the child's stdout, holding the
/// `Child` alive for the duration so it isn't reaped mid-stream.
struct ModelMessageStream {
    _child: Child,
    lines: std::io::Lines<BufReader<ChildStdout>>,
}

impl Iterator for ModelMessageStream {
    type Item = ModelMessage;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "error reading model client stdout");
                    return None;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(message) => return Some(message),
                Err(e) => {
                    tracing::warn!(error = %e, line = %line, "skipping unparseable model message");
                    continue;
                }
            }
        }
    }
}
