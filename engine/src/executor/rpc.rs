//! The out-of-band channel scripts write to through `$RUNDOWN`.
//!
//! It is a FIFO carrying line-delimited messages:
//!
//! - `name: <text>` retitles the spinner
//! - `env: <K>=<V>` sets a variable in the render context
//! - `envdiff:`, then `env` output, then `:done`, replaces the environment

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::unix::pipe;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::context::parse_env_block;
use crate::error::Result;

/// Written by the executor once the child has exited.
const SENTINEL: &str = "\u{0}rundown:eof";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcMessage {
    Name(String),
    Env(String, String),
    EnvDiff(BTreeMap<String, String>),
}

/// Line-by-line message decoder.
#[derive(Debug, Default)]
pub struct RpcParser {
    envdiff: Option<String>,
}

impl RpcParser {
    pub fn line(&mut self, line: &str) -> Option<RpcMessage> {
        if let Some(block) = self.envdiff.as_mut() {
            if line.trim_end() == ":done" {
                let block = self.envdiff.take().unwrap_or_default();
                return Some(RpcMessage::EnvDiff(parse_env_block(&block)));
            }
            block.push_str(line);
            block.push('\n');
            return None;
        }

        if let Some(text) = line.strip_prefix("name:") {
            return Some(RpcMessage::Name(text.trim().to_string()));
        }
        if let Some(pair) = line.strip_prefix("env:") {
            return match pair.trim_start().split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    Some(RpcMessage::Env(key.to_string(), value.to_string()))
                }
                _ => {
                    warn!(message = %line, "malformed env message");
                    None
                }
            };
        }
        if line.trim_end() == "envdiff:" {
            self.envdiff = Some(String::new());
            return None;
        }
        if !line.trim().is_empty() {
            warn!(message = %line, "unknown rpc message");
        }
        None
    }
}

/// A FIFO in `dir` plus the task reading it.
pub struct RpcChannel {
    pub path: PathBuf,
    reader: Option<JoinHandle<()>>,
}

impl RpcChannel {
    /// Create the FIFO and start reading it. Each decoded message is sent
    /// to `tx`, wrapped by `wrap`.
    pub fn open<E: Send + 'static>(
        dir: &Path,
        id: u32,
        tx: mpsc::UnboundedSender<E>,
        wrap: fn(RpcMessage) -> E,
    ) -> Result<Self> {
        let path = dir.join(format!("rpc-{id}"));
        mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR)?;
        // Opened read-write so the reader never sees EOF between writers.
        let receiver = pipe::OpenOptions::new()
            .read_write(true)
            .open_receiver(&path)?;

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(receiver).lines();
            let mut parser = RpcParser::default();
            while let Ok(Some(line)) = lines.next_line().await {
                if line == SENTINEL {
                    break;
                }
                if let Some(message) = parser.line(&line) {
                    debug!(?message, "rpc message");
                    if tx.send(wrap(message)).is_err() {
                        break;
                    }
                }
            }
        });
        Ok(RpcChannel {
            path,
            reader: Some(reader),
        })
    }

    /// Stop the reader after it has consumed everything already written.
    pub async fn close(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        let written = std::fs::OpenOptions::new()
            .write(true)
            .open(&self.path)
            .and_then(|mut fifo| writeln!(fifo, "{SENTINEL}"));
        match written {
            Ok(()) => {
                if let Err(e) = reader.await {
                    warn!(error = %e, "rpc reader failed, messages may be lost");
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot terminate rpc reader");
                reader.abort();
            }
        }
    }
}

impl Drop for RpcChannel {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
