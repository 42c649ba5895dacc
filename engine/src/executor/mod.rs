//! Running one block as a child process.
//!
//! A run has three concurrent parts: the child itself, a reader per output
//! stream, and the reader of the RPC FIFO. All of them feed one queue that
//! the executor drains in arrival order, so modifiers see output and
//! messages sequentially. Everything is joined before `execute` returns.

pub mod modifier;
pub mod rpc;
pub mod script;

pub use modifier::Modifier;

use std::collections::BTreeMap;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::stop::StopSignal;
use rpc::{RpcChannel, RpcMessage};

const SPAWN_ATTEMPTS: u32 = 5;
const READ_BUFFER: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

enum Event {
    Output(Stream, Vec<u8>),
    Rpc(RpcMessage),
}

/// What to run.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub id: u32,
    pub interpreter: &'a str,
    pub script: &'a str,
    /// Append the environment dump trailer.
    pub capture_env: bool,
    pub cwd: &'a Path,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Both streams interleaved in arrival order.
    pub output: Vec<u8>,
    /// Values of the requested `capture-env` keys.
    pub captured_env: BTreeMap<String, String>,
    /// The full environment dump, when the script wrote one.
    pub env_diff: Option<BTreeMap<String, String>>,
    /// `env:` messages and `SETENV` commands, in order.
    pub env_updates: Vec<(String, String)>,
    pub duration: Duration,
    /// File whose lines match the block body, for error reports.
    pub script_path: PathBuf,
    pub header_lines: usize,
    pub cancelled: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.cancelled
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

/// Runs blocks for one render. Scripts, saved blocks and FIFOs live in a
/// scratch directory removed when the executor is dropped.
pub struct Executor {
    dir: TempDir,
    stop: StopSignal,
}

impl Executor {
    pub fn new(stop: StopSignal) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("rundown-").tempdir()?;
        debug!(dir = %dir.path().display(), "scratch directory");
        Ok(Executor { dir, stop })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Write a `<r save>` block and return its path.
    pub fn save_code(&self, id: u32, variable: &str, suffix: &str, body: &str) -> Result<PathBuf> {
        Ok(script::save(self.dir(), id, variable, suffix, body)?)
    }

    /// Run `script` with `bash -c`; true when it exits zero.
    pub async fn evaluate_predicate(
        &self,
        script: &str,
        env: impl Iterator<Item = (&str, &str)>,
        cwd: &Path,
    ) -> Result<bool> {
        let status = Command::new("bash")
            .arg("-c")
            .arg(script)
            .env_clear()
            .envs(env)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await?;
        debug!(script, success = status.success(), "predicate");
        Ok(status.success())
    }

    /// Run one block to completion, or until the stop signal is raised.
    pub async fn execute(
        &self,
        invocation: Invocation<'_>,
        modifiers: &mut [Box<dyn Modifier>],
    ) -> Result<ExecutionResult> {
        let mut text = invocation.script.to_string();
        for modifier in modifiers.iter_mut() {
            modifier.rewrite_script(&mut text);
        }
        let script = script::materialise(
            self.dir(),
            invocation.id,
            invocation.interpreter,
            &text,
            invocation.capture_env,
        )?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut rpc = RpcChannel::open(self.dir(), invocation.id, tx.clone(), Event::Rpc)?;

        let mut cmd = Command::new(&script.program);
        cmd.env_clear()
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .envs(script.env.iter().map(|(k, v)| (k, v)))
            .env("RUNDOWN", &rpc.path)
            .current_dir(invocation.cwd)
            // The child runs in its own process group, away from the terminal.
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        for modifier in modifiers.iter_mut() {
            modifier.before_spawn(&mut cmd);
        }

        let mut child = spawn(&mut cmd).await?;
        let pid = child.id();
        info!(block = invocation.id, interpreter = invocation.interpreter, pid = ?pid, "spawned");
        for modifier in modifiers.iter_mut() {
            modifier.after_spawn(pid);
        }

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(read_stream(stdout, Stream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(read_stream(stderr, Stream::Stderr, tx.clone()));
        }
        drop(tx);

        let mut result = ExecutionResult {
            script_path: script.source.clone(),
            header_lines: script.header_lines,
            ..ExecutionResult::default()
        };

        let status = loop {
            tokio::select! {
                biased;
                _ = self.stop.raised() => {
                    if let Some(pid) = pid {
                        kill_group(pid);
                    }
                    result.cancelled = true;
                    break child.wait().await?;
                }
                Some(event) = rx.recv() => {
                    handle(event, &mut result, modifiers)?;
                }
                status = child.wait() => break status?,
            }
        };

        for reader in readers {
            if let Err(e) = reader.await {
                warn!(error = %e, "output reader failed, output may be truncated");
            }
        }
        rpc.close().await;
        while let Some(event) = rx.recv().await {
            handle(event, &mut result, modifiers)?;
        }

        result.exit_code = if result.cancelled { 130 } else { exit_code(status) };
        info!(block = invocation.id, exit_code = result.exit_code, "exited");
        for modifier in modifiers.iter_mut() {
            modifier.on_exit(&mut result)?;
        }
        Ok(result)
    }

    /// Replace the current process with the block. Only returns on failure.
    pub fn replace_process(&self, invocation: Invocation<'_>) -> EngineError {
        use std::os::unix::process::CommandExt;

        let script = match script::materialise(
            self.dir(),
            invocation.id,
            invocation.interpreter,
            invocation.script,
            false,
        ) {
            Ok(script) => script,
            Err(e) => return e.into(),
        };
        // The scratch directory must outlive this process image.
        let kept = self.dir.path().to_path_buf();
        info!(block = invocation.id, dir = %kept.display(), "replacing process");
        let error = std::process::Command::new(&script.program)
            .env_clear()
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .envs(script.env.iter().map(|(k, v)| (k, v)))
            .current_dir(invocation.cwd)
            .exec();
        EngineError::Internal(format!("cannot replace process: {error}"))
    }
}

fn handle(
    event: Event,
    result: &mut ExecutionResult,
    modifiers: &mut [Box<dyn Modifier>],
) -> Result<()> {
    match event {
        Event::Output(stream, bytes) => {
            match stream {
                Stream::Stdout => result.stdout.extend_from_slice(&bytes),
                Stream::Stderr => result.stderr.extend_from_slice(&bytes),
            }
            result.output.extend_from_slice(&bytes);
            for modifier in modifiers.iter_mut() {
                modifier.on_output(stream, &bytes)?;
            }
        }
        Event::Rpc(message) => {
            if let RpcMessage::Env(key, value) = &message {
                result.env_updates.push((key.clone(), value.clone()));
            }
            for modifier in modifiers.iter_mut() {
                modifier.on_rpc(&message);
            }
        }
    }
    Ok(())
}

/// Spawn, retrying while the freshly written script is still busy.
async fn spawn(cmd: &mut Command) -> Result<tokio::process::Child> {
    let mut attempt = 1;
    loop {
        match cmd.spawn() {
            Ok(child) => return Ok(child),
            Err(e) if e.raw_os_error() == Some(Errno::ETXTBSY as i32) && attempt < SPAWN_ATTEMPTS => {
                debug!(attempt, "script busy, retrying spawn");
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn read_stream(
    mut stream: impl AsyncRead + Unpin + Send + 'static,
    which: Stream,
    tx: mpsc::UnboundedSender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Event::Output(which, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(stream = ?which, error = %e, "read failed");
                    break;
                }
            }
        }
    })
}

fn kill_group(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    info!(pid, "stop requested, killing process group");
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        warn!(pid, error = %e, "cannot kill process group");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::modifier::EnvironmentCapture;

    fn invocation<'a>(id: u32, script: &'a str, cwd: &'a Path) -> Invocation<'a> {
        Invocation {
            id,
            interpreter: "bash",
            script,
            capture_env: false,
            cwd,
            env: std::env::vars().collect(),
        }
    }

    #[tokio::test]
    async fn collects_streams_and_exit_code() {
        let executor = Executor::new(StopSignal::new()).unwrap();
        let cwd = std::env::temp_dir();
        let result = executor
            .execute(invocation(1, "echo out\necho err >&2\nexit 3\n", &cwd), &mut [])
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout_text(), "out\n");
        assert_eq!(result.stderr_text(), "err\n");
        assert_eq!(result.header_lines, 3);
    }

    #[tokio::test]
    async fn rpc_messages_reach_the_result() {
        let executor = Executor::new(StopSignal::new()).unwrap();
        let cwd = std::env::temp_dir();
        let mut inv = invocation(2, "echo 'env: GREETING=hello' > \"$RUNDOWN\"\nexport X=42\n", &cwd);
        inv.capture_env = true;
        let mut modifiers: Vec<Box<dyn Modifier>> =
            vec![Box::new(EnvironmentCapture::new(vec!["X".into()]))];
        let result = executor.execute(inv, &mut modifiers).await.unwrap();
        assert!(result.success());
        assert_eq!(result.env_updates, vec![("GREETING".to_string(), "hello".to_string())]);
        assert_eq!(result.captured_env.get("X").map(String::as_str), Some("42"));
    }

    #[tokio::test]
    async fn file_placeholder_exports_body_path() {
        let executor = Executor::new(StopSignal::new()).unwrap();
        let cwd = std::env::temp_dir();
        let mut inv = invocation(3, "line one\n", &cwd);
        inv.interpreter = "cat \"$FILE\"";
        let result = executor.execute(inv, &mut []).await.unwrap();
        assert_eq!(result.stdout_text(), "line one\n");
    }

    #[tokio::test]
    async fn stop_kills_the_child() {
        let stop = StopSignal::new();
        let executor = Executor::new(stop.clone()).unwrap();
        let cwd = std::env::temp_dir();
        let raise = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stop.raise();
        });
        let started = std::time::Instant::now();
        let result = executor
            .execute(invocation(4, "sleep 30\n", &cwd), &mut [])
            .await
            .unwrap();
        raise.await.unwrap();
        assert!(result.cancelled);
        assert_eq!(result.exit_code, 130);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn predicates_follow_exit_status() {
        let executor = Executor::new(StopSignal::new()).unwrap();
        let cwd = std::env::temp_dir();
        let env: Vec<(String, String)> = std::env::vars().collect();
        let vars = || env.iter().map(|(k, v)| (k.as_str(), v.as_str()));
        assert!(executor.evaluate_predicate("true", vars(), &cwd).await.unwrap());
        assert!(!executor.evaluate_predicate("false", vars(), &cwd).await.unwrap());
    }
}
