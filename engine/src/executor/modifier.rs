//! Behaviours layered onto one execution.

use std::collections::BTreeMap;
use std::io;
use std::time::Instant;

use rundown::envsubst;
use tokio::process::Command;

use super::{ExecutionResult, Stream};
use super::rpc::RpcMessage;
use crate::rewriter::{AnsiRewriter, HostCommand};
use crate::spinner::SharedSpinner;

/// Hooks run by the executor, in list order, at each stage of a run.
pub trait Modifier: Send {
    /// Adjust the script text before it is written out.
    fn rewrite_script(&mut self, _script: &mut String) {}
    fn before_spawn(&mut self, _cmd: &mut Command) {}
    fn after_spawn(&mut self, _pid: Option<u32>) {}
    fn on_output(&mut self, _stream: Stream, _bytes: &[u8]) -> io::Result<()> {
        Ok(())
    }
    fn on_rpc(&mut self, _message: &RpcMessage) {}
    fn on_exit(&mut self, _result: &mut ExecutionResult) -> io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Spinner
// ---------------------------------------------------------------------------

/// Shows the block's fixed title while it runs.
pub struct SpinnerConstant {
    spinner: SharedSpinner,
    title: String,
}

impl SpinnerConstant {
    pub fn new(spinner: SharedSpinner, title: impl Into<String>) -> Self {
        SpinnerConstant {
            spinner,
            title: title.into(),
        }
    }
}

impl Modifier for SpinnerConstant {
    fn before_spawn(&mut self, _cmd: &mut Command) {
        self.spinner.lock().set_message(&self.title);
    }

    fn after_spawn(&mut self, _pid: Option<u32>) {
        self.spinner.lock().start();
    }
}

/// Lets the script retitle the spinner with `name:` messages. With
/// `new_steps`, every title settles the previous one as its own step.
pub struct SpinnerFromScript {
    spinner: SharedSpinner,
    new_steps: bool,
}

impl SpinnerFromScript {
    pub fn new(spinner: SharedSpinner, new_steps: bool) -> Self {
        SpinnerFromScript { spinner, new_steps }
    }
}

impl Modifier for SpinnerFromScript {
    fn on_rpc(&mut self, message: &RpcMessage) {
        let RpcMessage::Name(text) = message else {
            return;
        };
        let mut spinner = self.spinner.lock();
        if self.new_steps {
            spinner.new_step(text);
        } else {
            spinner.set_message(text);
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Streams the chosen child streams through an [`AnsiRewriter`].
pub struct StdoutStream {
    rewriter: AnsiRewriter,
    stdout: bool,
    stderr: bool,
    spinner: Option<SharedSpinner>,
    env_updates: Vec<(String, String)>,
}

impl StdoutStream {
    pub fn new(rewriter: AnsiRewriter, stdout: bool, stderr: bool) -> Self {
        StdoutStream {
            rewriter,
            stdout,
            stderr,
            spinner: None,
            env_updates: Vec::new(),
        }
    }

    /// Forward `SETSPINNER` host commands to `spinner`.
    pub fn with_spinner(mut self, spinner: SharedSpinner) -> Self {
        self.spinner = Some(spinner);
        self
    }

    fn host_commands(&mut self) {
        for command in self.rewriter.take_host_commands() {
            match command {
                HostCommand::SetSpinner(text) => {
                    if let Some(spinner) = &self.spinner {
                        spinner.lock().set_message(&text);
                    }
                }
                HostCommand::SetEnv(key, value) => self.env_updates.push((key, value)),
            }
        }
    }
}

impl Modifier for StdoutStream {
    fn on_output(&mut self, stream: Stream, bytes: &[u8]) -> io::Result<()> {
        let wanted = match stream {
            Stream::Stdout => self.stdout,
            Stream::Stderr => self.stderr,
        };
        if wanted {
            self.rewriter.feed(bytes)?;
            self.host_commands();
        }
        Ok(())
    }

    fn on_exit(&mut self, result: &mut ExecutionResult) -> io::Result<()> {
        self.rewriter.finish()?;
        self.host_commands();
        result.env_updates.append(&mut self.env_updates);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Collects the environment dump written by the script trailer.
pub struct EnvironmentCapture {
    keys: Vec<String>,
    dump: Option<BTreeMap<String, String>>,
}

impl EnvironmentCapture {
    pub fn new(keys: Vec<String>) -> Self {
        EnvironmentCapture { keys, dump: None }
    }
}

impl Modifier for EnvironmentCapture {
    fn on_rpc(&mut self, message: &RpcMessage) {
        if let RpcMessage::EnvDiff(vars) = message {
            self.dump = Some(vars.clone());
        }
    }

    fn on_exit(&mut self, result: &mut ExecutionResult) -> io::Result<()> {
        let Some(dump) = self.dump.take() else {
            return Ok(());
        };
        result.captured_env = self
            .keys
            .iter()
            .filter_map(|key| dump.get(key).map(|value| (key.clone(), value.clone())))
            .collect();
        result.env_diff = Some(dump);
        Ok(())
    }
}

/// Expands `$VAR` references in the script text before it runs.
pub struct EnvSubstitution {
    vars: BTreeMap<String, String>,
}

impl EnvSubstitution {
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        EnvSubstitution { vars }
    }
}

impl Modifier for EnvSubstitution {
    fn rewrite_script(&mut self, script: &mut String) {
        *script = envsubst::substitute(script, |name| self.vars.get(name).map(String::as_str));
    }
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Measures the run for the spinner's final message.
pub struct ProgressTimer {
    started: Option<Instant>,
    spinner: Option<SharedSpinner>,
}

impl ProgressTimer {
    pub fn new(spinner: Option<SharedSpinner>) -> Self {
        ProgressTimer {
            started: None,
            spinner,
        }
    }
}

impl Modifier for ProgressTimer {
    fn after_spawn(&mut self, _pid: Option<u32>) {
        self.started = Some(Instant::now());
    }

    fn on_exit(&mut self, result: &mut ExecutionResult) -> io::Result<()> {
        if let Some(started) = self.started {
            result.duration = started.elapsed();
        }
        if let Some(spinner) = &self.spinner {
            spinner.lock().set_elapsed(result.duration);
        }
        Ok(())
    }
}
