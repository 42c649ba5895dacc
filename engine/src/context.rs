//! Execution context shared by the renderer and every executed block.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

/// Shared handle to the output stream. Cloning shares the writer, so the
/// spinner thread and the renderer never interleave partial writes.
#[derive(Clone)]
pub struct Output {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Output {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Output {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Output::new(io::stdout())
    }

    /// An in-memory output, returned together with a handle to read it back.
    pub fn capture() -> (Self, Captured) {
        let captured = Captured::default();
        (Output::new(captured.clone()), captured)
    }

    /// Write and flush in one locked step.
    pub fn emit(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.inner.lock();
        writer.write_all(bytes)?;
        writer.flush()
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Output")
    }
}

/// Bytes collected by [`Output::capture`].
#[derive(Debug, Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Environment, output and bookkeeping for one render.
#[derive(Debug)]
pub struct Context {
    env: BTreeMap<String, String>,
    pub output: Output,
    pub cols: u16,
    /// The document being rendered, exported to scripts as `RUNDOWN_FILE`.
    pub path: PathBuf,
    /// Working directory for executed scripts.
    pub cwd: PathBuf,
    /// Exit code of the last failing execution, 0 if none failed.
    pub status: i32,
}

impl Context {
    /// A context seeded with the current process environment.
    pub fn new(path: &Path, output: Output, cols: u16) -> Self {
        let mut ctx = Context::empty(path, output, cols);
        ctx.import_map(std::env::vars());
        ctx
    }

    /// A context with an empty environment.
    pub fn empty(path: &Path, output: Output, cols: u16) -> Self {
        let cwd = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        Context {
            env: BTreeMap::new(),
            output,
            cols,
            path: path.to_path_buf(),
            cwd,
            status: 0,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.env.remove(key)
    }

    /// Import one `NAME=value` string. Returns false if it has no `=`.
    pub fn import_pair(&mut self, pair: &str) -> bool {
        match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                self.set(key, value);
                true
            }
            _ => false,
        }
    }

    pub fn import_map<K, V>(&mut self, vars: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in vars {
            self.set(key, value);
        }
    }

    /// Import the output of `env`. A line without `=` continues the value
    /// of the previous line.
    pub fn import_block(&mut self, block: &str) {
        self.import_map(parse_env_block(block));
    }

    /// `NAME=value` strings for building a child process.
    pub fn snapshot(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }

    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Parse `env` output into pairs, joining continuation lines.
pub fn parse_env_block(block: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    let mut last: Option<String> = None;
    for line in block.lines() {
        match line.split_once('=') {
            Some((key, value)) if is_env_name(key) => {
                vars.insert(key.to_string(), value.to_string());
                last = Some(key.to_string());
            }
            _ => {
                if let Some(value) = last.as_ref().and_then(|k| vars.get_mut(k)) {
                    value.push('\n');
                    value.push_str(line);
                }
            }
        }
    }
    vars
}

fn is_env_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
