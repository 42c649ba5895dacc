//! Writing a block body to an executable file.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Interpreters that understand the environment dump trailer.
const SHELLS: &[&str] = &["bash", "sh", "zsh", "dash", "ksh"];

/// Appended to shell scripts that capture their environment.
const ENV_TRAILER: &str = "\n{ echo \"envdiff:\"; env; echo \":done\"; } > \"$RUNDOWN\"\n";

/// A materialised script.
#[derive(Debug, Clone)]
pub struct Script {
    /// File to execute.
    pub program: PathBuf,
    /// File whose line numbers match the block body.
    pub source: PathBuf,
    /// Lines in `source` before the first body line.
    pub header_lines: usize,
    /// Extra variables for the child.
    pub env: Vec<(String, String)>,
}

fn program_name(interpreter: &str) -> &str {
    let first = interpreter.split_whitespace().next().unwrap_or("");
    first.rsplit('/').next().unwrap_or(first)
}

pub fn is_shell(interpreter: &str) -> bool {
    SHELLS.contains(&program_name(interpreter))
}

fn shebang(interpreter: &str) -> String {
    if interpreter.contains(char::is_whitespace) {
        format!("#!/usr/bin/env -S {interpreter}\n")
    } else {
        format!("#!/usr/bin/env {interpreter}\n")
    }
}

fn write_executable(path: &Path, contents: &str) -> io::Result<()> {
    fs::write(path, contents)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

/// Write `body` into `dir` so it can be run with `interpreter`.
///
/// An interpreter containing `$FILE` is a shell command line: the body goes
/// to its own file, exported as `FILE`, and the command line becomes the
/// script.
pub fn materialise(
    dir: &Path,
    id: u32,
    interpreter: &str,
    body: &str,
    capture_env: bool,
) -> io::Result<Script> {
    let program = dir.join(format!("block-{id}.sh"));

    if interpreter.contains("$FILE") {
        let source = dir.join(format!("block-{id}.body"));
        fs::write(&source, body)?;
        let mut script = format!("#!/usr/bin/env bash\n\n{interpreter}\n");
        if capture_env {
            script.push_str(ENV_TRAILER);
        }
        write_executable(&program, &script)?;
        return Ok(Script {
            program,
            env: vec![("FILE".to_string(), source.display().to_string())],
            source,
            header_lines: 0,
        });
    }

    let mut script = shebang(interpreter);
    script.push('\n');
    let mut header_lines = 2;
    if program_name(interpreter) == "bash" {
        script.push_str("set -Eeuo pipefail\n");
        header_lines += 1;
    }
    script.push_str(body);
    if capture_env && is_shell(interpreter) {
        if !body.ends_with('\n') {
            script.push('\n');
        }
        script.push_str(ENV_TRAILER);
    }
    write_executable(&program, &script)?;
    Ok(Script {
        source: program.clone(),
        program,
        header_lines,
        env: Vec::new(),
    })
}

/// Write `body` verbatim for `<r save>`.
pub fn save(dir: &Path, id: u32, variable: &str, suffix: &str, body: &str) -> io::Result<PathBuf> {
    let suffix = match suffix {
        "" => String::new(),
        s if s.starts_with('.') => s.to_string(),
        s => format!(".{s}"),
    };
    let path = dir.join(format!("save-{id}-{}{suffix}", variable.to_ascii_lowercase()));
    fs::write(&path, body)?;
    Ok(path)
}
