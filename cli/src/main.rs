mod logging;
mod picker;

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context as _, Result};
use clap::Parser;
use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream, WriteColor};
use tracing::{debug, info};

use engine::{Context, EngineError, ExitCode, Output, RenderOptions, Scope, StopSignal};
use rundown::{LoadError, Loaded, OptionSpec, loader};

#[derive(Parser)]
#[command(
    name = "rundown",
    version,
    about = "Run annotated Markdown documents",
    override_usage = "rundown [FLAGS] [DOCUMENT] [SECTION] [OPTIONS...]"
)]
struct Cli {
    /// Pick a section interactively
    #[arg(long)]
    ask: bool,

    /// Keep picking sections until an empty answer
    #[arg(long)]
    ask_repeat: bool,

    /// Section to run when none is given
    #[arg(long, value_name = "SECTION")]
    default: Option<String>,

    /// Console width
    #[arg(long)]
    cols: Option<u16>,

    /// Write a debug log to rundown.log
    #[arg(long)]
    debug: bool,

    /// Render without executing anything
    #[arg(long)]
    display: bool,

    /// Print section names for shell completion
    #[arg(long, value_name = "SHELL")]
    completions: Option<String>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Optional document, then a section and its options
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

/// What the positional arguments select.
#[derive(Debug, Default, PartialEq)]
struct Target {
    document: Option<PathBuf>,
    section: Option<String>,
    options: Vec<String>,
}

fn split_target(args: &[String]) -> Target {
    let mut rest = args;
    let mut target = Target::default();
    if let Some(first) = rest.first() {
        if first.ends_with(".md") && Path::new(first).is_file() {
            target.document = Some(PathBuf::from(first));
            rest = &rest[1..];
        }
    }
    if let Some(first) = rest.first() {
        if !first.starts_with('-') && !first.starts_with('+') {
            target.section = Some(first.clone());
            rest = &rest[1..];
        }
    }
    target.options = rest.to_vec();
    target
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = logging::init_logging(cli.debug) {
        eprintln!("warning: {e:#}");
    }

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            e.downcast_ref::<EngineError>()
                .map_or(ExitCode::Internal, EngineError::exit_code)
                .code()
        }
    };
    process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let color_choice = if cli.no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };
    let target = split_target(&cli.args);
    let pwd = std::env::current_dir().context("cannot determine the current directory")?;
    let path = match target.document {
        Some(path) => path,
        None => loader::find_document(&pwd).map_err(EngineError::from)?,
    };
    let loaded = match loader::load(&path) {
        Ok(loaded) => loaded,
        Err(e) => {
            if let Some((_, span)) = e.location() {
                if emit_load_error(&path, &e, span, color_choice) {
                    return Ok(ExitCode::Invocation.code());
                }
            }
            return Err(EngineError::from(e).into());
        }
    };
    info!(path = %path.display(), documents = loaded.documents.len(), "loaded");
    emit_diagnostics(&loaded, color_choice);

    if cli.completions.is_some() {
        for name in loaded.section_names() {
            println!("{name}");
        }
        return Ok(ExitCode::Ok.code());
    }

    let mut opts = RenderOptions::from_env(cli.cols);
    if cli.no_color {
        opts.color = false;
        opts.truecolor = false;
    }
    opts.display_only = cli.display;

    if let Some(name) = &target.section {
        if target.options.iter().any(|a| a == "--help" || a == "-h") {
            print_section_help(&loaded, name, &opts).await?;
            return Ok(ExitCode::Ok.code());
        }
    }

    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted");
                stop.raise();
            }
        });
    }

    let ask = cli.ask || cli.ask_repeat;
    let mut section = target.section.or(cli.default);
    if section.is_none() && ask {
        match picker::pick_section(&loaded)? {
            Some(name) => section = Some(name),
            None => return Ok(ExitCode::Ok.code()),
        }
    }

    loop {
        let code = run_once(
            &loaded,
            section.as_deref(),
            &target.options,
            &path,
            &pwd,
            &opts,
            stop.clone(),
            ask,
        )
        .await?;
        if !cli.ask_repeat || stop.is_raised() {
            return Ok(code);
        }
        match picker::pick_section(&loaded)? {
            Some(name) => section = Some(name),
            None => return Ok(code),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_once(
    loaded: &Loaded,
    section: Option<&str>,
    options: &[String],
    path: &Path,
    pwd: &Path,
    opts: &RenderOptions,
    stop: StopSignal,
    ask: bool,
) -> Result<i32> {
    let mut ctx = Context::new(path, Output::stdout(), opts.cols);
    let mut ask_option = |option: &OptionSpec| picker::ask_option(option);
    let prompt: Option<engine::Prompt<'_>> = if ask { Some(&mut ask_option) } else { None };

    let outcome = match section {
        Some(name) => {
            let opts = RenderOptions {
                allow_replace_process: true,
                ..opts.clone()
            };
            engine::run_section(loaded, name, options, pwd, &mut ctx, &opts, stop, prompt)
                .await
                .inspect_err(|e| {
                    if matches!(e, EngineError::UnknownSection(_)) {
                        eprintln!("available sections: {}", loaded.section_names().join(", "));
                    }
                })?
        }
        None => engine::run_document(loaded, options, pwd, &mut ctx, opts, stop, prompt).await?,
    };
    debug!(?outcome, "render finished");
    Ok(outcome.exit_code().code())
}

/// `rundown <section> --help`.
async fn print_section_help(loaded: &Loaded, name: &str, opts: &RenderOptions) -> Result<()> {
    let (doc, section) = loaded
        .find_section(name)
        .ok_or_else(|| EngineError::UnknownSection(name.to_string()))?;

    let usage: Vec<String> = section.options().iter().map(OptionSpec::usage).collect();
    println!("Usage: rundown {} {}", section.name(), usage.join(" "));
    if let Some(short) = section.short_description() {
        println!("\n{short}");
    }

    if let Some(long) = section.long_description() {
        println!();
        let mut ctx = Context::new(&doc.path, Output::stdout(), opts.cols);
        let display = RenderOptions {
            display_only: true,
            ..opts.clone()
        };
        engine::render::render(doc, &mut ctx, &display, StopSignal::new(), Scope::Subtree(long)).await?;
    }

    if !section.options().is_empty() {
        println!("\nOptions:");
        let width = usage.iter().map(String::len).max().unwrap_or(0);
        for (option, usage) in section.options().iter().zip(&usage) {
            let mut line = format!("  {usage:<width$}");
            if let Some(description) = &option.description {
                line.push_str(&format!("  {description}"));
            }
            if option.required {
                line.push_str(" (required)");
            }
            if let Some(default) = &option.default {
                line.push_str(&format!(" [default: {default}]"));
            }
            line.push_str(&format!(" [env: {}]", option.env_binding));
            println!("{line}");
        }
    }
    Ok(())
}

fn emit_diagnostics(loaded: &Loaded, color_choice: ColorChoice) {
    let writer = StandardStream::stderr(color_choice);
    for message in write_diagnostics(loaded, &mut writer.lock()) {
        eprintln!("{message}");
    }
}

/// Render every diagnostic to `writer`. Returns plain messages for those that
/// could not be written.
fn write_diagnostics<W: WriteColor>(loaded: &Loaded, writer: &mut W) -> Vec<String> {
    let mut files = SimpleFiles::new();
    for doc in &loaded.documents {
        files.add(doc.path.display().to_string(), doc.source.clone());
    }
    let config = term::Config::default();
    let mut unwritten = Vec::new();
    for diagnostic in loaded.diagnostics() {
        if let Err(e) = term::emit_to_write_style(writer, &config, &files, &diagnostic.to_diagnostic()) {
            debug!(error = %e, "cannot render diagnostic");
            unwritten.push(diagnostic.to_string());
        }
    }
    unwritten
}

/// Point at the import that failed. False when the source cannot be shown.
fn emit_load_error(path: &Path, error: &LoadError, span: Range<usize>, color_choice: ColorChoice) -> bool {
    let Ok(source) = std::fs::read_to_string(path) else {
        return false;
    };
    let mut files = SimpleFiles::new();
    let file_id = files.add(path.display().to_string(), source);
    let diagnostic = Diagnostic::error()
        .with_message(error.to_string())
        .with_labels(vec![Label::primary(file_id, span)]);
    let writer = StandardStream::stderr(color_choice);
    if let Err(e) = term::emit_to_write_style(&mut writer.lock(), &term::Config::default(), &files, &diagnostic) {
        debug!(error = %e, "cannot render load error");
        return false;
    }
    true
}
