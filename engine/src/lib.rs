//! Executing rundown documents: binding options, running blocks and
//! rendering everything else to the terminal.

pub mod binder;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod render;
pub mod rewriter;
pub mod spinner;
pub mod stop;

pub use binder::Prompt;
pub use config::{RenderOptions, SpinnerKind};
pub use context::{Captured, Context, Output};
pub use error::{EngineError, ExitCode, Result};
pub use render::{RenderOutcome, Scope};
pub use stop::StopSignal;

use std::path::Path;

use rundown::Loaded;
use tracing::info;

/// Fail when any loaded document carries an error diagnostic.
fn check_diagnostics(loaded: &Loaded) -> Result<()> {
    match loaded.diagnostics().find(|d| d.is_error()) {
        Some(diagnostic) => Err(EngineError::Annotation(diagnostic.message.clone())),
        None => Ok(()),
    }
}

/// Render the root document with its root-level options bound from `args`.
pub async fn run_document(
    loaded: &Loaded,
    args: &[String],
    pwd: &Path,
    ctx: &mut Context,
    opts: &RenderOptions,
    stop: StopSignal,
    prompt: Option<Prompt<'_>>,
) -> Result<RenderOutcome> {
    check_diagnostics(loaded)?;
    let doc = loaded.root();
    binder::bind(&doc.root_options(), None, args, pwd, ctx, prompt)?;
    info!(path = %doc.path.display(), "rendering document");
    render::render(doc, ctx, opts, stop, Scope::Document).await
}

/// Render one section, from whichever loaded document declares it.
pub async fn run_section(
    loaded: &Loaded,
    name: &str,
    args: &[String],
    pwd: &Path,
    ctx: &mut Context,
    opts: &RenderOptions,
    stop: StopSignal,
    prompt: Option<Prompt<'_>>,
) -> Result<RenderOutcome> {
    check_diagnostics(loaded)?;
    let (doc, section) = loaded
        .find_section(name)
        .ok_or_else(|| EngineError::UnknownSection(name.to_string()))?;
    let options: Vec<_> = section.options().iter().collect();
    binder::bind(&options, Some(name), args, pwd, ctx, prompt)?;
    info!(section = name, path = %doc.path.display(), "rendering section");
    render::render(doc, ctx, opts, stop, Scope::Section(section.id)).await
}
