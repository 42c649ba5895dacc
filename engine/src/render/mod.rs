//! Terminal renderer: walks a transformed document in order, writing prose
//! and running execution blocks as it reaches them.
//!
//! The tree is flattened into enter/exit steps once, so skips and stops are
//! jumps over a step index instead of unwinding a recursive walk.

mod exec;
mod failure;
mod text;

pub use failure::{detect_error_line, listing};

use std::collections::HashMap;

use rundown::ast::{NodeKind, SkipTarget};
use rundown::section::OptionSpec;
use rundown::transform::root_level;
use rundown::{Document, NodeId};
use tracing::{debug, trace};

use crate::config::RenderOptions;
use crate::context::Context;
use crate::error::{EngineError, ExitCode, Result};
use crate::executor::Executor;
use crate::stop::StopSignal;
use text::TextState;

/// What part of a document to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// From the top up to the end of the first root-level section.
    Document,
    /// The section declared by this pointer.
    Section(NodeId),
    /// One node and its children.
    Subtree(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Completed,
    StoppedOk,
    StopFail { code: i32 },
    ScriptFailed { code: i32 },
    Cancelled,
}

impl RenderOutcome {
    pub fn exit_code(self) -> ExitCode {
        match self {
            RenderOutcome::Completed | RenderOutcome::StoppedOk => ExitCode::Ok,
            RenderOutcome::StopFail { .. } => ExitCode::StopFail,
            RenderOutcome::ScriptFailed { .. } => ExitCode::ScriptFailed,
            RenderOutcome::Cancelled => ExitCode::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Enter(NodeId),
    Exit(NodeId),
}

/// What the walk does after a node is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Next,
    SkipChildren,
    JumpTo(usize),
    Stop(RenderOutcome),
}

/// A failed execution whose `on-failure` handlers may still run.
struct Failure {
    output: String,
    code: i32,
    /// Step index at which the walk ends.
    limit: usize,
}

pub struct Renderer<'d> {
    doc: &'d Document,
    ctx: &'d mut Context,
    opts: RenderOptions,
    executor: Executor,
    steps: Vec<Step>,
    enter_pos: HashMap<NodeId, usize>,
    exit_pos: HashMap<NodeId, usize>,
    open: Vec<NodeId>,
    scope: Scope,
    root_level: Option<u8>,
    /// Level of the heading the walk is under.
    level: u8,
    text: TextState,
    /// Outcome of every `if` script evaluated so far.
    predicates: HashMap<NodeId, bool>,
    failure: Option<Failure>,
    /// Depth of `sub-env` blocks around the current node.
    sub_env: usize,
}

/// Render `scope` of `doc`.
pub async fn render(
    doc: &Document,
    ctx: &mut Context,
    opts: &RenderOptions,
    stop: StopSignal,
    scope: Scope,
) -> Result<RenderOutcome> {
    let mut renderer = Renderer::new(doc, ctx, opts.clone(), stop)?;
    renderer.run(scope).await
}

impl<'d> Renderer<'d> {
    pub fn new(
        doc: &'d Document,
        ctx: &'d mut Context,
        opts: RenderOptions,
        stop: StopSignal,
    ) -> Result<Self> {
        let mut steps = Vec::with_capacity(doc.ast.len() * 2);
        flatten(doc, doc.ast.root(), &mut steps);
        let mut enter_pos = HashMap::new();
        let mut exit_pos = HashMap::new();
        for (i, step) in steps.iter().enumerate() {
            match step {
                Step::Enter(id) => enter_pos.insert(*id, i),
                Step::Exit(id) => exit_pos.insert(*id, i),
            };
        }
        Ok(Renderer {
            doc,
            ctx,
            executor: Executor::new(stop)?,
            steps,
            enter_pos,
            exit_pos,
            open: Vec::new(),
            scope: Scope::Document,
            root_level: root_level(&doc.ast),
            level: 0,
            text: TextState::new(opts.color, opts.cols),
            predicates: HashMap::new(),
            failure: None,
            sub_env: 0,
            opts,
        })
    }

    fn range(&self, scope: Scope) -> (usize, usize) {
        let enter = |id: NodeId| self.enter_pos.get(&id).copied();
        let exit = |id: NodeId| self.exit_pos.get(&id).copied();
        match scope {
            Scope::Document => (0, self.steps.len()),
            Scope::Section(pointer) => {
                let end = match self.doc.ast.kind(pointer) {
                    NodeKind::SectionPointer(p) => p.end.and_then(enter),
                    _ => None,
                };
                let start = enter(pointer).unwrap_or(self.steps.len());
                (start, end.unwrap_or(self.steps.len()))
            }
            Scope::Subtree(id) => match (enter(id), exit(id)) {
                (Some(start), Some(end)) => (start, end + 1),
                _ => (0, 0),
            },
        }
    }

    pub async fn run(&mut self, scope: Scope) -> Result<RenderOutcome> {
        self.scope = scope;
        let (start, limit) = self.range(scope);
        self.level = self.heading_level_before(start);
        debug!(?scope, start, limit, "render");

        let mut pc = start;
        loop {
            let end = self.failure.as_ref().map_or(limit, |f| f.limit.min(limit));
            if pc >= end {
                break;
            }
            if self.executor.stop_signal().is_raised() {
                self.text.flush(self.ctx, self.level)?;
                return Ok(RenderOutcome::Cancelled);
            }
            match self.steps[pc] {
                Step::Enter(id) => match self.enter(id).await? {
                    Flow::Next => {
                        self.open.push(id);
                        pc += 1;
                    }
                    Flow::SkipChildren => {
                        pc = self.exit_pos.get(&id).map_or(pc + 1, |exit| exit + 1);
                    }
                    Flow::JumpTo(target) if target > pc => {
                        trace!(node = ?id, from = pc, to = target, "jump");
                        self.fast_forward(pc + 1, target)?;
                        pc = target;
                    }
                    Flow::JumpTo(target) => {
                        return Err(EngineError::Internal(format!(
                            "node {} jumps backwards from step {pc} to {target}",
                            id.index()
                        )));
                    }
                    Flow::Stop(outcome) => {
                        self.text.flush(self.ctx, self.level)?;
                        return Ok(outcome);
                    }
                },
                Step::Exit(id) => {
                    if self.open.last() == Some(&id) {
                        self.open.pop();
                    }
                    if let Flow::Stop(outcome) = self.exit(id)? {
                        self.text.flush(self.ctx, self.level)?;
                        return Ok(outcome);
                    }
                    pc += 1;
                }
            }
        }

        self.text.flush(self.ctx, self.level)?;
        if let Some(failure) = &self.failure {
            return Ok(RenderOutcome::ScriptFailed { code: failure.code });
        }
        Ok(RenderOutcome::Completed)
    }

    /// Skip steps up to `to`, closing the nodes the walk leaves on the way.
    fn fast_forward(&mut self, from: usize, to: usize) -> Result<()> {
        for i in from..to.min(self.steps.len()) {
            if let Step::Exit(id) = self.steps[i] {
                if self.open.last() == Some(&id) {
                    self.open.pop();
                    self.close(id)?;
                }
            }
        }
        Ok(())
    }

    fn heading_level_before(&self, pos: usize) -> u8 {
        self.steps[..pos.min(self.steps.len())]
            .iter()
            .rev()
            .find_map(|step| match step {
                Step::Enter(id) => match self.doc.ast.kind(*id) {
                    NodeKind::Heading { level } => Some(*level),
                    _ => None,
                },
                Step::Exit(_) => None,
            })
            .unwrap_or(0)
    }

    fn target_pos(&self, target: SkipTarget) -> Option<usize> {
        match target {
            SkipTarget::Unresolved => None,
            SkipTarget::Node(id) => self.enter_pos.get(&id).copied(),
            SkipTarget::ExitOf(id) => self.exit_pos.get(&id).copied(),
            SkipTarget::End => Some(self.steps.len()),
        }
    }

    fn jump(&self, target: SkipTarget) -> Flow {
        match self.target_pos(target) {
            Some(pos) => Flow::JumpTo(pos),
            None => Flow::Next,
        }
    }

    /// Evaluate an `if` script once per node.
    async fn predicate(&mut self, id: NodeId, script: &str) -> Result<bool> {
        if self.opts.display_only {
            return Ok(true);
        }
        if let Some(known) = self.predicates.get(&id) {
            return Ok(*known);
        }
        let ok = self
            .executor
            .evaluate_predicate(script, self.ctx.vars(), &self.ctx.cwd)
            .await?;
        self.predicates.insert(id, ok);
        Ok(ok)
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    async fn enter(&mut self, id: NodeId) -> Result<Flow> {
        let doc = self.doc;
        let kind = doc.ast.kind(id);
        if !kind.is_inline() {
            self.text.flush(self.ctx, self.level)?;
        }

        let flow = match kind {
            NodeKind::Heading { level } => {
                self.level = *level;
                self.text.begin_inline();
                Flow::Next
            }
            NodeKind::Paragraph | NodeKind::TableCell => {
                self.text.begin_inline();
                Flow::Next
            }
            NodeKind::BlockQuote => {
                self.text.push_quote();
                Flow::Next
            }
            NodeKind::List { ordered, start } => {
                self.text.push_list(*ordered, *start);
                Flow::Next
            }
            NodeKind::Item => {
                self.text.push_item();
                Flow::Next
            }
            NodeKind::Table | NodeKind::TableRow { .. } => Flow::Next,
            NodeKind::CodeBlock(code) => {
                let body = code.text(&doc.source);
                let body = if self.sub_env > 0 {
                    rundown::envsubst::substitute(&body, |name| self.ctx.get(name))
                } else {
                    body
                };
                self.text.code_block(self.ctx, self.level, &body)?;
                Flow::SkipChildren
            }
            NodeKind::Html(_) => Flow::SkipChildren,
            NodeKind::ThematicBreak => {
                self.text.rule(self.ctx, self.level)?;
                Flow::SkipChildren
            }

            NodeKind::Text(span) => {
                self.text.push_text(span.text(&doc.source));
                Flow::Next
            }
            NodeKind::CodeSpan(span) => {
                self.text.push_code_span(span.text(&doc.source));
                Flow::SkipChildren
            }
            NodeKind::Emphasis => {
                self.text.push_style("3");
                Flow::Next
            }
            NodeKind::Strong => {
                self.text.push_style("1");
                Flow::Next
            }
            NodeKind::Strikethrough => {
                self.text.push_style("9");
                Flow::Next
            }
            NodeKind::Link { dest, .. } => {
                self.text.open_link(dest);
                Flow::Next
            }
            NodeKind::Image { .. } => {
                if self.opts.truecolor {
                    self.text.push_image_placeholder(&doc.text_of(id));
                }
                Flow::SkipChildren
            }
            NodeKind::Emoji { glyph, .. } => {
                self.text.push_text(glyph);
                Flow::Next
            }
            NodeKind::SoftBreak => {
                self.text.push_text(" ");
                Flow::Next
            }
            NodeKind::HardBreak => {
                self.text.push_text("\n");
                Flow::Next
            }
            NodeKind::EnvironmentSubstitution(expr) => {
                let value = expr
                    .evaluate(|name| self.ctx.get(name))
                    .unwrap_or_else(|| expr.raw.clone());
                self.text.push_text(&value);
                Flow::Next
            }

            NodeKind::Document
            | NodeKind::RundownOpen { .. }
            | NodeKind::RundownClose { .. }
            | NodeKind::RundownBlock { .. }
            | NodeKind::DescriptionBlock { .. }
            | NodeKind::SectionOption(_)
            | NodeKind::ConditionalEnd { .. } => Flow::Next,

            NodeKind::SectionPointer(pointer) => {
                self.export_options(&pointer.options);
                Flow::Next
            }

            NodeKind::SectionEnd { pointer } => self.section_end(*pointer),
            NodeKind::ExecutionBlock(spec) => self.execution(id, spec).await?,
            NodeKind::SaveCodeBlock {
                code,
                variable,
                suffix,
            } => {
                let body = code.text(&doc.source);
                if self.opts.display_only {
                    self.text.code_block(self.ctx, self.level, &body)?;
                } else {
                    let path = self.executor.save_code(id.index() as u32, variable, suffix, &body)?;
                    debug!(variable = %variable, path = %path.display(), "saved block");
                    self.ctx.set(variable.clone(), path.display().to_string());
                }
                Flow::SkipChildren
            }
            NodeKind::StopOk(stop) | NodeKind::StopFail(stop) => {
                let applies = match &stop.if_script {
                    Some(script) => self.predicate(id, script).await?,
                    None => true,
                };
                if applies { Flow::Next } else { Flow::SkipChildren }
            }
            NodeKind::OnFailure { pattern } => {
                let matched = self.failure.as_ref().is_some_and(|failure| {
                    regex::Regex::new(pattern).is_ok_and(|re| re.is_match(&failure.output))
                });
                if matched { Flow::Next } else { Flow::SkipChildren }
            }
            NodeKind::SubEnvBlock => {
                self.sub_env += 1;
                Flow::Next
            }
            NodeKind::ConditionalStart { if_script, end } => {
                if self.predicate(id, if_script).await? {
                    Flow::Next
                } else {
                    match end.and_then(|end| self.enter_pos.get(&end).copied()) {
                        Some(pos) => Flow::JumpTo(pos),
                        None => Flow::SkipChildren,
                    }
                }
            }
            NodeKind::ImportBlock { .. } | NodeKind::IgnoreBlock => Flow::SkipChildren,
            NodeKind::InvokeBlock(spec) => {
                self.bind_invoke_args(&spec.target, &spec.args);
                Flow::Next
            }
            NodeKind::SkipBlock { target } => self.jump(*target),
        };
        Ok(flow)
    }

    fn exit(&mut self, id: NodeId) -> Result<Flow> {
        self.close(id)?;
        let flow = match self.doc.ast.kind(id) {
            NodeKind::StopOk(stop) if !self.opts.display_only => {
                self.stop_message(stop.message.as_deref(), false)?;
                Flow::Stop(RenderOutcome::StoppedOk)
            }
            NodeKind::StopFail(stop) if !self.opts.display_only => {
                self.stop_message(stop.message.as_deref(), true)?;
                Flow::Stop(RenderOutcome::StopFail {
                    code: ExitCode::StopFail.code(),
                })
            }
            _ => Flow::Next,
        };
        Ok(flow)
    }

    /// Structural bookkeeping when the walk leaves a node.
    fn close(&mut self, id: NodeId) -> Result<()> {
        match self.doc.ast.kind(id) {
            NodeKind::Heading { level } => self.text.heading(self.ctx, *level)?,
            NodeKind::Paragraph => self.text.paragraph(self.ctx, self.level)?,
            NodeKind::TableCell => self.text.end_cell(),
            NodeKind::TableRow { head } => self.text.row(self.ctx, self.level, *head)?,
            NodeKind::BlockQuote => self.text.pop_quote(),
            NodeKind::List { .. } => self.text.pop_list(self.ctx)?,
            NodeKind::Item => {
                self.text.flush(self.ctx, self.level)?;
                self.text.pop_item();
            }
            NodeKind::Emphasis | NodeKind::Strong | NodeKind::Strikethrough => self.text.pop_style(),
            NodeKind::Link { .. } => self.text.close_link(),
            NodeKind::SubEnvBlock => {
                self.sub_env = self.sub_env.saturating_sub(1);
                self.text.flush(self.ctx, self.level)?;
            }
            kind if !kind.is_inline() => self.text.flush(self.ctx, self.level)?,
            _ => {}
        }
        Ok(())
    }

    fn section_end(&self, pointer: NodeId) -> Flow {
        if self.scope != Scope::Document {
            return Flow::Next;
        }
        let NodeKind::SectionPointer(p) = self.doc.ast.kind(pointer) else {
            return Flow::Next;
        };
        if p.level > 0 && Some(p.level) == self.root_level {
            debug!(section = %p.name, "end of first root-level section");
            Flow::Stop(RenderOutcome::Completed)
        } else {
            Flow::Next
        }
    }

    /// Export every option a section declares so scripts can reference
    /// them. Values already bound win.
    fn export_options(&mut self, options: &[OptionSpec]) {
        for option in options {
            if self.ctx.get(&option.env_binding).is_some() {
                continue;
            }
            let value = match &option.default {
                Some(default) => option.kind.normalise(default),
                None if option.kind.is_bool() => "false".to_string(),
                None => String::new(),
            };
            self.ctx.set(option.env_binding.clone(), value);
        }
    }

    /// Export invocation arguments, and target defaults for the rest.
    fn bind_invoke_args(&mut self, target: &str, args: &std::collections::BTreeMap<String, String>) {
        if let Some(section) = self.doc.section(target) {
            for option in section.options() {
                if !args.contains_key(&option.name) {
                    if let Some(default) = &option.default {
                        self.ctx.set(option.env_binding.clone(), option.kind.normalise(default));
                    }
                }
            }
        }
        for (name, value) in args {
            let binding = self
                .doc
                .section(target)
                .and_then(|s| s.options().iter().find(|o| &o.name == name).cloned())
                .map_or_else(|| OptionSpec::default_env_binding(name), |o| o.env_binding);
            self.ctx.set(binding, value.clone());
        }
    }

    fn stop_message(&mut self, message: Option<&str>, failed: bool) -> Result<()> {
        if let Some(message) = message {
            self.text.status_line(self.ctx, self.level, message, failed)?;
        }
        Ok(())
    }
}

fn flatten(doc: &Document, id: NodeId, steps: &mut Vec<Step>) {
    steps.push(Step::Enter(id));
    for child in doc.ast.children(id) {
        flatten(doc, child, steps);
    }
    steps.push(Step::Exit(id));
}
