use std::collections::BTreeMap;
use std::ops::Range;

use regex::Regex;

use super::Transformer;
use crate::annotation::{self, Attributes, EXECUTION_ATTRIBUTES, FENCE_ATTRIBUTES};
use crate::ast::{
    CodeBody, ExecutionSpec, InvokeSpec, NodeId, NodeKind, SectionPointer, SkipTarget,
    SpinnerMode, StopSpec,
};
use crate::envsubst::{self, Piece};
use crate::parser::ParseError;
use crate::section::OptionSpec;

const DEFAULT_SPINNER: &str = "Running";

impl Transformer<'_> {
    // -----------------------------------------------------------------------
    // Fenced code
    // -----------------------------------------------------------------------

    /// Fold fence modifiers and a preceding childless annotation into each
    /// code block, turning it into an execution or save block when asked.
    pub(super) fn attach_fences(&mut self) {
        for id in self.ast.preorder() {
            let NodeKind::CodeBlock(code) = self.ast.kind(id).clone() else {
                continue;
            };
            let info = annotation::parse_fence_info(&code.info);
            let mut attrs = Attributes::new();

            if let Some(prev) = self.ast.prev_sibling(id) {
                if let NodeKind::RundownBlock { attrs: before, .. } = self.ast.kind(prev) {
                    if !self.ast.has_children(prev)
                        && !before.is_empty()
                        && before.all_within(FENCE_ATTRIBUTES)
                    {
                        attrs = before.clone();
                        self.ast.detach(prev);
                    }
                }
            }
            attrs.merge(&info.modifiers);
            // Modifiers are consumed here. Listings also lose the interpreter so
            // a second pass does not turn them into execution blocks.
            let runs = !attrs.has("reveal-only")
                && (attrs.any_of(EXECUTION_ATTRIBUTES)
                    || attrs.has("sub-env")
                    || annotation::is_script_interpreter(&info.interpreter));
            let code = CodeBody {
                info: if runs { info.interpreter.clone() } else { String::new() },
                ..code
            };

            if let Some(variable) = attrs.value_or_empty("save") {
                let variable = variable.to_string();
                if variable.is_empty() {
                    self.warn("`save` needs a variable name", code.span());
                    continue;
                }
                let suffix = attrs.value("as").unwrap_or("").to_string();
                self.ast.set_kind(
                    id,
                    NodeKind::SaveCodeBlock {
                        code,
                        variable,
                        suffix,
                    },
                );
            } else if attrs.has("reveal-only") {
                self.ast.set_kind(id, NodeKind::CodeBlock(code));
            } else if runs {
                let spec = self.execution_spec(&attrs, &info.interpreter, code.clone());
                if spec.reveal {
                    let exec = self.ast.alloc(NodeKind::ExecutionBlock(Box::new(spec)));
                    self.ast.insert_after(id, exec);
                    let listing = CodeBody {
                        info: String::new(),
                        ..code
                    };
                    self.ast.set_kind(id, NodeKind::CodeBlock(listing));
                } else {
                    self.ast.set_kind(id, NodeKind::ExecutionBlock(Box::new(spec)));
                }
            } else {
                if !attrs.is_empty() {
                    self.warn(
                        "annotation has no effect on this code block without an execution attribute",
                        code.span(),
                    );
                }
                self.ast.set_kind(id, NodeKind::CodeBlock(code));
            }
        }
    }

    fn execution_spec(&mut self, attrs: &Attributes, language: &str, code: CodeBody) -> ExecutionSpec {
        let interpreter = attrs
            .value("with")
            .filter(|w| !w.is_empty())
            .unwrap_or(if language.is_empty() { "bash" } else { language })
            .to_string();
        let spinner = if attrs.has("nospin") {
            SpinnerMode::Hidden
        } else if attrs.has("named-all") {
            SpinnerMode::FromScriptAll
        } else if attrs.has("named") {
            SpinnerMode::FromScript
        } else {
            SpinnerMode::Visible
        };
        let capture_env = attrs
            .value("capture-env")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        ExecutionSpec {
            id: self.next_exec_id(),
            interpreter,
            code,
            spinner,
            spinner_name: attrs
                .value("spinner")
                .filter(|s| !s.is_empty())
                .unwrap_or(DEFAULT_SPINNER)
                .to_string(),
            show_stdout: attrs.has("stdout"),
            show_stderr: attrs.has("stderr"),
            capture_env,
            stdout_into: attrs.value("stdout-into").map(str::to_string),
            substitute_env: attrs.has("sub-env"),
            replace_process: attrs.has("borg"),
            skip_on_success: attrs.has("skip-on-success"),
            skip_on_failure: attrs.has("skip-on-failure"),
            reveal: attrs.has("reveal"),
            if_script: attrs.value("if").map(str::to_string),
            skip_target: SkipTarget::Unresolved,
        }
    }

    // -----------------------------------------------------------------------
    // Annotations
    // -----------------------------------------------------------------------

    /// Resolve every remaining `RundownBlock` into its semantic node.
    pub(super) fn dispatch(&mut self) {
        for id in self.ast.preorder() {
            if !self.ast.is_attached(id) {
                continue;
            }
            let NodeKind::RundownBlock {
                attrs,
                inline,
                span,
            } = self.ast.kind(id).clone()
            else {
                continue;
            };
            // Unknown attributes on an invoke are its arguments.
            if !attrs.has("invoke") {
                for name in attrs.unknown() {
                    let mut warning = ParseError::warning(
                        format!("unknown annotation attribute `{name}`"),
                        span.clone(),
                        self.file_id,
                    )
                    .labelled("not a rundown attribute");
                    if let Some(known) = annotation::closest_attribute(name) {
                        warning = warning.with_note(format!("did you mean `{known}`?"));
                    }
                    self.diagnostics.push(warning);
                }
            }
            self.dispatch_one(id, &attrs, inline, span);
        }
    }

    fn dispatch_one(&mut self, id: NodeId, attrs: &Attributes, inline: bool, span: Range<usize>) {
        if attrs.has("import") {
            let target = attrs
                .value("from")
                .map(str::to_string)
                .or_else(|| self.link_target(id));
            self.ast.set_kind(
                id,
                NodeKind::ImportBlock {
                    target,
                    prefix: attrs.value("import").unwrap_or("").to_string(),
                    ignore_missing: attrs.has("ignore-missing"),
                },
            );
        } else if attrs.has("section") || attrs.has("label") {
            self.section(id, attrs, inline, span);
        } else if attrs.has("save") {
            self.warn("`save` must be followed by a fenced code block", span);
            self.unwrap_annotation(id);
        } else if attrs.has("opt") {
            let prose = self.text_of(id);
            let (spec, problems) = OptionSpec::from_attributes(
                attrs,
                (!prose.is_empty()).then_some(prose),
                span.clone(),
            );
            for problem in problems {
                self.error(problem, span.clone());
            }
            if spec.name.is_empty() {
                self.ast.detach(id);
            } else {
                self.ast.set_kind(id, NodeKind::SectionOption(spec));
            }
        } else if attrs.has("desc") || attrs.has("help") {
            let short = attrs
                .value("desc")
                .or(attrs.value("help"))
                .filter(|d| !d.is_empty())
                .map(str::to_string);
            self.ast.set_kind(id, NodeKind::DescriptionBlock { short });
        } else if attrs.has("stop-fail") || attrs.has("stop-ok") {
            let message = attrs
                .value("stop-fail")
                .or(attrs.value("stop-ok"))
                .filter(|m| !m.is_empty())
                .map(str::to_string);
            let stop = StopSpec {
                message,
                if_script: attrs.value("if").map(str::to_string),
            };
            let kind = if attrs.has("stop-fail") {
                NodeKind::StopFail(stop)
            } else {
                NodeKind::StopOk(stop)
            };
            self.ast.set_kind(id, kind);
        } else if attrs.has("ignore") {
            self.ast.set_kind(id, NodeKind::IgnoreBlock);
        } else if attrs.has("on-failure") {
            let pattern = attrs.value("on-failure").unwrap_or("").to_string();
            if let Err(e) = Regex::new(&pattern) {
                self.warn(format!("invalid on-failure pattern: {e}"), span);
                self.ast.detach(id);
                return;
            }
            self.ast.set_kind(id, NodeKind::OnFailure { pattern });
        } else if attrs.has("sub-env") {
            self.ast.set_kind(id, NodeKind::SubEnvBlock);
            self.split_substitutions(id);
        } else if attrs.has("invoke") {
            self.invoke(id, attrs, span);
        } else if attrs.has("skip") {
            self.ast.set_kind(
                id,
                NodeKind::SkipBlock {
                    target: SkipTarget::Unresolved,
                },
            );
        } else if let Some(script) = attrs.value("if") {
            let script = script.to_string();
            self.conditional(id, script);
        } else if attrs.any_of(EXECUTION_ATTRIBUTES) {
            self.warn("execution attributes must precede a fenced code block", span);
            self.unwrap_annotation(id);
        } else {
            self.unwrap_annotation(id);
        }
    }

    /// Drop the annotation but keep its content in place.
    fn unwrap_annotation(&mut self, id: NodeId) {
        self.ast.splice_children_after(id, id);
        self.ast.detach(id);
    }

    fn link_target(&self, id: NodeId) -> Option<String> {
        self.ast.subtree(id).into_iter().find_map(|n| match self.ast.kind(n) {
            NodeKind::Link { dest, .. } => Some(dest.clone()),
            _ => None,
        })
    }

    // -----------------------------------------------------------------------
    // Sections
    // -----------------------------------------------------------------------

    fn section(&mut self, id: NodeId, attrs: &Attributes, inline: bool, span: Range<usize>) {
        let explicit = attrs
            .value("section")
            .or(attrs.value("label"))
            .unwrap_or("")
            .trim()
            .to_string();

        let heading = if inline {
            self.ast
                .ancestors(id)
                .find(|a| matches!(self.ast.kind(*a), NodeKind::Heading { .. }))
        } else if !self.ast.has_children(id) {
            self.ast
                .next_sibling(id)
                .filter(|n| matches!(self.ast.kind(*n), NodeKind::Heading { .. }))
        } else {
            None
        };

        match heading {
            Some(heading) => {
                let level = match self.ast.kind(heading) {
                    NodeKind::Heading { level } => *level,
                    _ => 0,
                };
                self.unwrap_annotation(id);
                if inline {
                    self.trim_heading(heading);
                }
                let title = self.text_of(heading);
                let name = if explicit.is_empty() { slug(&title) } else { explicit };
                let pointer = self.ast.alloc(NodeKind::SectionPointer(Box::new(SectionPointer {
                    name,
                    heading: Some(heading),
                    level,
                    options: Vec::new(),
                    short_description: attrs
                        .value("desc")
                        .map(str::to_string)
                        .or((!title.is_empty()).then_some(title)),
                    long_description: None,
                    end: None,
                    dependencies: Vec::new(),
                    if_script: attrs.value("if").map(str::to_string),
                    span,
                })));
                self.ast.insert_before(heading, pointer);
            }
            None if self.ast.has_children(id) && !inline => {
                if explicit.is_empty() {
                    self.warn("free-standing section needs a name", span);
                    self.unwrap_annotation(id);
                    return;
                }
                let last = self.ast.splice_children_after(id, id);
                let end = self.ast.alloc(NodeKind::SectionEnd { pointer: id });
                self.ast.insert_after(last, end);
                self.ast.set_kind(
                    id,
                    NodeKind::SectionPointer(Box::new(SectionPointer {
                        name: explicit,
                        heading: None,
                        level: 0,
                        options: Vec::new(),
                        short_description: attrs.value("desc").map(str::to_string),
                        long_description: None,
                        end: Some(end),
                        dependencies: Vec::new(),
                        if_script: attrs.value("if").map(str::to_string),
                        span,
                    })),
                );
            }
            None => {
                self.warn("section annotation is not attached to a heading", span);
                self.unwrap_annotation(id);
            }
        }
    }

    /// Remove whitespace left behind by an annotation at the end of a heading.
    fn trim_heading(&mut self, heading: NodeId) {
        while let Some(last) = self.ast.last_child(heading) {
            let NodeKind::Text(span) = self.ast.kind(last) else {
                break;
            };
            let text = span.text(self.source);
            let trimmed = text.trim_end();
            if trimmed.is_empty() {
                self.ast.detach(last);
                continue;
            }
            if trimmed.len() != text.len() {
                let mut span = span.clone();
                match &mut span.literal {
                    Some(literal) => literal.truncate(trimmed.len()),
                    None => span.range.end = span.range.start + trimmed.len(),
                }
                self.ast.set_kind(last, NodeKind::Text(span));
            }
            break;
        }
    }

    // -----------------------------------------------------------------------
    // Other annotations
    // -----------------------------------------------------------------------

    fn invoke(&mut self, id: NodeId, attrs: &Attributes, span: Range<usize>) {
        let target = attrs.value("invoke").unwrap_or("").trim().to_string();
        if target.is_empty() {
            self.warn("`invoke` needs a section name", span);
            self.ast.detach(id);
            return;
        }
        let mut args = BTreeMap::new();
        if let Some(list) = attrs.value("args") {
            for pair in list.split_whitespace() {
                match pair.split_once('=') {
                    Some((k, v)) => args.insert(k.to_string(), v.to_string()),
                    None => args.insert(pair.to_string(), "true".to_string()),
                };
            }
        }
        for (name, value) in attrs.iter() {
            if annotation::KNOWN_ATTRIBUTES.contains(&name) {
                continue;
            }
            args.insert(name.to_string(), value.unwrap_or("true").to_string());
        }
        let as_dependency = attrs.value("as") == Some("dependency") || attrs.has("dependency");
        // Prose inside the invoke tag is replaced by the invoked content.
        for child in self.ast.child_ids(id) {
            self.ast.detach(child);
        }
        self.ast.set_kind(
            id,
            NodeKind::InvokeBlock(Box::new(InvokeSpec {
                target,
                args,
                as_dependency,
                keep_heading: attrs.has("keep-heading"),
                expanded: false,
                span,
            })),
        );
    }

    fn conditional(&mut self, id: NodeId, if_script: String) {
        let last = self.ast.splice_children_after(id, id);
        let end = self.ast.alloc(NodeKind::ConditionalEnd { start: id });
        self.ast.insert_after(last, end);
        self.ast.set_kind(
            id,
            NodeKind::ConditionalStart {
                if_script,
                end: Some(end),
            },
        );
    }

    /// Split every text run under `id` into literals and substitutions.
    fn split_substitutions(&mut self, id: NodeId) {
        for node in self.ast.subtree(id) {
            let NodeKind::Text(span) = self.ast.kind(node) else {
                continue;
            };
            let text = span.text(self.source).to_string();
            let pieces = envsubst::split(&text);
            if !pieces.iter().any(|p| matches!(p, Piece::Expr(..))) {
                continue;
            }
            let pieces = pieces
                .into_iter()
                .map(|p| match p {
                    Piece::Literal(range) => Ok(range),
                    Piece::Expr(expr, _) => Err(NodeKind::EnvironmentSubstitution(expr)),
                })
                .collect();
            self.split_text(node, pieces);
        }
    }
}

/// Lower-case, dash-separated form of a heading used as a section name.
pub(crate) fn slug(title: &str) -> String {
    let mut out = String::new();
    for word in title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        if !out.is_empty() {
            out.push('-');
        }
        out.push_str(&word.to_lowercase());
    }
    out
}
