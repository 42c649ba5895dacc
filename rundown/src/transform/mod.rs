//! Rewrites a raw Markdown tree into the executable form: pairs annotation
//! markers, resolves them into semantic nodes, places section ends, expands
//! invocations and resolves skip targets.
//!
//! Running the transformer on an already transformed tree changes nothing.

mod coalesce;
mod dispatch;
mod sections;

pub use sections::{innermost_sections, root_level};

use std::ops::Range;

use crate::ast::{Ast, NodeId, NodeKind, TextSpan};
use crate::emoji;
use crate::parser::ParseError;

pub(crate) struct Transformer<'a> {
    pub(crate) source: &'a str,
    pub(crate) file_id: usize,
    pub(crate) ast: &'a mut Ast,
    pub(crate) diagnostics: Vec<ParseError>,
    next_exec_id: u32,
}

/// Transform `ast` in place, returning any diagnostics.
pub fn transform(ast: &mut Ast, source: &str, file_id: usize) -> Vec<ParseError> {
    let next_exec_id = ast
        .preorder()
        .into_iter()
        .filter_map(|id| match ast.kind(id) {
            NodeKind::ExecutionBlock(spec) => Some(spec.id + 1),
            _ => None,
        })
        .max()
        .unwrap_or(1);
    let mut transformer = Transformer {
        source,
        file_id,
        ast,
        diagnostics: Vec::new(),
        next_exec_id,
    };
    transformer.run();
    transformer.diagnostics
}

impl Transformer<'_> {
    fn run(&mut self) {
        self.merge_text();
        self.coalesce();
        self.attach_fences();
        self.dispatch();
        self.split_emoji();
        self.place_section_ends();
        crate::invoke::expand(self);
        self.populate_sections();
        self.resolve_skip_targets();
        self.merge_text();
    }

    pub(crate) fn warn(&mut self, message: impl Into<String>, span: Range<usize>) {
        self.diagnostics
            .push(ParseError::warning(message, span, self.file_id));
    }

    /// An annotation whose value is invalid. The document still loads, but
    /// callers refuse to run it.
    pub(crate) fn error(&mut self, message: impl Into<String>, span: Range<usize>) {
        self.diagnostics
            .push(ParseError::error(message, span, self.file_id));
    }

    pub(crate) fn next_exec_id(&mut self) -> u32 {
        let id = self.next_exec_id;
        self.next_exec_id += 1;
        id
    }

    /// Concatenated text content of a subtree.
    pub(crate) fn text_of(&self, id: NodeId) -> String {
        text_content(self.ast, id, self.source)
    }

    // -----------------------------------------------------------------------
    // Text runs
    // -----------------------------------------------------------------------

    /// Merge adjacent text siblings into single runs.
    fn merge_text(&mut self) {
        for id in self.ast.preorder() {
            let mut child = self.ast.first_child(id);
            while let Some(current) = child {
                let next = self.ast.next_sibling(current);
                let merged = match (self.ast.kind(current), next.map(|n| self.ast.kind(n))) {
                    (NodeKind::Text(a), Some(NodeKind::Text(b))) => merge_spans(a, b),
                    _ => None,
                };
                match (merged, next) {
                    (Some(span), Some(next)) => {
                        self.ast.set_kind(current, NodeKind::Text(span));
                        self.ast.detach(next);
                    }
                    _ => child = next,
                }
            }
        }
    }

    /// Replace a text node by a sequence of pieces. `Ok(range)` keeps a
    /// sub-range of the text (relative to its start), `Err(kind)` inserts a
    /// new node.
    pub(crate) fn split_text(&mut self, id: NodeId, pieces: Vec<Result<Range<usize>, NodeKind>>) {
        let NodeKind::Text(span) = self.ast.kind(id).clone() else {
            return;
        };
        let text = span.text(self.source).to_string();
        let mut anchor = id;
        for piece in pieces {
            let kind = match piece {
                Ok(local) if local.is_empty() => continue,
                Ok(local) => NodeKind::Text(match &span.literal {
                    None => TextSpan::new(span.range.start + local.start..span.range.start + local.end),
                    Some(_) => TextSpan::literal(span.range.clone(), &text[local]),
                }),
                Err(kind) => kind,
            };
            let node = self.ast.alloc(kind);
            self.ast.insert_after(anchor, node);
            anchor = node;
        }
        self.ast.detach(id);
    }

    fn split_emoji(&mut self) {
        for id in self.ast.preorder() {
            let NodeKind::Text(span) = self.ast.kind(id) else {
                continue;
            };
            let text = span.text(self.source).to_string();
            let found = emoji::find_all(&text);
            if found.is_empty() {
                continue;
            }
            let mut pieces = Vec::new();
            let mut last = 0;
            for (range, name, glyph) in found {
                pieces.push(Ok(last..range.start));
                pieces.push(Err(NodeKind::Emoji {
                    name: name.to_string(),
                    glyph: glyph.to_string(),
                }));
                last = range.end;
            }
            pieces.push(Ok(last..text.len()));
            self.split_text(id, pieces);
        }
    }
}

/// Only runs that abut in the source merge, so every text node keeps exact
/// offsets for diagnostics. Escapes and entities stay separate nodes.
fn merge_spans(a: &TextSpan, b: &TextSpan) -> Option<TextSpan> {
    (a.literal.is_none() && b.literal.is_none() && a.range.end == b.range.start)
        .then(|| TextSpan::new(a.range.start..b.range.end))
}

/// Concatenated text content of a subtree, with breaks as spaces.
pub fn text_content(ast: &Ast, id: NodeId, source: &str) -> String {
    let mut out = String::new();
    for node in ast.subtree(id) {
        match ast.kind(node) {
            NodeKind::Text(span) | NodeKind::CodeSpan(span) => out.push_str(span.text(source)),
            NodeKind::SoftBreak | NodeKind::HardBreak => out.push(' '),
            NodeKind::Emoji { glyph, .. } => out.push_str(glyph),
            NodeKind::EnvironmentSubstitution(expr) => out.push_str(&expr.raw),
            _ => {}
        }
    }
    out.trim().to_string()
}

pub(crate) fn is_blank(ast: &Ast, id: NodeId, source: &str) -> bool {
    match ast.kind(id) {
        NodeKind::Text(span) => span.text(source).trim().is_empty(),
        NodeKind::SoftBreak | NodeKind::HardBreak => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests;
