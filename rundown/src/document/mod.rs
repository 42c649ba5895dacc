use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::ast::{Ast, NodeId, NodeKind, SectionPointer};
use crate::parser::{ParseError, Parser};
use crate::section::OptionSpec;
use crate::transform::{self, text_content};

/// A loaded, transformed Markdown document.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub source: String,
    /// The source file ID (for error reporting with codespan-reporting).
    pub file_id: usize,
    pub ast: Ast,
    pub diagnostics: Vec<ParseError>,
}

/// A `<r import>` request found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub target: Option<String>,
    pub prefix: String,
    pub ignore_missing: bool,
    pub span: Range<usize>,
}

impl Document {
    pub fn parse(source: impl Into<String>, path: impl Into<PathBuf>, file_id: usize) -> Self {
        let source = source.into();
        let (ast, diagnostics) = Parser::new(source.clone(), file_id).parse();
        Document {
            path: path.into(),
            source,
            file_id,
            ast,
            diagnostics,
        }
    }

    /// Directory imports and relative paths resolve against.
    pub fn base_dir(&self) -> &Path {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
    }

    pub fn sections(&self) -> Vec<Section<'_>> {
        self.ast
            .preorder()
            .into_iter()
            .filter_map(|id| match self.ast.kind(id) {
                NodeKind::SectionPointer(pointer) => Some(Section {
                    id,
                    pointer: &**pointer,
                }),
                _ => None,
            })
            .collect()
    }

    /// Section by name; exact match first, then case-insensitive.
    pub fn section(&self, name: &str) -> Option<Section<'_>> {
        let sections = self.sections();
        let exact = sections.iter().find(|s| s.name() == name).copied();
        exact.or_else(|| {
            sections
                .into_iter()
                .find(|s| s.name().eq_ignore_ascii_case(name))
        })
    }

    /// Options declared outside every section.
    pub fn root_options(&self) -> Vec<&OptionSpec> {
        let owners = transform::innermost_sections(&self.ast);
        self.ast
            .preorder()
            .into_iter()
            .filter(|id| !owners.contains_key(id))
            .filter_map(|id| match self.ast.kind(id) {
                NodeKind::SectionOption(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    /// First description block outside every section.
    pub fn root_description(&self) -> Option<NodeId> {
        let owners = transform::innermost_sections(&self.ast);
        self.ast
            .preorder()
            .into_iter()
            .filter(|id| !owners.contains_key(id))
            .find(|id| matches!(self.ast.kind(*id), NodeKind::DescriptionBlock { .. }))
    }

    /// Text of the first heading.
    pub fn title(&self) -> Option<String> {
        self.ast
            .preorder()
            .into_iter()
            .find(|id| matches!(self.ast.kind(*id), NodeKind::Heading { .. }))
            .map(|id| self.text_of(id))
    }

    pub fn text_of(&self, id: NodeId) -> String {
        text_content(&self.ast, id, &self.source)
    }

    pub fn imports(&self) -> Vec<ImportRef> {
        self.ast
            .preorder()
            .into_iter()
            .filter_map(|id| match self.ast.kind(id) {
                NodeKind::ImportBlock {
                    target,
                    prefix,
                    ignore_missing,
                } => Some(ImportRef {
                    target: target.clone(),
                    prefix: prefix.clone(),
                    ignore_missing: *ignore_missing,
                    span: self.span_of(id),
                }),
                _ => None,
            })
            .collect()
    }

    /// Namespace every section name as `prefix:name`.
    pub fn apply_prefix(&mut self, prefix: &str) {
        if prefix.is_empty() {
            return;
        }
        for id in self.ast.preorder() {
            if let NodeKind::SectionPointer(pointer) = self.ast.kind_mut(id) {
                pointer.name = format!("{prefix}:{}", pointer.name);
            }
        }
    }

    /// Best-effort source span of a node, for diagnostics.
    pub fn span_of(&self, id: NodeId) -> Range<usize> {
        for node in self.ast.subtree(id) {
            let span = match self.ast.kind(node) {
                NodeKind::Text(t) | NodeKind::CodeSpan(t) | NodeKind::Html(t) => t.range.clone(),
                NodeKind::CodeBlock(code) => code.span(),
                NodeKind::ExecutionBlock(spec) => spec.code.span(),
                NodeKind::SaveCodeBlock { code, .. } => code.span(),
                NodeKind::SectionPointer(p) => p.span.clone(),
                NodeKind::SectionOption(o) => o.span.clone(),
                NodeKind::InvokeBlock(spec) => spec.span.clone(),
                _ => continue,
            };
            return span;
        }
        0..0
    }
}

/// Debug outline of the tree.
impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ast.dump(&self.source))
    }
}

/// Borrowed view of one section of a document.
#[derive(Debug, Clone, Copy)]
pub struct Section<'d> {
    pub id: NodeId,
    pub pointer: &'d SectionPointer,
}

impl<'d> Section<'d> {
    pub fn name(&self) -> &'d str {
        &self.pointer.name
    }

    pub fn level(&self) -> u8 {
        self.pointer.level
    }

    pub fn options(&self) -> &'d [OptionSpec] {
        &self.pointer.options
    }

    pub fn short_description(&self) -> Option<&'d str> {
        self.pointer.short_description.as_deref()
    }

    pub fn long_description(&self) -> Option<NodeId> {
        self.pointer.long_description
    }

    pub fn dependencies(&self) -> &'d [String] {
        &self.pointer.dependencies
    }

    pub fn end(&self) -> Option<NodeId> {
        self.pointer.end
    }
}
