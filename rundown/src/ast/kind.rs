use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use super::NodeId;
use crate::annotation::Attributes;
use crate::envsubst::SubstExpr;
use crate::section::OptionSpec;

/// A run of text, addressed by its byte range in the source.
///
/// `literal` is set when the decoded text differs from the raw source slice
/// (entities, escapes, merged runs with gaps).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub range: Range<usize>,
    pub literal: Option<String>,
}

impl TextSpan {
    pub fn new(range: Range<usize>) -> Self {
        TextSpan {
            range,
            literal: None,
        }
    }

    pub fn literal(range: Range<usize>, text: impl Into<String>) -> Self {
        TextSpan {
            range,
            literal: Some(text.into()),
        }
    }

    /// Build a span for `text`, only storing it if the source slice differs.
    pub fn from_source(source: &str, range: Range<usize>, text: &str) -> Self {
        if source.get(range.clone()) == Some(text) {
            TextSpan::new(range)
        } else {
            TextSpan::literal(range, text)
        }
    }

    pub fn text<'s>(&'s self, source: &'s str) -> &'s str {
        match &self.literal {
            Some(literal) => literal,
            None => source.get(self.range.clone()).unwrap_or(""),
        }
    }
}

/// Body of a fenced (or indented) code block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBody {
    /// Complete info string after the fence.
    pub info: String,
    /// First word of the info string.
    pub language: String,
    pub segments: Vec<TextSpan>,
}

impl CodeBody {
    pub fn text(&self, source: &str) -> String {
        self.segments.iter().map(|s| s.text(source)).collect()
    }

    pub fn span(&self) -> Range<usize> {
        match (self.segments.first(), self.segments.last()) {
            (Some(first), Some(last)) => first.range.start..last.range.end,
            _ => 0..0,
        }
    }
}

/// Where execution resumes when a block or `<r skip>` skips ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SkipTarget {
    #[default]
    Unresolved,
    /// Resume at (the entry of) this node, usually a `SectionEnd`.
    Node(NodeId),
    /// Resume after the last child of this node, usually an `InvokeBlock`.
    ExitOf(NodeId),
    /// Stop rendering the document.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpinnerMode {
    #[default]
    Visible,
    Hidden,
    /// `name:` messages from the script rename the spinner.
    FromScript,
    /// Like `FromScript`, and every rename also starts a new step.
    FromScriptAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSpec {
    pub id: u32,
    pub interpreter: String,
    pub code: CodeBody,
    pub spinner: SpinnerMode,
    pub spinner_name: String,
    pub show_stdout: bool,
    pub show_stderr: bool,
    pub capture_env: Vec<String>,
    pub stdout_into: Option<String>,
    pub substitute_env: bool,
    pub replace_process: bool,
    pub skip_on_success: bool,
    pub skip_on_failure: bool,
    pub reveal: bool,
    pub if_script: Option<String>,
    pub skip_target: SkipTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionPointer {
    pub name: String,
    /// Heading the section was declared on, if any.
    pub heading: Option<NodeId>,
    /// Heading level, 0 for free-standing sections.
    pub level: u8,
    pub options: Vec<OptionSpec>,
    pub short_description: Option<String>,
    pub long_description: Option<NodeId>,
    pub end: Option<NodeId>,
    pub dependencies: Vec<String>,
    pub if_script: Option<String>,
    pub span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeSpec {
    pub target: String,
    pub args: BTreeMap<String, String>,
    pub as_dependency: bool,
    pub keep_heading: bool,
    pub expanded: bool,
    pub span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StopSpec {
    pub message: Option<String>,
    pub if_script: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,

    // Markdown blocks
    Paragraph,
    Heading {
        level: u8,
    },
    BlockQuote,
    List {
        ordered: bool,
        start: u64,
    },
    Item,
    CodeBlock(CodeBody),
    Html(TextSpan),
    ThematicBreak,
    Table,
    TableRow {
        head: bool,
    },
    TableCell,

    // Markdown inlines
    Text(TextSpan),
    CodeSpan(TextSpan),
    Emphasis,
    Strong,
    Strikethrough,
    Link {
        dest: String,
        title: String,
    },
    Image {
        dest: String,
        title: String,
    },
    Emoji {
        name: String,
        glyph: String,
    },
    SoftBreak,
    HardBreak,

    // Annotations before coalescing
    RundownOpen {
        attrs: Attributes,
        span: Range<usize>,
    },
    RundownClose {
        span: Range<usize>,
    },
    /// A coalesced `<r …>` annotation, either self-closing or wrapping its
    /// children. Resolved into one of the kinds below by the transformer.
    RundownBlock {
        attrs: Attributes,
        inline: bool,
        span: Range<usize>,
    },

    // Semantic nodes
    SectionPointer(Box<SectionPointer>),
    SectionEnd {
        pointer: NodeId,
    },
    SectionOption(OptionSpec),
    ExecutionBlock(Box<ExecutionSpec>),
    SaveCodeBlock {
        code: CodeBody,
        variable: String,
        suffix: String,
    },
    StopOk(StopSpec),
    StopFail(StopSpec),
    OnFailure {
        pattern: String,
    },
    EnvironmentSubstitution(SubstExpr),
    SubEnvBlock,
    ConditionalStart {
        if_script: String,
        end: Option<NodeId>,
    },
    ConditionalEnd {
        start: NodeId,
    },
    DescriptionBlock {
        short: Option<String>,
    },
    ImportBlock {
        target: Option<String>,
        prefix: String,
        ignore_missing: bool,
    },
    InvokeBlock(Box<InvokeSpec>),
    IgnoreBlock,
    SkipBlock {
        target: SkipTarget,
    },
}

impl NodeKind {
    pub fn is_text(&self) -> bool {
        matches!(self, NodeKind::Text(_))
    }

    /// Containers whose children are inline content.
    pub fn holds_inlines(&self) -> bool {
        matches!(
            self,
            NodeKind::Paragraph | NodeKind::Heading { .. } | NodeKind::TableCell
        )
    }

    pub fn is_inline(&self) -> bool {
        matches!(
            self,
            NodeKind::Text(_)
                | NodeKind::CodeSpan(_)
                | NodeKind::Emphasis
                | NodeKind::Strong
                | NodeKind::Strikethrough
                | NodeKind::Link { .. }
                | NodeKind::Image { .. }
                | NodeKind::Emoji { .. }
                | NodeKind::SoftBreak
                | NodeKind::HardBreak
                | NodeKind::EnvironmentSubstitution(_)
        ) || matches!(self, NodeKind::RundownBlock { inline: true, .. })
    }

    pub(super) fn remap_refs(&mut self, map: &HashMap<NodeId, NodeId>) {
        let remap = |id: &mut NodeId| {
            if let Some(new) = map.get(id) {
                *id = *new;
            }
        };
        let remap_target = |target: &mut SkipTarget| match target {
            SkipTarget::Node(id) | SkipTarget::ExitOf(id) => {
                if let Some(new) = map.get(id) {
                    *id = *new;
                }
            }
            SkipTarget::Unresolved | SkipTarget::End => {}
        };
        match self {
            NodeKind::SectionEnd { pointer } => remap(pointer),
            NodeKind::ConditionalStart { end: Some(end), .. } => remap(end),
            NodeKind::ConditionalEnd { start } => remap(start),
            NodeKind::SkipBlock { target } => remap_target(target),
            NodeKind::ExecutionBlock(spec) => remap_target(&mut spec.skip_target),
            NodeKind::SectionPointer(pointer) => {
                if let Some(end) = pointer.end.as_mut() {
                    remap(end);
                }
                if let Some(heading) = pointer.heading.as_mut() {
                    remap(heading);
                }
            }
            _ => {}
        }
    }

    /// One-line summary used by [`super::Ast::dump`].
    pub fn describe(&self, source: &str) -> String {
        match self {
            NodeKind::Text(t) => format!("Text {:?}", t.text(source)),
            NodeKind::CodeSpan(t) => format!("CodeSpan {:?}", t.text(source)),
            NodeKind::Html(t) => format!("Html {:?}", t.text(source)),
            NodeKind::CodeBlock(code) => format!("CodeBlock {:?} {:?}", code.info, code.text(source)),
            NodeKind::ExecutionBlock(spec) => format!(
                "ExecutionBlock #{} {} {:?} skip={:?}",
                spec.id,
                spec.interpreter,
                spec.code.text(source),
                spec.skip_target
            ),
            NodeKind::SectionPointer(p) => format!(
                "SectionPointer {} level={} options={} end={:?}",
                p.name,
                p.level,
                p.options.len(),
                p.end
            ),
            NodeKind::SaveCodeBlock { variable, .. } => format!("SaveCodeBlock {variable}"),
            other => format!("{other:?}"),
        }
    }
}
