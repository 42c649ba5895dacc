use std::ops::Range;

use pulldown_cmark::{
    CodeBlockKind, CowStr, Event, HeadingLevel, Options, Parser as CmarkParser, Tag, TagEnd,
};

use crate::annotation::{self, Tag as RTag};
use crate::ast::{Ast, CodeBody, NodeId, NodeKind, TextSpan};
use crate::parser::error::ParseError;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Read Markdown into a raw tree. Annotation tags are left as
/// `RundownOpen`/`RundownClose` markers for the transformer to pair up.
pub fn read(source: &str, file_id: usize) -> (Ast, Vec<ParseError>) {
    let mut reader = Reader {
        source,
        file_id,
        ast: Ast::new(),
        errors: Vec::new(),
    };
    let root = reader.ast.root();
    reader.read_text(source, 0, root);
    (reader.ast, reader.errors)
}

fn options() -> Options {
    Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES | Options::ENABLE_TASKLISTS
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

struct Reader<'s> {
    source: &'s str,
    file_id: usize,
    ast: Ast,
    errors: Vec<ParseError>,
}

type Events<'t> = Vec<(Event<'t>, Range<usize>)>;

impl Reader<'_> {
    /// Parse `text` and append the result under `parent`. `base` is the
    /// offset of `text` in the full source; spans that no longer line up
    /// with the source are stored as literals.
    fn read_text(&mut self, text: &str, base: usize, parent: NodeId) {
        let events: Events<'_> = CmarkParser::new_ext(text, options())
            .into_offset_iter()
            .map(|(ev, r)| (ev, r.start + base..r.end + base))
            .collect();

        let mut stack = vec![parent];
        let mut i = 0;

        while i < events.len() {
            let top = *stack.last().unwrap_or(&parent);
            let (ref ev, ref range) = events[i];

            match ev {
                Event::Start(Tag::HtmlBlock) => {
                    i = self.html_block(&events, i, top);
                    continue;
                }
                Event::Start(Tag::CodeBlock(kind)) => {
                    i = self.code_block(&events, i, kind, top);
                    continue;
                }
                Event::Start(tag) => {
                    let node = self.ast.alloc(container_kind(tag));
                    self.ast.append_child(top, node);
                    stack.push(node);
                }
                Event::End(_) => {
                    if stack.len() > 1 {
                        stack.pop();
                    }
                }
                Event::Text(t) => {
                    let span = TextSpan::from_source(self.source, range.clone(), t);
                    self.leaf(top, NodeKind::Text(span));
                }
                Event::Code(t) => {
                    self.leaf(top, NodeKind::CodeSpan(TextSpan::literal(range.clone(), t.to_string())));
                }
                Event::InlineHtml(html) | Event::Html(html) => {
                    self.inline_html(html, range.clone(), top);
                }
                Event::SoftBreak => self.leaf(top, NodeKind::SoftBreak),
                Event::HardBreak => self.leaf(top, NodeKind::HardBreak),
                Event::Rule => self.leaf(top, NodeKind::ThematicBreak),
                Event::TaskListMarker(checked) => {
                    let mark = if *checked { "[x] " } else { "[ ] " };
                    self.leaf(top, NodeKind::Text(TextSpan::literal(range.clone(), mark)));
                }
                _ => {}
            }
            i += 1;
        }
    }

    fn leaf(&mut self, parent: NodeId, kind: NodeKind) {
        let node = self.ast.alloc(kind);
        self.ast.append_child(parent, node);
    }

    fn inline_html(&mut self, html: &CowStr<'_>, range: Range<usize>, parent: NodeId) {
        let trimmed = html.trim_end();
        match annotation::parse_tag(trimmed) {
            Some((tag, used)) if used == trimmed.len() => self.tag_node(tag, range, parent),
            _ => {
                if trimmed.starts_with("<r") || trimmed.starts_with("</r") {
                    self.warn_malformed(trimmed, range.clone());
                }
                let span = TextSpan::from_source(self.source, range, html);
                self.leaf(parent, NodeKind::Html(span));
            }
        }
    }

    fn tag_node(&mut self, tag: RTag, span: Range<usize>, parent: NodeId) {
        match tag {
            RTag::Open {
                attrs,
                self_closing: true,
            } => self.leaf(
                parent,
                NodeKind::RundownBlock {
                    attrs,
                    inline: true,
                    span,
                },
            ),
            RTag::Open { attrs, .. } => self.leaf(parent, NodeKind::RundownOpen { attrs, span }),
            RTag::Close => self.leaf(parent, NodeKind::RundownClose { span }),
        }
    }

    fn warn_malformed(&mut self, text: &str, span: Range<usize>) {
        let looks_like_tag = text
            .as_bytes()
            .get(if text.starts_with("</") { 3 } else { 2 })
            .is_none_or(|b| b.is_ascii_whitespace() || *b == b'>' || *b == b'/');
        if looks_like_tag {
            self.errors.push(
                ParseError::warning("malformed annotation tag, treating it as HTML", span, self.file_id)
                    .with_note("annotation tags look like <r name=\"value\" flag/>"),
            );
        }
    }

    /// An HTML block may start with annotation tags. Those become markers,
    /// and whatever follows them on later lines (often a fenced code block
    /// the HTML block swallowed) is read again as Markdown.
    fn html_block(&mut self, events: &Events<'_>, start: usize, parent: NodeId) -> usize {
        let block_range = events[start].1.clone();
        let mut html = String::new();
        // (offset in `html`, offset in source) for each chunk
        let mut chunks: Vec<(usize, usize)> = Vec::new();
        let mut i = start + 1;
        while i < events.len() {
            match &events[i].0 {
                Event::End(TagEnd::HtmlBlock) => {
                    i += 1;
                    break;
                }
                Event::Html(text) | Event::Text(text) | Event::InlineHtml(text) => {
                    chunks.push((html.len(), events[i].1.start));
                    html.push_str(text);
                }
                _ => {}
            }
            i += 1;
        }

        let to_source = |offset: usize| -> usize {
            chunks
                .iter()
                .rev()
                .find(|(h, _)| *h <= offset)
                .map_or(block_range.start, |(h, s)| s + (offset - h))
        };

        let (tags, consumed) = annotation::parse_leading_tags(&html);
        if tags.is_empty() {
            if html.trim_start().starts_with("<r") || html.trim_start().starts_with("</r") {
                self.warn_malformed(html.trim(), block_range.clone());
            }
            let span = TextSpan::from_source(self.source, block_range.clone(), &html);
            self.leaf(parent, NodeKind::Html(span));
            return i;
        }

        for (tag, range) in tags {
            let span = to_source(range.start)..to_source(range.end);
            self.tag_node_block(tag, span, parent);
        }

        let rest = &html[consumed..];
        if !rest.trim().is_empty() {
            let base = to_source(consumed);
            self.read_text(rest, base, parent);
        }
        i
    }

    /// Tags read at block level produce block-level markers.
    fn tag_node_block(&mut self, tag: RTag, span: Range<usize>, parent: NodeId) {
        match tag {
            RTag::Open {
                attrs,
                self_closing: true,
            } => self.leaf(
                parent,
                NodeKind::RundownBlock {
                    attrs,
                    inline: false,
                    span,
                },
            ),
            other => self.tag_node(other, span, parent),
        }
    }

    fn code_block(
        &mut self,
        events: &Events<'_>,
        start: usize,
        kind: &CodeBlockKind<'_>,
        parent: NodeId,
    ) -> usize {
        let info = match kind {
            CodeBlockKind::Fenced(info) => info.trim().to_string(),
            CodeBlockKind::Indented => String::new(),
        };
        let mut segments = Vec::new();
        let mut i = start + 1;
        while i < events.len() {
            match &events[i].0 {
                Event::End(TagEnd::CodeBlock) => {
                    i += 1;
                    break;
                }
                Event::Text(text) => {
                    segments.push(TextSpan::from_source(self.source, events[i].1.clone(), text));
                }
                _ => {}
            }
            i += 1;
        }
        let language = info.split_whitespace().next().unwrap_or("").to_string();
        self.leaf(
            parent,
            NodeKind::CodeBlock(CodeBody {
                info,
                language,
                segments,
            }),
        );
        i
    }
}

fn container_kind(tag: &Tag<'_>) -> NodeKind {
    match tag {
        Tag::Paragraph => NodeKind::Paragraph,
        Tag::Heading { level, .. } => NodeKind::Heading {
            level: heading_level_to_u8(level),
        },
        Tag::BlockQuote(_) => NodeKind::BlockQuote,
        Tag::List(start) => NodeKind::List {
            ordered: start.is_some(),
            start: start.unwrap_or(1),
        },
        Tag::Item => NodeKind::Item,
        Tag::Table(_) => NodeKind::Table,
        Tag::TableHead => NodeKind::TableRow { head: true },
        Tag::TableRow => NodeKind::TableRow { head: false },
        Tag::TableCell => NodeKind::TableCell,
        Tag::Emphasis => NodeKind::Emphasis,
        Tag::Strong => NodeKind::Strong,
        Tag::Strikethrough => NodeKind::Strikethrough,
        Tag::Link {
            dest_url, title, ..
        } => NodeKind::Link {
            dest: dest_url.to_string(),
            title: title.to_string(),
        },
        Tag::Image {
            dest_url, title, ..
        } => NodeKind::Image {
            dest: dest_url.to_string(),
            title: title.to_string(),
        },
        _ => NodeKind::Paragraph,
    }
}

fn heading_level_to_u8(level: &HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}
