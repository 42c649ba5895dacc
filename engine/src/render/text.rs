//! Prose layout: inline buffers, list and quote decorations, wrapping.

use unicode_width::UnicodeWidthStr;

use crate::context::Context;
use crate::error::Result;

const BULLETS: [&str; 3] = ["•", "◦", "⁃"];

pub(super) const RED: &str = "31";
pub(super) const GREEN: &str = "32";
pub(super) const YELLOW: &str = "33";
pub(super) const FAINT: &str = "2";

/// Wrap `text` in an SGR sequence when `color` is on.
pub(super) fn paint(color: bool, sgr: &str, text: &str) -> String {
    if color {
        format!("\x1b[{sgr}m{text}\x1b[0m")
    } else {
        text.to_string()
    }
}

/// Columns of indentation for content under a heading of `level`.
pub(super) fn indent(level: u8) -> usize {
    2 * level as usize
}

enum Decor {
    Quote,
    List { ordered: bool, next: u64 },
    Item { marker: Option<String>, width: usize },
}

struct OpenLink {
    dest: String,
    /// Buffer length when the link opened.
    at: usize,
}

pub(super) struct TextState {
    color: bool,
    cols: u16,
    inline: Option<String>,
    styles: Vec<&'static str>,
    decor: Vec<Decor>,
    links: Vec<OpenLink>,
    row: Vec<String>,
}

impl TextState {
    pub fn new(color: bool, cols: u16) -> Self {
        TextState {
            color,
            cols,
            inline: None,
            styles: Vec::new(),
            decor: Vec::new(),
            links: Vec::new(),
            row: Vec::new(),
        }
    }

    fn emit(&self, ctx: &Context, text: &str) -> Result<()> {
        ctx.output.emit(text.as_bytes())?;
        Ok(())
    }

    fn in_item(&self) -> bool {
        self.decor.iter().any(|d| matches!(d, Decor::Item { .. }))
    }

    /// Prefixes for the first and following lines of the next paragraph.
    /// The first line carries any list marker not yet shown.
    fn prefixes(&mut self, level: u8) -> (String, String) {
        let base = " ".repeat(indent(level));
        let mut first = base.clone();
        let mut rest = base;
        for decor in &mut self.decor {
            match decor {
                Decor::Quote => {
                    let bar = paint(self.color, FAINT, "│ ");
                    first.push_str(&bar);
                    rest.push_str(&bar);
                }
                Decor::List { .. } => {}
                Decor::Item { marker, width } => {
                    let pad = " ".repeat(*width);
                    match marker.take() {
                        Some(marker) => {
                            first.push_str(&marker);
                            first.push(' ');
                        }
                        None => first.push_str(&pad),
                    }
                    rest.push_str(&pad);
                }
            }
        }
        (first, rest)
    }

    fn wrap_write(&mut self, ctx: &Context, level: u8, text: &str) -> Result<()> {
        let (first, rest) = self.prefixes(level);
        let options = textwrap::Options::new(self.cols as usize)
            .initial_indent(&first)
            .subsequent_indent(&rest);
        let mut out = String::new();
        for line in textwrap::wrap(text.trim(), options) {
            out.push_str(line.trim_end());
            out.push('\n');
        }
        self.emit(ctx, &out)
    }

    // -----------------------------------------------------------------------
    // Inline content
    // -----------------------------------------------------------------------

    pub fn begin_inline(&mut self) {
        self.inline.get_or_insert_with(String::new);
    }

    fn buffer(&mut self) -> &mut String {
        self.inline.get_or_insert_with(String::new)
    }

    pub fn push_text(&mut self, text: &str) {
        self.buffer().push_str(text);
    }

    pub fn push_style(&mut self, sgr: &'static str) {
        self.styles.push(sgr);
        if self.color {
            self.buffer().push_str(&format!("\x1b[{sgr}m"));
        }
    }

    pub fn pop_style(&mut self) {
        self.styles.pop();
        if self.color {
            let mut codes = String::from("\x1b[0m");
            for sgr in &self.styles {
                codes.push_str(&format!("\x1b[{sgr}m"));
            }
            self.buffer().push_str(&codes);
        }
    }

    pub fn push_code_span(&mut self, text: &str) {
        if self.color {
            self.push_style(YELLOW);
            self.push_text(text);
            self.pop_style();
        } else {
            self.push_text(text);
        }
    }

    pub fn open_link(&mut self, dest: &str) {
        if self.color {
            self.push_text(&format!("\x1b]8;;{dest}\x1b\\"));
            self.push_style("4");
        }
        let at = self.buffer().len();
        self.links.push(OpenLink {
            dest: dest.to_string(),
            at,
        });
    }

    pub fn close_link(&mut self) {
        let Some(link) = self.links.pop() else {
            return;
        };
        if self.color {
            self.pop_style();
            self.push_text("\x1b]8;;\x1b\\");
            return;
        }
        let shown = self.buffer().get(link.at..).unwrap_or("").trim().to_string();
        if !link.dest.is_empty() && shown != link.dest {
            self.push_text(&format!(" <{}>", link.dest));
        }
    }

    pub fn push_image_placeholder(&mut self, alt: &str) {
        let text = paint(self.color, FAINT, &format!("[image: {alt}]"));
        self.push_text(&text);
    }

    /// Write out inline content not closed by its own container, such as
    /// the text of a tight list item.
    pub fn flush(&mut self, ctx: &Context, level: u8) -> Result<()> {
        let Some(text) = self.inline.take() else {
            return Ok(());
        };
        if text.trim().is_empty() {
            return Ok(());
        }
        self.wrap_write(ctx, level, &text)
    }

    // -----------------------------------------------------------------------
    // Blocks
    // -----------------------------------------------------------------------

    pub fn paragraph(&mut self, ctx: &Context, level: u8) -> Result<()> {
        self.flush(ctx, level)?;
        if !self.in_item() {
            self.emit(ctx, "\n")?;
        }
        Ok(())
    }

    pub fn heading(&mut self, ctx: &Context, level: u8) -> Result<()> {
        let text = self.inline.take().unwrap_or_default();
        let pad = " ".repeat(indent(level.saturating_sub(1)));
        let title = format!("{} {}", "#".repeat(level as usize), text.trim());
        let line = paint(self.color, "1", &title);
        self.emit(ctx, &format!("{pad}{line}\n\n"))
    }

    pub fn push_quote(&mut self) {
        self.decor.push(Decor::Quote);
    }

    pub fn pop_quote(&mut self) {
        self.decor.pop();
    }

    pub fn push_list(&mut self, ordered: bool, start: u64) {
        self.decor.push(Decor::List { ordered, next: start });
    }

    pub fn pop_list(&mut self, ctx: &Context) -> Result<()> {
        self.decor.pop();
        let nested = self
            .decor
            .iter()
            .any(|d| matches!(d, Decor::List { .. }));
        if !nested {
            self.emit(ctx, "\n")?;
        }
        Ok(())
    }

    pub fn push_item(&mut self) {
        let depth = self
            .decor
            .iter()
            .filter(|d| matches!(d, Decor::List { .. }))
            .count()
            .saturating_sub(1);
        let marker = self
            .decor
            .iter_mut()
            .rev()
            .find_map(|d| match d {
                Decor::List { ordered: true, next } => {
                    let marker = format!("{next}.");
                    *next += 1;
                    Some(marker)
                }
                Decor::List { ordered: false, .. } => Some(BULLETS[depth % BULLETS.len()].to_string()),
                _ => None,
            })
            .unwrap_or_else(|| BULLETS[0].to_string());
        let width = marker.width() + 1;
        self.decor.push(Decor::Item {
            marker: Some(marker),
            width,
        });
    }

    pub fn pop_item(&mut self) {
        self.decor.pop();
    }

    pub fn end_cell(&mut self) {
        let text = self.inline.take().unwrap_or_default();
        self.row.push(text.trim().to_string());
    }

    pub fn row(&mut self, ctx: &Context, level: u8, head: bool) -> Result<()> {
        let cells = std::mem::take(&mut self.row);
        let (first, _) = self.prefixes(level);
        let line = cells.join(" │ ");
        let mut out = format!("{first}{}\n", if head { paint(self.color, "1", &line) } else { line.clone() });
        if head {
            let rule = "─".repeat(textwrap::core::display_width(&line));
            out.push_str(&format!("{first}{}\n", paint(self.color, FAINT, &rule)));
        }
        self.emit(ctx, &out)
    }

    pub fn code_block(&mut self, ctx: &Context, level: u8, body: &str) -> Result<()> {
        let (_, rest) = self.prefixes(level);
        let mut out = String::new();
        for line in body.trim_end_matches('\n').lines() {
            out.push_str(&rest);
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
        if !self.in_item() {
            out.push('\n');
        }
        self.emit(ctx, &out)
    }

    pub fn rule(&mut self, ctx: &Context, level: u8) -> Result<()> {
        let pad = " ".repeat(indent(level));
        let rule = "─".repeat((self.cols as usize).saturating_sub(4 + indent(level)));
        self.emit(ctx, &format!("{pad}{}\n\n", paint(self.color, FAINT, &rule)))
    }

    /// The message of a stop annotation.
    pub fn status_line(&mut self, ctx: &Context, level: u8, message: &str, failed: bool) -> Result<()> {
        let pad = " ".repeat(indent(level));
        let mark = if failed {
            paint(self.color, RED, "✖")
        } else {
            paint(self.color, GREEN, "✔")
        };
        self.emit(ctx, &format!("{pad}{mark} {message}\n"))
    }
}
