//! Indenting filter for a child process's terminal output.
//!
//! Bytes are classified as they arrive. Printable text on a fresh line is
//! preceded by the indent prefix; cursor motions and carriage returns move a
//! virtual cursor so that a line redrawn from column zero is indented again.
//! Colours and other escape sequences pass through unchanged.

use std::io::{self, Write};

use tracing::debug;
use unicode_width::UnicodeWidthChar;

use crate::context::Output;

/// Called around every batch delivered downstream.
pub trait FlushHooks: Send {
    fn before_flush(&mut self);
    fn after_flush(&mut self);
}

pub struct NoHooks;

impl FlushHooks for NoHooks {
    fn before_flush(&mut self) {}
    fn after_flush(&mut self) {}
}

/// An OSC command addressed to rundown itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    SetSpinner(String),
    SetEnv(String, String),
}

impl HostCommand {
    fn parse(payload: &[u8]) -> Option<HostCommand> {
        let payload = std::str::from_utf8(payload).ok()?;
        let command = payload.strip_prefix("R;")?;
        if let Some(text) = command.strip_prefix("SETSPINNER") {
            return Some(HostCommand::SetSpinner(text.trim().to_string()));
        }
        if let Some(pair) = command.strip_prefix("SETENV") {
            let (key, value) = pair.trim_start().split_once('=')?;
            return Some(HostCommand::SetEnv(key.to_string(), value.to_string()));
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    Escape,
    Csi,
    Osc,
    /// Saw ESC inside an OSC; a `\` terminates it.
    OscEscape,
}

pub struct AnsiRewriter {
    prefix: Vec<u8>,
    downstream: Output,
    hooks: Box<dyn FlushHooks>,
    state: State,
    line: usize,
    col: usize,
    /// The prefix has been written on the current line since the cursor
    /// last returned to column zero.
    indented: bool,
    /// Whitespace and escape sequences seen before the first printable
    /// character of a line.
    stash: Vec<u8>,
    seq: Vec<u8>,
    utf8: Vec<u8>,
    out: Vec<u8>,
    commands: Vec<HostCommand>,
}

impl AnsiRewriter {
    pub fn new(prefix: impl Into<String>, downstream: Output, hooks: Box<dyn FlushHooks>) -> Self {
        AnsiRewriter {
            prefix: prefix.into().into_bytes(),
            downstream,
            hooks,
            state: State::Ground,
            line: 0,
            col: 0,
            indented: false,
            stash: Vec::new(),
            seq: Vec::new(),
            utf8: Vec::new(),
            out: Vec::new(),
            commands: Vec::new(),
        }
    }

    /// Virtual cursor position as `(line, column)`.
    pub fn cursor(&self) -> (usize, usize) {
        (self.line, self.col)
    }

    /// Host commands seen since the last call.
    pub fn take_host_commands(&mut self) -> Vec<HostCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Process a chunk of child output and deliver the result.
    pub fn feed(&mut self, bytes: &[u8]) -> io::Result<()> {
        for &byte in bytes {
            self.byte(byte);
        }
        self.deliver()
    }

    /// End of stream: terminate a partial last line so following output
    /// starts on a fresh one.
    pub fn finish(&mut self) -> io::Result<()> {
        self.flush_partial_utf8();
        if self.state != State::Ground {
            let seq = std::mem::take(&mut self.seq);
            self.out.extend_from_slice(&seq);
            self.state = State::Ground;
        }
        if self.indented && self.col > 0 {
            self.out.push(b'\n');
            self.new_line();
        } else {
            self.stash.clear();
        }
        self.deliver()
    }

    fn deliver(&mut self) -> io::Result<()> {
        if self.out.is_empty() {
            return Ok(());
        }
        self.hooks.before_flush();
        let result = self.downstream.emit(&self.out);
        self.out.clear();
        self.hooks.after_flush();
        result
    }

    // -----------------------------------------------------------------------
    // Byte classification
    // -----------------------------------------------------------------------

    fn byte(&mut self, byte: u8) {
        match self.state {
            State::Ground => self.ground(byte),
            State::Escape => {
                self.seq.push(byte);
                match byte {
                    b'[' => self.state = State::Csi,
                    b']' => self.state = State::Osc,
                    _ => {
                        self.state = State::Ground;
                        let seq = std::mem::take(&mut self.seq);
                        self.passthrough(&seq);
                    }
                }
            }
            State::Csi => {
                self.seq.push(byte);
                if (0x40..=0x7e).contains(&byte) {
                    self.state = State::Ground;
                    let seq = std::mem::take(&mut self.seq);
                    self.csi(&seq);
                }
            }
            State::Osc => match byte {
                0x07 => {
                    self.seq.push(byte);
                    self.state = State::Ground;
                    self.osc(1);
                }
                0x1b => {
                    self.seq.push(byte);
                    self.state = State::OscEscape;
                }
                _ => self.seq.push(byte),
            },
            State::OscEscape => {
                self.seq.push(byte);
                if byte == b'\\' {
                    self.state = State::Ground;
                    self.osc(2);
                } else {
                    self.state = State::Osc;
                }
            }
        }
    }

    fn ground(&mut self, byte: u8) {
        if !self.utf8.is_empty() {
            if byte & 0xc0 == 0x80 {
                self.utf8.push(byte);
                if self.utf8.len() == utf8_len(self.utf8[0]) {
                    let bytes = std::mem::take(&mut self.utf8);
                    let width = std::str::from_utf8(&bytes)
                        .ok()
                        .and_then(|s| s.chars().next())
                        .and_then(UnicodeWidthChar::width)
                        .unwrap_or(1);
                    self.printable(&bytes, width);
                }
                return;
            }
            self.flush_partial_utf8();
        }

        match byte {
            0x1b => {
                self.seq.clear();
                self.seq.push(byte);
                self.state = State::Escape;
            }
            b'\n' => {
                self.flush_stash();
                self.out.push(byte);
                self.new_line();
            }
            b'\r' => {
                self.flush_stash();
                self.out.push(byte);
                self.col = 0;
                self.indented = false;
            }
            0x08 => {
                self.passthrough(&[byte]);
                self.col = self.col.saturating_sub(1);
            }
            b'\t' => {
                self.passthrough(&[byte]);
                self.col = (self.col / 8 + 1) * 8;
            }
            b' ' => {
                self.passthrough(&[byte]);
                self.col += 1;
            }
            0x00..=0x1f | 0x7f => self.passthrough(&[byte]),
            0x20..=0x7e => self.printable(&[byte], 1),
            _ => {
                if utf8_len(byte) > 1 {
                    self.utf8.push(byte);
                } else {
                    self.printable(&[byte], 1);
                }
            }
        }
    }

    /// A truncated multibyte sequence prints as U+FFFD.
    fn flush_partial_utf8(&mut self) {
        if !self.utf8.is_empty() {
            self.utf8.clear();
            self.printable("\u{fffd}".as_bytes(), 1);
        }
    }

    fn printable(&mut self, bytes: &[u8], width: usize) {
        if !self.indented {
            self.out.extend_from_slice(&self.prefix);
            self.out.append(&mut self.stash);
            self.indented = true;
        }
        self.out.extend_from_slice(bytes);
        self.col += width;
    }

    /// Non-printing bytes wait in the stash until the line gets its prefix.
    fn passthrough(&mut self, bytes: &[u8]) {
        if self.indented {
            self.out.extend_from_slice(bytes);
        } else {
            self.stash.extend_from_slice(bytes);
        }
    }

    fn flush_stash(&mut self) {
        self.out.append(&mut self.stash);
    }

    fn new_line(&mut self) {
        self.line += 1;
        self.col = 0;
        self.indented = false;
    }

    // -----------------------------------------------------------------------
    // Escape sequences
    // -----------------------------------------------------------------------

    fn csi(&mut self, seq: &[u8]) {
        let Some((&last, body)) = seq.split_last() else {
            return;
        };
        let params = &body[2.min(body.len())..];
        let private = params.first().is_some_and(|b| !b.is_ascii_digit() && *b != b';');
        if private || !matches!(last, b'A'..=b'H' | b'd' | b'f') {
            self.passthrough(seq);
            return;
        }

        let args: Vec<usize> = std::str::from_utf8(params)
            .unwrap_or("")
            .split(';')
            .map(|p| match p.parse::<usize>() {
                Ok(n) => n.min(MAX_CSI_PARAM),
                Err(_) if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) => MAX_CSI_PARAM,
                Err(_) => 0,
            })
            .collect();
        let arg = |i: usize| args.get(i).copied().unwrap_or(0).max(1);

        match last {
            b'A' => self.line = self.line.saturating_sub(arg(0)),
            b'B' => self.line = self.line.saturating_add(arg(0)),
            b'C' => self.col = self.col.saturating_add(arg(0)),
            b'D' => self.col = self.col.saturating_sub(arg(0)),
            b'E' => {
                self.line = self.line.saturating_add(arg(0));
                self.col = 0;
            }
            b'F' => {
                self.line = self.line.saturating_sub(arg(0));
                self.col = 0;
            }
            b'G' => self.col = arg(0) - 1,
            b'd' => self.line = arg(0) - 1,
            _ => {
                self.line = arg(0) - 1;
                self.col = arg(1) - 1;
            }
        }
        self.flush_stash();
        self.out.extend_from_slice(seq);
        self.indented = self.col != 0;
    }

    /// `terminator` is the length of the BEL or ST that ended the sequence.
    fn osc(&mut self, terminator: usize) {
        let seq = std::mem::take(&mut self.seq);
        let payload = &seq[2..seq.len() - terminator];
        match HostCommand::parse(payload) {
            Some(command) => {
                debug!(?command, "host command");
                self.commands.push(command);
            }
            None => self.passthrough(&seq),
        }
    }
}

impl Write for AnsiRewriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.feed(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.deliver()
    }
}

/// Cursor parameters are clamped so child output cannot overflow the
/// virtual cursor.
const MAX_CSI_PARAM: usize = u16::MAX as usize;

fn utf8_len(lead: u8) -> usize {
    match lead {
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rewrite(chunks: &[&[u8]]) -> String {
        let (output, captured) = Output::capture();
        let mut rewriter = AnsiRewriter::new("  ", output, Box::new(NoHooks));
        for chunk in chunks {
            rewriter.feed(chunk).unwrap();
        }
        rewriter.finish().unwrap();
        captured.contents()
    }

    #[test]
    fn carriage_return_reindents() {
        assert_eq!(rewrite(&[b"1%\r2%\r3%\n"]), "  1%\r  2%\r  3%\n");
    }

    #[test]
    fn chunk_boundaries_do_not_matter() {
        assert_eq!(rewrite(&[b"1", b"%\r", b"2%\r3", b"%\n"]), "  1%\r  2%\r  3%\n");
        assert_eq!(rewrite(&[b"\x1b[3", b"1mred\x1b[0m\n"]), "  \x1b[31mred\x1b[0m\n");
    }

    #[test]
    fn prefix_goes_before_stashed_colour() {
        assert_eq!(rewrite(&[b"\x1b[1m  bold\x1b[0m\n"]), "  \x1b[1m  bold\x1b[0m\n");
    }

    #[test]
    fn blank_lines_stay_blank() {
        assert_eq!(rewrite(&[b"a\n\nb\n"]), "  a\n\n  b\n");
    }

    #[test]
    fn cursor_motion_is_tracked() {
        assert_eq!(rewrite(&[b"a\n\x1b[1Ab\n"]), "  a\n\x1b[1A  b\n");
        // Moving left leaves the line as it is.
        assert_eq!(rewrite(&[b"ab\x1b[1Dc\n"]), "  ab\x1b[1Dc\n");
    }

    #[test]
    fn unterminated_line_is_finished() {
        assert_eq!(rewrite(&[b"no newline"]), "  no newline\n");
    }

    #[test]
    fn truncated_utf8_at_end_is_replaced() {
        assert_eq!(rewrite(&[b"caf\xc3"]), "  caf\u{fffd}\n");
        assert_eq!(rewrite(&[b"\xe6\x97x\n"]), "  \u{fffd}x\n");
    }

    #[test]
    fn huge_cursor_parameters_are_clamped() {
        let (output, _captured) = Output::capture();
        let mut rewriter = AnsiRewriter::new("  ", output, Box::new(NoHooks));
        rewriter.feed(b"\x1b[99999999999999999999B\x1b[18446744073709551615C").unwrap();
        rewriter.feed(b"\x1b[18446744073709551615B\x1b[65535C").unwrap();
        assert_eq!(rewriter.cursor(), (2 * MAX_CSI_PARAM, 2 * MAX_CSI_PARAM));
        rewriter.feed(b"\x1b[99999999999999999999;99999999999999999999H").unwrap();
        assert_eq!(rewriter.cursor(), (MAX_CSI_PARAM - 1, MAX_CSI_PARAM - 1));
        rewriter.finish().unwrap();
    }

    #[test]
    fn wide_characters_advance_two_columns() {
        let (output, _captured) = Output::capture();
        let mut rewriter = AnsiRewriter::new("  ", output, Box::new(NoHooks));
        rewriter.feed("日本".as_bytes()).unwrap();
        assert_eq!(rewriter.cursor(), (0, 4));
    }

    #[test]
    fn host_commands_are_suppressed() {
        let (output, captured) = Output::capture();
        let mut rewriter = AnsiRewriter::new("  ", output, Box::new(NoHooks));
        rewriter
            .feed(b"\x1b]R;SETSPINNER Compiling\x07x\x1b]R;SETENV A=1\x1b\\\n")
            .unwrap();
        assert_eq!(captured.contents(), "  x\n");
        assert_eq!(
            rewriter.take_host_commands(),
            vec![
                HostCommand::SetSpinner("Compiling".into()),
                HostCommand::SetEnv("A".into(), "1".into()),
            ]
        );
    }

    #[test]
    fn hyperlinks_pass_through() {
        let link = "\x1b]8;;https://example.com\x1b\\site\x1b]8;;\x1b\\\n";
        assert_eq!(
            rewrite(&[link.as_bytes()]),
            format!("  {link}")
        );
    }

    struct Counting(Arc<AtomicUsize>);

    impl FlushHooks for Counting {
        fn before_flush(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn after_flush(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn hooks_wrap_every_delivery() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (output, _) = Output::capture();
        let mut rewriter = AnsiRewriter::new("  ", output, Box::new(Counting(calls.clone())));
        rewriter.feed(b"one\n").unwrap();
        rewriter.feed(b"").unwrap();
        rewriter.feed(b"two\n").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
