use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use super::Spinner;
use crate::context::Output;

const FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const TICK: Duration = Duration::from_millis(80);

const CLEAR_LINE: &str = "\r\x1b[2K";

struct Line {
    message: String,
    frame: usize,
}

struct Ticker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Animated spinner redrawn in place on a terminal.
pub struct InteractiveSpinner {
    output: Output,
    indent: String,
    color: bool,
    line: Arc<Mutex<Line>>,
    ticker: Option<Ticker>,
    shadow_stamped: bool,
    elapsed: Option<Duration>,
}

impl InteractiveSpinner {
    pub fn new(output: Output, indent: usize, color: bool, message: &str) -> Self {
        InteractiveSpinner {
            output,
            indent: " ".repeat(indent),
            color,
            line: Arc::new(Mutex::new(Line {
                message: message.to_string(),
                frame: 0,
            })),
            ticker: None,
            shadow_stamped: false,
            elapsed: None,
        }
    }

    fn paint(&self, sgr: &str, text: &str) -> String {
        if self.color {
            format!("\x1b[{sgr}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    fn settle(&mut self, sgr: &str, mark: &str, text: &str) {
        self.stop();
        let timing = match self.elapsed.take() {
            Some(elapsed) => self.paint("2", &format!(" ({:.1}s)", elapsed.as_secs_f64())),
            None => String::new(),
        };
        let line = format!("{}{} {text}{timing}\n", self.indent, self.paint(sgr, mark));
        let _ = self.output.emit(line.as_bytes());
        self.shadow_stamped = false;
    }
}

fn draw(output: &Output, indent: &str, color: bool, line: &Line) {
    let frame = FRAMES[line.frame % FRAMES.len()];
    let frame = if color {
        format!("\x1b[36m{frame}\x1b[0m")
    } else {
        frame.to_string()
    };
    let _ = output.emit(format!("{CLEAR_LINE}{indent}{frame} {}", line.message).as_bytes());
}

impl Spinner for InteractiveSpinner {
    fn start(&mut self) {
        if self.ticker.is_some() {
            return;
        }
        draw(&self.output, &self.indent, self.color, &self.line.lock());

        let running = Arc::new(AtomicBool::new(true));
        let (flag, output, line) = (running.clone(), self.output.clone(), self.line.clone());
        let (indent, color) = (self.indent.clone(), self.color);
        let handle = thread::spawn(move || {
            while flag.load(Ordering::Acquire) {
                thread::sleep(TICK);
                if !flag.load(Ordering::Acquire) {
                    break;
                }
                let mut line = line.lock();
                line.frame += 1;
                draw(&output, &indent, color, &line);
            }
        });
        self.ticker = Some(Ticker { running, handle });
    }

    fn stop(&mut self) {
        let Some(ticker) = self.ticker.take() else {
            return;
        };
        ticker.running.store(false, Ordering::Release);
        let _ = ticker.handle.join();
        let _ = self.output.emit(CLEAR_LINE.as_bytes());
    }

    fn set_message(&mut self, text: &str) {
        let mut line = self.line.lock();
        line.message = text.to_string();
        if self.ticker.is_some() {
            draw(&self.output, &self.indent, self.color, &line);
        }
    }

    fn success(&mut self, text: &str) {
        self.settle("32", "✔", text);
    }

    fn error(&mut self, text: &str) {
        self.settle("31", "✖", text);
    }

    fn skip(&mut self, text: &str) {
        self.settle("33", "↷", text);
    }

    fn stamp_shadow(&mut self) {
        if self.shadow_stamped {
            return;
        }
        self.shadow_stamped = true;
        let message = self.current_heading();
        let line = format!("{}{}\n", self.indent, self.paint("2", &message));
        let _ = self.output.emit(line.as_bytes());
    }

    fn current_heading(&self) -> String {
        self.line.lock().message.clone()
    }

    fn is_active(&self) -> bool {
        self.ticker.is_some()
    }

    fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed = Some(elapsed);
    }
}

impl Drop for InteractiveSpinner {
    fn drop(&mut self) {
        self.stop();
    }
}
