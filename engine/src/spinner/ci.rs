use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::Spinner;
use crate::context::Output;

static NEXT_SECTION: AtomicU32 = AtomicU32::new(1);

/// Frames each step as a collapsible CI log section.
pub struct CiSpinner {
    output: Output,
    indent: String,
    message: String,
    section: Option<u32>,
    active: bool,
}

fn epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl CiSpinner {
    pub fn new(output: Output, indent: usize, message: &str) -> Self {
        CiSpinner {
            output,
            indent: " ".repeat(indent),
            message: message.to_string(),
            section: None,
            active: false,
        }
    }

    fn settle(&mut self, mark: &str, text: &str) {
        let mut out = String::new();
        if let Some(id) = self.section.take() {
            out.push_str(&format!("section_end:{}:step_{id}\r\x1b[0K", epoch()));
        }
        out.push_str(&format!("{}{mark} {text}\n", self.indent));
        let _ = self.output.emit(out.as_bytes());
        self.active = false;
    }
}

impl Spinner for CiSpinner {
    fn start(&mut self) {
        self.active = true;
        if self.section.is_some() {
            return;
        }
        let id = NEXT_SECTION.fetch_add(1, Ordering::Relaxed);
        self.section = Some(id);
        let line = format!(
            "section_start:{}:step_{id}\r\x1b[0K{}{}\n",
            epoch(),
            self.indent,
            self.message
        );
        let _ = self.output.emit(line.as_bytes());
    }

    fn stop(&mut self) {
        self.active = false;
    }

    fn set_message(&mut self, text: &str) {
        self.message = text.to_string();
    }

    fn success(&mut self, text: &str) {
        self.settle("✔", text);
    }

    fn error(&mut self, text: &str) {
        self.settle("✖", text);
    }

    fn skip(&mut self, text: &str) {
        self.settle("↷", text);
    }

    fn stamp_shadow(&mut self) {}

    fn current_heading(&self) -> String {
        self.message.clone()
    }

    fn is_active(&self) -> bool {
        self.active
    }
}
