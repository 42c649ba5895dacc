use super::Spinner;
use crate::context::Output;

/// Writes one deterministic marker line per state change.
pub struct MarkerSpinner {
    output: Output,
    message: String,
    active: bool,
    /// A start marker was written for the current step.
    announced: bool,
}

impl MarkerSpinner {
    pub fn new(output: Output, message: &str) -> Self {
        MarkerSpinner {
            output,
            message: message.to_string(),
            active: false,
            announced: false,
        }
    }

    fn mark(&self, event: &str, text: &str) {
        let _ = self.output.emit(format!("[spinner:{event}] {text}\n").as_bytes());
    }

    fn settle(&mut self, event: &str, text: &str) {
        self.mark(event, text);
        self.active = false;
        self.announced = false;
    }
}

impl Spinner for MarkerSpinner {
    fn start(&mut self) {
        if !self.announced {
            self.mark("start", &self.message);
            self.announced = true;
        }
        self.active = true;
    }

    fn stop(&mut self) {
        self.active = false;
    }

    fn set_message(&mut self, text: &str) {
        if self.announced && text != self.message {
            self.mark("message", text);
        }
        self.message = text.to_string();
    }

    fn success(&mut self, text: &str) {
        self.settle("success", text);
    }

    fn error(&mut self, text: &str) {
        self.settle("error", text);
    }

    fn skip(&mut self, text: &str) {
        self.settle("skip", text);
    }

    fn stamp_shadow(&mut self) {}

    fn current_heading(&self) -> String {
        self.message.clone()
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_is_announced_once_per_step() {
        let (output, captured) = Output::capture();
        let mut spinner = MarkerSpinner::new(output, "Running");
        spinner.start();
        spinner.stop();
        spinner.start();
        spinner.set_message("Compiling");
        spinner.error("Compiling");
        assert_eq!(
            captured.contents(),
            "[spinner:start] Running\n[spinner:message] Compiling\n[spinner:error] Compiling\n"
        );
    }
}
