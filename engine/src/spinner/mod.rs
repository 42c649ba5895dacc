//! Status line shown while a block runs.

mod ci;
mod interactive;
mod marker;

pub use ci::CiSpinner;
pub use interactive::InteractiveSpinner;
pub use marker::MarkerSpinner;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::SpinnerKind;
use crate::context::Output;
use crate::rewriter::FlushHooks;

/// A step indicator. `start` and `stop` only show and hide it; `success`,
/// `error` and `skip` settle the current step.
pub trait Spinner: Send {
    fn start(&mut self);
    fn stop(&mut self);
    fn set_message(&mut self, text: &str);
    /// Settle the current step as successful and begin a new one.
    fn new_step(&mut self, text: &str) {
        let current = self.current_heading();
        self.success(&current);
        self.set_message(text);
        self.start();
    }
    fn success(&mut self, text: &str);
    fn error(&mut self, text: &str);
    fn skip(&mut self, text: &str);
    /// Leave the step title above output that is about to stream. Only the
    /// first call per step writes anything.
    fn stamp_shadow(&mut self);
    fn current_heading(&self) -> String;
    fn is_active(&self) -> bool;
    /// Time the step took, shown by spinners that display timings.
    fn set_elapsed(&mut self, _elapsed: Duration) {}
}

pub type SharedSpinner = Arc<Mutex<Box<dyn Spinner>>>;

pub fn shared(spinner: Box<dyn Spinner>) -> SharedSpinner {
    Arc::new(Mutex::new(spinner))
}

/// Build the spinner for `kind`. `indent` is the column the status line
/// starts at.
pub fn create(
    kind: SpinnerKind,
    output: Output,
    indent: usize,
    color: bool,
    message: &str,
) -> Box<dyn Spinner> {
    match kind {
        SpinnerKind::Interactive => Box::new(InteractiveSpinner::new(output, indent, color, message)),
        SpinnerKind::Ci => Box::new(CiSpinner::new(output, indent, message)),
        SpinnerKind::Null => Box::new(NullSpinner::new(message)),
        SpinnerKind::Test => Box::new(MarkerSpinner::new(output, message)),
    }
}

/// Hides the spinner while streamed output is written.
pub struct SpinnerHooks(pub SharedSpinner);

impl FlushHooks for SpinnerHooks {
    fn before_flush(&mut self) {
        let mut spinner = self.0.lock();
        spinner.stop();
        spinner.stamp_shadow();
    }

    fn after_flush(&mut self) {
        self.0.lock().start();
    }
}

/// Tracks state but draws nothing.
pub struct NullSpinner {
    message: String,
    active: bool,
}

impl NullSpinner {
    pub fn new(message: &str) -> Self {
        NullSpinner {
            message: message.to_string(),
            active: false,
        }
    }
}

impl Spinner for NullSpinner {
    fn start(&mut self) {
        self.active = true;
    }

    fn stop(&mut self) {
        self.active = false;
    }

    fn set_message(&mut self, text: &str) {
        self.message = text.to_string();
    }

    fn success(&mut self, _text: &str) {
        self.active = false;
    }

    fn error(&mut self, _text: &str) {
        self.active = false;
    }

    fn skip(&mut self, _text: &str) {
        self.active = false;
    }

    fn stamp_shadow(&mut self) {}

    fn current_heading(&self) -> String {
        self.message.clone()
    }

    fn is_active(&self) -> bool {
        self.active
    }
}
