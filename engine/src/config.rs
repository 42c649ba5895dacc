//! Render options derived from flags and the environment.

use std::io::IsTerminal;

const MIN_COLS: u16 = 40;
const MAX_COLS: u16 = 120;
const DEFAULT_COLS: u16 = 80;

/// Which spinner implementation drives execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinnerKind {
    /// Animated status line on a terminal.
    Interactive,
    /// `section_start`/`section_end` markers understood by CI log viewers.
    Ci,
    Null,
    /// Deterministic `[spinner:…]` markers.
    Test,
}

impl SpinnerKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "interactive" => Some(SpinnerKind::Interactive),
            "ci" => Some(SpinnerKind::Ci),
            "null" | "none" => Some(SpinnerKind::Null),
            "test" => Some(SpinnerKind::Test),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub cols: u16,
    pub color: bool,
    pub truecolor: bool,
    pub spinner: SpinnerKind,
    /// Show execution blocks instead of running them.
    pub display_only: bool,
    /// Whether a `borg` block may replace the current process.
    pub allow_replace_process: bool,
}

impl Default for RenderOptions {
    /// Plain options for tests and embedding: no colour, test spinner.
    fn default() -> Self {
        RenderOptions {
            cols: DEFAULT_COLS,
            color: false,
            truecolor: false,
            spinner: SpinnerKind::Test,
            display_only: false,
            allow_replace_process: false,
        }
    }
}

impl RenderOptions {
    /// Detect options from the process environment and the terminal.
    pub fn from_env(cols: Option<u16>) -> Self {
        Self::detect(cols, |name| std::env::var(name).ok(), std::io::stdout().is_terminal())
    }

    /// Detection with an injectable environment lookup.
    pub fn detect(cols: Option<u16>, var: impl Fn(&str) -> Option<String>, tty: bool) -> Self {
        let cols = cols
            .or_else(|| var("COLUMNS").and_then(|c| c.trim().parse().ok()))
            .or_else(|| {
                tty.then(crossterm::terminal::size)
                    .and_then(Result::ok)
                    .map(|(w, _)| w)
            })
            .unwrap_or(DEFAULT_COLS)
            .clamp(MIN_COLS, MAX_COLS);

        let color = tty && var("NO_COLOR").is_none_or(|v| v.is_empty());
        let truecolor = var("COLORTERM")
            .is_some_and(|v| matches!(v.as_str(), "truecolor" | "24bit"));

        let spinner = var("RUNDOWN_SPINNER")
            .as_deref()
            .and_then(SpinnerKind::parse)
            .unwrap_or_else(|| {
                if var("GITLAB_CI").is_some() || var("CI").is_some() {
                    SpinnerKind::Ci
                } else if tty {
                    SpinnerKind::Interactive
                } else {
                    SpinnerKind::Null
                }
            });

        RenderOptions {
            cols,
            color,
            truecolor,
            spinner,
            display_only: false,
            allow_replace_process: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn cols_flag_wins_and_is_clamped() {
        let opts = RenderOptions::detect(Some(300), env(&[("COLUMNS", "50")]), false);
        assert_eq!(opts.cols, 120);
        let opts = RenderOptions::detect(None, env(&[("COLUMNS", "50")]), false);
        assert_eq!(opts.cols, 50);
        let opts = RenderOptions::detect(None, env(&[]), false);
        assert_eq!(opts.cols, 80);
    }

    #[test]
    fn spinner_selection() {
        let pick = |pairs: &[(&str, &str)], tty| RenderOptions::detect(None, env(pairs), tty).spinner;
        assert_eq!(pick(&[("RUNDOWN_SPINNER", "test")], true), SpinnerKind::Test);
        assert_eq!(pick(&[("GITLAB_CI", "true")], true), SpinnerKind::Ci);
        assert_eq!(pick(&[], true), SpinnerKind::Interactive);
        assert_eq!(pick(&[], false), SpinnerKind::Null);
    }

    #[test]
    fn colour_needs_a_terminal() {
        assert!(!RenderOptions::detect(None, env(&[]), false).color);
        assert!(RenderOptions::detect(None, env(&[]), true).color);
        assert!(!RenderOptions::detect(None, env(&[("NO_COLOR", "1")]), true).color);
        assert!(RenderOptions::detect(None, env(&[("COLORTERM", "24bit")]), false).truecolor);
    }
}
