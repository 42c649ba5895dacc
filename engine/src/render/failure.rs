//! Locating and showing the line a failed script stopped at.

use std::path::Path;

use regex::Regex;

use super::text::{paint, FAINT, RED};

/// Find the body line a failure was reported against.
///
/// Interpreters report `<path>: line N` (bash) or `<path>:N` (most others).
/// `N` counts from the top of the written script, so the `header_lines`
/// before the body are subtracted. Returns the 1-based line and whether it
/// came from the error output; without a usable report, the last non-empty
/// body line is chosen.
pub fn detect_error_line(script_path: &Path, header_lines: usize, stderr: &str, body: &str) -> (usize, bool) {
    let body_lines = body.lines().count();
    let pattern = format!(
        r"{}(?::\s*line\s+|:)(\d+)",
        regex::escape(&script_path.display().to_string())
    );
    if let Ok(re) = Regex::new(&pattern) {
        for caps in re.captures_iter(stderr) {
            let reported = caps.get(1).and_then(|m| m.as_str().parse::<usize>().ok());
            if let Some(line) = reported.and_then(|n| n.checked_sub(header_lines)) {
                if (1..=body_lines).contains(&line) {
                    return (line, true);
                }
            }
        }
    }

    let last = body
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, _)| i + 1)
        .last()
        .unwrap_or(1);
    (last, false)
}

/// Numbered listing of `body` with `focus` highlighted.
pub fn listing(body: &str, focus: usize, pad: &str, color: bool) -> String {
    let count = body.lines().count();
    let width = count.max(1).to_string().len();
    let mut out = String::new();
    for (i, line) in body.lines().enumerate() {
        let number = i + 1;
        let gutter = format!("{number:>width$} │ ");
        if number == focus {
            out.push_str(&format!("{pad}{}\n", paint(color, RED, &format!("› {gutter}{line}"))));
        } else {
            out.push_str(&format!("{pad}  {}{line}\n", paint(color, FAINT, &gutter)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "echo start\nfalse\necho never\n";

    #[test]
    fn bash_line_report_minus_header() {
        let path = Path::new("/tmp/rundown-x/block-3.sh");
        let stderr = "/tmp/rundown-x/block-3.sh: line 5: nope: command not found\n";
        assert_eq!(detect_error_line(path, 3, stderr, BODY), (2, true));
    }

    #[test]
    fn colon_line_report() {
        let path = Path::new("/tmp/block-1.sh");
        let stderr = "  File \"x\"\n/tmp/block-1.sh:3: error\n";
        assert_eq!(detect_error_line(path, 0, stderr, BODY), (3, true));
    }

    #[test]
    fn out_of_range_reports_fall_back_to_last_line() {
        let path = Path::new("/tmp/block-1.sh");
        assert_eq!(detect_error_line(path, 3, "/tmp/block-1.sh: line 40: x", BODY), (3, false));
        assert_eq!(detect_error_line(path, 3, "", "a\n\nb\n\n"), (3, false));
    }

    #[test]
    fn listing_marks_focus_line() {
        let text = listing(BODY, 2, "  ", false);
        assert_eq!(text, "    1 │ echo start\n  › 2 │ false\n    3 │ echo never\n");
    }
}
