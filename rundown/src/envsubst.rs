//! Shell-style `$VAR` / `${VAR…}` expansion.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

static SUBST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:([A-Z0-9_]+)|\{([A-Z0-9_]+)(?:(:-|:\+|-|\+)([^}]*))?\})")
        .unwrap_or_else(|e| unreachable!("substitution pattern is valid: {e}"))
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `${X:-word}`: `word` when X is unset or empty.
    DefaultIfEmpty,
    /// `${X-word}`: `word` when X is unset.
    DefaultIfUnset,
    /// `${X:+word}`: `word` when X is set and non-empty, else empty.
    AlternateIfNonEmpty,
    /// `${X+word}`: `word` when X is set, else empty.
    AlternateIfSet,
}

impl Operator {
    fn parse(op: &str) -> Option<Self> {
        match op {
            ":-" => Some(Operator::DefaultIfEmpty),
            "-" => Some(Operator::DefaultIfUnset),
            ":+" => Some(Operator::AlternateIfNonEmpty),
            "+" => Some(Operator::AlternateIfSet),
            _ => None,
        }
    }
}

/// One substitution expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstExpr {
    pub name: String,
    pub operator: Option<(Operator, String)>,
    /// The expression as written, emitted when it cannot be resolved.
    pub raw: String,
}

impl SubstExpr {
    /// Resolve the expression. `None` means a plain reference to an unset
    /// variable, which callers leave untouched.
    pub fn evaluate<'a>(&self, lookup: impl Fn(&str) -> Option<&'a str>) -> Option<String> {
        let value = lookup(&self.name);
        let Some((op, word)) = &self.operator else {
            return value.map(str::to_string);
        };
        let resolved = match (op, value) {
            (Operator::DefaultIfEmpty, Some(v)) if !v.is_empty() => v.to_string(),
            (Operator::DefaultIfEmpty, _) => word.clone(),
            (Operator::DefaultIfUnset, Some(v)) => v.to_string(),
            (Operator::DefaultIfUnset, None) => word.clone(),
            (Operator::AlternateIfNonEmpty, Some(v)) if !v.is_empty() => word.clone(),
            (Operator::AlternateIfNonEmpty, _) => String::new(),
            (Operator::AlternateIfSet, Some(_)) => word.clone(),
            (Operator::AlternateIfSet, None) => String::new(),
        };
        Some(resolved)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Literal(Range<usize>),
    Expr(SubstExpr, Range<usize>),
}

/// Split `text` into literal runs and substitution expressions.
pub fn split(text: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut last = 0;
    for caps in SUBST_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let name = caps.get(1).or_else(|| caps.get(2));
        let Some(name) = name else { continue };
        let operator = caps
            .get(3)
            .and_then(|op| Operator::parse(op.as_str()))
            .map(|op| (op, caps.get(4).map_or("", |w| w.as_str()).to_string()));
        if whole.start() > last {
            pieces.push(Piece::Literal(last..whole.start()));
        }
        pieces.push(Piece::Expr(
            SubstExpr {
                name: name.as_str().to_string(),
                operator,
                raw: whole.as_str().to_string(),
            },
            whole.range(),
        ));
        last = whole.end();
    }
    if last < text.len() {
        pieces.push(Piece::Literal(last..text.len()));
    }
    pieces
}

/// Expand every expression in `text`. Unresolvable plain references stay
/// as written.
pub fn substitute<'a>(text: &str, lookup: impl Fn(&str) -> Option<&'a str> + Copy) -> String {
    let mut out = String::with_capacity(text.len());
    for piece in split(text) {
        match piece {
            Piece::Literal(range) => out.push_str(&text[range]),
            Piece::Expr(expr, _) => match expr.evaluate(lookup) {
                Some(value) => out.push_str(&value),
                None => out.push_str(&expr.raw),
            },
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env() -> HashMap<&'static str, &'static str> {
        HashMap::from([("NAME", "world"), ("EMPTY", "")])
    }

    fn expand(text: &str) -> String {
        let env = env();
        substitute(text, |k| env.get(k).copied())
    }

    #[test]
    fn plain_references() {
        assert_eq!(expand("hello $NAME and ${NAME}!"), "hello world and world!");
    }

    #[test]
    fn unset_plain_reference_is_kept() {
        assert_eq!(expand("x=$MISSING"), "x=$MISSING");
    }

    #[test]
    fn default_operators() {
        assert_eq!(expand("${EMPTY:-fallback}"), "fallback");
        assert_eq!(expand("${EMPTY-fallback}"), "");
        assert_eq!(expand("${MISSING-fallback}"), "fallback");
        assert_eq!(expand("${NAME:-fallback}"), "world");
    }

    #[test]
    fn alternate_operators() {
        assert_eq!(expand("${NAME:+set}"), "set");
        assert_eq!(expand("${EMPTY:+set}"), "");
        assert_eq!(expand("${EMPTY+set}"), "set");
        assert_eq!(expand("${MISSING+set}"), "");
    }

    #[test]
    fn lowercase_names_are_not_variables() {
        assert_eq!(expand("$name costs $5"), "$name costs $5");
    }

    #[test]
    fn split_reports_ranges() {
        let pieces = split("a $B c");
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0], Piece::Literal(0..2));
        assert!(matches!(&pieces[1], Piece::Expr(e, r) if e.name == "B" && *r == (2..4)));
    }
}
