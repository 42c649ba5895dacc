//! The `<r …>` annotation syntax and fenced-code info strings.

use std::ops::Range;

/// Every attribute the transformer understands.
pub const KNOWN_ATTRIBUTES: &[&str] = &[
    "as",
    "args",
    "borg",
    "capture-env",
    "default",
    "desc",
    "from",
    "help",
    "if",
    "ignore",
    "ignore-missing",
    "import",
    "invoke",
    "keep-heading",
    "label",
    "named",
    "named-all",
    "nospin",
    "on-failure",
    "opt",
    "prompt",
    "required",
    "reveal",
    "reveal-only",
    "save",
    "section",
    "skip",
    "skip-on-failure",
    "skip-on-success",
    "spinner",
    "stderr",
    "stdout",
    "stdout-into",
    "stop-fail",
    "stop-ok",
    "sub-env",
    "type",
    "dependency",
    "with",
];

/// Attributes that turn a fenced code block into an execution block.
pub const EXECUTION_ATTRIBUTES: &[&str] = &[
    "with",
    "spinner",
    "nospin",
    "named",
    "named-all",
    "stdout",
    "stderr",
    "capture-env",
    "borg",
    "reveal",
    "skip-on-success",
    "skip-on-failure",
    "stdout-into",
    "if",
];

/// Fence languages that run without any execution attribute.
pub const SCRIPT_INTERPRETERS: &[&str] = &[
    "bash", "sh", "zsh", "dash", "ksh", "fish", "python", "python3", "node", "deno", "ruby",
    "perl", "php", "lua", "pwsh",
];

pub fn is_script_interpreter(language: &str) -> bool {
    SCRIPT_INTERPRETERS.contains(&language)
}

/// Attributes that may sit in a childless tag directly above a fence and be
/// folded into it.
pub const FENCE_ATTRIBUTES: &[&str] = &[
    "with",
    "spinner",
    "nospin",
    "named",
    "named-all",
    "stdout",
    "stderr",
    "capture-env",
    "borg",
    "reveal",
    "reveal-only",
    "skip-on-success",
    "skip-on-failure",
    "sub-env",
    "stdout-into",
    "if",
    "save",
    "as",
];

/// Ordered attribute list of one annotation. Later writes replace earlier
/// values but keep the original position.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Attributes {
    entries: Vec<(String, Option<String>)>,
}

impl Attributes {
    pub fn new() -> Self {
        Attributes::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Value of `name`. Bare flags have no value.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Value of `name`, treating a bare flag as the empty string.
    pub fn value_or_empty(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| n != name);
    }

    /// Merge `other` into `self`; `other` wins on conflicts.
    pub fn merge(&mut self, other: &Attributes) {
        for (name, value) in &other.entries {
            self.insert(name.clone(), value.clone());
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_deref()))
    }

    pub fn any_of(&self, names: &[&str]) -> bool {
        names.iter().any(|n| self.has(n))
    }

    pub fn all_within(&self, names: &[&str]) -> bool {
        self.names().all(|n| names.contains(&n))
    }

    pub fn unknown(&self) -> impl Iterator<Item = &str> {
        self.names().filter(|n| !KNOWN_ATTRIBUTES.contains(n))
    }
}

/// The known attribute closest to a misspelt `name`, within two edits.
pub fn closest_attribute(name: &str) -> Option<&'static str> {
    KNOWN_ATTRIBUTES
        .iter()
        .map(|known| (edit_distance(name, known), *known))
        .filter(|(distance, _)| *distance <= 2)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, known)| known)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitute = diagonal + usize::from(ca != *cb);
            diagonal = row[j + 1];
            row[j + 1] = substitute.min(row[j] + 1).min(diagonal + 1);
        }
    }
    row[b.len()]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    Open {
        attrs: Attributes,
        self_closing: bool,
    },
    Close,
}

/// Parse one annotation tag at the start of `input`.
///
/// Returns the tag and the number of bytes consumed, or `None` if `input`
/// does not begin with a well-formed `<r …>`, `<r …/>` or `</r>`.
pub fn parse_tag(input: &str) -> Option<(Tag, usize)> {
    let bytes = input.as_bytes();
    if input.starts_with("</r") {
        let mut pos = 3;
        pos += skip_ws(&input[pos..]);
        return (bytes.get(pos) == Some(&b'>')).then_some((Tag::Close, pos + 1));
    }
    if !input.starts_with("<r") {
        return None;
    }
    let mut pos = 2;
    match bytes.get(pos) {
        Some(b) if b.is_ascii_whitespace() || *b == b'/' || *b == b'>' => {}
        _ => return None,
    }

    let mut attrs = Attributes::new();
    loop {
        pos += skip_ws(&input[pos..]);
        let rest = &input[pos..];
        if rest.starts_with("/>") {
            return Some((
                Tag::Open {
                    attrs,
                    self_closing: true,
                },
                pos + 2,
            ));
        }
        if rest.starts_with('>') {
            return Some((
                Tag::Open {
                    attrs,
                    self_closing: false,
                },
                pos + 1,
            ));
        }

        let name_len = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '=' | '>' | '/' | '"' | '\''))
            .unwrap_or(rest.len());
        if name_len == 0 {
            return None;
        }
        let name = rest[..name_len].to_string();
        pos += name_len;

        if bytes.get(pos) != Some(&b'=') {
            attrs.insert(name, None);
            continue;
        }
        pos += 1;
        let (value, used) = parse_value(&input[pos..])?;
        attrs.insert(name, Some(value));
        pos += used;
    }
}

fn parse_value(input: &str) -> Option<(String, usize)> {
    let quote = input.chars().next()?;
    if quote == '"' || quote == '\'' {
        let end = input[1..].find(quote)?;
        return Some((input[1..1 + end].to_string(), end + 2));
    }
    let mut end = input
        .find(|c: char| c.is_whitespace() || c == '>')
        .unwrap_or(input.len());
    // `<r save=X/>` closes the tag rather than ending the value with a slash.
    if input[..end].ends_with('/') && input[end..].starts_with('>') {
        end -= 1;
    }
    (end > 0).then(|| (input[..end].to_string(), end))
}

fn skip_ws(input: &str) -> usize {
    input.len() - input.trim_start().len()
}

/// Parse a run of annotation tags separated only by whitespace.
///
/// Returns each tag with its byte range relative to `input`, plus the
/// offset of the first byte after the last tag (and trailing whitespace up
/// to the end of that line).
pub fn parse_leading_tags(input: &str) -> (Vec<(Tag, Range<usize>)>, usize) {
    let mut tags = Vec::new();
    let mut pos = 0;
    let mut consumed = 0;
    loop {
        let ws = skip_ws(&input[pos..]);
        let Some((tag, used)) = parse_tag(&input[pos + ws..]) else {
            break;
        };
        let start = pos + ws;
        tags.push((tag, start..start + used));
        pos = start + used;
        consumed = pos;
    }
    if consumed > 0 {
        let rest = &input[consumed..];
        let line_end = rest.find('\n').map(|i| i + 1).unwrap_or(rest.len());
        if rest[..line_end].trim().is_empty() {
            consumed += line_end;
        }
    }
    (tags, consumed)
}

/// Parsed fenced-code info string: `<interpreter> <key:value> <flag> …`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FenceInfo {
    pub interpreter: String,
    pub modifiers: Attributes,
}

pub fn parse_fence_info(info: &str) -> FenceInfo {
    let mut tokens = tokenize_info(info).into_iter();
    let interpreter = tokens.next().unwrap_or_default();
    let mut modifiers = Attributes::new();
    for token in tokens {
        match token.split_once(':') {
            Some((key, value)) => modifiers.insert(key, Some(unquote(value).to_string())),
            None => modifiers.insert(token, None),
        }
    }
    FenceInfo {
        interpreter,
        modifiers,
    }
}

fn tokenize_info(info: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in info.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                current.push(c);
            }
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                current.push(c);
            }
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn unquote(value: &str) -> &str {
    for q in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(q).and_then(|v| v.strip_suffix(q)) {
            return inner;
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(input: &str) -> (Attributes, bool, usize) {
        match parse_tag(input) {
            Some((
                Tag::Open {
                    attrs,
                    self_closing,
                },
                used,
            )) => (attrs, self_closing, used),
            other => panic!("expected open tag, got {other:?}"),
        }
    }

    #[test]
    fn self_closing_with_flags_and_values() {
        let (attrs, closing, used) = open(r#"<r section="deploy" nospin spinner='Go now'/> rest"#);
        assert!(closing);
        assert_eq!(used, 45);
        assert_eq!(attrs.value("section"), Some("deploy"));
        assert!(attrs.has("nospin"));
        assert_eq!(attrs.value("nospin"), None);
        assert_eq!(attrs.value("spinner"), Some("Go now"));
    }

    #[test]
    fn open_tag_with_unquoted_value() {
        let (attrs, closing, _) = open("<r opt=env type=enum:dev|prod>");
        assert!(!closing);
        assert_eq!(attrs.value("type"), Some("enum:dev|prod"));
    }

    #[test]
    fn unquoted_value_before_self_close() {
        let (attrs, closing, _) = open("<r save=CONFIG/>");
        assert!(closing);
        assert_eq!(attrs.value("save"), Some("CONFIG"));
    }

    #[test]
    fn close_tag() {
        assert_eq!(parse_tag("</r >"), Some((Tag::Close, 5)));
        assert_eq!(parse_tag("</rx>"), None);
    }

    #[test]
    fn other_html_is_rejected() {
        assert!(parse_tag("<div>").is_none());
        assert!(parse_tag("<rect/>").is_none());
        assert!(parse_tag("<r section=\"unterminated").is_none());
    }

    #[test]
    fn leading_tags_consume_line() {
        let input = "<r stdout/> <r nospin/>\n```bash\necho\n```\n";
        let (tags, consumed) = parse_leading_tags(input);
        assert_eq!(tags.len(), 2);
        assert_eq!(&input[consumed..], "```bash\necho\n```\n");
    }

    #[test]
    fn leading_tags_stop_at_prose() {
        let input = "<r desc>Some text</r>";
        let (tags, consumed) = parse_leading_tags(input);
        assert_eq!(tags.len(), 1);
        assert_eq!(&input[consumed..], "Some text</r>");
    }

    #[test]
    fn fence_info_modifiers() {
        let info = parse_fence_info(r#"bash stdout spinner:"Installing deps" capture-env:A,B"#);
        assert_eq!(info.interpreter, "bash");
        assert!(info.modifiers.has("stdout"));
        assert_eq!(info.modifiers.value("spinner"), Some("Installing deps"));
        assert_eq!(info.modifiers.value("capture-env"), Some("A,B"));
    }

    #[test]
    fn merge_prefers_later_values() {
        let mut a = Attributes::new();
        a.insert("spinner", Some("one".into()));
        a.insert("stdout", None);
        let mut b = Attributes::new();
        b.insert("spinner", Some("two".into()));
        a.merge(&b);
        assert_eq!(a.value("spinner"), Some("two"));
        assert_eq!(a.names().collect::<Vec<_>>(), vec!["spinner", "stdout"]);
    }

    #[test]
    fn suggests_close_attribute_names() {
        assert_eq!(closest_attribute("stdot"), Some("stdout"));
        assert_eq!(closest_attribute("skip-on-sucess"), Some("skip-on-success"));
        assert_eq!(closest_attribute("frobnicate"), None);
    }
}
