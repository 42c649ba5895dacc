/// `:shortcode:` table. Only names that show up in runbooks are listed.
const EMOJI: &[(&str, &str)] = &[
    ("+1", "👍"),
    ("-1", "👎"),
    ("bangbang", "‼️"),
    ("bell", "🔔"),
    ("boom", "💥"),
    ("bug", "🐛"),
    ("checkered_flag", "🏁"),
    ("clock", "🕐"),
    ("cloud", "☁️"),
    ("construction", "🚧"),
    ("exclamation", "❗"),
    ("eyes", "👀"),
    ("fire", "🔥"),
    ("gear", "⚙️"),
    ("heavy_check_mark", "✔️"),
    ("hourglass", "⌛"),
    ("information_source", "ℹ️"),
    ("key", "🔑"),
    ("lock", "🔒"),
    ("memo", "📝"),
    ("package", "📦"),
    ("question", "❓"),
    ("rocket", "🚀"),
    ("sparkles", "✨"),
    ("stop_sign", "🛑"),
    ("tada", "🎉"),
    ("thumbsdown", "👎"),
    ("thumbsup", "👍"),
    ("warning", "⚠️"),
    ("white_check_mark", "✅"),
    ("whale", "🐳"),
    ("wrench", "🔧"),
    ("x", "❌"),
    ("zap", "⚡"),
];

pub fn lookup(name: &str) -> Option<&'static str> {
    EMOJI.iter().find(|(n, _)| *n == name).map(|(_, glyph)| *glyph)
}

/// Find every known `:name:` in `text`, as `(byte range, name, glyph)`.
pub fn find_all(text: &str) -> Vec<(std::ops::Range<usize>, &str, &'static str)> {
    let mut found = Vec::new();
    let mut pos = 0;
    while let Some(open) = text[pos..].find(':').map(|i| pos + i) {
        let rest = &text[open + 1..];
        let Some(len) = rest.find(':') else { break };
        let name = &rest[..len];
        let plausible = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-'));
        match lookup(name).filter(|_| plausible) {
            Some(glyph) => {
                let end = open + len + 2;
                found.push((open..end, name, glyph));
                pos = end;
            }
            None => pos = open + 1,
        }
    }
    found
}
