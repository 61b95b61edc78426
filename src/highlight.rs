use std::{borrow::Cow, fmt::Write as _, sync::LazyLock};

use crossterm::style::Stylize;
use regex::Regex;

/// Directives highlighted as keywords, compared case-insensitively
pub const RECOGNIZED_DIRECTIVES: &[&str] = &[
    "#EXTM3U",
    "#EXTINF",
    "#EXT-X-VERSION",
    "#EXT-X-TARGETDURATION",
    "#EXT-X-MEDIA-SEQUENCE",
    "#EXT-X-ENDLIST",
    "#EXT-X-KEY",
    "#EXT-X-MAP",
    "#EXT-X-STREAM-INF",
    "#EXT-X-MEDIA",
    "#EXT-X-PLAYLIST-TYPE",
    "#EXT-X-DISCONTINUITY",
    "#EXT-X-DISCONTINUITY-SEQUENCE",
    "#EXT-X-PROGRAM-DATE-TIME",
    "#EXT-X-BYTERANGE",
    "#EXT-X-I-FRAME-STREAM-INF",
    "#EXT-X-I-FRAMES-ONLY",
    "#EXT-X-INDEPENDENT-SEGMENTS",
    "#EXT-X-START",
    "#EXT-X-ALLOW-CACHE",
];

/// File extensions that mark a token as a segment (or sub-playlist) reference
pub const SEGMENT_EXTENSIONS: &[&str] = &[".ts", ".m3u8", ".m4s", ".mp4", ".aac", ".vtt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HighlightClass {
    Keyword,
    String,
    Comment,
    Url,
    Segment,
}

impl HighlightClass {
    /// CSS class used in the rendered markup, named after highlight.js' conventions
    #[must_use]
    pub const fn css_class(self) -> &'static str {
        match self {
            Self::Keyword => "hljs-keyword",
            Self::String => "hljs-string",
            Self::Comment => "hljs-comment",
            Self::Url => "hljs-url",
            Self::Segment => "hljs-segment",
        }
    }
}

/// Where in the text a rule is allowed to start matching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Anywhere,
    LineStart,
    TokenStart,
}

#[derive(Debug)]
pub struct HighlightRule {
    pub class: HighlightClass,
    pattern: Regex,
    scope: Scope,
    accept: fn(&str) -> bool,
}

impl HighlightRule {
    fn new(class: HighlightClass, pattern: &str, scope: Scope, accept: fn(&str) -> bool) -> Self {
        Self {
            class,
            // Patterns are compile-time constants covered by the tests below
            pattern: Regex::new(pattern).expect("highlight rule pattern is valid"),
            scope,
            accept,
        }
    }

    /// Length of this rule's match starting exactly at byte offset `pos`
    fn match_at(&self, text: &str, pos: usize) -> Option<usize> {
        let in_scope = match self.scope {
            Scope::Anywhere => true,
            Scope::LineStart => pos == 0 || text.as_bytes()[pos - 1] == b'\n',
            Scope::TokenStart => {
                pos == 0 || matches!(text.as_bytes()[pos - 1], b' ' | b'\t' | b'\r' | b'\n' | b',' | b'=' | b':')
            }
        };
        if !in_scope {
            return None;
        }

        let found = self.pattern.find(&text[pos..])?;
        (!found.is_empty() && (self.accept)(found.as_str())).then_some(found.len())
    }
}

/// The rule table, in priority order. Built once and never mutated.
pub static RULES: LazyLock<[HighlightRule; 5]> = LazyLock::new(|| {
    [
        HighlightRule::new(
            HighlightClass::Keyword,
            r"^#(?i:EXT[A-Z0-9-]*)",
            Scope::TokenStart,
            is_recognized_directive,
        ),
        HighlightRule::new(HighlightClass::String, r#"^"[^"\n]*""#, Scope::Anywhere, |_| true),
        HighlightRule::new(
            HighlightClass::Comment,
            r"^#[^\r\n]*",
            Scope::LineStart,
            |line| !starts_with_ignore_case(line, "#EXT"),
        ),
        HighlightRule::new(
            HighlightClass::Url,
            r"^(?i:https?)://\S+",
            Scope::Anywhere,
            |_| true,
        ),
        HighlightRule::new(
            HighlightClass::Segment,
            r#"^[^\s",]+"#,
            Scope::TokenStart,
            is_segment_reference,
        ),
    ]
});

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn is_recognized_directive(tag: &str) -> bool {
    RECOGNIZED_DIRECTIVES
        .iter()
        .any(|directive| directive.eq_ignore_ascii_case(tag))
}

fn is_segment_reference(token: &str) -> bool {
    let path = token.split(['?', '#']).next().unwrap_or(token);
    let path = path.to_ascii_lowercase();
    SEGMENT_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// A slice of the highlighted text, styled when `class` is set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span<'a> {
    pub class: Option<HighlightClass>,
    pub text: &'a str,
}

/// Splits `text` into classified spans.
///
/// Never fails: text no rule matches comes back as unstyled spans, and the
/// concatenation of every span's text is always exactly `text`.
#[must_use]
pub fn highlight(text: &str) -> Vec<Span<'_>> {
    let mut spans = Vec::new();
    let mut plain_start = 0;
    let mut pos = 0;

    while pos < text.len() {
        let matched = RULES
            .iter()
            .find_map(|rule| rule.match_at(text, pos).map(|len| (rule.class, len)));

        if let Some((class, len)) = matched {
            if plain_start < pos {
                spans.push(Span {
                    class: None,
                    text: &text[plain_start..pos],
                });
            }
            spans.push(Span {
                class: Some(class),
                text: &text[pos..pos + len],
            });
            pos += len;
            plain_start = pos;
        } else {
            pos += text[pos..].chars().next().map_or(1, char::len_utf8);
        }
    }

    if plain_start < text.len() {
        spans.push(Span {
            class: None,
            text: &text[plain_start..],
        });
    }

    spans
}

#[must_use]
pub fn escape_html(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }

    let mut escaped = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// Renders spans as HTML suitable for a `<pre><code>` block
#[must_use]
pub fn to_html(spans: &[Span<'_>]) -> String {
    let mut html = String::new();
    for span in spans {
        match span.class {
            Some(class) => {
                let _ = write!(
                    html,
                    r#"<span class="{}">{}</span>"#,
                    class.css_class(),
                    escape_html(span.text)
                );
            }
            None => html.push_str(&escape_html(span.text)),
        }
    }
    html
}

/// Renders spans with terminal colors
#[must_use]
pub fn to_ansi(spans: &[Span<'_>]) -> String {
    let mut out = String::new();
    for span in spans {
        let _ = match span.class {
            Some(HighlightClass::Keyword) => write!(out, "{}", span.text.magenta().bold()),
            Some(HighlightClass::String) => write!(out, "{}", span.text.green()),
            Some(HighlightClass::Comment) => write!(out, "{}", span.text.dark_grey().italic()),
            Some(HighlightClass::Url) => write!(out, "{}", span.text.blue().underlined()),
            Some(HighlightClass::Segment) => write!(out, "{}", span.text.cyan()),
            None => write!(out, "{}", span.text),
        };
    }
    out
}
