//! Reply text comes back with light markup: markdown emphasis and lists,
//! plus the odd `<br>`/`<strong>` and HTML entity. The view renders it;
//! the speech path needs it gone.

use comrak::{ComrakOptions, markdown_to_html};
use once_cell::sync::Lazy;
use regex::Regex;

static MARKDOWN_OPTIONS: Lazy<ComrakOptions> = Lazy::new(|| {
    let mut options = ComrakOptions::default();
    options.extension.strikethrough = true;
    options.extension.autolink = true;
    options.render.hardbreaks = true;
    options.render.unsafe_ = true;
    options
});

static LINE_BREAK: Lazy<Regex> = Lazy::new(|| regex(r"(?i)<br\s*/?>"));
static LIST_ITEM_OPEN: Lazy<Regex> = Lazy::new(|| regex(r"(?i)<li(\s[^>]*)?>"));
static LIST_ITEM_CLOSE: Lazy<Regex> = Lazy::new(|| regex(r"(?i)</li\s*>"));
static ANY_TAG: Lazy<Regex> = Lazy::new(|| regex(r"<[^>]*>"));
static LIST_MARKER: Lazy<Regex> = Lazy::new(|| regex(r"(?m)^[ \t]*(?:[-*+•]|\d+[.)])[ \t]+"));
static STRONG: Lazy<Regex> = Lazy::new(|| regex(r"\*\*(.+?)\*\*|__(.+?)__"));
static EMPHASIS: Lazy<Regex> = Lazy::new(|| regex(r"\*(\S[^*\n]*?\S|\S)\*"));
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| regex(r"\n{3,}"));

const ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", " "),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&apos;", "'"),
    // last, so "&amp;lt;" decodes to "&lt;" and not "<"
    ("&amp;", "&"),
];

fn regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => unreachable!("invalid built-in pattern {pattern}: {err}"),
    }
}

/// Plain text suitable for the speech endpoint.
///
/// `"**Hello**<br>World"` becomes `"Hello\nWorld"`.
pub fn speech_text(content: &str) -> String {
    let text = LINE_BREAK.replace_all(content, "\n");
    let text = LIST_ITEM_OPEN.replace_all(&text, "");
    let text = LIST_ITEM_CLOSE.replace_all(&text, "\n");
    let text = ANY_TAG.replace_all(&text, "");
    let text = LIST_MARKER.replace_all(&text, "");
    let text = STRONG.replace_all(&text, "$1$2");
    let text = EMPHASIS.replace_all(&text, "$1");

    let mut plain = text.into_owned();
    for (entity, replacement) in ENTITIES {
        plain = plain.replace(entity, replacement);
    }

    let plain = plain
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    BLANK_RUNS.replace_all(plain.trim(), "\n\n").into_owned()
}

/// True when there is something other than whitespace left to say.
pub fn is_speakable(text: &str) -> bool {
    text.chars().any(|c| !c.is_whitespace())
}

/// HTML for a message bubble.
pub fn render_html(content: &str) -> String {
    markdown_to_html(content, &MARKDOWN_OPTIONS)
}
