//! Strips an HTML document down to readable body text.
//!
//! `heretix-web`'s retriever stores whatever a search API hands back in
//! `Doc.page_text`; when a provider returns raw HTML instead of pre-cleaned
//! text, this crate turns it into the plain-text form the WEL scorer and
//! date extractor expect, dropping script/style blocks and collapsing
//! whitespace rather than attempting a full DOM parse.

use once_cell::sync::Lazy;
use regex::Regex;

static SCRIPT_STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style|noscript)\b[^>]*>.*?</\1>").expect("static pattern is valid"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").expect("static pattern is valid"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\r\f\v]+").expect("static pattern is valid"));
static BLANK_LINES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("static pattern is valid"));

/// Extracts plain text from an HTML document: drops script/style content,
/// strips remaining tags, decodes the handful of entities common in body
/// text, and collapses runs of whitespace.
pub fn extract_text(html: &str) -> String {
    let no_script = SCRIPT_STYLE_RE.replace_all(html, " ");
    let no_tags = TAG_RE.replace_all(&no_script, " ");
    let decoded = decode_entities(&no_tags);
    let collapsed = WHITESPACE_RE.replace_all(&decoded, " ");
    let tightened = BLANK_LINES_RE.replace_all(collapsed.trim(), "\n\n");
    tightened
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_keeps_text() {
        let html = "<html><body><h1>Title</h1><p>Hello &amp; welcome.</p></body></html>";
        let text = extract_text(html);
        assert_eq!(text, "Title\nHello & welcome.");
    }

    #[test]
    fn drops_script_and_style_content() {
        let html = "<p>Visible</p><script>var x = 1;</script><style>.a{color:red}</style>";
        let text = extract_text(html);
        assert_eq!(text, "Visible");
    }

    #[test]
    fn collapses_excess_whitespace() {
        let html = "<p>one</p>\n\n\n\n<p>two</p>";
        let text = extract_text(html);
        assert_eq!(text, "one\n\ntwo");
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(extract_text(""), "");
    }
}
