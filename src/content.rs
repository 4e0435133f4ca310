//! Page markup normalization.
//!
//! Generated page content is loosely HTML: paragraphs and `h1`..`h6` headings
//! with no guarantee of being well formed. This module tokenizes it once and
//! derives the views each output needs: layout blocks for the PDF flow,
//! headings plus plain body text for DOCX, and sanitized XHTML for EPUB.

use std::borrow::Cow;
use std::cell::RefCell;

use html5ever::tendril::StrTendril;
use html5ever::tokenizer::{
    BufferQueue, TagKind, Token as HtmlToken, TokenSink, TokenSinkResult, Tokenizer,
    TokenizerOpts,
};

use crate::model::LayoutBlock;

/// Markup tokens with character references already decoded.
#[derive(Debug, PartialEq)]
enum Token {
    Open {
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    Close {
        name: String,
    },
    Text(String),
    /// Comments and doctypes.
    Other,
}

/// Collects tokenizer output, merging adjacent character runs.
#[derive(Default)]
struct Collector {
    tokens: RefCell<Vec<Token>>,
}

impl TokenSink for Collector {
    type Handle = ();

    fn process_token(&self, token: HtmlToken, _line_number: u64) -> TokenSinkResult<()> {
        let mut tokens = self.tokens.borrow_mut();
        match token {
            HtmlToken::CharacterTokens(text) => match tokens.last_mut() {
                Some(Token::Text(prev)) => prev.push_str(&text),
                _ => tokens.push(Token::Text(text.to_string())),
            },
            HtmlToken::TagToken(tag) => {
                let name = tag.name.to_string();
                tokens.push(match tag.kind {
                    TagKind::StartTag => Token::Open {
                        name,
                        attrs: tag
                            .attrs
                            .iter()
                            .map(|a| (a.name.local.to_string(), a.value.to_string()))
                            .collect(),
                        self_closing: tag.self_closing,
                    },
                    TagKind::EndTag => Token::Close { name },
                });
            }
            HtmlToken::CommentToken(_) | HtmlToken::DoctypeToken(_) => tokens.push(Token::Other),
            _ => {}
        }
        TokenSinkResult::Continue
    }
}

/// Run the HTML tokenizer over a fragment. Tag and attribute names come back
/// lowercased; a tag left open at end of input is dropped.
fn tokenize(src: &str) -> Vec<Token> {
    let tokenizer = Tokenizer::new(Collector::default(), TokenizerOpts::default());
    let queue = BufferQueue::default();
    queue.push_back(StrTendril::from_slice(src));
    let _ = tokenizer.feed(&queue);
    tokenizer.end();
    tokenizer.sink.tokens.take()
}

fn heading_level(name: &str) -> Option<u8> {
    match name.as_bytes() {
        [b'h', d @ b'1'..=b'6'] => Some(d - b'0'),
        _ => None,
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn tokens_to_text(tokens: &[Token]) -> String {
    let mut raw = String::new();
    for token in tokens {
        match token {
            Token::Text(t) => raw.push_str(t),
            _ => raw.push(' '),
        }
    }
    collapse_whitespace(&raw)
}

/// Split markup into headings (document order) and the plain text of
/// everything outside them.
fn split_headings(content: &str) -> (Vec<(u8, String)>, String) {
    let tokens = tokenize(content);
    let mut headings = Vec::new();
    let mut remainder = String::new();
    let mut k = 0;

    while k < tokens.len() {
        match &tokens[k] {
            Token::Open { name, .. } if heading_level(name).is_some() => {
                let close = tokens[k + 1..]
                    .iter()
                    .position(|t| matches!(t, Token::Close { name: n } if n == name));
                if let Some(offset) = close {
                    let end = k + 1 + offset;
                    let level = heading_level(name).unwrap_or(1).clamp(1, 6);
                    headings.push((level, tokens_to_text(&tokens[k + 1..end])));
                    remainder.push(' ');
                    k = end + 1;
                    continue;
                }
                remainder.push(' ');
            }
            Token::Text(t) => remainder.push_str(t),
            _ => remainder.push(' '),
        }
        k += 1;
    }
    (headings, collapse_whitespace(&remainder))
}

/// Normalize one page into layout blocks: headings first, then the body
/// paragraph, then the page image if any.
pub fn normalize(content: &str, image_url: Option<&str>) -> Vec<LayoutBlock> {
    let (headings, body) = split_headings(content);
    let mut blocks: Vec<LayoutBlock> = headings
        .into_iter()
        .map(|(level, text)| LayoutBlock::Heading(level, text))
        .collect();
    if !body.is_empty() {
        blocks.push(LayoutBlock::Paragraph(body));
    }
    if let Some(url) = image_url {
        blocks.push(LayoutBlock::ImageRef(url.to_string()));
    }
    blocks
}

pub fn headings(content: &str) -> Vec<(u8, String)> {
    split_headings(content).0
}

/// Body text with heading text removed and all markup stripped.
pub fn plain_text(content: &str) -> String {
    split_headings(content).1
}

const KEPT_TAGS: &[&str] = &[
    "p", "br", "hr", "h1", "h2", "h3", "h4", "h5", "h6", "em", "strong", "b", "i", "u", "s",
    "sub", "sup", "blockquote", "ul", "ol", "li", "span", "div", "a", "img", "code", "pre",
    "small", "figure", "figcaption",
];
const VOID_TAGS: &[&str] = &["br", "hr", "img"];
const DROPPED_WITH_CONTENT: &[&str] = &["script", "style", "head", "title"];
const KEPT_ATTRS: &[&str] = &["href", "src", "alt"];

/// Write an opening tag with its safe attributes. Only the first occurrence
/// of a repeated attribute is kept.
fn write_open(out: &mut String, name: &str, attrs: &[(String, String)], void: bool) {
    out.push('<');
    out.push_str(name);
    let mut written: Vec<&str> = Vec::new();
    for (key, value) in attrs {
        if !KEPT_ATTRS.contains(&key.as_str()) || written.contains(&key.as_str()) {
            continue;
        }
        written.push(key.as_str());
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&xml_escape(value));
        out.push('"');
    }
    if name == "img" && !written.contains(&"alt") {
        out.push_str(" alt=\"\"");
    }
    out.push_str(if void { "/>" } else { ">" });
}

/// Re-serialize page markup as well-formed XHTML body content.
pub fn to_xhtml(content: &str) -> String {
    let tokens = tokenize(content);
    let mut out = String::with_capacity(content.len() + 16);
    let mut open: Vec<&str> = Vec::new();
    let mut k = 0;

    while k < tokens.len() {
        match &tokens[k] {
            Token::Text(t) => out.push_str(&xml_escape(t)),
            Token::Other => {}
            Token::Open { name, .. } if DROPPED_WITH_CONTENT.contains(&name.as_str()) => {
                let skip = tokens[k + 1..]
                    .iter()
                    .position(|t| matches!(t, Token::Close { name: n } if n == name));
                if let Some(offset) = skip {
                    k += offset + 1;
                }
            }
            Token::Open {
                name,
                attrs,
                self_closing,
            } => {
                if let Some(&kept) = KEPT_TAGS.iter().find(|&&t| t == name.as_str()) {
                    let void = VOID_TAGS.contains(&kept);
                    write_open(&mut out, kept, attrs, void || *self_closing);
                    if !void && !*self_closing {
                        open.push(kept);
                    }
                }
            }
            Token::Close { name } => {
                if let Some(pos) = open.iter().rposition(|t| *t == name.as_str()) {
                    for tag in open.drain(pos..).rev() {
                        out.push_str("</");
                        out.push_str(tag);
                        out.push('>');
                    }
                }
            }
        }
        k += 1;
    }
    for tag in open.into_iter().rev() {
        out.push_str("</");
        out.push_str(tag);
        out.push('>');
    }
    out
}

fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r' | '\u{20}'..='\u{FFFD}' | '\u{10000}'..)
}

/// Escape text for XML, dropping characters outside the XML 1.0 `Char` range.
pub(crate) fn xml_escape(s: &str) -> String {
    let cleaned: Cow<str> = if s.chars().all(is_xml_char) {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(s.chars().filter(|&c| is_xml_char(c)).collect())
    };
    quick_xml::escape::escape(cleaned.as_ref()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_then_paragraph_then_image() {
        let blocks = normalize(
            "<h1>Intro</h1><p>Some text</p><h3>Detail</h3><p>More</p>",
            Some("https://img.example/a.png"),
        );
        assert_eq!(
            blocks,
            vec![
                LayoutBlock::Heading(1, "Intro".into()),
                LayoutBlock::Heading(3, "Detail".into()),
                LayoutBlock::Paragraph("Some text More".into()),
                LayoutBlock::ImageRef("https://img.example/a.png".into()),
            ]
        );
    }

    #[test]
    fn whitespace_collapses_and_trims() {
        let blocks = normalize("  <p>one\n\n  two</p>\t<p> three </p>  ", None);
        assert_eq!(blocks, vec![LayoutBlock::Paragraph("one two three".into())]);
    }

    #[test]
    fn tags_become_word_breaks() {
        assert_eq!(plain_text("<p>a</p><p>b</p>"), "a b");
    }

    #[test]
    fn heading_markup_is_stripped_and_case_insensitive() {
        assert_eq!(
            headings("<H2>The <em>Big</em> Day</H2>"),
            vec![(2, "The Big Day".to_string())]
        );
    }

    #[test]
    fn heading_with_attributes_is_recognized() {
        assert_eq!(
            headings("<h2 class=\"title\">Chapter</h2>"),
            vec![(2, "Chapter".to_string())]
        );
    }

    #[test]
    fn nested_heading_pairs_with_first_close_of_its_level() {
        let (hs, body) = split_headings("<h1>Outer <h2>Inner</h2> tail</h1>after");
        assert_eq!(hs, vec![(1, "Outer Inner tail".to_string())]);
        assert_eq!(body, "after");
    }

    #[test]
    fn unclosed_heading_degrades_to_text() {
        let blocks = normalize("<h1>Never closed<p>body</p>", None);
        assert_eq!(
            blocks,
            vec![LayoutBlock::Paragraph("Never closed body".into())]
        );
    }

    #[test]
    fn mismatched_heading_close_is_not_a_heading() {
        assert!(headings("<h1>Title</h2>").is_empty());
        assert_eq!(plain_text("<h1>Title</h2>"), "Title");
    }

    #[test]
    fn garbage_input_never_fails() {
        for input in ["", "<", "<<>>", "<p", "a < b > c", "</>", "<!-- open", "&;&&#xZZ;"] {
            let _ = normalize(input, None);
            let _ = to_xhtml(input);
        }
    }

    #[test]
    fn lone_angle_bracket_is_literal() {
        assert_eq!(plain_text("1 < 2 and 3 > 2"), "1 < 2 and 3 > 2");
    }

    #[test]
    fn unterminated_tag_runs_to_end() {
        assert_eq!(plain_text("before <span class=\"x"), "before");
    }

    #[test]
    fn empty_content_with_image_yields_only_image() {
        assert_eq!(
            normalize("", Some("u.jpg")),
            vec![LayoutBlock::ImageRef("u.jpg".into())]
        );
    }

    #[test]
    fn entities_are_decoded() {
        assert_eq!(
            plain_text("Fish &amp; chips&nbsp;&#8212; &#x41;&lt;&gt; &bogus; &"),
            "Fish & chips \u{2014} A<> &bogus; &"
        );
    }

    #[test]
    fn html_named_entities_are_decoded() {
        assert_eq!(
            plain_text("<p>it&rsquo;s&mdash;fine &eacute;t&eacute;&hellip;</p>"),
            "it\u{2019}s\u{2014}fine \u{e9}t\u{e9}\u{2026}"
        );
        assert_eq!(
            to_xhtml("<p>Wait&mdash;it&rsquo;s &eacute;t&eacute;&hellip;</p>"),
            "<p>Wait\u{2014}it\u{2019}s \u{e9}t\u{e9}\u{2026}</p>"
        );
        assert_eq!(
            headings("<h2>Caf&eacute; &amp; Bar</h2>"),
            vec![(2, "Caf\u{e9} & Bar".to_string())]
        );
    }

    #[test]
    fn comments_are_ignored() {
        assert_eq!(plain_text("a<!-- hidden -->b"), "a b");
    }

    #[test]
    fn xhtml_closes_and_self_closes() {
        assert_eq!(
            to_xhtml("<p>one<br>two<p>three"),
            "<p>one<br/>two<p>three</p></p>"
        );
    }

    #[test]
    fn xhtml_drops_stray_closes_and_unknown_tags() {
        assert_eq!(
            to_xhtml("</div><font color=red>x</font><p>y</p></b>"),
            "x<p>y</p>"
        );
    }

    #[test]
    fn xhtml_closes_intermediate_tags() {
        assert_eq!(
            to_xhtml("<p><em>a</p>b"),
            "<p><em>a</em></p>b"
        );
    }

    #[test]
    fn xhtml_keeps_safe_attributes_only() {
        assert_eq!(
            to_xhtml("<a href='x?a=1&b=2' onclick=\"evil()\">go</a><img src=y.png>"),
            "<a href=\"x?a=1&amp;b=2\">go</a><img src=\"y.png\" alt=\"\"/>"
        );
    }

    #[test]
    fn xhtml_drops_script_content() {
        assert_eq!(to_xhtml("<p>a</p><script>alert(1)</script>"), "<p>a</p>");
    }

    #[test]
    fn xhtml_escapes_text() {
        assert_eq!(to_xhtml("<p>1 < 2 & 3</p>"), "<p>1 &lt; 2 &amp; 3</p>");
    }

    #[test]
    fn xml_escape_strips_control_chars() {
        assert_eq!(xml_escape("a\u{0}b\u{1b}<c>"), "ab&lt;c&gt;");
    }

    #[test]
    fn xml_escape_strips_noncharacters() {
        assert_eq!(xml_escape("a\u{FFFE}b\u{FFFF}c\u{1F600}"), "abc\u{1F600}");
        assert_eq!(to_xhtml("<p>a&#xFFFE;b</p>"), "<p>ab</p>");
    }

    #[test]
    fn xhtml_keeps_first_of_repeated_attributes() {
        let out = to_xhtml("<img src=\"a.png\" src=\"b.png\" alt=\"x\" alt=\"y\">");
        assert_eq!(out, "<img src=\"a.png\" alt=\"x\"/>");
        let wrapped = format!("<div>{out}</div>");
        let doc = roxmltree::Document::parse(&wrapped);
        assert!(doc.is_ok());
    }
}
