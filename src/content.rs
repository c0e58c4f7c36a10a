//! Conversion of the server's post markup into terminal text.
//!
//! Post bodies arrive as small HTML fragments: the user's text, escaped by the
//! server, with emoticon `<img>` tags and auto-linked `<a>` tags spliced in.

use once_cell::sync::Lazy;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use regex::{Captures, Regex};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(/?)([a-z][a-z0-9]*)([^>]*)>").expect("tag regex"));
static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(alt|href)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("attribute regex")
});
static ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").expect("entity regex"));

const COLOR_EMOTICON: Color = Color::Rgb(249, 226, 175);
pub const COLOR_LINK: Color = Color::Rgb(137, 220, 235);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    Emoticon(String),
    Link { text: String, url: String },
    Break,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    pub fragments: Vec<Fragment>,
    pub links: Vec<String>,
}

impl Rendered {
    /// Word-wraps the fragments to `width` columns, keeping emoticon and
    /// link styling on the pieces they produce.
    pub fn wrap(&self, width: usize, base: Style) -> Vec<Line<'static>> {
        let width = width.max(1);
        let mut writer = LineWriter::new(width);
        for fragment in &self.fragments {
            match fragment {
                Fragment::Text(text) => writer.push_text(text, base),
                Fragment::Emoticon(name) => writer.push_text(
                    name,
                    base.fg(COLOR_EMOTICON).add_modifier(Modifier::BOLD),
                ),
                Fragment::Link { text, .. } => {
                    writer.push_text(text, base.fg(COLOR_LINK).add_modifier(Modifier::UNDERLINED))
                }
                Fragment::Break => writer.newline(),
            }
        }
        writer.finish()
    }
}

pub fn parse(html: &str) -> Rendered {
    let mut rendered = Rendered::default();
    let mut link: Option<(String, String)> = None;
    let mut cursor = 0;

    for caps in TAG_RE.captures_iter(html) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        push_text(&mut rendered, &mut link, &html[cursor..whole.start()]);
        cursor = whole.end();

        let closing = !caps[1].is_empty();
        let name = caps[2].to_ascii_lowercase();
        let attrs = &caps[3];
        match (name.as_str(), closing) {
            ("img", false) => {
                let alt = attribute(attrs, "alt").unwrap_or_else(|| "[img]".to_string());
                rendered.fragments.push(Fragment::Emoticon(alt));
            }
            ("a", false) => {
                let url = attribute(attrs, "href").unwrap_or_default();
                link = Some((url, String::new()));
            }
            ("a", true) => {
                if let Some((url, text)) = link.take() {
                    finish_link(&mut rendered, url, text);
                }
            }
            ("br", _) | ("p", true) | ("div", true) => rendered.fragments.push(Fragment::Break),
            _ => {}
        }
    }
    push_text(&mut rendered, &mut link, &html[cursor..]);
    if let Some((url, text)) = link.take() {
        finish_link(&mut rendered, url, text);
    }
    rendered
}

fn push_text(rendered: &mut Rendered, link: &mut Option<(String, String)>, raw: &str) {
    if raw.is_empty() {
        return;
    }
    let decoded = decode_entities(raw);
    if let Some((_, text)) = link.as_mut() {
        text.push_str(&decoded);
        return;
    }
    let mut first = true;
    for piece in decoded.split('\n') {
        if !first {
            rendered.fragments.push(Fragment::Break);
        }
        first = false;
        if !piece.is_empty() {
            rendered.fragments.push(Fragment::Text(piece.to_string()));
        }
    }
}

fn finish_link(rendered: &mut Rendered, url: String, text: String) {
    let text = if text.is_empty() { url.clone() } else { text };
    if !url.is_empty() && !rendered.links.contains(&url) {
        rendered.links.push(url.clone());
    }
    rendered.fragments.push(Fragment::Link { text, url });
}

fn attribute(attrs: &str, wanted: &str) -> Option<String> {
    ATTR_RE.captures_iter(attrs).find_map(|caps| {
        if !caps[1].eq_ignore_ascii_case(wanted) {
            return None;
        }
        caps.get(2)
            .or_else(|| caps.get(3))
            .map(|value| decode_entities(value.as_str()))
    })
}

pub fn decode_entities(raw: &str) -> String {
    ENTITY_RE
        .replace_all(raw, |caps: &Captures<'_>| {
            let entity = &caps[1];
            let decoded = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match entity {
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "amp" => Some('&'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    _ => None,
                }
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

struct LineWriter {
    width: usize,
    lines: Vec<Line<'static>>,
    current: Vec<Span<'static>>,
    used: usize,
}

impl LineWriter {
    fn new(width: usize) -> Self {
        Self {
            width,
            lines: Vec::new(),
            current: Vec::new(),
            used: 0,
        }
    }

    fn push_text(&mut self, text: &str, style: Style) {
        for word in split_keep_spaces(text) {
            let word_width = UnicodeWidthStr::width(word);
            let is_space = word.chars().all(char::is_whitespace);
            if self.used + word_width > self.width && self.used > 0 {
                self.newline();
                if is_space {
                    continue;
                }
            }
            if word_width > self.width {
                self.push_long_word(word, style);
                continue;
            }
            self.current.push(Span::styled(word.to_string(), style));
            self.used += word_width;
        }
    }

    fn push_long_word(&mut self, word: &str, style: Style) {
        let mut chunk = String::new();
        let mut chunk_width = 0;
        for ch in word.chars() {
            let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
            if self.used + chunk_width + ch_width > self.width && (self.used + chunk_width) > 0 {
                if !chunk.is_empty() {
                    self.current
                        .push(Span::styled(std::mem::take(&mut chunk), style));
                }
                chunk_width = 0;
                self.newline();
            }
            chunk.push(ch);
            chunk_width += ch_width;
        }
        if !chunk.is_empty() {
            self.current.push(Span::styled(chunk, style));
            self.used += chunk_width;
        }
    }

    fn newline(&mut self) {
        self.lines.push(Line::from(std::mem::take(&mut self.current)));
        self.used = 0;
    }

    fn finish(mut self) -> Vec<Line<'static>> {
        if !self.current.is_empty() || self.lines.is_empty() {
            self.newline();
        }
        self.lines
    }
}

fn split_keep_spaces(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut in_space: Option<bool> = None;
    for (idx, ch) in text.char_indices() {
        let space = ch.is_whitespace();
        match in_space {
            Some(prev) if prev != space => {
                pieces.push(&text[start..idx]);
                start = idx;
            }
            _ => {}
        }
        in_space = Some(space);
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(rendered: &Rendered) -> String {
        let mut out = String::new();
        for fragment in &rendered.fragments {
            match fragment {
                Fragment::Text(text) | Fragment::Emoticon(text) => out.push_str(text),
                Fragment::Link { text, .. } => out.push_str(text),
                Fragment::Break => out.push('\n'),
            }
        }
        out
    }

    fn line_text(line: &Line<'_>) -> String {
        line.spans.iter().map(|span| span.content.as_ref()).collect()
    }

    #[test]
    fn escaped_text_is_decoded() {
        let rendered = parse("1 &lt; 2 &amp;&amp; &#34;quoted&#34; &#39;x&#39;");
        assert_eq!(plain(&rendered), "1 < 2 && \"quoted\" 'x'");
    }

    #[test]
    fn emoticons_become_their_alt_text() {
        let rendered =
            parse(r#"hi <img class="emoticon" src="/static/img/emoticons/wave.png" alt=":wave:">"#);
        assert_eq!(
            rendered.fragments,
            vec![
                Fragment::Text("hi ".into()),
                Fragment::Emoticon(":wave:".into())
            ]
        );
    }

    #[test]
    fn links_are_collected_once() {
        let html = r#"<a href="https://a.example/?x=1&amp;y=2" target="_blank">https://a.example/?x=1&amp;y=2</a> and again <a href="https://a.example/?x=1&amp;y=2">again</a>"#;
        let rendered = parse(html);
        assert_eq!(rendered.links, vec!["https://a.example/?x=1&y=2".to_string()]);
        assert!(plain(&rendered).starts_with("https://a.example/?x=1&y=2 and again"));
    }

    #[test]
    fn newlines_and_breaks_split_lines() {
        let rendered = parse("one\ntwo<br>three");
        let lines = rendered.wrap(40, Style::default());
        let texts: Vec<String> = lines.iter().map(line_text).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[test]
    fn wrap_respects_width() {
        let rendered = parse("alpha beta gamma delta");
        let lines = rendered.wrap(11, Style::default());
        for line in &lines {
            assert!(UnicodeWidthStr::width(line_text(line).as_str()) <= 11);
        }
        assert_eq!(line_text(&lines[0]), "alpha beta ");
        assert_eq!(line_text(&lines[1]), "gamma delta");
    }

    #[test]
    fn long_words_are_split() {
        let rendered = parse("abcdefghij");
        let lines = rendered.wrap(4, Style::default());
        let texts: Vec<String> = lines.iter().map(line_text).collect();
        assert_eq!(texts, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn empty_content_yields_one_blank_line() {
        let lines = parse("").wrap(10, Style::default());
        assert_eq!(lines.len(), 1);
        assert!(lines[0].spans.is_empty());
    }
}
