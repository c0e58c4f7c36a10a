//! Turns records into terminal cards.
//!
//! A card is a header line followed by a body. The body is the post text,
//! optionally next to (thumbnail) or below (expanded) the attached image. Hit
//! regions are reported relative to the card's inner top-left corner so the
//! caller can resolve clicks after layout.

use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use unicode_width::UnicodeWidthStr;

use crate::content;
use crate::media::Preview;
use crate::model::Record;
use crate::moderation::{self, ModAction};

pub const GLYPH_REPLY: &str = "💬";
pub const GLYPH_PIN: &str = "📌";
pub const GLYPH_LOCK: &str = "🔒";
pub const GLYPH_MENU: &str = "☰";

const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_PLACEHOLDER: Color = Color::Rgb(88, 91, 112);

#[derive(Debug, Clone, Copy)]
pub struct CardOptions<'a> {
    pub navigable: bool,
    pub selected: bool,
    pub image_expanded: bool,
    pub width: u16,
    pub thumbnail_cols: u16,
    pub preview: Option<&'a Preview>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hit {
    Trigger,
    Image,
    Body,
}

#[derive(Debug, Clone)]
pub struct Card {
    pub lines: Vec<Line<'static>>,
    pub trigger: Rect,
    pub image: Option<Rect>,
    pub links: Vec<String>,
    pub navigable: bool,
}

impl Card {
    pub fn height(&self) -> u16 {
        self.lines.len() as u16
    }

    /// Resolves a click to exactly one target. Trigger and image win over the
    /// body so they never also navigate.
    pub fn hit(&self, column: u16, row: u16) -> Hit {
        if contains(self.trigger, column, row) {
            return Hit::Trigger;
        }
        if let Some(image) = self.image {
            if contains(image, column, row) {
                return Hit::Image;
            }
        }
        Hit::Body
    }
}

fn contains(area: Rect, column: u16, row: u16) -> bool {
    column >= area.x && column < area.x + area.width && row >= area.y && row < area.y + area.height
}

pub fn header_spans(record: &Record) -> Vec<Span<'static>> {
    let secondary = Style::default().fg(COLOR_TEXT_SECONDARY);
    let mut spans = vec![
        Span::styled(format!("#{} ", record.id), secondary),
        Span::styled(
            record.author.clone(),
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(" @ {}", record.created_at.display()),
            secondary,
        ),
    ];
    if let Some(count) = record.reply_count() {
        spans.push(Span::styled(format!("  {GLYPH_REPLY} {count}"), secondary));
    }
    if record.pinned {
        spans.push(Span::raw(format!("  {GLYPH_PIN}")));
    }
    if record.locked {
        spans.push(Span::raw(format!("  {GLYPH_LOCK}")));
    }
    spans
}

fn spans_width(spans: &[Span<'_>]) -> usize {
    spans
        .iter()
        .map(|span| UnicodeWidthStr::width(span.content.as_ref()))
        .sum()
}

pub fn render_card(record: &Record, options: CardOptions<'_>) -> Card {
    let width = options.width.max(8);
    let mut header = header_spans(record);
    let used = spans_width(&header) as u16;
    let trigger_col = if used + 2 <= width {
        width - 1
    } else {
        used + 1
    };
    header.push(Span::raw(" ".repeat((trigger_col - used) as usize)));
    let trigger_style = if options.selected {
        Style::default()
            .fg(COLOR_ACCENT)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(COLOR_TEXT_SECONDARY)
    };
    header.push(Span::styled(GLYPH_MENU, trigger_style));

    let mut lines = vec![Line::from(header)];
    let rendered = content::parse(&record.content);
    let text_style = Style::default().fg(COLOR_TEXT_PRIMARY);
    let mut image_area = None;

    match &record.image {
        None => lines.extend(rendered.wrap(width as usize, text_style)),
        Some(_) if options.image_expanded => {
            let cols = options
                .preview
                .map(|preview| preview.natural_cols())
                .unwrap_or(options.thumbnail_cols)
                .clamp(1, width);
            let image_lines = image_lines(options.preview, cols);
            image_area = Some(Rect::new(0, 1, cols, image_lines.len() as u16));
            lines.extend(image_lines);
            lines.extend(rendered.wrap(width as usize, text_style));
        }
        Some(_) => {
            let cols = options.thumbnail_cols.clamp(1, width / 2);
            let image_lines = image_lines(options.preview, cols);
            image_area = Some(Rect::new(0, 1, cols, image_lines.len() as u16));
            let text_lines = rendered.wrap((width - cols - 1) as usize, text_style);
            let rows = image_lines.len().max(text_lines.len());
            let mut image_iter = image_lines.into_iter();
            let mut text_iter = text_lines.into_iter();
            for _ in 0..rows {
                let mut spans = match image_iter.next() {
                    Some(line) => line.spans,
                    None => vec![Span::raw(" ".repeat(cols as usize))],
                };
                spans.push(Span::raw(" "));
                if let Some(text) = text_iter.next() {
                    spans.extend(text.spans);
                }
                lines.push(Line::from(spans));
            }
        }
    }

    Card {
        lines,
        trigger: Rect::new(trigger_col, 0, 1, 1),
        image: image_area,
        links: rendered.links,
        navigable: options.navigable,
    }
}

fn image_lines(preview: Option<&Preview>, cols: u16) -> Vec<Line<'static>> {
    if let Some(preview) = preview {
        let lines = preview.lines(cols);
        if !lines.is_empty() {
            return lines;
        }
    }
    placeholder(cols)
}

/// Shaded box shown until the image has been downloaded and decoded.
fn placeholder(cols: u16) -> Vec<Line<'static>> {
    let rows = (cols / 4).clamp(1, 8);
    let style = Style::default().fg(COLOR_PLACEHOLDER);
    let label = "[image]";
    (0..rows)
        .map(|row| {
            if row == rows / 2 && (cols as usize) >= label.len() {
                let left = (cols as usize - label.len()) / 2;
                let right = cols as usize - label.len() - left;
                Line::from(vec![
                    Span::styled("░".repeat(left), style),
                    Span::styled(label, style.add_modifier(Modifier::ITALIC)),
                    Span::styled("░".repeat(right), style),
                ])
            } else {
                Line::from(Span::styled("░".repeat(cols as usize), style))
            }
        })
        .collect()
}

pub fn dropdown_options(record: &Record) -> Vec<ModAction> {
    moderation::options_for(record)
}

/// Places a dropdown of `options` rows under `trigger`, its right edge on the
/// trigger's right edge. Flips above the trigger when there is no room below.
pub fn anchor_dropdown(trigger: Rect, options: &[ModAction], bounds: Rect) -> Rect {
    let label_width = options
        .iter()
        .map(|option| option.label().len() as u16)
        .max()
        .unwrap_or(0);
    let width = (label_width + 4).min(bounds.width);
    let height = (options.len() as u16 + 2).min(bounds.height);

    let right = trigger.x + trigger.width;
    let x = right.saturating_sub(width).max(bounds.x);
    let below = trigger.y + trigger.height;
    let y = if below + height <= bounds.y + bounds.height {
        below
    } else {
        trigger.y.saturating_sub(height).max(bounds.y)
    };
    Rect::new(x, y, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WireRecord;

    fn record(json: &str) -> Record {
        let wire: WireRecord = serde_json::from_str(json).unwrap();
        Record::root(wire).unwrap()
    }

    fn text(line: &Line<'_>) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    fn options(width: u16) -> CardOptions<'static> {
        CardOptions {
            navigable: true,
            selected: false,
            image_expanded: false,
            width,
            thumbnail_cols: 24,
            preview: None,
        }
    }

    #[test]
    fn listing_record_renders_header_badges() {
        let rec = record(
            r#"{"id":5,"username":"a","postcontent":"hi","imagepath":"","timestamp":"t","commentcount":2,"pinned":true}"#,
        );
        let card = render_card(&rec, options(60));
        let header = text(&card.lines[0]);
        assert!(header.starts_with("#5 a @ t"));
        assert!(header.contains(&format!("{GLYPH_REPLY} 2")));
        assert!(header.contains(GLYPH_PIN));
        assert!(!header.contains(GLYPH_LOCK));
        assert!(header.ends_with(GLYPH_MENU));
        assert!(card.image.is_none());
        assert_eq!(text(&card.lines[1]), "hi");
    }

    #[test]
    fn lock_badge_tracks_flag() {
        let locked = render_card(&record(r#"{"id":"1","locked":true}"#), options(40));
        assert!(text(&locked.lines[0]).contains(GLYPH_LOCK));
        let open = render_card(&record(r#"{"id":"1","locked":false}"#), options(40));
        assert!(!text(&open.lines[0]).contains(GLYPH_LOCK));
    }

    #[test]
    fn trigger_sits_at_the_right_edge() {
        let card = render_card(&record(r#"{"id":"1","username":"a"}"#), options(40));
        assert_eq!(card.trigger, Rect::new(39, 0, 1, 1));
        assert_eq!(card.hit(39, 0), Hit::Trigger);
        assert_eq!(card.hit(2, 0), Hit::Body);
    }

    #[test]
    fn thumbnail_puts_text_beside_the_image() {
        let rec = record(r#"{"id":"1","postcontent":"hello","imagepath":"uploads/1_cat.png"}"#);
        let card = render_card(&rec, options(60));
        let image = card.image.unwrap();
        assert_eq!((image.x, image.y, image.width), (0, 1, 24));
        assert!(text(&card.lines[1]).contains("hello"));
        assert_eq!(card.hit(3, 1), Hit::Image);
        assert_eq!(card.hit(30, 1), Hit::Body);
    }

    #[test]
    fn expanded_image_puts_text_below() {
        let rec = record(r#"{"id":"1","postcontent":"hello","imagepath":"uploads/1_cat.png"}"#);
        let card = render_card(
            &rec,
            CardOptions {
                image_expanded: true,
                ..options(60)
            },
        );
        let image = card.image.unwrap();
        let last = card.lines.last().unwrap();
        assert_eq!(text(last), "hello");
        assert_eq!(card.height(), 1 + image.height + 1);
    }

    #[test]
    fn dropdown_hangs_below_trigger_right_aligned() {
        let trigger = Rect::new(50, 10, 1, 1);
        let options = [ModAction::Delete, ModAction::Pin, ModAction::Lock];
        let area = anchor_dropdown(trigger, &options, Rect::new(0, 0, 80, 40));
        assert_eq!(area.y, 11);
        assert_eq!(area.x + area.width, 51);
        assert_eq!(area.height, 5);

        let low = anchor_dropdown(Rect::new(50, 38, 1, 1), &options, Rect::new(0, 0, 80, 40));
        assert_eq!(low.y + low.height, 38);
    }
}
