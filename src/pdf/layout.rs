//! Greedy text flow and pagination.
//!
//! Layout works top-down in PDF user space (origin bottom-left). Each domain
//! page starts a new physical page; a physical page is closed once the cursor
//! falls below the bottom margin and only opened again when the next draw
//! command needs it, so exhausted space never leaves a blank trailing page.

use crate::fonts::FontMetrics;
use crate::geometry::PageDimensions;
use crate::model::LayoutBlock;

pub const BODY_FONT_SIZE: f32 = 12.0;
const LINE_HEIGHT_FACTOR: f32 = 1.2;
const TITLE_SCALE: f32 = 2.0;
const TITLE_ADVANCE_LINES: f32 = 3.0;
const HEADING_ADVANCE_LINES: f32 = 2.0;
const IMAGE_SCALE: f32 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TextRole {
    Title,
    Heading(u8),
    Body,
    PageNumber,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DrawCommand {
    /// `y` is the text baseline.
    Text {
        role: TextRole,
        x: f32,
        y: f32,
        font_size: f32,
        text: String,
    },
    /// `(x, y)` is the lower-left corner.
    Image {
        url: String,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
}

/// Draw commands bound to one physical page.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageLayout {
    /// 1-based physical page ordinal within the document.
    pub number: usize,
    pub commands: Vec<DrawCommand>,
}

impl PageLayout {
    pub fn has_image(&self) -> bool {
        self.commands
            .iter()
            .any(|c| matches!(c, DrawCommand::Image { .. }))
    }

    /// Body and heading text in draw order.
    pub fn text_of(&self, role: fn(&TextRole) -> bool) -> impl Iterator<Item = &str> {
        self.commands.iter().filter_map(move |c| match c {
            DrawCommand::Text { role: r, text, .. } if role(r) => Some(text.as_str()),
            _ => None,
        })
    }
}

pub fn heading_font_size(level: u8, base: f32) -> f32 {
    let level = level.clamp(1, 6) as f32;
    base * (1.5 - (level - 1.0) * 0.2)
}

pub struct FlowEngine<'a, M: FontMetrics + ?Sized> {
    metrics: &'a M,
    dims: PageDimensions,
    margin: f32,
    font_size: f32,
    line_height: f32,
    max_width: f32,
    pending_title: Option<String>,
    pages: Vec<PageLayout>,
    current: Option<PageLayout>,
    y: f32,
}

impl<'a, M: FontMetrics + ?Sized> FlowEngine<'a, M> {
    pub fn new(metrics: &'a M, dims: PageDimensions, margin: f32) -> Self {
        Self {
            metrics,
            dims,
            margin,
            font_size: BODY_FONT_SIZE,
            line_height: LINE_HEIGHT_FACTOR * BODY_FONT_SIZE,
            max_width: dims.content_width(margin),
            pending_title: None,
            pages: Vec::new(),
            current: None,
            y: dims.height - margin,
        }
    }

    /// The title is drawn at the top of the very first physical page.
    pub fn with_title(mut self, title: &str) -> Self {
        self.pending_title = Some(title.to_string());
        self
    }

    pub fn max_width(&self) -> f32 {
        self.max_width
    }

    pub fn line_height(&self) -> f32 {
        self.line_height
    }

    /// Flow one domain page onto one or more fresh physical pages.
    /// `image_size` yields the natural pixel size of a fetched image.
    pub fn layout_page(
        &mut self,
        blocks: &[LayoutBlock],
        image_size: impl Fn(&str) -> Option<(u32, u32)>,
    ) {
        self.finish_page();
        self.open_page();

        for block in blocks {
            match block {
                LayoutBlock::Heading(level, text) => {
                    let size = heading_font_size(*level, self.font_size);
                    self.draw_text(TextRole::Heading(*level), size, text.clone());
                    self.y -= HEADING_ADVANCE_LINES * self.line_height;
                }
                LayoutBlock::Paragraph(text) => self.flow_paragraph(text),
                LayoutBlock::ImageRef(url) => match image_size(url) {
                    Some((w, h)) => self.place_image(url, w, h),
                    None => log::debug!("No image data for {url}; skipping"),
                },
            }
        }
    }

    /// Close the last page and return every physical page laid out so far.
    pub fn finish(mut self) -> Vec<PageLayout> {
        self.finish_page();
        self.pages
    }

    fn open_page(&mut self) {
        let number = self.pages.len() + 1;
        self.current = Some(PageLayout {
            number,
            commands: Vec::new(),
        });
        self.y = self.dims.height - self.margin;

        if let Some(title) = self.pending_title.take() {
            let size = self.font_size * TITLE_SCALE;
            self.push(DrawCommand::Text {
                role: TextRole::Title,
                x: self.margin,
                y: self.y,
                font_size: size,
                text: title,
            });
            self.y -= TITLE_ADVANCE_LINES * self.line_height;
        }
    }

    fn finish_page(&mut self) {
        let Some(mut page) = self.current.take() else {
            return;
        };
        let label = page.number.to_string();
        let label_w = self.metrics.text_width(&label, self.font_size);
        page.commands.push(DrawCommand::Text {
            role: TextRole::PageNumber,
            x: self.dims.width / 2.0 - label_w / 2.0,
            y: self.margin / 2.0,
            font_size: self.font_size,
            text: label,
        });
        self.pages.push(page);
    }

    fn push(&mut self, cmd: DrawCommand) {
        if let Some(page) = self.current.as_mut() {
            page.commands.push(cmd);
        }
    }

    /// Break to a new page if the cursor has run past the bottom margin.
    fn make_room(&mut self) {
        if self.current.is_some() && self.y < self.margin {
            self.finish_page();
        }
        if self.current.is_none() {
            self.open_page();
        }
    }

    fn draw_text(&mut self, role: TextRole, font_size: f32, text: String) {
        self.make_room();
        self.push(DrawCommand::Text {
            role,
            x: self.margin,
            y: self.y,
            font_size,
            text,
        });
    }

    fn emit_line(&mut self, line: String) {
        self.draw_text(TextRole::Body, self.font_size, line);
        self.y -= self.line_height;
    }

    fn fits(&self, text: &str) -> bool {
        self.metrics.text_width(text, self.font_size) <= self.max_width
    }

    fn flow_paragraph(&mut self, text: &str) {
        let mut line = String::new();
        for word in text.split_whitespace() {
            let candidate = if line.is_empty() {
                word.to_string()
            } else {
                format!("{line} {word}")
            };
            if self.fits(&candidate) {
                line = candidate;
                continue;
            }
            if !line.is_empty() {
                let done = std::mem::replace(&mut line, word.to_string());
                self.emit_line(done);
            } else {
                line = word.to_string();
            }
            if !self.fits(&line) {
                line = self.break_long_word(&line);
            }
        }
        if !line.is_empty() {
            self.emit_line(line);
        }
    }

    /// Emit full-width slices of a word too wide for a line; returns the tail.
    fn break_long_word(&mut self, word: &str) -> String {
        let mut rest = word;
        while !self.fits(rest) {
            let mut cut = 0;
            for (idx, ch) in rest.char_indices() {
                let end = idx + ch.len_utf8();
                if cut > 0 && !self.fits(&rest[..end]) {
                    break;
                }
                cut = end;
            }
            self.emit_line(rest[..cut].to_string());
            rest = &rest[cut..];
        }
        rest.to_string()
    }

    /// The image slot is fixed, so it lands on the current page even when
    /// the text cursor has run out of room.
    fn place_image(&mut self, url: &str, pixel_w: u32, pixel_h: u32) {
        if self.current.is_none() {
            self.open_page();
        }
        if self.current.as_ref().is_some_and(PageLayout::has_image) {
            log::debug!("Page already has an image; skipping {url}");
            return;
        }
        let width = pixel_w as f32 * IMAGE_SCALE;
        let height = pixel_h as f32 * IMAGE_SCALE;
        self.push(DrawCommand::Image {
            url: url.to_string(),
            x: self.dims.width / 2.0 - width / 2.0,
            y: 2.0 * self.margin,
            width,
            height,
        });
    }
}

/// Lay out a single domain page's blocks with no title and no images.
pub fn layout(
    blocks: &[LayoutBlock],
    page_width: f32,
    page_height: f32,
    margin: f32,
    metrics: &dyn FontMetrics,
) -> Vec<PageLayout> {
    let dims = PageDimensions {
        width: page_width,
        height: page_height,
    };
    let mut engine = FlowEngine::new(metrics, dims, margin);
    engine.layout_page(blocks, |_| None);
    engine.finish()
}
