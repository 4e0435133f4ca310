mod xobject;
pub mod layout;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use pdf_writer::{Content, Filter, Name, Pdf, Rect, Ref, Str, TextStr};

use crate::content;
use crate::error::Error;
use crate::fetch::ImageSet;
use crate::fonts::register_font;
use crate::geometry::MARGIN;
use crate::model::{LayoutBlock, Page, PageSize};

use xobject::embed_image;
use layout::{DrawCommand, FlowEngine};

const PRODUCER: &str = concat!("bookpress ", env!("CARGO_PKG_VERSION"));

/// Render a book to PDF bytes. Pages are laid out in `page_number` order;
/// images missing from `images` are skipped.
pub fn render(
    title: &str,
    pages: &[Page],
    page_size: PageSize,
    images: &ImageSet,
    font_path: Option<&Path>,
) -> Result<Vec<u8>, Error> {
    let t0 = std::time::Instant::now();
    let mut pdf = Pdf::new();
    let mut next_id = 1i32;
    let mut alloc = || {
        let r = Ref::new(next_id);
        next_id += 1;
        r
    };

    let catalog_id = alloc();
    let pages_id = alloc();
    let info_id = alloc();

    let mut ordered: Vec<&Page> = pages.iter().collect();
    ordered.sort_by_key(|p| p.page_number);
    let page_blocks: Vec<Vec<LayoutBlock>> = ordered
        .iter()
        .map(|p| content::normalize(&p.content, p.image_url.as_deref()))
        .collect();

    let t_normalize = t0.elapsed();

    // Phase 1: font, subset to every char the document can draw
    let mut used_chars: BTreeSet<char> = title.chars().collect();
    used_chars.extend('0'..='9');
    for block in page_blocks.iter().flatten() {
        match block {
            LayoutBlock::Heading(_, text) | LayoutBlock::Paragraph(text) => {
                used_chars.extend(text.chars().filter(|c| !c.is_whitespace()));
            }
            LayoutBlock::ImageRef(_) => {}
        }
    }
    used_chars.insert(' ');
    let font = register_font(&mut pdf, font_path, "F1", &used_chars, &mut alloc);

    let t_fonts = t0.elapsed();

    // Phase 2: one XObject per distinct fetched image, in page order
    let mut xobjects: HashMap<&str, (String, Ref)> = HashMap::new();
    for block in page_blocks.iter().flatten() {
        let LayoutBlock::ImageRef(url) = block else {
            continue;
        };
        if xobjects.contains_key(url.as_str()) {
            continue;
        }
        if let Some(img) = images.get(url) {
            let xobj_ref = alloc();
            embed_image(&mut pdf, xobj_ref, img, &mut alloc);
            let name = format!("Im{}", xobjects.len() + 1);
            xobjects.insert(url.as_str(), (name, xobj_ref));
        }
    }

    let t_images = t0.elapsed();

    // Phase 3: flow text onto physical pages
    let dims = page_size.dimensions();
    let mut engine = FlowEngine::new(&font, dims, MARGIN).with_title(title);
    for blocks in &page_blocks {
        engine.layout_page(blocks, |url| {
            images
                .get(url)
                .filter(|_| xobjects.contains_key(url))
                .map(|img| (img.pixel_width, img.pixel_height))
        });
    }
    let laid_out = engine.finish();

    let t_layout = t0.elapsed();

    // Phase 4: content streams and page tree
    let n = laid_out.len();
    let page_ids: Vec<Ref> = (0..n).map(|_| alloc()).collect();
    let content_ids: Vec<Ref> = (0..n).map(|_| alloc()).collect();

    for (i, page) in laid_out.iter().enumerate() {
        let mut c = Content::new();
        let mut page_images: Vec<(&str, Ref)> = Vec::new();
        for cmd in &page.commands {
            match cmd {
                DrawCommand::Text {
                    x,
                    y,
                    font_size,
                    text,
                    ..
                } => {
                    let bytes = font.encode(text);
                    c.begin_text();
                    c.set_font(Name(font.pdf_name.as_bytes()), *font_size);
                    c.next_line(*x, *y);
                    c.show(Str(&bytes));
                    c.end_text();
                }
                DrawCommand::Image {
                    url,
                    x,
                    y,
                    width,
                    height,
                } => {
                    let Some((name, xobj_ref)) = xobjects.get(url.as_str()) else {
                        continue;
                    };
                    c.save_state();
                    c.transform([*width, 0.0, 0.0, *height, *x, *y]);
                    c.x_object(Name(name.as_bytes()));
                    c.restore_state();
                    page_images.push((name.as_str(), *xobj_ref));
                }
            }
        }

        let raw = c.finish();
        let compressed = miniz_oxide::deflate::compress_to_vec_zlib(raw.as_slice(), 6);
        pdf.stream(content_ids[i], &compressed)
            .filter(Filter::FlateDecode);

        let mut pdf_page = pdf.page(page_ids[i]);
        pdf_page
            .media_box(Rect::new(0.0, 0.0, dims.width, dims.height))
            .parent(pages_id)
            .contents(content_ids[i]);
        let mut resources = pdf_page.resources();
        resources
            .fonts()
            .pair(Name(font.pdf_name.as_bytes()), font.font_ref);
        if !page_images.is_empty() {
            let mut xobj_dict = resources.x_objects();
            for (name, xobj_ref) in &page_images {
                xobj_dict.pair(Name(name.as_bytes()), *xobj_ref);
            }
        }
    }

    pdf.catalog(catalog_id).pages(pages_id);
    pdf.pages(pages_id)
        .kids(page_ids.iter().copied())
        .count(n as i32);
    pdf.document_info(info_id)
        .title(TextStr(title))
        .producer(TextStr(PRODUCER));

    let t_assembly = t0.elapsed();

    log::info!(
        "Render phases: normalize={:.1}ms, font_embed={:.1}ms, images={:.1}ms, layout={:.1}ms, assembly={:.1}ms ({} pages)",
        t_normalize.as_secs_f64() * 1000.0,
        (t_fonts - t_normalize).as_secs_f64() * 1000.0,
        (t_images - t_fonts).as_secs_f64() * 1000.0,
        (t_layout - t_images).as_secs_f64() * 1000.0,
        (t_assembly - t_layout).as_secs_f64() * 1000.0,
        n,
    );

    Ok(pdf.finish())
}
