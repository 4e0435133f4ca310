use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use memmap2::Mmap;
use pdf_writer::{Name, Pdf, Rect, Ref};
use ttf_parser::Face;

use crate::error::Error;

/// Measures rendered text width. The flow engine only needs this much of a font.
pub trait FontMetrics {
    /// Width of `text` in points at `font_size`.
    fn text_width(&self, text: &str, font_size: f32) -> f32;
}

/// Times-Roman advance widths at 1000 units/em for WinAnsi bytes 32..=255.
/// Undefined code points are 0.
#[rustfmt::skip]
const TIMES_ROMAN_WIDTHS: [u16; 224] = [
    250, 333, 408, 500, 500, 833, 778, 180, 333, 333, 500, 564, 250, 333, 250, 278,
    500, 500, 500, 500, 500, 500, 500, 500, 500, 500, 278, 278, 564, 564, 564, 444,
    921, 722, 667, 667, 722, 611, 556, 722, 722, 333, 389, 722, 611, 889, 722, 722,
    556, 722, 667, 556, 611, 722, 722, 944, 722, 722, 611, 333, 278, 333, 469, 500,
    333, 444, 500, 444, 500, 444, 333, 500, 500, 278, 278, 500, 278, 778, 500, 500,
    500, 500, 333, 389, 278, 500, 500, 722, 500, 500, 444, 480, 200, 480, 541, 0,
    500, 0, 333, 500, 444, 1000, 500, 500, 333, 1000, 556, 333, 889, 0, 611, 0,
    0, 333, 333, 444, 444, 350, 500, 1000, 333, 980, 389, 333, 722, 0, 444, 722,
    250, 333, 500, 500, 500, 500, 200, 500, 333, 760, 276, 500, 564, 333, 760, 333,
    400, 564, 300, 300, 333, 500, 453, 250, 333, 300, 310, 500, 750, 750, 750, 444,
    722, 722, 722, 722, 722, 722, 889, 667, 611, 611, 611, 611, 333, 333, 333, 333,
    722, 722, 722, 722, 722, 722, 722, 564, 722, 722, 722, 722, 722, 722, 556, 500,
    444, 444, 444, 444, 444, 444, 667, 444, 444, 444, 444, 444, 278, 278, 278, 278,
    500, 500, 500, 500, 500, 500, 500, 564, 500, 500, 500, 500, 500, 500, 500, 500,
];

fn times_width_1000(ch: char) -> f32 {
    let byte = char_to_winansi(ch);
    if byte >= 32 {
        TIMES_ROMAN_WIDTHS[(byte - 32) as usize] as f32
    } else {
        0.0
    }
}

/// Metrics of the built-in Times-Roman face, usable without a PDF writer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimesRoman;

impl FontMetrics for TimesRoman {
    fn text_width(&self, text: &str, font_size: f32) -> f32 {
        text.chars().map(times_width_1000).sum::<f32>() * font_size / 1000.0
    }
}

pub(crate) struct FontEntry {
    pub(crate) pdf_name: String,
    pub(crate) font_ref: Ref,
    /// Present for embedded TrueType fonts (Identity-H encoding).
    char_to_gid: Option<BTreeMap<char, u16>>,
    char_widths_1000: BTreeMap<char, f32>,
}

impl FontEntry {
    fn char_width_1000(&self, ch: char) -> f32 {
        match self.char_to_gid {
            Some(_) => self.char_widths_1000.get(&ch).copied().unwrap_or(0.0),
            None => times_width_1000(ch),
        }
    }

    /// Encode text for a `Tj` operand. Characters the font cannot show are
    /// dropped, matching their zero measured width.
    pub(crate) fn encode(&self, text: &str) -> Vec<u8> {
        match &self.char_to_gid {
            Some(map) => encode_as_gids(text, map),
            None => to_winansi_bytes(text),
        }
    }

    pub(crate) fn is_embedded(&self) -> bool {
        self.char_to_gid.is_some()
    }
}

impl FontMetrics for FontEntry {
    fn text_width(&self, text: &str, font_size: f32) -> f32 {
        text.chars().map(|ch| self.char_width_1000(ch)).sum::<f32>() * font_size / 1000.0
    }
}

/// Map a single Unicode char to its WinAnsi byte, or 0 if unmappable.
fn char_to_winansi(c: char) -> u8 {
    match c as u32 {
        0x0020..=0x007E => c as u8,
        0x00A0..=0x00FF => c as u8,
        0x20AC => 0x80,
        0x201A => 0x82,
        0x0192 => 0x83,
        0x201E => 0x84,
        0x2026 => 0x85,
        0x2020 => 0x86,
        0x2021 => 0x87,
        0x02C6 => 0x88,
        0x2030 => 0x89,
        0x0160 => 0x8A,
        0x2039 => 0x8B,
        0x0152 => 0x8C,
        0x017D => 0x8E,
        0x2018 => 0x91,
        0x2019 => 0x92,
        0x201C => 0x93,
        0x201D => 0x94,
        0x2022 => 0x95, // bullet
        0x2013 => 0x96,
        0x2014 => 0x97,
        0x02DC => 0x98,
        0x2122 => 0x99,
        0x0161 => 0x9A,
        0x203A => 0x9B,
        0x0153 => 0x9C,
        0x017E => 0x9E,
        0x0178 => 0x9F,
        _ => 0,
    }
}

/// Convert a UTF-8 string to WinAnsi (Windows-1252) bytes for PDF Str encoding.
pub(crate) fn to_winansi_bytes(s: &str) -> Vec<u8> {
    s.chars()
        .map(char_to_winansi)
        .filter(|&b| b >= 32)
        .collect()
}

/// Encode UTF-8 text as big-endian 2-byte glyph IDs for CIDFont content streams.
fn encode_as_gids(text: &str, char_to_gid: &BTreeMap<char, u16>) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() * 2);
    for gid in text.chars().filter_map(|ch| char_to_gid.get(&ch)) {
        out.extend_from_slice(&gid.to_be_bytes());
    }
    out
}

fn identity_system_info() -> pdf_writer::types::SystemInfo<'static> {
    pdf_writer::types::SystemInfo {
        registry: pdf_writer::Str(b"Adobe"),
        ordering: pdf_writer::Str(b"Identity"),
        supplement: 0,
    }
}

struct Embedded {
    char_to_gid: BTreeMap<char, u16>,
    char_widths_1000: BTreeMap<char, f32>,
}

/// Embed a TrueType/OpenType font as a CIDFont (Type0 composite) with Identity-H encoding.
/// The font data is subsetted to only include glyphs used in the document.
fn embed_truetype(
    pdf: &mut Pdf,
    font_ref: Ref,
    font_data: &[u8],
    used_chars: &BTreeSet<char>,
    alloc: &mut impl FnMut() -> Ref,
) -> Result<Embedded, Error> {
    let face = Face::parse(font_data, 0).map_err(|e| Error::Font(e.to_string()))?;
    let family = face
        .names()
        .into_iter()
        .find(|n| n.name_id == ttf_parser::name_id::POST_SCRIPT_NAME && n.is_unicode())
        .and_then(|n| n.to_string())
        .unwrap_or_else(|| "BookSerif".to_string());
    let ps_name: String = family.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '-').collect();

    let units = face.units_per_em() as f32;
    let to_1000 = |v: f32| v / units * 1000.0;
    let bb = face.global_bounding_box();
    let bbox = Rect::new(
        to_1000(bb.x_min as f32),
        to_1000(bb.y_min as f32),
        to_1000(bb.x_max as f32),
        to_1000(bb.y_max as f32),
    );

    // BTreeSet iteration keeps glyph remapping stable between runs.
    let mut remapper = subsetter::GlyphRemapper::new();
    let mut char_to_gid = BTreeMap::new();
    let mut char_widths_1000 = BTreeMap::new();
    for &ch in used_chars {
        if let Some(gid) = face.glyph_index(ch) {
            char_to_gid.insert(ch, remapper.remap(gid.0));
            let w = face
                .glyph_hor_advance(gid)
                .map(|adv| to_1000(adv as f32))
                .unwrap_or(0.0);
            char_widths_1000.insert(ch, w);
        }
    }

    let subset_data = subsetter::subset(font_data, 0, &remapper).unwrap_or_else(|e| {
        log::warn!("Font subsetting failed for {ps_name}: {e}; embedding full font");
        font_data.to_vec()
    });
    let data_len =
        i32::try_from(subset_data.len()).map_err(|_| Error::Font("font too large".into()))?;

    let descriptor_ref = alloc();
    let data_ref = alloc();
    let cid_font_ref = alloc();
    let tounicode_ref = alloc();

    pdf.stream(data_ref, &subset_data)
        .pair(Name(b"Length1"), data_len);

    pdf.font_descriptor(descriptor_ref)
        .name(Name(ps_name.as_bytes()))
        .flags(pdf_writer::types::FontFlags::NON_SYMBOLIC | pdf_writer::types::FontFlags::SERIF)
        .bbox(bbox)
        .italic_angle(0.0)
        .ascent(to_1000(face.ascender() as f32))
        .descent(to_1000(face.descender() as f32))
        .cap_height(face.capital_height().map(|h| to_1000(h as f32)).unwrap_or(700.0))
        .stem_v(80.0)
        .font_file2(data_ref);

    {
        let mut cid = pdf.cid_font(cid_font_ref);
        cid.subtype(pdf_writer::types::CidFontType::Type2);
        cid.base_font(Name(ps_name.as_bytes()));
        cid.system_info(identity_system_info());
        cid.font_descriptor(descriptor_ref);
        cid.default_width(0.0);
        cid.cid_to_gid_map_predefined(Name(b"Identity"));
        let mut gid_widths: Vec<(u16, f32)> = char_to_gid
            .iter()
            .map(|(ch, &gid)| (gid, char_widths_1000[ch]))
            .collect();
        gid_widths.sort_by_key(|&(gid, _)| gid);
        gid_widths.dedup_by_key(|&mut (gid, _)| gid);
        if !gid_widths.is_empty() {
            let mut w = cid.widths();
            for &(gid, width) in &gid_widths {
                w.consecutive(gid, [width]);
            }
        }
    }

    let cmap_name = format!("{ps_name}-UTF16");
    let mut cmap = pdf_writer::types::UnicodeCmap::new(Name(cmap_name.as_bytes()), identity_system_info());
    for (&ch, &gid) in &char_to_gid {
        cmap.pair(gid, ch);
    }
    let cmap_data = cmap.finish();
    pdf.stream(tounicode_ref, cmap_data.as_slice());

    pdf.type0_font(font_ref)
        .base_font(Name(ps_name.as_bytes()))
        .encoding_predefined(Name(b"Identity-H"))
        .descendant_font(cid_font_ref)
        .to_unicode(tounicode_ref);

    Ok(Embedded {
        char_to_gid,
        char_widths_1000,
    })
}

fn load_font_file(path: &Path) -> Result<Mmap, Error> {
    let file = std::fs::File::open(path)?;
    // The mapping lives only for the duration of embedding.
    let map = unsafe { Mmap::map(&file)? };
    Ok(map)
}

/// Register the document's single serif font. A configured TrueType file is
/// subset and embedded; without one, or if it cannot be used, the standard
/// Times-Roman face is referenced.
pub(crate) fn register_font(
    pdf: &mut Pdf,
    font_path: Option<&Path>,
    pdf_name: &str,
    used_chars: &BTreeSet<char>,
    alloc: &mut impl FnMut() -> Ref,
) -> FontEntry {
    let t0 = std::time::Instant::now();
    let font_ref = alloc();

    let embedded = font_path.and_then(|path| {
        load_font_file(path)
            .and_then(|data| embed_truetype(pdf, font_ref, &data, used_chars, alloc))
            .map_err(|e| {
                log::warn!("Cannot embed font {}: {e}; using Times-Roman", path.display());
            })
            .ok()
    });

    let entry = match embedded {
        Some(e) => FontEntry {
            pdf_name: pdf_name.to_string(),
            font_ref,
            char_to_gid: Some(e.char_to_gid),
            char_widths_1000: e.char_widths_1000,
        },
        None => {
            pdf.type1_font(font_ref)
                .base_font(Name(b"Times-Roman"))
                .encoding_predefined(Name(b"WinAnsiEncoding"));
            FontEntry {
                pdf_name: pdf_name.to_string(),
                font_ref,
                char_to_gid: None,
                char_widths_1000: BTreeMap::new(),
            }
        }
    };

    log::debug!(
        "register_font: embedded={} glyphs={} → {:.1}ms",
        entry.is_embedded(),
        used_chars.len(),
        t0.elapsed().as_secs_f64() * 1000.0,
    );
    entry
}
