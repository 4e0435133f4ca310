//! WordprocessingML packaging. Text only: the title, a "Page N" heading per
//! page, the page's own headings, its body text and a page break.

use std::io::{Cursor, Write};

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::content::{self, xml_escape};
use crate::error::Result;
use crate::geometry::{MARGIN, PageDimensions};
use crate::model::{PackageOptions, Page};

const NS_W: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const NS_R: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const SERIF_FACE: &str = "Times New Roman";

/// Heading style sizes in half-points, for Heading1..Heading6.
const HEADING_HALF_POINTS: [u32; 6] = [36, 31, 26, 24, 22, 22];

/// Build a DOCX package. Pages are ordered by `page_number`; images are
/// not embedded.
pub fn package(
    title: &str,
    pages: &[Page],
    dims: PageDimensions,
    options: &PackageOptions,
) -> Result<Vec<u8>> {
    let t0 = std::time::Instant::now();
    let mut ordered: Vec<&Page> = pages.iter().collect();
    ordered.sort_by_key(|p| p.page_number);

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let deflate = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let parts = [
        ("[Content_Types].xml", content_types_xml()),
        ("_rels/.rels", package_rels_xml()),
        ("docProps/core.xml", core_xml(title, options)),
        ("word/_rels/document.xml.rels", document_rels_xml()),
        ("word/styles.xml", styles_xml()),
        ("word/document.xml", document_xml(title, &ordered, dims)),
    ];
    for (name, xml) in &parts {
        zip.start_file(*name, deflate)?;
        zip.write_all(xml.as_bytes())?;
    }

    let bytes = zip.finish()?.into_inner();
    log::debug!(
        "docx::package: {} pages, {} bytes → {:.1}ms",
        ordered.len(),
        bytes.len(),
        t0.elapsed().as_secs_f64() * 1000.0,
    );
    Ok(bytes)
}

fn content_types_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
  <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
  <Default Extension="xml" ContentType="application/xml"/>
  <Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>
  <Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/>
  <Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/>
</Types>
"#
    .to_string()
}

fn package_rels_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>
  <Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/>
</Relationships>
"#
    .to_string()
}

fn document_rels_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>
</Relationships>
"#
    .to_string()
}

fn core_xml(title: &str, options: &PackageOptions) -> String {
    let publisher = xml_escape(&options.publisher);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <dc:title>{}</dc:title>
  <dc:creator>{publisher}</dc:creator>
  <dc:description>Generated by {publisher}</dc:description>
  <dc:language>{}</dc:language>
</cp:coreProperties>
"#,
        xml_escape(title),
        xml_escape(&options.language),
    )
}

fn styles_xml() -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n");
    xml.push_str(&format!("<w:styles xmlns:w=\"{NS_W}\">\n"));
    xml.push_str(&format!(
        "  <w:docDefaults><w:rPrDefault><w:rPr><w:rFonts w:ascii=\"{SERIF_FACE}\" w:hAnsi=\"{SERIF_FACE}\" w:cs=\"{SERIF_FACE}\"/><w:sz w:val=\"24\"/></w:rPr></w:rPrDefault></w:docDefaults>\n"
    ));
    xml.push_str("  <w:style w:type=\"paragraph\" w:default=\"1\" w:styleId=\"Normal\"><w:name w:val=\"Normal\"/><w:pPr><w:spacing w:after=\"120\"/></w:pPr></w:style>\n");
    xml.push_str("  <w:style w:type=\"paragraph\" w:styleId=\"Title\"><w:name w:val=\"Title\"/><w:basedOn w:val=\"Normal\"/><w:next w:val=\"Normal\"/><w:pPr><w:spacing w:after=\"240\"/></w:pPr><w:rPr><w:b/><w:sz w:val=\"48\"/></w:rPr></w:style>\n");
    for (i, half_points) in HEADING_HALF_POINTS.iter().enumerate() {
        let level = i + 1;
        xml.push_str(&format!(
            "  <w:style w:type=\"paragraph\" w:styleId=\"Heading{level}\"><w:name w:val=\"heading {level}\"/><w:basedOn w:val=\"Normal\"/><w:next w:val=\"Normal\"/><w:pPr><w:keepNext/><w:spacing w:before=\"240\" w:after=\"120\"/><w:outlineLvl w:val=\"{i}\"/></w:pPr><w:rPr><w:b/><w:sz w:val=\"{half_points}\"/></w:rPr></w:style>\n"
        ));
    }
    xml.push_str("</w:styles>\n");
    xml
}

fn styled_paragraph(xml: &mut String, style: &str, text: &str) {
    xml.push_str(&format!(
        "    <w:p><w:pPr><w:pStyle w:val=\"{style}\"/></w:pPr><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>\n",
        xml_escape(text)
    ));
}

fn document_xml(title: &str, pages: &[&Page], dims: PageDimensions) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n");
    xml.push_str(&format!("<w:document xmlns:w=\"{NS_W}\" xmlns:r=\"{NS_R}\">\n"));
    xml.push_str("  <w:body>\n");

    styled_paragraph(&mut xml, "Title", title);
    for page in pages {
        styled_paragraph(&mut xml, "Heading1", &format!("Page {}", page.page_number));
        for (level, text) in content::headings(&page.content) {
            styled_paragraph(&mut xml, &format!("Heading{level}"), &text);
        }
        let body = content::plain_text(&page.content);
        if body.is_empty() {
            xml.push_str("    <w:p/>\n");
        } else {
            xml.push_str(&format!(
                "    <w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>\n",
                xml_escape(&body)
            ));
        }
        xml.push_str("    <w:p><w:pPr><w:pageBreakBefore/></w:pPr></w:p>\n");
    }

    let (w, h) = dims.twips();
    let margin = (MARGIN * 20.0).round() as u32;
    xml.push_str(&format!(
        "    <w:sectPr><w:pgSz w:w=\"{w}\" w:h=\"{h}\"/><w:pgMar w:top=\"{margin}\" w:right=\"{margin}\" w:bottom=\"{margin}\" w:left=\"{margin}\" w:header=\"720\" w:footer=\"720\" w:gutter=\"0\"/></w:sectPr>\n"
    ));
    xml.push_str("  </w:body>\n");
    xml.push_str("</w:document>\n");
    xml
}
