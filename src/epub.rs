//! EPUB 3 packaging: one XHTML document per page, with an EPUB 2 NCX for
//! older readers.

use std::io::{Cursor, Write};

use uuid::Uuid;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::content::{to_xhtml, xml_escape};
use crate::error::Result;
use crate::fetch::ImageSet;
use crate::model::{LoadedImage, PackageOptions, Page};

const STYLESHEET: &str = "body { font-family: serif; line-height: 1.4; margin: 0 5%; }
h1, h2, h3, h4, h5, h6 { font-family: serif; }
div.illustration { text-align: center; margin: 20px 0; }
div.illustration img { max-width: 100%; height: auto; }
";

/// One page as it lands in the archive.
struct Chapter<'a> {
    number: u32,
    body: String,
    image: Option<ChapterImage<'a>>,
}

enum ChapterImage<'a> {
    Embedded { href: String, img: &'a LoadedImage },
    Remote(&'a str),
}

impl Chapter<'_> {
    fn id(&self) -> String {
        format!("page-{}", self.number)
    }

    fn href(&self) -> String {
        format!("page-{}.xhtml", self.number)
    }

    fn title(&self) -> String {
        format!("Page {}", self.number)
    }

    fn is_remote(&self) -> bool {
        matches!(self.image, Some(ChapterImage::Remote(_))) || self.body.contains("src=\"http")
    }
}

/// Deterministic identifier for a book: a v5 UUID over its id and title.
pub fn book_identifier(book_id: u64, title: &str) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("urn:bookpress:book:{book_id}:{title}").as_bytes(),
    )
}

/// Build an EPUB archive. Pages are ordered by `page_number`; images found
/// in `images` are embedded, the rest stay remote references.
pub fn package(
    title: &str,
    pages: &[Page],
    images: &ImageSet,
    options: &PackageOptions,
) -> Result<Vec<u8>> {
    let t0 = std::time::Instant::now();
    let mut ordered: Vec<&Page> = pages.iter().collect();
    ordered.sort_by_key(|p| p.page_number);

    let chapters: Vec<Chapter> = ordered
        .iter()
        .map(|page| {
            let image = page.image_url.as_deref().map(|url| match images.get(url) {
                Some(img) => ChapterImage::Embedded {
                    href: format!("images/page-{}.{}", page.page_number, img.format.extension()),
                    img,
                },
                None => ChapterImage::Remote(url),
            });
            Chapter {
                number: page.page_number,
                body: to_xhtml(&page.content),
                image,
            }
        })
        .collect();

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    // mimetype: stored, no compression, first entry
    let stored = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .last_modified_time(zip::DateTime::default());
    zip.start_file("mimetype", stored)?;
    zip.write_all(b"application/epub+zip")?;

    let deflate = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    zip.start_file("META-INF/container.xml", deflate)?;
    zip.write_all(generate_container_xml().as_bytes())?;

    let uid = book_identifier(options.book_id, title);
    zip.start_file("OEBPS/content.opf", deflate)?;
    zip.write_all(generate_opf(title, &uid, &chapters, options).as_bytes())?;

    zip.start_file("OEBPS/nav.xhtml", deflate)?;
    zip.write_all(generate_nav(title, &chapters, options).as_bytes())?;

    zip.start_file("OEBPS/toc.ncx", deflate)?;
    zip.write_all(generate_ncx(title, &uid, &chapters).as_bytes())?;

    zip.start_file("OEBPS/style.css", deflate)?;
    zip.write_all(STYLESHEET.as_bytes())?;

    for chapter in &chapters {
        zip.start_file(format!("OEBPS/{}", chapter.href()), deflate)?;
        zip.write_all(generate_chapter(chapter, options).as_bytes())?;
    }

    for chapter in &chapters {
        if let Some(ChapterImage::Embedded { href, img }) = &chapter.image {
            zip.start_file(format!("OEBPS/{href}"), stored)?;
            zip.write_all(&img.data)?;
        }
    }

    let bytes = zip.finish()?.into_inner();
    log::debug!(
        "epub::package: {} pages, {} bytes → {:.1}ms",
        chapters.len(),
        bytes.len(),
        t0.elapsed().as_secs_f64() * 1000.0,
    );
    Ok(bytes)
}

fn generate_container_xml() -> String {
    r##"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"##
    .to_string()
}

fn generate_opf(title: &str, uid: &Uuid, chapters: &[Chapter], options: &PackageOptions) -> String {
    let mut opf = String::new();
    opf.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    opf.push_str("<package xmlns=\"http://www.idpf.org/2007/opf\" version=\"3.0\" unique-identifier=\"uid\">\n");

    opf.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n");
    opf.push_str(&format!("    <dc:identifier id=\"uid\">urn:uuid:{uid}</dc:identifier>\n"));
    opf.push_str(&format!("    <dc:title>{}</dc:title>\n", xml_escape(title)));
    opf.push_str(&format!("    <dc:language>{}</dc:language>\n", xml_escape(&options.language)));
    opf.push_str(&format!("    <dc:creator>{}</dc:creator>\n", xml_escape(&options.publisher)));
    opf.push_str(&format!("    <dc:publisher>{}</dc:publisher>\n", xml_escape(&options.publisher)));
    opf.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{}</meta>\n",
        xml_escape(&options.modified)
    ));
    opf.push_str("  </metadata>\n");

    opf.push_str("  <manifest>\n");
    opf.push_str("    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n");
    opf.push_str("    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n");
    opf.push_str("    <item id=\"css\" href=\"style.css\" media-type=\"text/css\"/>\n");
    for chapter in chapters {
        let props = if chapter.is_remote() {
            " properties=\"remote-resources\""
        } else {
            ""
        };
        opf.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"application/xhtml+xml\"{props}/>\n",
            chapter.id(),
            chapter.href()
        ));
    }
    for chapter in chapters {
        if let Some(ChapterImage::Embedded { href, img }) = &chapter.image {
            opf.push_str(&format!(
                "    <item id=\"img-{}\" href=\"{href}\" media-type=\"{}\"/>\n",
                chapter.number,
                img.format.mime()
            ));
        }
    }
    opf.push_str("  </manifest>\n");

    opf.push_str("  <spine toc=\"ncx\">\n");
    for chapter in chapters {
        opf.push_str(&format!("    <itemref idref=\"{}\"/>\n", chapter.id()));
    }
    opf.push_str("  </spine>\n");

    opf.push_str("</package>\n");
    opf
}

fn xhtml_head(html: &mut String, title: &str, lang: &str) {
    let lang = xml_escape(lang);
    html.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    html.push_str("<!DOCTYPE html>\n");
    html.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\" lang=\"{lang}\" xml:lang=\"{lang}\">\n"
    ));
    html.push_str("<head>\n");
    html.push_str(&format!("<title>{}</title>\n", xml_escape(title)));
    html.push_str("<link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\"/>\n");
    html.push_str("</head>\n");
}

fn generate_nav(title: &str, chapters: &[Chapter], options: &PackageOptions) -> String {
    let mut html = String::new();
    xhtml_head(&mut html, title, &options.language);
    html.push_str("<body>\n");
    html.push_str("<nav epub:type=\"toc\" id=\"toc\">\n");
    html.push_str(&format!("<h1>{}</h1>\n", xml_escape(title)));
    html.push_str("<ol>\n");
    for chapter in chapters {
        html.push_str(&format!(
            "<li><a href=\"{}\">{}</a></li>\n",
            chapter.href(),
            chapter.title()
        ));
    }
    html.push_str("</ol>\n");
    html.push_str("</nav>\n");
    html.push_str("</body>\n</html>\n");
    html
}

fn generate_ncx(title: &str, uid: &Uuid, chapters: &[Chapter]) -> String {
    let mut ncx = String::new();
    ncx.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    ncx.push_str("<ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n");
    ncx.push_str("  <head>\n");
    ncx.push_str(&format!("    <meta name=\"dtb:uid\" content=\"urn:uuid:{uid}\"/>\n"));
    ncx.push_str("    <meta name=\"dtb:depth\" content=\"1\"/>\n");
    ncx.push_str("    <meta name=\"dtb:totalPageCount\" content=\"0\"/>\n");
    ncx.push_str("    <meta name=\"dtb:maxPageNumber\" content=\"0\"/>\n");
    ncx.push_str("  </head>\n");
    ncx.push_str(&format!(
        "  <docTitle><text>{}</text></docTitle>\n",
        xml_escape(title)
    ));
    ncx.push_str("  <navMap>\n");
    for (i, chapter) in chapters.iter().enumerate() {
        ncx.push_str(&format!(
            "    <navPoint id=\"nav-{}\" playOrder=\"{}\">\n",
            chapter.number,
            i + 1
        ));
        ncx.push_str(&format!(
            "      <navLabel><text>{}</text></navLabel>\n",
            chapter.title()
        ));
        ncx.push_str(&format!("      <content src=\"{}\"/>\n", chapter.href()));
        ncx.push_str("    </navPoint>\n");
    }
    ncx.push_str("  </navMap>\n");
    ncx.push_str("</ncx>\n");
    ncx
}

fn generate_chapter(chapter: &Chapter, options: &PackageOptions) -> String {
    let mut html = String::new();
    xhtml_head(&mut html, &chapter.title(), &options.language);
    html.push_str("<body>\n");
    html.push_str(&format!(
        "<section epub:type=\"chapter\" id=\"{}\">\n",
        chapter.id()
    ));
    html.push_str(&chapter.body);
    html.push('\n');
    let src = match &chapter.image {
        Some(ChapterImage::Embedded { href, .. }) => Some(href.as_str()),
        Some(ChapterImage::Remote(url)) => Some(*url),
        None => None,
    };
    if let Some(src) = src {
        html.push_str(&format!(
            "<div class=\"illustration\"><img src=\"{}\" alt=\"Page illustration\"/></div>\n",
            xml_escape(src)
        ));
    }
    html.push_str("</section>\n");
    html.push_str("</body>\n</html>\n");
    html
}
