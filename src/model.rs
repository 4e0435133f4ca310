use serde::{Deserialize, Serialize};

/// Export format requested for a book. PDF is always produced in addition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BookFormat {
    Pdf,
    Epub,
    Docx,
}

impl BookFormat {
    /// Unknown tokens fall back to PDF-only output.
    pub fn from_token(token: &str) -> Self {
        match token {
            "EPUB" => BookFormat::Epub,
            "DOCX" => BookFormat::Docx,
            _ => BookFormat::Pdf,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            BookFormat::Pdf => "PDF",
            BookFormat::Epub => "EPUB",
            BookFormat::Docx => "DOCX",
        }
    }
}

impl From<String> for BookFormat {
    fn from(s: String) -> Self {
        Self::from_token(&s)
    }
}

impl From<BookFormat> for String {
    fn from(f: BookFormat) -> Self {
        f.token().to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PageSize {
    A4,
    A5,
    Letter,
    Custom,
}

impl PageSize {
    /// Unknown tokens are treated like `Custom` (Letter dimensions).
    pub fn from_token(token: &str) -> Self {
        match token {
            "A4" => PageSize::A4,
            "A5" => PageSize::A5,
            "Letter" => PageSize::Letter,
            _ => PageSize::Custom,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            PageSize::A4 => "A4",
            PageSize::A5 => "A5",
            PageSize::Letter => "Letter",
            PageSize::Custom => "Custom",
        }
    }
}

impl From<String> for PageSize {
    fn from(s: String) -> Self {
        Self::from_token(&s)
    }
}

impl From<PageSize> for String {
    fn from(p: PageSize) -> Self {
        p.token().to_string()
    }
}

/// Book record as handed over by the book store. Read-only for compilation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: u64,
    pub title: String,
    pub format: BookFormat,
    pub page_size: PageSize,
}

/// One unit of book content. Not a physical PDF page.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    #[serde(default)]
    pub id: u64,
    pub page_number: u32,
    pub content: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LayoutBlock {
    /// Level is always within 1..=6.
    Heading(u8, String),
    Paragraph(String),
    ImageRef(String),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }
}

/// A fetched and decoded page image.
#[derive(Clone, Debug)]
pub struct LoadedImage {
    /// Raw bytes as fetched, used for EPUB embedding.
    pub data: Vec<u8>,
    pub format: ImageFormat,
    pub pixel_width: u32,
    pub pixel_height: u32,
    /// PDF-ready pixel payload: DCT stream for JPEG, decoded RGBA for PNG.
    pub pixels: ImagePixels,
}

#[derive(Clone, Debug)]
pub enum ImagePixels {
    Jpeg { gray: bool },
    Rgba(Vec<u8>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Pdf,
    Epub,
    Docx,
}

impl ArtifactKind {
    pub fn tag(self) -> &'static str {
        match self {
            ArtifactKind::Pdf => "pdf",
            ArtifactKind::Epub => "epub",
            ArtifactKind::Docx => "docx",
        }
    }

    /// Storage bucket; matches the tag.
    pub fn bucket(self) -> &'static str {
        self.tag()
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ArtifactKind::Pdf => "application/pdf",
            ArtifactKind::Epub => "application/epub+zip",
            ArtifactKind::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }
}

/// Complete output of one packager.
#[derive(Clone, Debug)]
pub struct CompiledArtifact {
    pub kind: ArtifactKind,
    pub name: String,
    pub bytes: Vec<u8>,
}

impl CompiledArtifact {
    pub fn new(kind: ArtifactKind, book_id: u64, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            name: format!("{}/book.{}", book_id, kind.tag()),
            bytes,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactUrls {
    pub pdf_url: Option<String>,
    pub epub_url: Option<String>,
    pub docx_url: Option<String>,
}

impl ArtifactUrls {
    pub fn set(&mut self, kind: ArtifactKind, url: Option<String>) {
        match kind {
            ArtifactKind::Pdf => self.pdf_url = url,
            ArtifactKind::Epub => self.epub_url = url,
            ArtifactKind::Docx => self.docx_url = url,
        }
    }

    pub fn get(&self, kind: ArtifactKind) -> Option<&str> {
        match kind {
            ArtifactKind::Pdf => self.pdf_url.as_deref(),
            ArtifactKind::Epub => self.epub_url.as_deref(),
            ArtifactKind::Docx => self.docx_url.as_deref(),
        }
    }
}

/// Metadata shared by the EPUB and DOCX packagers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageOptions {
    pub book_id: u64,
    /// Platform name, used as creator and publisher.
    pub publisher: String,
    /// EPUB `dcterms:modified`, an ISO-8601 UTC timestamp.
    pub modified: String,
    pub language: String,
}

pub const DEFAULT_PUBLISHER: &str = "Bookpress";
pub const DEFAULT_MODIFIED: &str = "2000-01-01T00:00:00Z";

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            book_id: 0,
            publisher: DEFAULT_PUBLISHER.to_string(),
            modified: DEFAULT_MODIFIED.to_string(),
            language: "en".to_string(),
        }
    }
}
