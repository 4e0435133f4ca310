#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use bookpress::{
    ArtifactStore, Book, BookFormat, Error, ImageFetcher, MemoryStore, Page, PageSize, Result,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn book(id: u64, format: BookFormat, page_size: PageSize) -> Book {
    Book {
        id,
        title: format!("Book {id}"),
        format,
        page_size,
    }
}

pub fn page(page_number: u32, content: &str, image_url: Option<&str>) -> Page {
    Page {
        id: page_number as u64 * 100,
        page_number,
        content: content.to_string(),
        image_url: image_url.map(str::to_string),
    }
}

pub fn png_bytes(w: u32, h: u32, alpha: u8) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(w, h, image::Rgba([200, 40, 40, alpha]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

pub fn jpeg_bytes(w: u32, h: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(w, h, image::Rgb([40, 200, 40]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Jpeg)
        .unwrap();
    buf.into_inner()
}

/// Serves canned bytes by URL; everything else is a 404.
#[derive(Default)]
pub struct FakeFetcher {
    files: HashMap<String, Vec<u8>>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn with(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(url.to_string(), bytes);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageFetcher for FakeFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.files.get(url).cloned().ok_or_else(|| Error::HttpStatus {
            url: url.to_string(),
            status: 404,
        })
    }
}

/// Memory store that rejects uploads to the listed buckets.
pub struct FailingStore {
    pub inner: MemoryStore,
    failing: Vec<&'static str>,
    pub rejected: Mutex<Vec<String>>,
}

impl FailingStore {
    pub fn failing(buckets: &[&'static str]) -> Self {
        Self {
            inner: MemoryStore::new("https://cdn.test"),
            failing: buckets.to_vec(),
            rejected: Mutex::new(Vec::new()),
        }
    }
}

impl ArtifactStore for FailingStore {
    fn put(&self, bucket: &str, path: &str, bytes: &[u8], content_type: &str) -> Result<String> {
        if self.failing.iter().any(|b| *b == bucket) {
            self.rejected.lock().unwrap().push(format!("{bucket}/{path}"));
            return Err(Error::Store(format!("bucket {bucket} unavailable")));
        }
        self.inner.put(bucket, path, bytes, content_type)
    }
}

/// Number of `/Type /Page` dictionaries (excluding the `/Pages` tree node).
pub fn count_pdf_pages(pdf: &[u8]) -> usize {
    count_token(pdf, b"/Type /Page")
}

/// Occurrences of `token` not immediately followed by another name character.
pub fn count_token(haystack: &[u8], token: &[u8]) -> usize {
    haystack
        .windows(token.len() + 1)
        .filter(|w| &w[..token.len()] == token && !w[token.len()].is_ascii_alphanumeric())
        .count()
}

pub fn zip_names(bytes: &[u8]) -> Vec<String> {
    let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    archive.file_names().map(str::to_string).collect()
}

pub fn zip_entry(bytes: &[u8], name: &str) -> Vec<u8> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut file = archive.by_name(name).unwrap();
    let mut data = Vec::new();
    file.read_to_end(&mut data).unwrap();
    data
}

pub fn zip_text(bytes: &[u8], name: &str) -> String {
    String::from_utf8(zip_entry(bytes, name)).unwrap()
}
