mod common;

use std::sync::Arc;

use bookpress::{
    ArtifactKind, ArtifactUrls, BookBundle, BookFormat, CompileState, Compiler, Config,
    ImageFetcher, MemoryStore, PageSize,
};
use common::{FailingStore, FakeFetcher, book, count_pdf_pages, count_token, page, png_bytes};

fn memory_compiler(fetcher: FakeFetcher) -> (Compiler, Arc<MemoryStore>) {
    common::init_logging();
    let store = Arc::new(MemoryStore::new("https://cdn.test"));
    let compiler = Compiler::new(Config::default(), Arc::new(fetcher), store.clone());
    (compiler, store)
}

fn intro_page(words: usize) -> bookpress::Page {
    page(1, &format!("<h1>Intro</h1><p>{}</p>", "word ".repeat(words)), None)
}

#[test]
fn single_pdf_book_has_only_a_pdf_url() {
    let (compiler, store) = memory_compiler(FakeFetcher::default());
    // 500 words at 12pt Times wrap 18 to a 495pt line, about 28 lines: one A4
    // page below the title and heading. Spilling is covered with 1500 words.
    let urls = compiler.compile_book(&book(1, BookFormat::Pdf, PageSize::A4), &[intro_page(500)]);

    assert_eq!(urls.pdf_url.as_deref(), Some("https://cdn.test/pdf/1/book.pdf"));
    assert_eq!(urls.epub_url, None);
    assert_eq!(urls.docx_url, None);

    let pdf = store.get("pdf", "1/book.pdf").unwrap();
    assert!(pdf.bytes.starts_with(b"%PDF-"));
    assert!(count_pdf_pages(&pdf.bytes) >= 1);
}

#[test]
fn long_page_spills_onto_more_physical_pages() {
    let (compiler, store) = memory_compiler(FakeFetcher::default());
    compiler.compile_book(&book(2, BookFormat::Pdf, PageSize::A4), &[intro_page(1500)]);
    let pdf = store.get("pdf", "2/book.pdf").unwrap();
    assert!(count_pdf_pages(&pdf.bytes) > 1);
}

#[test]
fn every_page_size_token_yields_a_pdf() {
    for token in ["A4", "A5", "Letter", "Custom", "B5", ""] {
        let (compiler, store) = memory_compiler(FakeFetcher::default());
        let size = PageSize::from_token(token);
        let urls = compiler.compile_book(
            &book(3, BookFormat::Pdf, size),
            &[page(1, "<p>Short.</p>", None)],
        );
        assert!(urls.pdf_url.is_some(), "no pdf for {token:?}");
        let pdf = store.get("pdf", "3/book.pdf").unwrap();
        assert_eq!(count_pdf_pages(&pdf.bytes), 1, "{token:?}");
    }
}

#[test]
fn requested_format_controls_secondary_artifact() {
    let pages = [page(1, "<p>Hello</p>", None), page(2, "<p>World</p>", None)];

    let (compiler, _) = memory_compiler(FakeFetcher::default());
    let epub = compiler.compile_book(&book(4, BookFormat::Epub, PageSize::A5), &pages);
    assert!(epub.pdf_url.is_some());
    assert_eq!(epub.epub_url.as_deref(), Some("https://cdn.test/epub/4/book.epub"));
    assert_eq!(epub.docx_url, None);

    let (compiler, store) = memory_compiler(FakeFetcher::default());
    let docx = compiler.compile_book(&book(5, BookFormat::Docx, PageSize::Letter), &pages);
    assert!(docx.pdf_url.is_some());
    assert_eq!(docx.epub_url, None);
    assert_eq!(docx.docx_url.as_deref(), Some("https://cdn.test/docx/5/book.docx"));
    assert_eq!(
        store.get("docx", "5/book.docx").unwrap().content_type,
        ArtifactKind::Docx.content_type()
    );
}

#[test]
fn zero_pages_completes_with_no_urls() {
    let (compiler, store) = memory_compiler(FakeFetcher::default());
    let report = compiler.compile(&book(6, BookFormat::Epub, PageSize::A4), &[]);
    assert_eq!(report.state, CompileState::Completed);
    assert_eq!(report.urls, ArtifactUrls::default());
    assert!(report.failures.is_empty());
    assert!(store.is_empty());
}

#[test]
fn failing_epub_upload_leaves_other_formats_intact() {
    common::init_logging();
    let store = Arc::new(FailingStore::failing(&["epub"]));
    let compiler = Compiler::new(Config::default(), Arc::new(FakeFetcher::default()), store.clone());
    let report = compiler.compile(
        &book(7, BookFormat::Epub, PageSize::A4),
        &[page(1, "<p>text</p>", None)],
    );

    assert_eq!(report.state, CompileState::Completed);
    assert!(report.urls.pdf_url.is_some());
    assert_eq!(report.urls.epub_url, None);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, Some(ArtifactKind::Epub));
    assert_eq!(*store.rejected.lock().unwrap(), vec!["epub/7/book.epub".to_string()]);
}

#[test]
fn total_store_failure_still_completes() {
    common::init_logging();
    let store = Arc::new(FailingStore::failing(&["pdf", "docx"]));
    let compiler = Compiler::new(Config::default(), Arc::new(FakeFetcher::default()), store);
    let report = compiler.compile(
        &book(8, BookFormat::Docx, PageSize::A4),
        &[page(1, "<p>text</p>", None)],
    );
    assert_eq!(report.state, CompileState::Completed);
    assert_eq!(report.urls, ArtifactUrls::default());
    assert_eq!(report.failures.len(), 2);
}

#[test]
fn unreachable_image_is_omitted_from_pdf() {
    let (compiler, store) = memory_compiler(FakeFetcher::default());
    let urls = compiler.compile_book(
        &book(9, BookFormat::Pdf, PageSize::A4),
        &[page(1, "<p>See below.</p>", Some("https://unreachable.invalid/pic.png"))],
    );
    assert!(urls.pdf_url.is_some());
    let pdf = store.get("pdf", "9/book.pdf").unwrap();
    assert_eq!(count_token(&pdf.bytes, b"/Subtype /Image"), 0);
    assert_eq!(count_token(&pdf.bytes, b"/XObject"), 0);
}

struct PanickingFetcher;

impl ImageFetcher for PanickingFetcher {
    fn fetch(&self, url: &str) -> bookpress::Result<Vec<u8>> {
        panic!("connection pool poisoned fetching {url}");
    }
}

#[test]
fn panicking_image_fetch_still_yields_every_format() {
    common::init_logging();
    let store = Arc::new(MemoryStore::new("https://cdn.test"));
    let compiler = Compiler::new(Config::default(), Arc::new(PanickingFetcher), store.clone());
    let report = compiler.compile(
        &book(14, BookFormat::Epub, PageSize::A4),
        &[page(1, "<p>text</p>", Some("https://img.test/pic.png"))],
    );
    assert_eq!(report.state, CompileState::Completed);
    assert!(report.failures.is_empty());
    assert!(report.urls.pdf_url.is_some());
    assert!(report.urls.epub_url.is_some());
    let pdf = store.get("pdf", "14/book.pdf").unwrap();
    assert_eq!(count_token(&pdf.bytes, b"/Subtype /Image"), 0);
}

#[test]
fn fetched_image_is_embedded_once() {
    let url = "https://img.test/pic.png";
    let fetcher = FakeFetcher::default().with(url, png_bytes(40, 20, 255));
    let (compiler, store) = memory_compiler(fetcher);
    compiler.compile_book(
        &book(10, BookFormat::Epub, PageSize::A4),
        &[page(1, "<p>one</p>", Some(url)), page(2, "<p>two</p>", Some(url))],
    );
    let pdf = store.get("pdf", "10/book.pdf").unwrap();
    assert_eq!(count_token(&pdf.bytes, b"/Subtype /Image"), 1);
    assert_eq!(count_pdf_pages(&pdf.bytes), 2);
    assert!(store.get("epub", "10/book.epub").is_some());
}

#[test]
fn compilation_is_idempotent() {
    let url = "https://img.test/pic.png";
    let pages = [
        page(2, "<h2>Two</h2><p>Second page text.</p>", Some(url)),
        page(1, "<h1>One</h1><p>First page text.</p>", None),
    ];
    for format in [BookFormat::Epub, BookFormat::Docx] {
        let b = book(11, format, PageSize::A5);
        let run = || {
            let fetcher = FakeFetcher::default().with(url, png_bytes(8, 8, 128));
            let (compiler, _) = memory_compiler(fetcher);
            compiler.compile_artifacts(&b, &pages)
        };
        let first = run();
        let second = run();
        assert_eq!(first.len(), 2);
        for ((k1, x), (k2, y)) in first.iter().zip(second.iter()) {
            assert_eq!(k1, k2);
            assert_eq!(x.as_ref().unwrap().bytes, y.as_ref().unwrap().bytes, "{k1:?}");
        }
    }
}

#[test]
fn page_order_follows_page_number_not_input_order() {
    let (compiler, _) = memory_compiler(FakeFetcher::default());
    let b = book(12, BookFormat::Epub, PageSize::A4);
    let shuffled = [page(3, "c", None), page(1, "a", None), page(2, "b", None)];
    let sorted = [page(1, "a", None), page(2, "b", None), page(3, "c", None)];
    let x = compiler.compile_artifacts(&b, &shuffled);
    let y = compiler.compile_artifacts(&b, &sorted);
    for ((_, p), (_, q)) in x.iter().zip(y.iter()) {
        assert_eq!(p.as_ref().unwrap().bytes, q.as_ref().unwrap().bytes);
    }
}

#[test]
fn artifacts_are_named_by_book() {
    let (compiler, _) = memory_compiler(FakeFetcher::default());
    let artifacts = compiler.compile_artifacts(
        &book(13, BookFormat::Docx, PageSize::A4),
        &[page(1, "x", None)],
    );
    let names: Vec<(ArtifactKind, String)> = artifacts
        .into_iter()
        .map(|(k, r)| (k, r.unwrap().name))
        .collect();
    assert_eq!(
        names,
        vec![
            (ArtifactKind::Pdf, "13/book.pdf".to_string()),
            (ArtifactKind::Docx, "13/book.docx".to_string()),
        ]
    );
}

#[test]
fn bundle_json_compiles_into_a_directory() {
    common::init_logging();
    let json = r#"{
        "id": 21,
        "title": "From JSON",
        "format": "DOCX",
        "pageSize": "Letter",
        "pages": [
            {"pageNumber": 2, "content": "<p>Second</p>"},
            {"id": 5, "pageNumber": 1, "content": "<h1>First</h1>", "imageUrl": null}
        ]
    }"#;
    let bundle: BookBundle = serde_json::from_str(json).unwrap();
    assert_eq!(bundle.book.format, BookFormat::Docx);
    assert_eq!(bundle.pages.len(), 2);

    let dir = tempfile::tempdir().unwrap();
    let report =
        bookpress::compile_to_dir(&bundle, dir.path(), Some("https://files.test"), Config::default())
            .unwrap();
    assert_eq!(report.state, CompileState::Completed);
    assert_eq!(report.urls.pdf_url.as_deref(), Some("https://files.test/pdf/21/book.pdf"));
    assert_eq!(report.urls.docx_url.as_deref(), Some("https://files.test/docx/21/book.docx"));
    assert!(dir.path().join("pdf/21/book.pdf").is_file());
    assert!(dir.path().join("docx/21/book.docx").is_file());
}

#[test]
fn urls_serialize_in_camel_case() {
    let urls = ArtifactUrls {
        pdf_url: Some("u".into()),
        ..Default::default()
    };
    let json = serde_json::to_value(&urls).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"pdfUrl": "u", "epubUrl": null, "docxUrl": null})
    );
}
