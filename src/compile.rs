//! Compilation orchestration: fetch images once, run the packagers the book
//! asks for, store what they produce and isolate every failure to its format.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{Error, Result, panic_message};
use crate::fetch::{self, DEFAULT_TIMEOUT, HttpFetcher, ImageFetcher, ImageSet};
use crate::model::{
    ArtifactKind, ArtifactUrls, Book, BookFormat, CompiledArtifact, DEFAULT_MODIFIED,
    DEFAULT_PUBLISHER, PackageOptions, Page,
};
use crate::store::{ArtifactStore, BookRepository};
use crate::{docx, epub, pdf};

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// TrueType font to embed in PDFs; Times-Roman when unset.
    pub font_path: Option<PathBuf>,
    pub image_timeout: Duration,
    /// Platform name written as creator/publisher metadata.
    pub publisher: String,
    /// Fixed EPUB modification timestamp.
    pub modified: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            font_path: None,
            image_timeout: DEFAULT_TIMEOUT,
            publisher: DEFAULT_PUBLISHER.to_string(),
            modified: DEFAULT_MODIFIED.to_string(),
        }
    }
}

impl Config {
    /// Defaults overridden by `BOOKPRESS_FONT`, `BOOKPRESS_IMAGE_TIMEOUT_MS`,
    /// `BOOKPRESS_PUBLISHER` and `BOOKPRESS_MODIFIED`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(font) = lookup("BOOKPRESS_FONT").filter(|s| !s.is_empty()) {
            config.font_path = Some(PathBuf::from(font));
        }
        if let Some(raw) = lookup("BOOKPRESS_IMAGE_TIMEOUT_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.image_timeout = Duration::from_millis(ms),
                Err(e) => log::warn!("Ignoring BOOKPRESS_IMAGE_TIMEOUT_MS={raw:?}: {e}"),
            }
        }
        if let Some(publisher) = lookup("BOOKPRESS_PUBLISHER").filter(|s| !s.is_empty()) {
            config.publisher = publisher;
        }
        if let Some(modified) = lookup("BOOKPRESS_MODIFIED").filter(|s| !s.is_empty()) {
            config.modified = modified;
        }
        config
    }

    fn package_options(&self, book_id: u64) -> PackageOptions {
        PackageOptions {
            book_id,
            publisher: self.publisher.clone(),
            modified: self.modified.clone(),
            ..PackageOptions::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompileState {
    Pending,
    Compiling,
    Completed,
    Failed,
}

/// One format (or the book lookup, when `kind` is `None`) that did not
/// make it to the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: Option<ArtifactKind>,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompileReport {
    pub state: CompileState,
    pub urls: ArtifactUrls,
    pub failures: Vec<Failure>,
}

impl CompileReport {
    fn empty(state: CompileState) -> Self {
        Self {
            state,
            urls: ArtifactUrls::default(),
            failures: Vec::new(),
        }
    }
}

/// Formats to build for a requested book format. PDF is always first.
pub fn requested_kinds(format: BookFormat) -> Vec<ArtifactKind> {
    match format {
        BookFormat::Pdf => vec![ArtifactKind::Pdf],
        BookFormat::Epub => vec![ArtifactKind::Pdf, ArtifactKind::Epub],
        BookFormat::Docx => vec![ArtifactKind::Pdf, ArtifactKind::Docx],
    }
}

/// Run `f`, turning a panic into an error attributed to `kind`.
fn guarded<T>(kind: ArtifactKind, f: impl FnOnce() -> Result<T>) -> Result<T> {
    catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(Error::Panicked(kind.tag(), panic_message(payload.as_ref()))))
}

pub struct Compiler {
    config: Config,
    fetcher: Arc<dyn ImageFetcher>,
    store: Arc<dyn ArtifactStore>,
}

impl Compiler {
    pub fn new(config: Config, fetcher: Arc<dyn ImageFetcher>, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            config,
            fetcher,
            store,
        }
    }

    /// Compiler that fetches images over HTTP with the configured timeout.
    pub fn with_http(config: Config, store: Arc<dyn ArtifactStore>) -> Result<Self> {
        let fetcher = HttpFetcher::new(config.image_timeout)?;
        Ok(Self::new(config, Arc::new(fetcher), store))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Compile and store every requested format, returning their URLs.
    /// Never fails: a format that cannot be built or stored has a null URL.
    pub fn compile_book(&self, book: &Book, pages: &[Page]) -> ArtifactUrls {
        self.compile(book, pages).urls
    }

    /// Like [`Compiler::compile_book`], with the final state and failures.
    pub fn compile(&self, book: &Book, pages: &[Page]) -> CompileReport {
        let t0 = Instant::now();
        let mut report = CompileReport::empty(CompileState::Pending);
        log::debug!("Book {}: {:?}", book.id, report.state);

        if pages.is_empty() {
            log::info!("Book {} has no pages; nothing to compile", book.id);
            report.state = CompileState::Completed;
            return report;
        }
        report.state = CompileState::Compiling;
        log::debug!("Book {}: {:?}", book.id, report.state);

        let artifacts = self.compile_artifacts(book, pages);
        let t_render = t0.elapsed();

        for (kind, result) in artifacts {
            let stored = result.and_then(|artifact| {
                guarded(kind, || {
                    self.store.put(
                        kind.bucket(),
                        &artifact.name,
                        &artifact.bytes,
                        kind.content_type(),
                    )
                })
            });
            match stored {
                Ok(url) => report.urls.set(kind, Some(url)),
                Err(e) => {
                    log::warn!("Book {}: {} failed: {e}", book.id, kind.tag());
                    report.failures.push(Failure {
                        kind: Some(kind),
                        message: e.to_string(),
                    });
                }
            }
        }
        let t_store = t0.elapsed();

        if report.urls == ArtifactUrls::default() {
            log::error!("Book {}: every format failed to compile", book.id);
        }
        report.state = CompileState::Completed;

        log::info!(
            "Compile phases: render={:.1}ms, store={:.1}ms, total={:.1}ms (book {}, {} pages, {} failed)",
            t_render.as_secs_f64() * 1000.0,
            (t_store - t_render).as_secs_f64() * 1000.0,
            t_store.as_secs_f64() * 1000.0,
            book.id,
            pages.len(),
            report.failures.len(),
        );
        report
    }

    /// Build the requested formats in memory without storing them.
    pub fn compile_artifacts(
        &self,
        book: &Book,
        pages: &[Page],
    ) -> Vec<(ArtifactKind, Result<CompiledArtifact>)> {
        if pages.is_empty() {
            return Vec::new();
        }
        let t0 = Instant::now();

        let mut ordered = pages.to_vec();
        ordered.sort_by_key(|p| p.page_number);

        let images = fetch::fetch_all(
            self.fetcher.as_ref(),
            ordered.iter().filter_map(|p| p.image_url.as_deref()),
        );
        let t_fetch = t0.elapsed();

        let kinds = requested_kinds(book.format);
        let (first, rest) = rayon::join(
            || self.build(ArtifactKind::Pdf, book, &ordered, &images),
            || {
                kinds
                    .iter()
                    .filter(|k| **k != ArtifactKind::Pdf)
                    .map(|&k| (k, self.build(k, book, &ordered, &images)))
                    .collect::<Vec<_>>()
            },
        );

        log::info!(
            "Build phases: fetch={:.1}ms ({} images), packagers={:.1}ms",
            t_fetch.as_secs_f64() * 1000.0,
            images.len(),
            (t0.elapsed() - t_fetch).as_secs_f64() * 1000.0,
        );

        let mut results = vec![(ArtifactKind::Pdf, first)];
        results.extend(rest);
        results
    }

    fn build(
        &self,
        kind: ArtifactKind,
        book: &Book,
        pages: &[Page],
        images: &ImageSet,
    ) -> Result<CompiledArtifact> {
        let t0 = Instant::now();
        let bytes = guarded(kind, || match kind {
            ArtifactKind::Pdf => pdf::render(
                &book.title,
                pages,
                book.page_size,
                images,
                self.config.font_path.as_deref(),
            ),
            ArtifactKind::Epub => epub::package(
                &book.title,
                pages,
                images,
                &self.config.package_options(book.id),
            ),
            ArtifactKind::Docx => docx::package(
                &book.title,
                pages,
                book.page_size.dimensions(),
                &self.config.package_options(book.id),
            ),
        })?;
        log::debug!(
            "{} for book {}: {} bytes → {:.1}ms",
            kind.tag(),
            book.id,
            bytes.len(),
            t0.elapsed().as_secs_f64() * 1000.0,
        );
        Ok(CompiledArtifact::new(kind, book.id, bytes))
    }

    /// Reload a book and compile it again. Only a repository failure ends
    /// in [`CompileState::Failed`].
    pub fn recompile(&self, repo: &dyn BookRepository, book_id: u64) -> CompileReport {
        let loaded = repo
            .book(book_id)
            .and_then(|book| repo.pages(book_id).map(|pages| (book, pages)));
        match loaded {
            Ok((book, pages)) => self.compile(&book, &pages),
            Err(e) => {
                log::error!("Cannot load book {book_id}: {e}");
                let mut report = CompileReport::empty(CompileState::Failed);
                report.failures.push(Failure {
                    kind: None,
                    message: e.to_string(),
                });
                report
            }
        }
    }
}
