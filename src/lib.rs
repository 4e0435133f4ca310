pub mod compile;
pub mod content;
pub mod docx;
pub mod epub;
mod error;
pub mod fetch;
mod fonts;
pub mod geometry;
pub mod model;
pub mod pdf;
pub mod store;

pub use compile::{CompileReport, CompileState, Compiler, Config, Failure};
pub use error::{Error, Result};
pub use fetch::{HttpFetcher, ImageFetcher, ImageSet};
pub use fonts::{FontMetrics, TimesRoman};
pub use model::{
    ArtifactKind, ArtifactUrls, Book, BookFormat, CompiledArtifact, LayoutBlock, Page, PageSize,
};
pub use store::{ArtifactStore, BookRepository, DirectoryStore, MemoryRepository, MemoryStore};

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// A book record together with its pages, as read from a JSON file.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct BookBundle {
    #[serde(flatten)]
    pub book: Book,
    #[serde(default)]
    pub pages: Vec<Page>,
}

/// Compile a book into a directory of artifacts, fetching images over HTTP.
pub fn compile_to_dir(
    bundle: &BookBundle,
    out_dir: &Path,
    base_url: Option<&str>,
    config: Config,
) -> Result<CompileReport> {
    let t0 = Instant::now();

    let store = Arc::new(DirectoryStore::new(out_dir, base_url));
    let compiler = Compiler::with_http(config, store)?;
    let t_setup = t0.elapsed();

    let report = compiler.compile(&bundle.book, &bundle.pages);
    let t_total = t0.elapsed();

    log::info!(
        "Timing: setup={:.1}ms, compile={:.1}ms, total={:.1}ms ({} pages → {})",
        t_setup.as_secs_f64() * 1000.0,
        (t_total - t_setup).as_secs_f64() * 1000.0,
        t_total.as_secs_f64() * 1000.0,
        bundle.pages.len(),
        out_dir.display(),
    );

    Ok(report)
}
