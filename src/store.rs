//! Seams to the outside world: where compiled artifacts go and where books
//! come from.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::model::{Book, Page};

/// Accepts a compiled buffer and returns a public URL for it.
pub trait ArtifactStore: Send + Sync {
    fn put(&self, bucket: &str, path: &str, bytes: &[u8], content_type: &str) -> Result<String>;
}

/// Loads book records and their pages.
pub trait BookRepository: Send + Sync {
    fn book(&self, id: u64) -> Result<Book>;
    fn pages(&self, book_id: u64) -> Result<Vec<Page>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Keeps artifacts in memory, keyed by bucket and path.
#[derive(Debug)]
pub struct MemoryStore {
    base_url: String,
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
}

impl MemoryStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, bucket: &str, path: &str) -> Option<StoredObject> {
        let objects = self.objects.lock().ok()?;
        objects.get(&(bucket.to_string(), path.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("memory://")
    }
}

impl ArtifactStore for MemoryStore {
    fn put(&self, bucket: &str, path: &str, bytes: &[u8], content_type: &str) -> Result<String> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".into()))?;
        objects.insert(
            (bucket.to_string(), path.to_string()),
            StoredObject {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(object_url(&self.base_url, bucket, path))
    }
}

/// Writes artifacts under `<root>/<bucket>/<path>`.
#[derive(Clone, Debug)]
pub struct DirectoryStore {
    root: PathBuf,
    base_url: String,
}

impl DirectoryStore {
    /// Without a base URL, returned URLs are `file://` URLs of the written files.
    pub fn new(root: impl Into<PathBuf>, base_url: Option<&str>) -> Self {
        let root = root.into();
        let base_url = match base_url {
            Some(url) => url.to_string(),
            None => format!("file://{}", root.display()),
        };
        Self { root, base_url }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn object_url(base_url: &str, bucket: &str, path: &str) -> String {
    if base_url.ends_with('/') {
        format!("{base_url}{bucket}/{path}")
    } else {
        format!("{base_url}/{bucket}/{path}")
    }
}

/// Only plain relative components are accepted.
fn checked_relative(part: &str) -> Result<&Path> {
    let path = Path::new(part);
    let plain = !part.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)));
    if plain {
        Ok(path)
    } else {
        Err(Error::Store(format!("invalid artifact path: {part:?}")))
    }
}

impl ArtifactStore for DirectoryStore {
    fn put(&self, bucket: &str, path: &str, bytes: &[u8], _content_type: &str) -> Result<String> {
        let target = self
            .root
            .join(checked_relative(bucket)?)
            .join(checked_relative(path)?);
        let dir = target
            .parent()
            .ok_or_else(|| Error::Store(format!("no parent for {}", target.display())))?;
        std::fs::create_dir_all(dir)?;

        // Write then rename so readers never see a partial file.
        let tmp_path = target.with_extension("tmp");
        let written = std::fs::File::create(&tmp_path)
            .and_then(|mut file| {
                file.write_all(bytes)?;
                file.sync_all()
            })
            .and_then(|()| std::fs::rename(&tmp_path, &target));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        log::debug!("Stored {} bytes at {}", bytes.len(), target.display());
        Ok(object_url(&self.base_url, bucket, path))
    }
}

/// In-memory book records, for tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    books: HashMap<u64, (Book, Vec<Page>)>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, book: Book, pages: Vec<Page>) {
        self.books.insert(book.id, (book, pages));
    }
}

impl BookRepository for MemoryRepository {
    fn book(&self, id: u64) -> Result<Book> {
        self.books
            .get(&id)
            .map(|(book, _)| book.clone())
            .ok_or_else(|| Error::Repository(format!("book {id} not found")))
    }

    fn pages(&self, book_id: u64) -> Result<Vec<Page>> {
        self.books
            .get(&book_id)
            .map(|(_, pages)| pages.clone())
            .ok_or_else(|| Error::Repository(format!("book {book_id} not found")))
    }
}
