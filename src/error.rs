use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("unsupported image type: {0}")]
    UnsupportedImage(String),

    #[error("font error: {0}")]
    Font(String),

    #[error("artifact store error: {0}")]
    Store(String),

    #[error("book repository error: {0}")]
    Repository(String),

    #[error("{0} panicked: {1}")]
    Panicked(&'static str, String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
