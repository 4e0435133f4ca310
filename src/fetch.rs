//! Page image retrieval and decoding.

use std::collections::{BTreeSet, HashMap};
use std::io::Cursor;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use image::{ExtendedColorType, ImageDecoder};
use rayon::prelude::*;
use reqwest::blocking::Client;

use crate::error::{Error, Result, panic_message};
use crate::model::{ImageFormat, ImagePixels, LoadedImage};

/// Fetched images keyed by their source URL.
pub type ImageSet = HashMap<String, LoadedImage>;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Retrieves the raw bytes behind an image URL.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Blocking HTTP fetcher with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("bookpress/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl ImageFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes()?.to_vec())
    }
}

/// Image type from the URL's suffix. Matching is case-sensitive and
/// anything other than `.jpg`, `.jpeg` or `.png` is unsupported.
pub fn detect_format(url: &str) -> Option<ImageFormat> {
    if url.ends_with(".jpg") || url.ends_with(".jpeg") {
        Some(ImageFormat::Jpeg)
    } else if url.ends_with(".png") {
        Some(ImageFormat::Png)
    } else {
        None
    }
}

/// Decode fetched bytes into something the PDF writer can embed.
pub fn decode(data: Vec<u8>, format: ImageFormat) -> Result<LoadedImage> {
    match format {
        ImageFormat::Jpeg => {
            let decoder = image::codecs::jpeg::JpegDecoder::new(Cursor::new(&data))?;
            let (pixel_width, pixel_height) = decoder.dimensions();
            let pixels = match decoder.original_color_type() {
                ExtendedColorType::L8 => ImagePixels::Jpeg { gray: true },
                ExtendedColorType::Rgb8 => ImagePixels::Jpeg { gray: false },
                other => {
                    // CMYK and friends are not DeviceRGB-compatible; re-encode.
                    log::debug!("JPEG color type {other:?}; decoding to RGBA");
                    let rgba = image::load_from_memory_with_format(&data, image::ImageFormat::Jpeg)?
                        .to_rgba8();
                    ImagePixels::Rgba(rgba.into_raw())
                }
            };
            Ok(LoadedImage {
                data,
                format,
                pixel_width,
                pixel_height,
                pixels,
            })
        }
        ImageFormat::Png => {
            let rgba = image::load_from_memory_with_format(&data, image::ImageFormat::Png)?.to_rgba8();
            let (pixel_width, pixel_height) = rgba.dimensions();
            Ok(LoadedImage {
                data,
                format,
                pixel_width,
                pixel_height,
                pixels: ImagePixels::Rgba(rgba.into_raw()),
            })
        }
    }
}

/// Fetch and decode one image.
pub fn load_image(fetcher: &dyn ImageFetcher, url: &str) -> Result<LoadedImage> {
    let format = detect_format(url).ok_or_else(|| Error::UnsupportedImage(url.to_string()))?;
    let data = fetcher.fetch(url)?;
    decode(data, format)
}

/// [`load_image`], with a panic in the fetcher or decoder turned into an error.
fn load_image_guarded(fetcher: &dyn ImageFetcher, url: &str) -> Result<LoadedImage> {
    catch_unwind(AssertUnwindSafe(|| load_image(fetcher, url)))
        .unwrap_or_else(|payload| Err(Error::Panicked("image fetch", panic_message(payload.as_ref()))))
}

/// Fetch every distinct URL in parallel. Failures, panics included, are
/// logged and left out of the result; they never abort compilation.
pub fn fetch_all<'a>(fetcher: &dyn ImageFetcher, urls: impl IntoIterator<Item = &'a str>) -> ImageSet {
    let t0 = std::time::Instant::now();
    let unique: Vec<&str> = urls.into_iter().collect::<BTreeSet<_>>().into_iter().collect();

    let images: ImageSet = unique
        .par_iter()
        .filter_map(|&url| match load_image_guarded(fetcher, url) {
            Ok(img) => Some((url.to_string(), img)),
            Err(e) => {
                log::warn!("Skipping image {url}: {e}");
                None
            }
        })
        .collect();

    log::debug!(
        "fetch_all: {}/{} images → {:.1}ms",
        images.len(),
        unique.len(),
        t0.elapsed().as_secs_f64() * 1000.0,
    );
    images
}
