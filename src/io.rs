//! Utilities to acquire data from URLs.

use std::fmt;
use std::fs;
use std::path::Path;

use data_url::DataUrl;
use url::Url;

#[derive(Debug)]
pub enum IoError {
    /// Malformed `data:` URL.
    BadDataUrl,

    /// A scheme this processor does not open.
    UnsupportedScheme(String),

    /// Plain I/O failure, with the OS error text.
    Failed(String),
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            IoError::BadDataUrl => write!(f, "invalid data: URL"),
            IoError::UnsupportedScheme(ref s) => write!(f, "unsupported URL scheme {s:?}"),
            IoError::Failed(ref e) => write!(f, "{e}"),
        }
    }
}

pub struct BinaryData {
    pub data: Vec<u8>,
}

fn decode_data_url(uri: &str) -> Result<BinaryData, IoError> {
    let data_url = DataUrl::process(uri).map_err(|_| IoError::BadDataUrl)?;

    let (bytes, fragment_id) = data_url.decode_to_vec().map_err(|_| IoError::BadDataUrl)?;

    // Per https://fetch.spec.whatwg.org/#data-urls those URLs cannot have
    // fragment identifiers; one here probably indicates a mis-quoted URL.
    if fragment_id.is_some() {
        return Err(IoError::BadDataUrl);
    }

    Ok(BinaryData { data: bytes })
}

fn read_file(path: &Path) -> Result<BinaryData, IoError> {
    fs::read(path)
        .map(|data| BinaryData { data })
        .map_err(|e| IoError::Failed(e.to_string()))
}

/// Reads the entire contents pointed to by a URL.
///
/// The url can be a `data:` URL, a `file:` URL, or a plain path.  Anything
/// else is refused; whether that is fatal depends on the caller (an
/// `xi:fallback` can still recover from it).
pub fn acquire_data(url: &str) -> Result<BinaryData, IoError> {
    if url.starts_with("data:") {
        return decode_data_url(url);
    }

    if url.contains("://") {
        let parsed = Url::parse(url).map_err(|e| IoError::Failed(e.to_string()))?;
        return match parsed.scheme() {
            "file" => {
                let path = parsed
                    .to_file_path()
                    .map_err(|_| IoError::Failed(format!("invalid file URL {url:?}")))?;
                read_file(&path)
            }
            scheme => Err(IoError::UnsupportedScheme(scheme.to_string())),
        };
    }

    read_file(Path::new(url))
}
