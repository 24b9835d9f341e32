//! Feed acquisition: url or local path, zip archive or plain directory.
//!
//! Downloads carry a bound timeout so a stalled origin cannot hang the run.
//! Zip extraction lands in a temporary directory owned by the returned
//! [ExtractedFeed]; dropping it removes the directory on every exit path,
//! success or failure.

use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use tempfile::TempDir;

use crate::error::Error;

/// Stalled-origin bound for the whole download
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Where the feed comes from
#[derive(Debug, Clone)]
pub enum FeedSource {
    Url(String),
    /// A local zip archive or an already-extracted directory
    Path(PathBuf),
}

/// An extracted feed directory. Owns the temp directory when one was
/// created, so cleanup is scoped to this value's lifetime
pub struct ExtractedFeed {
    // None when the source was already a directory on disk
    temp: Option<TempDir>,
    path: PathBuf,
}

impl ExtractedFeed {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for ExtractedFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractedFeed")
            .field("path", &self.path)
            .field("temporary", &self.temp.is_some())
            .finish()
    }
}

/// Reject placeholder or unusable feed URLs before any I/O is attempted
fn check_url(url: &str) -> Result<(), Error> {
    if url.trim().is_empty() {
        return Err(Error::Configuration("feed url is empty".to_owned()));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(Error::Configuration(format!(
            "feed url '{url}' is not an http(s) url"
        )));
    }
    for marker in ["${", "YOUR_", "example.com"] {
        if url.contains(marker) {
            return Err(Error::Configuration(format!(
                "feed url '{url}' looks like an unconfigured placeholder"
            )));
        }
    }
    Ok(())
}

fn download(url: &str) -> Result<Vec<u8>, Error> {
    check_url(url)?;
    let client = reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(Error::Download)?;
    let response = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(Error::Download)?;
    let body = response.bytes().map_err(Error::Download)?;
    info!("downloaded {} bytes from {url}", body.len());
    Ok(body.to_vec())
}

/// Unpack a zip archive into a fresh temp directory, flattening entries to
/// their file names so feeds zipped inside a subdirectory still resolve
fn extract_zip<R: Read + Seek>(reader: R) -> Result<ExtractedFeed, Error> {
    let temp = TempDir::new()?;
    let mut archive = zip::ZipArchive::new(reader)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if !entry.is_file() {
            continue;
        }
        let Some(name) = Path::new(entry.name())
            .file_name()
            .map(|n| n.to_owned())
        else {
            continue;
        };
        let mut out = File::create(temp.path().join(name))?;
        std::io::copy(&mut entry, &mut out)?;
    }
    let path = temp.path().to_owned();
    Ok(ExtractedFeed {
        temp: Some(temp),
        path,
    })
}

/// Resolve a feed source to a local extracted directory
pub fn obtain(source: &FeedSource) -> Result<ExtractedFeed, Error> {
    match source {
        FeedSource::Url(url) => {
            let body = download(url)?;
            extract_zip(Cursor::new(body))
        }
        FeedSource::Path(path) => {
            if path.is_dir() {
                Ok(ExtractedFeed {
                    temp: None,
                    path: path.clone(),
                })
            } else if path.is_file() {
                extract_zip(File::open(path)?)
            } else {
                Err(Error::Configuration(format!(
                    "{} is neither a file nor a directory",
                    path.display()
                )))
            }
        }
    }
}
