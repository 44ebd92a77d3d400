use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::error::CollocateError;

pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new() -> Result<Self, CollocateError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("sat-collocate/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CollocateError::DownloadHttp(err.to_string()))?,
        );
        // Model archives run to gigabytes; only the connect phase gets a
        // deadline.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(60))
            .timeout(None)
            .build()
            .map_err(|err| CollocateError::DownloadHttp(err.to_string()))?;
        Ok(Self { client })
    }

    /// Streams `url` into `output_dir`, named after the URL's last path
    /// segment. The body goes to a temp file in the same directory and is
    /// persisted once complete, so a partial download never lands under the
    /// final name.
    pub fn fetch(&self, url: &str, output_dir: &Utf8Path) -> Result<Utf8PathBuf, CollocateError> {
        let filename = url_basename(url)?;
        fs::create_dir_all(output_dir.as_std_path())
            .map_err(|err| CollocateError::Filesystem(err.to_string()))?;

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| CollocateError::DownloadHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "download failed".to_string());
            return Err(CollocateError::DownloadStatus { status, message });
        }

        let mut temp = tempfile::Builder::new()
            .prefix(".sat-collocate-part")
            .tempfile_in(output_dir.as_std_path())
            .map_err(|err| CollocateError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut temp)
            .map_err(|err| CollocateError::Filesystem(err.to_string()))?;

        let destination = output_dir.join(&filename);
        if destination.as_std_path().exists() {
            fs::remove_file(destination.as_std_path())
                .map_err(|err| CollocateError::Filesystem(err.to_string()))?;
        }
        temp.persist(destination.as_std_path())
            .map_err(|err| CollocateError::Filesystem(err.to_string()))?;
        debug!(url, path = %destination, "downloaded dataset");
        Ok(destination)
    }
}

fn url_basename(url: &str) -> Result<String, CollocateError> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or_default();
    if name.is_empty() {
        return Err(CollocateError::DownloadHttp(format!(
            "no filename in url: {url}"
        )));
    }
    Ok(name.to_string())
}
