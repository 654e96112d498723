//! HTTP transport
//!
//! Header-only probes and streamed fetches with resume-from-offset
//! support. The pipeline never talks to the network except through here.

use std::path::Path;

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::USER_AGENT;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP {status} fetching {url}")]
    Status { url: String, status: u16 },
}

/// Result of a header-only probe
#[derive(Debug, Clone)]
pub struct Probe {
    pub status: u16,
    pub content_length: Option<u64>,
    pub accept_ranges: bool,
    pub compressed: bool,
}

impl Probe {
    /// 2xx
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 2xx, or 403 - a reachable-but-listing-denied directory
    pub fn reachable(&self) -> bool {
        self.ok() || self.status == 403
    }
}

/// HTTP capability wrapper around a shared [`reqwest::Client`]
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
}

impl Transport {
    /// Build a transport. `insecure` disables TLS certificate validation
    /// (not recommended; carried for parity with operator tooling).
    pub fn new(insecure: bool) -> Result<Self, TransferError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(insecure)
            .build()?;
        Ok(Self { client })
    }

    /// HEAD-equivalent probe: status, length, resume and compression
    /// capability. Never downloads a body.
    pub async fn probe(&self, url: &str) -> Result<Probe, TransferError> {
        let resp = self.client.head(url).send().await?;

        let status = resp.status().as_u16();
        let content_length = resp
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let accept_ranges = resp
            .headers()
            .get(reqwest::header::ACCEPT_RANGES)
            .is_some_and(|v| v == "bytes");
        let compressed = resp
            .headers()
            .get(reqwest::header::CONTENT_ENCODING)
            .is_some_and(|v| v == "gzip");

        debug!(url, status, ?content_length, accept_ranges, "probe");

        Ok(Probe {
            status,
            content_length,
            accept_ranges,
            compressed,
        })
    }

    /// Streamed GET to a local file. With `resume_from = Some(k)` the
    /// request carries `Range: bytes=k-` and appends to the existing
    /// partial file; a server answering 200 instead of 206 gets a fresh
    /// full write. Parent directories are created. Returns the final
    /// on-disk length in bytes.
    pub async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        resume_from: Option<u64>,
    ) -> Result<u64, TransferError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut request = self.client.get(url);
        if let Some(offset) = resume_from.filter(|o| *o > 0) {
            request = request.header(reqwest::header::RANGE, format!("bytes={offset}-"));
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransferError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let resumed = status == StatusCode::PARTIAL_CONTENT;
        let mut file = if resumed {
            OpenOptions::new().append(true).open(dest).await?
        } else {
            File::create(dest).await?
        };

        debug!(url, resumed, dest = %dest.display(), "fetch");

        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(tokio::fs::metadata(dest).await?.len())
    }
}
