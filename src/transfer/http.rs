// Transfer Core - Resumable HTTP transfer engine
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! HTTP client collaborator with range resume
//!
//! # Contract
//! [`HttpClient::save`] streams one URL into a destination file. While it runs it
//! reports to a [`TransferListener`]: `on_redirect` per followed redirect,
//! `on_headers` once for the final response, then `on_data` per written chunk.
//! It returns [`SaveOutcome::Completed`] when the body ended,
//! [`SaveOutcome::Cancelled`] when the [`CancelToken`] fired, or an error.
//!
//! # Resume Mechanism
//! 1. With `resume` set and a non-empty destination, send `Range: bytes=<len>-`
//! 2. `206 Partial Content`: append to the destination
//! 3. `200 OK` to a ranged request, or `416`: fail with `RangeNotSupported`;
//!    the caller restarts from byte zero
//! 4. Without a range the destination is truncated

use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::file::manager::file_len;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, LOCATION, RANGE};
use reqwest::{Client, StatusCode};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::watch;
use tracing::debug;
use url::Url;

/// Write buffer size
const DOWNLOAD_BUFF_SZ: usize = 64 * 1024;

/// Redirects followed before giving up
const MAX_REDIRECTS: usize = 10;

/// One `save` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    pub url: String,
    pub destination: PathBuf,
    /// Continue from the destination's current length
    pub resume: bool,
}

/// How a `save` call ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Completed,
    Cancelled,
}

/// Status and header fields of the response being saved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    pub status: u16,
    fields: Vec<(String, String)>,
}

impl ResponseHeaders {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            fields: Vec::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields.push((name.to_string(), value.into()));
        self
    }

    fn from_map(status: StatusCode, map: &HeaderMap) -> Self {
        let fields = map
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        Self {
            status: status.as_u16(),
            fields,
        }
    }

    /// First value of a header, case-insensitive
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Server advertised byte-range support
    pub fn supports_ranges(&self) -> bool {
        self.get("accept-ranges")
            .map(|v| v.to_ascii_lowercase().contains("bytes"))
            .unwrap_or(false)
            || self.get("content-range").is_some()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get("content-length").and_then(|v| v.trim().parse().ok())
    }

    /// Total size from `Content-Range: bytes a-b/total`
    pub fn content_range_total(&self) -> Option<u64> {
        self.get("content-range")
            .and_then(|v| v.rsplit('/').next())
            .and_then(|total| total.trim().parse().ok())
    }
}

/// Receives progress of one `save` call
pub trait TransferListener: Send + Sync {
    fn on_headers(&self, headers: &ResponseHeaders);
    fn on_data(&self, len: usize);
    fn on_redirect(&self, location: &str);
}

/// Cooperative cancellation flag shared by a transfer and its running attempt
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Range-capable HTTP client
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Stream `request.url` into `request.destination`
    async fn save(
        &self,
        request: &SaveRequest,
        listener: &dyn TransferListener,
        cancel: &CancelToken,
    ) -> Result<SaveOutcome>;

    /// Fetch a small resource into memory (thumbnails, .torrent files)
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

/// Listener for requests nobody tracks (thumbnails, .torrent files)
struct Unobserved;

impl TransferListener for Unobserved {
    fn on_headers(&self, _headers: &ResponseHeaders) {}
    fn on_data(&self, _len: usize) {}
    fn on_redirect(&self, _location: &str) {}
}

/// [`HttpClient`] backed by reqwest
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new(config: &TransferConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self { client })
    }

    /// Send the request, following redirects manually so each hop is reported
    async fn send_following_redirects(
        &self,
        url: &str,
        offset: u64,
        listener: &dyn TransferListener,
        cancel: &CancelToken,
    ) -> Result<Option<reqwest::Response>> {
        let mut url = Url::parse(url)
            .map_err(|e| TransferError::InvalidDownloadUrl(format!("{}: {}", url, e)))?;

        for _ in 0..=MAX_REDIRECTS {
            let mut builder = self.client.get(url.clone());
            if offset > 0 {
                builder = builder.header(RANGE, format!("bytes={}-", offset));
            }

            let response = tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                response = builder.send() => response?,
            };

            if !response.status().is_redirection() {
                return Ok(Some(response));
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| TransferError::UnexpectedStatusCode {
                    status_code: response.status().as_u16(),
                    url: url.to_string(),
                })?
                .to_string();

            debug!(from = %url, to = %location, "Following redirect");
            listener.on_redirect(&location);
            url = url
                .join(&location)
                .map_err(|e| TransferError::InvalidDownloadUrl(format!("{}: {}", location, e)))?;
        }

        Err(TransferError::network_error(
            format!("Too many redirects for {}", url),
            false,
        ))
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn save(
        &self,
        request: &SaveRequest,
        listener: &dyn TransferListener,
        cancel: &CancelToken,
    ) -> Result<SaveOutcome> {
        let offset = if request.resume {
            file_len(&request.destination).await.unwrap_or(0)
        } else {
            0
        };

        let response = match self
            .send_following_redirects(&request.url, offset, listener, cancel)
            .await?
        {
            Some(response) => response,
            None => return Ok(SaveOutcome::Cancelled),
        };

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK if offset == 0 => {}
            // Full body for a ranged request, or a range the server cannot serve
            StatusCode::OK | StatusCode::RANGE_NOT_SATISFIABLE => {
                return Err(TransferError::RangeNotSupported);
            }
            status => {
                return Err(TransferError::UnexpectedStatusCode {
                    status_code: status.as_u16(),
                    url: request.url.clone(),
                });
            }
        }

        listener.on_headers(&ResponseHeaders::from_map(response.status(), response.headers()));

        if let Some(parent) = request.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut options = OpenOptions::new();
        options.create(true);
        if offset > 0 {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        let file = options.open(&request.destination).await?;
        let mut writer = BufWriter::with_capacity(DOWNLOAD_BUFF_SZ, file);

        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    writer.flush().await?;
                    return Ok(SaveOutcome::Cancelled);
                }
                chunk = stream.next() => chunk,
            };

            match chunk {
                Some(chunk) => {
                    let chunk = chunk.map_err(|e| {
                        TransferError::network_error(format!("Connection dropped: {}", e), true)
                    })?;
                    writer.write_all(&chunk).await?;
                    listener.on_data(chunk.len());
                }
                None => break,
            }
        }

        writer.flush().await?;
        Ok(SaveOutcome::Completed)
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .send_following_redirects(url, 0, &Unobserved, &CancelToken::new())
            .await?
            .ok_or(TransferError::Cancelled)?;
        if !response.status().is_success() {
            return Err(TransferError::UnexpectedStatusCode {
                status_code: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_are_case_insensitive() {
        let headers = ResponseHeaders::new(206)
            .with("Content-Range", "bytes 100-199/200")
            .with("Content-Length", "100");

        assert_eq!(headers.get("content-range"), Some("bytes 100-199/200"));
        assert_eq!(headers.content_range_total(), Some(200));
        assert_eq!(headers.content_length(), Some(100));
        assert!(headers.supports_ranges());
    }

    #[test]
    fn test_ranges_from_accept_ranges() {
        assert!(ResponseHeaders::new(200).with("Accept-Ranges", "bytes").supports_ranges());
        assert!(!ResponseHeaders::new(200).with("Accept-Ranges", "none").supports_ranges());
        assert!(!ResponseHeaders::new(200).supports_ranges());
    }

    #[test]
    fn test_unknown_range_total() {
        let headers = ResponseHeaders::new(206).with("Content-Range", "bytes 0-99/*");
        assert_eq!(headers.content_range_total(), None);
    }

    #[tokio::test]
    async fn test_cancel_token_wakes_waiter() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        token.cancel();

        waiter.await.unwrap();
        assert!(token.is_cancelled());
    }

    /// Serve `GET /old` as a redirect to `/new`, which returns `hello`
    async fn redirecting_server() -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let response = if request.starts_with(b"GET /old ") {
                    "HTTP/1.1 302 Found\r\nLocation: /new\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                } else {
                    "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello"
                };
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_get_bytes_follows_redirects() {
        let base = redirecting_server().await;
        let client = ReqwestHttpClient::new(&TransferConfig::default()).unwrap();

        let body = client.get_bytes(&format!("{}/old", base)).await.unwrap();
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        struct Quiet;
        impl TransferListener for Quiet {
            fn on_headers(&self, _: &ResponseHeaders) {}
            fn on_data(&self, _: usize) {}
            fn on_redirect(&self, _: &str) {}
        }

        let client = ReqwestHttpClient::new(&TransferConfig::default()).unwrap();
        let request = SaveRequest {
            url: "not a url".to_string(),
            destination: std::env::temp_dir().join("never-written.bin"),
            resume: false,
        };
        let err = client.save(&request, &Quiet, &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidDownloadUrl(_)));
    }
}
