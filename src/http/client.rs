//! HTTP client with status classification and streaming downloads.

use std::io::Write;

use anyhow::{Context, Result};
use log::debug;
use reqwest::{Client, Response};

use super::status::{HttpFailure, classify_error, classify_status};
use crate::session::SessionConfig;

const USER_AGENT: &str = concat!("reposync/", env!("CARGO_PKG_VERSION"));

/// HTTP client whose failures come back as [`HttpFailure`].
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a new HTTP client wrapping the given reqwest Client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client honoring the session's connect and request timeouts.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::new(client))
    }

    /// Returns a reference to the underlying reqwest Client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Sends a GET request. Non-success statuses are returned as failures.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, url: &str) -> Result<Response, HttpFailure> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_error(&e))?;
        match classify_status(response.status()) {
            Some(failure) => Err(failure),
            None => Ok(response),
        }
    }

    /// Fetches a small text resource. A missing resource is `Ok(None)`.
    #[tracing::instrument(skip(self))]
    pub async fn get_optional_text(&self, url: &str) -> Result<Option<String>, HttpFailure> {
        match self.get(url).await {
            Ok(response) => response
                .text()
                .await
                .map(Some)
                .map_err(|e| classify_error(&e)),
            Err(failure) if failure.is_not_found() => Ok(None),
            Err(failure) => Err(failure),
        }
    }

    /// Copies the body of `response` into `writer`, chunk by chunk.
    /// Returns the number of bytes written.
    pub async fn stream_body<W: Write>(
        mut response: Response,
        writer: &mut W,
        mut on_chunk: impl FnMut(&[u8]),
    ) -> Result<u64, HttpFailure> {
        let mut downloaded_bytes: u64 = 0;

        while let Some(chunk) = response.chunk().await.map_err(|e| classify_error(&e))? {
            writer
                .write_all(&chunk)
                .map_err(|e| HttpFailure::Other(format!("Failed to write chunk to file: {}", e)))?;
            on_chunk(&chunk);
            downloaded_bytes += chunk.len() as u64;
        }

        debug!(
            "Downloaded {:.2} MB",
            downloaded_bytes as f64 / (1024.0 * 1024.0)
        );

        Ok(downloaded_bytes)
    }

    /// Uploads `body` with a PUT request.
    #[tracing::instrument(skip(self, body))]
    pub async fn put(&self, url: &str, body: Vec<u8>) -> Result<(), HttpFailure> {
        debug!("PUT {} ({} bytes)", url, body.len());
        let response = self
            .client
            .put(url)
            .body(body)
            .send()
            .await
            .map_err(|e| classify_error(&e))?;
        match classify_status(response.status()) {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}
