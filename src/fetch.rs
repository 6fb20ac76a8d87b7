// src/fetch.rs

//! HTTP access to repositories and package artifacts
//!
//! Components never build HTTP clients themselves: they receive a
//! `&dyn Fetcher`. The production implementation, `HttpFetcher`, owns one
//! blocking reqwest client whose connections are released when the fetcher
//! is dropped, whichever way the caller exits.

use crate::error::{Error, Result};
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (30 seconds)
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts for requests that fail at the transport level
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Download buffer size
const CHUNK_SIZE: usize = 64 * 1024;

/// Source of remote documents and artifacts
pub trait Fetcher {
    /// GET `url` and return the body as text
    fn fetch_text(&self, url: &str) -> Result<String>;

    /// GET `url` into `dest`, calling `progress(downloaded, total)` per chunk
    ///
    /// Returns the number of bytes written.
    fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<u64>;
}

/// Join a repository base URL and a document name
pub fn join_url(base: &str, document: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), document)
}

/// Log one HTTP exchange with its status, or "no response"
pub fn log_http_request(method: &str, url: &str, status: Option<u16>) {
    match status {
        Some(200) => info!("{} {} 200", method, url),
        Some(code) => warn!("{} {} {}", method, url, code),
        None => warn!("{} {} no response", method, url),
    }
}

/// Blocking HTTP fetcher with retry support
#[derive(Debug)]
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
}

impl HttpFetcher {
    /// Create a fetcher with the default timeout
    pub fn new() -> Result<Self> {
        Self::with_timeout(HTTP_TIMEOUT)
    }

    /// Create a fetcher with a custom request timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("openspm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::IoError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
        })
    }

    /// Override the number of attempts for transport failures (minimum 1)
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Send a GET, retrying transport errors; non-success statuses fail at once
    fn send(&self, url: &str) -> Result<Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url).send() {
                Ok(response) => {
                    let status = response.status().as_u16();
                    log_http_request("GET", url, Some(status));
                    if response.status() != StatusCode::OK {
                        return Err(Error::Network {
                            url: url.to_string(),
                            status: Some(status),
                        });
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        log_http_request("GET", url, None);
                        warn!("Giving up on {} after {} attempts: {}", url, attempt, e);
                        return Err(Error::Network {
                            url: url.to_string(),
                            status: None,
                        });
                    }
                    warn!("Request attempt {} for {} failed: {}, retrying...", attempt, url, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.send(url)?;
        response.text().map_err(|e| {
            warn!("Failed to read response body from {}: {}", url, e);
            Error::Network {
                url: url.to_string(),
                status: None,
            }
        })
    }

    fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<u64> {
        debug!("Downloading {} to {}", url, dest.display());

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!("Failed to create directory {}: {}", parent.display(), e))
            })?;
        }

        let mut response = self.send(url)?;
        let total = response.content_length();

        let mut file = File::create(dest).map_err(|e| {
            Error::IoError(format!("Failed to create file {}: {}", dest.display(), e))
        })?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut downloaded = 0u64;
        loop {
            let read = response.read(&mut buffer).map_err(|e| {
                warn!("Connection to {} interrupted: {}", url, e);
                Error::Network {
                    url: url.to_string(),
                    status: None,
                }
            })?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read]).map_err(|e| {
                Error::IoError(format!("Failed to write downloaded data: {}", e))
            })?;
            downloaded += read as u64;
            progress(downloaded, total);
        }
        file.flush()?;

        debug!("Downloaded {} bytes from {}", downloaded, url);
        Ok(downloaded)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory fetcher for unit tests

    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    pub(crate) struct MemoryFetcher {
        responses: HashMap<String, Vec<u8>>,
        requests: RefCell<Vec<String>>,
    }

    impl MemoryFetcher {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn with(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
            self.responses.insert(url.to_string(), body.into());
            self
        }

        pub(crate) fn requests(&self) -> Vec<String> {
            self.requests.borrow().clone()
        }

        fn lookup(&self, url: &str) -> Result<&Vec<u8>> {
            self.requests.borrow_mut().push(url.to_string());
            match self.responses.get(url) {
                Some(body) => {
                    log_http_request("GET", url, Some(200));
                    Ok(body)
                }
                None => {
                    log_http_request("GET", url, Some(404));
                    Err(Error::Network {
                        url: url.to_string(),
                        status: Some(404),
                    })
                }
            }
        }
    }

    impl Fetcher for MemoryFetcher {
        fn fetch_text(&self, url: &str) -> Result<String> {
            let body = self.lookup(url)?;
            String::from_utf8(body.clone())
                .map_err(|e| Error::Invalid(format!("{} is not UTF-8: {}", url, e)))
        }

        fn download(
            &self,
            url: &str,
            dest: &Path,
            progress: &mut dyn FnMut(u64, Option<u64>),
        ) -> Result<u64> {
            let body = self.lookup(url)?;
            fs::write(dest, body)?;
            let len = body.len() as u64;
            progress(len, Some(len));
            Ok(len)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url_trims_trailing_slash() {
        assert_eq!(
            join_url("https://example.com/repo/", "pkg-list.yaml"),
            "https://example.com/repo/pkg-list.yaml"
        );
        assert_eq!(
            join_url("http://localhost:8080", "repository.yaml"),
            "http://localhost:8080/repository.yaml"
        );
    }

    #[test]
    fn test_fetcher_creation() {
        let fetcher = HttpFetcher::with_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(fetcher.max_retries, MAX_RETRIES);
        assert_eq!(fetcher.max_retries(0).max_retries, 1);
    }

    #[test]
    fn test_network_error_message() {
        let err = Error::Network {
            url: "https://example.com/x".to_string(),
            status: Some(404),
        };
        assert!(err.to_string().contains("HTTP 404"));

        let err = Error::Network {
            url: "https://example.com/x".to_string(),
            status: None,
        };
        assert!(err.to_string().contains("no response"));
    }

    #[test]
    fn test_unreachable_host_is_network_failure() {
        // Port 9 on localhost is the discard service and normally closed
        let fetcher = HttpFetcher::with_timeout(Duration::from_secs(2))
            .unwrap()
            .max_retries(1);
        let result = fetcher.fetch_text("http://127.0.0.1:9/repository.yaml");
        assert!(matches!(result, Err(Error::Network { status: None, .. })));
    }
}
