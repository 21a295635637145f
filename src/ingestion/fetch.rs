//! Fetch functions - retrieve price paid files over HTTP

use crate::config::FetchOptions;
use crate::error::IngestError;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Why a single attempt failed
enum AttemptError {
    /// Stop retrying
    NotFound,
    Retryable(String),
}

/// HTTP downloader with retry and exponential backoff
#[derive(Debug, Clone)]
pub struct SourceFetcher {
    client: Client,
    options: FetchOptions,
}

impl SourceFetcher {
    pub fn new(options: FetchOptions) -> Result<Self, IngestError> {
        let client = Client::builder()
            .timeout(options.attempt_timeout)
            .user_agent("land-registry-ingest/0.1")
            .build()
            .map_err(|e| IngestError::DownloadFailed {
                url: String::new(),
                attempts: 0,
                last_error: e.to_string(),
            })?;

        Ok(Self { client, options })
    }

    /// HEAD probe; `Ok(false)` when the server reports the file missing
    pub async fn exists(&self, url: &str) -> Result<bool, IngestError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| IngestError::DownloadFailed {
                url: url.to_string(),
                attempts: 1,
                last_error: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(true);
        }
        if status != StatusCode::NOT_FOUND {
            warn!("HEAD {} returned {}", url, status);
        }
        Ok(false)
    }

    /// Download `url` into `dest`, returning the number of bytes written
    ///
    /// The body is streamed into a sibling `.part` file which is renamed over
    /// `dest` only once complete. A 404 fails immediately with
    /// [`IngestError::NotAvailableYet`]; anything else is retried.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64, IngestError> {
        info!("Downloading {} to {:?}", url, dest);

        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let partial = partial_path(dest);
        let max_retries = self.options.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_retries {
            info!("Download attempt {} of {}", attempt, max_retries);

            match self.download_once(url, &partial).await {
                Ok(bytes) => {
                    fs::rename(&partial, dest).await?;
                    info!("Downloaded {} bytes", bytes);
                    return Ok(bytes);
                }
                Err(AttemptError::NotFound) => {
                    remove_if_exists(&partial).await;
                    return Err(IngestError::NotAvailableYet {
                        url: url.to_string(),
                    });
                }
                Err(AttemptError::Retryable(message)) => {
                    remove_if_exists(&partial).await;
                    warn!(
                        "Download attempt {}/{} failed: {}",
                        attempt, max_retries, message
                    );
                    last_error = message;

                    if attempt < max_retries {
                        let backoff = backoff_for(self.options.initial_backoff, attempt);
                        info!("Retrying in {:?}", backoff);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        Err(IngestError::DownloadFailed {
            url: url.to_string(),
            attempts: max_retries,
            last_error,
        })
    }

    async fn download_once(&self, url: &str, partial: &Path) -> Result<u64, AttemptError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AttemptError::NotFound);
        }
        if status != StatusCode::OK {
            return Err(AttemptError::Retryable(format!("HTTP {}", status)));
        }

        let io_error = |e: std::io::Error| AttemptError::Retryable(e.to_string());
        let mut file = fs::File::create(partial).await.map_err(io_error)?;
        let mut written = 0u64;

        loop {
            let chunk: Option<Bytes> = response
                .chunk()
                .await
                .map_err(|e| AttemptError::Retryable(e.to_string()))?;
            let Some(chunk) = chunk else { break };
            file.write_all(&chunk).await.map_err(io_error)?;
            written += chunk.len() as u64;
        }

        file.flush().await.map_err(io_error)?;
        file.sync_all().await.map_err(io_error)?;
        Ok(written)
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

async fn remove_if_exists(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove {:?}: {}", path, e);
        }
    }
}

/// Backoff before retry number `attempt` (1-based)
pub fn backoff_for(initial: Duration, attempt: u32) -> Duration {
    initial.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_options(max_retries: u32) -> FetchOptions {
        FetchOptions {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/update.csv"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/update.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string("a,b\n"))
            .expect(1)
            .mount(&server)
            .await;

        let temp = tempdir().unwrap();
        let dest = temp.path().join("update.csv");
        let fetcher = SourceFetcher::new(fast_options(3)).unwrap();

        let bytes = fetcher
            .download(&format!("{}/update.csv", server.uri()), &dest)
            .await
            .unwrap();

        assert_eq!(bytes, 4);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "a,b\n");
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_last_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let temp = tempdir().unwrap();
        let dest = temp.path().join("update.csv");
        let fetcher = SourceFetcher::new(fast_options(3)).unwrap();

        let err = fetcher
            .download(&format!("{}/update.csv", server.uri()), &dest)
            .await
            .unwrap_err();

        match err {
            IngestError::DownloadFailed {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("503"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_not_found_short_circuits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let temp = tempdir().unwrap();
        let fetcher = SourceFetcher::new(fast_options(3)).unwrap();

        let err = fetcher
            .download(
                &format!("{}/missing.csv", server.uri()),
                &temp.path().join("missing.csv"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::NotAvailableYet { .. }));
    }

    #[tokio::test]
    async fn test_existing_destination_untouched_on_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let temp = tempdir().unwrap();
        let dest = temp.path().join("update.csv");
        std::fs::write(&dest, "previous").unwrap();

        let fetcher = SourceFetcher::new(fast_options(2)).unwrap();
        assert!(fetcher
            .download(&format!("{}/update.csv", server.uri()), &dest)
            .await
            .is_err());
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "previous");
    }

    #[tokio::test]
    async fn test_head_probe() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/present.csv"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = SourceFetcher::new(fast_options(1)).unwrap();
        assert!(fetcher
            .exists(&format!("{}/present.csv", server.uri()))
            .await
            .unwrap());
        assert!(!fetcher
            .exists(&format!("{}/absent.csv", server.uri()))
            .await
            .unwrap());
    }

    #[test]
    fn test_backoff_doubles() {
        let initial = Duration::from_millis(5000);
        assert_eq!(backoff_for(initial, 1), Duration::from_millis(5000));
        assert_eq!(backoff_for(initial, 2), Duration::from_millis(10000));
        assert_eq!(backoff_for(initial, 3), Duration::from_millis(20000));
    }
}
