use crate::context::StepLimits;
use crate::error::DownloadError;
use crate::progress::percent_of;
use log::{debug, info};
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::Url;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Redirect hops followed before giving up on a server
pub const MAX_REDIRECTS: usize = 10;

/// Longest piece of an error response body kept in `DownloadError::Http`
const BODY_SNIPPET_LEN: usize = 200;

/// Streams remote files to disk.
///
/// Redirects are followed by hand rather than by reqwest so the hop limit
/// and the per-hop URL check live here.
pub struct DownloadClient {
    client: reqwest::Client,
    limits: StepLimits,
}

impl DownloadClient {
    pub fn new(request_timeout: Option<Duration>, limits: StepLimits) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("kingdom-launcher/", env!("CARGO_PKG_VERSION")))
            .redirect(Policy::none());

        if let Some(timeout) = request_timeout {
            builder = builder.connect_timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            limits,
        })
    }

    /// Download `url` to `destination`, overwriting it.
    ///
    /// `on_progress` receives an integer percent after every chunk, but only
    /// when the server sent a content length. On any failure the file at
    /// `destination` is removed. Returns the number of bytes written.
    pub async fn download(
        &self,
        url: &str,
        destination: &Path,
        mut on_progress: impl FnMut(u8),
    ) -> Result<u64, DownloadError> {
        let start = parse_http_url(url)?;

        info!("Downloading {} -> {}", url, destination.display());

        let fetch = self.follow(start, destination, &mut on_progress);
        let result = self
            .limits
            .run(
                fetch,
                || DownloadError::Timeout { url: url.to_string() },
                || DownloadError::Cancelled,
            )
            .await;

        if result.is_err() {
            remove_partial(destination).await;
        }

        result
    }

    async fn follow(
        &self,
        start: Url,
        destination: &Path,
        on_progress: &mut impl FnMut(u8),
    ) -> Result<u64, DownloadError> {
        let mut current = start.clone();

        for _ in 0..=MAX_REDIRECTS {
            let response = self
                .client
                .get(current.clone())
                .send()
                .await
                .map_err(|source| DownloadError::Network {
                    url: current.to_string(),
                    source,
                })?;

            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);

                if let Some(location) = location {
                    let next = current.join(&location).map_err(|e| DownloadError::InvalidUrl {
                        url: location.clone(),
                        reason: e.to_string(),
                    })?;
                    let next = parse_http_url(next.as_str())?;
                    debug!("Redirect {} -> {}", current, next);
                    current = next;
                    continue;
                }
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(DownloadError::Http {
                    status: status.as_u16(),
                    url: current.to_string(),
                    body: body.chars().take(BODY_SNIPPET_LEN).collect(),
                });
            }

            return stream_to_file(response, &current, destination, on_progress).await;
        }

        Err(DownloadError::TooManyRedirects {
            url: start.to_string(),
            limit: MAX_REDIRECTS,
        })
    }
}

async fn stream_to_file(
    mut response: reqwest::Response,
    url: &Url,
    destination: &Path,
    on_progress: &mut impl FnMut(u8),
) -> Result<u64, DownloadError> {
    let io_err = |source: std::io::Error| DownloadError::Io {
        path: destination.to_path_buf(),
        source,
    };

    let total = response.content_length().filter(|len| *len > 0);
    let mut file = File::create(destination).await.map_err(io_err)?;
    let mut written: u64 = 0;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|source| DownloadError::Network {
            url: url.to_string(),
            source,
        })?
    {
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;

        if let Some(total) = total {
            on_progress(percent_of(written, total));
        }
    }

    file.flush().await.map_err(io_err)?;

    debug!("Wrote {} bytes to {}", written, destination.display());
    Ok(written)
}

fn parse_http_url(url: &str) -> Result<Url, DownloadError> {
    let parsed = Url::parse(url).map_err(|e| DownloadError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(DownloadError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme {}", other),
        }),
    }
}

/// Best-effort removal of a partial download
async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!("Could not remove partial file {}: {}", path.display(), e);
        }
    }
}
