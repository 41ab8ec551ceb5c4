// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! HTTP transport of the download engine.

use indicatif::ProgressBar;
use reqwest::{
    header::{LOCATION, RANGE},
    redirect::Policy,
    Client, StatusCode, Url,
};
use std::{future::Future, path::Path, time::Duration};
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::debug;

/// Byte transfer used by the download engine.
pub trait Transport {
    /// Resolve effective URL by following at most one redirect hop.
    ///
    /// Falls back to the given URL when there is no redirect to follow.
    fn resolve(&self, url: &str) -> impl Future<Output = String>;

    /// Transfer bytes at URL into destination.
    ///
    /// An existing destination is treated as the prefix of the remote file,
    /// and continued rather than replaced when the remote allows it.
    fn transfer(
        &self,
        url: &str,
        destination: &Path,
        bar: &ProgressBar,
    ) -> impl Future<Output = Result<(), TransportError>>;
}

/// Transport through reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    probe: Client,
}

impl HttpTransport {
    /// Construct new HTTP transport.
    ///
    /// # Errors
    ///
    /// - Return [`TransportError::Http`] if TLS backend cannot be initialized.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        let probe = Client::builder()
            .redirect(Policy::none())
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, probe })
    }
}

impl Transport for HttpTransport {
    async fn resolve(&self, url: &str) -> String {
        let response = match self.probe.head(url).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!("redirect probe of {url} failed: {err}");
                return url.to_string();
            }
        };

        if !response.status().is_redirection() {
            return url.to_string();
        }

        // INVARIANT: Relative locations resolve against the probed URL.
        response
            .headers()
            .get(LOCATION)
            .and_then(|location| location.to_str().ok())
            .and_then(|location| Url::parse(url).ok()?.join(location).ok())
            .map(String::from)
            .unwrap_or_else(|| url.to_string())
    }

    async fn transfer(&self, url: &str, destination: &Path, bar: &ProgressBar) -> Result<()> {
        let offset = tokio::fs::metadata(destination)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);

        let mut request = self.client.get(url);
        if offset > 0 {
            debug!("resume {:?} from byte {offset}", destination.display());
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let mut response = request.send().await?;

        let status = response.status();
        let (mut file, start) = match status {
            StatusCode::PARTIAL_CONTENT => (
                OpenOptions::new().append(true).open(destination).await?,
                offset,
            ),
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => {
                debug!("{:?} already holds every byte", destination.display());
                return Ok(());
            }
            status if status.is_success() => (File::create(destination).await?, 0),
            status => {
                return Err(TransportError::Status {
                    status: status.as_u16(),
                    url: url.to_string(),
                })
            }
        };

        bar.set_length(start + response.content_length().unwrap_or(0));
        bar.set_position(start);
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            bar.inc(chunk.len() as u64);
        }
        file.flush().await?;

        Ok(())
    }
}

/// Transport error types.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Request failed before or during transfer.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Remote answered with an unsuccessful status.
    #[error("server answered {status} for {url}")]
    Status { status: u16, url: String },

    /// Destination cannot be written.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = TransportError> = std::result::Result<T, E>;
