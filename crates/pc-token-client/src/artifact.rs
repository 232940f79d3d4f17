//! Where compiled contract blobs come from.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn load(&self, relative_path: &str) -> Result<Vec<u8>>;
}

pub struct FsArtifactSource {
    root: PathBuf,
}

impl FsArtifactSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactSource for FsArtifactSource {
    async fn load(&self, relative_path: &str) -> Result<Vec<u8>> {
        let path = self.root.join(relative_path.trim_start_matches('/'));
        debug!(path = %path.display(), "reading contract artifact");
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("read artifact {}", path.display()))
    }
}

pub struct HttpArtifactSource {
    base_url: String,
    http: reqwest::Client,
}

impl HttpArtifactSource {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ArtifactSource for HttpArtifactSource {
    async fn load(&self, relative_path: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{}", self.base_url, relative_path.trim_start_matches('/'));
        debug!(%url, "fetching contract artifact");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("artifact fetch transport")?;

        let status = response.status();
        if !status.is_success() {
            bail!("artifact fetch HTTP {status}: {url}");
        }

        let bytes = response.bytes().await.context("artifact fetch body")?;
        Ok(bytes.to_vec())
    }
}

/// `http(s)://` locations are fetched over HTTP, anything else is a directory.
pub fn artifact_source_for(location: &str) -> Arc<dyn ArtifactSource> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Arc::new(HttpArtifactSource::new(location))
    } else {
        Arc::new(FsArtifactSource::new(location))
    }
}
