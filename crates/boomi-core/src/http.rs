// crates/boomi-core/src/http.rs
use std::path::PathBuf;

use reqwest::Client;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::options::Credentials;

pub const USER_AGENT: &str = "boomi-etl/v1";

/// Basic-auth HTTP client with an optional on-disk body cache for GETs.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    credentials: Option<Credentials>,
    cache_dir: Option<PathBuf>,
}

impl HttpClient {
    pub fn new(credentials: Option<Credentials>, cache_dir: Option<PathBuf>) -> Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            credentials,
            cache_dir,
        })
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let cache_path = self.cache_path(url);
        if let Some(path) = &cache_path {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                debug!(url, path = %path.display(), "serving response from cache");
                return tokio::fs::read(path)
                    .await
                    .map_err(|err| PipelineError::file(path.display().to_string(), err));
            }
        }

        let mut request = self.client.get(url);
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.username, credentials.password.as_ref());
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await?.to_vec();
        debug!(url, bytes = body.len(), "fetched");

        if let Some(path) = cache_path {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|err| PipelineError::file(parent.display().to_string(), err))?;
            }
            tokio::fs::write(&path, &body)
                .await
                .map_err(|err| PipelineError::file(path.display().to_string(), err))?;
        }
        Ok(body)
    }

    pub async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut request = self.client.post(url).json(body);
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.username, credentials.password.as_ref());
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    pub fn cache_path(&self, url: &str) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(blake3::hash(url.as_bytes()).to_hex().as_str()))
    }
}
