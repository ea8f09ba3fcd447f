//! HTTP client for the management API.
//!
//! Tools that change URLs while a server is running go through here, so the
//! server's redirect cache sees every change as it happens.

use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use crate::error::ErrorResponse;
use crate::models::{CreateUrlRequest, CreateUrlResponse, ShortUrl, UrlPatch};

#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("invalid API base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("API server not reachable: {0}")]
    Unreachable(#[source] reqwest::Error),
    #[error("{message} ({code}, HTTP {status})")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// `base_url` is the API server root, e.g. `http://127.0.0.1:8080`.
    pub fn new(base_url: &str) -> Result<Self, ApiClientError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiClientError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiClientError::InvalidBaseUrl(base_url.to_string()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    pub async fn create(
        &self,
        request: &CreateUrlRequest,
    ) -> Result<CreateUrlResponse, ApiClientError> {
        let url = self.endpoint(&["urls"])?;
        json(self.send(self.http.post(url).json(request)).await?).await
    }

    pub async fn get(&self, short_id: &str) -> Result<ShortUrl, ApiClientError> {
        let url = self.endpoint(&["urls", short_id])?;
        json(self.send(self.http.get(url)).await?).await
    }

    pub async fn update(&self, short_id: &str, patch: &UrlPatch) -> Result<ShortUrl, ApiClientError> {
        let url = self.endpoint(&["urls", short_id])?;
        json(self.send(self.http.patch(url).json(patch)).await?).await
    }

    pub async fn delete(&self, short_id: &str) -> Result<(), ApiClientError> {
        let url = self.endpoint(&["urls", short_id])?;
        self.send(self.http.delete(url)).await?;
        Ok(())
    }

    /// `/api/<segments..>` under the base URL, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiClientError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiClientError> {
        let response = request.send().await.map_err(|err| {
            if err.is_connect() {
                ApiClientError::Unreachable(err)
            } else {
                ApiClientError::Http(err)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.json::<ErrorResponse>().await.ok();
        Err(ApiClientError::Api {
            status: status.as_u16(),
            code: body
                .as_ref()
                .map(|b| b.code.clone())
                .unwrap_or_else(|| "unknown".to_string()),
            message: body
                .map(|b| b.error)
                .unwrap_or_else(|| status.to_string()),
        })
    }
}

async fn json<T: DeserializeOwned>(response: Response) -> Result<T, ApiClientError> {
    Ok(response.json::<T>().await?)
}
