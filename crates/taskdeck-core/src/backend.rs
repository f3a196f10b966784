use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Url};
use tracing::{info, trace};

use crate::error::ApiError;
use crate::transport::{ApiRequest, HttpBackend, HttpResponse, Method};

/// Production backend: a cookie-carrying `reqwest` client rooted at the API
/// base URL. The session cookie set by `/auth/login` lives in the client's
/// jar for as long as the backend does.
pub struct ReqwestBackend {
    client: Client,
    base_url: String,
}

impl ReqwestBackend {
    #[tracing::instrument(skip(timeout))]
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Url::parse(base_url).with_context(|| format!("invalid API base URL: {base_url}"))?;

        let client = Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .context("failed building HTTP client")?;

        info!(base_url, timeout_secs = timeout.as_secs(), "HTTP backend ready");

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, request: &ApiRequest) -> Result<Url, ApiError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, request.path))
            .map_err(|err| ApiError::Network(format!("invalid request URL: {err}")))?;

        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn execute(&self, request: &ApiRequest) -> Result<HttpResponse, ApiError> {
        let url = self.url_for(request)?;
        trace!(%url, "dispatching request");

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, url)
            .header(ACCEPT, "application/json");

        if let Some(body) = &request.body {
            let payload = serde_json::to_vec(body)
                .map_err(|err| ApiError::Malformed(format!("failed encoding body: {err}")))?;
            builder = builder.header(CONTENT_TYPE, "application/json").body(payload);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| ApiError::Network(err.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| ApiError::Network(err.to_string()))?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}
