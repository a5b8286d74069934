//! `HttpClient` over reqwest with rustls.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse},
};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("photo-backup/", env!("CARGO_PKG_VERSION"));

/// Single-shot transport: retries belong to the pipeline, which knows which
/// operations are idempotent. Every status is returned to the caller,
/// including `308` (Drive's "resume incomplete"), so redirects are disabled.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// 60 s request timeout, 10 s connect timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(60))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| BridgeError::NotAvailable(format!("HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn build_request(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let builder = request
            .headers
            .into_iter()
            .fold(self.client.request(method(request.method), &request.url), |req, (k, v)| {
                req.header(k, v)
            });
        let builder = match request.body {
            Some(body) => builder.body(body),
            None => builder,
        };
        match request.timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }

    fn map_error(e: reqwest::Error) -> BridgeError {
        if e.is_timeout() {
            BridgeError::Timeout(e.to_string())
        } else if e.is_builder() {
            BridgeError::OperationFailed(e.to_string())
        } else {
            BridgeError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = request.method;
        let url = request.url.clone();

        let response = self.build_request(request).send().await.map_err(|e| {
            warn!(error = %e, ?method, "HTTP request failed");
            Self::map_error(e)
        })?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let body = response.bytes().await.map_err(Self::map_error)?;

        debug!(status, ?method, bytes = body.len(), url = %strip_query(&url), "HTTP response");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Head => reqwest::Method::HEAD,
    }
}

/// Query strings can carry upload ids and page tokens; keep them out of logs.
fn strip_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
