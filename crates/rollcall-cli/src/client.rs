//! HTTP client for the rollcalld API.

use anyhow::{bail, Context, Result};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub struct Client {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl Client {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send and decode the JSON body. Non-2xx responses become errors
    /// carrying the daemon's `error` message.
    async fn send(&self, builder: RequestBuilder) -> Result<Value> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("cannot reach rollcalld at {}", self.base_url))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("unreadable response (HTTP {status})"))?;
        if !status.is_success() {
            let message = body["error"].as_str().unwrap_or("request failed");
            bail!("HTTP {status}: {message}");
        }
        tracing::debug!(%status, "response received");
        Ok(body)
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        self.send(self.request(Method::GET, path)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.send(self.request(Method::DELETE, path)).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.send(self.request(Method::POST, path).json(body)).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Value> {
        self.send(self.request(Method::PUT, path).json(body)).await
    }
}

/// Decode one field of a response body.
pub fn field<T: DeserializeOwned>(body: &Value, key: &str) -> Result<T> {
    serde_json::from_value(body[key].clone())
        .with_context(|| format!("unexpected `{key}` in response"))
}
