// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer-authenticated requests with one refresh-and-retry on 401.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::coordinator::RefreshCoordinator;
use crate::error::SessionError;
use crate::events::LogoutReason;

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Text(String),
    Form(Vec<(String, String)>),
}

/// Caller-supplied parts of a request. The bearer header is always added by
/// the client; an `Authorization` header given here is ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new(Method::GET)
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self { method, headers: Vec::new(), body: None }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, SessionError> {
        let value = serde_json::to_value(value)
            .map_err(|e| SessionError::Transport(format!("encode request body: {e}")))?;
        Ok(self.body(RequestBody::Json(value)))
    }
}

/// HTTP client that attaches the session's access token to every request.
#[derive(Clone)]
pub struct AuthenticatedClient {
    http: reqwest::Client,
    config: Arc<SessionConfig>,
    coordinator: RefreshCoordinator,
}

impl AuthenticatedClient {
    pub fn new(
        http: reqwest::Client,
        config: Arc<SessionConfig>,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self { http, config, coordinator }
    }

    /// Issue an authenticated request. `url` may be relative to the API base.
    ///
    /// A 401 triggers one refresh and one retry. A second 401 ends the
    /// session and yields [`SessionError::AuthExpired`]. Any other non-2xx
    /// status yields [`SessionError::Http`] without retry.
    pub async fn request(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<reqwest::Response, SessionError> {
        let url = self.config.resolve_url(url);
        let token = self.coordinator.ensure_fresh_access_token().await?;
        let resp = self.send(&url, options, &token).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return check_status(resp).await;
        }

        debug!(url = %url, "access token refused, refreshing");
        let token = self.coordinator.refresh_rejected(&token).await?;
        let resp = self.send(&url, options, &token).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            warn!(url = %url, "access token refused after refresh");
            self.coordinator.end_session_for(&token, LogoutReason::Unauthorized);
            return Err(SessionError::AuthExpired);
        }
        check_status(resp).await
    }

    pub async fn get(&self, url: &str) -> Result<reqwest::Response, SessionError> {
        self.request(url, &RequestOptions::new(Method::GET)).await
    }

    pub async fn delete(&self, url: &str) -> Result<reqwest::Response, SessionError> {
        self.request(url, &RequestOptions::new(Method::DELETE)).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<reqwest::Response, SessionError> {
        self.request(url, &RequestOptions::new(Method::POST).json(body)?).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<reqwest::Response, SessionError> {
        self.request(url, &RequestOptions::new(Method::PUT).json(body)?).await
    }

    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<reqwest::Response, SessionError> {
        self.request(url, &RequestOptions::new(Method::PATCH).json(body)?).await
    }

    /// Issue a request and deserialize its 2xx JSON body.
    pub async fn request_json<R: DeserializeOwned>(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<R, SessionError> {
        let resp = self.request(url, options).await?;
        Ok(resp.json().await?)
    }

    async fn send(
        &self,
        url: &str,
        options: &RequestOptions,
        token: &str,
    ) -> Result<reqwest::Response, SessionError> {
        let mut req = self.http.request(options.method.clone(), url);
        for (name, value) in &options.headers {
            if name.eq_ignore_ascii_case("authorization") {
                continue;
            }
            req = req.header(name.as_str(), value.as_str());
        }
        req = match &options.body {
            Some(RequestBody::Json(value)) => req.json(value),
            Some(RequestBody::Text(text)) => req.body(text.clone()),
            Some(RequestBody::Form(fields)) => req.form(fields),
            None => req,
        };
        Ok(req.bearer_auth(token).send().await?)
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, SessionError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), "request failed");
    Err(SessionError::Http { status: status.as_u16(), body })
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
