//! `reqwest` implementation of [`CartApi`].

use std::sync::Arc;

use afrikraga_core::{LineItemId, SessionToken};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::types::{
    AddLineRequest, ApiCart, ApiLineResponse, Envelope, ErrorEnvelope, UpdateLineRequest,
};
use super::{AddLine, ApiError, CartApi, ConfirmedLine, LineResponse, ServerCart};
use crate::config::ApiConfig;

/// Header carrying a per-request correlation id.
const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Longest slice of a response body copied into logs and errors.
const MAX_BODY_PREVIEW: usize = 200;

/// Client for the backend cart API.
#[derive(Clone)]
pub struct RestCartClient {
    inner: Arc<RestCartClientInner>,
}

struct RestCartClientInner {
    client: reqwest::Client,
    base_url: Url,
    session_header: String,
}

impl RestCartClient {
    /// Create a new cart API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the API token is not a valid header value or the
    /// HTTP client fails to build.
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();

        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|_| ApiError::InvalidHeader("Authorization"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(RestCartClientInner {
                client,
                base_url: config.base_url.clone(),
                session_header: config.session_header.clone(),
            }),
        })
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        session: Option<&SessionToken>,
    ) -> Result<RequestBuilder, ApiError> {
        let url = self.inner.base_url.join(path)?;
        let mut request = self
            .inner
            .client
            .request(method, url)
            .header(REQUEST_ID_HEADER, Uuid::new_v4().to_string());

        if let Some(token) = session {
            request = request.header(self.inner.session_header.as_str(), token.as_str());
        }

        Ok(request)
    }

    /// Send a request and unwrap the response envelope.
    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, ApiError> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(ApiError::RateLimited(retry_after));
        }

        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| body.chars().take(MAX_BODY_PREVIEW).collect());
            warn!(status = %status, message = %message, "Cart API returned non-success status");
            return Err(ApiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        // DELETE endpoints may answer with an empty body.
        if body.trim().is_empty() {
            return Ok(None);
        }

        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
            warn!(
                error = %e,
                body = %body.chars().take(MAX_BODY_PREVIEW).collect::<String>(),
                "Failed to parse cart API response"
            );
            e
        })?;

        if !envelope.success {
            return Err(ApiError::Rejected(
                envelope
                    .message
                    .unwrap_or_else(|| "request was not successful".to_string()),
            ));
        }

        if let Some(message) = &envelope.message {
            debug!(message = %message, "Cart API response");
        }

        Ok(envelope.data)
    }
}

impl CartApi for RestCartClient {
    #[instrument(skip(self))]
    async fn fetch_cart(&self, session: Option<&SessionToken>) -> Result<ServerCart, ApiError> {
        let request = self.request(Method::GET, "cart", session)?;
        let cart = self
            .execute::<ApiCart>(request)
            .await?
            .map(ServerCart::from)
            .unwrap_or_default();
        Ok(cart)
    }

    #[instrument(skip(self), fields(key = %line.key))]
    async fn add_line(
        &self,
        session: Option<&SessionToken>,
        line: AddLine,
    ) -> Result<LineResponse, ApiError> {
        let body = AddLineRequest {
            product_id: line.key.product_id.as_i64(),
            variant_id: line.key.variant_id.map(|v| v.as_i64()),
            quantity: line.quantity,
        };
        let request = self.request(Method::POST, "cart/items", session)?.json(&body);

        self.execute::<ApiLineResponse>(request)
            .await?
            .and_then(ApiLineResponse::into_line_response)
            .ok_or(ApiError::MissingData("added cart item"))
    }

    #[instrument(skip(self), fields(line_id = %id))]
    async fn update_line(
        &self,
        session: Option<&SessionToken>,
        id: LineItemId,
        quantity: u32,
    ) -> Result<Option<ConfirmedLine>, ApiError> {
        let request = self
            .request(Method::PUT, &format!("cart/items/{id}"), session)?
            .json(&UpdateLineRequest { quantity });

        Ok(self
            .execute::<ApiLineResponse>(request)
            .await?
            .and_then(ApiLineResponse::into_line_response)
            .map(|response| response.line))
    }

    #[instrument(skip(self), fields(line_id = %id))]
    async fn remove_line(
        &self,
        session: Option<&SessionToken>,
        id: LineItemId,
    ) -> Result<(), ApiError> {
        let request = self.request(Method::DELETE, &format!("cart/items/{id}"), session)?;
        self.execute::<serde_json::Value>(request).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear_cart(&self, session: Option<&SessionToken>) -> Result<(), ApiError> {
        let request = self.request(Method::DELETE, "cart", session)?;
        self.execute::<serde_json::Value>(request).await?;
        Ok(())
    }
}
