//! Portfolio Backend REST Client
//!
//! `reqwest` implementation of the portfolio, account and quote service
//! ports.
//!
//! | Operation          | Request                          |
//! |--------------------|----------------------------------|
//! | fetch holdings     | `GET /api/portfolio/{userId}`    |
//! | add holding        | `POST /api/portfolio`            |
//! | remove holding     | `DELETE /api/portfolio/{id}`     |
//! | fetch account info | `GET /api/account/{userId}`      |
//! | fetch quote        | `GET /api/stocks/{symbol}/quote` |

pub mod dto;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use self::dto::{AddHoldingRequest, HoldingDto, QuoteDto};
use crate::application::ports::{AccountService, PortfolioService, QuoteService, ServiceError};
use crate::domain::portfolio::{AccountSummary, Holding, HoldingId, NewHolding, UserId};
use crate::domain::streaming::{Quote, Symbol};
use crate::infrastructure::config::BackendSettings;

/// HTTP client for the portfolio backend.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    /// Create a client from backend settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &BackendSettings) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ServiceError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, ServiceError> {
        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            body
        };
        tracing::warn!(status = status.as_u16(), %message, "Backend request failed");
        Err(ServiceError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ServiceError> {
        let response = self.send(self.client.get(self.url(path))).await?;
        response
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl PortfolioService for BackendClient {
    async fn fetch_holdings(&self, user: UserId) -> Result<Vec<Holding>, ServiceError> {
        let holdings: Vec<HoldingDto> = self.get_json(&format!("/api/portfolio/{user}")).await?;
        tracing::debug!(%user, count = holdings.len(), "Fetched holdings");
        Ok(holdings.into_iter().map(Holding::from).collect())
    }

    async fn add_holding(&self, user: UserId, holding: NewHolding) -> Result<Holding, ServiceError> {
        let body = AddHoldingRequest::new(user, &holding);
        let response = self
            .send(self.client.post(self.url("/api/portfolio")).json(&body))
            .await?;
        let created: HoldingDto = response
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;
        Ok(created.into())
    }

    async fn remove_holding(&self, id: HoldingId) -> Result<(), ServiceError> {
        self.send(self.client.delete(self.url(&format!("/api/portfolio/{id}"))))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AccountService for BackendClient {
    async fn fetch_account_info(&self, user: UserId) -> Result<AccountSummary, ServiceError> {
        self.get_json(&format!("/api/account/{user}")).await
    }
}

#[async_trait]
impl QuoteService for BackendClient {
    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, ServiceError> {
        let quote: QuoteDto = self
            .get_json(&format!("/api/stocks/{symbol}/quote"))
            .await?;
        Ok(quote.into_quote(Utc::now()))
    }
}
