use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::gateway::auth::{ApiCredentials, AuthError, ClobAuth};

#[derive(Error, Debug)]
pub enum VenueError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(#[from] AuthError),

    #[error("Deserialization failed: {0}")]
    DeserializeFailed(String),
}

pub type Result<T> = std::result::Result<T, VenueError>;

/// Limit-order payload for the CLOB /order endpoint.
#[derive(Serialize)]
struct OrderArgs<'a> {
    #[serde(rename = "tokenID")]
    token_id: &'a str,
    price: f64,
    size: f64,
    side: &'a str,
}

/// Authenticated REST client for the Polymarket CLOB order endpoints.
///
/// Credential flow: try the deterministic derive first, fall back to
/// creating a fresh key set.
pub struct ClobClient {
    client: reqwest::Client,
    base_url: String,
    auth: ClobAuth,
}

impl ClobClient {
    /// Build the client and establish L2 credentials.
    pub async fn connect(base_url: &str, private_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        let mut clob = Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: ClobAuth::new(private_key)?,
        };

        let creds = clob.get_or_create_api_creds().await?;
        clob.auth.set_credentials(creds);
        info!("CLOB client authenticated, address={}", clob.auth.address());
        Ok(clob)
    }

    /// Post a GTC limit BUY. Returns the venue order id.
    pub async fn create_and_post_order(&self, token_id: &str, price: f64, size: f64) -> Result<String> {
        let order = OrderArgs {
            token_id,
            price,
            size,
            side: "BUY",
        };
        let body_json = json!({
            "order": order,
            "orderType": "GTC",
            "owner": self.auth.credentials().map(|c| c.key.as_str()).unwrap_or(""),
        });
        let body = serde_json::to_string(&body_json).map_err(|e| VenueError::ApiError(e.to_string()))?;

        let timestamp = ClobAuth::current_timestamp();
        let headers = self.auth.l2_headers(timestamp, "POST", "/order", &body)?;

        let url = format!("{}/order", self.base_url);
        let mut req = self.client.post(&url).header("Content-Type", "application/json");
        for (key, value) in headers {
            req = req.header(key, value);
        }

        let response = req.body(body).send().await?;
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(VenueError::ApiError(format!("Failed to place order: {}", error_text)));
        }

        let resp: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VenueError::DeserializeFailed(e.to_string()))?;

        // The venue has answered with both field spellings over time
        let order_id = resp
            .get("orderID")
            .or_else(|| resp.get("id"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        match order_id {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(VenueError::ApiError(format!(
                "Order response missing id: {}",
                resp
            ))),
        }
    }

    /// Cancel a resting order.
    pub async fn cancel(&self, order_id: &str) -> Result<()> {
        let body_json = json!({ "orderID": order_id });
        let body = serde_json::to_string(&body_json).map_err(|e| VenueError::ApiError(e.to_string()))?;

        let timestamp = ClobAuth::current_timestamp();
        let headers = self.auth.l2_headers(timestamp, "DELETE", "/order", &body)?;

        let url = format!("{}/order", self.base_url);
        let mut req = self.client.delete(&url).header("Content-Type", "application/json");
        for (key, value) in headers {
            req = req.header(key, value);
        }

        let response = req.body(body).send().await?;
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(VenueError::ApiError(format!("Failed to cancel order: {}", error_text)));
        }
        Ok(())
    }

    /// Fetch the venue lifecycle status string for an order.
    pub async fn get_order_status(&self, order_id: &str) -> Result<String> {
        let path = format!("/data/order/{}", order_id);
        let timestamp = ClobAuth::current_timestamp();
        let headers = self.auth.l2_headers(timestamp, "GET", &path, "")?;

        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.get(&url);
        for (key, value) in headers {
            req = req.header(key, value);
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(VenueError::ApiError(format!("Failed to fetch order: {}", error_text)));
        }

        let resp: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VenueError::DeserializeFailed(e.to_string()))?;

        Ok(resp
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("")
            .to_string())
    }

    /// Derive the deterministic API key, or create one if derivation fails.
    async fn get_or_create_api_creds(&self) -> Result<ApiCredentials> {
        match self.derive_api_key().await {
            Ok(creds) => Ok(creds),
            Err(e) => {
                debug!("API key derivation failed ({}), creating new", e);
                self.create_api_key().await
            }
        }
    }

    async fn derive_api_key(&self) -> Result<ApiCredentials> {
        let url = format!("{}/auth/derive-api-key", self.base_url);
        let timestamp = ClobAuth::current_timestamp();
        let headers = self.auth.l1_headers(timestamp, 0).await?;

        let mut req = self.client.get(&url);
        for (key, value) in headers {
            req = req.header(key, value);
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(VenueError::ApiError(format!("Failed to derive API key: {}", error_text)));
        }

        response
            .json()
            .await
            .map_err(|e| VenueError::DeserializeFailed(e.to_string()))
    }

    async fn create_api_key(&self) -> Result<ApiCredentials> {
        let url = format!("{}/auth/api-key", self.base_url);
        let timestamp = ClobAuth::current_timestamp();
        let headers = self.auth.l1_headers(timestamp, 0).await?;

        let mut req = self.client.post(&url);
        for (key, value) in headers {
            req = req.header(key, value);
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(VenueError::ApiError(format!("Failed to create API key: {}", error_text)));
        }

        response
            .json()
            .await
            .map_err(|e| VenueError::DeserializeFailed(e.to_string()))
    }
}
