use std::collections::HashMap;
use std::str::FromStr;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const POLYGON_CHAIN_ID: u64 = 137;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Failed to sign message: {0}")]
    SigningError(String),

    #[error("No API credentials set")]
    NoApiCredentials,

    #[error("HMAC error: {0}")]
    HmacError(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;

/// L2 API credentials derived from the signing key.
#[derive(Clone, Debug, Deserialize)]
pub struct ApiCredentials {
    #[serde(alias = "apiKey", alias = "key")]
    pub key: String,
    pub secret: String,
    pub passphrase: String,
}

/// CLOB authentication: L1 wallet-signature headers to derive API creds,
/// L2 HMAC headers on every order request.
pub struct ClobAuth {
    signer: PrivateKeySigner,
    address: Address,
    creds: Option<ApiCredentials>,
}

impl ClobAuth {
    pub fn new(private_key: &str) -> Result<Self> {
        let key = private_key.trim_start_matches("0x");
        let signer = PrivateKeySigner::from_str(key)
            .map_err(|_| AuthError::InvalidPrivateKey)?
            .with_chain_id(Some(POLYGON_CHAIN_ID));
        let address = signer.address();

        Ok(Self {
            signer,
            address,
            creds: None,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn set_credentials(&mut self, creds: ApiCredentials) {
        self.creds = Some(creds);
    }

    pub fn credentials(&self) -> Option<&ApiCredentials> {
        self.creds.as_ref()
    }

    /// L1 attestation signature over the standard control message.
    async fn sign_l1_message(&self, timestamp: u64, nonce: u64) -> Result<String> {
        let message = format!(
            "This message attests that I control the given wallet\nAddress: {}\nTimestamp: {}\nNonce: {}",
            self.address, timestamp, nonce
        );

        let signature = self
            .signer
            .sign_message(message.as_bytes())
            .await
            .map_err(|e| AuthError::SigningError(e.to_string()))?;

        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }

    /// L2 HMAC-SHA256 over timestamp + method + path + body.
    fn sign_l2_request(&self, timestamp: u64, method: &str, path: &str, body: &str) -> Result<String> {
        let creds = self.creds.as_ref().ok_or(AuthError::NoApiCredentials)?;

        let message = format!("{}{}{}{}", timestamp, method, path, body);

        let mut mac = HmacSha256::new_from_slice(creds.secret.as_bytes())
            .map_err(|e| AuthError::HmacError(e.to_string()))?;
        mac.update(message.as_bytes());

        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Headers for credential derivation/creation requests.
    pub async fn l1_headers(&self, timestamp: u64, nonce: u64) -> Result<HashMap<String, String>> {
        let signature = self.sign_l1_message(timestamp, nonce).await?;

        let mut headers = HashMap::new();
        headers.insert("POLY_ADDRESS".to_string(), self.address.to_string());
        headers.insert("POLY_SIGNATURE".to_string(), signature);
        headers.insert("POLY_TIMESTAMP".to_string(), timestamp.to_string());
        headers.insert("POLY_NONCE".to_string(), nonce.to_string());
        Ok(headers)
    }

    /// Headers for authenticated API requests.
    pub fn l2_headers(
        &self,
        timestamp: u64,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<HashMap<String, String>> {
        let creds = self.creds.as_ref().ok_or(AuthError::NoApiCredentials)?;
        let signature = self.sign_l2_request(timestamp, method, path, body)?;

        let mut headers = HashMap::new();
        headers.insert("POLY_ADDRESS".to_string(), self.address.to_string());
        headers.insert("POLY_SIGNATURE".to_string(), signature);
        headers.insert("POLY_TIMESTAMP".to_string(), timestamp.to_string());
        headers.insert("POLY_API_KEY".to_string(), creds.key.clone());
        headers.insert("POLY_PASSPHRASE".to_string(), creds.passphrase.clone());
        Ok(headers)
    }

    pub fn current_timestamp() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}
