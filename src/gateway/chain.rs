use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{address, Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use alloy::sol;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::gateway::auth::POLYGON_CHAIN_ID;

sol! {
    #[sol(rpc)]
    interface IConditionalTokens {
        function payoutDenominator(bytes32 conditionId) external view returns (uint256);
        function redeemPositions(address collateralToken, bytes32 parentCollectionId, bytes32 conditionId, uint256[] indexSets) external;
    }
}

/// Gnosis Conditional Tokens Framework on Polygon mainnet.
const CONDITIONAL_TOKENS: Address = address!("0x4D97DCd97eC945f40cF65F87097ACe5EA0476045");

/// Candidate collateral contracts, tried in order: native USDC first, then
/// the legacy bridged USDC.e.
const COLLATERALS: [Address; 2] = [
    address!("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"),
    address!("0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174"),
];

const FALLBACK_RPCS: [&str; 4] = [
    "https://polygon.llamarpc.com",
    "https://polygon-bor-rpc.publicnode.com",
    "https://polygon-rpc.com",
    "https://rpc.ankr.com/polygon",
];

const MAX_RPC_ATTEMPTS: usize = 3;
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Error, Debug, Clone)]
pub enum RedeemError {
    #[error("payouts not set")]
    PayoutsNotSet,

    /// Every candidate collateral produced a status=1 receipt with no
    /// collateral-transfer log: the wallet got nothing back.
    #[error("no positions found")]
    NoPositionsFound,

    #[error("transaction reverted")]
    Reverted,

    #[error("nonce too low")]
    NonceTooLow,

    #[error("invalid condition id: {0}")]
    BadConditionId(String),

    #[error("no signing key configured")]
    NoSigner,

    #[error("rpc error: {0}")]
    Rpc(String),
}

impl RedeemError {
    /// True for the "wallet got nothing back" outcome that the engine treats
    /// as already-redeemed rather than as a redemption failure.
    pub fn is_no_tokens(&self) -> bool {
        matches!(self, RedeemError::NoPositionsFound)
    }
}

/// Transport-transient errors that justify failing over to the next RPC.
fn is_transient(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    ["503", "502", "connection", "timeout", "reset", "eof"]
        .iter()
        .any(|needle| msg.contains(needle))
}

/// On-chain gate and settlement path against the Conditional Tokens contract.
///
/// The venue's closed flag says nothing about whether the oracle has posted
/// payouts; only `payoutDenominator > 0` does. Redeeming before that burns
/// the outcome tokens for a zero payout, so every redemption re-checks it.
pub struct ChainClient {
    signer: Option<PrivateKeySigner>,
    wallet_address: Option<Address>,
    endpoints: Vec<String>,
}

impl ChainClient {
    /// `user_rpc` (if non-empty) is appended after the built-in fallbacks.
    pub fn new(user_rpc: &str, private_key: Option<&str>) -> Self {
        let mut endpoints: Vec<String> = FALLBACK_RPCS.iter().map(|s| s.to_string()).collect();
        if !user_rpc.is_empty() {
            endpoints.push(user_rpc.to_string());
        }

        let signer = private_key.and_then(|pk| {
            PrivateKeySigner::from_str(pk.trim_start_matches("0x"))
                .ok()
                .map(|s| s.with_chain_id(Some(POLYGON_CHAIN_ID)))
        });
        let wallet_address = signer.as_ref().map(|s| s.address());

        Self {
            signer,
            wallet_address,
            endpoints,
        }
    }

    /// Authoritative resolution check: `payoutDenominator(condition_id) > 0`.
    pub async fn is_resolved(&self, condition_id: &str) -> Result<bool, RedeemError> {
        let cond = parse_condition_id(condition_id)?;

        let mut last_err = String::new();
        for url in self.endpoints.iter().take(MAX_RPC_ATTEMPTS) {
            match self.payout_denominator(url, cond).await {
                Ok(denominator) => return Ok(denominator > U256::ZERO),
                Err(e) if is_transient(&e) => {
                    warn!("Resolution check failed over {}: {}", url, e);
                    last_err = e;
                }
                Err(e) => return Err(RedeemError::Rpc(e)),
            }
        }
        Err(RedeemError::Rpc(last_err))
    }

    /// Redeem both outcome slots of a resolved binary condition.
    ///
    /// Tries each candidate collateral; a receipt that carries no log from a
    /// known collateral contract proves nothing was paid out for that
    /// collection, so the next candidate is tried. Only a collateral log is
    /// accepted as proof of redemption — `status == 1` alone is not.
    pub async fn redeem(&self, condition_id: &str) -> Result<(), RedeemError> {
        let cond = parse_condition_id(condition_id)?;
        let signer = self.signer.clone().ok_or(RedeemError::NoSigner)?;
        let from = self.wallet_address.ok_or(RedeemError::NoSigner)?;

        let mut last_err = RedeemError::Rpc("all RPC endpoints failed".into());
        for url in self.endpoints.iter().take(MAX_RPC_ATTEMPTS) {
            match self.redeem_via(url, signer.clone(), from, cond).await {
                Ok(()) => return Ok(()),
                Err(RedeemError::Rpc(msg)) if is_transient(&msg) => {
                    warn!("Redeem failed over to next RPC after {}: {}", url, msg);
                    last_err = RedeemError::Rpc(msg);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    async fn payout_denominator(&self, url: &str, cond: B256) -> Result<U256, String> {
        let provider = ProviderBuilder::new()
            .connect(url)
            .await
            .map_err(|e| e.to_string())?;
        let ctf = IConditionalTokens::new(CONDITIONAL_TOKENS, provider);
        ctf.payoutDenominator(cond)
            .call()
            .await
            .map_err(|e| e.to_string())
    }

    async fn redeem_via(
        &self,
        url: &str,
        signer: PrivateKeySigner,
        from: Address,
        cond: B256,
    ) -> Result<(), RedeemError> {
        let provider = ProviderBuilder::new()
            .wallet(signer)
            .connect(url)
            .await
            .map_err(|e| RedeemError::Rpc(e.to_string()))?;

        // Recheck immediately before submitting — a no-op redeem burns tokens
        let ctf = IConditionalTokens::new(CONDITIONAL_TOKENS, provider.clone());
        let denominator = ctf
            .payoutDenominator(cond)
            .call()
            .await
            .map_err(|e| RedeemError::Rpc(e.to_string()))?;
        if denominator == U256::ZERO {
            return Err(RedeemError::PayoutsNotSet);
        }

        for collateral in COLLATERALS {
            match submit_redeem(&provider, from, cond, collateral).await {
                Ok(true) => {
                    info!("Redeemed condition {} via collateral {}", cond, collateral);
                    return Ok(());
                }
                Ok(false) => {
                    info!(
                        "No tokens redeemed for condition {} with collateral {} — trying next",
                        cond, collateral
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(RedeemError::NoPositionsFound)
    }
}

/// Submit one redeemPositions transaction and validate the receipt.
///
/// Returns Ok(true) when a collateral-transfer log proves a payout.
/// Ok(false) is the status=1 receipt with no collateral-transfer log: the
/// wallet held no winning positions in this collection, and the caller
/// should try the next candidate collateral.
async fn submit_redeem<P: Provider + Clone>(
    provider: &P,
    from: Address,
    cond: B256,
    collateral: Address,
) -> Result<bool, RedeemError> {
    let ctf = IConditionalTokens::new(CONDITIONAL_TOKENS, provider.clone());
    let index_sets = vec![U256::from(1), U256::from(2)];

    let nonce = provider
        .get_transaction_count(from)
        .pending()
        .await
        .map_err(|e| RedeemError::Rpc(e.to_string()))?;
    let base_gas = provider
        .get_gas_price()
        .await
        .map_err(|e| RedeemError::Rpc(e.to_string()))?;
    let mut gas_price = base_gas + base_gas / 5; // 1.2x base

    let mut bumps = 0u32;
    let pending = loop {
        let call = ctf
            .redeemPositions(collateral, B256::ZERO, cond, index_sets.clone())
            .from(from)
            .nonce(nonce)
            .gas_price(gas_price);

        match call.send().await {
            Ok(pending) => break pending,
            Err(e) => {
                let msg = e.to_string();
                let lower = msg.to_lowercase();
                bumps += 1;
                if bumps > 3 {
                    return Err(RedeemError::Rpc(msg));
                }
                if lower.contains("replacement transaction underpriced") {
                    gas_price += gas_price / 2; // 1.5x and resubmit
                    debug!("Replacement underpriced, bumping gas to {}", gas_price);
                } else if lower.contains("nonce too low") {
                    return Err(RedeemError::NonceTooLow);
                } else if lower.contains("already known") {
                    // Same tx already in the mempool — give it time to land
                    debug!("Redeem tx already known, waiting before resubmit");
                    tokio::time::sleep(Duration::from_secs(10)).await;
                } else {
                    return Err(RedeemError::Rpc(msg));
                }
            }
        }
    };

    let receipt = pending
        .with_timeout(Some(RECEIPT_TIMEOUT))
        .get_receipt()
        .await
        .map_err(|e| RedeemError::Rpc(e.to_string()))?;

    if !receipt.status() {
        return Err(RedeemError::Reverted);
    }

    // Proof of payout is a log emitted by one of the known collateral
    // contracts; status=1 alone is not sufficient.
    let paid_out = receipt
        .inner
        .logs()
        .iter()
        .any(|log| COLLATERALS.contains(&log.address()));

    Ok(paid_out)
}

fn parse_condition_id(condition_id: &str) -> Result<B256, RedeemError> {
    B256::from_str(condition_id).map_err(|_| RedeemError::BadConditionId(condition_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: the error strings the RPC failover must recognize.
    /// Expected: 5xx/transport errors transient, contract errors not.
    #[test]
    fn test_transient_classification() {
        assert!(is_transient("HTTP 503 Service Unavailable"));
        assert!(is_transient("error sending request: 502 Bad Gateway"));
        assert!(is_transient("Connection refused"));
        assert!(is_transient("operation timeout"));
        assert!(is_transient("connection reset by peer"));
        assert!(is_transient("unexpected EOF"));
        assert!(!is_transient("execution reverted"));
        assert!(!is_transient("nonce too low"));
    }

    /// Scenario: well-formed vs malformed condition ids.
    /// Expected: 32-byte hex parses; a Gamma event id does not.
    #[test]
    fn test_condition_id_parsing() {
        let good = "0x571a3c90918ed50c6df079e880f40f73f4877b1b0636996e8bd2508b4d8e7ca3";
        assert!(parse_condition_id(good).is_ok());
        // Gamma event ids are short integers — never valid settlement keys
        assert!(parse_condition_id("12345").is_err());
        assert!(parse_condition_id("").is_err());
    }

    /// Scenario: user-configured RPC present vs absent.
    /// Expected: appended last after the four built-in fallbacks.
    #[test]
    fn test_endpoint_list() {
        let chain = ChainClient::new("", None);
        assert_eq!(chain.endpoints.len(), 4);

        let chain = ChainClient::new("https://my-rpc.example", None);
        assert_eq!(chain.endpoints.len(), 5);
        assert_eq!(chain.endpoints.last().unwrap(), "https://my-rpc.example");
        assert_eq!(chain.endpoints[0], "https://polygon.llamarpc.com");
    }

    /// Scenario: the no-token outcome vs real failures.
    /// Expected: only NoPositionsFound counts as no-token.
    #[test]
    fn test_no_tokens_classification() {
        assert!(RedeemError::NoPositionsFound.is_no_tokens());
        assert!(!RedeemError::Reverted.is_no_tokens());
        assert!(!RedeemError::PayoutsNotSet.is_no_tokens());
        assert!(!RedeemError::Rpc("boom".into()).is_no_tokens());
    }
}
