//! Swap routing client
//!
//! External swap-routing service used for collateral conversion legs.
//! Protected by a circuit breaker: repeated failures stop outbound calls
//! for a cooldown, then a half-open probe decides whether to close.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::Transaction;
use tracing::{debug, warn};

use crate::config::SwapConfig;
use crate::error::{Error, Result};

/// Quote for one swap leg
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapQuote {
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: u64,
    pub out_amount: u64,
    /// Minimum received under the quoted slippage
    pub other_amount_threshold: u64,
    pub slippage_bps: u16,
    /// Full router response, passed back verbatim when building
    raw: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuote {
    input_mint: String,
    output_mint: String,
    in_amount: String,
    out_amount: String,
    other_amount_threshold: String,
    #[serde(default)]
    slippage_bps: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    swap_transaction: String,
}

enum BreakerState {
    Closed { consecutive_failures: u32 },
    Open { since: Instant },
    HalfOpen,
}

/// Three-state circuit breaker
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState::Closed {
                consecutive_failures: 0,
            }),
            threshold,
            cooldown,
        }
    }

    /// Gate a call: open circuit rejects immediately; an elapsed
    /// cooldown lets one half-open probe through.
    pub fn check(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match &*state {
            BreakerState::Closed { .. } | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open { since } => {
                if since.elapsed() >= self.cooldown {
                    debug!("circuit half-open, allowing probe");
                    *state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(Error::VenueUnavailable(
                        "swap router circuit open".into(),
                    ))
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut state = self.state.lock().unwrap();
        *state = BreakerState::Closed {
            consecutive_failures: 0,
        };
    }

    pub fn on_failure(&self) {
        let mut state = self.state.lock().unwrap();
        match &mut *state {
            BreakerState::Closed {
                consecutive_failures,
            } => {
                *consecutive_failures += 1;
                if *consecutive_failures >= self.threshold {
                    warn!(
                        "swap router circuit opened after {} consecutive failures",
                        consecutive_failures
                    );
                    *state = BreakerState::Open {
                        since: Instant::now(),
                    };
                }
            }
            BreakerState::HalfOpen => {
                *state = BreakerState::Open {
                    since: Instant::now(),
                };
            }
            BreakerState::Open { .. } => {}
        }
    }
}

/// Swap-routing service client
pub struct SwapClient {
    http: reqwest::Client,
    endpoint: String,
    breaker: CircuitBreaker,
}

impl SwapClient {
    pub fn new(config: &SwapConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: config.router_endpoint.clone(),
            breaker: CircuitBreaker::new(
                config.breaker_threshold,
                Duration::from_secs(config.breaker_cooldown_secs),
            ),
        })
    }

    /// Quote a swap leg
    pub async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<SwapQuote> {
        self.breaker.check()?;
        let result = self
            .quote_inner(input_mint, output_mint, amount, slippage_bps)
            .await;
        self.record(&result);
        result
    }

    async fn quote_inner(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<SwapQuote> {
        let url = format!(
            "{}/quote?inputMint={}&outputMint={}&amount={}&slippageBps={}&asLegacyTransaction=true",
            self.endpoint, input_mint, output_mint, amount, slippage_bps
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::VenueUnavailable(format!("swap quote: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::VenueUnavailable(format!(
                "swap quote returned {}",
                response.status()
            )));
        }
        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::VenueUnavailable(format!("swap quote decode: {}", e)))?;
        let typed: RawQuote = serde_json::from_value(raw.clone())?;
        Ok(SwapQuote {
            input_mint: typed.input_mint,
            output_mint: typed.output_mint,
            in_amount: typed.in_amount.parse().unwrap_or(amount),
            out_amount: typed.out_amount.parse().unwrap_or(0),
            other_amount_threshold: typed.other_amount_threshold.parse().unwrap_or(0),
            slippage_bps: if typed.slippage_bps > 0 {
                typed.slippage_bps
            } else {
                slippage_bps
            },
            raw,
        })
    }

    /// Unsigned swap transaction for a quote. `wrap_sol` controls the
    /// router's native-SOL handling: entries wrap the input, while
    /// withdraw conversions keep the output as wrapped SOL so
    /// downstream token transfers can draw on it.
    pub async fn swap_transaction(
        &self,
        quote: &SwapQuote,
        owner: &Pubkey,
        wrap_sol: bool,
    ) -> Result<Transaction> {
        self.breaker.check()?;
        let result = self.swap_inner(quote, owner, wrap_sol).await;
        self.record(&result);
        result
    }

    async fn swap_inner(
        &self,
        quote: &SwapQuote,
        owner: &Pubkey,
        wrap_sol: bool,
    ) -> Result<Transaction> {
        let url = format!("{}/swap", self.endpoint);
        let body = json!({
            "userPublicKey": owner.to_string(),
            "quoteResponse": quote.raw,
            "wrapAndUnwrapSol": wrap_sol,
            "asLegacyTransaction": true,
        });
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::VenueUnavailable(format!("swap build: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::VenueUnavailable(format!(
                "swap build returned {}",
                response.status()
            )));
        }
        let swap: SwapResponse = response
            .json()
            .await
            .map_err(|e| Error::VenueUnavailable(format!("swap build decode: {}", e)))?;
        decode_transaction(&swap.swap_transaction)
    }

    fn record<T>(&self, result: &Result<T>) {
        match result {
            Ok(_) => self.breaker.on_success(),
            // Only upstream availability trips the breaker
            Err(Error::VenueUnavailable(_)) => self.breaker.on_failure(),
            Err(_) => {}
        }
    }

    /// Connectivity probe against a known pair
    pub async fn healthy(&self) -> bool {
        let sol = crate::pools::tokens::WSOL_MINT;
        let usdc = crate::pools::tokens::USDC_MINT;
        self.quote(sol, usdc, 1_000_000, 50).await.is_ok()
    }
}

/// Base64-encoded bincode legacy transaction from the router
fn decode_transaction(encoded: &str) -> Result<Transaction> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| Error::Serialization(format!("swap tx base64: {}", e)))?;
    bincode::deserialize(&bytes)
        .map_err(|e| Error::Serialization(format!("swap tx decode: {}", e)))
}

/// Swap legs the composer needs for a collateral/pair relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapPlan {
    /// Collateral is one pool side: swap half to the other side
    SplitHalf { target_mint: String },
    /// Collateral is neither side: one leg per side
    TwoLegs {
        mint_a: String,
        mint_b: String,
    },
}

/// Decide the swap legs for collateral `m` entering pool (`a`, `b`)
pub fn plan_swaps(collateral: &str, mint_a: &str, mint_b: &str) -> SwapPlan {
    if collateral == mint_a {
        SwapPlan::SplitHalf {
            target_mint: mint_b.to_string(),
        }
    } else if collateral == mint_b {
        SwapPlan::SplitHalf {
            target_mint: mint_a.to_string(),
        }
    } else {
        SwapPlan::TwoLegs {
            mint_a: mint_a.to_string(),
            mint_b: mint_b.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        assert!(breaker.check().is_ok());
        breaker.on_failure();
        breaker.on_failure();
        assert!(breaker.check().is_ok());
        breaker.on_failure();
        assert!(matches!(
            breaker.check(),
            Err(Error::VenueUnavailable(_))
        ));
    }

    #[test]
    fn test_breaker_success_resets_count() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.on_failure();
        breaker.on_failure();
        breaker.on_success();
        breaker.on_failure();
        breaker.on_failure();
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn test_breaker_half_open_probe() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.on_failure();
        // Cooldown of zero: next check transitions to half-open
        assert!(breaker.check().is_ok());
        // Probe failure reopens
        breaker.on_failure();
        let breaker2 = CircuitBreaker::new(1, Duration::from_secs(30));
        breaker2.on_failure();
        assert!(breaker2.check().is_err());
    }

    #[test]
    fn test_breaker_closes_on_probe_success() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.on_failure();
        assert!(breaker.check().is_ok()); // half-open
        breaker.on_success();
        assert!(breaker.check().is_ok());
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn test_plan_swaps() {
        let sol = "So11111111111111111111111111111111111111112";
        let usdc = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
        let bonk = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";

        assert_eq!(
            plan_swaps(sol, sol, usdc),
            SwapPlan::SplitHalf {
                target_mint: usdc.to_string()
            }
        );
        assert_eq!(
            plan_swaps(usdc, sol, usdc),
            SwapPlan::SplitHalf {
                target_mint: sol.to_string()
            }
        );
        assert_eq!(
            plan_swaps(bonk, sol, usdc),
            SwapPlan::TwoLegs {
                mint_a: sol.to_string(),
                mint_b: usdc.to_string()
            }
        );
    }
}
