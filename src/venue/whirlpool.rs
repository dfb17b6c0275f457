//! Orca Whirlpools adapter
//!
//! # WARNING: program constants may change without notice
//! Discriminators and layout offsets follow the deployed Whirlpool
//! program; verify against the current IDL if decoding breaks.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use solana_account_decoder::UiAccountData;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_request::TokenAccountsFilter;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{Distribution, Granularity, Pool, Position, TokenInfo, Venue};

use super::{math, OpenBuild, VenueAdapter};

/// Whirlpool program ID
pub const WHIRLPOOL_PROGRAM_ID_STR: &str = "whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc";

lazy_static::lazy_static! {
    pub static ref WHIRLPOOL_PROGRAM_ID: Pubkey =
        Pubkey::from_str(WHIRLPOOL_PROGRAM_ID_STR).expect("Invalid whirlpool program ID");
}

/// Ticks covered by one tick-array account
pub const TICKS_PER_ARRAY: i32 = 88;

/// Instruction discriminators: SHA-256("global:<name>")[0..8]
#[allow(non_snake_case)]
pub mod DISCRIMINATORS {
    pub const INITIALIZE_TICK_ARRAY: [u8; 8] = [11, 188, 193, 214, 141, 91, 149, 184];
    pub const OPEN_POSITION: [u8; 8] = [135, 128, 47, 77, 15, 152, 240, 49];
    pub const INCREASE_LIQUIDITY: [u8; 8] = [46, 156, 243, 118, 13, 205, 251, 178];
    pub const DECREASE_LIQUIDITY: [u8; 8] = [160, 38, 208, 111, 104, 91, 44, 1];
    pub const UPDATE_FEES_AND_REWARDS: [u8; 8] = [154, 230, 250, 13, 236, 209, 75, 223];
    pub const COLLECT_FEES: [u8; 8] = [164, 152, 207, 99, 30, 186, 19, 182];
    pub const CLOSE_POSITION: [u8; 8] = [123, 134, 81, 0, 49, 68, 98, 98];
}

/// Account discriminators (first 8 bytes of account data)
#[allow(non_snake_case)]
pub mod ACCOUNT_DISCRIMINATORS {
    pub const POSITION: [u8; 8] = [170, 188, 143, 228, 122, 64, 247, 208];
}

/// Program error codes from the Whirlpool IDL
pub mod errors {
    pub const TOKEN_MAX_EXCEEDED: u32 = 6017;
    pub const POOL_PAUSED: u32 = 6038;
}

/// Position account layout offsets
mod position_layout {
    pub const WHIRLPOOL: usize = 8;
    pub const POSITION_MINT: usize = 40;
    pub const LIQUIDITY: usize = 72;
    pub const TICK_LOWER: usize = 88;
    pub const TICK_UPPER: usize = 92;
    pub const FEE_OWED_A: usize = 112;
    pub const FEE_OWED_B: usize = 136;
    pub const MIN_LEN: usize = 144;
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhirlpoolToken {
    pub mint: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhirlpoolInfo {
    pub address: String,
    pub token_a: WhirlpoolToken,
    pub token_b: WhirlpoolToken,
    pub tick_spacing: u16,
    pub price: f64,
    #[serde(default)]
    pub tvl: f64,
    #[serde(default)]
    pub volume: Option<WhirlpoolVolume>,
    /// Fraction, e.g. 0.003
    #[serde(default)]
    pub lp_fee_rate: f64,
    #[serde(default)]
    pub total_apr: Option<WhirlpoolApr>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhirlpoolVolume {
    #[serde(default)]
    pub day: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhirlpoolApr {
    #[serde(default)]
    pub day: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct WhirlpoolList {
    whirlpools: Vec<WhirlpoolInfo>,
}

pub struct WhirlpoolAdapter {
    http: reqwest::Client,
    api_base: String,
    rpc: Arc<RpcClient>,
}

impl WhirlpoolAdapter {
    pub fn new(http: reqwest::Client, api_base: String, rpc: Arc<RpcClient>) -> Self {
        Self {
            http,
            api_base,
            rpc,
        }
    }

    pub async fn fetch_pools(&self) -> Result<Vec<WhirlpoolInfo>> {
        let url = format!("{}/v1/whirlpool/list", self.api_base);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::VenueUnavailable(format!("whirlpool index: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::VenueUnavailable(format!(
                "whirlpool index returned {}",
                response.status()
            )));
        }
        let list: WhirlpoolList = response
            .json()
            .await
            .map_err(|e| Error::VenueUnavailable(format!("whirlpool index decode: {}", e)))?;
        Ok(list.whirlpools)
    }

    pub fn normalize(&self, info: &WhirlpoolInfo) -> Result<Pool> {
        if info.tick_spacing == 0 {
            return Err(Error::UnsupportedPoolType(format!(
                "{} has no tick grid",
                info.address
            )));
        }
        let raw_price = info.price
            * 10f64.powi(info.token_b.decimals as i32 - info.token_a.decimals as i32);
        Ok(Pool {
            address: info.address.clone(),
            venue: Venue::Whirlpool,
            token_a: TokenInfo {
                mint: info.token_a.mint.clone(),
                symbol: info.token_a.symbol.clone(),
                decimals: info.token_a.decimals,
            },
            token_b: TokenInfo {
                mint: info.token_b.mint.clone(),
                symbol: info.token_b.symbol.clone(),
                decimals: info.token_b.decimals,
            },
            current_price: info.price,
            active_index: math::price_to_tick(raw_price),
            granularity: Granularity::TickSpacing(info.tick_spacing),
            tvl_usd: info.tvl,
            volume_24h_usd: info.volume.as_ref().map(|v| v.day).unwrap_or(0.0),
            fee_bps: (info.lp_fee_rate * 10_000.0).round() as u16,
            apr: info.total_apr.as_ref().map(|a| a.day).unwrap_or(0.0) * 365.0,
            risk_score: 0,
        })
    }

    fn position_pda(&self, position_mint: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(
            &[b"position", position_mint.as_ref()],
            &WHIRLPOOL_PROGRAM_ID,
        )
        .0
    }

    fn tick_array_start(&self, tick: i32, spacing: u16) -> i32 {
        let span = spacing as i32 * TICKS_PER_ARRAY;
        tick.div_euclid(span) * span
    }

    fn tick_array_pda(&self, whirlpool: &Pubkey, start_tick: i32) -> Pubkey {
        Pubkey::find_program_address(
            &[
                b"tick_array",
                whirlpool.as_ref(),
                start_tick.to_string().as_bytes(),
            ],
            &WHIRLPOOL_PROGRAM_ID,
        )
        .0
    }

    fn vault(&self, whirlpool: &Pubkey, mint: &Pubkey) -> Pubkey {
        spl_associated_token_account::get_associated_token_address(whirlpool, mint)
    }
}

#[async_trait]
impl VenueAdapter for WhirlpoolAdapter {
    fn venue(&self) -> Venue {
        Venue::Whirlpool
    }

    async fn list_pools(&self) -> Result<Vec<Pool>> {
        let infos = self.fetch_pools().await?;
        Ok(infos
            .iter()
            .filter_map(|info| self.normalize(info).ok())
            .collect())
    }

    async fn describe_pool(&self, address: &str) -> Result<Pool> {
        let pools = self.fetch_pools().await?;
        let info = pools
            .into_iter()
            .find(|p| p.address == address)
            .ok_or_else(|| Error::NotFound(format!("whirlpool {}", address)))?;
        self.normalize(&info)
    }

    async fn build_open(
        &self,
        pool: &Pool,
        range: (i32, i32),
        amount_a: u64,
        amount_b: u64,
        owner: &Pubkey,
        _distribution: Distribution,
        slippage_bps: u16,
    ) -> Result<OpenBuild> {
        let whirlpool = parse_pubkey(&pool.address)?;
        let mint_a = parse_pubkey(&pool.token_a.mint)?;
        let mint_b = parse_pubkey(&pool.token_b.mint)?;
        let (lower, upper) = range;
        let spacing = match pool.granularity {
            Granularity::TickSpacing(s) => s,
            Granularity::BinStep(_) => {
                return Err(Error::Validation("whirlpool pool with bin step".into()))
            }
        };

        let mut instructions = Vec::new();

        // Tick arrays for both bounds; dedup when they share one
        let lower_start = self.tick_array_start(lower, spacing);
        let upper_start = self.tick_array_start(upper, spacing);
        let mut starts = vec![lower_start];
        if upper_start != lower_start {
            starts.push(upper_start);
        }
        for start in &starts {
            let mut data = Vec::with_capacity(12);
            data.extend_from_slice(&DISCRIMINATORS::INITIALIZE_TICK_ARRAY);
            data.extend_from_slice(&start.to_le_bytes());
            instructions.push(Instruction {
                program_id: *WHIRLPOOL_PROGRAM_ID,
                accounts: vec![
                    AccountMeta::new(whirlpool, false),
                    AccountMeta::new(*owner, true),
                    AccountMeta::new(self.tick_array_pda(&whirlpool, *start), false),
                    AccountMeta::new_readonly(solana_sdk::system_program::ID, false),
                ],
                data,
            });
        }

        // Fresh position-NFT mint; the PDA and token account derive from it
        let position_mint = Keypair::new();
        let position = self.position_pda(&position_mint.pubkey());
        let position_token_account = spl_associated_token_account::get_associated_token_address(
            owner,
            &position_mint.pubkey(),
        );

        let mut data = Vec::with_capacity(16);
        data.extend_from_slice(&DISCRIMINATORS::OPEN_POSITION);
        data.extend_from_slice(&lower.to_le_bytes());
        data.extend_from_slice(&upper.to_le_bytes());
        instructions.push(Instruction {
            program_id: *WHIRLPOOL_PROGRAM_ID,
            accounts: vec![
                AccountMeta::new(*owner, true),
                AccountMeta::new_readonly(*owner, true),
                AccountMeta::new(position, false),
                AccountMeta::new(position_mint.pubkey(), true),
                AccountMeta::new(position_token_account, false),
                AccountMeta::new_readonly(whirlpool, false),
                AccountMeta::new_readonly(spl_token::ID, false),
                AccountMeta::new_readonly(solana_sdk::system_program::ID, false),
                AccountMeta::new_readonly(solana_sdk::sysvar::rent::ID, false),
                AccountMeta::new_readonly(spl_associated_token_account::ID, false),
            ],
            data,
        });

        // Liquidity target plus slippage-bounded token maxima
        let quote = self.quote_liquidity(pool, range, amount_a, amount_b, slippage_bps)?;
        let mut data = Vec::with_capacity(40);
        data.extend_from_slice(&DISCRIMINATORS::INCREASE_LIQUIDITY);
        data.extend_from_slice(&quote.liquidity.to_le_bytes());
        data.extend_from_slice(&quote.worst_a.to_le_bytes());
        data.extend_from_slice(&quote.worst_b.to_le_bytes());
        instructions.push(Instruction {
            program_id: *WHIRLPOOL_PROGRAM_ID,
            accounts: vec![
                AccountMeta::new(whirlpool, false),
                AccountMeta::new_readonly(spl_token::ID, false),
                AccountMeta::new_readonly(*owner, true),
                AccountMeta::new(position, false),
                AccountMeta::new_readonly(position_token_account, false),
                AccountMeta::new(
                    spl_associated_token_account::get_associated_token_address(owner, &mint_a),
                    false,
                ),
                AccountMeta::new(
                    spl_associated_token_account::get_associated_token_address(owner, &mint_b),
                    false,
                ),
                AccountMeta::new(self.vault(&whirlpool, &mint_a), false),
                AccountMeta::new(self.vault(&whirlpool, &mint_b), false),
                AccountMeta::new(self.tick_array_pda(&whirlpool, lower_start), false),
                AccountMeta::new(self.tick_array_pda(&whirlpool, upper_start), false),
            ],
            data,
        });

        let position_id = position_mint.pubkey().to_string();
        Ok(OpenBuild {
            instructions,
            aux_signers: vec![position_mint],
            position_id,
        })
    }

    async fn build_decrease(
        &self,
        position: &Position,
        bps_to_remove: u16,
        close_if_full: bool,
    ) -> Result<Vec<Instruction>> {
        let whirlpool = parse_pubkey(&position.pool)?;
        let owner = parse_pubkey(&position.wallet)?;
        let position_mint = parse_pubkey(&position.id)?;
        let position_pda = self.position_pda(&position_mint);
        let position_token_account =
            spl_associated_token_account::get_associated_token_address(&owner, &position_mint);

        let liquidity_delta =
            (position.liquidity / 10_000u128) * (bps_to_remove.min(10_000) as u128);

        let mut data = Vec::with_capacity(40);
        data.extend_from_slice(&DISCRIMINATORS::DECREASE_LIQUIDITY);
        data.extend_from_slice(&liquidity_delta.to_le_bytes());
        data.extend_from_slice(&0u64.to_le_bytes()); // token_min_a
        data.extend_from_slice(&0u64.to_le_bytes()); // token_min_b

        let mut instructions = vec![Instruction {
            program_id: *WHIRLPOOL_PROGRAM_ID,
            accounts: vec![
                AccountMeta::new(whirlpool, false),
                AccountMeta::new_readonly(spl_token::ID, false),
                AccountMeta::new_readonly(owner, true),
                AccountMeta::new(position_pda, false),
                AccountMeta::new_readonly(position_token_account, false),
            ],
            data,
        }];

        if bps_to_remove >= 10_000 && close_if_full {
            instructions.extend(self.build_collect_fees(position).await?);
            let mut data = Vec::with_capacity(8);
            data.extend_from_slice(&DISCRIMINATORS::CLOSE_POSITION);
            instructions.push(Instruction {
                program_id: *WHIRLPOOL_PROGRAM_ID,
                accounts: vec![
                    AccountMeta::new(owner, true),
                    AccountMeta::new(owner, false),
                    AccountMeta::new(position_pda, false),
                    AccountMeta::new(position_mint, false),
                    AccountMeta::new(position_token_account, false),
                    AccountMeta::new_readonly(spl_token::ID, false),
                ],
                data,
            });
        }

        Ok(instructions)
    }

    async fn build_collect_fees(&self, position: &Position) -> Result<Vec<Instruction>> {
        let whirlpool = parse_pubkey(&position.pool)?;
        let owner = parse_pubkey(&position.wallet)?;
        let position_mint = parse_pubkey(&position.id)?;
        let position_pda = self.position_pda(&position_mint);
        let position_token_account =
            spl_associated_token_account::get_associated_token_address(&owner, &position_mint);

        // Fees must be checkpointed on-chain before they can be collected
        let mut update_data = Vec::with_capacity(8);
        update_data.extend_from_slice(&DISCRIMINATORS::UPDATE_FEES_AND_REWARDS);
        let update = Instruction {
            program_id: *WHIRLPOOL_PROGRAM_ID,
            accounts: vec![
                AccountMeta::new(whirlpool, false),
                AccountMeta::new(position_pda, false),
            ],
            data: update_data,
        };

        let mut collect_data = Vec::with_capacity(8);
        collect_data.extend_from_slice(&DISCRIMINATORS::COLLECT_FEES);
        let collect = Instruction {
            program_id: *WHIRLPOOL_PROGRAM_ID,
            accounts: vec![
                AccountMeta::new(whirlpool, false),
                AccountMeta::new_readonly(owner, true),
                AccountMeta::new(position_pda, false),
                AccountMeta::new_readonly(position_token_account, false),
                AccountMeta::new_readonly(spl_token::ID, false),
            ],
            data: collect_data,
        };

        Ok(vec![update, collect])
    }

    async fn enumerate_positions(&self, wallet: &Pubkey) -> Result<Vec<Position>> {
        // NFT venue: scan token accounts for single-unit mints, then read
        // the position account derived from each mint
        let candidate_mints = position_nft_candidates(&self.rpc, wallet).await?;
        if candidate_mints.is_empty() {
            return Ok(vec![]);
        }

        let pdas: Vec<Pubkey> = candidate_mints
            .iter()
            .map(|mint| self.position_pda(mint))
            .collect();
        let accounts = self
            .rpc
            .get_multiple_accounts(&pdas)
            .await
            .map_err(|e| Error::RpcUnavailable(format!("whirlpool position read: {}", e)))?;

        let mut positions = Vec::new();
        for (mint, account) in candidate_mints.iter().zip(accounts) {
            let Some(account) = account else { continue };
            match decode_position(mint, wallet, &account.data) {
                Ok(mut position) => {
                    match self.describe_pool(&position.pool).await {
                        Ok(pool) => enrich_tick_position(&mut position, &pool),
                        Err(e) => debug!("pool lookup failed for {}: {}", position.pool, e),
                    }
                    positions.push(position);
                }
                Err(e) => warn!("skipping non-position mint {}: {}", mint, e),
            }
        }
        Ok(positions)
    }
}

/// Mints of token accounts holding exactly one unit of a zero-decimal
/// token; the NFT shape both tick venues use for positions.
pub async fn position_nft_candidates(rpc: &RpcClient, wallet: &Pubkey) -> Result<Vec<Pubkey>> {
    let accounts = rpc
        .get_token_accounts_by_owner(wallet, TokenAccountsFilter::ProgramId(spl_token::ID))
        .await
        .map_err(|e| Error::RpcUnavailable(format!("token account scan: {}", e)))?;

    let mut mints = Vec::new();
    for keyed in accounts {
        let UiAccountData::Json(parsed) = &keyed.account.data else {
            continue;
        };
        let info = &parsed.parsed["info"];
        let amount = info["tokenAmount"]["amount"].as_str().unwrap_or("0");
        let decimals = info["tokenAmount"]["decimals"].as_u64().unwrap_or(255);
        if amount == "1" && decimals == 0 {
            if let Some(mint) = info["mint"].as_str().and_then(|m| Pubkey::from_str(m).ok()) {
                mints.push(mint);
            }
        }
    }
    Ok(mints)
}

/// Derive prices, amounts and the in-range flag from the live pool
pub fn enrich_tick_position(position: &mut Position, pool: &Pool) {
    position.in_range = position.contains_index(pool.active_index);
    position.lower_price = math::tick_to_price(position.lower_index);
    position.upper_price = math::tick_to_price(position.upper_index);
    let (amount_a, amount_b) = math::amounts_at_tick(
        position.liquidity,
        pool.active_index,
        position.lower_index,
        position.upper_index,
    );
    position.amount_a = amount_a;
    position.amount_b = amount_b;
    position.fee_a_ui = position.fee_a as f64 / 10f64.powi(pool.token_a.decimals as i32);
    position.fee_b_ui = position.fee_b as f64 / 10f64.powi(pool.token_b.decimals as i32);
}

fn parse_pubkey(s: &str) -> Result<Pubkey> {
    Pubkey::from_str(s).map_err(|e| Error::Validation(format!("invalid pubkey {}: {}", s, e)))
}

fn decode_position(mint: &Pubkey, wallet: &Pubkey, data: &[u8]) -> Result<Position> {
    if data.len() < position_layout::MIN_LEN {
        return Err(Error::Serialization("position account too short".into()));
    }
    if data[..8] != ACCOUNT_DISCRIMINATORS::POSITION {
        return Err(Error::Serialization("not a whirlpool position".into()));
    }
    let whirlpool =
        Pubkey::try_from(&data[position_layout::WHIRLPOOL..position_layout::WHIRLPOOL + 32])
            .map_err(|_| Error::Serialization("bad whirlpool bytes".into()))?;
    let stored_mint = Pubkey::try_from(
        &data[position_layout::POSITION_MINT..position_layout::POSITION_MINT + 32],
    )
    .map_err(|_| Error::Serialization("bad mint bytes".into()))?;
    if stored_mint != *mint {
        return Err(Error::Serialization("position mint mismatch".into()));
    }
    let liquidity = u128::from_le_bytes(
        data[position_layout::LIQUIDITY..position_layout::LIQUIDITY + 16]
            .try_into()
            .unwrap(),
    );
    Ok(Position {
        id: mint.to_string(),
        wallet: wallet.to_string(),
        pool: whirlpool.to_string(),
        venue: Venue::Whirlpool,
        lower_index: i32::from_le_bytes(
            data[position_layout::TICK_LOWER..position_layout::TICK_LOWER + 4]
                .try_into()
                .unwrap(),
        ),
        upper_index: i32::from_le_bytes(
            data[position_layout::TICK_UPPER..position_layout::TICK_UPPER + 4]
                .try_into()
                .unwrap(),
        ),
        lower_price: 0.0,
        upper_price: 0.0,
        liquidity,
        amount_a: 0,
        amount_b: 0,
        fee_a: u64::from_le_bytes(
            data[position_layout::FEE_OWED_A..position_layout::FEE_OWED_A + 8]
                .try_into()
                .unwrap(),
        ),
        fee_b: u64::from_le_bytes(
            data[position_layout::FEE_OWED_B..position_layout::FEE_OWED_B + 8]
                .try_into()
                .unwrap(),
        ),
        fee_a_ui: 0.0,
        fee_b_ui: 0.0,
        in_range: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pools::tokens;

    fn adapter() -> WhirlpoolAdapter {
        WhirlpoolAdapter::new(
            reqwest::Client::new(),
            "https://api.mainnet.orca.so".into(),
            Arc::new(RpcClient::new("http://127.0.0.1:8899".into())),
        )
    }

    fn test_pool() -> Pool {
        Pool {
            address: Pubkey::new_unique().to_string(),
            venue: Venue::Whirlpool,
            token_a: TokenInfo {
                mint: tokens::WSOL_MINT.into(),
                symbol: "SOL".into(),
                decimals: 9,
            },
            token_b: TokenInfo {
                mint: tokens::USDC_MINT.into(),
                symbol: "USDC".into(),
                decimals: 6,
            },
            current_price: 150.0,
            active_index: 1280,
            granularity: Granularity::TickSpacing(64),
            tvl_usd: 2_000_000.0,
            volume_24h_usd: 800_000.0,
            fee_bps: 30,
            apr: 40.0,
            risk_score: 3,
        }
    }

    #[test]
    fn test_tick_array_start() {
        let a = adapter();
        // span = 64 * 88 = 5632
        assert_eq!(a.tick_array_start(0, 64), 0);
        assert_eq!(a.tick_array_start(5631, 64), 0);
        assert_eq!(a.tick_array_start(5632, 64), 5632);
        assert_eq!(a.tick_array_start(-1, 64), -5632);
    }

    #[tokio::test]
    async fn test_build_open_shape() {
        let a = adapter();
        let pool = test_pool();
        let owner = Pubkey::new_unique();
        let build = a
            .build_open(
                &pool,
                (960, 1600),
                1_000_000_000,
                150_000_000,
                &owner,
                Distribution::Spot,
                300,
            )
            .await
            .unwrap();

        // Both bounds share one tick array here: init, open, increase
        assert_eq!(build.instructions.len(), 3);
        assert_eq!(build.aux_signers.len(), 1);
        assert_eq!(build.instructions[1].data[..8], DISCRIMINATORS::OPEN_POSITION);
        assert_eq!(
            build.instructions[2].data[..8],
            DISCRIMINATORS::INCREASE_LIQUIDITY
        );
    }

    #[tokio::test]
    async fn test_collect_fees_emits_update_first() {
        let a = adapter();
        let position = Position {
            id: Pubkey::new_unique().to_string(),
            wallet: Pubkey::new_unique().to_string(),
            pool: Pubkey::new_unique().to_string(),
            venue: Venue::Whirlpool,
            lower_index: 960,
            upper_index: 1600,
            lower_price: 0.0,
            upper_price: 0.0,
            liquidity: 1_000_000,
            amount_a: 0,
            amount_b: 0,
            fee_a: 0,
            fee_b: 0,
            fee_a_ui: 0.0,
            fee_b_ui: 0.0,
            in_range: true,
        };
        let ixs = a.build_collect_fees(&position).await.unwrap();
        assert_eq!(ixs.len(), 2);
        assert_eq!(ixs[0].data[..8], DISCRIMINATORS::UPDATE_FEES_AND_REWARDS);
        assert_eq!(ixs[1].data[..8], DISCRIMINATORS::COLLECT_FEES);
    }

    #[test]
    fn test_decode_position_checks_discriminator() {
        let mint = Pubkey::new_unique();
        let wallet = Pubkey::new_unique();
        let data = vec![0u8; position_layout::MIN_LEN];
        assert!(decode_position(&mint, &wallet, &data).is_err());

        let mut data = vec![0u8; position_layout::MIN_LEN];
        data[..8].copy_from_slice(&ACCOUNT_DISCRIMINATORS::POSITION);
        let whirlpool = Pubkey::new_unique();
        data[position_layout::WHIRLPOOL..position_layout::WHIRLPOOL + 32]
            .copy_from_slice(whirlpool.as_ref());
        data[position_layout::POSITION_MINT..position_layout::POSITION_MINT + 32]
            .copy_from_slice(mint.as_ref());
        data[position_layout::TICK_LOWER..position_layout::TICK_LOWER + 4]
            .copy_from_slice(&960i32.to_le_bytes());
        data[position_layout::TICK_UPPER..position_layout::TICK_UPPER + 4]
            .copy_from_slice(&1600i32.to_le_bytes());
        let position = decode_position(&mint, &wallet, &data).unwrap();
        assert_eq!(position.pool, whirlpool.to_string());
        assert_eq!((position.lower_index, position.upper_index), (960, 1600));
    }

    #[test]
    fn test_enrich_sets_in_range() {
        let pool = test_pool();
        let mut position = Position {
            id: "m".into(),
            wallet: "w".into(),
            pool: pool.address.clone(),
            venue: Venue::Whirlpool,
            lower_index: 960,
            upper_index: 1600,
            lower_price: 0.0,
            upper_price: 0.0,
            liquidity: 1_000_000_000,
            amount_a: 0,
            amount_b: 0,
            fee_a: 2_000_000,
            fee_b: 3_000_000,
            fee_a_ui: 0.0,
            fee_b_ui: 0.0,
            in_range: false,
        };
        enrich_tick_position(&mut position, &pool);
        assert!(position.in_range);
        assert!(position.amount_a > 0);
        assert!(position.amount_b > 0);
        assert!((position.fee_a_ui - 0.002).abs() < 1e-9);
        assert!((position.fee_b_ui - 3.0).abs() < 1e-9);
    }
}
