//! Raydium CLMM adapter
//!
//! # WARNING: program constants may change without notice
//! Discriminators and layout offsets follow the deployed CLMM program;
//! verify against the current IDL if decoding breaks.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{Distribution, Granularity, Pool, Position, TokenInfo, Venue};

use super::whirlpool::{enrich_tick_position, position_nft_candidates};
use super::{OpenBuild, VenueAdapter};

/// CLMM program ID
pub const CLMM_PROGRAM_ID_STR: &str = "CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK";

lazy_static::lazy_static! {
    pub static ref CLMM_PROGRAM_ID: Pubkey =
        Pubkey::from_str(CLMM_PROGRAM_ID_STR).expect("Invalid CLMM program ID");
}

/// Ticks covered by one tick-array account
pub const TICKS_PER_ARRAY: i32 = 60;

/// Instruction discriminators: SHA-256("global:<name>")[0..8]
#[allow(non_snake_case)]
pub mod DISCRIMINATORS {
    pub const OPEN_POSITION_V2: [u8; 8] = [77, 184, 74, 214, 112, 86, 241, 199];
    pub const INCREASE_LIQUIDITY_V2: [u8; 8] = [133, 29, 89, 223, 69, 238, 176, 10];
    pub const DECREASE_LIQUIDITY_V2: [u8; 8] = [58, 127, 188, 62, 79, 82, 196, 96];
    pub const CLOSE_POSITION: [u8; 8] = [123, 134, 81, 0, 49, 68, 98, 98];
}

/// Account discriminators (first 8 bytes of account data)
#[allow(non_snake_case)]
pub mod ACCOUNT_DISCRIMINATORS {
    pub const PERSONAL_POSITION: [u8; 8] = [70, 111, 150, 126, 230, 15, 25, 117];
}

/// Program error codes from the CLMM IDL
pub mod errors {
    pub const PRICE_SLIPPAGE_CHECK: u32 = 6021;
    pub const POOL_DISABLED: u32 = 6007;
}

/// PersonalPositionState layout offsets
mod position_layout {
    pub const NFT_MINT: usize = 9;
    pub const POOL_ID: usize = 41;
    pub const TICK_LOWER: usize = 73;
    pub const TICK_UPPER: usize = 77;
    pub const LIQUIDITY: usize = 81;
    pub const FEE_OWED_0: usize = 129;
    pub const FEE_OWED_1: usize = 137;
    pub const MIN_LEN: usize = 145;
}

#[derive(Debug, Clone, Deserialize)]
pub struct RaydiumMint {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaydiumPoolInfo {
    pub id: String,
    /// "Concentrated" for CLMM pools; the API also serves standard AMMs
    #[serde(default)]
    pub r#type: String,
    pub mint_a: RaydiumMint,
    pub mint_b: RaydiumMint,
    pub price: f64,
    #[serde(default)]
    pub tvl: f64,
    #[serde(default)]
    pub day: Option<RaydiumDayStats>,
    /// Fraction, e.g. 0.0025
    #[serde(default)]
    pub fee_rate: f64,
    #[serde(default)]
    pub config: Option<RaydiumPoolConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RaydiumDayStats {
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub apr: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaydiumPoolConfig {
    pub tick_spacing: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct RaydiumListEnvelope {
    data: RaydiumListPage,
}

#[derive(Debug, Clone, Deserialize)]
struct RaydiumListPage {
    data: Vec<RaydiumPoolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct RaydiumIdsEnvelope {
    data: Vec<Option<RaydiumPoolInfo>>,
}

pub struct ClmmAdapter {
    http: reqwest::Client,
    api_base: String,
    rpc: Arc<RpcClient>,
}

impl ClmmAdapter {
    pub fn new(http: reqwest::Client, api_base: String, rpc: Arc<RpcClient>) -> Self {
        Self {
            http,
            api_base,
            rpc,
        }
    }

    pub async fn fetch_pools(&self) -> Result<Vec<RaydiumPoolInfo>> {
        let url = format!(
            "{}/pools/info/list?poolType=concentrated&poolSortField=default&sortType=desc&pageSize=500&page=1",
            self.api_base
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::VenueUnavailable(format!("clmm index: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::VenueUnavailable(format!(
                "clmm index returned {}",
                response.status()
            )));
        }
        let envelope: RaydiumListEnvelope = response
            .json()
            .await
            .map_err(|e| Error::VenueUnavailable(format!("clmm index decode: {}", e)))?;
        Ok(envelope.data.data)
    }

    pub fn normalize(&self, info: &RaydiumPoolInfo) -> Result<Pool> {
        let tick_spacing = info
            .config
            .as_ref()
            .map(|c| c.tick_spacing)
            .unwrap_or(0);
        if tick_spacing == 0 || (!info.r#type.is_empty() && info.r#type != "Concentrated") {
            // The Raydium index also serves constant-product pools
            return Err(Error::UnsupportedPoolType(format!(
                "{} is not a concentrated pool",
                info.id
            )));
        }
        let raw_price =
            info.price * 10f64.powi(info.mint_b.decimals as i32 - info.mint_a.decimals as i32);
        Ok(Pool {
            address: info.id.clone(),
            venue: Venue::Clmm,
            token_a: TokenInfo {
                mint: info.mint_a.address.clone(),
                symbol: info.mint_a.symbol.clone(),
                decimals: info.mint_a.decimals,
            },
            token_b: TokenInfo {
                mint: info.mint_b.address.clone(),
                symbol: info.mint_b.symbol.clone(),
                decimals: info.mint_b.decimals,
            },
            current_price: info.price,
            active_index: super::math::price_to_tick(raw_price),
            granularity: Granularity::TickSpacing(tick_spacing),
            tvl_usd: info.tvl,
            volume_24h_usd: info.day.as_ref().map(|d| d.volume).unwrap_or(0.0),
            fee_bps: (info.fee_rate * 10_000.0).round() as u16,
            apr: info.day.as_ref().map(|d| d.apr).unwrap_or(0.0),
            risk_score: 0,
        })
    }

    fn position_pda(&self, nft_mint: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[b"position", nft_mint.as_ref()], &CLMM_PROGRAM_ID).0
    }

    fn tick_array_pda(&self, pool: &Pubkey, start_tick: i32) -> Pubkey {
        Pubkey::find_program_address(
            &[b"tick_array", pool.as_ref(), &start_tick.to_be_bytes()],
            &CLMM_PROGRAM_ID,
        )
        .0
    }

    fn tick_array_start(&self, tick: i32, spacing: u16) -> i32 {
        let span = spacing as i32 * TICKS_PER_ARRAY;
        tick.div_euclid(span) * span
    }

    fn vault(&self, pool: &Pubkey, mint: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(
            &[b"pool_vault", pool.as_ref(), mint.as_ref()],
            &CLMM_PROGRAM_ID,
        )
        .0
    }
}

#[async_trait]
impl VenueAdapter for ClmmAdapter {
    fn venue(&self) -> Venue {
        Venue::Clmm
    }

    async fn list_pools(&self) -> Result<Vec<Pool>> {
        let infos = self.fetch_pools().await?;
        Ok(infos
            .iter()
            .filter_map(|info| self.normalize(info).ok())
            .collect())
    }

    async fn describe_pool(&self, address: &str) -> Result<Pool> {
        let url = format!("{}/pools/info/ids?ids={}", self.api_base, address);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::VenueUnavailable(format!("clmm pool: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::VenueUnavailable(format!(
                "clmm pool returned {}",
                response.status()
            )));
        }
        let envelope: RaydiumIdsEnvelope = response
            .json()
            .await
            .map_err(|e| Error::VenueUnavailable(format!("clmm pool decode: {}", e)))?;
        let info = envelope
            .data
            .into_iter()
            .flatten()
            .next()
            .ok_or_else(|| Error::NotFound(format!("clmm pool {}", address)))?;
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
        let pool_id = parse_pubkey(&pool.address)?;
        let mint_a = parse_pubkey(&pool.token_a.mint)?;
        let mint_b = parse_pubkey(&pool.token_b.mint)?;
        let (lower, upper) = range;
        let spacing = match pool.granularity {
            Granularity::TickSpacing(s) => s,
            Granularity::BinStep(_) => {
                return Err(Error::Validation("clmm pool with bin step".into()))
            }
        };

        // The program creates tick arrays on demand during open; no
        // separate init instructions
        let nft_mint = Keypair::new();
        let position = self.position_pda(&nft_mint.pubkey());
        let position_token_account = spl_associated_token_account::get_associated_token_address(
            owner,
            &nft_mint.pubkey(),
        );
        let quote = self.quote_liquidity(pool, range, amount_a, amount_b, slippage_bps)?;

        let lower_start = self.tick_array_start(lower, spacing);
        let upper_start = self.tick_array_start(upper, spacing);

        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(&DISCRIMINATORS::OPEN_POSITION_V2);
        data.extend_from_slice(&lower.to_le_bytes());
        data.extend_from_slice(&upper.to_le_bytes());
        data.extend_from_slice(&lower_start.to_le_bytes());
        data.extend_from_slice(&upper_start.to_le_bytes());
        data.extend_from_slice(&quote.liquidity.to_le_bytes());
        data.extend_from_slice(&quote.worst_a.to_le_bytes());
        data.extend_from_slice(&quote.worst_b.to_le_bytes());

        let instruction = Instruction {
            program_id: *CLMM_PROGRAM_ID,
            accounts: vec![
                AccountMeta::new(*owner, true),
                AccountMeta::new_readonly(*owner, true),
                AccountMeta::new(nft_mint.pubkey(), true),
                AccountMeta::new(position_token_account, false),
                AccountMeta::new(pool_id, false),
                AccountMeta::new(position, false),
                AccountMeta::new(self.tick_array_pda(&pool_id, lower_start), false),
                AccountMeta::new(self.tick_array_pda(&pool_id, upper_start), false),
                AccountMeta::new(
                    spl_associated_token_account::get_associated_token_address(owner, &mint_a),
                    false,
                ),
                AccountMeta::new(
                    spl_associated_token_account::get_associated_token_address(owner, &mint_b),
                    false,
                ),
                AccountMeta::new(self.vault(&pool_id, &mint_a), false),
                AccountMeta::new(self.vault(&pool_id, &mint_b), false),
                AccountMeta::new_readonly(solana_sdk::sysvar::rent::ID, false),
                AccountMeta::new_readonly(solana_sdk::system_program::ID, false),
                AccountMeta::new_readonly(spl_token::ID, false),
                AccountMeta::new_readonly(spl_associated_token_account::ID, false),
            ],
            data,
        };

        let position_id = nft_mint.pubkey().to_string();
        Ok(OpenBuild {
            instructions: vec![instruction],
            aux_signers: vec![nft_mint],
            position_id,
        })
    }

    async fn build_decrease(
        &self,
        position: &Position,
        bps_to_remove: u16,
        close_if_full: bool,
    ) -> Result<Vec<Instruction>> {
        let pool_id = parse_pubkey(&position.pool)?;
        let owner = parse_pubkey(&position.wallet)?;
        let nft_mint = parse_pubkey(&position.id)?;
        let position_pda = self.position_pda(&nft_mint);
        let position_token_account =
            spl_associated_token_account::get_associated_token_address(&owner, &nft_mint);

        let liquidity_delta =
            (position.liquidity / 10_000u128) * (bps_to_remove.min(10_000) as u128);

        let mut data = Vec::with_capacity(40);
        data.extend_from_slice(&DISCRIMINATORS::DECREASE_LIQUIDITY_V2);
        data.extend_from_slice(&liquidity_delta.to_le_bytes());
        data.extend_from_slice(&0u64.to_le_bytes()); // amount_0_min
        data.extend_from_slice(&0u64.to_le_bytes()); // amount_1_min

        let mut instructions = vec![Instruction {
            program_id: *CLMM_PROGRAM_ID,
            accounts: vec![
                AccountMeta::new_readonly(owner, true),
                AccountMeta::new_readonly(position_token_account, false),
                AccountMeta::new(position_pda, false),
                AccountMeta::new(pool_id, false),
                AccountMeta::new_readonly(spl_token::ID, false),
            ],
            data,
        }];

        if bps_to_remove >= 10_000 && close_if_full {
            let mut data = Vec::with_capacity(8);
            data.extend_from_slice(&DISCRIMINATORS::CLOSE_POSITION);
            instructions.push(Instruction {
                program_id: *CLMM_PROGRAM_ID,
                accounts: vec![
                    AccountMeta::new(owner, true),
                    AccountMeta::new(nft_mint, false),
                    AccountMeta::new(position_token_account, false),
                    AccountMeta::new(position_pda, false),
                    AccountMeta::new_readonly(solana_sdk::system_program::ID, false),
                    AccountMeta::new_readonly(spl_token::ID, false),
                ],
                data,
            });
        }

        Ok(instructions)
    }

    async fn build_collect_fees(&self, position: &Position) -> Result<Vec<Instruction>> {
        // CLMM pays accrued fees out on any decrease; a zero-liquidity
        // decrease is the canonical fee collection
        self.build_decrease_zero(position).await
    }

    async fn enumerate_positions(&self, wallet: &Pubkey) -> Result<Vec<Position>> {
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
            .map_err(|e| Error::RpcUnavailable(format!("clmm position read: {}", e)))?;

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

impl ClmmAdapter {
    async fn build_decrease_zero(&self, position: &Position) -> Result<Vec<Instruction>> {
        let pool_id = parse_pubkey(&position.pool)?;
        let owner = parse_pubkey(&position.wallet)?;
        let nft_mint = parse_pubkey(&position.id)?;
        let position_pda = self.position_pda(&nft_mint);
        let position_token_account =
            spl_associated_token_account::get_associated_token_address(&owner, &nft_mint);

        let mut data = Vec::with_capacity(40);
        data.extend_from_slice(&DISCRIMINATORS::DECREASE_LIQUIDITY_V2);
        data.extend_from_slice(&0u128.to_le_bytes());
        data.extend_from_slice(&0u64.to_le_bytes());
        data.extend_from_slice(&0u64.to_le_bytes());

        Ok(vec![Instruction {
            program_id: *CLMM_PROGRAM_ID,
            accounts: vec![
                AccountMeta::new_readonly(owner, true),
                AccountMeta::new_readonly(position_token_account, false),
                AccountMeta::new(position_pda, false),
                AccountMeta::new(pool_id, false),
                AccountMeta::new_readonly(spl_token::ID, false),
            ],
            data,
        }])
    }
}

fn parse_pubkey(s: &str) -> Result<Pubkey> {
    Pubkey::from_str(s).map_err(|e| Error::Validation(format!("invalid pubkey {}: {}", s, e)))
}

fn decode_position(mint: &Pubkey, wallet: &Pubkey, data: &[u8]) -> Result<Position> {
    if data.len() < position_layout::MIN_LEN {
        return Err(Error::Serialization("position account too short".into()));
    }
    if data[..8] != ACCOUNT_DISCRIMINATORS::PERSONAL_POSITION {
        return Err(Error::Serialization("not a clmm position".into()));
    }
    let stored_mint =
        Pubkey::try_from(&data[position_layout::NFT_MINT..position_layout::NFT_MINT + 32])
            .map_err(|_| Error::Serialization("bad mint bytes".into()))?;
    if stored_mint != *mint {
        return Err(Error::Serialization("position mint mismatch".into()));
    }
    let pool_id = Pubkey::try_from(&data[position_layout::POOL_ID..position_layout::POOL_ID + 32])
        .map_err(|_| Error::Serialization("bad pool bytes".into()))?;
    Ok(Position {
        id: mint.to_string(),
        wallet: wallet.to_string(),
        pool: pool_id.to_string(),
        venue: Venue::Clmm,
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
        liquidity: u128::from_le_bytes(
            data[position_layout::LIQUIDITY..position_layout::LIQUIDITY + 16]
                .try_into()
                .unwrap(),
        ),
        amount_a: 0,
        amount_b: 0,
        fee_a: u64::from_le_bytes(
            data[position_layout::FEE_OWED_0..position_layout::FEE_OWED_0 + 8]
                .try_into()
                .unwrap(),
        ),
        fee_b: u64::from_le_bytes(
            data[position_layout::FEE_OWED_1..position_layout::FEE_OWED_1 + 8]
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

    fn adapter() -> ClmmAdapter {
        ClmmAdapter::new(
            reqwest::Client::new(),
            "https://api-v3.raydium.io".into(),
            Arc::new(RpcClient::new("http://127.0.0.1:8899".into())),
        )
    }

    fn test_pool() -> Pool {
        Pool {
            address: Pubkey::new_unique().to_string(),
            venue: Venue::Clmm,
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
            active_index: 120,
            granularity: Granularity::TickSpacing(60),
            tvl_usd: 900_000.0,
            volume_24h_usd: 400_000.0,
            fee_bps: 25,
            apr: 22.0,
            risk_score: 3,
        }
    }

    #[test]
    fn test_normalize_rejects_standard_pools() {
        let a = adapter();
        let info = RaydiumPoolInfo {
            id: "x".into(),
            r#type: "Standard".into(),
            mint_a: RaydiumMint {
                address: tokens::WSOL_MINT.into(),
                symbol: "SOL".into(),
                decimals: 9,
            },
            mint_b: RaydiumMint {
                address: tokens::USDC_MINT.into(),
                symbol: "USDC".into(),
                decimals: 6,
            },
            price: 150.0,
            tvl: 0.0,
            day: None,
            fee_rate: 0.0025,
            config: Some(RaydiumPoolConfig { tick_spacing: 60 }),
        };
        assert!(matches!(
            a.normalize(&info),
            Err(Error::UnsupportedPoolType(_))
        ));
    }

    #[tokio::test]
    async fn test_build_open_single_instruction() {
        let a = adapter();
        let pool = test_pool();
        let owner = Pubkey::new_unique();
        let build = a
            .build_open(
                &pool,
                (-180, 420),
                1_000_000_000,
                150_000_000,
                &owner,
                Distribution::Spot,
                300,
            )
            .await
            .unwrap();
        assert_eq!(build.instructions.len(), 1);
        assert_eq!(build.aux_signers.len(), 1);
        assert_eq!(
            build.instructions[0].data[..8],
            DISCRIMINATORS::OPEN_POSITION_V2
        );
    }

    #[tokio::test]
    async fn test_collect_is_zero_decrease() {
        let a = adapter();
        let position = Position {
            id: Pubkey::new_unique().to_string(),
            wallet: Pubkey::new_unique().to_string(),
            pool: Pubkey::new_unique().to_string(),
            venue: Venue::Clmm,
            lower_index: -180,
            upper_index: 420,
            lower_price: 0.0,
            upper_price: 0.0,
            liquidity: 5_000_000,
            amount_a: 0,
            amount_b: 0,
            fee_a: 0,
            fee_b: 0,
            fee_a_ui: 0.0,
            fee_b_ui: 0.0,
            in_range: true,
        };
        let ixs = a.build_collect_fees(&position).await.unwrap();
        assert_eq!(ixs.len(), 1);
        assert_eq!(ixs[0].data[..8], DISCRIMINATORS::DECREASE_LIQUIDITY_V2);
        // zero liquidity delta
        assert_eq!(&ixs[0].data[8..24], &0u128.to_le_bytes());
    }

    #[test]
    fn test_decode_position() {
        let mint = Pubkey::new_unique();
        let wallet = Pubkey::new_unique();
        let pool_id = Pubkey::new_unique();
        let mut data = vec![0u8; position_layout::MIN_LEN];
        data[..8].copy_from_slice(&ACCOUNT_DISCRIMINATORS::PERSONAL_POSITION);
        data[position_layout::NFT_MINT..position_layout::NFT_MINT + 32]
            .copy_from_slice(mint.as_ref());
        data[position_layout::POOL_ID..position_layout::POOL_ID + 32]
            .copy_from_slice(pool_id.as_ref());
        data[position_layout::TICK_LOWER..position_layout::TICK_LOWER + 4]
            .copy_from_slice(&(-180i32).to_le_bytes());
        data[position_layout::TICK_UPPER..position_layout::TICK_UPPER + 4]
            .copy_from_slice(&420i32.to_le_bytes());
        data[position_layout::FEE_OWED_1..position_layout::FEE_OWED_1 + 8]
            .copy_from_slice(&77u64.to_le_bytes());

        let position = decode_position(&mint, &wallet, &data).unwrap();
        assert_eq!(position.pool, pool_id.to_string());
        assert_eq!((position.lower_index, position.upper_index), (-180, 420));
        assert_eq!(position.fee_b, 77);
    }
}
