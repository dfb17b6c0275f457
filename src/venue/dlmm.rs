//! Meteora DLMM adapter
//!
//! # WARNING: program constants may change without notice
//! Layout offsets and discriminators below follow the deployed DLMM
//! program; if decoding or building starts failing they may need
//! updating against the current IDL.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcProgramAccountsConfig;
use solana_client::rpc_filter::{Memcmp, RpcFilterType};
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::pools::tokens;
use crate::types::{Distribution, Granularity, Pool, Position, TokenInfo, Venue};

use super::{math, OpenBuild, VenueAdapter};

/// DLMM program ID
pub const DLMM_PROGRAM_ID_STR: &str = "LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo";

lazy_static::lazy_static! {
    pub static ref DLMM_PROGRAM_ID: Pubkey =
        Pubkey::from_str(DLMM_PROGRAM_ID_STR).expect("Invalid DLMM program ID");
}

/// Bins covered by one bin-array account
pub const BINS_PER_ARRAY: i32 = 70;

/// Instruction discriminators: SHA-256("global:<name>")[0..8]
#[allow(non_snake_case)]
pub mod DISCRIMINATORS {
    pub const INITIALIZE_BIN_ARRAY: [u8; 8] = [35, 86, 19, 185, 78, 212, 75, 211];
    pub const INITIALIZE_POSITION: [u8; 8] = [219, 192, 234, 71, 190, 191, 102, 80];
    pub const ADD_LIQUIDITY_BY_STRATEGY: [u8; 8] = [7, 3, 150, 127, 148, 40, 61, 200];
    pub const REMOVE_LIQUIDITY_BY_RANGE: [u8; 8] = [26, 82, 102, 152, 240, 74, 105, 26];
    pub const CLAIM_FEE: [u8; 8] = [169, 32, 79, 137, 136, 232, 70, 137];
    pub const CLOSE_POSITION: [u8; 8] = [123, 134, 81, 0, 49, 68, 98, 98];
}

/// Program error codes from the DLMM IDL
pub mod errors {
    pub const EXCEEDED_AMOUNT_SLIPPAGE: u32 = 6004;
    pub const PAIR_DISABLED: u32 = 6013;
}

/// Position account layout offsets (after the 8-byte discriminator)
mod position_layout {
    pub const LB_PAIR: usize = 8;
    pub const OWNER: usize = 40;
    pub const LOWER_BIN_ID: usize = 72;
    pub const UPPER_BIN_ID: usize = 76;
    pub const LIQUIDITY: usize = 80;
    pub const FEE_X: usize = 96;
    pub const FEE_Y: usize = 104;
    pub const MIN_LEN: usize = 112;
}

/// Pair payload from the DLMM REST index
#[derive(Debug, Clone, Deserialize)]
pub struct DlmmPair {
    pub address: String,
    /// "SOL-USDC"
    pub name: String,
    pub mint_x: String,
    pub mint_y: String,
    pub bin_step: u16,
    pub current_price: f64,
    /// TVL in USD, stringly typed upstream
    pub liquidity: String,
    #[serde(default)]
    pub trade_volume_24h: f64,
    #[serde(default)]
    pub apr: f64,
    #[serde(default)]
    pub base_fee_percentage: String,
}

pub struct DlmmAdapter {
    http: reqwest::Client,
    api_base: String,
    rpc: Arc<RpcClient>,
}

impl DlmmAdapter {
    pub fn new(http: reqwest::Client, api_base: String, rpc: Arc<RpcClient>) -> Self {
        Self {
            http,
            api_base,
            rpc,
        }
    }

    /// Fetch every pair from the REST index
    pub async fn fetch_pairs(&self) -> Result<Vec<DlmmPair>> {
        let url = format!("{}/pair/all", self.api_base);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::VenueUnavailable(format!("dlmm index: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::VenueUnavailable(format!(
                "dlmm index returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::VenueUnavailable(format!("dlmm index decode: {}", e)))
    }

    pub fn normalize(&self, pair: &DlmmPair) -> Result<Pool> {
        if pair.bin_step == 0 {
            return Err(Error::UnsupportedPoolType(format!(
                "{} is not a bin-liquidity pair",
                pair.address
            )));
        }
        let (sym_x, sym_y) = pair
            .name
            .split_once('-')
            .unwrap_or((pair.name.as_str(), "?"));
        let dec_x = tokens::decimals(&pair.mint_x);
        let dec_y = tokens::decimals(&pair.mint_y);
        // Bin ids index the raw ratio, not the UI price
        let raw_price = pair.current_price * 10f64.powi(dec_y as i32 - dec_x as i32);
        let fee_bps = pair
            .base_fee_percentage
            .parse::<f64>()
            .map(|pct| (pct * 100.0).round() as u16)
            .unwrap_or(0);
        Ok(Pool {
            address: pair.address.clone(),
            venue: Venue::Dlmm,
            token_a: TokenInfo {
                mint: pair.mint_x.clone(),
                symbol: sym_x.to_string(),
                decimals: dec_x,
            },
            token_b: TokenInfo {
                mint: pair.mint_y.clone(),
                symbol: sym_y.to_string(),
                decimals: dec_y,
            },
            current_price: pair.current_price,
            active_index: math::price_to_bin(raw_price, pair.bin_step),
            granularity: Granularity::BinStep(pair.bin_step),
            tvl_usd: pair.liquidity.parse().unwrap_or(0.0),
            volume_24h_usd: pair.trade_volume_24h,
            fee_bps,
            apr: pair.apr,
            risk_score: 0,
        })
    }

    fn bin_array_pda(&self, lb_pair: &Pubkey, array_index: i64) -> Pubkey {
        Pubkey::find_program_address(
            &[b"bin_array", lb_pair.as_ref(), &array_index.to_le_bytes()],
            &DLMM_PROGRAM_ID,
        )
        .0
    }

    fn reserve_pda(&self, lb_pair: &Pubkey, mint: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[lb_pair.as_ref(), mint.as_ref()], &DLMM_PROGRAM_ID).0
    }

    fn event_authority(&self) -> Pubkey {
        Pubkey::find_program_address(&[b"__event_authority"], &DLMM_PROGRAM_ID).0
    }

    /// Bin-array indices covering a bin range
    fn covering_arrays(&self, lower: i32, upper: i32) -> Vec<i64> {
        let first = lower.div_euclid(BINS_PER_ARRAY) as i64;
        let last = upper.div_euclid(BINS_PER_ARRAY) as i64;
        (first..=last).collect()
    }
}

#[async_trait]
impl VenueAdapter for DlmmAdapter {
    fn venue(&self) -> Venue {
        Venue::Dlmm
    }

    async fn list_pools(&self) -> Result<Vec<Pool>> {
        let pairs = self.fetch_pairs().await?;
        // Non-bin product lines in the index are skipped, not fatal
        Ok(pairs
            .iter()
            .filter_map(|pair| self.normalize(pair).ok())
            .collect())
    }

    async fn describe_pool(&self, address: &str) -> Result<Pool> {
        let url = format!("{}/pair/{}", self.api_base, address);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::VenueUnavailable(format!("dlmm pair: {}", e)))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("dlmm pair {}", address)));
        }
        if !response.status().is_success() {
            return Err(Error::VenueUnavailable(format!(
                "dlmm pair returned {}",
                response.status()
            )));
        }
        let pair: DlmmPair = response
            .json()
            .await
            .map_err(|e| Error::VenueUnavailable(format!("dlmm pair decode: {}", e)))?;
        self.normalize(&pair)
    }

    async fn build_open(
        &self,
        pool: &Pool,
        range: (i32, i32),
        amount_a: u64,
        amount_b: u64,
        owner: &Pubkey,
        distribution: Distribution,
        slippage_bps: u16,
    ) -> Result<OpenBuild> {
        let lb_pair = parse_pubkey(&pool.address)?;
        let mint_x = parse_pubkey(&pool.token_a.mint)?;
        let mint_y = parse_pubkey(&pool.token_b.mint)?;
        let (lower, upper) = range;

        let mut instructions = Vec::new();

        // Bin arrays must exist before liquidity can land in them
        for array_index in self.covering_arrays(lower, upper) {
            let mut data = Vec::with_capacity(16);
            data.extend_from_slice(&DISCRIMINATORS::INITIALIZE_BIN_ARRAY);
            data.extend_from_slice(&array_index.to_le_bytes());
            instructions.push(Instruction {
                program_id: *DLMM_PROGRAM_ID,
                accounts: vec![
                    AccountMeta::new_readonly(lb_pair, false),
                    AccountMeta::new(self.bin_array_pda(&lb_pair, array_index), false),
                    AccountMeta::new(*owner, true),
                    AccountMeta::new_readonly(solana_sdk::system_program::ID, false),
                ],
                data,
            });
        }

        // Fresh position account, co-signed by the custody oracle
        let position = Keypair::new();
        let width = upper - lower + 1;
        let mut data = Vec::with_capacity(16);
        data.extend_from_slice(&DISCRIMINATORS::INITIALIZE_POSITION);
        data.extend_from_slice(&lower.to_le_bytes());
        data.extend_from_slice(&width.to_le_bytes());
        instructions.push(Instruction {
            program_id: *DLMM_PROGRAM_ID,
            accounts: vec![
                AccountMeta::new(*owner, true),
                AccountMeta::new(position.pubkey(), true),
                AccountMeta::new_readonly(lb_pair, false),
                AccountMeta::new_readonly(*owner, true),
                AccountMeta::new_readonly(solana_sdk::system_program::ID, false),
                AccountMeta::new_readonly(self.event_authority(), false),
                AccountMeta::new_readonly(*DLMM_PROGRAM_ID, false),
            ],
            data,
        });

        // Max active-bin drift the deposit tolerates, in bins
        let max_active_bin_slippage =
            (slippage_bps as i32 / pool.granularity.unit().max(1)).max(1);
        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(&DISCRIMINATORS::ADD_LIQUIDITY_BY_STRATEGY);
        data.extend_from_slice(&amount_a.to_le_bytes());
        data.extend_from_slice(&amount_b.to_le_bytes());
        data.extend_from_slice(&pool.active_index.to_le_bytes());
        data.extend_from_slice(&max_active_bin_slippage.to_le_bytes());
        data.extend_from_slice(&lower.to_le_bytes());
        data.extend_from_slice(&upper.to_le_bytes());
        data.push(distribution_tag(distribution));

        let user_x = spl_associated_token_account::get_associated_token_address(owner, &mint_x);
        let user_y = spl_associated_token_account::get_associated_token_address(owner, &mint_y);
        let mut accounts = vec![
            AccountMeta::new(position.pubkey(), false),
            AccountMeta::new(lb_pair, false),
            AccountMeta::new(user_x, false),
            AccountMeta::new(user_y, false),
            AccountMeta::new(self.reserve_pda(&lb_pair, &mint_x), false),
            AccountMeta::new(self.reserve_pda(&lb_pair, &mint_y), false),
            AccountMeta::new_readonly(mint_x, false),
            AccountMeta::new_readonly(mint_y, false),
            AccountMeta::new(*owner, true),
            AccountMeta::new_readonly(spl_token::ID, false),
            AccountMeta::new_readonly(self.event_authority(), false),
            AccountMeta::new_readonly(*DLMM_PROGRAM_ID, false),
        ];
        for array_index in self.covering_arrays(lower, upper) {
            accounts.push(AccountMeta::new(
                self.bin_array_pda(&lb_pair, array_index),
                false,
            ));
        }
        instructions.push(Instruction {
            program_id: *DLMM_PROGRAM_ID,
            accounts,
            data,
        });

        let position_id = position.pubkey().to_string();
        Ok(OpenBuild {
            instructions,
            aux_signers: vec![position],
            position_id,
        })
    }

    async fn build_decrease(
        &self,
        position: &Position,
        bps_to_remove: u16,
        close_if_full: bool,
    ) -> Result<Vec<Instruction>> {
        let position_key = parse_pubkey(&position.id)?;
        let lb_pair = parse_pubkey(&position.pool)?;
        let owner = parse_pubkey(&position.wallet)?;

        let mut data = Vec::with_capacity(24);
        data.extend_from_slice(&DISCRIMINATORS::REMOVE_LIQUIDITY_BY_RANGE);
        data.extend_from_slice(&position.lower_index.to_le_bytes());
        data.extend_from_slice(&position.upper_index.to_le_bytes());
        data.extend_from_slice(&bps_to_remove.to_le_bytes());

        let mut accounts = vec![
            AccountMeta::new(position_key, false),
            AccountMeta::new(lb_pair, false),
            AccountMeta::new(owner, true),
            AccountMeta::new_readonly(spl_token::ID, false),
            AccountMeta::new_readonly(self.event_authority(), false),
            AccountMeta::new_readonly(*DLMM_PROGRAM_ID, false),
        ];
        for array_index in self.covering_arrays(position.lower_index, position.upper_index) {
            accounts.push(AccountMeta::new(
                self.bin_array_pda(&lb_pair, array_index),
                false,
            ));
        }

        let mut instructions = vec![Instruction {
            program_id: *DLMM_PROGRAM_ID,
            accounts,
            data,
        }];

        if bps_to_remove >= 10_000 && close_if_full {
            let mut data = Vec::with_capacity(8);
            data.extend_from_slice(&DISCRIMINATORS::CLOSE_POSITION);
            instructions.push(Instruction {
                program_id: *DLMM_PROGRAM_ID,
                accounts: vec![
                    AccountMeta::new(position_key, false),
                    AccountMeta::new(lb_pair, false),
                    AccountMeta::new(owner, true),
                    AccountMeta::new(owner, false),
                    AccountMeta::new_readonly(self.event_authority(), false),
                    AccountMeta::new_readonly(*DLMM_PROGRAM_ID, false),
                ],
                data,
            });
        }

        Ok(instructions)
    }

    async fn build_collect_fees(&self, position: &Position) -> Result<Vec<Instruction>> {
        // DLMM claims directly; no separate update step
        let position_key = parse_pubkey(&position.id)?;
        let lb_pair = parse_pubkey(&position.pool)?;
        let owner = parse_pubkey(&position.wallet)?;

        let mut data = Vec::with_capacity(8);
        data.extend_from_slice(&DISCRIMINATORS::CLAIM_FEE);

        let mut accounts = vec![
            AccountMeta::new(lb_pair, false),
            AccountMeta::new(position_key, false),
            AccountMeta::new(owner, true),
            AccountMeta::new_readonly(spl_token::ID, false),
            AccountMeta::new_readonly(self.event_authority(), false),
            AccountMeta::new_readonly(*DLMM_PROGRAM_ID, false),
        ];
        for array_index in self.covering_arrays(position.lower_index, position.upper_index) {
            accounts.push(AccountMeta::new(
                self.bin_array_pda(&lb_pair, array_index),
                false,
            ));
        }

        Ok(vec![Instruction {
            program_id: *DLMM_PROGRAM_ID,
            accounts,
            data,
        }])
    }

    async fn enumerate_positions(&self, wallet: &Pubkey) -> Result<Vec<Position>> {
        // Account-based venue: positions are read by owner under the program
        let filters = vec![RpcFilterType::Memcmp(Memcmp::new_base58_encoded(
            position_layout::OWNER,
            wallet.as_ref(),
        ))];
        let config = RpcProgramAccountsConfig {
            filters: Some(filters),
            ..Default::default()
        };
        let accounts = self
            .rpc
            .get_program_accounts_with_config(&DLMM_PROGRAM_ID, config)
            .await
            .map_err(|e| Error::RpcUnavailable(format!("dlmm position scan: {}", e)))?;

        let mut positions = Vec::new();
        for (address, account) in accounts {
            match decode_position(&address, wallet, &account.data) {
                Ok(mut position) => {
                    match self.describe_pool(&position.pool).await {
                        Ok(pool) => {
                            position.in_range = position.contains_index(pool.active_index);
                            position.lower_price =
                                math::bin_price(position.lower_index, pool.granularity.unit() as u16);
                            position.upper_price =
                                math::bin_price(position.upper_index, pool.granularity.unit() as u16);
                            position.fee_a_ui = position.fee_a as f64
                                / 10f64.powi(pool.token_a.decimals as i32);
                            position.fee_b_ui = position.fee_b as f64
                                / 10f64.powi(pool.token_b.decimals as i32);
                        }
                        Err(e) => {
                            debug!("pool lookup failed for {}: {}", position.pool, e);
                        }
                    }
                    positions.push(position);
                }
                Err(e) => warn!("skipping undecodable dlmm position {}: {}", address, e),
            }
        }
        Ok(positions)
    }
}

fn distribution_tag(distribution: Distribution) -> u8 {
    match distribution {
        Distribution::Spot => 0,
        Distribution::Curve => 1,
        Distribution::BidAsk => 2,
    }
}

fn parse_pubkey(s: &str) -> Result<Pubkey> {
    Pubkey::from_str(s).map_err(|e| Error::Validation(format!("invalid pubkey {}: {}", s, e)))
}

fn read_i32(data: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(data[offset..offset + 8].try_into().unwrap())
}

fn decode_position(address: &Pubkey, wallet: &Pubkey, data: &[u8]) -> Result<Position> {
    if data.len() < position_layout::MIN_LEN {
        return Err(Error::Serialization(format!(
            "dlmm position account too short: {}",
            data.len()
        )));
    }
    let lb_pair = Pubkey::try_from(&data[position_layout::LB_PAIR..position_layout::LB_PAIR + 32])
        .map_err(|_| Error::Serialization("bad lb_pair bytes".into()))?;
    let liquidity =
        u128::from_le_bytes(data[position_layout::LIQUIDITY..position_layout::LIQUIDITY + 16]
            .try_into()
            .unwrap());
    Ok(Position {
        id: address.to_string(),
        wallet: wallet.to_string(),
        pool: lb_pair.to_string(),
        venue: Venue::Dlmm,
        lower_index: read_i32(data, position_layout::LOWER_BIN_ID),
        upper_index: read_i32(data, position_layout::UPPER_BIN_ID),
        lower_price: 0.0,
        upper_price: 0.0,
        liquidity,
        amount_a: 0,
        amount_b: 0,
        fee_a: read_u64(data, position_layout::FEE_X),
        fee_b: read_u64(data, position_layout::FEE_Y),
        fee_a_ui: 0.0,
        fee_b_ui: 0.0,
        in_range: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool() -> Pool {
        Pool {
            address: "5rCf1DM8LjKTw4YqhnoLcngyZYeNnQqztScTogYHAS6".into(),
            venue: Venue::Dlmm,
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
            active_index: 5000,
            granularity: Granularity::BinStep(10),
            tvl_usd: 500_000.0,
            volume_24h_usd: 100_000.0,
            fee_bps: 20,
            apr: 35.0,
            risk_score: 3,
        }
    }

    fn adapter() -> DlmmAdapter {
        DlmmAdapter::new(
            reqwest::Client::new(),
            "https://dlmm-api.meteora.ag".into(),
            Arc::new(RpcClient::new("http://127.0.0.1:8899".into())),
        )
    }

    #[test]
    fn test_covering_arrays() {
        let a = adapter();
        assert_eq!(a.covering_arrays(0, 69), vec![0]);
        assert_eq!(a.covering_arrays(0, 70), vec![0, 1]);
        assert_eq!(a.covering_arrays(-1, 1), vec![-1, 0]);
        assert_eq!(a.covering_arrays(4950, 5050), vec![70, 71, 72]);
    }

    #[test]
    fn test_normalize_rejects_non_bin_pairs() {
        let a = adapter();
        let pair = DlmmPair {
            address: "x".into(),
            name: "SOL-USDC".into(),
            mint_x: tokens::WSOL_MINT.into(),
            mint_y: tokens::USDC_MINT.into(),
            bin_step: 0,
            current_price: 150.0,
            liquidity: "1000".into(),
            trade_volume_24h: 0.0,
            apr: 0.0,
            base_fee_percentage: "0.2".into(),
        };
        assert!(matches!(
            a.normalize(&pair),
            Err(Error::UnsupportedPoolType(_))
        ));
    }

    #[tokio::test]
    async fn test_build_open_shape() {
        let a = adapter();
        let pool = test_pool();
        let owner = Pubkey::new_unique();
        let build = a
            .build_open(
                &pool,
                (4950, 5050),
                1_000_000_000,
                150_000_000,
                &owner,
                Distribution::Spot,
                300,
            )
            .await
            .unwrap();

        // bin-array inits come first, then open, then add
        assert_eq!(build.instructions.len(), 3 + 2);
        assert_eq!(build.aux_signers.len(), 1);
        assert_eq!(
            build.position_id,
            build.aux_signers[0].pubkey().to_string()
        );
        for ix in &build.instructions {
            assert_eq!(ix.program_id, *DLMM_PROGRAM_ID);
        }
        let open_ix = &build.instructions[3];
        assert_eq!(open_ix.data[..8], DISCRIMINATORS::INITIALIZE_POSITION);
        let add_ix = &build.instructions[4];
        assert_eq!(add_ix.data[..8], DISCRIMINATORS::ADD_LIQUIDITY_BY_STRATEGY);
    }

    #[tokio::test]
    async fn test_full_decrease_appends_close() {
        let a = adapter();
        let position = Position {
            id: Pubkey::new_unique().to_string(),
            wallet: Pubkey::new_unique().to_string(),
            pool: Pubkey::new_unique().to_string(),
            venue: Venue::Dlmm,
            lower_index: 4950,
            upper_index: 5050,
            lower_price: 0.0,
            upper_price: 0.0,
            liquidity: 1,
            amount_a: 0,
            amount_b: 0,
            fee_a: 0,
            fee_b: 0,
            fee_a_ui: 0.0,
            fee_b_ui: 0.0,
            in_range: true,
        };
        let partial = a.build_decrease(&position, 5_000, true).await.unwrap();
        assert_eq!(partial.len(), 1);
        let full = a.build_decrease(&position, 10_000, true).await.unwrap();
        assert_eq!(full.len(), 2);
        assert_eq!(full[1].data[..8], DISCRIMINATORS::CLOSE_POSITION);
        let no_close = a.build_decrease(&position, 10_000, false).await.unwrap();
        assert_eq!(no_close.len(), 1);
    }

    #[test]
    fn test_decode_position_roundtrip() {
        let mut data = vec![0u8; position_layout::MIN_LEN];
        let lb_pair = Pubkey::new_unique();
        data[position_layout::LB_PAIR..position_layout::LB_PAIR + 32]
            .copy_from_slice(lb_pair.as_ref());
        data[position_layout::LOWER_BIN_ID..position_layout::LOWER_BIN_ID + 4]
            .copy_from_slice(&4950i32.to_le_bytes());
        data[position_layout::UPPER_BIN_ID..position_layout::UPPER_BIN_ID + 4]
            .copy_from_slice(&5050i32.to_le_bytes());
        data[position_layout::FEE_X..position_layout::FEE_X + 8]
            .copy_from_slice(&123u64.to_le_bytes());

        let address = Pubkey::new_unique();
        let wallet = Pubkey::new_unique();
        let position = decode_position(&address, &wallet, &data).unwrap();
        assert_eq!(position.pool, lb_pair.to_string());
        assert_eq!(position.lower_index, 4950);
        assert_eq!(position.upper_index, 5050);
        assert_eq!(position.fee_a, 123);
    }
}
