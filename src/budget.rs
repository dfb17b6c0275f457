//! Compute budget estimation
//!
//! Every transaction is simulated before final serialization; the
//! consumed units size the compute-unit limit and recent prioritization
//! fees on the writable accounts set the priority fee. The composer
//! prepends the two compute-budget instructions to the rebuilt message.

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSimulateTransactionConfig;
use solana_sdk::compute_budget::{self, ComputeBudgetInstruction};
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::message::Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::Transaction;
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::TipUrgency;

/// Headroom multiplier over simulated units
const UNIT_MARGIN: f64 = 1.3;
/// Compute-unit limit bounds
const MIN_UNITS: u32 = 50_000;
const MAX_UNITS: u32 = 1_400_000;
/// Used when simulation fails or reports nothing
pub const DEFAULT_UNITS: u32 = 400_000;
/// Minimum priority fee in micro-lamports
const FEE_FLOOR: u64 = 1_000;

/// Priority-fee urgency, mapped to a percentile of recent fees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeUrgency {
    Low,
    Medium,
    High,
    Critical,
}

impl FeeUrgency {
    pub fn percentile(&self) -> u8 {
        match self {
            FeeUrgency::Low => 25,
            FeeUrgency::Medium => 50,
            FeeUrgency::High => 75,
            FeeUrgency::Critical => 90,
        }
    }
}

impl From<TipUrgency> for FeeUrgency {
    fn from(urgency: TipUrgency) -> Self {
        match urgency {
            TipUrgency::Fast => FeeUrgency::High,
            TipUrgency::Turbo => FeeUrgency::Critical,
            TipUrgency::Skip => FeeUrgency::Medium,
        }
    }
}

/// The two values the composer writes into each transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetEstimate {
    pub compute_unit_limit: u32,
    pub priority_fee_micro_lamports: u64,
}

/// Simulate and size a transaction's compute budget
pub async fn estimate(
    rpc: &RpcClient,
    transaction: &Transaction,
    urgency: FeeUrgency,
) -> Result<BudgetEstimate> {
    let units = match simulate_units(rpc, transaction).await {
        Ok(Some(consumed)) if consumed > 0 => size_units(consumed),
        Ok(_) => {
            debug!("simulation reported no units, using default limit");
            DEFAULT_UNITS
        }
        Err(e) => {
            warn!("simulation failed ({}), using default limit", e);
            DEFAULT_UNITS
        }
    };

    let writable = writable_accounts(transaction);
    let fee = match recent_fee_percentile(rpc, &writable, urgency.percentile()).await {
        Ok(fee) => fee,
        Err(e) => {
            warn!("prioritization fee fetch failed ({}), using floor", e);
            FEE_FLOOR
        }
    };

    Ok(BudgetEstimate {
        compute_unit_limit: units,
        priority_fee_micro_lamports: fee,
    })
}

/// Units consumed by a signature-free simulation against a fresh blockhash
pub async fn simulate_units(rpc: &RpcClient, transaction: &Transaction) -> Result<Option<u64>> {
    let config = RpcSimulateTransactionConfig {
        sig_verify: false,
        replace_recent_blockhash: true,
        ..Default::default()
    };
    let response = rpc
        .simulate_transaction_with_config(transaction, config)
        .await?;
    if let Some(err) = response.value.err {
        return Err(crate::error::Error::Internal(format!(
            "simulation error: {:?} (logs: {})",
            err,
            response.value.logs.unwrap_or_default().join(" | ")
        )));
    }
    Ok(response.value.units_consumed)
}

/// ceil(consumed x 1.3) clamped to the legal range
pub fn size_units(consumed: u64) -> u32 {
    let padded = (consumed as f64 * UNIT_MARGIN).ceil() as u64;
    (padded.min(MAX_UNITS as u64) as u32).max(MIN_UNITS)
}

/// nth percentile of recent prioritization fees on the writable set
async fn recent_fee_percentile(
    rpc: &RpcClient,
    writable: &[Pubkey],
    percentile: u8,
) -> Result<u64> {
    let fees = rpc.get_recent_prioritization_fees(writable).await?;
    let mut values: Vec<u64> = fees.iter().map(|f| f.prioritization_fee).collect();
    values.sort_unstable();
    Ok(percentile_of(&values, percentile).max(FEE_FLOOR))
}

/// Nearest-rank percentile; zero for an empty set
pub fn percentile_of(sorted: &[u64], percentile: u8) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((percentile as f64 / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Writable account keys of a transaction's message
pub fn writable_accounts(transaction: &Transaction) -> Vec<Pubkey> {
    let message = &transaction.message;
    message
        .account_keys
        .iter()
        .enumerate()
        .filter(|(i, _)| message.is_writable(*i))
        .map(|(_, key)| *key)
        .collect()
}

/// Reconstruct the instruction list from a compiled legacy message
pub fn decompile(message: &Message) -> Vec<Instruction> {
    message
        .instructions
        .iter()
        .map(|compiled| {
            let program_id = message.account_keys[compiled.program_id_index as usize];
            let accounts = compiled
                .accounts
                .iter()
                .map(|&index| {
                    let index = index as usize;
                    AccountMeta {
                        pubkey: message.account_keys[index],
                        is_signer: message.is_signer(index),
                        is_writable: message.is_writable(index),
                    }
                })
                .collect();
            Instruction {
                program_id,
                accounts,
                data: compiled.data.clone(),
            }
        })
        .collect()
}

/// Prepend the two compute-budget instructions, dropping any
/// pre-existing compute-budget instructions first.
pub fn apply_budget(instructions: Vec<Instruction>, budget: &BudgetEstimate) -> Vec<Instruction> {
    let mut out = vec![
        ComputeBudgetInstruction::set_compute_unit_limit(budget.compute_unit_limit),
        ComputeBudgetInstruction::set_compute_unit_price(budget.priority_fee_micro_lamports),
    ];
    out.extend(
        instructions
            .into_iter()
            .filter(|ix| ix.program_id != compute_budget::id()),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::system_instruction;

    #[test]
    fn test_size_units() {
        assert_eq!(size_units(100_000), 130_000);
        // Rounds up
        assert_eq!(size_units(100_001), 130_002);
        // Clamped below
        assert_eq!(size_units(10), 50_000);
        // Clamped above
        assert_eq!(size_units(2_000_000), 1_400_000);
    }

    #[test]
    fn test_percentile_of() {
        let fees = vec![100, 200, 300, 400, 500, 600, 700, 800, 900, 1000];
        assert_eq!(percentile_of(&fees, 25), 300);
        assert_eq!(percentile_of(&fees, 50), 500);
        assert_eq!(percentile_of(&fees, 75), 800);
        assert_eq!(percentile_of(&fees, 90), 900);
        // Empty array falls back to zero (the caller applies the floor)
        assert_eq!(percentile_of(&[], 50), 0);
    }

    #[test]
    fn test_urgency_percentiles() {
        assert_eq!(FeeUrgency::Low.percentile(), 25);
        assert_eq!(FeeUrgency::Medium.percentile(), 50);
        assert_eq!(FeeUrgency::High.percentile(), 75);
        assert_eq!(FeeUrgency::Critical.percentile(), 90);
        assert_eq!(FeeUrgency::from(TipUrgency::Turbo), FeeUrgency::Critical);
        assert_eq!(FeeUrgency::from(TipUrgency::Fast), FeeUrgency::High);
    }

    #[test]
    fn test_apply_budget_prepends_and_dedups() {
        let from = Pubkey::new_unique();
        let to = Pubkey::new_unique();
        let transfer = system_instruction::transfer(&from, &to, 1);
        let stale_budget = ComputeBudgetInstruction::set_compute_unit_limit(123);

        let budget = BudgetEstimate {
            compute_unit_limit: 200_000,
            priority_fee_micro_lamports: 5_000,
        };
        let out = apply_budget(vec![stale_budget, transfer.clone()], &budget);

        // Exactly one limit and one price instruction, both first
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].program_id, compute_budget::id());
        assert_eq!(out[1].program_id, compute_budget::id());
        assert_eq!(out[2], transfer);
        let budget_count = out
            .iter()
            .filter(|ix| ix.program_id == compute_budget::id())
            .count();
        assert_eq!(budget_count, 2);
    }

    #[test]
    fn test_decompile_roundtrip() {
        let from = Pubkey::new_unique();
        let to = Pubkey::new_unique();
        let ixs = vec![
            system_instruction::transfer(&from, &to, 42),
            system_instruction::transfer(&from, &to, 43),
        ];
        let message = Message::new(&ixs, Some(&from));
        let decompiled = decompile(&message);
        assert_eq!(decompiled.len(), 2);
        assert_eq!(decompiled[0].program_id, solana_sdk::system_program::ID);
        assert_eq!(decompiled[0].data, ixs[0].data);
        assert_eq!(decompiled[0].accounts[0].pubkey, from);
        assert!(decompiled[0].accounts[0].is_signer);
    }
}
