//! Pipeline composition
//!
//! Turns a high-level intent (atomic LP entry, withdraw, rebalance,
//! fee claim) into the ordered transaction list the submission driver
//! executes. Swap legs are synthesized from the collateral/pair
//! relationship, every transaction gets a simulated compute budget and a
//! fresh blockhash, and slippage failures escalate through a fixed
//! ladder before giving up.

pub mod swap;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use solana_sdk::instruction::Instruction;
use solana_sdk::message::Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::transaction::Transaction;
use tracing::{info, warn};

use crate::budget::{self, FeeUrgency};
use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::notify::{Event, EventKind, SuggestedAction};
use crate::seal::SealedStrategy;
use crate::submit::relay::tip_instruction;
use crate::submit::{PreparedTx, SubmitMode, SubmitOutcome};
use crate::types::{Granularity, Pool, Position, Strategy, TipUrgency, Venue};
use crate::venue::{classify_simulation_failure, math};
use swap::{plan_swaps, SwapPlan};

/// Slippage ladder for composer-level escalation, in bps
pub const SLIPPAGE_LADDER: [u16; 4] = [300, 500, 750, 1000];

/// Escalation state machine. The only legal transitions are
/// Trying -> Escalating -> Trying (next rung) and the two terminals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationState {
    Trying(u16),
    Escalating(u16),
    Exhausted,
    Landed,
}

/// Drives the slippage ladder for one intent
#[derive(Debug)]
pub struct SlippageEscalation {
    state: EscalationState,
}

impl SlippageEscalation {
    pub fn new(requested_bps: u16) -> Self {
        Self {
            state: EscalationState::Trying(requested_bps),
        }
    }

    /// Slippage to use for the current attempt; None once terminal
    pub fn current(&self) -> Option<u16> {
        match self.state {
            EscalationState::Trying(bps) => Some(bps),
            _ => None,
        }
    }

    /// Move to the next rung after SLIPPAGE_EXCEEDED; exhausts past the
    /// top of the ladder
    pub fn escalate(&mut self) {
        let EscalationState::Trying(bps) = self.state else {
            return;
        };
        self.state = EscalationState::Escalating(bps);
        self.state = match SLIPPAGE_LADDER.iter().find(|next| **next > bps) {
            Some(next) => EscalationState::Trying(*next),
            None => EscalationState::Exhausted,
        };
    }

    pub fn land(&mut self) {
        self.state = EscalationState::Landed;
    }

    /// Last slippage that was attempted
    pub fn last_bps(&self) -> u16 {
        match self.state {
            EscalationState::Trying(bps) | EscalationState::Escalating(bps) => bps,
            _ => SLIPPAGE_LADDER[SLIPPAGE_LADDER.len() - 1],
        }
    }
}

/// Receipt returned to the caller after an execution resolves
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub intent: String,
    pub wallet: String,
    pub position_id: Option<String>,
    pub outcome: SubmitOutcome,
    pub slippage_used: u16,
    pub sealed_strategy: Option<SealedStrategy>,
    pub timestamp: DateTime<Utc>,
}

/// Withdraw result; `converted` is false when the swap-back leg had to
/// be dropped and the pool tokens were left in the wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawReceipt {
    pub converted: bool,
    pub reason: Option<String>,
    pub receipt: ExecutionReceipt,
}

struct Composed {
    txs: Vec<PreparedTx>,
    aux_signers: Vec<Keypair>,
    position_id: Option<String>,
}

/// Atomic LP entry: single collateral in, priced position out.
/// Holds the wallet lock for the whole escalation loop.
pub async fn atomic_open(
    ctx: &AppContext,
    wallet_id: &str,
    strategy: Strategy,
    mode: SubmitMode,
) -> Result<ExecutionReceipt> {
    let _lock = ctx.locks.try_acquire(wallet_id)?;
    let owner = owner_pubkey(ctx, wallet_id).await?;

    // Sealed once per intent; ciphertext never influences instruction bytes
    let sealed = ctx.sealer.seal(&strategy)?;

    let mut escalation = SlippageEscalation::new(strategy.slippage_bps);
    while let Some(attempt_bps) = escalation.current() {
        // Fresh oracle gate, quotes, simulation and blockhash per attempt
        let composed = compose_open(ctx, &strategy, attempt_bps, &owner, mode).await?;
        let position_id = composed.position_id.clone();
        let result = ctx
            .driver
            .submit(
                mode,
                wallet_id,
                strategy.venue,
                composed.txs,
                &composed.aux_signers,
            )
            .await;

        match result {
            Ok(outcome) if outcome.landed() => {
                escalation.land();
                ctx.indexer.invalidate(&owner.to_string()).await;
                info!("atomic open landed for {} at {}bps", wallet_id, attempt_bps);
                return Ok(ExecutionReceipt {
                    intent: "atomic_open".into(),
                    wallet: wallet_id.to_string(),
                    position_id,
                    outcome,
                    slippage_used: attempt_bps,
                    sealed_strategy: Some(sealed),
                    timestamp: Utc::now(),
                });
            }
            // Sequential mode reports on-chain failure as a partial
            // outcome, not an Err; fold it back into the ladder
            Ok(outcome) => {
                ctx.indexer.invalidate(&owner.to_string()).await;
                match classify_outcome_failure(strategy.venue, &outcome) {
                    Error::SlippageExceeded { .. } => {
                        warn!(
                            "slippage exceeded at {}bps for {}, escalating",
                            attempt_bps, wallet_id
                        );
                        escalation.escalate();
                    }
                    e => return Err(e),
                }
            }
            Err(Error::SlippageExceeded { .. }) => {
                warn!(
                    "slippage exceeded at {}bps for {}, escalating",
                    attempt_bps, wallet_id
                );
                escalation.escalate();
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::SlippageExhausted {
        last_bps: escalation.last_bps(),
    })
}

/// Open with pre-swapped balances: no routing legs, straight to the
/// venue's open/add instructions.
pub async fn execute_open(
    ctx: &AppContext,
    wallet_id: &str,
    strategy: Strategy,
    amount_a: u64,
    amount_b: u64,
    mode: SubmitMode,
) -> Result<ExecutionReceipt> {
    let _lock = ctx.locks.try_acquire(wallet_id)?;
    let owner = owner_pubkey(ctx, wallet_id).await?;
    let sealed = ctx.sealer.seal(&strategy)?;

    let adapter = ctx.adapters.adapter_for(strategy.venue)?;
    let pool = oracle_gated_pool(ctx, strategy.venue, &strategy.pool).await?;
    let range = adapter.compute_range(&pool, &strategy.shape)?;
    let build = adapter
        .build_open(
            &pool,
            range,
            amount_a,
            amount_b,
            &owner,
            strategy.distribution,
            strategy.slippage_bps,
        )
        .await?;

    let mut txs = vec![
        finalize_tx(
            ctx,
            build.instructions,
            &owner,
            strategy.urgency.into(),
            "open",
            true,
        )
        .await?,
    ];
    append_tip(ctx, &mut txs, &owner, strategy.urgency, mode).await?;

    let position_id = build.position_id.clone();
    let outcome = ctx
        .driver
        .submit(mode, wallet_id, strategy.venue, txs, &build.aux_signers)
        .await?;
    ctx.indexer.invalidate(&owner.to_string()).await;

    Ok(ExecutionReceipt {
        intent: "execute_open".into(),
        wallet: wallet_id.to_string(),
        position_id: Some(position_id),
        outcome,
        slippage_used: strategy.slippage_bps,
        sealed_strategy: Some(sealed),
        timestamp: Utc::now(),
    })
}

/// Withdraw a position and optionally convert everything back to one
/// collateral mint. The protocol fee applies only to the converted
/// amount; if the swap router is down the tokens stay in the wallet and
/// no fee is taken.
pub async fn withdraw(
    ctx: &AppContext,
    wallet_id: &str,
    position_id: &str,
    convert_to: Option<String>,
    urgency: TipUrgency,
    mode: SubmitMode,
) -> Result<WithdrawReceipt> {
    let _lock = ctx.locks.try_acquire(wallet_id)?;
    let owner = owner_pubkey(ctx, wallet_id).await?;

    let position = ctx.indexer.find(&owner.to_string(), position_id).await?;
    let pool = ctx.pools.describe(position.venue, &position.pool).await?;
    let adapter = ctx.adapters.adapter_for(position.venue)?;

    let decrease = adapter.build_decrease(&position, 10_000, true).await?;
    let mut txs = vec![
        finalize_tx(ctx, decrease, &owner, urgency.into(), "decrease_close", false).await?,
    ];

    // Swap-back legs; a router outage degrades to an unconverted withdraw
    let mut converted = false;
    let mut reason = None;
    if let Some(target) = &convert_to {
        match compose_swap_back(ctx, &position, &pool, target, &owner).await {
            Ok((swap_txs, converted_worst)) => {
                for tx in swap_txs {
                    txs.push(finalize_tx(ctx, tx, &owner, urgency.into(), "swap_back", false).await?);
                }
                let fee = protocol_fee(converted_worst, ctx.config.fees.protocol_fee_bps);
                if fee > 0 {
                    let fee_ix = fee_transfer_instruction(ctx, &owner, target, fee)?;
                    txs.push(
                        finalize_tx(ctx, vec![fee_ix], &owner, urgency.into(), "protocol_fee", false)
                            .await?,
                    );
                }
                converted = true;
            }
            Err(e) if matches!(e, Error::VenueUnavailable(_)) => {
                warn!("swap-back unavailable for {}: {}", position_id, e);
                reason = Some("swap_unavailable".to_string());
            }
            Err(e) => return Err(e),
        }
    }

    append_tip(ctx, &mut txs, &owner, urgency, mode).await?;

    let outcome = ctx
        .driver
        .submit(mode, wallet_id, position.venue, txs, &[])
        .await?;
    ctx.indexer.invalidate(&owner.to_string()).await;

    Ok(WithdrawReceipt {
        converted,
        reason,
        receipt: ExecutionReceipt {
            intent: "withdraw".into(),
            wallet: wallet_id.to_string(),
            position_id: Some(position_id.to_string()),
            outcome,
            slippage_used: 0,
            sealed_strategy: None,
            timestamp: Utc::now(),
        },
    })
}

/// Close the old position and reopen centered on the current index in
/// one atomic bundle. Width is preserved by default.
pub async fn rebalance(
    ctx: &AppContext,
    wallet_id: &str,
    position_id: &str,
    urgency: TipUrgency,
) -> Result<ExecutionReceipt> {
    let _lock = ctx.locks.try_acquire(wallet_id)?;
    let owner = owner_pubkey(ctx, wallet_id).await?;

    let position = ctx.indexer.find(&owner.to_string(), position_id).await?;
    let pool = oracle_gated_pool(ctx, position.venue, &position.pool).await?;
    let adapter = ctx.adapters.adapter_for(position.venue)?;

    let new_range = recenter_range(&position, &pool);
    let decrease = adapter.build_decrease(&position, 10_000, true).await?;
    let build = adapter
        .build_open(
            &pool,
            new_range,
            position.amount_a.max(1),
            position.amount_b.max(1),
            &owner,
            crate::types::Distribution::Spot,
            SLIPPAGE_LADDER[0],
        )
        .await?;

    let mut txs = vec![
        finalize_tx(ctx, decrease, &owner, urgency.into(), "decrease_close", false).await?,
        finalize_tx(ctx, build.instructions, &owner, urgency.into(), "reopen", true).await?,
    ];
    append_tip(ctx, &mut txs, &owner, urgency, SubmitMode::Bundle).await?;

    // The fresh position keypair goes to the custody oracle for
    // co-signing as part of the bundle
    let outcome = ctx
        .driver
        .submit(
            SubmitMode::Bundle,
            wallet_id,
            position.venue,
            txs,
            &build.aux_signers,
        )
        .await?;
    ctx.indexer.invalidate(&owner.to_string()).await;

    let _ = ctx
        .notifier
        .notify(&{
            let mut event = Event::new(
                EventKind::RebalanceExecuted,
                wallet_id,
                format!("Rebalanced into [{}, {}]", new_range.0, new_range.1),
            );
            event.position_id = Some(build.position_id.clone());
            event.pool = Some(pool.address.clone());
            event
        })
        .await;

    Ok(ExecutionReceipt {
        intent: "rebalance".into(),
        wallet: wallet_id.to_string(),
        position_id: Some(build.position_id),
        outcome,
        slippage_used: SLIPPAGE_LADDER[0],
        sealed_strategy: None,
        timestamp: Utc::now(),
    })
}

/// Harvest accrued fees without touching liquidity
pub async fn collect_fees(
    ctx: &AppContext,
    wallet_id: &str,
    position_id: &str,
    mode: SubmitMode,
) -> Result<ExecutionReceipt> {
    let _lock = ctx.locks.try_acquire(wallet_id)?;
    let owner = owner_pubkey(ctx, wallet_id).await?;

    let position = ctx.indexer.find(&owner.to_string(), position_id).await?;
    let adapter = ctx.adapters.adapter_for(position.venue)?;
    let instructions = adapter.build_collect_fees(&position).await?;

    let txs = vec![
        finalize_tx(ctx, instructions, &owner, FeeUrgency::Medium, "collect", false).await?,
    ];
    let outcome = ctx
        .driver
        .submit(mode, wallet_id, position.venue, txs, &[])
        .await?;
    ctx.indexer.invalidate(&owner.to_string()).await;

    Ok(ExecutionReceipt {
        intent: "collect_fees".into(),
        wallet: wallet_id.to_string(),
        position_id: Some(position_id.to_string()),
        outcome,
        slippage_used: 0,
        sealed_strategy: None,
        timestamp: Utc::now(),
    })
}

/// One escalation attempt's full composition
async fn compose_open(
    ctx: &AppContext,
    strategy: &Strategy,
    slippage_bps: u16,
    owner: &Pubkey,
    mode: SubmitMode,
) -> Result<Composed> {
    let adapter = ctx.adapters.adapter_for(strategy.venue)?;
    let pool = oracle_gated_pool(ctx, strategy.venue, &strategy.pool).await?;
    let range = adapter.compute_range(&pool, &strategy.shape)?;

    // Swap legs determined by where the collateral sits in the pair
    let plan = plan_swaps(
        &strategy.collateral_mint,
        &pool.token_a.mint,
        &pool.token_b.mint,
    );
    let mut txs = Vec::new();
    let (amount_a, amount_b) = match &plan {
        SwapPlan::SplitHalf { target_mint } => {
            let half = strategy.collateral_amount / 2;
            let quote = ctx
                .swap
                .quote(&strategy.collateral_mint, target_mint, half, slippage_bps)
                .await?;
            let swap_tx = ctx.swap.swap_transaction(&quote, owner, true).await?;
            txs.push(
                finalize_tx(
                    ctx,
                    budget::decompile(&swap_tx.message),
                    owner,
                    strategy.urgency.into(),
                    "swap",
                    false,
                )
                .await?,
            );
            if *target_mint == pool.token_b.mint {
                (strategy.collateral_amount - half, quote.out_amount)
            } else {
                (quote.out_amount, strategy.collateral_amount - half)
            }
        }
        SwapPlan::TwoLegs { mint_a, mint_b } => {
            let half = strategy.collateral_amount / 2;
            let quote_a = ctx
                .swap
                .quote(&strategy.collateral_mint, mint_a, half, slippage_bps)
                .await?;
            let quote_b = ctx
                .swap
                .quote(
                    &strategy.collateral_mint,
                    mint_b,
                    strategy.collateral_amount - half,
                    slippage_bps,
                )
                .await?;
            for quote in [&quote_a, &quote_b] {
                let swap_tx = ctx.swap.swap_transaction(quote, owner, true).await?;
                txs.push(
                    finalize_tx(
                        ctx,
                        budget::decompile(&swap_tx.message),
                        owner,
                        strategy.urgency.into(),
                        "swap",
                        false,
                    )
                    .await?,
                );
            }
            (quote_a.out_amount, quote_b.out_amount)
        }
    };

    // Liquidity quote over the post-swap expected balances
    let quote = adapter.quote_liquidity(&pool, range, amount_a, amount_b, slippage_bps)?;
    let build = adapter
        .build_open(
            &pool,
            range,
            quote.expected_a.min(amount_a),
            quote.expected_b.min(amount_b),
            owner,
            strategy.distribution,
            slippage_bps,
        )
        .await?;
    let position_id = build.position_id.clone();
    txs.push(
        finalize_tx(
            ctx,
            build.instructions,
            owner,
            strategy.urgency.into(),
            "open",
            true,
        )
        .await?,
    );

    append_tip(ctx, &mut txs, owner, strategy.urgency, mode).await?;

    Ok(Composed {
        txs,
        aux_signers: build.aux_signers,
        position_id: Some(position_id),
    })
}

/// Swap the non-`target` pool sides back to `target`; returns the
/// unsigned swap transactions and the worst-case converted amount the
/// fee applies to. A side already denominated in `target` was never
/// converted and stays out of the fee base.
async fn compose_swap_back(
    ctx: &AppContext,
    position: &Position,
    pool: &Pool,
    target: &str,
    owner: &Pubkey,
) -> Result<(Vec<Vec<Instruction>>, u64)> {
    let mut txs = Vec::new();
    let mut converted_worst: u64 = 0;
    let legs = [
        (&pool.token_a.mint, position.amount_a + position.fee_a),
        (&pool.token_b.mint, position.amount_b + position.fee_b),
    ];
    for (mint, amount) in legs {
        if *mint == target || amount == 0 {
            continue;
        }
        let quote = ctx
            .swap
            .quote(mint, target, amount, SLIPPAGE_LADDER[0])
            .await?;
        let swap_tx = ctx.swap.swap_transaction(&quote, owner, false).await?;
        txs.push(budget::decompile(&swap_tx.message));
        converted_worst += quote.other_amount_threshold;
    }
    Ok((txs, converted_worst))
}

/// New range with the old width, centered on the live index
pub fn recenter_range(position: &Position, pool: &Pool) -> (i32, i32) {
    let unit = pool.granularity.unit().max(1);
    let width_units = ((position.upper_index - position.lower_index) / unit).max(2);
    let half = width_units / 2;
    match pool.granularity {
        Granularity::BinStep(step) => math::snap_bin_range(pool.active_index, step, half),
        Granularity::TickSpacing(spacing) => {
            math::snap_tick_range(pool.active_index, spacing, half)
        }
    }
}

/// Map a non-landed submission outcome to the taxonomy. Program errors
/// in the failure reason are classified against the venue's codes so a
/// sequential slippage failure still drives the escalation ladder.
fn classify_outcome_failure(venue: Venue, outcome: &SubmitOutcome) -> Error {
    let reason = outcome.reason.as_deref().unwrap_or("submission failed");
    if reason.contains("custom program error") {
        return classify_simulation_failure(venue, reason, &[]);
    }
    Error::Internal(format!(
        "submission failed at tx {} ({} landed): {}",
        outcome.failed_at.unwrap_or(0),
        outcome.landed_txs.len(),
        reason
    ))
}

/// Protocol take on a withdrawn notional
pub fn protocol_fee(amount: u64, fee_bps: u16) -> u64 {
    ((amount as u128) * (fee_bps as u128) / 10_000) as u64
}

/// Fee transfer to the treasury, always as an SPL transfer from the
/// converted mint's token account. Swap-back proceeds land in the
/// owner's token account for the target mint (wrapped SOL included),
/// so the fee never touches the wallet's native gas balance.
fn fee_transfer_instruction(
    ctx: &AppContext,
    owner: &Pubkey,
    mint: &str,
    amount: u64,
) -> Result<Instruction> {
    let treasury = Pubkey::from_str(&ctx.config.fees.treasury)
        .map_err(|e| Error::Config(format!("treasury address: {}", e)))?;
    let mint = Pubkey::from_str(mint)
        .map_err(|e| Error::Validation(format!("invalid mint {}: {}", mint, e)))?;
    let source = spl_associated_token_account::get_associated_token_address(owner, &mint);
    let destination = spl_associated_token_account::get_associated_token_address(&treasury, &mint);
    spl_token::instruction::transfer(&spl_token::ID, &source, &destination, owner, &[], amount)
        .map_err(|e| Error::Internal(format!("fee transfer build: {}", e)))
}

/// Pool price-checked against the oracle gate
async fn oracle_gated_pool(
    ctx: &AppContext,
    venue: Venue,
    address: &str,
) -> Result<Pool> {
    let pool = ctx.pools.describe(venue, address).await?;
    for token in [&pool.token_a, &pool.token_b] {
        let price = ctx.oracle.price(&token.mint).await?;
        if price.unreliable {
            return Err(Error::OracleUnreliable(format!(
                "{} price diverged or went stale",
                token.symbol
            )));
        }
    }
    Ok(pool)
}

/// Simulate, size the budget, prepend the compute-budget pair, rebuild
/// against a fresh blockhash.
async fn finalize_tx(
    ctx: &AppContext,
    instructions: Vec<Instruction>,
    payer: &Pubkey,
    urgency: FeeUrgency,
    label: &str,
    needs_aux: bool,
) -> Result<PreparedTx> {
    let draft = Transaction::new_unsigned(Message::new(&instructions, Some(payer)));
    let estimate = budget::estimate(&ctx.rpc, &draft, urgency).await?;
    let budgeted = budget::apply_budget(instructions, &estimate);

    let blockhash = ctx.rpc.get_latest_blockhash().await?;
    let message = Message::new_with_blockhash(&budgeted, Some(payer), &blockhash);
    Ok(PreparedTx {
        transaction: Transaction::new_unsigned(message),
        label: label.to_string(),
        needs_aux,
    })
}

/// Append the relay tip transaction; sequential mode and SKIP omit it
async fn append_tip(
    ctx: &AppContext,
    txs: &mut Vec<PreparedTx>,
    owner: &Pubkey,
    urgency: TipUrgency,
    mode: SubmitMode,
) -> Result<()> {
    if mode != SubmitMode::Bundle {
        return Ok(());
    }
    let lamports = ctx.relay.tip_lamports(urgency);
    if lamports == 0 {
        return Ok(());
    }
    let tip = tip_instruction(owner, &ctx.relay.tip_account(), lamports);
    txs.push(finalize_tx(ctx, vec![tip], owner, urgency.into(), "tip", false).await?);
    Ok(())
}

async fn owner_pubkey(ctx: &AppContext, wallet_id: &str) -> Result<Pubkey> {
    let profile = ctx.wallets.load(wallet_id).await?;
    Pubkey::from_str(&profile.address)
        .map_err(|e| Error::Internal(format!("stored address invalid: {}", e)))
}

/// Out-of-range event with the rebalance suggestion attached
pub fn out_of_range_event(position: &Position, drift_units: u32) -> Event {
    let mut event = Event::new(
        EventKind::OutOfRange,
        &position.wallet,
        format!(
            "Pool index left [{}, {}]",
            position.lower_index, position.upper_index
        ),
    );
    event.position_id = Some(position.id.clone());
    event.pool = Some(position.pool.clone());
    event.drift_units = Some(drift_units);
    event.suggested_action = Some(SuggestedAction {
        endpoint: "/lp/rebalance".into(),
        params: json!({ "position": position.id }),
    });
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TokenInfo, Venue};

    fn drain(mut escalation: SlippageEscalation) -> Vec<u16> {
        let mut attempts = Vec::new();
        while let Some(bps) = escalation.current() {
            attempts.push(bps);
            escalation.escalate();
        }
        attempts
    }

    #[test]
    fn test_escalation_ladder() {
        assert_eq!(drain(SlippageEscalation::new(300)), vec![300, 500, 750, 1000]);
        assert_eq!(drain(SlippageEscalation::new(500)), vec![500, 750, 1000]);
        assert_eq!(
            drain(SlippageEscalation::new(100)),
            vec![100, 300, 500, 750, 1000]
        );
        // Above the ladder: a single attempt, then exhaustion
        assert_eq!(drain(SlippageEscalation::new(2000)), vec![2000]);
    }

    #[test]
    fn test_escalation_terminal_states() {
        let mut escalation = SlippageEscalation::new(1000);
        assert_eq!(escalation.current(), Some(1000));
        escalation.escalate();
        assert_eq!(escalation.current(), None);
        assert_eq!(escalation.last_bps(), 1000);

        let mut landed = SlippageEscalation::new(300);
        landed.land();
        assert_eq!(landed.current(), None);
        // Escalate after landing is a no-op
        landed.escalate();
        assert_eq!(landed.current(), None);
    }

    #[test]
    fn test_classify_outcome_failure() {
        let outcome = |reason: &str| SubmitOutcome {
            mode: SubmitMode::Sequential,
            bundle_id: None,
            landed_txs: vec!["sig".into()],
            failed_at: Some(1),
            reason: Some(reason.into()),
        };

        // DLMM slippage code (0x1774 = 6004) re-enters the ladder
        let e = classify_outcome_failure(
            Venue::Dlmm,
            &outcome("Error processing Instruction 2: custom program error: 0x1774"),
        );
        assert!(matches!(e, Error::SlippageExceeded { .. }));

        // Anything else surfaces as a failure, never a landing
        let e = classify_outcome_failure(Venue::Dlmm, &outcome("blockhash not found"));
        assert!(matches!(e, Error::Internal(_)));

        // Whirlpool pause code (0x1796 = 6038) stays fatal
        let e = classify_outcome_failure(
            Venue::Whirlpool,
            &outcome("custom program error: 0x1796"),
        );
        assert!(matches!(e, Error::PoolPaused(_)));
    }

    #[test]
    fn test_protocol_fee() {
        // 1% of 1 SOL
        assert_eq!(protocol_fee(1_000_000_000, 100), 10_000_000);
        assert_eq!(protocol_fee(0, 100), 0);
        assert_eq!(protocol_fee(99, 100), 0);
        assert_eq!(protocol_fee(10_000, 100), 100);
    }

    fn pool(granularity: Granularity, active: i32) -> Pool {
        Pool {
            address: "pool".into(),
            venue: match granularity {
                Granularity::BinStep(_) => Venue::Dlmm,
                Granularity::TickSpacing(_) => Venue::Whirlpool,
            },
            token_a: TokenInfo {
                mint: "a".into(),
                symbol: "A".into(),
                decimals: 9,
            },
            token_b: TokenInfo {
                mint: "b".into(),
                symbol: "B".into(),
                decimals: 6,
            },
            current_price: 1.0,
            active_index: active,
            granularity,
            tvl_usd: 0.0,
            volume_24h_usd: 0.0,
            fee_bps: 30,
            apr: 0.0,
            risk_score: 1,
        }
    }

    fn position(lower: i32, upper: i32) -> Position {
        Position {
            id: "pos".into(),
            wallet: "w".into(),
            pool: "pool".into(),
            venue: Venue::Dlmm,
            lower_index: lower,
            upper_index: upper,
            lower_price: 0.0,
            upper_price: 0.0,
            liquidity: 1,
            amount_a: 1,
            amount_b: 1,
            fee_a: 0,
            fee_b: 0,
            fee_a_ui: 0.0,
            fee_b_ui: 0.0,
            in_range: false,
        }
    }

    #[test]
    fn test_recenter_preserves_width() {
        // Old range [4950, 5050] on bin step 10: width 10 units.
        // Pool drifted to 5100: new range keeps the +/-5 unit shape.
        let p = pool(Granularity::BinStep(10), 5100);
        let range = recenter_range(&position(4950, 5050), &p);
        assert_eq!(range, (5050, 5150));
    }

    #[test]
    fn test_recenter_tick_venue() {
        let p = pool(Granularity::TickSpacing(64), 2560);
        let range = recenter_range(&position(960, 1600), &p);
        assert_eq!(range, (2240, 2880));
        assert_eq!(range.1 - range.0, 1600 - 960);
    }

    #[test]
    fn test_out_of_range_event_shape() {
        let event = out_of_range_event(&position(4950, 5050), 1);
        assert_eq!(event.kind, EventKind::OutOfRange);
        assert_eq!(event.drift_units, Some(1));
        let action = event.suggested_action.unwrap();
        assert_eq!(action.endpoint, "/lp/rebalance");
        assert_eq!(action.params["position"], "pos");
    }
}
