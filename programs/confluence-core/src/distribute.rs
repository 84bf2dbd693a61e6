//! Debt distribution engine.
//!
//! A market's reported balance is settled lazily: whoever touches the
//! market next (a query, a position change, a delegation) pays for one
//! O(participants) pass that allocates the balance delta since the last
//! checkpoint across the pools positioned in the market. Caps are applied
//! by iterative water-filling; whatever no pool can absorb stays parked on
//! the market and rides along with the next pass.

use anchor_lang::prelude::*;

use crate::state::{CoreError, CoreState, PER_SHARE_SCALE};

struct Candidate {
    entry_index: usize,
    pool_id: u64,
    weight: u64,
    remaining_capacity: i128,
    assigned: i128,
    saturated: bool,
}

/// A pool's share count inside one market: its delegated collateral
/// apportioned by the position weight.
pub(crate) fn pool_shares_in_market(
    pool_collateral: u64,
    weight: u64,
    pool_total_weight: u64,
) -> i128 {
    if pool_total_weight == 0 {
        return 0;
    }
    let shares = (pool_collateral as u128) * (weight as u128) / (pool_total_weight as u128);
    shares as i128
}

/// Debt cap for an entry. Saturating: a near-maximal `max_debt_per_share`
/// behaves as "uncapped" instead of aborting on overflow, which is sound
/// because the product is only a bound, never a ledger value.
pub(crate) fn entry_capacity(max_debt_per_share: i128, shares_in_market: i128) -> i128 {
    max_debt_per_share.saturating_mul(shares_in_market) / PER_SHARE_SCALE
}

/// Settle `market_id`'s balance delta across the pools positioned in it.
///
/// Idempotent: a second call with no intervening report or position change
/// is a no-op. The checkpoint advances even when the market has no pools,
/// which is what freezes history between an exit and the next entry.
pub fn poke_market(state: &mut CoreState, market_id: u64) -> Result<()> {
    let (delta, total_weight) = {
        let market = state.market(market_id)?;
        let delta = market
            .reported_balance
            .checked_sub(market.last_distributed_balance)
            .and_then(|d| d.checked_add(market.undistributed))
            .ok_or(CoreError::MathOverflow)?;
        (delta, market.total_weight)
    };

    if delta == 0 || total_weight == 0 {
        let market = state.market_mut(market_id)?;
        market.last_distributed_balance = market.reported_balance;
        market.undistributed = 0;
        return Ok(());
    }

    let mut candidates = build_candidates(state, market_id)?;

    let leftover = if delta > 0 {
        water_fill(&mut candidates, delta)?
    } else {
        spread_by_weight(&mut candidates, delta, total_weight)?;
        0
    };

    for i in 0..candidates.len() {
        let assigned = candidates[i].assigned;
        if assigned == 0 {
            continue;
        }
        let entry_index = candidates[i].entry_index;
        let pool_id = candidates[i].pool_id;
        {
            let entry = &mut state.market_mut(market_id)?.entries[entry_index];
            entry.assigned_debt = entry
                .assigned_debt
                .checked_add(assigned)
                .ok_or(CoreError::MathOverflow)?;
        }
        push_pool_debt(state, pool_id, assigned)?;
    }

    let market = state.market_mut(market_id)?;
    market.last_distributed_balance = market.reported_balance;
    market.undistributed = leftover;

    emit!(crate::DebtDistributed {
        market_id,
        delta,
        undistributed: leftover,
    });
    Ok(())
}

/// Settle every market the pool is positioned in. Run before any read or
/// write that depends on the pool's debt being current.
pub fn poke_pool_markets(state: &mut CoreState, pool_id: u64) -> Result<()> {
    let market_ids: Vec<u64> = state
        .pool(pool_id)?
        .positions
        .iter()
        .map(|p| p.market_id)
        .collect();
    for market_id in market_ids {
        poke_market(state, market_id)?;
    }
    Ok(())
}

fn build_candidates(state: &CoreState, market_id: u64) -> Result<Vec<Candidate>> {
    let market = state.market(market_id)?;
    let mut candidates = Vec::with_capacity(market.entries.len());
    for (entry_index, entry) in market.entries.iter().enumerate() {
        let pool = state.pool(entry.pool_id)?;
        let shares = pool_shares_in_market(pool.total_collateral, entry.weight, pool.total_weight);
        let capacity = entry_capacity(entry.max_debt_per_share, shares);
        let remaining_capacity = capacity.saturating_sub(entry.assigned_debt);
        candidates.push(Candidate {
            entry_index,
            pool_id: entry.pool_id,
            weight: entry.weight,
            remaining_capacity,
            assigned: 0,
            // Over-cap entries sit out from the start and are never
            // clamped a second time.
            saturated: remaining_capacity <= 0,
        });
    }
    Ok(candidates)
}

/// Distribute a positive delta proportionally to weight, clamping entries
/// at their remaining capacity and re-spreading the excess over the
/// still-open entries. Terminates because every extra pass saturates at
/// least one entry. Returns whatever nobody could absorb.
fn water_fill(candidates: &mut [Candidate], mut remaining_delta: i128) -> Result<i128> {
    loop {
        let active_weight: i128 = candidates
            .iter()
            .filter(|c| !c.saturated)
            .map(|c| c.weight as i128)
            .sum();
        if active_weight == 0 || remaining_delta == 0 {
            return Ok(remaining_delta);
        }

        // Telescoping cumulative split: per-entry skew stays below one
        // unit and the pass consumes its delta exactly when nobody clamps.
        let pass_delta = remaining_delta;
        let mut cumulative_weight: i128 = 0;
        let mut previous_allocation: i128 = 0;
        let mut consumed: i128 = 0;
        let mut newly_capped = false;

        for candidate in candidates.iter_mut().filter(|c| !c.saturated) {
            cumulative_weight += candidate.weight as i128;
            let allocation = pass_delta
                .checked_mul(cumulative_weight)
                .ok_or(CoreError::MathOverflow)?
                / active_weight;
            let mut share = allocation - previous_allocation;
            previous_allocation = allocation;

            if share >= candidate.remaining_capacity {
                share = candidate.remaining_capacity;
                candidate.saturated = true;
                newly_capped = true;
            }
            candidate.assigned = candidate
                .assigned
                .checked_add(share)
                .ok_or(CoreError::MathOverflow)?;
            candidate.remaining_capacity -= share;
            consumed += share;
        }

        remaining_delta = remaining_delta
            .checked_sub(consumed)
            .ok_or(CoreError::MathOverflow)?;
        if !newly_capped {
            return Ok(remaining_delta);
        }
    }
}

/// Distribute a negative delta (market profit) purely by weight. Caps do
/// not bind on credits and nothing is left over.
fn spread_by_weight(candidates: &mut [Candidate], delta: i128, total_weight: u64) -> Result<()> {
    let divisor = total_weight as i128;
    let mut cumulative_weight: i128 = 0;
    let mut previous_allocation: i128 = 0;
    for candidate in candidates.iter_mut() {
        cumulative_weight += candidate.weight as i128;
        let allocation = delta
            .checked_mul(cumulative_weight)
            .ok_or(CoreError::MathOverflow)?
            / divisor;
        candidate.assigned = allocation - previous_allocation;
        previous_allocation = allocation;
    }
    Ok(())
}

/// Push a pool-level debt delta down into the pool's vaults, pro-rata by
/// vault collateral. Any previously parked debt rides along; if no vault
/// has shares the whole amount parks on the pool until a depositor exists.
pub(crate) fn push_pool_debt(state: &mut CoreState, pool_id: u64, amount: i128) -> Result<()> {
    let parked = state.pool(pool_id)?.pending_debt;
    let total = amount.checked_add(parked).ok_or(CoreError::MathOverflow)?;
    state.pool_mut(pool_id)?.pending_debt = 0;
    if total == 0 {
        return Ok(());
    }

    let funded: Vec<(usize, u64)> = state
        .vaults
        .iter()
        .enumerate()
        .filter(|(_, v)| v.pool_id == pool_id && v.total_shares > 0)
        .map(|(i, v)| (i, v.total_collateral))
        .collect();
    let divisor: i128 = funded.iter().map(|(_, c)| *c as i128).sum();
    if divisor == 0 {
        state.pool_mut(pool_id)?.pending_debt = total;
        return Ok(());
    }

    let mut cumulative: i128 = 0;
    let mut previous_allocation: i128 = 0;
    for (vault_index, collateral) in funded {
        cumulative += collateral as i128;
        let allocation = total
            .checked_mul(cumulative)
            .ok_or(CoreError::MathOverflow)?
            / divisor;
        let share = allocation - previous_allocation;
        previous_allocation = allocation;
        if share != 0 {
            crate::vault::apply_debt_delta(&mut state.vaults[vault_index], share)?;
        }
    }
    Ok(())
}
