//! Pool position table.

use anchor_lang::prelude::*;

use crate::distribute;
use crate::state::{
    CoreError, CoreState, MarketPoolEntry, Pool, PoolMarketPosition, MAX_POOLS,
    MAX_POSITIONS_PER_POOL,
};

/// Create a pool owned by `owner` and assign it the next id.
pub fn create_pool(state: &mut CoreState, owner: Pubkey) -> Result<u64> {
    require!(state.pools.len() < MAX_POOLS, CoreError::TableFull);
    let pool_id = state.pools.len() as u64;
    state.pools.push(Pool {
        id: pool_id,
        owner,
        ..Default::default()
    });
    Ok(pool_id)
}

/// Replace the pool's market positions.
///
/// Every currently configured market is flushed under the old weights
/// first, so accrued debt cannot be escaped by repositioning, and every
/// newly entered market is flushed too, so the entrant's allocation starts
/// from the balance at entry time. Weight zero means "disconnect" and the
/// entry is dropped after the flush; empty arrays clear everything (the
/// exit case). Debt already assigned up to the flush stays with the pool.
pub fn set_pool_position(
    state: &mut CoreState,
    pool_id: u64,
    caller: Pubkey,
    market_ids: &[u64],
    weights: &[u64],
    caps: &[i128],
) -> Result<()> {
    {
        let pool = state.pool(pool_id)?;
        require_keys_eq!(pool.owner, caller, CoreError::Unauthorized);
    }
    require!(
        market_ids.len() == weights.len() && weights.len() == caps.len(),
        CoreError::ArrayLengthMismatch
    );
    require!(
        market_ids.len() <= MAX_POSITIONS_PER_POOL,
        CoreError::InvalidParameters
    );
    for (index, market_id) in market_ids.iter().enumerate() {
        require!(
            (*market_id as usize) < state.markets.len(),
            CoreError::MarketNotFound
        );
        require!(
            !market_ids[..index].contains(market_id),
            CoreError::InvalidParameters
        );
    }
    require!(caps.iter().all(|cap| *cap >= 0), CoreError::InvalidParameters);

    // Flush old and new markets before any weight changes.
    let old_market_ids: Vec<u64> = state
        .pool(pool_id)?
        .positions
        .iter()
        .map(|p| p.market_id)
        .collect();
    for market_id in &old_market_ids {
        distribute::poke_market(state, *market_id)?;
    }
    for market_id in market_ids {
        if !old_market_ids.contains(market_id) {
            distribute::poke_market(state, *market_id)?;
        }
    }

    let mut new_positions: Vec<PoolMarketPosition> = Vec::new();
    let mut new_total_weight: u64 = 0;
    for index in 0..market_ids.len() {
        if weights[index] == 0 {
            continue;
        }
        new_positions.push(PoolMarketPosition {
            market_id: market_ids[index],
            weight: weights[index],
            max_debt_per_share: caps[index],
        });
        new_total_weight = new_total_weight
            .checked_add(weights[index])
            .ok_or(CoreError::MathOverflow)?;
    }

    // Detach from markets the pool is leaving. The market-side debt record
    // goes with the entry; the debt itself already sits in the pool's
    // vaults and does not evaporate.
    for market_id in &old_market_ids {
        if new_positions.iter().any(|p| p.market_id == *market_id) {
            continue;
        }
        let market = state.market_mut(*market_id)?;
        if let Some(entry_index) = market.entries.iter().position(|e| e.pool_id == pool_id) {
            let entry = market.entries.swap_remove(entry_index);
            market.total_weight = market
                .total_weight
                .checked_sub(entry.weight)
                .ok_or(CoreError::MathOverflow)?;
        }
    }

    // Upsert the kept and newly entered markets. Assigned debt survives a
    // weight or cap change; a fresh entry starts its cap accounting at zero.
    for position in &new_positions {
        let market = state.market_mut(position.market_id)?;
        match market.entries.iter().position(|e| e.pool_id == pool_id) {
            Some(entry_index) => {
                let previous_weight = market.entries[entry_index].weight;
                market.total_weight = market
                    .total_weight
                    .checked_sub(previous_weight)
                    .and_then(|w| w.checked_add(position.weight))
                    .ok_or(CoreError::MathOverflow)?;
                market.entries[entry_index].weight = position.weight;
                market.entries[entry_index].max_debt_per_share = position.max_debt_per_share;
            }
            None => {
                market.entries.push(MarketPoolEntry {
                    pool_id,
                    weight: position.weight,
                    max_debt_per_share: position.max_debt_per_share,
                    assigned_debt: 0,
                });
                market.total_weight = market
                    .total_weight
                    .checked_add(position.weight)
                    .ok_or(CoreError::MathOverflow)?;
            }
        }
    }

    let pool = state.pool_mut(pool_id)?;
    pool.positions = new_positions;
    pool.total_weight = new_total_weight;
    Ok(())
}
