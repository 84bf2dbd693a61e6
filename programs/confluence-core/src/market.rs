//! Market registry, liquidity-ratio configuration and the derived
//! liquidity/debt views.

use anchor_lang::prelude::*;

use crate::distribute;
use crate::math::mul_div_floor;
use crate::state::{CoreError, CoreState, Market, MAX_MARKETS, RATIO_SCALE};
use crate::vault::collateral_value;

/// Register an external market and assign it the next id. Registration is
/// permissionless; only the registered address may report balances.
pub fn register_market(state: &mut CoreState, market_address: Pubkey) -> Result<u64> {
    require!(
        state.markets.iter().all(|m| m.address != market_address),
        CoreError::MarketAlreadyRegistered
    );
    require!(state.markets.len() < MAX_MARKETS, CoreError::TableFull);
    let market_id = state.markets.len() as u64;
    state.markets.push(Market {
        id: market_id,
        address: market_address,
        ..Default::default()
    });
    Ok(market_id)
}

/// Overwrite the market's reported balance. Distribution stays lazy: the
/// delta is settled by whichever call next pokes the market.
pub fn report_balance(
    state: &mut CoreState,
    caller: Pubkey,
    market_id: u64,
    new_balance: i128,
) -> Result<()> {
    let market = state.market_mut(market_id)?;
    require_keys_eq!(market.address, caller, CoreError::Unauthorized);
    market.reported_balance = new_balance;
    Ok(())
}

/// Set the process-wide minimum liquidity ratio (RATIO_SCALE fixed point,
/// at least 1.0). Tightens capacity on the next recomputation only; debt
/// already assigned is unaffected.
pub fn set_min_liquidity_ratio(state: &mut CoreState, ratio: u64) -> Result<()> {
    require!(ratio >= RATIO_SCALE, CoreError::InvalidParameters);
    state.min_liquidity_ratio = ratio;
    Ok(())
}

/// Remaining capacity the market can draw on, summed over participating
/// pools: the lesser of each pool's ratio-discounted collateral value and
/// its configured debt cap, minus what is already assigned. Settles the
/// market first.
pub fn market_liquidity(state: &mut CoreState, market_id: u64) -> Result<i128> {
    distribute::poke_market(state, market_id)?;

    let min_ratio = state.min_liquidity_ratio as i128;
    let market = state.market(market_id)?;
    let mut liquidity: i128 = 0;
    for entry in &market.entries {
        let pool = state.pool(entry.pool_id)?;
        let shares =
            distribute::pool_shares_in_market(pool.total_collateral, entry.weight, pool.total_weight);
        let value_in_market = collateral_value(pool.total_collateral)
            .checked_mul(entry.weight as i128)
            .ok_or(CoreError::MathOverflow)?
            / pool.total_weight.max(1) as i128;
        let collateral_cap = mul_div_floor(value_in_market, RATIO_SCALE as i128, min_ratio)?;
        let debt_cap = distribute::entry_capacity(entry.max_debt_per_share, shares);
        let available = collateral_cap
            .min(debt_cap)
            .checked_sub(entry.assigned_debt)
            .ok_or(CoreError::MathOverflow)?;
        liquidity = liquidity
            .checked_add(available)
            .ok_or(CoreError::MathOverflow)?;
    }
    Ok(liquidity)
}

/// Net debt pushed into one (pool, mint) vault, after settling the pool's
/// markets.
pub fn vault_debt(
    state: &mut CoreState,
    pool_id: u64,
    collateral_mint: Pubkey,
) -> Result<i128> {
    state.pool(pool_id)?;
    distribute::poke_pool_markets(state, pool_id)?;
    let vault_index = state
        .vault_index(pool_id, &collateral_mint)
        .ok_or(CoreError::VaultNotFound)?;
    Ok(state.vaults[vault_index].total_debt)
}
