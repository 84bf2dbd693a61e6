//! Vault share ledger.
//!
//! Each (pool, collateral mint) vault tracks a debt-per-share accumulator.
//! Distributing debt bumps the accumulator once; an account reconciles
//! lazily against its own snapshot the next time it is touched, so no
//! distribution ever walks the account table.

use anchor_lang::prelude::*;

use crate::distribute;
use crate::math::{mul_div_ceil, mul_div_ceil_u128};
use crate::state::{
    AccountPosition, CoreError, CoreState, Vault, MAX_ACCOUNT_POSITIONS, MAX_VAULTS,
    PER_SHARE_SCALE, RATIO_SCALE,
};

/// Value of a collateral amount in the unit of account. One seam for a
/// price feed; the core treats one token unit as one unit of value.
pub fn collateral_value(amount: u64) -> i128 {
    amount as i128
}

/// Engine-only: spread `amount` across the vault's shareholders by bumping
/// the accumulator once. The ceiling rounds the per-share increment in the
/// ledger's favor.
pub fn apply_debt_delta(vault: &mut Vault, amount: i128) -> Result<()> {
    require!(vault.total_shares > 0, CoreError::EmptyVault);
    let total_shares = i128::try_from(vault.total_shares).map_err(|_| CoreError::MathOverflow)?;
    let increment = mul_div_ceil(amount, PER_SHARE_SCALE, total_shares)?;
    vault.value_per_share = vault
        .value_per_share
        .checked_add(increment)
        .ok_or(CoreError::MathOverflow)?;
    vault.total_debt = vault
        .total_debt
        .checked_add(amount)
        .ok_or(CoreError::MathOverflow)?;
    Ok(())
}

/// Debt accrued by a position since its last snapshot. Pure; the caller
/// commits it together with the snapshot advance.
fn accrued_debt(position: &AccountPosition, vault: &Vault) -> Result<i128> {
    let diff = vault
        .value_per_share
        .checked_sub(position.last_value_per_share)
        .ok_or(CoreError::MathOverflow)?;
    if diff == 0 || position.shares == 0 {
        return Ok(0);
    }
    let shares = i128::try_from(position.shares).map_err(|_| CoreError::MathOverflow)?;
    mul_div_ceil(shares, diff, PER_SHARE_SCALE)
}

/// Shares minted for a deposit at the current collateral-per-share ratio,
/// 1:1 on the first deposit. Floors, so a depositor never receives the
/// rounding share.
fn shares_for_deposit(amount: u64, total_shares: u128, total_collateral: u64) -> Result<u128> {
    if total_shares == 0 || total_collateral == 0 {
        return Ok(amount as u128);
    }
    (amount as u128)
        .checked_mul(total_shares)
        .ok_or(CoreError::MathOverflow)?
        .checked_div(total_collateral as u128)
        .ok_or_else(|| error!(CoreError::MathOverflow))
}

/// Deposit (positive delta) or withdraw (negative delta) collateral for
/// `owner` in the (pool, mint) vault.
///
/// The pool's markets are flushed first so shares are minted and burned
/// against fully settled debt, and the account's pending debt is realized
/// before its share count changes. Validation happens before any write:
/// a failing withdrawal leaves the ledger untouched.
pub fn delegate(
    state: &mut CoreState,
    owner: Pubkey,
    pool_id: u64,
    collateral_mint: Pubkey,
    amount_delta: i64,
) -> Result<()> {
    state.pool(pool_id)?;
    distribute::poke_pool_markets(state, pool_id)?;

    if amount_delta == 0 {
        // Refresh touch: realize pending debt if the position exists.
        if let (Some(vault_index), Some(position_index)) = (
            state.vault_index(pool_id, &collateral_mint),
            state.position_index(&owner, pool_id, &collateral_mint),
        ) {
            let vault = state.vaults[vault_index].clone();
            let position = &mut state.positions[position_index];
            position.debt = position
                .debt
                .checked_add(accrued_debt(position, &vault)?)
                .ok_or(CoreError::MathOverflow)?;
            position.last_value_per_share = vault.value_per_share;
        }
        return Ok(());
    }

    let vault_index = match state.vault_index(pool_id, &collateral_mint) {
        Some(index) => index,
        None => {
            require!(amount_delta > 0, CoreError::VaultNotFound);
            require!(state.vaults.len() < MAX_VAULTS, CoreError::TableFull);
            state.vaults.push(Vault {
                pool_id,
                collateral_mint,
                ..Default::default()
            });
            state.vaults.len() - 1
        }
    };
    let position_index = match state.position_index(&owner, pool_id, &collateral_mint) {
        Some(index) => index,
        None => {
            require!(amount_delta > 0, CoreError::PositionNotFound);
            require!(
                state.positions.len() < MAX_ACCOUNT_POSITIONS,
                CoreError::TableFull
            );
            state.positions.push(AccountPosition {
                owner,
                pool_id,
                collateral_mint,
                last_value_per_share: state.vaults[vault_index].value_per_share,
                ..Default::default()
            });
            state.positions.len() - 1
        }
    };

    let vault_snapshot = state.vaults[vault_index].clone();
    let position_snapshot = state.positions[position_index].clone();
    let realized_debt = position_snapshot
        .debt
        .checked_add(accrued_debt(&position_snapshot, &vault_snapshot)?)
        .ok_or(CoreError::MathOverflow)?;

    if amount_delta > 0 {
        let amount = amount_delta as u64;
        let minted = shares_for_deposit(
            amount,
            vault_snapshot.total_shares,
            vault_snapshot.total_collateral,
        )?;
        require!(minted > 0, CoreError::InvalidParameters);

        let position = &mut state.positions[position_index];
        position.debt = realized_debt;
        position.last_value_per_share = vault_snapshot.value_per_share;
        position.collateral_amount = position
            .collateral_amount
            .checked_add(amount)
            .ok_or(CoreError::MathOverflow)?;
        position.shares = position
            .shares
            .checked_add(minted)
            .ok_or(CoreError::MathOverflow)?;

        let vault = &mut state.vaults[vault_index];
        vault.total_collateral = vault
            .total_collateral
            .checked_add(amount)
            .ok_or(CoreError::MathOverflow)?;
        vault.total_shares = vault
            .total_shares
            .checked_add(minted)
            .ok_or(CoreError::MathOverflow)?;

        let pool = state.pool_mut(pool_id)?;
        pool.total_collateral = pool
            .total_collateral
            .checked_add(amount)
            .ok_or(CoreError::MathOverflow)?;

        // A depositor now exists: any debt parked on the pool can land.
        if state.pool(pool_id)?.pending_debt != 0 {
            distribute::push_pool_debt(state, pool_id, 0)?;
        }
    } else {
        let amount = amount_delta.unsigned_abs();
        require!(
            position_snapshot.collateral_amount >= amount,
            CoreError::InsufficientCollateral
        );
        // Burn pro-rata to the account's own holding, rounded up, so no
        // shares survive without collateral behind them.
        let burned = mul_div_ceil_u128(
            position_snapshot.shares,
            amount as u128,
            position_snapshot.collateral_amount as u128,
        )?
        .min(position_snapshot.shares);

        let remaining_collateral = position_snapshot.collateral_amount - amount;
        if realized_debt > 0 {
            let required = mul_div_ceil(
                realized_debt,
                state.min_liquidity_ratio as i128,
                RATIO_SCALE as i128,
            )?;
            require!(
                collateral_value(remaining_collateral) >= required,
                CoreError::InsufficientCollateral
            );
        }

        let position = &mut state.positions[position_index];
        position.debt = realized_debt;
        position.last_value_per_share = vault_snapshot.value_per_share;
        position.collateral_amount = remaining_collateral;
        position.shares = position_snapshot.shares - burned;

        let vault = &mut state.vaults[vault_index];
        vault.total_collateral = vault
            .total_collateral
            .checked_sub(amount)
            .ok_or(CoreError::MathOverflow)?;
        vault.total_shares = vault
            .total_shares
            .checked_sub(burned)
            .ok_or(CoreError::MathOverflow)?;

        let pool = state.pool_mut(pool_id)?;
        pool.total_collateral = pool
            .total_collateral
            .checked_sub(amount)
            .ok_or(CoreError::MathOverflow)?;

        let position = &state.positions[position_index];
        if position.shares == 0 && position.collateral_amount == 0 && position.debt == 0 {
            state.positions.swap_remove(position_index);
        }
    }
    Ok(())
}

/// Realize and return `owner`'s debt in the (pool, mint) vault, flushing
/// the pool's markets first.
pub fn account_debt(
    state: &mut CoreState,
    owner: Pubkey,
    pool_id: u64,
    collateral_mint: Pubkey,
) -> Result<i128> {
    state.pool(pool_id)?;
    distribute::poke_pool_markets(state, pool_id)?;
    let vault_index = state
        .vault_index(pool_id, &collateral_mint)
        .ok_or(CoreError::VaultNotFound)?;
    let position_index = state
        .position_index(&owner, pool_id, &collateral_mint)
        .ok_or(CoreError::PositionNotFound)?;

    let vault = state.vaults[vault_index].clone();
    let position = &mut state.positions[position_index];
    position.debt = position
        .debt
        .checked_add(accrued_debt(position, &vault)?)
        .ok_or(CoreError::MathOverflow)?;
    position.last_value_per_share = vault.value_per_share;
    Ok(position.debt)
}
