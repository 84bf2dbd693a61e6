use anchor_lang::prelude::*;
use anchor_spl::associated_token::AssociatedToken;
use anchor_spl::token::{self, Mint, Token, TokenAccount, Transfer};

pub mod distribute;
pub mod market;
pub mod math;
pub mod pool;
pub mod state;
pub mod vault;

use state::*;

declare_id!("Fg6PaFpoGXkYsidMpWTK6W2BeZ7FEfcYkg476zPFsLnS");

#[program]
pub mod confluence_core {
    use super::*;

    /// Initialize the global core state
    pub fn initialize(ctx: Context<Initialize>, min_liquidity_ratio: u64) -> Result<()> {
        require!(
            min_liquidity_ratio >= RATIO_SCALE,
            CoreError::InvalidParameters
        );
        let core = &mut ctx.accounts.core;
        core.authority = ctx.accounts.authority.key();
        core.paused = false;
        core.bump = ctx.bumps.core;
        core.min_liquidity_ratio = min_liquidity_ratio;
        msg!("Confluence core initialized");
        Ok(())
    }

    /// Pause or resume all non-admin entry points (only authority)
    pub fn set_paused(ctx: Context<AdminConfig>, paused: bool) -> Result<()> {
        let core = &mut ctx.accounts.core;
        require_keys_eq!(
            core.authority,
            ctx.accounts.authority.key(),
            CoreError::Unauthorized
        );
        core.paused = paused;
        msg!("Paused set to {}", paused);
        Ok(())
    }

    /// Update the minimum liquidity ratio (only authority)
    pub fn set_min_liquidity_ratio(ctx: Context<AdminConfig>, ratio: u64) -> Result<()> {
        let core = &mut ctx.accounts.core;
        require_keys_eq!(
            core.authority,
            ctx.accounts.authority.key(),
            CoreError::Unauthorized
        );
        market::set_min_liquidity_ratio(core, ratio)?;
        emit!(MinLiquidityRatioSet { ratio });
        Ok(())
    }

    /// Register an external market and return its id
    pub fn register_market(ctx: Context<RegisterMarket>, market_address: Pubkey) -> Result<u64> {
        let core = &mut ctx.accounts.core;
        require!(!core.paused, CoreError::ProtocolPaused);
        let market_id = market::register_market(core, market_address)?;
        emit!(MarketRegistered {
            market_id,
            address: market_address,
        });
        msg!("Market {} registered with id {}", market_address, market_id);
        Ok(market_id)
    }

    /// Report the market's current net balance (only the registered market)
    pub fn report_balance(
        ctx: Context<ReportBalance>,
        market_id: u64,
        new_balance: i128,
    ) -> Result<()> {
        let core = &mut ctx.accounts.core;
        require!(!core.paused, CoreError::ProtocolPaused);
        market::report_balance(core, ctx.accounts.market.key(), market_id, new_balance)?;
        emit!(BalanceReported {
            market_id,
            balance: new_balance,
        });
        Ok(())
    }

    /// Create a pool owned by the signer and return its id
    pub fn create_pool(ctx: Context<CreatePool>) -> Result<u64> {
        let core = &mut ctx.accounts.core;
        require!(!core.paused, CoreError::ProtocolPaused);
        let pool_id = pool::create_pool(core, ctx.accounts.owner.key())?;
        emit!(PoolCreated {
            pool_id,
            owner: ctx.accounts.owner.key(),
        });
        Ok(pool_id)
    }

    /// Replace the pool's market positions (only the pool owner)
    pub fn set_pool_position(
        ctx: Context<SetPoolPosition>,
        pool_id: u64,
        market_ids: Vec<u64>,
        weights: Vec<u64>,
        caps: Vec<i128>,
    ) -> Result<()> {
        let core = &mut ctx.accounts.core;
        require!(!core.paused, CoreError::ProtocolPaused);
        pool::set_pool_position(
            core,
            pool_id,
            ctx.accounts.owner.key(),
            &market_ids,
            &weights,
            &caps,
        )?;
        emit!(PoolPositionSet {
            pool_id,
            market_count: market_ids.len() as u64,
        });
        Ok(())
    }

    /// Deposit (positive delta) or withdraw (negative delta) collateral
    /// into a pool's vault for the signing account
    pub fn delegate_collateral(
        ctx: Context<DelegateCollateral>,
        pool_id: u64,
        amount_delta: i64,
    ) -> Result<()> {
        require!(!ctx.accounts.core.paused, CoreError::ProtocolPaused);
        let collateral_mint = ctx.accounts.collateral_mint.key();
        let owner = ctx.accounts.owner.key();

        // Ledger first: all validation happens here, so nothing moves on a
        // rejected withdrawal.
        vault::delegate(
            &mut ctx.accounts.core,
            owner,
            pool_id,
            collateral_mint,
            amount_delta,
        )?;

        if amount_delta > 0 {
            let cpi_accounts = Transfer {
                from: ctx.accounts.owner_token.to_account_info(),
                to: ctx.accounts.core_vault_token.to_account_info(),
                authority: ctx.accounts.owner.to_account_info(),
            };
            let cpi_ctx = CpiContext::new(ctx.accounts.token_program.to_account_info(), cpi_accounts);
            token::transfer(cpi_ctx, amount_delta as u64)?;
        } else if amount_delta < 0 {
            let bump = ctx.accounts.core.bump;
            let seeds: &[&[u8]] = &[b"core", &[bump]];
            let signer = &[seeds];
            let cpi_accounts = Transfer {
                from: ctx.accounts.core_vault_token.to_account_info(),
                to: ctx.accounts.owner_token.to_account_info(),
                authority: ctx.accounts.core.to_account_info(),
            };
            let cpi_ctx = CpiContext::new_with_signer(
                ctx.accounts.token_program.to_account_info(),
                cpi_accounts,
                signer,
            );
            token::transfer(cpi_ctx, amount_delta.unsigned_abs())?;
        }

        emit!(CollateralDelegated {
            owner,
            pool_id,
            collateral_mint,
            amount_delta,
        });
        Ok(())
    }

    /// Remaining allocatable capacity of a market (settles it first)
    pub fn market_liquidity(ctx: Context<Query>, market_id: u64) -> Result<i128> {
        market::market_liquidity(&mut ctx.accounts.core, market_id)
    }

    /// Net debt of one (pool, mint) vault (settles the pool's markets first)
    pub fn get_vault_debt(
        ctx: Context<Query>,
        pool_id: u64,
        collateral_mint: Pubkey,
    ) -> Result<i128> {
        market::vault_debt(&mut ctx.accounts.core, pool_id, collateral_mint)
    }

    /// Realized debt of one account in one vault (settles first)
    pub fn get_account_debt(
        ctx: Context<Query>,
        owner: Pubkey,
        pool_id: u64,
        collateral_mint: Pubkey,
    ) -> Result<i128> {
        vault::account_debt(&mut ctx.accounts.core, owner, pool_id, collateral_mint)
    }
}

#[derive(Accounts)]
pub struct Initialize<'info> {
    #[account(
        init,
        payer = authority,
        space = CoreState::LEN,
        seeds = [b"core"],
        bump
    )]
    pub core: Box<Account<'info, CoreState>>,
    #[account(mut)]
    pub authority: Signer<'info>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct AdminConfig<'info> {
    #[account(mut, seeds = [b"core"], bump = core.bump)]
    pub core: Box<Account<'info, CoreState>>,
    pub authority: Signer<'info>,
}

#[derive(Accounts)]
pub struct RegisterMarket<'info> {
    #[account(mut, seeds = [b"core"], bump = core.bump)]
    pub core: Box<Account<'info, CoreState>>,
    pub payer: Signer<'info>,
}

#[derive(Accounts)]
pub struct ReportBalance<'info> {
    #[account(mut, seeds = [b"core"], bump = core.bump)]
    pub core: Box<Account<'info, CoreState>>,
    /// The external market; must match the registered address.
    pub market: Signer<'info>,
}

#[derive(Accounts)]
pub struct CreatePool<'info> {
    #[account(mut, seeds = [b"core"], bump = core.bump)]
    pub core: Box<Account<'info, CoreState>>,
    pub owner: Signer<'info>,
}

#[derive(Accounts)]
pub struct SetPoolPosition<'info> {
    #[account(mut, seeds = [b"core"], bump = core.bump)]
    pub core: Box<Account<'info, CoreState>>,
    pub owner: Signer<'info>,
}

#[derive(Accounts)]
pub struct DelegateCollateral<'info> {
    #[account(mut, seeds = [b"core"], bump = core.bump)]
    pub core: Box<Account<'info, CoreState>>,
    #[account(mut)]
    pub owner: Signer<'info>,
    pub collateral_mint: Account<'info, Mint>,
    #[account(mut, token::mint = collateral_mint)]
    pub owner_token: Account<'info, TokenAccount>,
    #[account(
        init_if_needed,
        payer = owner,
        associated_token::mint = collateral_mint,
        associated_token::authority = core,
    )]
    pub core_vault_token: Account<'info, TokenAccount>,
    pub token_program: Program<'info, Token>,
    pub associated_token_program: Program<'info, AssociatedToken>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct Query<'info> {
    #[account(mut, seeds = [b"core"], bump = core.bump)]
    pub core: Box<Account<'info, CoreState>>,
}

#[event]
pub struct MarketRegistered {
    pub market_id: u64,
    pub address: Pubkey,
}

#[event]
pub struct BalanceReported {
    pub market_id: u64,
    pub balance: i128,
}

#[event]
pub struct DebtDistributed {
    pub market_id: u64,
    pub delta: i128,
    pub undistributed: i128,
}

#[event]
pub struct PoolCreated {
    pub pool_id: u64,
    pub owner: Pubkey,
}

#[event]
pub struct PoolPositionSet {
    pub pool_id: u64,
    pub market_count: u64,
}

#[event]
pub struct CollateralDelegated {
    pub owner: Pubkey,
    pub pool_id: u64,
    pub collateral_mint: Pubkey,
    pub amount_delta: i64,
}

#[event]
pub struct MinLiquidityRatioSet {
    pub ratio: u64,
}
