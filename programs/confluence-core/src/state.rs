use anchor_lang::prelude::*;

/// Fixed-point scale for the debt-per-share accumulator (1.0 = 1e18).
pub const PER_SHARE_SCALE: i128 = 1_000_000_000_000_000_000;

/// Fixed-point scale for the liquidity ratio (1.0 = 1_000_000).
pub const RATIO_SCALE: u64 = 1_000_000;

// Table bounds. Markets and pools are never deleted, so id == table index.
// Sized so CoreState::LEN stays under the 10 KiB CPI allocation limit for
// the core PDA; growing them is a realloc migration.
pub const MAX_MARKETS: usize = 8;
pub const MAX_POOLS: usize = 8;
pub const MAX_VAULTS: usize = 16;
pub const MAX_ACCOUNT_POSITIONS: usize = 16;
pub const MAX_POSITIONS_PER_POOL: usize = 8;

/// An external market as seen by the registry.
///
/// `reported_balance` is whatever the market last told us; the engine only
/// ever consumes the difference against `last_distributed_balance`, so a
/// market that reports many times between pokes settles in one delta.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, Default)]
pub struct Market {
    pub id: u64,
    /// The external market's key. Only this signer may report balances.
    pub address: Pubkey,
    pub reported_balance: i128,
    /// Checkpoint: balance as of the last distribution.
    pub last_distributed_balance: i128,
    /// Delta that no pool had capacity for; folded into the next poke.
    pub undistributed: i128,
    /// Pools currently positioned in this market.
    pub entries: Vec<MarketPoolEntry>,
    /// Sum of entry weights.
    pub total_weight: u64,
}

impl Market {
    pub const LEN: usize = 8 + // id
        32 + // address
        16 + // reported_balance
        16 + // last_distributed_balance
        16 + // undistributed
        4 + MAX_POOLS * MarketPoolEntry::LEN + // entries
        8; // total_weight
}

/// Per-(market, pool) allocation record, derived from the pool's
/// configured positions and owned by the distribution engine.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, Default)]
pub struct MarketPoolEntry {
    pub pool_id: u64,
    pub weight: u64,
    /// Debt cap per delegated share, PER_SHARE_SCALE fixed point. Never
    /// negative (rejected at configuration time).
    pub max_debt_per_share: i128,
    /// Debt assigned to this pool by this market so far. Reset when the
    /// pool fully exits the market (its real debt lives in its vaults).
    pub assigned_debt: i128,
}

impl MarketPoolEntry {
    pub const LEN: usize = 8 + 8 + 16 + 16;
}

/// A position as configured by the pool owner. Stored entries always have
/// weight > 0; weight zero in the input means "disconnect".
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, Default)]
pub struct PoolMarketPosition {
    pub market_id: u64,
    pub weight: u64,
    pub max_debt_per_share: i128,
}

impl PoolMarketPosition {
    pub const LEN: usize = 8 + 8 + 16;
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, Default)]
pub struct Pool {
    pub id: u64,
    pub owner: Pubkey,
    /// Ordered position list as last written by the owner.
    pub positions: Vec<PoolMarketPosition>,
    /// Sum of position weights.
    pub total_weight: u64,
    /// Sum of collateral across this pool's vaults.
    pub total_collateral: u64,
    /// Debt assigned while every vault of the pool was empty; flushed into
    /// the vaults on the next push that finds shares.
    pub pending_debt: i128,
}

impl Pool {
    pub const LEN: usize = 8 + // id
        32 + // owner
        4 + MAX_POSITIONS_PER_POOL * PoolMarketPosition::LEN + // positions
        8 + // total_weight
        8 + // total_collateral
        16; // pending_debt
}

/// Share ledger for one (pool, collateral mint) pair.
///
/// `value_per_share` is a monotone-per-delta accumulator: applying a debt
/// delta bumps it once, and accounts realize lazily against their own
/// snapshot. No per-account work happens on distribution.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, Default)]
pub struct Vault {
    pub pool_id: u64,
    pub collateral_mint: Pubkey,
    pub total_collateral: u64,
    pub total_shares: u128,
    /// Net debt pushed into this vault by the engine.
    pub total_debt: i128,
    /// Debt per share, PER_SHARE_SCALE fixed point.
    pub value_per_share: i128,
}

impl Vault {
    pub const LEN: usize = 8 + 32 + 8 + 16 + 16 + 16;
}

/// One account's stake in one vault. Created on first delegation, removed
/// when both shares and realized debt return to zero.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, Default)]
pub struct AccountPosition {
    pub owner: Pubkey,
    pub pool_id: u64,
    pub collateral_mint: Pubkey,
    pub collateral_amount: u64,
    pub shares: u128,
    /// Debt realized up to `last_value_per_share`.
    pub debt: i128,
    /// Snapshot of the vault accumulator at the last realization.
    pub last_value_per_share: i128,
}

impl AccountPosition {
    pub const LEN: usize = 32 + 8 + 32 + 8 + 16 + 16 + 16;
}

/// Global protocol state. One account holds every table; the engine walks
/// from a market to its pools to their vaults without touching any other
/// account, which keeps a poke O(participants).
#[account]
#[derive(Default)]
pub struct CoreState {
    pub authority: Pubkey,
    pub paused: bool,
    pub bump: u8,
    /// Minimum collateral-to-debt ratio, RATIO_SCALE fixed point (>= 1.0).
    pub min_liquidity_ratio: u64,
    pub markets: Vec<Market>,
    pub pools: Vec<Pool>,
    pub vaults: Vec<Vault>,
    pub positions: Vec<AccountPosition>,
}

impl CoreState {
    pub const LEN: usize = 8 + // discriminator
        32 + // authority
        1 + // paused
        1 + // bump
        8 + // min_liquidity_ratio
        4 + MAX_MARKETS * Market::LEN +
        4 + MAX_POOLS * Pool::LEN +
        4 + MAX_VAULTS * Vault::LEN +
        4 + MAX_ACCOUNT_POSITIONS * AccountPosition::LEN;

    pub fn market(&self, market_id: u64) -> Result<&Market> {
        self.markets
            .get(market_id as usize)
            .ok_or_else(|| error!(CoreError::MarketNotFound))
    }

    pub fn market_mut(&mut self, market_id: u64) -> Result<&mut Market> {
        self.markets
            .get_mut(market_id as usize)
            .ok_or_else(|| error!(CoreError::MarketNotFound))
    }

    pub fn pool(&self, pool_id: u64) -> Result<&Pool> {
        self.pools
            .get(pool_id as usize)
            .ok_or_else(|| error!(CoreError::PoolNotFound))
    }

    pub fn pool_mut(&mut self, pool_id: u64) -> Result<&mut Pool> {
        self.pools
            .get_mut(pool_id as usize)
            .ok_or_else(|| error!(CoreError::PoolNotFound))
    }

    pub fn vault_index(&self, pool_id: u64, collateral_mint: &Pubkey) -> Option<usize> {
        self.vaults
            .iter()
            .position(|v| v.pool_id == pool_id && v.collateral_mint == *collateral_mint)
    }

    pub fn position_index(
        &self,
        owner: &Pubkey,
        pool_id: u64,
        collateral_mint: &Pubkey,
    ) -> Option<usize> {
        self.positions.iter().position(|p| {
            p.owner == *owner && p.pool_id == pool_id && p.collateral_mint == *collateral_mint
        })
    }
}

#[error_code]
pub enum CoreError {
    #[msg("Market not found")]
    MarketNotFound,
    #[msg("Pool not found")]
    PoolNotFound,
    #[msg("Vault not found")]
    VaultNotFound,
    #[msg("Account position not found")]
    PositionNotFound,
    #[msg("Market already registered")]
    MarketAlreadyRegistered,
    #[msg("Unauthorized")]
    Unauthorized,
    #[msg("Invalid parameters")]
    InvalidParameters,
    #[msg("Input arrays have mismatched lengths")]
    ArrayLengthMismatch,
    #[msg("Insufficient collateral to cover debt obligations")]
    InsufficientCollateral,
    #[msg("Insufficient capacity")]
    InsufficientCapacity,
    #[msg("Vault has no shares outstanding")]
    EmptyVault,
    #[msg("Arithmetic overflow")]
    MathOverflow,
    #[msg("Protocol is paused")]
    ProtocolPaused,
    #[msg("State table is full")]
    TableFull,
}
