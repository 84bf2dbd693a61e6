use anchor_lang::prelude::Pubkey;
use anchor_lang::AnchorSerialize;
use confluence_core::state::*;
use confluence_core::{distribute, market, pool, vault};

const UNCAPPED: i128 = i128::MAX;

fn new_state() -> CoreState {
    CoreState {
        min_liquidity_ratio: RATIO_SCALE,
        ..Default::default()
    }
}

fn add_market(state: &mut CoreState) -> (u64, Pubkey) {
    let address = Pubkey::new_unique();
    let market_id = market::register_market(state, address).unwrap();
    (market_id, address)
}

fn funded_pool(state: &mut CoreState, collateral: u64) -> (u64, Pubkey, Pubkey) {
    let owner = Pubkey::new_unique();
    let mint = Pubkey::new_unique();
    let pool_id = pool::create_pool(state, owner).unwrap();
    vault::delegate(state, owner, pool_id, mint, collateral as i64).unwrap();
    (pool_id, owner, mint)
}

fn report(state: &mut CoreState, market_id: u64, address: Pubkey, balance: i128) {
    market::report_balance(state, address, market_id, balance).unwrap();
}

fn entry_debt(state: &CoreState, market_id: u64, pool_id: u64) -> i128 {
    state.markets[market_id as usize]
        .entries
        .iter()
        .find(|e| e.pool_id == pool_id)
        .map(|e| e.assigned_debt)
        .unwrap_or(0)
}

fn vault_total_debt(state: &CoreState, pool_id: u64, mint: &Pubkey) -> i128 {
    state
        .vault_index(pool_id, mint)
        .map(|i| state.vaults[i].total_debt)
        .unwrap_or(0)
}

fn snapshot(state: &CoreState) -> Vec<u8> {
    state.try_to_vec().unwrap()
}

fn assert_core_err<T: std::fmt::Debug>(result: anchor_lang::Result<T>, name: &str) {
    let err = result.unwrap_err();
    assert!(
        err.to_string().contains(name),
        "expected {name}, got {err}"
    );
}

/// Per-share cap that yields `capacity` over `collateral` delegated units.
fn cap_for(capacity: i128, collateral: u64) -> i128 {
    capacity * PER_SHARE_SCALE / collateral as i128
}

#[test]
fn proportional_split_one_to_three() {
    let mut s = new_state();
    let (m, addr) = add_market(&mut s);
    let (a, owner_a, mint_a) = funded_pool(&mut s, 1_000);
    let (b, owner_b, mint_b) = funded_pool(&mut s, 1_000);
    pool::set_pool_position(&mut s, a, owner_a, &[m], &[1], &[UNCAPPED]).unwrap();
    pool::set_pool_position(&mut s, b, owner_b, &[m], &[3], &[UNCAPPED]).unwrap();

    report(&mut s, m, addr, 100);
    distribute::poke_market(&mut s, m).unwrap();

    assert_eq!(entry_debt(&s, m, a), 25);
    assert_eq!(entry_debt(&s, m, b), 75);
    assert_eq!(vault_total_debt(&s, a, &mint_a), 25);
    assert_eq!(vault_total_debt(&s, b, &mint_b), 75);
    assert_eq!(s.markets[m as usize].undistributed, 0);
}

#[test]
fn water_filling_clamps_and_redistributes() {
    let mut s = new_state();
    let (m, addr) = add_market(&mut s);
    let (a, owner_a, mint_a) = funded_pool(&mut s, 1_000);
    let (b, owner_b, mint_b) = funded_pool(&mut s, 1_000);
    pool::set_pool_position(&mut s, a, owner_a, &[m], &[1], &[cap_for(10, 1_000)]).unwrap();
    pool::set_pool_position(&mut s, b, owner_b, &[m], &[1], &[UNCAPPED]).unwrap();

    report(&mut s, m, addr, 100);
    distribute::poke_market(&mut s, m).unwrap();

    assert_eq!(entry_debt(&s, m, a), 10);
    assert_eq!(entry_debt(&s, m, b), 90);
    assert_eq!(vault_total_debt(&s, a, &mint_a), 10);
    assert_eq!(vault_total_debt(&s, b, &mint_b), 90);
}

#[test]
fn leftover_parks_on_market_when_every_pool_is_capped() {
    let mut s = new_state();
    let (m, addr) = add_market(&mut s);
    let (a, owner_a, _) = funded_pool(&mut s, 1_000);
    let (b, owner_b, _) = funded_pool(&mut s, 1_000);
    pool::set_pool_position(&mut s, a, owner_a, &[m], &[2], &[cap_for(10, 1_000)]).unwrap();
    pool::set_pool_position(&mut s, b, owner_b, &[m], &[1], &[cap_for(25, 1_000)]).unwrap();

    report(&mut s, m, addr, 100);
    distribute::poke_market(&mut s, m).unwrap();

    assert_eq!(entry_debt(&s, m, a), 10);
    assert_eq!(entry_debt(&s, m, b), 25);
    assert_eq!(s.markets[m as usize].undistributed, 65);

    // Raising a cap releases the parked delta on the next poke, not
    // retroactively at flush time under the old cap.
    pool::set_pool_position(&mut s, a, owner_a, &[m], &[2], &[cap_for(1_000, 1_000)]).unwrap();
    assert_eq!(s.markets[m as usize].undistributed, 65);
    distribute::poke_market(&mut s, m).unwrap();
    assert_eq!(entry_debt(&s, m, a), 75);
    assert_eq!(s.markets[m as usize].undistributed, 0);
}

#[test]
fn caps_never_exceeded_after_positive_delta() {
    let mut s = new_state();
    let (m, addr) = add_market(&mut s);
    let (a, owner_a, _) = funded_pool(&mut s, 500);
    let (b, owner_b, _) = funded_pool(&mut s, 2_000);
    pool::set_pool_position(&mut s, a, owner_a, &[m], &[3], &[cap_for(40, 500)]).unwrap();
    pool::set_pool_position(&mut s, b, owner_b, &[m], &[2], &[cap_for(70, 2_000)]).unwrap();

    for balance in [13i128, 57, 200, 4_000] {
        report(&mut s, m, addr, balance);
        distribute::poke_market(&mut s, m).unwrap();
        assert!(entry_debt(&s, m, a) <= 40);
        assert!(entry_debt(&s, m, b) <= 70);
    }
}

#[test]
fn poke_is_idempotent() {
    let mut s = new_state();
    let (m, addr) = add_market(&mut s);
    let (a, owner_a, _) = funded_pool(&mut s, 1_000);
    pool::set_pool_position(&mut s, a, owner_a, &[m], &[1], &[UNCAPPED]).unwrap();

    report(&mut s, m, addr, 12_345);
    distribute::poke_market(&mut s, m).unwrap();
    let before = snapshot(&s);
    distribute::poke_market(&mut s, m).unwrap();
    assert_eq!(snapshot(&s), before);
}

#[test]
fn exit_freezes_history() {
    let mut s = new_state();
    let (m, addr) = add_market(&mut s);
    let (a, owner_a, mint_a) = funded_pool(&mut s, 1_000);
    pool::set_pool_position(&mut s, a, owner_a, &[m], &[1], &[UNCAPPED]).unwrap();

    report(&mut s, m, addr, 100);
    distribute::poke_market(&mut s, m).unwrap();
    assert_eq!(vault_total_debt(&s, a, &mint_a), 100);

    // Exit. The debt assigned so far stays; later balance moves do not.
    pool::set_pool_position(&mut s, a, owner_a, &[], &[], &[]).unwrap();
    for balance in [500i128, -300, 800] {
        report(&mut s, m, addr, balance);
        distribute::poke_market(&mut s, m).unwrap();
        assert_eq!(vault_total_debt(&s, a, &mint_a), 100);
    }

    // Re-entry starts from the balance at entry time (800), not history.
    pool::set_pool_position(&mut s, a, owner_a, &[m], &[1], &[UNCAPPED]).unwrap();
    assert_eq!(entry_debt(&s, m, a), 0);
    report(&mut s, m, addr, 900);
    distribute::poke_market(&mut s, m).unwrap();
    assert_eq!(entry_debt(&s, m, a), 100);
    assert_eq!(vault_total_debt(&s, a, &mint_a), 200);
}

#[test]
fn conservation_across_signed_reports() {
    let mut s = new_state();
    let (m, addr) = add_market(&mut s);
    let pools: Vec<(u64, Pubkey, Pubkey)> = vec![
        funded_pool(&mut s, 1_000),
        funded_pool(&mut s, 3_000),
        funded_pool(&mut s, 5_000),
    ];
    for (i, (pool_id, owner, _)) in pools.iter().enumerate() {
        pool::set_pool_position(&mut s, *pool_id, *owner, &[m], &[2 * i as u64 + 1], &[UNCAPPED])
            .unwrap();
    }

    for balance in [7i128, -6, 95, 1_000_078, 12] {
        report(&mut s, m, addr, balance);
        distribute::poke_market(&mut s, m).unwrap();
        let assigned: i128 = s.markets[m as usize]
            .entries
            .iter()
            .map(|e| e.assigned_debt)
            .sum();
        assert_eq!(assigned, balance);
        let vault_debt: i128 = s.vaults.iter().map(|v| v.total_debt).sum();
        assert_eq!(vault_debt, balance);
    }
}

#[test]
fn zero_weight_disconnects_a_market() {
    let mut s = new_state();
    let (m1, addr1) = add_market(&mut s);
    let (m2, _addr2) = add_market(&mut s);
    let (a, owner_a, _) = funded_pool(&mut s, 1_000);
    pool::set_pool_position(&mut s, a, owner_a, &[m1, m2], &[1, 1], &[UNCAPPED, UNCAPPED])
        .unwrap();
    assert_eq!(s.markets[m2 as usize].entries.len(), 1);

    pool::set_pool_position(&mut s, a, owner_a, &[m1, m2], &[1, 0], &[UNCAPPED, UNCAPPED])
        .unwrap();
    assert!(s.markets[m2 as usize].entries.is_empty());
    assert_eq!(s.markets[m2 as usize].total_weight, 0);
    assert_eq!(s.pools[a as usize].positions.len(), 1);
    assert_eq!(s.pools[a as usize].total_weight, 1);

    // The remaining connection still distributes.
    report(&mut s, m1, addr1, 40);
    distribute::poke_market(&mut s, m1).unwrap();
    assert_eq!(entry_debt(&s, m1, a), 40);
}

#[test]
fn repositioning_flushes_accrued_debt_first() {
    let mut s = new_state();
    let (m, addr) = add_market(&mut s);
    let (a, owner_a, mint_a) = funded_pool(&mut s, 1_000);
    pool::set_pool_position(&mut s, a, owner_a, &[m], &[1], &[UNCAPPED]).unwrap();

    // Balance reported but never poked: the reposition itself must settle
    // it under the old weights before anything changes.
    report(&mut s, m, addr, 250);
    pool::set_pool_position(&mut s, a, owner_a, &[], &[], &[]).unwrap();
    assert_eq!(vault_total_debt(&s, a, &mint_a), 250);
}

#[test]
fn market_liquidity_reflects_ratio_and_caps() {
    let mut s = new_state();
    let (m, addr) = add_market(&mut s);
    let (a, owner_a, _) = funded_pool(&mut s, 1_000);
    pool::set_pool_position(&mut s, a, owner_a, &[m], &[1], &[cap_for(600, 1_000)]).unwrap();
    market::set_min_liquidity_ratio(&mut s, 2_000_000).unwrap();

    // Collateral-derived capacity 1000 / 2.0 = 500 beats the 600 cap.
    assert_eq!(market::market_liquidity(&mut s, m).unwrap(), 500);

    report(&mut s, m, addr, 100);
    assert_eq!(market::market_liquidity(&mut s, m).unwrap(), 400);
}

#[test]
fn registry_and_position_validation() {
    let mut s = new_state();
    let (m, _addr) = add_market(&mut s);
    let address = s.markets[m as usize].address;
    assert_core_err(market::register_market(&mut s, address), "MarketAlreadyRegistered");

    let (a, owner_a, _) = funded_pool(&mut s, 1_000);
    let stranger = Pubkey::new_unique();
    assert_core_err(
        pool::set_pool_position(&mut s, a, stranger, &[m], &[1], &[UNCAPPED]),
        "Unauthorized",
    );
    assert_core_err(
        pool::set_pool_position(&mut s, a, owner_a, &[m], &[1, 2], &[UNCAPPED]),
        "ArrayLengthMismatch",
    );
    assert_core_err(
        pool::set_pool_position(&mut s, a, owner_a, &[99], &[1], &[UNCAPPED]),
        "MarketNotFound",
    );
    assert_core_err(
        pool::set_pool_position(&mut s, a, owner_a, &[m, m], &[1, 1], &[UNCAPPED, UNCAPPED]),
        "InvalidParameters",
    );
    assert_core_err(
        pool::set_pool_position(&mut s, a, owner_a, &[m], &[1], &[-1]),
        "InvalidParameters",
    );
    assert_core_err(
        market::report_balance(&mut s, stranger, m, 5),
        "Unauthorized",
    );
}
