//! Budget bookkeeping: entropy leases, economic accounts, the sinking fund,
//! and the Vickrey auction for contended resources.
//!
//! Every invocation follows authorize → execute → settle. Authorization holds
//! the aspect's declared estimate; settlement deducts the measured actual
//! (never more than the hold), returns the excess, and taxes 1% into the
//! sinking fund. A cancelled or failed invocation voids the lease and the
//! balance is restored exactly.

pub mod impact;
pub mod metabolism;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AgentesError, CostReport, Result};

/// Fraction of every settled transaction routed to the sinking fund.
pub const SINKING_FUND_TAX: f64 = 0.01;

// ---------------------------------------------------------------------------
// Entropy budget
// ---------------------------------------------------------------------------

/// Bounded, regenerating entropy pool. Regeneration is wall-clock at
/// `regen_rate` units/second, clamped at `max`.
#[derive(Debug)]
pub struct EntropyBudget {
    current: f64,
    max: f64,
    regen_rate: f64,
    last_regen: Instant,
    holds: HashMap<Uuid, f64>,
}

impl EntropyBudget {
    pub fn new(initial: f64, max: f64, regen_rate: f64) -> Self {
        Self {
            current: initial.min(max),
            max,
            regen_rate,
            last_regen: Instant::now(),
            holds: HashMap::new(),
        }
    }

    pub fn available(&self) -> f64 {
        self.current
    }

    pub fn can_afford(&self, cost: f64) -> bool {
        self.current >= cost
    }

    /// Apply elapsed regeneration. Monotonic: a stalled clock adds nothing.
    pub fn regenerate(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.last_regen).as_secs_f64();
        self.current = (self.current + dt * self.regen_rate).min(self.max);
        self.last_regen = now;
    }

    /// Spend without the lease protocol; returns the new level. Used by
    /// budget variants that charge fixed per-operation costs.
    pub fn spend(&mut self, cost: f64) -> Result<f64> {
        self.regenerate(Instant::now());
        if !self.can_afford(cost) {
            return Err(AgentesError::BudgetExhausted {
                account: String::new(),
                cost: CostReport { requested: cost, available: self.current, settled: 0.0 },
            });
        }
        self.current -= cost;
        Ok(self.current)
    }

    fn hold(&mut self, amount: f64) -> Result<Uuid> {
        self.regenerate(Instant::now());
        if !self.can_afford(amount) {
            return Err(AgentesError::BudgetExhausted {
                account: String::new(),
                cost: CostReport { requested: amount, available: self.current, settled: 0.0 },
            });
        }
        self.current -= amount;
        let id = Uuid::new_v4();
        self.holds.insert(id, amount);
        Ok(id)
    }

    fn settle_hold(&mut self, id: Uuid, actual: f64) -> f64 {
        let held = self.holds.remove(&id).unwrap_or(0.0);
        let charged = actual.min(held);
        self.current = (self.current + (held - charged)).min(self.max);
        charged
    }

    fn void_hold(&mut self, id: Uuid) {
        if let Some(held) = self.holds.remove(&id) {
            self.current = (self.current + held).min(self.max);
        }
    }
}

/// A pre-authorization against an entropy account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub id: Uuid,
    pub account: String,
    pub estimate_milli: u64,
}

impl Lease {
    pub fn estimate(&self) -> f64 {
        self.estimate_milli as f64 / 1000.0
    }
}

// ---------------------------------------------------------------------------
// Economic accounts
// ---------------------------------------------------------------------------

/// Leaky-bucket economic account.
#[derive(Debug)]
pub struct Account {
    balance: f64,
    refill_rate: f64,
    max_balance: f64,
    last_refresh: Instant,
    debt_mode: bool,
    debt: f64,
}

impl Account {
    pub fn new(balance: f64, refill_rate: f64, max_balance: f64) -> Self {
        Self {
            balance: balance.min(max_balance),
            refill_rate,
            max_balance,
            last_refresh: Instant::now(),
            debt_mode: false,
            debt: 0.0,
        }
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn in_debt(&self) -> bool {
        self.debt_mode
    }

    /// Hydraulic refill; repays outstanding debt before growing the balance.
    pub fn refresh(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.last_refresh).as_secs_f64();
        let mut inflow = dt * self.refill_rate;
        if self.debt > 0.0 {
            let repaid = inflow.min(self.debt);
            self.debt -= repaid;
            inflow -= repaid;
            if self.debt <= f64::EPSILON {
                self.debt = 0.0;
                self.debt_mode = false;
            }
        }
        self.balance = (self.balance + inflow).min(self.max_balance);
        self.last_refresh = now;
    }
}

/// Settlement outcome: what was charged, taxed, and returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub charged: f64,
    pub taxed: f64,
    pub returned: f64,
}

/// Reserve accumulated from transaction tax; backs emergency loans.
#[derive(Debug, Default)]
pub struct SinkingFund {
    reserve: Mutex<f64>,
}

impl SinkingFund {
    pub fn reserve(&self) -> f64 {
        *self.reserve.lock().expect("sinking fund poisoned")
    }

    fn deposit(&self, amount: f64) {
        *self.reserve.lock().expect("sinking fund poisoned") += amount;
    }

    fn withdraw(&self, amount: f64) -> f64 {
        let mut reserve = self.reserve.lock().expect("sinking fund poisoned");
        let granted = amount.min(*reserve);
        *reserve -= granted;
        granted
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Owner of all entropy pools and economic accounts, indexed by account id.
/// Authorize/settle/void run under per-account locks.
pub struct BudgetStore {
    entropy: DashMap<String, Mutex<EntropyBudget>>,
    accounts: DashMap<String, Mutex<Account>>,
    sinking_fund: SinkingFund,
    initial: f64,
    refill_rate: f64,
}

impl BudgetStore {
    pub fn new(initial: f64, refill_rate: f64) -> Self {
        Self {
            entropy: DashMap::new(),
            accounts: DashMap::new(),
            sinking_fund: SinkingFund::default(),
            initial,
            refill_rate,
        }
    }

    pub fn sinking_fund(&self) -> &SinkingFund {
        &self.sinking_fund
    }

    /// Current entropy for an account, after regeneration.
    pub fn entropy_available(&self, account: &str) -> f64 {
        let entry = self.entropy_entry(account);
        let mut budget = entry.lock().expect("entropy budget poisoned");
        budget.regenerate(Instant::now());
        budget.available()
    }

    fn entropy_entry(&self, account: &str) -> dashmap::mapref::one::RefMut<'_, String, Mutex<EntropyBudget>> {
        self.entropy.entry(account.to_string()).or_insert_with(|| {
            Mutex::new(EntropyBudget::new(self.initial, self.initial.max(1.0), self.refill_rate))
        })
    }

    /// Hold `estimate` against the account's entropy pool.
    pub fn authorize(&self, account: &str, estimate: f64) -> Result<Lease> {
        let entry = self.entropy_entry(account);
        let mut budget = entry.lock().expect("entropy budget poisoned");
        let id = budget.hold(estimate).map_err(|err| match err {
            AgentesError::BudgetExhausted { cost, .. } => AgentesError::BudgetExhausted {
                account: account.to_string(),
                cost,
            },
            other => other,
        })?;
        debug!(target: "agentese::budget", account, estimate, "lease authorized");
        Ok(Lease {
            id,
            account: account.to_string(),
            estimate_milli: (estimate * 1000.0).round() as u64,
        })
    }

    /// Deduct the measured actual (≤ lease), return the excess, tax 1%.
    pub fn settle(&self, lease: &Lease, actual: f64) -> Settlement {
        let entry = self.entropy_entry(&lease.account);
        let mut budget = entry.lock().expect("entropy budget poisoned");
        let charged = budget.settle_hold(lease.id, actual);
        drop(budget);
        let taxed = charged * SINKING_FUND_TAX;
        self.sinking_fund.deposit(taxed);
        Settlement {
            charged,
            taxed,
            returned: (lease.estimate() - charged).max(0.0),
        }
    }

    /// Return the full hold; used on cancellation, timeout, and failure.
    pub fn void(&self, lease: &Lease) {
        let entry = self.entropy_entry(&lease.account);
        let mut budget = entry.lock().expect("entropy budget poisoned");
        budget.void_hold(lease.id);
        debug!(target: "agentese::budget", account = %lease.account, "lease voided");
    }

    /// Economic account accessor, creating the bucket on first touch.
    pub fn with_account<R>(&self, id: &str, f: impl FnOnce(&mut Account) -> R) -> R {
        let entry = self.accounts.entry(id.to_string()).or_insert_with(|| {
            Mutex::new(Account::new(self.initial, self.refill_rate, self.initial.max(1.0)))
        });
        let mut account = entry.lock().expect("account poisoned");
        account.refresh(Instant::now());
        f(&mut account)
    }

    /// Grant an emergency loan from the sinking fund. The recipient enters
    /// debt mode until refill repays the principal.
    pub fn emergency_loan(&self, account_id: &str, amount: f64) -> f64 {
        let granted = self.sinking_fund.withdraw(amount);
        if granted > 0.0 {
            self.with_account(account_id, |account| {
                account.balance = (account.balance + granted).min(account.max_balance);
                account.debt += granted;
                account.debt_mode = true;
            });
            warn!(
                target: "agentese::budget",
                account = account_id, granted,
                "emergency loan granted; account enters debt mode"
            );
        }
        granted
    }
}

// ---------------------------------------------------------------------------
// Vickrey auction
// ---------------------------------------------------------------------------

/// Outcome of a second-price auction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionOutcome {
    pub winner: String,
    pub price: f64,
}

/// Sealed-bid second-price auction. The winner pays the runner-up's bid;
/// a sole bidder pays their own. Ties break by agent id, lexicographic.
pub fn vickrey_auction(bids: &[(String, f64)]) -> Option<AuctionOutcome> {
    if bids.is_empty() {
        return None;
    }
    let mut sorted: Vec<&(String, f64)> = bids.iter().collect();
    sorted.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    let winner = sorted[0];
    let price = sorted.get(1).map(|r| r.1).unwrap_or(winner.1);
    Some(AuctionOutcome { winner: winner.0.clone(), price })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn entropy_regenerates_and_clamps() {
        let mut budget = EntropyBudget::new(0.5, 1.0, 0.1);
        let later = Instant::now() + Duration::from_secs(3);
        budget.regenerate(later);
        assert!((budget.available() - 0.8).abs() < 1e-6);
        budget.regenerate(later + Duration::from_secs(100));
        assert!((budget.available() - 1.0).abs() < 1e-9, "burst capped at max");
    }

    #[test]
    fn authorize_settle_taxes_one_percent() {
        let store = BudgetStore::new(1.0, 0.0);
        let lease = store.authorize("agent", 0.6).unwrap();
        let settlement = store.settle(&lease, 0.5);
        assert!((settlement.charged - 0.5).abs() < 1e-9);
        assert!((settlement.taxed - 0.005).abs() < 1e-9);
        assert!((settlement.returned - 0.1).abs() < 1e-9);
        assert!((store.sinking_fund().reserve() - 0.005).abs() < 1e-9);
        // balance = 1.0 - 0.5
        assert!((store.entropy_available("agent") - 0.5).abs() < 1e-6);
    }

    #[test]
    fn settle_never_exceeds_lease() {
        let store = BudgetStore::new(1.0, 0.0);
        let lease = store.authorize("agent", 0.2).unwrap();
        let settlement = store.settle(&lease, 0.9);
        assert!((settlement.charged - 0.2).abs() < 1e-9);
    }

    #[test]
    fn void_restores_balance_exactly() {
        let store = BudgetStore::new(1.0, 0.0);
        let before = store.entropy_available("agent");
        let lease = store.authorize("agent", 0.7).unwrap();
        store.void(&lease);
        let after = store.entropy_available("agent");
        assert!((before - after).abs() < 1e-9);
    }

    #[test]
    fn exhaustion_rejects_with_cost_report() {
        let store = BudgetStore::new(0.5, 0.0);
        let _held = store.authorize("agent", 0.4).unwrap();
        let err = store.authorize("agent", 0.4).unwrap_err();
        match err {
            AgentesError::BudgetExhausted { account, cost } => {
                assert_eq!(account, "agent");
                assert!((cost.requested - 0.4).abs() < 1e-9);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn emergency_loan_enters_debt_mode() {
        let store = BudgetStore::new(1.0, 0.0);
        let lease = store.authorize("rich", 1.0).unwrap();
        store.settle(&lease, 1.0); // reserve = 0.01
        let granted = store.emergency_loan("poor", 0.5);
        assert!((granted - 0.01).abs() < 1e-9, "loan bounded by reserve");
        assert!(store.with_account("poor", |a| a.in_debt()));
    }

    #[test]
    fn vickrey_winner_pays_second_price() {
        let outcome = vickrey_auction(&[
            ("a".into(), 3.0),
            ("b".into(), 5.0),
            ("c".into(), 4.0),
        ])
        .unwrap();
        assert_eq!(outcome.winner, "b");
        assert!((outcome.price - 4.0).abs() < 1e-9);
    }

    #[test]
    fn vickrey_ties_break_lexicographically() {
        let outcome = vickrey_auction(&[("zeta".into(), 2.0), ("alpha".into(), 2.0)]).unwrap();
        assert_eq!(outcome.winner, "alpha");
        assert!((outcome.price - 2.0).abs() < 1e-9);
    }

    #[test]
    fn sole_bidder_pays_own_bid() {
        let outcome = vickrey_auction(&[("solo".into(), 1.5)]).unwrap();
        assert_eq!(outcome.winner, "solo");
        assert!((outcome.price - 1.5).abs() < 1e-9);
    }
}
