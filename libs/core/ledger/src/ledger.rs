//! Scrip, LLM budget, and disk-quota accounting.

use crate::errors::LedgerError;
use crate::holds::HoldProvider;
use crucible_core_types::{KernelError, PrincipalId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;
use tracing::instrument;

/// Per-principal ledger row. Monetary
/// budget is fixed-point micro-dollars, never a float.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub scrip: u64,
    pub llm_budget_remaining_micros: i64,
    pub disk_quota_bytes: u64,
    pub disk_used_bytes: u64,
}

impl LedgerEntry {
    pub fn new(initial_scrip: u64, llm_budget_micros: i64, disk_quota_bytes: u64) -> Self {
        Self {
            scrip: initial_scrip,
            llm_budget_remaining_micros: llm_budget_micros,
            disk_quota_bytes,
            disk_used_bytes: 0,
        }
    }
}

/// Whole-ledger snapshot for checkpointing and for the
/// scrip-conservation test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub entries: HashMap<PrincipalId, LedgerEntry>,
    pub total_minted: u64,
    pub total_burned: u64,
    pub cumulative_llm_spend_micros: i64,
    #[serde(default)]
    pub budget_latched: bool,
}

struct Inner {
    entries: HashMap<PrincipalId, LedgerEntry>,
}

/// Single-writer ledger: one `RwLock` over the whole
/// entry map, so `transfer` can atomically debit one principal and
/// credit another without a cross-lock ordering hazard.
pub struct Ledger {
    inner: RwLock<Inner>,
    total_minted: AtomicI64,
    total_burned: AtomicI64,
    cumulative_llm_spend_micros: AtomicI64,
    /// Latched once a `debit_llm` call is refused by the *global* cap
    /// (as opposed to a per-principal budget shortfall). `cumulative`
    /// alone isn't a reliable "no further charge can land" signal when
    /// costs don't divide the cap evenly — the latch is.
    budget_latched: AtomicBool,
    api_budget_limit_micros: i64,
    holds: OnceLock<Arc<dyn HoldProvider>>,
}

impl Ledger {
    pub fn new(api_budget_limit_micros: i64) -> Self {
        Self {
            inner: RwLock::new(Inner { entries: HashMap::new() }),
            total_minted: AtomicI64::new(0),
            total_burned: AtomicI64::new(0),
            cumulative_llm_spend_micros: AtomicI64::new(0),
            budget_latched: AtomicBool::new(false),
            api_budget_limit_micros,
            holds: OnceLock::new(),
        }
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot, api_budget_limit_micros: i64) -> Self {
        Self {
            inner: RwLock::new(Inner { entries: snapshot.entries }),
            total_minted: AtomicI64::new(snapshot.total_minted as i64),
            total_burned: AtomicI64::new(snapshot.total_burned as i64),
            cumulative_llm_spend_micros: AtomicI64::new(snapshot.cumulative_llm_spend_micros),
            budget_latched: AtomicBool::new(snapshot.budget_latched),
            api_budget_limit_micros,
            holds: OnceLock::new(),
        }
    }

    /// Wires the mint in as the source of truth for outstanding auction
    /// holds, once both it and the ledger exist.
    pub fn attach_hold_provider(&self, provider: Arc<dyn HoldProvider>) {
        let _ = self.holds.set(provider);
    }

    async fn held_amount(&self, principal: &PrincipalId) -> u64 {
        match self.holds.get() {
            Some(provider) => provider.held_amount(principal).await,
            None => 0,
        }
    }

    pub async fn snapshot(&self) -> LedgerSnapshot {
        let guard = self.inner.read().await;
        LedgerSnapshot {
            entries: guard.entries.clone(),
            total_minted: self.total_minted.load(Ordering::SeqCst) as u64,
            total_burned: self.total_burned.load(Ordering::SeqCst) as u64,
            cumulative_llm_spend_micros: self.cumulative_llm_spend_micros.load(Ordering::SeqCst),
            budget_latched: self.budget_latched.load(Ordering::SeqCst),
        }
    }

    /// Creates a ledger row for a newly spawned principal. Idempotent
    /// replaces rather than erroring, since `write_artifact` may turn a
    /// non-principal into a principal via an update.
    pub async fn open_account(&self, principal: &PrincipalId, entry: LedgerEntry) {
        let mut guard = self.inner.write().await;
        guard.entries.entry(principal.clone()).or_insert(entry);
    }

    pub async fn close_account(&self, principal: &PrincipalId) {
        self.inner.write().await.entries.remove(principal);
    }

    pub async fn balance(&self, principal: &PrincipalId) -> Result<u64, LedgerError> {
        let guard = self.inner.read().await;
        guard
            .entries
            .get(principal)
            .map(|e| e.scrip)
            .ok_or_else(|| LedgerError::NoSuchPrincipal(principal.to_string()))
    }

    /// Atomic scrip move. Total scrip is conserved because this never
    /// creates or destroys scrip, only relocates it; balances never go
    /// negative because the debit is checked before either side mutates.
    #[instrument(skip(self), fields(%from, %to, amount))]
    pub async fn transfer(&self, from: &PrincipalId, to: &PrincipalId, amount: u64) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        // Resolved before the write lock: the hold provider (the mint)
        // takes its own lock internally, and nesting that inside the
        // ledger's write guard would invert the two crates' lock order.
        let held = self.held_amount(from).await;
        let mut guard = self.inner.write().await;
        if !guard.entries.contains_key(to) {
            return Err(LedgerError::NoSuchPrincipal(to.to_string()));
        }
        let from_entry = guard
            .entries
            .get(from)
            .ok_or_else(|| LedgerError::NoSuchPrincipal(from.to_string()))?;
        let available = from_entry.scrip.saturating_sub(held);
        if available < amount {
            return Err(LedgerError::Kernel(KernelError::InsufficientFunds));
        }
        guard.entries.get_mut(from).unwrap().scrip -= amount;
        guard.entries.get_mut(to).unwrap().scrip += amount;
        Ok(())
    }

    /// Mints new scrip; reserved for the `can_mint` capability holder.
    /// The capability check itself is the executor's job — this method
    /// only refuses an unknown principal.
    pub async fn mint(&self, principal: &PrincipalId, amount: u64) -> Result<(), LedgerError> {
        let mut guard = self.inner.write().await;
        let entry = guard
            .entries
            .get_mut(principal)
            .ok_or_else(|| LedgerError::NoSuchPrincipal(principal.to_string()))?;
        entry.scrip += amount;
        self.total_minted.fetch_add(amount as i64, Ordering::SeqCst);
        Ok(())
    }

    pub async fn burn(&self, principal: &PrincipalId, amount: u64) -> Result<(), LedgerError> {
        let mut guard = self.inner.write().await;
        let entry = guard
            .entries
            .get_mut(principal)
            .ok_or_else(|| LedgerError::NoSuchPrincipal(principal.to_string()))?;
        if entry.scrip < amount {
            return Err(LedgerError::Kernel(KernelError::InsufficientFunds));
        }
        entry.scrip -= amount;
        self.total_burned.fetch_add(amount as i64, Ordering::SeqCst);
        Ok(())
    }

    /// Debits an LLM generation cost, subject to both the principal's
    /// own remaining budget and the process-wide `api_budget_limit`
    ///. Once the cumulative spend
    /// reaches the cap this returns `BudgetExhausted` indefinitely, even
    /// for a principal with budget left of its own.
    pub async fn debit_llm(&self, principal: &PrincipalId, cost_micros: i64) -> Result<(), LedgerError> {
        let cumulative = self.cumulative_llm_spend_micros.load(Ordering::SeqCst);
        if cumulative + cost_micros > self.api_budget_limit_micros {
            // Latched, not just compared: the next call's cost may not
            // be the one that pushes `cumulative` up to `limit` exactly,
            // so `cumulative >= limit` alone can't be trusted to ever
            // become true. Once the global cap has refused one charge,
            // it's refused for good.
            self.budget_latched.store(true, Ordering::SeqCst);
            return Err(LedgerError::Kernel(KernelError::BudgetExhausted));
        }
        let mut guard = self.inner.write().await;
        let entry = guard
            .entries
            .get_mut(principal)
            .ok_or_else(|| LedgerError::NoSuchPrincipal(principal.to_string()))?;
        if entry.llm_budget_remaining_micros < cost_micros {
            return Err(LedgerError::Kernel(KernelError::BudgetExhausted));
        }
        entry.llm_budget_remaining_micros -= cost_micros;
        drop(guard);
        self.cumulative_llm_spend_micros.fetch_add(cost_micros, Ordering::SeqCst);
        Ok(())
    }

    /// `true` once the global cap has refused at least one charge, or
    /// cumulative LLM spend has reached the cap outright; the scheduler
    /// polls this to pause loops.
    pub fn budget_exhausted(&self) -> bool {
        self.budget_latched.load(Ordering::SeqCst) || self.cumulative_llm_spend_micros.load(Ordering::SeqCst) >= self.api_budget_limit_micros
    }

    pub async fn reserve_disk(&self, principal: &PrincipalId, bytes: u64) -> Result<(), LedgerError> {
        let mut guard = self.inner.write().await;
        let entry = guard
            .entries
            .get_mut(principal)
            .ok_or_else(|| LedgerError::NoSuchPrincipal(principal.to_string()))?;
        if entry.disk_used_bytes + bytes > entry.disk_quota_bytes {
            return Err(LedgerError::Kernel(KernelError::QuotaExceeded));
        }
        entry.disk_used_bytes += bytes;
        Ok(())
    }

    /// Releases previously reserved disk. Saturates at zero rather than
    /// panicking on underflow — a delete racing a quota recount should
    /// never leave `disk_used` negative, since it's stored as a `u64`.
    pub async fn release_disk(&self, principal: &PrincipalId, bytes: u64) -> Result<(), LedgerError> {
        let mut guard = self.inner.write().await;
        let entry = guard
            .entries
            .get_mut(principal)
            .ok_or_else(|| LedgerError::NoSuchPrincipal(principal.to_string()))?;
        entry.disk_used_bytes = entry.disk_used_bytes.saturating_sub(bytes);
        Ok(())
    }

    pub async fn disk_used(&self, principal: &PrincipalId) -> Result<u64, LedgerError> {
        let guard = self.inner.read().await;
        guard
            .entries
            .get(principal)
            .map(|e| e.disk_used_bytes)
            .ok_or_else(|| LedgerError::NoSuchPrincipal(principal.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn p(id: &str) -> PrincipalId {
        PrincipalId::new(id)
    }

    struct FixedHold(u64);

    #[async_trait]
    impl HoldProvider for FixedHold {
        async fn held_amount(&self, _principal: &PrincipalId) -> u64 {
            self.0
        }
    }

    #[tokio::test]
    async fn transfer_respects_outstanding_holds() {
        let ledger = Ledger::new(1_000_000_000);
        ledger.open_account(&p("a"), LedgerEntry::new(100, 0, 1_000)).await;
        ledger.open_account(&p("b"), LedgerEntry::new(0, 0, 1_000)).await;
        ledger.attach_hold_provider(Arc::new(FixedHold(80)));

        let result = ledger.transfer(&p("a"), &p("b"), 30).await;
        assert!(matches!(result, Err(LedgerError::Kernel(KernelError::InsufficientFunds))));

        ledger.transfer(&p("a"), &p("b"), 20).await.unwrap();
        assert_eq!(ledger.balance(&p("a")).await.unwrap(), 80);
    }

    async fn seeded_ledger() -> Ledger {
        let ledger = Ledger::new(1_000_000_000);
        ledger.open_account(&p("a"), LedgerEntry::new(100, 1_000_000, 1_000)).await;
        ledger.open_account(&p("b"), LedgerEntry::new(0, 1_000_000, 1_000)).await;
        ledger
    }

    #[tokio::test]
    async fn transfer_is_zero_sum_and_atomic() {
        let ledger = seeded_ledger().await;
        ledger.transfer(&p("a"), &p("b"), 30).await.unwrap();
        assert_eq!(ledger.balance(&p("a")).await.unwrap(), 70);
        assert_eq!(ledger.balance(&p("b")).await.unwrap(), 30);
    }

    #[tokio::test]
    async fn transfer_rejects_insufficient_funds_with_no_mutation() {
        let ledger = seeded_ledger().await;
        let result = ledger.transfer(&p("a"), &p("b"), 1_000).await;
        assert!(matches!(result, Err(LedgerError::Kernel(KernelError::InsufficientFunds))));
        assert_eq!(ledger.balance(&p("a")).await.unwrap(), 100);
        assert_eq!(ledger.balance(&p("b")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mint_and_burn_track_conservation_totals() {
        let ledger = seeded_ledger().await;
        ledger.mint(&p("a"), 50).await.unwrap();
        ledger.burn(&p("a"), 20).await.unwrap();
        let snap = ledger.snapshot().await;
        assert_eq!(snap.total_minted, 50);
        assert_eq!(snap.total_burned, 20);
        assert_eq!(snap.entries[&p("a")].scrip, 130);
    }

    #[tokio::test]
    async fn disk_quota_rejects_over_allocation() {
        let ledger = seeded_ledger().await;
        ledger.reserve_disk(&p("a"), 900).await.unwrap();
        let result = ledger.reserve_disk(&p("a"), 200).await;
        assert!(matches!(result, Err(LedgerError::Kernel(KernelError::QuotaExceeded))));
        ledger.release_disk(&p("a"), 900).await.unwrap();
        assert_eq!(ledger.disk_used(&p("a")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn global_budget_cap_is_a_hard_stop() {
        let ledger = Ledger::new(150);
        ledger.open_account(&p("a"), LedgerEntry::new(0, 1_000_000, 1_000)).await;
        ledger.debit_llm(&p("a"), 100).await.unwrap();
        let second = ledger.debit_llm(&p("a"), 100).await;
        assert!(matches!(second, Err(LedgerError::Kernel(KernelError::BudgetExhausted))));
        assert!(ledger.budget_exhausted());
    }
}
