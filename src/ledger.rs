use std::collections::HashMap;

use chrono::{DateTime, Datelike, Local, NaiveDate, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::{ChoreError, Result};
use crate::models::{
    LinkedEntity, Period, PointBalance, PointTransaction, Reward, Session, TransactionKind,
};

/// Which period totals a transaction kind counts toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RollupRule {
    pub daily: bool,
    pub weekly: bool,
    pub monthly: bool,
}

impl RollupRule {
    pub const ALL: RollupRule = RollupRule {
        daily: true,
        weekly: true,
        monthly: true,
    };
    pub const NONE: RollupRule = RollupRule {
        daily: false,
        weekly: false,
        monthly: false,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupTable {
    rules: HashMap<TransactionKind, RollupRule>,
}

impl Default for RollupTable {
    fn default() -> Self {
        let rules = TransactionKind::all()
            .into_iter()
            .map(|kind| {
                let rule = match kind {
                    TransactionKind::Completion
                    | TransactionKind::Bonus
                    | TransactionKind::Missed
                    | TransactionKind::Penalty => RollupRule::ALL,
                    TransactionKind::Manual
                    | TransactionKind::Reward
                    | TransactionKind::Correction => RollupRule::NONE,
                };
                (kind, rule)
            })
            .collect();
        Self { rules }
    }
}

impl RollupTable {
    pub fn rule(&self, kind: TransactionKind) -> RollupRule {
        self.rules.get(&kind).copied().unwrap_or_default()
    }

    pub fn set(&mut self, kind: TransactionKind, rule: RollupRule) {
        self.rules.insert(kind, rule);
    }
}

#[derive(Debug, Clone)]
pub struct LedgerPolicy {
    pub allow_negative: bool,
    pub rollups: RollupTable,
    /// Calendar day an instant falls on for period totals.
    pub day_of: fn(DateTime<Utc>) -> NaiveDate,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            allow_negative: false,
            rollups: RollupTable::default(),
            day_of: household_day,
        }
    }
}

/// The household's wall-clock date at `now`.
pub fn household_day(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&Local).date_naive()
}

/// A committed write: the appended transaction and the balance after it.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub transaction: PointTransaction,
    pub balance: PointBalance,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    policy: LedgerPolicy,
    balances: HashMap<Uuid, PointBalance>,
    transactions: Vec<PointTransaction>,
}

impl Ledger {
    pub fn new(policy: LedgerPolicy) -> Self {
        Self {
            policy,
            balances: HashMap::new(),
            transactions: Vec::new(),
        }
    }

    /// Rebuilds a ledger from stored rows. Balances are taken as stored,
    /// not recomputed from the history.
    pub fn from_parts(
        policy: LedgerPolicy,
        balances: Vec<PointBalance>,
        mut transactions: Vec<PointTransaction>,
    ) -> Self {
        transactions.sort_by_key(|tx| tx.created_at);
        Self {
            policy,
            balances: balances
                .into_iter()
                .map(|balance| (balance.user_id, balance))
                .collect(),
            transactions,
        }
    }

    pub fn balance(&self, user_id: Uuid) -> Option<&PointBalance> {
        self.balances.get(&user_id)
    }

    pub fn current(&self, user_id: Uuid) -> i64 {
        self.balances.get(&user_id).map_or(0, |b| b.current)
    }

    pub fn balances(&self) -> Vec<&PointBalance> {
        let mut balances: Vec<&PointBalance> = self.balances.values().collect();
        balances.sort_by(|a, b| b.current.cmp(&a.current).then(a.user_id.cmp(&b.user_id)));
        balances
    }

    pub fn history(&self, user_id: Uuid) -> Vec<&PointTransaction> {
        self.transactions
            .iter()
            .filter(|tx| tx.user_id == user_id)
            .collect()
    }

    pub fn transactions(&self) -> &[PointTransaction] {
        &self.transactions
    }

    /// The whole family's transactions for a parent, only their own for a child.
    pub fn visible_to(&self, session: &Session) -> Vec<PointTransaction> {
        self.transactions
            .iter()
            .filter(|tx| session.is_parent() || tx.user_id == session.user_id)
            .cloned()
            .collect()
    }

    pub fn allocate(
        &mut self,
        user_id: Uuid,
        amount: i64,
        reason: &str,
        kind: TransactionKind,
        link: Option<LinkedEntity>,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        ensure_positive(amount)?;
        self.apply(user_id, amount, reason, kind, link, now)
    }

    pub fn deduct(
        &mut self,
        user_id: Uuid,
        amount: i64,
        reason: &str,
        kind: TransactionKind,
        link: Option<LinkedEntity>,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        ensure_positive(amount)?;
        self.apply(user_id, -amount, reason, kind, link, now)
    }

    /// Manual correction by a parent; the sign of `delta` picks the direction.
    pub fn adjust(
        &mut self,
        user_id: Uuid,
        delta: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        match delta {
            0 => Err(ChoreError::invalid("adjustment must be non-zero")),
            d if d > 0 => self.allocate(user_id, d, reason, TransactionKind::Manual, None, now),
            d => self.deduct(
                user_id,
                d.checked_neg()
                    .ok_or_else(|| ChoreError::invalid("adjustment out of range"))?,
                reason,
                TransactionKind::Manual,
                None,
                now,
            ),
        }
    }

    pub fn redeem(&mut self, user_id: Uuid, reward: &Reward, now: DateTime<Utc>) -> Result<LedgerEntry> {
        self.deduct(
            user_id,
            reward.cost,
            &format!("Redeemed {}", reward.title),
            TransactionKind::Reward,
            Some(LinkedEntity::Reward(reward.id)),
            now,
        )
    }

    /// Zeroes one period total for `user_id`, or for everyone when `None`.
    pub fn reset_period(
        &mut self,
        user_id: Option<Uuid>,
        period: Period,
        now: DateTime<Utc>,
    ) -> Vec<PointBalance> {
        let mut changed = Vec::new();
        for balance in self.balances.values_mut() {
            if user_id.is_some_and(|id| id != balance.user_id) {
                continue;
            }
            match period {
                Period::Daily => balance.daily = 0,
                Period::Weekly => balance.weekly = 0,
                Period::Monthly => balance.monthly = 0,
            }
            balance.updated_at = now;
            changed.push(balance.clone());
        }
        info!(%period, users = changed.len(), "Reset period totals");
        changed
    }

    /// Resets every period total whose period has ended since the balance's
    /// anchor day, then moves the anchor to `today`.
    pub fn roll_over(&mut self, today: NaiveDate, now: DateTime<Utc>) -> Vec<PointBalance> {
        let changed: Vec<PointBalance> = self
            .balances
            .values_mut()
            .filter_map(|balance| roll_balance(balance, today, now).then(|| balance.clone()))
            .collect();
        if !changed.is_empty() {
            info!(%today, users = changed.len(), "Rolled over period totals");
        }
        changed
    }

    fn apply(
        &mut self,
        user_id: Uuid,
        signed: i64,
        reason: &str,
        kind: TransactionKind,
        link: Option<LinkedEntity>,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ChoreError::invalid("transaction reason is required"));
        }

        let today = (self.policy.day_of)(now);
        let mut balance = self
            .balances
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| PointBalance::empty(user_id, today, now));
        roll_balance(&mut balance, today, now);

        let out_of_range = || ChoreError::invalid("balance out of range");
        let next = balance.current.checked_add(signed).ok_or_else(out_of_range)?;
        if next < 0 && !self.policy.allow_negative {
            return Err(ChoreError::InsufficientBalance {
                required: -signed,
                available: balance.current,
            });
        }

        let rule = self.policy.rollups.rule(kind);
        let rolled = |total: i64, counts: bool| -> Result<i64> {
            if counts {
                total.checked_add(signed).ok_or_else(out_of_range)
            } else {
                Ok(total)
            }
        };
        let daily = rolled(balance.daily, rule.daily)?;
        let weekly = rolled(balance.weekly, rule.weekly)?;
        let monthly = rolled(balance.monthly, rule.monthly)?;

        balance.current = next;
        balance.daily = daily;
        balance.weekly = weekly;
        balance.monthly = monthly;
        balance.updated_at = now;

        let transaction = PointTransaction {
            id: Uuid::new_v4(),
            user_id,
            amount: signed,
            reason: reason.to_string(),
            kind,
            link,
            balance_after: next,
            created_at: now,
        };

        self.balances.insert(user_id, balance.clone());
        self.transactions.push(transaction.clone());

        info!(
            user = %user_id,
            amount = signed,
            %kind,
            balance = next,
            "Recorded point transaction"
        );

        Ok(LedgerEntry {
            transaction,
            balance,
        })
    }
}

fn ensure_positive(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(ChoreError::invalid(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

/// Returns whether the anchor moved.
fn roll_balance(balance: &mut PointBalance, today: NaiveDate, now: DateTime<Utc>) -> bool {
    let anchor = balance.period_anchor;
    if today <= anchor {
        return false;
    }

    balance.daily = 0;
    if anchor.iso_week() != today.iso_week() {
        balance.weekly = 0;
    }
    if (anchor.year(), anchor.month()) != (today.year(), today.month()) {
        balance.monthly = 0;
    }
    balance.period_anchor = today;
    balance.updated_at = now;
    true
}
