//! Daily spending cap.

use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::PluginAbort;
use crate::plugin::{Capabilities, HookFuture, PaidContext, PayContext, Plugin};

const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Default, Clone, Copy)]
struct Ledger {
    day: u64,
    spent: u64,
}

/// Refuses payments that would push the current UTC day's spending over a cap.
///
/// Spending is recorded in `after_pay`, so two calls racing through
/// `before_pay` may together overshoot the cap by one payment.
#[derive(Debug)]
pub struct BudgetPlugin {
    daily_max: u64,
    ledger: Mutex<Ledger>,
}

impl BudgetPlugin {
    /// Plugin name.
    pub const NAME: &'static str = "budget";

    /// A cap of `daily_max` smallest units per UTC day.
    #[must_use]
    pub fn new(daily_max: u64) -> Self {
        Self {
            daily_max,
            ledger: Mutex::default(),
        }
    }

    /// The configured cap.
    #[must_use]
    pub const fn daily_max(&self) -> u64 {
        self.daily_max
    }

    /// Amount spent so far today.
    #[must_use]
    pub fn spent_today(&self) -> u64 {
        self.spent_on(current_day())
    }

    fn spent_on(&self, day: u64) -> u64 {
        let ledger = *self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        if ledger.day == day { ledger.spent } else { 0 }
    }

    fn check(&self, day: u64, amount: u64) -> Result<(), PluginAbort> {
        if amount > self.daily_max {
            return Err(PluginAbort::new(
                Self::NAME,
                format!("amount {amount} exceeds daily budget {}", self.daily_max),
            ));
        }
        let spent = self.spent_on(day);
        if spent.saturating_add(amount) > self.daily_max {
            return Err(PluginAbort::new(
                Self::NAME,
                format!(
                    "daily budget {} exhausted: {spent} spent, {amount} requested",
                    self.daily_max
                ),
            ));
        }
        Ok(())
    }

    fn record(&self, day: u64, amount: u64) {
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        if ledger.day != day {
            *ledger = Ledger { day, spent: 0 };
        }
        ledger.spent = ledger.spent.saturating_add(amount);
    }
}

fn current_day() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() / SECS_PER_DAY)
}

impl Plugin for BudgetPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::PAYMENT
    }

    fn before_pay<'a>(&'a self, ctx: &'a PayContext) -> HookFuture<'a> {
        Box::pin(async move {
            self.check(current_day(), ctx.amount)?;
            tracing::debug!(amount = ctx.amount, daily_max = self.daily_max, "Budget check passed");
            Ok(())
        })
    }

    fn after_pay<'a>(&'a self, ctx: &'a PaidContext) -> HookFuture<'a> {
        Box::pin(async move {
            self.record(current_day(), ctx.payment.amount);
            Ok(())
        })
    }
}
