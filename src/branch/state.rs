use crate::error::DeliveryError;
use crate::ledger::Interface;
use crate::replication::LamportClock;

/// Balance and logical clock of one replica.
///
/// The two always move together under a single lock in [`super::Branch`];
/// nothing here blocks or performs I/O.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerState {
    balance: i64,
    clock: LamportClock,
}

impl LedgerState {
    pub fn new(balance: i64) -> Self {
        LedgerState {
            balance,
            clock: LamportClock::new(),
        }
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn clock(&self) -> u64 {
        self.clock.time()
    }

    pub fn tick_on_send(&mut self) -> u64 {
        self.clock.tick_on_send()
    }

    pub fn tick_on_receive(&mut self, incoming: u64) -> u64 {
        self.clock.tick_on_receive(incoming)
    }

    /// Withdraw guard.
    pub fn covers(&self, amount: i64) -> bool {
        self.balance >= amount
    }

    pub fn credit(&mut self, amount: i64, interface: Interface) -> Result<i64, DeliveryError> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(DeliveryError::Overflow { interface, amount })?;
        Ok(self.balance)
    }

    /// Unguarded decrement, used by `propagate_withdraw` where the guard
    /// already ran at the originating replica.
    pub fn debit(&mut self, amount: i64, interface: Interface) -> Result<i64, DeliveryError> {
        self.balance = self
            .balance
            .checked_sub(amount)
            .ok_or(DeliveryError::Overflow { interface, amount })?;
        Ok(self.balance)
    }

    /// Guarded decrement. Returns `None` and leaves the balance untouched
    /// when it cannot cover `amount`.
    pub fn debit_guarded(&mut self, amount: i64) -> Option<i64> {
        if !self.covers(amount) {
            return None;
        }
        self.balance -= amount;
        Some(self.balance)
    }
}
