//! Nested transactions as a depth counter over the driver.
//!
//! Only the outermost level talks to storage: `begin` at depth 0 opens a
//! real transaction, and `commit` or `rollback` reach the driver only at
//! depth 1. Inner levels just move the counter, so a rollback above depth 1
//! does not undo anything by itself; the outermost caller decides.
//!
//! When the driver reports a transaction that was opened outside the engine,
//! `begin` adopts it at depth 2. Unwinding back to depth 1 then releases it
//! without committing, leaving it to its owner.

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use relata_core::{Error, Result};

use crate::registry;

#[derive(Debug, Default)]
struct State {
    depth: usize,
    adopted: bool,
}

fn state() -> MutexGuard<'static, State> {
    static STATE: OnceLock<Mutex<State>> = OnceLock::new();
    STATE
        .get_or_init(Mutex::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Current nesting depth. 0 means no transaction.
pub fn depth() -> usize {
    state().depth
}

pub fn begin() -> Result<()> {
    let driver = registry::driver()?;
    let mut state = state();
    if state.depth > 0 {
        state.depth += 1;
        tracing::trace!(depth = state.depth, "nested transaction level");
        return Ok(());
    }

    if driver.in_transaction(None) {
        state.depth = 2;
        state.adopted = true;
        tracing::debug!("adopting external transaction");
        return Ok(());
    }

    driver.begin_transaction(None)?;
    state.depth = 1;
    tracing::info!("Beginning transaction");
    Ok(())
}

pub fn commit() -> Result<()> {
    finish("commit")
}

pub fn rollback() -> Result<()> {
    finish("rollback")
}

fn finish(action: &'static str) -> Result<()> {
    let driver = registry::driver()?;
    let mut state = state();
    match state.depth {
        0 => Err(Error::invalid_state(
            "transaction",
            format!("{} without an open transaction", action),
        )),
        1 => {
            state.depth = 0;
            drop(state);
            if action == "commit" {
                tracing::info!("Committing transaction");
                driver.commit(None)
            } else {
                tracing::info!("Rolling back transaction");
                driver.rollback(None)
            }
        }
        _ => {
            state.depth -= 1;
            if state.adopted && state.depth == 1 {
                state.depth = 0;
                state.adopted = false;
                tracing::debug!(action, "released external transaction");
            }
            Ok(())
        }
    }
}

/// Forgets any open levels without touching storage.
pub(crate) fn reset() {
    *state() = State::default();
}

/// One transaction level held for the duration of an operation.
///
/// Dropping an unfinished scope rolls its level back, which keeps the depth
/// consistent when an error propagates with `?`.
#[must_use]
pub(crate) struct TransactionScope {
    open: bool,
}

impl TransactionScope {
    /// Opens a level when `enabled`; otherwise the scope is inert.
    pub(crate) fn begin(enabled: bool) -> Result<Self> {
        if enabled {
            begin()?;
        }
        Ok(Self { open: enabled })
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn commit(mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        commit()
    }

    pub(crate) fn rollback(mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        rollback()
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            if let Err(error) = rollback() {
                tracing::warn!(error = %error, "rollback of abandoned transaction level failed");
            }
        }
    }
}
