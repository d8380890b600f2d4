//! The shared net-object dirty tracker with an explicit `init`/`deinit`
//! lifecycle.
//!
//! Producers call [`mark_dirty`] from anywhere on the game thread; it is a
//! no-op before [`init`], so subsystems can mark without knowing whether
//! replication is running. Code that can take a tracker by reference should
//! own a [`GlobalDirtyTracker`] instead.
//!
//! The instance is thread-local: the polling protocol assumes all producers
//! and pollers share one thread per frame.

use std::cell::RefCell;

use crate::dirty_tracker::GlobalDirtyTracker;
use crate::error::{ContractResult, ContractViolation, contract_violation};

/// Identity of a replicated object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetHandle(pub u32);

thread_local! {
    static INSTANCE: RefCell<Option<GlobalDirtyTracker<NetHandle>>> = const { RefCell::new(None) };
}

/// # Panics
/// If already initialized.
pub fn init() {
    if let Err(err) = try_init() {
        contract_violation(err);
    }
}

pub fn try_init() -> ContractResult<()> {
    INSTANCE.with_borrow_mut(|slot| {
        if slot.is_some() {
            return Err(ContractViolation::AlreadyInitialized);
        }
        *slot = Some(GlobalDirtyTracker::new());
        log::debug!("global dirty tracker initialized");
        Ok(())
    })
}

/// Destroy the tracker and every poller registered on it.
///
/// # Panics
/// If not initialized.
pub fn deinit() {
    if let Err(err) = try_deinit() {
        contract_violation(err);
    }
}

pub fn try_deinit() -> ContractResult<()> {
    INSTANCE.with_borrow_mut(|slot| match slot.take() {
        Some(_) => {
            log::debug!("global dirty tracker deinitialized");
            Ok(())
        }
        None => Err(ContractViolation::NotInitialized),
    })
}

pub fn is_initialized() -> bool {
    INSTANCE.with_borrow(Option::is_some)
}

/// Mark `handle` dirty on the shared tracker, if there is one.
///
/// # Panics
/// If a poller locked the dirty list.
pub fn mark_dirty(handle: NetHandle) {
    INSTANCE.with_borrow_mut(|slot| {
        if let Some(tracker) = slot {
            tracker.mark_dirty(handle);
        }
    });
}

/// Run `f` against the shared tracker. Pre-reset callbacks invoked from
/// inside `f` must not call back into this module.
///
/// # Panics
/// If not initialized.
pub fn with_tracker<R>(f: impl FnOnce(&mut GlobalDirtyTracker<NetHandle>) -> R) -> R {
    INSTANCE.with_borrow_mut(|slot| match slot {
        Some(tracker) => f(tracker),
        None => contract_violation(ContractViolation::NotInitialized),
    })
}
