//! Contract violations raised by the update queue and the dirty tracker.
//!
//! None of these describe runtime conditions: each one means a caller broke
//! the API contract. The panicking entry points log and abort the caller via
//! [`contract_violation`]; the `try_*` variants hand the value back instead.

use thiserror::Error;

/// A misuse of the queue or tracker API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractViolation {
    /// `enqueue_add` was called for a handle that already has a command.
    #[error("enqueue_add called twice for {handle}")]
    DuplicateAdd { handle: String },

    /// A persistent id was set on a command that was not added this cycle.
    #[error("persistent id may only be set on an added command ({handle})")]
    PersistentIdOnNonAdded { handle: String },

    /// Two payload types were declared with the same payload id.
    #[error("payload id {id} is registered to {registered}, not {requested}")]
    PayloadIdCollision {
        id: usize,
        registered: &'static str,
        requested: &'static str,
    },

    /// A producer marked an object dirty after a poller locked the list.
    #[error("mark_dirty({handle}) while the dirty list is locked")]
    DirtyListLocked { handle: String },

    /// The poll handle does not name a registered poller.
    #[error("poll handle {0} is not registered")]
    UnknownPoller(u32),

    /// A poller was destroyed between `get_dirty_objects` and its reset.
    #[error("poller {0} destroyed with an outstanding dirty-set read")]
    OutstandingRead(u32),

    /// A poller reset the dirty set without reading it first.
    #[error("poller {0} reset without a prior get_dirty_objects")]
    ResetWithoutRead(u32),

    /// The process-wide tracker was initialized twice.
    #[error("global dirty tracker already initialized")]
    AlreadyInitialized,

    /// The process-wide tracker was used before `init` or after `deinit`.
    #[error("global dirty tracker is not initialized")]
    NotInitialized,
}

/// Result alias for the `try_*` entry points.
pub type ContractResult<T> = Result<T, ContractViolation>;

/// Report a broken contract and panic.
#[cold]
#[track_caller]
pub(crate) fn contract_violation(err: ContractViolation) -> ! {
    log::error!("contract violation: {err}");
    panic!("contract violation: {err}");
}
