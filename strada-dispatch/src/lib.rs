//! Dispatch engine: matches pending trips to nearby drivers by issuing
//! time-bounded booking requests, one candidate at a time.

pub mod coordinator;
pub mod notify;
pub mod service;
pub mod trips;
pub mod waiter;

pub use coordinator::DispatchCoordinator;
pub use notify::{BroadcastNotifier, CancelGuard, CancellationRegistry};
pub use service::DispatchService;
pub use trips::TripStateManager;
pub use waiter::{ResponseWaiter, WaitOutcome};
