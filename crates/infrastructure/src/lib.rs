//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod clock;
mod http_permission_gate;
mod in_memory_reconcile_queue;
mod in_memory_resource_store;
mod static_permission_gate;

pub use clock::{ManualClock, SystemClock};
pub use http_permission_gate::HttpPermissionGate;
pub use in_memory_reconcile_queue::{InMemoryReconcileQueue, QueueBackoff};
pub use in_memory_resource_store::InMemoryResourceStore;
pub use static_permission_gate::StaticPermissionGate;
