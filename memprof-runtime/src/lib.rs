//! In-process recording runtime: the global-allocator interceptor, the
//! periodic snapshot builder, and the reconnecting TCP sender that ships
//! snapshots to a viewer (spec §4.C, §4.D, §4.F, §6).

pub mod api;
pub mod interceptor;
pub mod sender;
pub mod snapshot;

pub use api::{init, init_with, record_alloc, record_free, sender_state, shutdown, InitOptions};
pub use interceptor::TrackingAllocator;
pub use sender::{Sender, SenderState};
