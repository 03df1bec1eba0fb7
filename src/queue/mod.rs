//! Work queue feeding the controller's workers
//!
//! Keys, not objects, are queued: by the time a key is processed the local
//! cache may hold a newer version than the one that triggered the add.

mod rate_limiter;
mod work_queue;

pub use rate_limiter::*;
pub use work_queue::WorkQueue;
