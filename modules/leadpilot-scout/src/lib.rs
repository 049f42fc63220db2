pub mod analyst;
pub mod autopilot;
pub mod filter;
pub mod live;
pub mod scout;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use autopilot::{BatchOutcome, ReplyError};
pub use scout::Scout;
