mod bus;
mod error_sink;
mod ordering;
mod pattern;
mod retry;
mod rule;
mod sink;
mod state;
mod transform;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bus::*;
pub use error_sink::*;
pub use ordering::*;
pub use pattern::*;
pub use retry::*;
pub use rule::*;
pub use sink::*;
pub use state::*;
pub use transform::*;
