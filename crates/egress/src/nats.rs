mod error_reporter;
mod queue_forward_sink;

pub use error_reporter::*;
pub use queue_forward_sink::*;
