mod client;
mod middleware;
mod source_message;
mod tower_consumer;
mod trace_context;
mod traits;

pub use client::*;
pub use middleware::*;
pub use source_message::*;
pub use tower_consumer::*;
pub use trace_context::*;
pub use traits::*;
