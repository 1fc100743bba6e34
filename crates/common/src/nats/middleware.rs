mod consume_types;
mod logging;
mod publish_types;
mod publisher;
mod tracing;

pub use consume_types::*;
pub use logging::*;
pub use publish_types::*;
pub use publisher::*;
pub use tracing::*;
