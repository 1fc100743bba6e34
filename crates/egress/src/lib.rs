mod clickhouse;
mod domain;
mod mqtt;
mod nats;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clickhouse::*;
pub use domain::*;
pub use mqtt::*;
pub use nats::*;
