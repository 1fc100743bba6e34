mod domain;
mod ingress_worker;
mod mqtt;
mod nats;

pub use domain::*;
pub use ingress_worker::*;
pub use mqtt::*;
pub use nats::*;
