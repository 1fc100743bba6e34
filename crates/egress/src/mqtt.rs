mod device_publisher;

pub use device_publisher::*;
