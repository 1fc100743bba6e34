mod mt_change_producer;
mod source_adapter_service;

pub use mt_change_producer::*;
pub use source_adapter_service::*;
