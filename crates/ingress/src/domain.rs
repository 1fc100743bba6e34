mod mt_capture_service;
mod normalizer;
mod source_adapter;

pub use mt_capture_service::*;
pub use normalizer::*;
pub use source_adapter::*;
