mod envelope;
mod error;
mod producer;
mod raw_message;
mod records;
mod storage;

pub use envelope::*;
pub use error::*;
pub use producer::*;
pub use raw_message::*;
pub use records::*;
pub use storage::*;
