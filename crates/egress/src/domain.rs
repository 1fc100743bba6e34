mod device_publish_sink;
mod storage_put_sink;
mod topic_template;

pub use device_publish_sink::*;
pub use storage_put_sink::*;
pub use topic_template::*;
