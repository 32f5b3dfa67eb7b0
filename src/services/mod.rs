pub mod error;
pub mod key_deriver;
pub mod pipeline;
pub mod storage;
pub mod transform;
