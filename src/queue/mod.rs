pub mod engine;
pub mod store;

pub use engine::{DescriptorQueue, FailureSink, QueueOptions, UploadEvent};
pub use store::DescriptorStore;
