pub mod config;
pub mod coordinator;
pub mod deletion;
pub mod descriptor;
pub mod failures;
pub mod observability;
pub mod queue;
pub mod session;
pub mod store;

pub use coordinator::{
    BACKGROUND_SESSION_IDENTIFIER, CoordinatorOptions, DELETION_RETRY_COUNT, Submission,
    UPLOAD_QUEUE_NAME, UploadCoordinator,
};
pub use descriptor::{DescriptorStatus, SubmitError, UploadDescriptor, UploadTicket};
