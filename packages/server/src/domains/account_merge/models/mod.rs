pub mod merge_request;
pub mod user;

pub use merge_request::{MergeRequest, MergeRequestStatus, NewMergeRequest, StatusUpdate};
pub use user::{IdentityLink, User};
