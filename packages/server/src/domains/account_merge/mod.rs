//! Account merge domain - folds a newly signed-in identity into the existing
//! account that owns the same email.
//!
//! Architecture:
//!   HTTP route → actions::{initiate, confirm, reject} → machines (validation)
//!                                      │
//!                                      └─► MergeSaga (kernel::saga) → snapshot + steps
//!
//! Only the actions change a merge request's status, and every change is a
//! conditional write against the status the action read.

pub mod actions;
pub mod confirmation_token;
pub mod errors;
pub mod machines;
pub mod models;
pub mod repository;
pub mod saga;
pub mod snapshot;

// Re-export commonly used types
pub use actions::*;
pub use errors::MergeError;
pub use models::{IdentityLink, MergeRequest, MergeRequestStatus, User};
pub use repository::{
    IdentityStore, MergeRequestRepository, PostgresIdentityStore, PostgresMergeRequestRepository,
};
pub use saga::{build_merge_saga, MergeSaga, MergeSagaDeps, MergeStep};
pub use snapshot::{MergeSnapshot, SnapshotStore};
