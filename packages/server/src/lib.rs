// Identity Platform - Account Merge Core
//
// Folds a newly authenticated external identity ("source" account) into the
// existing account that already owns the same email ("target" account), across
// the identity store, the authorization service and the secondary-data service.
//
// The merge runs as a saga: ordered steps with bounded retries, and reverse-order
// compensation driven by a pre-merge snapshot when a step cannot complete.

pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
