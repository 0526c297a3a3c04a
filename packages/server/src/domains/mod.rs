// Business domains
pub mod account_merge;
