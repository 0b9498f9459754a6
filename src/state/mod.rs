//! Terraform state documents and resource addresses

pub mod address;
pub mod document;

pub use address::{IndexKey, ResourceAddress};
pub use document::{ResourceRecord, StateDocument};
