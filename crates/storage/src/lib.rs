//! TekServer storage.
//!
//! SQLite-backed stores for exposure records and wrapped revision keys.
//! The exposure store owns the one transaction of the publish pipeline:
//! lock the incoming identities, check revision-token preconditions, merge,
//! and write.

#![warn(clippy::all)]

pub mod error;
pub mod exposure;
pub mod revision_keys;

pub use error::StoreError;
pub use exposure::{
    ExposureStore, InsertAndReviseRequest, InsertAndReviseResult, IterateCriteria,
};
pub use revision_keys::RevisionKeyStore;
