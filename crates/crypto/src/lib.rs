//! TekServer crypto.
//!
//! Everything the publish pipeline needs to bind an upload session to its
//! keys: the encrypted revision token codec, the ring of revision keys with
//! lazy refresh, and the wrapping seam behind which a KMS lives.

#![warn(clippy::all)]

pub mod error;
pub mod keyring;
pub mod kms;
pub mod token;

pub use error::{KeyRingError, KmsError, TokenError};
pub use keyring::{KeyRing, UnwrappedKey, WrappedKeySource, WrappedRevisionKey};
pub use kms::{KeyWrapper, LocalKeyWrapper};
pub use token::{
    build_revision_token_data, RevisableKey, RevisionTokenConfig, RevisionTokenData,
    RevisionTokenManager,
};
