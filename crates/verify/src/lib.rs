//! TekServer verification.
//!
//! Validates the diagnosis certificate attached to an upload: an ES256 JWT
//! signed by a registered health authority, bound to the uploaded key set by
//! an HMAC the client salts. Also owns the authorized-app policy catalog the
//! pipeline consults before anything else.

#![warn(clippy::all)]

pub mod apps;
pub mod authority;
pub mod error;
pub mod tekmac;
pub mod verifier;

pub use apps::{AuthorizedApp, AuthorizedAppProvider, CachingAppProvider, MemoryAppProvider};
pub use authority::{AuthorityKey, HealthAuthority, MemoryAuthorityRegistry};
pub use error::{AppsError, VerifyError};
pub use verifier::{VerificationOutcome, Verifier};
