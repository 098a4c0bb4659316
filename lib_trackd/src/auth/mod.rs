//! # Request Authentication
//!
//! Every tracking event carries a `salt`: a two-stage digest over a canonical
//! form of its fields and a secret token shared with the sender. This module
//! holds the secret table, the signature scheme, the reply codes the HTTP
//! transport reports, and the structural checks applied to raw datagrams.
//!
//! ## Core Components:
//!
//! - **`secrets`**: read-only `(op, trk_id) -> token` lookup built at startup.
//! - **`signature`**: canonical string, digest, and the `Authenticator`.
//! - **`datagram`**: field extraction and drop rules for UDP payloads.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Per-(op, entity) secret tokens.
pub mod secrets;
/// The signature scheme and request validation.
pub mod signature;
/// Structural validation of datagram payloads.
pub mod datagram;

pub use datagram::{parse_datagram, DatagramFields};
pub use secrets::SecretTable;
pub use signature::{
    atoi, canonical_string, sign, sign_fields, Authenticator, ReplyCode, TrackQuery, Verified,
};
