//! # Signature Scheme
//!
//! A sender proves an event is genuine by computing
//!
//! ```text
//! salt = sha1_hex( md5_hex(canonical) + token )
//! ```
//!
//! where `canonical` is built from the numeric values of `trk_id`, `data` and
//! `date`, sorted **by value** (not by name) and joined as `name=value` pairs
//! with `&`. Existing clients sign this way, so the ordering is kept as is.
//! The comparison with the supplied salt is a plain byte comparison.

use std::fmt;
use std::sync::Arc;

use md5::Md5;
use sha1::{Digest, Sha1};

use super::secrets::SecretTable;
use crate::configs::settings::OP_MAX;
use crate::core::event::Event;

/// Length of a hex encoded SHA-1 digest.
pub const SALT_LEN: usize = 40;
/// Length of a `YYYYMMDD` date.
pub const DATE_LEN: usize = 8;
/// Smallest accepted date.
pub const MIN_DATE: i64 = 19700101;

/// # Reply Code
///
/// Outcome of a track request, written back as `<code>\t<message>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyCode {
    /// Event accepted.
    Ok = 1,
    /// One of `op`, `date`, `data`, `trk_id`, `salt` is absent.
    MissingArg = 2,
    /// Declared data length does not match the data.
    DataLenErr = 3,
    /// `date` is not eight characters long.
    DateLenErr = 4,
    /// `date` is below 19700101.
    DateErr = 5,
    /// `trk_id` is not made of digits only.
    TrkIdErr = 6,
    /// Reserved for timestamp validation; no check currently reports it.
    TimeErr = 7,
    /// `op` is outside `[0, 32)`.
    OpErr = 8,
    /// The signature does not match, or no token exists for the entity.
    SaltErr = 9,
}

impl ReplyCode {
    /// Numeric code sent on the wire.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Human readable message sent next to the code.
    pub fn message(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::MissingArg => "missing arguments",
            Self::DataLenErr => "datalen error",
            Self::DateLenErr => "datelen error",
            Self::DateErr => "date error",
            Self::TrkIdErr => "track id error",
            Self::TimeErr => "time error",
            Self::OpErr => "op must in [0, 32)",
            Self::SaltErr => "salt error",
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.code(), self.message())
    }
}

/// # atoi
///
/// Reads an integer the way C `atoi` does: skips leading whitespace, takes an
/// optional sign, then as many digits as follow. Anything else yields 0 for
/// the missing part. The result saturates at the `i32` bounds.
pub fn atoi(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let mut value: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        value = value.saturating_mul(10).saturating_add(i64::from(b - b'0'));
        if value > i64::from(i32::MAX) + 1 {
            break;
        }
    }
    let value = if negative { -value } else { value };
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX))
}

/// Builds the canonical string: the three pairs sorted by value ascending.
/// Equal values keep the order `trk_id`, `data`, `date`.
pub fn canonical_string(trk_id: i64, data: i64, date: i64) -> String {
    let mut pairs = [("trk_id", trk_id), ("data", data), ("date", date)];
    pairs.sort_by_key(|(_, value)| *value);
    pairs
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Computes `sha1_hex(md5_hex(canonical) + token)`.
pub fn sign(canonical: &str, token: &str) -> String {
    let first = hex::encode(Md5::digest(canonical.as_bytes()));
    let mut hasher = Sha1::new();
    hasher.update(first.as_bytes());
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Signs raw field values the way a sender does.
pub fn sign_fields(trk_id: i64, data: i64, date: i64, token: &str) -> String {
    sign(&canonical_string(trk_id, data, date), token)
}

/// # Track Query
///
/// The five fields of a track request, borrowed from the transport. The first
/// occurrence of each key wins.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrackQuery<'a> {
    /// Operation code.
    pub op: Option<&'a str>,
    /// `YYYYMMDD` bucket.
    pub date: Option<&'a str>,
    /// Numeric value.
    pub data: Option<&'a str>,
    /// Entity id.
    pub trk_id: Option<&'a str>,
    /// Signature.
    pub salt: Option<&'a str>,
}

impl<'a> TrackQuery<'a> {
    /// Collects the known keys from `key=value` pairs.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut query = TrackQuery::default();
        for (key, value) in pairs {
            let slot = match key {
                "op" => &mut query.op,
                "date" => &mut query.date,
                "data" => &mut query.data,
                "trk_id" => &mut query.trk_id,
                "salt" => &mut query.salt,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }
        query
    }
}

/// A request whose signature checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verified<'a> {
    /// Operation code.
    pub op: u8,
    /// Entity id.
    pub trk_id: u32,
    /// Raw `data` as sent.
    pub data: &'a str,
    /// Raw `date` as sent.
    pub date: &'a str,
}

impl Verified<'_> {
    /// Turns the request into an event stamped with `now` (unix seconds).
    pub fn into_event(self, now: i64) -> Event {
        Event::new(
            self.op,
            self.trk_id,
            format!("t={now}&data={}&date={}", self.data, self.date),
        )
    }
}

/// # Authenticator
///
/// Validates track requests against the secret table. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Authenticator {
    secrets: Arc<SecretTable>,
}

impl Authenticator {
    /// Creates an authenticator over a shared secret table.
    pub fn new(secrets: Arc<SecretTable>) -> Self {
        Self { secrets }
    }

    /// # Verify
    ///
    /// Runs the field checks in order (presence, op, date length, date value,
    /// trk_id) and then the signature check.
    pub fn verify<'a>(&self, query: &TrackQuery<'a>) -> Result<Verified<'a>, ReplyCode> {
        let (Some(op), Some(date), Some(data), Some(trk_id), Some(salt)) =
            (query.op, query.date, query.data, query.trk_id, query.salt)
        else {
            return Err(ReplyCode::MissingArg);
        };

        let op_value = atoi(op);
        if op_value < 0 || op_value >= i64::from(OP_MAX) {
            return Err(ReplyCode::OpErr);
        }

        if date.len() != DATE_LEN {
            return Err(ReplyCode::DateLenErr);
        }
        let date_value = atoi(date);
        if date_value < MIN_DATE {
            return Err(ReplyCode::DateErr);
        }

        if trk_id.is_empty() || !trk_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ReplyCode::TrkIdErr);
        }
        let trk_id_value = u32::try_from(atoi(trk_id)).map_err(|_| ReplyCode::TrkIdErr)?;

        let op_value = op_value as u8;
        let token = self
            .secrets
            .get(op_value, trk_id_value)
            .ok_or(ReplyCode::SaltErr)?;

        let expected = sign_fields(i64::from(trk_id_value), atoi(data), date_value, token);
        if salt.len() != SALT_LEN || expected.as_bytes() != salt.as_bytes() {
            return Err(ReplyCode::SaltErr);
        }

        Ok(Verified {
            op: op_value,
            trk_id: trk_id_value,
            data,
            date,
        })
    }

    /// Verifies a request and builds its event in one step.
    pub fn authenticate(&self, query: &TrackQuery<'_>, now: i64) -> Result<Event, ReplyCode> {
        self.verify(query).map(|verified| verified.into_event(now))
    }
}
