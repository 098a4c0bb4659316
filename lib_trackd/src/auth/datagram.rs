use super::signature::{atoi, ReplyCode, TrackQuery, SALT_LEN};
use crate::configs::settings::OP_MAX;

/// # Datagram Fields
///
/// What survives the structural checks on a UDP payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramFields<'a> {
    /// Operation code.
    pub op: u8,
    /// Entity id.
    pub trk_id: u32,
    /// The full set of recognised pairs, for signature verification.
    pub query: TrackQuery<'a>,
}

/// # Parse Datagram
///
/// Splits an `&`-delimited `key=value` payload and applies the drop rules:
/// the salt must be 40 characters, `trk_id` must be all digits, `dtlen` must
/// equal the byte length of `data`, and `op` must be in `[0, 32)`. Datagrams
/// are fire-and-forget, so the returned code is only used for logging.
pub fn parse_datagram(text: &str) -> Result<DatagramFields<'_>, ReplyCode> {
    let pairs: Vec<(&str, &str)> = text
        .split('&')
        .filter(|piece| !piece.is_empty())
        .map(|piece| piece.split_once('=').unwrap_or((piece, "")))
        .collect();
    // structural checks read the same occurrence the signature is checked on
    let query = TrackQuery::from_pairs(pairs.iter().copied());
    let dtlen = pairs
        .iter()
        .find(|(key, _)| *key == "dtlen")
        .map_or(0, |(_, value)| atoi(value));

    if query.salt.map_or(0, str::len) != SALT_LEN {
        return Err(ReplyCode::SaltErr);
    }
    let trk_id = match query.trk_id {
        Some(id) if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) => id,
        _ => return Err(ReplyCode::TrkIdErr),
    };
    if usize::try_from(dtlen).ok() != Some(query.data.map_or(0, str::len)) {
        return Err(ReplyCode::DataLenErr);
    }
    let op = query.op.map_or(0, atoi);
    if op < 0 || op >= i64::from(OP_MAX) {
        return Err(ReplyCode::OpErr);
    }

    Ok(DatagramFields {
        op: op as u8,
        trk_id: u32::try_from(atoi(trk_id)).map_err(|_| ReplyCode::TrkIdErr)?,
        query,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &str = "d0ed0fba2ae965373e2b2f86f6fe2859d05d16ad";

    #[test]
    fn well_formed_datagram_passes() {
        let text = format!("op=1&trk_id=42&data=5&dtlen=1&date=20131203&salt={SALT}");
        let fields = parse_datagram(&text).unwrap();
        assert_eq!(fields.op, 1);
        assert_eq!(fields.trk_id, 42);
        assert_eq!(fields.query.date, Some("20131203"));
        assert_eq!(fields.query.salt, Some(SALT));
    }

    #[test]
    fn drop_rules() {
        let short_salt = "op=1&trk_id=42&data=5&dtlen=1&salt=abc";
        assert_eq!(parse_datagram(short_salt), Err(ReplyCode::SaltErr));

        let bad_id = format!("op=1&trk_id=4a&data=5&dtlen=1&salt={SALT}");
        assert_eq!(parse_datagram(&bad_id), Err(ReplyCode::TrkIdErr));

        let no_id = format!("op=1&data=5&dtlen=1&salt={SALT}");
        assert_eq!(parse_datagram(&no_id), Err(ReplyCode::TrkIdErr));

        let wrong_len = format!("op=1&trk_id=42&data=500&dtlen=1&salt={SALT}");
        assert_eq!(parse_datagram(&wrong_len), Err(ReplyCode::DataLenErr));

        let bad_op = format!("op=40&trk_id=42&data=5&dtlen=1&salt={SALT}");
        assert_eq!(parse_datagram(&bad_op), Err(ReplyCode::OpErr));
    }

    #[test]
    fn duplicate_keys_use_the_first_occurrence() {
        let text = format!("op=1&trk_id=42&data=5&data=500&dtlen=1&date=20131203&salt={SALT}");
        let fields = parse_datagram(&text).unwrap();
        assert_eq!(fields.query.data, Some("5"));

        let mismatched = format!("op=1&trk_id=42&data=5&data=500&dtlen=3&salt={SALT}");
        assert_eq!(parse_datagram(&mismatched), Err(ReplyCode::DataLenErr));

        let second_op = format!("op=1&op=40&trk_id=42&data=5&dtlen=1&salt={SALT}");
        assert_eq!(parse_datagram(&second_op).map(|f| f.op), Ok(1));
    }

    #[test]
    fn query_matches_the_transport_view() {
        let text = format!("op=1&trk_id=42&data=5&dtlen=1&date=20131203&salt={SALT}&x=y");
        let fields = parse_datagram(&text).unwrap();
        let expected = TrackQuery {
            op: Some("1"),
            date: Some("20131203"),
            data: Some("5"),
            trk_id: Some("42"),
            salt: Some(SALT),
        };
        assert_eq!(fields.query, expected);
    }
}
