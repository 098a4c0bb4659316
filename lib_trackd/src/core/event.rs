//! # Tracking Event
//!
//! The unit of work that travels from a transport, through a worker pool, to
//! the sinks. An event is moved into a pool slot, popped exactly once by its
//! worker and dropped after the sinks have seen it.

/// Largest payload kept, in bytes: an Ethernet MTU minus IP and UDP headers.
pub const MAX_PAYLOAD_LEN: usize = 1472;

/// # Event
///
/// One authenticated tracking record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    op: u8,
    trk_id: u32,
    payload: String,
}

impl Event {
    /// Creates an event, cutting the payload at [`MAX_PAYLOAD_LEN`] bytes
    /// (on a character boundary).
    pub fn new(op: u8, trk_id: u32, mut payload: String) -> Self {
        if payload.len() > MAX_PAYLOAD_LEN {
            let mut cut = MAX_PAYLOAD_LEN;
            while !payload.is_char_boundary(cut) {
                cut -= 1;
            }
            payload.truncate(cut);
        }
        Self { op, trk_id, payload }
    }

    /// Operation code, in `[0, 32)`.
    pub fn op(&self) -> u8 {
        self.op
    }

    /// Tracked entity id.
    pub fn trk_id(&self) -> u32 {
        self.trk_id
    }

    /// `key=value&...` payload.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Returns the first value stored under `key` in the payload.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.payload.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key).then_some(v)
        })
    }
}
