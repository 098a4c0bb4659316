use std::collections::HashMap;
use std::fmt;

/// # Secret Table
///
/// Maps `(op, trk_id)` to the token a sender signs with. Built once while the
/// configuration is validated and never mutated afterwards.
#[derive(Default, Clone)]
pub struct SecretTable {
    tokens: HashMap<(u8, u32), String>,
}

impl SecretTable {
    /// Registers a token. A later insert for the same key replaces the earlier one.
    pub fn insert(&mut self, op: u8, trk_id: u32, token: String) {
        self.tokens.insert((op, trk_id), token);
    }

    /// Looks up the token for an entity under an opcode.
    pub fn get(&self, op: u8, trk_id: u32) -> Option<&str> {
        self.tokens.get(&(op, trk_id)).map(String::as_str)
    }

    /// Number of registered tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no token is registered at all.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

// Tokens are secrets; only the count is printed.
impl fmt::Debug for SecretTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretTable")
            .field("tokens", &self.tokens.len())
            .finish()
    }
}
