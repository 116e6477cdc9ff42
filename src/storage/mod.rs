//! Storage topology module
//!
//! Simulated DHT members and the consistent-hashing ring that routes keys to
//! them.

pub mod node;
pub mod ring;

pub use node::{ChordId, Node, NodeState, SentBytes, SentCategory};
pub use ring::Ring;

/// Parse a ring key given either as a decimal integer or as a hexadecimal
/// string. Hex keys wider than 64 bits keep their most significant digits so
/// ring order is preserved.
pub fn parse_chord_id(s: &str) -> Option<ChordId> {
    if let Ok(id) = s.parse::<ChordId>() {
        return Some(id);
    }
    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let digits = &hex[..hex.len().min(16)];
    ChordId::from_str_radix(digits, 16).ok()
}
