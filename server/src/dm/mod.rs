//! Direct-message channels between two users.

pub mod messages;

use crate::session::Identity;

/// Deterministic DM channel id: both normalized names, sorted, joined by `:`.
///
/// Either participant computes the same id regardless of who initiates.
pub fn channel_id(a: &Identity, b: &Identity) -> String {
    let (x, y) = if a.key() <= b.key() {
        (a.key(), b.key())
    } else {
        (b.key(), a.key())
    };
    format!("{x}:{y}")
}
