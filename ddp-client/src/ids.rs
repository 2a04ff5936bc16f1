//! DDP request-id generation.
//!
//! Request ids are opaque case-mixed alphanumeric strings, unique for the
//! lifetime of a connection. Not cryptographically significant.

use rand::Rng;

// Meteor's id alphabet: unambiguous alphanumerics (no 0/1/I/O/l).
const ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTWXYZabcdefghijkmnopqrstuvwxyz";

const ID_LEN: usize = 17;

/// Generate a fresh request id.
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    let mut buf = String::with_capacity(ID_LEN);
    for _ in 0..ID_LEN {
        let idx = rng.gen_range(0..ALPHABET.len());
        buf.push(ALPHABET[idx] as char);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn id_shape() {
        let id = generate();
        assert_eq!(id.len(), ID_LEN);
        assert!(id.bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn ids_are_distinct() {
        let ids: HashSet<String> = (0..1000).map(|_| generate()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
