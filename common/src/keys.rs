//! Canonical key encoding shared by the gateway, the storage ledgers and off-chain clients.
//!
//! Every component that derives a fragment key, a sequence key or a fragment id must go
//! through this module so the encodings stay bit-identical across the system.
//!
//! # Formats
//!
//! ```text
//! frag_key     = session_id ␟ path ␟ index(20 digits)
//! seq_key      = seq(20 digits)
//! fragment_id  = hex(sha256("FDSC_FRAG_ID:" session_id ":" path ":" index))
//! upload_token = hex(sha256("upload_token:" session_id))
//! token_hash   = hex(sha256(upload_token))
//! ```
//!
//! `␟` is the ASCII unit separator (0x1F). Legal field values never contain control
//! characters, so the separator can never be confused with field content.

use sha2::{Digest, Sha256};

/// Separator placed between the fields of a fragment key.
pub const KEY_SEPARATOR: char = '\u{1f}';

/// Width of the zero-padded decimal used for indices and sequence numbers.
/// `u64::MAX` has 20 digits, so every value sorts lexicographically by number.
pub const NUMERIC_KEY_WIDTH: usize = 20;

const FRAGMENT_ID_DOMAIN: &str = "FDSC_FRAG_ID:";
const UPLOAD_TOKEN_DOMAIN: &str = "upload_token:";

/// Encode the `(session, path, index)` triple identifying one fragment.
pub fn frag_key(session_id: &str, path: &str, index: u64) -> String {
    format!(
        "{session_id}{KEY_SEPARATOR}{path}{KEY_SEPARATOR}{index:0width$}",
        width = NUMERIC_KEY_WIDTH
    )
}

/// Split a fragment key back into `(session_id, path, index)`.
///
/// Returns `None` for anything `frag_key` could not have produced.
pub fn parse_frag_key(key: &str) -> Option<(&str, &str, u64)> {
    let mut parts = key.split(KEY_SEPARATOR);
    let session_id = parts.next()?;
    let path = parts.next()?;
    let index = parts.next()?;
    if parts.next().is_some() || index.len() != NUMERIC_KEY_WIDTH {
        return None;
    }
    let index = index.parse().ok()?;
    Some((session_id, path, index))
}

/// Session id embedded in a fragment key.
pub fn session_id_from_frag_key(key: &str) -> Option<&str> {
    parse_frag_key(key).map(|(session_id, _, _)| session_id)
}

/// Encode a packet sequence number.
pub fn seq_key(seq: u64) -> String {
    format!("{seq:0width$}", width = NUMERIC_KEY_WIDTH)
}

/// Content key under which a storage ledger files a fragment.
///
/// Independent of `frag_key` so that any party can derive it from the raw fields.
pub fn fragment_id(session_id: &str, path: &str, index: u64) -> String {
    let preimage = format!("{FRAGMENT_ID_DOMAIN}{session_id}:{path}:{index}");
    hex::encode(Sha256::digest(preimage.as_bytes()))
}

/// Deterministic upload token handed to the session owner once at creation.
pub fn upload_token(session_id: &str) -> String {
    let preimage = format!("{UPLOAD_TOKEN_DOMAIN}{session_id}");
    hex::encode(Sha256::digest(preimage.as_bytes()))
}

/// Hash of an upload token; the only form in which a token is ever persisted.
pub fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Whether `value` may appear as a field of an encoded key.
pub fn is_legal_key_field(value: &str) -> bool {
    !value.is_empty() && !value.chars().any(char::is_control)
}
