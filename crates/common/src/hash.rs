//! Deterministic identifier renaming.
//!
//! Every rename in an obfuscated build is `hash_with(key, name)` where `key`
//! is the action ID of the package that *defines* the name, optionally
//! prefixed by the user seed. Two independently compiled packages that agree
//! on a dependency's action ID therefore agree on every rename inside it.

use blake3::Hasher;

/// Characters legal in a Go identifier, used to project digest bytes onto
/// names. 63 entries; the slight modulo bias is irrelevant here.
const NAME_CHARSET: &[u8] = b"0123456789_abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Minimum emitted name length, so hashed names cannot collide with short
/// reserved identifiers or shadow single-letter locals.
const MIN_HASH_LEN: usize = 9;

fn starts_upper(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_uppercase())
}

/// Hashes `name` under `key` into a valid Go identifier.
///
/// The first byte is `Z` for exported names and `z` for unexported ones, so
/// renamed identifiers keep their Go visibility. The remaining bytes come
/// from a BLAKE3 XOF over `key ++ name`, mapped onto [`NAME_CHARSET`].
///
/// # Examples
/// ```
/// # use common::hash::hash_with;
/// let a = hash_with(b"action-id", "Shared");
/// let b = hash_with(b"action-id", "Shared");
/// assert_eq!(a, b);
/// assert!(a.starts_with('Z'));
/// assert!(hash_with(b"action-id", "secret").starts_with('z'));
/// ```
pub fn hash_with(key: &[u8], name: &str) -> String {
    hash_with_len(key, name, MIN_HASH_LEN)
}

/// Like [`hash_with`], but emits exactly `len` bytes.
///
/// Used when rewriting names inside compiled object archives, where the
/// replacement must occupy the same byte span as the original so that
/// member offsets stay valid.
pub fn hash_with_len(key: &[u8], name: &str, len: usize) -> String {
    let len = len.max(2);
    let mut hasher = Hasher::new();
    hasher.update(key);
    hasher.update(name.as_bytes());
    let mut reader = hasher.finalize_xof();
    let mut raw = vec![0u8; len - 1];
    reader.fill(&mut raw);

    let mut out = String::with_capacity(len);
    out.push(if starts_upper(name) { 'Z' } else { 'z' });
    for b in raw {
        out.push(NAME_CHARSET[b as usize % NAME_CHARSET.len()] as char);
    }
    out
}

/// Builds the renaming key for one package: the global seed (possibly empty)
/// followed by that package's action ID.
pub fn rename_key(seed: &[u8], action_id: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(seed.len() + action_id.len());
    key.extend_from_slice(seed);
    key.extend_from_slice(action_id);
    key
}

/// Derives the seed for the pseudo-random stream controlling declaration
/// shuffling and literal keys: the first eight bytes of the key material,
/// big-endian, zero-padded.
pub fn rng_seed(key: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    for (i, b) in key.iter().take(8).enumerate() {
        buf[i] = *b;
    }
    u64::from_be_bytes(buf)
}
