//! The cryptography collaborator (spec §6).
//!
//! The core only requires that `decrypt(encrypt(buf, key), key) == buf`
//! and that `hash` is collision-resistant; it does not mandate
//! primitives. [`DefaultCrypto`] is one conforming implementation.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::{ChaCha20, Key, Nonce};

/// Length in bytes of every digest this crate produces or consumes.
pub const HASH_LEN: usize = 32;

/// A fixed-size digest. Using an array rather than `Vec<u8>` makes a
/// hash-length mismatch within the crate a compile error.
pub type Digest = [u8; HASH_LEN];

/// The cryptography collaborator: hashing and a symmetric cipher,
/// keyed by material derived from the plaintext's own hash (spec §4.E
/// step 5).
pub trait Crypto: Send + Sync {
    fn hash(&self, bytes: &[u8]) -> Digest;

    /// Encrypt `buf` in place. `key_material` is `H₀`, the hash of the
    /// unpadded plaintext.
    fn encrypt(&self, buf: &mut [u8], key_material: &Digest);

    /// Inverse of [`Crypto::encrypt`] under the same `key_material`.
    fn decrypt(&self, buf: &mut [u8], key_material: &Digest);
}

/// `blake3` for hashing, `chacha20` for the in-place stream cipher.
/// Grounded on the wider example pool rather than the teacher crate,
/// which has no cryptographic primitives of its own (see DESIGN.md).
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCrypto;

impl DefaultCrypto {
    /// ChaCha20 needs a 256-bit key and a 96-bit nonce. We derive both
    /// deterministically from `key_material` via blake3's keyed-hash
    /// mode so encrypt/decrypt agree without shipping a nonce on the
    /// wire — the cipher is a pure, local transform of `H₀`.
    fn stream(&self, key_material: &Digest) -> ChaCha20 {
        let key = blake3::hash(key_material);
        let nonce_digest = blake3::keyed_hash(key.as_bytes(), b"blockcast-nonce");
        let key = Key::from_slice(key.as_bytes());
        let nonce = Nonce::from_slice(&nonce_digest.as_bytes()[..12]);
        ChaCha20::new(key, nonce)
    }
}

impl Crypto for DefaultCrypto {
    fn hash(&self, bytes: &[u8]) -> Digest {
        *blake3::hash(bytes).as_bytes()
    }

    fn encrypt(&self, buf: &mut [u8], key_material: &Digest) {
        self.stream(key_material).apply_keystream(buf);
    }

    fn decrypt(&self, buf: &mut [u8], key_material: &Digest) {
        // ChaCha20 is self-inverse: decrypting re-derives the same
        // keystream and XORs it back in.
        self.stream(key_material).apply_keystream(buf);
    }
}
