//! PKCE (RFC 7636) code verifier and challenge generation

use crate::error::PkceError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

/// Shortest verifier RFC 7636 allows
pub const MIN_VERIFIER_LEN: usize = 43;

/// Longest verifier RFC 7636 allows
pub const MAX_VERIFIER_LEN: usize = 128;

/// Verifier length used by [`Pkce::generate`]
pub const DEFAULT_VERIFIER_LEN: usize = 86;

/// Only challenge method this client emits
pub const CHALLENGE_METHOD: &str = "S256";

const UNRESERVED: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Verifier/challenge pair for one flow
pub struct Pkce {
    verifier: SecretString,
    challenge: String,
}

impl Pkce {
    /// Generate a pair with the default verifier length
    pub fn generate() -> Result<Self, PkceError> {
        Self::generate_with_len(DEFAULT_VERIFIER_LEN)
    }

    /// Generate a pair with a verifier of `len` characters
    pub fn generate_with_len(len: usize) -> Result<Self, PkceError> {
        if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&len) {
            return Err(PkceError::InvalidLength(len));
        }

        let verifier = random_unreserved(len)?;
        let challenge = challenge_for(&verifier);

        Ok(Self {
            verifier: SecretString::from(verifier),
            challenge,
        })
    }

    /// Rebuild a pair from a previously generated verifier
    pub fn from_verifier(verifier: &str) -> Result<Self, PkceError> {
        if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&verifier.len()) {
            return Err(PkceError::InvalidLength(verifier.len()));
        }
        Ok(Self {
            verifier: SecretString::from(verifier.to_string()),
            challenge: challenge_for(verifier),
        })
    }

    /// The code verifier (secret until token exchange)
    pub fn verifier(&self) -> &SecretString {
        &self.verifier
    }

    /// The S256 code challenge
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// Challenge method, always `S256`
    pub fn method(&self) -> &'static str {
        CHALLENGE_METHOD
    }

    /// Split into verifier and challenge
    pub fn into_parts(self) -> (SecretString, String) {
        (self.verifier, self.challenge)
    }
}

impl std::fmt::Debug for Pkce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkce")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .field("method", &CHALLENGE_METHOD)
            .finish()
    }
}

/// Recompute the S256 challenge of `verifier` and compare
pub fn verify(verifier: &str, challenge: &str) -> bool {
    let len_ok = (MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&verifier.len());
    let chars_ok = verifier.bytes().all(|b| UNRESERVED.contains(&b));
    len_ok && chars_ok && challenge_for(verifier) == challenge
}

/// Verify using a secret verifier
pub fn verify_secret(verifier: &SecretString, challenge: &str) -> bool {
    verify(verifier.expose_secret(), challenge)
}

fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

fn random_unreserved(len: usize) -> Result<String, PkceError> {
    // Largest multiple of the alphabet size that fits in a byte; rejecting
    // bytes above it keeps the distribution uniform.
    let limit = (256 / UNRESERVED.len() * UNRESERVED.len()) as u8;
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 64];

    while out.len() < len {
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| PkceError::RandomSource(e.to_string()))?;

        for b in buf.iter().copied().filter(|b| *b < limit) {
            out.push(UNRESERVED[b as usize % UNRESERVED.len()] as char);
            if out.len() == len {
                break;
            }
        }
    }

    Ok(out)
}
