//! Credential format, issuance and hashing

use lazy_static::lazy_static;
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::constants::{CREDENTIAL_CACHE_PREFIX, CREDENTIAL_PREFIX, CREDENTIAL_RANDOM_BYTES};
use crate::storage::CredentialMaterial;

lazy_static! {
    static ref CREDENTIAL_RE: Regex =
        Regex::new(r"^mh_[a-f0-9]{64}$").expect("valid credential regex");
}

/// Fresh credential: `mh_` followed by 64 lowercase hex characters
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; CREDENTIAL_RANDOM_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{CREDENTIAL_PREFIX}{}", hex::encode(bytes))
}

/// Whether `credential` has the shape of an issued credential.
/// Legacy credentials may not, so this is never used to reject requests.
pub fn is_well_formed(credential: &str) -> bool {
    CREDENTIAL_RE.is_match(credential)
}

/// Deterministic lowercase hex SHA-256, the indexed hash form
pub fn canonical_hash(credential: &str) -> String {
    hex::encode(Sha256::digest(credential.as_bytes()))
}

/// Salted bcrypt hashes (`$2a$`, `$2b$`, `$2y$`) can only be verified, not looked up
pub fn is_salted_hash(hash: &str) -> bool {
    hash.starts_with("$2")
}

/// Cache key for a presented credential
pub fn cache_key(credential: &str) -> String {
    cache_key_for_hash(&canonical_hash(credential))
}

pub fn cache_key_for_hash(canonical: &str) -> String {
    format!("{CREDENTIAL_CACHE_PREFIX}{canonical}")
}

/// Mint a credential and the material to persist for it
pub fn issue(version: u64, keep_plaintext: bool) -> (String, CredentialMaterial) {
    let credential = generate_api_key();
    let material = CredentialMaterial {
        plaintext: keep_plaintext.then(|| credential.clone()),
        hash: Some(canonical_hash(&credential)),
        version,
    };
    (credential, material)
}
