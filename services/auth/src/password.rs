//! Password hashing and generation

use argon2::PasswordHasher as _;
use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordVerifier, Version, password_hash::SaltString,
};
use rand::rngs::OsRng;
use rand::{Rng, seq::SliceRandom};
use thiserror::Error;

use crate::validation::MIN_PASSWORD_LENGTH;

#[derive(Debug, Error)]
#[error("Failed to hash password: {0}")]
pub struct HashError(String);

/// One-way password hashing
///
/// Implementations must embed salt and cost parameters in the encoded hash so
/// that `verify` keeps working after the configured costs change.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, plaintext: &str) -> Result<String, HashError>;

    /// Returns false for a wrong password and for a malformed hash alike
    fn verify(&self, plaintext: &str, hash: &str) -> bool;
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HasherConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl HasherConfig {
    /// # Environment Variables
    /// - `HASH_MEMORY_KIB`: memory cost (default: 19456)
    /// - `HASH_ITERATIONS`: time cost (default: 2)
    /// - `HASH_PARALLELISM`: lanes (default: 1)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read = |name: &str, default: u32| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };

        Self {
            memory_kib: read("HASH_MEMORY_KIB", defaults.memory_kib),
            iterations: read("HASH_ITERATIONS", defaults.iterations),
            parallelism: read("HASH_PARALLELISM", defaults.parallelism),
        }
    }
}

/// Argon2id hasher producing PHC strings
#[derive(Clone)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl Argon2Hasher {
    pub fn new(config: &HasherConfig) -> Result<Self, HashError> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| HashError(format!("invalid argon2 parameters: {}", e)))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| HashError(e.to_string()))
    }

    fn verify(&self, plaintext: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .argon2
                .verify_password(plaintext.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijkmnpqrstuvwxyz";
const DIGITS: &[u8] = b"23456789";
const SPECIAL: &[u8] = b"!@#$%^&*-_=+?";

/// Generate a random password that satisfies the default policy
///
/// Look-alike characters (`I`, `l`, `O`, `0`, `1`) are left out since these
/// passwords are read off a phone screen.
pub fn generate_password(length: usize) -> String {
    let length = length.max(MIN_PASSWORD_LENGTH);
    let mut rng = OsRng;

    let mut chars: Vec<u8> = [UPPER, LOWER, DIGITS, SPECIAL]
        .iter()
        .map(|set| set[rng.gen_range(0..set.len())])
        .collect();

    let all: Vec<u8> = [UPPER, LOWER, DIGITS, SPECIAL].concat();
    while chars.len() < length {
        chars.push(all[rng.gen_range(0..all.len())]);
    }

    chars.shuffle(&mut rng);
    chars.into_iter().map(char::from).collect()
}
