//! Verification of MAX Mini-App init-data
//!
//! The Mini-App client proves the user's messenger identity with a set of
//! URL-encoded parameters signed by the bot. The signature is
//! `hex(HMAC-SHA256(SHA256(bot_token), check_string))` where the check string
//! is every `key=value` pair except `hash`, sorted and joined by newlines.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::models::ExternalAccount;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InitDataError {
    #[error("Bot secret is not configured")]
    MissingSecret,

    #[error("Init data has no hash")]
    MissingHash,

    #[error("Init data hash verification failed")]
    HashVerificationFailed,

    #[error("Init data is missing required field {0}")]
    MissingRequiredField(&'static str),
}

impl InitDataError {
    pub fn kind(&self) -> &'static str {
        match self {
            InitDataError::MissingSecret => "missing_secret",
            InitDataError::MissingHash => "missing_hash",
            InitDataError::HashVerificationFailed => "hash_verification_failed",
            InitDataError::MissingRequiredField(_) => "missing_required_field",
        }
    }
}

/// Profile asserted by a verified init-data payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalProfile {
    pub external_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
}

impl ExternalProfile {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn to_account(&self) -> ExternalAccount {
        ExternalAccount {
            external_id: self.external_id,
            username: self.username.clone(),
            display_name: self.display_name(),
        }
    }
}

/// `user` parameter of the newer Mini-App format
#[derive(Deserialize)]
struct InitDataUser {
    id: Option<i64>,
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

/// Decoded parameters; the first occurrence of a repeated key wins
fn parse_params(init_data: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for (key, value) in url::form_urlencoded::parse(init_data.as_bytes()) {
        params
            .entry(key.into_owned())
            .or_insert_with(|| value.into_owned());
    }
    params
}

/// Sorted `key=value` lines of every parameter except `hash`
pub fn data_check_string<'a>(params: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut pairs: Vec<String> = params
        .into_iter()
        .filter(|(key, _)| *key != "hash")
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();
    pairs.sort();
    pairs.join("\n")
}

/// Lowercase hex signature of a check string
pub fn sign(check_string: &str, bot_secret: &str) -> String {
    let key = Sha256::digest(bot_secret.as_bytes());
    let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC can take key of any size");
    mac.update(check_string.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies init-data signatures and extracts the user profile
#[derive(Debug, Clone, Copy, Default)]
pub struct InitDataValidator;

impl InitDataValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(
        &self,
        init_data: &str,
        bot_secret: &str,
    ) -> Result<ExternalProfile, InitDataError> {
        if bot_secret.is_empty() {
            return Err(InitDataError::MissingSecret);
        }

        let params = parse_params(init_data);
        let supplied = params.get("hash").ok_or(InitDataError::MissingHash)?;

        let check_string =
            data_check_string(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let expected = sign(&check_string, bot_secret);

        if !bool::from(expected.as_bytes().ct_eq(supplied.as_bytes())) {
            return Err(InitDataError::HashVerificationFailed);
        }

        match params.get("user") {
            Some(user) => profile_from_json(user),
            None => profile_from_params(&params),
        }
    }
}

fn profile_from_params(params: &BTreeMap<String, String>) -> Result<ExternalProfile, InitDataError> {
    let external_id = params
        .get("max_id")
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or(InitDataError::MissingRequiredField("max_id"))?;
    let first_name = params
        .get("first_name")
        .cloned()
        .ok_or(InitDataError::MissingRequiredField("first_name"))?;

    Ok(ExternalProfile {
        external_id,
        first_name,
        last_name: params.get("last_name").cloned().unwrap_or_default(),
        username: params.get("username").cloned().unwrap_or_default(),
    })
}

fn profile_from_json(user: &str) -> Result<ExternalProfile, InitDataError> {
    let user: InitDataUser =
        serde_json::from_str(user).map_err(|_| InitDataError::MissingRequiredField("user"))?;

    Ok(ExternalProfile {
        external_id: user.id.ok_or(InitDataError::MissingRequiredField("id"))?,
        first_name: user
            .first_name
            .ok_or(InitDataError::MissingRequiredField("first_name"))?,
        last_name: user.last_name.unwrap_or_default(),
        username: user.username.unwrap_or_default(),
    })
}
