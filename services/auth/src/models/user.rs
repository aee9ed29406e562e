//! User model and related functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::RoleName;
use crate::validation::{normalize_phone, validate_email, validate_phone};

/// Numeric user identifier shared with the other platform services
pub type UserId = i64;

/// Prefix used to render an external (Mini-App) identity as an identifier
///
/// `:` can appear in neither a valid email nor a phone number, so the stored
/// form of the three kinds never overlaps.
const EXTERNAL_PREFIX: &str = "max:";

/// The single canonical identifier of an account
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Identifier {
    /// Normalized phone number, e.g. `+79991234567`
    Phone(String),
    /// Lower-cased email address
    Email(String),
    /// Account provisioned by the messaging Mini-App, keyed by its external id
    External(i64),
}

impl Identifier {
    /// Parse a login identifier supplied by a user (phone or email)
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("Identifier is required".to_string());
        }

        if raw.contains('@') {
            Self::email(raw)
        } else {
            Self::phone(raw)
        }
    }

    /// Build a phone identifier, normalizing the number first
    pub fn phone(raw: &str) -> Result<Self, String> {
        let phone = normalize_phone(raw);
        validate_phone(&phone)?;
        Ok(Identifier::Phone(phone))
    }

    /// Build an email identifier
    pub fn email(raw: &str) -> Result<Self, String> {
        let email = raw.trim().to_lowercase();
        validate_email(&email)?;
        Ok(Identifier::Email(email))
    }

    /// Decode the stored column representation produced by `Display`
    pub fn from_stored(value: &str) -> Option<Self> {
        if value.contains('@') {
            Some(Identifier::Email(value.to_string()))
        } else if let Some(id) = value.strip_prefix(EXTERNAL_PREFIX) {
            id.parse().ok().map(Identifier::External)
        } else if value.starts_with('+') {
            Some(Identifier::Phone(value.to_string()))
        } else {
            None
        }
    }

    /// Whether notifications can be delivered to this identifier
    pub fn is_reachable(&self) -> bool {
        !matches!(self, Identifier::External(_))
    }

    /// Log-safe rendering: phone numbers keep their last four digits only
    pub fn masked(&self) -> String {
        match self {
            Identifier::Phone(phone) => mask_tail(phone),
            Identifier::Email(email) => match email.split_once('@') {
                Some((_, domain)) => format!("***@{}", domain),
                None => "***".to_string(),
            },
            Identifier::External(id) => format!("{}{}", EXTERNAL_PREFIX, id),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Phone(phone) => f.write_str(phone),
            Identifier::Email(email) => f.write_str(email),
            Identifier::External(id) => write!(f, "{}{}", EXTERNAL_PREFIX, id),
        }
    }
}

/// Mask everything but the last four characters
pub fn mask_tail(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

/// User entity
#[derive(Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub identifier: Identifier,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub role: Option<RoleName>,
    pub external_id: Option<i64>,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("identifier", &self.identifier.masked())
            .field("role", &self.role)
            .field("external_id", &self.external_id)
            .finish_non_exhaustive()
    }
}

/// New user creation payload
#[derive(Clone)]
pub struct NewUser {
    pub identifier: Identifier,
    pub password_hash: Option<String>,
    pub role: Option<RoleName>,
    pub external_id: Option<i64>,
    pub username: Option<String>,
    pub display_name: Option<String>,
}

impl NewUser {
    /// A password account with a phone or email identifier
    pub fn with_password(identifier: Identifier, password_hash: String, role: Option<RoleName>) -> Self {
        Self {
            identifier,
            password_hash: Some(password_hash),
            role,
            external_id: None,
            username: None,
            display_name: None,
        }
    }
}

/// Profile fields refreshed on every Mini-App sighting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalAccount {
    pub external_id: i64,
    pub username: String,
    pub display_name: String,
}

/// Read-only projection returned to callers; never carries the hash
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserView {
    pub id: UserId,
    pub identifier: String,
    pub role: Option<RoleName>,
    pub external_id: Option<i64>,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            identifier: user.identifier.to_string(),
            role: user.role,
            external_id: user.external_id,
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            created_at: user.created_at,
        }
    }
}
