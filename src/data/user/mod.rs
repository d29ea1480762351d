use std::fmt;
use std::str::FromStr;

use base64::Engine;
use chrono::{DateTime, Utc};
use crypto::bcrypt::bcrypt;
use crypto::util::fixed_time_eq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod db;

use crate::data::RecordStatus;
use crate::role::Role;
use crate::util::base64_engine;

pub static USER_COLLECTION_NAME: &str = "users";

const SALT_LEN: usize = 16;
const HASH_LEN: usize = 24;
const HASH_SCHEME: &str = "bcrypt-sha256";

/// Salted bcrypt over a SHA-256 prehash of the password. Stored as
/// `bcrypt-sha256$<cost>$<salt>$<hash>`.
#[derive(Clone, Eq, PartialEq)]
pub struct PasswordHash {
    cost: u32,
    salt: [u8; SALT_LEN],
    hash: [u8; HASH_LEN],
}

impl PasswordHash {
    pub fn new(password: impl AsRef<str>, cost: u32) -> PasswordHash {
        let salt: [u8; SALT_LEN] = rand::random();
        PasswordHash {
            cost,
            salt,
            hash: Self::compute(cost, &salt, password.as_ref()),
        }
    }

    fn compute(cost: u32, salt: &[u8; SALT_LEN], password: &str) -> [u8; HASH_LEN] {
        let mut pw_hash = [0u8; HASH_LEN];

        let mut sha = Sha256::new();
        sha2::Digest::update(&mut sha, password.as_bytes());

        bcrypt(cost, salt, sha.finalize().as_slice(), &mut pw_hash);
        pw_hash
    }

    pub fn verify(&self, password: impl AsRef<str>) -> bool {
        let candidate = Self::compute(self.cost, &self.salt, password.as_ref());
        fixed_time_eq(&candidate, &self.hash)
    }
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PasswordHash(cost={})", self.cost)
    }
}

impl fmt::Display for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let engine = base64_engine();
        write!(
            f,
            "{}${}${}${}",
            HASH_SCHEME,
            self.cost,
            engine.encode(self.salt),
            engine.encode(self.hash)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadPasswordHash;

impl fmt::Display for BadPasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("malformed password hash")
    }
}

impl FromStr for PasswordHash {
    type Err = BadPasswordHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let engine = base64_engine();
        let mut parts = s.split('$');

        if parts.next() != Some(HASH_SCHEME) {
            return Err(BadPasswordHash);
        }
        let cost = parts
            .next()
            .and_then(|it| it.parse::<u32>().ok())
            .filter(|it| *it < 32)
            .ok_or(BadPasswordHash)?;
        let salt = parts
            .next()
            .and_then(|it| engine.decode(it).ok())
            .and_then(|it| <[u8; SALT_LEN]>::try_from(it).ok())
            .ok_or(BadPasswordHash)?;
        let hash = parts
            .next()
            .and_then(|it| engine.decode(it).ok())
            .and_then(|it| <[u8; HASH_LEN]>::try_from(it).ok())
            .ok_or(BadPasswordHash)?;

        if parts.next().is_some() {
            return Err(BadPasswordHash);
        }

        Ok(PasswordHash { cost, salt, hash })
    }
}

impl Serialize for PasswordHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PasswordHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub pw_hash: PasswordHash,
    pub role: Role,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: impl ToString, email: impl ToString, pw_hash: PasswordHash, role: Role) -> User {
        let id = Uuid::new_v4();
        tracing::info!("Creating a new user with UUID: {}", id);

        let now = Utc::now();
        User {
            id,
            name: name.to_string().trim().to_string(),
            email: crate::data::validation::normalize_email(&email.to_string()),
            pw_hash,
            role,
            status: RecordStatus::Active,
            phone: None,
            last_login: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }
}

/// User as served by the API; never includes the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub status: RecordStatus,
    pub phone: Option<String>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            status: user.status,
            phone: user.phone,
            last_login: user.last_login,
            created_at: user.created_at,
        }
    }
}

/// Minimal user reference embedded in populated views.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserSummary {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        UserSummary {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verifies_only_the_same_password() {
        let hash = PasswordHash::new("correct horse", 4);
        assert!(hash.verify("correct horse"));
        assert!(!hash.verify("correct horse "));
    }

    #[test]
    fn same_password_gets_different_salts() {
        let a = PasswordHash::new("same-password", 4);
        let b = PasswordHash::new("same-password", 4);
        assert_ne!(a, b);
    }

    #[test]
    fn password_hash_string_form_roundtrips() {
        let hash = PasswordHash::new("s3cret-pass", 4);
        let parsed: PasswordHash = hash.to_string().parse().unwrap();
        assert_eq!(parsed, hash);
        assert!(parsed.verify("s3cret-pass"));

        assert!("plain$4$x$y".parse::<PasswordHash>().is_err());
        assert!(format!("{}$extra", hash).parse::<PasswordHash>().is_err());
    }

    #[test]
    fn response_hides_password_hash() {
        let user = User::new("Ana", " Ana@School.org ", PasswordHash::new("pw-123456", 4), Role::Teacher);
        assert_eq!(user.email, "ana@school.org");

        let json = serde_json::to_value(UserResponse::from(user)).unwrap();
        assert!(json.get("pw_hash").is_none());
        assert_eq!(json["role"], "teacher");
    }
}
