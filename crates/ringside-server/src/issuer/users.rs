//! User directory.
//!
//! The issuing service owns user accounts. Downstream services never see
//! this store; they only learn about users through session events and the
//! `users/me` endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::error::IssuerError;

/// A stored user account.
#[derive(Debug, Clone)]
pub struct User {
    pub id: u64,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
}

/// Registration input after validation and hashing.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password_hash: String,
}

/// Public view of a user, as returned by `POST /users` and `GET /users/me`.
#[derive(Debug, Clone, Serialize)]
pub struct UserRead {
    pub id: u64,
    pub email: String,
    pub username: String,
    pub is_active: bool,
    pub created_at: String,
}

impl TryFrom<&User> for UserRead {
    type Error = IssuerError;

    fn try_from(user: &User) -> Result<Self, Self::Error> {
        let created_at = user
            .created_at
            .format(&Rfc3339)
            .map_err(|e| IssuerError::internal(format!("timestamp formatting: {e}")))?;
        Ok(Self {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            is_active: user.is_active,
            created_at,
        })
    }
}

/// Storage for user accounts.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Creates a user. Email and username must both be unused.
    async fn create(&self, user: NewUser) -> Result<User, IssuerError>;

    /// Looks a user up by email or username.
    async fn find_by_login(&self, login: &str) -> Option<User>;

    /// Looks a user up by id.
    async fn get(&self, id: u64) -> Option<User>;
}

/// In-memory [`UserDirectory`].
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: DashMap<u64, User>,
    by_email: DashMap<String, u64>,
    by_username: DashMap<String, u64>,
    next_id: AtomicU64,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn create(&self, new: NewUser) -> Result<User, IssuerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let email_key = normalize_email(&new.email);

        // Reserve email, then username; release the email if the username is taken.
        match self.by_email.entry(email_key.clone()) {
            Entry::Occupied(_) => return Err(IssuerError::DuplicateEmail),
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        match self.by_username.entry(new.username.clone()) {
            Entry::Occupied(_) => {
                self.by_email.remove(&email_key);
                return Err(IssuerError::DuplicateUsername);
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let user = User {
            id,
            email: new.email,
            username: new.username,
            password_hash: new.password_hash,
            is_active: true,
            created_at: OffsetDateTime::now_utc(),
        };
        self.users.insert(id, user.clone());
        Ok(user)
    }

    async fn find_by_login(&self, login: &str) -> Option<User> {
        let id = self
            .by_email
            .get(&normalize_email(login))
            .map(|id| *id)
            .or_else(|| self.by_username.get(login).map(|id| *id))?;
        self.get(id).await
    }

    async fn get(&self, id: u64) -> Option<User> {
        self.users.get(&id).map(|u| u.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str, username: &str) -> NewUser {
        NewUser {
            email: email.into(),
            username: username.into(),
            password_hash: "$argon2id$stub".into(),
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let dir = InMemoryUserDirectory::new();
        let user = dir.create(new_user("A@x.com", "alice")).await.unwrap();

        assert_eq!(user.id, 1);
        assert_eq!(dir.find_by_login("a@x.com").await.unwrap().id, 1);
        assert_eq!(dir.find_by_login("alice").await.unwrap().id, 1);
        assert!(dir.find_by_login("bob").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicates_rejected() {
        let dir = InMemoryUserDirectory::new();
        dir.create(new_user("a@x.com", "alice")).await.unwrap();

        assert!(matches!(
            dir.create(new_user("a@x.com", "other")).await,
            Err(IssuerError::DuplicateEmail)
        ));
        assert!(matches!(
            dir.create(new_user("b@x.com", "alice")).await,
            Err(IssuerError::DuplicateUsername)
        ));
        // The failed username attempt released its email reservation.
        assert!(dir.create(new_user("b@x.com", "bob")).await.is_ok());
        assert_eq!(dir.len(), 2);
    }

    #[tokio::test]
    async fn test_user_read_shape() {
        let dir = InMemoryUserDirectory::new();
        let user = dir.create(new_user("a@x.com", "alice")).await.unwrap();
        let json = serde_json::to_value(UserRead::try_from(&user).unwrap()).unwrap();

        assert_eq!(json["id"], 1);
        assert_eq!(json["email"], "a@x.com");
        assert_eq!(json["is_active"], true);
        assert!(json.get("password_hash").is_none());
        assert!(json["created_at"].as_str().unwrap().contains('T'));
    }
}
