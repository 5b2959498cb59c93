//! Email/password verification against the `users` collection.

use actix_web::web;
use chrono::Utc;

use crate::auth::Identity;
use crate::models::User;
use crate::repo::{DocumentStore, RepoError};

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("email and password are required")] MissingCredentials,
    #[error("no account for that email")] UnknownUser,
    #[error("account is deactivated")] Deactivated,
    #[error("password mismatch")] InvalidCredentials,
    #[error("password hashing failed: {0}")] Hashing(String),
    #[error(transparent)] Store(#[from] RepoError),
}

/// Hash a password for storage. Runs on the blocking pool.
pub async fn hash_password(plain: &str, cost: u32) -> Result<String, AuthError> {
    let plain = plain.to_string();
    web::block(move || bcrypt::hash(plain, cost))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

async fn password_matches(plain: &str, hash: &str) -> Result<bool, AuthError> {
    let (plain, hash) = (plain.to_string(), hash.to_string());
    web::block(move || bcrypt::verify(plain, &hash))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

/// Check a login attempt. On success the user's `last_login` is stamped and
/// a minimal identity (no hash) is returned.
pub async fn authorize(users: &dyn DocumentStore<User>, email: &str, password: &str) -> Result<Identity, AuthError> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || password.is_empty() {
        return Err(AuthError::MissingCredentials);
    }
    let mut user = match users.find_by_key(&email).await {
        Ok(u) => u,
        Err(RepoError::NotFound) => return Err(AuthError::UnknownUser),
        Err(e) => return Err(e.into()),
    };
    if !user.is_active {
        return Err(AuthError::Deactivated);
    }
    if !password_matches(password, &user.password_hash).await? {
        return Err(AuthError::InvalidCredentials);
    }
    let now = Utc::now();
    user.last_login = Some(now);
    user.updated_at = now;
    let user = users.replace(user).await?;
    Ok(Identity::from(&user))
}
