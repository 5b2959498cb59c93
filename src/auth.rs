use actix_web::{dev::Payload, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};

use crate::error::ApiError;
use crate::models::User;

/// Cookie carrying the session token for page routes.
pub const SESSION_COOKIE: &str = "gridshare_session";

const DEFAULT_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub iat: usize,
    pub exp: usize,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Minimal identity handed out after login; never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl From<&User> for Identity {
    fn from(u: &User) -> Self {
        Self { id: u.id.to_string(), name: u.name.clone(), email: u.email.clone(), role: u.role }
    }
}

impl From<&Claims> for Identity {
    fn from(c: &Claims) -> Self {
        Self { id: c.sub.clone(), name: c.name.clone(), email: c.email.clone(), role: c.role }
    }
}

fn secret() -> Result<String, jsonwebtoken::errors::Error> {
    env::var("JWT_SECRET").map_err(|_| ErrorKind::InvalidKeyFormat.into())
}

fn ttl() -> chrono::Duration {
    let hours = env::var("SESSION_TTL_HOURS")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|h| *h > 0)
        .unwrap_or(DEFAULT_TTL_HOURS);
    chrono::Duration::hours(hours)
}

/// Validate a session token and return its claims. Expired tokens fail.
pub fn verify_token(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let secret = secret()?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Issue a signed session token carrying the identity and its role.
pub fn create_jwt(identity: &Identity) -> Result<String, jsonwebtoken::errors::Error> {
    let secret = secret()?;
    let now = chrono::Utc::now();
    let claims = Claims {
        sub: identity.id.clone(),
        name: identity.name.clone(),
        email: identity.email.clone(),
        role: identity.role,
        iat: now.timestamp() as usize,
        exp: (now + ttl()).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Raw session token from `Authorization: Bearer` or, failing that, the
/// session cookie.
pub fn session_token(req: &HttpRequest) -> Option<String> {
    if let Ok(bearer) = BearerAuth::extract(req).into_inner() {
        return Some(bearer.token().to_string());
    }
    req.cookie(SESSION_COOKIE).map(|c| c.value().to_string())
}

/// Extractor yielding validated `Claims`.
pub struct Auth(pub Claims);

impl Auth {
    pub fn is_admin(&self) -> bool {
        self.0.is_admin()
    }
}

impl FromRequest for Auth {
    type Error = ApiError;
    type Future = Ready<Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, _pl: &mut Payload) -> Self::Future {
        let Some(token) = session_token(req) else {
            return ready(Err(ApiError::Unauthorized("Authorization required")));
        };
        match verify_token(&token) {
            Ok(claims) => ready(Ok(Auth(claims))),
            Err(_) => ready(Err(ApiError::Unauthorized("Invalid or expired session"))),
        }
    }
}

/// Helper macro for role-guarding handlers.
#[macro_export]
macro_rules! require_role {
    ($auth:expr, $role:pat) => {
        if !matches!($auth.0.role, $role) {
            return Err($crate::error::ApiError::Forbidden("Insufficient role").into());
        }
    };
}
