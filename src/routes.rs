use std::sync::Arc;
use actix_web::cookie::{Cookie, SameSite};
use actix_web::error::JsonPayloadError;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::auth::{create_jwt, Auth, Identity, Role, SESSION_COOKIE};
use crate::credentials;
use crate::error::ApiError;
use crate::models::*;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::Repo;
use crate::resource::{self, Editable, Resource};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(path_config())
        .service(
            web::scope("/api")
                .configure(editable::<BlogPost>("/blog"))
                .configure(editable::<Sheet>("/sheets"))
                .configure(editable::<ContactMessage>("/contact"))
                .service(
                    web::resource("/newsletter")
                        .route(web::get().to(resource::list::<NewsletterSubscription>))
                        .route(web::post().to(resource::create::<NewsletterSubscription>)),
                )
                .service(
                    web::resource("/newsletter/{id}")
                        .route(web::get().to(resource::get::<NewsletterSubscription>))
                        .route(web::delete().to(resource::delete::<NewsletterSubscription>)),
                )
                .service(
                    web::resource("/newsletter-subscription")
                        .route(web::post().to(resource::create::<NewsletterSubscription>)),
                )
                .service(web::resource("/auth/login").route(web::post().to(login)))
                .service(web::resource("/auth/logout").route(web::post().to(logout)))
                .service(web::resource("/auth/me").route(web::get().to(auth_me)))
                .service(web::resource("/auth/refresh").route(web::post().to(refresh_token))),
        )
        .service(
            web::scope("/admin")
                .service(web::resource("/login").route(web::get().to(admin_login_page)))
                .service(web::resource("/dashboard").route(web::get().to(admin_dashboard))),
        );
}

/// Collection routes plus `{id}` routes for a resource with updates.
fn editable<R: Editable>(base: &'static str) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.service(
            web::resource(base)
                .route(web::get().to(resource::list::<R>))
                .route(web::post().to(resource::create::<R>)),
        )
        .service(
            web::resource(format!("{base}/{{id}}"))
                .route(web::get().to(resource::get::<R>))
                .route(web::put().to(resource::update::<R>))
                .route(web::delete().to(resource::delete::<R>)),
        );
    }
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let msg = match &err {
            JsonPayloadError::ContentType => "Content type must be application/json".to_string(),
            JsonPayloadError::Deserialize(e) => format!("Invalid request body: {e}"),
            _ => "Malformed request body".to_string(),
        };
        ApiError::BadRequest(msg).into()
    })
}

fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(|_err, _req| ApiError::NotFound("Resource not found".into()).into())
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub rate_limiter: Option<RateLimiterFacade>,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        Self { repo, rate_limiter: None }
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiterFacade) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }
}

// ---------------- session endpoints -------------------------------

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, token)
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .finish()
}

fn sign(identity: &Identity) -> Result<String, ApiError> {
    create_jwt(identity).map_err(|e| {
        log::error!("token signing failed: {e}");
        ApiError::Upstream
    })
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

pub async fn login(req: HttpRequest, data: web::Data<AppState>, payload: web::Json<LoginRequest>) -> Result<HttpResponse, ApiError> {
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_login(&rl.client_key(&req)) {
            return Err(ApiError::TooManyRequests);
        }
    }
    let identity = credentials::authorize(data.repo.users(), &payload.email, &payload.password).await?;
    let token = sign(&identity)?;
    log::info!("login ok for user {}", identity.id);
    Ok(HttpResponse::Ok()
        .cookie(session_cookie(token.clone()))
        .json(json!({ "token": token, "user": identity })))
}

pub async fn logout() -> HttpResponse {
    let mut cookie = Cookie::build(SESSION_COOKIE, "").path("/").finish();
    cookie.make_removal();
    HttpResponse::Ok().cookie(cookie).json(json!({ "message": "Logged out" }))
}

pub async fn auth_me(auth: Auth) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(Identity::from(&auth.0)))
}

/// Reissue a token for the same identity with a fresh expiry.
pub async fn refresh_token(auth: Auth) -> Result<HttpResponse, ApiError> {
    let token = sign(&Identity::from(&auth.0))?;
    Ok(HttpResponse::Ok()
        .cookie(session_cookie(token.clone()))
        .json(json!({ "token": token })))
}

// ---------------- admin pages -------------------------------------

pub async fn admin_login_page() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "login": "/api/auth/login",
        "method": "POST",
        "fields": ["email", "password"],
    }))
}

pub async fn admin_dashboard(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    crate::require_role!(auth, Role::Admin);
    let repo = data.repo.as_ref();
    Ok(HttpResponse::Ok().json(json!({
        "user": Identity::from(&auth.0),
        "counts": {
            "posts": BlogPost::collection(repo).count().await?,
            "sheets": Sheet::collection(repo).count().await?,
            "contacts": ContactMessage::collection(repo).count().await?,
            "subscriptions": NewsletterSubscription::collection(repo).count().await?,
            "users": repo.users().count().await?,
        }
    })))
}
