//! One generic set of CRUD handlers shared by every collection.
//!
//! A [`Resource`] names its collection, who may read and create it and how a
//! request body becomes a stored document. [`Editable`] resources also accept
//! partial updates. Update and delete always require an admin session,
//! independent of the admin page gate.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::auth::{Auth, Claims};
use crate::error::ApiError;
use crate::models::*;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::{Document, DocumentStore, Repo, RepoError};
use crate::routes::AppState;
use crate::validation::{self, ContactSubmission, FieldErrors, SubscriptionRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Admin,
}

pub trait Resource: Document {
    /// Human name used in messages, e.g. "Blog post".
    const LABEL: &'static str;
    const READ: Access;
    const CREATE: Access;
    const CONFLICT: &'static str = "Resource already exists";
    /// When set, a create answers `{message, id}` instead of the document.
    const CREATED_MESSAGE: Option<&'static str> = None;

    type Create: DeserializeOwned + 'static;

    fn collection(repo: &dyn Repo) -> &dyn DocumentStore<Self>;

    /// Validate a request body and build the document to insert.
    fn create(input: Self::Create, actor: Option<&Claims>, now: DateTime<Utc>) -> Result<Self, FieldErrors>;

    fn visible_to(&self, _admin: bool) -> bool {
        true
    }

    fn admit(_limiter: &RateLimiterFacade, _ip: &str) -> bool {
        true
    }
}

pub trait Editable: Resource {
    type Update: DeserializeOwned + 'static;
    type Changes;

    fn validate_update(input: Self::Update) -> Result<Self::Changes, FieldErrors>;
    fn apply_update(&mut self, changes: Self::Changes, actor: &Claims, now: DateTime<Utc>);
}

fn check(access: Access, auth: Option<&Auth>) -> Result<(), ApiError> {
    match (access, auth) {
        (Access::Public, _) => Ok(()),
        (Access::Admin, None) => Err(ApiError::Unauthorized("Authorization required")),
        (Access::Admin, Some(a)) if !a.is_admin() => Err(ApiError::Forbidden("Admin access required")),
        (Access::Admin, Some(_)) => Ok(()),
    }
}

fn store_error<R: Resource>(e: RepoError) -> ApiError {
    match e {
        RepoError::NotFound => ApiError::not_found(R::LABEL),
        RepoError::Conflict => ApiError::Conflict(R::CONFLICT),
        other => other.into(),
    }
}

pub async fn list<R: Resource>(auth: Option<Auth>, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    check(R::READ, auth.as_ref())?;
    let admin = auth.as_ref().is_some_and(Auth::is_admin);
    let docs: Vec<R> = R::collection(data.repo.as_ref())
        .list()
        .await
        .map_err(store_error::<R>)?
        .into_iter()
        .filter(|d| d.visible_to(admin))
        .collect();
    Ok(HttpResponse::Ok().json(docs))
}

pub async fn get<R: Resource>(auth: Option<Auth>, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    check(R::READ, auth.as_ref())?;
    let admin = auth.as_ref().is_some_and(Auth::is_admin);
    let doc = R::collection(data.repo.as_ref())
        .get(path.into_inner())
        .await
        .map_err(store_error::<R>)?;
    if !doc.visible_to(admin) {
        return Err(ApiError::not_found(R::LABEL));
    }
    Ok(HttpResponse::Ok().json(doc))
}

pub async fn create<R: Resource>(
    req: HttpRequest,
    auth: Option<Auth>,
    data: web::Data<AppState>,
    payload: web::Json<R::Create>,
) -> Result<HttpResponse, ApiError> {
    check(R::CREATE, auth.as_ref())?;
    if let Some(rl) = &data.rate_limiter {
        if !R::admit(rl, &rl.client_key(&req)) {
            return Err(ApiError::TooManyRequests);
        }
    }
    let doc = R::create(payload.into_inner(), auth.as_ref().map(|a| &a.0), Utc::now())?;
    let doc = R::collection(data.repo.as_ref())
        .insert(doc)
        .await
        .map_err(store_error::<R>)?;
    Ok(match R::CREATED_MESSAGE {
        Some(message) => HttpResponse::Created().json(json!({ "message": message, "id": doc.id() })),
        None => HttpResponse::Created().json(doc),
    })
}

pub async fn update<R: Editable>(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<R::Update>,
) -> Result<HttpResponse, ApiError> {
    check(Access::Admin, auth.as_ref())?;
    let Some(auth) = auth else { return Err(ApiError::Unauthorized("Authorization required")) };
    let store = R::collection(data.repo.as_ref());
    let mut doc = store.get(path.into_inner()).await.map_err(store_error::<R>)?;
    let changes = R::validate_update(payload.into_inner())?;
    doc.apply_update(changes, &auth.0, Utc::now());
    let doc = store.replace(doc).await.map_err(store_error::<R>)?;
    Ok(HttpResponse::Ok().json(doc))
}

pub async fn delete<R: Resource>(auth: Option<Auth>, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    check(Access::Admin, auth.as_ref())?;
    R::collection(data.repo.as_ref())
        .delete(path.into_inner())
        .await
        .map_err(store_error::<R>)?;
    Ok(HttpResponse::Ok().json(json!({ "message": format!("{} deleted successfully", R::LABEL) })))
}

// ---------------- blog posts --------------------------------------

impl Resource for BlogPost {
    const LABEL: &'static str = "Blog post";
    const READ: Access = Access::Public;
    const CREATE: Access = Access::Admin;
    const CONFLICT: &'static str = "A post with this slug already exists";

    type Create = NewBlogPost;

    fn collection(repo: &dyn Repo) -> &dyn DocumentStore<Self> {
        repo.posts()
    }

    fn create(input: NewBlogPost, actor: Option<&Claims>, now: DateTime<Utc>) -> Result<Self, FieldErrors> {
        let fields = validation::validate_new_post(input)?;
        let author = actor.map(|c| c.sub.clone()).unwrap_or_default();
        Ok(BlogPost::draft(author, fields, now))
    }

    // drafts stay hidden from the public site
    fn visible_to(&self, admin: bool) -> bool {
        admin || self.is_published()
    }
}

impl Editable for BlogPost {
    type Update = UpdateBlogPost;
    type Changes = PostChanges;

    fn validate_update(input: UpdateBlogPost) -> Result<PostChanges, FieldErrors> {
        validation::validate_post_update(input)
    }

    fn apply_update(&mut self, changes: PostChanges, _actor: &Claims, now: DateTime<Utc>) {
        self.apply(changes, now);
    }
}

// ---------------- sheets ------------------------------------------

impl Resource for Sheet {
    const LABEL: &'static str = "Sheet";
    const READ: Access = Access::Public;
    const CREATE: Access = Access::Admin;

    type Create = NewSheet;

    fn collection(repo: &dyn Repo) -> &dyn DocumentStore<Self> {
        repo.sheets()
    }

    fn create(input: NewSheet, actor: Option<&Claims>, now: DateTime<Utc>) -> Result<Self, FieldErrors> {
        let fields = validation::validate_new_sheet(input)?;
        let created_by = actor.map(|c| c.sub.clone()).unwrap_or_default();
        Ok(Sheet::create(created_by, fields, now))
    }
}

impl Editable for Sheet {
    type Update = UpdateSheet;
    type Changes = SheetChanges;

    fn validate_update(input: UpdateSheet) -> Result<SheetChanges, FieldErrors> {
        validation::validate_sheet_update(input)
    }

    fn apply_update(&mut self, changes: SheetChanges, actor: &Claims, now: DateTime<Utc>) {
        self.apply(changes, now);
        self.updated_by = Some(actor.sub.clone());
    }
}

// ---------------- contact messages --------------------------------

impl Resource for ContactMessage {
    const LABEL: &'static str = "Contact message";
    const READ: Access = Access::Admin;
    const CREATE: Access = Access::Public;
    const CREATED_MESSAGE: Option<&'static str> = Some("Message saved successfully");

    type Create = ContactSubmission;

    fn collection(repo: &dyn Repo) -> &dyn DocumentStore<Self> {
        repo.contacts()
    }

    fn create(input: ContactSubmission, _actor: Option<&Claims>, now: DateTime<Utc>) -> Result<Self, FieldErrors> {
        Ok(ContactMessage::new(input.into_valid()?, now))
    }

    fn admit(limiter: &RateLimiterFacade, ip: &str) -> bool {
        limiter.allow_contact(ip)
    }
}

impl Editable for ContactMessage {
    type Update = UpdateContact;
    type Changes = ContactStatus;

    fn validate_update(input: UpdateContact) -> Result<ContactStatus, FieldErrors> {
        validation::validate_contact_update(input)
    }

    fn apply_update(&mut self, status: ContactStatus, _actor: &Claims, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }
}

// ---------------- newsletter --------------------------------------

impl Resource for NewsletterSubscription {
    const LABEL: &'static str = "Subscription";
    const READ: Access = Access::Admin;
    const CREATE: Access = Access::Public;
    const CONFLICT: &'static str = "Email already subscribed";
    const CREATED_MESSAGE: Option<&'static str> = Some("Successfully subscribed to newsletter");

    type Create = SubscriptionRequest;

    fn collection(repo: &dyn Repo) -> &dyn DocumentStore<Self> {
        repo.subscriptions()
    }

    fn create(input: SubscriptionRequest, _actor: Option<&Claims>, now: DateTime<Utc>) -> Result<Self, FieldErrors> {
        Ok(NewsletterSubscription::new(input.into_valid()?, now))
    }

    fn admit(limiter: &RateLimiterFacade, ip: &str) -> bool {
        limiter.allow_subscribe(ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    fn claims(role: Role) -> Claims {
        Claims { sub: "u1".into(), name: "U".into(), email: "u@example.com".into(), role, iat: 0, exp: usize::MAX }
    }

    #[test]
    fn admin_access_distinguishes_401_and_403() {
        assert!(check(Access::Public, None).is_ok());
        assert!(matches!(check(Access::Admin, None), Err(ApiError::Unauthorized(_))));
        let member = Auth(claims(Role::User));
        assert!(matches!(check(Access::Admin, Some(&member)), Err(ApiError::Forbidden(_))));
        assert!(check(Access::Admin, Some(&Auth(claims(Role::Admin)))).is_ok());
    }

    #[test]
    fn store_errors_carry_resource_wording() {
        match store_error::<NewsletterSubscription>(RepoError::Conflict) {
            ApiError::Conflict(msg) => assert_eq!(msg, "Email already subscribed"),
            other => panic!("unexpected {other:?}"),
        }
        match store_error::<BlogPost>(RepoError::NotFound) {
            ApiError::NotFound(msg) => assert_eq!(msg, "Blog post not found"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sheet_update_records_editor() {
        let admin = claims(Role::Admin);
        let now = Utc::now();
        let mut sheet = <Sheet as Resource>::create(
            NewSheet { title: "Leads".into(), description: None, category: "Marketing".into(), status: None, data: None },
            Some(&admin),
            now,
        )
        .unwrap();
        assert_eq!(sheet.created_by, "u1");
        assert!(sheet.updated_by.is_none());
        let changes = Sheet::validate_update(UpdateSheet { status: Some("archived".into()), ..Default::default() }).unwrap();
        sheet.apply_update(changes, &admin, now);
        assert_eq!(sheet.status, SheetStatus::Archived);
        assert_eq!(sheet.updated_by.as_deref(), Some("u1"));
    }
}
