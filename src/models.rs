use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value; // sheet payload is schema-free

use crate::auth::Role;

pub type Id = uuid::Uuid;

/// Enum with a fixed set of wire labels, parsed case-insensitively.
pub trait Labelled: Copy + Sized + 'static {
    const ALL: &'static [Self];
    fn as_str(&self) -> &'static str;

    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL.iter().copied().find(|v| v.as_str().eq_ignore_ascii_case(raw))
    }

    fn labels() -> String {
        Self::ALL.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(", ")
    }
}

macro_rules! labelled_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $label)] $variant,)+
        }

        impl Labelled for $name {
            const ALL: &'static [Self] = &[$($name::$variant),+];
            fn as_str(&self) -> &'static str {
                match self { $($name::$variant => $label,)+ }
            }
        }
    };
}

labelled_enum!(ContactStatus { New => "new", Read => "read", Replied => "replied", Archived => "archived" });

labelled_enum!(BlogCategory {
    Tutorials => "Tutorials",
    TipsAndTricks => "Tips & Tricks",
    Security => "Security",
    Updates => "Updates",
    Other => "Other",
});

labelled_enum!(PostStatus { Draft => "draft", Published => "published" });

labelled_enum!(SheetCategory {
    Finance => "Finance",
    Marketing => "Marketing",
    CustomerRelations => "Customer Relations",
    Operations => "Operations",
    Other => "Other",
});

labelled_enum!(SheetStatus { Active => "active", Archived => "archived" });

/// Lowercase, collapse every run of non-alphanumerics into one `-`, strip
/// leading and trailing separators.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_sep = false;
    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_sep && !slug.is_empty() {
                slug.push('-');
            }
            pending_sep = false;
            slug.push(c);
        } else {
            pending_sep = true;
        }
    }
    slug
}

// ---------------- contact messages --------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactMessage {
    pub id: Id,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String, // derived, names are immutable after creation
    pub email: String,
    pub subject: String,
    pub message: String,
    pub status: ContactStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Already trimmed and validated contact form.
#[derive(Debug, Clone)]
pub struct NewContact {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

impl ContactMessage {
    pub fn new(form: NewContact, now: DateTime<Utc>) -> Self {
        Self {
            id: Id::new_v4(),
            full_name: format!("{} {}", form.first_name, form.last_name),
            first_name: form.first_name,
            last_name: form.last_name,
            email: form.email,
            subject: form.subject,
            message: form.message,
            status: ContactStatus::New,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContact {
    pub status: Option<String>,
}

// ---------------- newsletter --------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsletterSubscription {
    pub id: Id,
    pub email: String,
    pub subscribed_at: DateTime<Utc>,
}

impl NewsletterSubscription {
    pub fn new(email: String, now: DateTime<Utc>) -> Self {
        Self { id: Id::new_v4(), email, subscribed_at: now }
    }
}

// ---------------- blog posts --------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogPost {
    pub id: Id,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: String,
    pub category: BlogCategory,
    pub status: PostStatus,
    pub author: String, // user id, resolved by a separate lookup
    pub image: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBlogPost {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub category: String,
    pub status: Option<String>,
    pub image: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBlogPost {
    pub title: Option<String>,
    pub content: Option<String>,
    pub excerpt: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub image: Option<String>,
    pub tags: Option<Vec<String>>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
}

/// Validated field changes for a post; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct PostChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub excerpt: Option<String>,
    pub category: Option<BlogCategory>,
    pub status: Option<PostStatus>,
    pub image: Option<String>,
    pub tags: Option<Vec<String>>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
}

impl BlogPost {
    /// Build a post from validated fields. Starts as a draft unless `fields`
    /// publishes it.
    pub fn draft(author: String, fields: PostChanges, now: DateTime<Utc>) -> Self {
        let mut post = Self {
            id: Id::new_v4(),
            title: String::new(),
            slug: String::new(),
            content: String::new(),
            excerpt: String::new(),
            category: BlogCategory::Other,
            status: PostStatus::Draft,
            author,
            image: None,
            tags: Vec::new(),
            meta_title: None,
            meta_description: None,
            created_at: now,
            updated_at: now,
            published_at: None,
        };
        post.apply(fields, now);
        post
    }

    /// Apply changes and maintain the derived fields: the slug follows the
    /// title, `published_at` is stamped only on a transition into
    /// `Published`, `updated_at` moves on every save.
    pub fn apply(&mut self, changes: PostChanges, now: DateTime<Utc>) {
        if let Some(title) = changes.title {
            self.slug = slugify(&title);
            self.title = title;
        }
        if let Some(content) = changes.content { self.content = content; }
        if let Some(excerpt) = changes.excerpt { self.excerpt = excerpt; }
        if let Some(category) = changes.category { self.category = category; }
        if let Some(status) = changes.status {
            if status == PostStatus::Published && self.status != PostStatus::Published {
                self.published_at = Some(now);
            }
            self.status = status;
        }
        if let Some(image) = changes.image { self.image = Some(image).filter(|s| !s.is_empty()); }
        if let Some(tags) = changes.tags { self.tags = tags; }
        if let Some(t) = changes.meta_title { self.meta_title = Some(t).filter(|s| !s.is_empty()); }
        if let Some(d) = changes.meta_description { self.meta_description = Some(d).filter(|s| !s.is_empty()); }
        self.updated_at = now;
    }

    pub fn is_published(&self) -> bool {
        self.status == PostStatus::Published
    }
}

// ---------------- sheets ------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sheet {
    pub id: Id,
    pub title: String,
    pub description: Option<String>,
    pub category: SheetCategory,
    pub data: Value,
    pub status: SheetStatus,
    pub created_by: String,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSheet {
    #[serde(default)]
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub category: String,
    pub status: Option<String>,
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSheet {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct SheetChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<SheetCategory>,
    pub status: Option<SheetStatus>,
    pub data: Option<Value>,
}

impl Sheet {
    pub fn create(created_by: String, fields: SheetChanges, now: DateTime<Utc>) -> Self {
        let mut sheet = Self {
            id: Id::new_v4(),
            title: String::new(),
            description: None,
            category: SheetCategory::Other,
            data: Value::Array(Vec::new()),
            status: SheetStatus::Active,
            created_by,
            updated_by: None,
            created_at: now,
            updated_at: now,
        };
        sheet.apply(fields, now);
        sheet
    }

    pub fn apply(&mut self, changes: SheetChanges, now: DateTime<Utc>) {
        if let Some(title) = changes.title { self.title = title; }
        if let Some(d) = changes.description { self.description = Some(d).filter(|s| !s.is_empty()); }
        if let Some(category) = changes.category { self.category = category; }
        if let Some(status) = changes.status { self.status = status; }
        if let Some(data) = changes.data { self.data = data; }
        self.updated_at = now;
    }
}

// ---------------- users -------------------------------------------

/// Stored account. The hash is persisted but never leaves the server; API
/// responses carry an [`crate::auth::Identity`] instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Id,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: &str, email: &str, password_hash: String, role: Role) -> Self {
        let now = Utc::now();
        Self {
            id: Id::new_v4(),
            name: name.trim().to_string(),
            email: email.trim().to_lowercase(),
            password_hash,
            role,
            is_active: true,
            last_login: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_collapses_punctuation() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  --Rust & Sheets 2024--  "), "rust-sheets-2024");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn labels_parse_case_insensitively() {
        assert_eq!(BlogCategory::parse("tips & tricks"), Some(BlogCategory::TipsAndTricks));
        assert_eq!(SheetStatus::parse("Active"), Some(SheetStatus::Active));
        assert_eq!(PostStatus::parse("pending"), None);
        assert_eq!(
            serde_json::to_value(SheetCategory::CustomerRelations).unwrap(),
            serde_json::json!("Customer Relations")
        );
    }

    #[test]
    fn publish_timestamp_is_stamped_once() {
        let t0 = Utc::now();
        let mut post = BlogPost::draft(
            "author".into(),
            PostChanges {
                title: Some("First".into()),
                content: Some("body".into()),
                excerpt: Some("ex".into()),
                category: Some(BlogCategory::Updates),
                ..Default::default()
            },
            t0,
        );
        assert!(post.published_at.is_none());

        let t1 = t0 + chrono::Duration::seconds(5);
        post.apply(PostChanges { status: Some(PostStatus::Published), ..Default::default() }, t1);
        assert_eq!(post.published_at, Some(t1));

        // re-saving as published keeps the original stamp
        let t2 = t1 + chrono::Duration::seconds(5);
        post.apply(PostChanges { status: Some(PostStatus::Published), excerpt: Some("new".into()), ..Default::default() }, t2);
        assert_eq!(post.published_at, Some(t1));
        assert_eq!(post.updated_at, t2);
    }

    #[test]
    fn title_edit_recomputes_slug() {
        let now = Utc::now();
        let mut post = BlogPost::draft(
            "a".into(),
            PostChanges { title: Some("Old title".into()), ..Default::default() },
            now,
        );
        assert_eq!(post.slug, "old-title");
        post.apply(PostChanges { title: Some("Hello, World!".into()), ..Default::default() }, now);
        assert_eq!(post.slug, "hello-world");
    }

    #[test]
    fn contact_full_name_is_derived() {
        let c = ContactMessage::new(
            NewContact {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                email: "ada@example.com".into(),
                subject: "Engines".into(),
                message: "Notes on the engine".into(),
            },
            Utc::now(),
        );
        assert_eq!(c.full_name, "Ada Lovelace");
        assert_eq!(c.status, ContactStatus::New);
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["fullName"], "Ada Lovelace");
        assert_eq!(v["firstName"], "Ada");
    }
}
