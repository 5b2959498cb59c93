use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use crate::models::*;

pub static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static email pattern"));

/// Per-field messages, keyed by the camelCase wire name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// First message for a field wins.
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_insert_with(|| message.into());
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Records `"{label} is required"` when the (already trimmed) value is blank.
    pub fn require(&mut self, field: &str, value: &str, label: &str) -> bool {
        if value.is_empty() {
            self.add(field, format!("{label} is required"));
            return false;
        }
        true
    }

    pub fn choice<T: Labelled>(&mut self, field: &str, value: &str, label: &str) -> Option<T> {
        let parsed = T::parse(value);
        if parsed.is_none() {
            self.add(field, format!("{label} must be one of: {}", T::labels()));
        }
        parsed
    }

    /// Fold `validator` output in, skipping fields already reported.
    pub fn absorb(&mut self, errors: ValidationErrors) {
        for (field, errs) in errors.field_errors() {
            let key = camel_case(&field);
            if let Some(msg) = errs.iter().find_map(|e| e.message.as_deref()) {
                self.add(&key, msg);
            }
        }
    }

    pub fn finish<T>(self, value: T) -> Result<T, FieldErrors> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string())
}

// ---------------- contact form ------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ContactSubmission {
    #[serde(default)]
    #[validate(length(min = 2, max = 50, message = "First name must be between 2 and 50 characters"))]
    pub first_name: String,
    #[serde(default)]
    #[validate(length(min = 2, max = 50, message = "Last name must be between 2 and 50 characters"))]
    pub last_name: String,
    #[serde(default)]
    #[validate(
        length(max = 100, message = "Email cannot exceed 100 characters"),
        regex(path = *EMAIL_RE, message = "Please enter a valid email address")
    )]
    pub email: String,
    #[serde(default)]
    #[validate(length(min = 5, max = 200, message = "Subject must be between 5 and 200 characters"))]
    pub subject: String,
    #[serde(default)]
    #[validate(length(min = 10, max = 2000, message = "Message must be between 10 and 2000 characters"))]
    pub message: String,
}

impl ContactSubmission {
    /// Trim every field and fold the email to lowercase before any rule runs.
    pub fn normalized(self) -> Self {
        Self {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            subject: self.subject.trim().to_string(),
            message: self.message.trim().to_string(),
        }
    }

    pub fn into_valid(self) -> Result<NewContact, FieldErrors> {
        let form = self.normalized();
        let mut errors = FieldErrors::new();
        errors.require("firstName", &form.first_name, "First name");
        errors.require("lastName", &form.last_name, "Last name");
        errors.require("email", &form.email, "Email");
        errors.require("subject", &form.subject, "Subject");
        errors.require("message", &form.message, "Message");
        if let Err(e) = form.validate() {
            errors.absorb(e);
        }
        errors.finish(NewContact {
            first_name: form.first_name,
            last_name: form.last_name,
            email: form.email,
            subject: form.subject,
            message: form.message,
        })
    }
}

// ---------------- newsletter --------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SubscriptionRequest {
    #[serde(default)]
    #[validate(
        length(max = 100, message = "Email cannot exceed 100 characters"),
        regex(path = *EMAIL_RE, message = "Please enter a valid email address")
    )]
    pub email: String,
}

impl SubscriptionRequest {
    /// Returns the normalized (trimmed, lowercased) address.
    pub fn into_valid(self) -> Result<String, FieldErrors> {
        let req = Self { email: self.email.trim().to_lowercase() };
        let mut errors = FieldErrors::new();
        errors.require("email", &req.email, "Email");
        if let Err(e) = req.validate() {
            errors.absorb(e);
        }
        errors.finish(req.email)
    }
}

// ---------------- blog posts --------------------------------------

fn post_title(errors: &mut FieldErrors, title: String) -> String {
    if errors.require("title", &title, "Title") && slugify(&title).is_empty() {
        errors.add("title", "Title must contain at least one letter or number");
    }
    title
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

pub fn validate_new_post(input: NewBlogPost) -> Result<PostChanges, FieldErrors> {
    let mut errors = FieldErrors::new();
    let title = post_title(&mut errors, input.title.trim().to_string());
    let content = input.content;
    errors.require("content", content.trim(), "Content");
    let excerpt = input.excerpt.trim().to_string();
    errors.require("excerpt", &excerpt, "Excerpt");
    let category = if errors.require("category", input.category.trim(), "Category") {
        errors.choice::<BlogCategory>("category", &input.category, "Category")
    } else {
        None
    };
    let status = match input.status.as_deref() {
        Some(s) => errors.choice::<PostStatus>("status", s, "Status"),
        None => Some(PostStatus::Draft),
    };
    errors.finish(PostChanges {
        title: Some(title),
        content: Some(content),
        excerpt: Some(excerpt),
        category,
        status,
        image: trimmed(input.image),
        tags: Some(clean_tags(input.tags)),
        meta_title: trimmed(input.meta_title),
        meta_description: trimmed(input.meta_description),
    })
}

pub fn validate_post_update(input: UpdateBlogPost) -> Result<PostChanges, FieldErrors> {
    let mut errors = FieldErrors::new();
    let title = trimmed(input.title).map(|t| post_title(&mut errors, t));
    if let Some(content) = &input.content {
        errors.require("content", content.trim(), "Content");
    }
    let excerpt = trimmed(input.excerpt);
    if let Some(e) = &excerpt {
        errors.require("excerpt", e, "Excerpt");
    }
    let category = input
        .category
        .as_deref()
        .and_then(|c| errors.choice::<BlogCategory>("category", c, "Category"));
    let status = input
        .status
        .as_deref()
        .and_then(|s| errors.choice::<PostStatus>("status", s, "Status"));
    errors.finish(PostChanges {
        title,
        content: input.content,
        excerpt,
        category,
        status,
        image: trimmed(input.image),
        tags: input.tags.map(clean_tags),
        meta_title: trimmed(input.meta_title),
        meta_description: trimmed(input.meta_description),
    })
}

// ---------------- sheets ------------------------------------------

pub fn validate_new_sheet(input: NewSheet) -> Result<SheetChanges, FieldErrors> {
    let mut errors = FieldErrors::new();
    let title = input.title.trim().to_string();
    errors.require("title", &title, "Title");
    let category = if errors.require("category", input.category.trim(), "Category") {
        errors.choice::<SheetCategory>("category", &input.category, "Category")
    } else {
        None
    };
    let status = match input.status.as_deref() {
        Some(s) => errors.choice::<SheetStatus>("status", s, "Status"),
        None => Some(SheetStatus::Active),
    };
    errors.finish(SheetChanges {
        title: Some(title),
        description: trimmed(input.description),
        category,
        status,
        data: Some(input.data.unwrap_or_else(|| serde_json::Value::Array(Vec::new()))),
    })
}

pub fn validate_sheet_update(input: UpdateSheet) -> Result<SheetChanges, FieldErrors> {
    let mut errors = FieldErrors::new();
    let title = trimmed(input.title);
    if let Some(t) = &title {
        errors.require("title", t, "Title");
    }
    let category = input
        .category
        .as_deref()
        .and_then(|c| errors.choice::<SheetCategory>("category", c, "Category"));
    let status = input
        .status
        .as_deref()
        .and_then(|s| errors.choice::<SheetStatus>("status", s, "Status"));
    errors.finish(SheetChanges {
        title,
        description: trimmed(input.description),
        category,
        status,
        data: input.data,
    })
}

// ---------------- contact status ----------------------------------

pub fn validate_contact_update(input: UpdateContact) -> Result<ContactStatus, FieldErrors> {
    let mut errors = FieldErrors::new();
    let raw = input.status.unwrap_or_default();
    let status = if errors.require("status", raw.trim(), "Status") {
        errors.choice::<ContactStatus>("status", &raw, "Status")
    } else {
        None
    };
    match status {
        Some(s) => errors.finish(s),
        None => Err(errors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> ContactSubmission {
        ContactSubmission {
            first_name: "  Grace ".into(),
            last_name: "Hopper".into(),
            email: " Grace@Example.COM ".into(),
            subject: "Compilers".into(),
            message: "A longer message body.".into(),
        }
    }

    #[test]
    fn valid_contact_is_trimmed_and_folded() {
        let c = contact().into_valid().unwrap();
        assert_eq!(c.first_name, "Grace");
        assert_eq!(c.email, "grace@example.com");
    }

    #[test]
    fn contact_reports_each_bad_field() {
        let mut form = contact();
        form.first_name = " ".into();
        form.last_name = "H".into();
        form.email = "not-an-email".into();
        form.subject = "Hi".into();
        form.message = "x".repeat(2001);
        let errs = form.into_valid().unwrap_err();
        assert_eq!(errs.get("firstName"), Some("First name is required"));
        assert!(errs.contains("lastName"));
        assert_eq!(errs.get("email"), Some("Please enter a valid email address"));
        assert!(errs.contains("subject"));
        assert!(errs.contains("message"));
        assert_eq!(errs.len(), 5);
    }

    #[test]
    fn length_bounds_count_characters_after_trim() {
        let mut form = contact();
        form.first_name = format!("  {}  ", "é".repeat(50));
        assert!(form.clone().into_valid().is_ok());
        form.first_name = "é".repeat(51);
        assert!(form.into_valid().unwrap_err().contains("firstName"));
    }

    #[test]
    fn newsletter_email_rules() {
        for bad in ["", "plain", "a@b", "a b@c.io", "@c.io", "a@@c.io"] {
            let res = SubscriptionRequest { email: bad.into() }.into_valid();
            assert!(res.is_err(), "{bad:?} should be rejected");
        }
        let long = format!("{}@example.com", "a".repeat(95));
        assert!(SubscriptionRequest { email: long }.into_valid().is_err());
        assert_eq!(
            SubscriptionRequest { email: " Me@Site.org ".into() }.into_valid().unwrap(),
            "me@site.org"
        );
    }

    #[test]
    fn new_post_requires_core_fields() {
        let errs = validate_new_post(NewBlogPost {
            title: "?!".into(),
            content: "".into(),
            excerpt: " ".into(),
            category: "Gossip".into(),
            status: None,
            image: None,
            tags: vec![],
            meta_title: None,
            meta_description: None,
        })
        .unwrap_err();
        assert_eq!(errs.get("title"), Some("Title must contain at least one letter or number"));
        assert!(errs.contains("content"));
        assert!(errs.contains("excerpt"));
        assert!(errs.get("category").unwrap().contains("Tips & Tricks"));
    }

    #[test]
    fn sheet_defaults() {
        let changes = validate_new_sheet(NewSheet {
            title: " Q3 budget ".into(),
            description: None,
            category: "finance".into(),
            status: None,
            data: None,
        })
        .unwrap();
        assert_eq!(changes.title.as_deref(), Some("Q3 budget"));
        assert_eq!(changes.category, Some(SheetCategory::Finance));
        assert_eq!(changes.status, Some(SheetStatus::Active));
        assert_eq!(changes.data, Some(serde_json::json!([])));
    }

    #[test]
    fn contact_status_update_must_name_a_status() {
        assert!(validate_contact_update(UpdateContact { status: None }).is_err());
        assert!(validate_contact_update(UpdateContact { status: Some("spam".into()) }).is_err());
        assert_eq!(
            validate_contact_update(UpdateContact { status: Some("Replied".into()) }).unwrap(),
            ContactStatus::Replied
        );
    }
}
