//! Request validation and normalization.
//!
//! `validate` is pure: it either produces a [`SendRequest`] ready for the
//! queue or every violation found in the raw payload.

use crate::models::{DEFAULT_SERVICE, RawSendRequest, SendRequest};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::ValidateEmail;

const REQUIRED: &str = "required";
const INVALID_EMAIL: &str = "invalid email address";
const SENDER_NOT_ALLOWED: &str = "sender must use one of the allowed domains";
const BLANK: &str = "must not be blank";

/// One rejected field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub field: String,
    pub reason: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Domains a `from` address may use.
///
/// Matching is a case-insensitive suffix match on `@domain`. An empty list
/// allows any sender.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderPolicy {
    domains: Vec<String>,
}

impl SenderPolicy {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            domains: domains
                .into_iter()
                .map(|d| d.as_ref().trim().trim_start_matches('@').to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    /// No sender-domain restriction.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn allows(&self, address: &str) -> bool {
        if self.domains.is_empty() {
            return true;
        }
        let address = address.to_ascii_lowercase();
        self.domains
            .iter()
            .any(|domain| address.ends_with(&format!("@{domain}")))
    }
}

fn is_email(value: &str) -> bool {
    String::from(value).validate_email()
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

/// Validate `raw` and normalize it into a [`SendRequest`].
///
/// All violations are collected. Normalization: a missing or blank `service`
/// becomes `"default"`, a missing `body` becomes empty text, a missing
/// `context` becomes an empty mapping.
pub fn validate(raw: RawSendRequest, policy: &SenderPolicy) -> Result<SendRequest, Vec<Violation>> {
    let mut violations = Vec::new();

    match raw.to.as_deref().map(str::trim) {
        None | Some("") => violations.push(Violation::new("to", REQUIRED)),
        Some(to) if !is_email(to) => violations.push(Violation::new("to", INVALID_EMAIL)),
        Some(_) => {}
    }

    if let Some(from) = raw.from.as_deref().map(str::trim) {
        if !is_email(from) {
            violations.push(Violation::new("from", INVALID_EMAIL));
        }
        if !policy.allows(from) {
            violations.push(Violation::new("from", SENDER_NOT_ALLOWED));
        }
    }

    if is_blank(&raw.subject) {
        violations.push(Violation::new("subject", REQUIRED));
    }

    if let Some(template) = &raw.template
        && template.trim().is_empty()
    {
        violations.push(Violation::new("template", BLANK));
    }

    if !violations.is_empty() {
        return Err(violations);
    }

    let service = if is_blank(&raw.service) {
        DEFAULT_SERVICE.to_string()
    } else {
        raw.service.unwrap_or_default()
    };

    Ok(SendRequest {
        to: raw.to.unwrap_or_default().trim().to_string(),
        from: raw.from.map(|f| f.trim().to_string()),
        subject: raw.subject.unwrap_or_default(),
        body: raw.body.unwrap_or_default(),
        template: raw.template,
        context: raw.context.unwrap_or_default(),
        service,
    })
}
