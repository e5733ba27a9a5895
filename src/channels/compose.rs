//! Message composition: placeholder interpolation, email subject
//! extraction, and the SMS short form.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::dispatch::model::Recipient;

/// Subject used when neither the task nor the content provides one.
pub const DEFAULT_EMAIL_SUBJECT: &str = "Reaching out";

/// Longest SMS body sent (two concatenated segments).
pub const SMS_MAX_CHARS: usize = 320;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

static SUBJECT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\A\s*subject:[ \t]*([^\r\n]*)\r?\n?").unwrap());

/// Value of a known placeholder. Missing optional fields render empty.
fn variable(name: &str, recipient: &Recipient) -> Option<String> {
    match name {
        "first_name" => Some(recipient.first_name().to_string()),
        "name" | "full_name" => Some(recipient.name.clone()),
        "company" => Some(recipient.company.clone().unwrap_or_default()),
        "email" => Some(recipient.email.clone().unwrap_or_default()),
        _ => None,
    }
}

/// Replace `{{variable}}` placeholders. Unknown names are left verbatim.
pub fn interpolate(template: &str, recipient: &Recipient) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            variable(&caps[1], recipient).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Subject and body of an email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailParts {
    pub subject: String,
    pub body: String,
}

/// Split content into subject and body.
///
/// Subject precedence: explicit subject, then a leading `Subject:` line of
/// the content, then `DEFAULT_EMAIL_SUBJECT`. A leading `Subject:` line is
/// always removed from the body.
pub fn email_parts(explicit_subject: Option<&str>, content: &str) -> EmailParts {
    let (inline_subject, body) = match SUBJECT_LINE.captures(content) {
        Some(caps) => {
            let subject = caps[1].trim().to_string();
            let rest = content[caps[0].len()..].trim().to_string();
            (Some(subject).filter(|s| !s.is_empty()), rest)
        }
        None => (None, content.trim().to_string()),
    };

    let subject = explicit_subject
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .or(inline_subject)
        .unwrap_or_else(|| DEFAULT_EMAIL_SUBJECT.to_string());

    EmailParts { subject, body }
}

/// Collapse whitespace and cap the length at `SMS_MAX_CHARS` characters.
pub fn sms_body(content: &str) -> String {
    let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SMS_MAX_CHARS {
        return collapsed;
    }
    let mut truncated: String = collapsed.chars().take(SMS_MAX_CHARS - 3).collect();
    truncated.truncate(truncated.trim_end().len());
    truncated.push_str("...");
    truncated
}
