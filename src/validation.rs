use std::time::Duration;

use serde::{Deserialize, Deserializer};
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::cidr;
use crate::error::ApiError;
use crate::record::Record;

/// Largest accepted ciphertext, in bytes.
pub const MAX_NOTE_BYTES: usize = 30 * 1024;
pub const MAX_DAYS: u32 = 15;
pub const MAX_LINKS: u32 = 500;
pub const MAX_MAX_CLICKS: u32 = 100;

/// Form body of `POST /api/note`.
#[derive(Debug, Deserialize, Validate)]
pub struct NoteForm {
    #[validate(length(min = 1, message = "Note content cannot be empty"))]
    pub content: String,

    #[serde(default)]
    #[validate(length(max = 256))]
    pub iv: String,

    #[serde(default)]
    #[validate(length(max = 256))]
    pub salt: String,

    #[serde(default)]
    #[validate(custom(function = "validate_ranges"))]
    pub allowed_ips: String,

    #[validate(range(max = 15, message = "Invalid number of days"))]
    pub days_until_expire: u32,

    #[serde(default)]
    pub limit_clicks: bool,

    #[serde(default, deserialize_with = "empty_as_none")]
    pub max_clicks: Option<u32>,

    #[validate(range(min = 1, max = 500, message = "Invalid number of links"))]
    pub num_links: u32,

    #[serde(default)]
    #[validate(length(max = 256))]
    pub verify_hash: String,

    #[serde(default)]
    #[validate(length(max = 256))]
    pub verify_salt: String,
}

/// Form body of `POST /api/note/:id/verify`.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct VerifyForm {
    #[serde(default)]
    #[validate(length(max = 256))]
    pub verify_hash: String,
}

/// A validated creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteRequest {
    pub record: Record,
    pub ttl: Duration,
    pub num_links: u32,
}

impl NoteForm {
    /// Check every field and the cross-field rules, producing the record
    /// template to store.
    pub fn into_request(self) -> Result<NoteRequest, ApiError> {
        self.validate()?;

        if self.content.len() > MAX_NOTE_BYTES {
            return Err(ApiError::InvalidRequest(format!(
                "Note too large! Max size: {} bytes",
                MAX_NOTE_BYTES
            )));
        }

        let max_clicks = if self.limit_clicks {
            match self.max_clicks {
                Some(n) if (1..=MAX_MAX_CLICKS).contains(&n) => n,
                Some(_) => {
                    return Err(ApiError::InvalidRequest(format!(
                        "Max clicks must be between 1 and {}",
                        MAX_MAX_CLICKS
                    )))
                }
                None => {
                    return Err(ApiError::InvalidRequest(
                        "Missing max clicks in request".to_string(),
                    ))
                }
            }
        } else {
            0
        };

        let record = Record {
            content: self.content,
            iv: self.iv,
            salt: self.salt,
            allowed_ips: self.allowed_ips.trim().to_string(),
            limit_clicks: self.limit_clicks,
            max_clicks,
            counted_clicks: 0,
            verify_hash: self.verify_hash,
            verify_salt: self.verify_salt,
        };

        Ok(NoteRequest {
            record,
            ttl: Duration::from_secs(u64::from(self.days_until_expire) * 24 * 60 * 60),
            num_links: self.num_links,
        })
    }
}

/// Note ids are UUIDs; anything else is rejected before touching the store.
pub fn validate_note_id(id: &str) -> Result<(), ApiError> {
    Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| ApiError::InvalidRequest("Invalid note ID format".to_string()))
}

fn validate_ranges(ranges: &str) -> Result<(), ValidationError> {
    cidr::check_valid_ranges(ranges).map_err(|err| {
        let mut error = ValidationError::new("allowed_ips");
        error.message = Some(
            format!(
                "Invalid IP range ({}). Please enter as 1.1.1.0/24, 2.2.0.0/16",
                err
            )
            .into(),
        );
        error
    })
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Flatten validation errors into one human-readable line.
pub fn describe(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |err| match &err.message {
                Some(message) => message.to_string(),
                None => format!("Invalid value for '{}'", field),
            })
        })
        .collect();
    messages.sort();
    messages.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> NoteForm {
        NoteForm {
            content: "Y2lwaGVy".to_string(),
            iv: "aXY=".to_string(),
            salt: "c2FsdA==".to_string(),
            allowed_ips: String::new(),
            days_until_expire: 1,
            limit_clicks: true,
            max_clicks: Some(3),
            num_links: 2,
            verify_hash: "hash".to_string(),
            verify_salt: "salt".to_string(),
        }
    }

    #[test]
    fn test_valid_request() {
        let request = form().into_request().unwrap();
        assert_eq!(request.num_links, 2);
        assert_eq!(request.ttl, Duration::from_secs(86_400));
        assert_eq!(request.record.max_clicks, 3);
        assert_eq!(request.record.counted_clicks, 0);
    }

    #[test]
    fn test_zero_days_means_no_expiry() {
        let request = NoteForm {
            days_until_expire: 0,
            ..form()
        }
        .into_request()
        .unwrap();
        assert!(request.ttl.is_zero());
    }

    #[test]
    fn test_rejects_empty_and_oversize_content() {
        let empty = NoteForm {
            content: String::new(),
            ..form()
        };
        assert!(matches!(empty.into_request(), Err(ApiError::InvalidRequest(_))));

        let huge = NoteForm {
            content: "a".repeat(MAX_NOTE_BYTES + 1),
            ..form()
        };
        assert!(matches!(huge.into_request(), Err(ApiError::InvalidRequest(msg)) if msg.contains("too large")));
    }

    #[test]
    fn test_rejects_bad_ranges_days_and_links() {
        let bad_ranges = NoteForm {
            allowed_ips: "1.1.1.0/24, oops".to_string(),
            ..form()
        };
        assert!(matches!(bad_ranges.into_request(), Err(ApiError::InvalidRequest(msg)) if msg.contains("Invalid IP range")));

        let too_long = NoteForm {
            days_until_expire: MAX_DAYS + 1,
            ..form()
        };
        assert!(too_long.into_request().is_err());

        let no_links = NoteForm {
            num_links: 0,
            ..form()
        };
        assert!(no_links.into_request().is_err());

        let too_many = NoteForm {
            num_links: MAX_LINKS + 1,
            ..form()
        };
        assert!(too_many.into_request().is_err());
    }

    #[test]
    fn test_limited_note_needs_max_clicks() {
        let missing = NoteForm {
            max_clicks: None,
            ..form()
        };
        assert!(missing.into_request().is_err());

        let too_high = NoteForm {
            max_clicks: Some(MAX_MAX_CLICKS + 1),
            ..form()
        };
        assert!(too_high.into_request().is_err());

        let unlimited = NoteForm {
            limit_clicks: false,
            max_clicks: None,
            ..form()
        }
        .into_request()
        .unwrap();
        assert_eq!(unlimited.record.max_clicks, 0);
    }

    #[test]
    fn test_note_id_format() {
        assert!(validate_note_id("0b6f1f7e-5d59-4c6f-9d38-1f0b2b3a4c5d").is_ok());
        assert!(validate_note_id("../etc/passwd").is_err());
    }
}
