use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cidr::{self, RangeError};
use crate::error::StoreError;

/// Hash field names of a stored note.
pub mod field {
    pub const CONTENT: &str = "content";
    pub const IV: &str = "iv";
    pub const SALT: &str = "salt";
    pub const ALLOWED_IPS: &str = "allowed_ips";
    pub const LIMIT_CLICKS: &str = "limit_clicks";
    pub const MAX_CLICKS: &str = "max_clicks";
    pub const COUNTED_CLICKS: &str = "counted_clicks";
    pub const VERIFY_HASH: &str = "verify_hash";
    pub const VERIFY_SALT: &str = "verify_salt";
}

/// A stored note.
///
/// The service never interprets `content`, `iv` or `salt`; they are produced
/// and consumed by the browser. The verification material is kept out of
/// every serialised response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub content: String,
    pub iv: String,
    pub salt: String,
    pub allowed_ips: String,
    pub limit_clicks: bool,
    pub max_clicks: u32,
    pub counted_clicks: u32,
    #[serde(skip)]
    pub verify_hash: String,
    #[serde(skip)]
    pub verify_salt: String,
}

/// What the existence check reports about a record, without its content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordMeta {
    pub verify_hash: String,
    pub verify_salt: String,
    pub limit_clicks: bool,
}

impl Record {
    /// Field/value pairs as written to the store.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (field::CONTENT, self.content.clone()),
            (field::IV, self.iv.clone()),
            (field::SALT, self.salt.clone()),
            (field::ALLOWED_IPS, self.allowed_ips.clone()),
            (field::LIMIT_CLICKS, encode_bool(self.limit_clicks).to_string()),
            (field::MAX_CLICKS, self.max_clicks.to_string()),
            (field::COUNTED_CLICKS, self.counted_clicks.to_string()),
            (field::VERIFY_HASH, self.verify_hash.clone()),
            (field::VERIFY_SALT, self.verify_salt.clone()),
        ]
    }

    /// Rebuild a record from its stored fields.
    ///
    /// An empty hash, or one without content, is an absent record.
    pub fn from_fields(
        id: &str,
        mut fields: HashMap<String, String>,
    ) -> Result<Option<Self>, StoreError> {
        let content = fields.remove(field::CONTENT).unwrap_or_default();
        if content.is_empty() {
            return Ok(None);
        }

        let mut take = |name: &str| fields.remove(name).unwrap_or_default();

        let iv = take(field::IV);
        let salt = take(field::SALT);
        let allowed_ips = take(field::ALLOWED_IPS);
        let limit_clicks = decode_bool(&take(field::LIMIT_CLICKS));
        let max_clicks = parse_count(id, field::MAX_CLICKS, &take(field::MAX_CLICKS))?;
        let counted_clicks = parse_count(id, field::COUNTED_CLICKS, &take(field::COUNTED_CLICKS))?;
        let verify_hash = take(field::VERIFY_HASH);
        let verify_salt = take(field::VERIFY_SALT);

        Ok(Some(Self {
            content,
            iv,
            salt,
            allowed_ips,
            limit_clicks,
            max_clicks,
            counted_clicks,
            verify_hash,
            verify_salt,
        }))
    }

    /// Rebuild a record from a flat `[field, value, field, value, ...]` reply.
    pub fn from_flat(id: &str, flat: Vec<String>) -> Result<Option<Self>, StoreError> {
        let mut fields = HashMap::with_capacity(flat.len() / 2);
        let mut iter = flat.into_iter();
        while let (Some(name), Some(value)) = (iter.next(), iter.next()) {
            fields.insert(name, value);
        }
        Self::from_fields(id, fields)
    }

    pub fn meta(&self) -> RecordMeta {
        RecordMeta {
            verify_hash: self.verify_hash.clone(),
            verify_salt: self.verify_salt.clone(),
            limit_clicks: self.limit_clicks,
        }
    }

    /// Reads left before the record deletes itself, `None` when unlimited.
    pub fn remaining_reads(&self) -> Option<u32> {
        self.limit_clicks
            .then(|| self.max_clicks.saturating_sub(self.counted_clicks))
    }

    pub fn is_ip_restricted(&self) -> bool {
        !self.allowed_ips.trim().is_empty()
    }

    /// Whether `source_ip` may see this note.
    pub fn check_allowed_ip(&self, source_ip: &str) -> Result<bool, RangeError> {
        if !self.is_ip_restricted() {
            return Ok(true);
        }
        cidr::within_ranges(source_ip, &self.allowed_ips)
    }
}

pub(crate) fn encode_bool(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

pub(crate) fn decode_bool(value: &str) -> bool {
    matches!(value, "1" | "true")
}

fn parse_count(id: &str, name: &str, value: &str) -> Result<u32, StoreError> {
    if value.is_empty() {
        return Ok(0);
    }
    value.parse().map_err(|_| StoreError::Malformed {
        id: id.to_string(),
        reason: format!("field '{}' is not a count: {:?}", name, value),
    })
}
