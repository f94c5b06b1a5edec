//! Note lifecycle on top of a [`RecordStore`].
//!
//! Opening a note goes: existence check, passphrase proof, exactly one read,
//! IP policy. Click-limited notes are read with the counting primitive and
//! everything else with the plain read; a request never uses both and never
//! counts twice.
//!
//! The IP policy is checked after the read, so a reader outside the allowed
//! ranges still uses up one read of a click-limited note. This avoids a
//! second store round-trip, and keeps the behaviour existing links were
//! created under. Checking the policy first would need the ranges before the
//! count, i.e. another read.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::record::Record;
use crate::response::NoteStatus;
use crate::store::{ExpiryStatus, RecordStore};
use crate::validation::NoteRequest;

pub struct NoteService {
    store: Arc<dyn RecordStore>,
}

impl NoteService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Store `num_links` independent copies of the note, each under a fresh
    /// id. Returns the ids in creation order.
    pub async fn create(&self, request: &NoteRequest) -> ApiResult<Vec<String>> {
        let mut ids = Vec::with_capacity(request.num_links as usize);

        for _ in 0..request.num_links {
            let id = Uuid::new_v4().to_string();
            let expiry = self.store.create(&id, &request.record, request.ttl).await?;

            if expiry == ExpiryStatus::Failed {
                tracing::warn!(id = %id, "note stored without expiry");
            }
            ids.push(id);
        }

        tracing::info!(
            links = ids.len(),
            limit_clicks = request.record.limit_clicks,
            max_clicks = request.record.max_clicks,
            ttl_secs = request.ttl.as_secs(),
            "notes created"
        );
        Ok(ids)
    }

    /// What a browser needs before it can prove it knows the passphrase.
    /// Does not count as a read.
    pub async fn status(&self, id: &str) -> ApiResult<NoteStatus> {
        let meta = self.store.exists(id).await?.ok_or(ApiError::NotFound)?;

        Ok(NoteStatus {
            requires_passphrase: !meta.verify_hash.is_empty(),
            verify_salt: meta.verify_salt,
        })
    }

    /// Release the note to `client_ip`, if the passphrase proof matches and
    /// the client is inside the note's allowed ranges.
    pub async fn open(&self, id: &str, client_ip: &str, presented_hash: &str) -> ApiResult<Record> {
        let meta = self.store.exists(id).await?.ok_or(ApiError::NotFound)?;

        if !meta.verify_hash.is_empty() && !constant_time_eq(&meta.verify_hash, presented_hash) {
            tracing::info!(id, client_ip, "passphrase proof rejected");
            return Err(ApiError::VerificationFailed);
        }

        let record = if meta.limit_clicks {
            self.store.get_and_count(id).await?
        } else {
            self.store.get(id).await?
        }
        .ok_or(ApiError::NotFound)?;

        // The read above already counted.
        if !record.check_allowed_ip(client_ip)? {
            tracing::warn!(
                id,
                client_ip,
                counted_clicks = record.counted_clicks,
                "note read refused by IP policy"
            );
            return Err(ApiError::PolicyDenied);
        }

        tracing::debug!(id, remaining = ?record.remaining_reads(), "note opened");
        Ok(record)
    }
}

/// Compare two strings without short-circuiting on the first difference.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
