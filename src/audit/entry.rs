//! Audit Ledger Entries and Blocks
//!
//! Defines the audit entry submitted by callers and the immutable block
//! that embeds it into the hash chain, together with the canonical
//! encoding every block hash is computed over.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Previous-hash sentinel used by the block at index 0.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Domain tag mixed into every block hash; bump the version if the
/// field list below ever changes.
const HASH_DOMAIN: &[u8] = b"edu-audit/block/v1";

/// An administrative action recorded by a calling subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditEntry {
    pub action: String,
    pub actor_id: String,
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn new(
        action: impl Into<String>,
        actor_id: impl Into<String>,
        entity: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            actor_id: actor_id.into(),
            entity: entity.into(),
            entity_id: None,
            payload: None,
        }
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Human-readable one-liner for logs
    pub fn summary(&self) -> String {
        match &self.entity_id {
            Some(id) => format!("{} by {} on {}:{}", self.action, self.actor_id, self.entity, id),
            None => format!("{} by {} on {}", self.action, self.actor_id, self.entity),
        }
    }
}

/// One immutable, hash-linked ledger record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub prev_hash: String,
    pub entry: AuditEntry,
    pub timestamp: DateTime<Utc>,
    pub hash: String,
}

impl Block {
    /// Build the block that follows `prev_hash` at `index`, stamped now.
    pub fn next(index: u64, prev_hash: String, entry: AuditEntry) -> Self {
        Self::at(index, prev_hash, entry, now_millis())
    }

    /// Build a block with an explicit timestamp, truncated to the
    /// millisecond precision the ledger persists.
    pub fn at(index: u64, prev_hash: String, entry: AuditEntry, timestamp: DateTime<Utc>) -> Self {
        let timestamp = timestamp.trunc_subsecs(3);
        let hash = compute_block_hash(index, &prev_hash, &entry, &timestamp);
        Self {
            index,
            prev_hash,
            entry,
            timestamp,
            hash,
        }
    }

    /// Recompute this block's hash from its own fields
    pub fn calculate_hash(&self) -> String {
        compute_block_hash(self.index, &self.prev_hash, &self.entry, &self.timestamp)
    }

    pub fn verify_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }
}

/// Current instant at the ledger's persisted precision
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Canonical text form of a block timestamp, e.g. `2026-10-15T09:30:00.125Z`
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Compute `H(index, prev_hash, entry, timestamp)`.
///
/// Fields are fed to SHA-256 in a fixed order, each variable-length field
/// prefixed with its byte length (u64 big-endian), so no two distinct
/// field lists share an encoding. Optional fields carry a presence byte.
/// The payload is encoded as compact JSON with object keys sorted, so
/// logically equal payloads always encode identically.
pub fn compute_block_hash(
    index: u64,
    prev_hash: &str,
    entry: &AuditEntry,
    timestamp: &DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    update_field(&mut hasher, HASH_DOMAIN);
    hasher.update(index.to_be_bytes());
    update_field(&mut hasher, prev_hash.as_bytes());
    update_field(&mut hasher, entry.action.as_bytes());
    update_field(&mut hasher, entry.actor_id.as_bytes());
    update_field(&mut hasher, entry.entity.as_bytes());
    match &entry.entity_id {
        Some(id) => {
            hasher.update([1u8]);
            update_field(&mut hasher, id.as_bytes());
        }
        None => hasher.update([0u8]),
    }
    match &entry.payload {
        Some(payload) => {
            hasher.update([1u8]);
            let mut encoded = String::new();
            write_canonical_json(payload, &mut encoded);
            update_field(&mut hasher, encoded.as_bytes());
        }
        None => hasher.update([0u8]),
    }
    update_field(&mut hasher, format_timestamp(timestamp).as_bytes());
    hex::encode(hasher.finalize())
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// Compact JSON with object keys in byte order at every depth
fn write_canonical_json(value: &serde_json::Value, out: &mut String) {
    use serde_json::Value;

    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_json(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Strings and scalars use serde_json's own escaping
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical_json(item, out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_block_hash_is_deterministic() {
        let entry = AuditEntry::new("student.create", "admin-1", "student").with_entity_id("42");
        let a = Block::at(0, GENESIS_HASH.to_string(), entry.clone(), fixed_time());
        let b = Block::at(0, GENESIS_HASH.to_string(), entry, fixed_time());

        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash.len(), 64);
        assert!(a.verify_hash());
    }

    #[test]
    fn test_payload_key_order_does_not_change_hash() {
        let first: serde_json::Value =
            serde_json::from_str(r#"{"name":"Ada","grade":7}"#).unwrap();
        let second: serde_json::Value =
            serde_json::from_str(r#"{"grade":7,"name":"Ada"}"#).unwrap();

        let a = AuditEntry::new("student.update", "admin-1", "student").with_payload(first);
        let b = AuditEntry::new("student.update", "admin-1", "student").with_payload(second);

        assert_eq!(
            compute_block_hash(3, GENESIS_HASH, &a, &fixed_time()),
            compute_block_hash(3, GENESIS_HASH, &b, &fixed_time())
        );
    }

    #[test]
    fn test_every_field_is_bound_into_the_hash() {
        let entry = AuditEntry::new("class.create", "teacher-9", "class")
            .with_entity_id("c-1")
            .with_payload(json!({"room": "B12"}));
        let base = compute_block_hash(1, GENESIS_HASH, &entry, &fixed_time());

        assert_ne!(base, compute_block_hash(2, GENESIS_HASH, &entry, &fixed_time()));
        assert_ne!(base, compute_block_hash(1, "ab", &entry, &fixed_time()));
        assert_ne!(
            base,
            compute_block_hash(1, GENESIS_HASH, &entry, &(fixed_time() + chrono::Duration::milliseconds(1)))
        );

        let mut changed = entry.clone();
        changed.entity_id = None;
        assert_ne!(base, compute_block_hash(1, GENESIS_HASH, &changed, &fixed_time()));

        let mut changed = entry.clone();
        changed.payload = Some(json!({"room": "B13"}));
        assert_ne!(base, compute_block_hash(1, GENESIS_HASH, &changed, &fixed_time()));
    }

    #[test]
    fn test_adjacent_fields_cannot_be_shifted() {
        let a = AuditEntry::new("ab", "c", "x");
        let b = AuditEntry::new("a", "bc", "x");
        assert_ne!(
            compute_block_hash(0, GENESIS_HASH, &a, &fixed_time()),
            compute_block_hash(0, GENESIS_HASH, &b, &fixed_time())
        );
    }

    #[test]
    fn test_timestamp_is_truncated_to_millis() {
        let precise = fixed_time() + chrono::Duration::nanoseconds(1_234_567);
        let block = Block::at(0, GENESIS_HASH.to_string(), AuditEntry::new("a", "b", "c"), precise);

        assert_eq!(format_timestamp(&block.timestamp), "2026-10-15T09:30:00.001Z");
        assert!(block.verify_hash());
    }

    #[test]
    fn test_nested_payload_keys_are_sorted() {
        let mut out = String::new();
        write_canonical_json(&json!({"b": [{"z": 1, "a": null}], "a": "x\"y"}), &mut out);
        assert_eq!(out, r#"{"a":"x\"y","b":[{"a":null,"z":1}]}"#);
    }

    #[test]
    fn test_entry_rejects_unknown_fields() {
        let extra = r#"{"action":"a","actor_id":"b","entity":"c","approved_by":"principal"}"#;
        assert!(serde_json::from_str::<AuditEntry>(extra).is_err());
    }

    #[test]
    fn test_entry_summary() {
        let entry = AuditEntry::new("student.delete", "admin-1", "student").with_entity_id("7");
        assert_eq!(entry.summary(), "student.delete by admin-1 on student:7");
    }
}
