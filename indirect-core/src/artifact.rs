//! Resolved artifacts and their correlation metadata.
//!
//! An [`Artifact`] is the opaque payload a backend returns, plus the metadata
//! the resolution layer needs: the correlation token shared by everything
//! derived from one compilation, the content version pin, and expiry.
//!
//! # Design
//!
//! The correlation token and version pin are write-once. Once stamped, a
//! different value is refused with a validation error, so a cached artifact
//! can never be silently re-associated with another compilation.

use crate::{
    ArtifactKind, HierarchicalRecord, IndirectError, IndirectResult, Timestamp, ValidationError,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// CORRELATION TOKEN
// ============================================================================

/// Identifier tying a compiled artifact to everything derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    /// Generate a fresh, timestamp-sortable token.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for CorrelationToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

// ============================================================================
// PAYLOAD
// ============================================================================

/// Opaque artifact body.
///
/// Text formats carry it as base64, binary formats as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&BASE64.encode(&self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let encoded = String::deserialize(deserializer)?;
            BASE64
                .decode(encoded.as_bytes())
                .map(Payload)
                .map_err(serde::de::Error::custom)
        } else {
            deserializer.deserialize_byte_buf(PayloadVisitor)
        }
    }
}

struct PayloadVisitor;

impl<'de> serde::de::Visitor<'de> for PayloadVisitor {
    type Value = Payload;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a byte buffer")
    }

    fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Payload, E> {
        Ok(Payload(v.to_vec()))
    }

    fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Payload, E> {
        Ok(Payload(v))
    }

    fn visit_seq<A: serde::de::SeqAccess<'de>>(self, mut seq: A) -> Result<Payload, A::Error> {
        let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(byte) = seq.next_element::<u8>()? {
            bytes.push(byte);
        }
        Ok(Payload(bytes))
    }
}

// ============================================================================
// ARTIFACT
// ============================================================================

/// A resolved domain object with its correlation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    kind: ArtifactKind,
    key: String,
    #[serde(default)]
    environment: Option<String>,
    payload: Payload,
    #[serde(default)]
    correlation_token: Option<CorrelationToken>,
    #[serde(default)]
    version_pin: Option<String>,
    #[serde(default)]
    content_refs: Vec<String>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    tags: BTreeSet<String>,
    resolved_at: Timestamp,
    #[serde(default)]
    expires_at: Option<Timestamp>,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, key: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            kind,
            key: key.into(),
            environment: None,
            payload: payload.into(),
            correlation_token: None,
            version_pin: None,
            content_refs: Vec::new(),
            attributes: BTreeMap::new(),
            tags: BTreeSet::new(),
            resolved_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Default object answered by a backend that resolves nothing.
    pub fn empty(kind: ArtifactKind, key: impl Into<String>) -> Self {
        Self::new(kind, key, Payload::default())
    }

    /// Build a hierarchical artifact whose payload is the JSON form of `record`.
    pub fn from_record(
        kind: ArtifactKind,
        key: impl Into<String>,
        record: &HierarchicalRecord,
    ) -> IndirectResult<Self> {
        let payload = serde_json::to_vec(record).map_err(|e| crate::CodecError::Encode {
            format: "json".to_string(),
            reason: e.to_string(),
        })?;
        let mut artifact = Self::new(kind, key, payload);
        artifact.environment = record.environment.clone();
        Ok(artifact)
    }

    /// Decode a payload written by [`Artifact::from_record`].
    pub fn to_record(&self) -> IndirectResult<HierarchicalRecord> {
        serde_json::from_slice(self.payload.as_bytes()).map_err(|e| {
            IndirectError::from(crate::CodecError::Decode {
                format: "json".to_string(),
                reason: e.to_string(),
            })
        })
    }

    // ------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_content_ref(mut self, path: impl Into<String>) -> Self {
        self.content_refs.push(path.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_resolved_at(mut self, at: Timestamp) -> Self {
        self.resolved_at = at;
        self
    }

    pub fn with_expires_at(mut self, at: Timestamp) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn with_correlation_token(mut self, token: CorrelationToken) -> IndirectResult<Self> {
        self.stamp_token(token)?;
        Ok(self)
    }

    pub fn with_version_pin(mut self, pin: impl Into<String>) -> IndirectResult<Self> {
        self.pin_version(pin)?;
        Ok(self)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn correlation_token(&self) -> Option<&CorrelationToken> {
        self.correlation_token.as_ref()
    }

    pub fn version_pin(&self) -> Option<&str> {
        self.version_pin.as_deref()
    }

    pub fn content_refs(&self) -> &[String] {
        &self.content_refs
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn resolved_at(&self) -> Timestamp {
        self.resolved_at
    }

    pub fn expires_at(&self) -> Option<Timestamp> {
        self.expires_at
    }

    /// Label used in log lines, e.g. `catalog/web1`.
    pub fn description(&self) -> String {
        format!("{}/{}", self.kind, self.key)
    }

    // ------------------------------------------------------------------
    // Write-once metadata
    // ------------------------------------------------------------------

    /// Attach a correlation token. Re-stamping the same token is a no-op.
    pub fn stamp_token(&mut self, token: CorrelationToken) -> IndirectResult<()> {
        match &self.correlation_token {
            Some(existing) if *existing == token => Ok(()),
            Some(existing) => Err(ValidationError::TokenAlreadyStamped {
                existing: existing.to_string(),
                attempted: token.to_string(),
            }
            .into()),
            None => {
                self.correlation_token = Some(token);
                Ok(())
            }
        }
    }

    /// Pin the content-store revision. Re-pinning the same revision is a no-op.
    pub fn pin_version(&mut self, pin: impl Into<String>) -> IndirectResult<()> {
        let pin = pin.into();
        match &self.version_pin {
            Some(existing) if *existing == pin => Ok(()),
            Some(existing) => Err(ValidationError::VersionAlreadyPinned {
                existing: existing.clone(),
                attempted: pin,
            }
            .into()),
            None => {
                self.version_pin = Some(pin);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Expiry
    // ------------------------------------------------------------------

    pub fn set_expires_at(&mut self, at: Timestamp) {
        self.expires_at = Some(at);
    }

    /// Set an expiry `ttl` from now unless one is already present.
    ///
    /// Measured from the current time, not `resolved_at`: a backend may hand
    /// back an artifact stored long ago.
    pub fn ensure_expiry(&mut self, ttl: Duration) {
        if self.expires_at.is_none() {
            let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
            self.expires_at = Utc::now().checked_add_signed(ttl);
        }
    }

    /// Force the artifact to read as expired.
    pub fn mark_expired(&mut self) {
        self.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Artifact {
        Artifact::new(ArtifactKind::Catalog, "web1", "compiled body")
            .with_environment("production")
            .with_content_ref("modules/ntp/files/ntp.conf")
            .with_attribute("code_id", "abc123")
            .with_tag("ntp")
    }

    #[test]
    fn test_stamp_token_is_write_once() {
        let mut artifact = sample();
        let token = CorrelationToken::new("t-1");
        artifact.stamp_token(token.clone()).unwrap();
        artifact.stamp_token(token.clone()).unwrap();

        let err = artifact
            .stamp_token(CorrelationToken::new("t-2"))
            .unwrap_err();
        assert!(matches!(
            err,
            IndirectError::Validation(ValidationError::TokenAlreadyStamped { .. })
        ));
        assert_eq!(artifact.correlation_token(), Some(&token));
    }

    #[test]
    fn test_pin_version_is_write_once() {
        let mut artifact = sample();
        artifact.pin_version("rev-1").unwrap();
        assert!(artifact.pin_version("rev-2").is_err());
        assert_eq!(artifact.version_pin(), Some("rev-1"));
    }

    #[test]
    fn test_ensure_expiry_keeps_existing() {
        let at = Utc::now() + chrono::Duration::hours(2);
        let mut artifact = sample().with_expires_at(at);
        artifact.ensure_expiry(Duration::from_secs(60));
        assert_eq!(artifact.expires_at(), Some(at));

        let mut fresh = sample();
        let before = Utc::now();
        fresh.ensure_expiry(Duration::from_secs(60));
        let expires_at = fresh.expires_at().expect("expiry set");
        assert!(expires_at >= before + chrono::Duration::seconds(60));
        assert!(!fresh.is_expired());
    }

    #[test]
    fn test_ensure_expiry_counts_from_now_for_old_artifacts() {
        let mut stored = sample().with_resolved_at(Utc::now() - chrono::Duration::hours(2));
        stored.ensure_expiry(Duration::from_secs(1800));
        assert!(!stored.is_expired());
        let remaining = stored.expires_at().expect("expiry set") - Utc::now();
        assert!(remaining > chrono::Duration::minutes(29));
    }

    #[test]
    fn test_mark_expired() {
        let mut artifact = sample();
        assert!(!artifact.is_expired());
        artifact.mark_expired();
        assert!(artifact.is_expired());
    }

    #[test]
    fn test_json_roundtrip_uses_base64_payload() {
        let artifact = sample()
            .with_correlation_token(CorrelationToken::new("tok"))
            .unwrap();
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["payload"], BASE64.encode("compiled body"));
        let back: Artifact = serde_json::from_value(json).unwrap();
        assert_eq!(back, artifact);
    }

    #[test]
    fn test_msgpack_roundtrip_uses_raw_bytes() {
        let artifact = sample();
        let bytes = rmp_serde::to_vec_named(&artifact).unwrap();
        let back: Artifact = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(back, artifact);
    }

    #[test]
    fn test_record_payload_roundtrip() {
        let record = HierarchicalRecord::new("web1")
            .with_class("ntp")
            .with_environment("staging");
        let artifact = Artifact::from_record(ArtifactKind::Node, "web1", &record).unwrap();
        assert_eq!(artifact.environment(), Some("staging"));
        assert_eq!(artifact.to_record().unwrap(), record);
    }

    #[test]
    fn test_description() {
        assert_eq!(sample().description(), "catalog/web1");
    }
}
