//! Wire and storage codecs.
//!
//! Three formats are supported: MessagePack (structured binary), JSON and
//! YAML. MessagePack is preferred on the wire; YAML is accepted in
//! responses but never requested.

use indirect_core::{CodecError, IndirectResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    MessagePack,
    Json,
    Yaml,
}

impl Format {
    /// Formats offered in `Accept`, most preferred first.
    pub const ACCEPTED: [Format; 2] = [Format::MessagePack, Format::Json];

    pub fn name(&self) -> &'static str {
        match self {
            Format::MessagePack => "msgpack",
            Format::Json => "json",
            Format::Yaml => "yaml",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Format::MessagePack => "application/x-msgpack",
            Format::Json => "application/json",
            Format::Yaml => "application/yaml",
        }
    }

    /// File extension for on-disk storage.
    pub fn extension(&self) -> &'static str {
        match self {
            Format::MessagePack => "msgpack",
            Format::Json => "json",
            Format::Yaml => "yaml",
        }
    }

    /// Match a `Content-Type` header value, ignoring parameters and case.
    pub fn from_content_type(content_type: &str) -> IndirectResult<Format> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/x-msgpack" | "application/msgpack" | "application/vnd.msgpack" => {
                Ok(Format::MessagePack)
            }
            "application/json" => Ok(Format::Json),
            "application/yaml" | "application/x-yaml" | "text/yaml" | "text/x-yaml" => {
                Ok(Format::Yaml)
            }
            _ => Err(CodecError::UnsupportedContentType {
                content_type: content_type.to_string(),
            }
            .into()),
        }
    }

    /// `Accept` header value listing [`Format::ACCEPTED`] in order.
    pub fn accept_header() -> String {
        Self::ACCEPTED
            .iter()
            .map(|f| f.content_type())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> IndirectResult<Vec<u8>> {
        let result = match self {
            Format::MessagePack => rmp_serde::to_vec_named(value).map_err(|e| e.to_string()),
            Format::Json => serde_json::to_vec(value).map_err(|e| e.to_string()),
            Format::Yaml => serde_yaml::to_string(value)
                .map(String::into_bytes)
                .map_err(|e| e.to_string()),
        };
        result.map_err(|reason| {
            CodecError::Encode {
                format: self.name().to_string(),
                reason,
            }
            .into()
        })
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> IndirectResult<T> {
        let result = match self {
            Format::MessagePack => rmp_serde::from_slice(bytes).map_err(|e| e.to_string()),
            Format::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
            Format::Yaml => serde_yaml::from_slice(bytes).map_err(|e| e.to_string()),
        };
        result.map_err(|reason| {
            CodecError::Decode {
                format: self.name().to_string(),
                reason,
            }
            .into()
        })
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use indirect_core::{Artifact, ArtifactKind};
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Payload bytes survive every codec untouched.
        #[test]
        fn prop_payload_survives_codecs(
            payload in prop::collection::vec(any::<u8>(), 0..256),
            key in "[a-z0-9.-]{1,32}",
        ) {
            let artifact = Artifact::new(ArtifactKind::Facts, key, payload);
            for format in [Format::MessagePack, Format::Json, Format::Yaml] {
                let bytes = format.encode(&artifact).unwrap();
                let back: Artifact = format.decode(&bytes).unwrap();
                prop_assert_eq!(&back, &artifact);
            }
        }
    }
}
