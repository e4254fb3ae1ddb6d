//! Dataset descriptors.
//!
//! A [`Dataset`] is the immutable record of one version: metadata, the
//! structure of its body, a commit descriptor and the content keys linking it
//! to its body and to the version it replaces. Serialized as JSON it becomes
//! a blob of its own, so the key of that blob identifies the version.
//!
//! [`DatasetPod`] is the unresolved input form that still carries the body
//! source (inline bytes, a URL or a local path) instead of a body key.

pub mod validate;

use std::fmt;
use std::str::FromStr;

use hifitime::Epoch;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::key::ContentKey;
use crate::timestamp;

/// The closed set of body encodings a dataset can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Csv,
    Json,
    Cbor,
    Xlsx,
}

impl DataFormat {
    pub fn extension(self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Json => "json",
            DataFormat::Cbor => "cbor",
            DataFormat::Xlsx => "xlsx",
        }
    }

    /// Maps a file extension to the format its contents end up stored as.
    /// YAML is accepted on input and stored as JSON.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(DataFormat::Csv),
            "json" | "yaml" | "yml" => Some(DataFormat::Json),
            "cbor" => Some(DataFormat::Cbor),
            "xlsx" => Some(DataFormat::Xlsx),
            _ => None,
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFormat(pub String);

impl fmt::Display for UnknownFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown data format: {:?}", self.0)
    }
}

impl std::error::Error for UnknownFormat {}

impl FromStr for DataFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(DataFormat::Csv),
            "json" => Ok(DataFormat::Json),
            "cbor" => Ok(DataFormat::Cbor),
            "xlsx" => Ok(DataFormat::Xlsx),
            _ => Err(UnknownFormat(s.to_owned())),
        }
    }
}

/// Human facing description of a dataset. Unknown fields are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Meta {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }
}

/// Shape of the body: its encoding and a JSON schema describing it.
///
/// `format` stays a string here so descriptors from other writers decode even
/// when they name a format this crate rejects; validation resolves it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    #[serde(default)]
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

impl Structure {
    pub fn new(format: DataFormat, schema: Value) -> Self {
        Self {
            format: format.to_string(),
            format_config: None,
            schema: Some(schema),
        }
    }

    /// Resolves the declared format, `None` when nothing is declared.
    pub fn data_format(&self) -> Result<Option<DataFormat>, UnknownFormat> {
        if self.format.is_empty() {
            return Ok(None);
        }
        self.format.parse().map(Some)
    }
}

/// Schema accepting any array body.
pub fn base_schema_array() -> Value {
    serde_json::json!({ "type": "array" })
}

/// Schema accepting any object body.
pub fn base_schema_object() -> Value {
    serde_json::json!({ "type": "object" })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        default,
        with = "timestamp::nanos::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<Epoch>,
}

impl Commit {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: None,
            timestamp: None,
        }
    }
}

/// One immutable dataset version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<Structure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<Commit>,
    /// Key of the version this one replaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<ContentKey>,
    /// Key of the stored body. Set by the repository when the version is written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_path: Option<ContentKey>,
}

impl Dataset {
    pub fn new(structure: Structure, commit: Commit) -> Self {
        Self {
            meta: None,
            structure: Some(structure),
            commit: Some(commit),
            previous_path: None,
            body_path: None,
        }
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_previous(mut self, previous: ContentKey) -> Self {
        self.previous_path = Some(previous);
        self
    }
}

/// Unresolved dataset as submitted by a caller.
///
/// At most one body source is used: `body_bytes` wins over `body_path`. A
/// `body_path` starting with `http://` or `https://` is fetched, anything else
/// is read from the local filesystem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetPod {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<Structure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<Commit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<ContentKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_bytes: Option<Vec<u8>>,
}

impl DatasetPod {
    /// The descriptor part of the pod, without any body source.
    pub fn dataset(&self) -> Dataset {
        Dataset {
            meta: self.meta.clone(),
            structure: self.structure.clone(),
            commit: self.commit.clone(),
            previous_path: self.previous_path,
            body_path: None,
        }
    }

    /// The format declared in `structure.format`, if any.
    pub fn declared_format(&self) -> Result<Option<DataFormat>, UnknownFormat> {
        match &self.structure {
            Some(structure) => structure.data_format(),
            None => Ok(None),
        }
    }
}
