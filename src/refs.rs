//! Mutable naming layer: references from `(owner, name)` to the current
//! version of a dataset, and the append-only log of changes made to them.

use std::fmt;
use std::str::FromStr;

use hifitime::Epoch;
use serde::Deserialize;
use serde::Serialize;

use crate::dataset::validate;
use crate::dataset::validate::ValidationError;
use crate::key::ContentKey;
use crate::timestamp;

/// Identifies a reference. Rendered as `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RefName {
    pub owner: String,
    pub name: String,
}

impl RefName {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RefName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((owner, name)) = s.split_once('/') else {
            return Err(ValidationError::InvalidName(s.to_owned()));
        };
        validate::ref_name(owner)?;
        validate::ref_name(name)?;
        Ok(RefName::new(owner, name))
    }
}

/// The current binding of a name to a dataset version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRef {
    pub owner: String,
    pub name: String,
    pub path: ContentKey,
    #[serde(default)]
    pub published: bool,
    #[serde(with = "timestamp::nanos")]
    pub created: Epoch,
    #[serde(with = "timestamp::nanos")]
    pub updated: Epoch,
}

impl DatasetRef {
    /// A fresh, unpublished reference.
    pub fn new(name: &RefName, path: ContentKey) -> Self {
        let now = timestamp::now();
        Self {
            owner: name.owner.clone(),
            name: name.name.clone(),
            path,
            published: false,
            created: now,
            updated: now,
        }
    }

    pub fn ref_name(&self) -> RefName {
        RefName::new(self.owner.clone(), self.name.clone())
    }

    /// `owner/name`
    pub fn alias(&self) -> String {
        self.ref_name().to_string()
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.name, self.path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Updated,
    Pinned,
    Unpinned,
    Published,
    Unpublished,
    Renamed,
    Deleted,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::Created => "ds_created",
            EventType::Updated => "ds_updated",
            EventType::Pinned => "ds_pinned",
            EventType::Unpinned => "ds_unpinned",
            EventType::Published => "ds_published",
            EventType::Unpublished => "ds_unpublished",
            EventType::Renamed => "ds_renamed",
            EventType::Deleted => "ds_deleted",
        };
        f.write_str(s)
    }
}

/// Append-only record of a reference change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventType,
    #[serde(with = "timestamp::nanos")]
    pub timestamp: Epoch,
    pub reference: RefName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<ContentKey>,
    /// Previous name of a renamed reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<RefName>,
}

impl Event {
    pub fn new(kind: EventType, reference: RefName, path: Option<ContentKey>) -> Self {
        Self {
            kind,
            timestamp: timestamp::now(),
            reference,
            path,
            renamed_from: None,
        }
    }
}
