//! Checks run on a dataset before anything is written.

use std::fmt;

use super::DataFormat;
use super::Dataset;
use super::UnknownFormat;

pub const MAX_COMMIT_TITLE_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingStructure,
    MissingFormat,
    UnknownFormat(UnknownFormat),
    MissingSchema,
    MissingCommit,
    CommitTitleTooLong(usize),
    InvalidName(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingStructure => write!(f, "structure is required"),
            ValidationError::MissingFormat => write!(f, "structure.format is required"),
            ValidationError::UnknownFormat(e) => write!(f, "structure.format: {e}"),
            ValidationError::MissingSchema => write!(f, "structure.schema is required"),
            ValidationError::MissingCommit => write!(f, "commit is required"),
            ValidationError::CommitTitleTooLong(len) => write!(
                f,
                "commit title is {len} characters, at most {MAX_COMMIT_TITLE_LEN} are allowed"
            ),
            ValidationError::InvalidName(name) => write!(
                f,
                "invalid dataset name {name:?}: names must start with a letter and contain only letters, digits, '_' or '-'"
            ),
        }
    }
}

impl std::error::Error for ValidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ValidationError::UnknownFormat(e) => Some(e),
            _ => None,
        }
    }
}

impl From<UnknownFormat> for ValidationError {
    fn from(value: UnknownFormat) -> Self {
        ValidationError::UnknownFormat(value)
    }
}

/// Validates the descriptor fields a version needs and returns its body format.
pub fn dataset(ds: &Dataset) -> Result<DataFormat, ValidationError> {
    let structure = ds
        .structure
        .as_ref()
        .ok_or(ValidationError::MissingStructure)?;
    let format = structure
        .data_format()?
        .ok_or(ValidationError::MissingFormat)?;
    if structure.schema.is_none() {
        return Err(ValidationError::MissingSchema);
    }

    let commit = ds.commit.as_ref().ok_or(ValidationError::MissingCommit)?;
    let title_len = commit.title.chars().count();
    if title_len > MAX_COMMIT_TITLE_LEN {
        return Err(ValidationError::CommitTitleTooLong(title_len));
    }

    Ok(format)
}

/// Dataset and owner names start with an ASCII letter followed by ASCII
/// alphanumerics, `_` or `-`.
pub fn ref_name(name: &str) -> Result<(), ValidationError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            first.is_ascii_alphabetic()
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidName(name.to_owned()))
    }
}
