//! Body resolution.
//!
//! A [`DatasetPod`] names its body in one of three ways: inline bytes, a URL
//! or a path on the local filesystem. [`BodyResolver`] turns whichever is
//! present into a [`BodyFile`], a named in-memory byte source ready to be
//! written to a blob store.

use std::fmt;
use std::io;
use std::io::Cursor;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;
use tracing::warn;

use crate::config::Config;
use crate::dataset::DataFormat;
use crate::dataset::DatasetPod;
use crate::dataset::UnknownFormat;

/// A named, readable body. Reading drains the buffered bytes; `close`
/// releases them.
#[derive(Debug)]
pub struct BodyFile {
    name: String,
    len: usize,
    reader: Option<Cursor<Bytes>>,
}

impl BodyFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            name: name.into(),
            len: bytes.len(),
            reader: Some(Cursor::new(bytes)),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.name
    }

    /// Total length of the body in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Format implied by the file name extension.
    pub fn format(&self) -> Option<DataFormat> {
        Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(DataFormat::from_extension)
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }

    pub fn close(&mut self) -> io::Result<()> {
        match self.reader.take() {
            Some(_) => Ok(()),
            None => Err(closed()),
        }
    }

    /// Returns the unread remainder of the body and closes it.
    pub fn into_bytes(mut self) -> io::Result<Bytes> {
        let mut cursor = self.reader.take().ok_or_else(closed)?;
        let pos = usize::try_from(cursor.position()).unwrap_or(usize::MAX);
        let bytes = std::mem::take(cursor.get_mut());
        Ok(bytes.slice(pos.min(bytes.len())..))
    }
}

impl Read for BodyFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.reader {
            Some(reader) => reader.read(buf),
            None => Err(closed()),
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "body file is closed")
}

#[derive(Debug)]
pub enum BodyError {
    /// Inline bytes without a declared format.
    FormatRequired,
    UnknownFormat(UnknownFormat),
    RemoteFetch { url: String, source: reqwest::Error },
    RemoteStatus { url: String, status: u16 },
    /// No body source was given, or a local path could not be opened.
    BodyNotFound { path: Option<PathBuf>, source: Option<io::Error> },
    BodyDecode { path: PathBuf, source: serde_yaml::Error },
    BodyTooLarge { len: u64, max: u64 },
    Read(io::Error),
}

impl BodyError {
    pub fn not_found() -> Self {
        BodyError::BodyNotFound {
            path: None,
            source: None,
        }
    }
}

impl fmt::Display for BodyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyError::FormatRequired => write!(
                f,
                "specifying bodyBytes requires format be specified in dataset.structure"
            ),
            BodyError::UnknownFormat(e) => write!(f, "{e}"),
            BodyError::RemoteFetch { source, .. } => write!(f, "fetching body url: {source}"),
            BodyError::RemoteStatus { status, .. } => {
                write!(f, "invalid status code fetching body url: {status}")
            }
            BodyError::BodyNotFound {
                path: Some(path),
                source: Some(source),
            } => write!(f, "reading body file: {}: {source}", path.display()),
            BodyError::BodyNotFound { .. } => write!(f, "not found"),
            BodyError::BodyDecode { source, .. } => {
                write!(f, "converting yaml body to json: {source}")
            }
            BodyError::BodyTooLarge { len, max } => {
                write!(f, "body is {len} bytes, larger than the {max} byte limit")
            }
            BodyError::Read(e) => write!(f, "reading body: {e}"),
        }
    }
}

impl std::error::Error for BodyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BodyError::UnknownFormat(e) => Some(e),
            BodyError::RemoteFetch { source, .. } => Some(source),
            BodyError::BodyNotFound {
                source: Some(source),
                ..
            } => Some(source),
            BodyError::BodyDecode { source, .. } => Some(source),
            BodyError::Read(e) => Some(e),
            _ => None,
        }
    }
}

impl From<UnknownFormat> for BodyError {
    fn from(value: UnknownFormat) -> Self {
        BodyError::UnknownFormat(value)
    }
}

/// Where a pod's body comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySource<'a> {
    Inline(&'a [u8]),
    Url(&'a str),
    LocalPath(&'a Path),
}

impl<'a> BodySource<'a> {
    /// Picks the body source of a pod. Inline bytes take precedence over
    /// `body_path`; an empty `body_path` counts as absent.
    pub fn from_pod(pod: &'a DatasetPod) -> Option<Self> {
        if let Some(bytes) = &pod.body_bytes {
            return Some(BodySource::Inline(bytes));
        }
        match pod.body_path.as_deref() {
            None | Some("") => None,
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                Some(BodySource::Url(url))
            }
            Some(path) => Some(BodySource::LocalPath(Path::new(path))),
        }
    }
}

/// Resolves pod bodies with a fetch timeout and an optional size limit.
#[derive(Debug, Clone)]
pub struct BodyResolver {
    fetch_timeout: Duration,
    max_body_bytes: Option<u64>,
}

impl Default for BodyResolver {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl BodyResolver {
    pub fn new(fetch_timeout: Duration, max_body_bytes: Option<u64>) -> Self {
        Self {
            fetch_timeout,
            max_body_bytes,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.fetch_timeout(), config.max_body_bytes)
    }

    pub fn resolve(&self, pod: &DatasetPod) -> Result<BodyFile, BodyError> {
        let declared = pod.declared_format()?;
        match BodySource::from_pod(pod) {
            Some(BodySource::Inline(bytes)) => self.inline(bytes, declared),
            Some(BodySource::Url(url)) => self.fetch(url, declared),
            Some(BodySource::LocalPath(path)) => self.read_local(path, declared),
            None => Err(BodyError::not_found()),
        }
    }

    fn inline(&self, bytes: &[u8], declared: Option<DataFormat>) -> Result<BodyFile, BodyError> {
        let format = declared.ok_or(BodyError::FormatRequired)?;
        self.check_len(bytes.len() as u64)?;
        Ok(BodyFile::new(
            format!("body.{}", format.extension()),
            Bytes::copy_from_slice(bytes),
        ))
    }

    fn fetch(&self, url: &str, declared: Option<DataFormat>) -> Result<BodyFile, BodyError> {
        let fetch_err = |source| BodyError::RemoteFetch {
            url: url.to_owned(),
            source,
        };
        let client = reqwest::blocking::Client::builder()
            .timeout(self.fetch_timeout)
            .build()
            .map_err(fetch_err)?;
        let response = client.get(url).send().map_err(fetch_err)?;

        let status = response.status();
        if !status.is_success() {
            warn!(url, status = status.as_u16(), "body fetch failed");
            return Err(BodyError::RemoteStatus {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }
        if let Some(len) = response.content_length() {
            self.check_len(len)?;
        }

        let segment = response
            .url()
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .map(str::to_owned);
        let bytes = response.bytes().map_err(fetch_err)?;
        self.check_len(bytes.len() as u64)?;

        let name = match segment {
            Some(segment) => segment,
            None => format!(
                "body.{}",
                declared.unwrap_or(DataFormat::Json).extension()
            ),
        };
        debug!(url, name = %name, len = bytes.len(), "fetched body");
        Ok(BodyFile::new(name, bytes))
    }

    fn read_local(&self, path: &Path, declared: Option<DataFormat>) -> Result<BodyFile, BodyError> {
        let not_found = |source| BodyError::BodyNotFound {
            path: Some(path.to_owned()),
            source: Some(source),
        };
        let mut file = std::fs::File::open(path).map_err(not_found)?;
        let len = file.metadata().map_err(BodyError::Read)?.len();
        self.check_len(len)?;
        let mut bytes = Vec::with_capacity(len as usize);
        file.read_to_end(&mut bytes).map_err(BodyError::Read)?;

        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("body");
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        if matches!(ext.as_deref(), Some("yaml" | "yml")) {
            let value: serde_json::Value =
                serde_yaml::from_slice(&bytes).map_err(|source| BodyError::BodyDecode {
                    path: path.to_owned(),
                    source,
                })?;
            let json = serde_json::to_vec(&value)
                .map_err(|e| BodyError::Read(io::Error::new(io::ErrorKind::InvalidData, e)))?;
            debug!(path = %path.display(), len = json.len(), "converted yaml body to json");
            return Ok(BodyFile::new(format!("{stem}.json"), json));
        }

        let name = match (declared, ext.as_deref().and_then(DataFormat::from_extension)) {
            (Some(declared), found) if found != Some(declared) => {
                format!("{stem}.{}", declared.extension())
            }
            _ => path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or(stem)
                .to_owned(),
        };
        Ok(BodyFile::new(name, bytes))
    }

    fn check_len(&self, len: u64) -> Result<(), BodyError> {
        match self.max_body_bytes {
            Some(max) if len > max => Err(BodyError::BodyTooLarge { len, max }),
            _ => Ok(()),
        }
    }
}

/// Resolves the body of `pod` with default settings.
pub fn dataset_pod_body_file(pod: &DatasetPod) -> Result<BodyFile, BodyError> {
    BodyResolver::default().resolve(pod)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_then_close() {
        let mut file = BodyFile::new("body.csv", &b"a,b\n1,2\n"[..]);
        assert_eq!(file.len(), 8);
        assert_eq!(file.format(), Some(DataFormat::Csv));
        let mut buf = String::new();
        file.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "a,b\n1,2\n");
        file.close().unwrap();
        assert!(file.is_closed());
        assert!(file.close().is_err());
        assert!(file.read(&mut [0u8; 4]).is_err());
    }

    #[test]
    fn into_bytes_returns_unread_tail() {
        let mut file = BodyFile::new("body.json", &b"[1,2,3]"[..]);
        let mut head = [0u8; 1];
        file.read_exact(&mut head).unwrap();
        assert_eq!(file.into_bytes().unwrap(), Bytes::from_static(b"1,2,3]"));
    }

    #[test]
    fn source_precedence() {
        let mut pod = DatasetPod {
            body_path: Some("https://example.com/data.csv".into()),
            ..DatasetPod::default()
        };
        assert!(matches!(BodySource::from_pod(&pod), Some(BodySource::Url(_))));
        pod.body_bytes = Some(b"[]".to_vec());
        assert!(matches!(BodySource::from_pod(&pod), Some(BodySource::Inline(_))));
        pod.body_bytes = None;
        pod.body_path = Some("data/cities.csv".into());
        assert!(matches!(BodySource::from_pod(&pod), Some(BodySource::LocalPath(_))));
        pod.body_path = Some(String::new());
        assert_eq!(BodySource::from_pod(&pod), None);
    }

    #[test]
    fn inline_without_format() {
        let pod = DatasetPod {
            body_bytes: Some(b"[]".to_vec()),
            ..DatasetPod::default()
        };
        let err = dataset_pod_body_file(&pod).unwrap_err();
        assert_eq!(
            err.to_string(),
            "specifying bodyBytes requires format be specified in dataset.structure"
        );
    }

    #[test]
    fn size_limit() {
        let resolver = BodyResolver::new(Duration::from_secs(1), Some(2));
        let pod = DatasetPod {
            structure: Some(crate::dataset::Structure::new(
                DataFormat::Json,
                crate::dataset::base_schema_array(),
            )),
            body_bytes: Some(b"[1]".to_vec()),
            ..DatasetPod::default()
        };
        assert!(matches!(
            resolver.resolve(&pod),
            Err(BodyError::BodyTooLarge { len: 3, max: 2 })
        ));
    }
}
