use crate::error::{Result, SyncError};
use crate::session::Session;
use clap::ValueEnum;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::Sha1;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::debug;

const READ_CHUNK: usize = 16384;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha1,
}

impl HashAlgorithm {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "MD5" => Some(Self::Md5),
            "SHA1" | "SHA-1" => Some(Self::Sha1),
            _ => None,
        }
    }
}

enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
}

impl Hasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Self::Md5(Md5::new()),
            HashAlgorithm::Sha1 => Self::Sha1(Sha1::new()),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Md5(h) => h.update(bytes),
            Self::Sha1(h) => h.update(bytes),
        }
    }

    fn hex_digest(self) -> String {
        match self {
            Self::Md5(h) => format!("{:x}", h.finalize()),
            Self::Sha1(h) => format!("{:x}", h.finalize()),
        }
    }
}

/// Hex digest of the full contents of `path`, or `None` if the file does not exist.
pub async fn file_hash(path: &Path, algorithm: HashAlgorithm) -> Result<Option<String>> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SyncError::io(path, e)),
    };

    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0_u8; READ_CHUNK];
    loop {
        let n = file.read(&mut buffer).await.map_err(|e| SyncError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(Some(hasher.hex_digest()))
}

/// The side document published next to a granule stating its expected hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumDescriptor {
    pub checksum: String,
    pub algorithm: Option<HashAlgorithm>,
}

impl ChecksumDescriptor {
    pub async fn fetch(session: &Session, url: &str) -> Result<Self> {
        let fetch_error = |source| SyncError::ChecksumFetch {
            url: url.to_string(),
            source,
        };
        let content = session
            .get(url)
            .await
            .map_err(fetch_error)?
            .text()
            .await
            .map_err(|e| fetch_error(e.into()))?;
        Self::parse(&content)
    }

    /// Accepts the XML `DataFileContainer` document or an equivalent JSON object.
    pub fn parse(content: &str) -> Result<Self> {
        if content.trim_start().starts_with('{') {
            return Self::parse_json(content);
        }

        let doc = roxmltree::Document::parse(content).map_err(|e| SyncError::parse("checksum descriptor", e))?;
        let container = doc
            .descendants()
            .find(|n| n.has_tag_name("DataFileContainer"))
            .ok_or_else(|| SyncError::parse("checksum descriptor", "missing DataFileContainer"))?;

        let child_text = |tag: &str| {
            container
                .children()
                .find(|n| n.has_tag_name(tag))
                .and_then(|n| n.text())
                .map(|t| t.trim().to_string())
        };

        let checksum = child_text("Checksum")
            .filter(|c| !c.is_empty())
            .ok_or_else(|| SyncError::parse("checksum descriptor", "missing Checksum"))?;
        let algorithm = child_text("ChecksumType").and_then(|t| HashAlgorithm::from_name(&t));

        Ok(Self { checksum, algorithm })
    }

    fn parse_json(content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content).map_err(|e| SyncError::parse("checksum descriptor", e))?;
        let container = value.get("DataFileContainer").unwrap_or(&value);

        let field = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| container.get(*k))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let checksum = field(&["Checksum", "checksum"])
            .ok_or_else(|| SyncError::parse("checksum descriptor", "missing Checksum"))?;
        let algorithm = field(&["ChecksumType", "checksum_type"]).and_then(|t| HashAlgorithm::from_name(&t));

        Ok(Self { checksum, algorithm })
    }
}

pub fn descriptor_url(data_url: &str) -> String {
    format!("{data_url}.xml")
}

/// True iff `local` exists and its hash equals the one declared by the remote
/// descriptor. A missing local file is a mismatch without any remote request.
pub async fn compare_checksums(
    session: &Session,
    descriptor_url: &str,
    local: &Path,
    default_algorithm: HashAlgorithm,
) -> Result<bool> {
    if !tokio::fs::try_exists(local).await.unwrap_or(false) {
        debug!(path = %local.display(), "Local file is absent");
        return Ok(false);
    }

    let descriptor = ChecksumDescriptor::fetch(session, descriptor_url).await?;
    let algorithm = descriptor.algorithm.unwrap_or(default_algorithm);

    let local_hash = file_hash(local, algorithm).await?;
    let matches = local_hash.is_some_and(|h| h.eq_ignore_ascii_case(&descriptor.checksum));
    debug!(path = %local.display(), ?algorithm, matches, "Compared checksums");
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";
    const HELLO_SHA1: &str = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";

    fn descriptor_xml(checksum: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<GranuleMetaDataFile>
  <GranuleURMetaData>
    <DataFiles>
      <DataFileContainer>
        <DistributedFileName>GEDI02_B_2019108002011_O01959_T03909_02_001_01.h5</DistributedFileName>
        <FileSize>5</FileSize>
        <ChecksumType>MD5</ChecksumType>
        <Checksum>{checksum}</Checksum>
      </DataFileContainer>
    </DataFiles>
  </GranuleURMetaData>
</GranuleMetaDataFile>"#
        )
    }

    #[test]
    fn test_parse_xml_descriptor() {
        let descriptor = ChecksumDescriptor::parse(&descriptor_xml(HELLO_MD5)).unwrap();
        assert_eq!(descriptor.checksum, HELLO_MD5);
        assert_eq!(descriptor.algorithm, Some(HashAlgorithm::Md5));
    }

    #[test]
    fn test_parse_json_descriptor() {
        let content = format!(r#"{{"Checksum": "{HELLO_SHA1}", "ChecksumType": "SHA-1"}}"#);
        let descriptor = ChecksumDescriptor::parse(&content).unwrap();
        assert_eq!(descriptor.checksum, HELLO_SHA1);
        assert_eq!(descriptor.algorithm, Some(HashAlgorithm::Sha1));
    }

    #[test]
    fn test_parse_descriptor_without_checksum() {
        assert!(ChecksumDescriptor::parse("<DataFileContainer></DataFileContainer>").is_err());
        assert!(ChecksumDescriptor::parse("<Other/>").is_err());
    }

    #[tokio::test]
    async fn test_file_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.h5");
        std::fs::write(&path, b"hello").unwrap();

        assert_eq!(file_hash(&path, HashAlgorithm::Md5).await.unwrap().unwrap(), HELLO_MD5);
        assert_eq!(file_hash(&path, HashAlgorithm::Sha1).await.unwrap().unwrap(), HELLO_SHA1);
        assert_eq!(
            file_hash(&dir.path().join("missing.h5"), HashAlgorithm::Md5).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_compare_checksums() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/granule.h5.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(descriptor_xml(
                &HELLO_MD5.to_uppercase(),
            )))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("granule.h5");
        let url = descriptor_url(&format!("{}/granule.h5", server.uri()));
        let session = Session::anonymous().unwrap();

        std::fs::write(&local, b"hello").unwrap();
        assert_eq!(
            compare_checksums(&session, &url, &local, HashAlgorithm::Sha1).await.unwrap(),
            true
        );

        std::fs::write(&local, b"stale").unwrap();
        assert_eq!(
            compare_checksums(&session, &url, &local, HashAlgorithm::Md5).await.unwrap(),
            false
        );
    }

    #[tokio::test]
    async fn test_missing_local_file_skips_descriptor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let session = Session::anonymous().unwrap();
        let url = format!("{}/granule.h5.xml", server.uri());
        let matches = compare_checksums(&session, &url, &dir.path().join("granule.h5"), HashAlgorithm::Md5)
            .await
            .unwrap();
        assert_eq!(matches, false);
    }

    #[tokio::test]
    async fn test_descriptor_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("granule.h5");
        std::fs::write(&local, b"hello").unwrap();

        let session = Session::anonymous().unwrap();
        let url = format!("{}/granule.h5.xml", server.uri());
        let result = compare_checksums(&session, &url, &local, HashAlgorithm::Md5).await;
        assert!(matches!(result, Err(SyncError::ChecksumFetch { .. })));
    }
}
