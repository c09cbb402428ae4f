//! Filesystem-backed object store with HMAC-signed read URLs
//!
//! Objects live under a root folder at their key path. Uploads are written to
//! a temporary file and renamed into place, so an object either exists whole
//! or not at all. The content type is kept in a `.meta.json` sidecar.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use futures::StreamExt;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{ByteStream, ClientError, ObjectStore, StoredObject};

type HmacSha256 = Hmac<Sha256>;

const META_SUFFIX: &str = ".meta.json";

#[derive(Debug, Serialize, Deserialize)]
struct ObjectMeta {
    content_type: String,
    size: u64,
}

/// Guess a content type from the key extension
pub fn guess_content_type(key: &str) -> &'static str {
    let lower = key.to_ascii_lowercase();
    if lower.ends_with(".wav") {
        "audio/wav"
    } else if lower.ends_with(".mp3") {
        "audio/mpeg"
    } else {
        "application/octet-stream"
    }
}

pub struct FsObjectStore {
    root: PathBuf,
    signing_secret: String,
    public_base_url: String,
}

impl FsObjectStore {
    pub fn new(root: PathBuf, signing_secret: String, public_base_url: &str) -> Self {
        Self {
            root,
            signing_secret,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Resolve a key to a path inside the root; rejects traversal
    fn path_for(&self, key: &str) -> Result<PathBuf, ClientError> {
        let valid = !key.is_empty()
            && !key.starts_with('/')
            && !key.contains('\\')
            && key.split('/').all(|part| !part.is_empty() && part != "." && part != "..")
            && !key.ends_with(META_SUFFIX);
        if !valid {
            return Err(ClientError::Fatal(format!("Invalid object key '{}'", key)));
        }
        Ok(self.root.join(key))
    }

    fn meta_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(META_SUFFIX);
        PathBuf::from(name)
    }

    fn mac(&self, key: &str, expires: i64) -> Result<HmacSha256, ClientError> {
        let mut mac = HmacSha256::new_from_slice(self.signing_secret.as_bytes())
            .map_err(|e| ClientError::Fatal(format!("Signing key error: {}", e)))?;
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    async fn write_stream(path: &Path, mut stream: ByteStream) -> Result<u64, ClientError> {
        let mut file = tokio::fs::File::create(path).await.map_err(io_error)?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(io_error)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_error)?;
        file.sync_all().await.map_err(io_error)?;
        Ok(written)
    }
}

fn io_error(err: std::io::Error) -> ClientError {
    ClientError::Transient(format!("Storage IO error: {}", err))
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn exists(&self, key: &str) -> Result<bool, ClientError> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path).await.map_err(io_error)
    }

    async fn put_stream(&self, key: &str, content_type: &str, stream: ByteStream) -> Result<u64, ClientError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        let temp_path = path.with_extension(format!("part-{}", Uuid::new_v4()));
        let size = match Self::write_stream(&temp_path, stream).await {
            Ok(size) => size,
            Err(err) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(err);
            }
        };

        let meta = serde_json::to_vec(&ObjectMeta {
            content_type: content_type.to_string(),
            size,
        })
        .map_err(|e| ClientError::Fatal(e.to_string()))?;
        tokio::fs::write(Self::meta_path(&path), meta).await.map_err(io_error)?;
        tokio::fs::rename(&temp_path, &path).await.map_err(io_error)?;

        tracing::debug!(key, size, content_type, "Stored object");
        Ok(size)
    }

    async fn get(&self, key: &str) -> Result<StoredObject, ClientError> {
        let path = self.path_for(key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ClientError::NotFound(format!("Object '{}'", key)));
            }
            Err(err) => return Err(io_error(err)),
        };

        let content_type = match tokio::fs::read(Self::meta_path(&path)).await {
            Ok(raw) => serde_json::from_slice::<ObjectMeta>(&raw)
                .map(|m| m.content_type)
                .unwrap_or_else(|_| guess_content_type(key).to_string()),
            Err(_) => guess_content_type(key).to_string(),
        };

        Ok(StoredObject {
            bytes: Bytes::from(bytes),
            content_type,
        })
    }

    fn signed_read_url(&self, key: &str, ttl: Duration) -> Result<String, ClientError> {
        self.path_for(key)?;
        let expires = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        let signature = URL_SAFE_NO_PAD.encode(self.mac(key, expires)?.finalize().into_bytes());
        Ok(format!(
            "{}/media/{}?expires={}&signature={}",
            self.public_base_url, key, expires, signature
        ))
    }

    fn verify_read_url(&self, key: &str, expires: i64, signature: &str) -> Result<(), ClientError> {
        if expires < chrono::Utc::now().timestamp() {
            return Err(ClientError::Fatal("Signed URL expired".into()));
        }
        let provided = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| ClientError::Fatal("Invalid signature encoding".into()))?;
        self.mac(key, expires)?
            .verify_slice(&provided)
            .map_err(|_| ClientError::Fatal("Invalid signature".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FsObjectStore {
        FsObjectStore::new(dir.path().to_path_buf(), "secret".into(), "https://calls.example.com/")
    }

    fn byte_stream(chunks: Vec<&'static [u8]>) -> ByteStream {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c)))).boxed()
    }

    #[tokio::test]
    async fn put_then_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert!(!store.exists("calls/CA1.mp3").await.unwrap());
        let size = store
            .put_stream("calls/CA1.mp3", "audio/mpeg", byte_stream(vec![b"ID3", b"data"]))
            .await
            .unwrap();
        assert_eq!(size, 7);
        assert!(store.exists("calls/CA1.mp3").await.unwrap());

        let object = store.get("calls/CA1.mp3").await.unwrap();
        assert_eq!(&object.bytes[..], b"ID3data");
        assert_eq!(object.content_type, "audio/mpeg");
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_object() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let failing: ByteStream = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(ClientError::Transient("reset".into())),
        ])
        .boxed();

        assert!(store.put_stream("calls/CA2.wav", "audio/wav", failing).await.is_err());
        assert!(!store.exists("calls/CA2.wav").await.unwrap());
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.exists("../etc/passwd").await.is_err());
        assert!(store.exists("/abs").await.is_err());
        assert!(store.exists("calls//x").await.is_err());
    }

    #[test]
    fn signed_url_verifies_and_detects_tampering() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let url = store.signed_read_url("calls/CA1.mp3", Duration::from_secs(60)).unwrap();
        assert!(url.starts_with("https://calls.example.com/media/calls/CA1.mp3?expires="));

        let query = url.split('?').nth(1).unwrap();
        let mut expires = 0i64;
        let mut signature = String::new();
        for pair in query.split('&') {
            let (k, v) = pair.split_once('=').unwrap();
            match k {
                "expires" => expires = v.parse().unwrap(),
                "signature" => signature = v.to_string(),
                _ => {}
            }
        }

        assert!(store.verify_read_url("calls/CA1.mp3", expires, &signature).is_ok());
        assert!(store.verify_read_url("calls/CA9.mp3", expires, &signature).is_err());
        assert!(store.verify_read_url("calls/CA1.mp3", expires + 1, &signature).is_err());
        assert!(store.verify_read_url("calls/CA1.mp3", 1, &signature).is_err());
    }

    #[test]
    fn content_type_guess() {
        assert_eq!(guess_content_type("calls/a.WAV"), "audio/wav");
        assert_eq!(guess_content_type("calls/a.mp3"), "audio/mpeg");
    }
}
