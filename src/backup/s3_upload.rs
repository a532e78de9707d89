// pgbackup-scheduler/src/backup/s3_upload.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use std::path::Path;
use tracing::info;

use crate::config::StorageDestination;
use crate::errors::UploadFailure;

/// "Store the bytes of this file at key K in bucket B."
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        destination: &StorageDestination,
        key: &str,
        file_path: &Path,
    ) -> Result<(), UploadFailure>;
}

/// Uploads a local artifact under `<prefix>/<file name>` and returns the key.
///
/// The file's existence and the credentials are checked before the store is
/// touched. Re-uploading the same key overwrites it.
pub async fn upload_artifact(
    store: &dyn ObjectStore,
    destination: &StorageDestination,
    file_path: &Path,
) -> Result<String, UploadFailure> {
    if !file_path.is_file() {
        return Err(UploadFailure::FileNotFound(file_path.to_path_buf()));
    }
    if destination.access_key.is_empty() || destination.secret_key.is_empty() {
        return Err(UploadFailure::MissingCredentials);
    }
    let file_name = file_path
        .file_name()
        .ok_or_else(|| UploadFailure::FileNotFound(file_path.to_path_buf()))?
        .to_string_lossy();
    let key = destination.object_key(&file_name);

    store.put_object(destination, &key, file_path).await?;
    Ok(key)
}

/// S3 (or S3-compatible) store with static credentials.
#[derive(Debug, Default, Clone, Copy)]
pub struct S3Store;

impl S3Store {
    async fn client(destination: &StorageDestination) -> s3::Client {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(destination.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                destination.access_key.expose(),
                destination.secret_key.expose(),
                None,     // session_token
                None,     // expiry
                "Static", // provider_name
            ));
        if let Some(endpoint) = &destination.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        s3::Client::new(&sdk_config)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_object(
        &self,
        destination: &StorageDestination,
        key: &str,
        file_path: &Path,
    ) -> Result<(), UploadFailure> {
        info!(
            file = %file_path.display(),
            bucket = %destination.bucket,
            key,
            "uploading artifact"
        );

        let client = Self::client(destination).await;

        let body = ByteStream::from_path(file_path).await.map_err(|e| {
            if file_path.exists() {
                UploadFailure::TransportOrService(e.to_string())
            } else {
                UploadFailure::FileNotFound(file_path.to_path_buf())
            }
        })?;

        client
            .put_object()
            .bucket(&destination.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| UploadFailure::TransportOrService(DisplayErrorContext(&e).to_string()))?;

        info!(bucket = %destination.bucket, key, "upload finished");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Secret;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Records every put and optionally fails them.
    #[derive(Default)]
    pub(crate) struct RecordingStore {
        pub(crate) puts: Mutex<Vec<(String, PathBuf)>>,
        pub(crate) fail_with: Option<String>,
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn put_object(
            &self,
            _destination: &StorageDestination,
            key: &str,
            file_path: &Path,
        ) -> Result<(), UploadFailure> {
            assert!(file_path.is_file(), "store called with missing file");
            self.puts
                .lock()
                .unwrap()
                .push((key.to_string(), file_path.to_path_buf()));
            match &self.fail_with {
                Some(detail) => Err(UploadFailure::TransportOrService(detail.clone())),
                None => Ok(()),
            }
        }
    }

    fn destination() -> StorageDestination {
        StorageDestination {
            bucket: "db-backups".to_string(),
            key_prefix: "nightly".to_string(),
            region: "eu-west-1".to_string(),
            access_key: Secret::new("AKIAEXAMPLE"),
            secret_key: Secret::new("very-secret"),
            endpoint_url: None,
        }
    }

    #[tokio::test]
    async fn test_upload_uses_prefixed_key() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("backup_all_20240101_000000.sql.tar.gz");
        std::fs::write(&archive, b"gz")?;
        let store = RecordingStore::default();

        let key = upload_artifact(&store, &destination(), &archive).await?;

        assert_eq!(key, "nightly/backup_all_20240101_000000.sql.tar.gz");
        assert_eq!(*store.puts.lock().unwrap(), vec![(key, archive)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_never_reaches_store() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("nope.tar.gz");
        let store = RecordingStore::default();

        let result = upload_artifact(&store, &destination(), &archive).await;

        assert!(matches!(result, Err(UploadFailure::FileNotFound(_))));
        assert!(store.puts.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_credentials_are_classified() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("a.tar.gz");
        std::fs::write(&archive, b"gz")?;
        let mut dest = destination();
        dest.secret_key = Secret::new("");
        let store = RecordingStore::default();

        let result = upload_artifact(&store, &dest, &archive).await;

        assert!(matches!(result, Err(UploadFailure::MissingCredentials)));
        assert!(store.puts.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_store_errors_propagate() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("a.tar.gz");
        std::fs::write(&archive, b"gz")?;
        let store = RecordingStore {
            fail_with: Some("503 SlowDown".to_string()),
            ..Default::default()
        };

        let result = upload_artifact(&store, &destination(), &archive).await;

        assert!(matches!(result, Err(UploadFailure::TransportOrService(d)) if d == "503 SlowDown"));
        Ok(())
    }
}
