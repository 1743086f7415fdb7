//! `SessionClient` backed by the local store

use crate::bucket::{data_key, metadata_key, ObjectMetadata, PartEntry};
use crate::error::StoreError;
use crate::{Result, StoreEngine};
use bytes::Bytes;
use parcel_client::{RemoteResult, SessionClient};
use parcel_core::integrity::composite_etag;
use parcel_core::{
    CompletedPart, ContentDigest, ETag, ObjectId, ObjectTarget, RemoteError, RemoteLimits,
    SessionId, S3_MAX_PARTS,
};
use std::path::Path;
use tracing::{debug, info};

/// Multipart object store in a local directory.
///
/// Uploads are staged per session and become visible only when
/// [`complete`](LocalStore::complete) moves them into the bucket in a
/// single batch. Replacing an object writes a new version and drops the
/// old one in the same batch.
#[derive(Clone)]
pub struct LocalStore {
    engine: StoreEngine,
    limits: RemoteLimits,
}

impl LocalStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_engine(StoreEngine::new(path)?))
    }

    pub fn from_engine(engine: StoreEngine) -> Self {
        LocalStore {
            engine,
            limits: RemoteLimits {
                min_part_size: 1,
                max_parts: S3_MAX_PARTS,
            },
        }
    }

    /// Store in a fresh temporary directory
    #[cfg(any(test, feature = "test-utils"))]
    pub fn temp() -> Result<(Self, tempfile::TempDir)> {
        let (engine, temp_dir) = StoreEngine::temp()?;
        Ok((Self::from_engine(engine), temp_dir))
    }

    /// Enforce part limits other than the permissive default
    pub fn with_limits(mut self, limits: RemoteLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn engine(&self) -> &StoreEngine {
        &self.engine
    }

    /// Open a session. The bucket is opened first so a bad target fails here.
    pub fn begin(&self, target: &ObjectTarget) -> Result<SessionId> {
        self.engine.bucket(&target.bucket)?;
        let session = self.engine.staging()?.create(target)?;
        debug!(session_id = %session, target = %target, "session opened");
        Ok(session)
    }

    pub fn stage(&self, session: &SessionId, part_number: u32, data: &[u8]) -> Result<ETag> {
        self.engine.staging()?.put_part(session, part_number, data)
    }

    /// Assemble the object from staged parts.
    ///
    /// `parts` must be ascending, gap-free from 1, and name the ETags of
    /// the staged parts. Staged parts not listed are discarded.
    pub fn complete(&self, session: &SessionId, parts: &[CompletedPart]) -> Result<ObjectId> {
        let staging = self.engine.staging()?;
        let record = staging
            .session(session)?
            .ok_or_else(|| StoreError::NoSuchUpload(session.to_string()))?;

        if parts.is_empty() {
            return Err(StoreError::InvalidPart("no parts given".to_string()));
        }

        let staged = staging.parts(session)?;
        let bucket = self.engine.bucket(&record.target.bucket)?;
        let previous = bucket.head(&record.target.key)?;

        let version = ulid::Ulid::new();
        let version_str = version.to_string();
        let mut batch = self.engine.keyspace().batch();
        let mut manifest = Vec::with_capacity(parts.len());
        let mut digests = Vec::with_capacity(parts.len());
        let mut size = 0u64;

        for (index, part) in parts.iter().enumerate() {
            let expected = index as u32 + 1;
            if part.part_number != expected {
                return Err(StoreError::InvalidPartOrder(format!(
                    "expected part {}, got {}",
                    expected, part.part_number
                )));
            }

            let staged_part = staged
                .get(&part.part_number)
                .filter(|p| p.etag == part.etag)
                .ok_or_else(|| {
                    StoreError::InvalidPart(format!("part {} ({})", part.part_number, part.etag))
                })?;

            batch.insert(
                &bucket.partition,
                data_key(&version_str, part.part_number),
                staged_part.data.as_slice(),
            );
            digests.push(ContentDigest::new(&staged_part.data));
            manifest.push(PartEntry {
                part_number: part.part_number,
                size: staged_part.data.len() as u64,
                etag: staged_part.etag.clone(),
            });
            size += staged_part.data.len() as u64;
        }

        let metadata = ObjectMetadata {
            size,
            version: version_str,
            etag: composite_etag(&digests),
            created_at: version.timestamp_ms(),
            parts: manifest,
        };
        batch.insert(
            &bucket.partition,
            metadata_key(&record.target.key),
            serde_json::to_vec(&metadata)?,
        );

        if let Some(old) = &previous {
            for part in &old.parts {
                batch.remove(&bucket.partition, data_key(&old.version, part.part_number));
            }
        }
        for key in staging.keys(session)? {
            batch.remove(&staging.partition, key);
        }

        batch.commit().map_err(StoreError::storage)?;
        self.engine.persist()?;

        info!(
            session_id = %session,
            target = %record.target,
            version = %metadata.version,
            size = metadata.size,
            parts = metadata.part_count(),
            "object committed"
        );

        Ok(ObjectId {
            bucket: record.target.bucket,
            key: record.target.key,
            etag: Some(metadata.etag),
            version: Some(metadata.version),
        })
    }

    pub fn abort(&self, session: &SessionId) -> Result<()> {
        if !self.engine.staging()?.discard(session)? {
            return Err(StoreError::NoSuchUpload(session.to_string()));
        }
        debug!(session_id = %session, "session discarded");
        Ok(())
    }

    pub fn head_object(&self, target: &ObjectTarget) -> Result<ObjectMetadata> {
        self.engine
            .bucket(&target.bucket)?
            .head(&target.key)?
            .ok_or_else(|| StoreError::ObjectNotFound(target.to_string()))
    }

    pub fn get_object(&self, target: &ObjectTarget) -> Result<Vec<u8>> {
        self.engine
            .bucket(&target.bucket)?
            .get(&target.key)?
            .ok_or_else(|| StoreError::ObjectNotFound(target.to_string()))
    }

    pub fn open_sessions(&self) -> Result<Vec<SessionId>> {
        self.engine.staging()?.sessions()
    }

    /// Run a store call on the blocking pool
    async fn blocking<T, F>(&self, f: F) -> RemoteResult<T>
    where
        T: Send + 'static,
        F: FnOnce(LocalStore) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        match tokio::task::spawn_blocking(move || f(store)).await {
            Ok(result) => result.map_err(RemoteError::from),
            // a panic would panic again on retry
            Err(e) if e.is_panic() => {
                Err(RemoteError::permanent(format!("store task panicked: {}", e)))
            }
            Err(e) => Err(RemoteError::transient(format!("store task failed: {}", e))),
        }
    }
}

impl SessionClient for LocalStore {
    fn limits(&self) -> RemoteLimits {
        self.limits
    }

    async fn initiate(&self, target: &ObjectTarget) -> RemoteResult<SessionId> {
        let target = target.clone();
        self.blocking(move |store| store.begin(&target)).await
    }

    async fn upload_part(
        &self,
        session: &SessionId,
        part_number: u32,
        data: Bytes,
    ) -> RemoteResult<ETag> {
        let session = session.clone();
        self.blocking(move |store| store.stage(&session, part_number, &data))
            .await
    }

    async fn complete_upload(
        &self,
        session: &SessionId,
        parts: &[CompletedPart],
    ) -> RemoteResult<ObjectId> {
        let session = session.clone();
        let parts = parts.to_vec();
        self.blocking(move |store| store.complete(&session, &parts)).await
    }

    async fn abort_upload(&self, session: &SessionId) -> RemoteResult<()> {
        let session = session.clone();
        self.blocking(move |store| store.abort(&session)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcel_core::integrity::part_etag;
    use parcel_core::{BucketName, ObjectKey};

    fn target(key: &str) -> ObjectTarget {
        ObjectTarget::new(BucketName::new("store-tests").unwrap(), ObjectKey::new(key).unwrap())
    }

    fn completed(n: u32, data: &[u8]) -> CompletedPart {
        CompletedPart {
            part_number: n,
            etag: part_etag(data),
        }
    }

    #[test]
    fn test_complete_assembles_parts() {
        let (store, _temp) = LocalStore::temp().unwrap();
        let session = store.begin(&target("obj")).unwrap();
        store.stage(&session, 2, b"world").unwrap();
        store.stage(&session, 1, b"hello ").unwrap();

        let id = store
            .complete(&session, &[completed(1, b"hello "), completed(2, b"world")])
            .unwrap();

        assert_eq!(store.get_object(&target("obj")).unwrap(), b"hello world");
        let meta = store.head_object(&target("obj")).unwrap();
        assert_eq!(meta.size, 11);
        assert_eq!(meta.part_count(), 2);
        assert_eq!(id.etag, Some(meta.etag.clone()));
        assert_eq!(id.version.as_deref(), Some(meta.version.as_str()));
        assert!(store.open_sessions().unwrap().is_empty());
    }

    #[test]
    fn test_complete_rejects_gaps_and_bad_etags() {
        let (store, _temp) = LocalStore::temp().unwrap();
        let session = store.begin(&target("obj")).unwrap();
        store.stage(&session, 1, b"one").unwrap();
        store.stage(&session, 3, b"three").unwrap();

        let err = store
            .complete(&session, &[completed(1, b"one"), completed(3, b"three")])
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPartOrder(_)));

        let err = store.complete(&session, &[completed(1, b"other")]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPart(_)));

        // Nothing was committed and the session is still usable
        assert!(matches!(
            store.head_object(&target("obj")),
            Err(StoreError::ObjectNotFound(_))
        ));
        store.complete(&session, &[completed(1, b"one")]).unwrap();
        assert_eq!(store.get_object(&target("obj")).unwrap(), b"one");
    }

    #[test]
    fn test_overwrite_drops_previous_version() {
        let (store, _temp) = LocalStore::temp().unwrap();

        let first = store.begin(&target("obj")).unwrap();
        store.stage(&first, 1, b"v1").unwrap();
        let v1 = store.complete(&first, &[completed(1, b"v1")]).unwrap();

        let second = store.begin(&target("obj")).unwrap();
        store.stage(&second, 1, b"v2").unwrap();
        let v2 = store.complete(&second, &[completed(1, b"v2")]).unwrap();

        assert_ne!(v1.version, v2.version);
        assert_eq!(store.get_object(&target("obj")).unwrap(), b"v2");

        let bucket = store.engine().bucket(&target("obj").bucket).unwrap();
        let stale = bucket
            .partition
            .get(data_key(v1.version.as_deref().unwrap(), 1))
            .unwrap();
        assert!(stale.is_none());
    }

    #[test]
    fn test_abort_unknown_session() {
        let (store, _temp) = LocalStore::temp().unwrap();
        let err = store.abort(&SessionId::new("nope")).unwrap_err();
        assert!(matches!(err, StoreError::NoSuchUpload(_)));
        assert!(!RemoteError::from(err).is_transient());
    }

    #[tokio::test]
    async fn test_session_client_errors_are_classified() {
        let (store, _temp) = LocalStore::temp().unwrap();

        let err = store
            .upload_part(&SessionId::new("missing"), 1, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(err.message.contains("missing"));

        let session = store.initiate(&target("classified")).await.unwrap();
        store.abort_upload(&session).await.unwrap();
        assert!(store.open_sessions().unwrap().is_empty());
    }
}
