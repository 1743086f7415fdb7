//! Open upload sessions and their staged parts

use crate::error::StoreError;
use crate::{Result, StoreEngine};
use fjall::{Partition, PartitionCreateOptions};
use parcel_core::integrity::part_etag;
use parcel_core::{ETag, ObjectTarget, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub(crate) const STAGING_PARTITION: &str = "uploads";

/// Persisted record of an open session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub target: ObjectTarget,
    /// Unix milliseconds, taken from the session ULID
    pub created_at: u64,
}

/// A staged part as listed for commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPart {
    pub part_number: u32,
    pub etag: ETag,
    pub data: Vec<u8>,
}

/// Staging area for multipart sessions.
///
/// Layout inside the `uploads` partition:
/// - `session:<id>` holds the JSON [`SessionRecord`]
/// - `part:<id>:<part number, 10 digits>` holds the raw part bytes
///
/// Part numbers are zero padded so a prefix scan returns them in order.
#[derive(Clone)]
pub struct Staging {
    pub(crate) partition: Partition,
    engine: StoreEngine,
}

impl Staging {
    pub(crate) fn open(engine: StoreEngine) -> Result<Self> {
        let partition = engine
            .keyspace()
            .open_partition(STAGING_PARTITION, PartitionCreateOptions::default())
            .map_err(StoreError::storage)?;
        Ok(Staging { partition, engine })
    }

    /// Open a new session for `target`
    pub fn create(&self, target: &ObjectTarget) -> Result<SessionId> {
        let id = ulid::Ulid::new();
        let record = SessionRecord {
            target: target.clone(),
            created_at: id.timestamp_ms(),
        };
        let session = SessionId::new(id.to_string());

        self.partition
            .insert(session_key(&session), serde_json::to_vec(&record)?)
            .map_err(StoreError::storage)?;
        self.engine.persist()?;

        Ok(session)
    }

    pub fn session(&self, session: &SessionId) -> Result<Option<SessionRecord>> {
        match self.partition.get(session_key(session)) {
            Ok(Some(data)) => Ok(Some(serde_json::from_slice(&data)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::storage(e)),
        }
    }

    fn require(&self, session: &SessionId) -> Result<SessionRecord> {
        self.session(session)?
            .ok_or_else(|| StoreError::NoSuchUpload(session.to_string()))
    }

    /// Stage `data` as part `part_number`, replacing an earlier upload of it
    pub fn put_part(&self, session: &SessionId, part_number: u32, data: &[u8]) -> Result<ETag> {
        if part_number == 0 {
            return Err(StoreError::InvalidPart("part numbers start at 1".to_string()));
        }
        self.require(session)?;

        self.partition
            .insert(part_key(session, part_number), data)
            .map_err(StoreError::storage)?;
        self.engine.persist()?;

        Ok(part_etag(data))
    }

    /// Every staged part of the session, by part number
    pub fn parts(&self, session: &SessionId) -> Result<BTreeMap<u32, StagedPart>> {
        let prefix = part_prefix(session);
        let mut parts = BTreeMap::new();

        for item in self.partition.prefix(&prefix) {
            let (key, value) = item.map_err(StoreError::storage)?;
            let part_number = key
                .strip_prefix(prefix.as_bytes())
                .and_then(|n| std::str::from_utf8(n).ok())
                .and_then(|n| n.parse::<u32>().ok())
                .ok_or_else(|| {
                    StoreError::Storage(format!("malformed part key under {}", session))
                })?;

            parts.insert(
                part_number,
                StagedPart {
                    part_number,
                    etag: part_etag(&value),
                    data: value.to_vec(),
                },
            );
        }

        Ok(parts)
    }

    /// Keys owned by the session, record included
    pub(crate) fn keys(&self, session: &SessionId) -> Result<Vec<Vec<u8>>> {
        let mut keys = vec![session_key(session)];
        for item in self.partition.prefix(part_prefix(session)) {
            let (key, _) = item.map_err(StoreError::storage)?;
            keys.push(key.to_vec());
        }
        Ok(keys)
    }

    /// Drop the session and its parts. Returns false for an unknown session.
    pub fn discard(&self, session: &SessionId) -> Result<bool> {
        if self.session(session)?.is_none() {
            return Ok(false);
        }

        for key in self.keys(session)? {
            self.partition.remove(key).map_err(StoreError::storage)?;
        }
        self.engine.persist()?;

        Ok(true)
    }

    /// Ids of all open sessions
    pub fn sessions(&self) -> Result<Vec<SessionId>> {
        let mut ids = Vec::new();
        for item in self.partition.prefix(SESSION_PREFIX) {
            let (key, _) = item.map_err(StoreError::storage)?;
            if let Some(id) = key
                .strip_prefix(SESSION_PREFIX.as_bytes())
                .and_then(|id| std::str::from_utf8(id).ok())
            {
                ids.push(SessionId::new(id));
            }
        }
        Ok(ids)
    }
}

const SESSION_PREFIX: &str = "session:";

fn session_key(session: &SessionId) -> Vec<u8> {
    format!("{}{}", SESSION_PREFIX, session.as_str()).into_bytes()
}

fn part_prefix(session: &SessionId) -> String {
    format!("part:{}:", session.as_str())
}

fn part_key(session: &SessionId, part_number: u32) -> Vec<u8> {
    format!("{}{:010}", part_prefix(session), part_number).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcel_core::{BucketName, ObjectKey};

    fn target() -> ObjectTarget {
        ObjectTarget::new(BucketName::new("media").unwrap(), ObjectKey::new("clip.mp4").unwrap())
    }

    #[test]
    fn test_session_lifecycle() {
        let (engine, _temp) = StoreEngine::temp().unwrap();
        let staging = engine.staging().unwrap();

        let session = staging.create(&target()).unwrap();
        let record = staging.session(&session).unwrap().unwrap();
        assert_eq!(record.target, target());
        assert_eq!(staging.sessions().unwrap(), vec![session.clone()]);

        assert!(staging.discard(&session).unwrap());
        assert!(staging.session(&session).unwrap().is_none());
        assert!(!staging.discard(&session).unwrap());
    }

    #[test]
    fn test_parts_are_listed_in_numeric_order() {
        let (engine, _temp) = StoreEngine::temp().unwrap();
        let staging = engine.staging().unwrap();
        let session = staging.create(&target()).unwrap();

        for n in [10u32, 2, 1] {
            staging.put_part(&session, n, format!("part {n}").as_bytes()).unwrap();
        }

        let parts = staging.parts(&session).unwrap();
        assert_eq!(parts.keys().copied().collect::<Vec<_>>(), vec![1, 2, 10]);
        assert_eq!(parts[&10].data, b"part 10");
    }

    #[test]
    fn test_reupload_replaces_part() {
        let (engine, _temp) = StoreEngine::temp().unwrap();
        let staging = engine.staging().unwrap();
        let session = staging.create(&target()).unwrap();

        staging.put_part(&session, 1, b"first").unwrap();
        let etag = staging.put_part(&session, 1, b"second").unwrap();

        let parts = staging.parts(&session).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[&1].etag, etag);
        assert_eq!(parts[&1].data, b"second");
    }

    #[test]
    fn test_part_for_unknown_session() {
        let (engine, _temp) = StoreEngine::temp().unwrap();
        let staging = engine.staging().unwrap();

        let err = staging.put_part(&SessionId::new("missing"), 1, b"data").unwrap_err();
        assert!(matches!(err, StoreError::NoSuchUpload(_)));
    }

    #[test]
    fn test_sessions_do_not_share_parts() {
        let (engine, _temp) = StoreEngine::temp().unwrap();
        let staging = engine.staging().unwrap();
        let a = staging.create(&target()).unwrap();
        let b = staging.create(&target()).unwrap();

        staging.put_part(&a, 1, b"a1").unwrap();
        staging.put_part(&b, 1, b"b1").unwrap();
        staging.discard(&a).unwrap();

        assert!(staging.parts(&a).unwrap().is_empty());
        assert_eq!(staging.parts(&b).unwrap()[&1].data, b"b1");
    }
}
