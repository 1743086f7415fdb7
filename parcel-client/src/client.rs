//! Remote object-storage session interface

use bytes::Bytes;
use parcel_core::{
    CompletedPart, ETag, ObjectId, ObjectTarget, RemoteError, RemoteLimits, SessionId,
};
use std::future::Future;
use std::sync::Arc;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// The four multipart calls an object store has to offer.
///
/// Every call may fail with a transient or permanent [`RemoteError`].
/// `upload_part` may be repeated for the same part number; the later
/// call overwrites the earlier one.
pub trait SessionClient: Send + Sync {
    /// Part-size and part-count limits of this remote
    fn limits(&self) -> RemoteLimits {
        RemoteLimits::default()
    }

    /// Open a multipart session for `target`
    fn initiate(
        &self,
        target: &ObjectTarget,
    ) -> impl Future<Output = RemoteResult<SessionId>> + Send;

    /// Store `data` as part `part_number` of the session
    fn upload_part(
        &self,
        session: &SessionId,
        part_number: u32,
        data: Bytes,
    ) -> impl Future<Output = RemoteResult<ETag>> + Send;

    /// Assemble the object from `parts`, given in ascending part order
    fn complete_upload(
        &self,
        session: &SessionId,
        parts: &[CompletedPart],
    ) -> impl Future<Output = RemoteResult<ObjectId>> + Send;

    /// Discard the session and every part uploaded to it
    fn abort_upload(&self, session: &SessionId) -> impl Future<Output = RemoteResult<()>> + Send;
}

impl<C: SessionClient> SessionClient for Arc<C> {
    fn limits(&self) -> RemoteLimits {
        (**self).limits()
    }

    fn initiate(
        &self,
        target: &ObjectTarget,
    ) -> impl Future<Output = RemoteResult<SessionId>> + Send {
        (**self).initiate(target)
    }

    fn upload_part(
        &self,
        session: &SessionId,
        part_number: u32,
        data: Bytes,
    ) -> impl Future<Output = RemoteResult<ETag>> + Send {
        (**self).upload_part(session, part_number, data)
    }

    fn complete_upload(
        &self,
        session: &SessionId,
        parts: &[CompletedPart],
    ) -> impl Future<Output = RemoteResult<ObjectId>> + Send {
        (**self).complete_upload(session, parts)
    }

    fn abort_upload(&self, session: &SessionId) -> impl Future<Output = RemoteResult<()>> + Send {
        (**self).abort_upload(session)
    }
}
