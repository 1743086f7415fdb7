//! Uploading a single part with retries

use crate::{AbortSignal, SessionClient};
use parcel_core::{
    ByteSource, ContentDigest, PartError, PartResult, PartSpec, RemoteError, RetryDecision,
    RetryPolicy, SessionId,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Sends one planned byte range as one remote part
pub struct PartUploader<C, S> {
    client: Arc<C>,
    source: Arc<S>,
    policy: RetryPolicy,
    part_timeout: Option<Duration>,
    signal: AbortSignal,
}

impl<C, S> PartUploader<C, S>
where
    C: SessionClient,
    S: ByteSource,
{
    pub fn new(client: Arc<C>, source: Arc<S>, policy: RetryPolicy, signal: AbortSignal) -> Self {
        PartUploader {
            client,
            source,
            policy,
            part_timeout: None,
            signal,
        }
    }

    /// Fail attempts that take longer than `timeout` with a transient error
    pub fn with_part_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.part_timeout = timeout;
        self
    }

    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    /// Upload `spec`, retrying transient failures per the policy.
    ///
    /// Every attempt reads the range from the source again.
    pub async fn upload_part(
        &self,
        session: &SessionId,
        spec: PartSpec,
    ) -> Result<PartResult, PartError> {
        let part_number = spec.part_number;
        let mut state = self.policy.start();

        loop {
            let attempt = state.begin_attempt();

            let data = self
                .source
                .read_range(spec.byte_offset, spec.byte_length)
                .await
                .map_err(|e| PartError::Source {
                    part_number,
                    attempts: attempt,
                    reason: e.to_string(),
                })?;
            if data.len() as u64 != spec.byte_length {
                return Err(PartError::Source {
                    part_number,
                    attempts: attempt,
                    reason: format!("read {} bytes, expected {}", data.len(), spec.byte_length),
                });
            }
            let digest = ContentDigest::new(&data);

            debug!(part_number, attempt, bytes = spec.byte_length, "uploading part");
            let error = match self.send(session, part_number, data).await {
                Ok(etag) => {
                    debug!(part_number, attempt, %etag, "part uploaded");
                    return Ok(PartResult {
                        part_number,
                        etag,
                        attempts: attempt,
                        byte_length: spec.byte_length,
                        digest,
                    });
                }
                Err(error) => error,
            };

            match self.policy.on_failure(&mut state, &error) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        part_number,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "part upload failed, retrying"
                    );
                    if !self.signal.sleep(delay).await {
                        debug!(part_number, attempt, "abort requested during backoff");
                        return Err(PartError::Cancelled {
                            part_number,
                            attempts: attempt,
                        });
                    }
                }
                RetryDecision::Exhausted => {
                    warn!(
                        part_number,
                        attempts = attempt,
                        error = %error,
                        "part upload retries exhausted"
                    );
                    return Err(PartError::Exhausted {
                        part_number,
                        attempts: attempt,
                        last: error,
                    });
                }
                RetryDecision::Fail => {
                    warn!(part_number, attempt, error = %error, "part upload failed permanently");
                    return Err(PartError::Permanent {
                        part_number,
                        attempts: attempt,
                        cause: error,
                    });
                }
            }
        }
    }

    async fn send(
        &self,
        session: &SessionId,
        part_number: u32,
        data: bytes::Bytes,
    ) -> Result<parcel_core::ETag, RemoteError> {
        let call = self.client.upload_part(session, part_number, data);
        match self.part_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or_else(|_| Err(RemoteError::timeout(limit.as_millis() as u64))),
            None => call.await,
        }
    }
}
