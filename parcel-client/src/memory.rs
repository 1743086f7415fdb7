//! In-process object store with scriptable faults

use crate::{RemoteResult, SessionClient};
use bytes::{Bytes, BytesMut};
use parcel_core::integrity::{composite_etag, part_etag};
use parcel_core::{
    CompletedPart, ContentDigest, ETag, ObjectId, ObjectTarget, RemoteError, RemoteLimits,
    SessionId,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A remote call as seen by [`MemorySessionClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Initiate { target: ObjectTarget },
    UploadPart { session: SessionId, part_number: u32 },
    Complete { session: SessionId, parts: Vec<CompletedPart> },
    Abort { session: SessionId },
}

#[derive(Default)]
struct State {
    next_session: u64,
    sessions: HashMap<SessionId, Staged>,
    objects: HashMap<(String, String), Bytes>,
    calls: Vec<Call>,
    attempts: HashMap<u32, u32>,
    scripted: HashMap<u32, VecDeque<RemoteError>>,
    always: HashMap<u32, RemoteError>,
    initiate_fault: Option<RemoteError>,
    complete_fault: Option<RemoteError>,
    abort_fault: Option<RemoteError>,
    in_flight: usize,
    max_in_flight: usize,
}

struct Staged {
    target: ObjectTarget,
    parts: BTreeMap<u32, (ETag, Bytes)>,
}

/// Object store living in memory, for tests and benches.
///
/// Part ETags and object ETags follow [`parcel_core::integrity`].
/// Faults are scripted per part number and consumed in order.
pub struct MemorySessionClient {
    limits: RemoteLimits,
    default_delay: Duration,
    part_delays: HashMap<u32, Duration>,
    state: Mutex<State>,
}

impl Default for MemorySessionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionClient {
    pub fn new() -> Self {
        MemorySessionClient {
            limits: RemoteLimits {
                min_part_size: 1,
                max_parts: parcel_core::S3_MAX_PARTS,
            },
            default_delay: Duration::ZERO,
            part_delays: HashMap::new(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_limits(mut self, limits: RemoteLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Delay every part upload by `delay`
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Delay uploads of `part_number` by `delay`
    pub fn with_part_delay(mut self, part_number: u32, delay: Duration) -> Self {
        self.part_delays.insert(part_number, delay);
        self
    }

    /// Fail the next attempts of `part_number` with `errors`, in order
    pub fn fail_part(&self, part_number: u32, errors: impl IntoIterator<Item = RemoteError>) {
        self.state()
            .scripted
            .entry(part_number)
            .or_default()
            .extend(errors);
    }

    /// Fail every attempt of `part_number` with `error`
    pub fn fail_part_always(&self, part_number: u32, error: RemoteError) {
        self.state().always.insert(part_number, error);
    }

    pub fn fail_initiate(&self, error: RemoteError) {
        self.state().initiate_fault = Some(error);
    }

    pub fn fail_complete(&self, error: RemoteError) {
        self.state().complete_fault = Some(error);
    }

    pub fn fail_abort(&self, error: RemoteError) {
        self.state().abort_fault = Some(error);
    }

    /// Every call received so far, in arrival order
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Number of `upload_part` calls made for `part_number`
    pub fn upload_attempts(&self, part_number: u32) -> u32 {
        self.state().attempts.get(&part_number).copied().unwrap_or(0)
    }

    /// Part numbers that received at least one `upload_part` call
    pub fn attempted_parts(&self) -> BTreeSet<u32> {
        self.state().attempts.keys().copied().collect()
    }

    /// Part lists passed to `complete_upload`
    pub fn complete_calls(&self) -> Vec<Vec<CompletedPart>> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Complete { parts, .. } => Some(parts.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn abort_calls(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Abort { .. }))
            .count()
    }

    /// Highest number of part uploads observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.state().max_in_flight
    }

    /// Sessions neither completed nor aborted
    pub fn open_sessions(&self) -> usize {
        self.state().sessions.len()
    }

    /// Bytes of a committed object
    pub fn object(&self, target: &ObjectTarget) -> Option<Bytes> {
        self.state()
            .objects
            .get(&(target.bucket.to_string(), target.key.to_string()))
            .cloned()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn delay_for(&self, part_number: u32) -> Duration {
        self.part_delays
            .get(&part_number)
            .copied()
            .unwrap_or(self.default_delay)
    }
}

/// Keeps the in-flight count right when an upload future is dropped
struct InFlight<'a> {
    client: &'a MemorySessionClient,
}

impl<'a> InFlight<'a> {
    fn enter(client: &'a MemorySessionClient, state: &mut State) -> Self {
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        InFlight { client }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.client.state().in_flight -= 1;
    }
}

fn no_such_upload(session: &SessionId) -> RemoteError {
    RemoteError::from_status(404, format!("NoSuchUpload: {}", session))
}

impl SessionClient for MemorySessionClient {
    fn limits(&self) -> RemoteLimits {
        self.limits
    }

    async fn initiate(&self, target: &ObjectTarget) -> RemoteResult<SessionId> {
        let mut state = self.state();
        state.calls.push(Call::Initiate {
            target: target.clone(),
        });
        if let Some(error) = state.initiate_fault.clone() {
            return Err(error);
        }

        state.next_session += 1;
        let session = SessionId::new(format!("mem-{}", state.next_session));
        state.sessions.insert(
            session.clone(),
            Staged {
                target: target.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(session)
    }

    async fn upload_part(
        &self,
        session: &SessionId,
        part_number: u32,
        data: Bytes,
    ) -> RemoteResult<ETag> {
        let (fault, _guard) = {
            let mut state = self.state();
            state.calls.push(Call::UploadPart {
                session: session.clone(),
                part_number,
            });
            *state.attempts.entry(part_number).or_default() += 1;

            let fault = match state.scripted.get_mut(&part_number).and_then(VecDeque::pop_front) {
                Some(error) => Some(error),
                None => state.always.get(&part_number).cloned(),
            };
            let guard = InFlight::enter(self, &mut state);
            (fault, guard)
        };

        let delay = self.delay_for(part_number);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = fault {
            return Err(error);
        }

        let mut state = self.state();
        let staged = state
            .sessions
            .get_mut(session)
            .ok_or_else(|| no_such_upload(session))?;
        let etag = part_etag(&data);
        staged.parts.insert(part_number, (etag.clone(), data));
        Ok(etag)
    }

    async fn complete_upload(
        &self,
        session: &SessionId,
        parts: &[CompletedPart],
    ) -> RemoteResult<ObjectId> {
        let mut state = self.state();
        state.calls.push(Call::Complete {
            session: session.clone(),
            parts: parts.to_vec(),
        });
        if let Some(error) = state.complete_fault.clone() {
            return Err(error);
        }

        let staged = state
            .sessions
            .get(session)
            .ok_or_else(|| no_such_upload(session))?;

        let mut body = BytesMut::new();
        let mut digests = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            if part.part_number != i as u32 + 1 {
                return Err(RemoteError::from_status(
                    400,
                    format!("InvalidPartOrder: expected part {}, got {}", i + 1, part.part_number),
                ));
            }
            match staged.parts.get(&part.part_number) {
                Some((etag, data)) if *etag == part.etag => {
                    body.extend_from_slice(data);
                    digests.push(ContentDigest::new(data));
                }
                _ => {
                    return Err(RemoteError::from_status(
                        400,
                        format!("InvalidPart: {}", part.part_number),
                    ))
                }
            }
        }

        let target = staged.target.clone();
        state.sessions.remove(session);
        state.objects.insert(
            (target.bucket.to_string(), target.key.to_string()),
            body.freeze(),
        );

        Ok(ObjectId {
            bucket: target.bucket,
            key: target.key,
            etag: Some(composite_etag(&digests)),
            version: None,
        })
    }

    async fn abort_upload(&self, session: &SessionId) -> RemoteResult<()> {
        let mut state = self.state();
        state.calls.push(Call::Abort {
            session: session.clone(),
        });
        if let Some(error) = state.abort_fault.clone() {
            return Err(error);
        }

        state
            .sessions
            .remove(session)
            .map(|_| ())
            .ok_or_else(|| no_such_upload(session))
    }
}
