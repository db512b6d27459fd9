use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{LocalCandidateSink, PeerConnection};
use crate::error::PeerError;
use crate::protocol::{IceCandidateRecord, SessionDescriptor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCall {
    CreateOffer,
    CreateAnswer,
    SetLocal(SessionDescriptor),
    SetRemote(SessionDescriptor),
    AddCandidate(IceCandidateRecord),
}

/// In-process stand-in for a peer connection: records every call, produces
/// placeholder SDP, and fails the operations it is told to fail.
#[derive(Default)]
pub struct MockPeer {
    calls: Mutex<Vec<PeerCall>>,
    failing: Mutex<HashSet<&'static str>>,
    sink: Mutex<Option<LocalCandidateSink>>,
}

impl MockPeer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `operation` is one of `create_offer`, `create_answer`,
    /// `set_local_description`, `set_remote_description`, `add_ice_candidate`.
    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().insert(operation);
    }

    pub fn calls(&self) -> Vec<PeerCall> {
        self.calls.lock().clone()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescriptor> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                PeerCall::SetRemote(description) => Some(description.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn added_candidates(&self) -> Vec<IceCandidateRecord> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                PeerCall::AddCandidate(candidate) => Some(candidate.clone()),
                _ => None,
            })
            .collect()
    }

    /// Simulates the gathering callback. Returns false if nobody is listening.
    pub fn gather(&self, candidate: Option<IceCandidateRecord>) -> bool {
        let Some(sink) = self.sink.lock().clone() else {
            return false;
        };
        match candidate {
            Some(candidate) => sink.discovered(candidate),
            None => sink.gathering_complete(),
        }
    }

    fn record(&self, operation: &'static str, call: PeerCall) -> Result<(), PeerError> {
        self.calls.lock().push(call);
        if self.failing.lock().contains(operation) {
            Err(PeerError(format!("{operation} rejected by mock peer")))
        } else {
            Ok(())
        }
    }

    fn sequence(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl PeerConnection for MockPeer {
    async fn create_offer(&self) -> Result<SessionDescriptor, PeerError> {
        let n = self.sequence();
        self.record("create_offer", PeerCall::CreateOffer)?;
        Ok(SessionDescriptor::offer(format!("v=0\r\no=mock {n} 0 IN IP4 0.0.0.0\r\n")))
    }

    async fn create_answer(&self) -> Result<SessionDescriptor, PeerError> {
        let n = self.sequence();
        self.record("create_answer", PeerCall::CreateAnswer)?;
        Ok(SessionDescriptor::answer(format!("v=0\r\no=mock {n} 0 IN IP4 0.0.0.0\r\n")))
    }

    async fn set_local_description(
        &self,
        description: SessionDescriptor,
    ) -> Result<(), PeerError> {
        self.record("set_local_description", PeerCall::SetLocal(description))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescriptor,
    ) -> Result<(), PeerError> {
        self.record("set_remote_description", PeerCall::SetRemote(description))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateRecord) -> Result<(), PeerError> {
        self.record("add_ice_candidate", PeerCall::AddCandidate(candidate))
    }

    fn on_local_candidate(&self, sink: LocalCandidateSink) {
        *self.sink.lock() = Some(sink);
    }
}
