//! Offer/answer state machine for one peer connection.
//!
//! ```text
//! Idle ──LocalOfferRequested──▶ OfferSent ──RemoteAnswerReceived──▶ Stable
//!   └──────RemoteOfferReceived──▶ RenegotiationInFlight ◀──────────┘ │
//!                                        └──────────────▶ Stable ◀───┘
//! ```
//!
//! Any collaborator error moves the machine to `Failed`, which accepts nothing
//! until [`Negotiator::reset`] installs a fresh peer connection.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::correlation::PendingAction;
use crate::error::{PeerError, SignalingError};
use crate::protocol::{IceCandidateRecord, SessionDescriptor};

mod candidates;
pub mod mock;
pub mod rtc;

pub use candidates::{LocalCandidateSink, LocalCandidateStream};
use candidates::RemoteCandidateBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    Idle,
    OfferSent,
    Stable,
    RenegotiationInFlight,
    Failed,
}

impl NegotiationState {
    pub fn as_str(self) -> &'static str {
        match self {
            NegotiationState::Idle => "idle",
            NegotiationState::OfferSent => "offer_sent",
            NegotiationState::Stable => "stable",
            NegotiationState::RenegotiationInFlight => "renegotiation_in_flight",
            NegotiationState::Failed => "failed",
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationEvent {
    LocalOfferRequested,
    RemoteAnswerReceived(SessionDescriptor),
    /// `id` is the server's request id, kept for logging only.
    RemoteOfferReceived { id: u64, offer: SessionDescriptor },
    RemoteCandidateReceived(IceCandidateRecord),
    /// `None` is the end-of-gathering marker.
    LocalCandidateDiscovered(Option<IceCandidateRecord>),
}

impl NegotiationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            NegotiationEvent::LocalOfferRequested => "local_offer_requested",
            NegotiationEvent::RemoteAnswerReceived(_) => "remote_answer_received",
            NegotiationEvent::RemoteOfferReceived { .. } => "remote_offer_received",
            NegotiationEvent::RemoteCandidateReceived(_) => "remote_candidate_received",
            NegotiationEvent::LocalCandidateDiscovered(_) => "local_candidate_discovered",
        }
    }
}

/// The peer-connection operations negotiation depends on.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescriptor, PeerError>;
    async fn create_answer(&self) -> Result<SessionDescriptor, PeerError>;
    async fn set_local_description(&self, description: SessionDescriptor)
    -> Result<(), PeerError>;
    async fn set_remote_description(
        &self,
        description: SessionDescriptor,
    ) -> Result<(), PeerError>;
    async fn add_ice_candidate(&self, candidate: IceCandidateRecord) -> Result<(), PeerError>;
    /// Routes every locally gathered candidate, then the end-of-gathering
    /// marker, into `sink`.
    fn on_local_candidate(&self, sink: LocalCandidateSink);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCall {
    Join(SessionDescriptor),
    Answer(SessionDescriptor),
}

/// Outbound side of the signaling channel as seen by the state machine.
#[async_trait]
pub trait Outbox: Send {
    /// Sends a request and records `action` against its freshly assigned id.
    async fn request(
        &mut self,
        call: OutboundCall,
        action: PendingAction,
    ) -> Result<u64, SignalingError>;

    /// Sends a fire-and-forget trickle notification.
    async fn trickle(&mut self, candidate: IceCandidateRecord) -> Result<(), SignalingError>;
}

pub struct Negotiator {
    peer: Arc<dyn PeerConnection>,
    state: NegotiationState,
    remote_description_set: bool,
    buffered: RemoteCandidateBuffer,
}

impl Negotiator {
    pub fn new(peer: Arc<dyn PeerConnection>) -> Self {
        Self {
            peer,
            state: NegotiationState::Idle,
            remote_description_set: false,
            buffered: RemoteCandidateBuffer::default(),
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn buffered_candidates(&self) -> usize {
        self.buffered.len()
    }

    /// Starts over with a rebuilt peer connection.
    pub fn reset(&mut self, peer: Arc<dyn PeerConnection>) {
        let dropped = self.buffered.clear();
        tracing::info!(
            target = "beach_sfu::negotiation",
            previous = %self.state,
            dropped_candidates = dropped,
            "negotiation reset"
        );
        self.peer = peer;
        self.remote_description_set = false;
        self.state = NegotiationState::Idle;
    }

    /// Fails the current round for a reason outside the peer connection, such
    /// as the server rejecting our offer.
    pub fn abort_round(
        &mut self,
        operation: &'static str,
        reason: impl Into<String>,
    ) -> SignalingError {
        self.fail(operation, reason.into())
    }

    pub async fn dispatch(
        &mut self,
        event: NegotiationEvent,
        outbox: &mut dyn Outbox,
    ) -> Result<(), SignalingError> {
        tracing::trace!(
            target = "beach_sfu::negotiation",
            state = %self.state,
            event = event.name(),
            "dispatch"
        );
        match event {
            NegotiationEvent::LocalOfferRequested => self.start_offer(outbox).await,
            NegotiationEvent::RemoteAnswerReceived(answer) => self.accept_answer(answer).await,
            NegotiationEvent::RemoteOfferReceived { id, offer } => {
                self.answer_offer(id, offer, outbox).await
            }
            NegotiationEvent::RemoteCandidateReceived(candidate) => {
                self.apply_remote_candidate(candidate).await
            }
            NegotiationEvent::LocalCandidateDiscovered(candidate) => {
                self.forward_local_candidate(candidate, outbox).await
            }
        }
    }

    async fn start_offer(&mut self, outbox: &mut dyn Outbox) -> Result<(), SignalingError> {
        self.require_state(&[NegotiationState::Idle], "local_offer_requested")?;
        let peer = Arc::clone(&self.peer);

        let offer = self.guard("create_offer", peer.create_offer().await)?;
        self.guard(
            "set_local_description",
            peer.set_local_description(offer.clone()).await,
        )?;

        // State only advances once the join is actually on the wire.
        let id = outbox
            .request(OutboundCall::Join(offer), PendingAction::AwaitInitialAnswer)
            .await?;
        tracing::debug!(target = "beach_sfu::negotiation", id, "join sent");
        self.transition(NegotiationState::OfferSent);
        Ok(())
    }

    async fn accept_answer(&mut self, answer: SessionDescriptor) -> Result<(), SignalingError> {
        self.require_state(&[NegotiationState::OfferSent], "remote_answer_received")?;
        let peer = Arc::clone(&self.peer);
        self.guard(
            "set_remote_description",
            peer.set_remote_description(answer).await,
        )?;
        self.remote_description_set = true;
        self.replay_buffered().await?;
        self.transition(NegotiationState::Stable);
        Ok(())
    }

    async fn answer_offer(
        &mut self,
        offer_id: u64,
        offer: SessionDescriptor,
        outbox: &mut dyn Outbox,
    ) -> Result<(), SignalingError> {
        self.require_state(
            &[NegotiationState::Idle, NegotiationState::Stable],
            "remote_offer_received",
        )?;
        self.transition(NegotiationState::RenegotiationInFlight);
        let peer = Arc::clone(&self.peer);

        self.guard(
            "set_remote_description",
            peer.set_remote_description(offer).await,
        )?;
        self.remote_description_set = true;
        self.replay_buffered().await?;

        let answer = self.guard("create_answer", peer.create_answer().await)?;
        self.guard(
            "set_local_description",
            peer.set_local_description(answer.clone()).await,
        )?;

        let id = outbox
            .request(
                OutboundCall::Answer(answer),
                PendingAction::AwaitRenegotiationAck,
            )
            .await?;
        tracing::debug!(
            target = "beach_sfu::negotiation",
            offer_id,
            answer_id = id,
            "answer sent"
        );
        self.transition(NegotiationState::Stable);
        Ok(())
    }

    async fn apply_remote_candidate(
        &mut self,
        candidate: IceCandidateRecord,
    ) -> Result<(), SignalingError> {
        if self.state == NegotiationState::Failed {
            return Err(self.rejected("remote_candidate_received"));
        }
        if !self.remote_description_set {
            self.buffered.push(candidate);
            tracing::debug!(
                target = "beach_sfu::negotiation",
                buffered = self.buffered.len(),
                "remote candidate buffered until a remote description is set"
            );
            return Ok(());
        }
        let peer = Arc::clone(&self.peer);
        self.guard("add_ice_candidate", peer.add_ice_candidate(candidate).await)
    }

    async fn replay_buffered(&mut self) -> Result<(), SignalingError> {
        let peer = Arc::clone(&self.peer);
        let mut replayed = 0usize;
        while let Some(candidate) = self.buffered.pop() {
            self.guard("add_ice_candidate", peer.add_ice_candidate(candidate).await)?;
            replayed += 1;
        }
        if replayed > 0 {
            tracing::debug!(
                target = "beach_sfu::negotiation",
                replayed,
                "replayed buffered remote candidates"
            );
        }
        Ok(())
    }

    async fn forward_local_candidate(
        &mut self,
        candidate: Option<IceCandidateRecord>,
        outbox: &mut dyn Outbox,
    ) -> Result<(), SignalingError> {
        let Some(candidate) = candidate else {
            tracing::debug!(target = "beach_sfu::negotiation", "local ice gathering complete");
            return Ok(());
        };
        if self.state == NegotiationState::Failed {
            return Err(self.rejected("local_candidate_discovered"));
        }
        tracing::trace!(
            target = "beach_sfu::negotiation",
            candidate = %candidate.candidate.candidate,
            "forwarding local candidate"
        );
        outbox.trickle(candidate).await
    }

    fn require_state(
        &self,
        allowed: &[NegotiationState],
        event: &'static str,
    ) -> Result<(), SignalingError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.rejected(event))
        }
    }

    fn rejected(&self, event: &'static str) -> SignalingError {
        SignalingError::InvalidTransition {
            state: self.state,
            event,
        }
    }

    fn guard<T>(
        &mut self,
        operation: &'static str,
        result: Result<T, PeerError>,
    ) -> Result<T, SignalingError> {
        result.map_err(|err| self.fail(operation, err.0))
    }

    fn fail(&mut self, operation: &'static str, reason: String) -> SignalingError {
        let dropped = self.buffered.clear();
        tracing::error!(
            target = "beach_sfu::negotiation",
            state = %self.state,
            operation,
            reason = %reason,
            dropped_candidates = dropped,
            "negotiation failed"
        );
        self.state = NegotiationState::Failed;
        SignalingError::NegotiationFailed { operation, reason }
    }

    fn transition(&mut self, next: NegotiationState) {
        if self.state != next {
            tracing::debug!(
                target = "beach_sfu::negotiation",
                from = %self.state,
                to = %next,
                "negotiation state changed"
            );
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockPeer, PeerCall};
    use super::*;
    use crate::protocol::CandidateInit;

    #[derive(Default)]
    struct RecordingOutbox {
        requests: Vec<(u64, OutboundCall, PendingAction)>,
        trickles: Vec<IceCandidateRecord>,
        next_id: u64,
        broken: bool,
    }

    #[async_trait]
    impl Outbox for RecordingOutbox {
        async fn request(
            &mut self,
            call: OutboundCall,
            action: PendingAction,
        ) -> Result<u64, SignalingError> {
            if self.broken {
                return Err(SignalingError::Channel("connection reset".into()));
            }
            self.next_id += 1;
            self.requests.push((self.next_id, call, action));
            Ok(self.next_id)
        }

        async fn trickle(&mut self, candidate: IceCandidateRecord) -> Result<(), SignalingError> {
            if self.broken {
                return Err(SignalingError::Channel("connection reset".into()));
            }
            self.trickles.push(candidate);
            Ok(())
        }
    }

    fn candidate(label: &str) -> IceCandidateRecord {
        IceCandidateRecord::new(
            0,
            CandidateInit {
                candidate: label.to_string(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            },
        )
    }

    fn negotiator(peer: &Arc<MockPeer>) -> Negotiator {
        Negotiator::new(Arc::clone(peer) as Arc<dyn PeerConnection>)
    }

    #[tokio::test]
    async fn local_offer_sends_join_and_waits_for_answer() {
        let peer = Arc::new(MockPeer::new());
        let mut machine = negotiator(&peer);
        let mut outbox = RecordingOutbox::default();

        machine
            .dispatch(NegotiationEvent::LocalOfferRequested, &mut outbox)
            .await
            .unwrap();

        assert_eq!(machine.state(), NegotiationState::OfferSent);
        assert_eq!(outbox.requests.len(), 1);
        let (_, call, action) = &outbox.requests[0];
        assert_eq!(*action, PendingAction::AwaitInitialAnswer);
        let OutboundCall::Join(offer) = call else {
            panic!("expected join, got {call:?}");
        };
        assert_eq!(
            peer.calls(),
            vec![PeerCall::CreateOffer, PeerCall::SetLocal(offer.clone())]
        );

        machine
            .dispatch(
                NegotiationEvent::RemoteAnswerReceived(SessionDescriptor::answer("v=0 answer")),
                &mut outbox,
            )
            .await
            .unwrap();
        assert_eq!(machine.state(), NegotiationState::Stable);
        assert_eq!(peer.remote_descriptions().len(), 1);
    }

    #[tokio::test]
    async fn join_write_failure_stays_idle() {
        let peer = Arc::new(MockPeer::new());
        let mut machine = negotiator(&peer);
        let mut outbox = RecordingOutbox {
            broken: true,
            ..Default::default()
        };

        let err = machine
            .dispatch(NegotiationEvent::LocalOfferRequested, &mut outbox)
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::Channel(_)));
        assert_eq!(machine.state(), NegotiationState::Idle);
    }

    #[tokio::test]
    async fn early_candidates_replay_in_order_after_answer() {
        let peer = Arc::new(MockPeer::new());
        let mut machine = negotiator(&peer);
        let mut outbox = RecordingOutbox::default();

        machine
            .dispatch(NegotiationEvent::LocalOfferRequested, &mut outbox)
            .await
            .unwrap();
        for label in ["candidate:a", "candidate:b"] {
            machine
                .dispatch(
                    NegotiationEvent::RemoteCandidateReceived(candidate(label)),
                    &mut outbox,
                )
                .await
                .unwrap();
        }
        assert_eq!(machine.buffered_candidates(), 2);
        assert!(peer.added_candidates().is_empty());

        machine
            .dispatch(
                NegotiationEvent::RemoteAnswerReceived(SessionDescriptor::answer("v=0")),
                &mut outbox,
            )
            .await
            .unwrap();

        assert_eq!(machine.buffered_candidates(), 0);
        assert_eq!(
            peer.added_candidates(),
            vec![candidate("candidate:a"), candidate("candidate:b")]
        );
        let calls = peer.calls();
        let remote_at = calls
            .iter()
            .position(|call| matches!(call, PeerCall::SetRemote(_)))
            .unwrap();
        let first_add = calls
            .iter()
            .position(|call| matches!(call, PeerCall::AddCandidate(_)))
            .unwrap();
        assert!(remote_at < first_add);
    }

    #[tokio::test]
    async fn candidates_apply_immediately_once_remote_is_known() {
        let peer = Arc::new(MockPeer::new());
        let mut machine = negotiator(&peer);
        let mut outbox = RecordingOutbox::default();
        machine
            .dispatch(
                NegotiationEvent::RemoteOfferReceived {
                    id: 1,
                    offer: SessionDescriptor::offer("v=0"),
                },
                &mut outbox,
            )
            .await
            .unwrap();
        machine
            .dispatch(
                NegotiationEvent::RemoteCandidateReceived(candidate("candidate:x")),
                &mut outbox,
            )
            .await
            .unwrap();
        assert_eq!(peer.added_candidates(), vec![candidate("candidate:x")]);
        assert_eq!(machine.buffered_candidates(), 0);
    }

    #[tokio::test]
    async fn remote_offer_is_answered_with_local_answer() {
        let peer = Arc::new(MockPeer::new());
        let mut machine = negotiator(&peer);
        let mut outbox = RecordingOutbox::default();
        let offer = SessionDescriptor::offer("v=0 server");

        machine
            .dispatch(
                NegotiationEvent::RemoteOfferReceived {
                    id: 42,
                    offer: offer.clone(),
                },
                &mut outbox,
            )
            .await
            .unwrap();

        assert_eq!(machine.state(), NegotiationState::Stable);
        let calls = peer.calls();
        assert_eq!(calls[0], PeerCall::SetRemote(offer));
        assert_eq!(calls[1], PeerCall::CreateAnswer);
        let PeerCall::SetLocal(answer) = &calls[2] else {
            panic!("expected set_local, got {:?}", calls[2]);
        };
        assert_eq!(
            outbox.requests,
            vec![(
                1,
                OutboundCall::Answer(answer.clone()),
                PendingAction::AwaitRenegotiationAck
            )]
        );
    }

    #[tokio::test]
    async fn remote_offer_rejected_while_offer_outstanding() {
        let peer = Arc::new(MockPeer::new());
        let mut machine = negotiator(&peer);
        let mut outbox = RecordingOutbox::default();
        machine
            .dispatch(NegotiationEvent::LocalOfferRequested, &mut outbox)
            .await
            .unwrap();

        let err = machine
            .dispatch(
                NegotiationEvent::RemoteOfferReceived {
                    id: 9,
                    offer: SessionDescriptor::offer("v=0"),
                },
                &mut outbox,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::InvalidTransition { .. }));
        assert_eq!(machine.state(), NegotiationState::OfferSent);
    }

    #[tokio::test]
    async fn failed_remote_description_is_terminal() {
        let peer = Arc::new(MockPeer::new());
        peer.fail_on("set_remote_description");
        let mut machine = negotiator(&peer);
        let mut outbox = RecordingOutbox::default();
        machine
            .dispatch(NegotiationEvent::LocalOfferRequested, &mut outbox)
            .await
            .unwrap();
        let err = machine
            .dispatch(
                NegotiationEvent::RemoteAnswerReceived(SessionDescriptor::answer("bad")),
                &mut outbox,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignalingError::NegotiationFailed {
                operation: "set_remote_description",
                ..
            }
        ));
        assert_eq!(machine.state(), NegotiationState::Failed);

        let calls_before = peer.calls().len();
        let err = machine
            .dispatch(
                NegotiationEvent::RemoteCandidateReceived(candidate("candidate:late")),
                &mut outbox,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::InvalidTransition { .. }));
        assert_eq!(peer.calls().len(), calls_before);
        assert!(
            machine
                .dispatch(NegotiationEvent::LocalOfferRequested, &mut outbox)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn reset_returns_to_idle_with_new_peer() {
        let peer = Arc::new(MockPeer::new());
        peer.fail_on("create_offer");
        let mut machine = negotiator(&peer);
        let mut outbox = RecordingOutbox::default();
        assert!(
            machine
                .dispatch(NegotiationEvent::LocalOfferRequested, &mut outbox)
                .await
                .is_err()
        );
        assert_eq!(machine.state(), NegotiationState::Failed);

        let fresh = Arc::new(MockPeer::new());
        machine.reset(Arc::clone(&fresh) as Arc<dyn PeerConnection>);
        assert_eq!(machine.state(), NegotiationState::Idle);
        assert!(!machine.remote_description_set());
        machine
            .dispatch(NegotiationEvent::LocalOfferRequested, &mut outbox)
            .await
            .unwrap();
        assert_eq!(machine.state(), NegotiationState::OfferSent);
        assert_eq!(fresh.calls()[0], PeerCall::CreateOffer);
    }

    #[tokio::test]
    async fn end_of_gathering_is_not_transmitted() {
        let peer = Arc::new(MockPeer::new());
        let mut machine = negotiator(&peer);
        let mut outbox = RecordingOutbox::default();

        machine
            .dispatch(
                NegotiationEvent::LocalCandidateDiscovered(Some(candidate("candidate:local"))),
                &mut outbox,
            )
            .await
            .unwrap();
        machine
            .dispatch(NegotiationEvent::LocalCandidateDiscovered(None), &mut outbox)
            .await
            .unwrap();

        assert_eq!(outbox.trickles, vec![candidate("candidate:local")]);
        assert!(outbox.requests.is_empty());
    }
}
