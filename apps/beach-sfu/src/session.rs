//! The signaling session actor.
//!
//! One task owns the negotiation state machine and the correlation table and
//! consumes every event source in turn: handle commands, inbound frames and
//! locally gathered candidates. Nothing else mutates negotiation state, so
//! descriptions and candidates are always applied in a single order.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc, watch};
use tracing::Instrument;
use uuid::Uuid;

use crate::correlation::{CorrelationTable, PendingAction, RandomIds, RequestIds};
use crate::error::SignalingError;
use crate::negotiation::{
    LocalCandidateSink, LocalCandidateStream, NegotiationEvent, NegotiationState, Negotiator,
    OutboundCall, Outbox, PeerConnection,
};
use crate::protocol::{
    self, AnswerParams, IceCandidateRecord, JoinParams, ResponseOutcome, SessionDescriptor,
    SignalingMessage,
};
use crate::transport::DuplexChannel;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// SFU session (room) id carried in `join` and `answer`.
    pub sid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: NegotiationState,
    /// Bumped every time the session is restarted with a new peer connection.
    pub generation: u64,
    pub last_failure: Option<String>,
}

enum Command {
    StartNegotiation,
    Restart(Arc<dyn PeerConnection>),
}

/// Cheap, cloneable control surface for a running [`SignalingSession`].
#[derive(Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SessionStatus>,
    shutdown: Arc<Notify>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Creates the local offer and sends `join`.
    pub fn start_negotiation(&self) -> Result<(), SignalingError> {
        self.commands
            .send(Command::StartNegotiation)
            .map_err(|_| SignalingError::SessionClosed)
    }

    /// Replaces the peer connection after a failed round and returns the
    /// session to `Idle`. Outstanding requests are abandoned.
    pub fn restart(&self, peer: Arc<dyn PeerConnection>) -> Result<(), SignalingError> {
        self.commands
            .send(Command::Restart(peer))
            .map_err(|_| SignalingError::SessionClosed)
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub async fn wait_for_state(
        &self,
        state: NegotiationState,
    ) -> Result<SessionStatus, SignalingError> {
        let mut status = self.status.clone();
        status
            .wait_for(|current| current.state == state)
            .await
            .map(|current| current.clone())
            .map_err(|_| SignalingError::SessionClosed)
    }
}

pub struct SignalingSession {
    id: Uuid,
    sid: String,
    channel: Arc<dyn DuplexChannel>,
    negotiator: Negotiator,
    correlation: CorrelationTable,
    ids: Box<dyn RequestIds>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Candidates from the current peer only; replaced on every restart.
    local_candidates: LocalCandidateStream,
    status: watch::Sender<SessionStatus>,
    shutdown: Arc<Notify>,
    generation: u64,
    last_failure: Option<String>,
}

impl SignalingSession {
    pub fn new(
        channel: Arc<dyn DuplexChannel>,
        peer: Arc<dyn PeerConnection>,
        options: SessionOptions,
    ) -> (Self, SessionHandle) {
        let id = Uuid::new_v4();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (candidate_sink, local_candidates) = LocalCandidateSink::channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus {
            state: NegotiationState::Idle,
            generation: 0,
            last_failure: None,
        });
        let shutdown = Arc::new(Notify::new());

        peer.on_local_candidate(candidate_sink);

        let session = Self {
            id,
            sid: options.sid,
            channel,
            negotiator: Negotiator::new(peer),
            correlation: CorrelationTable::new(),
            ids: Box::new(RandomIds::new()),
            commands: command_rx,
            local_candidates,
            status: status_tx,
            shutdown: Arc::clone(&shutdown),
            generation: 0,
            last_failure: None,
        };
        let handle = SessionHandle {
            session_id: id,
            commands: command_tx,
            status: status_rx,
            shutdown,
        };
        (session, handle)
    }

    pub fn with_request_ids(mut self, ids: impl RequestIds + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Runs until shutdown (`Ok`) or a fatal error. The channel is closed on
    /// the way out either way.
    pub async fn run(mut self) -> Result<(), SignalingError> {
        let span = tracing::info_span!("signaling_session", session = %self.id, sid = %self.sid);
        async move {
            tracing::info!(target = "beach_sfu::session", "signaling session started");
            let result = self.event_loop().await;
            let abandoned = self.correlation.abandon_all();
            self.channel.close().await;
            match &result {
                Ok(()) => tracing::info!(
                    target = "beach_sfu::session",
                    abandoned,
                    "signaling session stopped"
                ),
                Err(err) => tracing::error!(
                    target = "beach_sfu::session",
                    abandoned,
                    error = %err,
                    "signaling session terminated"
                ),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn event_loop(&mut self) -> Result<(), SignalingError> {
        let shutdown = Arc::clone(&self.shutdown);
        let channel = Arc::clone(&self.channel);
        loop {
            let step = tokio::select! {
                biased;
                _ = shutdown.notified() => {
                    tracing::debug!(target = "beach_sfu::session", "shutdown requested");
                    return Ok(());
                }
                Some(command) = self.commands.recv() => self.handle_command(command).await,
                Some(candidate) = self.local_candidates.recv() => {
                    self.dispatch(NegotiationEvent::LocalCandidateDiscovered(candidate)).await
                }
                frame = channel.receive() => match frame {
                    Ok(Some(frame)) => self.handle_frame(&frame).await,
                    Ok(None) => Err(SignalingError::Channel(
                        "signaling channel closed by peer".into(),
                    )),
                    Err(err) => Err(err),
                },
            };
            step?;
        }
    }

    async fn handle_command(&mut self, command: Command) -> Result<(), SignalingError> {
        match command {
            Command::StartNegotiation => self.dispatch(NegotiationEvent::LocalOfferRequested).await,
            Command::Restart(peer) => {
                // Dropping the old stream disconnects the old peer's sink and
                // discards anything it had queued.
                let (sink, stream) = LocalCandidateSink::channel();
                peer.on_local_candidate(sink);
                let stale = std::mem::replace(&mut self.local_candidates, stream);
                let discarded = stale.len();
                drop(stale);
                let abandoned = self.correlation.abandon_all();
                self.negotiator.reset(peer);
                self.generation += 1;
                self.last_failure = None;
                tracing::info!(
                    target = "beach_sfu::session",
                    generation = self.generation,
                    abandoned,
                    discarded_candidates = discarded,
                    "session restarted with a new peer connection"
                );
                self.publish_status();
                Ok(())
            }
        }
    }

    async fn handle_frame(&mut self, frame: &[u8]) -> Result<(), SignalingError> {
        let message = match protocol::decode(frame) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(
                    target = "beach_sfu::session",
                    error = %err,
                    frame = %String::from_utf8_lossy(frame),
                    "dropping undecodable frame"
                );
                return Ok(());
            }
        };
        tracing::trace!(
            target = "beach_sfu::session",
            method = message.method().unwrap_or("response"),
            id = ?message.id(),
            "frame received"
        );

        match message {
            SignalingMessage::Response { id, outcome } => self.handle_response(id, outcome).await,
            SignalingMessage::Offer { id, offer } => {
                self.dispatch(NegotiationEvent::RemoteOfferReceived { id, offer })
                    .await
            }
            SignalingMessage::Trickle(candidate) => {
                self.dispatch(NegotiationEvent::RemoteCandidateReceived(candidate))
                    .await
            }
            SignalingMessage::Join { id, .. } | SignalingMessage::Answer { id, .. } => {
                tracing::warn!(
                    target = "beach_sfu::session",
                    id,
                    "dropping client-only request received from server"
                );
                Ok(())
            }
        }
    }

    async fn handle_response(
        &mut self,
        id: u64,
        outcome: ResponseOutcome,
    ) -> Result<(), SignalingError> {
        let action = match self.correlation.resolve(id) {
            Ok(action) => action,
            Err(err) => {
                tracing::warn!(
                    target = "beach_sfu::session",
                    error = %err,
                    "dropping response"
                );
                return Ok(());
            }
        };

        match (action, outcome) {
            (PendingAction::AwaitInitialAnswer, ResponseOutcome::Result(result)) => {
                match serde_json::from_value::<SessionDescriptor>(result) {
                    Ok(answer) => {
                        self.dispatch(NegotiationEvent::RemoteAnswerReceived(answer))
                            .await
                    }
                    Err(err) => {
                        let failure = self
                            .negotiator
                            .abort_round("join", format!("unusable answer: {err}"));
                        self.settle(Err(failure))
                    }
                }
            }
            (PendingAction::AwaitInitialAnswer, ResponseOutcome::Error(err)) => {
                let failure = self
                    .negotiator
                    .abort_round("join", format!("server rejected join: {err}"));
                self.settle(Err(failure))
            }
            (PendingAction::AwaitRenegotiationAck, ResponseOutcome::Result(_)) => {
                tracing::debug!(target = "beach_sfu::session", id, "answer acknowledged");
                Ok(())
            }
            (PendingAction::AwaitRenegotiationAck, ResponseOutcome::Error(err)) => {
                tracing::warn!(
                    target = "beach_sfu::session",
                    id,
                    error = %err,
                    "server rejected answer"
                );
                Ok(())
            }
        }
    }

    async fn dispatch(&mut self, event: NegotiationEvent) -> Result<(), SignalingError> {
        let mut outbox = SessionOutbox {
            channel: self.channel.as_ref(),
            correlation: &mut self.correlation,
            ids: self.ids.as_mut(),
            sid: &self.sid,
        };
        let result = self.negotiator.dispatch(event, &mut outbox).await;
        self.settle(result)
    }

    /// Keeps non-fatal errors inside the session and publishes the new status.
    fn settle(&mut self, result: Result<(), SignalingError>) -> Result<(), SignalingError> {
        let outcome = match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_fatal() => Err(err),
            Err(err @ SignalingError::NegotiationFailed { .. }) => {
                self.last_failure = Some(err.to_string());
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    target = "beach_sfu::session",
                    error = %err,
                    "signaling event dropped"
                );
                Ok(())
            }
        };
        self.publish_status();
        outcome
    }

    fn publish_status(&self) {
        let next = SessionStatus {
            state: self.negotiator.state(),
            generation: self.generation,
            last_failure: self.last_failure.clone(),
        };
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

struct SessionOutbox<'a> {
    channel: &'a dyn DuplexChannel,
    correlation: &'a mut CorrelationTable,
    ids: &'a mut dyn RequestIds,
    sid: &'a str,
}

async fn write(
    channel: &dyn DuplexChannel,
    message: &SignalingMessage,
) -> Result<(), SignalingError> {
    let frame = protocol::encode(message)?;
    channel.send(frame).await
}

#[async_trait]
impl<'a> Outbox for SessionOutbox<'a> {
    async fn request(
        &mut self,
        call: OutboundCall,
        action: PendingAction,
    ) -> Result<u64, SignalingError> {
        let id = self.ids.next_id();
        self.correlation.register(id, action)?;
        let sid = self.sid.to_string();
        let message = match call {
            OutboundCall::Join(offer) => SignalingMessage::Join {
                id,
                params: JoinParams { sid, offer },
            },
            OutboundCall::Answer(answer) => SignalingMessage::Answer {
                id,
                params: AnswerParams { sid, answer },
            },
        };
        if let Err(err) = write(self.channel, &message).await {
            // Nothing was sent, so no response can ever match this id.
            let _ = self.correlation.resolve(id);
            return Err(err);
        }
        tracing::debug!(
            target = "beach_sfu::session",
            id,
            method = message.method().unwrap_or_default(),
            "request sent"
        );
        if action == PendingAction::AwaitRenegotiationAck {
            // Unacknowledged answers stay pending until restart or teardown.
            tracing::debug!(
                target = "beach_sfu::session",
                id,
                pending = self.correlation.len(),
                "answer registered; acknowledgement optional"
            );
        }
        Ok(id)
    }

    async fn trickle(&mut self, candidate: IceCandidateRecord) -> Result<(), SignalingError> {
        write(self.channel, &SignalingMessage::Trickle(candidate)).await
    }
}
