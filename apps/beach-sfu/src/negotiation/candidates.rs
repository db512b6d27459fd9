use std::collections::VecDeque;

use tokio::sync::mpsc;

use crate::protocol::IceCandidateRecord;

/// Receiving half of a [`LocalCandidateSink`]. `None` marks end-of-gathering.
pub type LocalCandidateStream = mpsc::UnboundedReceiver<Option<IceCandidateRecord>>;

/// Hands locally gathered candidates from a peer-connection callback to the
/// session loop, which is the only place negotiation state is touched.
#[derive(Debug, Clone)]
pub struct LocalCandidateSink {
    tx: mpsc::UnboundedSender<Option<IceCandidateRecord>>,
}

impl LocalCandidateSink {
    pub fn channel() -> (Self, LocalCandidateStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the session has stopped listening.
    pub fn discovered(&self, candidate: IceCandidateRecord) -> bool {
        self.tx.send(Some(candidate)).is_ok()
    }

    pub fn gathering_complete(&self) -> bool {
        self.tx.send(None).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Remote candidates that arrived before any remote description.
#[derive(Debug, Default)]
pub(crate) struct RemoteCandidateBuffer {
    queued: VecDeque<IceCandidateRecord>,
}

impl RemoteCandidateBuffer {
    pub(crate) fn push(&mut self, candidate: IceCandidateRecord) {
        self.queued.push_back(candidate);
    }

    pub(crate) fn pop(&mut self) -> Option<IceCandidateRecord> {
        self.queued.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.queued.len()
    }

    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.queued.len();
        self.queued.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CandidateInit;

    fn candidate(n: u32) -> IceCandidateRecord {
        IceCandidateRecord::new(
            0,
            CandidateInit {
                candidate: format!("candidate:{n}"),
                ..Default::default()
            },
        )
    }

    #[test]
    fn buffer_preserves_arrival_order() {
        let mut buffer = RemoteCandidateBuffer::default();
        buffer.push(candidate(1));
        buffer.push(candidate(2));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.pop(), Some(candidate(1)));
        assert_eq!(buffer.pop(), Some(candidate(2)));
        assert_eq!(buffer.pop(), None);
    }

    #[tokio::test]
    async fn sink_reports_closed_receiver() {
        let (sink, mut stream) = LocalCandidateSink::channel();
        assert!(sink.discovered(candidate(1)));
        assert!(sink.gathering_complete());
        assert_eq!(stream.recv().await, Some(Some(candidate(1))));
        assert_eq!(stream.recv().await, Some(None));
        drop(stream);
        assert!(sink.is_closed());
        assert!(!sink.discovered(candidate(2)));
    }
}
