//! Pending-call table.
//!
//! Maps in-flight session ids to result slots and resolves each slot exactly
//! once. The exactly-once contract rides on the atomicity of map removal:
//! whoever removes the entry (the read loop delivering a response, a caller
//! timing out, or the drain on connection loss) owns the slot, and a oneshot
//! sender can only fire once anyway.
//!
//! Whatever the outcome, the session id is released back to the allocator
//! exactly once, on the same path that removed the entry.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::compression::{decompress, Compression};
use crate::error::{Result, RpcError};
use crate::protocol::DecodedFrame;
use crate::session::SessionAllocator;

/// Completion slot for one pending call.
pub(crate) type ResultSlot = oneshot::Sender<Result<Bytes>>;

/// Client-side table of calls awaiting a response.
pub(crate) struct Dispatcher {
    pending: DashMap<u16, ResultSlot>,
    sessions: Arc<SessionAllocator>,
    closed: AtomicBool,
}

impl Dispatcher {
    pub(crate) fn new(sessions: Arc<SessionAllocator>) -> Self {
        Self {
            pending: DashMap::new(),
            sessions,
            closed: AtomicBool::new(false),
        }
    }

    /// Register a slot for a freshly allocated session id.
    ///
    /// Must happen before the request is handed to the writer, otherwise the
    /// response could arrive before the slot exists.
    ///
    /// # Errors
    ///
    /// [`RpcError::ConnectionClosed`] once the connection is down; no new call
    /// may register a slot nothing will resolve. The caller still owns the
    /// session id on this path and must release it.
    pub(crate) fn register(&self, session: u16, slot: ResultSlot) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::ConnectionClosed);
        }
        self.pending.insert(session, slot);

        // close_all may have drained between the check and the insert; its
        // snapshot would then miss this entry. Re-drain under the flag so the
        // slot is failed rather than leaked.
        if self.closed.load(Ordering::Acquire) {
            self.drain();
        }
        Ok(())
    }

    /// Deliver a decoded frame to its pending call.
    ///
    /// A frame for an unknown session is dropped with a log line; this is the
    /// normal aftermath of a call that already failed locally (timeout) and
    /// released its id.
    pub(crate) fn on_frame(&self, decoded: DecodedFrame) {
        let session = decoded.session();

        let Some((_, slot)) = self.pending.remove(&session) else {
            tracing::debug!(session, "response for unknown session, dropping");
            return;
        };
        self.sessions.release(session);

        // Entry is out of the map; resolution happens outside any shard lock
        // so slow receivers cannot stall the read loop.
        let result = Self::resolve(decoded);
        if slot.send(result).is_err() {
            tracing::debug!(session, "pending call abandoned before resolution");
        }
    }

    /// Turn a decoded frame into the caller-visible call result.
    fn resolve(decoded: DecodedFrame) -> Result<Bytes> {
        match decoded {
            DecodedFrame::ChecksumMismatch {
                expected, actual, ..
            } => Err(RpcError::ChecksumMismatch { expected, actual }),
            DecodedFrame::Valid(frame) => {
                let compression = Compression::from_wire(frame.header.compression)?;
                let body = if compression.is_identity() {
                    frame.body
                } else {
                    Bytes::from(decompress(compression, &frame.body)?)
                };
                if frame.header.is_error() {
                    Err(RpcError::Remote(
                        String::from_utf8_lossy(&body).into_owned(),
                    ))
                } else {
                    Ok(body)
                }
            }
        }
    }

    /// Drop a pending call locally (caller-side timeout or cancellation).
    ///
    /// Removes the slot and releases the session id; a real response arriving
    /// later finds no slot and is dropped by [`Dispatcher::on_frame`].
    pub(crate) fn forget(&self, session: u16) {
        if self.pending.remove(&session).is_some() {
            self.sessions.release(session);
        }
    }

    /// Fail every still-pending call with a connection-closed error and
    /// refuse registrations from then on.
    pub(crate) fn close_all(&self) {
        // Flag first: a register racing with the drain either sees the flag
        // and fails fast, or inserts and then re-drains itself.
        self.closed.store(true, Ordering::Release);
        self.drain();
    }

    /// Fail every slot currently in the table.
    ///
    /// Snapshot semantics: a slot resolved concurrently by `on_frame` during
    /// the drain is simply gone by the time its key is revisited.
    fn drain(&self) {
        let sessions: Vec<u16> = self.pending.iter().map(|entry| *entry.key()).collect();
        tracing::debug!(pending = sessions.len(), "failing pending calls on close");

        for session in sessions {
            if let Some((_, slot)) = self.pending.remove(&session) {
                self.sessions.release(session);
                let _ = slot.send(Err(RpcError::ConnectionClosed));
            }
        }
    }

    /// Number of calls currently awaiting a response.
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum;
    use crate::protocol::{flags, Frame, Header};

    fn dispatcher() -> (Dispatcher, Arc<SessionAllocator>) {
        let sessions = Arc::new(SessionAllocator::new());
        (Dispatcher::new(sessions.clone()), sessions)
    }

    fn valid_frame(session: u16, body: &[u8]) -> DecodedFrame {
        let header = Header::new(
            Compression::None.to_wire(),
            0,
            session,
            body.len() as u32,
            checksum(body),
            1,
        );
        DecodedFrame::Valid(Frame::new(header, Bytes::copy_from_slice(body)))
    }

    fn error_frame(session: u16, message: &str) -> DecodedFrame {
        let body = message.as_bytes();
        let header = Header::new(
            Compression::None.to_wire(),
            flags::ERROR,
            session,
            body.len() as u32,
            checksum(body),
            1,
        );
        DecodedFrame::Valid(Frame::new(header, Bytes::copy_from_slice(body)))
    }

    #[tokio::test]
    async fn test_response_resolves_slot_and_releases_session() {
        let (dispatcher, sessions) = dispatcher();
        let session = sessions.next().unwrap();
        let (tx, rx) = oneshot::channel();
        dispatcher.register(session, tx).unwrap();

        dispatcher.on_frame(valid_frame(session, b"pong"));

        assert_eq!(rx.await.unwrap().unwrap(), Bytes::from_static(b"pong"));
        assert_eq!(sessions.in_flight(), 0);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_session_dropped() {
        let (dispatcher, sessions) = dispatcher();
        dispatcher.on_frame(valid_frame(999, b"late"));
        assert_eq!(sessions.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_fails_call_and_releases() {
        let (dispatcher, sessions) = dispatcher();
        let session = sessions.next().unwrap();
        let (tx, rx) = oneshot::channel();
        dispatcher.register(session, tx).unwrap();

        let header = Header::new(1, 0, session, 4, 0xBAD, 1);
        dispatcher.on_frame(DecodedFrame::ChecksumMismatch {
            header,
            expected: 0xBAD,
            actual: 0xFACE,
        });

        assert!(matches!(
            rx.await.unwrap(),
            Err(RpcError::ChecksumMismatch { .. })
        ));
        assert_eq!(sessions.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_error_frame_resolves_as_remote_error() {
        let (dispatcher, sessions) = dispatcher();
        let session = sessions.next().unwrap();
        let (tx, rx) = oneshot::channel();
        dispatcher.register(session, tx).unwrap();

        dispatcher.on_frame(error_frame(session, "unknown method: 0x00000007"));

        match rx.await.unwrap() {
            Err(RpcError::Remote(msg)) => assert!(msg.contains("unknown method")),
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsupported_compression_fails_single_call() {
        let (dispatcher, sessions) = dispatcher();
        let session = sessions.next().unwrap();
        let (tx, rx) = oneshot::channel();
        dispatcher.register(session, tx).unwrap();

        let body = b"whatever";
        let header = Header::new(0x7F, 0, session, body.len() as u32, checksum(body), 1);
        dispatcher.on_frame(DecodedFrame::Valid(Frame::new(
            header,
            Bytes::from_static(body),
        )));

        assert!(matches!(
            rx.await.unwrap(),
            Err(RpcError::UnsupportedCompression(0x7F))
        ));
        assert_eq!(sessions.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_forget_then_late_response() {
        let (dispatcher, sessions) = dispatcher();
        let session = sessions.next().unwrap();
        let (tx, mut rx) = oneshot::channel();
        dispatcher.register(session, tx).unwrap();

        dispatcher.forget(session);
        assert_eq!(sessions.in_flight(), 0);

        // The real response arrives afterwards; nothing must blow up and the
        // (dropped) receiver must never see a second resolution.
        dispatcher.on_frame(valid_frame(session, b"late"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_all_fails_every_pending_call_once() {
        let (dispatcher, sessions) = dispatcher();
        let mut receivers = Vec::new();
        for _ in 0..5 {
            let session = sessions.next().unwrap();
            let (tx, rx) = oneshot::channel();
            dispatcher.register(session, tx).unwrap();
            receivers.push(rx);
        }

        dispatcher.close_all();

        for rx in receivers {
            assert!(matches!(rx.await.unwrap(), Err(RpcError::ConnectionClosed)));
        }
        assert_eq!(sessions.in_flight(), 0);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_register_after_close_fails_fast() {
        let (dispatcher, sessions) = dispatcher();
        dispatcher.close_all();

        let session = sessions.next().unwrap();
        let (tx, mut rx) = oneshot::channel();

        // A closed dispatcher must refuse the slot outright; the caller keeps
        // ownership of the session id and nothing is left pending.
        assert!(matches!(
            dispatcher.register(session, tx),
            Err(RpcError::ConnectionClosed)
        ));
        assert_eq!(dispatcher.pending_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_register_racing_close_is_drained() {
        let (dispatcher, sessions) = dispatcher();
        let session = sessions.next().unwrap();
        let (tx, rx) = oneshot::channel();
        dispatcher.register(session, tx).unwrap();

        // close_all before another register lands: the late slot must be
        // failed by the re-drain, never silently parked.
        dispatcher.close_all();
        let late = sessions.next().unwrap();
        let (late_tx, late_rx) = oneshot::channel();
        let registered = dispatcher.register(late, late_tx);

        assert!(matches!(rx.await.unwrap(), Err(RpcError::ConnectionClosed)));
        match registered {
            Err(RpcError::ConnectionClosed) => {}
            Ok(()) => {
                assert!(matches!(
                    late_rx.await.unwrap(),
                    Err(RpcError::ConnectionClosed)
                ));
            }
            Err(other) => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_race_between_response_and_close_resolves_once() {
        let (dispatcher, sessions) = dispatcher();
        let session = sessions.next().unwrap();
        let (tx, rx) = oneshot::channel();
        dispatcher.register(session, tx).unwrap();

        dispatcher.on_frame(valid_frame(session, b"won"));
        dispatcher.close_all();

        // The frame won; close_all must not have produced a second outcome.
        assert_eq!(rx.await.unwrap().unwrap(), Bytes::from_static(b"won"));
    }
}
