//! Reference AVDTP signaling session.
//!
//! [`Subject`] implements [`Session`] on top of one end of a
//! [`SeqPacket`] pair. It answers the commands the conformance peer sends as
//! acceptor, issues commands as initiator when asked to, and reports
//! confirmations on the event queue it was created with.
//!
//! All state lives in a single mutex-protected state machine. A reader task
//! feeds it incoming frames; requests lock it, build their command, and write
//! it before releasing the lock, so frames leave in the order they were
//! produced.

mod header;
mod state;

use std::io;
use std::os::unix::io::OwnedFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use avdtp_spec_proto::{
    EventSender, LocalSep, LocalSepConfig, Packet, RemoteSep, SeqPacket, ServiceCapability,
    Session, SessionError, SessionParams, StreamHandle,
};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::state::{Outgoing, State};

/// A signaling session bound to one end of the channel.
pub struct Subject {
    inner: Arc<Inner>,
    reader: JoinHandle<()>,
}

struct Inner {
    endpoint: SeqPacket,
    params: SessionParams,
    events: EventSender,
    state: Mutex<State>,
    closed: AtomicBool,
}

impl Inner {
    fn write(&self, frame: &[u8]) -> io::Result<()> {
        let written = self.endpoint.try_send(frame)?;
        if written != frame.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short signaling write: {} of {} bytes", written, frame.len()),
            ));
        }
        tracing::trace!(len = frame.len(), "signaling frame sent");
        Ok(())
    }

    /// Run a request against the state machine and write its command.
    fn request<T>(
        &self,
        f: impl FnOnce(&mut State) -> Result<(T, Bytes), SessionError>,
    ) -> Result<T, SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }

        let mut state = self.state.lock();
        let (value, frame) = f(&mut *state)?;
        if let Err(e) = self.write(&frame) {
            state.abort_outstanding();
            tracing::warn!(error = %e, "failed to send command");
            return Err(e.into());
        }
        Ok(value)
    }

    fn handle_frame(&self, data: &[u8]) {
        let events = {
            let mut state = self.state.lock();
            let mut events = Vec::new();
            for outgoing in state.handle_frame(data) {
                match outgoing {
                    Outgoing::Frame(frame) => {
                        if let Err(e) = self.write(&frame) {
                            tracing::warn!(error = %e, "failed to send signaling frame");
                        }
                    }
                    Outgoing::Event(event) => events.push(event),
                }
            }
            events
        };

        for event in events {
            match event.error() {
                Some(error) => {
                    tracing::debug!(event = event.name(), %error, "delivering failed confirmation");
                }
                None => tracing::debug!(event = event.name(), "delivering confirmation"),
            }
            if self.events.send(event).is_err() {
                tracing::trace!("event queue closed, confirmation dropped");
            }
        }
    }
}

async fn read_loop(inner: Arc<Inner>) {
    let mut buf = vec![0u8; usize::from(inner.params.imtu)];

    loop {
        match inner.endpoint.recv(&mut buf).await {
            Ok(Packet::Data(n)) => inner.handle_frame(&buf[..n]),
            Ok(Packet::Truncated { len }) => {
                tracing::warn!(
                    len,
                    imtu = inner.params.imtu,
                    "dropping signaling frame larger than the MTU"
                );
            }
            Ok(Packet::Empty) => {
                tracing::trace!("ignoring empty signaling datagram");
            }
            Ok(Packet::Hangup) => {
                tracing::debug!("signaling channel closed by remote");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "signaling read failed");
                break;
            }
        }
    }

    inner.closed.store(true, Ordering::Release);
}

impl Session for Subject {
    fn create(endpoint: SeqPacket, params: SessionParams, events: EventSender) -> io::Result<Self> {
        tracing::debug!(
            fd = endpoint.as_raw_fd(),
            imtu = params.imtu,
            omtu = params.omtu,
            version = params.version,
            "creating session"
        );

        let inner = Arc::new(Inner {
            endpoint,
            params,
            events,
            state: Mutex::new(State::new(params)),
            closed: AtomicBool::new(false),
        });
        let reader = tokio::spawn(read_loop(Arc::clone(&inner)));

        Ok(Self { inner, reader })
    }

    fn shutdown(self) {
        tracing::debug!("session shut down");
    }

    fn register_sep(&self, config: LocalSepConfig) -> Result<LocalSep, SessionError> {
        self.inner.state.lock().register_sep(config)
    }

    fn unregister_sep(&self, sep: LocalSep) -> Result<(), SessionError> {
        self.inner.state.lock().unregister_sep(sep)
    }

    fn discover(&self) -> Result<(), SessionError> {
        self.inner
            .request(|state| state.discover().map(|frame| ((), frame)))
    }

    fn find_remote_sep(&self, local: LocalSep) -> Option<RemoteSep> {
        self.inner.state.lock().find_remote_sep(local)
    }

    fn set_configuration(
        &self,
        remote: &RemoteSep,
        local: LocalSep,
        caps: Vec<ServiceCapability>,
    ) -> Result<StreamHandle, SessionError> {
        self.inner
            .request(|state| state.set_configuration(remote, local, caps))
    }

    fn get_configuration(&self, stream: StreamHandle) -> Result<(), SessionError> {
        self.inner
            .request(|state| state.get_configuration(stream).map(|frame| ((), frame)))
    }

    fn open(&self, stream: StreamHandle) -> Result<(), SessionError> {
        self.inner
            .request(|state| state.open(stream).map(|frame| ((), frame)))
    }

    fn set_transport(
        &self,
        stream: StreamHandle,
        transport: OwnedFd,
        imtu: u16,
        omtu: u16,
    ) -> Result<(), SessionError> {
        self.inner
            .state
            .lock()
            .set_transport(stream, transport, imtu, omtu)
    }

    fn start(&self, stream: StreamHandle) -> Result<(), SessionError> {
        self.inner
            .request(|state| state.start(stream).map(|frame| ((), frame)))
    }
}

impl Drop for Subject {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use avdtp_spec_proto::signal::CODEC_SBC;
    use avdtp_spec_proto::{MediaType, SepType, SessionEvent, event_channel};

    use super::*;

    async fn recv_frame(endpoint: &SeqPacket) -> Vec<u8> {
        let mut buf = [0u8; 512];
        let packet = tokio::time::timeout(Duration::from_secs(5), endpoint.recv(&mut buf))
            .await
            .expect("timed out waiting for frame")
            .unwrap();
        match packet {
            Packet::Data(n) => buf[..n].to_vec(),
            other => panic!("expected data, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_answers_discover() {
        let (harness, endpoint) = SeqPacket::pair().unwrap();
        let (tx, _rx) = event_channel();
        let subject = Subject::create(endpoint, SessionParams::default(), tx).unwrap();
        subject
            .register_sep(LocalSepConfig::new(SepType::Source, MediaType::Audio, CODEC_SBC))
            .unwrap();

        harness.send(&[0x00, 0x01]).await.unwrap();
        assert_eq!(recv_frame(&harness).await, vec![0x02, 0x01, 0x04, 0x00]);
    }

    #[tokio::test]
    async fn test_discovery_reports_event() {
        let (harness, endpoint) = SeqPacket::pair().unwrap();
        let (tx, mut rx) = event_channel();
        let subject = Subject::create(endpoint, SessionParams::default(), tx).unwrap();

        subject.discover().unwrap();
        assert_eq!(recv_frame(&harness).await, vec![0x00, 0x01]);
        assert!(matches!(subject.discover(), Err(SessionError::Busy)));

        // No remote SEPs, so discovery completes without capability requests.
        harness.send(&[0x02, 0x01]).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            SessionEvent::Discovered {
                seps: Vec::new(),
                error: None
            }
        );
    }

    #[tokio::test]
    async fn test_requests_fail_after_hangup() {
        let (harness, endpoint) = SeqPacket::pair().unwrap();
        let (tx, _rx) = event_channel();
        let subject = Subject::create(endpoint, SessionParams::default(), tx).unwrap();

        drop(harness);
        for _ in 0..100 {
            if subject.inner.closed.load(Ordering::Acquire) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(matches!(subject.discover(), Err(SessionError::Closed)));
    }
}
