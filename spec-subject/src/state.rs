//! Signaling state machine of the reference subject.
//!
//! Everything here is synchronous: an incoming frame or a local request goes
//! in, frames to write and events to deliver come out. The owning task does
//! the I/O.

use std::collections::VecDeque;
use std::os::unix::io::OwnedFd;

use avdtp_spec_proto::caps::{
    category, check_capabilities, encode_capabilities, parse_capabilities,
};
use avdtp_spec_proto::signal::{
    MediaType, MessageType, PacketType, SepType, VERSION_1_3, error_code, signal_id,
};
use avdtp_spec_proto::{
    AvdtpError, LocalSep, LocalSepConfig, RemoteSep, ServiceCapability, SessionError,
    SessionEvent, SessionParams, StreamHandle,
};
use bytes::{BufMut, Bytes, BytesMut};

use crate::header::{HEADER_LEN, Header};

/// Highest SEID the protocol can address.
const MAX_SEID: u8 = 0x3E;

/// Something the owning task has to do after a state transition.
#[derive(Debug)]
pub(crate) enum Outgoing {
    Frame(Bytes),
    Event(SessionEvent),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StreamState {
    /// SET_CONFIGURATION sent, no answer yet.
    Configuring,
    Configured,
    Open,
    Streaming,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Initiator,
    Acceptor,
}

struct Stream {
    handle: StreamHandle,
    role: Role,
    local_seid: u8,
    remote_seid: u8,
    state: StreamState,
    caps: Vec<ServiceCapability>,
    transport: Option<(OwnedFd, u16, u16)>,
}

struct LocalEndpoint {
    seid: u8,
    config: LocalSepConfig,
    in_use: bool,
}

#[derive(Clone, Copy, Debug)]
enum Pending {
    Discover,
    Capabilities { seid: u8 },
    SetConfiguration(StreamHandle),
    GetConfiguration(StreamHandle),
    Open(StreamHandle),
    Start(StreamHandle),
}

struct Outstanding {
    label: u8,
    signal_id: u8,
    pending: Pending,
}

/// Reject payload for a command.
struct Reject(Vec<u8>);

impl Reject {
    fn code(code: u8) -> Self {
        Reject(vec![code])
    }

    fn category(category: u8, code: u8) -> Self {
        Reject(vec![category, code])
    }

    fn seid(seid: u8, code: u8) -> Self {
        Reject(vec![seid << 2, code])
    }
}

type Reply = Result<Vec<u8>, Reject>;

pub(crate) struct State {
    params: SessionParams,
    next_label: u8,
    next_stream: u32,
    local: Vec<LocalEndpoint>,
    remote: Vec<RemoteSep>,
    /// Remote SEIDs whose capabilities are still to be fetched.
    discovery: VecDeque<u8>,
    streams: Vec<Stream>,
    outstanding: Option<Outstanding>,
}

impl State {
    pub fn new(params: SessionParams) -> Self {
        Self {
            params,
            next_label: params.first_transaction & 0x0F,
            next_stream: 1,
            local: Vec::new(),
            remote: Vec::new(),
            discovery: VecDeque::new(),
            streams: Vec::new(),
            outstanding: None,
        }
    }

    // =========================================================================
    // Local requests
    // =========================================================================

    pub fn register_sep(&mut self, config: LocalSepConfig) -> Result<LocalSep, SessionError> {
        check_capabilities(&config.capabilities)?;
        let seid = (1..=MAX_SEID)
            .find(|seid| !self.local.iter().any(|e| e.seid == *seid))
            .ok_or(SessionError::BadState("no free SEID"))?;

        tracing::debug!(seid, sep_type = ?config.sep_type, "registered local SEP");
        self.local.push(LocalEndpoint {
            seid,
            config,
            in_use: false,
        });
        Ok(LocalSep { seid })
    }

    pub fn unregister_sep(&mut self, sep: LocalSep) -> Result<(), SessionError> {
        let index = self
            .local
            .iter()
            .position(|e| e.seid == sep.seid)
            .ok_or(SessionError::UnknownHandle)?;
        self.local.remove(index);
        self.streams.retain(|s| s.local_seid != sep.seid);
        tracing::debug!(seid = sep.seid, "unregistered local SEP");
        Ok(())
    }

    pub fn discover(&mut self) -> Result<Bytes, SessionError> {
        let frame = self.command(signal_id::DISCOVER, Pending::Discover, &[])?;
        self.remote.clear();
        self.discovery.clear();
        Ok(frame)
    }

    pub fn find_remote_sep(&self, local: LocalSep) -> Option<RemoteSep> {
        let endpoint = self.local.iter().find(|e| e.seid == local.seid)?;

        self.remote
            .iter()
            .filter(|r| r.sep_type != endpoint.config.sep_type)
            .filter(|r| r.media_type == endpoint.config.media_type)
            .filter(|r| !r.in_use)
            .filter(|r| !self.streams.iter().any(|s| s.remote_seid == r.seid))
            .find(|r| {
                r.capabilities
                    .iter()
                    .filter_map(|c| c.as_media_codec())
                    .any(|codec| codec.codec_type == endpoint.config.codec)
            })
            .cloned()
    }

    pub fn set_configuration(
        &mut self,
        remote: &RemoteSep,
        local: LocalSep,
        caps: Vec<ServiceCapability>,
    ) -> Result<(StreamHandle, Bytes), SessionError> {
        let endpoint = self
            .local
            .iter()
            .find(|e| e.seid == local.seid)
            .ok_or(SessionError::UnknownHandle)?;
        if endpoint.in_use {
            return Err(SessionError::BadState("local SEP already in use"));
        }

        let handle = StreamHandle(self.next_stream);

        let mut payload = BytesMut::new();
        payload.put_u8(remote.seid << 2);
        payload.put_u8(local.seid << 2);
        encode_capabilities(&caps, &mut payload)?;

        let frame = self.command(
            signal_id::SET_CONFIGURATION,
            Pending::SetConfiguration(handle),
            &payload,
        )?;

        self.next_stream += 1;
        if let Some(endpoint) = self.local.iter_mut().find(|e| e.seid == local.seid) {
            endpoint.in_use = true;
        }
        self.streams.push(Stream {
            handle,
            role: Role::Initiator,
            local_seid: local.seid,
            remote_seid: remote.seid,
            state: StreamState::Configuring,
            caps,
            transport: None,
        });

        Ok((handle, frame))
    }

    pub fn get_configuration(&mut self, stream: StreamHandle) -> Result<Bytes, SessionError> {
        let (state, remote_seid) = self.stream_info(stream)?;
        if state == StreamState::Configuring {
            return Err(SessionError::BadState("stream not configured"));
        }
        self.command(
            signal_id::GET_CONFIGURATION,
            Pending::GetConfiguration(stream),
            &[remote_seid << 2],
        )
    }

    pub fn open(&mut self, stream: StreamHandle) -> Result<Bytes, SessionError> {
        let (state, remote_seid) = self.stream_info(stream)?;
        if state != StreamState::Configured {
            return Err(SessionError::BadState("stream not configured"));
        }
        self.command(signal_id::OPEN, Pending::Open(stream), &[remote_seid << 2])
    }

    pub fn set_transport(
        &mut self,
        stream: StreamHandle,
        transport: OwnedFd,
        imtu: u16,
        omtu: u16,
    ) -> Result<(), SessionError> {
        let entry = self
            .streams
            .iter_mut()
            .find(|s| s.handle == stream)
            .ok_or(SessionError::UnknownHandle)?;
        if entry.state != StreamState::Open {
            return Err(SessionError::BadState("stream not open"));
        }
        tracing::debug!(stream = stream.0, imtu, omtu, "media transport attached");
        entry.transport = Some((transport, imtu, omtu));
        Ok(())
    }

    pub fn start(&mut self, stream: StreamHandle) -> Result<Bytes, SessionError> {
        let (state, remote_seid) = self.stream_info(stream)?;
        if state != StreamState::Open {
            return Err(SessionError::BadState("stream not open"));
        }
        if let Some(entry) = self.streams.iter().find(|s| s.handle == stream)
            && entry.transport.is_none()
        {
            tracing::debug!(stream = stream.0, "starting stream without media transport");
        }
        self.command(signal_id::START, Pending::Start(stream), &[remote_seid << 2])
    }

    /// Forget the outstanding command after its frame failed to go out.
    pub fn abort_outstanding(&mut self) {
        if let Some(Outstanding {
            pending: Pending::SetConfiguration(handle),
            ..
        }) = self.outstanding.take()
        {
            self.drop_stream(handle);
        }
    }

    fn command(
        &mut self,
        signal: u8,
        pending: Pending,
        payload: &[u8],
    ) -> Result<Bytes, SessionError> {
        if self.outstanding.is_some() {
            return Err(SessionError::Busy);
        }

        let label = self.next_label;
        self.next_label = (label + 1) & 0x0F;

        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        Header::single(label, MessageType::Command, signal).write(&mut buf);
        buf.put_slice(payload);

        self.outstanding = Some(Outstanding {
            label,
            signal_id: signal,
            pending,
        });
        Ok(buf.freeze())
    }

    fn stream_info(&self, stream: StreamHandle) -> Result<(StreamState, u8), SessionError> {
        self.streams
            .iter()
            .find(|s| s.handle == stream && s.role == Role::Initiator)
            .map(|s| (s.state, s.remote_seid))
            .ok_or(SessionError::UnknownHandle)
    }

    fn drop_stream(&mut self, handle: StreamHandle) -> Option<u8> {
        let index = self.streams.iter().position(|s| s.handle == handle)?;
        let stream = self.streams.remove(index);
        if let Some(endpoint) = self.local.iter_mut().find(|e| e.seid == stream.local_seid) {
            endpoint.in_use = false;
        }
        Some(stream.local_seid)
    }

    // =========================================================================
    // Incoming frames
    // =========================================================================

    pub fn handle_frame(&mut self, data: &[u8]) -> Vec<Outgoing> {
        let mut out = Vec::new();

        let Some(header) = Header::parse(data) else {
            tracing::warn!(len = data.len(), "dropping signaling frame shorter than a header");
            return out;
        };
        if header.packet_type != PacketType::Single {
            tracing::warn!(packet_type = ?header.packet_type, "fragmented signaling is not supported");
            return out;
        }

        let payload = &data[HEADER_LEN..];
        match header.message_type {
            MessageType::Command => self.handle_command(header, payload, &mut out),
            MessageType::Accept => self.handle_response(header, payload, None, &mut out),
            MessageType::Reject => {
                let error = parse_reject(header.signal_id, payload);
                self.handle_response(header, payload, Some(error), &mut out)
            }
            MessageType::GeneralReject => {
                let error = AvdtpError::new(error_code::NOT_SUPPORTED_COMMAND);
                self.handle_response(header, payload, Some(error), &mut out)
            }
        }
        out
    }

    fn handle_command(&mut self, header: Header, payload: &[u8], out: &mut Vec<Outgoing>) {
        let reply = match header.signal_id {
            signal_id::DISCOVER => self.on_discover(payload),
            signal_id::GET_CAPABILITIES => self.on_get_capabilities(payload, false),
            signal_id::GET_ALL_CAPABILITIES => self.on_get_capabilities(payload, true),
            signal_id::SET_CONFIGURATION => self.on_set_configuration(payload),
            signal_id::GET_CONFIGURATION => self.on_get_configuration(payload),
            signal_id::OPEN => self.on_open(payload),
            signal_id::START => self.on_start(payload),
            signal_id::SUSPEND => self.on_suspend(payload),
            signal_id::CLOSE => self.on_close(payload),
            signal_id::ABORT => self.on_abort(payload),
            other => {
                tracing::debug!(signal_id = other, "general reject for unknown signal");
                let mut buf = BytesMut::with_capacity(HEADER_LEN);
                header.answer(MessageType::GeneralReject).write(&mut buf);
                out.push(Outgoing::Frame(buf.freeze()));
                return;
            }
        };

        let mut buf = BytesMut::new();
        match reply {
            Ok(body) => {
                header.answer(MessageType::Accept).write(&mut buf);
                buf.put_slice(&body);
            }
            Err(Reject(body)) => {
                tracing::debug!(signal_id = header.signal_id, reject = ?body, "rejecting command");
                header.answer(MessageType::Reject).write(&mut buf);
                buf.put_slice(&body);
            }
        }
        out.push(Outgoing::Frame(buf.freeze()));
    }

    fn on_discover(&self, payload: &[u8]) -> Reply {
        if !payload.is_empty() {
            return Err(Reject::code(error_code::BAD_LENGTH));
        }

        let mut body = Vec::with_capacity(self.local.len() * 2);
        for endpoint in &self.local {
            body.push(endpoint.seid << 2 | (endpoint.in_use as u8) << 1);
            body.push((endpoint.config.media_type as u8) << 4 | (endpoint.config.sep_type as u8) << 3);
        }
        Ok(body)
    }

    fn on_get_capabilities(&self, payload: &[u8], all: bool) -> Reply {
        let seid = single_seid(payload).ok_or(Reject::code(error_code::BAD_LENGTH))?;
        let endpoint = self
            .local
            .iter()
            .find(|e| e.seid == seid)
            .ok_or(Reject::code(error_code::BAD_ACP_SEID))?;

        let mut body = BytesMut::new();
        encode_capabilities(&endpoint.config.capabilities, &mut body)
            .map_err(|_| Reject::code(error_code::BAD_PAYLOAD_FORMAT))?;
        // Delay reporting is only advertised through GET_ALL_CAPABILITIES.
        if all && endpoint.config.delay_reporting {
            body.put_u8(category::DELAY_REPORTING);
            body.put_u8(0);
        }
        Ok(body.to_vec())
    }

    fn on_set_configuration(&mut self, payload: &[u8]) -> Reply {
        if payload.len() < 2 {
            return Err(Reject::category(0x00, error_code::BAD_LENGTH));
        }
        let acp_seid = payload[0] >> 2;
        let int_seid = payload[1] >> 2;

        let caps = parse_capabilities(&payload[2..])
            .map_err(|_| Reject::category(0x00, error_code::BAD_PAYLOAD_FORMAT))?;

        let endpoint = self
            .local
            .iter_mut()
            .find(|e| e.seid == acp_seid)
            .ok_or(Reject::category(0x00, error_code::BAD_ACP_SEID))?;
        if endpoint.in_use {
            return Err(Reject::category(0x00, error_code::SEP_IN_USE));
        }
        endpoint.in_use = true;

        let handle = StreamHandle(self.next_stream);
        self.next_stream += 1;
        self.streams.push(Stream {
            handle,
            role: Role::Acceptor,
            local_seid: acp_seid,
            remote_seid: int_seid,
            state: StreamState::Configured,
            caps,
            transport: None,
        });
        tracing::debug!(acp_seid, int_seid, stream = handle.0, "configured by remote");
        Ok(Vec::new())
    }

    fn on_get_configuration(&self, payload: &[u8]) -> Reply {
        let seid = single_seid(payload).ok_or(Reject::code(error_code::BAD_LENGTH))?;
        if !self.local.iter().any(|e| e.seid == seid) {
            return Err(Reject::code(error_code::BAD_ACP_SEID));
        }
        let stream = self
            .acceptor_stream(seid)
            .ok_or(Reject::code(error_code::BAD_STATE))?;

        let mut body = BytesMut::new();
        encode_capabilities(&stream.caps, &mut body)
            .map_err(|_| Reject::code(error_code::BAD_PAYLOAD_FORMAT))?;
        Ok(body.to_vec())
    }

    fn on_open(&mut self, payload: &[u8]) -> Reply {
        let seid = single_seid(payload).ok_or(Reject::code(error_code::BAD_LENGTH))?;
        if !self.local.iter().any(|e| e.seid == seid) {
            return Err(Reject::code(error_code::BAD_ACP_SEID));
        }
        let stream = self
            .acceptor_stream_mut(seid)
            .filter(|s| s.state == StreamState::Configured)
            .ok_or(Reject::code(error_code::BAD_STATE))?;
        stream.state = StreamState::Open;
        Ok(Vec::new())
    }

    fn on_start(&mut self, payload: &[u8]) -> Reply {
        self.transition_all(payload, StreamState::Open, StreamState::Streaming)
    }

    fn on_suspend(&mut self, payload: &[u8]) -> Reply {
        self.transition_all(payload, StreamState::Streaming, StreamState::Open)
    }

    /// Move every listed stream from `from` to `to`, or none of them.
    fn transition_all(&mut self, payload: &[u8], from: StreamState, to: StreamState) -> Reply {
        if payload.is_empty() {
            return Err(Reject::seid(0, error_code::BAD_LENGTH));
        }

        for seid in payload.iter().map(|b| b >> 2) {
            if !self.local.iter().any(|e| e.seid == seid) {
                return Err(Reject::seid(seid, error_code::BAD_ACP_SEID));
            }
            if self.acceptor_stream(seid).map(|s| s.state) != Some(from) {
                return Err(Reject::seid(seid, error_code::BAD_STATE));
            }
        }

        for seid in payload.iter().map(|b| b >> 2) {
            if let Some(stream) = self.acceptor_stream_mut(seid) {
                stream.state = to;
            }
        }
        Ok(Vec::new())
    }

    fn on_close(&mut self, payload: &[u8]) -> Reply {
        let seid = single_seid(payload).ok_or(Reject::code(error_code::BAD_LENGTH))?;
        if !self.local.iter().any(|e| e.seid == seid) {
            return Err(Reject::code(error_code::BAD_ACP_SEID));
        }
        let handle = self
            .acceptor_stream(seid)
            .filter(|s| matches!(s.state, StreamState::Open | StreamState::Streaming))
            .map(|s| s.handle)
            .ok_or(Reject::code(error_code::BAD_STATE))?;
        self.drop_stream(handle);
        Ok(Vec::new())
    }

    fn on_abort(&mut self, payload: &[u8]) -> Reply {
        let seid = single_seid(payload).ok_or(Reject::code(error_code::BAD_LENGTH))?;
        if let Some(handle) = self.acceptor_stream(seid).map(|s| s.handle) {
            self.drop_stream(handle);
        }
        Ok(Vec::new())
    }

    fn acceptor_stream(&self, seid: u8) -> Option<&Stream> {
        self.streams
            .iter()
            .find(|s| s.role == Role::Acceptor && s.local_seid == seid)
    }

    fn acceptor_stream_mut(&mut self, seid: u8) -> Option<&mut Stream> {
        self.streams
            .iter_mut()
            .find(|s| s.role == Role::Acceptor && s.local_seid == seid)
    }

    fn handle_response(
        &mut self,
        header: Header,
        payload: &[u8],
        error: Option<AvdtpError>,
        out: &mut Vec<Outgoing>,
    ) {
        let Some(outstanding) = self
            .outstanding
            .take_if(|o| o.label == header.label && o.signal_id == header.signal_id)
        else {
            tracing::warn!(
                label = header.label,
                signal_id = header.signal_id,
                "response for unknown transaction"
            );
            return;
        };

        match outstanding.pending {
            Pending::Discover => {
                if error.is_some() {
                    out.push(Outgoing::Event(SessionEvent::Discovered {
                        seps: Vec::new(),
                        error,
                    }));
                    return;
                }
                self.remote = parse_sep_list(payload);
                self.discovery = self.remote.iter().map(|r| r.seid).collect();
                self.next_capabilities(out);
            }
            Pending::Capabilities { seid } => {
                match error {
                    Some(error) => {
                        tracing::warn!(seid, %error, "capabilities request rejected");
                    }
                    None => match parse_capabilities(payload) {
                        Ok(caps) => {
                            if let Some(remote) = self.remote.iter_mut().find(|r| r.seid == seid) {
                                remote.capabilities = caps;
                            }
                        }
                        Err(e) => tracing::warn!(seid, error = %e, "malformed capabilities"),
                    },
                }
                self.next_capabilities(out);
            }
            Pending::SetConfiguration(handle) => {
                let Some(local_seid) = self.local_seid_of(handle) else {
                    return;
                };
                if error.is_some() {
                    self.drop_stream(handle);
                } else {
                    self.set_state(handle, StreamState::Configured);
                }
                self.confirm(
                    local_seid,
                    SessionEvent::Configured {
                        sep: LocalSep { seid: local_seid },
                        stream: handle,
                        error,
                    },
                    out,
                );
            }
            Pending::GetConfiguration(handle) => {
                let Some(local_seid) = self.local_seid_of(handle) else {
                    return;
                };
                let capabilities = if error.is_none() {
                    parse_capabilities(payload).unwrap_or_default()
                } else {
                    Vec::new()
                };
                self.confirm(
                    local_seid,
                    SessionEvent::ConfigurationReceived {
                        sep: LocalSep { seid: local_seid },
                        stream: handle,
                        capabilities,
                        error,
                    },
                    out,
                );
            }
            Pending::Open(handle) => {
                let Some(local_seid) = self.local_seid_of(handle) else {
                    return;
                };
                if error.is_none() {
                    self.set_state(handle, StreamState::Open);
                }
                self.confirm(
                    local_seid,
                    SessionEvent::Opened {
                        sep: LocalSep { seid: local_seid },
                        stream: handle,
                        error,
                    },
                    out,
                );
            }
            Pending::Start(handle) => {
                let Some(local_seid) = self.local_seid_of(handle) else {
                    return;
                };
                if error.is_none() {
                    self.set_state(handle, StreamState::Streaming);
                }
                self.confirm(
                    local_seid,
                    SessionEvent::Started {
                        sep: LocalSep { seid: local_seid },
                        stream: handle,
                        error,
                    },
                    out,
                );
            }
        }
    }

    /// Ask for the next remote SEP's capabilities, or finish discovery.
    fn next_capabilities(&mut self, out: &mut Vec<Outgoing>) {
        let Some(seid) = self.discovery.pop_front() else {
            out.push(Outgoing::Event(SessionEvent::Discovered {
                seps: self.remote.clone(),
                error: None,
            }));
            return;
        };

        let signal = if self.params.version >= VERSION_1_3 {
            signal_id::GET_ALL_CAPABILITIES
        } else {
            signal_id::GET_CAPABILITIES
        };

        match self.command(signal, Pending::Capabilities { seid }, &[seid << 2]) {
            Ok(frame) => out.push(Outgoing::Frame(frame)),
            Err(e) => tracing::warn!(seid, error = %e, "can't request capabilities"),
        }
    }

    fn local_seid_of(&self, handle: StreamHandle) -> Option<u8> {
        self.streams
            .iter()
            .find(|s| s.handle == handle)
            .map(|s| s.local_seid)
    }

    fn set_state(&mut self, handle: StreamHandle, state: StreamState) {
        if let Some(stream) = self.streams.iter_mut().find(|s| s.handle == handle) {
            tracing::debug!(stream = handle.0, from = ?stream.state, to = ?state, "stream state");
            stream.state = state;
        }
    }

    /// Queue a stream confirmation if the SEP asked for them.
    fn confirm(&self, local_seid: u8, event: SessionEvent, out: &mut Vec<Outgoing>) {
        let wanted = self
            .local
            .iter()
            .any(|e| e.seid == local_seid && e.config.confirmations);
        if wanted {
            out.push(Outgoing::Event(event));
        } else {
            tracing::trace!(event = event.name(), local_seid, "confirmation not requested");
        }
    }
}

fn single_seid(payload: &[u8]) -> Option<u8> {
    match payload {
        [seid] => Some(seid >> 2),
        _ => None,
    }
}

fn parse_sep_list(payload: &[u8]) -> Vec<RemoteSep> {
    if payload.len() % 2 != 0 {
        tracing::warn!(len = payload.len(), "odd-sized SEP list, ignoring trailing byte");
    }

    payload
        .chunks_exact(2)
        .filter_map(|info| {
            let media_type = MediaType::from_bits(info[1] >> 4)?;
            Some(RemoteSep {
                seid: info[0] >> 2,
                in_use: info[0] & 0x02 != 0,
                media_type,
                sep_type: SepType::from_bit(info[1] >> 3),
                capabilities: Vec::new(),
            })
        })
        .collect()
}

fn parse_reject(signal: u8, payload: &[u8]) -> AvdtpError {
    match signal {
        signal_id::SET_CONFIGURATION | signal_id::RECONFIGURE => match payload {
            [category, code, ..] => AvdtpError::with_category(*category, *code),
            _ => AvdtpError::new(error_code::BAD_LENGTH),
        },
        signal_id::START | signal_id::SUSPEND => match payload {
            [_seid, code, ..] => AvdtpError::new(*code),
            _ => AvdtpError::new(error_code::BAD_LENGTH),
        },
        _ => match payload {
            [code, ..] => AvdtpError::new(*code),
            _ => AvdtpError::new(error_code::BAD_LENGTH),
        },
    }
}
