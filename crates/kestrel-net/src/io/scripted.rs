//! In-memory [`NetIo`] for driving the WebSocket state machine in tests.
//!
//! A [`ScriptHandle`] plays the server: it decides when connects complete,
//! answers the upgrade request, queues server frames and reads back the
//! client's masked frames.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{IoProgress, NetIo};
use crate::handshake::accept_key;
use crate::url::UrlParts;

/// How the fake server answers the upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeReply {
    /// Valid `101` with the right accept key, followed by these bytes.
    Accept(Vec<u8>),
    /// `101` with a wrong accept key.
    WrongKey,
    /// A non-upgrade status.
    Status(u16),
    /// Never answer.
    Silent,
}

#[derive(Debug)]
pub struct ScriptState {
    pub attempts: u32,
    pub last_url: Option<UrlParts>,
    pub init_result: IoProgress,
    pub connect_ready: bool,
    pub connect_fails: bool,
    pub reply: HandshakeReply,
    pub request: Option<String>,
    pub written: Vec<u8>,
    pub inbound: VecDeque<u8>,
    pub peer_closed: bool,
    pub recv_error: Option<io::ErrorKind>,
    pub send_capacity: Option<usize>,
    pub closes: u32,
    pub open: bool,
}

impl Default for ScriptState {
    fn default() -> Self {
        Self {
            attempts: 0,
            last_url: None,
            init_result: IoProgress::Again,
            connect_ready: true,
            connect_fails: false,
            reply: HandshakeReply::Accept(Vec::new()),
            request: None,
            written: Vec::new(),
            inbound: VecDeque::new(),
            peer_closed: false,
            recv_error: None,
            send_capacity: None,
            closes: 0,
            open: false,
        }
    }
}

pub struct ScriptedIo {
    shared: Arc<Mutex<ScriptState>>,
}

#[derive(Clone)]
pub struct ScriptHandle {
    shared: Arc<Mutex<ScriptState>>,
}

pub fn scripted() -> (ScriptedIo, ScriptHandle) {
    let shared = Arc::new(Mutex::new(ScriptState::default()));
    (
        ScriptedIo {
            shared: Arc::clone(&shared),
        },
        ScriptHandle { shared },
    )
}

impl ScriptHandle {
    pub fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.shared.lock().unwrap()
    }

    /// Queue an unmasked server frame.
    pub fn push_frame(&self, opcode: u8, payload: &[u8]) {
        let frame = server_frame(opcode, payload);
        self.state().inbound.extend(frame);
    }

    /// Queue a close frame with a status code.
    pub fn push_close(&self, code: u16, reason: &str) {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(reason.as_bytes());
        self.push_frame(0x8, &payload);
    }

    /// Decode and drain every masked frame the client has written since the
    /// handshake, as `(opcode, payload)` pairs.
    pub fn take_client_frames(&self) -> Vec<(u8, Vec<u8>)> {
        let mut state = self.state();
        let bytes = std::mem::take(&mut state.written);
        decode_client_frames(&bytes)
    }
}

pub fn server_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0x80 | opcode];
    if payload.len() < 126 {
        out.push(payload.len() as u8);
    } else if payload.len() <= u16::MAX as usize {
        out.push(126);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    }
    out.extend_from_slice(payload);
    out
}

pub fn decode_client_frames(mut bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut frames = Vec::new();
    while bytes.len() >= 2 {
        let opcode = bytes[0] & 0x0F;
        let (len, offset) = match bytes[1] & 0x7F {
            126 => (u16::from_be_bytes([bytes[2], bytes[3]]) as usize, 4),
            127 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[2..10]);
                (u64::from_be_bytes(raw) as usize, 10)
            }
            n => (n as usize, 2),
        };
        let mask = [
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ];
        let start = offset + 4;
        let payload = bytes[start..start + len]
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ mask[i % 4])
            .collect();
        frames.push((opcode, payload));
        bytes = &bytes[start + len..];
    }
    frames
}

fn answer_handshake(state: &mut ScriptState) {
    let Some(end) = state.written.windows(4).position(|w| w == b"\r\n\r\n") else {
        return;
    };
    let request: Vec<u8> = state.written.drain(..end + 4).collect();
    let request = String::from_utf8_lossy(&request).into_owned();
    let key = request
        .lines()
        .find_map(|line| line.strip_prefix("Sec-WebSocket-Key: "))
        .unwrap_or_default()
        .trim()
        .to_string();

    let response = match &state.reply {
        HandshakeReply::Accept(extra) => {
            let mut bytes = format!(
                "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
                 Connection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
                accept_key(&key)
            )
            .into_bytes();
            bytes.extend_from_slice(extra);
            bytes
        }
        HandshakeReply::WrongKey => b"HTTP/1.1 101 Switching Protocols\r\n\
              Sec-WebSocket-Accept: d3Jvbmc=\r\n\r\n"
            .to_vec(),
        HandshakeReply::Status(code) => {
            format!("HTTP/1.1 {code} Nope\r\nContent-Length: 0\r\n\r\n").into_bytes()
        }
        HandshakeReply::Silent => Vec::new(),
    };
    state.inbound.extend(response);
    state.request = Some(request);
}

impl NetIo for ScriptedIo {
    fn connect_init(&mut self, url: &UrlParts) -> IoProgress {
        let mut state = self.shared.lock().unwrap();
        state.attempts += 1;
        state.last_url = Some(url.clone());
        state.request = None;
        state.written.clear();
        state.inbound.clear();
        state.peer_closed = false;
        state.open = state.init_result != IoProgress::Failed;
        state.init_result
    }

    fn connect_tick(&mut self) -> IoProgress {
        let state = self.shared.lock().unwrap();
        if !state.open || state.connect_fails {
            IoProgress::Failed
        } else if state.connect_ready {
            IoProgress::Done
        } else {
            IoProgress::Again
        }
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.shared.lock().unwrap();
        if !state.open {
            return Err(io::ErrorKind::NotConnected.into());
        }
        let n = match state.send_capacity {
            Some(0) if !data.is_empty() => return Err(io::ErrorKind::WouldBlock.into()),
            Some(cap) => cap.min(data.len()),
            None => data.len(),
        };
        if let Some(cap) = state.send_capacity.as_mut() {
            *cap -= n;
        }
        state.written.extend_from_slice(&data[..n]);
        if state.request.is_none() {
            answer_handshake(&mut state);
        }
        Ok(n)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.shared.lock().unwrap();
        if !state.open {
            return Err(io::ErrorKind::NotConnected.into());
        }
        if state.inbound.is_empty() {
            if let Some(kind) = state.recv_error.take() {
                return Err(kind.into());
            }
            if state.peer_closed {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn close(&mut self) {
        let mut state = self.shared.lock().unwrap();
        if state.open {
            state.closes += 1;
        }
        state.open = false;
    }
}
