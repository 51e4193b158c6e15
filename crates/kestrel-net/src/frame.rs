//! WebSocket frame codec (RFC 6455 §5).
//!
//! ```text
//!  0               1               2               3
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |     Masking-key (0 or 4 bytes), then payload                  |
//! +---------------------------------------------------------------+
//! ```
//!
//! Client-to-server frames are always masked. Server frames must not be.
//! The decoder is fed raw socket bytes and yields complete messages with
//! fragments reassembled.

/// Frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Continuation of a fragmented message.
    Continuation,
    /// UTF-8 text message.
    Text,
    /// Binary message.
    Binary,
    /// Connection close.
    Close,
    /// Keepalive probe.
    Ping,
    /// Keepalive reply.
    Pong,
}

impl OpCode {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    fn bits(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// Configuration for the frame decoder.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum size of a reassembled message in bytes. Default: 4 MiB.
    pub max_message_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_message_size: 4 * 1024 * 1024,
        }
    }
}

/// Protocol violations detected while decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// A frame or reassembled message exceeds the configured maximum.
    #[error("message size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The declared or accumulated size.
        size: u64,
        /// The configured maximum.
        max: usize,
    },

    /// Opcode outside the set RFC 6455 defines.
    #[error("reserved opcode {0:#x}")]
    ReservedOpcode(u8),

    /// RSV bits set without a negotiated extension.
    #[error("reserved bits set")]
    ReservedBits,

    /// The server masked a frame.
    #[error("server frames must not be masked")]
    MaskedServerFrame,

    /// Control frame with FIN clear or payload over 125 bytes.
    #[error("invalid control frame")]
    InvalidControlFrame,

    /// Continuation with no message in progress.
    #[error("continuation frame without a started message")]
    UnexpectedContinuation,

    /// New data frame while a fragmented message is still open.
    #[error("data frame interleaved with an unfinished message")]
    InterleavedMessage,
}

/// A complete inbound unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A full text or binary application message.
    Message(Vec<u8>),
    /// Ping with its application data.
    Ping(Vec<u8>),
    /// Pong with its application data.
    Pong(Vec<u8>),
    /// Close frame. `code` is absent when the peer sent no status.
    Close {
        /// Status code, if present.
        code: Option<u16>,
        /// Reason text, possibly empty.
        reason: String,
    },
}

/// Encode a single final frame with the given mask.
pub fn encode_frame(opcode: OpCode, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    let len = payload.len();
    let mut out = Vec::with_capacity(len + 14);
    out.push(0x80 | opcode.bits());

    if len < 126 {
        out.push(0x80 | len as u8);
    } else if len <= u16::MAX as usize {
        out.push(0x80 | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(0x80 | 127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    out.extend_from_slice(&mask);
    out.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    out
}

/// Encode a masked client frame with a fresh random mask.
pub fn encode_client_frame(opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    encode_frame(opcode, payload, rand::random())
}

/// Encode a masked close frame carrying `code` and `reason`.
pub fn encode_close(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    // Control payloads are capped at 125 bytes.
    let reason = truncate_utf8(reason, 123);
    payload.extend_from_slice(reason.as_bytes());
    encode_client_frame(OpCode::Close, &payload)
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Incremental decoder for server frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    config: FrameConfig,
    buf: Vec<u8>,
    partial: Option<Vec<u8>>,
}

impl FrameDecoder {
    /// Create a decoder.
    pub fn new(config: FrameConfig) -> Self {
        Self {
            config,
            buf: Vec::new(),
            partial: None,
        }
    }

    /// Append raw bytes from the socket.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Drop all buffered state, for reuse on a new connection.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.partial = None;
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decode the next complete unit, or `Ok(None)` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Incoming>, FrameError> {
        loop {
            let Some((fin, opcode, payload)) = self.take_frame()? else {
                return Ok(None);
            };

            match opcode {
                OpCode::Close => {
                    let (code, reason) = if payload.len() >= 2 {
                        (
                            Some(u16::from_be_bytes([payload[0], payload[1]])),
                            String::from_utf8_lossy(&payload[2..]).into_owned(),
                        )
                    } else {
                        (None, String::new())
                    };
                    return Ok(Some(Incoming::Close { code, reason }));
                }
                OpCode::Ping => return Ok(Some(Incoming::Ping(payload))),
                OpCode::Pong => return Ok(Some(Incoming::Pong(payload))),
                OpCode::Text | OpCode::Binary => {
                    if self.partial.is_some() {
                        return Err(FrameError::InterleavedMessage);
                    }
                    if fin {
                        return Ok(Some(Incoming::Message(payload)));
                    }
                    self.partial = Some(payload);
                }
                OpCode::Continuation => {
                    let Some(partial) = self.partial.as_mut() else {
                        return Err(FrameError::UnexpectedContinuation);
                    };
                    let total = partial.len() + payload.len();
                    if total > self.config.max_message_size {
                        return Err(FrameError::PayloadTooLarge {
                            size: total as u64,
                            max: self.config.max_message_size,
                        });
                    }
                    partial.extend_from_slice(&payload);
                    if fin {
                        let message = self.partial.take().unwrap_or_default();
                        return Ok(Some(Incoming::Message(message)));
                    }
                }
            }
        }
    }

    /// Split one raw frame off the buffer.
    fn take_frame(&mut self) -> Result<Option<(bool, OpCode, Vec<u8>)>, FrameError> {
        if self.buf.len() < 2 {
            return Ok(None);
        }
        let b0 = self.buf[0];
        let b1 = self.buf[1];

        if b0 & 0x70 != 0 {
            return Err(FrameError::ReservedBits);
        }
        let fin = b0 & 0x80 != 0;
        let opcode = OpCode::from_bits(b0 & 0x0F).ok_or(FrameError::ReservedOpcode(b0 & 0x0F))?;
        if b1 & 0x80 != 0 {
            return Err(FrameError::MaskedServerFrame);
        }

        let (len, header_len) = match b1 & 0x7F {
            126 => {
                if self.buf.len() < 4 {
                    return Ok(None);
                }
                (u16::from_be_bytes([self.buf[2], self.buf[3]]) as u64, 4)
            }
            127 => {
                if self.buf.len() < 10 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&self.buf[2..10]);
                (u64::from_be_bytes(raw), 10)
            }
            n => (n as u64, 2),
        };

        if opcode.is_control() && (!fin || len > 125) {
            return Err(FrameError::InvalidControlFrame);
        }
        if len > self.config.max_message_size as u64 {
            return Err(FrameError::PayloadTooLarge {
                size: len,
                max: self.config.max_message_size,
            });
        }

        let len = len as usize;
        if self.buf.len() < header_len + len {
            return Ok(None);
        }

        let payload = self.buf[header_len..header_len + len].to_vec();
        self.buf.drain(..header_len + len);
        Ok(Some((fin, opcode, payload)))
    }
}
