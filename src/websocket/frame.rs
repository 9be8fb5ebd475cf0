//! RFC 6455 frame encoding and decoding.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Largest payload carried by one frame of a fragmented message.
pub const MAX_CHUNK: usize = 65_532;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Errors produced while decoding a frame.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("reserved opcode {0:#x}")]
    ReservedOpcode(u8),

    #[error("reserved bits set without a negotiated extension")]
    ReservedBits,

    #[error("frame length {0} does not fit in memory")]
    TooLarge(u64),
}

/// Frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn from_u8(byte: u8) -> Result<Self, FrameError> {
        Ok(match byte {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => return Err(FrameError::ReservedOpcode(other)),
        })
    }

    pub fn is_control(self) -> bool {
        (self as u8) & 0x8 != 0
    }
}

/// A decoded frame whose payload borrows the decode buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub opcode: Opcode,
    pub fin: bool,
    /// Already unmasked.
    pub payload: &'a [u8],
}

/// Encodes one frame.
///
/// Length classes: payloads under 126 bytes use the 7-bit form. Text payloads
/// above [`MAX_CHUNK`] always use the 64-bit form; anything else up to 65,535
/// bytes uses the 16-bit form, and larger payloads the 64-bit form.
///
/// With `mask`, the mask bit and key are written and the payload is masked
/// while it is copied.
pub fn encode_frame(opcode: Opcode, fin: bool, payload: &[u8], mask: Option<[u8; 4]>) -> BytesMut {
    let len = payload.len();
    let mut buf = BytesMut::with_capacity(14 + len);

    let fin_bit = if fin { 0x80 } else { 0 };
    buf.put_u8(fin_bit | opcode as u8);

    let mask_bit = if mask.is_some() { 0x80 } else { 0 };
    if len < 126 {
        buf.put_u8(mask_bit | len as u8);
    } else if (opcode == Opcode::Text && len > MAX_CHUNK) || len > usize::from(u16::MAX) {
        buf.put_u8(mask_bit | 127);
        buf.put_u64(len as u64);
    } else {
        buf.put_u8(mask_bit | 126);
        buf.put_u16(len as u16);
    }

    match mask {
        Some(key) => {
            buf.put_slice(&key);
            let start = buf.len();
            buf.put_slice(payload);
            apply_mask(&mut buf[start..], key);
        }
        None => buf.put_slice(payload),
    }
    buf
}

/// Splits `payload` into unmasked frames of at most [`MAX_CHUNK`] bytes.
///
/// The first frame carries `opcode`, the rest are continuations, and only
/// the last has FIN set. A payload that fits yields a single frame.
pub fn encode_fragmented(opcode: Opcode, payload: &[u8]) -> Vec<BytesMut> {
    if payload.len() <= MAX_CHUNK {
        return vec![encode_frame(opcode, true, payload, None)];
    }

    let count = payload.len().div_ceil(MAX_CHUNK);
    payload
        .chunks(MAX_CHUNK)
        .enumerate()
        .map(|(i, chunk)| {
            let op = if i == 0 { opcode } else { Opcode::Continuation };
            encode_frame(op, i + 1 == count, chunk, None)
        })
        .collect()
}

/// XORs `payload` in place with the repeating 4-byte `key`.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// The fixed part of a frame, available before its payload has arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub opcode: Opcode,
    pub fin: bool,
    pub mask: Option<[u8; 4]>,
    /// Bytes taken by the header itself, mask key included.
    pub header_len: usize,
    /// Payload length as declared on the wire.
    pub payload_len: u64,
}

/// Parses the header at the front of `buf` without touching the payload.
///
/// Returns `None` until the whole header (up to 14 bytes) is buffered.
pub fn decode_header(buf: &[u8]) -> Result<Option<FrameHeader>, FrameError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let fin = buf[0] & 0x80 != 0;
    if buf[0] & 0x70 != 0 {
        return Err(FrameError::ReservedBits);
    }
    let opcode = Opcode::from_u8(buf[0] & 0x0F)?;
    let masked = buf[1] & 0x80 != 0;

    let (payload_len, mut header_len) = match buf[1] & 0x7F {
        126 => {
            let Some(ext) = buf.get(2..4) else {
                return Ok(None);
            };
            (u64::from(u16::from_be_bytes([ext[0], ext[1]])), 4)
        }
        127 => {
            let Some(ext) = buf.get(2..10) else {
                return Ok(None);
            };
            let mut raw = [0u8; 8];
            raw.copy_from_slice(ext);
            (u64::from_be_bytes(raw), 10)
        }
        short => (u64::from(short), 2),
    };

    let mut mask = None;
    if masked {
        let Some(raw) = buf.get(header_len..header_len + 4) else {
            return Ok(None);
        };
        mask = Some([raw[0], raw[1], raw[2], raw[3]]);
        header_len += 4;
    }

    Ok(Some(FrameHeader {
        opcode,
        fin,
        mask,
        header_len,
        payload_len,
    }))
}

/// Decodes one frame from the front of `buf`, unmasking its payload in place.
///
/// Returns the frame and the number of bytes it occupied, or `None` when
/// `buf` does not hold a whole frame yet.
pub fn decode(buf: &mut [u8]) -> Result<Option<(Frame<'_>, usize)>, FrameError> {
    let Some(header) = decode_header(buf)? else {
        return Ok(None);
    };

    let len = header.payload_len;
    let total = usize::try_from(len)
        .ok()
        .and_then(|len| header.header_len.checked_add(len))
        .ok_or(FrameError::TooLarge(len))?;
    if buf.len() < total {
        return Ok(None);
    }

    let payload = &mut buf[header.header_len..total];
    if let Some(key) = header.mask {
        apply_mask(payload, key);
    }
    Ok(Some((
        Frame {
            opcode: header.opcode,
            fin: header.fin,
            payload,
        },
        total,
    )))
}
