// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! RFB message framing.
//!
//! [`UpdateWriter`] serializes FramebufferUpdate messages for the
//! pipeline. The reader/writer pair below handles the peer-originated
//! clipboard and fence messages that share this crate's logging channel:
//! transient shape problems (oversized payloads) are logged and drained,
//! contract violations propagate.

use bytes::{Buf, BufMut, BytesMut};

use crate::caps::PeerCaps;
use crate::config::Config;
use crate::error::{EncodeError, Result};
use crate::protocol::{
    self, ENCODING_COPYRECT, ENCODING_LAST_RECT, FENCE_FLAGS_SUPPORTED, FENCE_MAX_PAYLOAD,
    LAST_RECT_SENTINEL,
};
use crate::region::Rect;

/// Serializes one FramebufferUpdate message into a byte buffer.
pub struct UpdateWriter<'a> {
    buf: &'a mut BytesMut,
    supports_last_rect: bool,
}

impl<'a> UpdateWriter<'a> {
    /// Creates a writer appending to `buf`.
    pub fn new(buf: &'a mut BytesMut, caps: &PeerCaps) -> Self {
        Self {
            buf,
            supports_last_rect: caps.supports_last_rect,
        }
    }

    /// Emits the update header. `num_rects` is the precomputed count, or
    /// the LastRect sentinel when the peer supports it.
    pub fn begin_update(&mut self, num_rects: u16) {
        self.buf.put_u8(protocol::SERVER_MSG_FRAMEBUFFER_UPDATE);
        self.buf.put_u8(0); // padding
        self.buf.put_u16(num_rects);
    }

    /// The sentinel or the real count, per peer capability.
    #[must_use]
    pub fn header_rect_count(&self, actual: usize) -> u16 {
        if self.supports_last_rect {
            LAST_RECT_SENTINEL
        } else {
            #[allow(clippy::cast_possible_truncation)] // protocol caps counts at u16
            {
                actual as u16
            }
        }
    }

    /// Emits a rectangle header.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // u16 on the wire
    pub fn start_rect(&mut self, rect: Rect, encoding: i32) {
        self.buf.put_u16(rect.tl.x as u16);
        self.buf.put_u16(rect.tl.y as u16);
        self.buf.put_u16(rect.width() as u16);
        self.buf.put_u16(rect.height() as u16);
        self.buf.put_i32(encoding);
    }

    /// Emits one CopyRect record.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // u16 on the wire
    pub fn copy_rect(&mut self, rect: Rect, src_x: i32, src_y: i32) {
        self.start_rect(rect, ENCODING_COPYRECT);
        self.buf.put_u16(src_x as u16);
        self.buf.put_u16(src_y as u16);
    }

    /// Appends an encoded payload.
    pub fn payload(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Closes the update, emitting the LastRect terminator when the
    /// sentinel count was used.
    pub fn end_update(&mut self) {
        if self.supports_last_rect {
            self.start_rect(Rect::default(), ENCODING_LAST_RECT);
        }
    }

    /// Bytes written so far, including by earlier users of the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// A clipboard message delivered by the reader.
#[derive(Debug, PartialEq, Eq)]
pub enum ClipboardEvent {
    /// Plain cut text.
    Text(String),
    /// Extended clipboard message: flags plus opaque body.
    Extended {
        /// Extended-clipboard flags word.
        flags: u32,
        /// Remaining message body.
        data: Vec<u8>,
    },
}

/// Parses the peer messages whose error policy this crate owns.
pub struct MsgReader {
    config: Config,
}

impl MsgReader {
    /// Creates a reader with the given tunables.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Reads a ClientCutText body (everything after the message type
    /// byte). Returns `None` when the payload was over the configured
    /// limit and got drained.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` on a truncated or malformed body.
    pub fn read_cut_text(&self, buf: &mut BytesMut) -> Result<Option<ClipboardEvent>> {
        need(buf, 7, "cut text header")?;
        buf.advance(3);
        let len = buf.get_i32();

        if len < 0 {
            return self.read_extended_clipboard(buf, -len);
        }

        let len = len as usize;
        if len > self.config.max_cut_text {
            log::error!("cut text too long ({len} bytes) - ignoring");
            need(buf, len, "cut text body")?;
            buf.advance(len);
            return Ok(None);
        }
        need(buf, len, "cut text body")?;
        let data = buf.split_to(len);
        let text = String::from_utf8_lossy(&data).into_owned();
        Ok(Some(ClipboardEvent::Text(text)))
    }

    fn read_extended_clipboard(&self, buf: &mut BytesMut, len: i32) -> Result<Option<ClipboardEvent>> {
        if len < 4 {
            return Err(EncodeError::ProtocolViolation(
                "Invalid extended clipboard message length".to_string(),
            ));
        }
        let len = len as usize;
        if len > self.config.max_cut_text {
            log::error!("extended clipboard too long ({len} bytes) - ignoring");
            need(buf, len, "extended clipboard body")?;
            buf.advance(len);
            return Ok(None);
        }
        need(buf, len, "extended clipboard body")?;
        let flags = buf.get_u32();
        let data = buf.split_to(len - 4).to_vec();
        Ok(Some(ClipboardEvent::Extended { flags, data }))
    }

    /// Reads a fence body (everything after the message type byte).
    /// Returns `None` when the payload was oversized and got drained.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` on a truncated body.
    pub fn read_fence(&self, buf: &mut BytesMut) -> Result<Option<(u32, Vec<u8>)>> {
        need(buf, 8, "fence header")?;
        buf.advance(3);
        let flags = buf.get_u32();
        let len = usize::from(buf.get_u8());

        if len > FENCE_MAX_PAYLOAD {
            log::error!("Ignoring fence with too large payload ({len} bytes)");
            need(buf, len, "fence body")?;
            buf.advance(len);
            return Ok(None);
        }
        need(buf, len, "fence body")?;
        Ok(Some((flags, buf.split_to(len).to_vec())))
    }
}

/// Writes a server fence message.
///
/// # Errors
///
/// `PeerIncapable` when the peer never advertised fence support;
/// `OversizedPayload` for payloads over the protocol's 64-byte bound;
/// `ProtocolViolation` for unknown flag bits.
pub fn write_fence(caps: &PeerCaps, flags: u32, data: &[u8], out: &mut BytesMut) -> Result<()> {
    if !caps.supports_fence {
        return Err(EncodeError::PeerIncapable("fences"));
    }
    if data.len() > FENCE_MAX_PAYLOAD {
        return Err(EncodeError::OversizedPayload {
            got: data.len(),
            limit: FENCE_MAX_PAYLOAD,
        });
    }
    if flags & !FENCE_FLAGS_SUPPORTED != 0 {
        return Err(EncodeError::ProtocolViolation(
            "Unknown fence flags".to_string(),
        ));
    }

    out.put_u8(protocol::SERVER_MSG_FENCE);
    out.put_bytes(0, 3);
    out.put_u32(flags);
    #[allow(clippy::cast_possible_truncation)] // bounded by FENCE_MAX_PAYLOAD
    out.put_u8(data.len() as u8);
    out.extend_from_slice(data);
    Ok(())
}

/// Writes a server cut-text message.
#[allow(clippy::cast_possible_truncation)] // u32 length per protocol
pub fn write_cut_text(text: &str, out: &mut BytesMut) {
    out.put_u8(protocol::SERVER_MSG_SERVER_CUT_TEXT);
    out.put_bytes(0, 3);
    out.put_u32(text.len() as u32);
    out.extend_from_slice(text.as_bytes());
}

/// Writes an extended-clipboard request (a cut-text message with a
/// negative length carrying only the flags word).
///
/// # Errors
///
/// `PeerIncapable` when the peer never advertised the extension.
pub fn write_extended_clipboard_request(
    caps: &PeerCaps,
    flags: u32,
    out: &mut BytesMut,
) -> Result<()> {
    if !caps.supports_extended_clipboard {
        return Err(EncodeError::PeerIncapable("extended clipboard"));
    }
    out.put_u8(protocol::SERVER_MSG_SERVER_CUT_TEXT);
    out.put_bytes(0, 3);
    out.put_i32(-4);
    out.put_u32(flags);
    Ok(())
}

fn need(buf: &BytesMut, len: usize, what: &str) -> Result<()> {
    if buf.len() < len {
        return Err(EncodeError::ProtocolViolation(format!(
            "truncated {what}: need {len} bytes, have {}",
            buf.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cut_text_body(text: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_bytes(0, 3);
        buf.put_i32(text.len() as i32);
        buf.extend_from_slice(text);
        buf
    }

    #[test]
    fn cut_text_round_trip() {
        let reader = MsgReader::new(Config::default());
        let mut buf = cut_text_body(b"hello");
        let event = reader.read_cut_text(&mut buf).unwrap();
        assert_eq!(event, Some(ClipboardEvent::Text("hello".to_string())));
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_cut_text_is_drained_not_fatal() {
        let reader = MsgReader::new(Config { max_cut_text: 4 });
        let mut buf = cut_text_body(b"too long");
        let event = reader.read_cut_text(&mut buf).unwrap();
        assert_eq!(event, None);
        assert!(buf.is_empty()); // bytes drained from the stream
    }

    #[test]
    fn short_extended_clipboard_is_a_protocol_violation() {
        let reader = MsgReader::new(Config::default());
        let mut buf = BytesMut::new();
        buf.put_bytes(0, 3);
        buf.put_i32(-2);
        assert!(matches!(
            reader.read_cut_text(&mut buf),
            Err(EncodeError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn oversized_fence_is_skipped() {
        let reader = MsgReader::new(Config::default());
        let mut buf = BytesMut::new();
        buf.put_bytes(0, 3);
        buf.put_u32(1);
        buf.put_u8(100);
        buf.put_bytes(0xAA, 100);
        assert_eq!(reader.read_fence(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn fence_write_requires_capability() {
        let mut out = BytesMut::new();
        let caps = PeerCaps::default();
        assert!(matches!(
            write_fence(&caps, 1, b"x", &mut out),
            Err(EncodeError::PeerIncapable(_))
        ));

        let caps = PeerCaps {
            supports_fence: true,
            ..PeerCaps::default()
        };
        write_fence(&caps, 1, b"x", &mut out).unwrap();
        assert_eq!(out[0], protocol::SERVER_MSG_FENCE);
    }

    #[test]
    fn extended_clipboard_request_requires_capability() {
        let mut out = BytesMut::new();
        assert!(matches!(
            write_extended_clipboard_request(&PeerCaps::default(), 1, &mut out),
            Err(EncodeError::PeerIncapable(_))
        ));

        let caps = PeerCaps {
            supports_extended_clipboard: true,
            ..PeerCaps::default()
        };
        write_extended_clipboard_request(&caps, 1, &mut out).unwrap();

        // The reader on the other side sees a well-formed extended message.
        let reader = MsgReader::new(Config::default());
        let mut body = out.split_off(1);
        assert!(matches!(
            reader.read_cut_text(&mut body).unwrap(),
            Some(ClipboardEvent::Extended { flags: 1, .. })
        ));
    }

    #[test]
    fn last_rect_terminator_is_emitted() {
        let caps = PeerCaps {
            supports_last_rect: true,
            ..PeerCaps::default()
        };
        let mut buf = BytesMut::new();
        let mut writer = UpdateWriter::new(&mut buf, &caps);
        writer.begin_update(writer.header_rect_count(3));
        writer.end_update();

        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), LAST_RECT_SENTINEL);
        let encoding = i32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);
        assert_eq!(encoding, ENCODING_LAST_RECT);
    }
}
