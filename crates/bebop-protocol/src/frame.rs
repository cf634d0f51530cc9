//! Binary frame codec for the drone's UDP channel.
//!
//! Every frame carries a 7-byte header followed by its payload:
//!
//!   [1 byte data type][1 byte buffer id][1 byte sequence id][4 bytes total size (LE)][payload]
//!
//! `total size` counts the header itself. A datagram is a back-to-back run of
//! one or more frames with no padding between them.

use std::fmt;

use thiserror::Error;

// -- Buffer ids (logical channels) --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BufferId {
    /// Keep-alive probe sent by the drone
    Ping = 0,
    /// Controller's answer to a ping
    Pong = 1,
    /// Piloting and camera commands that need no ack
    SendNoAck = 10,
    /// Commands the drone must acknowledge
    SendWithAck = 11,
    /// Emergency commands
    SendHighPriority = 12,
    /// Ack for video frames
    VideoAck = 13,
    /// Video stream data
    VideoData = 125,
    /// Drone data (battery and other sensors), no ack
    NoAckDroneData = 126,
    /// Drone data that needs an ack
    AckDroneData = 127,
    /// 128 + SEND_WITH_ACK
    AckFromSendWithAck = 139,
}

impl BufferId {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Ping),
            1 => Some(Self::Pong),
            10 => Some(Self::SendNoAck),
            11 => Some(Self::SendWithAck),
            12 => Some(Self::SendHighPriority),
            13 => Some(Self::VideoAck),
            125 => Some(Self::VideoData),
            126 => Some(Self::NoAckDroneData),
            127 => Some(Self::AckDroneData),
            139 => Some(Self::AckFromSendWithAck),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::SendNoAck => "SEND_NO_ACK",
            Self::SendWithAck => "SEND_WITH_ACK",
            Self::SendHighPriority => "SEND_HIGH_PRIORITY",
            Self::VideoAck => "VIDEO_ACK",
            Self::VideoData => "VIDEO_DATA",
            Self::NoAckDroneData => "NO_ACK_DRONE_DATA",
            Self::AckDroneData => "ACK_DRONE_DATA",
            Self::AckFromSendWithAck => "ACK_FROM_SEND_WITH_ACK",
        }
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -- Data types --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataType {
    Ack = 1,
    DataNoAck = 2,
    LowLatencyData = 3,
    DataWithAck = 4,
}

impl DataType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Ack),
            2 => Some(Self::DataNoAck),
            3 => Some(Self::LowLatencyData),
            4 => Some(Self::DataWithAck),
            _ => None,
        }
    }
}

// -- Errors --

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error(
        "truncated frame header at offset {offset}: {available} of {header} bytes",
        header = Frame::HEADER_SIZE
    )]
    TruncatedHeader { offset: usize, available: usize },

    #[error("invalid total size {size} at offset {offset}")]
    InvalidSize { offset: usize, size: i32 },

    #[error("frame at offset {offset} declares {size} bytes but only {available} remain")]
    TruncatedPayload {
        offset: usize,
        size: usize,
        available: usize,
    },

    #[error("payload length {len} exceeds maximum {max}", len = .0, max = Frame::MAX_PAYLOAD_SIZE)]
    PayloadTooLarge(usize),
}

// -- Frame --

/// One unit of the UDP wire protocol.
///
/// `data_type` and `buffer_id` stay raw bytes so frames on channels this
/// controller does not know about still decode and can be routed onward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data_type: u8,
    pub buffer_id: u8,
    pub sequence_id: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// data_type(1) + buffer_id(1) + sequence_id(1) + total_size(4)
    pub const HEADER_SIZE: usize = 7;

    /// Largest payload whose total size still fits the signed 32-bit size field.
    pub const MAX_PAYLOAD_SIZE: usize = i32::MAX as usize - Self::HEADER_SIZE;

    pub fn new(data_type: DataType, buffer_id: BufferId, sequence_id: u8, payload: Vec<u8>) -> Self {
        Self {
            data_type: data_type as u8,
            buffer_id: buffer_id as u8,
            sequence_id,
            payload,
        }
    }

    pub fn buffer(&self) -> Option<BufferId> {
        BufferId::from_u8(self.buffer_id)
    }

    pub fn kind(&self) -> Option<DataType> {
        DataType::from_u8(self.data_type)
    }

    pub fn is_ping(&self) -> bool {
        self.buffer_id == BufferId::Ping as u8
    }

    pub fn total_size(&self) -> usize {
        Self::HEADER_SIZE + self.payload.len()
    }

    /// Append the encoded frame to `buf`.
    ///
    /// Appending (rather than clearing) lets callers pack several frames
    /// into one datagram.
    pub fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), FramingError> {
        if self.payload.len() > Self::MAX_PAYLOAD_SIZE {
            return Err(FramingError::PayloadTooLarge(self.payload.len()));
        }
        let total_size = self.total_size() as i32;

        buf.reserve(self.total_size());
        buf.push(self.data_type);
        buf.push(self.buffer_id);
        buf.push(self.sequence_id);
        buf.extend_from_slice(&total_size.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, FramingError> {
        let mut buf = Vec::with_capacity(self.total_size());
        self.serialize(&mut buf)?;
        Ok(buf)
    }
}

// -- Datagram splitting --

/// Split a datagram into its frames.
///
/// The returned iterator is lazy and yields at most one error, after which it
/// is exhausted. An empty datagram is reported as a truncated header.
pub fn decode(datagram: &[u8]) -> Frames<'_> {
    Frames {
        data: datagram,
        cursor: 0,
        done: false,
    }
}

/// Decode a whole datagram, failing on the first malformed frame.
pub fn decode_all(datagram: &[u8]) -> Result<Vec<Frame>, FramingError> {
    decode(datagram).collect()
}

pub struct Frames<'a> {
    data: &'a [u8],
    cursor: usize,
    done: bool,
}

impl Frames<'_> {
    /// Byte offset of the next frame to be read.
    pub fn offset(&self) -> usize {
        self.cursor
    }

    fn read_frame(&mut self) -> Result<Frame, FramingError> {
        let offset = self.cursor;
        let remaining = &self.data[offset..];

        if remaining.len() < Frame::HEADER_SIZE {
            return Err(FramingError::TruncatedHeader {
                offset,
                available: remaining.len(),
            });
        }

        let size = i32::from_le_bytes([remaining[3], remaining[4], remaining[5], remaining[6]]);
        if size < Frame::HEADER_SIZE as i32 {
            return Err(FramingError::InvalidSize { offset, size });
        }
        let size = size as usize;
        if size > remaining.len() {
            return Err(FramingError::TruncatedPayload {
                offset,
                size,
                available: remaining.len(),
            });
        }

        let frame = Frame {
            data_type: remaining[0],
            buffer_id: remaining[1],
            sequence_id: remaining[2],
            payload: remaining[Frame::HEADER_SIZE..size].to_vec(),
        };
        self.cursor += size;
        Ok(frame)
    }
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.cursor == self.data.len() && self.cursor > 0 {
            self.done = true;
            return None;
        }

        let result = self.read_frame();
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

impl std::iter::FusedIterator for Frames<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_layout() {
        let frame = Frame::new(DataType::DataNoAck, BufferId::Pong, 9, vec![0xAA, 0xBB]);
        let buf = frame.encode().unwrap();
        assert_eq!(buf, vec![2, 1, 9, 9, 0, 0, 0, 0xAA, 0xBB]);
    }

    #[test]
    fn decode_single_frame() {
        let buf = [2, 0, 5, 9, 0, 0, 0, 0xAA, 0xBB];
        let frames = decode_all(&buf).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_ping());
        assert_eq!(frames[0].kind(), Some(DataType::DataNoAck));
        assert_eq!(frames[0].sequence_id, 5);
        assert_eq!(frames[0].payload, vec![0xAA, 0xBB]);
    }

    #[test]
    fn header_only_frame_has_empty_payload() {
        let buf = [4, 11, 0, 7, 0, 0, 0];
        let frames = decode_all(&buf).unwrap();
        assert_eq!(frames[0].buffer(), Some(BufferId::SendWithAck));
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn unknown_ids_still_decode() {
        let buf = [9, 200, 1, 8, 0, 0, 0, 0x01];
        let frames = decode_all(&buf).unwrap();
        assert_eq!(frames[0].buffer(), None);
        assert_eq!(frames[0].kind(), None);
        assert_eq!(frames[0].payload, vec![0x01]);
    }

    #[test]
    fn empty_datagram_is_truncated() {
        assert_eq!(
            decode_all(&[]),
            Err(FramingError::TruncatedHeader { offset: 0, available: 0 })
        );
    }

    #[test]
    fn short_buffer_is_truncated() {
        let err = decode_all(&[2, 0, 5, 9, 0, 0]).unwrap_err();
        assert_eq!(err, FramingError::TruncatedHeader { offset: 0, available: 6 });
    }

    #[test]
    fn size_below_header_rejected() {
        let err = decode_all(&[2, 0, 5, 6, 0, 0, 0]).unwrap_err();
        assert_eq!(err, FramingError::InvalidSize { offset: 0, size: 6 });
    }

    #[test]
    fn zero_and_negative_size_rejected() {
        assert!(matches!(
            decode_all(&[2, 0, 5, 0, 0, 0, 0]),
            Err(FramingError::InvalidSize { size: 0, .. })
        ));
        assert!(matches!(
            decode_all(&[2, 0, 5, 0xFF, 0xFF, 0xFF, 0xFF]),
            Err(FramingError::InvalidSize { size: -1, .. })
        ));
    }

    #[test]
    fn size_past_end_rejected() {
        let err = decode_all(&[2, 0, 5, 20, 0, 0, 0, 0xAA]).unwrap_err();
        assert_eq!(
            err,
            FramingError::TruncatedPayload { offset: 0, size: 20, available: 8 }
        );
    }

    #[test]
    fn good_frames_before_error_are_yielded() {
        let mut buf = Frame::new(DataType::DataNoAck, BufferId::Ping, 1, vec![0x10])
            .encode()
            .unwrap();
        buf.extend_from_slice(&[2, 0, 2, 50, 0]);

        let mut frames = decode(&buf);
        assert!(frames.next().unwrap().is_ok());
        assert_eq!(frames.offset(), 8);
        assert_eq!(
            frames.next(),
            Some(Err(FramingError::TruncatedHeader { offset: 8, available: 5 }))
        );
        assert_eq!(frames.next(), None);
    }

    #[test]
    fn buffer_id_names() {
        assert_eq!(BufferId::Pong.to_string(), "PONG");
        assert_eq!(BufferId::from_u8(139), Some(BufferId::AckFromSendWithAck));
        assert_eq!(BufferId::from_u8(2), None);
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            FramingError::TruncatedHeader { offset: 8, available: 5 }.to_string(),
            "truncated frame header at offset 8: 5 of 7 bytes"
        );
        assert_eq!(
            FramingError::PayloadTooLarge(usize::MAX).to_string(),
            format!("payload length {} exceeds maximum {}", usize::MAX, Frame::MAX_PAYLOAD_SIZE)
        );
    }
}
