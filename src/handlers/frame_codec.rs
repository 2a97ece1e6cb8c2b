use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{instrument, trace};

use crate::hw::Transport;
use crate::protocol::CommandAccess;
use crate::status::LinkFault;

/// Byte that opens every frame; two in a row mark a genuine header.
pub const SYNC_BYTE: u8 = 0x01;
/// Fixed header length, sync bytes included.
pub const HEADER_LEN: usize = 9;
/// Largest payload a 16-bit length field can declare.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;
/// Bytes the reader will discard while hunting for a sync pair.
pub const MAX_SYNC_SCAN: usize = 500;

const FLAG_RESPONSE: u8 = 0x01;
const FLAG_UPDATE: u8 = 0x02;
const KNOWN_FLAGS: u8 = FLAG_RESPONSE | FLAG_UPDATE;

/// Errors returned by frame encoding and decoding.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum FrameCodecError {
    /// The payload does not fit the 16-bit length field.
    #[error("frame payload is too large: {payload_len} bytes exceeds max {max_payload_len}")]
    PayloadTooLarge {
        payload_len: usize,
        max_payload_len: usize,
    },
    /// Fewer bytes than a complete header.
    #[error("frame is too short: expected at least {HEADER_LEN} bytes, got {actual}")]
    TooShort { actual: usize },
    /// The frame does not start with two sync bytes.
    #[error("frame does not start with a sync pair: {first:#04X} {second:#04X}")]
    MissingSync { first: u8, second: u8 },
    /// The declared payload length does not match the bytes provided.
    #[error("frame length mismatch: header declares {declared} payload bytes but {actual} follow")]
    LengthMismatch { declared: usize, actual: usize },
    /// The flags byte carries bits this codec does not understand.
    #[error("frame flags {value:#04X} contain unknown bits")]
    UnknownFlags { value: u8 },
}

/// Main/secondary opcode pair identifying a command.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Opcode {
    main: u8,
    secondary: u8,
}

impl Opcode {
    /// Creates an opcode pair.
    ///
    /// ```
    /// use summit::Opcode;
    ///
    /// let opcode = Opcode::new(0x60, 0x05);
    /// assert_eq!("M:0x60 S:0x05", opcode.to_string());
    /// ```
    #[must_use]
    pub const fn new(main: u8, secondary: u8) -> Self {
        Self { main, secondary }
    }

    /// Main opcode byte.
    #[must_use]
    pub const fn main(self) -> u8 {
        self.main
    }

    /// Secondary opcode byte.
    #[must_use]
    pub const fn secondary(self) -> u8 {
        self.secondary
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M:0x{:02X} S:0x{:02X}", self.main, self.secondary)
    }
}

/// Whether a frame travels host to device or back.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Direction {
    Request,
    Response,
}

/// One protocol message.
///
/// Wire layout, little-endian:
/// `[0x01][0x01][main][secondary][flags][status][sequence][len_lo][len_hi][payload..]`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
    opcode: Opcode,
    direction: Direction,
    access: CommandAccess,
    status: u8,
    sequence: u8,
    payload: Vec<u8>,
}

impl Frame {
    /// Builds a request frame.
    #[must_use]
    pub fn request(opcode: Opcode, access: CommandAccess, sequence: u8, payload: Vec<u8>) -> Self {
        Self {
            opcode,
            direction: Direction::Request,
            access,
            status: 0x00,
            sequence,
            payload,
        }
    }

    /// Builds the response matching `request`.
    #[must_use]
    pub fn response_to(request: &Self, status: u8, payload: Vec<u8>) -> Self {
        Self {
            opcode: request.opcode,
            direction: Direction::Response,
            access: request.access,
            status,
            sequence: request.sequence,
            payload,
        }
    }

    #[must_use]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn access(&self) -> CommandAccess {
        self.access
    }

    /// Raw status byte; always `0x00` on requests.
    #[must_use]
    pub fn status(&self) -> u8 {
        self.status
    }

    #[must_use]
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the frame and returns its payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Returns whether `response` answers this request.
    #[must_use]
    pub fn is_answered_by(&self, response: &Self) -> bool {
        response.direction == Direction::Response
            && response.opcode == self.opcode
            && response.access == self.access
            && response.sequence == self.sequence
    }

    /// Encodes the frame into wire bytes.
    ///
    /// ```
    /// use summit::{CommandAccess, Frame, Opcode};
    ///
    /// let frame = Frame::request(Opcode::new(0x60, 0x05), CommandAccess::Query, 7, vec![0xAA]);
    /// let bytes = frame.encode()?;
    /// assert_eq!(vec![0x01, 0x01, 0x60, 0x05, 0x00, 0x00, 0x07, 0x01, 0x00, 0xAA], bytes);
    /// # Ok::<(), summit::FrameCodecError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the payload exceeds the 16-bit length field.
    pub fn encode(&self) -> Result<Vec<u8>, FrameCodecError> {
        let payload_len =
            u16::try_from(self.payload.len()).map_err(|_| FrameCodecError::PayloadTooLarge {
                payload_len: self.payload.len(),
                max_payload_len: MAX_PAYLOAD_LEN,
            })?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len());
        bytes.extend_from_slice(&[
            SYNC_BYTE,
            SYNC_BYTE,
            self.opcode.main,
            self.opcode.secondary,
            self.flags(),
            self.status,
            self.sequence,
        ]);
        bytes.extend_from_slice(&payload_len.to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        Ok(bytes)
    }

    /// Decodes one complete frame from `bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is incomplete or inconsistent, or if the
    /// declared payload length does not match the remaining bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameCodecError> {
        let Some((header, payload)) = bytes.split_first_chunk::<HEADER_LEN>() else {
            return Err(FrameCodecError::TooShort {
                actual: bytes.len(),
            });
        };
        let header = FrameHeader::parse(header)?;
        if header.payload_len != payload.len() {
            return Err(FrameCodecError::LengthMismatch {
                declared: header.payload_len,
                actual: payload.len(),
            });
        }
        Ok(header.into_frame(payload.to_vec()))
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.direction == Direction::Response {
            flags |= FLAG_RESPONSE;
        }
        if self.access == CommandAccess::Update {
            flags |= FLAG_UPDATE;
        }
        flags
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct FrameHeader {
    opcode: Opcode,
    direction: Direction,
    access: CommandAccess,
    status: u8,
    sequence: u8,
    payload_len: usize,
}

impl FrameHeader {
    fn parse(bytes: &[u8; HEADER_LEN]) -> Result<Self, FrameCodecError> {
        let [first, second, main, secondary, flags, status, sequence, len_lo, len_hi] = *bytes;
        if first != SYNC_BYTE || second != SYNC_BYTE {
            return Err(FrameCodecError::MissingSync { first, second });
        }
        if flags & !KNOWN_FLAGS != 0 {
            return Err(FrameCodecError::UnknownFlags { value: flags });
        }

        Ok(Self {
            opcode: Opcode::new(main, secondary),
            direction: if flags & FLAG_RESPONSE == 0 {
                Direction::Request
            } else {
                Direction::Response
            },
            access: if flags & FLAG_UPDATE == 0 {
                CommandAccess::Query
            } else {
                CommandAccess::Update
            },
            status,
            sequence,
            payload_len: usize::from(u16::from_le_bytes([len_lo, len_hi])),
        })
    }

    fn into_frame(self, payload: Vec<u8>) -> Frame {
        Frame {
            opcode: self.opcode,
            direction: self.direction,
            access: self.access,
            status: self.status,
            sequence: self.sequence,
            payload,
        }
    }
}

/// Reads one frame from a transport, one byte at a time until synchronised.
///
/// Each transport read waits at most `timeout`. Failures map onto the
/// transport's link faults: nothing before the header is a read timeout, a
/// short header or payload is a truncation, an inconsistent header is a
/// malformed packet, and more than [`MAX_SYNC_SCAN`] bytes without a sync pair
/// is lost synchronisation.
#[instrument(skip(transport), level = "trace", fields(transport = transport.name()))]
pub(crate) async fn read_frame(
    transport: &mut dyn Transport,
    timeout: Duration,
) -> Result<Frame, LinkFault> {
    let medium = transport.medium();
    let mut scanned = 0usize;
    let mut previous_was_sync = false;

    loop {
        let byte = transport.read(1, timeout).await;
        let Some(&byte) = byte.first() else {
            return Err(medium.read_fault());
        };
        scanned += 1;
        if byte == SYNC_BYTE {
            if previous_was_sync {
                break;
            }
            previous_was_sync = true;
        } else {
            previous_was_sync = false;
        }
        if scanned >= MAX_SYNC_SCAN {
            return Err(LinkFault::SyncLost);
        }
    }
    if scanned > 2 {
        trace!(discarded = scanned - 2, "skipped bytes before frame header");
    }

    let remainder = read_exact(transport, HEADER_LEN - 2, timeout).await;
    if remainder.len() != HEADER_LEN - 2 {
        return Err(LinkFault::HeaderTruncated);
    }
    let mut header = [SYNC_BYTE; HEADER_LEN];
    header[2..].copy_from_slice(&remainder);

    let header = FrameHeader::parse(&header).map_err(|_error| medium.malformed_fault())?;
    let payload = read_exact(transport, header.payload_len, timeout).await;
    if payload.len() != header.payload_len {
        return Err(LinkFault::PayloadTruncated);
    }

    Ok(header.into_frame(payload))
}

async fn read_exact(transport: &mut dyn Transport, len: usize, timeout: Duration) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(len);
    while buffer.len() < len {
        let chunk = transport.read(len - buffer.len(), timeout).await;
        if chunk.is_empty() {
            break;
        }
        buffer.extend_from_slice(&chunk);
    }
    buffer
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::hw::{FakeReply, FakeTransport, Medium};

    fn read_register_request() -> Frame {
        Frame::request(
            Opcode::new(0x60, 0x05),
            CommandAccess::Query,
            0x11,
            vec![0x08, 0x00, 0x40, 0x00],
        )
    }

    async fn transport_streaming(medium: Medium, bytes: Vec<u8>) -> FakeTransport {
        let mut transport = FakeTransport::new("stream", move |_request: &Frame| {
            FakeReply::Bytes(bytes.clone())
        })
        .with_medium(medium);
        assert!(transport.open().await);
        let trigger = read_register_request()
            .encode()
            .expect("trigger frame should encode");
        assert_eq!(trigger.len(), transport.write(&trigger).await);
        transport
    }

    #[test]
    fn encode_places_length_little_endian() {
        let frame = Frame::request(
            Opcode::new(0x40, 0x02),
            CommandAccess::Update,
            3,
            vec![0u8; 0x0102],
        );
        let bytes = frame.encode().expect("frame should encode");

        assert_eq!(
            [0x01, 0x01, 0x40, 0x02, 0x02, 0x00, 0x03, 0x02, 0x01],
            bytes[..HEADER_LEN]
        );
        assert_eq!(HEADER_LEN + 0x0102, bytes.len());
    }

    #[test]
    fn decode_reproduces_encoded_response() {
        let request = read_register_request();
        let response = Frame::response_to(&request, 0x01, vec![0x34, 0x12]);
        let bytes = response.encode().expect("response should encode");

        let decoded = Frame::decode(&bytes).expect("response should decode");
        assert_eq!(response, decoded);
        assert!(request.is_answered_by(&decoded));
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let frame = Frame::request(
            Opcode::new(0x60, 0x02),
            CommandAccess::Update,
            0,
            vec![0u8; MAX_PAYLOAD_LEN + 1],
        );
        assert_matches!(
            frame.encode(),
            Err(FrameCodecError::PayloadTooLarge { payload_len, .. })
            if payload_len == MAX_PAYLOAD_LEN + 1
        );
    }

    #[rstest]
    #[case(vec![0x01, 0x01, 0x60], FrameCodecError::TooShort { actual: 3 })]
    #[case(
        vec![0x01, 0x02, 0x60, 0x05, 0x01, 0x01, 0x00, 0x00, 0x00],
        FrameCodecError::MissingSync { first: 0x01, second: 0x02 }
    )]
    #[case(
        vec![0x01, 0x01, 0x60, 0x05, 0x81, 0x01, 0x00, 0x00, 0x00],
        FrameCodecError::UnknownFlags { value: 0x81 }
    )]
    #[case(
        vec![0x01, 0x01, 0x60, 0x05, 0x01, 0x01, 0x00, 0x02, 0x00, 0xAA],
        FrameCodecError::LengthMismatch { declared: 2, actual: 1 }
    )]
    fn decode_rejects_inconsistent_frames(
        #[case] bytes: Vec<u8>,
        #[case] expected: FrameCodecError,
    ) {
        assert_eq!(Err(expected), Frame::decode(&bytes));
    }

    #[tokio::test]
    async fn reader_skips_noise_before_sync_pair() {
        let request = read_register_request();
        let mut bytes = vec![0x00, 0x7F, 0x01, 0x55];
        bytes.extend(
            Frame::response_to(&request, 0x01, vec![0x34, 0x12])
                .encode()
                .expect("response should encode"),
        );
        let mut transport = transport_streaming(Medium::Uart, bytes).await;

        let frame = read_frame(&mut transport, Duration::from_millis(10))
            .await
            .expect("frame should be recovered after noise");
        assert_eq!(vec![0x34, 0x12], frame.into_payload());
    }

    #[rstest]
    #[case::silence(Medium::Uart, vec![], LinkFault::ReadTimeout)]
    #[case::usb_silence(Medium::Usb, vec![], LinkFault::UsbReadFailed)]
    #[case::short_header(Medium::Uart, vec![0x01, 0x01, 0x60, 0x05], LinkFault::HeaderTruncated)]
    #[case::short_payload(
        Medium::Uart,
        vec![0x01, 0x01, 0x60, 0x05, 0x01, 0x01, 0x11, 0x04, 0x00, 0xAA],
        LinkFault::PayloadTruncated
    )]
    #[case::bad_flags(
        Medium::I2c,
        vec![0x01, 0x01, 0x60, 0x05, 0xF0, 0x01, 0x11, 0x00, 0x00],
        LinkFault::I2cMalformed
    )]
    #[case::noise(Medium::Uart, vec![0x55; MAX_SYNC_SCAN + 10], LinkFault::SyncLost)]
    #[tokio::test]
    async fn reader_maps_failures_to_link_faults(
        #[case] medium: Medium,
        #[case] bytes: Vec<u8>,
        #[case] expected: LinkFault,
    ) {
        let mut transport = transport_streaming(medium, bytes).await;
        let result = read_frame(&mut transport, Duration::from_millis(10)).await;
        assert_eq!(Err(expected), result);
    }
}
