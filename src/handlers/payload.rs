use thiserror::Error;

/// Errors returned while mapping frame payloads to typed values.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum PayloadError {
    /// The payload ended before a field could be read.
    #[error("payload truncated: needed {needed} more bytes but only {remaining} remain")]
    Truncated { needed: usize, remaining: usize },
    /// Bytes were left over after the expected structure was read.
    #[error("payload has {remaining} unexpected trailing bytes")]
    Trailing { remaining: usize },
    /// A field held a value outside its documented range.
    #[error("payload field `{field}` holds invalid value {value}")]
    InvalidValue { field: &'static str, value: u32 },
}

/// Appends little-endian fields to a request payload.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    bytes: Vec<u8>,
}

impl PayloadWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(value);
        self
    }

    /// Consumes the writer and returns the encoded payload.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Reads little-endian fields from a response payload.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    bytes: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.bytes.len()
    }

    /// # Errors
    ///
    /// Returns an error if the payload is exhausted.
    pub fn u8(&mut self) -> Result<u8, PayloadError> {
        let [value] = self.array::<1>()?;
        Ok(value)
    }

    /// # Errors
    ///
    /// Returns an error if fewer than two bytes remain.
    pub fn u16(&mut self) -> Result<u16, PayloadError> {
        self.array().map(u16::from_le_bytes)
    }

    /// # Errors
    ///
    /// Returns an error if fewer than four bytes remain.
    pub fn u32(&mut self) -> Result<u32, PayloadError> {
        self.array().map(u32::from_le_bytes)
    }

    /// # Errors
    ///
    /// Returns an error if fewer than `N` bytes remain.
    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], PayloadError> {
        let Some((head, tail)) = self.bytes.split_first_chunk::<N>() else {
            return Err(PayloadError::Truncated {
                needed: N,
                remaining: self.bytes.len(),
            });
        };
        self.bytes = tail;
        Ok(*head)
    }

    /// # Errors
    ///
    /// Returns an error if fewer than `len` bytes remain.
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], PayloadError> {
        if len > self.bytes.len() {
            return Err(PayloadError::Truncated {
                needed: len,
                remaining: self.bytes.len(),
            });
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Ok(head)
    }

    /// Consumes everything left.
    pub fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.bytes)
    }

    /// Fails if any bytes were left unread.
    ///
    /// # Errors
    ///
    /// Returns an error when trailing bytes remain.
    pub fn finish(self) -> Result<(), PayloadError> {
        if self.bytes.is_empty() {
            Ok(())
        } else {
            Err(PayloadError::Trailing {
                remaining: self.bytes.len(),
            })
        }
    }
}

/// A typed value carried in a frame payload.
///
/// Decoding must consume the payload exactly; anything else is a malformed
/// packet.
pub trait WirePayload: Sized {
    /// Appends this value to a request payload.
    fn encode(&self, out: &mut PayloadWriter);

    /// Reads this value from a response payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is too short or a field is invalid.
    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError>;
}

/// Encodes a value into a standalone payload.
pub fn encode_payload<T: WirePayload>(value: &T) -> Vec<u8> {
    let mut writer = PayloadWriter::new();
    value.encode(&mut writer);
    writer.finish()
}

/// Decodes a value that must span the whole payload.
///
/// ```
/// use summit::decode_payload;
///
/// let value: u16 = decode_payload(&[0x34, 0x12])?;
/// assert_eq!(0x1234, value);
/// assert!(decode_payload::<u16>(&[0x34, 0x12, 0x00]).is_err());
/// # Ok::<(), summit::PayloadError>(())
/// ```
///
/// # Errors
///
/// Returns an error if the payload is short, has trailing bytes, or holds an
/// invalid field.
pub fn decode_payload<T: WirePayload>(bytes: &[u8]) -> Result<T, PayloadError> {
    let mut reader = PayloadReader::new(bytes);
    let value = T::decode(&mut reader)?;
    reader.finish()?;
    Ok(value)
}

impl WirePayload for () {
    fn encode(&self, _out: &mut PayloadWriter) {}

    fn decode(_input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        Ok(())
    }
}

impl WirePayload for u8 {
    fn encode(&self, out: &mut PayloadWriter) {
        out.u8(*self);
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        input.u8()
    }
}

impl WirePayload for u16 {
    fn encode(&self, out: &mut PayloadWriter) {
        out.u16(*self);
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        input.u16()
    }
}

/// Two's complement, little-endian.
impl WirePayload for i16 {
    fn encode(&self, out: &mut PayloadWriter) {
        out.bytes(&self.to_le_bytes());
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        input.array().map(i16::from_le_bytes)
    }
}

impl WirePayload for u32 {
    fn encode(&self, out: &mut PayloadWriter) {
        out.u32(*self);
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        input.u32()
    }
}

impl WirePayload for bool {
    fn encode(&self, out: &mut PayloadWriter) {
        out.u8(u8::from(*self));
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        match input.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(PayloadError::InvalidValue {
                field: "flag",
                value: u32::from(other),
            }),
        }
    }
}

/// Raw bytes spanning the rest of the payload.
impl WirePayload for Vec<u8> {
    fn encode(&self, out: &mut PayloadWriter) {
        out.bytes(self);
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        Ok(input.rest().to_vec())
    }
}

impl<A: WirePayload, B: WirePayload> WirePayload for (A, B) {
    fn encode(&self, out: &mut PayloadWriter) {
        self.0.encode(out);
        self.1.encode(out);
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        Ok((A::decode(input)?, B::decode(input)?))
    }
}

impl<A: WirePayload, B: WirePayload, C: WirePayload> WirePayload for (A, B, C) {
    fn encode(&self, out: &mut PayloadWriter) {
        self.0.encode(out);
        self.1.encode(out);
        self.2.encode(out);
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        Ok((A::decode(input)?, B::decode(input)?, C::decode(input)?))
    }
}

impl<A: WirePayload, B: WirePayload, C: WirePayload, D: WirePayload> WirePayload
    for (A, B, C, D)
{
    fn encode(&self, out: &mut PayloadWriter) {
        self.0.encode(out);
        self.1.encode(out);
        self.2.encode(out);
        self.3.encode(out);
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        Ok((
            A::decode(input)?,
            B::decode(input)?,
            C::decode(input)?,
            D::decode(input)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::fmt;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::handlers::{AudioClockSetup, I2S_MAP_ENTRIES, I2sChannel, I2sInputMap, InfoKind};

    fn round_trip<T>(value: &T)
    where
        T: WirePayload + PartialEq + fmt::Debug,
    {
        let decoded: T =
            decode_payload(&encode_payload(value)).expect("encoded payload should decode");
        assert_eq!(value, &decoded);
    }

    #[rstest]
    #[case::unit(|| round_trip(&()))]
    #[case::byte(|| round_trip(&0xA5u8))]
    #[case::half_word(|| round_trip(&0xBEEFu16))]
    #[case::signed_half_word(|| {
        round_trip(&-6i16);
        round_trip(&i16::MIN);
    })]
    #[case::word(|| round_trip(&0x0040_3024u32))]
    #[case::flags(|| {
        round_trip(&true);
        round_trip(&false);
    })]
    #[case::raw_bytes(|| round_trip(&vec![0x00, 0x01, 0xFF]))]
    #[case::register_write(|| round_trip(&(0x0040_0064u32, 0x0100u16)))]
    #[case::flash_read(|| round_trip(&(0x000F_0000u32, 128u16)))]
    #[case::flash_write(|| round_trip(&(0x000C_0000u32, vec![0x5A; 128])))]
    #[case::eeprom_copy(|| round_trip(&(1u8, 0u8, 0x0001_0000u32)))]
    #[case::image_slot(|| round_trip(&(0xFEu8, 1u8)))]
    #[case::descriptor_record(|| round_trip(&(3u8, 0u8, vec![0x10; 24])))]
    #[case::volume_trim(|| round_trip(&(4u8, -12i16)))]
    #[case::firmware_chunk(|| round_trip(&(0xFEu8, 1u8, 0x0000_0400u32, vec![0xC3; 64])))]
    #[case::audio_clock(|| round_trip(&AudioClockSetup {
        audio_source: 2,
        sclk_frequency: 4,
        drive_clocks: true,
        mclk_frequency: 1,
        mclk_output_enable: false,
    }))]
    #[case::i2s_map(|| round_trip(&I2sInputMap(vec![
        I2sChannel { codec_i2s_channel: 0, codec_channel: 1, speaker_type: 2 };
        I2S_MAP_ENTRIES
    ])))]
    #[case::record_query(|| round_trip(&(InfoKind::CoefficientInfo, 1u8)))]
    fn request_payloads_survive_the_wire(#[case] check: fn()) {
        check();
    }

    #[test]
    fn tuples_encode_fields_in_order() {
        let payload = encode_payload(&(0x0040_0008u32, 0x5555u16, true));
        assert_eq!(vec![0x08, 0x00, 0x40, 0x00, 0x55, 0x55, 0x01], payload);
    }

    #[test]
    fn signed_values_are_little_endian_twos_complement() {
        assert_eq!(vec![0xFA, 0xFF], encode_payload(&-6i16));
    }

    #[test]
    fn decode_rejects_truncated_fields() {
        assert_matches!(
            decode_payload::<u32>(&[0x01, 0x02]),
            Err(PayloadError::Truncated {
                needed: 4,
                remaining: 2
            })
        );
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        assert_matches!(
            decode_payload::<u8>(&[0x01, 0x02]),
            Err(PayloadError::Trailing { remaining: 1 })
        );
    }

    #[test]
    fn byte_vectors_take_the_rest() {
        let decoded: (u8, Vec<u8>) =
            decode_payload(&[0x03, 0xAA, 0xBB]).expect("tail bytes should decode");
        assert_eq!((0x03, vec![0xAA, 0xBB]), decoded);
    }

    #[test]
    fn flags_reject_values_other_than_zero_or_one() {
        assert_matches!(
            decode_payload::<bool>(&[0x02]),
            Err(PayloadError::InvalidValue {
                field: "flag",
                value: 2
            })
        );
    }
}
