use std::io::{Error as IOError, ErrorKind};

use bytes::{BufMut, Bytes, BytesMut};

mod builder;
pub use builder::{FrameBuilder, WithAddress, WithNothing, WithType};

use crate::{
    crc::{crc_calc, crc_check},
    parser::mcc::MccPacket,
    types::{
        Address, BASIC_FLAG, FCS_SIZE, FLAG_SIZE, FrameType, SHORT_PAYLOAD_SIZE,
        frame_type::{EA, PF},
    },
};

/// a single basic mode frame, without its flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub address: Address,
    pub frame_type: FrameType,
    pub poll_final: bool,
    pub payload: Bytes,
}

impl Frame {
    #[must_use]
    pub const fn builder() -> FrameBuilder {
        FrameBuilder::new()
    }

    /// an mcc message wrapped in a UIH frame on the control channel
    #[must_use]
    pub fn mcc(packet: &MccPacket, initiator: bool) -> Self {
        Self::builder()
            .address(0, initiator)
            .uih(packet.encode())
            .build()
    }

    #[must_use]
    pub const fn dlci(&self) -> u8 {
        self.address.dlci()
    }

    /// whether the length field needs two octets
    #[must_use]
    pub fn is_long(&self) -> bool {
        self.payload.len() > SHORT_PAYLOAD_SIZE
    }

    #[must_use]
    pub fn header_len(&self) -> usize {
        if self.is_long() { 4 } else { 3 }
    }

    /// total bytes on the wire, flags included
    #[must_use]
    pub fn wire_len(&self) -> usize {
        FLAG_SIZE + self.header_len() + self.payload.len() + FCS_SIZE
    }

    /// the frame as it goes on the wire, flags included
    ///
    /// the FCS covers address, control and length only
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut encoded = BytesMut::with_capacity(self.wire_len());

        encoded.put_u8(BASIC_FLAG);
        encoded.put_u8(self.address.raw());

        let control = self.frame_type as u8;
        encoded.put_u8(if self.poll_final { control | PF } else { control });

        put_length(&mut encoded, self.payload.len());

        let fcs = crc_calc(&encoded[1..]);

        encoded.extend_from_slice(&self.payload);
        encoded.put_u8(fcs);
        encoded.put_u8(BASIC_FLAG);

        encoded.freeze()
    }

    /// parses a frame from the bytes between its two flags and validates its FCS
    pub fn decode(data: &[u8]) -> Result<Self, IOError> {
        if data.len() < 4 {
            return Err(IOError::new(
                ErrorKind::InvalidData,
                format!("frame is too short: {} bytes", data.len()),
            ));
        }

        let address = Address::from(data[0]);
        let control = data[1];

        let (payload_len, length_octets) = get_length(&data[2..]).ok_or_else(|| {
            IOError::new(ErrorKind::InvalidData, "frame is missing its length field")
        })?;

        let header_len = 2 + length_octets;

        if data.len() != header_len + payload_len + FCS_SIZE {
            return Err(IOError::new(
                ErrorKind::InvalidData,
                format!(
                    "length field says {payload_len} bytes of payload, frame has {}",
                    data.len().saturating_sub(header_len + FCS_SIZE)
                ),
            ));
        }

        let fcs = data[data.len() - 1];
        if !crc_check(&data[..header_len], fcs) {
            return Err(IOError::new(ErrorKind::InvalidData, "fcs mismatch"));
        }

        let frame_type = FrameType::try_from(control)
            .map_err(|e| IOError::new(ErrorKind::InvalidData, e))?;

        Ok(Self {
            address,
            frame_type,
            poll_final: control & PF != 0,
            payload: Bytes::copy_from_slice(&data[header_len..header_len + payload_len]),
        })
    }
}

/// writes a length field, one octet with EA set when it fits, two otherwise
pub(crate) fn put_length(buf: &mut BytesMut, len: usize) {
    if len > SHORT_PAYLOAD_SIZE {
        buf.put_u8(((len & 0x7F) << 1) as u8);
        buf.put_u8((len >> 7) as u8);
    } else {
        buf.put_u8(((len as u8) << 1) | EA);
    }
}

/// reads a length field, returns the length and how many octets it took
pub(crate) fn get_length(data: &[u8]) -> Option<(usize, usize)> {
    let first = *data.first()?;

    if first & EA != 0 {
        Some(((first >> 1) as usize, 1))
    } else {
        let second = *data.get(1)?;
        Some((((second as usize) << 7) | (first >> 1) as usize, 2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sabm_on_control_channel() {
        let frame = Frame::builder().address(0, true).sabm().build();
        assert_eq!(frame.encode().as_ref(), &[0xF9, 0x03, 0x3F, 0x01, 0x1C, 0xF9]);
    }

    #[test]
    fn ua_on_control_channel() {
        let frame = Frame::builder().address(0, true).ua().build();
        assert_eq!(frame.encode().as_ref(), &[0xF9, 0x03, 0x73, 0x01, 0xD7, 0xF9]);
    }

    #[test]
    fn short_payload_boundary() {
        let payload = Bytes::from(vec![0xAA; SHORT_PAYLOAD_SIZE]);
        let frame = Frame::builder().address(3, false).uih(payload.clone()).build();
        let encoded = frame.encode();

        assert!(!frame.is_long());
        assert_eq!(encoded[3], ((SHORT_PAYLOAD_SIZE as u8) << 1) | EA);
        assert_eq!(encoded.len(), SHORT_PAYLOAD_SIZE + 6);

        let decoded = Frame::decode(&encoded[1..encoded.len() - 1]).unwrap();
        assert_eq!(decoded.dlci(), 3);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn long_payload_boundary() {
        let payload = Bytes::from(vec![0x55; SHORT_PAYLOAD_SIZE + 1]);
        let frame = Frame::builder().address(3, false).uih(payload.clone()).build();
        let encoded = frame.encode();

        assert!(frame.is_long());
        // 128 = 0b1_0000000, low seven bits then the rest
        assert_eq!(encoded[3], 0x00);
        assert_eq!(encoded[4], 0x01);
        assert_eq!(encoded.len(), SHORT_PAYLOAD_SIZE + 1 + 7);

        let decoded = Frame::decode(&encoded[1..encoded.len() - 1]).unwrap();
        assert_eq!(decoded.frame_type, FrameType::Uih);
        assert!(!decoded.poll_final);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn decode_rejects_bad_fcs() {
        let frame = Frame::builder().address(1, true).disc().build();
        let mut encoded = frame.encode().to_vec();
        encoded[4] ^= 0x01;

        let err = Frame::decode(&encoded[1..encoded.len() - 1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        let frame = Frame::builder()
            .address(2, true)
            .uih(Bytes::from_static(b"hello"))
            .build();
        let encoded = frame.encode();

        assert!(Frame::decode(&encoded[1..encoded.len() - 2]).is_err());
    }

    #[test]
    fn length_field() {
        let mut buf = BytesMut::new();
        put_length(&mut buf, 1000);
        assert_eq!(get_length(&buf), Some((1000, 2)));

        let mut buf = BytesMut::new();
        put_length(&mut buf, 0);
        assert_eq!(buf.as_ref(), &[0x01]);
        assert_eq!(get_length(&buf), Some((0, 1)));

        assert_eq!(get_length(&[0x00]), None);
    }
}
