use std::io::{Error as IOError, ErrorKind};

use bytes::{BufMut, Bytes, BytesMut};
use pack1::U16LE;

use crate::{
    parser::frame::{get_length, put_length},
    types::{CommandResponse, MccType, MccTypeField, TEST_PATTERN_SIZE, V24Signals, frame_type::EA},
};

/// DLC parameter negotiation body
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PnParams {
    dlci: u8,
    /// frame type in the low nibble, credit flow in the high one
    frame_type_credit_flow: u8,
    prior: u8,
    ack_timer: u8,
    frame_size: U16LE,
    max_retrans: u8,
    credits: u8,
}

unsafe impl bytemuck::Zeroable for PnParams {}
unsafe impl bytemuck::Pod for PnParams {}

impl PnParams {
    pub const SIZE: usize = size_of::<Self>();

    #[must_use]
    pub const fn new(dlci: u8, prior: u8, frame_size: u16, credit_flow: u8, credits: u8) -> Self {
        Self {
            dlci: dlci & 0x3F,
            frame_type_credit_flow: (credit_flow & 0x0F) << 4,
            prior: prior & 0x3F,
            ack_timer: 0,
            frame_size: U16LE::new(frame_size),
            max_retrans: 0,
            credits,
        }
    }

    #[must_use]
    pub const fn dlci(&self) -> u8 {
        self.dlci & 0x3F
    }

    #[must_use]
    pub const fn frame_type(&self) -> u8 {
        self.frame_type_credit_flow & 0x0F
    }

    #[must_use]
    pub const fn credit_flow(&self) -> u8 {
        self.frame_type_credit_flow >> 4
    }

    #[must_use]
    pub const fn prior(&self) -> u8 {
        self.prior & 0x3F
    }

    #[must_use]
    pub const fn ack_timer(&self) -> u8 {
        self.ack_timer
    }

    #[must_use]
    pub fn frame_size(&self) -> u16 {
        self.frame_size.get()
    }

    #[must_use]
    pub const fn max_retrans(&self) -> u8 {
        self.max_retrans
    }

    #[must_use]
    pub const fn credits(&self) -> u8 {
        self.credits
    }

    #[must_use]
    pub fn decode(value: &[u8]) -> Option<Self> {
        value
            .get(..Self::SIZE)
            .map(bytemuck::pod_read_unaligned::<Self>)
    }

    #[must_use]
    pub fn encode(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[derive(Debug, Clone)]
pub enum MccMessage {
    Pn(PnParams),
    Msc { dlci: u8, signals: V24Signals },
    Test(Bytes),
    Fcon,
    Fcoff,
    /// carries the type octet of the command that wasn't understood
    Nsc(MccTypeField),
    /// anything else, answered with an NSC
    Unsupported(MccTypeField),
}

/// a multiplexer control message, the payload of a UIH frame on DLCI 0
#[derive(Debug, Clone)]
pub struct MccPacket {
    pub cr: CommandResponse,
    pub message: MccMessage,
}

impl MccPacket {
    #[must_use]
    pub const fn new(cr: CommandResponse, message: MccMessage) -> Self {
        Self { cr, message }
    }

    /// the 250 byte ramp used by the loopback test
    #[must_use]
    pub fn test_pattern() -> Bytes {
        (0..TEST_PATTERN_SIZE).map(|i| (i & 0xFF) as u8).collect()
    }

    #[must_use]
    pub fn type_field(&self) -> MccTypeField {
        let raw_type = match &self.message {
            MccMessage::Pn(_) => MccType::Pn as u8,
            MccMessage::Msc { .. } => MccType::Msc as u8,
            MccMessage::Test(_) => MccType::Test as u8,
            MccMessage::Fcon => MccType::Fcon as u8,
            MccMessage::Fcoff => MccType::Fcoff as u8,
            MccMessage::Nsc(_) => MccType::Nsc as u8,
            MccMessage::Unsupported(field) => field.raw_type(),
        };

        MccTypeField::new(raw_type, self.cr)
    }

    /// type octet, length field, value
    ///
    /// the length field gets a second octet once the value outgrows a short frame, so
    /// together with the UIH header a TEST comes out as short/short, long/short or long/long
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut value = BytesMut::new();

        match &self.message {
            MccMessage::Pn(pn) => value.extend_from_slice(pn.encode()),
            MccMessage::Msc { dlci, signals } => {
                // dlci octet of an MSC always has EA and C/R set
                value.put_u8(((dlci & 0x3F) << 2) | 0x03);
                value.put_u8(signals.raw());
            }
            MccMessage::Test(pattern) => value.extend_from_slice(pattern),
            MccMessage::Fcon | MccMessage::Fcoff | MccMessage::Unsupported(_) => {}
            MccMessage::Nsc(field) => value.put_u8(field.raw() | EA),
        }

        let mut encoded = BytesMut::with_capacity(value.len() + 3);
        encoded.put_u8(self.type_field().raw());
        put_length(&mut encoded, value.len());
        encoded.extend_from_slice(&value);

        encoded.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, IOError> {
        let Some(&type_octet) = data.first() else {
            return Err(IOError::new(ErrorKind::InvalidData, "empty mcc message"));
        };
        let field = MccTypeField::from(type_octet);

        let (len, length_octets) = get_length(&data[1..]).ok_or_else(|| {
            IOError::new(ErrorKind::InvalidData, "mcc message is missing its length")
        })?;

        let start = 1 + length_octets;
        let value = data.get(start..start + len).ok_or_else(|| {
            IOError::new(
                ErrorKind::InvalidData,
                format!(
                    "mcc length says {len} bytes, only {} arrived",
                    data.len().saturating_sub(start)
                ),
            )
        })?;

        let short = |what: &str| {
            IOError::new(
                ErrorKind::InvalidData,
                format!("{what} value is too short: {} bytes", value.len()),
            )
        };

        let message = match field.mcc_type() {
            Ok(MccType::Pn) => MccMessage::Pn(PnParams::decode(value).ok_or_else(|| short("pn"))?),
            Ok(MccType::Msc) => {
                let [dlci, signals, ..] = value else {
                    return Err(short("msc"));
                };
                MccMessage::Msc {
                    dlci: dlci >> 2,
                    signals: V24Signals::from_raw(*signals),
                }
            }
            Ok(MccType::Test) => MccMessage::Test(Bytes::copy_from_slice(value)),
            Ok(MccType::Fcon) => MccMessage::Fcon,
            Ok(MccType::Fcoff) => MccMessage::Fcoff,
            Ok(MccType::Nsc) => {
                MccMessage::Nsc(MccTypeField::from(*value.first().ok_or_else(|| short("nsc"))?))
            }
            Err(_) => MccMessage::Unsupported(field),
        };

        Ok(Self {
            cr: field.cr(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parser::frame::Frame, types::SHORT_PAYLOAD_SIZE};

    #[test]
    fn pn_layout() {
        let pn = PnParams::new(3, 7, 0x0123, 0, 0);
        let encoded = MccPacket::new(CommandResponse::Response, MccMessage::Pn(pn)).encode();

        assert_eq!(
            encoded.as_ref(),
            &[0x81, 0x11, 0x03, 0x00, 0x07, 0x00, 0x23, 0x01, 0x00, 0x00]
        );

        let MccMessage::Pn(decoded) = MccPacket::decode(&encoded).unwrap().message else {
            panic!("not a pn");
        };
        assert_eq!(decoded.dlci(), 3);
        assert_eq!(decoded.prior(), 7);
        assert_eq!(decoded.frame_size(), 0x0123);
    }

    #[test]
    fn msc_layout() {
        let packet = MccPacket::new(
            CommandResponse::Command,
            MccMessage::Msc {
                dlci: 2,
                signals: V24Signals::HANGUP,
            },
        );

        assert_eq!(packet.encode().as_ref(), &[0xE3, 0x05, 0x0B, 0x89]);

        let decoded = MccPacket::decode(&packet.encode()).unwrap();
        assert!(decoded.cr.is_command());
        let MccMessage::Msc { dlci, signals } = decoded.message else {
            panic!("not an msc");
        };
        assert_eq!(dlci, 2);
        assert_eq!(signals, V24Signals::HANGUP);
    }

    #[test]
    fn flow_and_nsc_layout() {
        let fcoff = MccPacket::new(CommandResponse::Command, MccMessage::Fcoff);
        assert_eq!(fcoff.encode().as_ref(), &[0x63, 0x01]);

        let unknown = MccTypeField::from(0x47);
        let nsc = MccPacket::new(CommandResponse::Response, MccMessage::Nsc(unknown));
        assert_eq!(nsc.encode().as_ref(), &[0x11, 0x03, 0x47]);
    }

    #[test]
    fn unknown_type_is_kept_for_nsc() {
        let decoded = MccPacket::decode(&[0x47, 0x01]).unwrap();

        let MccMessage::Unsupported(field) = decoded.message else {
            panic!("should be unsupported");
        };
        assert_eq!(field.raw_type(), 0x11);
        assert!(field.cr().is_command());
    }

    #[test]
    fn test_framing_branches() {
        let test_frame = |len: usize| {
            let pattern: Bytes = (0..len).map(|i| i as u8).collect();
            let packet = MccPacket::new(CommandResponse::Command, MccMessage::Test(pattern));
            Frame::mcc(&packet, true)
        };

        // short UIH, short mcc
        let frame = test_frame(SHORT_PAYLOAD_SIZE - 2);
        assert!(!frame.is_long());
        assert_eq!(frame.payload[1] & EA, EA);

        // long UIH, short mcc
        let frame = test_frame(SHORT_PAYLOAD_SIZE - 1);
        assert!(frame.is_long());
        assert_eq!(frame.payload[1] & EA, EA);
        assert_eq!(frame.payload.len(), SHORT_PAYLOAD_SIZE + 1);

        // long UIH, long mcc
        let frame = test_frame(TEST_PATTERN_SIZE);
        assert!(frame.is_long());
        assert_eq!(frame.payload[1] & EA, 0);
        assert_eq!(frame.payload.len(), TEST_PATTERN_SIZE + 3);

        let MccMessage::Test(echo) = MccPacket::decode(&frame.payload).unwrap().message else {
            panic!("not a test");
        };
        assert_eq!(echo.len(), TEST_PATTERN_SIZE);
    }

    #[test]
    fn truncated_value_is_rejected() {
        assert!(MccPacket::decode(&[0x83, 0x11, 0x03]).is_err());
        assert!(MccPacket::decode(&[0xE3, 0x03, 0x0B]).is_err());
        assert!(MccPacket::decode(&[]).is_err());
    }
}
