/// opens and closes every basic mode frame
pub const BASIC_FLAG: u8 = 0xF9;

/// poll/final bit of the control byte
pub const PF: u8 = 0x10;

/// extension bit, set on the last octet of an address or length field
pub const EA: u8 = 0x01;

/// command/response bit of the address and mcc type octets
pub const CR: u8 = 0x02;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Sabm = 0x2F,
    Ua = 0x63,
    Dm = 0x0F,
    Disc = 0x43,
    Uih = 0xEF,
}

impl TryFrom<u8> for FrameType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value & !PF {
            0x2F => Self::Sabm,
            0x63 => Self::Ua,
            0x0F => Self::Dm,
            0x43 => Self::Disc,
            0xEF => Self::Uih,
            _ => return Err(format!("unknown control byte: {value:#04x}")),
        })
    }
}

/// the address octet: EA in bit 0, C/R in bit 1, the DLCI in bits 2-7
///
/// the DLCI itself is `(server_channel << 1) | direction`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address(u8);

impl Address {
    #[must_use]
    pub const fn new(dlci: u8, cr: bool) -> Self {
        Self(EA | if cr { CR } else { 0 } | ((dlci & 0x3F) << 2))
    }

    #[must_use]
    pub const fn dlci(self) -> u8 {
        self.0 >> 2
    }

    #[must_use]
    pub const fn server_channel(self) -> u8 {
        self.0 >> 3
    }

    #[must_use]
    pub const fn cr(self) -> bool {
        self.0 & CR != 0
    }

    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }
}

impl From<u8> for Address {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_layout() {
        let addr = Address::new(5, true);
        assert_eq!(addr.raw(), 0x17);
        assert_eq!(addr.dlci(), 5);
        assert_eq!(addr.server_channel(), 2);
        assert!(addr.cr());

        let addr = Address::from(0x03);
        assert_eq!(addr.dlci(), 0);
        assert!(addr.cr());
    }

    #[test]
    fn control_byte_ignores_pf() {
        assert_eq!(FrameType::try_from(0x73), Ok(FrameType::Ua));
        assert_eq!(FrameType::try_from(0xFF), Ok(FrameType::Uih));
        assert!(FrameType::try_from(0x01).is_err());
    }
}
