use super::frame_type::{CR, EA};

/// the 6-bit type field of a multiplexer control message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MccType {
    /// DLC parameter negotiation
    Pn = 0x20,
    /// modem status
    Msc = 0x38,
    Test = 0x08,
    /// flow control on, all channels
    Fcon = 0x28,
    /// flow control off, all channels
    Fcoff = 0x18,
    /// non supported command response
    Nsc = 0x04,
}

impl TryFrom<u8> for MccType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x20 => Self::Pn,
            0x38 => Self::Msc,
            0x08 => Self::Test,
            0x28 => Self::Fcon,
            0x18 => Self::Fcoff,
            0x04 => Self::Nsc,
            _ => return Err(format!("unknown mcc type: {value:#04x}")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResponse {
    Command,
    Response,
}

impl CommandResponse {
    #[must_use]
    pub const fn is_command(self) -> bool {
        matches!(self, Self::Command)
    }
}

/// first octet of every mcc message, EA in bit 0, C/R in bit 1, type in bits 2-7
///
/// the raw type is kept as is so unknown commands can be echoed back in an NSC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MccTypeField(u8);

impl MccTypeField {
    #[must_use]
    pub const fn new(raw_type: u8, cr: CommandResponse) -> Self {
        Self(EA | if cr.is_command() { CR } else { 0 } | ((raw_type & 0x3F) << 2))
    }

    #[must_use]
    pub const fn raw_type(self) -> u8 {
        self.0 >> 2
    }

    pub fn mcc_type(self) -> Result<MccType, String> {
        MccType::try_from(self.raw_type())
    }

    #[must_use]
    pub const fn cr(self) -> CommandResponse {
        if self.0 & CR != 0 {
            CommandResponse::Command
        } else {
            CommandResponse::Response
        }
    }

    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }
}

impl From<u8> for MccTypeField {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

/// V.24 signal octet carried by MSC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V24Signals(u8);

impl V24Signals {
    pub const EA: Self = Self(1);
    /// flow control, set means the sender can't accept frames
    pub const FC: Self = Self(1 << 1);
    /// ready to communicate
    pub const RTC: Self = Self(1 << 2);
    /// ready to receive
    pub const RTR: Self = Self(1 << 3);
    /// incoming call
    pub const IC: Self = Self(1 << 6);
    /// data valid
    pub const DV: Self = Self(1 << 7);

    /// what gets sent to hang up the modem signals of a channel
    pub const HANGUP: Self = Self(Self::EA.0 | Self::RTR.0 | Self::DV.0);
    pub const FLOW_ON: Self = Self(Self::EA.0 | Self::RTC.0 | Self::RTR.0 | Self::DV.0);
    pub const FLOW_OFF: Self = Self(Self::FLOW_ON.0 | Self::FC.0);

    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn flow_stopped(self) -> bool {
        self.0 & Self::FC.0 != 0
    }
}

impl std::ops::BitOr for V24Signals {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
impl std::ops::BitAnd for V24Signals {
    type Output = u8;
    fn bitand(self, rhs: Self) -> Self::Output {
        self.0 & rhs.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_octets_match_27010() {
        assert_eq!(MccTypeField::new(MccType::Pn as u8, CommandResponse::Command).raw(), 0x83);
        assert_eq!(MccTypeField::new(MccType::Msc as u8, CommandResponse::Response).raw(), 0xE1);
        assert_eq!(MccTypeField::new(MccType::Test as u8, CommandResponse::Command).raw(), 0x23);
        assert_eq!(MccTypeField::new(MccType::Fcon as u8, CommandResponse::Command).raw(), 0xA3);
        assert_eq!(MccTypeField::new(MccType::Fcoff as u8, CommandResponse::Command).raw(), 0x63);
        assert_eq!(MccTypeField::new(MccType::Nsc as u8, CommandResponse::Response).raw(), 0x11);
    }

    #[test]
    fn signal_values() {
        assert_eq!(V24Signals::HANGUP.raw(), 0x89);
        assert_eq!(V24Signals::FLOW_ON.raw(), 0x8D);
        assert_eq!(V24Signals::FLOW_OFF.raw(), 0x8F);
        assert!(V24Signals::FLOW_OFF.flow_stopped());
        assert!(!V24Signals::FLOW_ON.flow_stopped());
        assert_eq!((V24Signals::EA | V24Signals::FC) & V24Signals::FC, 0x02);
    }
}
