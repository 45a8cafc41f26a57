use std::time::Duration;

pub mod frame_type;
pub mod mcc_type;

pub use frame_type::{Address, BASIC_FLAG, FrameType};
pub use mcc_type::{CommandResponse, MccType, MccTypeField, V24Signals};

/// length fields up to this value fit in one octet
pub const SHORT_PAYLOAD_SIZE: usize = 127;

/// flag + address + control + two length octets
pub const MAX_HDR_SIZE: usize = 5;

/// opening and closing flag
pub const FLAG_SIZE: usize = 2;

pub const FCS_SIZE: usize = 1;

pub const DEF_MTU: usize = 3100;

/// DLCIs 0..MAX_CHN exist on a connection, 0 is the control channel
pub const MAX_CHN: usize = 61;

/// number of virtual ports per mux instance
pub const NR_MUXS: usize = 32;

pub const TIME_OUT: Duration = Duration::from_millis(2500);

/// how many times an open resends SABM before giving up
pub const OPEN_RETRIES: usize = 10;

/// size of the deframer's accumulation buffer
pub const MAX_BUF_SIZE: usize = 64 * 1024;

/// cap on the bytes queued on a single port's receive side
pub const MAX_TOTAL_SIZE: usize = 1024 * 1024;

pub const SEND_BUF_OFFSET: usize = 10;
pub const SEND_BUF_SIZE: usize = DEF_MTU + SEND_BUF_OFFSET + 34;
pub const RECV_BUF_SIZE: usize = SEND_BUF_SIZE;

/// largest frame the send task writes in one go
pub const SERIAL_BUF_SIZE: usize = DEF_MTU + MAX_HDR_SIZE;

pub const MAX_TOTAL_FRAME_SIZE: usize = DEF_MTU + MAX_HDR_SIZE + FLAG_SIZE;

/// what `chars_in_buffer` reports for a port that can't take a write
pub const MAX_CHARS_IN_BUF: usize = 65535;

pub const TEST_PATTERN_SIZE: usize = 250;

pub const FLOW_RETRIES: usize = 3;

pub const IO_MSC_HANGUP: u32 = 0x54F0;
pub const IO_TEST_CMD: u32 = 0x54F1;
pub const IO_DLCI_FC_ON: u32 = 0x54F2;
pub const IO_DLCI_FC_OFF: u32 = 0x54F3;
pub const IO_FC_ON: u32 = 0x54F4;
pub const IO_FC_OFF: u32 = 0x54F5;
