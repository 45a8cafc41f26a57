use thiserror::Error;

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("transport failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("dlci {0} was rejected by the peer")]
    Rejected(u8),

    #[error("dlci {0} did not answer after all retries")]
    TimedOut(u8),

    #[error("wait was interrupted by shutdown")]
    Interrupted,

    #[error("line {0} is not connected")]
    NotConnected(usize),

    #[error("the control channel is not up")]
    NoDevice,

    #[error("line {0} is out of range")]
    InvalidLine(usize),

    #[error("modem did not switch to cmux mode")]
    Handshake,

    #[error("test command failed, {0} bytes did not match")]
    TestFailed(usize),

    #[error("unsupported ioctl: {0:#x}")]
    UnsupportedIoctl(u32),

    #[error("no mux registered with id {0}")]
    NotRegistered(u32),

    #[error("a mux is already registered with id {0}")]
    AlreadyRegistered(u32),
}

pub type Result<T, E = MuxError> = std::result::Result<T, E>;
