use std::time::Duration;

use crate::types::{DEF_MTU, OPEN_RETRIES, TIME_OUT};

/// knobs of a single mux instance
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// base wait for every handshake, opens wait this long per SABM, closes ten times it
    pub timeout: Duration,
    pub open_retries: usize,
    /// initial mtu of every DLCI before PN narrows it
    pub mtu: usize,
    /// talk AT to the modem and switch it to cmux before opening DLCI 0
    pub handshake: bool,
    pub handshake_probe: String,
    pub handshake_command: String,
    pub handshake_attempts: usize,
    /// how long a single handshake read may block
    pub handshake_read_timeout: Duration,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            timeout: TIME_OUT,
            open_retries: OPEN_RETRIES,
            mtu: DEF_MTU,
            handshake: true,
            handshake_probe: "AT\r".into(),
            handshake_command: "at+cmux=0\r".into(),
            handshake_attempts: 5,
            handshake_read_timeout: Duration::from_secs(2),
        }
    }
}

impl MuxConfig {
    /// a config for links where the peer is already in cmux mode
    #[must_use]
    pub fn without_handshake() -> Self {
        Self {
            handshake: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    #[must_use]
    pub fn with_open_retries(mut self, retries: usize) -> Self {
        self.open_retries = retries;
        self
    }
}
