use crate::types::{MAX_CHN, TEST_PATTERN_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DlciState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    FlowStopped,
    Rejected,
    Negotiating,
}

impl DlciState {
    /// data can move on the channel, or will once flow resumes
    #[must_use]
    pub const fn is_up(self) -> bool {
        matches!(self, Self::Connected | Self::FlowStopped)
    }

    /// an open is in flight
    #[must_use]
    pub const fn is_opening(self) -> bool {
        matches!(self, Self::Connecting | Self::Negotiating)
    }
}

#[derive(Debug, Clone)]
pub struct Dlci {
    pub state: DlciState,
    pub mtu: usize,
    /// we told the peer to stop sending on this channel
    pub flow_control: bool,
    /// this side sent the SABM
    pub initiator: bool,
    /// the peer sent the SABM
    pub initiated: bool,
}

impl Dlci {
    #[must_use]
    pub const fn new(mtu: usize) -> Self {
        Self {
            state: DlciState::Disconnected,
            mtu,
            flow_control: false,
            initiator: false,
            initiated: false,
        }
    }

    /// back to defaults, except for the state
    fn reset_params(&mut self, mtu: usize) {
        self.mtu = mtu;
        self.flow_control = false;
        self.initiator = false;
        self.initiated = false;
    }
}

/// protocol state of one multiplexed link
#[derive(Debug, Clone)]
pub struct Connection {
    pub dlci: Vec<Dlci>,
    pub initiator: bool,
    pub mtu: usize,
    pub be_testing: bool,
    pub test_errs: usize,
    default_mtu: usize,
}

impl Connection {
    #[must_use]
    pub fn new(mtu: usize) -> Self {
        Self {
            dlci: vec![Dlci::new(mtu); MAX_CHN],
            initiator: false,
            mtu,
            be_testing: false,
            test_errs: 0,
            default_mtu: mtu,
        }
    }

    /// a DLCI that can carry data, 0 is the control channel
    #[must_use]
    pub const fn valid_dlci(dlci: u8) -> bool {
        dlci > 0 && (dlci as usize) < MAX_CHN
    }

    #[must_use]
    pub fn get(&self, dlci: u8) -> Option<&Dlci> {
        self.dlci.get(dlci as usize)
    }

    pub fn get_mut(&mut self, dlci: u8) -> Option<&mut Dlci> {
        self.dlci.get_mut(dlci as usize)
    }

    /// the state, or DISCONNECTED for anything past the last channel
    #[must_use]
    pub fn state(&self, dlci: u8) -> DlciState {
        self.get(dlci).map_or(DlciState::Disconnected, |d| d.state)
    }

    pub fn set_state(&mut self, dlci: u8, state: DlciState) {
        if let Some(d) = self.get_mut(dlci) {
            d.state = state;
        }
    }

    /// forgets a single channel
    pub fn reset_dlci(&mut self, dlci: u8) {
        let mtu = self.default_mtu;
        if let Some(d) = self.get_mut(dlci) {
            d.state = DlciState::Disconnected;
            d.reset_params(mtu);
        }
    }

    /// keeps the state, drops negotiated parameters
    pub fn reset_dlci_params(&mut self, dlci: u8) {
        let mtu = self.default_mtu;
        if let Some(d) = self.get_mut(dlci) {
            d.reset_params(mtu);
        }
    }

    /// every channel back to DISCONNECTED, the link back to its initial state
    pub fn reset(&mut self) {
        for j in 0..MAX_CHN as u8 {
            self.reset_dlci(j);
        }

        self.initiator = false;
        self.mtu = self.default_mtu;
        self.be_testing = false;
        self.test_errs = 0;
    }

    /// counts mismatches against the test ramp, a wrong length counts as all wrong
    pub fn check_test_echo(&mut self, echo: &[u8]) -> usize {
        self.test_errs = if echo.len() == TEST_PATTERN_SIZE {
            echo.iter()
                .enumerate()
                .filter(|&(i, &b)| b != (i & 0xFF) as u8)
                .count()
        } else {
            TEST_PATTERN_SIZE
        };

        self.test_errs
    }
}
