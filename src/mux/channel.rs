use std::sync::atomic::Ordering;

use super::MuxInner;
use crate::{
    dlci::DlciState,
    error::{MuxError, Result},
    handler::{disc, sabm, upon_disconnect},
    parser::{
        frame::Frame,
        mcc::{MccMessage, MccPacket},
    },
    sync::WaitOutcome,
    transport::basic_write,
    types::{CommandResponse, FLOW_RETRIES, TEST_PATTERN_SIZE, V24Signals},
    utils::{dlci2line, lock},
};

const TARGET: &str = "ts0710mux::channel";

/// extra waits granted to an open that found another open of the same DLCI in flight
const REENTRY_WAITS_CONTROL: usize = 11;
const REENTRY_WAITS: usize = 8;

/// a DISC gets this many timeouts to be answered
const CLOSE_TIMEOUTS: u32 = 10;

enum OpenStart {
    /// someone else already sent the SABM
    Reentry,
    Send,
}

impl MuxInner {
    /// writes a single frame, flags included
    pub(crate) async fn send_frame(&self, frame: &Frame) -> Result<usize> {
        log::debug!(
            target: TARGET,
            "mux {}: sending {:?} on dlci {}, {} bytes",
            self.id,
            frame.frame_type,
            frame.dlci(),
            frame.payload.len()
        );

        let encoded = frame.encode();
        let mut writer = self.writer.lock().await;

        Ok(basic_write(&mut **writer, &encoded).await?)
    }

    /// brings `dlci` up, resending SABM until the peer answers or the retries run out
    pub(crate) async fn open_channel(&self, dlci: u8) -> Result<()> {
        let start = {
            let mut conn = lock(&self.conn);

            if dlci != 0 && !conn.state(0).is_up() {
                return Err(MuxError::NoDevice);
            }

            match conn.state(dlci) {
                state if state.is_up() => return Ok(()),
                state if state.is_opening() => OpenStart::Reentry,
                DlciState::Disconnected | DlciState::Rejected => {
                    if dlci == 0 {
                        conn.initiator = true;
                    }
                    if let Some(d) = conn.get_mut(dlci) {
                        d.state = DlciState::Connecting;
                        d.initiator = true;
                    }
                    OpenStart::Send
                }
                state => {
                    log::warn!(target: TARGET, "mux {}: can't open dlci {dlci} in state {state:?}", self.id);
                    return Err(MuxError::NoDevice);
                }
            }
        };

        let result = match start {
            OpenStart::Reentry => {
                log::info!(target: TARGET, "mux {}: dlci {dlci} is already being opened, waiting", self.id);
                self.wait_reentrant_open(dlci).await
            }
            OpenStart::Send => self.send_sabm(dlci).await,
        };

        {
            let mut conn = lock(&self.conn);
            if conn.state(dlci).is_opening() {
                conn.set_state(dlci, DlciState::Disconnected);
            }
        }
        self.waits.wake_open(dlci);

        match &result {
            Ok(()) => log::info!(target: TARGET, "mux {}: dlci {dlci} connected", self.id),
            Err(e) => log::warn!(target: TARGET, "mux {}: dlci {dlci} not opened: {e}", self.id),
        }

        result
    }

    async fn send_sabm(&self, dlci: u8) -> Result<()> {
        let stop = self.shutdown.subscribe();

        for attempt in 0..self.config.open_retries {
            let frame = sabm(&lock(&self.conn), dlci);
            self.send_frame(&frame).await?;

            let outcome = self
                .waits
                .open[dlci as usize]
                .wait_timeout(self.config.timeout, &stop, || {
                    lock(&self.conn).state(dlci) != DlciState::Connecting
                })
                .await;

            match (outcome, lock(&self.conn).state(dlci)) {
                (_, state) if state.is_up() => return Ok(()),
                (_, DlciState::Rejected) => return Err(MuxError::Rejected(dlci)),
                (WaitOutcome::Interrupted, _) => return Err(MuxError::Interrupted),
                (WaitOutcome::TimedOut, _) => {
                    log::debug!(target: TARGET, "mux {}: SABM {attempt} on dlci {dlci} timed out", self.id);
                }
                (WaitOutcome::Ready, state) => {
                    log::debug!(target: TARGET, "mux {}: dlci {dlci} dropped to {state:?} while opening", self.id);
                    return Err(MuxError::NoDevice);
                }
            }
        }

        Err(MuxError::TimedOut(dlci))
    }

    async fn wait_reentrant_open(&self, dlci: u8) -> Result<()> {
        let stop = self.shutdown.subscribe();
        let waits = if dlci == 0 {
            REENTRY_WAITS_CONTROL
        } else {
            REENTRY_WAITS
        };

        for _ in 0..waits {
            let outcome = self
                .waits
                .open[dlci as usize]
                .wait_timeout(self.config.timeout, &stop, || {
                    !lock(&self.conn).state(dlci).is_opening()
                })
                .await;

            match (outcome, lock(&self.conn).state(dlci)) {
                (_, state) if state.is_up() => return Ok(()),
                (_, DlciState::Rejected) => return Err(MuxError::Rejected(dlci)),
                (_, DlciState::Disconnected) => return Err(MuxError::NoDevice),
                (WaitOutcome::Interrupted, _) => return Err(MuxError::Interrupted),
                _ => {}
            }
        }

        Err(MuxError::TimedOut(dlci))
    }

    /// takes `dlci` down with a DISC, or forcibly when the peer never answers
    pub(crate) async fn close_channel(&self, dlci: u8) {
        let frame = {
            let mut conn = lock(&self.conn);

            match conn.state(dlci) {
                DlciState::Disconnected | DlciState::Rejected => return,
                DlciState::Disconnecting => None,
                _ => {
                    conn.set_state(dlci, DlciState::Disconnecting);
                    Some(disc(&conn, dlci))
                }
            }
        };

        log::info!(target: TARGET, "mux {}: closing dlci {dlci}", self.id);

        let sent = match &frame {
            Some(frame) => self.send_frame(frame).await.is_ok(),
            None => true,
        };

        let mut answered = false;
        if sent {
            let stop = self.shutdown.subscribe();
            let outcome = self
                .waits
                .close[dlci as usize]
                .wait_timeout(self.config.timeout * CLOSE_TIMEOUTS, &stop, || {
                    lock(&self.conn).state(dlci) == DlciState::Disconnected
                })
                .await;

            answered = outcome == WaitOutcome::Ready;
        }

        if !answered {
            log::warn!(target: TARGET, "mux {}: DISC on dlci {dlci} unanswered, forcing it down", self.id);

            let mut conn = lock(&self.conn);
            if dlci == 0 {
                upon_disconnect(&mut conn, &self.waits);
            } else {
                conn.reset_dlci(dlci);
                self.waits.wake(dlci);
            }
        }
    }

    /// runs the loopback test on the control channel
    pub(crate) async fn exec_test_cmd(&self) -> Result<()> {
        let stop = self.shutdown.subscribe();

        let frame = {
            let mut conn = lock(&self.conn);
            if !conn.state(0).is_up() {
                return Err(MuxError::NoDevice);
            }

            if conn.be_testing {
                None
            } else {
                conn.be_testing = true;
                let packet = MccPacket::new(
                    CommandResponse::Command,
                    MccMessage::Test(MccPacket::test_pattern()),
                );
                Some(Frame::mcc(&packet, conn.initiator))
            }
        };

        let Some(frame) = frame else {
            // another test is running, its result is ours too
            let outcome = self
                .waits
                .test
                .wait_timeout(self.config.timeout * 3, &stop, || !lock(&self.conn).be_testing)
                .await;

            return match outcome {
                WaitOutcome::Ready => self.test_result(),
                WaitOutcome::Interrupted => Err(MuxError::Interrupted),
                WaitOutcome::TimedOut => Err(MuxError::TestFailed(TEST_PATTERN_SIZE)),
            };
        };

        let result = match self.send_frame(&frame).await {
            Ok(_) => {
                let outcome = self
                    .waits
                    .test
                    .wait_timeout(self.config.timeout * 2, &stop, || !lock(&self.conn).be_testing)
                    .await;

                match outcome {
                    WaitOutcome::Ready => self.test_result(),
                    WaitOutcome::Interrupted => Err(MuxError::Interrupted),
                    WaitOutcome::TimedOut => {
                        log::warn!(target: TARGET, "mux {}: test command unanswered", self.id);
                        lock(&self.conn).test_errs = TEST_PATTERN_SIZE;
                        Err(MuxError::TestFailed(TEST_PATTERN_SIZE))
                    }
                }
            }
            Err(e) => Err(e),
        };

        lock(&self.conn).be_testing = false;
        self.waits.test.wake_all();

        result
    }

    fn test_result(&self) -> Result<()> {
        let conn = lock(&self.conn);

        // a link that went down ends the test without an answer
        if !conn.state(0).is_up() {
            return Err(MuxError::NoDevice);
        }

        match conn.test_errs {
            0 => Ok(()),
            errs => Err(MuxError::TestFailed(errs)),
        }
    }

    /// asks the peer to stop sending on `dlci`
    pub(crate) async fn flow_off(&self, dlci: u8) {
        if let Some(line) = dlci2line(dlci).and_then(|l| self.lines.get(l)) {
            line.throttled.store(true, Ordering::SeqCst);
        }

        self.send_flow(dlci, false).await;
    }

    /// lets the peer send on `dlci` again, once the port has nothing queued and isn't throttled
    pub(crate) async fn flow_on(&self, dlci: u8) {
        if let Some(line) = dlci2line(dlci).and_then(|l| self.lines.get(l))
            && line.consumer().is_some()
            && (line.throttled.load(Ordering::SeqCst) || line.queued() > 0)
        {
            return;
        }

        self.send_flow(dlci, true).await;
    }

    /// the MSC behind flow on and off, skipped when the peer already has that state
    pub(crate) async fn send_flow(&self, dlci: u8, on: bool) {
        let frame = {
            let mut conn = lock(&self.conn);

            if !conn.state(0).is_up() || !conn.state(dlci).is_up() {
                return;
            }
            // flow_control is set while the peer is stopped, claimed before the MSC goes out
            match conn.get_mut(dlci) {
                Some(d) if d.flow_control == on => d.flow_control = !on,
                _ => return,
            }

            let signals = if on {
                V24Signals::FLOW_ON
            } else {
                V24Signals::FLOW_OFF
            };
            let packet = MccPacket::new(
                CommandResponse::Command,
                MccMessage::Msc { dlci, signals },
            );
            Frame::mcc(&packet, conn.initiator)
        };

        for _ in 0..FLOW_RETRIES {
            match self.send_frame(&frame).await {
                Ok(_) => {
                    log::debug!(
                        target: TARGET,
                        "mux {}: flow {} on dlci {dlci}",
                        self.id,
                        if on { "on" } else { "off" }
                    );
                    return;
                }
                Err(e) => log::debug!(target: TARGET, "mux {}: flow MSC failed: {e}", self.id),
            }
        }

        log::warn!(
            target: TARGET,
            "mux {}: gave up turning flow {} on dlci {dlci}",
            self.id,
            if on { "on" } else { "off" }
        );

        if let Some(d) = lock(&self.conn).get_mut(dlci) {
            d.flow_control = on;
        }
    }
}
