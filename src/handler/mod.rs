use bytes::Bytes;

use crate::{
    dlci::{Connection, DlciState},
    parser::frame::Frame,
    sync::WaitQueue,
    types::{FrameType, MAX_CHN},
};

pub mod control;
pub mod mcc;

/// what the mux has to do once the frame handler let go of the connection lock
#[derive(Debug)]
pub enum Reaction {
    /// write this frame to the transport
    Send(Frame),
    /// payload for whichever port sits on this DLCI
    Deliver { dlci: u8, payload: Bytes },
    /// flow resumed somewhere, let the send task retry
    ScheduleSend,
}

/// everything a caller can block on while the peer answers
pub struct Waits {
    pub open: Vec<WaitQueue>,
    pub close: Vec<WaitQueue>,
    pub test: WaitQueue,
}

impl Default for Waits {
    fn default() -> Self {
        Self::new()
    }
}

impl Waits {
    #[must_use]
    pub fn new() -> Self {
        Self {
            open: (0..MAX_CHN).map(|_| WaitQueue::new()).collect(),
            close: (0..MAX_CHN).map(|_| WaitQueue::new()).collect(),
            test: WaitQueue::new(),
        }
    }

    pub fn wake_open(&self, dlci: u8) {
        if let Some(q) = self.open.get(dlci as usize) {
            q.wake_all();
        }
    }

    /// both the open and the close queue of a DLCI
    pub fn wake(&self, dlci: u8) {
        self.wake_open(dlci);
        if let Some(q) = self.close.get(dlci as usize) {
            q.wake_all();
        }
    }
}

/// the link is gone, every channel drops to DISCONNECTED and every waiter wakes up
pub fn upon_disconnect(conn: &mut Connection, waits: &Waits) {
    for j in 0..MAX_CHN as u8 {
        conn.set_state(j, DlciState::Disconnected);
        waits.wake(j);
    }

    conn.be_testing = false;
    waits.test.wake_all();
    conn.reset();
}

/// UA and DM answer with the C/R bit of the side that didn't start the link
#[must_use]
pub fn ua(conn: &Connection, dlci: u8) -> Frame {
    Frame::builder().address(dlci, !conn.initiator).ua().build()
}

#[must_use]
pub fn dm(conn: &Connection, dlci: u8) -> Frame {
    Frame::builder().address(dlci, !conn.initiator).dm().build()
}

#[must_use]
pub fn sabm(conn: &Connection, dlci: u8) -> Frame {
    Frame::builder().address(dlci, conn.initiator).sabm().build()
}

#[must_use]
pub fn disc(conn: &Connection, dlci: u8) -> Frame {
    Frame::builder().address(dlci, conn.initiator).disc().build()
}

/// reacts to one validated frame from the peer
pub fn handle_frame(conn: &mut Connection, waits: &Waits, frame: Frame) -> Vec<Reaction> {
    let dlci = frame.dlci();

    match frame.frame_type {
        FrameType::Sabm => control::on_sabm(conn, waits, dlci),
        FrameType::Ua => control::on_ua(conn, waits, dlci),
        FrameType::Dm => control::on_dm(conn, waits, dlci),
        FrameType::Disc => control::on_disc(conn, waits, dlci),
        FrameType::Uih => on_uih(conn, waits, frame),
    }
}

fn on_uih(conn: &mut Connection, waits: &Waits, frame: Frame) -> Vec<Reaction> {
    let dlci = frame.dlci();

    if dlci as usize >= MAX_CHN {
        log::debug!(target: "ts0710mux::handler", "UIH on dlci {dlci} out of range");
        return vec![Reaction::Send(dm(conn, dlci))];
    }

    if frame.poll_final {
        log::debug!(target: "ts0710mux::handler", "UIH with P/F set on dlci {dlci}, dropped");
        return vec![];
    }

    if !conn.state(dlci).is_up() {
        log::debug!(
            target: "ts0710mux::handler",
            "UIH on dlci {dlci} in state {:?}",
            conn.state(dlci)
        );
        return vec![Reaction::Send(dm(conn, dlci))];
    }

    if dlci == 0 {
        return mcc::process_mcc(conn, waits, &frame.payload);
    }

    let mtu = conn.get(dlci).map_or(0, |d| d.mtu);
    if frame.payload.len() > mtu {
        log::warn!(
            target: "ts0710mux::handler",
            "dlci {dlci}: {} bytes is over the mtu of {mtu}",
            frame.payload.len()
        );
        return vec![];
    }

    vec![Reaction::Deliver {
        dlci,
        payload: frame.payload,
    }]
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::DEF_MTU;

    pub(crate) fn sent(reactions: &[Reaction]) -> Vec<&Frame> {
        reactions
            .iter()
            .filter_map(|r| match r {
                Reaction::Send(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    fn uih(dlci: u8, payload: &'static [u8]) -> Frame {
        Frame::builder()
            .address(dlci, true)
            .uih(Bytes::from_static(payload))
            .build()
    }

    #[test]
    fn uih_on_closed_channel_gets_dm() {
        let mut conn = Connection::new(DEF_MTU);
        let waits = Waits::new();

        let reactions = handle_frame(&mut conn, &waits, uih(4, b"data"));
        let frames = sent(&reactions);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, FrameType::Dm);
        assert_eq!(frames[0].dlci(), 4);
    }

    #[test]
    fn uih_is_delivered_when_connected() {
        let mut conn = Connection::new(DEF_MTU);
        let waits = Waits::new();
        conn.set_state(4, DlciState::FlowStopped);

        let reactions = handle_frame(&mut conn, &waits, uih(4, b"data"));

        assert!(matches!(
            reactions.as_slice(),
            [Reaction::Deliver { dlci: 4, payload }] if payload.as_ref() == b"data"
        ));
    }

    #[test]
    fn uih_over_mtu_is_dropped() {
        let mut conn = Connection::new(2);
        let waits = Waits::new();
        conn.set_state(4, DlciState::Connected);

        assert!(handle_frame(&mut conn, &waits, uih(4, b"data")).is_empty());
    }

    #[test]
    fn uih_with_pf_is_dropped() {
        let mut conn = Connection::new(DEF_MTU);
        let waits = Waits::new();
        conn.set_state(4, DlciState::Connected);

        let mut frame = uih(4, b"data");
        frame.poll_final = true;

        assert!(handle_frame(&mut conn, &waits, frame).is_empty());
    }

    #[test]
    fn uih_out_of_range_gets_dm() {
        let mut conn = Connection::new(DEF_MTU);
        let waits = Waits::new();

        let reactions = handle_frame(&mut conn, &waits, uih(62, b"x"));
        assert_eq!(sent(&reactions)[0].frame_type, FrameType::Dm);
    }
}
