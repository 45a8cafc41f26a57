use super::{Reaction, Waits, dm, ua, upon_disconnect};
use crate::dlci::{Connection, DlciState};

const TARGET: &str = "ts0710mux::handler::control";

pub fn on_sabm(conn: &mut Connection, waits: &Waits, dlci: u8) -> Vec<Reaction> {
    if dlci == 0 || Connection::valid_dlci(dlci) {
        log::debug!(target: TARGET, "SABM on dlci {dlci}, accepting");

        if let Some(d) = conn.get_mut(dlci) {
            d.state = DlciState::Connected;
            d.initiated = true;
        }
        waits.wake_open(dlci);

        vec![Reaction::Send(ua(conn, dlci))]
    } else {
        log::debug!(target: TARGET, "SABM on invalid dlci {dlci}, rejecting");
        vec![Reaction::Send(dm(conn, dlci))]
    }
}

pub fn on_ua(conn: &mut Connection, waits: &Waits, dlci: u8) -> Vec<Reaction> {
    let state = conn.state(dlci);
    log::debug!(target: TARGET, "UA on dlci {dlci} in state {state:?}");

    if dlci != 0 && !Connection::valid_dlci(dlci) {
        return vec![];
    }

    match state {
        DlciState::Connecting => {
            conn.set_state(dlci, DlciState::Connected);
            waits.wake_open(dlci);
        }
        DlciState::Disconnecting if dlci == 0 => upon_disconnect(conn, waits),
        DlciState::Disconnecting => {
            conn.set_state(dlci, DlciState::Disconnected);
            waits.wake(dlci);
            conn.reset_dlci(dlci);
        }
        _ => {}
    }

    vec![]
}

pub fn on_dm(conn: &mut Connection, waits: &Waits, dlci: u8) -> Vec<Reaction> {
    let state = conn.state(dlci);
    log::debug!(target: TARGET, "DM on dlci {dlci} in state {state:?}");

    if dlci == 0 {
        upon_disconnect(conn, waits);
        if state == DlciState::Connecting {
            conn.set_state(0, DlciState::Rejected);
        }
    } else if Connection::valid_dlci(dlci) {
        conn.set_state(
            dlci,
            if state == DlciState::Connecting {
                DlciState::Rejected
            } else {
                DlciState::Disconnected
            },
        );
        conn.reset_dlci_params(dlci);
        waits.wake(dlci);
    }

    vec![]
}

pub fn on_disc(conn: &mut Connection, waits: &Waits, dlci: u8) -> Vec<Reaction> {
    log::debug!(target: TARGET, "DISC on dlci {dlci}");

    if dlci == 0 {
        let reply = ua(conn, 0);
        upon_disconnect(conn, waits);
        vec![Reaction::Send(reply)]
    } else if Connection::valid_dlci(dlci) {
        let reply = ua(conn, dlci);
        conn.reset_dlci(dlci);
        waits.wake(dlci);
        vec![Reaction::Send(reply)]
    } else {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handler::{handle_frame, tests::sent},
        parser::frame::Frame,
        types::{DEF_MTU, FrameType},
    };

    fn control(frame_type: FrameType, dlci: u8) -> Frame {
        let builder = Frame::builder().address(dlci, true);
        match frame_type {
            FrameType::Sabm => builder.sabm(),
            FrameType::Ua => builder.ua(),
            FrameType::Dm => builder.dm(),
            FrameType::Disc => builder.disc(),
            FrameType::Uih => builder.uih(bytes::Bytes::new()),
        }
        .build()
    }

    #[test]
    fn sabm_on_control_channel() {
        let mut conn = Connection::new(DEF_MTU);
        let waits = Waits::new();

        let reactions = handle_frame(&mut conn, &waits, control(FrameType::Sabm, 0));
        let frames = sent(&reactions);

        assert_eq!(conn.state(0), DlciState::Connected);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, FrameType::Ua);
        assert_eq!(frames[0].dlci(), 0);
        // we didn't start the link, so the response carries C/R
        assert!(frames[0].address.cr());
    }

    #[test]
    fn sabm_on_invalid_dlci_is_rejected() {
        let mut conn = Connection::new(DEF_MTU);
        let waits = Waits::new();

        let reactions = handle_frame(&mut conn, &waits, control(FrameType::Sabm, 61));
        assert_eq!(sent(&reactions)[0].frame_type, FrameType::Dm);
    }

    #[test]
    fn ua_completes_open_and_close() {
        let mut conn = Connection::new(DEF_MTU);
        let waits = Waits::new();

        conn.set_state(5, DlciState::Connecting);
        handle_frame(&mut conn, &waits, control(FrameType::Ua, 5));
        assert_eq!(conn.state(5), DlciState::Connected);

        conn.set_state(5, DlciState::Disconnecting);
        conn.dlci[5].mtu = 10;
        handle_frame(&mut conn, &waits, control(FrameType::Ua, 5));
        assert_eq!(conn.state(5), DlciState::Disconnected);
        assert_eq!(conn.dlci[5].mtu, DEF_MTU);
    }

    #[test]
    fn ua_on_closing_control_channel_drops_everything() {
        let mut conn = Connection::new(DEF_MTU);
        let waits = Waits::new();

        conn.set_state(0, DlciState::Disconnecting);
        conn.set_state(3, DlciState::Connected);
        handle_frame(&mut conn, &waits, control(FrameType::Ua, 0));

        assert_eq!(conn.state(0), DlciState::Disconnected);
        assert_eq!(conn.state(3), DlciState::Disconnected);
    }

    #[test]
    fn dm_while_connecting_rejects() {
        let mut conn = Connection::new(DEF_MTU);
        let waits = Waits::new();

        conn.set_state(2, DlciState::Connecting);
        handle_frame(&mut conn, &waits, control(FrameType::Dm, 2));
        assert_eq!(conn.state(2), DlciState::Rejected);

        conn.set_state(2, DlciState::Connected);
        handle_frame(&mut conn, &waits, control(FrameType::Dm, 2));
        assert_eq!(conn.state(2), DlciState::Disconnected);

        conn.set_state(0, DlciState::Connecting);
        handle_frame(&mut conn, &waits, control(FrameType::Dm, 0));
        assert_eq!(conn.state(0), DlciState::Rejected);
    }

    #[test]
    fn disc_is_acknowledged() {
        let mut conn = Connection::new(DEF_MTU);
        let waits = Waits::new();

        conn.set_state(7, DlciState::Connected);
        let reactions = handle_frame(&mut conn, &waits, control(FrameType::Disc, 7));

        assert_eq!(sent(&reactions)[0].frame_type, FrameType::Ua);
        assert_eq!(conn.state(7), DlciState::Disconnected);
    }
}
