use super::{Reaction, Waits, dm};
use crate::{
    dlci::{Connection, DlciState},
    parser::{
        frame::Frame,
        mcc::{MccMessage, MccPacket, PnParams},
    },
    types::CommandResponse,
};

const TARGET: &str = "ts0710mux::handler::mcc";

fn reply(conn: &Connection, message: MccMessage) -> Reaction {
    let packet = MccPacket::new(CommandResponse::Response, message);
    Reaction::Send(Frame::mcc(&packet, conn.initiator))
}

/// reacts to a control message that arrived on DLCI 0
pub fn process_mcc(conn: &mut Connection, waits: &Waits, payload: &[u8]) -> Vec<Reaction> {
    let packet = match MccPacket::decode(payload) {
        Ok(p) => p,
        Err(e) => {
            log::warn!(target: TARGET, "malformed control message: {e}");
            return vec![];
        }
    };

    let is_command = packet.cr.is_command();

    match packet.message {
        MccMessage::Test(echo) if is_command => {
            log::debug!(target: TARGET, "test command, echoing {} bytes", echo.len());
            vec![reply(conn, MccMessage::Test(echo))]
        }
        MccMessage::Test(echo) => {
            if conn.be_testing {
                let errs = conn.check_test_echo(&echo);
                log::debug!(target: TARGET, "test response with {errs} mismatches");

                conn.be_testing = false;
                waits.test.wake_all();
            } else {
                log::debug!(target: TARGET, "test response nobody is waiting for");
            }
            vec![]
        }

        MccMessage::Fcon if is_command => {
            log::info!(target: TARGET, "peer resumed flow on all channels");

            for d in &mut conn.dlci {
                if d.state == DlciState::FlowStopped {
                    d.state = DlciState::Connected;
                }
            }

            vec![reply(conn, MccMessage::Fcon), Reaction::ScheduleSend]
        }
        MccMessage::Fcoff if is_command => {
            log::info!(target: TARGET, "peer stopped flow on all channels");

            for d in &mut conn.dlci {
                if d.state == DlciState::Connected {
                    d.state = DlciState::FlowStopped;
                }
            }

            vec![reply(conn, MccMessage::Fcoff)]
        }
        MccMessage::Fcon | MccMessage::Fcoff => vec![],

        MccMessage::Msc { dlci, signals } => {
            let state = conn.state(dlci);

            if !state.is_up() {
                log::debug!(target: TARGET, "modem status for dlci {dlci} in state {state:?}");
                return vec![Reaction::Send(dm(conn, dlci))];
            }

            if !is_command {
                if signals.flow_stopped() {
                    log::debug!(target: TARGET, "flow stop on dlci {dlci} accepted");
                }
                return vec![];
            }

            let mut reactions = vec![];

            if signals.flow_stopped() {
                if state == DlciState::Connected {
                    log::debug!(target: TARGET, "flow off on dlci {dlci}");
                    conn.set_state(dlci, DlciState::FlowStopped);
                }
            } else if state == DlciState::FlowStopped {
                log::debug!(target: TARGET, "flow on on dlci {dlci}");
                conn.set_state(dlci, DlciState::Connected);
                reactions.push(Reaction::ScheduleSend);
            }

            reactions.insert(0, reply(conn, MccMessage::Msc { dlci, signals }));
            reactions
        }

        MccMessage::Pn(pn) => {
            let dlci = pn.dlci();
            let Some(d) = conn.get_mut(dlci) else {
                log::warn!(target: TARGET, "parameter negotiation for dlci {dlci} out of range");
                return vec![];
            };

            let frame_size = (pn.frame_size() as usize).min(d.mtu);
            d.mtu = frame_size;
            log::debug!(target: TARGET, "dlci {dlci} mtu set to {frame_size}");

            if is_command {
                let params = PnParams::new(dlci, pn.prior(), frame_size as u16, 0, 0);
                vec![reply(conn, MccMessage::Pn(params))]
            } else {
                if d.state == DlciState::Negotiating {
                    d.state = DlciState::Connecting;
                    waits.wake_open(dlci);
                }
                vec![]
            }
        }

        MccMessage::Nsc(field) => {
            log::debug!(
                target: TARGET,
                "peer doesn't support control message type {:#04x}",
                field.raw_type()
            );
            vec![]
        }

        MccMessage::Unsupported(field) => {
            log::debug!(target: TARGET, "unsupported control message type {:#04x}", field.raw_type());
            vec![reply(conn, MccMessage::Nsc(field))]
        }
    }
}
