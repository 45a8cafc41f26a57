use std::sync::{Arc, atomic::Ordering};

use bytes::Bytes;
use tokio::io::AsyncReadExt;

use super::MuxInner;
use crate::{
    handler::{Reaction, handle_frame, upon_disconnect},
    parser::{deframer::Deframer, frame::Frame},
    sync::wait_until,
    types::MAX_TOTAL_SIZE,
    utils::{dlci2line, line2dlci, lock},
};

const TARGET: &str = "ts0710mux::recv";

/// what a post receive pass wants done about a port's flow once its locks are gone
enum FlowAction {
    On,
    Off,
}

impl MuxInner {
    /// feeds the transport through the deframer while the link is in cmux mode
    pub(crate) async fn receive_task(self: Arc<Self>) {
        let mut stop = self.shutdown.subscribe();
        let mut cmux = self.cmux_mode.subscribe();
        let mut deframer = Deframer::new();

        loop {
            tokio::select! {
                up = wait_until(&mut cmux, true) => {
                    if !up {
                        return;
                    }
                }
                _ = wait_until(&mut stop, true) => return,
            }

            log::debug!(target: TARGET, "mux {}: receiving frames", self.id);
            deframer.reset();

            let mut reader = self.reader.lock().await;

            loop {
                if deframer.spare().is_empty() {
                    log::warn!(target: TARGET, "mux {}: receive buffer full of junk, dropping it", self.id);
                    deframer.reset();
                }

                let read = tokio::select! {
                    read = reader.read(deframer.spare()) => read,
                    _ = wait_until(&mut cmux, false) => break,
                    _ = wait_until(&mut stop, true) => return,
                };

                match read {
                    Ok(0) => {
                        log::warn!(target: TARGET, "mux {}: transport closed", self.id);
                        self.link_lost();
                        break;
                    }
                    Ok(n) => {
                        deframer.advance(n);

                        let mut frames = vec![];
                        deframer.process(|frame| frames.push(frame));

                        for frame in frames {
                            self.recv_frame(frame).await;
                        }
                    }
                    Err(e) => {
                        log::warn!(target: TARGET, "mux {}: transport read failed: {e}", self.id);
                        self.link_lost();
                        break;
                    }
                }
            }
        }
    }

    /// the transport is gone, nothing on it is connected anymore
    fn link_lost(&self) {
        upon_disconnect(&mut lock(&self.conn), &self.waits);
        self.cmux_mode.send_replace(false);
    }

    pub(crate) async fn recv_frame(&self, frame: Frame) {
        log::debug!(
            target: TARGET,
            "mux {}: got {:?} on dlci {}, {} bytes",
            self.id,
            frame.frame_type,
            frame.dlci(),
            frame.payload.len()
        );

        let reactions = handle_frame(&mut lock(&self.conn), &self.waits, frame);
        self.react(reactions).await;
    }

    async fn react(&self, reactions: Vec<Reaction>) {
        for reaction in reactions {
            match reaction {
                Reaction::Send(frame) => {
                    if let Err(e) = self.send_frame(&frame).await {
                        log::warn!(target: TARGET, "mux {}: can't answer the peer: {e}", self.id);
                    }
                }
                Reaction::Deliver { dlci, payload } => self.queue_recv(dlci, payload).await,
                Reaction::ScheduleSend => self.send_completion.notify_one(),
            }
        }
    }

    /// hands `payload` straight to the port's consumer, or queues it when that can't take it
    async fn queue_recv(&self, dlci: u8, payload: Bytes) {
        let Some(line) = dlci2line(dlci).and_then(|l| self.lines.get(l)) else {
            log::debug!(target: TARGET, "mux {}: no port for dlci {dlci}", self.id);
            return;
        };

        let consumer = match line.consumer() {
            Some(c) if line.open_count.load(Ordering::SeqCst) > 0 => c,
            _ => {
                log::debug!(target: TARGET, "mux {}: nobody listens on dlci {dlci}, dropped", self.id);
                return;
            }
        };

        let (flow_off, post_recv) = {
            let mut recv = lock(&line.recv);
            let Some(queue) = recv.as_mut() else {
                log::debug!(target: TARGET, "mux {}: dlci {dlci} has no receive queue, dropped", self.id);
                return;
            };

            if queue.total() > MAX_TOTAL_SIZE {
                log::info!(
                    target: TARGET,
                    "mux {}: dlci {dlci} has {} bytes queued, discarding",
                    self.id,
                    queue.total()
                );
                return;
            }

            let flow_off = queue.total() > MAX_TOTAL_SIZE / 2;
            let throttled = line.throttled.load(Ordering::SeqCst);

            if !throttled && queue.total() == 0 && consumer.receive_room() >= payload.len() {
                consumer.receive_buf(&payload);
                (flow_off, false)
            } else {
                queue.push(payload);
                line.note_backlog(Some(&*queue));
                (flow_off, !throttled)
            }
        };

        if flow_off {
            self.flow_off(dlci).await;
        }
        if post_recv {
            self.recv_completion.notify_one();
        }
    }

    /// drains receive queues into consumers whenever something was queued or a port unthrottled
    pub(crate) async fn post_recv_task(self: Arc<Self>) {
        let mut stop = self.shutdown.subscribe();

        log::debug!(target: TARGET, "mux {}: post receive task running", self.id);

        loop {
            tokio::select! {
                () = self.recv_completion.notified() => {}
                _ = wait_until(&mut stop, true) => break,
            }

            // an overlapping wake is folded into the pass already running
            if self.recv_running.swap(true, Ordering::SeqCst) {
                continue;
            }

            for j in 0..self.lines.len() {
                if let Some(action) = self.drain_line(j) {
                    let dlci = line2dlci(j);
                    match action {
                        FlowAction::On => self.flow_on(dlci).await,
                        FlowAction::Off => self.flow_off(dlci).await,
                    }
                }
            }

            self.recv_running.store(false, Ordering::SeqCst);
        }

        log::debug!(target: TARGET, "mux {}: post receive task stopped", self.id);
    }

    fn drain_line(&self, j: usize) -> Option<FlowAction> {
        let line = &self.lines[j];
        let mut recv = lock(&line.recv);
        let queue = recv.as_mut()?;

        if queue.total() == 0 {
            return None;
        }

        let consumer = match line.consumer() {
            Some(c) if line.open_count.load(Ordering::SeqCst) > 0 => c,
            _ => {
                log::info!(target: TARGET, "mux {}: line {j} was closed, dropping its backlog", self.id);
                recv.take();
                line.note_backlog(None);
                return Some(FlowAction::On);
            }
        };

        if line.throttled.load(Ordering::SeqCst) {
            log::debug!(target: TARGET, "mux {}: line {j} is throttled", self.id);
            return None;
        }

        let delivered = queue.drain_into(consumer.as_ref());
        line.note_backlog(Some(&*queue));
        log::debug!(target: TARGET, "mux {}: line {j} took {delivered} queued bytes", self.id);

        if queue.total() == 0 {
            line.post_unthrottle
                .swap(false, Ordering::SeqCst)
                .then_some(FlowAction::On)
        } else if queue.total() >= MAX_TOTAL_SIZE / 2 {
            Some(FlowAction::Off)
        } else {
            // the consumer unthrottles once it has room again
            line.throttled.store(true, Ordering::SeqCst);
            None
        }
    }
}
