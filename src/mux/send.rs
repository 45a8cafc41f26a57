use std::sync::Arc;

use super::MuxInner;
use crate::{
    dlci::DlciState,
    sync::wait_until,
    transport::basic_write,
    types::{NR_MUXS, SERIAL_BUF_SIZE},
    utils::{line2dlci, lock},
};

const TARGET: &str = "ts0710mux::send";

impl MuxInner {
    /// writes queued UIH frames out and asks idle ports for more
    pub(crate) async fn send_task(self: Arc<Self>) {
        let mut stop = self.shutdown.subscribe();
        // a frame too big to share a pass with others goes first on the next one
        let mut stalled = 0;

        log::debug!(target: TARGET, "mux {}: send task running", self.id);

        loop {
            tokio::select! {
                () = self.send_completion.notified() => {}
                _ = wait_until(&mut stop, true) => break,
            }

            stalled = self.drain_send_buffers(stalled).await;
            self.refill_send_buffers(&mut stalled);
        }

        log::debug!(target: TARGET, "mux {}: send task stopped", self.id);
    }

    /// pass one, returns where the next pass starts
    async fn drain_send_buffers(&self, start: usize) -> usize {
        let mut written = 0;

        for j in (start..NR_MUXS).chain(0..start) {
            let Some(send) = self.lines[j].send_buffer() else {
                continue;
            };
            let Some(pending) = send.peek() else {
                continue;
            };

            let dlci = line2dlci(j);
            match lock(&self.conn).state(dlci) {
                DlciState::FlowStopped => {
                    log::debug!(target: TARGET, "mux {}: flow stopped on dlci {dlci}", self.id);
                    continue;
                }
                DlciState::Connected => {}
                state => {
                    log::debug!(target: TARGET, "mux {}: dlci {dlci} is {state:?}, dropping its frame", self.id);
                    send.clear();
                    continue;
                }
            }

            if pending.encoded.len() > SERIAL_BUF_SIZE && written > 0 {
                log::debug!(
                    target: TARGET,
                    "mux {}: {} byte frame on line {j} waits for the next pass",
                    self.id,
                    pending.encoded.len()
                );
                self.send_completion.notify_one();
                return j;
            }

            let frame = {
                let mut writer = self.writer.lock().await;

                // flow may have stopped while waiting for the transport
                if lock(&self.conn).state(dlci) != DlciState::Connected {
                    continue;
                }

                // out of the slot before the write, a flush may refill it meanwhile
                let Some(frame) = send.take() else {
                    continue;
                };

                if let Err(e) = basic_write(&mut **writer, &frame.encoded).await {
                    log::warn!(target: TARGET, "mux {}: writing line {j} failed: {e}", self.id);
                }

                frame
            };

            if let Some(consumer) = self.lines[j].consumer() {
                consumer.write_complete(frame.len);
            }

            written += 1;
        }

        0
    }

    /// pass two, tells every connected port with an empty buffer that it may write
    fn refill_send_buffers(&self, stalled: &mut usize) {
        for (j, line) in self.lines.iter().enumerate() {
            let Some(send) = line.send_buffer() else {
                continue;
            };
            if send.is_filled() {
                continue;
            }
            let Some(consumer) = line.consumer() else {
                continue;
            };

            if lock(&self.conn).state(line2dlci(j)) != DlciState::Connected {
                continue;
            }

            consumer.write_wakeup();

            if send.is_filled() && j < *stalled {
                *stalled = j;
            }
        }
    }
}
