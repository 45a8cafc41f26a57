use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, TryLockError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use bytes::Bytes;

use crate::{types::RECV_BUF_SIZE, utils::lock};

/// whatever sits on top of a virtual port
///
/// every method is called from the mux tasks and must not block. the callbacks may
/// write, throttle or unthrottle the port, but must not open or close one
pub trait PortConsumer: Send + Sync {
    /// how many bytes `receive_buf` can take right now
    fn receive_room(&self) -> usize;

    fn receive_buf(&self, data: &[u8]);

    /// the port can take another write
    fn write_wakeup(&self);

    /// a queued write of `len` payload bytes went out on the transport
    fn write_complete(&self, _len: usize) {}
}

/// the single outbound frame a port may have in flight
#[derive(Debug, Default)]
pub struct SendBuffer {
    frame: Mutex<Option<SendFrame>>,
}

#[derive(Debug, Clone)]
pub struct SendFrame {
    pub encoded: Bytes,
    /// payload bytes inside `encoded`
    pub len: usize,
}

impl SendBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// queues `frame` unless one is already waiting or another writer holds the buffer
    pub fn queue(&self, frame: SendFrame) -> bool {
        let mut slot = match self.frame.try_lock() {
            Ok(slot) => slot,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };

        if slot.is_some() {
            return false;
        }

        *slot = Some(frame);
        true
    }

    #[must_use]
    pub fn is_filled(&self) -> bool {
        lock(&self.frame).is_some()
    }

    #[must_use]
    pub fn peek(&self) -> Option<SendFrame> {
        lock(&self.frame).clone()
    }

    pub fn clear(&self) {
        lock(&self.frame).take();
    }

    /// empties the slot and hands back what it held
    pub fn take(&self) -> Option<SendFrame> {
        lock(&self.frame).take()
    }
}

/// payloads that arrived while the consumer couldn't take them
///
/// the first one sits inline, the rest queue behind it in arrival order
#[derive(Debug, Default)]
pub struct RecvQueue {
    inline: Option<Bytes>,
    packets: VecDeque<Bytes>,
    total: usize,
}

impl RecvQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// bytes queued, inline and overflow together
    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }

    pub fn push(&mut self, mut payload: Bytes) {
        if self.total == 0 {
            if payload.len() > RECV_BUF_SIZE {
                log::warn!(
                    target: "ts0710mux::port",
                    "{} bytes don't fit the receive buffer, keeping {RECV_BUF_SIZE}",
                    payload.len()
                );
                payload.truncate(RECV_BUF_SIZE);
            }

            self.total = payload.len();
            self.inline = Some(payload);
        } else {
            self.total += payload.len();
            self.packets.push_back(payload);
        }
    }

    /// hands queued payloads to `consumer` in order, as long as each one fits its room
    ///
    /// returns the number of bytes delivered
    pub fn drain_into(&mut self, consumer: &dyn PortConsumer) -> usize {
        let mut delivered = 0;

        while self.total > 0 {
            let next = match self.inline.as_ref() {
                Some(inline) => inline,
                None => match self.packets.front() {
                    Some(packet) => packet,
                    None => {
                        log::error!(
                            target: "ts0710mux::port",
                            "receive queue claims {} bytes but holds none",
                            self.total
                        );
                        self.total = 0;
                        break;
                    }
                },
            };

            if consumer.receive_room() < next.len() {
                break;
            }

            consumer.receive_buf(next);

            let len = next.len();
            self.total -= len;
            delivered += len;

            if self.inline.take().is_none() {
                self.packets.pop_front();
            }
        }

        delivered
    }
}

/// one virtual port of a mux
#[derive(Default)]
pub struct Line {
    pub open_count: AtomicUsize,
    /// the consumer asked for a break, or the mux gave it one
    pub throttled: AtomicBool,
    /// flow goes back on once the backlog is gone
    pub post_unthrottle: AtomicBool,
    /// what `recv` holds, readable without its lock from inside consumer callbacks
    backlog: AtomicUsize,
    pub consumer: Mutex<Option<Arc<dyn PortConsumer>>>,
    pub send: Mutex<Option<Arc<SendBuffer>>>,
    pub recv: Mutex<Option<RecvQueue>>,
    /// serializes open and close of this port
    pub open_lock: tokio::sync::Mutex<()>,
}

impl Line {
    #[must_use]
    pub fn consumer(&self) -> Option<Arc<dyn PortConsumer>> {
        lock(&self.consumer).clone()
    }

    #[must_use]
    pub fn send_buffer(&self) -> Option<Arc<SendBuffer>> {
        lock(&self.send).clone()
    }

    /// drops one open reference and returns how many are left, a shutdown may have
    /// cleared them already
    pub fn release(&self) -> usize {
        match self
            .open_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(n) => n - 1,
            Err(_) => 0,
        }
    }

    /// bytes waiting in the receive queue, zero when there is none
    #[must_use]
    pub fn queued(&self) -> usize {
        self.backlog.load(Ordering::SeqCst)
    }

    /// records the size of `recv`, called with the queue still locked after every change
    pub fn note_backlog(&self, recv: Option<&RecvQueue>) {
        self.backlog
            .store(recv.map_or(0, RecvQueue::total), Ordering::SeqCst);
    }

    /// frees the receive queue along with whatever it still holds
    pub fn drop_backlog(&self) {
        let mut recv = lock(&self.recv);
        recv.take();
        self.note_backlog(None);
    }
}
