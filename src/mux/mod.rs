use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use bytes::Bytes;
use tokio::{
    io::AsyncWriteExt,
    sync::{Notify, watch},
    task::JoinHandle,
};

use crate::{
    AsyncReading, AsyncWriting, ReadWrite,
    config::MuxConfig,
    dlci::{Connection, DlciState},
    error::{MuxError, Result},
    handler::Waits,
    parser::{
        frame::Frame,
        mcc::{MccMessage, MccPacket},
    },
    registry::MuxId,
    types::{
        CommandResponse, IO_DLCI_FC_OFF, IO_DLCI_FC_ON, IO_FC_OFF, IO_FC_ON, IO_MSC_HANGUP,
        IO_TEST_CMD, MAX_CHARS_IN_BUF, MAX_TOTAL_SIZE, NR_MUXS, V24Signals,
    },
    utils::{line2dlci, lock},
};

mod channel;
pub mod port;
mod recv;
mod send;

pub use port::{Line, PortConsumer, RecvQueue, SendBuffer, SendFrame};

/// a running multiplexer on top of one transport
///
/// the receive, post receive and send tasks are spawned on construction, so it has to be
/// created inside a tokio runtime
pub struct Mux {
    inner: Arc<MuxInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

pub(crate) struct MuxInner {
    pub id: MuxId,
    pub config: MuxConfig,

    pub conn: Mutex<Connection>,
    pub waits: Waits,

    pub reader: tokio::sync::Mutex<Box<dyn AsyncReading>>,
    pub writer: tokio::sync::Mutex<Box<dyn AsyncWriting>>,

    pub lines: Vec<Line>,

    pub send_completion: Notify,
    pub recv_completion: Notify,
    /// a post receive pass is in progress
    pub recv_running: AtomicBool,

    /// the transport carries frames rather than AT commands
    pub cmux_mode: watch::Sender<bool>,
    pub handshake_lock: tokio::sync::Mutex<()>,
    pub shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for Mux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mux")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .field("cmux_mode", &*self.inner.cmux_mode.borrow())
            .field("transport", &"...")
            .finish()
    }
}

impl Mux {
    pub fn new(
        id: MuxId,
        reader: impl AsyncReading + 'static,
        writer: impl AsyncWriting + 'static,
        config: MuxConfig,
    ) -> Self {
        // without a handshake the peer is taken to be in cmux mode already
        let cmux_mode = !config.handshake;

        let inner = Arc::new(MuxInner {
            id,
            conn: Mutex::new(Connection::new(config.mtu)),
            config,
            waits: Waits::new(),
            reader: tokio::sync::Mutex::new(Box::new(reader)),
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            lines: (0..NR_MUXS).map(|_| Line::default()).collect(),
            send_completion: Notify::new(),
            recv_completion: Notify::new(),
            recv_running: AtomicBool::new(false),
            cmux_mode: watch::channel(cmux_mode).0,
            handshake_lock: tokio::sync::Mutex::new(()),
            shutdown: watch::channel(false).0,
        });

        let tasks = vec![
            tokio::spawn(inner.clone().receive_task()),
            tokio::spawn(inner.clone().post_recv_task()),
            tokio::spawn(inner.clone().send_task()),
        ];

        log::info!(target: "ts0710mux::mux", "mux {id} started");

        Self {
            inner,
            tasks: Mutex::new(tasks),
        }
    }

    /// splits a bidirectional stream into the two transport halves
    pub fn from_stream(id: MuxId, stream: impl ReadWrite + 'static, config: MuxConfig) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(id, reader, writer, config)
    }

    #[must_use]
    pub fn id(&self) -> MuxId {
        self.inner.id
    }

    fn line(&self, line: usize) -> Result<&Line> {
        self.inner.lines.get(line).ok_or(MuxError::InvalidLine(line))
    }

    /// opens virtual port `line` and attaches `consumer` to it
    ///
    /// the first open switches the modem to cmux mode and brings up the control channel
    pub async fn open(&self, line: usize, consumer: Arc<dyn PortConsumer>) -> Result<()> {
        let port = self.line(line)?;
        let _guard = port.open_lock.lock().await;

        port.open_count.fetch_add(1, Ordering::SeqCst);
        let dlci = line2dlci(line);

        log::info!(target: "ts0710mux::mux", "mux {}: opening line {line} on dlci {dlci}", self.inner.id);

        if let Err(e) = self.inner.bring_up().await {
            port.release();
            return Err(e);
        }

        // the peer may start sending as soon as the channel is up
        lock(&port.send).get_or_insert_with(|| Arc::new(SendBuffer::new()));
        lock(&port.recv).get_or_insert_with(RecvQueue::new);
        *lock(&port.consumer) = Some(consumer);
        port.throttled.store(false, Ordering::SeqCst);

        if let Err(e) = self.inner.open_channel(dlci).await {
            log::warn!(target: "ts0710mux::mux", "mux {}: can't open dlci {dlci}: {e}", self.inner.id);

            lock(&self.inner.conn).reset_dlci(dlci);

            if port.release() == 0 {
                lock(&port.send).take();
                port.drop_backlog();
                lock(&port.consumer).take();
            }
            return Err(e);
        }

        Ok(())
    }

    /// drops one reference to `line`, the last one closes its DLCI
    ///
    /// once no port is open anymore the control channel goes down and the modem leaves
    /// cmux mode
    pub async fn close(&self, line: usize) -> Result<()> {
        let port = self.line(line)?;
        let _guard = port.open_lock.lock().await;

        if port.release() > 0 {
            return Ok(());
        }

        let dlci = line2dlci(line);
        log::info!(target: "ts0710mux::mux", "mux {}: closing line {line}", self.inner.id);

        self.inner.close_channel(dlci).await;
        self.inner.bring_down().await;

        lock(&port.send).take();
        {
            let mut recv = lock(&port.recv);
            if recv.as_ref().is_some_and(|q| q.total() == 0) {
                recv.take();
            }
        }
        lock(&port.consumer).take();

        self.inner.flow_on(dlci).await;
        self.inner.recv_completion.notify_one();

        Ok(())
    }

    /// queues `buf` as one UIH frame, returns how much of it was taken
    ///
    /// `Ok(0)` means the link is flow stopped or the previous write is still pending
    pub fn write(&self, line: usize, buf: &[u8]) -> Result<usize> {
        let port = self.line(line)?;
        let dlci = line2dlci(line);

        if buf.is_empty() {
            return Ok(0);
        }

        let frame = {
            let conn = lock(&self.inner.conn);

            match (conn.state(0), conn.state(dlci)) {
                (DlciState::FlowStopped, _) | (_, DlciState::FlowStopped) => return Ok(0),
                (_, DlciState::Connected) => {}
                (_, state) => {
                    log::debug!(target: "ts0710mux::mux", "write on dlci {dlci} in state {state:?}");
                    return Err(MuxError::NotConnected(line));
                }
            }

            let mtu = conn.get(dlci).map_or(0, |d| d.mtu);
            let len = buf.len().min(mtu.saturating_sub(1));
            if len == 0 {
                return Ok(0);
            }

            let frame = Frame::builder()
                .address(dlci, conn.initiator)
                .uih(Bytes::copy_from_slice(&buf[..len]))
                .build();

            SendFrame {
                encoded: frame.encode(),
                len,
            }
        };

        let Some(send) = port.send_buffer() else {
            log::warn!(target: "ts0710mux::mux", "write on line {line} that has no send buffer");
            return Err(MuxError::NotConnected(line));
        };

        let len = frame.len;
        if !send.queue(frame) {
            return Ok(0);
        }

        self.inner.send_completion.notify_one();

        Ok(len)
    }

    /// whether `line` can queue a write right now
    fn writable(&self, line: usize) -> Option<usize> {
        let port = self.inner.lines.get(line)?;
        let dlci = line2dlci(line);

        let mtu = {
            let conn = lock(&self.inner.conn);
            if conn.state(0) == DlciState::FlowStopped || conn.state(dlci) != DlciState::Connected {
                return None;
            }
            conn.get(dlci)?.mtu
        };

        let send = port.send_buffer()?;
        (!send.is_filled()).then_some(mtu.saturating_sub(1))
    }

    /// the largest write `line` takes right now
    #[must_use]
    pub fn write_room(&self, line: usize) -> usize {
        self.writable(line).unwrap_or(0)
    }

    #[must_use]
    pub fn chars_in_buffer(&self, line: usize) -> usize {
        if self.writable(line).is_some() {
            0
        } else {
            MAX_CHARS_IN_BUF
        }
    }

    pub async fn ioctl(&self, line: usize, cmd: u32) -> Result<()> {
        self.line(line)?;
        let dlci = line2dlci(line);

        match cmd {
            IO_MSC_HANGUP => {
                let frame = self.inner.mcc_command(MccMessage::Msc {
                    dlci,
                    signals: V24Signals::HANGUP,
                });
                self.inner.send_frame(&frame).await.map(drop)
            }
            IO_TEST_CMD => self.inner.exec_test_cmd().await,
            // the peer's flow only, the port keeps delivering what already arrived
            IO_DLCI_FC_ON => {
                self.inner.send_flow(dlci, true).await;
                Ok(())
            }
            IO_DLCI_FC_OFF => {
                self.inner.send_flow(dlci, false).await;
                Ok(())
            }
            IO_FC_ON => {
                let frame = self.inner.mcc_command(MccMessage::Fcon);
                self.inner.send_frame(&frame).await.map(drop)
            }
            IO_FC_OFF => {
                let frame = self.inner.mcc_command(MccMessage::Fcoff);
                self.inner.send_frame(&frame).await.map(drop)
            }
            _ => Err(MuxError::UnsupportedIoctl(cmd)),
        }
    }

    /// the consumer of `line` is full, asks the peer to stop once enough is queued
    pub async fn throttle(&self, line: usize) -> Result<()> {
        let port = self.line(line)?;
        port.throttled.store(true, Ordering::SeqCst);

        if port.queued() >= MAX_TOTAL_SIZE / 2 {
            self.inner.send_flow(line2dlci(line), false).await;
        }

        Ok(())
    }

    pub async fn unthrottle(&self, line: usize) -> Result<()> {
        let port = self.line(line)?;
        port.throttled.store(false, Ordering::SeqCst);

        if port.queued() > 0 {
            port.post_unthrottle.store(true, Ordering::SeqCst);
            self.inner.recv_completion.notify_one();
        } else {
            self.inner.flow_on(line2dlci(line)).await;
        }

        Ok(())
    }

    /// drops the pending write of `line`
    pub fn flush_buffer(&self, line: usize) -> Result<()> {
        let port = self.line(line)?;

        if let Some(send) = port.send_buffer() {
            send.clear();
        }
        if let Some(consumer) = port.consumer() {
            consumer.write_wakeup();
        }

        Ok(())
    }

    #[must_use]
    pub fn dlci_state(&self, dlci: u8) -> DlciState {
        lock(&self.inner.conn).state(dlci)
    }

    #[must_use]
    pub fn dlci_mtu(&self, dlci: u8) -> Option<usize> {
        lock(&self.inner.conn).get(dlci).map(|d| d.mtu)
    }

    /// mismatches of the last loopback test
    #[must_use]
    pub fn test_errs(&self) -> usize {
        lock(&self.inner.conn).test_errs
    }

    /// takes every port down, leaves cmux mode and stops the tasks
    pub async fn shutdown(&self) {
        log::info!(target: "ts0710mux::mux", "mux {} shutting down", self.inner.id);

        for port in &self.inner.lines {
            port.open_count.store(0, Ordering::SeqCst);
            lock(&port.send).take();
            port.drop_backlog();
            lock(&port.consumer).take();
        }

        // an open or close in flight holds the handshake lock until it is interrupted
        if self.inner.handshake_lock.try_lock().is_err() {
            self.inner.shutdown.send_replace(true);
        }

        self.inner.bring_down().await;
        self.inner.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            if let Err(e) = task.await {
                log::warn!(target: "ts0710mux::mux", "mux {} task ended badly: {e}", self.inner.id);
            }
        }

        if let Err(e) = self.inner.writer.lock().await.shutdown().await {
            log::warn!(target: "ts0710mux::mux", "mux {}: can't stop the transport: {e}", self.inner.id);
        }
    }
}

impl Drop for Mux {
    fn drop(&mut self) {
        self.inner.shutdown.send_replace(true);
    }
}

impl MuxInner {
    /// a control channel command, addressed the way this side talks on DLCI 0
    pub fn mcc_command(&self, message: MccMessage) -> Frame {
        let packet = MccPacket::new(CommandResponse::Command, message);
        Frame::mcc(&packet, lock(&self.conn).initiator)
    }

    /// switches to cmux mode if needed and opens the control channel
    async fn bring_up(&self) -> Result<()> {
        let _guard = self.handshake_lock.lock().await;

        if !*self.cmux_mode.borrow() {
            if self.config.handshake {
                let mut reader = self.reader.lock().await;
                let mut writer = self.writer.lock().await;
                crate::transport::handshake(&mut **reader, &mut **writer, &self.config).await?;
            }

            self.cmux_mode.send_replace(true);
        }

        if let Err(e) = self.open_channel(0).await {
            log::warn!(target: "ts0710mux::mux", "mux {}: control channel didn't come up: {e}", self.id);
            lock(&self.conn).reset();
            return Err(e);
        }

        Ok(())
    }

    /// closes the control channel once no port is open, and leaves cmux mode if a
    /// handshake entered it
    async fn bring_down(&self) {
        let _guard = self.handshake_lock.lock().await;

        if self
            .lines
            .iter()
            .any(|l| l.open_count.load(Ordering::SeqCst) > 0)
        {
            return;
        }

        self.close_channel(0).await;

        if self.config.handshake && *self.cmux_mode.borrow() {
            self.cmux_mode.send_replace(false);
            log::info!(target: "ts0710mux::mux", "mux {} left cmux mode", self.id);
        }
    }
}
