#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex},
    sync::Notify,
};
use ts0710mux::{
    Mux, MuxConfig, PortConsumer,
    parser::{
        deframer::Deframer,
        frame::Frame,
        mcc::{MccMessage, MccPacket},
    },
    types::{CommandResponse, FrameType},
};

pub fn config() -> MuxConfig {
    MuxConfig::without_handshake().with_timeout(Duration::from_millis(200))
}

pub fn start(config: MuxConfig) -> (Mux, Peer) {
    start_with_capacity(config, 64 * 1024)
}

/// like `start`, with at most `capacity` bytes in flight each way
pub fn start_with_capacity(config: MuxConfig, capacity: usize) -> (Mux, Peer) {
    let (local, remote) = duplex(capacity);
    (Mux::from_stream(0, local, config), Peer::new(remote))
}

/// the far end of the link, speaking frames by hand
pub struct Peer {
    pub stream: DuplexStream,
    deframer: Deframer,
    pending: VecDeque<Frame>,
}

impl Peer {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            deframer: Deframer::with_max_frame_len(8 * 1024),
            pending: VecDeque::new(),
        }
    }

    pub async fn next_frame(&mut self, within: Duration) -> Option<Frame> {
        tokio::time::timeout(within, async {
            loop {
                if let Some(frame) = self.pending.pop_front() {
                    return frame;
                }

                let n = self.stream.read(self.deframer.spare()).await.unwrap();
                assert!(n > 0, "mux closed the transport");
                self.deframer.advance(n);

                let pending = &mut self.pending;
                self.deframer.process(|f| pending.push_back(f));
            }
        })
        .await
        .ok()
    }

    pub async fn recv(&mut self) -> Frame {
        self.next_frame(Duration::from_secs(5))
            .await
            .expect("mux sent nothing")
    }

    pub async fn expect(&mut self, frame_type: FrameType, dlci: u8) -> Frame {
        let frame = self.recv().await;
        assert_eq!((frame.frame_type, frame.dlci()), (frame_type, dlci), "{frame:?}");
        frame
    }

    pub async fn expect_mcc(&mut self) -> MccPacket {
        let frame = self.expect(FrameType::Uih, 0).await;
        MccPacket::decode(&frame.payload).unwrap()
    }

    pub async fn send(&mut self, frame: Frame) {
        self.stream.write_all(&frame.encode()).await.unwrap();
    }

    pub async fn send_mcc(&mut self, cr: CommandResponse, message: MccMessage) {
        self.send(Frame::mcc(&MccPacket::new(cr, message), false)).await;
    }

    pub async fn ua(&mut self, dlci: u8) {
        self.send(Frame::builder().address(dlci, false).ua().build())
            .await;
    }

    /// answers the SABM for `dlci` with a UA
    pub async fn accept(&mut self, dlci: u8) {
        self.expect(FrameType::Sabm, dlci).await;
        self.ua(dlci).await;
    }

    pub async fn uih(&mut self, dlci: u8, payload: &'static [u8]) {
        self.send(
            Frame::builder()
                .address(dlci, false)
                .uih(Bytes::from_static(payload))
                .build(),
        )
        .await;
    }

    /// `count` UIH frames of `len` bytes each on `dlci`, in one write
    pub async fn flood(&mut self, dlci: u8, count: usize, len: usize) {
        let frame = Frame::builder()
            .address(dlci, false)
            .uih(Bytes::from(vec![0x5A; len]))
            .build()
            .encode();

        let mut all = BytesMut::with_capacity(frame.len() * count);
        for _ in 0..count {
            all.extend_from_slice(&frame);
        }

        self.stream.write_all(&all).await.unwrap();
    }
}

/// a consumer that keeps everything it is handed
pub struct Collector {
    pub data: Mutex<Vec<u8>>,
    pub got: Notify,
    pub wakeups: Notify,
    pub room: AtomicUsize,
}

impl PortConsumer for Collector {
    fn receive_room(&self) -> usize {
        self.room.load(Ordering::SeqCst)
    }

    fn receive_buf(&self, data: &[u8]) {
        self.data.lock().unwrap().extend_from_slice(data);
        self.got.notify_one();
    }

    fn write_wakeup(&self) {
        self.wakeups.notify_one();
    }
}

impl Collector {
    pub fn new() -> Arc<Self> {
        Self::with_room(usize::MAX)
    }

    /// a consumer that reports `room` free bytes until told otherwise
    pub fn with_room(room: usize) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::default(),
            got: Notify::new(),
            wakeups: Notify::new(),
            room: AtomicUsize::new(room),
        })
    }

    pub fn set_room(&self, room: usize) {
        self.room.store(room, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    /// waits until `len` bytes arrived and returns them
    pub async fn wait_for(&self, len: usize) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let data = self.data.lock().unwrap();
                    if data.len() >= len {
                        return data.clone();
                    }
                }
                self.got.notified().await;
            }
        })
        .await
        .expect("consumer never got the data")
    }
}

/// opens `line` with the peer accepting the control channel and the line's DLCI
pub async fn open_line(
    mux: &Mux,
    peer: &mut Peer,
    line: usize,
    consumer: Arc<dyn PortConsumer>,
) {
    let dlci = (line + 1) as u8;
    let control_up = mux.dlci_state(0).is_up();

    let (opened, ()) = tokio::join!(mux.open(line, consumer), async {
        if !control_up {
            peer.accept(0).await;
        }
        peer.accept(dlci).await;
    });

    opened.unwrap();
}
