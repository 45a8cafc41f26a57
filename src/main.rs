use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use nix::sys::socket::{setsockopt, sockopt};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    sync::{Notify, mpsc},
};
use ts0710mux::{
    Mux, MuxConfig, MuxError, MuxRegistry, PortConsumer,
    types::{DEF_MTU, NR_MUXS},
};

const DEFAULT_DEVICE: &str = "/dev/ttyS1";
const DEFAULT_SOCKET_DIR: &str = "/var/run/ts0710mux";

/// how long a blocked client write waits for a wakeup before trying again
const WRITE_RETRY: Duration = Duration::from_millis(100);

/// bridges one virtual port to a connected socket client
struct SocketPort {
    to_client: mpsc::UnboundedSender<Bytes>,
    writable: Notify,
}

impl PortConsumer for SocketPort {
    fn receive_room(&self) -> usize {
        usize::MAX
    }

    fn receive_buf(&self, data: &[u8]) {
        if self.to_client.send(Bytes::copy_from_slice(data)).is_err() {
            // the client left, close() follows
            log::debug!("dropped {} bytes for a client that is gone", data.len());
        }
    }

    fn write_wakeup(&self) {
        self.writable.notify_one();
    }
}

async fn serve_line(mux: Arc<Mux>, line: usize, socket: UnixStream) -> Result<(), MuxError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let port = Arc::new(SocketPort {
        to_client: tx,
        writable: Notify::new(),
    });

    mux.open(line, port.clone()).await?;

    let (mut rd, mut wr) = socket.into_split();

    let to_client = async {
        while let Some(data) = rx.recv().await {
            wr.write_all(&data).await?;
        }
        Ok::<_, MuxError>(())
    };

    let from_client = async {
        let mut buf = vec![0; DEF_MTU];

        loop {
            let n = rd.read(&mut buf).await?;
            if n == 0 {
                return Ok::<_, MuxError>(());
            }

            let mut pending = &buf[..n];
            while !pending.is_empty() {
                match mux.write(line, pending)? {
                    0 => {
                        let _ = tokio::time::timeout(WRITE_RETRY, port.writable.notified()).await;
                    }
                    taken => pending = &pending[taken..],
                }
            }
        }
    };

    let result = tokio::select! {
        r = to_client => r,
        r = from_client => r,
    };

    mux.close(line).await?;

    result
}

fn bind_line(dir: &Path, line: usize) -> Result<UnixListener, Box<dyn std::error::Error>> {
    let socket_path = dir.join(format!("mux{line}"));

    if socket_path.exists() {
        fs::remove_file(&socket_path)?;
    }

    let listener = UnixListener::bind(&socket_path)?;

    setsockopt(&listener, sockopt::ReuseAddr, &true)?;

    fs::set_permissions(&socket_path, fs::Permissions::from_mode(0o666))?;

    Ok(listener)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let device = args.next().unwrap_or_else(|| DEFAULT_DEVICE.into());
    let socket_dir = PathBuf::from(args.next().unwrap_or_else(|| DEFAULT_SOCKET_DIR.into()));

    let config = if std::env::var_os("TS0710MUX_NO_HANDSHAKE").is_some() {
        MuxConfig::without_handshake()
    } else {
        MuxConfig::default()
    };

    // separate handles, a read blocked on the tty must not hold up writes
    let serial = fs::OpenOptions::new().read(true).write(true).open(&device)?;
    let writer = tokio::fs::File::from_std(serial.try_clone()?);
    let reader = tokio::fs::File::from_std(serial);

    let registry = MuxRegistry::new();
    let mux = registry.register(0, reader, writer, config).await?;

    log::info!("multiplexing {device}, ports under {}", socket_dir.display());

    fs::create_dir_all(&socket_dir)?;

    for line in 0..NR_MUXS {
        let listener = bind_line(&socket_dir, line)?;
        let mux = mux.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, _addr)) => {
                        let mux = mux.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_line(mux, line, socket).await {
                                log::warn!("line {line}: {e}");
                            }
                        });
                    }
                    Err(e) => log::error!("accept on line {line} failed: {e:?}"),
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;

    log::info!("shutting down");
    registry.unregister(0).await?;

    Ok(())
}
