#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
use std::path::PathBuf;
#[cfg(not(target_arch = "wasm32"))]
use std::sync::Arc;
#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;

#[cfg(not(target_arch = "wasm32"))]
use bytes::Bytes;
#[cfg(not(target_arch = "wasm32"))]
use clap::{Parser, ValueEnum};
#[cfg(not(target_arch = "wasm32"))]
use futures::{SinkExt, StreamExt};
#[cfg(not(target_arch = "wasm32"))]
use puyo_duel::GameSettings;
#[cfg(not(target_arch = "wasm32"))]
use puyo_duel::protocol::FrameReader;
#[cfg(not(target_arch = "wasm32"))]
use puyo_duel::relay::{PeerId, PeerSink, RelayHub};
#[cfg(not(target_arch = "wasm32"))]
use tokio::io::{AsyncReadExt, AsyncWriteExt};
#[cfg(not(target_arch = "wasm32"))]
use tokio::net::{TcpListener, TcpStream};
#[cfg(not(target_arch = "wasm32"))]
use tokio::sync::mpsc;
#[cfg(not(target_arch = "wasm32"))]
use tokio_tungstenite::{accept_async, tungstenite::Message};
#[cfg(not(target_arch = "wasm32"))]
use tracing::{error, info, warn};
#[cfg(not(target_arch = "wasm32"))]
use tracing_subscriber::{filter, fmt, prelude::*};

#[cfg(not(target_arch = "wasm32"))]
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Transport {
    /// Raw length-prefixed frames over TCP.
    Tcp,
    /// One frame per binary websocket message (browser clients).
    Ws,
}

/// Relay host for duel sessions: mirrors every player and forwards each frame to the
/// other peers.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Parser, Debug, Clone)]
struct Opts {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:9000")]
    listen: String,
    #[arg(long, value_enum, default_value_t = Transport::Ws)]
    transport: Transport,
    /// Optional settings JSON used by the host's mirrors
    #[arg(long)]
    config: Option<PathBuf>,
    /// trace, debug, info, warn or error
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
    /// Mirror simulation step, ms
    #[arg(long, default_value_t = 16)]
    tick_ms: u64,
}

#[cfg(not(target_arch = "wasm32"))]
struct PeerTx(mpsc::UnboundedSender<Bytes>);

#[cfg(not(target_arch = "wasm32"))]
impl PeerSink for PeerTx {
    fn send(&self, frame: Bytes) -> bool {
        self.0.send(frame).is_ok()
    }
}

#[cfg(not(target_arch = "wasm32"))]
type Hub = Arc<RelayHub<PeerTx>>;

#[cfg(not(target_arch = "wasm32"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter::LevelFilter::from_level(opts.log_level))
        .init();

    let settings = match opts.config.as_ref() {
        Some(path) => GameSettings::load(path)?,
        None => GameSettings::default(),
    };
    let hub: Hub = Arc::new(RelayHub::new(settings));

    let ticker = hub.clone();
    let tick_ms = opts.tick_ms.max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
        loop {
            interval.tick().await;
            ticker.tick(tick_ms);
        }
    });

    let listener = TcpListener::bind(&opts.listen).await?;
    info!(listen = %opts.listen, transport = ?opts.transport, "duel host listening");

    loop {
        let (stream, addr) = listener.accept().await?;
        let hub = hub.clone();
        let transport = opts.transport;
        tokio::spawn(async move {
            let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
            let peer = hub.connect(PeerTx(tx));
            info!(peer, %addr, "connected");
            let result = match transport {
                Transport::Tcp => serve_tcp(stream, &hub, peer, rx).await,
                Transport::Ws => serve_ws(stream, &hub, peer, rx).await,
            };
            if let Err(e) = result {
                error!(peer, %addr, error = ?e, "connection error");
            }
            hub.disconnect(peer);
        });
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn relay_frames(hub: &Hub, peer: PeerId, reader: &mut FrameReader, data: &[u8]) {
    reader.extend(data);
    for frame in reader.drain() {
        if let Err(e) = hub.on_frame(peer, &frame) {
            warn!(peer, error = %e, "frame dropped");
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
async fn serve_tcp(
    stream: TcpStream,
    hub: &Hub,
    peer: PeerId,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) -> anyhow::Result<()> {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut reader = FrameReader::new();
    let mut buf = vec![0u8; 4096];
    loop {
        tokio::select! {
            Some(frame) = rx.recv() => {
                write_half.write_all(&frame).await?;
            }
            n = read_half.read(&mut buf) => {
                let n = n?;
                if n == 0 {
                    break;
                }
                relay_frames(hub, peer, &mut reader, &buf[..n]);
            }
        }
    }
    Ok(())
}

#[cfg(not(target_arch = "wasm32"))]
async fn serve_ws(
    stream: TcpStream,
    hub: &Hub,
    peer: PeerId,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut reader = FrameReader::new();
    loop {
        tokio::select! {
            Some(frame) = rx.recv() => {
                ws_tx.send(Message::Binary(frame.to_vec())).await?;
            }
            Some(msg) = ws_rx.next() => {
                match msg? {
                    Message::Binary(data) => relay_frames(hub, peer, &mut reader, &data),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            else => break,
        }
    }
    Ok(())
}
