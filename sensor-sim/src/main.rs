//! Simulated door sensor for development with `transport = "tcp"`.
//!
//! Each client gets a short series of readings, one per line, after which the
//! connection is dropped as if the car had driven out of range.
//!
//! Usage: `sensor-sim [listen-address] [closed|open]`

use anyhow::{bail, Context, Result};
use carwatch_shared::codec::encode_line;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_LISTEN: &str = "0.0.0.0:9000";
const READING_INTERVAL: Duration = Duration::from_secs(1);

/// What the simulated sensor reports before the link drops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Profile {
    /// Door shut properly: estimate climbs well past the alarm threshold
    Closed,
    /// Door left ajar: estimate never leaves the low range
    Open,
}

impl Profile {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "closed" => Ok(Profile::Closed),
            "open" => Ok(Profile::Open),
            other => bail!("unknown profile {:?} (expected closed or open)", other),
        }
    }

    fn readings(self) -> Vec<i32> {
        match self {
            Profile::Closed => (2..=8).map(|step| step * 10).collect(),
            Profile::Open => vec![10, 25, 30, 20, 35, 25],
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let listen = args.next().unwrap_or_else(|| DEFAULT_LISTEN.to_string());
    let profile = match args.next() {
        Some(arg) => Profile::parse(&arg)?,
        None => Profile::Closed,
    };

    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {}", listen))?;
    info!("Sensor simulator listening on {} ({:?} profile)", listen, profile);

    loop {
        let (socket, peer) = listener.accept().await?;
        tokio::spawn(async move {
            if let Err(e) = serve(socket, peer, profile).await {
                warn!("[{}] Session ended with error: {:#}", peer, e);
            }
        });
    }
}

async fn serve(mut socket: TcpStream, peer: SocketAddr, profile: Profile) -> Result<()> {
    info!("[{}] Connected", peer);
    socket.set_nodelay(true)?;

    for reading in profile.readings() {
        let frame = encode_line(&reading.to_string())?;
        socket.write_all(&frame).await?;
        info!("[{}] Sent {}", peer, reading);
        tokio::time::sleep(READING_INTERVAL).await;
    }

    socket.shutdown().await?;
    info!("[{}] Out of range, closing", peer);
    Ok(())
}
