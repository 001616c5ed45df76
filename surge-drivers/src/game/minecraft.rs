//! Minecraft server-list-ping driver
//!
//! On each tick a random relay performs the status handshake against
//! `host:port` (default 25565) and parses the JSON status payload into a
//! "version: online/max" banner. No connection survives between ticks.

use crate::util::{attempt_err, attempt_ok};
use async_trait::async_trait;
use std::time::Duration;
use surge_core::{
    error::ConnectError, Driver, DriverContext, DriverDescriptor, RelayDescriptor, RelayProtocol,
    Result, TelemetrySink,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::debug;

static DESCRIPTOR: DriverDescriptor = DriverDescriptor {
    id: "minecraft_ping",
    name: "Minecraft Ping",
    description: "Spams Minecraft server list pings.",
    supported: &[RelayProtocol::Socks4, RelayProtocol::Socks5],
};

const DEFAULT_PORT: u16 = 25565;
/// Protocol version sent in the handshake (1.16.5 era; servers answer
/// status requests regardless).
const PROTOCOL_VERSION: i32 = 754;
/// Budget for one complete ping, handshake through status response.
const PING_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on an accepted status payload.
const MAX_STATUS_LEN: usize = 1 << 16;

#[derive(Default)]
pub struct MinecraftPingDriver;

impl MinecraftPingDriver {
    pub fn new() -> Self {
        Self
    }
}

/// Minecraft VarInt encoding: 7 data bits per byte, high bit marks
/// continuation.
fn write_varint(buf: &mut Vec<u8>, mut value: i32) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value = ((value as u32) >> 7) as i32;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_varint(buf, s.len() as i32);
    buf.extend_from_slice(s.as_bytes());
}

async fn read_varint(stream: &mut TcpStream) -> std::io::Result<i32> {
    let mut value = 0i32;
    let mut shift = 0u32;
    loop {
        let byte = stream.read_u8().await?;
        value |= i32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 32 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "varint too long",
            ));
        }
    }
}

fn decode_varint(buf: &[u8]) -> Option<(i32, usize)> {
    let mut value = 0i32;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        value |= i32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
        if shift >= 32 {
            return None;
        }
    }
    None
}

/// Handshake (state = status) followed by the empty status request,
/// both length-framed.
fn build_ping(host: &str, port: u16) -> Vec<u8> {
    let mut packet = Vec::with_capacity(16 + host.len());
    packet.push(0x00); // packet id: handshake
    write_varint(&mut packet, PROTOCOL_VERSION);
    write_string(&mut packet, host);
    packet.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut packet, 0x01); // next state: status

    let mut framed = Vec::with_capacity(packet.len() + 3);
    write_varint(&mut framed, packet.len() as i32);
    framed.extend_from_slice(&packet);
    framed.extend_from_slice(&[0x01, 0x00]); // status request
    framed
}

/// Pull the banner pieces out of a status response payload.
fn parse_status(json: &[u8]) -> Option<String> {
    let status: serde_json::Value = serde_json::from_slice(json).ok()?;
    let online = status["players"]["online"].as_u64().unwrap_or(0);
    let max = status["players"]["max"].as_u64().unwrap_or(0);
    let version = status["version"]["name"].as_str().unwrap_or("");
    Some(format!("{version}: {online}/{max}"))
}

async fn ping_once(
    relay: Option<&RelayDescriptor>,
    host: &str,
    port: u16,
) -> std::result::Result<String, String> {
    let mut stream = surge_transport::open_stream(relay, host, port)
        .await
        .map_err(|e: ConnectError| e.to_string())?;

    let exchange = async {
        stream.write_all(&build_ping(host, port)).await?;

        let total_len = read_varint(&mut stream).await?;
        if !(0..=MAX_STATUS_LEN as i32).contains(&total_len) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "status frame too large",
            ));
        }
        let mut frame = vec![0u8; total_len as usize];
        stream.read_exact(&mut frame).await?;
        Ok::<Vec<u8>, std::io::Error>(frame)
    };

    let frame = timeout(PING_TIMEOUT, exchange)
        .await
        .map_err(|_| "status response timed out".to_string())?
        .map_err(|e| e.to_string())?;

    // Frame: packet id varint (0x00), string length varint, JSON bytes.
    let (packet_id, id_len) = decode_varint(&frame).ok_or("malformed status frame")?;
    if packet_id != 0x00 {
        return Err(format!("unexpected status packet id {packet_id}"));
    }
    let rest = &frame[id_len..];
    let (str_len, len_len) = decode_varint(rest).ok_or("malformed status frame")?;
    let json = rest
        .get(len_len..len_len + str_len as usize)
        .ok_or("truncated status payload")?;

    parse_status(json).ok_or_else(|| "unparseable status payload".to_string())
}

async fn attempt(sink: TelemetrySink, relay: Option<RelayDescriptor>, host: String, port: u16) {
    let target = format!("tcp://{host}:{port}");
    match ping_once(relay.as_ref(), &host, port).await {
        Ok(banner) => sink.success(
            attempt_ok("mc_ping_success", relay.as_ref(), &target).with("banner", banner),
        ),
        Err(e) => sink.failure(attempt_err("mc_ping_failed", relay.as_ref(), &target, &e)),
    }
}

#[async_trait]
impl Driver for MinecraftPingDriver {
    fn descriptor(&self) -> &DriverDescriptor {
        &DESCRIPTOR
    }

    async fn run(&self, ctx: DriverContext) -> Result<()> {
        let host = ctx.target.host().to_string();
        let port = if ctx.target.has_explicit_port() {
            ctx.target.port()
        } else {
            DEFAULT_PORT
        };

        let mut ticker = tokio::time::interval(ctx.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut attempts = JoinSet::new();
        while ctx.should_continue() {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = tokio::time::sleep_until(ctx.deadline) => break,
            }
            if !ctx.is_running() {
                break;
            }

            let relay = {
                let mut rng = rand::thread_rng();
                ctx.draw_relay(&mut rng)
            };
            attempts.spawn(attempt(ctx.sink.clone(), relay, host.clone(), port));
        }

        debug!(total = ctx.sink.total(), "minecraft ping winding down");
        attempts.shutdown().await;
        Ok(())
    }
}
