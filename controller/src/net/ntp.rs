//! UDP time synchronization (SNTP subset).
//!
//! One 48-byte request per attempt; only a server-mode reply of exactly that
//! length is accepted. The transmit timestamp's seconds field is converted to
//! the host epoch, shifted by the configured timezone offset, and committed
//! to the clock collaborator.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::{info, warn};

use irrigator_common::{DeviceConfig, DeviceTime};

use crate::device::Board;

pub const NTP_PACKET_LEN: usize = 48;
const NTP_PORT: u16 = 123;

/// Seconds between the NTP era (1900) and the Unix epoch (1970).
const NTP_DELTA: i64 = 2_208_988_800;

const MODE_MASK: u8 = 0x07;
const MODE_SERVER: u8 = 4;

/// Transmit timestamp seconds, big-endian, lives at this byte offset.
const TRANSMIT_SECONDS_OFFSET: usize = 40;

/// LI=0, VN=3, Mode=3 (client); every other field zero.
pub fn build_request() -> [u8; NTP_PACKET_LEN] {
    let mut packet = [0u8; NTP_PACKET_LEN];
    packet[0] = 0x1B;
    packet
}

/// Validates a reply and extracts seconds-since-1900. `None` for anything
/// that is not a full-length server-mode packet.
pub fn parse_reply(reply: &[u8]) -> Option<u32> {
    if reply.len() != NTP_PACKET_LEN {
        return None;
    }
    if reply[0] & MODE_MASK != MODE_SERVER {
        return None;
    }
    let raw: [u8; 4] = reply[TRANSMIT_SECONDS_OFFSET..TRANSMIT_SECONDS_OFFSET + 4]
        .try_into()
        .ok()?;
    Some(u32::from_be_bytes(raw))
}

pub fn reply_to_time(seconds_since_1900: u32, timezone_offset_secs: i32) -> Option<DeviceTime> {
    let epoch = seconds_since_1900 as i64 - NTP_DELTA + timezone_offset_secs as i64;
    DeviceTime::from_epoch(epoch)
}

/// One resolve/send/receive attempt, the whole exchange under a single
/// timeout so a stalled resolver is bounded the same way as a silent
/// server. True when the clock was committed.
pub async fn sync_once(board: &Board, config: &DeviceConfig) -> bool {
    let wait = Duration::from_millis(config.request_timeout_ms);
    let reply = match timeout(wait, exchange(&config.ntp_server)).await {
        Err(_) => {
            warn!("ntp exchange timed out");
            return false;
        }
        Ok(None) => return false,
        Ok(Some(reply)) => reply,
    };

    let Some(seconds) = parse_reply(&reply) else {
        warn!("ntp reply rejected ({} bytes)", reply.len());
        return false;
    };
    let Some(time) = reply_to_time(seconds, config.timezone_offset_secs) else {
        warn!("ntp reply encodes an unrepresentable instant");
        return false;
    };

    board.commit_time(time)
}

/// Resolve, send, receive one datagram. `None` on any failure; the caller
/// owns the timing.
async fn exchange(server: &str) -> Option<Vec<u8>> {
    // A `host:port` value overrides the well-known port.
    let target = if server.contains(':') {
        server.to_string()
    } else {
        format!("{server}:{NTP_PORT}")
    };

    let addr = match lookup_host(target.as_str()).await {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => addr,
            None => {
                warn!("ntp dns lookup for {target} returned no addresses");
                return None;
            }
        },
        Err(err) => {
            warn!("ntp dns lookup for {target} failed: {err}");
            return None;
        }
    };

    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => socket,
        Err(err) => {
            warn!("ntp socket bind failed: {err}");
            return None;
        }
    };
    if let Err(err) = socket.send_to(&build_request(), addr).await {
        warn!("ntp request send failed: {err}");
        return None;
    }

    let mut reply = [0u8; 256];
    match socket.recv(&mut reply).await {
        Ok(received) => Some(reply[..received].to_vec()),
        Err(err) => {
            warn!("ntp receive failed: {err}");
            None
        }
    }
}

/// Sync loop: 24 h between successful syncs, 1 min between attempts
/// otherwise. Losing connectivity clears the synchronized flag immediately.
pub async fn run(board: Board, config: Arc<DeviceConfig>) {
    loop {
        if board.is_connected() {
            info!("starting ntp synchronization");
            if sync_once(&board, &config).await {
                board.set_ntp_synchronized(true);
                info!("clock synchronized via ntp");
                tokio::time::sleep(Duration::from_secs(config.ntp_resync_secs)).await;
                continue;
            }
        } else {
            board.set_ntp_synchronized(false);
        }
        tokio::time::sleep(Duration::from_secs(config.ntp_retry_secs)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_client_mode_and_fixed_length() {
        let packet = build_request();
        assert_eq!(packet.len(), NTP_PACKET_LEN);
        assert_eq!(packet[0], 0x1B);
        assert!(packet[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn reply_validation() {
        let mut reply = [0u8; NTP_PACKET_LEN];
        reply[0] = 0x24; // LI=0, VN=4, Mode=4 (server)
        reply[40..44].copy_from_slice(&1_234_567_890u32.to_be_bytes());
        assert_eq!(parse_reply(&reply), Some(1_234_567_890));

        // Client-mode packet rejected.
        reply[0] = 0x23;
        assert_eq!(parse_reply(&reply), None);

        // Wrong length rejected.
        reply[0] = 0x24;
        assert_eq!(parse_reply(&reply[..40]), None);
    }

    #[test]
    fn known_instant_lands_on_expected_calendar_time() {
        // 2026-08-29 12:00:00 UTC.
        let epoch: i64 = 1_787_961_600;
        let seconds_1900 = (epoch + NTP_DELTA) as u32;
        let time = reply_to_time(seconds_1900, -3 * 3600).unwrap();

        assert_eq!(time.year, 2026);
        assert_eq!(time.month, 8);
        assert_eq!(time.day, 29);
        // UTC-3.
        assert_eq!(time.hour, 9);
        assert_eq!(time.min, 0);
        assert_eq!(time.sec, 0);
    }

    #[tokio::test]
    async fn sync_once_commits_clock_from_reply() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(n, NTP_PACKET_LEN);
            assert_eq!(buf[0], 0x1B);

            let mut reply = [0u8; NTP_PACKET_LEN];
            reply[0] = 0x24;
            let epoch: i64 = 1_787_961_600; // 2026-08-29 12:00:00 UTC
            reply[40..44].copy_from_slice(&((epoch + NTP_DELTA) as u32).to_be_bytes());
            server.send_to(&reply, peer).await.unwrap();
        });

        let (board, _commands) = Board::new();
        let config = DeviceConfig {
            ntp_server: format!("127.0.0.1:{port}"),
            request_timeout_ms: 2_000,
            ..DeviceConfig::default()
        };

        assert!(sync_once(&board, &config).await);
        let now = board.now().unwrap();
        assert_eq!((now.year, now.month, now.day), (2026, 8, 29));
        assert_eq!(now.hour, 9);
    }

    #[tokio::test]
    async fn silent_time_server_bounds_the_wait() {
        // Bound but never answered, so the request just disappears.
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        let (board, _commands) = Board::new();
        let config = DeviceConfig {
            ntp_server: format!("127.0.0.1:{port}"),
            request_timeout_ms: 250,
            ..DeviceConfig::default()
        };

        let started = std::time::Instant::now();
        assert!(!sync_once(&board, &config).await);
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(board.now().unwrap().year, 2024);
    }

    #[tokio::test]
    async fn sync_once_rejects_wrong_mode_reply() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            let mut reply = [0u8; NTP_PACKET_LEN];
            reply[0] = 0x23; // client mode, must be ignored
            server.send_to(&reply, peer).await.unwrap();
        });

        let (board, _commands) = Board::new();
        let config = DeviceConfig {
            ntp_server: format!("127.0.0.1:{port}"),
            request_timeout_ms: 300,
            ..DeviceConfig::default()
        };

        assert!(!sync_once(&board, &config).await);
        assert_eq!(board.now().unwrap().year, 2024);
    }
}
