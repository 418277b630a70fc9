//! Outbound HTTP client for the cloud API.
//!
//! One request is in flight at a time; the owning task calls
//! [`CloudClient::perform_request`] and waits on a one-shot completion with a
//! fixed timeout while a driver task turns socket I/O into connection events.
//! A timed-out wait abandons the eventual outcome; the late completion is
//! dropped on the floor.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use irrigator_common::{DeviceConfig, ScheduleEntry, MAX_RUN_SECS, SCHEDULE_SLOTS};

use crate::device::Board;
use crate::net::http::{self, BODY_DELIMITER};
use crate::net::json;
use crate::net::server;

/// Response accumulation cap. Bytes past it are dropped and the response is
/// flagged truncated.
pub const RECV_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("dns resolution failed for {0}")]
    Dns(String),
    #[error("connection failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),
    #[error("request timed out")]
    Timeout,
    #[error("exchange aborted")]
    Aborted,
}

/// Host/port/base-path split of the configured API URL, derived once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub base_path: String,
}

pub fn parse_endpoint(url: &str) -> Endpoint {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let (host_port, base_path) = match rest.find('/') {
        Some(at) => (&rest[..at], rest[at..].to_string()),
        None => (rest, String::new()),
    };
    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(80)),
        None => (host_port.to_string(), 80),
    };
    Endpoint {
        host,
        port,
        base_path,
    }
}

/// Connection lifecycle events, delivered in order by the driver. `Closed`
/// and `Error` are terminal.
#[derive(Debug)]
enum ConnEvent {
    Connected,
    Data(Vec<u8>),
    Closed,
    Error(std::io::Error),
}

enum Step {
    SendRequest,
    Continue,
    Done(Result<CloudResponse, ClientError>),
}

/// Raw accumulated response. End-of-stream is the only completion signal;
/// there is no length-based detection on this side.
#[derive(Debug, Clone)]
pub struct CloudResponse {
    pub raw: String,
    pub truncated: bool,
}

impl CloudResponse {
    pub fn body(&self) -> Option<&str> {
        self.raw
            .find(BODY_DELIMITER)
            .map(|at| &self.raw[at + BODY_DELIMITER.len()..])
    }
}

struct PendingRequest {
    request: Vec<u8>,
    buf: Vec<u8>,
    truncated: bool,
}

impl PendingRequest {
    fn new(request: Vec<u8>) -> Self {
        Self {
            request,
            buf: Vec::with_capacity(1024),
            truncated: false,
        }
    }

    fn step(&mut self, event: ConnEvent) -> Step {
        match event {
            ConnEvent::Connected => Step::SendRequest,
            ConnEvent::Data(bytes) => {
                let room = RECV_BUFFER_SIZE - self.buf.len();
                if bytes.len() > room {
                    self.truncated = true;
                }
                self.buf.extend_from_slice(&bytes[..bytes.len().min(room)]);
                Step::Continue
            }
            ConnEvent::Closed => Step::Done(Ok(CloudResponse {
                raw: String::from_utf8_lossy(&self.buf).into_owned(),
                truncated: self.truncated,
            })),
            ConnEvent::Error(err) => Step::Done(Err(ClientError::Transport(err))),
        }
    }
}

/// Runs one resolve/connect/send/accumulate exchange and reports through
/// `done` exactly once. Name resolution happens here so the caller's timed
/// wait bounds it too; a stalled resolver cannot hold the owning task past
/// its timeout. The send failing when the waiter already gave up is normal.
async fn drive_exchange(
    host: String,
    port: u16,
    request: Vec<u8>,
    done: oneshot::Sender<Result<CloudResponse, ClientError>>,
) {
    let outcome = run_exchange(&host, port, request).await;
    if done.send(outcome).is_err() {
        debug!("exchange outcome abandoned by timed-out caller");
    }
}

async fn run_exchange(
    host: &str,
    port: u16,
    request: Vec<u8>,
) -> Result<CloudResponse, ClientError> {
    let addr = lookup_host((host, port))
        .await
        .map_err(|_| ClientError::Dns(host.to_string()))?
        .next()
        .ok_or_else(|| ClientError::Dns(host.to_string()))?;

    let mut pending = PendingRequest::new(request);
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(ClientError::Connect)?;

    if let Some(outcome) = feed(&mut pending, ConnEvent::Connected, &mut stream).await {
        return outcome;
    }

    let mut chunk = [0u8; 1024];
    loop {
        let event = match stream.read(&mut chunk).await {
            Ok(0) => ConnEvent::Closed,
            Ok(n) => ConnEvent::Data(chunk[..n].to_vec()),
            Err(err) => ConnEvent::Error(err),
        };
        if let Some(outcome) = feed(&mut pending, event, &mut stream).await {
            return outcome;
        }
    }
}

async fn feed(
    pending: &mut PendingRequest,
    event: ConnEvent,
    stream: &mut TcpStream,
) -> Option<Result<CloudResponse, ClientError>> {
    match pending.step(event) {
        Step::SendRequest => {
            let write = stream.write_all(&pending.request).await;
            match write {
                Ok(()) => None,
                Err(err) => match pending.step(ConnEvent::Error(err)) {
                    Step::Done(outcome) => Some(outcome),
                    _ => None,
                },
            }
        }
        Step::Continue => None,
        Step::Done(outcome) => Some(outcome),
    }
}

/// All cloud-side client state: session token, derived endpoint, board
/// handle. Owned by the single task that performs requests; `&mut self` on
/// [`perform_request`] is what keeps requests serialized.
pub struct CloudClient {
    board: Board,
    config: Arc<DeviceConfig>,
    token: String,
    endpoint: OnceLock<Endpoint>,
    request_timeout: Duration,
}

impl CloudClient {
    pub fn new(board: Board, config: Arc<DeviceConfig>) -> Self {
        let request_timeout = Duration::from_millis(config.request_timeout_ms);
        Self {
            board,
            config,
            token: String::new(),
            endpoint: OnceLock::new(),
            request_timeout,
        }
    }

    fn endpoint(&self) -> &Endpoint {
        self.endpoint
            .get_or_init(|| parse_endpoint(&self.config.api_url))
    }

    /// Sends one request and waits for the exchange to finish, at most
    /// `request_timeout`. The wait covers the whole exchange, name resolution
    /// included; every failure path releases it. Interpretation of the
    /// response (token, schedules) happens here in the owning task.
    pub async fn perform_request(
        &mut self,
        method: &str,
        path: &str,
        body: &str,
        is_login: bool,
    ) -> Result<CloudResponse, ClientError> {
        let endpoint = self.endpoint().clone();
        let bearer = if is_login || self.token.is_empty() {
            None
        } else {
            Some(self.token.as_str())
        };
        let request = http::build_request(
            method,
            &format!("{}{path}", endpoint.base_path),
            &endpoint.host,
            endpoint.port,
            bearer,
            body,
        )
        .into_bytes();

        let (done, wait) = oneshot::channel();
        tokio::spawn(drive_exchange(
            endpoint.host.clone(),
            endpoint.port,
            request,
            done,
        ));

        let response = match timeout(self.request_timeout, wait).await {
            Err(_) => return Err(ClientError::Timeout),
            Ok(Err(_)) => return Err(ClientError::Aborted),
            Ok(Ok(outcome)) => outcome?,
        };

        if response.truncated {
            warn!("response from {path} truncated at {RECV_BUFFER_SIZE} bytes");
        }
        self.interpret(path, is_login, &response);
        Ok(response)
    }

    fn interpret(&mut self, path: &str, is_login: bool, response: &CloudResponse) {
        if response.raw.contains("HTTP/1.1 401") || response.raw.contains("HTTP/1.0 401") {
            warn!("cloud api returned 401, clearing session token");
            self.token.clear();
            return;
        }

        if is_login {
            let token = response
                .body()
                .and_then(|body| json::string_field(body, "token"))
                .unwrap_or("");
            if token.is_empty() {
                warn!("login failed: no token in response");
            } else {
                self.token = token.to_string();
                info!("login successful, session token acquired");
            }
        } else if path.contains("/device/sync") {
            if let Some(body) = response.body() {
                apply_schedules(&self.board, body);
            }
        } else if response.raw.contains("200 OK") {
            debug!("telemetry accepted");
        }
    }

    /// Owning-task protocol: login when the session is empty, then schedule
    /// sync, then telemetry, with the fixed retry delays.
    pub async fn run(mut self) {
        loop {
            if !self.board.has_internet() {
                tokio::time::sleep(Duration::from_secs(self.config.connectivity_poll_secs)).await;
                continue;
            }

            if self.token.is_empty() {
                info!("authenticating with cloud api");
                let credentials = format!(
                    "{{\"serial_number\": \"{}\", \"secret_token\": \"{}\"}}",
                    self.config.serial_number, self.config.secret_token
                );
                if let Err(err) = self
                    .perform_request("POST", "/device/login", &credentials, true)
                    .await
                {
                    warn!("login request failed: {err}");
                }
                if self.token.is_empty() {
                    tokio::time::sleep(Duration::from_secs(self.config.login_retry_secs)).await;
                    continue;
                }
            }

            info!("syncing schedules");
            if let Err(err) = self.perform_request("GET", "/device/sync", "", false).await {
                warn!("schedule sync failed: {err}");
            }

            info!("sending telemetry");
            let payload = server::status_json(&self.board);
            if let Err(err) = self
                .perform_request("POST", "/telemetry", &payload, false)
                .await
            {
                warn!("telemetry send failed: {err}");
            }

            tokio::time::sleep(Duration::from_secs(self.config.telemetry_interval_secs)).await;
        }
    }
}

fn apply_schedules(board: &Board, body: &str) {
    for object in json::array_objects(body, "schedules") {
        let index = json::int_field(object, "index", -1);
        if !(0..SCHEDULE_SLOTS as i64).contains(&index) {
            continue;
        }
        let entry = ScheduleEntry {
            hour: json::int_field(object, "hour", 0).clamp(0, 23) as u8,
            minute: json::int_field(object, "minute", 0).clamp(0, 59) as u8,
            duration_secs: json::int_field(object, "duration", 60).clamp(0, MAX_RUN_SECS as i64)
                as u16,
            active: json::bool_field(object, "active", false),
        };
        if board.set_schedule(index as usize, entry).is_ok() {
            info!(
                "synced schedule entry {index}: {:02}:{:02} dur={} active={}",
                entry.hour, entry.minute, entry.duration_secs, entry.active
            );
        }
    }
}
