//! Local HTTP API: one request per connection, fixed path set, flat-JSON
//! bodies in and out.

use std::fmt::Write as _;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use irrigator_common::{
    CommandOrigin, DeviceTime, IrrigatorCommand, ScheduleEntry, MAX_RUN_SECS, SCHEDULE_SLOTS,
};

use crate::device::Board;
use crate::net::http::{self, Response};
use crate::net::json;

/// Receive cap per connection. A request that does not fit is answered 400;
/// there is no further reassembly beyond this.
pub const RX_BUFFER_SIZE: usize = 4096;

const HARDWARE_VERSION: &str = "BitDogLab V6.3";

/// Accept loop. Each connection lives for exactly one request/response
/// exchange and is closed afterwards regardless of the write outcome.
pub async fn serve(board: Board, listener: TcpListener) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("accept failed: {err}");
                continue;
            }
        };
        debug!("connection from {peer}");
        let board = board.clone();
        tokio::spawn(handle_connection(stream, board));
    }
}

async fn handle_connection<S>(mut stream: S, board: Board)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(RX_BUFFER_SIZE);
    let mut chunk = [0u8; 1024];

    let response = loop {
        if http::request_complete(&buf) {
            break route(&board, &String::from_utf8_lossy(&buf));
        }
        if buf.len() >= RX_BUFFER_SIZE {
            break Response::with_status(400, r#"{"error": "request too large"}"#);
        }
        match stream.read(&mut chunk).await {
            // EOF before a complete request: route whatever arrived, the
            // handlers answer 400 where a body was required.
            Ok(0) => break route(&board, &String::from_utf8_lossy(&buf)),
            Ok(n) => {
                let room = RX_BUFFER_SIZE - buf.len();
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(err) => {
                warn!("receive failed: {err}");
                return;
            }
        }
    };

    http::write_response(&mut stream, &response).await;
    let _ = stream.shutdown().await;
}

/// Ordered exact match over the fixed path+method table.
pub fn route(board: &Board, raw: &str) -> Response {
    let Some(request) = http::parse_request(raw) else {
        return Response::with_status(400, r#"{"error": "bad request"}"#);
    };

    match (request.method, request.path) {
        ("GET", "/") => handle_root(board),
        ("POST", "/serial") => handle_serial(request.body),
        ("POST", "/clock") => handle_clock(board, request.body),
        ("GET", "/schedule") => Response::ok(schedule_array_json(&board.schedules())),
        ("POST", "/schedule") => handle_set_schedule(board, request.body),
        ("GET", "/status") => Response::ok(status_json(board)),
        ("GET", "/data") => Response::ok(data_json(board)),
        ("POST", "/irrigator") => handle_irrigator(board, request.body),
        _ => Response::with_status(404, r#"{"error": "not found"}"#),
    }
}

fn handle_root(board: &Board) -> Response {
    // Clock read failure yields zeroed fields, not an error.
    let t = board.now().unwrap_or_default();
    Response::ok(format!(
        "{{\"hardwareVersion\": \"{HARDWARE_VERSION}\", \"systemTime\": {{\
         \"year\": {}, \"month\": {}, \"day\": {}, \
         \"dotw\": {}, \"hour\": {}, \"min\": {}, \"sec\": {}}}}}",
        t.year, t.month, t.day, t.dotw, t.hour, t.min, t.sec
    ))
}

fn handle_serial(body: Option<&str>) -> Response {
    let Some(body) = body else {
        return Response::with_status(400, r#"{"error": "no body"}"#);
    };

    let mut author = json::string_field(body, "author").unwrap_or("").to_string();
    let mut message = json::string_field(body, "message").unwrap_or("").to_string();

    // Parse failure with a non-empty body: treat the raw body as the message.
    if author.is_empty() && message.is_empty() && !body.is_empty() {
        message = body.to_string();
        author = "RAW".to_string();
    }

    info!("serial message [{author}] {message}");
    Response::ok(r#"{"status": "received"}"#)
}

fn handle_clock(board: &Board, body: Option<&str>) -> Response {
    let Some(body) = body else {
        return Response::with_status(400, r#"{"error": "no body"}"#);
    };

    let t = DeviceTime {
        year: json::int_field(body, "year", 2024) as i32,
        month: json::int_field(body, "month", 1) as u8,
        day: json::int_field(body, "day", 1) as u8,
        hour: json::int_field(body, "hour", 12) as u8,
        min: json::int_field(body, "min", 0) as u8,
        sec: json::int_field(body, "sec", 0) as u8,
        dotw: 0,
    }
    .with_dotw();

    if board.commit_time(t) {
        Response::ok(r#"{"status": "clock updated"}"#)
    } else {
        Response::with_status(400, r#"{"status": "invalid datetime"}"#)
    }
}

fn handle_set_schedule(board: &Board, body: Option<&str>) -> Response {
    let Some(body) = body else {
        return Response::with_status(400, r#"{"error": "no body"}"#);
    };

    let index = json::int_field(body, "index", -1);
    if !(0..SCHEDULE_SLOTS as i64).contains(&index) {
        return Response::with_status(400, r#"{"error": "invalid index"}"#);
    }

    let entry = ScheduleEntry {
        hour: json::int_field(body, "hour", 0).clamp(0, 23) as u8,
        minute: json::int_field(body, "minute", 0).clamp(0, 59) as u8,
        duration_secs: json::int_field(body, "duration", 60).clamp(0, MAX_RUN_SECS as i64) as u16,
        active: json::int_field(body, "active", 1) != 0,
    };

    match board.set_schedule(index as usize, entry) {
        Ok(()) => Response::ok(r#"{"status": "schedule updated"}"#),
        Err(_) => Response::with_status(400, r#"{"error": "invalid index"}"#),
    }
}

fn handle_irrigator(board: &Board, body: Option<&str>) -> Response {
    let Some(body) = body else {
        return Response::with_status(400, r#"{"error": "no body"}"#);
    };

    if json::bool_field(body, "active", false) {
        let duration_secs = json::int_field(body, "duration", 60).clamp(0, MAX_RUN_SECS as i64) as u16;
        board.signal_irrigator(IrrigatorCommand::On {
            duration_secs,
            origin: CommandOrigin::Remote,
        });
        Response::ok(r#"{"status": "irrigator on"}"#)
    } else {
        board.signal_irrigator(IrrigatorCommand::Off {
            origin: CommandOrigin::Remote,
        });
        Response::ok(r#"{"status": "irrigator off"}"#)
    }
}

fn schedule_array_json(entries: &[ScheduleEntry]) -> String {
    let mut out = String::from("[");
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(
            out,
            "{{\"index\":{i},\"hour\":{},\"minute\":{},\"duration\":{},\"active\":{}}}",
            entry.hour,
            entry.minute,
            entry.duration_secs,
            entry.active as u8
        );
    }
    out.push(']');
    out
}

/// Aggregated device state. Shared with the cloud client, which sends the
/// same document as its telemetry payload.
pub fn status_json(board: &Board) -> String {
    let t = board.now().unwrap_or_default();
    let reading = board.latest_reading();

    let mut out = String::with_capacity(2048);
    let _ = write!(
        out,
        "{{\"clock\":{{\"synchronizedNTP\":{},\"time\":{{\"year\":{},\"month\":{},\"day\":{},\"dotw\":{},\"hour\":{},\"min\":{},\"sec\":{}}}}},\
         \"irrigator\":{{\"active\":{},\"schedule\":{}}},\
         \"sensors\":{{\"temperature\":{:.2},\"humidity\":{:.2}}},\
         \"wifi\":{{\"hasInternetConnection\":{}}}}}",
        board.ntp_synchronized(),
        t.year, t.month, t.day, t.dotw, t.hour, t.min, t.sec,
        board.irrigator_is_on(),
        schedule_array_json(&board.schedules()),
        reading.temperature,
        reading.humidity,
        board.has_internet(),
    );
    out
}

fn data_json(board: &Board) -> String {
    let t = board.now().unwrap_or_default();
    let reading = board.latest_reading();

    let mut out = String::with_capacity(2048);
    let _ = write!(
        out,
        "{{\"board\":{{\"model\":\"BitDogLab\",\"version\":\"v6.3\",\"description\":\"BitDogLab - EmbarcaTech\"}},\
         \"module\":{{\
         \"buttons\":{{\"name\":\"Buttons A/B\",\"description\":\"(A) turn on, (B) turn off (priority).\"}},\
         \"buzzer\":{{\"name\":\"Buzzer\",\"description\":\"Audible feedback.\"}},\
         \"clock\":{{\"name\":\"RTC\",\"description\":\"Internal clock (synchronized via NTP).\",\"synchronizedNTP\":{},\"time\":{{\"year\":{},\"month\":{},\"day\":{},\"dotw\":{},\"hour\":{},\"min\":{},\"sec\":{}}}}},\
         \"irrigator\":{{\"name\":\"Irrigator\",\"description\":\"5V relay for the solenoid valve.\",\"active\":{},\"schedule\":{}}},\
         \"led\":{{\"name\":\"LED\",\"description\":\"Indicates active irrigation.\"}},\
         \"oled\":{{\"name\":\"OLED\",\"description\":\"SSD1306 status display.\"}},\
         \"humidityAndTemperature\":{{\"name\":\"AHT10\",\"description\":\"Temperature/humidity sensor.\",\"humidity\":{:.2},\"temperature\":{:.2}}},\
         \"wifi\":{{\"name\":\"Wi-Fi\",\"description\":\"Wireless connection.\",\"internet\":{{\"connected\":{}}},\"ip\":\"{}\"}}}},\
         \"system\":{{\"firmware\":\"irrigator-controller\",\"version\":\"v1.0.1\"}}}}",
        board.ntp_synchronized(),
        t.year, t.month, t.day, t.dotw, t.hour, t.min, t.sec,
        board.irrigator_is_on(),
        schedule_array_json(&board.schedules()),
        reading.humidity,
        reading.temperature,
        board.has_internet(),
        board.ip_address(),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Board;
    use crate::signal::LatestListener;

    fn board() -> (Board, LatestListener<IrrigatorCommand>) {
        Board::new()
    }

    fn post(path: &str, body: &str) -> String {
        format!(
            "POST {path} HTTP/1.1\r\nHost: device\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
    }

    fn get(path: &str) -> String {
        format!("GET {path} HTTP/1.1\r\nHost: device\r\n\r\n")
    }

    #[test]
    fn root_reports_identity_and_time() {
        let (board, _rx) = board();
        let response = route(&board, &get("/"));
        assert_eq!(response.status, 200);
        assert!(response.body.contains("\"hardwareVersion\": \"BitDogLab V6.3\""));
        assert!(response.body.contains("\"year\": 2024"));
    }

    #[test]
    fn unknown_path_is_404() {
        let (board, _rx) = board();
        let response = route(&board, &get("/nope"));
        assert_eq!(response.status, 404);
        assert_eq!(response.body, r#"{"error": "not found"}"#);

        // Known path, wrong method.
        let response = route(&board, &post("/", "{}"));
        assert_eq!(response.status, 404);
    }

    #[test]
    fn serial_accepts_fields_and_raw_fallback() {
        let (board, _rx) = board();
        let response = route(
            &board,
            &post("/serial", r#"{"author": "ana", "message": "oi"}"#),
        );
        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"{"status": "received"}"#);

        // Unparseable body still accepted as a raw message.
        let response = route(&board, &post("/serial", "plain text"));
        assert_eq!(response.status, 200);

        // No body delimiter at all.
        let response = route(&board, "POST /serial HTTP/1.1\r\nHost: device\r\n");
        assert_eq!(response.status, 400);
        assert_eq!(response.body, r#"{"error": "no body"}"#);
    }

    #[test]
    fn clock_commit_and_rejection() {
        let (board, _rx) = board();
        let response = route(
            &board,
            &post(
                "/clock",
                r#"{"year":2026,"month":8,"day":29,"hour":15,"min":4,"sec":30}"#,
            ),
        );
        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"{"status": "clock updated"}"#);
        let now = board.now().unwrap();
        assert_eq!((now.year, now.month, now.day), (2026, 8, 29));

        let response = route(&board, &post("/clock", r#"{"year":2026,"month":2,"day":31}"#));
        assert_eq!(response.status, 400);
        assert_eq!(response.body, r#"{"status": "invalid datetime"}"#);
    }

    #[test]
    fn schedule_write_then_read_round_trip() {
        let (board, _rx) = board();
        let response = route(
            &board,
            &post(
                "/schedule",
                r#"{"index":2,"hour":6,"minute":30,"duration":120,"active":1}"#,
            ),
        );
        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"{"status": "schedule updated"}"#);

        let response = route(&board, &get("/schedule"));
        assert_eq!(response.status, 200);
        assert!(response
            .body
            .contains(r#"{"index":2,"hour":6,"minute":30,"duration":120,"active":1}"#));
        assert!(response
            .body
            .contains(r#"{"index":0,"hour":0,"minute":0,"duration":0,"active":0}"#));
    }

    #[test]
    fn schedule_rejects_bad_index() {
        let (board, _rx) = board();
        for body in [r#"{"index":4,"hour":1}"#, r#"{"index":-1,"hour":1}"#, r#"{"hour":1}"#] {
            let response = route(&board, &post("/schedule", body));
            assert_eq!(response.status, 400);
            assert_eq!(response.body, r#"{"error": "invalid index"}"#);
        }
    }

    #[tokio::test]
    async fn irrigator_signals_supervisor_with_clamped_duration() {
        let (board, mut rx) = board();
        let response = route(&board, &post("/irrigator", r#"{"active":true,"duration":1000}"#));
        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"{"status": "irrigator on"}"#);
        assert_eq!(
            rx.next().await,
            Some(IrrigatorCommand::On {
                duration_secs: MAX_RUN_SECS,
                origin: CommandOrigin::Remote,
            })
        );

        let response = route(&board, &post("/irrigator", r#"{"active":false}"#));
        assert_eq!(response.body, r#"{"status": "irrigator off"}"#);
        assert_eq!(
            rx.next().await,
            Some(IrrigatorCommand::Off {
                origin: CommandOrigin::Remote,
            })
        );
    }

    #[test]
    fn status_is_byte_identical_for_unchanged_state() {
        let (board, _rx) = board();
        let t = DeviceTime {
            year: 2026,
            month: 8,
            day: 29,
            hour: 12,
            ..DeviceTime::default()
        };

        board.commit_time(t);
        let first = route(&board, &get("/status")).body;
        board.commit_time(t);
        let second = route(&board, &get("/status")).body;
        assert_eq!(first, second);

        assert!(first.contains("\"synchronizedNTP\":false"));
        assert!(first.contains("\"hasInternetConnection\":false"));
        assert!(first.contains("\"temperature\":0.00"));
    }

    #[test]
    fn data_aggregates_board_and_modules() {
        let (board, _rx) = board();
        board.set_ip_address("192.168.0.42".to_string());
        let body = route(&board, &get("/data")).body;
        assert!(body.contains("\"model\":\"BitDogLab\""));
        assert!(body.contains("\"ip\":\"192.168.0.42\""));
        assert!(body.contains("\"schedule\":["));
    }

    #[tokio::test]
    async fn connection_reassembles_split_request() {
        let (board, _rx) = board();
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let handler = tokio::spawn(handle_connection(server, board));

        let raw = post("/schedule", r#"{"index":1,"hour":7,"minute":0,"duration":90,"active":1}"#);
        let (first, second) = raw.split_at(20);
        client.write_all(first.as_bytes()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        client.write_all(second.as_bytes()).await.unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        let reply = String::from_utf8(reply).unwrap();
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.ends_with(r#"{"status": "schedule updated"}"#));
        handler.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_request_is_rejected() {
        let (board, _rx) = board();
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(handle_connection(server, board));

        let huge = post("/serial", &"x".repeat(RX_BUFFER_SIZE * 2));
        client.write_all(huge.as_bytes()).await.unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        let reply = String::from_utf8(reply).unwrap();
        assert!(reply.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }
}
