/*
 * Integration tests for tmuctl
 *
 * A scripted daemon listens on a socket in a temporary directory and
 * answers each request line with a reply built by the test.
 */

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use tempfile::TempDir;
use tmu_error::TmuError;
use tmu_protocol::{
    DeviceStatus, InterruptCounters, Request, RequestEnvelope, Response, ResponseData,
    ResponseEnvelope, ZoneInfo,
};
use tmuctl::DaemonClient;

/// Serve one connection; `reply` maps each request to the raw reply line
fn fake_daemon<F>(reply: F) -> (TempDir, PathBuf, JoinHandle<Vec<Request>>)
where
    F: Fn(RequestEnvelope) -> String + Send + 'static,
{
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tmud.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        let reader = BufReader::new(stream);
        let mut seen = Vec::new();
        for line in reader.lines() {
            let line = line.unwrap();
            let envelope: RequestEnvelope = serde_json::from_str(&line).unwrap();
            seen.push(envelope.request.clone());
            let mut out = reply(envelope);
            out.push('\n');
            writer.write_all(out.as_bytes()).unwrap();
        }
        seen
    });

    (dir, path, handle)
}

fn answer(envelope: RequestEnvelope, response: Response) -> String {
    serde_json::to_string(&ResponseEnvelope::new(envelope.id, response)).unwrap()
}

#[test]
fn test_round_trip_over_socket() {
    let (_dir, path, handle) = fake_daemon(|env| {
        let response = match &env.request {
            Request::Ping => Response::ok_string("pong"),
            Request::ReadTemperature { .. } => Response::ok_temp(47_000),
            Request::SetEmulation { .. } => Response::ok(),
            Request::ListZones => Response::Ok(ResponseData::zone_list(vec![ZoneInfo {
                id: 0,
                name: "cpu".into(),
                variant: "samsung,exynos8890-tmu".into(),
                channels: vec![0],
                aggregation: "passthrough".into(),
                passive: false,
                cooling: "cpufreq".into(),
            }])),
            _ => Response::error("unsupported"),
        };
        answer(env, response)
    });

    let mut client = DaemonClient::connect(&path).unwrap();
    assert_eq!(client.call(Request::Ping).unwrap().value.as_deref(), Some("pong"));
    assert_eq!(
        client
            .call(Request::ReadTemperature { zone: "cpu".into() })
            .unwrap()
            .millicelsius,
        Some(47_000)
    );
    client
        .call(Request::SetEmulation { zone: "cpu".into(), millicelsius: 0 })
        .unwrap();
    let zones = client.call(Request::ListZones).unwrap().zones.unwrap();
    assert_eq!(zones[0].name, "cpu");

    let err = client.call(Request::Suspend).unwrap_err();
    assert!(matches!(err, TmuError::DaemonRequest(ref m) if m == "unsupported"));

    drop(client);
    let seen = handle.join().unwrap();
    assert_eq!(seen.len(), 5);
    assert_eq!(seen[0], Request::Ping);
}

#[test]
fn test_invalid_request_never_leaves_client() {
    let (_dir, path, handle) = fake_daemon(|env| answer(env, Response::ok()));

    let mut client = DaemonClient::connect(&path).unwrap();
    let err = client
        .request(Request::SetEmulation { zone: "cpu".into(), millicelsius: 500 })
        .unwrap_err();
    assert!(matches!(err, TmuError::InvalidArgument(_)));
    let err = client
        .request(Request::ReadChannel { zone: "cpu".into(), channel: 8 })
        .unwrap_err();
    assert!(matches!(err, TmuError::InvalidArgument(_)));

    drop(client);
    assert!(handle.join().unwrap().is_empty());
}

#[test]
fn test_mismatched_reply_id_is_rejected() {
    let (_dir, path, handle) = fake_daemon(|env| {
        serde_json::to_string(&ResponseEnvelope::new(env.id + 1000, Response::ok_string("pong")))
            .unwrap()
    });

    let mut client = DaemonClient::connect(&path).unwrap();
    let err = client.request(Request::Ping).unwrap_err();
    assert!(matches!(err, TmuError::IpcProtocol(_)));

    drop(client);
    handle.join().unwrap();
}

#[test]
fn test_reply_shape_is_checked() {
    let (_dir, path, handle) = fake_daemon(|env| answer(env, Response::ok()));

    let mut client = DaemonClient::connect(&path).unwrap();
    let err = client.request(Request::GetState { zone: "cpu".into() }).unwrap_err();
    assert!(matches!(err, TmuError::IpcProtocol(_)));

    drop(client);
    handle.join().unwrap();
}

#[test]
fn test_oversized_reply_is_rejected() {
    let (_dir, path, handle) = fake_daemon(|env| {
        answer(env, Response::ok_string("x".repeat(tmu_protocol::MAX_MESSAGE_SIZE)))
    });

    let mut client = DaemonClient::connect(&path).unwrap();
    let err = client.request(Request::Version).unwrap_err();
    assert!(matches!(err, TmuError::MessageTooLarge { .. }));

    drop(client);
    let _ = handle.join();
}

#[test]
fn test_state_reply_decodes() {
    let (_dir, path, handle) = fake_daemon(|env| {
        answer(
            env,
            Response::Ok(ResponseData::status(DeviceStatus {
                id: 2,
                name: "isp".into(),
                variant: "samsung,exynos8895-tmu".into(),
                stage: "suspended".into(),
                enabled: false,
                suspended: true,
                passive: false,
                cooling: "isp".into(),
                emulation_mc: None,
                hotplug_parked: None,
                last_temperature_mc: None,
                interrupts: InterruptCounters::default(),
            })),
        )
    });

    let mut client = DaemonClient::connect(&path).unwrap();
    let state = client.call(Request::GetState { zone: "isp".into() }).unwrap().state.unwrap();
    assert!(state.suspended);
    assert_eq!(state.stage, "suspended");

    drop(client);
    handle.join().unwrap();
}
