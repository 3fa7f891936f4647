//! Unix Socket Server
//!
//! Line-delimited JSON requests from `tmuctl` and other local clients.
//!
//! # Limits
//! - **Connections**: at most [`MAX_CONNECTIONS`] clients at once
//! - **Messages**: requests larger than the protocol maximum are rejected
//!   before they are buffered
//! - **Timeouts**: idle readers and stalled writers are dropped
//!
//! Requests run on the blocking pool since every one of them touches the
//! register window or a device lock.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::bail;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use tmu_core::{DeviceRegistry, DeviceSnapshot, Lifecycle, ThermalDevice};
use tmu_protocol::{
    DeviceStatus, InterruptCounters, Request, RequestEnvelope, Response, ResponseData,
    ResponseEnvelope, ZoneInfo,
};

// ============================================================================
// Limits
// ============================================================================

/// Maximum concurrent client connections
const MAX_CONNECTIONS: usize = 64;

/// Maximum message size in bytes
const MAX_MESSAGE_SIZE: usize = tmu_protocol::MAX_MESSAGE_SIZE;

/// Read timeout per message
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Write timeout per message
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Owner and group may talk to the daemon
const SOCKET_MODE: u32 = 0o660;

static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

async fn read_line_bounded<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(0);
        }

        let mut take_len = available.len();
        let mut found_newline = false;
        if let Some(pos) = available.iter().position(|b| *b == b'\n') {
            take_len = pos + 1;
            found_newline = true;
        }

        let remaining = max_len.saturating_sub(out.len());
        if take_len > remaining {
            let consume_len = remaining.min(available.len());
            reader.consume(consume_len);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Message too large",
            ));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if found_newline {
            return Ok(out.len());
        }
    }
}

pub async fn run_server(
    socket_path: &str,
    registry: Arc<DeviceRegistry>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let path = Path::new(socket_path);

    if path.exists() {
        let metadata = path.symlink_metadata()?;
        if metadata.file_type().is_symlink() {
            bail!("socket path {} is a symlink, refusing to remove it", socket_path);
        }
        std::fs::remove_file(path)?;
        debug!("Removed existing socket file");
    }

    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))?;

    info!("Listening on {} (mode {:o})", socket_path, SOCKET_MODE);
    info!("Limits: max_conn={}, max_msg={}", MAX_CONNECTIONS, MAX_MESSAGE_SIZE);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let current = ACTIVE_CONNECTIONS.load(Ordering::SeqCst);
                        if current >= MAX_CONNECTIONS {
                            warn!("Connection limit reached ({}), rejecting new connection", current);
                            drop(stream);
                            continue;
                        }

                        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::SeqCst);
                        let registry = Arc::clone(&registry);
                        tokio::spawn(async move {
                            handle_client(stream, registry).await;
                            ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    let _ = std::fs::remove_file(socket_path);
    info!("Server stopped");
    Ok(())
}

/// Serve one client until it disconnects or misbehaves
async fn handle_client(stream: UnixStream, registry: Arc<DeviceRegistry>) {
    let (uid, pid) = match stream.peer_cred() {
        Ok(cred) => (cred.uid(), cred.pid().unwrap_or(-1)),
        Err(e) => {
            error!("Failed to get peer credentials: {}", e);
            return;
        }
    };
    debug!("Connection from uid={}, pid={}", uid, pid);

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(MAX_MESSAGE_SIZE);
    let mut request_count: u64 = 0;
    let connection_start = Instant::now();

    loop {
        let read_result = timeout(
            READ_TIMEOUT,
            read_line_bounded(&mut reader, &mut line, MAX_MESSAGE_SIZE),
        )
        .await;

        match read_result {
            Ok(Ok(0)) => {
                debug!(
                    "Client disconnected: uid={}, pid={}, requests={}, duration={:?}",
                    uid,
                    pid,
                    request_count,
                    connection_start.elapsed()
                );
                break;
            }
            Ok(Ok(n)) => {
                request_count += 1;
                trace!("Request #{} from uid={}: {} bytes", request_count, uid, n);

                let line_str = match std::str::from_utf8(&line) {
                    Ok(s) => s,
                    Err(e) => {
                        debug!("Non-UTF8 request from uid={}: {}", uid, e);
                        let envelope =
                            ResponseEnvelope::new(0, Response::error("Invalid request encoding"));
                        let _ = send_response(&mut writer, &envelope).await;
                        break;
                    }
                };

                let envelope = process_request(line_str, &registry).await;
                if send_response(&mut writer, &envelope).await.is_err() {
                    break;
                }
            }
            Ok(Err(e)) => {
                if e.kind() == std::io::ErrorKind::InvalidData {
                    warn!(
                        "Message too large (>{} bytes) from uid={}, pid={}",
                        MAX_MESSAGE_SIZE, uid, pid
                    );
                    let envelope = ResponseEnvelope::new(0, Response::error("Message too large"));
                    let _ = send_response(&mut writer, &envelope).await;
                } else {
                    error!("Read error from uid={}, pid={}: {}", uid, pid, e);
                }
                break;
            }
            Err(_) => {
                debug!("Read timeout for uid={}, pid={}", uid, pid);
                let envelope = ResponseEnvelope::new(0, Response::error("Read timeout"));
                let _ = send_response(&mut writer, &envelope).await;
                break;
            }
        }
    }
}

/// Send response with timeout
async fn send_response(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    envelope: &ResponseEnvelope,
) -> Result<(), ()> {
    let response_json = serde_json::to_string(envelope).unwrap_or_else(|_| {
        r#"{"id":0,"status":"error","message":"Serialization error"}"#.to_string()
    });

    let write_result = timeout(WRITE_TIMEOUT, async {
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        Ok::<_, std::io::Error>(())
    })
    .await;

    match write_result {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => {
            error!("Write error: {}", e);
            Err(())
        }
        Err(_) => {
            error!("Write timeout");
            Err(())
        }
    }
}

async fn process_request(line: &str, registry: &Arc<DeviceRegistry>) -> ResponseEnvelope {
    let envelope: RequestEnvelope = match serde_json::from_str(line.trim()) {
        Ok(e) => e,
        Err(e) => {
            debug!("Invalid JSON: {}", e);
            return ResponseEnvelope::new(0, Response::error("Invalid request format"));
        }
    };

    let request_id = envelope.id;
    let request = envelope.request;

    if let Err(e) = request.validate() {
        warn!("Request validation failed: {}", e);
        return ResponseEnvelope::new(request_id, Response::error(e));
    }

    debug!("Processing {} (id={})", request.type_name(), request_id);

    let registry = Arc::clone(registry);
    let response = match tokio::task::spawn_blocking(move || dispatch(&registry, request)).await {
        Ok(response) => response,
        Err(e) => {
            error!("Request task failed: {}", e);
            Response::error("Internal error")
        }
    };

    ResponseEnvelope::new(request_id, response)
}

// ============================================================================
// Request Handlers
// ============================================================================

fn dispatch(registry: &DeviceRegistry, request: Request) -> Response {
    match request {
        Request::Ping => Response::ok_string("pong"),

        Request::Version => Response::ok_string(env!("CARGO_PKG_VERSION")),

        Request::ListZones => {
            let zones = registry.snapshots().iter().map(zone_info).collect();
            Response::Ok(ResponseData::zone_list(zones))
        }

        Request::ReadTemperature { zone } => {
            with_device(registry, &zone, |device| device.read_temperature().map(Response::ok_temp))
        }

        Request::ReadChannel { zone, channel } => with_device(registry, &zone, |device| {
            device
                .read_channel_temperature(channel as usize)
                .map(Response::ok_temp)
        }),

        Request::SetEmulation { zone, millicelsius } => with_device(registry, &zone, |device| {
            device.set_emulation(millicelsius)?;
            info!(zone = %zone, millicelsius, "Emulation updated");
            Ok(Response::ok())
        }),

        Request::GetState { zone } => {
            with_device(registry, &zone, |device| Ok(Response::Ok(ResponseData::status(device_status(device)))))
        }

        Request::Suspend => {
            registry.suspend_all();
            Response::ok()
        }

        Request::Resume => match registry.resume_all() {
            Ok(()) => Response::ok(),
            Err(e) => Response::error(e.to_string()),
        },
    }
}

fn with_device(
    registry: &DeviceRegistry,
    zone: &str,
    f: impl FnOnce(&ThermalDevice) -> tmu_core::Result<Response>,
) -> Response {
    let device = match registry.get(zone) {
        Ok(device) => device,
        Err(e) => return Response::error(e.to_string()),
    };
    f(&device).unwrap_or_else(|e| Response::error(e.to_string()))
}

fn channels(mask: u8) -> Vec<u8> {
    (0..8).filter(|ch| mask & (1 << ch) != 0).collect()
}

fn stage_name(stage: Lifecycle) -> &'static str {
    match stage {
        Lifecycle::Uninitialized => "uninitialized",
        Lifecycle::Initialized => "initialized",
        Lifecycle::Enabled => "enabled",
        Lifecycle::Suspended => "suspended",
        Lifecycle::Removed => "removed",
    }
}

fn zone_info(snapshot: &DeviceSnapshot) -> ZoneInfo {
    ZoneInfo {
        id: snapshot.id,
        name: snapshot.name.clone(),
        variant: snapshot.variant.clone(),
        channels: channels(snapshot.sensors),
        aggregation: snapshot.aggregation.clone(),
        passive: snapshot.passive,
        cooling: snapshot.cooling.to_string(),
    }
}

fn device_status(device: &ThermalDevice) -> DeviceStatus {
    let snapshot = device.snapshot();
    let stats = device.irq_stats();
    DeviceStatus {
        id: snapshot.id,
        name: snapshot.name,
        variant: snapshot.variant,
        stage: stage_name(snapshot.state.stage).to_string(),
        enabled: snapshot.state.enabled,
        suspended: snapshot.state.suspended,
        passive: snapshot.passive,
        cooling: snapshot.cooling.to_string(),
        emulation_mc: snapshot.state.emulation_mc,
        hotplug_parked: snapshot.state.hotplug_parked,
        last_temperature_mc: snapshot.last_temperature_mc,
        interrupts: InterruptCounters {
            fired: stats.fired,
            coalesced: stats.coalesced,
            handled: stats.handled,
        },
    }
}
