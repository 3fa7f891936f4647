use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global request ID counter for correlation
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Maximum message size for IPC (8KB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// Maximum zone name length
pub const MAX_ZONE_NAME_LENGTH: usize = 64;

/// Physical channels per TMU instance
pub const MAX_CHANNELS: u8 = 8;

/// Smallest non-zero emulation value (m°C)
pub const MIN_EMULATION_MC: i32 = 1_000;

/// Largest emulation value (m°C)
pub const MAX_EMULATION_MC: i32 = 125_000;

/// Generate a unique request ID for correlation
pub fn generate_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation and debugging
    pub id: u64,
    /// The actual request
    #[serde(flatten)]
    pub request: Request,
}

impl RequestEnvelope {
    pub fn new(request: Request) -> Self {
        Self {
            id: generate_request_id(),
            request,
        }
    }

    pub fn with_id(request: Request, id: u64) -> Self {
        Self { id, request }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum Request {
    Ping,
    Version,
    ListZones,
    ReadTemperature { zone: String },
    /// One physical channel, converted with its own trim
    ReadChannel { zone: String, channel: u8 },
    /// 0 releases the override
    SetEmulation { zone: String, millicelsius: i32 },
    GetState { zone: String },
    /// Run the suspend notifier and stop every device
    Suspend,
    Resume,
}

impl Request {
    /// Validate request parameters before sending to daemon
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Request::Ping
            | Request::Version
            | Request::ListZones
            | Request::Suspend
            | Request::Resume => Ok(()),

            Request::ReadTemperature { zone } | Request::GetState { zone } => {
                validate_zone_name(zone)
            }

            Request::ReadChannel { zone, channel } => {
                validate_zone_name(zone)?;
                validate_channel(*channel)?;
                Ok(())
            }

            Request::SetEmulation { zone, millicelsius } => {
                validate_zone_name(zone)?;
                validate_emulation(*millicelsius)?;
                Ok(())
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::Ping => "Ping",
            Request::Version => "Version",
            Request::ListZones => "ListZones",
            Request::ReadTemperature { .. } => "ReadTemperature",
            Request::ReadChannel { .. } => "ReadChannel",
            Request::SetEmulation { .. } => "SetEmulation",
            Request::GetState { .. } => "GetState",
            Request::Suspend => "Suspend",
            Request::Resume => "Resume",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to
    pub id: u64,
    /// The actual response
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: u64, response: Response) -> Self {
        Self { id, response }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(ResponseData),
    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub millicelsius: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zones: Option<Vec<ZoneInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<DeviceStatus>,
}

impl ResponseData {
    pub fn none() -> Self { Self::default() }
    pub fn string(v: String) -> Self { Self { value: Some(v), ..Self::default() } }
    pub fn temperature(mc: i32) -> Self { Self { millicelsius: Some(mc), ..Self::default() } }
    pub fn zone_list(z: Vec<ZoneInfo>) -> Self { Self { zones: Some(z), ..Self::default() } }
    pub fn status(s: DeviceStatus) -> Self { Self { state: Some(s), ..Self::default() } }
}

/// One registered device as listed by `ListZones`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneInfo {
    pub id: u32,
    pub name: String,
    pub variant: String,
    pub channels: Vec<u8>,
    pub aggregation: String,
    pub passive: bool,
    pub cooling: String,
}

/// Device state as returned by `GetState`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub id: u32,
    pub name: String,
    pub variant: String,
    pub stage: String,
    pub enabled: bool,
    pub suspended: bool,
    pub passive: bool,
    pub cooling: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emulation_mc: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hotplug_parked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_temperature_mc: Option<i32>,
    pub interrupts: InterruptCounters,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptCounters {
    pub fired: u64,
    pub coalesced: u64,
    pub handled: u64,
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(ResponseData::none())
    }

    pub fn ok_string(s: impl Into<String>) -> Self {
        Response::Ok(ResponseData::string(s.into()))
    }

    pub fn ok_temp(mc: i32) -> Self {
        Response::Ok(ResponseData::temperature(mc))
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error { message: msg.into() }
    }
}

pub fn validate_zone_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Zone name cannot be empty".into());
    }

    if name.len() > MAX_ZONE_NAME_LENGTH {
        return Err(format!(
            "Zone name too long: {} > {} chars",
            name.len(),
            MAX_ZONE_NAME_LENGTH
        ));
    }

    for c in name.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
            return Err(format!("Zone name contains invalid character: {:?}", c));
        }
    }

    Ok(())
}

pub fn validate_channel(channel: u8) -> Result<(), String> {
    if channel >= MAX_CHANNELS {
        return Err(format!("Channel out of range (0-{})", MAX_CHANNELS - 1));
    }
    Ok(())
}

pub fn validate_emulation(millicelsius: i32) -> Result<(), String> {
    if millicelsius == 0 {
        return Ok(());
    }
    if !(MIN_EMULATION_MC..=MAX_EMULATION_MC).contains(&millicelsius) {
        return Err(format!(
            "Emulation must be 0 or {}-{} m°C",
            MIN_EMULATION_MC, MAX_EMULATION_MC
        ));
    }
    Ok(())
}
