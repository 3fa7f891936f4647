/*
 * This file is part of tmuctl.
 *
 * Copyright (C) 2025 TMU tools contributors
 *
 * tmuctl is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * tmuctl is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with tmuctl. If not, see <https://www.gnu.org/licenses/>.
 */

//! Daemon Client
//!
//! One blocking connection to `tmud`. Every request is validated locally,
//! wrapped in an envelope with a fresh id, and the reply is checked against
//! that id and the shape the request expects.

use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, trace};

use tmu_error::{Result, TmuError};
use tmu_protocol::{generate_request_id, Request, RequestEnvelope, Response, ResponseEnvelope};

const TIMEOUT: Duration = Duration::from_secs(5);

const MAX_MESSAGE_SIZE: usize = tmu_protocol::MAX_MESSAGE_SIZE;

pub struct DaemonClient {
    socket_path: PathBuf,
    writer: UnixStream,
    reader: BufReader<UnixStream>,
}

impl DaemonClient {
    pub fn connect(socket_path: impl AsRef<Path>) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();
        if !socket_path.exists() {
            return Err(TmuError::DaemonNotAvailable);
        }

        let stream = UnixStream::connect(&socket_path).map_err(|e| {
            TmuError::DaemonConnection(format!("{}: {}", socket_path.display(), e))
        })?;
        stream.set_read_timeout(Some(TIMEOUT))?;
        stream.set_write_timeout(Some(TIMEOUT))?;
        let reader = BufReader::new(stream.try_clone()?);

        debug!(socket = %socket_path.display(), "Connected to daemon");
        Ok(Self {
            socket_path,
            writer: stream,
            reader,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send one request and wait for its reply
    pub fn request(&mut self, req: Request) -> Result<Response> {
        req.validate().map_err(TmuError::InvalidArgument)?;

        let request_id = generate_request_id();
        let envelope = RequestEnvelope::with_id(req, request_id);

        let mut json = serde_json::to_vec(&envelope)?;
        json.push(b'\n');
        if json.len() > MAX_MESSAGE_SIZE {
            return Err(TmuError::MessageTooLarge {
                size: json.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }

        self.writer
            .write_all(&json)
            .map_err(|e| TmuError::DaemonRequest(format!("send failed: {}", e)))?;
        trace!(id = request_id, bytes = json.len(), "Request sent");

        // One byte past the limit tells an oversized reply from a full one
        let mut response_buf = Vec::with_capacity(1024);
        (&mut self.reader)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_until(b'\n', &mut response_buf)
            .map_err(|e| TmuError::DaemonRequest(format!("receive failed: {}", e)))?;

        if response_buf.is_empty() {
            return Err(TmuError::DaemonConnection("daemon closed connection".into()));
        }
        if response_buf.len() > MAX_MESSAGE_SIZE {
            return Err(TmuError::MessageTooLarge {
                size: response_buf.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }
        if response_buf.last() == Some(&b'\n') {
            response_buf.pop();
        }

        let reply: ResponseEnvelope = serde_json::from_slice(&response_buf)
            .map_err(|e| TmuError::IpcProtocol(format!("malformed response: {}", e)))?;

        if reply.id != request_id {
            return Err(TmuError::IpcProtocol(format!(
                "response id mismatch: expected {}, got {}",
                request_id, reply.id
            )));
        }

        verify_response_type(&envelope.request, &reply.response)?;
        Ok(reply.response)
    }

    /// Like [`request`](Self::request), with daemon-side errors folded into `Err`
    pub fn call(&mut self, req: Request) -> Result<tmu_protocol::ResponseData> {
        match self.request(req)? {
            Response::Ok(data) => Ok(data),
            Response::Error { message } => Err(TmuError::DaemonRequest(message)),
        }
    }
}

fn verify_response_type(req: &Request, resp: &Response) -> Result<()> {
    let data = match resp {
        Response::Error { .. } => return Ok(()),
        Response::Ok(data) => data,
    };

    let valid = match req {
        Request::Ping | Request::Version => data.value.is_some(),
        Request::ListZones => data.zones.is_some(),
        Request::ReadTemperature { .. } | Request::ReadChannel { .. } => {
            data.millicelsius.is_some()
        }
        Request::GetState { .. } => data.state.is_some(),
        Request::SetEmulation { .. } | Request::Suspend | Request::Resume => true,
    };

    if !valid {
        return Err(TmuError::IpcProtocol(format!(
            "response type mismatch for {}",
            req.type_name()
        )));
    }
    Ok(())
}
