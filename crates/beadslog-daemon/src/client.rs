//! Daemon client: socket discovery, health probing, typed calls.

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::{DaemonError, Result};
use crate::events::{EventFilter, MutationEvent};
use crate::server::HealthData;
use crate::wire::{Request, Response, read_frame, write_frame};

/// Read timeout for the quick health probe.
pub const HEALTH_TIMEOUT: Duration = Duration::from_millis(200);

/// Read timeout for regular operations.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Health information with the client-side compatibility verdict.
#[derive(Debug, Clone)]
pub struct HealthInfo {
    pub version: String,
    pub uptime_secs: u64,
    pub pid: u32,
    /// True iff the daemon's build version matches this client's.
    pub compatible: bool,
}

/// A connection to the workspace daemon.
#[derive(Debug)]
pub struct DaemonClient {
    stream: UnixStream,
    socket_path: PathBuf,
}

impl DaemonClient {
    /// Connects to the daemon socket.
    ///
    /// Unix domain connects either succeed or fail immediately
    /// (`ECONNREFUSED`/`ENOENT` when nothing is listening), so the dial
    /// itself needs no timer; roundtrip timeouts guard the reads.
    pub fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .map_err(|e| DaemonError::Unavailable(format!("{}: {e}", socket_path.display())))?;
        stream
            .set_read_timeout(Some(CALL_TIMEOUT))
            .map_err(|e| DaemonError::Wire(e.to_string()))?;
        Ok(Self {
            stream,
            socket_path: socket_path.to_path_buf(),
        })
    }

    /// The socket this client is attached to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Sends one request and returns the response's data payload.
    ///
    /// Wire errors become [`DaemonError::Unavailable`]; the
    /// unknown-operation sentinel becomes [`DaemonError::UnknownOperation`];
    /// any other server-side failure surfaces as [`DaemonError::Remote`].
    pub fn call(&mut self, op: &str, args: Value) -> Result<Value> {
        let request = Request { op: op.to_owned(), args };
        write_frame(&mut self.stream, &request)
            .map_err(|e| DaemonError::Unavailable(e.to_string()))?;

        let response: Response = read_frame(&mut self.stream)
            .map_err(|e| DaemonError::Unavailable(e.to_string()))?
            .ok_or_else(|| DaemonError::Unavailable("daemon closed the connection".into()))?;

        if response.success {
            return Ok(response.data);
        }
        if response.is_unknown_operation() {
            return Err(DaemonError::UnknownOperation(op.to_owned()));
        }
        Err(DaemonError::Remote(
            response.error.unwrap_or_else(|| "unspecified error".into()),
        ))
    }

    /// Runs the health probe under the short probe timeout.
    pub fn health(&mut self) -> Result<HealthData> {
        self.stream
            .set_read_timeout(Some(HEALTH_TIMEOUT))
            .map_err(|e| DaemonError::Wire(e.to_string()))?;
        let result = self.call("health", Value::Null);
        let _ = self.stream.set_read_timeout(Some(CALL_TIMEOUT));

        let data = result?;
        Ok(serde_json::from_value(data)?)
    }

    /// Probes health and computes the compatibility verdict against the
    /// client's own version.
    pub fn health_info(&mut self, client_version: &str) -> Result<HealthInfo> {
        let data = self.health()?;
        let compatible = data.version == client_version;
        Ok(HealthInfo {
            version: data.version,
            uptime_secs: data.uptime_secs,
            pid: data.pid,
            compatible,
        })
    }

    /// Requests a graceful shutdown. Errors are reported but the daemon
    /// may already be gone.
    pub fn request_shutdown(&mut self) -> Result<()> {
        self.call("shutdown", Value::Null)?;
        Ok(())
    }

    /// Subscribes to the mutation event stream. This consumes the
    /// connection: the daemon switches it to server-streaming mode.
    pub fn subscribe(mut self, filter: EventFilter, history: usize) -> Result<EventStream> {
        let args = serde_json::json!({ "filter": filter, "history": history });
        let request = Request {
            op: "events.subscribe".to_owned(),
            args,
        };
        write_frame(&mut self.stream, &request)
            .map_err(|e| DaemonError::Unavailable(e.to_string()))?;

        let ack: Response = read_frame(&mut self.stream)
            .map_err(|e| DaemonError::Unavailable(e.to_string()))?
            .ok_or_else(|| DaemonError::Unavailable("daemon closed the connection".into()))?;
        if !ack.success {
            return Err(DaemonError::Remote(
                ack.error.unwrap_or_else(|| "subscribe rejected".into()),
            ));
        }

        Ok(EventStream {
            stream: self.stream,
        })
    }
}

/// Server-streamed mutation events.
pub struct EventStream {
    stream: UnixStream,
}

impl EventStream {
    /// Waits up to `timeout` for the next event.
    ///
    /// `Ok(None)` means the window elapsed without an event; a closed
    /// connection is an error.
    pub fn next_timeout(&mut self, timeout: Duration) -> Result<Option<MutationEvent>> {
        self.stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| DaemonError::Wire(e.to_string()))?;

        match read_frame::<_, MutationEvent>(&mut self.stream) {
            Ok(Some(event)) => {
                debug!(issue = %event.issue_id, kind = %event.event_type, "event received");
                Ok(Some(event))
            }
            Ok(None) => Err(DaemonError::Unavailable(
                "event stream closed by daemon".into(),
            )),
            Err(DaemonError::Wire(message))
                if message.contains("timed out")
                    || message.contains("would block")
                    || message.contains("Resource temporarily unavailable") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Checks whether a socket is ready: a dial succeeds and a trivial
/// roundtrip returns without error.
pub fn socket_is_ready(socket_path: &Path) -> bool {
    match DaemonClient::connect(socket_path) {
        Ok(mut client) => client.health().is_ok(),
        Err(_) => false,
    }
}
