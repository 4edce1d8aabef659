use std::net::UdpSocket;
use std::time::{SystemTime, UNIX_EPOCH};

use streamhost_core::log::{Level, LogSink};

/// GELF severity levels (syslog-compatible).
#[repr(u8)]
#[derive(Clone, Copy)]
pub enum GelfLevel {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Informational = 6,
    Debug = 7,
}

impl From<Level> for GelfLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Fatal => GelfLevel::Critical,
            Level::Error => GelfLevel::Error,
            Level::Warn => GelfLevel::Warning,
            Level::Info => GelfLevel::Informational,
            Level::Debug => GelfLevel::Debug,
        }
    }
}

/// Fire-and-forget GELF UDP logger.
///
/// Wraps a non-blocking `UdpSocket` pre-connected to the GELF target.
/// Send failures are silently ignored — logging must never block or crash
/// the poll thread.
pub struct GelfLogger {
    socket: UdpSocket,
    hostname: String,
}

impl GelfLogger {
    /// Create a new GELF logger targeting `addr` (e.g. `"172.17.0.1:12201"`).
    pub fn new(addr: &str) -> Result<Self, String> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(|e| format!("GELF bind: {e}"))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| format!("GELF nonblocking: {e}"))?;
        socket
            .connect(addr)
            .map_err(|e| format!("GELF connect to {addr}: {e}"))?;

        let hostname =
            std::env::var("HOSTNAME").unwrap_or_else(|_| "streamhost-host".to_string());

        Ok(Self { socket, hostname })
    }

    /// Send a GELF message. Extra fields are added as `_key` entries.
    /// This is fire-and-forget: errors are silently ignored.
    pub fn send(&self, level: GelfLevel, short_message: &str, extra: &[(&str, &str)]) {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let mut msg = serde_json::json!({
            "version": "1.1",
            "host": self.hostname,
            "short_message": short_message,
            "timestamp": ts,
            "level": level as u8,
        });

        if let Some(obj) = msg.as_object_mut() {
            for &(k, v) in extra {
                obj.insert(format!("_{k}"), serde_json::Value::String(v.to_string()));
            }
        }

        let payload = msg.to_string();
        let _ = self.socket.send(payload.as_bytes());
    }
}

/// Dual sink: every message goes to stderr (via [`crate::gelf`]'s own
/// `eprintln!`) and, best-effort, to GELF. Implements
/// [`streamhost_core::log::LogSink`] so it drops straight into
/// [`streamhost_core::group_host::ConsumerGroupHost::new`].
pub struct GelfLogSink {
    gelf: GelfLogger,
}

impl GelfLogSink {
    pub fn new(addr: &str) -> Result<Self, String> {
        Ok(Self {
            gelf: GelfLogger::new(addr)?,
        })
    }
}

impl LogSink for GelfLogSink {
    fn log(&self, level: Level, message: &str) {
        eprintln!("[{level:?}] {message}");
        self.gelf.send(GelfLevel::from(level), message, &[]);
    }
}
