//! Process-wide table of open device connections.
//!
//! At most one connection is open per device path. Tasks acquire it lazily on
//! initialization and reuse it; after a communication fault the task discards
//! it so the next acquisition reopens the port.

use super::{SerialLink, SharedTransport, Transport, DEFAULT_PLL_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL};
use crate::error::TransportError;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Directory with stable USB serial device names.
pub const SERIAL_BY_ID_DIR: &str = "/dev/serial/by-id";
/// Name prefix of the device's USB serial entry.
pub const DEVICE_ID_PREFIX: &str = "usb-STMicroelectronics_STM32";

/// Port settings applied when a link is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub poll_interval: Duration,
    pub pll_lock_timeout: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            read_timeout: Duration::from_secs(3),
            poll_interval: DEFAULT_POLL_INTERVAL,
            pll_lock_timeout: DEFAULT_PLL_LOCK_TIMEOUT,
        }
    }
}

/// Opens links and finds the device.
pub trait LinkOpener: Send + Sync {
    /// Open the port at `path`.
    fn open(&self, path: &str, settings: &LinkSettings) -> Result<Box<dyn SerialLink>, TransportError>;

    /// Path of the first attached device.
    fn discover(&self) -> Result<String, TransportError>;
}

/// Opener for real serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortOpener;

impl LinkOpener for SerialPortOpener {
    fn open(&self, path: &str, settings: &LinkSettings) -> Result<Box<dyn SerialLink>, TransportError> {
        #[cfg(feature = "serial")]
        {
            let port = serialport::new(path, settings.baud_rate)
                .timeout(settings.read_timeout)
                .open()
                .map_err(|e| TransportError::Open {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;
            debug!(path, baud = settings.baud_rate, "Serial port opened");
            Ok(Box::new(port))
        }

        #[cfg(not(feature = "serial"))]
        {
            let _ = (path, settings);
            Err(TransportError::SerialFeatureDisabled)
        }
    }

    fn discover(&self) -> Result<String, TransportError> {
        let entries = std::fs::read_dir(SERIAL_BY_ID_DIR).map_err(|_| TransportError::NoDevice)?;
        let mut candidates: Vec<_> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(DEVICE_ID_PREFIX))
            .map(|e| e.path())
            .collect();
        candidates.sort();
        let first = candidates.first().ok_or(TransportError::NoDevice)?;
        let real = std::fs::canonicalize(first).map_err(|e| TransportError::Open {
            path: first.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(real.display().to_string())
    }
}

/// An open device connection handed to a task.
#[derive(Debug, Clone)]
pub struct Connection {
    pub path: String,
    pub transport: SharedTransport,
}

/// Singleton-by-path connection table.
pub struct ConnectionRegistry {
    opener: Arc<dyn LinkOpener>,
    settings: LinkSettings,
    open: Mutex<HashMap<String, SharedTransport>>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("settings", &self.settings)
            .field("open", &self.open_paths())
            .finish()
    }
}

impl ConnectionRegistry {
    /// Registry using `opener` for new connections.
    pub fn new(opener: Arc<dyn LinkOpener>, settings: LinkSettings) -> Self {
        Self {
            opener,
            settings,
            open: Mutex::new(HashMap::new()),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, SharedTransport>> {
        self.open.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Return the open connection for `path`, opening it if needed.
    ///
    /// Without a path the first discovered device is used.
    pub fn acquire(&self, path: Option<&str>) -> Result<Connection, TransportError> {
        let path = match path {
            Some(p) => p.to_string(),
            None => self.opener.discover()?,
        };
        let mut table = self.table();
        if let Some(existing) = table.get(&path) {
            return Ok(Connection {
                path,
                transport: Arc::clone(existing),
            });
        }
        let link = self.opener.open(&path, &self.settings)?;
        let transport = Arc::new(Mutex::new(
            Transport::new(link, path.clone())
                .with_timing(self.settings.poll_interval, self.settings.pll_lock_timeout),
        ));
        table.insert(path.clone(), Arc::clone(&transport));
        info!(path = %path, "Device connection opened");
        Ok(Connection { path, transport })
    }

    /// Drop the connection for `path`; the next acquisition reopens it.
    pub fn discard(&self, path: &str) {
        if self.table().remove(path).is_some() {
            info!(path, "Device connection discarded");
        }
    }

    /// Whether a connection to `path` is open.
    pub fn is_open(&self, path: &str) -> bool {
        self.table().contains_key(path)
    }

    /// Paths with an open connection.
    pub fn open_paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.table().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Close every connection.
    pub fn close_all(&self) {
        self.table().clear();
    }

    /// Path of the first attached device.
    pub fn discover(&self) -> Result<String, TransportError> {
        self.opener.discover()
    }
}

static GLOBAL: OnceCell<Arc<ConnectionRegistry>> = OnceCell::new();

/// Install the process-wide registry. Returns `false` if one already exists.
pub fn install_global(registry: ConnectionRegistry) -> bool {
    GLOBAL.set(Arc::new(registry)).is_ok()
}

/// Process-wide registry, backed by real serial ports unless another one was
/// installed first.
pub fn global() -> Arc<ConnectionRegistry> {
    Arc::clone(GLOBAL.get_or_init(|| {
        Arc::new(ConnectionRegistry::new(
            Arc::new(SerialPortOpener),
            LinkSettings::default(),
        ))
    }))
}

/// Where a task gets its connection from: a registry and an optional fixed
/// device path.
#[derive(Debug, Clone)]
pub struct DeviceLink {
    registry: Arc<ConnectionRegistry>,
    path: Option<String>,
}

impl DeviceLink {
    /// Link through `registry`, discovering the device when `path` is `None`.
    pub fn new(registry: Arc<ConnectionRegistry>, path: Option<String>) -> Self {
        Self { registry, path }
    }

    /// Acquire the shared connection.
    pub fn connect(&self) -> Result<Connection, TransportError> {
        self.registry.acquire(self.path.as_deref())
    }

    /// Discard a connection after a communication fault.
    pub fn discard(&self, path: &str) {
        self.registry.discard(path);
    }

    /// Underlying registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockDevice, MockOpener};

    #[test]
    fn test_one_connection_per_path() {
        let opener = MockOpener::new(MockDevice::new());
        let registry = ConnectionRegistry::new(Arc::new(opener.clone()), LinkSettings::default());
        let a = registry.acquire(Some("/dev/ttyACM0")).expect("open");
        let b = registry.acquire(Some("/dev/ttyACM0")).expect("reuse");
        assert!(Arc::ptr_eq(&a.transport, &b.transport));
        assert_eq!(opener.open_count(), 1);
    }

    #[test]
    fn test_discard_forces_reopen() {
        let opener = MockOpener::new(MockDevice::new());
        let registry = ConnectionRegistry::new(Arc::new(opener.clone()), LinkSettings::default());
        let conn = registry.acquire(None).expect("discovered");
        assert_eq!(conn.path, "/dev/mock");
        registry.discard(&conn.path);
        assert!(!registry.is_open("/dev/mock"));
        registry.acquire(None).expect("reopen");
        assert_eq!(opener.open_count(), 2);
    }

    #[test]
    fn test_offline_device() {
        let registry = ConnectionRegistry::new(Arc::new(MockOpener::offline()), LinkSettings::default());
        assert!(matches!(registry.acquire(None), Err(TransportError::NoDevice)));
        assert!(matches!(
            registry.acquire(Some("/dev/ttyACM0")),
            Err(TransportError::Open { .. })
        ));
        assert!(registry.open_paths().is_empty());
    }
}
