//! Host configuration.
//!
//! Defaults mirror a small microcontroller board: three serial ports, a
//! generous TX line history, a short RX byte buffer and 32 digital pins.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration shared by the board and the execution loops of a manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Number of serial ports on the board.
    pub serial_ports: usize,
    /// Completed TX lines kept per port.
    pub line_capacity: usize,
    /// RX byte buffer size per port.
    pub rx_capacity: usize,
    /// Number of digital pins.
    pub pin_count: usize,
    /// How long an idle loop iteration may wait for posted work.
    /// Zero means never wait.
    pub idle_wait_ms: u64,
    /// Name given to worker threads.
    pub thread_name: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            serial_ports: 3,
            line_capacity: 2048,
            rx_capacity: 256,
            pin_count: 32,
            idle_wait_ms: 0,
            thread_name: "hostloop-worker".to_string(),
        }
    }
}

impl HostConfig {
    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the board and serial ports rely on.
    pub fn validate(&self) -> Result<()> {
        if self.serial_ports == 0 {
            return Err(Error::Config("serial_ports must be at least 1".into()));
        }
        if self.serial_ports > usize::from(u8::MAX) + 1 {
            return Err(Error::Config("serial_ports must be at most 256".into()));
        }
        if self.line_capacity == 0 {
            return Err(Error::Config("line_capacity must be at least 1".into()));
        }
        if self.rx_capacity == 0 {
            return Err(Error::Config("rx_capacity must be at least 1".into()));
        }
        if self.rx_capacity > self.line_capacity {
            return Err(Error::Config(format!(
                "rx_capacity ({}) must not exceed line_capacity ({})",
                self.rx_capacity, self.line_capacity
            )));
        }
        if self.pin_count > usize::from(u8::MAX) + 1 {
            return Err(Error::Config("pin_count must be at most 256".into()));
        }
        Ok(())
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn with_serial_ports(mut self, count: usize) -> Self {
        self.serial_ports = count;
        self
    }

    pub fn with_line_capacity(mut self, capacity: usize) -> Self {
        self.line_capacity = capacity;
        self
    }

    pub fn with_rx_capacity(mut self, capacity: usize) -> Self {
        self.rx_capacity = capacity;
        self
    }

    pub fn with_pin_count(mut self, count: usize) -> Self {
        self.pin_count = count;
        self
    }

    pub fn with_idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}
