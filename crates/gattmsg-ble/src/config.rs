//! Radio adapter configuration

use std::time::Duration;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration shared by the central and peripheral adapters
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BleConfig {
    /// Maximum time to wait for a connection to complete
    pub connection_timeout: Duration,
    /// Index of the host adapter to use for the central role
    pub adapter_index: usize,
    /// How long a write from a remote central waits for the manager's answer
    pub write_response_timeout: Duration,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            adapter_index: 0,
            write_response_timeout: Duration::from_secs(5),
        }
    }
}

impl BleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Select host adapter
    pub fn with_adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    /// Set write response timeout
    pub fn with_write_response_timeout(mut self, timeout: Duration) -> Self {
        self.write_response_timeout = timeout;
        self
    }
}
