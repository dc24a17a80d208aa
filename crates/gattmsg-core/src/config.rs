//! Role manager configuration

use serde::{Deserialize, Serialize};

use crate::descriptor::DEFAULT_LOCAL_NAME;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Largest attribute value ATT allows in a single write
pub const ATT_MAX_VALUE_LEN: usize = 512;

/// Configuration for the central role manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralConfig {
    /// Start scanning as soon as the radio reports powered on
    pub scan_on_power_on: bool,
    /// Only report peers advertising the messenger service
    pub filter_by_service: bool,
    /// Largest payload accepted by `send_message`
    pub max_payload_len: usize,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            scan_on_power_on: true,
            filter_by_service: false,
            max_payload_len: ATT_MAX_VALUE_LEN,
        }
    }
}

impl CentralConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable scanning on power-on
    pub fn with_scan_on_power_on(mut self, enabled: bool) -> Self {
        self.scan_on_power_on = enabled;
        self
    }

    /// Restrict scans to the messenger service
    pub fn with_filter_by_service(mut self, enabled: bool) -> Self {
        self.filter_by_service = enabled;
        self
    }

    /// Set maximum payload length
    pub fn with_max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = len;
        self
    }
}

/// How a batch of write requests reacts to a request for the wrong characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteBatchPolicy {
    /// Reject the mismatched request and keep handling the rest
    #[default]
    Independent,
    /// Reject the mismatched request and leave the rest of the batch unanswered
    AbortOnMismatch,
}

/// Configuration for the peripheral role manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralConfig {
    /// Local name put in the advertisement
    pub local_name: String,
    pub write_batch_policy: WriteBatchPolicy,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            local_name: DEFAULT_LOCAL_NAME.to_string(),
            write_batch_policy: WriteBatchPolicy::Independent,
        }
    }
}

impl PeripheralConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set advertised local name
    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = name.into();
        self
    }

    /// Set write batch policy
    pub fn with_write_batch_policy(mut self, policy: WriteBatchPolicy) -> Self {
        self.write_batch_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let central = CentralConfig::default();
        assert!(central.scan_on_power_on);
        assert!(!central.filter_by_service);
        assert_eq!(central.max_payload_len, 512);

        let peripheral = PeripheralConfig::default();
        assert_eq!(peripheral.local_name, "BLE-Peripheral");
        assert_eq!(peripheral.write_batch_policy, WriteBatchPolicy::Independent);
    }

    #[test]
    fn test_builders() {
        let central = CentralConfig::new()
            .with_scan_on_power_on(false)
            .with_filter_by_service(true)
            .with_max_payload_len(20);
        assert!(!central.scan_on_power_on);
        assert!(central.filter_by_service);
        assert_eq!(central.max_payload_len, 20);

        let peripheral = PeripheralConfig::new()
            .with_local_name("Desk")
            .with_write_batch_policy(WriteBatchPolicy::AbortOnMismatch);
        assert_eq!(peripheral.local_name, "Desk");
        assert_eq!(peripheral.write_batch_policy, WriteBatchPolicy::AbortOnMismatch);
    }
}
