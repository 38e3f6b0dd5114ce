//! Hub configuration

/// Signaling hub configuration options
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each connection's outbound queue
    pub outbox_capacity: usize,

    /// Consult the stream directory before admitting a viewer
    pub require_directory_active: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: 256,
            require_directory_active: true,
        }
    }
}

impl HubConfig {
    /// Set the per-connection outbox capacity
    pub fn outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity.max(1);
        self
    }

    /// Admit viewers on session phase alone, without asking the directory
    pub fn skip_directory_check(mut self) -> Self {
        self.require_directory_active = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();

        assert_eq!(config.outbox_capacity, 256);
        assert!(config.require_directory_active);
    }

    #[test]
    fn test_builder_chaining() {
        let config = HubConfig::default()
            .outbox_capacity(0)
            .skip_directory_check();

        assert_eq!(config.outbox_capacity, 1);
        assert!(!config.require_directory_active);
    }
}
