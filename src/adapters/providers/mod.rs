//! Sandbox provider implementations.

pub mod local;
pub mod mock;

use std::sync::Arc;

use crate::domain::ports::SandboxProvider;
use crate::infrastructure::config::{ProviderConfig, ProviderKind};

pub use local::LocalProvider;
pub use mock::{MockProvider, MockScript};

/// Create the provider selected in configuration.
pub fn from_config(config: &ProviderConfig) -> Arc<dyn SandboxProvider> {
    match config.kind {
        ProviderKind::Local => Arc::new(LocalProvider::new(config.work_root.clone())),
        ProviderKind::Mock => Arc::new(MockProvider::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_picks_kind() {
        let mut config = ProviderConfig::default();
        assert_eq!(from_config(&config).name(), "local");

        config.kind = ProviderKind::Mock;
        assert_eq!(from_config(&config).name(), "mock");
    }
}
