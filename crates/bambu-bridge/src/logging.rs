//! Log output for hosts that run the bridge.

use tracing_subscriber::EnvFilter;

use crate::error::{BridgeError, Result};

/// Install a fmt subscriber filtered by `RUST_LOG` plus `default_directive`,
/// e.g. `"bambu_bridge=info"`.
///
/// Fails if the directive does not parse or a global subscriber is already set.
pub fn init(default_directive: &str) -> Result<()> {
    let directive = default_directive
        .parse()
        .map_err(|e| BridgeError::ConfigInvalid(format!("log directive {default_directive:?}: {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .try_init()
        .map_err(|e| BridgeError::ConfigInvalid(format!("logging already initialized: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_once() {
        assert!(matches!(init("bambu_bridge=loudest"), Err(BridgeError::ConfigInvalid(_))));
        assert!(init("bambu_bridge=debug").is_ok());
        assert!(init("bambu_bridge=debug").is_err());
    }
}
