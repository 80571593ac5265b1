//! Bridge configuration
//!
//! Read from the `[bridge]` table of a TOML file:
//!
//! ```toml
//! [bridge]
//! backtrace_messages = true
//! string_array_fallback = true
//! warn_on_fallback = false
//! ```
//!
//! Missing keys take their defaults; unknown keys are rejected.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Ask the managed runtime to append backtraces to exception messages
    pub backtrace_messages: bool,
    /// Convert string-dtype arrays through a managed string vector when
    /// the native array import rejects them
    pub string_array_fallback: bool,
    /// Log a warning whenever boxing falls back to an opaque wrap
    pub warn_on_fallback: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            backtrace_messages: false,
            string_array_fallback: true,
            warn_on_fallback: true,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    bridge: BridgeConfig,
}

impl BridgeConfig {
    /// Parse from TOML text
    pub fn from_toml_str(content: &str) -> BridgeResult<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| BridgeError::config(e.to_string()))?;
        Ok(file.bridge)
    }

    /// Load from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> BridgeResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| BridgeError::config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> BridgeResult<String> {
        toml::to_string_pretty(&ConfigFile { bridge: *self })
            .map_err(|e| BridgeError::config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert!(!config.backtrace_messages);
        assert!(config.string_array_fallback);
        assert!(config.warn_on_fallback);
    }

    #[test]
    fn test_partial_table() {
        let config = BridgeConfig::from_toml_str(
            r#"
[bridge]
backtrace_messages = true
"#,
        )
        .unwrap();
        assert!(config.backtrace_messages);
        assert!(config.string_array_fallback);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = BridgeConfig::from_toml_str(
            r#"
[bridge]
string_array_fallbak = false
"#,
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::Config { .. }));
        assert!(err.to_string().contains("string_array_fallbak"));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let err = BridgeConfig::from_toml_str("[bridge]\nwarn_on_fallback = \"yes\"").unwrap_err();
        assert!(matches!(err, BridgeError::Config { .. }));
    }

    #[test]
    fn test_render_and_reparse() {
        let config = BridgeConfig {
            backtrace_messages: true,
            string_array_fallback: false,
            warn_on_fallback: false,
        };
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("[bridge]"));
        assert_eq!(BridgeConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let err = BridgeConfig::from_file("/nonexistent/dualheap.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/dualheap.toml"));
    }
}
