//! Store Options
//!
//! Options can be set on the builder or parsed from a JSON document using
//! the same camelCase names the binding layer passes (`strictMode`,
//! `proxySetDeep`). Missing fields take their defaults.

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreOptions {
    /// Reject mutations made outside an action.
    pub strict_mode: bool,
    /// Wrap map values and set members as tracked proxies.
    pub proxy_set_deep: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            strict_mode: false,
            proxy_set_deep: true,
        }
    }
}

impl StoreOptions {
    /// Parse options from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse options from an already-decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use serde_json::json;

    #[test]
    fn defaults() {
        let options = StoreOptions::default();
        assert!(!options.strict_mode);
        assert!(options.proxy_set_deep);
    }

    #[test]
    fn parses_camel_case_with_defaults() {
        let options = StoreOptions::from_json(r#"{"strictMode": true}"#).unwrap();
        assert!(options.strict_mode);
        assert!(options.proxy_set_deep);

        let options = StoreOptions::from_value(json!({"proxySetDeep": false})).unwrap();
        assert!(!options.strict_mode);
        assert!(!options.proxy_set_deep);
    }

    #[test]
    fn rejects_malformed_options() {
        let err = StoreOptions::from_json(r#"{"strictMode": "yes"}"#).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }
}
