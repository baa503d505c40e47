//! Call timeout policy, the `[rpc]` config table

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Timeout for calls without an entry in `timeouts_ms`; 0 waits forever
    pub default_timeout_ms: u64,
    /// Per-call timeouts keyed by call name
    pub timeouts_ms: FxHashMap<String, u64>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 10_000,
            timeouts_ms: FxHashMap::default(),
        }
    }
}

impl RpcConfig {
    /// Timeout that applies to `call`, `None` when it may wait forever
    pub fn timeout_for(&self, call: &str) -> Option<Duration> {
        let ms = self
            .timeouts_ms
            .get(call)
            .copied()
            .unwrap_or(self.default_timeout_ms);
        (ms > 0).then(|| Duration::from_millis(ms))
    }

    /// Override the timeout for one call kind
    ///
    /// `Duration::ZERO` waits forever. Anything shorter than a millisecond
    /// rounds up to one, so a tiny timeout never turns into "forever".
    pub fn with_timeout(mut self, call: &str, timeout: Duration) -> Self {
        let ms = u64::try_from(timeout.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX);
        self.timeouts_ms.insert(call.to_string(), ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_call_overrides() {
        let config: RpcConfig = toml::from_str(
            r#"
            default_timeout_ms = 2000

            [timeouts_ms]
            ImportFlightPlan = 30000
            GetRunways = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.timeout_for("GetMetar"), Some(Duration::from_secs(2)));
        assert_eq!(
            config.timeout_for("ImportFlightPlan"),
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.timeout_for("GetRunways"), None);
    }

    #[test]
    fn test_defaults() {
        let config: RpcConfig = toml::from_str("").unwrap();
        assert_eq!(config, RpcConfig::default());
        assert_eq!(config.timeout_for("GetMetar"), Some(Duration::from_secs(10)));

        let config = config.with_timeout("GetMetar", Duration::from_millis(250));
        assert_eq!(
            config.timeout_for("GetMetar"),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_sub_millisecond_timeout_rounds_up() {
        let config = RpcConfig::default()
            .with_timeout("GetMetar", Duration::from_micros(500))
            .with_timeout("GetTaf", Duration::from_nanos(1_000_001))
            .with_timeout("GetRunways", Duration::ZERO);

        assert_eq!(config.timeout_for("GetMetar"), Some(Duration::from_millis(1)));
        assert_eq!(config.timeout_for("GetTaf"), Some(Duration::from_millis(2)));
        assert_eq!(config.timeout_for("GetRunways"), None);
    }
}
