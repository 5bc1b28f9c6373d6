//! Client configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeError};

/// Default bound on transaction re-attempts after a conflict.
pub const DEFAULT_MAX_TRANSACTION_RETRIES: u32 = 25;

/// What happens when the transport cancels an active subscription.
///
/// Either way the subscription is terminated and not recovered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// The listener's `on_cancel` receives the error.
    #[default]
    Notify,
    /// Only logged.
    Silent,
}

/// Tunables for a [`crate::TreeClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Re-attempts allowed after the first transaction attempt. `None` is unbounded.
    pub max_transaction_retries: Option<u32>,
    pub cancel_policy: CancelPolicy,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_transaction_retries: Some(DEFAULT_MAX_TRANSACTION_RETRIES),
            cancel_policy: CancelPolicy::default(),
        }
    }
}

impl TreeConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TreeError::InvalidConfig(e.to_string()))
    }

    /// Set the retry bound. `None` retries until commit.
    pub fn with_max_transaction_retries(mut self, retries: Option<u32>) -> Self {
        self.max_transaction_retries = retries;
        self
    }

    /// Set how transport cancellations reach listeners.
    pub fn with_cancel_policy(mut self, policy: CancelPolicy) -> Self {
        self.cancel_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TreeConfig::default();
        assert_eq!(config.max_transaction_retries, Some(25));
        assert_eq!(config.cancel_policy, CancelPolicy::Notify);
    }

    #[test]
    fn test_from_json_partial() {
        let config = TreeConfig::from_json_str(r#"{"cancel_policy": "silent"}"#).unwrap();
        assert_eq!(config.cancel_policy, CancelPolicy::Silent);
        assert_eq!(config.max_transaction_retries, Some(25));

        let config = TreeConfig::from_json_str(r#"{"max_transaction_retries": null}"#).unwrap();
        assert_eq!(config.max_transaction_retries, None);
    }

    #[test]
    fn test_from_json_invalid() {
        let err = TreeConfig::from_json_str(r#"{"cancel_policy": "retry"}"#).unwrap_err();
        assert!(matches!(err, TreeError::InvalidConfig(_)));
    }

    #[test]
    fn test_builders() {
        let config = TreeConfig::default()
            .with_max_transaction_retries(Some(2))
            .with_cancel_policy(CancelPolicy::Silent);
        assert_eq!(config.max_transaction_retries, Some(2));
        assert_eq!(config.cancel_policy, CancelPolicy::Silent);
    }
}
