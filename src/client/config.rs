use std::time::Duration;

use bon::Builder;
use tokio::time::Instant;

/// Configuration for the RPC client.
#[derive(Debug, Clone, Builder)]
pub struct ClientConfig {
    /// Identifier used in log output for calls made by this client.
    #[builder(default = "rpc-client".to_string())]
    pub client_id: String,

    /// Default time budget for every call. Calls without a budget never time out.
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Per-call settings that override the client defaults.
#[derive(Debug, Clone, Default, Builder)]
pub struct CallOptions {
    /// Time budget for this call, measured from when it is opened.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    /// The absolute deadline of a call opened now.
    pub(crate) fn deadline(&self, config: &ClientConfig) -> Option<Instant> {
        self.timeout
            .or(config.timeout)
            .map(|timeout| Instant::now() + timeout)
    }
}
