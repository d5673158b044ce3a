use bon::Builder;

/// Configuration for the RPC server.
#[derive(Debug, Clone, Builder)]
pub struct ServerConfig {
    /// Responses a bidirectional handler may queue ahead of its send loop.
    #[builder(default = crate::DEFAULT_CHANNEL_CAPACITY)]
    pub outbound_queue: usize,

    /// Name used in log output to tell servers apart.
    #[builder(default = "rpc-server".to_string())]
    pub name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
