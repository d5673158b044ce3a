//! The calculator and greet services: handlers for the runtime and typed clients for callers.

pub mod calculator;
pub mod greet;

use std::time::Duration;

use bon::Builder;

use crate::error::RpcError;
use crate::server::RpcServer;

/// Tuning for the bundled services.
#[derive(Debug, Clone, Builder)]
pub struct ServiceConfig {
    /// Delay between consecutive items of a server stream.
    #[builder(default = Duration::ZERO)]
    pub stream_pacing: Duration,

    /// Number of greetings sent by `GreetManyTimes`.
    #[builder(default = 10)]
    pub greet_repeat: u32,

    /// Number of paced steps `GreetWithDeadline` works through before answering.
    #[builder(default = 3)]
    pub greet_deadline_steps: u32,

    /// Length of one `GreetWithDeadline` step.
    #[builder(default = Duration::from_secs(1))]
    pub greet_step: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Register every calculator and greet operation on `server`.
pub fn register_all(server: &mut RpcServer, config: &ServiceConfig) -> Result<(), RpcError> {
    calculator::register(server, config)?;
    greet::register(server, config)
}
