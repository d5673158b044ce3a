//! The server side of the runtime: handler registration, call dispatch and the per-call
//! streaming coordinator.

pub mod config;
mod coordinator;
pub mod error;
mod handler;
mod registry;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

pub use self::config::ServerConfig;
use self::coordinator::Coordinator;
pub use self::handler::{
    BidiHandler, CallScope, ClientStreamHandler, ServerStreamHandler, UnaryHandler,
};
use self::handler::HandlerBinding;
pub use self::registry::{CallGuard, CallRegistry};
use crate::call::{CallContext, CallError};
use crate::channel::{self, Role};
use crate::error::RpcError;
use crate::transport::{IncomingCall, Listener};

/// Dispatches accepted calls to the handler registered for their operation.
///
/// Handlers are registered up front; once [`run`](Self::run) starts the handler table is shared
/// read-only by every call.
pub struct RpcServer {
    handlers: HashMap<String, HandlerBinding>,
    calls: Arc<CallRegistry>,
    config: ServerConfig,
}

impl RpcServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            handlers: HashMap::new(),
            calls: Arc::new(CallRegistry::new()),
            config,
        }
    }

    /// Register a single-request, single-response handler.
    pub fn register_unary<H: UnaryHandler>(
        &mut self,
        operation: impl Into<String>,
        handler: H,
    ) -> Result<(), RpcError> {
        self.register(operation.into(), HandlerBinding::unary(handler))
    }

    /// Register a single-request, streamed-response handler.
    pub fn register_server_stream<H: ServerStreamHandler>(
        &mut self,
        operation: impl Into<String>,
        handler: H,
    ) -> Result<(), RpcError> {
        self.register(operation.into(), HandlerBinding::server_stream(handler))
    }

    /// Register a streamed-request, single-response handler.
    pub fn register_client_stream<H: ClientStreamHandler>(
        &mut self,
        operation: impl Into<String>,
        handler: H,
    ) -> Result<(), RpcError> {
        self.register(operation.into(), HandlerBinding::client_stream(handler))
    }

    /// Register a handler with independently streamed requests and responses.
    pub fn register_bidi<H: BidiHandler>(
        &mut self,
        operation: impl Into<String>,
        handler: H,
    ) -> Result<(), RpcError> {
        self.register(operation.into(), HandlerBinding::bidi_stream(handler))
    }

    fn register(&mut self, operation: String, binding: HandlerBinding) -> Result<(), RpcError> {
        if self.handlers.contains_key(&operation) {
            return Err(RpcError::DuplicateHandler(operation));
        }

        info!(
            server = %self.config.name,
            operation = %operation,
            shape = %binding.shape(),
            "Registered RPC handler"
        );
        self.handlers.insert(operation, binding);
        Ok(())
    }

    pub fn has_handler(&self, operation: &str) -> bool {
        self.handlers.contains_key(operation)
    }

    /// The registry of calls this server is driving. Stays usable after [`run`](Self::run)
    /// consumes the server.
    pub fn registry(&self) -> Arc<CallRegistry> {
        Arc::clone(&self.calls)
    }

    pub fn active_calls(&self) -> usize {
        self.calls.len()
    }

    /// Accept calls from `listener` until it is closed.
    ///
    /// Every call runs on its own task. Calls still in flight when the listener closes keep
    /// running; use [`CallRegistry::cancel_all`] to stop them.
    pub async fn run<L: Listener>(self, mut listener: L) -> Result<(), RpcError> {
        let dispatch = Dispatch {
            handlers: Arc::new(self.handlers),
            calls: self.calls,
            config: self.config,
        };

        info!(
            server = %dispatch.config.name,
            handlers = dispatch.handlers.len(),
            "RPC server started"
        );

        while let Some(incoming) = listener.accept().await {
            if let Err(e) = dispatch.handle_call(incoming) {
                warn!(server = %dispatch.config.name, error = %e, "Failed to dispatch call");
            }
        }

        info!(
            server = %dispatch.config.name,
            in_flight = dispatch.calls.len(),
            "Listener closed, RPC server shutting down"
        );
        Ok(())
    }
}

struct Dispatch {
    handlers: Arc<HashMap<String, HandlerBinding>>,
    calls: Arc<CallRegistry>,
    config: ServerConfig,
}

impl Dispatch {
    fn handle_call(&self, incoming: IncomingCall) -> Result<(), RpcError> {
        let IncomingCall { header, endpoint } = incoming;

        let Some(binding) = self.handlers.get(&header.operation).cloned() else {
            warn!(
                call_id = %header.call_id,
                operation = %header.operation,
                "No handler registered for operation"
            );
            endpoint.reject(CallError::unimplemented(format!(
                "unknown operation '{}'",
                header.operation
            )));
            return Err(RpcError::NoHandler(header.operation));
        };

        let ctx = Arc::new(CallContext::new(
            header.call_id,
            header.operation,
            binding.shape(),
            header.deadline,
        ));

        let guard = match self.calls.track(Arc::clone(&ctx)) {
            Ok(guard) => guard,
            Err(e) => {
                endpoint.reject(CallError::internal(e.to_string()));
                return Err(RpcError::Status(CallError::internal(e.to_string())));
            }
        };

        channel::observe_reset(Arc::clone(&ctx), endpoint.reset_signal());
        let (outbound, inbound) = endpoint.bind(Arc::clone(&ctx), Role::Server);

        debug!(
            call_id = %ctx.call_id(),
            operation = %ctx.operation(),
            shape = %ctx.shape(),
            "Spawning coordinator for call"
        );

        let coordinator = Coordinator::new(
            Arc::clone(&ctx),
            binding,
            inbound,
            outbound,
            self.config.outbound_queue,
        );

        tokio::spawn(async move {
            let _guard = guard;

            if let Err(e) = tokio::spawn(coordinator.run()).await {
                error!(
                    call_id = %ctx.call_id(),
                    operation = %ctx.operation(),
                    error = %e,
                    "Call task aborted"
                );
                ctx.fail(CallError::internal("handler panicked"));
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::call::{CallState, ErrorKind};
    use crate::client::{CallOptions, ClientConfig, RpcCall, RpcClient};
    use crate::proto::calculator::{FindMaximumRequest, FindMaximumResponse};
    use crate::proto::greet::{GreetRequest, GreetResponse};
    use crate::transport::{self, MemoryTransport, TransportConfig};

    const ECHO_NUMBERS: &str = "test.Numbers/Echo";

    struct Echo;

    #[tonic::async_trait]
    impl UnaryHandler for Echo {
        type Request = GreetRequest;
        type Response = GreetResponse;

        async fn call(
            &self,
            _scope: CallScope,
            request: GreetRequest,
        ) -> Result<GreetResponse, CallError> {
            Ok(GreetResponse {
                result: request.first_name().to_string(),
            })
        }
    }

    /// Echoes every number back and counts how many requests reached it.
    struct CountingEcho {
        steps: Arc<AtomicUsize>,
    }

    impl BidiHandler for CountingEcho {
        type Request = FindMaximumRequest;
        type Response = FindMaximumResponse;
        type Session = ();

        fn open(&self) {}

        fn step(
            &self,
            _session: &mut (),
            request: FindMaximumRequest,
        ) -> Result<Option<FindMaximumResponse>, CallError> {
            self.steps.fetch_add(1, Ordering::SeqCst);
            Ok(Some(FindMaximumResponse {
                maximum: request.number,
            }))
        }
    }

    fn serve_counting() -> (RpcClient<MemoryTransport>, Arc<CallRegistry>, Arc<AtomicUsize>) {
        let (transport, listener) = transport::memory(TransportConfig::default());
        let steps = Arc::new(AtomicUsize::new(0));

        let mut server = RpcServer::new(ServerConfig::default());
        server
            .register_bidi(
                ECHO_NUMBERS,
                CountingEcho {
                    steps: Arc::clone(&steps),
                },
            )
            .unwrap();
        let registry = server.registry();
        tokio::spawn(server.run(listener));

        (
            RpcClient::new(transport, ClientConfig::default()),
            registry,
            steps,
        )
    }

    async fn echo_round_trips(
        call: &mut RpcCall<FindMaximumRequest, FindMaximumResponse>,
        numbers: impl IntoIterator<Item = i32>,
    ) {
        for number in numbers {
            call.send(&FindMaximumRequest { number }).await.unwrap();
            let response = call.message().await.unwrap().unwrap();
            assert_eq!(response.maximum, number);
        }
    }

    fn status_kind(err: RpcError) -> ErrorKind {
        match err {
            RpcError::Status(status) => status.kind,
            other => panic!("expected a call status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_requests_reach_handler_after_client_cancel() {
        let (client, registry, steps) = serve_counting();

        let mut call = client
            .bidi_streaming::<FindMaximumRequest, FindMaximumResponse>(
                ECHO_NUMBERS,
                CallOptions::default(),
            )
            .await
            .unwrap();
        echo_round_trips(&mut call, [1, 2, 3]).await;
        assert_eq!(steps.load(Ordering::SeqCst), 3);

        let server_ctx = registry.get(call.call_id()).unwrap();
        assert!(call.cancel());

        for number in 4..8 {
            let err = call.send(&FindMaximumRequest { number }).await.unwrap_err();
            assert_eq!(status_kind(err), ErrorKind::Cancelled);
        }

        assert_eq!(server_ctx.failed().await.kind, ErrorKind::Cancelled);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(steps.load(Ordering::SeqCst), 3);
        assert_eq!(server_ctx.state(), CallState::Failed);
    }

    #[tokio::test]
    async fn test_server_cancel_reaches_client() {
        let (client, registry, steps) = serve_counting();

        let mut call = client
            .bidi_streaming::<FindMaximumRequest, FindMaximumResponse>(
                ECHO_NUMBERS,
                CallOptions::default(),
            )
            .await
            .unwrap();
        echo_round_trips(&mut call, [7, 8]).await;

        assert!(registry.cancel(call.call_id()).unwrap());
        assert!(!registry.cancel(call.call_id()).unwrap_or(false));

        let err = call.message().await.unwrap_err();
        assert_eq!(status_kind(err), ErrorKind::Cancelled);
        assert_eq!(call.context().state(), CallState::Failed);
        assert_eq!(
            call.context().outcome().map(|outcome| outcome.unwrap_err().kind),
            Some(ErrorKind::Cancelled)
        );
        assert_eq!(steps.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_register_and_query_handlers() {
        let mut server = RpcServer::new(ServerConfig::default());
        server.register_unary("test.Echo/Echo", Echo).unwrap();

        assert!(server.has_handler("test.Echo/Echo"));
        assert!(!server.has_handler("test.Echo/Other"));
        assert_eq!(server.active_calls(), 0);
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut server = RpcServer::new(ServerConfig::default());
        server.register_unary("test.Echo/Echo", Echo).unwrap();

        let err = server.register_unary("test.Echo/Echo", Echo).unwrap_err();
        assert!(matches!(err, RpcError::DuplicateHandler(op) if op == "test.Echo/Echo"));
    }
}
