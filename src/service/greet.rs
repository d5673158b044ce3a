use std::time::Duration;

use futures::stream::BoxStream;
use tracing::debug;

use super::ServiceConfig;
use crate::call::CallError;
use crate::client::{CallOptions, CallReceiver, RpcCall, RpcClient};
use crate::error::RpcError;
use crate::proto::greet::{GreetRequest, GreetResponse};
use crate::server::{
    BidiHandler, CallScope, ClientStreamHandler, RpcServer, ServerStreamHandler, UnaryHandler,
};
use crate::transport::Connection;

pub const GREET: &str = "greet.GreetService/Greet";
pub const GREET_MANY_TIMES: &str = "greet.GreetService/GreetManyTimes";
pub const LONG_GREET: &str = "greet.GreetService/LongGreet";
pub const GREET_EVERYONE: &str = "greet.GreetService/GreetEveryone";
pub const GREET_WITH_DEADLINE: &str = "greet.GreetService/GreetWithDeadline";

pub fn register(server: &mut RpcServer, config: &ServiceConfig) -> Result<(), RpcError> {
    server.register_unary(GREET, Greet)?;
    server.register_server_stream(
        GREET_MANY_TIMES,
        GreetManyTimes {
            repeat: config.greet_repeat,
            pacing: config.stream_pacing,
        },
    )?;
    server.register_client_stream(LONG_GREET, LongGreet)?;
    server.register_bidi(GREET_EVERYONE, GreetEveryone)?;
    server.register_unary(
        GREET_WITH_DEADLINE,
        GreetWithDeadline {
            steps: config.greet_deadline_steps,
            step: config.greet_step,
        },
    )?;
    Ok(())
}

fn reply(result: String) -> GreetResponse {
    GreetResponse { result }
}

pub struct Greet;

#[tonic::async_trait]
impl UnaryHandler for Greet {
    type Request = GreetRequest;
    type Response = GreetResponse;

    async fn call(
        &self,
        _scope: CallScope,
        request: GreetRequest,
    ) -> Result<GreetResponse, CallError> {
        Ok(reply(format!("Hello {}", request.first_name())))
    }
}

/// Greets the caller `repeat` times, numbering each greeting from zero.
pub struct GreetManyTimes {
    repeat: u32,
    pacing: Duration,
}

impl ServerStreamHandler for GreetManyTimes {
    type Request = GreetRequest;
    type Response = GreetResponse;

    fn call(
        &self,
        scope: CallScope,
        request: GreetRequest,
    ) -> BoxStream<'static, Result<GreetResponse, CallError>> {
        let repeat = self.repeat;
        let pacing = self.pacing;

        Box::pin(async_stream::try_stream! {
            for i in 0..repeat {
                if i > 0 && !pacing.is_zero() {
                    scope.pause(pacing).await?;
                }
                yield reply(format!("Hello {} Number {i}", request.first_name()));
            }
        })
    }
}

/// Collects one greeting per request into a single reply.
pub struct LongGreet;

impl ClientStreamHandler for LongGreet {
    type Request = GreetRequest;
    type Response = GreetResponse;
    type Accumulator = String;

    fn begin(&self) -> String {
        String::new()
    }

    fn accept(&self, accumulator: &mut String, request: GreetRequest) -> Result<(), CallError> {
        accumulator.push_str(&format!("Hello {}! ", request.first_name()));
        Ok(())
    }

    fn finish(&self, accumulator: String) -> Result<GreetResponse, CallError> {
        Ok(reply(accumulator))
    }
}

pub struct GreetEveryone;

impl BidiHandler for GreetEveryone {
    type Request = GreetRequest;
    type Response = GreetResponse;
    type Session = ();

    fn open(&self) {}

    fn step(
        &self,
        _session: &mut (),
        request: GreetRequest,
    ) -> Result<Option<GreetResponse>, CallError> {
        Ok(Some(reply(format!("Hello {} !", request.first_name()))))
    }
}

/// Works through `steps` paced steps before greeting, giving up as soon as the call is cancelled
/// or runs out of time.
pub struct GreetWithDeadline {
    steps: u32,
    step: Duration,
}

#[tonic::async_trait]
impl UnaryHandler for GreetWithDeadline {
    type Request = GreetRequest;
    type Response = GreetResponse;

    async fn call(
        &self,
        scope: CallScope,
        request: GreetRequest,
    ) -> Result<GreetResponse, CallError> {
        for step in 0..self.steps {
            scope.checkpoint()?;
            debug!(call_id = %scope.call_id(), step, "Working on greeting");
            scope.pause(self.step).await?;
        }

        Ok(reply(format!("Hello {}", request.first_name())))
    }
}

/// Typed client for the greet service.
pub struct GreetClient<C> {
    inner: RpcClient<C>,
}

impl<C: Connection> GreetClient<C> {
    pub fn new(inner: RpcClient<C>) -> Self {
        Self { inner }
    }

    pub async fn greet(
        &self,
        first_name: &str,
        last_name: &str,
        options: CallOptions,
    ) -> Result<String, RpcError> {
        let request = GreetRequest::new(first_name, last_name);
        let response: GreetResponse = self.inner.unary(GREET, &request, options).await?;
        Ok(response.result)
    }

    pub async fn greet_many_times(
        &self,
        first_name: &str,
        last_name: &str,
        options: CallOptions,
    ) -> Result<CallReceiver<GreetResponse>, RpcError> {
        let request = GreetRequest::new(first_name, last_name);
        self.inner
            .server_streaming(GREET_MANY_TIMES, &request, options)
            .await
    }

    pub async fn long_greet(
        &self,
        requests: impl IntoIterator<Item = GreetRequest>,
        options: CallOptions,
    ) -> Result<String, RpcError> {
        let mut call = self
            .inner
            .client_streaming::<GreetRequest, GreetResponse>(LONG_GREET, options)
            .await?;

        for request in requests {
            call.send(&request).await?;
        }
        Ok(call.close_and_receive().await?.result)
    }

    pub async fn greet_everyone(
        &self,
        options: CallOptions,
    ) -> Result<RpcCall<GreetRequest, GreetResponse>, RpcError> {
        self.inner.bidi_streaming(GREET_EVERYONE, options).await
    }

    pub async fn greet_with_deadline(
        &self,
        first_name: &str,
        last_name: &str,
        options: CallOptions,
    ) -> Result<String, RpcError> {
        let request = GreetRequest::new(first_name, last_name);
        let response: GreetResponse = self
            .inner
            .unary(GREET_WITH_DEADLINE, &request, options)
            .await?;
        Ok(response.result)
    }

    pub fn into_inner(self) -> RpcClient<C> {
        self.inner
    }
}
