use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use prost::Message;

use crate::call::{CallContext, CallError, CallId, CallShape};
use crate::codec::{decode_request, encode};

/// A handler's view of the call it is serving.
///
/// Handlers that pace themselves or run for a while use [`pause`](Self::pause) or
/// [`checkpoint`](Self::checkpoint) so that cancellation and deadlines are observed promptly.
#[derive(Debug, Clone)]
pub struct CallScope {
    ctx: Arc<CallContext>,
}

impl CallScope {
    pub(crate) fn new(ctx: Arc<CallContext>) -> Self {
        Self { ctx }
    }

    pub fn call_id(&self) -> &CallId {
        self.ctx.call_id()
    }

    pub fn operation(&self) -> &str {
        self.ctx.operation()
    }

    /// Whether the call has already failed (including cancellation).
    pub fn is_cancelled(&self) -> bool {
        self.ctx.failure().is_some()
    }

    /// Fail fast if the call was cancelled or its deadline passed.
    pub fn checkpoint(&self) -> Result<(), CallError> {
        self.ctx.checkpoint()
    }

    /// Sleep for `duration`, waking early with the call's status if it fails meanwhile.
    pub async fn pause(&self, duration: Duration) -> Result<(), CallError> {
        self.ctx.guard(tokio::time::sleep(duration)).await
    }
}

/// Single request, single response.
#[tonic::async_trait]
pub trait UnaryHandler: Send + Sync + 'static {
    type Request: Message + Default + Send + 'static;
    type Response: Message + Send + 'static;

    async fn call(
        &self,
        scope: CallScope,
        request: Self::Request,
    ) -> Result<Self::Response, CallError>;
}

/// Single request, lazily produced stream of responses.
pub trait ServerStreamHandler: Send + Sync + 'static {
    type Request: Message + Default + Send + 'static;
    type Response: Message + Send + 'static;

    fn call(
        &self,
        scope: CallScope,
        request: Self::Request,
    ) -> BoxStream<'static, Result<Self::Response, CallError>>;
}

/// Stream of requests folded into an accumulator, then a single response.
pub trait ClientStreamHandler: Send + Sync + 'static {
    type Request: Message + Default + Send + 'static;
    type Response: Message + Send + 'static;
    type Accumulator: Send + 'static;

    fn begin(&self) -> Self::Accumulator;

    fn accept(
        &self,
        accumulator: &mut Self::Accumulator,
        request: Self::Request,
    ) -> Result<(), CallError>;

    fn finish(&self, accumulator: Self::Accumulator) -> Result<Self::Response, CallError>;
}

/// Interleaved requests and responses; each request yields zero or one response.
///
/// The session is owned by the receive loop of the call, which is its only writer.
pub trait BidiHandler: Send + Sync + 'static {
    type Request: Message + Default + Send + 'static;
    type Response: Message + Send + 'static;
    type Session: Send + 'static;

    fn open(&self) -> Self::Session;

    fn step(
        &self,
        session: &mut Self::Session,
        request: Self::Request,
    ) -> Result<Option<Self::Response>, CallError>;
}

pub(crate) type ByteStream = BoxStream<'static, Result<Bytes, CallError>>;

#[tonic::async_trait]
pub(crate) trait ErasedUnary: Send + Sync {
    async fn call(&self, scope: CallScope, request: Bytes) -> Result<Bytes, CallError>;
}

pub(crate) trait ErasedServerStream: Send + Sync {
    fn call(&self, scope: CallScope, request: Bytes) -> Result<ByteStream, CallError>;
}

pub(crate) trait ErasedClientStream: Send + Sync {
    fn begin(&self) -> Box<dyn ErasedAccumulator>;
}

pub(crate) trait ErasedAccumulator: Send {
    fn accept(&mut self, request: Bytes) -> Result<(), CallError>;
    fn finish(self: Box<Self>) -> Result<Bytes, CallError>;
}

pub(crate) trait ErasedBidi: Send + Sync {
    fn open(&self) -> Box<dyn ErasedSession>;
}

pub(crate) trait ErasedSession: Send {
    fn step(&mut self, request: Bytes) -> Result<Option<Bytes>, CallError>;
}

/// Adapts a typed handler to its byte-level form.
struct Typed<H>(Arc<H>);

#[tonic::async_trait]
impl<H: UnaryHandler> ErasedUnary for Typed<H> {
    async fn call(&self, scope: CallScope, request: Bytes) -> Result<Bytes, CallError> {
        let request = decode_request::<H::Request>(&request)?;
        let response = self.0.call(scope, request).await?;
        Ok(encode(&response))
    }
}

impl<H: ServerStreamHandler> ErasedServerStream for Typed<H> {
    fn call(&self, scope: CallScope, request: Bytes) -> Result<ByteStream, CallError> {
        let request = decode_request::<H::Request>(&request)?;
        let stream = self
            .0
            .call(scope, request)
            .map(|item| item.map(|response| encode(&response)));
        Ok(Box::pin(stream))
    }
}

struct TypedAccumulator<H: ClientStreamHandler> {
    handler: Arc<H>,
    accumulator: H::Accumulator,
}

impl<H: ClientStreamHandler> ErasedClientStream for Typed<H> {
    fn begin(&self) -> Box<dyn ErasedAccumulator> {
        Box::new(TypedAccumulator {
            handler: Arc::clone(&self.0),
            accumulator: self.0.begin(),
        })
    }
}

impl<H: ClientStreamHandler> ErasedAccumulator for TypedAccumulator<H> {
    fn accept(&mut self, request: Bytes) -> Result<(), CallError> {
        let request = decode_request::<H::Request>(&request)?;
        self.handler.accept(&mut self.accumulator, request)
    }

    fn finish(self: Box<Self>) -> Result<Bytes, CallError> {
        let TypedAccumulator {
            handler,
            accumulator,
        } = *self;
        let response = handler.finish(accumulator)?;
        Ok(encode(&response))
    }
}

struct TypedSession<H: BidiHandler> {
    handler: Arc<H>,
    session: H::Session,
}

impl<H: BidiHandler> ErasedBidi for Typed<H> {
    fn open(&self) -> Box<dyn ErasedSession> {
        Box::new(TypedSession {
            handler: Arc::clone(&self.0),
            session: self.0.open(),
        })
    }
}

impl<H: BidiHandler> ErasedSession for TypedSession<H> {
    fn step(&mut self, request: Bytes) -> Result<Option<Bytes>, CallError> {
        let request = decode_request::<H::Request>(&request)?;
        let response = self.handler.step(&mut self.session, request)?;
        Ok(response.map(|response| encode(&response)))
    }
}

/// A registered handler, tagged with the shape of call it serves.
#[derive(Clone)]
pub(crate) enum HandlerBinding {
    Unary(Arc<dyn ErasedUnary>),
    ServerStream(Arc<dyn ErasedServerStream>),
    ClientStream(Arc<dyn ErasedClientStream>),
    BidiStream(Arc<dyn ErasedBidi>),
}

impl HandlerBinding {
    pub(crate) fn unary<H: UnaryHandler>(handler: H) -> Self {
        HandlerBinding::Unary(Arc::new(Typed(Arc::new(handler))))
    }

    pub(crate) fn server_stream<H: ServerStreamHandler>(handler: H) -> Self {
        HandlerBinding::ServerStream(Arc::new(Typed(Arc::new(handler))))
    }

    pub(crate) fn client_stream<H: ClientStreamHandler>(handler: H) -> Self {
        HandlerBinding::ClientStream(Arc::new(Typed(Arc::new(handler))))
    }

    pub(crate) fn bidi_stream<H: BidiHandler>(handler: H) -> Self {
        HandlerBinding::BidiStream(Arc::new(Typed(Arc::new(handler))))
    }

    pub(crate) fn shape(&self) -> CallShape {
        match self {
            HandlerBinding::Unary(_) => CallShape::Unary,
            HandlerBinding::ServerStream(_) => CallShape::ServerStream,
            HandlerBinding::ClientStream(_) => CallShape::ClientStream,
            HandlerBinding::BidiStream(_) => CallShape::BidiStream,
        }
    }
}
