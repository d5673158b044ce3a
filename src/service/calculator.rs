use std::time::Duration;

use futures::stream::BoxStream;
use tracing::debug;

use super::ServiceConfig;
use crate::call::CallError;
use crate::client::{CallOptions, CallReceiver, RpcCall, RpcClient};
use crate::error::RpcError;
use crate::proto::calculator::{
    AvgLongRequest, AvgLongResponse, FindMaximumRequest, FindMaximumResponse, SquareRootRequest,
    SquareRootResponse, Sum, SumManyTimesRequest, SumManyTimesResponse, SumRequest, SumResponse,
};
use crate::server::{
    BidiHandler, CallScope, ClientStreamHandler, RpcServer, ServerStreamHandler, UnaryHandler,
};
use crate::state_machine::StateMachine;
use crate::state_machine::average::{AverageInput, AverageOutput, RunningAverage};
use crate::state_machine::divisor::{DivisorInput, DivisorOutput, DivisorSearch};
use crate::state_machine::maximum::{MaximumInput, MaximumOutput, RunningMaximum};
use crate::transport::Connection;

pub const SUM_DATA: &str = "calculator.SumService/SumData";
pub const SUM_MANY_TIMES: &str = "calculator.SumService/SumManyTimes";
pub const AVG_LONG_TIMES: &str = "calculator.SumService/AvgLongTimes";
pub const FIND_MAXIMUM: &str = "calculator.SumService/FindMaximum";
pub const SQUARE_ROOT: &str = "calculator.SumService/SquareRoot";

pub fn register(server: &mut RpcServer, config: &ServiceConfig) -> Result<(), RpcError> {
    server.register_unary(SUM_DATA, SumData)?;
    server.register_server_stream(
        SUM_MANY_TIMES,
        SumManyTimes {
            pacing: config.stream_pacing,
        },
    )?;
    server.register_client_stream(AVG_LONG_TIMES, AvgLongTimes)?;
    server.register_bidi(FIND_MAXIMUM, FindMaximum)?;
    server.register_unary(SQUARE_ROOT, SquareRoot)?;
    Ok(())
}

/// Adds the two numbers of the request. A request without numbers sums to zero.
pub struct SumData;

#[tonic::async_trait]
impl UnaryHandler for SumData {
    type Request = SumRequest;
    type Response = SumResponse;

    async fn call(
        &self,
        _scope: CallScope,
        request: SumRequest,
    ) -> Result<SumResponse, CallError> {
        let Sum { sum1, sum2 } = request.sum.unwrap_or_default();
        Ok(SumResponse {
            result: sum1.wrapping_add(sum2),
        })
    }
}

/// Streams the divisors of `total`, smallest first, pausing between them.
pub struct SumManyTimes {
    pacing: Duration,
}

impl ServerStreamHandler for SumManyTimes {
    type Request = SumManyTimesRequest;
    type Response = SumManyTimesResponse;

    fn call(
        &self,
        scope: CallScope,
        request: SumManyTimesRequest,
    ) -> BoxStream<'static, Result<SumManyTimesResponse, CallError>> {
        let pacing = self.pacing;

        Box::pin(async_stream::try_stream! {
            let mut search = DivisorSearch::new();
            search.process_input(DivisorInput::Start(request.total));

            let mut first = true;
            while let Some(DivisorOutput::Divisor(divisor)) = search.poll_output() {
                if !first && !pacing.is_zero() {
                    scope.pause(pacing).await?;
                }
                first = false;

                debug!(
                    call_id = %scope.call_id(),
                    divisor,
                    remaining = search.remaining(),
                    "Found divisor"
                );
                yield SumManyTimesResponse { result: divisor };
            }
        })
    }
}

/// Averages every number received.
pub struct AvgLongTimes;

impl ClientStreamHandler for AvgLongTimes {
    type Request = AvgLongRequest;
    type Response = AvgLongResponse;
    type Accumulator = RunningAverage;

    fn begin(&self) -> RunningAverage {
        RunningAverage::new()
    }

    fn accept(
        &self,
        accumulator: &mut RunningAverage,
        request: AvgLongRequest,
    ) -> Result<(), CallError> {
        accumulator.process_input(AverageInput::Sample(request.num));
        Ok(())
    }

    fn finish(&self, mut accumulator: RunningAverage) -> Result<AvgLongResponse, CallError> {
        accumulator.process_input(AverageInput::Finish);

        match accumulator.poll_output() {
            Some(AverageOutput::Average(result)) => Ok(AvgLongResponse { result }),
            Some(AverageOutput::NoSamples) => Err(CallError::invalid_argument(
                "cannot average an empty stream of numbers",
            )),
            None => Err(CallError::internal("average was not computed")),
        }
    }
}

/// Answers each number that raises the running maximum with the new maximum.
pub struct FindMaximum;

impl BidiHandler for FindMaximum {
    type Request = FindMaximumRequest;
    type Response = FindMaximumResponse;
    type Session = RunningMaximum;

    fn open(&self) -> RunningMaximum {
        RunningMaximum::new()
    }

    fn step(
        &self,
        session: &mut RunningMaximum,
        request: FindMaximumRequest,
    ) -> Result<Option<FindMaximumResponse>, CallError> {
        session.process_input(MaximumInput::Number(request.number));
        Ok(session
            .poll_output()
            .map(|MaximumOutput::NewMaximum(maximum)| FindMaximumResponse { maximum }))
    }
}

pub struct SquareRoot;

#[tonic::async_trait]
impl UnaryHandler for SquareRoot {
    type Request = SquareRootRequest;
    type Response = SquareRootResponse;

    async fn call(
        &self,
        _scope: CallScope,
        request: SquareRootRequest,
    ) -> Result<SquareRootResponse, CallError> {
        let number = request.number;
        if number < 0 {
            return Err(CallError::invalid_argument(format!(
                "received negative number: {number}"
            )));
        }

        Ok(SquareRootResponse {
            number: f64::from(number).sqrt(),
        })
    }
}

/// Typed client for the calculator service.
pub struct CalculatorClient<C> {
    inner: RpcClient<C>,
}

impl<C: Connection> CalculatorClient<C> {
    pub fn new(inner: RpcClient<C>) -> Self {
        Self { inner }
    }

    pub async fn sum(&self, sum1: i32, sum2: i32, options: CallOptions) -> Result<i32, RpcError> {
        let request = SumRequest {
            sum: Some(Sum { sum1, sum2 }),
        };
        let response: SumResponse = self.inner.unary(SUM_DATA, &request, options).await?;
        Ok(response.result)
    }

    pub async fn divisors(
        &self,
        total: i32,
        options: CallOptions,
    ) -> Result<CallReceiver<SumManyTimesResponse>, RpcError> {
        self.inner
            .server_streaming(SUM_MANY_TIMES, &SumManyTimesRequest { total }, options)
            .await
    }

    pub async fn average(
        &self,
        numbers: impl IntoIterator<Item = i64>,
        options: CallOptions,
    ) -> Result<f64, RpcError> {
        let mut call = self
            .inner
            .client_streaming::<AvgLongRequest, AvgLongResponse>(AVG_LONG_TIMES, options)
            .await?;

        for num in numbers {
            call.send(&AvgLongRequest { num }).await?;
        }
        Ok(call.close_and_receive().await?.result)
    }

    pub async fn find_maximum(
        &self,
        options: CallOptions,
    ) -> Result<RpcCall<FindMaximumRequest, FindMaximumResponse>, RpcError> {
        self.inner.bidi_streaming(FIND_MAXIMUM, options).await
    }

    pub async fn square_root(&self, number: i32, options: CallOptions) -> Result<f64, RpcError> {
        let response: SquareRootResponse = self
            .inner
            .unary(SQUARE_ROOT, &SquareRootRequest { number }, options)
            .await?;
        Ok(response.number)
    }

    pub fn into_inner(self) -> RpcClient<C> {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::call::{CallShape, CallState, ErrorKind};
    use crate::service::testing::serve;
    use crate::transport::MemoryTransport;

    fn calculator(config: ServiceConfig) -> CalculatorClient<MemoryTransport> {
        let (client, _registry) = serve(config);
        CalculatorClient::new(client)
    }

    fn status(err: RpcError) -> ErrorKind {
        match err {
            RpcError::Status(status) => status.kind,
            other => panic!("expected a call status, got {other:?}"),
        }
    }

    async fn collect_divisors(
        client: &CalculatorClient<MemoryTransport>,
        total: i32,
    ) -> Vec<i32> {
        let mut receiver = client.divisors(total, CallOptions::default()).await.unwrap();
        let mut divisors = Vec::new();
        while let Some(response) = receiver.message().await.unwrap() {
            divisors.push(response.result);
        }
        assert_eq!(receiver.outcome(), Some(Ok(())));
        divisors
    }

    #[tokio::test]
    async fn test_sum() {
        let client = calculator(ServiceConfig::default());

        assert_eq!(client.sum(3, 10, CallOptions::default()).await.unwrap(), 13);
        assert_eq!(client.sum(-7, 2, CallOptions::default()).await.unwrap(), -5);
        assert_eq!(client.sum(0, 0, CallOptions::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sum_without_numbers_is_zero() {
        let (client, _registry) = serve(ServiceConfig::default());

        let response: SumResponse = client
            .unary(SUM_DATA, &SumRequest::default(), CallOptions::default())
            .await
            .unwrap();
        assert_eq!(response.result, 0);
    }

    #[tokio::test]
    async fn test_divisor_stream() {
        let client = calculator(ServiceConfig::default());

        assert_eq!(collect_divisors(&client, 120).await, vec![2, 2, 2, 3, 5]);
        assert_eq!(collect_divisors(&client, 97).await, vec![97]);
        assert!(collect_divisors(&client, 1).await.is_empty());
        assert!(collect_divisors(&client, 0).await.is_empty());
        assert!(collect_divisors(&client, -12).await.is_empty());
    }

    #[tokio::test]
    async fn test_divisor_stream_multiplies_back() {
        let client = calculator(ServiceConfig::default());

        for total in [2, 360, 1024, 9973, 65_535] {
            let divisors = collect_divisors(&client, total).await;
            assert_eq!(divisors.iter().product::<i32>(), total);
            assert!(divisors.windows(2).all(|pair| pair[0] <= pair[1]));
        }
    }

    #[tokio::test]
    async fn test_average() {
        let client = calculator(ServiceConfig::default());

        let average = client
            .average([1, 2, 3, 4], CallOptions::default())
            .await
            .unwrap();
        assert_eq!(average, 2.5);

        let average = client
            .average([i64::MAX, i64::MAX], CallOptions::default())
            .await
            .unwrap();
        assert!((average - i64::MAX as f64).abs() < 1.0);
    }

    #[tokio::test]
    async fn test_average_of_nothing_is_invalid() {
        let client = calculator(ServiceConfig::default());

        let err = client
            .average(std::iter::empty(), CallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(status(err), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_find_maximum_reports_strict_running_maxima() {
        let client = calculator(ServiceConfig::default());

        let call = client.find_maximum(CallOptions::default()).await.unwrap();
        let (mut sender, receiver) = call.split();

        let sending = tokio::spawn(async move {
            for number in [1, 5, 3, 6, 2, 20, 20, -4] {
                sender.send(&FindMaximumRequest { number }).await.unwrap();
            }
            sender.finish().await.unwrap();
        });

        let mut maxima = Vec::new();
        let mut receiver = receiver;
        while let Some(response) = receiver.message().await.unwrap() {
            maxima.push(response.maximum);
        }
        sending.await.unwrap();

        assert_eq!(maxima, vec![1, 5, 6, 20]);
        assert_eq!(receiver.context().state(), CallState::Closed);
    }

    #[tokio::test]
    async fn test_find_maximum_with_negative_numbers() {
        let client = calculator(ServiceConfig::default());

        let mut call = client.find_maximum(CallOptions::default()).await.unwrap();
        for number in [-9, -12, -3, -3, -5] {
            call.send(&FindMaximumRequest { number }).await.unwrap();
        }
        call.finish().await.unwrap();

        let mut maxima = Vec::new();
        while let Some(response) = call.message().await.unwrap() {
            maxima.push(response.maximum);
        }
        assert_eq!(maxima, vec![-9, -3]);
    }

    #[tokio::test]
    async fn test_square_root() {
        let client = calculator(ServiceConfig::default());

        assert_eq!(client.square_root(9, CallOptions::default()).await.unwrap(), 3.0);
        assert_eq!(client.square_root(0, CallOptions::default()).await.unwrap(), 0.0);

        let err = client
            .square_root(-1, CallOptions::default())
            .await
            .unwrap_err();
        let RpcError::Status(status) = err else {
            panic!("expected a call status");
        };
        assert_eq!(status.kind, ErrorKind::InvalidArgument);
        assert!(status.message.contains("-1"));
    }

    #[tokio::test]
    async fn test_unknown_operation_is_unimplemented() {
        let (client, _registry) = serve(ServiceConfig::default());

        let err = client
            .unary::<SumRequest, SumResponse>(
                "calculator.SumService/Multiply",
                &SumRequest::default(),
                CallOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(status(err), ErrorKind::Unimplemented);
    }

    #[tokio::test]
    async fn test_streaming_to_unknown_operation_is_unimplemented() {
        let (client, _registry) = serve(ServiceConfig::default());

        let mut call = client
            .bidi_streaming::<FindMaximumRequest, FindMaximumResponse>(
                "calculator.SumService/FindMinimum",
                CallOptions::default(),
            )
            .await
            .unwrap();

        // Requests may still be buffered until the rejection lands; once it has, sending fails
        // with the status the server reported.
        let mut number = 0;
        let err = loop {
            match call.send(&FindMaximumRequest { number }).await {
                Ok(()) => {
                    number += 1;
                    assert!(number < 100, "unknown operation was never rejected");
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Err(err) => break err,
            }
        };
        assert_eq!(status(err), ErrorKind::Unimplemented);
        assert_eq!(status(call.finish().await.unwrap_err()), ErrorKind::Unimplemented);
    }

    #[tokio::test]
    async fn test_client_stream_to_unknown_operation_is_unimplemented() {
        let (client, _registry) = serve(ServiceConfig::default());

        let mut call = client
            .client_streaming::<AvgLongRequest, AvgLongResponse>(
                "calculator.SumService/Median",
                CallOptions::default(),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = call.send(&AvgLongRequest { num: 1 }).await.unwrap_err();
        assert_eq!(status(err), ErrorKind::Unimplemented);

        let err = call.close_and_receive().await.unwrap_err();
        assert_eq!(status(err), ErrorKind::Unimplemented);
    }

    #[tokio::test]
    async fn test_cancel_mid_stream() {
        let config = ServiceConfig::builder()
            .stream_pacing(Duration::from_millis(50))
            .build();
        let (client, registry) = serve(config);

        let mut receiver = client
            .server_streaming::<_, SumManyTimesResponse>(
                SUM_MANY_TIMES,
                &SumManyTimesRequest { total: 1 << 20 },
                CallOptions::default(),
            )
            .await
            .unwrap();

        let first = receiver.message().await.unwrap().unwrap();
        assert_eq!(first.result, 2);

        let server_ctx = registry.get(receiver.call_id()).unwrap();
        assert!(receiver.cancel());

        let err = receiver.message().await.unwrap_err();
        assert_eq!(status(err), ErrorKind::Cancelled);

        let failure = server_ctx.failed().await;
        assert_eq!(failure.kind, ErrorKind::Cancelled);
        assert_eq!(server_ctx.state(), CallState::Failed);
    }

    #[tokio::test]
    async fn test_cancel_client_stream() {
        let (client, registry) = serve(ServiceConfig::default());

        let mut call = client
            .client_streaming::<AvgLongRequest, AvgLongResponse>(
                AVG_LONG_TIMES,
                CallOptions::default(),
            )
            .await
            .unwrap();
        for num in [4, 8, 15] {
            call.send(&AvgLongRequest { num }).await.unwrap();
        }

        let server_ctx = loop {
            match registry.get(call.call_id()) {
                Some(ctx) => break ctx,
                None => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        };
        assert!(call.cancel());
        assert_eq!(server_ctx.failed().await.kind, ErrorKind::Cancelled);

        let err = call.close_and_receive().await.unwrap_err();
        assert_eq!(status(err), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_deadline_exceeded_mid_stream() {
        let config = ServiceConfig::builder()
            .stream_pacing(Duration::from_millis(200))
            .build();
        let client = calculator(config);

        let options = CallOptions::builder()
            .timeout(Duration::from_millis(100))
            .build();
        let mut receiver = client.divisors(1 << 10, options).await.unwrap();

        let mut received = 0;
        let err = loop {
            match receiver.message().await {
                Ok(Some(_)) => received += 1,
                Ok(None) => panic!("stream should not finish before the deadline"),
                Err(err) => break err,
            }
        };

        assert_eq!(received, 1);
        assert_eq!(status(err), ErrorKind::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_final_status_is_recorded_once() {
        let client = calculator(ServiceConfig::default());

        let mut call = client.find_maximum(CallOptions::default()).await.unwrap();
        let ctx = call.context().clone();
        assert_eq!(ctx.shape(), CallShape::BidiStream);

        call.send(&FindMaximumRequest { number: 4 }).await.unwrap();
        call.finish().await.unwrap();
        while call.message().await.unwrap().is_some() {}

        assert_eq!(ctx.outcome(), Some(Ok(())));
        assert!(!call.cancel());
        assert_eq!(ctx.outcome(), Some(Ok(())));
    }
}
