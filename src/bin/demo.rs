use std::time::Duration;

use anyhow::Result;
use calc_rpc::call::ErrorKind;
use calc_rpc::client::{CallOptions, ClientConfig, RpcClient};
use calc_rpc::proto::calculator::FindMaximumRequest;
use calc_rpc::proto::greet::GreetRequest;
use calc_rpc::server::{RpcServer, ServerConfig};
use calc_rpc::service::calculator::CalculatorClient;
use calc_rpc::service::greet::GreetClient;
use calc_rpc::service::{self, ServiceConfig};
use calc_rpc::transport::{self, TransportConfig};
use calc_rpc::RpcError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let pacing = std::env::var("STREAM_PACING_MS")
        .ok()
        .and_then(|ms| ms.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(100));

    let config = ServiceConfig::builder()
        .stream_pacing(pacing)
        .greet_repeat(5)
        .greet_step(Duration::from_millis(300))
        .build();

    let (connection, listener) = transport::memory(TransportConfig::default());

    let mut server = RpcServer::new(ServerConfig::default());
    service::register_all(&mut server, &config)?;
    let registry = server.registry();

    tokio::spawn(async move {
        if let Err(e) = server.run(listener).await {
            error!("RPC server error: {e}");
        }
    });

    let client_config = ClientConfig::builder().client_id("demo".to_string()).build();
    let calculator =
        CalculatorClient::new(RpcClient::new(connection.clone(), client_config.clone()));
    let greeter = GreetClient::new(RpcClient::new(connection, client_config));

    run_calculator(&calculator).await?;
    run_greeter(&greeter).await?;

    info!(in_flight = registry.len(), "Demo finished");
    Ok(())
}

async fn run_calculator<C: calc_rpc::transport::Connection>(
    client: &CalculatorClient<C>,
) -> Result<()> {
    let sum = client.sum(3, 10, CallOptions::default()).await?;
    info!(sum, "SumData");

    let mut divisors = client.divisors(120, CallOptions::default()).await?;
    while let Some(response) = divisors.message().await? {
        info!(divisor = response.result, "SumManyTimes");
    }

    let average = client.average([1, 2, 3, 4], CallOptions::default()).await?;
    info!(average, "AvgLongTimes");

    let call = client.find_maximum(CallOptions::default()).await?;
    let (mut sender, mut receiver) = call.split();
    let sending = tokio::spawn(async move {
        for number in [1, 5, 3, 6, 2, 20] {
            sender.send(&FindMaximumRequest { number }).await?;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        sender.finish().await
    });
    while let Some(response) = receiver.message().await? {
        info!(maximum = response.maximum, "FindMaximum");
    }
    sending.await??;

    for number in [9, -1] {
        match client.square_root(number, CallOptions::default()).await {
            Ok(root) => info!(number, root, "SquareRoot"),
            Err(RpcError::Status(status)) if status.kind == ErrorKind::InvalidArgument => {
                warn!(number, message = %status.message, "SquareRoot rejected the input")
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

async fn run_greeter<C: calc_rpc::transport::Connection>(client: &GreetClient<C>) -> Result<()> {
    let greeting = client
        .greet("Ada", "Lovelace", CallOptions::default())
        .await?;
    info!(%greeting, "Greet");

    let mut greetings = client
        .greet_many_times("Ada", "Lovelace", CallOptions::default())
        .await?;
    while let Some(response) = greetings.message().await? {
        info!(greeting = %response.result, "GreetManyTimes");
    }

    let greeting = client
        .long_greet(
            ["Ada", "Alan", "Grace"].map(|name| GreetRequest::new(name, "")),
            CallOptions::default(),
        )
        .await?;
    info!(%greeting, "LongGreet");

    let mut call = client.greet_everyone(CallOptions::default()).await?;
    for name in ["Ada", "Alan", "Grace"] {
        call.send(&GreetRequest::new(name, "")).await?;
    }
    call.finish().await?;
    while let Some(response) = call.message().await? {
        info!(greeting = %response.result, "GreetEveryone");
    }

    for timeout in [Duration::from_secs(5), Duration::from_millis(500)] {
        let options = CallOptions::builder().timeout(timeout).build();
        match client.greet_with_deadline("Ada", "Lovelace", options).await {
            Ok(greeting) => info!(%greeting, ?timeout, "GreetWithDeadline"),
            Err(RpcError::Status(status)) if status.kind == ErrorKind::DeadlineExceeded => {
                warn!(?timeout, "GreetWithDeadline ran out of time")
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
