use cloudwatch_emf_logger::{DimensionSet, Error, MetricsLogger};
use std::time::{Duration, Instant};

async fn handle_request(metrics: &mut MetricsLogger, request_id: u32) -> Result<(), Error> {
    let started = Instant::now();

    // Do something important
    tokio::time::sleep(Duration::from_millis(5)).await;

    metrics
        .put_dimensions(DimensionSet::of([("Method", "Default")])?)?
        .put_property("RequestId", format!("request-{request_id}"))
        .put_metric("requests", 1.0)
        .put_metric_with_unit(
            "latency",
            started.elapsed().as_secs_f64() * 1000.0,
            metrics::Unit::Milliseconds,
        );

    metrics.flush().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .with_target(false)
        .without_time()
        .compact()
        .init();

    let mut metrics = cloudwatch_emf_logger::Builder::from_env()
        .namespace("MetricsTest")
        .service_name("MetricsExample")
        .build()?;

    for request_id in 0..3 {
        handle_request(&mut metrics, request_id).await?;
    }
    Ok(())
}
