use empty_bucket_finder::{Config, find_empty_s3_buckets, set_up_logger};
use lambda_runtime::{LambdaEvent, service_fn};
use serde_json::Value;
use std::error::Error;

type LambdaError = Box<dyn Error + Send + Sync + 'static>;

#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    let func = service_fn(function);
    lambda_runtime::run(func).await?;
    Ok(())
}

async fn function(_event: LambdaEvent<Value>) -> Result<Value, LambdaError> {
    set_up_logger(module_path!(), false);

    let response = find_empty_s3_buckets(None, &Config::default()).await?;

    Ok(serde_json::to_value(response)?)
}
