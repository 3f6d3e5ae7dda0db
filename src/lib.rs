use anyhow::{Context, Result, anyhow};
use aws_config::ConfigLoader;
use aws_config::retry::RetryConfig;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::DateTime as SdkDateTime;
use aws_sdk_s3::types::Bucket as SdkBucket;
use chrono::{DateTime, Duration, Utc};
use log::{LevelFilter, debug, info, trace, warn};
use serde::Serialize;

pub const APP_NAME: &str = "empty_bucket_finder";

const STATUS_OK: u16 = 200;

#[derive(Debug, Clone)]
pub struct Config {
    /// Buckets created at or after `now - max_age_days` are never probed.
    pub max_age_days: i64,
    /// Upper bound on objects requested per probe.
    pub probe_max_keys: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_age_days: 30,
            probe_max_keys: 1,
        }
    }
}

impl Config {
    fn validate(&self) -> Result<()> {
        if self.max_age_days < 0 {
            return Err(anyhow!("Invalid max age: {} days", self.max_age_days));
        }
        if self.probe_max_keys < 1 {
            return Err(anyhow!(
                "Invalid probe size: {} key(s)",
                self.probe_max_keys
            ));
        }
        Ok(())
    }

    fn cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let max_age = Duration::try_days(self.max_age_days)
            .ok_or_else(|| anyhow!("Failed to create duration for {} days", self.max_age_days))?;

        now.checked_sub_signed(max_age)
            .ok_or_else(|| anyhow!("Cutoff for {} days before {now} is out of range", self.max_age_days))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub name: String,
    pub creation_date: DateTime<Utc>,
    /// Region the bucket lives in, when the listing reports it.
    pub region: Option<String>,
}

/// One page of buckets as returned by the provider.
#[derive(Debug, Clone, Default)]
pub struct BucketListing {
    pub buckets: Vec<Bucket>,
    /// Set when the provider reported further pages that were not fetched.
    pub truncated: bool,
}

#[derive(Debug)]
pub enum ProbeOutcome {
    Empty,
    NotEmpty,
    Failed(anyhow::Error),
}

/// The two storage calls the finder needs.
#[allow(async_fn_in_trait)]
pub trait StorageProvider {
    async fn list_buckets(&self) -> Result<BucketListing>;

    /// Returns how many objects came back when asking for at most `max_keys`.
    async fn count_objects(&self, bucket: &Bucket, max_keys: i32) -> Result<usize>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmptyBucketsResponse {
    pub status_code: u16,
    pub empty_buckets: Vec<String>,
}

impl EmptyBucketsResponse {
    fn ok(empty_buckets: Vec<String>) -> Self {
        Self {
            status_code: STATUS_OK,
            empty_buckets,
        }
    }
}

pub fn set_up_logger(calling_module: &'static str, verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let result = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] [{}] {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(LevelFilter::Warn)
        .level_for(APP_NAME, level)
        .level_for(calling_module, level)
        .chain(std::io::stdout())
        .apply();

    // Warm Lambda invocations reuse the process, so the logger may already be set
    if let Err(e) = result {
        trace!("Logger already initialized: {e}");
    }
}

fn to_utc(date_time: &SdkDateTime) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(date_time.secs(), date_time.subsec_nanos())
        .ok_or_else(|| anyhow!("Failed to parse timestamp: {}", date_time))
}

fn bucket_from_sdk(bucket: &SdkBucket) -> Result<Bucket> {
    let name = bucket
        .name()
        .ok_or_else(|| anyhow!("Bucket is missing a name"))?;

    let creation_date = bucket
        .creation_date()
        .ok_or_else(|| anyhow!("Bucket {} is missing a creation date", name))?;

    let creation_date = to_utc(creation_date)
        .with_context(|| format!("Failed to parse creation date for bucket: {}", name))?;

    Ok(Bucket {
        name: name.to_string(),
        creation_date,
        region: bucket.bucket_region().map(str::to_string),
    })
}

pub struct S3Storage {
    client: Client,
}

impl S3Storage {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn from_env(region: Option<String>) -> Self {
        let mut aws_config = ConfigLoader::default();
        if let Some(region) = region {
            aws_config = aws_config.region(Region::new(region));
        }

        let aws_config = aws_config
            .retry_config(RetryConfig::standard())
            .load()
            .await;

        Self::new(Client::new(&aws_config))
    }
}

impl StorageProvider for S3Storage {
    async fn list_buckets(&self) -> Result<BucketListing> {
        trace!("Listing buckets");

        let list_output = self
            .client
            .list_buckets()
            .send()
            .await
            .context("Failed to list buckets")?;

        let mut buckets = Vec::new();
        for bucket in list_output.buckets() {
            match bucket_from_sdk(bucket) {
                Ok(bucket) => buckets.push(bucket),
                Err(e) => warn!("Skipping bucket: {e}"),
            }
        }

        Ok(BucketListing {
            buckets,
            truncated: list_output.continuation_token().is_some(),
        })
    }

    async fn count_objects(&self, bucket: &Bucket, max_keys: i32) -> Result<usize> {
        let bucket_name = &bucket.name;
        trace!(
            "Listing up to {max_keys} object(s) in {bucket_name} (region={:?})",
            bucket.region
        );

        let request = self
            .client
            .list_objects_v2()
            .bucket(bucket_name)
            .max_keys(max_keys);

        // S3 answers requests sent to the wrong region with a redirect the SDK does not follow
        let list_output = match &bucket.region {
            Some(region) => {
                request
                    .customize()
                    .config_override(
                        aws_sdk_s3::config::Builder::default().region(Region::new(region.clone())),
                    )
                    .send()
                    .await
            }
            None => request.send().await,
        }
        .with_context(|| format!("Failed to list objects in bucket: {}", bucket_name))?;

        Ok(list_output.contents().len())
    }
}

async fn probe_bucket<P: StorageProvider>(
    provider: &P,
    bucket: &Bucket,
    max_keys: i32,
) -> ProbeOutcome {
    match provider.count_objects(bucket, max_keys).await {
        Ok(0) => ProbeOutcome::Empty,
        Ok(_) => ProbeOutcome::NotEmpty,
        Err(e) => ProbeOutcome::Failed(e),
    }
}

/// Reports buckets created before `now - config.max_age_days` that hold no objects.
///
/// Probe failures exclude the bucket and never abort the pass. A failure to list
/// buckets is returned as an error.
pub async fn find_empty_buckets<P: StorageProvider>(
    provider: &P,
    now: DateTime<Utc>,
    config: &Config,
) -> Result<EmptyBucketsResponse> {
    config.validate()?;
    let cutoff = config.cutoff(now)?;

    let listing = provider.list_buckets().await?;
    if listing.truncated {
        warn!(
            "Bucket listing has more pages; only the first {} bucket(s) are checked",
            listing.buckets.len()
        );
    }

    let bucket_ct = listing.buckets.len();
    let mut old_ct = 0;
    let mut failed_ct = 0;
    let mut empty_buckets = Vec::new();

    for bucket in listing.buckets {
        if bucket.creation_date >= cutoff {
            debug!(
                "Ignoring {} (creation date {} >= {cutoff})",
                bucket.name, bucket.creation_date
            );
            continue;
        }

        old_ct += 1;
        match probe_bucket(provider, &bucket, config.probe_max_keys).await {
            ProbeOutcome::Empty => {
                debug!("{} is empty (creation date {})", bucket.name, bucket.creation_date);
                empty_buckets.push(bucket.name);
            }
            ProbeOutcome::NotEmpty => debug!("{} has objects", bucket.name),
            ProbeOutcome::Failed(e) => {
                failed_ct += 1;
                debug!("Skipping {}: {e:#}", bucket.name);
            }
        }
    }

    info!(
        "Found {} empty bucket(s) out of {old_ct} created before {cutoff} ({bucket_ct} listed, {failed_ct} probe failure(s))",
        empty_buckets.len()
    );

    Ok(EmptyBucketsResponse::ok(empty_buckets))
}

pub async fn find_empty_s3_buckets(
    region: Option<String>,
    config: &Config,
) -> Result<EmptyBucketsResponse> {
    let storage = S3Storage::from_env(region).await;
    find_empty_buckets(&storage, Utc::now(), config).await
}
