use anyhow::Result;
use clap::{Arg, ArgAction, Command, value_parser};
use empty_bucket_finder::{Config, find_empty_s3_buckets, set_up_logger};
use log::debug;

#[derive(Debug)]
struct Args {
    verbose: bool,
    region: Option<String>,
    max_age_days: i64,
}

fn parse_args() -> Args {
    let matches = Command::new("empty-bucket-finder")
        .version("0.1")
        .author("Jacob Luszcz")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Verbose mode. Outputs DEBUG and higher log messages."),
        )
        .arg(
            Arg::new("region")
                .short('r')
                .long("region")
                .env("AWS_REGION")
                .help("AWS region to list buckets from."),
        )
        .arg(
            Arg::new("max-age-days")
                .long("max-age-days")
                .value_parser(value_parser!(i64).range(0..))
                .help("Only buckets created more than this many days ago are checked. Defaults to 30."),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let region = matches.get_one::<String>("region").cloned();
    let max_age_days = matches
        .get_one::<i64>("max-age-days")
        .copied()
        .unwrap_or(Config::default().max_age_days);

    Args {
        verbose,
        region,
        max_age_days,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();
    set_up_logger(module_path!(), args.verbose);
    debug!("{:?}", args);

    let config = Config {
        max_age_days: args.max_age_days,
        ..Config::default()
    };

    let response = find_empty_s3_buckets(args.region, &config).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}
