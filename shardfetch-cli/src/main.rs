//! Shardfetch CLI - resumable sharded HTTP downloads from the command line.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use shardfetch::{ChecksumAlgorithm, FetchConfig, MonoGetTask, ParallelGetTask};

#[derive(Parser)]
#[command(name = "shardfetch")]
#[command(about = "Download a file over HTTP with sharded, resumable transfers", long_about = None)]
struct Args {
    /// Download URL
    url: String,

    /// Destination file path
    output: PathBuf,

    /// Number of parallel shards
    #[arg(short, long, default_value_t = 8)]
    concurrent: u32,

    /// Delay between shard worker admissions, in milliseconds
    #[arg(long, default_value_t = 0)]
    shard_delay_ms: u64,

    /// Use a single stream instead of sharded parallel mode
    #[arg(long)]
    mono: bool,

    /// Resume from the journal written by a previous interrupted run
    #[arg(long)]
    resume: bool,

    /// Do not write a journal (disables resume)
    #[arg(long)]
    no_journal: bool,

    /// Maximum retries per shard
    #[arg(long, default_value_t = 5)]
    retries: u32,

    /// Proxy: a proxy URL, "env" to read the environment, or "none"
    #[arg(long, default_value = "none")]
    proxy: String,

    /// Extra request header, NAME:VALUE (repeatable)
    #[arg(long = "header", value_name = "NAME:VALUE")]
    headers: Vec<String>,

    /// Verify the finished file, ALGORITHM:HEX (md5, sha1 or sha256)
    #[arg(long, value_name = "ALGORITHM:HEX")]
    checksum: Option<String>,

    /// Suppress the progress line
    #[arg(long)]
    quiet: bool,
}

fn build_config(args: &Args) -> FetchConfig {
    let mut config = FetchConfig::default().with_max_retries(args.retries);
    match args.proxy.as_str() {
        "none" => {}
        "env" => config = config.with_environment_proxy(),
        url => config = config.with_proxy(url),
    }
    for header in &args.headers {
        match header.split_once(':') {
            Some((name, value)) => {
                config = config.with_header(name.trim(), value.trim());
            }
            None => {
                eprintln!("Error: header must be NAME:VALUE, got '{}'", header);
                process::exit(2);
            }
        }
    }
    config
}

fn parse_checksum(spec: &str) -> (ChecksumAlgorithm, String) {
    let Some((algorithm, hex)) = spec.split_once(':') else {
        eprintln!("Error: checksum must be ALGORITHM:HEX, got '{}'", spec);
        process::exit(2);
    };
    match algorithm.parse::<ChecksumAlgorithm>() {
        Ok(algorithm) => (algorithm, hex.to_string()),
        Err(err) => {
            eprintln!("Error: {}", err);
            process::exit(2);
        }
    }
}

fn journal_path(args: &Args) -> PathBuf {
    if args.no_journal {
        PathBuf::new()
    } else {
        let mut name = args.output.as_os_str().to_owned();
        name.push(".process.json");
        PathBuf::from(name)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = build_config(&args);
    let checksum = args.checksum.as_deref().map(parse_checksum);
    let journal = journal_path(&args);
    let resume = args.resume && journal.exists();
    if args.resume && !resume {
        eprintln!("No journal at {}, starting fresh", journal.display());
    }

    let result = if args.mono {
        let mut task = if resume {
            match MonoGetTask::from_journal(&journal, config) {
                Ok(task) => task,
                Err(err) => {
                    eprintln!("Error reading journal: {}", err);
                    process::exit(1);
                }
            }
        } else {
            MonoGetTask::new(args.url.as_str(), &args.output, &journal, config)
        };
        if !args.quiet {
            task.subscribe_status(shardfetch::status::console_subscriber());
        }
        task.run().await
    } else {
        let mut task = if resume {
            match ParallelGetTask::from_journal(&journal, config) {
                Ok(task) => task,
                Err(err) => {
                    eprintln!("Error reading journal: {}", err);
                    process::exit(1);
                }
            }
        } else {
            ParallelGetTask::new(
                args.url.as_str(),
                &args.output,
                &journal,
                args.concurrent,
                Duration::from_millis(args.shard_delay_ms),
                config,
            )
        };
        if !args.quiet {
            task.subscribe_status(shardfetch::status::console_subscriber());
        }
        task.run().await
    };

    if let Err(err) = result {
        eprintln!("Download failed: {}", err);
        process::exit(1);
    }

    if let Some((algorithm, expected)) = checksum {
        match shardfetch::checksum::verify_file(&args.output, algorithm, &expected) {
            Ok(true) => println!("Checksum OK"),
            Ok(false) => {
                eprintln!("Checksum mismatch for {}", args.output.display());
                process::exit(1);
            }
            Err(err) => {
                eprintln!("Checksum verification failed: {}", err);
                process::exit(1);
            }
        }
    }
}
