use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "carlog",
    about = "Load a content-addressed archive into a segmented block store",
    version
)]
pub struct Cli {
    /// Archive to ingest
    pub archive: PathBuf,

    /// Store directory (overrides the config file)
    #[arg(long, value_name = "DIR")]
    pub store: Option<PathBuf>,

    /// TOML store configuration
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of index shards
    #[arg(long)]
    pub buckets: Option<u32>,

    /// Maximum concurrently running puts
    #[arg(long)]
    pub max_in_flight: Option<usize>,

    /// Seconds between throughput reports
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub report_interval: u64,

    /// Read every block back after storing it and compare
    #[arg(long)]
    pub verify: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_archive_only() {
        let cli = Cli::try_parse_from(["carlog", "chain.car"]).unwrap();
        assert_eq!(cli.archive, PathBuf::from("chain.car"));
        assert!(cli.store.is_none());
        assert!(cli.config.is_none());
        assert!(cli.buckets.is_none());
        assert!(cli.max_in_flight.is_none());
        assert_eq!(cli.report_interval, 60);
        assert!(!cli.verify);
        assert!(!cli.verbose);
    }

    #[test]
    fn parse_all_options() {
        let cli = Cli::try_parse_from([
            "carlog",
            "--store",
            "/data/blocks",
            "--config",
            "carlog.toml",
            "--buckets",
            "64",
            "--max-in-flight",
            "500",
            "--report-interval",
            "5",
            "--verify",
            "-v",
            "chain.car",
        ])
        .unwrap();
        assert_eq!(cli.store, Some(PathBuf::from("/data/blocks")));
        assert_eq!(cli.config, Some(PathBuf::from("carlog.toml")));
        assert_eq!(cli.buckets, Some(64));
        assert_eq!(cli.max_in_flight, Some(500));
        assert_eq!(cli.report_interval, 5);
        assert!(cli.verify);
        assert!(cli.verbose);
    }

    #[test]
    fn archive_is_required() {
        assert!(Cli::try_parse_from(["carlog"]).is_err());
    }

    #[test]
    fn bucket_count_must_be_numeric() {
        assert!(Cli::try_parse_from(["carlog", "--buckets", "lots", "a.car"]).is_err());
    }
}
