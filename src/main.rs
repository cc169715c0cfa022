//! oai-harvester CLI
//!
//! # Commands
//!
//! - `harvest` - Harvest records and write them as JSON, DSpace items or CSV
//! - `identify` - Show repository information
//! - `sets` - List available sets
//! - `formats` - List metadata formats

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use oai_harvester::export::{to_csv, DSpaceExporter};
use oai_harvester::{Harvester, HarvesterConfig, ListOptions, Record};

const PROGRESS_EVERY: usize = 100;

/// OAI-PMH harvester with DSpace export.
#[derive(Parser)]
#[command(name = "oai-harvester")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Dspace,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest records from an OAI-PMH endpoint
    Harvest {
        /// OAI-PMH endpoint URL
        url: String,

        /// Metadata prefix
        #[arg(short, long, default_value = "oai_dc")]
        prefix: String,

        /// Set to harvest
        #[arg(short, long)]
        set: Option<String>,

        /// Lower datestamp bound (YYYY-MM-DD or YYYY-MM-DDThh:mm:ssZ)
        #[arg(short, long)]
        from: Option<String>,

        /// Upper datestamp bound
        #[arg(short, long)]
        until: Option<String>,

        /// Maximum records to harvest
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "dspace")]
        format: OutputFormat,
    },

    /// Show repository information
    Identify {
        /// OAI-PMH endpoint URL
        url: String,
    },

    /// List available sets
    Sets {
        /// OAI-PMH endpoint URL
        url: String,
    },

    /// List metadata formats
    Formats {
        /// OAI-PMH endpoint URL
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Harvest {
            url,
            prefix,
            set,
            from,
            until,
            limit,
            output,
            format,
        } => {
            let mut options = ListOptions::new(prefix);
            options.set = set;
            options.from = from;
            options.until = until;
            harvest(&url, &options, limit, output, format).await?;
        }
        Commands::Identify { url } => {
            let harvester = Harvester::new(HarvesterConfig::new(url))?;
            let identify = harvester.identify().await?;
            let na = |v: &Option<String>| v.clone().unwrap_or_else(|| "N/A".to_string());
            println!("Repository: {}", na(&identify.repository_name));
            println!("Base URL: {}", na(&identify.base_url));
            println!("Protocol: {}", na(&identify.protocol_version));
            println!("Earliest: {}", na(&identify.earliest_datestamp));
            println!("Granularity: {}", na(&identify.granularity));
            println!("Deleted records: {}", na(&identify.deleted_record));
            if !identify.admin_emails.is_empty() {
                println!("Admin: {}", identify.admin_emails.join(", "));
            }
        }
        Commands::Sets { url } => {
            let harvester = Harvester::new(HarvesterConfig::new(url))?;
            let mut sets = harvester.list_sets();
            while let Some(set) = sets.next().await {
                let set = set?;
                println!("{}: {}", set.set_spec, set.set_name.unwrap_or_default());
            }
        }
        Commands::Formats { url } => {
            let harvester = Harvester::new(HarvesterConfig::new(url))?;
            let mut formats = harvester.list_metadata_formats(None);
            while let Some(format) = formats.next().await {
                let format = format?;
                println!("{}: {}", format.prefix, format.namespace.unwrap_or_default());
            }
        }
    }

    Ok(())
}

/// `--limit 0` means no limit.
fn effective_limit(limit: Option<usize>) -> Option<usize> {
    limit.filter(|&max| max > 0)
}

fn limit_reached(limit: Option<usize>, harvested: usize) -> bool {
    limit.is_some_and(|max| harvested >= max)
}

async fn harvest(
    url: &str,
    options: &ListOptions,
    limit: Option<usize>,
    output: Option<PathBuf>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let harvester = Harvester::new(HarvesterConfig::new(url))?;
    info!(url, prefix = %options.metadata_prefix, "Harvesting");

    let limit = effective_limit(limit);
    let mut records: Vec<Record> = Vec::new();
    let mut stream = harvester.list_records(options)?;
    while !limit_reached(limit, records.len()) {
        let Some(record) = stream.next().await else {
            break;
        };
        records.push(record?);
        if records.len() % PROGRESS_EVERY == 0 {
            info!(records = records.len(), "Harvest progress");
        }
    }
    info!(records = records.len(), pages = stream.pages_fetched(), "Harvest finished");

    let rendered = match format {
        OutputFormat::Dspace => DSpaceExporter::default().to_json(&records)?,
        OutputFormat::Json => serde_json::to_string_pretty(&records)?,
        OutputFormat::Csv => to_csv(&records),
    };

    match output {
        Some(path) => {
            std::fs::write(&path, rendered)?;
            info!(path = %path.display(), "Saved");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_limit_means_unlimited() {
        let limit = effective_limit(Some(0));
        assert_eq!(limit, None);
        assert!(!limit_reached(limit, 0));
        assert!(!limit_reached(limit, 10_000));
    }

    #[test]
    fn test_limit_checked_before_next_record() {
        let limit = effective_limit(Some(2));
        assert!(!limit_reached(limit, 0));
        assert!(!limit_reached(limit, 1));
        assert!(limit_reached(limit, 2));
        assert!(!limit_reached(effective_limit(None), 5));
    }
}
