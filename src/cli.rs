use clap::{Parser, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "echoprobe")]
#[command(version)]
#[command(about = "Send ICMP echo probes to a list of IPv4 hosts", long_about = None)]
pub struct Cli {
    #[arg(required_unless_present = "write_config", help = "Target IPv4 addresses")]
    pub targets: Vec<IpAddr>,

    #[arg(short, long, help = "Timeout in milliseconds for each probe")]
    pub timeout: Option<u64>,

    #[arg(short = 's', long, help = "Payload size in bytes")]
    pub payload_size: Option<usize>,

    #[arg(short = 'n', long, help = "Echo requests per target")]
    pub count: Option<u32>,

    #[arg(short, long, help = "Extra attempts for a probe that did not succeed")]
    pub retries: Option<u32>,

    #[arg(short, long, help = "Number of parallel workers, each with its own ICMP handle")]
    pub parallel: Option<usize>,

    #[arg(short = 'o', long, value_enum, help = "Output format")]
    pub output_format: Option<OutputFormat>,

    #[arg(short = 'f', long, help = "Output file path")]
    pub output_file: Option<PathBuf>,

    #[arg(short, long, help = "Config file (defaults to the user config directory)")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Save the effective settings to the config file and exit")]
    pub write_config: bool,

    #[arg(long, help = "Disable colored output")]
    pub no_color: bool,

    #[arg(long, help = "Only report hosts that answered")]
    pub alive_only: bool,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum OutputFormat {
    #[value(name = "human", help = "Human-readable output")]
    Human,
    #[value(name = "json", help = "JSON output")]
    Json,
}

impl OutputFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "human" => Some(OutputFormat::Human),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }
}
