mod cli;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use echoprobe::{codec, send_echo, status, EchoReply, PingSummary, TransportHandle};

use crate::cli::{Cli, OutputFormat};
use crate::config::Config;
use crate::output::{OutputWriter, PingReport};

/// Probe parameters after merging config file and flags
#[derive(Debug, Clone)]
struct ProbeSettings {
    timeout_ms: u64,
    payload: Vec<u8>,
    count: u32,
    retries: u32,
    parallelism: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "echoprobe=debug" } else { "echoprobe=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(Config::get_config_path);
    let config = match &cli.config {
        None => Config::load()?,
        Some(path) if cli.write_config && !path.exists() => Config::default(),
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
    };
    let merged = merge_config(&cli, &config)?;

    if cli.write_config {
        merged
            .save_to(&config_path)
            .with_context(|| format!("failed to write config to {}", config_path.display()))?;
        println!("Saved settings to {}", config_path.display());
        return Ok(());
    }
    let settings = ProbeSettings::from_config(&merged);

    if cli.no_color || !config.output.color_enabled {
        colored::control::set_override(false);
    }

    let format = cli
        .output_format
        .or_else(|| OutputFormat::from_name(&config.output.default_format))
        .unwrap_or(OutputFormat::Human);
    let alive_only = cli.alive_only || !config.output.show_dead_hosts;
    let writer = OutputWriter::new(format, cli.output_file.clone(), alive_only);

    let report = run(cli.targets.clone(), settings).await?;
    writer.write(&report)?;

    Ok(())
}

impl ProbeSettings {
    fn from_config(config: &Config) -> Self {
        Self {
            timeout_ms: config.probe.timeout_ms,
            payload: codec::payload_of_size(config.probe.payload_size),
            count: config.probe.count,
            retries: config.probe.retries,
            parallelism: config.probe.parallelism,
        }
    }
}

/// Apply command line overrides on top of the loaded config
fn merge_config(cli: &Cli, config: &Config) -> Result<Config> {
    let mut probe = config.probe.clone();
    if let Some(timeout) = cli.timeout {
        probe.timeout_ms = timeout;
    }
    if let Some(size) = cli.payload_size {
        probe.payload_size = size;
    }
    if let Some(count) = cli.count {
        probe.count = count;
    }
    if let Some(retries) = cli.retries {
        probe.retries = retries;
    }
    if let Some(parallel) = cli.parallel {
        probe.parallelism = parallel;
    }

    let merged = Config {
        probe,
        output: config.output.clone(),
    };
    merged.validate()?;
    Ok(merged)
}

async fn run(targets: Vec<IpAddr>, settings: ProbeSettings) -> Result<PingReport> {
    let start_time = chrono::Utc::now();

    let pb = ProgressBar::new(targets.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.green/black} {pos}/{len} hosts ({eta})")?
            .progress_chars("=> "),
    );

    // Round-robin the targets over the workers, keeping their input position.
    let workers = settings.parallelism.min(targets.len()).max(1);
    let mut shares: Vec<Vec<(usize, IpAddr)>> = vec![Vec::new(); workers];
    for (index, target) in targets.iter().copied().enumerate() {
        shares[index % workers].push((index, target));
    }

    let settings = Arc::new(settings);
    let tasks = shares.into_iter().map(|share| {
        let settings = settings.clone();
        let pb = pb.clone();
        tokio::task::spawn_blocking(move || run_worker(share, &settings, &pb))
    });

    let mut results = Vec::with_capacity(targets.len());
    for joined in join_all(tasks).await {
        results.extend(joined??);
    }
    results.sort_by_key(|(index, _)| *index);

    pb.finish_and_clear();

    Ok(PingReport {
        start_time,
        end_time: chrono::Utc::now(),
        timeout_ms: settings.timeout_ms,
        payload_size: settings.payload.len(),
        hosts: results.into_iter().map(|(_, summary)| summary).collect(),
    })
}

/// Probe a share of the targets through one dedicated handle
fn run_worker(
    share: Vec<(usize, IpAddr)>,
    settings: &ProbeSettings,
    pb: &ProgressBar,
) -> Result<Vec<(usize, PingSummary)>> {
    let handle = TransportHandle::open().context(
        "cannot open an ICMP endpoint (raw sockets need CAP_NET_RAW, \
         datagram sockets need net.ipv4.ping_group_range)",
    )?;
    debug!(kind = %handle.kind(), targets = share.len(), "worker started");

    let mut summaries = Vec::with_capacity(share.len());
    for (index, target) in share {
        let replies = (0..settings.count)
            .map(|_| probe_with_retries(&handle, target, settings))
            .collect();
        summaries.push((index, PingSummary::from_replies(target, replies)));
        pb.inc(1);
    }

    handle.close()?;
    Ok(summaries)
}

/// One logical probe: the first attempt plus up to `retries` more until one succeeds
fn probe_with_retries(handle: &TransportHandle, target: IpAddr, settings: &ProbeSettings) -> EchoReply {
    let mut attempt = 0;
    loop {
        let reply = match send_echo(handle, target, &settings.payload, settings.timeout_ms) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(%target, attempt, "probe failed: {}", e);
                EchoReply::from_status(status::IP_GENERAL_FAILURE, None)
            }
        };
        if reply.is_success() || attempt >= settings.retries {
            return reply;
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from(["echoprobe", "127.0.0.1", "-t", "250", "-s", "8", "-r", "2"]);
        let settings = ProbeSettings::from_config(&merge_config(&cli, &Config::default()).unwrap());

        assert_eq!(settings.timeout_ms, 250);
        assert_eq!(settings.payload.len(), 8);
        assert_eq!(settings.retries, 2);
        assert_eq!(settings.count, 1);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let cli = Cli::parse_from(["echoprobe", "127.0.0.1", "-t", "0"]);
        assert!(merge_config(&cli, &Config::default()).is_err());
    }

    #[test]
    fn test_written_config_keeps_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let cli = Cli::parse_from(["echoprobe", "--write-config", "-t", "750", "-p", "4"]);

        merge_config(&cli, &Config::default()).unwrap().save_to(&path).unwrap();
        let saved = Config::load_from(&path).unwrap();

        assert_eq!(saved.probe.timeout_ms, 750);
        assert_eq!(saved.probe.parallelism, 4);
        assert_eq!(saved.probe.payload_size, Config::default().probe.payload_size);
    }

    #[tokio::test]
    async fn test_run_keeps_target_order() {
        if TransportHandle::open().is_err() {
            return;
        }
        let targets: Vec<IpAddr> = vec!["127.0.0.1".parse().unwrap(), "127.0.0.2".parse().unwrap(), "127.0.0.1".parse().unwrap()];
        let settings = ProbeSettings {
            timeout_ms: 500,
            payload: codec::payload_of_size(16),
            count: 2,
            retries: 0,
            parallelism: 2,
        };

        let report = run(targets.clone(), settings).await.unwrap();
        let reported: Vec<IpAddr> = report.hosts.iter().map(|h| h.target).collect();
        assert_eq!(reported, targets);
        assert!(report.hosts.iter().all(|h| h.sent == 2));
    }
}
