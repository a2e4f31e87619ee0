use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::*;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use echoprobe::{status, Outcome, PingSummary};

use crate::cli::OutputFormat;

/// Everything one run of the driver produced
#[derive(Debug, Clone, Serialize)]
pub struct PingReport {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub timeout_ms: u64,
    pub payload_size: usize,
    pub hosts: Vec<PingSummary>,
}

impl PingReport {
    pub fn alive_hosts(&self) -> usize {
        self.hosts.iter().filter(|h| h.is_alive()).count()
    }
}

pub struct OutputWriter {
    format: OutputFormat,
    file: Option<PathBuf>,
    alive_only: bool,
}

impl OutputWriter {
    pub fn new(format: OutputFormat, file: Option<PathBuf>, alive_only: bool) -> Self {
        Self { format, file, alive_only }
    }

    pub fn write(&self, report: &PingReport) -> Result<()> {
        let output = self.render(report)?;

        match &self.file {
            Some(path) => {
                let file = File::create(path)?;
                let mut writer = BufWriter::new(file);
                writer.write_all(output.as_bytes())?;
                writer.flush()?;
            }
            None => {
                print!("{}", output);
                io::stdout().flush()?;
            }
        }

        Ok(())
    }

    fn render(&self, report: &PingReport) -> Result<String> {
        match self.format {
            OutputFormat::Human => Ok(self.format_human(report)),
            OutputFormat::Json => self.format_json(report),
        }
    }

    fn format_human(&self, report: &PingReport) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "{} {} host(s), timeout {}ms, payload {} bytes\n\n",
            "PING".bold(),
            report.hosts.len(),
            report.timeout_ms,
            report.payload_size
        ));

        for host in &report.hosts {
            if self.alive_only && !host.is_alive() {
                continue;
            }
            output.push_str(&format_host(host));
            output.push('\n');
        }

        let elapsed = report.end_time - report.start_time;
        output.push_str(&format!(
            "\n{} {}/{} hosts alive in {}ms\n",
            "DONE".bold(),
            report.alive_hosts().to_string().green(),
            report.hosts.len(),
            elapsed.num_milliseconds()
        ));
        output
    }

    fn format_json(&self, report: &PingReport) -> Result<String> {
        if !self.alive_only {
            return Ok(serde_json::to_string_pretty(report)?);
        }
        let mut filtered = report.clone();
        filtered.hosts.retain(|h| h.is_alive());
        Ok(serde_json::to_string_pretty(&filtered)?)
    }
}

fn format_host(host: &PingSummary) -> String {
    let target = format!("{:<15}", host.target);

    if host.is_alive() {
        let ttl = host.ttl.map(|t| format!(" ttl={}", t)).unwrap_or_default();
        let jitter = host
            .jitter_ms
            .map(|j| format!(" jitter={:.2}ms", j))
            .unwrap_or_default();
        return format!(
            "{}  {}  {}/{} replies  rtt min/avg/max={:.2}/{:.2}/{:.2}ms{}{}",
            target.bold(),
            "alive".green(),
            host.received,
            host.sent,
            host.min_rtt_ms.unwrap_or_default(),
            host.avg_rtt_ms.unwrap_or_default(),
            host.max_rtt_ms.unwrap_or_default(),
            jitter,
            ttl
        );
    }

    let (label, reason) = match host.replies.iter().rev().find(|r| !r.is_success()) {
        Some(reply) => (reply.outcome, status::describe(reply.raw_status)),
        None => (Outcome::Timeout, "no probes sent"),
    };
    let label = match label {
        Outcome::Unreachable => "unreachable".yellow(),
        Outcome::TransportError => "error".red(),
        _ => "dead".red(),
    };
    format!(
        "{}  {}  0/{} replies  ({})",
        target.bold(),
        label,
        host.sent,
        reason
    )
}
