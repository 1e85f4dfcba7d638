//! Replay command - feed a packet trace through the classifier
//!
//! A trace is a JSON-lines file, one packet per line:
//!
//! ```text
//! {"conn": 4096, "transport": "udp", "src": "10.0.0.2", "sport": 7000,
//!  "dst": "10.0.0.1", "dport": 8000, "ts": 1, "payload": "65000000"}
//! ```
//!
//! `token` defaults to the line number, so a line repeated verbatim with an
//! explicit `token` replays a redelivery. Blank lines and `#` comments are
//! skipped.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use flowclass_core::{
    admin, Classifier, Config, ConnId, FlowEntry, FlowIdentity, MarkTarget, Packet, Policy,
    ProtocolBitmask, ProtocolId, Stats, Transport, Verdict,
};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Replay command arguments
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// JSON-lines packet trace
    pub trace: PathBuf,

    /// Protocols the policy blocks (comma-separated keys, e.g. kugou_music,not_yet)
    #[arg(short, long, value_delimiter = ',', value_name = "PROTOCOLS")]
    pub block: Vec<String>,

    /// Block only the first N matching packets of a flow (negative disables)
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    pub match_above: Option<i32>,

    /// Counter pool used by the threshold
    #[arg(long, default_value = "0")]
    pub pool: usize,

    /// Classify only, reporting this mark instead of a verdict
    #[arg(long, value_name = "MARK", conflicts_with_all = ["block", "match_above"])]
    pub mark: Option<u32>,

    /// Print the flow table after the replay
    #[arg(long)]
    pub show_flows: bool,

    /// Print only the summary
    #[arg(short, long)]
    pub summary_only: bool,
}

/// One packet of a trace file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct TraceRecord {
    conn: u64,
    transport: String,
    src: IpAddr,
    sport: u16,
    dst: IpAddr,
    dport: u16,
    #[serde(default)]
    ts: u64,
    #[serde(default)]
    token: Option<u64>,
    #[serde(default)]
    payload: String,
}

impl TraceRecord {
    fn identity(&self) -> Result<FlowIdentity> {
        Ok(FlowIdentity::from_tuple(
            parse_transport(&self.transport)?,
            self.src,
            self.sport,
            self.dst,
            self.dport,
        ))
    }

    fn payload(&self) -> Result<Vec<u8>> {
        let hex_str: String = self.payload.chars().filter(|c| !c.is_whitespace()).collect();
        hex::decode(hex_str).context("payload is not valid hex")
    }
}

fn parse_transport(name: &str) -> Result<Transport> {
    match name.to_ascii_lowercase().as_str() {
        "tcp" => Ok(Transport::Tcp),
        "udp" => Ok(Transport::Udp),
        "icmp" => Ok(Transport::Icmp),
        other => other
            .parse::<u8>()
            .map(Transport::from_u8)
            .with_context(|| format!("Unknown transport: {name}")),
    }
}

/// How each packet is offered to the classifier
#[derive(Debug, Clone, Copy)]
enum Invocation {
    Match(Policy),
    Mark(MarkTarget),
}

impl Invocation {
    fn from_args(args: &ReplayArgs) -> Result<Self> {
        if let Some(mark) = args.mark {
            return Ok(Self::Mark(MarkTarget { mark }));
        }

        let protocols = ProtocolBitmask::from_keys(&args.block).context("Invalid --block list")?;
        let mut policy = Policy::new(protocols).with_pool(args.pool);
        if let Some(threshold) = args.match_above {
            policy = policy.with_match_above(threshold);
        }
        policy.validate().context("Invalid policy")?;
        Ok(Self::Match(policy))
    }
}

/// Result of offering one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Verdict(Verdict),
    Mark(u32),
}

/// Execute replay command
pub fn execute(args: &ReplayArgs, config: &Config) -> Result<()> {
    let mut classifier = Classifier::new(config).context("Failed to build classifier")?;
    let invocation = Invocation::from_args(args)?;

    info!(trace = %args.trace.display(), "replaying trace");
    let lines = replay(&mut classifier, &args.trace, invocation, |line| {
        if !args.summary_only {
            print_line(line);
        }
    })?;

    println!();
    print_summary(lines, classifier.stats(), classifier.cache().evictions());

    if args.show_flows {
        println!();
        println!("{}", "Flows:".bold());
        for entry in classifier.cache().iter() {
            println!("  {}", admin::describe_flow(entry));
        }
    }

    classifier.shutdown();
    Ok(())
}

/// One replayed packet, as reported to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReplayLine {
    line: usize,
    identity: FlowIdentity,
    protocol: ProtocolId,
    outcome: Outcome,
}

fn replay(
    classifier: &mut Classifier,
    path: &Path,
    invocation: Invocation,
    mut report: impl FnMut(&ReplayLine),
) -> Result<usize> {
    let file = File::open(path).with_context(|| format!("Failed to open trace {}", path.display()))?;
    let mut replayed = 0;

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line_no = idx + 1;
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let record: TraceRecord = serde_json::from_str(line)
            .with_context(|| format!("{}:{line_no}: invalid trace record", path.display()))?;
        let identity = record
            .identity()
            .with_context(|| format!("{}:{line_no}", path.display()))?;
        let payload = record
            .payload()
            .with_context(|| format!("{}:{line_no}", path.display()))?;

        let packet = Packet {
            conn: ConnId(record.conn),
            identity,
            payload: &payload,
            timestamp: record.ts,
            token: record.token.unwrap_or(line_no as u64),
        };

        let outcome = match &invocation {
            Invocation::Match(policy) => Outcome::Verdict(classifier.process_match(&packet, policy)?),
            Invocation::Mark(target) => Outcome::Mark(classifier.process_target(&packet, target)?.mark),
        };
        let protocol = classifier
            .lookup(packet.conn)
            .map_or(ProtocolId::UNKNOWN, FlowEntry::protocol);
        debug!(line = line_no, %protocol, ?outcome, "packet replayed");

        report(&ReplayLine {
            line: line_no,
            identity,
            protocol,
            outcome,
        });
        replayed += 1;
    }

    Ok(replayed)
}

fn print_line(line: &ReplayLine) {
    let outcome = match line.outcome {
        Outcome::Verdict(Verdict::Block) => "BLOCK".red().bold(),
        Outcome::Verdict(Verdict::Pass) => "PASS".green(),
        Outcome::Mark(mark) => format!("MARK {mark:#x}").cyan(),
    };
    println!("{:>6}  {}  {:<12} {}", line.line, outcome, line.protocol.to_string(), line.identity);
}

fn print_summary(packets: usize, stats: &Stats, evictions: u64) {
    println!("{}", "Summary:".bold());
    println!("  Packets replayed:  {packets}");
    println!("  Flows created:     {}", stats.cache_misses);
    println!("  Flows recycled:    {}", stats.flows_recycled);
    println!("  Flows evicted:     {evictions}");
    println!("  Duplicates:        {}", stats.duplicates);
    println!("  Detected:          {}", stats.flows_detected);
    println!("  Guessed:           {}", stats.flows_guessed);
    println!("  Failed open:       {}", stats.fail_open);
    println!("  Blocked:           {}", stats.blocked.to_string().red());
    println!("  Passed:            {}", stats.passed.to_string().green());
}
