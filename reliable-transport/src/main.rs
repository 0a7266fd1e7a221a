//! Entry point for `reliable-transport`.
//!
//! Parses CLI arguments and dispatches into either **simulate** or
//! **checksum** mode.  All protocol work is delegated to library modules;
//! `main.rs` owns only process setup (logging, argument parsing, reporting).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use reliable_transport::{
    checksum, Harness, SessionConfig, Side, SimulatorConfig, TimerConfig,
};

/// Reliable in-order delivery over a simulated lossy link.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send messages between two endpoints over a simulated link.
    Simulate(SimulateArgs),
    /// Print the 16-bit Internet checksum of some bytes.
    Checksum {
        /// Input text (or hex digits with --hex).
        input: String,
        /// Interpret the input as hex, e.g. 0001f203.
        #[arg(long)]
        hex: bool,
    },
}

#[derive(clap::Args)]
struct SimulateArgs {
    /// Number of messages to send from A to B.
    #[arg(short = 'n', long, default_value_t = 100)]
    messages: usize,
    /// Probability that a datagram is dropped.
    #[arg(long, default_value_t = 0.1)]
    loss: f64,
    /// Probability that a datagram has a bit flipped.
    #[arg(long, default_value_t = 0.1)]
    corrupt: f64,
    /// Probability that a datagram is delivered twice.
    #[arg(long, default_value_t = 0.05)]
    duplicate: f64,
    /// Seed for the simulated link.
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// Window size (1 = stop-and-wait).
    #[arg(short, long, default_value_t = 1)]
    window: usize,
    /// Retransmission timeout in ticks.
    #[arg(long, default_value_t = 20)]
    rto: u64,
    /// Retransmission requests tolerated per packet before the link is
    /// declared down.
    #[arg(long, default_value_t = 16)]
    retry_limit: u32,
    /// Link latency in ticks.
    #[arg(long, default_value_t = 1)]
    latency: u64,
    /// Extra random delay in ticks.
    #[arg(long, default_value_t = 0)]
    jitter: u64,
    /// Double the timeout on consecutive retransmissions.
    #[arg(long)]
    backoff: bool,
    /// Also send the same number of messages from B to A.
    #[arg(long)]
    bidirectional: bool,
    /// Print every transmission.
    #[arg(long)]
    trace: bool,
    /// Give up after this many ticks.
    #[arg(long, default_value_t = 10_000_000)]
    max_ticks: u64,
}

fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Simulate(args) => simulate(&args),
        Mode::Checksum { input, hex } => {
            let bytes = if hex {
                parse_hex(&input)?
            } else {
                input.into_bytes()
            };
            println!("0x{:04x}", checksum(&bytes));
            Ok(())
        }
    }
}

fn simulate(args: &SimulateArgs) -> Result<()> {
    let session = SessionConfig {
        window_size: args.window,
        retry_limit: args.retry_limit,
        timer: TimerConfig {
            rto_ticks: args.rto,
            max_rto_ticks: args.rto.saturating_mul(8),
            backoff: args.backoff,
        },
    };
    let link = SimulatorConfig {
        loss_rate: args.loss,
        corrupt_rate: args.corrupt,
        duplicate_rate: args.duplicate,
        latency_ticks: args.latency,
        jitter_ticks: args.jitter,
        seed: args.seed,
    };
    let mut harness = Harness::new(session, link).context("invalid configuration")?;

    let senders: &[Side] = if args.bidirectional {
        &[Side::A, Side::B]
    } else {
        &[Side::A]
    };

    let mut sent: [Vec<Vec<u8>>; 2] = Default::default();
    for i in 0..args.messages {
        for &side in senders {
            let payload = format!("{side}:{i:06}").into_bytes();
            harness
                .send(side, &payload)
                .with_context(|| format!("send #{i} from {side}"))?;
            sent[side.index()].push(payload);
        }
    }
    info!("queued {} message(s) from {} side(s)", args.messages, senders.len());

    let finished = harness.run_until_idle(args.max_ticks);

    if args.trace {
        for event in harness.trace() {
            println!("{event}");
        }
    }

    println!("finished at t={} (idle: {finished})", harness.now());
    for side in Side::ALL {
        let session = harness.session(side);
        println!("{side} [{}] {}", session.endpoint(), session.state());
        println!("{}", session.stats());
    }
    let net = harness.network().stats();
    println!(
        "link:      {} transmitted, {} dropped, {} corrupted, {} duplicated",
        net.transmitted, net.dropped, net.corrupted, net.duplicated
    );

    for &from in senders {
        let to = from.peer();
        if let Some(seq) = harness.failures(from).first() {
            bail!("{from}: link declared down at seq={seq}");
        }
        if harness.delivered(to) != sent[from.index()].as_slice() {
            bail!(
                "{to} received {} of {} message(s) from {from}, or out of order",
                harness.delivered(to).len(),
                sent[from.index()].len()
            );
        }
    }
    println!("all messages delivered in order, exactly once");
    Ok(())
}

fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let digits: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(digits).context("invalid hex input")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_input_decodes_with_whitespace() {
        assert_eq!(parse_hex("0001 f203").unwrap(), vec![0x00, 0x01, 0xf2, 0x03]);
        assert_eq!(parse_hex("ABcd").unwrap(), vec![0xab, 0xcd]);
    }

    #[test]
    fn bad_hex_input_is_rejected() {
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn rfc1071_example_through_hex_path() {
        let bytes = parse_hex("0001f203f4f5f6f7").unwrap();
        assert_eq!(checksum(&bytes), !0xddf2);
    }
}
