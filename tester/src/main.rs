mod scenarios;

use clap::{Parser, Subcommand};
use flowsim::{DEFAULT_QUEUE_PACKETS, DataRate, SimError};
use scenarios::Outcome;

#[derive(Debug, Parser)]
#[command(name = "tester", about = "run the bundled flowsim scenarios and print per-flow statistics")]
struct Args {
    /// seed for the per-run random number generator
    #[arg(long, default_value_t = 1, global = true)]
    seed: u64,

    #[command(subcommand)]
    scenario: Scenario,
}

#[derive(Debug, Clone, Subcommand)]
enum Scenario {
    /// echo client and server over one 10Mbps / 2ms link
    Basic,
    /// background on/off load and an echo client sharing a bottleneck
    Congestion {
        #[arg(long, default_value = "1Mbps")]
        bottleneck: DataRate,

        /// drop-tail queue size of the bottleneck, in packets
        #[arg(long, default_value_t = DEFAULT_QUEUE_PACKETS)]
        queue_packets: usize,
    },
    /// three clients sending to one sink node over a small mesh
    ThreeFlows,
    /// four echo clients in one shared wireless cell
    Wireless {
        /// per-packet loss probability of the medium
        #[arg(long, default_value_t = 0.01)]
        loss: f64,
    },
    /// every scenario above with default options, in parallel
    All,
}

fn run(scenario: Scenario, seed: u64) -> Result<Outcome, SimError> {
    match scenario {
        Scenario::Basic => scenarios::basic(seed),
        Scenario::Congestion {
            bottleneck,
            queue_packets,
        } => scenarios::congestion(seed, bottleneck, queue_packets),
        Scenario::ThreeFlows => scenarios::three_flows(seed),
        Scenario::Wireless { loss } => scenarios::wireless(seed, loss),
        Scenario::All => Err(SimError::InvalidTrafficConfig("`all` is not a single scenario".into())),
    }
}

fn print_outcome(outcome: &Outcome) {
    println!("== {} ==", outcome.name);
    println!(
        "stopped at {}, {} events executed, {} discarded, {} faults",
        outcome.run.stopped_at, outcome.run.events_executed, outcome.run.events_discarded, outcome.run.faults
    );
    for flow in &outcome.flows {
        println!("flow {} ({})", flow.flow, flow.tuple);
        println!("  tx packets: {}  rx packets: {}", flow.tx_packets, flow.rx_packets);
        println!("  tx bytes:   {}  rx bytes:   {}", flow.tx_bytes, flow.rx_bytes);
        match flow.throughput_bps {
            Some(bps) => println!("  throughput: {:.2} Kbps", bps / 1000.0),
            None => println!("  throughput: n/a"),
        }
        match flow.average_delay {
            Some(delay) => println!("  mean delay: {:.3} ms", delay.as_secs_f64() * 1000.0),
            None => println!("  mean delay: n/a"),
        }
        if let Some(jitter) = flow.average_jitter {
            println!("  mean jitter: {:.3} ms", jitter.as_secs_f64() * 1000.0);
        }
        match flow.loss_ratio {
            Some(ratio) => println!("  packet loss: {:.2}% ({} lost)", ratio * 100.0, flow.lost_packets),
            None => println!("  packet loss: n/a"),
        }
        if flow.times_forwarded > 0 {
            println!("  forwarded: {} times", flow.times_forwarded);
        }
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let args = Args::parse();

    let scenarios = match args.scenario {
        Scenario::All => vec![
            Scenario::Basic,
            Scenario::Congestion {
                bottleneck: DataRate::from_mbps(1),
                queue_packets: DEFAULT_QUEUE_PACKETS,
            },
            Scenario::ThreeFlows,
            Scenario::Wireless { loss: 0.01 },
        ],
        single => vec![single],
    };

    // each run owns its simulation, so independent scenarios go to the blocking pool
    let handles: Vec<_> = scenarios
        .into_iter()
        .map(|scenario| {
            let seed = args.seed;
            tokio::task::spawn_blocking(move || run(scenario, seed))
        })
        .collect();

    for handle in handles {
        let outcome = handle.await??;
        tracing::info!(scenario = outcome.name, flows = outcome.flows.len(), "scenario done");
        print_outcome(&outcome);
    }
    Ok(())
}
