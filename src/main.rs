//! availsim - command line front end
//!
//! Replays an event trace (or a generated churn trace) against a simulated
//! DHT and prints availability and bandwidth statistics as simulated time
//! advances.

use availsim::config::{PolicyConfig, SimConfig, POLICY_TYPES};
use availsim::simulation::{ChurnGenerator, Event, Simulator, TraceReader};
use availsim::{Dht, MonitorStyle, Reporter, Result, SimError};
use clap::{value_parser, Arg, ArgAction, Command};
use env_logger::Env;
use log::{info, warn};
use std::fs::File;
use std::io::{self, BufReader, Write};

/// Log to stderr, `info` unless RUST_LOG says otherwise
fn logger_init() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .try_init();
}

fn cli() -> Command {
    Command::new("availsim")
        .version("0.1.0")
        .about("Simulate block availability and repair traffic in a DHT")
        .after_help(format!("TYPE is one of: {}", POLICY_TYPES.join(", ")))
        .arg(
            Arg::new("bandwidth")
                .short('b')
                .long("bandwidth")
                .value_name("BYTES")
                .help("Per-node outbound bandwidth in bytes per time unit")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("dump-nodes")
                .short('c')
                .long("dump-nodes")
                .help("Print the per-node sent-bytes table after the run")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("interval")
                .short('i')
                .long("interval")
                .value_name("TICKS")
                .help("Monitor interval")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("parsable")
                .short('m')
                .long("parsable")
                .help("Print one whitespace-separated record per monitor call")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("spread")
                .short('s')
                .long("spread")
                .help("Also report block spread")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("N")
                .help("Seed for random placement and generated churn")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("TOML file overriding the defaults"),
        )
        .arg(
            Arg::new("churn")
                .long("churn")
                .help("Generate a churn trace instead of reading EVENTS")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("input")
                .value_name("EVENTS TYPE [ARGS]")
                .help("Event trace file (omitted with --churn), policy type and its arguments")
                .num_args(1..)
                .required(true)
                .allow_hyphen_values(true),
        )
}

fn main() -> Result<()> {
    logger_init();
    let matches = cli().get_matches();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => SimConfig::from_toml(&std::fs::read_to_string(path)?)?,
        None => SimConfig::default(),
    };
    if let Some(&bw) = matches.get_one::<u64>("bandwidth") {
        config.bandwidth = bw;
    }
    if let Some(&interval) = matches.get_one::<u64>("interval") {
        config.monitor_interval = interval;
    }
    if let Some(&seed) = matches.get_one::<u64>("seed") {
        config.seed = Some(seed);
    }
    config.spread |= matches.get_flag("spread");
    config.validate()?;

    let input: Vec<String> = matches
        .get_many::<String>("input")
        .map(|vals| vals.cloned().collect())
        .unwrap_or_default();
    let churn = matches.get_flag("churn");
    let (events_path, rest) = if churn {
        (None, input.as_slice())
    } else {
        match input.split_first() {
            Some((path, rest)) => (Some(path.clone()), rest),
            None => (None, input.as_slice()),
        }
    };
    let Some((kind, args)) = rest.split_first() else {
        return Err(SimError::config("missing dhash type"));
    };
    let policy = PolicyConfig::from_args(kind, args)?;

    let events: Box<dyn Iterator<Item = Event>> = match events_path {
        Some(path) => Box::new(TraceReader::new(BufReader::new(File::open(path)?))),
        None => {
            let seed = config.seed.unwrap_or_default();
            let trace = ChurnGenerator::new(config.churn.clone(), seed)?.generate()?;
            Box::new(trace.into_iter())
        }
    };

    let style = if matches.get_flag("parsable") {
        MonitorStyle::Parsable
    } else {
        MonitorStyle::Human
    };
    let mut reporter = Reporter::new(io::stdout().lock(), style, config.spread);
    reporter.comment(&format!("bw = {}", config.bandwidth))?;
    reporter.comment(&format!("args = {:?}", input))?;
    reporter.comment(&format!("policy = {}", policy.policy()))?;

    let dump = matches.get_flag("dump-nodes");
    if let Some(dht) = policy.build_dhash(&config) {
        run(dht, events, &config, &mut reporter, dump)
    } else if let Some(dht) = policy.build_totalrecall(&config) {
        run(dht, events, &config, &mut reporter, dump)
    } else {
        Err(SimError::config("no simulator for this policy"))
    }
}

/// Drive one DHT through the whole trace
fn run<D: Dht, W: Write>(
    dht: D,
    events: Box<dyn Iterator<Item = Event>>,
    config: &SimConfig,
    reporter: &mut Reporter<W>,
    dump_nodes: bool,
) -> Result<()> {
    info!("simulating {} at {} B/tick", dht.policy(), config.bandwidth);
    let mut sim = Simulator::new(dht, config.monitor_interval);
    sim.run(events, |t, dht| reporter.report(t, dht))?;

    let dht = sim.into_dht();
    dht.check_availability()?;
    dht.ring().check_consistency()?;
    if dht.lost_blocks() > 0 {
        warn!("{} block losses during the run", dht.lost_blocks());
    }
    if dump_nodes {
        reporter.dump_node_table(&dht)?;
    }
    Ok(())
}
