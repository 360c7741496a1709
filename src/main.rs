//! cascade-clearing CLI
//!
//! Compute clearing payment vectors from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Clear a request file
//! cascade-clearing clear --input request.json
//!
//! # Output the full response as JSON
//! cascade-clearing clear --input request.json --format json
//!
//! # Generate a random request for testing
//! cascade-clearing generate --nodes 10000 --edges-per-node 20 --output request.json
//!
//! # Run a multi-iteration stress scenario
//! cascade-clearing simulate --nodes 5000 --iterations 8
//! ```
//!
//! Set `RUST_LOG=info` (or `debug` for per-round output) to see engine logs.

use cascade_clearing::clearing::engine::ClearingEngine;
use cascade_clearing::clearing::request::ClearingRequest;
use cascade_clearing::core::config::{CarryPolicy, ClearingConfig};
use cascade_clearing::simulation::macro_run::{run_scenario, MacroRunConfig};
use cascade_clearing::simulation::stress_test::{generate_network, NetworkConfig};
use serde::Serialize;
use std::fs;
use std::process;
use std::str::FromStr;

fn print_usage() {
    eprintln!(
        r#"cascade-clearing: clearing payment vectors for cascading default

USAGE:
    cascade-clearing <COMMAND> [OPTIONS]

COMMANDS:
    clear       Clear one macro iteration's liability snapshot
    generate    Generate a random clearing request (for testing)
    simulate    Run several macro iterations, carrying defaults forward
    help        Show this message

OPTIONS (clear):
    --input <FILE>          Path to a JSON clearing request
    --format <FORMAT>       Output format: text (default) or json

OPTIONS (engine, for clear and simulate):
    --epsilon <X>           Default threshold (default: 1e-4)
    --max-rounds <N>        Round cap before giving up (default: 10000)
    --carry <POLICY>        carry-ratio (default), carry-status or reevaluate
    --threads <N>           0 = all cores (default), 1 = sequential

OPTIONS (generate, simulate):
    --nodes <N>             Number of nodes including the sink (default: 1000)
    --edges-per-node <N>    Average liabilities per node (default: 20)
    --seed <N>              Random seed (default: 42)
    --output <FILE>         Write to file instead of stdout (generate only)
    --iterations <N>        Macro iterations (simulate only, default: 6)

EXAMPLES:
    cascade-clearing generate --nodes 100000 --output request.json
    cascade-clearing clear --input request.json --carry reevaluate
    cascade-clearing simulate --nodes 20000 --iterations 12 --threads 4"#
    );
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    process::exit(1);
}

fn parse_value<T: FromStr>(flag: &str, value: Option<&String>) -> T
where
    T::Err: std::fmt::Display,
{
    let raw = value.unwrap_or_else(|| fail(format!("{} requires a value", flag)));
    raw.parse()
        .unwrap_or_else(|e| fail(format!("invalid value '{}' for {}: {}", raw, flag, e)))
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| fail(format!("cannot serialize output: {}", e)))
}

/// Options shared by every command; unknown flags are rejected per command.
#[derive(Default)]
struct Options {
    input: Option<String>,
    output: Option<String>,
    format: Option<String>,
    config: ClearingConfig,
    network: NetworkConfig,
    iterations: Option<u64>,
}

fn parse_options(args: &[String], allowed: &[&str]) -> Options {
    let mut options = Options::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        if !allowed.contains(&flag) {
            fail(format!("unknown option: {}", flag));
        }
        i += 1;
        let value = args.get(i);
        match flag {
            "--input" => options.input = Some(parse_value("--input", value)),
            "--output" => options.output = Some(parse_value("--output", value)),
            "--format" => options.format = Some(parse_value("--format", value)),
            "--epsilon" => options.config.epsilon = parse_value(flag, value),
            "--max-rounds" => options.config.max_rounds = parse_value(flag, value),
            "--carry" => {
                options.config.carry_policy = parse_value::<CarryPolicy>(flag, value)
            }
            "--threads" => options.config.worker_threads = parse_value(flag, value),
            "--nodes" => options.network.node_count = parse_value(flag, value),
            "--edges-per-node" => options.network.avg_edges_per_node = parse_value(flag, value),
            "--seed" => options.network.seed = parse_value(flag, value),
            "--iterations" => options.iterations = Some(parse_value(flag, value)),
            _ => unreachable!("flag list and match arms disagree"),
        }
        i += 1;
    }
    options
}

const ENGINE_FLAGS: [&str; 4] = ["--epsilon", "--max-rounds", "--carry", "--threads"];

fn build_engine(config: ClearingConfig) -> ClearingEngine {
    ClearingEngine::new(config).unwrap_or_else(|e| fail(e))
}

fn cmd_clear(args: &[String]) {
    let mut allowed = vec!["--input", "--format"];
    allowed.extend(ENGINE_FLAGS);
    let options = parse_options(args, &allowed);

    let path = options
        .input
        .unwrap_or_else(|| fail("--input <FILE> is required"));
    let content = fs::read_to_string(&path)
        .unwrap_or_else(|e| fail(format!("cannot read '{}': {}", path, e)));
    let request: ClearingRequest = serde_json::from_str(&content)
        .unwrap_or_else(|e| fail(format!("cannot parse clearing request: {}", e)));

    let engine = build_engine(options.config);
    let response = engine.clear(&request).unwrap_or_else(|e| fail(e));

    match options.format.as_deref().unwrap_or("text") {
        "json" => println!("{}", to_json(&response)),
        "text" => println!("{}", response),
        other => fail(format!("unknown format '{}', expected text or json", other)),
    }
}

fn cmd_generate(args: &[String]) {
    let options = parse_options(args, &["--nodes", "--edges-per-node", "--seed", "--output"]);
    let graph = generate_network(&options.network).unwrap_or_else(|e| fail(e));
    let request = ClearingRequest::new(0, graph);
    let json = to_json(&request);

    if let Some(path) = options.output {
        fs::write(&path, &json)
            .unwrap_or_else(|e| fail(format!("cannot write '{}': {}", path, e)));
        eprintln!(
            "Generated {} liabilities across {} nodes → {}",
            request.graph.edge_count(),
            request.graph.node_count(),
            path
        );
    } else {
        println!("{}", json);
    }
}

fn cmd_simulate(args: &[String]) {
    let mut allowed = vec!["--nodes", "--edges-per-node", "--seed", "--iterations", "--format"];
    allowed.extend(ENGINE_FLAGS);
    let options = parse_options(args, &allowed);

    let defaults = MacroRunConfig::default();
    let scenario = MacroRunConfig {
        network: options.network,
        iterations: options.iterations.unwrap_or(defaults.iterations),
        ..defaults
    };
    let engine = build_engine(options.config);
    let reports = run_scenario(&engine, &scenario).unwrap_or_else(|e| fail(e));

    if options.format.as_deref() == Some("json") {
        println!("{}", to_json(&reports));
        return;
    }
    println!(
        "{:>9} {:>7} {:>10} {:>8} {:>6} {:>16} {:>16}",
        "iteration", "rounds", "defaulted", "carried", "new", "paid", "shortfall"
    );
    for r in &reports {
        println!(
            "{:>9} {:>7} {:>10} {:>8} {:>6} {:>16.2} {:>16.2}",
            r.macro_iteration,
            r.rounds,
            r.defaulted,
            r.carried,
            r.first_defaults,
            r.total_paid,
            r.total_shortfall
        );
    }
}

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = args[1].as_str();
    let rest = &args[2..];

    match command {
        "clear" => cmd_clear(rest),
        "generate" => cmd_generate(rest),
        "simulate" => cmd_simulate(rest),
        "help" | "--help" | "-h" => print_usage(),
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            process::exit(1);
        }
    }
}
