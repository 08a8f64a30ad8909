use clap::{Arg, ArgAction, ArgMatches, Command};
use space_relay::cursor::{CursorEnumerator, MemorySource, ScanTarget};
use space_relay::logging::init_logging;
use space_relay::retry::RetryPolicy;
use space_relay::transport::{self, ack_channel, AckListener, AckMode, LoopbackTransport};
use space_relay::{
    metrics, ChangeBatch, ChangeBatchSerializer, CorrelationTracker, CursorConfig,
    PublishPipeline, RelayConfig, SchemaRegistry,
};
use std::error::Error;
use std::fs;
use std::sync::Arc;
use tracing::Level;

/// Space Relay CLI
///
/// Offline tooling for the relay:
/// - Page through a JSON row file with the windowed cursor
/// - Render a change batch as its wire payload
/// - Publish a batch through the loopback transport

type CliResult = Result<(), Box<dyn Error>>;

fn main() {
    let matches = create_cli().get_matches();

    let level = matches
        .get_one::<String>("log-level")
        .and_then(|l| l.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    init_logging(level, matches.get_flag("json-logs"));

    if let Err(e) = run_command(matches) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn create_cli() -> Command {
    Command::new("space-relay")
        .about("Data grid cursor and change publishing tools")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg(Arg::new("log-level")
            .help("Log level (trace, debug, info, warn, error)")
            .long("log-level")
            .global(true)
            .default_value("info"))
        .arg(Arg::new("json-logs")
            .help("Emit logs as JSON")
            .long("json-logs")
            .global(true)
            .action(ArgAction::SetTrue))
        .subcommand(
            Command::new("scan")
                .about("Enumerate rows through the windowed cursor")
                .arg(Arg::new("input")
                    .help("JSON array of rows")
                    .long("input")
                    .required(true))
                .arg(Arg::new("entity")
                    .help("Entity type name of the rows")
                    .long("entity")
                    .default_value("Row"))
                .arg(Arg::new("id-field")
                    .help("Identifier field used for ordering")
                    .long("id-field")
                    .default_value("id"))
                .arg(Arg::new("window")
                    .help("Records per window")
                    .long("window")
                    .default_value("1000"))
                .arg(Arg::new("chunk")
                    .help("Maximum records to emit")
                    .long("chunk"))
                .arg(Arg::new("offset")
                    .help("Base offset of the first window")
                    .long("offset")
                    .default_value("0"))
                .arg(Arg::new("ordered")
                    .help("Order by identifier")
                    .long("ordered")
                    .action(ArgAction::SetTrue))
        )
        .subcommand(
            Command::new("serialize")
                .about("Print the wire payload of a change batch")
                .arg(Arg::new("schema")
                    .help("JSON array of entity schemas")
                    .long("schema")
                    .required(true))
                .arg(Arg::new("batch")
                    .help("JSON array of change items")
                    .long("batch")
                    .required(true))
        )
        .subcommand(
            Command::new("publish")
                .about("Publish a change batch through the loopback transport")
                .arg(Arg::new("config")
                    .help("Relay configuration file")
                    .long("config")
                    .required(true))
                .arg(Arg::new("schema")
                    .help("JSON array of entity schemas")
                    .long("schema")
                    .required(true))
                .arg(Arg::new("batch")
                    .help("JSON array of change items")
                    .long("batch")
                    .required(true))
                .arg(Arg::new("reject-first")
                    .help("Number of sends the transport rejects before accepting")
                    .long("reject-first")
                    .default_value("0"))
                .arg(Arg::new("ack-mode")
                    .help("Broker acknowledgment behavior")
                    .long("ack-mode")
                    .value_parser(["ack", "reject", "silent"])
                    .default_value("ack"))
                .arg(Arg::new("metrics")
                    .help("Print metrics after publishing")
                    .long("metrics")
                    .action(ArgAction::SetTrue))
        )
}

fn run_command(matches: ArgMatches) -> CliResult {
    match matches.subcommand() {
        Some(("scan", sub_matches)) => cmd_scan(sub_matches),
        Some(("serialize", sub_matches)) => cmd_serialize(sub_matches),
        Some(("publish", sub_matches)) => cmd_publish(sub_matches),
        _ => unreachable!(),
    }
}

fn arg<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a String, Box<dyn Error>> {
    matches
        .get_one::<String>(name)
        .ok_or_else(|| format!("missing argument --{}", name).into())
}

fn read_batch(path: &str) -> Result<ChangeBatch, Box<dyn Error>> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

fn cmd_scan(matches: &ArgMatches) -> CliResult {
    let input = arg(matches, "input")?;
    let entity = arg(matches, "entity")?;
    let id_field = arg(matches, "id-field")?;
    let window: u64 = arg(matches, "window")?.parse()?;
    let offset: u64 = arg(matches, "offset")?.parse()?;
    let chunk = match matches.get_one::<String>("chunk") {
        Some(c) => c.parse()?,
        None => u64::MAX,
    };

    let rows: Vec<serde_json::Value> = serde_json::from_str(&fs::read_to_string(input)?)?;
    let source = MemorySource::from_rows(entity, id_field, rows);
    let config = CursorConfig::new(window)
        .with_chunk(offset, chunk)
        .with_order_by_id(matches.get_flag("ordered"));

    let mut cursor = CursorEnumerator::new(source, ScanTarget::entity(entity.as_str()), config);
    while cursor.advance()? {
        println!("{}", cursor.current()?);
    }
    cursor.close()?;

    let stats = cursor.stats();
    eprintln!(
        "{} records in {} windows",
        stats.records_emitted, stats.windows_fetched
    );
    Ok(())
}

fn cmd_serialize(matches: &ArgMatches) -> CliResult {
    let registry = SchemaRegistry::from_json_file(arg(matches, "schema")?)?;
    let batch = read_batch(arg(matches, "batch")?)?;

    let payload = ChangeBatchSerializer::new(Arc::new(registry)).serialize(&batch)?;
    println!("{}", String::from_utf8_lossy(&payload));
    Ok(())
}

fn cmd_publish(matches: &ArgMatches) -> CliResult {
    let config = RelayConfig::from_json_file(arg(matches, "config")?)?;
    let registry = SchemaRegistry::from_json_file(arg(matches, "schema")?)?;
    let batch = read_batch(arg(matches, "batch")?)?;
    let reject_first: u32 = arg(matches, "reject-first")?.parse()?;
    let ack_mode = match arg(matches, "ack-mode")?.as_str() {
        "reject" => AckMode::Reject,
        "silent" => AckMode::Silent,
        _ => AckMode::Ack,
    };

    let tracker = Arc::new(CorrelationTracker::new());
    let (acks, events) = ack_channel();
    let listener = AckListener::spawn(events, tracker.clone())?;
    let loopback = Arc::new(
        LoopbackTransport::new()
            .reject_first(reject_first)
            .with_acks(acks, ack_mode),
    );
    transport::connect_with_policy(
        loopback.as_ref(),
        config.transport.connect_retries,
        RetryPolicy::default(),
    )?;

    let pipeline = PublishPipeline::from_config(
        &config,
        Arc::new(registry),
        loopback.clone(),
        tracker.clone(),
    )?;
    let result = pipeline.publish(&batch);

    loopback.close_acks();
    listener.join()?;

    let receipt = result?;
    println!(
        "{} published to {} after {} attempt(s): {:?}",
        receipt.correlation_id(),
        pipeline.destination(),
        receipt.attempts,
        receipt.ack_state()
    );
    let stats = tracker.stats();
    println!(
        "in flight: {}, acked: {}, rejected: {}",
        stats.in_flight, stats.acked, stats.rejected
    );

    if matches.get_flag("metrics") {
        print!("{}", metrics::gather_text()?);
    }
    Ok(())
}
