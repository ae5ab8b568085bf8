//! Agency workflow command line
//!
//! Runs workflow operations against the file-backed store, e.g. the monthly
//! incentive batch or approving an order request.

use agency_core::{
    AgencyConfig, EventBus, EventSink, FanoutSink, FileStore, Snapshot, WebhookNotifier, WorkflowEngine, WorkflowStore,
};
use agency_types::{IncentiveId, IncentiveStatus, PurchaseRequestId, PurchaseStatus, User, UserId};
use anyhow::{anyhow, bail, Context};
use chrono::Datelike;
use clap::{Arg, ArgMatches, Command};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

fn cli() -> Command {
    Command::new("agency")
        .version("1.0.0")
        .about("Agency dashboard approval workflows")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .help("Configuration file path")
                .global(true),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .help("Data directory, overrides the configured one")
                .global(true),
        )
        .arg(
            Arg::new("as")
                .long("as")
                .value_name("USER_ID")
                .help("Id of the user performing the action")
                .global(true),
        )
        .subcommand(
            Command::new("import")
                .about("Load a JSON data snapshot into the store")
                .arg(Arg::new("file").required(true).value_name("FILE")),
        )
        .subcommand(
            Command::new("calculate-incentives")
                .about("Create the monthly incentives for every user in scope")
                .arg(Arg::new("year").long("year").value_name("YYYY").value_parser(clap::value_parser!(i32)))
                .arg(Arg::new("month").long("month").value_name("MM").value_parser(clap::value_parser!(u32))),
        )
        .subcommand(
            Command::new("decide-request")
                .about("Move a purchase request to a new status")
                .arg(Arg::new("id").required(true).value_name("REQUEST_ID"))
                .arg(Arg::new("status").long("status").required(true).value_name("STATUS"))
                .arg(Arg::new("note").long("note").value_name("TEXT").help("Reject reason or approver comment")),
        )
        .subcommand(
            Command::new("approve-order")
                .about("Approve an order request and book its expense")
                .arg(Arg::new("id").required(true).value_name("REQUEST_ID")),
        )
        .subcommand(
            Command::new("decide-incentive")
                .about("Move a monthly incentive to a new status")
                .arg(Arg::new("id").required(true).value_name("INCENTIVE_ID"))
                .arg(Arg::new("status").long("status").required(true).value_name("STATUS")),
        )
        .subcommand(Command::new("list-requests").about("List purchase requests visible to the user"))
        .subcommand(Command::new("health").about("Show record counts by status"))
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<AgencyConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => {
            let config = AgencyConfig::from_file(path)?;
            log::info!("Loaded configuration from {}", path);
            config
        }
        None => AgencyConfig::default(),
    };

    if let Some(data_dir) = matches.get_one::<String>("data-dir") {
        config.data_dir = PathBuf::from(data_dir);
    }
    config.validate()?;
    Ok(config)
}

fn actor(engine: &WorkflowEngine, matches: &ArgMatches) -> anyhow::Result<User> {
    let id = matches
        .get_one::<String>("as")
        .ok_or_else(|| anyhow!("--as <USER_ID> is required for this command"))?;

    engine
        .store()
        .get_user(&UserId::from_raw(id.as_str()))?
        .ok_or_else(|| anyhow!("User {} not found", id))
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> anyhow::Result<&'a String> {
    matches
        .get_one::<String>(name)
        .ok_or_else(|| anyhow!("missing argument <{}>", name))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(engine: &WorkflowEngine, matches: &ArgMatches) -> anyhow::Result<()> {
    match matches.subcommand() {
        Some(("import", sub)) => {
            let file = required(sub, "file")?;
            let content = std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file))?;
            let snapshot: Snapshot = serde_json::from_str(&content).context("Invalid snapshot")?;

            let imported = engine.store().import(snapshot)?;
            log::info!("Imported {} records from {}", imported, file);
            println!("{} records imported", imported);
        }
        Some(("calculate-incentives", sub)) => {
            let today = chrono::Local::now().date_naive();
            let year = sub.get_one::<i32>("year").copied().unwrap_or(today.year());
            let month = sub.get_one::<u32>("month").copied().unwrap_or(today.month());

            let result = engine.calculate_incentives(year, month, &actor(engine, matches)?)?;
            for error in &result.errors {
                log::error!("Incentive for user {} failed: {}", error.user_id, error.message);
            }
            println!("{}", result.summary());
        }
        Some(("decide-request", sub)) => {
            let id = PurchaseRequestId::from_raw(required(sub, "id")?.as_str());
            let status = PurchaseStatus::from_label(required(sub, "status")?)?;
            let note = sub.get_one::<String>("note").map(String::as_str);

            let request = engine.decide_purchase_request(&id, status, note, &actor(engine, matches)?)?;
            print_json(&request)?;
        }
        Some(("approve-order", sub)) => {
            let id = PurchaseRequestId::from_raw(required(sub, "id")?.as_str());

            let (request, expense) = engine.approve_order_request(&id, &actor(engine, matches)?)?;
            print_json(&serde_json::json!({ "request": request, "expense": expense }))?;
        }
        Some(("decide-incentive", sub)) => {
            let id = IncentiveId::from_raw(required(sub, "id")?.as_str());
            let status = IncentiveStatus::from_label(required(sub, "status")?)?;

            let incentive = engine.decide_incentive(&id, status, &actor(engine, matches)?)?;
            print_json(&incentive)?;
        }
        Some(("list-requests", _)) => {
            let user = actor(engine, matches)?;
            for request in engine.visible_purchase_requests(&user)? {
                println!(
                    "{}\t{}\t{}\t{}{}",
                    request.id,
                    request.status.label(request.is_order_request),
                    request.amount,
                    request.title,
                    if request.is_urgent() { "\t[긴급]" } else { "" }
                );
            }
        }
        Some(("health", _)) => {
            print_json(&engine.summary()?)?;
        }
        Some((other, _)) => bail!("Unknown command: {}", other),
        None => bail!("No command given"),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with INFO as default if RUST_LOG not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = cli().get_matches();
    let config = load_config(&matches)?;

    let store = Arc::new(FileStore::new(&config.data_dir)?);
    log::info!("Using data directory: {}", config.data_dir.display());

    let bus = Arc::new(EventBus::new());
    let events = bus.subscribe();
    let mut sinks = FanoutSink::new().with(bus.clone());

    let webhook = WebhookNotifier::from_config(&config.notifications)?.map(Arc::new);
    if let Some(webhook) = &webhook {
        log::info!("Forwarding workflow events to webhook");
        sinks = sinks.with(webhook.clone());
    }
    let sinks: Arc<dyn EventSink> = Arc::new(sinks);

    let engine = WorkflowEngine::from_config(&config, store, sinks);
    let result = run(&engine, &matches);

    for event in events.try_iter() {
        log::info!("[{:?}] {}: {}", event.event_type, event.title, event.message);
    }

    // Webhook deliveries run as spawned tasks; let them finish before exit
    if let Some(webhook) = &webhook {
        webhook.flush().await;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        cli().debug_assert();
    }

    #[test]
    fn test_global_args_reach_subcommands() {
        let matches = cli()
            .try_get_matches_from(["agency", "decide-request", "req-1", "--status", "거절됨", "--note", "late", "--as", "u-1"])
            .unwrap();

        assert_eq!(matches.get_one::<String>("as").map(String::as_str), Some("u-1"));
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "decide-request");
        assert_eq!(
            PurchaseStatus::from_label(sub.get_one::<String>("status").unwrap()).unwrap(),
            PurchaseStatus::Rejected
        );
    }

    #[test]
    fn test_data_dir_flag_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        let matches = cli()
            .try_get_matches_from(["agency", "--data-dir", dir.path().to_str().unwrap(), "health"])
            .unwrap();

        let config = load_config(&matches).unwrap();
        assert_eq!(config.data_dir, dir.path());
    }

    #[test]
    fn test_import_then_health() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::new(dir.path()).unwrap());
        let engine = WorkflowEngine::new(store, Arc::new(EventBus::new()));

        let snapshot_path = dir.path().join("snapshot.json");
        let admin = User::new("관리자", "admin@acme.kr", agency_types::Role::AgencyAdmin, Some("Acme"));
        let snapshot = Snapshot {
            users: vec![admin],
            ..Default::default()
        };
        std::fs::write(&snapshot_path, serde_json::to_string(&snapshot).unwrap()).unwrap();

        let matches = cli()
            .try_get_matches_from(["agency", "import", snapshot_path.to_str().unwrap()])
            .unwrap();
        run(&engine, &matches).unwrap();

        assert_eq!(engine.store().list_users().unwrap().len(), 1);
    }
}
