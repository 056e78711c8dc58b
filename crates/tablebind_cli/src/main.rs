//! Command-line probe for `tablebind_core`.
//!
//! Opens a store, migrates a small `items` table, saves every URL given on
//! the command line and prints the stored rows.

use clap::Parser;
use log::error;
use std::process::ExitCode;
use std::sync::Arc;
use tablebind_core::{
    init_logging, Adapter, AdapterConfig, FindOptions, LoggingConfig, OrmResult, PropertyDef,
    Repository, ResourceDescriptor, SortDirection,
};

#[derive(Debug, Parser)]
#[command(name = "tablebind", version, about = "Save URLs into a tablebind store")]
struct Args {
    /// Store location; `:memory:` for a throwaway database.
    #[arg(long, default_value = ":memory:")]
    location: String,

    /// trace|debug|info|warn|error
    #[arg(long, default_value = tablebind_core::default_log_level())]
    log_level: String,

    /// Milliseconds before a running statement is interrupted.
    #[arg(long)]
    statement_timeout_ms: Option<u64>,

    /// URLs to insert.
    urls: Vec<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(err) = init_logging(&LoggingConfig::stderr(&args.log_level)) {
        eprintln!("logging disabled: {err}");
    }
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_run module=cli status=error error_code={}", err.code());
            eprintln!("tablebind: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> OrmResult<()> {
    let adapter = Adapter::new(AdapterConfig {
        statement_timeout_ms: args.statement_timeout_ms,
        ..AdapterConfig::default()
    })?;
    adapter.open(&args.location)?;

    let items = Arc::new(
        ResourceDescriptor::builder("items")
            .primary_key("id")
            .property(PropertyDef::integer("id"))
            .property(PropertyDef::text("url"))
            .build()?,
    );
    let repository = Repository::new(adapter.clone());
    let outcome = repository.migrate(1, &[Arc::clone(&items)])?;
    println!(
        "schema version {} -> {}",
        outcome.from_version, outcome.to_version
    );

    let mut batch = args
        .urls
        .iter()
        .map(|url| repository.create(&items, [("url", url.as_str())]))
        .collect::<OrmResult<Vec<_>>>()?;
    repository.save_all(&mut batch)?;

    let stored = repository.find(
        &items,
        None,
        FindOptions::new().order_by("id", SortDirection::Ascending),
    )?;
    for resource in &stored {
        let resource = resource?;
        println!(
            "{}\t{}",
            resource.primary_key(),
            resource.get_str("url").unwrap_or_default()
        );
    }
    println!("{} item(s)", stored.count()?);

    adapter.close()
}
