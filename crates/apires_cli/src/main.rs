//! API resource CLI
//!
//! Command-line interface for managing API resources in a local store.
//! Every command prints JSON to stdout.

use anyhow::{anyhow, Context, Result};
use apires_core::db::open_db_with_config;
use apires_core::{
    init_logging_from_config, CoreConfig, DesiredResource, PrincipalId, ResourceListQuery,
    ResourceOrder, ResourceService, SqliteOwnershipGate, SqliteResourceRepository,
};
use clap::Parser;
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// JSON config file; defaults to `apires.db` in the working directory
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overriding the config file
    #[clap(long, global = true)]
    db: Option<String>,

    /// Principal acting on resources
    #[clap(long, global = true, default_value = "local")]
    principal: String,

    /// Command to execute
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    #[clap(flatten)]
    Store(StoreCommand),
    /// Print the core library version
    Version,
}

#[derive(clap::Subcommand, Debug)]
enum StoreCommand {
    /// Print one resource with all of its children
    Show { id: i64 },
    /// Create a resource from a desired-state JSON file
    Create { file: PathBuf },
    /// Converge a resource onto a desired-state JSON file
    Reconcile { id: i64, file: PathBuf },
    /// Delete a resource and everything it owns
    Delete { id: i64 },
    /// List resources owned by the principal
    List {
        /// Exact name filter
        #[clap(long)]
        name: Option<String>,
        /// One of id, name, created_at, updated_at
        #[clap(long, default_value = "id")]
        order_by: String,
        #[clap(long)]
        desc: bool,
        #[clap(long, default_value_t = 0)]
        skip: u32,
        #[clap(long)]
        take: Option<u32>,
        /// Include scopes and their claims
        #[clap(long)]
        expand_scopes: bool,
        /// Include resource claims
        #[clap(long)]
        expand_claims: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let cmd = match args.cmd {
        Command::Store(cmd) => cmd,
        Command::Version => {
            println!("{}", json!({ "core_version": apires_core::core_version() }));
            return Ok(());
        }
    };

    let config = load_config(args.config.as_deref(), args.db)?;
    init_logging_from_config(&config).map_err(|message| anyhow!(message))?;

    let conn = open_db_with_config(&config)
        .with_context(|| format!("opening database {}", config.db_path))?;
    let repo = SqliteResourceRepository::try_new(&conn)?;
    let service = ResourceService::new(repo, SqliteOwnershipGate::new(&conn));
    let principal = PrincipalId::new(args.principal);

    let output = match cmd {
        StoreCommand::Show { id } => serde_json::to_value(service.get(&principal, id)?)?,
        StoreCommand::Create { file } => {
            let id = service.create(&principal, &read_desired(&file)?)?;
            json!({ "id": id })
        }
        StoreCommand::Reconcile { id, file } => {
            let report = service.reconcile_with_report(&principal, id, &read_desired(&file)?)?;
            serde_json::to_value(report)?
        }
        StoreCommand::Delete { id } => {
            service.delete(&principal, id)?;
            json!({ "deleted": id })
        }
        StoreCommand::List {
            name,
            order_by,
            desc,
            skip,
            take,
            expand_scopes,
            expand_claims,
        } => {
            let order_by = ResourceOrder::parse(&order_by)
                .ok_or_else(|| anyhow!("unsupported --order-by `{order_by}`"))?;
            let query = ResourceListQuery {
                name,
                order_by,
                descending: desc,
                skip,
                take,
                expand_scopes,
                expand_claims,
            };
            serde_json::to_value(service.list(&principal, &query)?)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn load_config(path: Option<&Path>, db_override: Option<String>) -> Result<CoreConfig> {
    let mut config = match path {
        Some(path) => CoreConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CoreConfig::with_db_path("apires.db"),
    };
    if let Some(db_path) = db_override {
        config.db_path = db_path;
    }
    config.validate()?;
    Ok(config)
}

fn read_desired(path: &Path) -> Result<DesiredResource> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading desired state {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("parsing desired state {}", path.display()))
}
