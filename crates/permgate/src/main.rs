use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};

use permgate::{
    initialize_root, read_context, read_permission_seeds, validate_seeds, RootConfig, RootError,
};
use permgate_core::{PermissionId, SubjectRef, Timestamp};
use permgate_policy::{BulkOperation, BulkParams};

/// Permgate: hierarchical permission evaluation
///
/// Loads grants, the containment hierarchy and group memberships from
/// seed files and answers "may this subject do this here?".
#[derive(Parser, Debug)]
#[command(name = "permgate", version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a configuration file pointing at the given seed files
    Init {
        #[arg(long)]
        permissions: Option<PathBuf>,

        #[arg(long)]
        hierarchy: Option<PathBuf>,

        #[arg(long)]
        directory: Option<PathBuf>,
    },

    /// Check a permissions seed file without loading it
    Validate {
        /// Seed file; defaults to the configured permissions path
        #[arg(long)]
        permissions: Option<PathBuf>,
    },

    /// List the loaded permissions
    List,

    /// Evaluate a context file and print the decision
    Evaluate {
        /// JSON evaluation context
        #[arg(long)]
        context: PathBuf,

        /// Decision time (RFC 3339), overriding the context's timestamp
        #[arg(long)]
        at: Option<String>,
    },

    /// Dry run of a batch operation against the seeded store; nothing is saved
    ///
    /// The operation is applied to the in-memory copy of the seed files
    /// loaded for this run and the per-item result is printed. The seed
    /// files themselves are never rewritten.
    Bulk {
        /// Comma-separated permission ids
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<String>,

        /// activate, deactivate, delete, extend, revoke or copy
        #[arg(long)]
        operation: BulkOperation,

        /// New expiry for `extend` (RFC 3339)
        #[arg(long)]
        valid_until: Option<String>,

        /// Seconds to add for `extend`
        #[arg(long)]
        extend_by_secs: Option<u64>,

        /// Recipient for `copy`, as kind:id
        #[arg(long)]
        target_subject: Option<SubjectRef>,

        #[arg(long)]
        reason: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("permgate=debug,permgate_policy=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("permgate=info"))
    };

    // stdout carries command output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<RootConfig, RootError> {
    match path {
        Some(p) => RootConfig::load(p),
        None => {
            let default_path = RootConfig::default_config_path();
            RootConfig::load(&default_path)
        }
    }
}

fn parse_time(flag: &str, value: &str) -> Result<Timestamp, RootError> {
    Timestamp::parse_rfc3339(value).ok_or_else(|| {
        RootError::InvalidArgument(format!("--{} '{}' is not an RFC 3339 time", flag, value))
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), RootError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), RootError> {
    match cli.command {
        Commands::Init {
            permissions,
            hierarchy,
            directory,
        } => cmd_init(cli.config.as_ref(), permissions, hierarchy, directory),
        Commands::Validate { permissions } => cmd_validate(cli.config.as_ref(), permissions),
        Commands::List => cmd_list(cli.config.as_ref()),
        Commands::Evaluate { context, at } => {
            cmd_evaluate(cli.config.as_ref(), &context, at.as_deref())
        }
        Commands::Bulk {
            ids,
            operation,
            valid_until,
            extend_by_secs,
            target_subject,
            reason,
        } => {
            let params = BulkParams {
                valid_until: valid_until
                    .as_deref()
                    .map(|v| parse_time("valid-until", v))
                    .transpose()?,
                extend_by_secs,
                target_subject,
                reason,
            };
            cmd_bulk(cli.config.as_ref(), ids, operation, params)
        }
    }
}

fn cmd_init(
    config_path: Option<&PathBuf>,
    permissions: Option<PathBuf>,
    hierarchy: Option<PathBuf>,
    directory: Option<PathBuf>,
) -> Result<(), RootError> {
    let mut config = load_config(config_path)?;
    if permissions.is_some() {
        config.data.permissions_path = permissions;
    }
    if hierarchy.is_some() {
        config.data.hierarchy_path = hierarchy;
    }
    if directory.is_some() {
        config.data.directory_path = directory;
    }

    // Load once so a broken seed file is reported before it is saved
    let state = initialize_root(config.clone())?;

    let save_path = config_path
        .cloned()
        .unwrap_or_else(RootConfig::default_config_path);
    config.save(&save_path)?;

    info!(
        config = %save_path.display(),
        permissions = state.store.len(),
        "permgate initialized"
    );
    Ok(())
}

fn cmd_validate(
    config_path: Option<&PathBuf>,
    permissions: Option<PathBuf>,
) -> Result<(), RootError> {
    let config = load_config(config_path)?;
    let path = permissions
        .or(config.data.permissions_path)
        .ok_or_else(|| RootError::InvalidArgument("no permissions file given".into()))?;

    let seeds = read_permission_seeds(&path)?;
    let report = validate_seeds(&seeds, Timestamp::now());
    print_json(&report)?;

    if !report.is_clean() {
        for (index, id, errors) in &report.invalid {
            warn!(index, id = %id, "{}", errors.join("; "));
        }
        return Err(RootError::InvalidArgument(format!(
            "{} of {} permissions are invalid",
            report.invalid.len(),
            report.total
        )));
    }
    info!(total = report.total, "all permissions valid");
    Ok(())
}

fn cmd_list(config_path: Option<&PathBuf>) -> Result<(), RootError> {
    let config = load_config(config_path)?;
    let state = initialize_root(config)?;
    print_json(&state.store.list()?)
}

fn cmd_evaluate(
    config_path: Option<&PathBuf>,
    context_path: &PathBuf,
    at: Option<&str>,
) -> Result<(), RootError> {
    let config = load_config(config_path)?;
    let at = at.map(|v| parse_time("at", v)).transpose()?;
    let context = read_context(context_path, at)?;

    let state = initialize_root(config)?;
    let decision = state.engine().evaluate(&context);
    print_json(&decision)
}

fn cmd_bulk(
    config_path: Option<&PathBuf>,
    ids: Vec<String>,
    operation: BulkOperation,
    params: BulkParams,
) -> Result<(), RootError> {
    let config = load_config(config_path)?;
    let state = initialize_root(config)?;

    let ids: Vec<PermissionId> = ids.into_iter().map(PermissionId::new).collect();
    let result = state
        .engine()
        .bulk_operate(&ids, operation, &params, Timestamp::now())?;
    info!(
        successful = result.successful,
        failed = result.failed,
        "dry run only, seed files left unchanged"
    );
    print_json(&result)
}
