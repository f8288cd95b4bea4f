use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use runjs_store::{
    JsonFileStore, ScriptRecord, StorageConfig, StorageManager, plan_manual_execution, transfer,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Manage per-domain user scripts stored in a synced store with a local fallback
#[derive(Debug, Parser)]
#[command(name = "runjs", version)]
struct Cli {
    /// Optional TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// File standing in for the synchronized (primary) store
    #[arg(long, global = true, default_value = "sync.json")]
    primary: PathBuf,

    /// File standing in for the local (secondary) store
    #[arg(long, global = true, default_value = "local.json")]
    secondary: PathBuf,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the script stored for a domain
    Get { domain: String },
    /// Store a script for a domain
    Save {
        domain: String,
        /// Script source
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        code: Option<String>,
        /// Read the script source from a file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Helper library to inject before the script
        #[arg(long, default_value = "")]
        library: String,
        /// Store the script without running it automatically
        #[arg(long)]
        disabled: bool,
    },
    /// Delete the script for a domain
    Remove { domain: String },
    /// List stored domains
    List,
    /// Write all scripts as a JSON document
    Export {
        /// Output file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Load scripts from a JSON document
    Import { path: PathBuf },
    /// Show bytes used in each store
    Usage,
    /// Show what would run for a URL
    Plan { url: String },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init()
    };
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = StorageConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let primary = JsonFileStore::new("sync", &cli.primary).with_item_quota(config.primary_item_quota);
    let secondary = JsonFileStore::new("local", &cli.secondary);
    let manager = StorageManager::new(Arc::new(primary), Arc::new(secondary), config);

    match cli.command {
        Command::Get { domain } => {
            let record = manager.get_script(&domain).await;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Save {
            domain,
            code,
            file,
            library,
            disabled,
        } => {
            let code = match (code, file) {
                (Some(code), _) => code,
                (None, Some(path)) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => bail!("either --code or --file is required"),
            };
            let record = ScriptRecord::new(code, !disabled, library);
            if !manager.save_script(&domain, &record).await {
                bail!("saving script for {} failed", domain);
            }
            info!("Saved script for {}", domain);
        }
        Command::Remove { domain } => {
            if !manager.remove_script(&domain).await {
                bail!("removing script for {} failed", domain);
            }
        }
        Command::List => {
            for (domain, record) in manager.get_all_scripts().await {
                let state = if record.enabled { "enabled" } else { "disabled" };
                println!("{}\t{}\t{} chars", domain, state, record.code.chars().count());
            }
        }
        Command::Export { out } => {
            let document = transfer::render_bundle(&manager.export_scripts().await)?;
            match out {
                Some(path) => tokio::fs::write(&path, document)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => println!("{}", document),
            }
        }
        Command::Import { path } => {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let scripts = transfer::parse_bundle(&text)?;
            if !manager.import_scripts(&scripts).await {
                bail!("import incomplete; re-run it to retry the failed domains");
            }
            println!("Imported {} script(s)", scripts.len());
        }
        Command::Usage => {
            let usage = manager.usage().await;
            let show = |bytes: Option<u64>| bytes.map_or("unavailable".to_string(), |b| b.to_string());
            println!("primary\t{}", show(usage.primary_bytes));
            println!("secondary\t{}", show(usage.secondary_bytes));
        }
        Command::Plan { url } => match plan_manual_execution(&manager, &url).await {
            Some(plan) => {
                if !plan.library.is_empty() {
                    println!("// library: {}", plan.library);
                }
                println!("{}", plan.code);
            }
            None => println!("// nothing to run for {}", url),
        },
    }

    Ok(())
}
