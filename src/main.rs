use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use kiln::{
    Registry, TracingLogSink,
    config::{KilnConfig, KilnConfigValidator, load_config, load_config_from_env},
    core::{Method, TxLog},
    metrics, tracing_setup,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "kiln.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file (default)
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "kiln.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "kiln.toml")]
        config: String,
    },
    /// Resolve a filter chain against the built-in catalog
    Chain {
        /// Configuration file; defaults plus KILN__ overrides when absent
        #[clap(short, long, default_value = "kiln.toml")]
        config: String,
        /// Whitespace-separated filter names, e.g. "gunzip esi"
        spec: String,
    },
    /// Print the method legality table
    Methods {
        /// Emit JSON instead of a table
        #[clap(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Chain { config, spec }) => chain_command(&config, &spec).await,
        Some(Commands::Methods { json }) => methods_command(json),
        None => validate_config_command(&args.config).await,
    }
}

async fn load_or_default(config_path: &str) -> Result<KilnConfig> {
    if Path::new(config_path).exists() {
        load_config(config_path).await
    } else {
        load_config_from_env()
    }
}

/// Validate a configuration file
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match KilnConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!(
                "   • Active poll interval: {}",
                config.registry.active_poll_interval
            );
            println!(
                "   • Active wait timeout: {}",
                config.registry.active_wait_timeout
            );
            println!(
                "   • Strict admin thread: {}",
                config.registry.strict_admin_thread
            );
            println!("   • Built-in filters: {}", config.filters.builtin.join(" "));
            println!("   • Log level: {}", config.logging.level);
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Durations use humantime units (ms, s, m)");
            println!("   • The wait timeout must not be shorter than the poll interval");
            println!("   • Built-in filters: testgunzip gunzip gzip esi esi_gzip");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Kiln runtime configuration

[registry]
# How often startup code re-checks for an active instance
active_poll_interval = "100ms"
# Give up waiting for an active instance after this long
active_wait_timeout = "30s"
# Panic when administrative operations run off the administrative thread
strict_admin_thread = true

[filters]
# Built-in codecs registered in the global filter catalog
builtin = ["testgunzip", "gunzip", "gzip", "esi", "esi_gzip"]

[logging]
level = "info"
json = false
include_spans = false
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'kiln validate --config {config_path}' to check it");
    Ok(())
}

/// Build a filter chain from the global catalog and print it
async fn chain_command(config_path: &str, spec: &str) -> Result<()> {
    let config = load_or_default(config_path).await?;
    KilnConfigValidator::validate(&config).map_err(|e| eyre!("{e}"))?;
    tracing_setup::init_from_config(&config.logging)?;
    metrics::init_metrics()?;

    let registry = Registry::new(&config).map_err(|e| eyre!("{e}"))?;
    let log = TxLog::new(1, Arc::new(TracingLogSink));

    match registry.build_filter_chain(spec, &log) {
        Ok(chain) if chain.is_empty() => println!("(empty chain)"),
        Ok(chain) => {
            for (i, stage) in chain.stages().iter().enumerate() {
                println!("{:>2}. {} ({:?})", i + 1, stage.name(), stage.scope());
            }
        }
        Err(e) => {
            eprintln!("❌ {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}

/// Print which outcomes each method may return
fn methods_command(json: bool) -> Result<()> {
    if json {
        let table: Vec<_> = Method::ALL
            .into_iter()
            .map(|method| {
                serde_json::json!({
                    "method": method,
                    "side": method.side(),
                    "outcomes": method.outcomes(),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&table).context("Failed to serialize method table")?
        );
        return Ok(());
    }

    println!("{:<18} {:<8} OUTCOMES", "METHOD", "SIDE");
    for method in Method::ALL {
        let outcomes: Vec<_> = method.outcomes().iter().map(|a| a.name()).collect();
        let side = match method.side() {
            kiln::core::Side::Client => "client",
            kiln::core::Side::Backend => "backend",
        };
        println!("{:<18} {:<8} {}", method.name(), side, outcomes.join(" "));
    }
    Ok(())
}
