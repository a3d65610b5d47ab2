use clap::Parser;

const HELP_EPILOG: &str = r#"Options can also be provided via environment variables:
  CONFIG_PATH (default: ./config.yaml)
  DB_PATH     (default: data/app.db)
  PORT        (default: 5151 or config.listen_port)
"#;

#[derive(Debug, Parser)]
#[command(
    name = "kidgate-server",
    version,
    about = "KidGate usage-sync server",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Path to the YAML config file (overrides CONFIG_PATH)
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,

    /// Path to the SQLite database file (overrides DB_PATH)
    #[arg(long)]
    pub db: Option<std::path::PathBuf>,

    /// Listen port (overrides PORT and config.listen_port)
    #[arg(long)]
    pub port: Option<u16>,
}
