mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use pgupgrade_migrate::{ConnectionDescriptor, MigrateConfig, Migrator};

use commands::migrate;
use logging::{LogFormat, LoggingConfig};

#[derive(Parser)]
#[command(name = "pgupgrade", version)]
#[command(about = "Apply numbered SQL upgrade scripts to a PostgreSQL database")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// The path containing the upgrade scripts
    #[arg(long, env = "PGUPGRADE_PATH", default_value = "./")]
    path: PathBuf,

    /// Table recording applied versions
    #[arg(long, env = "PGUPGRADE_LEDGER_TABLE", default_value = pgupgrade_migrate::DEFAULT_LEDGER_TABLE)]
    ledger_table: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Address of the DB host
    #[arg(long, env = "PGHOST", default_value = "/var/run/postgresql")]
    host: String,

    /// User name to use when connecting to the database
    #[arg(long, env = "PGUSER", default_value = "postgres")]
    user: String,

    /// Password to use when connecting to the database
    #[arg(long, env = "PGPASSWORD", default_value = "", hide_env_values = true)]
    password: String,

    /// Name of the database to manage
    #[arg(long, env = "PGDATABASE", default_value = "postgres")]
    dbname: String,

    /// The port the host is listening on
    #[arg(long, env = "PGPORT", default_value_t = 5432)]
    port: u16,

    /// Extra options to pass to postgresql
    #[arg(long, env = "PGUPGRADE_OPTIONS", default_value = "sslmode=disable")]
    options: String,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Apply pending upgrade scripts (default)
    Up {
        /// List the scripts that would run without applying them
        #[arg(long)]
        dry_run: bool,
    },

    /// Show applied versions and pending scripts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    fn migrate_config(&self) -> MigrateConfig {
        let connection = ConnectionDescriptor {
            host: self.connection.host.clone(),
            user: self.connection.user.clone(),
            password: self.connection.password.clone(),
            dbname: self.connection.dbname.clone(),
            port: self.connection.port,
            options: self.connection.options.clone(),
        };

        MigrateConfig::new(connection, self.path.clone()).with_ledger_table(self.ledger_table.clone())
    }

    fn logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level.clone(),
            format: self.log_format,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.logging_config())?;

    let migrator = Migrator::new(cli.migrate_config())?;

    match cli.command.unwrap_or(Commands::Up { dry_run: false }) {
        Commands::Up { dry_run: false } => migrate::run(&migrator).await?,
        Commands::Up { dry_run: true } => migrate::pending(&migrator).await?,
        Commands::Status { json } => migrate::status(&migrator, json).await?,
    }

    Ok(())
}
