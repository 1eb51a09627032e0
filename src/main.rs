use clap::Parser;
use migration::MigratorTrait;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use rosterly::{settings::Settings, storage, web};

#[derive(Parser, Debug)]
#[command(name = "rosterly", about = "Employee administration backend")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "rosterly.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;

    let db = storage::init(&settings.database).await?;
    migration::Migrator::up(&db, None).await.into_diagnostic()?;
    storage::ensure_default_admin(&db, &settings.seed).await?;

    web::serve(settings, db).await?;
    Ok(())
}
