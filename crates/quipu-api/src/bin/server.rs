//! quipu-api server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the SQLite
//! store, wires the pipeline with its collaborators, spawns the submission
//! worker, and serves the operator API over HTTP.
//!
//! # Password hash generation
//!
//! To generate the argon2 PHC string for the `*_password_hash` fields:
//!
//! ```
//! cargo run -p quipu-api --bin server -- --hash-password
//! ```

use std::sync::Arc;

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use clap::Parser;
use rand_core::OsRng;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use quipu_api::{AppConfig, AppState, auth::AuthConfig, router};
use quipu_core::settings::{CertBundle, ClientCredentials, TenantFiscalSettings};
use quipu_pipeline::{
  Pipeline, PipelineConfig, Worker,
  client::{HttpTaxClient, TaxClientConfig},
  collab::{HttpSaleSource, StaticFeatureGate, TracingAuditSink, FixedSettingsSource},
};
use quipu_store_sqlite::SqliteStore;

#[derive(Parser)]
#[command(author, version, about = "Quipu fiscal pipeline server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: std::path::PathBuf,

  /// Print the argon2 hash for a password entered on stdin and exit.
  #[arg(long)]
  hash_password: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Helper mode: hash a password and exit.
  if cli.hash_password {
    let password = read_password()?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
      .to_string();
    println!("{hash}");
    return Ok(());
  }

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("QUIPU").separator("__"))
    .build()
    .context("failed to read config file")?;

  let app_config: AppConfig = settings
    .try_deserialize()
    .context("failed to deserialise AppConfig")?;

  // Open SQLite store.
  let store = SqliteStore::open(&app_config.server.store_path)
    .await
    .with_context(|| {
      format!("failed to open store at {:?}", app_config.server.store_path)
    })?;
  let store = Arc::new(store);

  // Resolve the single tenant's fiscal settings.
  let cert_bundle = match (
    &app_config.fiscal.cert_bundle_path,
    &app_config.fiscal.cert_passphrase,
  ) {
    (Some(path), Some(passphrase)) => Some(CertBundle {
      pem:        std::fs::read_to_string(path)
        .with_context(|| format!("failed to read certificate bundle {path:?}"))?,
      passphrase: passphrase.clone(),
    }),
    _ => None,
  };
  let tenant_settings = TenantFiscalSettings {
    tax_id:        app_config.fiscal.tax_id.clone(),
    business_name: app_config.fiscal.business_name.clone(),
    address:       app_config.fiscal.address.clone(),
    environment:   app_config.fiscal.environment,
    cert_bundle,
    credentials:   ClientCredentials {
      username: app_config.fiscal.sol_username.clone(),
      password: app_config.fiscal.sol_password.clone(),
    },
    enabled:       app_config.fiscal.enabled,
  };

  // Protocol client and collaborators.
  let client = Arc::new(
    HttpTaxClient::new(TaxClientConfig::default())
      .context("failed to build tax-authority client")?,
  );
  let sales = Arc::new(
    HttpSaleSource::new(app_config.fiscal.sales_base_url.clone())
      .context("failed to build sale source")?,
  );

  let pipeline = Pipeline::new(
    store.clone(),
    client,
    Arc::new(TracingAuditSink),
    Arc::new(StaticFeatureGate { enabled: app_config.fiscal.enabled }),
    sales,
    Arc::new(FixedSettingsSource { settings: tenant_settings }),
    PipelineConfig::default(),
  );

  // Background worker; aborted when the server exits.
  let worker_handle = tokio::spawn(Worker::new(pipeline.clone()).run());

  // Serve the operator API.
  let state = AppState {
    pipeline,
    auth: Arc::new(AuthConfig {
      username:               app_config.server.auth_username.clone(),
      password_hash:          app_config.server.auth_password_hash.clone(),
      operator_username:      app_config.server.operator_username.clone(),
      operator_password_hash: app_config.server.operator_password_hash.clone(),
    }),
  };

  let app = router(state);
  let address = format!("{}:{}", app_config.server.host, app_config.server.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;
  worker_handle.abort();

  Ok(())
}

/// Read a password from stdin.
fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  let stdin = io::stdin();
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  stdin.lock().read_line(&mut line)?;
  Ok(
    line
      .trim_end_matches('\n')
      .trim_end_matches('\r')
      .to_string(),
  )
}
