use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// `max-age` used by the cache-control stage, in seconds.
    pub cache_max_age: u64,
    /// Default page size for paginated OSM listings.
    pub page_size: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Form data REST API")]
pub struct Args {
    /// Host to bind to (overrides FORMDATA_API_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FORMDATA_API_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides FORMDATA_API_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Cache-Control max-age in seconds (overrides FORMDATA_API_CACHE_MAX_AGE)
    #[arg(long)]
    pub cache_max_age: Option<u64>,

    /// Default page size (overrides FORMDATA_API_PAGE_SIZE)
    #[arg(long)]
    pub page_size: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            database_url: "sqlite://./data/formdata.db".into(),
            cache_max_age: 60,
            page_size: 1000,
        }
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let defaults = Self::default();

        // --- Environment fallback ---
        let env_host = env::var("FORMDATA_API_HOST").unwrap_or(defaults.host);
        let env_port = env_number("FORMDATA_API_PORT", defaults.port)?;
        let env_db = env::var("FORMDATA_API_DATABASE_URL").unwrap_or(defaults.database_url);
        let env_max_age = env_number("FORMDATA_API_CACHE_MAX_AGE", defaults.cache_max_age)?;
        let env_page_size = env_number("FORMDATA_API_PAGE_SIZE", defaults.page_size)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            cache_max_age: args.cache_max_age.unwrap_or(env_max_age),
            page_size: args.page_size.unwrap_or(env_page_size).max(1),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read a numeric environment variable, falling back to `default` when unset.
fn env_number<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
