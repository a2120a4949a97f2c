use crate::services::{thumbnail::ThumbSize, watermark::WatermarkPosition};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr};

const DEFAULT_MAX_UPLOAD_BYTES: u64 = 32 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Public URL prefix under which stored files are served.
    pub base_url: String,
    pub login_path: String,
    pub max_upload_bytes: u64,
    pub thumb_sizes: Vec<ThumbSize>,
    pub watermark: Option<PathBuf>,
    pub watermark_position: WatermarkPosition,
    pub watermark_opacity: f32,
    /// Fields answered with bare JSON instead of the envelope.
    pub plain_fields: Vec<String>,
    /// Prefix below the storer root for `--clean-temp`.
    pub temp_prefix: String,
}

/// What to do after configuration is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Serve,
    Migrate,
    CleanTemp,
    CreateUser(String),
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "File upload service for the admin toolbox")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded files are stored (overrides UPLOAD_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides UPLOAD_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public URL prefix of stored files (overrides UPLOAD_BASE_URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Delete the temporary (`0`) folder of every upload category and exit
    #[arg(long, conflicts_with = "migrate")]
    pub clean_temp: bool,

    /// Create an uploader account, print its API token and exit
    #[arg(long, value_name = "USERNAME", conflicts_with_all = ["migrate", "clean_temp"])]
    pub create_user: Option<String>,
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env_or("UPLOAD_HOST", "0.0.0.0");
        let env_port = env_parse("UPLOAD_PORT", 3000u16)?;
        let env_storage = env_or("UPLOAD_STORAGE_DIR", "./data/files");
        let env_db = env_or("UPLOAD_DATABASE_URL", "sqlite://./data/meta/uploads.db");
        let env_base_url = env_or("UPLOAD_BASE_URL", "/files");

        let thumb_sizes = ThumbSize::parse_list(&env_or("UPLOAD_THUMB_SIZES", "200x200"))
            .context("parsing UPLOAD_THUMB_SIZES")?;
        let plain_fields = env_or("UPLOAD_PLAIN_FIELDS", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            base_url: args.base_url.unwrap_or(env_base_url),
            login_path: env_or("UPLOAD_LOGIN_PATH", "/login"),
            max_upload_bytes: env_parse("UPLOAD_MAX_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            thumb_sizes,
            watermark: env::var_os("UPLOAD_WATERMARK").map(PathBuf::from),
            watermark_position: env_parse("UPLOAD_WATERMARK_POSITION", WatermarkPosition::default())?,
            watermark_opacity: env_parse("UPLOAD_WATERMARK_OPACITY", 0.5f32)?,
            plain_fields,
            temp_prefix: env_or("UPLOAD_TEMP_PREFIX", ""),
        };

        let command = if args.migrate {
            Command::Migrate
        } else if args.clean_temp {
            Command::CleanTemp
        } else if let Some(username) = args.create_user {
            Command::CreateUser(username)
        } else {
            Command::Serve
        };

        Ok((cfg, command))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Route prefix for serving stored files; `None` when `base_url` points
    /// at another host.
    pub fn files_route(&self) -> Option<String> {
        let path = self.base_url.trim_end_matches('/');
        (path.starts_with('/') && path.len() > 1).then(|| path.to_string())
    }
}

#[cfg(test)]
impl AppConfig {
    pub fn for_tests(storage_dir: &std::path::Path) -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            storage_dir: storage_dir.display().to_string(),
            database_url: String::new(),
            base_url: "/files".into(),
            login_path: "/login".into(),
            max_upload_bytes: 1 << 20,
            thumb_sizes: vec![ThumbSize::new(16, 16), ThumbSize::new(32, 24)],
            watermark: None,
            watermark_position: WatermarkPosition::default(),
            watermark_opacity: 0.5,
            plain_fields: vec!["ajax".into()],
            temp_prefix: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_route_only_for_local_prefixes() {
        let mut cfg = AppConfig::for_tests(std::path::Path::new("/tmp"));
        assert_eq!(cfg.files_route().as_deref(), Some("/files"));
        cfg.base_url = "https://cdn.example.com/up".into();
        assert_eq!(cfg.files_route(), None);
        cfg.base_url = "/".into();
        assert_eq!(cfg.files_route(), None);
    }

    #[test]
    fn cli_flags_parse() {
        let args = Args::parse_from(["upload-manager", "--port", "8080", "--clean-temp"]);
        assert_eq!(args.port, Some(8080));
        assert!(args.clean_temp);
        assert!(Args::try_parse_from(["upload-manager", "--migrate", "--clean-temp"]).is_err());
    }
}
