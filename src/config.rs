use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

use crate::backend::IMAGE_BUCKET;

#[derive(Parser, Debug)]
#[command(
    name = "interior-tracker",
    about = "Catalogue interior-design projects, room photos and pinned annotations"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Which backend holds records, blobs and accounts
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Supabase project URL
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    /// Supabase anon key
    #[arg(long, env = "SUPABASE_ANON_KEY", hide_env_values = true)]
    pub supabase_anon_key: Option<String>,
}

#[derive(Deserialize, ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    Supabase,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub supabase: SupabaseConfig,
    pub auth: AuthConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for blobs kept by the local backend
    pub path: Option<PathBuf>,
    pub bucket: String,
    /// URL prefix under which local blobs are served
    pub public_base: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct SupabaseConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub cookie_name: String,
    pub session_hours: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            bucket: IMAGE_BUCKET.to_string(),
            public_base: "/storage".to_string(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "interior_session".to_string(),
            session_hours: 720,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }
        if let Some(kind) = cli.backend {
            config.backend.kind = kind;
        }
        if let Some(ref url) = cli.supabase_url {
            config.supabase.url = Some(url.clone());
        }
        if let Some(ref key) = cli.supabase_anon_key {
            config.supabase.anon_key = Some(key.clone());
        }

        // Resolve paths relative to data dir
        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("interior.db"));
        }
        if config.storage.path.is_none() {
            config.storage.path = Some(data_dir.join("blobs"));
        }

        if config.backend.kind == BackendKind::Supabase
            && (config.supabase.url.is_none() || config.supabase.anon_key.is_none())
        {
            anyhow::bail!("The supabase backend needs both a project URL and an anon key");
        }

        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".interior-tracker")
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("interior.db"))
    }

    pub fn blobs_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("blobs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(data_dir: Option<PathBuf>) -> Cli {
        Cli {
            config: None,
            host: None,
            port: None,
            data_dir,
            backend: None,
            supabase_url: None,
            supabase_anon_key: None,
        }
    }

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.backend.kind, BackendKind::Local);
        assert_eq!(config.storage.bucket, "interior-images");
        assert_eq!(config.storage.public_base, "/storage");
        assert_eq!(config.auth.cookie_name, "interior_session");
        assert_eq!(config.auth.session_hours, 720);
        assert!(config.database.path.is_none());
    }

    #[test]
    fn data_dir_uses_cli_override() {
        let cli = cli(Some(PathBuf::from("/tmp/test-interior")));
        assert_eq!(Config::data_dir(&cli), PathBuf::from("/tmp/test-interior"));
    }

    #[test]
    fn data_dir_defaults_to_home_dot_interior_tracker() {
        let dir = Config::data_dir(&cli(None));
        assert!(dir.ends_with(".interior-tracker"));
    }

    #[test]
    fn load_with_no_config_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load(&cli(Some(tmp.path().to_path_buf()))).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.db_path(), tmp.path().join("interior.db"));
        assert_eq!(config.blobs_path(), tmp.path().join("blobs"));
    }

    #[test]
    fn load_reads_toml_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[server]
host = "192.168.1.1"
port = 9000

[backend]
kind = "supabase"

[supabase]
url = "https://abc.supabase.co"
anon_key = "anon"

[auth]
cookie_name = "my_cookie"
session_hours = 24
"#,
        )
        .unwrap();

        let mut cli = cli(Some(tmp.path().to_path_buf()));
        cli.config = Some(config_path);
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.server.host, "192.168.1.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.backend.kind, BackendKind::Supabase);
        assert_eq!(config.supabase.url.as_deref(), Some("https://abc.supabase.co"));
        assert_eq!(config.auth.cookie_name, "my_cookie");
        assert_eq!(config.auth.session_hours, 24);
    }

    #[test]
    fn cli_overrides_beat_toml_values() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[server]
host = "192.168.1.1"
port = 9000
"#,
        )
        .unwrap();

        let mut cli = cli(Some(tmp.path().to_path_buf()));
        cli.config = Some(config_path);
        cli.host = Some("10.0.0.1".to_string());
        cli.port = Some(4000);
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.server.host, "10.0.0.1");
        assert_eq!(config.server.port, 4000);
    }

    #[test]
    fn supabase_without_credentials_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cli = cli(Some(tmp.path().to_path_buf()));
        cli.backend = Some(BackendKind::Supabase);
        assert!(Config::load(&cli).is_err());

        cli.supabase_url = Some("https://abc.supabase.co".into());
        cli.supabase_anon_key = Some("anon".into());
        assert!(Config::load(&cli).is_ok());
    }
}
