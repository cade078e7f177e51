use crate::error::ImportError;
use crate::import::paths::ImportPaths;
use crate::import::util::split_csv;
use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_GATEWAY_URL: &str = "http://host.docker.internal:8888/claude";
pub const DEFAULT_TIMEZONE: &str = "America/Sao_Paulo";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub url: String,
    pub timeout_secs: u64,
    /// Tools granted to segmentation calls; no knowledge-graph write access.
    pub read_tools: Vec<String>,
    /// Tools granted to episode ingestion calls.
    pub write_tools: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.to_string(),
            timeout_secs: 300,
            read_tools: vec!["mcp__whatsapp".to_string()],
            write_tools: vec!["mcp__whatsapp".to_string(), "mcp__graphiti".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSettings {
    pub timezone: String,
    pub delay_secs: u64,
    /// 0 keeps retrying failed dates on every resume.
    pub max_attempts: u32,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE.to_string(),
            delay_secs: 2,
            max_attempts: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    gateway: Option<GatewayConfig>,
    import: Option<ImportSettings>,
}

/// Flag values that win over file and environment settings.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub timezone: Option<String>,
    pub delay_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub paths: ImportPaths,
    pub gateway: GatewayConfig,
    pub import: ImportSettings,
    pub tz: Tz,
}

/// Source of environment values; the process environment outside tests.
type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_or_u64(env: EnvLookup<'_>, var: &str, fallback: u64) -> u64 {
    match env(var) {
        Some(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        None => fallback,
    }
}

fn env_or_string(env: EnvLookup<'_>, var: &str, fallback: &str) -> String {
    match env(var) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_or_csv(env: EnvLookup<'_>, var: &str, fallback: &[String]) -> Vec<String> {
    match env(var) {
        Some(v) => {
            let out = split_csv(&v);
            if out.is_empty() { fallback.to_vec() } else { out }
        }
        None => fallback.to_vec(),
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, ImportError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| ImportError::Configuration(format!("unknown timezone `{}`", name.trim())))
}

fn validate(gateway: &GatewayConfig, import: &ImportSettings) -> Result<Tz, ImportError> {
    let url = gateway.url.trim();
    if url.is_empty() {
        return Err(ImportError::Configuration(
            "gateway url cannot be empty".to_string(),
        ));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ImportError::Configuration(format!(
            "gateway url must use http or https: {url}"
        )));
    }
    if gateway.timeout_secs == 0 {
        return Err(ImportError::Configuration(
            "gateway timeout must be >= 1 second".to_string(),
        ));
    }
    if gateway.write_tools.is_empty() {
        return Err(ImportError::Configuration(
            "gateway write_tools cannot be empty".to_string(),
        ));
    }
    parse_timezone(&import.timezone)
}

fn resolve_config_path(paths: &ImportPaths) -> PathBuf {
    match env::var("WA_IMPORT_CONFIG_PATH") {
        Ok(custom) if !custom.trim().is_empty() => PathBuf::from(custom.trim()),
        _ => paths.home.join("wa-import.toml"),
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&raw).map_err(|err| {
        ImportError::Configuration(format!("failed to parse {}: {err}", path.display())).into()
    })
}

fn apply_env(env: EnvLookup<'_>, gateway: &mut GatewayConfig, import: &mut ImportSettings) {
    gateway.url = env_or_string(env, "WA_IMPORT_GATEWAY_URL", &gateway.url);
    gateway.timeout_secs = env_or_u64(env, "WA_IMPORT_GATEWAY_TIMEOUT_SECS", gateway.timeout_secs);
    gateway.read_tools = env_or_csv(env, "WA_IMPORT_READ_TOOLS", &gateway.read_tools);
    gateway.write_tools = env_or_csv(env, "WA_IMPORT_WRITE_TOOLS", &gateway.write_tools);
    import.timezone = env_or_string(env, "WA_IMPORT_TIMEZONE", &import.timezone);
    import.delay_secs = env_or_u64(env, "WA_IMPORT_DELAY_SECS", import.delay_secs);
    import.max_attempts = u32::try_from(env_or_u64(
        env,
        "WA_IMPORT_MAX_ATTEMPTS",
        u64::from(import.max_attempts),
    ))
    .unwrap_or(u32::MAX);
}

fn apply_overrides(import: &mut ImportSettings, overrides: &ConfigOverrides) {
    if let Some(tz) = overrides.timezone.as_deref()
        && !tz.trim().is_empty()
    {
        import.timezone = tz.trim().to_string();
    }
    if let Some(delay) = overrides.delay_secs {
        import.delay_secs = delay;
    }
}

/// Layer environment values and flag overrides on top of the file config,
/// then validate.
fn merge(
    paths: ImportPaths,
    file: FileConfig,
    env: EnvLookup<'_>,
    overrides: &ConfigOverrides,
) -> Result<ImportConfig, ImportError> {
    let mut gateway = file.gateway.unwrap_or_default();
    let mut import = file.import.unwrap_or_default();
    apply_env(env, &mut gateway, &mut import);
    apply_overrides(&mut import, overrides);
    let tz = validate(&gateway, &import)?;
    gateway.url = gateway.url.trim().to_string();
    Ok(ImportConfig {
        paths,
        gateway,
        import,
        tz,
    })
}

pub fn load_config(paths: ImportPaths, overrides: &ConfigOverrides) -> Result<ImportConfig> {
    let file = read_file_config(&resolve_config_path(&paths))?;
    let process_env = |var: &str| env::var(var).ok();
    Ok(merge(paths, file, &process_env, overrides)?)
}
