// src/config.rs
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::scrape::types::{ScrapeLimits, SourceSpec};

const ENV_SOURCES_PATH: &str = "RADAR_SOURCES_PATH";

/// Subreddits monitored when no source file is configured, in priority order.
const DEFAULT_SUBREDDITS: &[&str] = &[
    "pumpfun",
    "CryptoMoonShots",
    "altcoin",
    "SolanaMemeCoins",
    "memecoin",
    "SatoshiStreetBets",
    "solana",
];

/// Runtime configuration, resolved once at startup from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub sources: Vec<SourceSpec>,
    pub limits: ScrapeLimits,
    /// Posts older than this are skipped and end the source early.
    pub max_post_age_days: u64,
    /// Wall-clock budget per source task.
    pub source_budget: Duration,
    /// Quiescence window before a file change triggers processing.
    pub debounce: Duration,
    /// Scrape-store poll interval for the watcher.
    pub watch_interval: Duration,
    pub enrich_parallelism: usize,
    /// Per-provider cool-down after a rate-limit signal. Floor 30 s.
    pub provider_cooldown: Duration,
    /// Per-attempt timeout on external calls.
    pub call_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let cooldown_secs = env_u64("RADAR_PROVIDER_COOLDOWN_SECS", 30).max(30);
        Ok(Self {
            bind_addr: std::env::var("RADAR_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".into()),
            data_dir: std::env::var("RADAR_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            sources: load_sources_default()?,
            limits: ScrapeLimits {
                max_concurrent_sources: env_u64("RADAR_MAX_CONCURRENT_SOURCES", 3) as usize,
                max_pages_per_source: env_u64("RADAR_MAX_PAGES_PER_SOURCE", 5) as u32,
                comments_per_post: env_u64("RADAR_COMMENTS_PER_POST", 50) as usize,
                scrolls_per_page: env_u64("RADAR_SCROLLS_PER_PAGE", 3) as u32,
            },
            max_post_age_days: env_u64("RADAR_MAX_POST_AGE_DAYS", 14),
            source_budget: Duration::from_secs(env_u64("RADAR_SOURCE_BUDGET_SECS", 180)),
            debounce: Duration::from_secs(env_u64("RADAR_DEBOUNCE_SECS", 3)),
            watch_interval: Duration::from_millis(env_u64("RADAR_WATCH_INTERVAL_MS", 500)),
            enrich_parallelism: env_u64("RADAR_ENRICH_PARALLELISM", 4) as usize,
            provider_cooldown: Duration::from_secs(cooldown_secs),
            call_timeout: Duration::from_secs(env_u64("RADAR_CALL_TIMEOUT_SECS", 10)),
        })
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Load the source list from an explicit path. TOML or JSON.
pub fn load_sources_from(path: &Path) -> Result<Vec<SourceSpec>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_sources(&content, ext.as_str())
}

/// Resolve the source list:
/// 1) $RADAR_SOURCES_PATH
/// 2) config/sources.toml
/// 3) config/sources.json
/// 4) the built-in subreddit list
pub fn load_sources_default() -> Result<Vec<SourceSpec>> {
    if let Ok(p) = std::env::var(ENV_SOURCES_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_sources_from(&pb);
        }
        return Err(anyhow!("RADAR_SOURCES_PATH points to non-existent path"));
    }
    let toml_p = PathBuf::from("config/sources.toml");
    if toml_p.exists() {
        return load_sources_from(&toml_p);
    }
    let json_p = PathBuf::from("config/sources.json");
    if json_p.exists() {
        return load_sources_from(&json_p);
    }
    Ok(DEFAULT_SUBREDDITS
        .iter()
        .map(|s| SourceSpec::reddit(s))
        .collect())
}

fn parse_sources(s: &str, hint_ext: &str) -> Result<Vec<SourceSpec>> {
    let try_toml = hint_ext == "toml" || s.contains("sources");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported sources format"))
}

fn parse_toml(s: &str) -> Result<Vec<SourceSpec>> {
    #[derive(serde::Deserialize)]
    struct TomlSources {
        sources: Vec<String>,
    }
    let v: TomlSources = toml::from_str(s)?;
    Ok(clean_list(v.sources))
}

fn parse_json(s: &str) -> Result<Vec<SourceSpec>> {
    let v: Vec<String> = serde_json::from_str(s)?;
    Ok(clean_list(v))
}

fn clean_list(items: Vec<String>) -> Vec<SourceSpec> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for it in items {
        let t = it.trim().trim_start_matches("r/");
        if !t.is_empty() && seen.insert(t.to_string()) {
            out.push(SourceSpec::reddit(t));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_and_json_both_parse_and_dedup() {
        let toml = r#"sources = [" pumpfun ", "", "r/altcoin", "altcoin"]"#;
        let out = parse_toml(toml).unwrap();
        assert_eq!(
            out.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            vec!["pumpfun", "altcoin"]
        );

        let json = r#"["solana", "  memecoin  ", ""]"#;
        let out = parse_json(json).unwrap();
        assert_eq!(
            out.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            vec!["solana", "memecoin"]
        );
    }

    #[serial_test::serial]
    #[test]
    fn default_falls_back_to_builtin_list() {
        std::env::remove_var(ENV_SOURCES_PATH);
        let old = std::env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        std::env::set_current_dir(tmp.path()).unwrap();

        let v = load_sources_default().unwrap();
        assert_eq!(v.len(), DEFAULT_SUBREDDITS.len());
        assert_eq!(v[0].name, "pumpfun");

        std::env::set_current_dir(&old).unwrap();
    }

    #[serial_test::serial]
    #[test]
    fn env_path_takes_precedence() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("sources.json");
        std::fs::write(&p, r#"["onlyone"]"#).unwrap();
        std::env::set_var(ENV_SOURCES_PATH, p.display().to_string());

        let v = load_sources_default().unwrap();
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].name, "onlyone");

        std::env::remove_var(ENV_SOURCES_PATH);
    }
}
