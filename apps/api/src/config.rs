use std::str::FromStr;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    /// Extracted text shorter than this is treated as a failed text extraction.
    pub min_text_chars: usize,
    pub standard_max_analyses: u32,
    pub elevated_max_analyses: u32,
    pub tier_cache_ttl_secs: u64,
    pub pdftoppm_bin: String,
    pub render_dpi: u32,
    pub max_render_pages: u32,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            min_text_chars: parse_env("MIN_TEXT_CHARS", 100)?,
            standard_max_analyses: parse_env("STANDARD_MAX_ANALYSES", 3)?,
            elevated_max_analyses: parse_env("ELEVATED_MAX_ANALYSES", 10)?,
            tier_cache_ttl_secs: parse_env("TIER_CACHE_TTL_SECS", 300)?,
            pdftoppm_bin: std::env::var("PDFTOPPM_BIN").unwrap_or_else(|_| "pdftoppm".to_string()),
            render_dpi: parse_env("RENDER_DPI", 100)?,
            max_render_pages: parse_env("MAX_RENDER_PAGES", 4)?,
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        Err(_) => Ok(default),
    }
}
