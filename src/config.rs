use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use url::Url;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_MEDIA_ROOT: &str = "../media-static.creceidea.pe";
pub const DEFAULT_PUBLIC_BASE_URL: &str = "https://media-static.creceidea.pe";
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 2 * 1024 * 1024;
pub const DEFAULT_ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png"];
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 8 * 1024 * 1024;
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 16;
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_DOMAIN: &str = "public";

/// Room for multipart framing on top of the image itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub port: u16,
    pub media_root: PathBuf,
    pub public_base_url: Url,
    pub max_upload_bytes: u64,
    pub allowed_mime_types: Vec<String>,
    pub staging_dir: PathBuf,
    pub body_limit_bytes: usize,
    pub max_concurrent_uploads: usize,
    pub upload_timeout: Duration,
    pub default_domain: String,
    pub serve_static: bool,
}

impl IngestConfig {
    pub fn new(media_root: PathBuf, public_base_url: Url) -> Self {
        Self {
            port: DEFAULT_PORT,
            media_root,
            public_base_url,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|value| value.to_string())
                .collect(),
            staging_dir: default_staging_dir(),
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
            upload_timeout: Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS),
            default_domain: DEFAULT_DOMAIN.to_string(),
            serve_static: true,
        }
    }

    pub fn from_env() -> Result<Self> {
        let media_root = non_empty_var("MEDIA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MEDIA_ROOT));
        let public_base_url = parse_public_base_url(
            non_empty_var("PUBLIC_BASE_URL")
                .as_deref()
                .unwrap_or(DEFAULT_PUBLIC_BASE_URL),
        )
        .context("invalid PUBLIC_BASE_URL")?;

        let mut config = Self::new(media_root, public_base_url);
        config.port = parsed_var("PORT")?.unwrap_or(DEFAULT_PORT);
        config.max_upload_bytes =
            parsed_var("MAX_UPLOAD_BYTES")?.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);
        if let Some(list) = non_empty_var("ALLOWED_MIME_TYPES") {
            config.allowed_mime_types = parse_mime_list(&list);
        }
        if let Some(dir) = non_empty_var("STAGING_DIR") {
            config.staging_dir = PathBuf::from(dir);
        }
        config.body_limit_bytes =
            parsed_var("BODY_LIMIT_BYTES")?.unwrap_or(DEFAULT_BODY_LIMIT_BYTES);
        config.max_concurrent_uploads =
            parsed_var("MAX_CONCURRENT_UPLOADS")?.unwrap_or(DEFAULT_MAX_CONCURRENT_UPLOADS);
        config.upload_timeout = Duration::from_secs(
            parsed_var("UPLOAD_TIMEOUT_SECS")?.unwrap_or(DEFAULT_UPLOAD_TIMEOUT_SECS),
        );
        if let Some(domain) = non_empty_var("DEFAULT_DOMAIN") {
            config.default_domain = domain;
        }
        config.serve_static = parsed_var("SERVE_STATIC")?.unwrap_or(true);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_upload_bytes == 0 {
            bail!("MAX_UPLOAD_BYTES must be greater than zero");
        }
        if self.allowed_mime_types.is_empty() {
            bail!("ALLOWED_MIME_TYPES must list at least one type");
        }
        if self.max_concurrent_uploads == 0 {
            bail!("MAX_CONCURRENT_UPLOADS must be greater than zero");
        }
        if self.upload_timeout.is_zero() {
            bail!("UPLOAD_TIMEOUT_SECS must be greater than zero");
        }
        Ok(())
    }

    /// Request body ceiling handed to the transport. Always leaves room for an
    /// oversized image to be received and rejected with a proper error.
    pub fn effective_body_limit(&self) -> usize {
        let floor = usize::try_from(self.max_upload_bytes)
            .unwrap_or(usize::MAX)
            .saturating_add(MULTIPART_OVERHEAD_BYTES);
        self.body_limit_bytes.max(floor)
    }
}

fn default_staging_dir() -> PathBuf {
    env::temp_dir().join("media-static-staging")
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parsed_var<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty_var(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow!("invalid {key}={raw:?}: {err}")),
        None => Ok(None),
    }
}

pub fn parse_mime_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
        .collect()
}

/// Accepts a bare host (`media.example.com`) or a full http(s) URL.
pub fn parse_public_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("public base url must not be empty");
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let mut parsed =
        Url::parse(&candidate).with_context(|| format!("malformed url {candidate:?}"))?;
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => bail!("only http or https is allowed, got {scheme}"),
    }
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed)
}
