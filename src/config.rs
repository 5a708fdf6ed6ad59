use anyhow::{Context, Result, bail};
use clap::Parser;
use secrecy::{ExposeSecret, SecretString};
use std::{env, fmt, path::PathBuf, str::FromStr};

use crate::{
    crypto::stream::MAX_CHUNK_SIZE, models::identity::validate_bucket_name,
    services::s3_store::S3Config,
};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
const MIN_CHUNK_SIZE: usize = 1024;
const DEFAULT_FORM_LIMIT: usize = 10 * 1024 * 1024;

/// Which [`ObjectStore`](crate::services::object_store::ObjectStore) adapter to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    S3,
    /// Process-local and non-persistent; for development only.
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s3" => Ok(Backend::S3),
            "memory" => Ok(Backend::Memory),
            other => Err(format!("unknown backend `{other}` (expected `s3` or `memory`)")),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::S3 => f.write_str("s3"),
            Backend::Memory => f.write_str("memory"),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
///
/// Secrets are `SecretString`, so the `Debug` output is safe to log.
#[derive(Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: Backend,
    /// Present when `backend` is [`Backend::S3`].
    pub s3: Option<S3Config>,
    pub bucket: String,
    pub secret: SecretString,
    pub chunk_size: usize,
    pub form_limit: usize,
    pub spool_dir: PathBuf,
    pub kdf_concurrency: usize,
}

/// Command-line + environment configuration.
///
/// Secrets are read from the environment only.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Encrypting file gateway over S3-compatible storage")]
pub struct Args {
    /// Host to bind to (overrides FILESRV_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILESRV_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend, `s3` or `memory` (overrides FILESRV_BACKEND)
    #[arg(long)]
    pub backend: Option<Backend>,

    /// S3 endpoint URL (overrides FILESRV_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// S3 region (overrides FILESRV_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// S3 access key id (overrides FILESRV_S3_ACCESS_KEY_ID)
    #[arg(long)]
    pub s3_access_key_id: Option<String>,

    /// Bucket holding every object (overrides FILESRV_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Plaintext bytes per encrypted frame (overrides FILESRV_CHUNK_SIZE)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Byte budget for non-file form fields (overrides FILESRV_FORM_LIMIT)
    #[arg(long)]
    pub form_limit: Option<usize>,

    /// Directory for uploads of unknown length (overrides FILESRV_SPOOL_DIR)
    #[arg(long)]
    pub spool_dir: Option<PathBuf>,

    /// Maximum concurrent key derivations (overrides FILESRV_KDF_CONCURRENCY)
    #[arg(long)]
    pub kdf_concurrency: Option<usize>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::resolve(Args::parse(), |key| env::var(key).ok())
    }

    /// Merge `args` over the variables returned by `lookup` over defaults,
    /// then validate.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env(&lookup);

        let host = args
            .host
            .or_else(|| env.get("FILESRV_HOST"))
            .unwrap_or_else(|| "0.0.0.0".into());
        let port = pick(args.port, env.parse("FILESRV_PORT")?, 2001);
        let backend = pick(args.backend, env.parse("FILESRV_BACKEND")?, Backend::S3);
        let bucket = args
            .bucket
            .or_else(|| env.get("FILESRV_BUCKET"))
            .unwrap_or_else(|| "filesrv".into());
        let chunk_size = pick(
            args.chunk_size,
            env.parse("FILESRV_CHUNK_SIZE")?,
            DEFAULT_CHUNK_SIZE,
        );
        let form_limit = pick(
            args.form_limit,
            env.parse("FILESRV_FORM_LIMIT")?,
            DEFAULT_FORM_LIMIT,
        );
        let spool_dir = args
            .spool_dir
            .or_else(|| env.get("FILESRV_SPOOL_DIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("./data/spool"));
        let kdf_concurrency = match args
            .kdf_concurrency
            .or(env.parse("FILESRV_KDF_CONCURRENCY")?)
        {
            Some(n) => n,
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        };

        let secret = SecretString::from(env.get("FILESRV_SECRET").unwrap_or_default());
        if secret.expose_secret().is_empty() {
            bail!("FILESRV_SECRET must be set to a non-empty value");
        }

        validate_bucket_name(&bucket).with_context(|| format!("invalid bucket `{bucket}`"))?;
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            bail!("chunk size {chunk_size} out of range {MIN_CHUNK_SIZE}..={MAX_CHUNK_SIZE}");
        }
        if kdf_concurrency == 0 {
            bail!("kdf concurrency must be at least 1");
        }

        let s3 = match backend {
            Backend::Memory => None,
            Backend::S3 => Some(S3Config {
                endpoint: args
                    .s3_endpoint
                    .or_else(|| env.get("FILESRV_S3_ENDPOINT"))
                    .unwrap_or_else(|| "http://127.0.0.1:9000".into()),
                region: args
                    .s3_region
                    .or_else(|| env.get("FILESRV_S3_REGION"))
                    .unwrap_or_else(|| "us-east-1".into()),
                access_key_id: args
                    .s3_access_key_id
                    .or_else(|| env.get("FILESRV_S3_ACCESS_KEY_ID"))
                    .context("FILESRV_S3_ACCESS_KEY_ID is required for the s3 backend")?,
                secret_access_key: env
                    .get("FILESRV_S3_SECRET_ACCESS_KEY")
                    .map(SecretString::from)
                    .context("FILESRV_S3_SECRET_ACCESS_KEY is required for the s3 backend")?,
            }),
        };

        Ok(Self {
            host,
            port,
            backend,
            s3,
            bucket,
            secret,
            chunk_size,
            form_limit,
            spool_dir,
            kdf_concurrency,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Flag, else environment, else default.
fn pick<T>(flag: Option<T>, env: Option<T>, default: T) -> T {
    flag.or(env).unwrap_or(default)
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Unset and empty variables both count as missing.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.is_empty())
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            Some(value) => value
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|err| anyhow::anyhow!("parsing {key} value `{value}`: {err}")),
            None => Ok(None),
        }
    }
}
