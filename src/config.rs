//! Configuration loading and validation.
//!
//! Everything is read once from environment variables at startup and is
//! immutable afterwards. `.env` files are honoured via `dotenvy` before
//! these readers run.

use std::fmt;
use std::str::FromStr;

use anyhow::Context;

/// Default sandbox wall-clock budget in seconds.
const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 30;

/// Default container memory limit.
const DEFAULT_MAX_MEMORY: &str = "512m";

/// Default CPU core budget.
const DEFAULT_MAX_CPU: f64 = 1.0;

/// Default sandbox image tag.
const DEFAULT_SANDBOX_IMAGE: &str = "python-sandbox:latest";

/// Default harvest filter: only CSV files under `output/` are returned.
const DEFAULT_OUTPUT_FILTER: &str = "*.csv";

/// Default HTTP bind host.
const DEFAULT_HOST: &str = "0.0.0.0";

/// Default HTTP bind port.
const DEFAULT_PORT: u16 = 8080;

/// Sandbox executor limits and policies (process-wide, immutable).
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Wall-clock seconds a sandbox may run before it is stopped.
    pub execution_timeout_secs: u64,

    /// Memory limit applied to the sandbox container.
    pub max_memory: MemorySize,

    /// CPU core budget applied to the sandbox container.
    pub max_cpu: f64,

    /// Tag of the sandbox image executions run in.
    pub sandbox_image: String,

    /// Glob patterns selecting which `output/` files are returned.
    pub harvest_globs: Vec<String>,
}

impl ExecutorConfig {
    /// Read executor configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error when a variable is present but unparseable, or when
    /// a limit is out of range (zero timeout, non-positive CPU).
    pub fn from_env() -> anyhow::Result<Self> {
        let execution_timeout_secs = env_or("EXECUTION_TIMEOUT", DEFAULT_EXECUTION_TIMEOUT_SECS)?;
        if execution_timeout_secs == 0 {
            anyhow::bail!("EXECUTION_TIMEOUT must be a positive number of seconds");
        }

        let max_memory: MemorySize = env_or("MAX_MEMORY", DEFAULT_MAX_MEMORY.parse()?)?;
        let max_cpu: f64 = env_or("MAX_CPU", DEFAULT_MAX_CPU)?;
        // Fail here rather than on the first request.
        nano_cpus(max_cpu).context("MAX_CPU is not a usable core count")?;

        let sandbox_image =
            std::env::var("DOCKER_IMAGE").unwrap_or_else(|_| DEFAULT_SANDBOX_IMAGE.to_owned());

        let filter =
            std::env::var("OUTPUT_FILTER").unwrap_or_else(|_| DEFAULT_OUTPUT_FILTER.to_owned());
        let harvest_globs = parse_filter_list(&filter);
        if harvest_globs.is_empty() {
            anyhow::bail!("OUTPUT_FILTER must contain at least one glob pattern");
        }

        Ok(Self {
            execution_timeout_secs,
            max_memory,
            max_cpu,
            sandbox_image,
            harvest_globs,
        })
    }

    /// CPU budget converted to the engine's nano-CPU unit.
    ///
    /// # Errors
    ///
    /// Returns an error when the configured core count is not a positive
    /// finite number (already rejected by [`ExecutorConfig::from_env`]).
    pub fn max_cpu_nanos(&self) -> anyhow::Result<i64> {
        nano_cpus(self.max_cpu)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            execution_timeout_secs: DEFAULT_EXECUTION_TIMEOUT_SECS,
            max_memory: MemorySize::from_bytes(536_870_912),
            max_cpu: DEFAULT_MAX_CPU,
            sandbox_image: DEFAULT_SANDBOX_IMAGE.to_owned(),
            harvest_globs: vec![DEFAULT_OUTPUT_FILTER.to_owned()],
        }
    }
}

/// HTTP bind address configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,

    /// TCP port to bind.
    pub port: u16,
}

impl ServerConfig {
    /// Read server configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error when `PORT` is present but not a valid port number.
    pub fn from_env() -> anyhow::Result<Self> {
        let host = std::env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_owned());
        let port = env_or("PORT", DEFAULT_PORT)?;
        Ok(Self { host, port })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
        }
    }
}

/// Memory size parsed from a Docker-style limit string.
///
/// Accepts plain bytes or a `b`/`k`/`m`/`g` suffix (case-insensitive),
/// e.g. `"512m"`, `"2g"`, `"1048576"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySize(i64);

impl MemorySize {
    /// Wrap an already-resolved byte count.
    pub fn from_bytes(bytes: i64) -> Self {
        Self(bytes)
    }

    /// Size in bytes, as the engine expects it.
    pub fn bytes(self) -> i64 {
        self.0
    }
}

impl FromStr for MemorySize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            anyhow::bail!("memory size is empty");
        }

        let (digits, multiplier): (&str, i64) = match trimmed.chars().last() {
            Some(c) if c.is_ascii_digit() => (trimmed, 1),
            Some('b' | 'B') => (&trimmed[..trimmed.len().saturating_sub(1)], 1),
            Some('k' | 'K') => (&trimmed[..trimmed.len().saturating_sub(1)], 1_024),
            Some('m' | 'M') => (&trimmed[..trimmed.len().saturating_sub(1)], 1_048_576),
            Some('g' | 'G') => (&trimmed[..trimmed.len().saturating_sub(1)], 1_073_741_824),
            _ => anyhow::bail!("unrecognised memory size suffix in {trimmed:?}"),
        };

        let value: i64 = digits
            .parse()
            .with_context(|| format!("invalid memory size {trimmed:?}"))?;
        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| anyhow::anyhow!("memory size {trimmed:?} overflows"))?;
        if bytes <= 0 {
            anyhow::bail!("memory size must be positive, got {trimmed:?}");
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}b", self.0)
    }
}

/// Convert a CPU core count to the engine's nano-CPU unit.
///
/// Works on the decimal rendering to avoid lossy float casts; rejects
/// non-finite, non-positive, and out-of-range values.
///
/// # Errors
///
/// Returns an error when `cpu_cores` cannot be expressed as a positive
/// nano-CPU count.
pub fn nano_cpus(cpu_cores: f64) -> anyhow::Result<i64> {
    if !cpu_cores.is_finite() || cpu_cores <= 0.0 {
        anyhow::bail!("cpu core count must be a positive finite number");
    }

    let rendered = format!("{cpu_cores:.9}");
    let mut parts = rendered.split('.');
    let whole_raw = parts.next().unwrap_or("0");
    let fraction_raw = parts.next().unwrap_or("0");

    let whole: i64 = whole_raw.parse().context("cpu core count out of range")?;
    let mut fraction = fraction_raw.to_owned();
    while fraction.len() < 9 {
        fraction.push('0');
    }
    fraction.truncate(9);
    let fractional: i64 = fraction.parse().context("cpu core count out of range")?;

    let nanos = whole
        .checked_mul(1_000_000_000)
        .and_then(|value| value.checked_add(fractional))
        .ok_or_else(|| anyhow::anyhow!("cpu core count exceeds supported range"))?;
    if nanos <= 0 {
        anyhow::bail!("cpu core count converted to a non-positive nano-CPU value");
    }
    Ok(nanos)
}

/// Split a comma-separated glob list, dropping empty segments.
fn parse_filter_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|pattern| !pattern.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// Read an environment variable and parse it, falling back to a default
/// when the variable is unset.
fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {name}: {raw:?} ({e})")),
        Err(_) => Ok(default),
    }
}
