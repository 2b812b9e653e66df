//! Process Configuration
//!
//! All knobs come from environment variables, resolved once at boot and passed
//! down explicitly. Worker processes read the same set; only `WORKER_MODE`,
//! `WORKER_ID` and `PARTITIONS` change their behavior.

use crate::error::ClusterError;

/// Default number of logical partitions in the shard space.
pub const DEFAULT_NUM_PARTITIONS: u32 = 8;
/// Default copies per stored item (primary + one replica).
pub const DEFAULT_REPLICATION_FACTOR: usize = 2;
/// Default size of the in-process worker pool.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Bucket holding raw image payloads for the distributed path.
pub const IMAGES_BUCKET: &str = "bigdata-images";
/// Bucket holding per-task result documents.
pub const RESULTS_BUCKET: &str = "bigdata-results";

#[derive(Debug, Clone)]
pub struct Config {
    pub hostname: String,
    pub port: u16,
    /// When true this process runs as a queue worker instead of the server.
    pub worker_mode: bool,
    pub worker_id: usize,
    /// Partition ids this worker process is allowed to lease.
    pub worker_partitions: Vec<u32>,
    pub num_partitions: u32,
    pub replication_factor: usize,
    pub worker_count: usize,
    pub ollama_url: String,
    pub ollama_model: String,
    pub minio_endpoint: Option<String>,
    pub minio_port: u16,
    pub minio_use_ssl: bool,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    pub redis_url: Option<String>,
    /// Base URL of the queue plane, as seen from worker processes.
    pub api_endpoint: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ClusterError> {
        let hostname = env_or("HOSTNAME", "0.0.0.0");
        let port = env_parsed("PORT", 3000u16);

        let worker_mode = env_or("WORKER_MODE", "false") == "true";
        let worker_id = env_parsed("WORKER_ID", 0usize);
        let worker_partitions = parse_partition_list(&env_or("PARTITIONS", ""))?;

        let num_partitions = env_parsed("NUM_PARTITIONS", DEFAULT_NUM_PARTITIONS);
        let replication_factor = env_parsed("REPLICATION_FACTOR", DEFAULT_REPLICATION_FACTOR);
        let worker_count = env_parsed("WORKER_COUNT", DEFAULT_WORKER_COUNT);

        let api_endpoint = env_or("API_ENDPOINT", &format!("http://127.0.0.1:{}", port));

        Ok(Self {
            hostname,
            port,
            worker_mode,
            worker_id,
            worker_partitions,
            num_partitions,
            replication_factor,
            worker_count,
            ollama_url: env_or("OLLAMA_URL", "http://127.0.0.1:11434"),
            ollama_model: env_or("OLLAMA_MODEL", "llava"),
            minio_endpoint: std::env::var("MINIO_ENDPOINT").ok().filter(|v| !v.is_empty()),
            minio_port: env_parsed("MINIO_PORT", 9000u16),
            minio_use_ssl: env_or("MINIO_USE_SSL", "false") == "true",
            minio_access_key: env_or("MINIO_ACCESS_KEY", "minioadmin"),
            minio_secret_key: env_or("MINIO_SECRET_KEY", "minioadmin"),
            redis_url: std::env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),
            api_endpoint,
        })
    }

    /// Endpoint URL for the object store, e.g. `http://minio:9000`.
    pub fn minio_url(&self) -> Option<String> {
        self.minio_endpoint.as_ref().map(|host| {
            let scheme = if self.minio_use_ssl { "https" } else { "http" };
            format!("{}://{}:{}", scheme, host, self.minio_port)
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parsed<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

/// Parses the `PARTITIONS` variable, a comma-separated list of partition ids.
fn parse_partition_list(raw: &str) -> Result<Vec<u32>, ClusterError> {
    if raw.trim().is_empty() {
        return Ok(vec![]);
    }
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| ClusterError::InvalidInput(format!("bad partition id: {:?}", part)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_list_parses() {
        assert_eq!(parse_partition_list("0,1,2").unwrap(), vec![0, 1, 2]);
        assert_eq!(parse_partition_list(" 3 , 7 ").unwrap(), vec![3, 7]);
        assert_eq!(parse_partition_list("").unwrap(), Vec::<u32>::new());
        assert!(parse_partition_list("0,x").is_err());
    }
}
