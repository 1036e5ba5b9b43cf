use serde::{Deserialize, Serialize};
use windlass_protocol::DEFAULT_CHUNK_LIMIT;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Address to listen on.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Root directory holding the metadata records and blobs to serve.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Log output format: "json" or "pretty".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Soft cap on a response frame's body + metadata, in bytes.
    #[serde(default = "default_chunk_limit")]
    pub chunk_limit: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            data_dir: default_data_dir(),
            log_format: default_log_format(),
            chunk_limit: default_chunk_limit(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8686".to_string()
}

fn default_data_dir() -> String {
    "/var/lib/windlass".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_chunk_limit() -> usize {
    DEFAULT_CHUNK_LIMIT
}

/// Parse a human-readable size ("4M", "512K", "1G", plain bytes).
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("size must not be empty".into());
    }
    let (digits, multiplier) = match s.chars().last() {
        Some('K') | Some('k') => (&s[..s.len() - 1], 1024u64),
        Some('M') | Some('m') => (&s[..s.len() - 1], 1024 * 1024),
        Some('G') | Some('g') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    let value: u64 = digits
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{s}' overflows"))
}
