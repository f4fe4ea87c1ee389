//! Parsing for `INFO` text output.
//!
//! INFO output is `key:value` per line, with section headers starting with `#`.

use std::collections::HashMap;

use regex::Regex;

use crate::client::types::ParseError;

/// Parse key-value pairs from INFO command output.
///
/// # Example
/// ```
/// use redis_operator::client::parsing::parse_info_output;
///
/// let info = "role:master\r\nconnected_slaves:2\r\n";
/// let parsed = parse_info_output(info).unwrap();
/// assert_eq!(parsed.get("role"), Some(&"master".to_string()));
/// ```
pub fn parse_info_output(info: &str) -> Result<HashMap<String, String>, ParseError> {
    let kv_regex = Regex::new(r"^([\w-]+):(.*)$").map_err(|e| ParseError::Regex(e.to_string()))?;

    let mut result = HashMap::new();
    for line in info.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(caps) = kv_regex.captures(line)
            && let (Some(key), Some(value)) = (caps.get(1), caps.get(2))
        {
            result.insert(key.as_str().to_string(), value.as_str().to_string());
        }
    }

    Ok(result)
}

/// Replication role reported by `INFO replication`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationRole {
    Master,
    Slave,
}

impl std::fmt::Display for ReplicationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicationRole::Master => write!(f, "master"),
            ReplicationRole::Slave => write!(f, "slave"),
        }
    }
}

/// A replica entry (`slaveN:ip=...,port=...,state=online,...`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedReplica {
    pub ip: String,
    pub port: u16,
    pub state: String,
}

impl AttachedReplica {
    fn parse(value: &str) -> Option<Self> {
        let fields: HashMap<&str, &str> = value
            .split(',')
            .filter_map(|field| field.split_once('='))
            .collect();
        Some(Self {
            ip: fields.get("ip")?.to_string(),
            port: fields.get("port")?.parse().ok()?,
            state: fields.get("state").copied().unwrap_or_default().to_string(),
        })
    }

    pub fn is_online(&self) -> bool {
        self.state == "online"
    }
}

/// Structured `INFO replication`.
#[derive(Debug, Clone)]
pub struct ReplicationInfo {
    pub role: ReplicationRole,
    /// `connected_slaves` as reported.
    pub connected_slaves: u32,
    /// Replica entries; only present on masters.
    pub replicas: Vec<AttachedReplica>,
    /// Master host for replicas.
    pub master_host: Option<String>,
    /// "up" or "down" for replicas.
    pub master_link_status: Option<String>,
}

impl ReplicationInfo {
    pub fn parse(info: &str) -> Result<Self, ParseError> {
        let parsed = parse_info_output(info)?;

        let role = match parsed.get("role").map(|r| r.trim()) {
            Some("master") => ReplicationRole::Master,
            Some("slave") | Some("replica") => ReplicationRole::Slave,
            Some(other) => {
                return Err(ParseError::MissingField(format!("unknown role: {}", other)));
            }
            None => return Err(ParseError::MissingField("role".to_string())),
        };

        let mut replicas: Vec<(u32, AttachedReplica)> = parsed
            .iter()
            .filter_map(|(key, value)| {
                let idx = key.strip_prefix("slave")?.parse().ok()?;
                Some((idx, AttachedReplica::parse(value)?))
            })
            .collect();
        replicas.sort_by_key(|(idx, _)| *idx);

        Ok(ReplicationInfo {
            role,
            connected_slaves: parsed
                .get("connected_slaves")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
            replicas: replicas.into_iter().map(|(_, r)| r).collect(),
            master_host: parsed.get("master_host").cloned(),
            master_link_status: parsed.get("master_link_status").cloned(),
        })
    }

    pub fn is_master(&self) -> bool {
        self.role == ReplicationRole::Master
    }

    /// Replicas currently online, falling back to `connected_slaves` when the
    /// per-replica lines are absent.
    pub fn online_replica_count(&self) -> u32 {
        if self.replicas.is_empty() {
            return self.connected_slaves;
        }
        self.replicas.iter().filter(|r| r.is_online()).count() as u32
    }
}
