//! Types for parsed Redis cluster information.
//!
//! These types represent the parsed output of `CLUSTER NODES`, `CLUSTER SLOTS`
//! and `CLUSTER INFO`.

use std::collections::HashMap;

use fred::types::Value;
use thiserror::Error;

use crate::crd::TOTAL_HASH_SLOTS;

/// Errors that can occur when parsing cluster data.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid cluster info format: {0}")]
    InvalidClusterInfo(String),
    #[error("Invalid cluster nodes format: {0}")]
    InvalidClusterNodes(String),
    #[error("Invalid cluster slots reply: {0}")]
    InvalidClusterSlots(String),
    #[error("Invalid slot range: {0}")]
    InvalidSlotRange(String),
    #[error("Invalid regex: {0}")]
    Regex(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Parsed output of `CLUSTER INFO`.
#[derive(Debug, Clone)]
pub struct ClusterInfo {
    /// `cluster_state:ok`.
    pub state_ok: bool,
    /// Number of hash slots assigned.
    pub slots_assigned: u32,
    /// Slot migrations in flight (Redis 8+, zero when absent).
    pub migration_active_tasks: u32,
    /// All raw key-value pairs.
    pub raw: HashMap<String, String>,
}

impl ClusterInfo {
    /// Parse the output of `CLUSTER INFO`.
    pub fn parse(info: &str) -> Result<Self, ParseError> {
        let raw: HashMap<String, String> = info
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let state = raw
            .get("cluster_state")
            .ok_or_else(|| ParseError::MissingField("cluster_state".to_string()))?;

        let slots_assigned = raw
            .get("cluster_slots_assigned")
            .map(|v| v.parse())
            .transpose()
            .map_err(|_| ParseError::InvalidClusterInfo("cluster_slots_assigned".to_string()))?
            .unwrap_or(0);

        let migration_active_tasks = raw
            .get("cluster_slot_migration_active_tasks")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        Ok(ClusterInfo {
            state_ok: state == "ok",
            slots_assigned,
            migration_active_tasks,
            raw,
        })
    }
}

/// An inclusive hash slot range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

impl SlotRange {
    /// Create a new slot range.
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Create a single-slot range.
    pub fn single(slot: u16) -> Self {
        Self {
            start: slot,
            end: slot,
        }
    }

    /// Number of slots in this range. Inverted ranges count as empty.
    pub fn count(&self) -> u32 {
        if self.end < self.start {
            0
        } else {
            u32::from(self.end - self.start) + 1
        }
    }

    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }

    /// Parse a slot token (e.g., "0-5460" or "5461").
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let s = s.trim();
        let parse_slot = |v: &str| -> Result<u16, ParseError> {
            let slot: u16 = v
                .parse()
                .map_err(|_| ParseError::InvalidSlotRange(format!("Invalid slot: {}", v)))?;
            if u32::from(slot) >= TOTAL_HASH_SLOTS {
                return Err(ParseError::InvalidSlotRange(format!(
                    "Slot out of range: {}",
                    slot
                )));
            }
            Ok(slot)
        };

        match s.split_once('-') {
            Some((start, end)) => Ok(SlotRange::new(parse_slot(start)?, parse_slot(end)?)),
            None => Ok(SlotRange::single(parse_slot(s)?)),
        }
    }
}

impl std::fmt::Display for SlotRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// One line of `CLUSTER NODES`.
#[derive(Debug, Clone)]
pub struct ClusterNodeInfo {
    /// 40-hex-char node ID.
    pub node_id: String,
    /// `ip:port` as announced.
    pub address: String,
    /// IP (or host) part of the address.
    pub ip: String,
    pub port: u16,
    /// Announced hostname, if any (`ip:port@cport,hostname`).
    pub hostname: Option<String>,
    /// Raw comma-separated flags.
    pub flags: String,
    /// Master node ID for replicas.
    pub master_id: Option<String>,
    /// "connected" or "disconnected".
    pub link_state: String,
    /// Owned slot ranges. Migration markers are not included.
    pub slots: Vec<SlotRange>,
    /// Whether the line carries `[slot->-id]` or `[slot-<-id]` markers.
    pub has_open_slots: bool,
}

impl ClusterNodeInfo {
    pub fn is_master(&self) -> bool {
        self.flags.contains("master")
    }

    pub fn is_replica(&self) -> bool {
        self.flags.contains("slave")
    }

    pub fn is_myself(&self) -> bool {
        self.flags.contains("myself")
    }

    pub fn is_connected(&self) -> bool {
        self.link_state == "connected"
    }

    /// Flags contain `fail` (including `fail?`) or the link is down.
    pub fn is_failed_or_disconnected(&self) -> bool {
        self.flags.contains("fail") || self.link_state.contains("disconnected")
    }

    /// Handshake, no address or failure flags, or a dead link.
    pub fn is_unstable(&self) -> bool {
        ["handshake", "noaddr", "fail"]
            .iter()
            .any(|flag| self.flags.contains(flag))
            || !self.is_connected()
    }

    /// Match by role flag substring; an empty flag matches every node.
    pub fn is_of_type(&self, role_flag: &str) -> bool {
        role_flag.is_empty() || self.flags.contains(role_flag)
    }

    /// Total number of slots owned by this node.
    pub fn slot_count(&self) -> u32 {
        self.slots.iter().map(SlotRange::count).sum()
    }

    /// Parse a single line from `CLUSTER NODES`.
    pub fn parse_line(line: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let [node_id, addr, flags, master_id, _ping, _pong, _epoch, link_state, slot_tokens @ ..] =
            parts.as_slice()
        else {
            return Err(ParseError::InvalidClusterNodes(format!(
                "Not enough fields in line: {}",
                line
            )));
        };

        if node_id.is_empty() {
            return Err(ParseError::InvalidClusterNodes(format!(
                "Empty node id in line: {}",
                line
            )));
        }

        // ip:port@cport[,hostname]
        let addr: &str = addr;
        let (ip_port, bus_part) = addr.split_once('@').unwrap_or((addr, ""));
        let hostname = bus_part
            .split_once(',')
            .map(|(_, host)| host.to_string())
            .filter(|host| !host.is_empty());
        let (ip, port) = ip_port.rsplit_once(':').ok_or_else(|| {
            ParseError::InvalidClusterNodes(format!("Invalid address format: {}", ip_port))
        })?;
        let port = port
            .parse()
            .map_err(|_| ParseError::InvalidClusterNodes(format!("Invalid port: {}", port)))?;

        let mut slots = Vec::new();
        let mut has_open_slots = false;
        for token in slot_tokens.iter() {
            if token.starts_with('[') {
                has_open_slots |= token.contains("->-") || token.contains("-<-");
                continue;
            }
            slots.push(SlotRange::parse(token)?);
        }

        Ok(ClusterNodeInfo {
            node_id: node_id.to_string(),
            address: ip_port.to_string(),
            ip: ip.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
            hostname,
            flags: flags.to_string(),
            master_id: (*master_id != "-").then(|| master_id.to_string()),
            link_state: link_state.to_string(),
            slots,
            has_open_slots,
        })
    }
}

/// Point-in-time view of the cluster as reported by one node.
#[derive(Debug, Clone, Default)]
pub struct ClusterTopologySnapshot {
    pub nodes: Vec<ClusterNodeInfo>,
}

impl ClusterTopologySnapshot {
    /// Parse the output of `CLUSTER NODES`.
    pub fn parse(output: &str) -> Result<Self, ParseError> {
        let nodes = output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(ClusterNodeInfo::parse_line)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ClusterTopologySnapshot { nodes })
    }

    pub fn masters(&self) -> Vec<&ClusterNodeInfo> {
        self.nodes.iter().filter(|n| n.is_master()).collect()
    }

    /// Nodes whose flags match a role substring (empty matches all).
    pub fn nodes_of_type(&self, role_flag: &str) -> Vec<&ClusterNodeInfo> {
        self.nodes.iter().filter(|n| n.is_of_type(role_flag)).collect()
    }

    pub fn get_node(&self, node_id: &str) -> Option<&ClusterNodeInfo> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    /// Whether any node announces the given host (IP or hostname).
    pub fn contains_host(&self, host: &str) -> bool {
        self.nodes
            .iter()
            .any(|n| n.ip == host || n.hostname.as_deref() == Some(host))
    }

    /// IDs of connected replicas currently attached to a master.
    pub fn attached_replicas(&self, master_id: &str) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.is_replica() && n.is_connected())
            .filter(|n| n.master_id.as_deref() == Some(master_id))
            .map(|n| n.node_id.clone())
            .collect()
    }

    /// Number of nodes flagged failed or with a disconnected link.
    pub fn failed_or_disconnected_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.is_failed_or_disconnected())
            .count()
    }

    /// Masters that are failed or disconnected.
    pub fn failed_masters(&self) -> Vec<&ClusterNodeInfo> {
        self.nodes
            .iter()
            .filter(|n| n.is_master() && n.is_failed_or_disconnected())
            .collect()
    }

    /// Total slots owned by masters, counting overlaps once per owner.
    pub fn total_slots_assigned(&self) -> u32 {
        self.masters().iter().map(|m| m.slot_count()).sum()
    }

    /// The union of master slots is exactly 0..16383 with no overlaps.
    pub fn has_full_coverage(&self) -> bool {
        let mut owned = vec![false; TOTAL_HASH_SLOTS as usize];
        for range in self.masters().iter().flat_map(|m| m.slots.iter()) {
            for slot in range.start..=range.end {
                match owned.get_mut(usize::from(slot)) {
                    Some(seen) if !*seen => *seen = true,
                    _ => return false,
                }
            }
        }
        owned.iter().all(|seen| *seen)
    }

    /// No open slots, no unstable nodes.
    pub fn is_stable(&self) -> bool {
        self.nodes
            .iter()
            .all(|n| !n.has_open_slots && !n.is_unstable())
    }
}

/// One entry of `CLUSTER SLOTS`: a range and every node serving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAssignment {
    pub range: SlotRange,
    /// Master first, then replicas.
    pub node_ids: Vec<String>,
}

impl SlotAssignment {
    pub fn new(start: u16, end: u16, node_ids: &[&str]) -> Self {
        Self {
            range: SlotRange::new(start, end),
            node_ids: node_ids.iter().map(|id| id.to_string()).collect(),
        }
    }
}

/// Parse a `CLUSTER SLOTS` reply.
///
/// Each entry is `[start, end, [ip, port, id, ...], [ip, port, id, ...]...]`.
pub fn parse_cluster_slots(reply: &Value) -> Result<Vec<SlotAssignment>, ParseError> {
    let entries = match reply {
        Value::Array(entries) => entries,
        Value::Null => return Ok(Vec::new()),
        other => {
            return Err(ParseError::InvalidClusterSlots(format!(
                "expected array, got {:?}",
                other.kind()
            )));
        }
    };

    entries
        .iter()
        .map(|entry| {
            let Value::Array(fields) = entry else {
                return Err(ParseError::InvalidClusterSlots(
                    "slot entry is not an array".to_string(),
                ));
            };
            let slot_at = |idx: usize| -> Result<u16, ParseError> {
                fields
                    .get(idx)
                    .and_then(Value::as_i64)
                    .and_then(|v| u16::try_from(v).ok())
                    .ok_or_else(|| {
                        ParseError::InvalidClusterSlots(format!("invalid slot bound at {}", idx))
                    })
            };
            let range = SlotRange::new(slot_at(0)?, slot_at(1)?);

            let node_ids = fields
                .iter()
                .skip(2)
                .filter_map(|node| match node {
                    Value::Array(node_fields) => node_fields
                        .get(2)
                        .and_then(|id| id.as_string())
                        .filter(|id| !id.is_empty()),
                    _ => None,
                })
                .collect();

            Ok(SlotAssignment { range, node_ids })
        })
        .collect()
}

/// Sum of slots in every range that lists `node_id`.
///
/// A range shared by several nodes counts toward each of them. A node that
/// appears nowhere owns zero slots.
pub fn count_slots_owned_by(assignments: &[SlotAssignment], node_id: &str) -> u32 {
    assignments
        .iter()
        .filter(|a| a.node_ids.iter().any(|id| id == node_id))
        .map(|a| a.range.count())
        .sum()
}
