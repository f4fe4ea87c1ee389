//! Typed cluster commands.
//!
//! Composite `redis-cli --cluster` operations run inside a pod; the rest are
//! single Redis commands sent over a client connection. Argument vectors are
//! only produced at the execution boundary.

use std::fmt;

use crate::client::SlotRange;

pub const REDIS_CLI: &str = "redis-cli";

/// CA bundle path inside Redis pods when TLS is enabled.
pub const TLS_CA_PATH: &str = "/tls/ca.crt";

const REDACTED: &str = "******";

/// Credentials and transport flags appended to every `redis-cli` call.
#[derive(Clone, Default)]
pub struct CliAuth {
    pub password: Option<String>,
    pub tls: bool,
}

impl fmt::Debug for CliAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CliAuth")
            .field("password", &self.password.as_ref().map(|_| REDACTED))
            .field("tls", &self.tls)
            .finish()
    }
}

impl CliAuth {
    fn flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if let Some(password) = &self.password {
            flags.push("-a".to_string());
            flags.push(password.clone());
        }
        if self.tls {
            flags.extend(
                ["--tls", "--cacert", TLS_CA_PATH, "--insecure"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        }
        flags
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCommand {
    /// `--cluster create <addr>... --cluster-yes`
    Create { addresses: Vec<String> },
    /// `--cluster add-node <new> <existing> [--cluster-slave]`
    AddNode {
        new_node: String,
        existing_node: String,
        replica: bool,
    },
    /// `--cluster reshard <anchor> --cluster-from --cluster-to --cluster-slots --cluster-yes`
    Reshard {
        anchor: String,
        from_node_id: String,
        to_node_id: String,
        slots: u32,
    },
    /// `--cluster del-node <anchor> <node-id>`
    DelNode { anchor: String, node_id: String },
    /// `--cluster rebalance <anchor> [--cluster-use-empty-masters]`
    Rebalance {
        anchor: String,
        use_empty_masters: bool,
    },
    /// `--cluster check 127.0.0.1:<port>`
    Check { port: u16 },

    /// CLUSTER FAILOVER
    Failover,
    /// CLUSTER ADDSLOTS over a range
    AddSlots { range: SlotRange },
    /// CLUSTER RESET
    Reset { hard: bool },
    /// FLUSHALL
    FlushAll,
    /// CLUSTER MEET ip port
    Meet { ip: String, port: u16 },
    /// SLAVEOF host port
    ReplicaOf { host: String, port: u16 },
}

impl ClusterCommand {
    /// Sent over a client connection instead of exec'd through `redis-cli`.
    pub fn is_native(&self) -> bool {
        matches!(
            self,
            ClusterCommand::Failover
                | ClusterCommand::AddSlots { .. }
                | ClusterCommand::Reset { .. }
                | ClusterCommand::FlushAll
                | ClusterCommand::Meet { .. }
                | ClusterCommand::ReplicaOf { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClusterCommand::Create { .. } => "create",
            ClusterCommand::AddNode { replica: false, .. } => "add-node",
            ClusterCommand::AddNode { replica: true, .. } => "add-replica",
            ClusterCommand::Reshard { .. } => "reshard",
            ClusterCommand::DelNode { .. } => "del-node",
            ClusterCommand::Rebalance { .. } => "rebalance",
            ClusterCommand::Check { .. } => "check",
            ClusterCommand::Failover => "failover",
            ClusterCommand::AddSlots { .. } => "add-slots",
            ClusterCommand::Reset { .. } => "reset",
            ClusterCommand::FlushAll => "flushall",
            ClusterCommand::Meet { .. } => "meet",
            ClusterCommand::ReplicaOf { .. } => "replicaof",
        }
    }

    /// Every node address the command names.
    pub fn addresses(&self) -> Vec<&str> {
        match self {
            ClusterCommand::Create { addresses } => addresses.iter().map(String::as_str).collect(),
            ClusterCommand::AddNode {
                new_node,
                existing_node,
                ..
            } => vec![new_node.as_str(), existing_node.as_str()],
            ClusterCommand::Reshard { anchor, .. }
            | ClusterCommand::DelNode { anchor, .. }
            | ClusterCommand::Rebalance { anchor, .. } => vec![anchor.as_str()],
            _ => Vec::new(),
        }
    }

    /// Full argument vector.
    ///
    /// Composite commands start with `redis-cli` and carry the auth flags;
    /// native commands are the bare Redis command words.
    pub fn to_argv(&self, auth: &CliAuth) -> Vec<String> {
        let mut argv: Vec<String>;

        match self {
            ClusterCommand::Create { addresses } => {
                argv = cluster_args("create");
                argv.extend(addresses.iter().cloned());
                argv.push("--cluster-yes".to_string());
            }
            ClusterCommand::AddNode {
                new_node,
                existing_node,
                replica,
            } => {
                argv = cluster_args("add-node");
                argv.push(new_node.clone());
                argv.push(existing_node.clone());
                if *replica {
                    argv.push("--cluster-slave".to_string());
                }
            }
            ClusterCommand::Reshard {
                anchor,
                from_node_id,
                to_node_id,
                slots,
            } => {
                argv = cluster_args("reshard");
                argv.extend([
                    anchor.clone(),
                    "--cluster-from".to_string(),
                    from_node_id.clone(),
                    "--cluster-to".to_string(),
                    to_node_id.clone(),
                    "--cluster-slots".to_string(),
                    slots.to_string(),
                    "--cluster-yes".to_string(),
                ]);
            }
            ClusterCommand::DelNode { anchor, node_id } => {
                argv = cluster_args("del-node");
                argv.push(anchor.clone());
                argv.push(node_id.clone());
            }
            ClusterCommand::Rebalance {
                anchor,
                use_empty_masters,
            } => {
                argv = cluster_args("rebalance");
                argv.push(anchor.clone());
                if *use_empty_masters {
                    argv.push("--cluster-use-empty-masters".to_string());
                }
            }
            ClusterCommand::Check { port } => {
                argv = cluster_args("check");
                argv.push(format!("127.0.0.1:{}", port));
            }
            ClusterCommand::Failover => return words(&["CLUSTER", "FAILOVER"]),
            ClusterCommand::AddSlots { range } => {
                return vec!["CLUSTER".to_string(), "ADDSLOTS".to_string(), range.to_string()];
            }
            ClusterCommand::Reset { hard } => {
                return words(&["CLUSTER", "RESET", if *hard { "HARD" } else { "SOFT" }]);
            }
            ClusterCommand::FlushAll => return words(&["FLUSHALL"]),
            ClusterCommand::Meet { ip, port } => {
                return vec![
                    "CLUSTER".to_string(),
                    "MEET".to_string(),
                    ip.clone(),
                    port.to_string(),
                ];
            }
            ClusterCommand::ReplicaOf { host, port } => {
                return vec!["SLAVEOF".to_string(), host.clone(), port.to_string()];
            }
        }

        argv.extend(auth.flags());
        argv
    }
}

fn cluster_args(subcommand: &str) -> Vec<String> {
    words(&[REDIS_CLI, "--cluster", subcommand])
}

fn words(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Render an argument vector for logs with the `-a` value masked.
pub fn redact_argv(argv: &[String]) -> String {
    let mut out = Vec::with_capacity(argv.len());
    let mut mask_next = false;
    for arg in argv {
        if mask_next {
            out.push(REDACTED);
            mask_next = false;
            continue;
        }
        mask_next = arg == "-a";
        out.push(arg.as_str());
    }
    out.join(" ")
}
