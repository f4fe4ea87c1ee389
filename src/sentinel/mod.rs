//! Sentinel configuration.
//!
//! Sentinels are pointed at the real master of a RedisReplication with
//! `SENTINEL MONITOR`, given the master password, then reset so they forget
//! replicas and sentinels learned for a previous master.

use std::fmt;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info, instrument, warn};

use crate::crd::{RedisSentinelConfig, SENTINEL_PORT};
use crate::topology::addressing::pod_fqdn;
use crate::topology::{NodeConnector, NodeRef, Result, TopologyError};

/// Where sentinels should look for the master.
#[derive(Clone, PartialEq, Eq)]
pub struct MonitorTarget {
    pub group: String,
    pub host: String,
    pub port: u16,
    pub quorum: String,
    pub auth_pass: Option<String>,
    /// Other addresses the same master may be reported under, such as the
    /// pod IP a sentinel resolved `host` to.
    pub aliases: Vec<String>,
}

impl fmt::Debug for MonitorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorTarget")
            .field("group", &self.group)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("quorum", &self.quorum)
            .field("auth_pass", &self.auth_pass.as_ref().map(|_| "******"))
            .field("aliases", &self.aliases)
            .finish()
    }
}

impl MonitorTarget {
    /// Monitor the resolved master. With `resolveHostnames: yes` sentinels get
    /// the pod's headless DNS name instead of its IP.
    pub fn new(config: &RedisSentinelConfig, master: &NodeRef, auth_pass: Option<String>) -> Self {
        let host = if config.resolves_hostnames() {
            pod_fqdn(&master.pod_name, &master.namespace)
        } else {
            master.host.clone()
        };
        Self {
            group: config.master_group_name.clone(),
            host,
            port: master.port,
            quorum: config.quorum.clone(),
            auth_pass,
            aliases: vec![master.host.clone()],
        }
    }

    /// Also accept `host` as the monitored address of this master.
    pub fn with_alias(mut self, host: impl Into<String>) -> Self {
        let host = host.into();
        if !host.is_empty() && !self.aliases.contains(&host) {
            self.aliases.push(host);
        }
        self
    }

    /// Whether a sentinel reporting `host` already watches this master.
    /// Sentinels resolving hostnames report the IP, sometimes a trailing dot.
    pub fn matches_host(&self, host: &str) -> bool {
        std::iter::once(&self.host)
            .chain(&self.aliases)
            .any(|known| same_host(known, host))
    }

    /// `host:port` recorded in status.
    pub fn address(&self) -> String {
        crate::topology::addressing::format_address(&self.host, self.port)
    }

    /// Commands sent to a sentinel that does not monitor the group yet.
    pub fn commands(&self) -> Vec<SentinelCommand> {
        self.commands_for(None)
    }

    /// Commands for a sentinel currently monitoring `current` for the group.
    ///
    /// Nothing is sent when it already watches this target; a different
    /// master is removed first because `SENTINEL MONITOR` rejects a known
    /// group name.
    pub fn commands_for(&self, current: Option<&(String, u16)>) -> Vec<SentinelCommand> {
        let mut commands = Vec::new();
        match current {
            Some((host, port)) if *port == self.port && self.matches_host(host) => return commands,
            Some(_) => commands.push(SentinelCommand::Remove {
                group: self.group.clone(),
            }),
            None => {}
        }

        commands.push(SentinelCommand::Monitor {
            group: self.group.clone(),
            host: self.host.clone(),
            port: self.port,
            quorum: self.quorum.clone(),
        });
        if let Some(password) = &self.auth_pass {
            commands.push(SentinelCommand::Set {
                group: self.group.clone(),
                option: "auth-pass".to_string(),
                value: password.clone(),
            });
        }
        commands.push(SentinelCommand::Reset {
            group: self.group.clone(),
        });
        commands
    }
}

fn same_host(a: &str, b: &str) -> bool {
    a.trim_end_matches('.')
        .eq_ignore_ascii_case(b.trim_end_matches('.'))
}

#[derive(Clone, PartialEq, Eq)]
pub enum SentinelCommand {
    Remove { group: String },
    Monitor {
        group: String,
        host: String,
        port: u16,
        quorum: String,
    },
    Set {
        group: String,
        option: String,
        value: String,
    },
    Reset { group: String },
}

impl SentinelCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            SentinelCommand::Remove { .. } => "remove",
            SentinelCommand::Monitor { .. } => "monitor",
            SentinelCommand::Set { .. } => "set",
            SentinelCommand::Reset { .. } => "reset",
        }
    }
}

impl fmt::Debug for SentinelCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SentinelCommand::Remove { group } => write!(f, "SENTINEL REMOVE {}", group),
            SentinelCommand::Monitor {
                group,
                host,
                port,
                quorum,
            } => write!(f, "SENTINEL MONITOR {} {} {} {}", group, host, port, quorum),
            SentinelCommand::Set { group, option, .. } => {
                write!(f, "SENTINEL SET {} {} ******", group, option)
            }
            SentinelCommand::Reset { group } => write!(f, "SENTINEL RESET {}", group),
        }
    }
}

/// Applies a [`MonitorTarget`] to sentinel pods.
#[derive(Clone)]
pub struct SentinelConfigurator {
    client: Client,
    namespace: String,
    connector: NodeConnector,
}

impl SentinelConfigurator {
    pub fn new(client: Client, namespace: &str, connector: NodeConnector) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            connector,
        }
    }

    /// Point one sentinel at `target`. Returns whether anything was sent.
    pub async fn configure(&self, sentinel: &NodeRef, target: &MonitorTarget) -> Result<bool> {
        let group = target.group.clone();
        let current = self
            .connector
            .with_node(sentinel, |client| async move {
                client.sentinel_master_addr(&group).await
            })
            .await?;

        let commands = target.commands_for(current.as_ref());
        if commands.is_empty() {
            debug!(pod = %sentinel.pod_name, "Sentinel already monitors master");
            return Ok(false);
        }

        for command in commands {
            debug!(pod = %sentinel.pod_name, command = ?command, "Sending sentinel command");
            self.connector
                .with_node(sentinel, move |client| async move {
                    match command {
                        SentinelCommand::Remove { group } => client.sentinel_remove(&group).await,
                        SentinelCommand::Monitor {
                            group,
                            host,
                            port,
                            quorum,
                        } => client.sentinel_monitor(&group, &host, port, &quorum).await,
                        SentinelCommand::Set {
                            group,
                            option,
                            value,
                        } => client.sentinel_set(&group, &option, &value).await,
                        SentinelCommand::Reset { group } => client.sentinel_reset(&group).await,
                    }
                })
                .await?;
        }
        Ok(true)
    }

    /// Configure every running sentinel matching `selector`.
    ///
    /// Returns how many sentinels monitor the target afterwards. Pods without an IP are
    /// skipped; a sentinel rejecting a command fails the pass after the
    /// remaining sentinels have been tried.
    #[instrument(skip(self, target), fields(namespace = %self.namespace, master = %target.address()))]
    pub async fn configure_all(&self, selector: &str, target: &MonitorTarget) -> Result<usize> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let list = pods.list(&ListParams::default().labels(selector)).await?;

        let mut configured = 0;
        let mut last_error: Option<TopologyError> = None;
        for pod in list.items {
            let name = pod.name_any();
            let Some(ip) = pod
                .status
                .as_ref()
                .and_then(|s| s.pod_ip.clone())
                .filter(|ip| !ip.is_empty())
            else {
                debug!(pod = %name, "Sentinel pod has no IP yet");
                continue;
            };
            let sentinel = NodeRef {
                pod_name: name.clone(),
                namespace: self.namespace.clone(),
                host: ip,
                port: sentinel_port(),
            };

            match self.configure(&sentinel, target).await {
                Ok(changed) => {
                    if changed {
                        info!(pod = %name, "Sentinel monitoring master");
                    }
                    configured += 1;
                }
                Err(e) => {
                    warn!(pod = %name, error = %e, "Failed to configure sentinel");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(configured),
        }
    }
}

fn sentinel_port() -> u16 {
    u16::try_from(SENTINEL_PORT).unwrap_or(26379)
}
