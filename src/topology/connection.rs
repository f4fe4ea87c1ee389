//! Per-resource connection parameters and the node connector.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::client::{RedisClient, RedisClientConfig, RedisError, TlsCertData};
use crate::topology::addressing::{Addressing, AddressingMode, NodeRef};
use crate::topology::command::CliAuth;
use crate::topology::error::{Result, TopologyError};

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything needed to reach the pods of one custom resource.
///
/// Built fresh on every reconcile pass from the resource spec and its
/// secrets.
#[derive(Clone)]
pub struct ConnectionParams {
    pub namespace: String,
    pub name: String,
    pub port: u16,
    pub cluster_version: Option<String>,
    pub password: Option<String>,
    pub tls: Option<TlsCertData>,
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("port", &self.port)
            .field("cluster_version", &self.cluster_version)
            .field("auth", &self.password.is_some())
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl ConnectionParams {
    pub fn addressing_mode(&self) -> AddressingMode {
        AddressingMode::for_cluster_version(self.cluster_version.as_deref())
    }

    pub fn addressing(&self) -> Addressing {
        Addressing::new(&self.name, &self.namespace, self.port, self.addressing_mode())
    }

    pub fn cli_auth(&self) -> CliAuth {
        CliAuth {
            password: self.password.clone(),
            tls: self.tls.is_some(),
        }
    }

    pub fn connector(&self) -> NodeConnector {
        NodeConnector {
            password: self.password.clone(),
            tls: self.tls.clone(),
        }
    }
}

/// Opens one client connection per operation.
#[derive(Clone, Default)]
pub struct NodeConnector {
    password: Option<String>,
    tls: Option<TlsCertData>,
}

impl NodeConnector {
    pub fn client_config(&self, node: &NodeRef) -> RedisClientConfig {
        RedisClientConfig::new(node.host.clone(), node.port)
            .with_password(self.password.clone())
            .with_tls(self.tls.clone())
            .with_connection_timeout(CONNECTION_TIMEOUT)
            .with_command_timeout(COMMAND_TIMEOUT)
    }

    pub async fn connect(&self, node: &NodeRef) -> Result<RedisClient> {
        RedisClient::connect(&self.client_config(node))
            .await
            .map_err(|e| TopologyError::connectivity(&node.pod_name, e))
    }

    /// Run `op` against a fresh connection and close it afterwards, whether
    /// or not `op` succeeded.
    pub async fn with_node<T, F, Fut>(&self, node: &NodeRef, op: F) -> Result<T>
    where
        F: FnOnce(RedisClient) -> Fut,
        Fut: Future<Output = std::result::Result<T, RedisError>>,
    {
        let client = self.connect(node).await?;
        let result = op(client.clone()).await;
        client.close().await;
        if let Err(e) = &result {
            debug!(pod = %node.pod_name, error = %e, "Redis command failed");
        }
        result.map_err(|e| TopologyError::connectivity(&node.pod_name, e))
    }
}
