//! Command executors.
//!
//! `PodExecutor` runs `redis-cli --cluster` inside a Redis pod through the
//! Kubernetes exec subresource. `NativeExecutor` sends single commands over
//! a client connection. `RoutingExecutor` picks one per command.

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::api::{Api, AttachParams};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::client::RedisError;
use crate::topology::addressing::NodeRef;
use crate::topology::command::{CliAuth, ClusterCommand, redact_argv};
use crate::topology::connection::NodeConnector;
use crate::topology::error::{Result, TopologyError};

const EXEC_TIMEOUT: Duration = Duration::from_secs(120);

/// Captured process output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs a cluster command against a target pod.
///
/// A failed command means the operation did not happen; callers re-inspect
/// the cluster on the next pass instead of replaying it.
pub trait CommandExecutor: Send + Sync {
    fn execute(
        &self,
        target: &NodeRef,
        command: &ClusterCommand,
    ) -> impl Future<Output = Result<CommandOutput>> + Send;
}

/// Exec's `redis-cli` in the `<cr>-leader` container of the target pod.
#[derive(Clone)]
pub struct PodExecutor {
    client: Client,
    namespace: String,
    container: String,
    auth: CliAuth,
    timeout: Duration,
}

impl PodExecutor {
    pub fn new(client: Client, namespace: &str, cr_name: &str, auth: CliAuth) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            container: format!("{}-leader", cr_name),
            auth,
            timeout: EXEC_TIMEOUT,
        }
    }

    async fn ensure_container(&self, pods: &Api<Pod>, pod_name: &str, command: &str) -> Result<()> {
        let pod = pods.get(pod_name).await?;
        let found = pod
            .spec
            .as_ref()
            .is_some_and(|spec| spec.containers.iter().any(|c| c.name == self.container));
        if found {
            Ok(())
        } else {
            Err(TopologyError::Executor {
                command: command.to_string(),
                message: format!("container {} not found in pod {}", self.container, pod_name),
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    async fn run(&self, pod_name: &str, argv: Vec<String>, rendered: &str) -> Result<CommandOutput> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        self.ensure_container(&pods, pod_name, rendered).await?;

        let params = AttachParams::default()
            .container(self.container.clone())
            .stdin(false)
            .stdout(true)
            .stderr(true);

        let mut attached = pods
            .exec(pod_name, argv, &params)
            .await
            .map_err(|e| executor_error(rendered, format!("exec failed: {}", e), CommandOutput::default()))?;

        let (stdout, stderr) = tokio::join!(read_stream(attached.stdout()), read_stream(attached.stderr()));
        let output = CommandOutput { stdout, stderr };

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        if let Err(e) = attached.join().await {
            debug!(pod = pod_name, error = %e, "Exec stream closed with error");
        }

        match status {
            Some(status) if status.status.as_deref() != Some("Success") => Err(executor_error(
                rendered,
                status
                    .message
                    .unwrap_or_else(|| "command exited with failure".to_string()),
                output,
            )),
            _ => Ok(output),
        }
    }
}

impl CommandExecutor for PodExecutor {
    async fn execute(&self, target: &NodeRef, command: &ClusterCommand) -> Result<CommandOutput> {
        if command.is_native() {
            return Err(TopologyError::Unsupported(format!(
                "{} is not a redis-cli --cluster command",
                command.kind()
            )));
        }

        let argv = command.to_argv(&self.auth);
        let rendered = redact_argv(&argv);
        debug!(pod = %target.pod_name, command = %rendered, "Executing redis-cli");

        let result = tokio::time::timeout(self.timeout, self.run(&target.pod_name, argv, &rendered))
            .await
            .unwrap_or_else(|_| {
                Err(executor_error(
                    &rendered,
                    format!("timed out after {:?}", self.timeout),
                    CommandOutput::default(),
                ))
            });

        match &result {
            Ok(output) => {
                info!(pod = %target.pod_name, command = %rendered, "Executed cluster command");
                debug!(stdout = %output.stdout, "Command output");
            }
            Err(TopologyError::Executor { message, stdout, stderr, .. }) => {
                warn!(
                    pod = %target.pod_name,
                    command = %rendered,
                    error = %message,
                    stdout = %stdout,
                    stderr = %stderr,
                    "Cluster command failed"
                );
            }
            Err(e) => warn!(pod = %target.pod_name, command = %rendered, error = %e, "Cluster command failed"),
        }
        result
    }
}

async fn read_stream<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        debug!(error = %e, "Failed reading exec stream");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn executor_error(command: &str, message: String, output: CommandOutput) -> TopologyError {
    TopologyError::Executor {
        command: command.to_string(),
        message,
        stdout: output.stdout,
        stderr: output.stderr,
    }
}

/// Sends native commands over a client connection to the target node.
#[derive(Clone)]
pub struct NativeExecutor {
    connector: NodeConnector,
}

impl NativeExecutor {
    pub fn new(connector: NodeConnector) -> Self {
        Self { connector }
    }
}

impl CommandExecutor for NativeExecutor {
    async fn execute(&self, target: &NodeRef, command: &ClusterCommand) -> Result<CommandOutput> {
        if !command.is_native() {
            return Err(TopologyError::Unsupported(format!(
                "{} needs redis-cli",
                command.kind()
            )));
        }
        debug!(pod = %target.pod_name, command = command.kind(), "Sending cluster command");

        let command = command.clone();
        self.connector
            .with_node(target, |client| async move {
                match command {
                    ClusterCommand::Failover => client.cluster_failover().await?,
                    ClusterCommand::AddSlots { range } => {
                        client.cluster_add_slots((range.start..=range.end).collect()).await?
                    }
                    ClusterCommand::Reset { hard } => client.cluster_reset(hard).await?,
                    ClusterCommand::FlushAll => client.flushall().await?,
                    ClusterCommand::Meet { ip, port } => client.cluster_meet(&ip, port).await?,
                    ClusterCommand::ReplicaOf { host, port } => client.replicaof(&host, port).await?,
                    other => {
                        return Err(RedisError::InvalidConfig(format!(
                            "{} is not a native command",
                            other.kind()
                        )));
                    }
                }
                Ok(CommandOutput::default())
            })
            .await
    }
}

/// Native commands over a connection, composite ones through pod exec.
#[derive(Clone)]
pub struct RoutingExecutor {
    remote: PodExecutor,
    native: NativeExecutor,
}

impl RoutingExecutor {
    pub fn new(remote: PodExecutor, native: NativeExecutor) -> Self {
        Self { remote, native }
    }
}

impl CommandExecutor for RoutingExecutor {
    async fn execute(&self, target: &NodeRef, command: &ClusterCommand) -> Result<CommandOutput> {
        if command.is_native() {
            self.native.execute(target, command).await
        } else {
            self.remote.execute(target, command).await
        }
    }
}
