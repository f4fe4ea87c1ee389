//! Redis node connector built on the fred crate.
//!
//! Every connection targets exactly one Redis server (standalone, replica,
//! cluster node or sentinel). Callers own the connection and must `close` it.

use std::sync::Arc;
use std::time::Duration;

use fred::prelude::*;
use fred::types::cluster::ClusterResetFlag;
use fred::types::{ClusterHash, CustomCommand, InfoKind};
use rustls::pki_types::CertificateDer;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::client::parsing::ReplicationInfo;
use crate::client::types::{
    ClusterInfo, ClusterTopologySnapshot, ParseError, SlotAssignment, parse_cluster_slots,
};

/// Errors that can occur while talking to a Redis server.
#[derive(Error, Debug)]
pub enum RedisError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] crate::client::types::ParseError),

    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// TLS material loaded from a Kubernetes secret.
#[derive(Clone)]
pub struct TlsCertData {
    /// CA certificate in PEM format.
    pub ca_cert_pem: Vec<u8>,
    /// Client certificate in PEM format (optional, for mTLS).
    pub client_cert_pem: Option<Vec<u8>>,
    /// Client key in PEM format (optional, for mTLS).
    pub client_key_pem: Option<Vec<u8>>,
}

impl std::fmt::Debug for TlsCertData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsCertData")
            .field("client_auth", &self.client_cert_pem.is_some())
            .finish_non_exhaustive()
    }
}

/// Connection parameters for a single Redis server.
#[derive(Clone)]
pub struct RedisClientConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub tls: Option<TlsCertData>,
    pub connection_timeout: Duration,
    pub command_timeout: Duration,
}

impl std::fmt::Debug for RedisClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("auth", &self.password.is_some())
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl RedisClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
            tls: None,
            connection_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn with_tls(mut self, tls: Option<TlsCertData>) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

/// A connection to one Redis server.
#[derive(Clone)]
pub struct RedisClient {
    client: Client,
}

impl RedisClient {
    /// Connect to a single (non-clustered) endpoint.
    #[instrument(skip_all, fields(host = %config.host, port = config.port, tls = config.tls.is_some()))]
    pub async fn connect(config: &RedisClientConfig) -> Result<Self, RedisError> {
        if config.host.is_empty() {
            return Err(RedisError::InvalidConfig("empty host".to_string()));
        }

        let mut redis_config = Config {
            server: ServerConfig::Centralized {
                server: Server::new(config.host.as_str(), config.port),
            },
            password: config.password.clone(),
            ..Default::default()
        };

        if let Some(certs) = &config.tls {
            redis_config.tls = Some(build_tls_connector(certs)?.into());
        }

        let command_timeout = config.command_timeout;
        let connection_timeout = config.connection_timeout;
        let client = Builder::from_config(redis_config)
            .with_performance_config(|perf| {
                perf.default_command_timeout = command_timeout;
            })
            .with_connection_config(|conn| {
                conn.connection_timeout = connection_timeout;
            })
            .build()?;

        client.init().await?;
        debug!("Connected to Redis");

        Ok(Self { client })
    }

    /// Release the connection.
    pub async fn close(&self) {
        if let Err(e) = self.client.quit().await {
            debug!(error = %e, "QUIT failed while closing connection");
        }
    }

    #[instrument(skip(self))]
    pub async fn ping(&self) -> Result<String, RedisError> {
        let response: String = self.client.ping(None).await?;
        Ok(response)
    }

    /// PING answered with PONG.
    pub async fn is_alive(&self) -> bool {
        matches!(self.ping().await, Ok(reply) if reply.eq_ignore_ascii_case("PONG"))
    }

    #[instrument(skip(self))]
    pub async fn info_replication(&self) -> Result<ReplicationInfo, RedisError> {
        let raw: String = self.client.info(Some(InfoKind::Replication)).await?;
        Ok(ReplicationInfo::parse(&raw)?)
    }

    #[instrument(skip(self))]
    pub async fn cluster_nodes(&self) -> Result<ClusterTopologySnapshot, RedisError> {
        let raw: String = self.client.cluster_nodes().await?;
        ClusterTopologySnapshot::parse(&raw).map_err(|e| {
            debug!(payload = %raw, "Unparseable CLUSTER NODES reply");
            RedisError::Parse(e)
        })
    }

    #[instrument(skip(self))]
    pub async fn cluster_info(&self) -> Result<ClusterInfo, RedisError> {
        let raw: String = self.client.cluster_info().await?;
        Ok(ClusterInfo::parse(&raw)?)
    }

    #[instrument(skip(self))]
    pub async fn cluster_slots(&self) -> Result<Vec<SlotAssignment>, RedisError> {
        let reply: Value = self.client.cluster_slots().await?;
        Ok(parse_cluster_slots(&reply)?)
    }

    #[instrument(skip(self))]
    pub async fn cluster_myid(&self) -> Result<String, RedisError> {
        let id: String = self.client.cluster_myid().await?;
        Ok(id)
    }

    /// Execute CLUSTER FAILOVER on a replica to promote it.
    #[instrument(skip(self))]
    pub async fn cluster_failover(&self) -> Result<(), RedisError> {
        self.client.cluster_failover(None).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn cluster_reset(&self, hard: bool) -> Result<(), RedisError> {
        let mode = if hard {
            ClusterResetFlag::Hard
        } else {
            ClusterResetFlag::Soft
        };
        self.client.cluster_reset(Some(mode)).await?;
        Ok(())
    }

    #[instrument(skip(self, slots), fields(slot_count = slots.len()))]
    pub async fn cluster_add_slots(&self, slots: Vec<u16>) -> Result<(), RedisError> {
        self.client.cluster_add_slots(slots).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn cluster_meet(&self, ip: &str, port: u16) -> Result<(), RedisError> {
        self.client.cluster_meet(ip, port).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn flushall(&self) -> Result<(), RedisError> {
        self.custom("FLUSHALL", Vec::new()).await
    }

    /// SLAVEOF host port
    #[instrument(skip(self))]
    pub async fn replicaof(&self, host: &str, port: u16) -> Result<(), RedisError> {
        self.custom("SLAVEOF", vec![host.to_string(), port.to_string()])
            .await
    }

    /// SENTINEL MONITOR group host port quorum
    #[instrument(skip(self))]
    pub async fn sentinel_monitor(
        &self,
        group: &str,
        host: &str,
        port: u16,
        quorum: &str,
    ) -> Result<(), RedisError> {
        self.custom(
            "SENTINEL",
            vec![
                "MONITOR".to_string(),
                group.to_string(),
                host.to_string(),
                port.to_string(),
                quorum.to_string(),
            ],
        )
        .await
    }

    /// SENTINEL SET group option value
    #[instrument(skip(self, value))]
    pub async fn sentinel_set(&self, group: &str, option: &str, value: &str) -> Result<(), RedisError> {
        self.custom(
            "SENTINEL",
            vec![
                "SET".to_string(),
                group.to_string(),
                option.to_string(),
                value.to_string(),
            ],
        )
        .await
    }

    /// SENTINEL RESET pattern
    #[instrument(skip(self))]
    pub async fn sentinel_reset(&self, pattern: &str) -> Result<(), RedisError> {
        self.custom("SENTINEL", vec!["RESET".to_string(), pattern.to_string()])
            .await
    }

    /// SENTINEL REMOVE group
    #[instrument(skip(self))]
    pub async fn sentinel_remove(&self, group: &str) -> Result<(), RedisError> {
        self.custom("SENTINEL", vec!["REMOVE".to_string(), group.to_string()])
            .await
    }

    /// Address a sentinel currently monitors for `group`, `None` when the
    /// group is unknown to it.
    #[instrument(skip(self))]
    pub async fn sentinel_master_addr(&self, group: &str) -> Result<Option<(String, u16)>, RedisError> {
        let cmd = CustomCommand::new_static("SENTINEL", ClusterHash::FirstKey, false);
        let reply: Value = self
            .client
            .custom(
                cmd,
                vec!["GET-MASTER-ADDR-BY-NAME".to_string(), group.to_string()],
            )
            .await?;
        if reply.is_null() {
            return Ok(None);
        }

        let parts: Vec<String> = reply.convert()?;
        match parts.as_slice() {
            [host, port] => {
                let port = port.parse().map_err(|_| {
                    ParseError::MissingField(format!("sentinel master port: {}", port))
                })?;
                Ok(Some((host.clone(), port)))
            }
            _ => Err(ParseError::MissingField(format!(
                "sentinel master address for {}",
                group
            ))
            .into()),
        }
    }

    async fn custom(&self, command: &'static str, args: Vec<String>) -> Result<(), RedisError> {
        let cmd = CustomCommand::new_static(command, ClusterHash::FirstKey, false);
        let _: Value = self.client.custom(cmd, args).await?;
        Ok(())
    }
}

/// Build a TLS connector from certificate data.
///
/// The chain is verified against the CA from the secret. Name mismatches are
/// accepted because nodes are often dialled by pod IP while certificates name
/// the headless service.
fn build_tls_connector(certs: &TlsCertData) -> Result<TlsConnector, RedisError> {
    use rustls::client::WebPkiServerVerifier;
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{ServerName, UnixTime};
    use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

    let mut root_store = RootCertStore::empty();
    let ca_certs = rustls_pemfile::certs(&mut certs.ca_cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RedisError::Connection(format!("Failed to parse CA certificate: {}", e)))?;
    for cert in ca_certs {
        root_store
            .add(cert)
            .map_err(|e| RedisError::Connection(format!("Failed to add CA certificate: {}", e)))?;
    }

    let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(root_store), provider.clone())
        .build()
        .map_err(|e| RedisError::Connection(format!("Failed to build verifier: {}", e)))?;

    #[derive(Debug)]
    struct PodAddressVerifier {
        inner: Arc<WebPkiServerVerifier>,
    }

    impl ServerCertVerifier for PodAddressVerifier {
        fn verify_server_cert(
            &self,
            end_entity: &CertificateDer<'_>,
            intermediates: &[CertificateDer<'_>],
            server_name: &ServerName<'_>,
            ocsp_response: &[u8],
            now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            match self.inner.verify_server_cert(
                end_entity,
                intermediates,
                server_name,
                ocsp_response,
                now,
            ) {
                Err(rustls::Error::InvalidCertificate(
                    CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
                )) => Ok(ServerCertVerified::assertion()),
                other => other,
            }
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            self.inner.verify_tls12_signature(message, cert, dss)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            self.inner.verify_tls13_signature(message, cert, dss)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.inner.supported_verify_schemes()
        }
    }

    let verifier = Arc::new(PodAddressVerifier { inner });
    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| RedisError::Connection(format!("Failed to build TLS config: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(verifier);

    let config = if let (Some(cert_pem), Some(key_pem)) =
        (&certs.client_cert_pem, &certs.client_key_pem)
    {
        let client_certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
            .collect::<Result<Vec<CertificateDer<'static>>, _>>()
            .map_err(|e| {
                RedisError::Connection(format!("Failed to parse client certificate: {}", e))
            })?;
        let client_key = rustls_pemfile::private_key(&mut key_pem.as_slice())
            .map_err(|e| RedisError::Connection(format!("Failed to parse client key: {}", e)))?
            .ok_or_else(|| RedisError::Connection("No private key found in PEM".to_string()))?;

        builder
            .with_client_auth_cert(client_certs, client_key)
            .map_err(|e| RedisError::Connection(format!("Failed to build TLS config: {}", e)))?
    } else {
        builder.with_no_client_auth()
    };

    Ok(TlsConnector::from(config))
}
