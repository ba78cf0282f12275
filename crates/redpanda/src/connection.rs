//! Shared Redpanda client construction.

use crate::config::RedpandaConfig;
use findings_core::{Error, Result};
use rskafka::client::{partition::UnknownTopicHandling, Client, ClientBuilder, Credentials, SaslConfig};
use rskafka::client::partition::PartitionClient;
use std::sync::Arc;

/// Creates a TLS configuration for Redpanda Cloud.
fn create_tls_config() -> Arc<rustls::ClientConfig> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Arc::new(config)
}

/// Connect to the configured brokers. TLS and SASL/SCRAM are enabled together
/// when credentials are present.
pub async fn connect(config: &RedpandaConfig) -> Result<Client> {
    let mut builder = ClientBuilder::new(vec![config.broker_string()]);

    if let Some((username, password)) = config.sasl_credentials() {
        builder = builder
            .tls_config(create_tls_config())
            .sasl_config(SaslConfig::ScramSha256(Credentials::new(
                username.to_string(),
                password.to_string(),
            )));
    }

    builder
        .build()
        .await
        .map_err(|e| Error::internal(format!("Failed to connect to Redpanda: {}", e)))
}

/// Connect and open a partition client for `topic`.
pub async fn partition_client(
    config: &RedpandaConfig,
    topic: &str,
) -> Result<Arc<PartitionClient>> {
    let client = connect(config).await?;
    let partition = client
        .partition_client(topic.to_string(), config.partition, UnknownTopicHandling::Error)
        .await
        .map_err(|e| {
            Error::internal(format!("Failed to get partition client for {}: {}", topic, e))
        })?;
    Ok(Arc::new(partition))
}
