//! Redpanda health checks.

use crate::config::RedpandaConfig;
use crate::connection::connect;
use std::collections::HashSet;
use tracing::{debug, error};

/// Check Redpanda connection health.
pub async fn check_connection(config: &RedpandaConfig) -> bool {
    match connect(config).await {
        Ok(client) => match client.list_topics().await {
            Ok(topics) => {
                debug!(topics = topics.len(), "Redpanda connection healthy");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to list Redpanda topics");
                false
            }
        },
        Err(e) => {
            error!(error = %e, "Failed to connect to Redpanda");
            false
        }
    }
}

/// Returns the configured topics that do not exist on the cluster.
pub async fn missing_topics(config: &RedpandaConfig) -> Vec<String> {
    let wanted = [
        config.findings_topic.as_str(),
        config.dead_letter_topic.as_str(),
    ];
    let all_missing = || wanted.iter().map(|t| t.to_string()).collect();

    let Ok(client) = connect(config).await else {
        return all_missing();
    };
    match client.list_topics().await {
        Ok(existing_topics) => {
            let existing: HashSet<_> = existing_topics.iter().map(|t| t.name.as_str()).collect();
            wanted
                .iter()
                .filter(|t| !existing.contains(*t))
                .map(|t| t.to_string())
                .collect()
        }
        Err(_) => all_missing(),
    }
}
