//! Per-alias broker client cache, initialized on first use.

use super::client::AlpacaBrokerClient;
use crate::config::CredentialResolver;
use crate::domain::ports::{BrokerClient, BrokerProvider};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

pub struct AlpacaBrokerRegistry {
    resolver: CredentialResolver,
    clients: RwLock<HashMap<String, Arc<AlpacaBrokerClient>>>,
}

impl AlpacaBrokerRegistry {
    pub fn new(resolver: CredentialResolver) -> Self {
        Self {
            resolver,
            clients: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl BrokerProvider for AlpacaBrokerRegistry {
    async fn broker_for(&self, alias: &str) -> Result<Arc<dyn BrokerClient>> {
        if let Some(client) = self.clients.read().await.get(alias) {
            return Ok(client.clone());
        }

        let creds = self.resolver.resolve(alias)?;
        info!(alias, base_url = %creds.base_url, paper = creds.paper, "broker client initialized");
        let client = Arc::new(AlpacaBrokerClient::new(creds));

        self.clients
            .write()
            .await
            .insert(alias.to_string(), client.clone());
        Ok(client)
    }
}
