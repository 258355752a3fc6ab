//! Document database resource.

use crate::config::DatabaseConfig;
use crate::resources::memory_host;
use async_trait::async_trait;
use resource_framework::{DocumentCollection, MemoryEngine, Resource, ResourceError};
use serde_json::json;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument};

const NAME: &str = "database";
const PING_COLLECTION: &str = "system.ping";

/// The document database. Collections are only available between `connect` and `close`.
pub struct DocumentDatabase {
    config: DatabaseConfig,
    engine: RwLock<Option<Arc<MemoryEngine>>>,
}

impl DocumentDatabase {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            engine: RwLock::new(None),
        }
    }

    fn engine(&self) -> Result<Arc<MemoryEngine>, ResourceError> {
        let guard = self.engine.read().map_err(|_| ResourceError::Failed {
            resource: NAME.to_string(),
            reason: "connection state poisoned".into(),
        })?;
        guard
            .as_ref()
            .filter(|engine| engine.is_open())
            .cloned()
            .ok_or_else(|| ResourceError::NotConnected(NAME.to_string()))
    }

    /// Returns a shared handle to the named collection.
    pub fn collection(&self, name: &str) -> Result<Arc<dyn DocumentCollection>, ResourceError> {
        let collection = self.engine()?.collection(name).map_err(|e| ResourceError::Failed {
            resource: NAME.to_string(),
            reason: e.to_string(),
        })?;
        Ok(collection as Arc<dyn DocumentCollection>)
    }

    pub fn database_name(&self) -> &str {
        &self.config.name
    }
}

#[async_trait]
impl Resource for DocumentDatabase {
    #[instrument(name = "database.connect", skip(self), fields(url = %self.config.url, db = %self.config.name))]
    async fn connect(&self) -> Result<(), ResourceError> {
        let host = memory_host(NAME, &self.config.url)?;
        info!(host, "Connecting to database");

        let engine = Arc::new(MemoryEngine::new(self.config.name.clone()));
        {
            let mut slot = self.engine.write().map_err(|_| ResourceError::Failed {
                resource: NAME.to_string(),
                reason: "connection state poisoned".into(),
            })?;
            *slot = Some(engine);
        }

        self.ping().await?;
        info!("Successfully connected to database");
        Ok(())
    }

    async fn close(&self) -> Result<(), ResourceError> {
        let engine = match self.engine.write() {
            Ok(mut slot) => slot.take(),
            Err(_) => {
                return Err(ResourceError::Failed {
                    resource: NAME.to_string(),
                    reason: "connection state poisoned".into(),
                })
            }
        };
        match engine {
            Some(engine) => {
                engine.shutdown();
                info!("Database connection closed");
            }
            None => debug!("Database was not connected"),
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), ResourceError> {
        let engine = self.engine()?;
        let probe = async {
            let collection = engine.collection(PING_COLLECTION)?;
            collection.count(&json!({})).await
        };
        match tokio::time::timeout(self.config.ping_timeout, probe).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ResourceError::Failed {
                resource: NAME.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(ResourceError::Timeout {
                resource: NAME.to_string(),
                after: self.config.ping_timeout,
            }),
        }
    }

    fn name(&self) -> &str {
        NAME
    }
}
