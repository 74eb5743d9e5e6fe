//! Repository layer for data access

pub mod analytics;
pub mod campaigns;
pub mod recipients;
pub mod senders;

use std::sync::Arc;

use crate::db::DatabasePool;
use crate::memory::MemoryStore;

// Re-export concrete repository implementations with simple names
pub use analytics::DbAnalyticsRepository;
pub use campaigns::DbCampaignRepository;
pub use recipients::DbRecipientRepository;
pub use senders::DbSenderRepository;

// Re-export repository traits
pub use analytics::AnalyticsRepository;
pub use campaigns::CampaignRepository;
pub use recipients::RecipientRepository;
pub use senders::SenderRepository;

/// The full set of repositories the engine works against
#[derive(Clone)]
pub struct Repositories {
    pub campaigns: Arc<dyn CampaignRepository>,
    pub senders: Arc<dyn SenderRepository>,
    pub recipients: Arc<dyn RecipientRepository>,
    pub analytics: Arc<dyn AnalyticsRepository>,
}

impl Repositories {
    /// PostgreSQL-backed repositories sharing one pool
    pub fn postgres(pool: DatabasePool) -> Self {
        Self {
            campaigns: Arc::new(DbCampaignRepository::new(pool.clone())),
            senders: Arc::new(DbSenderRepository::new(pool.clone())),
            recipients: Arc::new(DbRecipientRepository::new(pool.clone())),
            analytics: Arc::new(DbAnalyticsRepository::new(pool)),
        }
    }

    /// Repositories backed by a shared in-memory store
    pub fn memory(store: &MemoryStore) -> Self {
        Self {
            campaigns: Arc::new(store.clone()),
            senders: Arc::new(store.clone()),
            recipients: Arc::new(store.clone()),
            analytics: Arc::new(store.clone()),
        }
    }
}
