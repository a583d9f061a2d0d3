#![allow(dead_code)]

use ota_dao::models::{AccessKey, Collaborator, NewApp, NewUser};
use ota_dao::services::IdGenerator;
use ota_dao::store::MemoryStore;
use ota_dao::Dao;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};

static TRACING: Once = Once::new();

/// Ids in creation order, so "first by id" means "first created".
#[derive(Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> String {
        format!("id-{:06}", self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

pub struct TestDao {
    pub dao: Dao,
    pub store: Arc<MemoryStore>,
}

impl TestDao {
    pub fn spawn() -> Self {
        TRACING.call_once(|| {
            let level = std::env::var("TEST_LOG").unwrap_or_else(|_| "warn".to_string());
            // Another test binary thread may already own the global subscriber.
            ota_core::observability::init_tracing("ota-dao-test", &level, None).ok();
        });

        let store = Arc::new(MemoryStore::new());
        let dao = Dao::new(
            store.clone(),
            Arc::new(SequentialIds::default()),
            vec!["GitHub".to_string()],
        );
        TestDao { dao, store }
    }
}

pub fn joe(email: &str) -> NewUser {
    NewUser::new(email, "Joe")
}

pub fn joe_with_key(email: &str, token: &str, key_name: &str) -> NewUser {
    NewUser::new(email, "Joe").with_access_key(token, AccessKey::named(key_name))
}

/// "Hello" owned by `owner` with a single `staging` deployment.
pub fn hello_app(owner: &str, staging_key: &str) -> NewApp {
    NewApp::new("Hello")
        .with_collaborator(owner, Collaborator::owner())
        .with_deployment("staging", staging_key)
}
