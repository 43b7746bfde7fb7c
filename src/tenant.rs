use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;

/// Keep what is safe in a file name; `None` when nothing is left.
fn sanitize_tenant(tenant: &str) -> Option<String> {
    let safe: String = tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    (!safe.is_empty()).then_some(safe)
}

/// Per-tenant engines, keyed by the pgwire database name. Each tenant owns
/// one WAL file under `data_dir` and one compactor task.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get the tenant's engine, replaying its WAL on first use.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        let name = sanitize_tenant(tenant)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty tenant name"))?;
        if let Some(engine) = self.engines.get(&name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        // Two first connections for one tenant race here; the entry lock lets
        // only one of them open the WAL.
        let mut created = false;
        let engine = self
            .engines
            .entry(name.clone())
            .or_try_insert_with(|| {
                created = true;
                Engine::new(self.data_dir.join(format!("{name}.wal"))).map(Arc::new)
            })?
            .value()
            .clone();

        if created {
            tokio::spawn(compactor::run_compactor(
                engine.clone(),
                self.compact_threshold,
            ));
            metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
            tracing::info!("tenant {name} loaded");
        }
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::fs;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tidyslot_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn at(scheduled_at: Ms) -> NewBooking {
        NewBooking {
            service_id: 5,
            scheduled_at: Some(scheduled_at),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let dir = test_data_dir("isolation");
        let tm = TenantManager::new(dir, 1000);
        let requester = Participant::Requester { id: 7 };

        let eng_a = tm.get_or_create("tenant_a").unwrap();
        let eng_b = tm.get_or_create("tenant_b").unwrap();

        eng_a.create_booking(requester, at(1_700_000_000_000)).await.unwrap();
        // Same pair and time in another tenant does not collide
        let b = eng_b.create_booking(requester, at(1_700_000_000_000)).await.unwrap();
        assert_eq!(b.id, 1);
        assert_eq!(eng_a.list_bookings(requester).await.len(), 1);
        assert_eq!(eng_b.list_bookings(requester).await.len(), 1);
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = TenantManager::new(dir.clone(), 1000);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);

        let _eng = tm.get_or_create("my_db").unwrap();
        assert!(dir.join("my_db.wal").exists());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let tm = TenantManager::new(dir, 1000);

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = TenantManager::new(dir.clone(), 1000);

        let evil = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());
        // Both spellings resolve to the same file, so to the same engine
        assert!(Arc::ptr_eq(&evil, &tm.get_or_create("evil").unwrap()));

        let err = tm.get_or_create("../..").err().unwrap();
        assert!(err.to_string().contains("empty tenant name"));
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = TenantManager::new(dir, 1000);

        let err = tm
            .get_or_create(&"x".repeat(MAX_TENANT_NAME_LEN + 1))
            .err()
            .unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let dir = test_data_dir("count_limit");
        let tm = TenantManager::new(dir, 1000);

        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        let err = tm.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many tenants"));
        // Existing tenants stay reachable at the limit
        tm.get_or_create("t0").unwrap();
    }
}
