//! Tests for `creator` module

use super::*;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// In-memory directory whose creates are atomic and whose listings can lag.
#[derive(Default)]
struct FakeDirectory {
    items: Mutex<Vec<ResourceRecord>>,
    /// Number of upcoming listings that hide items created after start.
    hidden_listings: AtomicU32,
    pending: Mutex<Vec<ResourceRecord>>,
    next_id: AtomicU32,
    list_calls: AtomicU32,
}

impl FakeDirectory {
    fn with_item(id: &str, name: &str) -> Self {
        let dir = Self::default();
        dir.items.lock().unwrap().push(record(Some(id), name));
        dir
    }

    /// Inserts `name` unless present; mimics the control plane's name check.
    fn create(&self, name: &str) -> Result<ResourceRecord> {
        let mut items = self.items.lock().unwrap();
        let pending = self.pending.lock().unwrap();
        if items
            .iter()
            .chain(pending.iter())
            .any(|r| r.display_name.as_deref() == Some(name))
        {
            return Err(Error::Conflict {
                status: 409,
                url: "fake".to_string(),
                body: "ItemDisplayNameAlreadyInUse".to_string(),
            });
        }
        let id = format!("id-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let created = record(Some(&id), name);
        items.push(created.clone());
        Ok(created)
    }

    /// Accepts the create but only makes it listable after a few lookups.
    fn create_accepted(&self, name: &str, visible_after: u32) -> Result<ResourceRecord> {
        let id = format!("id-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.pending.lock().unwrap().push(record(Some(&id), name));
        self.hidden_listings.store(visible_after, Ordering::SeqCst);
        Ok(record(None, name))
    }
}

#[async_trait]
impl ResourceDirectory for FakeDirectory {
    async fn list(&self, _kind: ResourceKind) -> Result<Vec<ResourceRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        // Give a concurrent caller the chance to interleave.
        tokio::task::yield_now().await;
        let hidden = self.hidden_listings.load(Ordering::SeqCst);
        if hidden > 0 {
            self.hidden_listings.store(hidden - 1, Ordering::SeqCst);
        } else {
            let mut pending = self.pending.lock().unwrap();
            self.items.lock().unwrap().append(&mut pending);
        }
        Ok(self.items.lock().unwrap().clone())
    }
}

fn record(id: Option<&str>, name: &str) -> ResourceRecord {
    let raw = json!({ "id": id, "displayName": name });
    ResourceRecord {
        id: id.map(str::to_string),
        display_name: Some(name.to_string()),
        raw,
    }
}

fn fast_config() -> CreatorConfig {
    let quick = |max_retries| RetryConfig {
        max_retries,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        backoff_multiplier: 2.0,
        add_jitter: false,
        deadline: None,
    };
    CreatorConfig {
        name_propagation: quick(3),
        id_lookup: quick(5),
    }
}

#[tokio::test]
async fn test_ensure_is_idempotent() {
    // Arrange
    let dir = FakeDirectory::default();
    let creator = ResourceCreator::new(&dir, fast_config());

    // Act
    let first = creator
        .ensure(ResourceKind::Warehouse, "W1", || async { dir.create("W1") })
        .await
        .unwrap();
    let second = creator
        .ensure(ResourceKind::Warehouse, "W1", || async { dir.create("W1") })
        .await
        .unwrap();

    // Assert
    assert!(!first.reused);
    assert!(second.reused);
    assert_eq!(first.id, second.id);
    assert_eq!(dir.items.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_ensure_reuses_without_calling_create() {
    // Arrange
    let dir = FakeDirectory::with_item("conn-7", "srv;db");
    let creator = ResourceCreator::new(&dir, fast_config());
    let creates = AtomicU32::new(0);

    // Act
    let found = creator
        .ensure(ResourceKind::Connection, "srv;db", || async {
            creates.fetch_add(1, Ordering::SeqCst);
            dir.create("srv;db")
        })
        .await
        .unwrap();

    // Assert
    assert!(found.reused);
    assert_eq!(found.id, "conn-7");
    assert_eq!(found.kind, ResourceKind::Connection);
    assert_eq!(creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_ensure_requires_exact_name_match() {
    let dir = FakeDirectory::with_item("w-0", "W1-old");
    let creator = ResourceCreator::new(&dir, fast_config());

    let created = creator
        .ensure(ResourceKind::Warehouse, "W1", || async { dir.create("W1") })
        .await
        .unwrap();

    assert!(!created.reused);
    assert_ne!(created.id, "w-0");
}

#[tokio::test]
async fn test_concurrent_ensure_only_one_creates() {
    // Arrange
    let dir = FakeDirectory::default();
    let a = ResourceCreator::new(&dir, fast_config());
    let b = ResourceCreator::new(&dir, fast_config());

    // Act
    let (ra, rb) = tokio::join!(
        a.ensure(ResourceKind::CopyJob, "job", || async { dir.create("job") }),
        b.ensure(ResourceKind::CopyJob, "job", || async { dir.create("job") }),
    );
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    // Assert
    assert_eq!(ra.id, rb.id);
    let fresh = [ra.reused, rb.reused].iter().filter(|r| !**r).count();
    assert_eq!(fresh, 1, "exactly one caller observes reused=false");
    assert_eq!(dir.items.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_conflict_loser_returns_winner() {
    // Arrange: the item appears between our lookup and our create.
    let dir = FakeDirectory::default();
    let creator = ResourceCreator::new(&dir, fast_config());

    // Act
    let result = creator
        .ensure(ResourceKind::Warehouse, "W1", || async {
            dir.create("W1").unwrap();
            dir.create("W1")
        })
        .await
        .unwrap();

    // Assert
    assert!(result.reused);
    assert_eq!(result.id, "id-1");
}

#[tokio::test]
async fn test_accepted_without_id_resolves_by_name() {
    // Arrange
    let dir = FakeDirectory::default();
    let creator = ResourceCreator::new(&dir, fast_config());

    // Act
    let created = creator
        .ensure(ResourceKind::Warehouse, "W1", || async {
            dir.create_accepted("W1", 2)
        })
        .await
        .unwrap();

    // Assert
    assert!(!created.reused);
    assert_eq!(created.id, "id-1");
    // initial lookup + two hidden listings + the one that finds it
    assert_eq!(dir.list_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_accepted_never_visible_times_out() {
    let dir = FakeDirectory::default();
    let creator = ResourceCreator::new(&dir, fast_config());

    let result = creator
        .ensure(ResourceKind::Warehouse, "W1", || async {
            dir.create_accepted("W1", 100)
        })
        .await;

    assert!(matches!(result, Err(Error::Timeout { .. })));
}

#[tokio::test]
async fn test_name_not_yet_available_is_retried() {
    // Arrange
    let dir = FakeDirectory::default();
    let creator = ResourceCreator::new(&dir, fast_config());
    let attempts = AtomicU32::new(0);

    // Act
    let created = creator
        .ensure(ResourceKind::Warehouse, "W1", || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::NameNotYetAvailable {
                    display_name: String::new(),
                    body: "ItemDisplayNameNotAvailableYet".to_string(),
                })
            } else {
                dir.create("W1")
            }
        })
        .await
        .unwrap();

    // Assert
    assert!(!created.reused);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_name_not_yet_available_exhausts() {
    let dir = FakeDirectory::default();
    let creator = ResourceCreator::new(&dir, fast_config());

    let result = creator
        .ensure(ResourceKind::Warehouse, "W1", || async {
            Err(Error::NameNotYetAvailable {
                display_name: String::new(),
                body: "ItemDisplayNameNotAvailableYet".to_string(),
            })
        })
        .await;

    match result {
        Err(Error::RetriesExhausted {
            attempts, source, ..
        }) => {
            assert_eq!(attempts, 4);
            assert!(matches!(
                *source,
                Error::NameNotYetAvailable { ref display_name, .. } if display_name == "W1"
            ));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_other_errors_propagate_unmodified() {
    let dir = FakeDirectory::default();
    let creator = ResourceCreator::new(&dir, fast_config());
    let attempts = AtomicU32::new(0);

    let result = creator
        .ensure(ResourceKind::Warehouse, "W1", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::Api {
                status: 403,
                url: "u".to_string(),
                code: Some("InsufficientPrivileges".to_string()),
                body: "denied".to_string(),
            })
        })
        .await;

    assert!(matches!(result, Err(Error::Api { status: 403, .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}
