//! Locking, pooling and expiry properties under concurrency.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{self, Instant};

use session_server::backend::MemoryBackend;
use session_server::pool::{ConnectionPool, PoolSettings};
use session_server::session::{HolderId, SessionStore, StoreSettings};

fn store(backend: &MemoryBackend, idle_timeout: Duration) -> SessionStore {
    let pool = Arc::new(ConnectionPool::new(Arc::new(backend.clone()), PoolSettings::default()));
    SessionStore::new(
        pool,
        StoreSettings {
            idle_timeout,
            lock_poll_interval: Duration::from_millis(500),
            lock_timeout: Duration::from_secs(2),
        },
    )
}

#[tokio::test(start_paused = true)]
async fn test_one_waiter_wins_per_release() {
    let store = store(&MemoryBackend::new(), Duration::from_secs(60));
    let session = store.retrieve_or_create(None);
    let first = HolderId::from("first");
    assert!(session.try_acquire(&first));

    let winners = Arc::new(Mutex::new(Vec::new()));
    for i in 0..5 {
        let session = session.clone();
        let winners = winners.clone();
        tokio::spawn(async move {
            let holder = HolderId::from(format!("waiter-{i}"));
            if session
                .acquire_with_wait(&holder, Duration::from_millis(500), Duration::from_secs(30))
                .await
            {
                winners.lock().unwrap().push(holder);
            }
        });
    }

    time::sleep(Duration::from_secs(1)).await;
    assert!(winners.lock().unwrap().is_empty());

    assert!(session.release(&first));
    time::sleep(Duration::from_millis(100)).await;
    let winner = {
        let winners = winners.lock().unwrap();
        assert_eq!(winners.len(), 1);
        winners[0].clone()
    };
    assert_eq!(session.holder(), Some(winner.clone()));

    assert!(session.release(&winner));
    time::sleep(Duration::from_millis(100)).await;
    assert_eq!(winners.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_holder_reenters_its_own_lock() {
    let store = store(&MemoryBackend::new(), Duration::from_secs(60));
    let session = store.retrieve_or_create(None);
    let holder = HolderId::new();

    assert!(session.try_acquire(&holder));
    assert!(session.try_acquire(&holder));
    assert!(!session.try_acquire(&HolderId::new()));
    assert!(session.release(&holder));
    assert!(!session.is_locked());
}

#[tokio::test(start_paused = true)]
async fn test_lock_wait_gives_up_at_deadline() {
    let store = store(&MemoryBackend::new(), Duration::from_secs(60));
    let session = store.retrieve_or_create(None);
    assert!(session.try_acquire(&HolderId::from("a")));

    let start = Instant::now();
    let acquired = session
        .acquire_with_wait(&HolderId::from("b"), Duration::from_millis(500), Duration::from_secs(2))
        .await;
    let waited = start.elapsed();

    assert!(!acquired);
    assert!(waited >= Duration::from_secs(2), "gave up early after {waited:?}");
    assert!(waited < Duration::from_millis(2500), "overshot deadline: {waited:?}");
    assert_eq!(session.holder(), Some(HolderId::from("a")));
}

#[tokio::test]
async fn test_concurrent_acquires_get_distinct_connections() {
    let pool = Arc::new(ConnectionPool::new(Arc::new(MemoryBackend::new()), PoolSettings::default()));

    // Seed the free list so some acquires reuse and some open.
    let seeded = pool.acquire("seed").await.unwrap();
    pool.release(seeded).await;

    let mut tasks = JoinSet::new();
    for i in 0..16 {
        let pool = pool.clone();
        tasks.spawn(async move { pool.acquire(&format!("task-{i}")).await.unwrap() });
    }

    let mut held = Vec::new();
    while let Some(conn) = tasks.join_next().await {
        held.push(conn.unwrap());
    }
    let ids: HashSet<u64> = held.iter().map(|c| c.id()).collect();
    assert_eq!(ids.len(), held.len());
    assert_eq!(pool.stats().in_use, 16);

    for conn in held {
        pool.release(conn).await;
    }
    assert_eq!(pool.stats().in_use, 0);
    assert_eq!(pool.stats().free, 16);
}

#[tokio::test]
async fn test_released_connection_is_reused_and_reinitialized() {
    let backend = MemoryBackend::new();
    let pool = ConnectionPool::new(Arc::new(backend.clone()), PoolSettings::default());

    let mut conn = pool.acquire("x").await.unwrap();
    let id = conn.id();
    conn.mark_user_authenticated();
    pool.release(conn).await;

    let again = pool.acquire("y").await.unwrap();
    assert_eq!(again.id(), id);
    assert_eq!(again.name(), "y");
    assert!(!again.is_user_authenticated());
    assert_eq!(backend.connect_count(), 1);
    assert_eq!(backend.call_count("init_session"), 2);

    let stats = pool.stats();
    assert_eq!((stats.created, stats.reused, stats.reinitialized), (1, 1, 1));
    pool.release(again).await;
}

#[tokio::test(start_paused = true)]
async fn test_sweep_only_removes_expired_sessions() {
    let store = store(&MemoryBackend::new(), Duration::from_secs(10));
    let stale = store.retrieve_or_create(None);
    time::sleep(Duration::from_secs(6)).await;
    let fresh = store.retrieve_or_create(None);
    time::sleep(Duration::from_secs(6)).await;

    let removed = store.sweep_expired(Instant::now());
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].token(), stale.token());
    assert!(store.get(fresh.token()).is_some());
}
