//! Injected latency observed through the filesystem, on the real clock
//!
//! Backing syscalls run on the blocking pool, so these tests measure wall
//! time instead of pausing tokio's clock. Bounds are one-sided or generous
//! to stay stable on loaded CI machines.

use slowfs::{ConfigStore, DelayModel, OperationCategory, Operations, PassthroughFs};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn setup(contents: &[u8]) -> (tempfile::TempDir, Arc<ConfigStore>, Arc<PassthroughFs>) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("f"), contents).unwrap();
    let store = Arc::new(ConfigStore::new());
    let fs = PassthroughFs::builder(dir.path())
        .store(Arc::clone(&store))
        .seed(42)
        .build()
        .unwrap();
    (dir, store, Arc::new(fs))
}

#[tokio::test]
async fn ten_fixed_delay_reads_take_at_least_two_seconds() {
    let (_dir, store, fs) = setup(b"0123456789");
    store
        .set_category(OperationCategory::Read, DelayModel::fixed(0.2))
        .unwrap();

    let handle = fs.open(Path::new("/f"), libc::O_RDONLY).await.unwrap();
    let start = Instant::now();
    for i in 0..10u64 {
        let data = fs.read(handle, i, 1).await.unwrap();
        assert_eq!(data.len(), 1);
    }
    let elapsed = start.elapsed();
    fs.release(handle).await.unwrap();

    assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delayed_operations_do_not_block_each_other() {
    let (_dir, store, fs) = setup(b"x");
    store
        .set_category(OperationCategory::Getattr, DelayModel::fixed(0.5))
        .unwrap();

    let start = Instant::now();
    let mut tasks = Vec::new();
    for _ in 0..10 {
        let fs = Arc::clone(&fs);
        tasks.push(tokio::spawn(async move {
            fs.getattr(Path::new("/f")).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Serialized, ten sleeps would take five seconds.
    assert!(start.elapsed() < Duration::from_secs(3), "{:?}", start.elapsed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delay_in_one_category_leaves_others_fast() {
    let (_dir, store, fs) = setup(b"x");
    store
        .set_category(OperationCategory::Read, DelayModel::fixed(5.0))
        .unwrap();

    let handle = fs.open(Path::new("/f"), libc::O_RDONLY).await.unwrap();
    let slow = {
        let fs = Arc::clone(&fs);
        tokio::spawn(async move { fs.read(handle, 0, 1).await })
    };

    let start = Instant::now();
    fs.getattr(Path::new("/f")).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));

    slow.abort();
    let _ = slow.await;
    fs.release(handle).await.unwrap();
}

#[tokio::test]
async fn update_applies_to_the_next_operation() {
    let (_dir, store, fs) = setup(b"x");
    store
        .set_category(OperationCategory::Getattr, DelayModel::fixed(0.3))
        .unwrap();

    let start = Instant::now();
    fs.getattr(Path::new("/f")).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(300));

    store
        .set_category(OperationCategory::Getattr, DelayModel::new())
        .unwrap();
    let start = Instant::now();
    fs.getattr(Path::new("/f")).await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(300));
}

#[tokio::test]
async fn cancelled_delayed_open_leaves_no_handle() {
    let (_dir, store, fs) = setup(b"x");
    store
        .set_category(OperationCategory::Open, DelayModel::fixed(10.0))
        .unwrap();

    let result = tokio::time::timeout(
        Duration::from_millis(100),
        fs.open(Path::new("/f"), libc::O_RDONLY),
    )
    .await;
    assert!(result.is_err());
    assert_eq!(fs.open_handles(), 0);
}
