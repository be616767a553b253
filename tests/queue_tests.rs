mod common;

use common::{mock_host, session, MockFactory, MockFs};
use remote_transfer::callback::TransferListener;
use remote_transfer::core::{Resource, TransferQueue};
use remote_transfer::{
    Engine, MemoryPreferences, Transfer, TransferAction, TransferItem, TransferKind, TransferState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 轮询直到条件成立
async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached");
}

/// 记录获得名额的顺序，以及传输时队列中的运行数
struct OrderListener {
    name: &'static str,
    order: Arc<Mutex<Vec<&'static str>>>,
    queue: Arc<TransferQueue>,
    max_running: Arc<AtomicUsize>,
}

impl TransferListener for OrderListener {
    fn queued(&self) {
        self.order.lock().unwrap().push("queued");
    }

    fn resumed(&self) {
        self.order.lock().unwrap().push(self.name);
    }

    fn will_transfer(&self, _resource: &Resource) {
        self.max_running
            .fetch_max(self.queue.running_count(), Ordering::SeqCst);
    }
}

fn small_upload(fs: &Arc<MockFs>, remote: &Arc<MockFs>, name: &str, queue: &Arc<TransferQueue>) -> Transfer {
    fs.add_file(&format!("/local/{}", name), name.as_bytes(), 1_000);
    Transfer::new(
        TransferKind::Upload,
        session(fs),
        session(remote),
        vec![TransferItem::new(
            Resource::file(&format!("/local/{}", name)),
            Resource::file(&format!("/remote/{}", name)),
        )],
    )
    .with_queue(queue.clone())
}

#[tokio::test]
async fn test_queue_admits_limit_and_queues_rest() {
    let (local, remote) = (MockFs::new(), MockFs::new());
    let queue = Arc::new(TransferQueue::new(1));
    let blocker = small_upload(&local, &remote, "blocker", &queue);
    assert!(queue.add(&blocker).await);

    let order = Arc::new(Mutex::new(Vec::new()));
    let max_running = Arc::new(AtomicUsize::new(0));
    let waiting = small_upload(&local, &remote, "waiting", &queue).with_listener(Arc::new(
        OrderListener {
            name: "waiting",
            order: order.clone(),
            queue: queue.clone(),
            max_running: max_running.clone(),
        },
    ));

    let release = async {
        wait_until(|| queue.queued_count() == 1).await;
        assert_eq!(queue.running_count(), 1);
        assert_eq!(waiting.state(), TransferState::Queued);
        queue.remove(blocker.id());
    };
    let (outcome, ()) = tokio::join!(waiting.start(TransferAction::Overwrite), release);

    let outcome = outcome.unwrap();
    assert_eq!(outcome.state, TransferState::Complete);
    assert_eq!(*order.lock().unwrap(), vec!["queued", "waiting"]);
    assert_eq!(max_running.load(Ordering::SeqCst), 1);
    assert_eq!(queue.running_count(), 0);
    assert_eq!(remote.data("/remote/waiting"), Some(b"waiting".to_vec()));
}

#[tokio::test]
async fn test_queue_releases_waiters_in_fifo_order() {
    let (local, remote) = (MockFs::new(), MockFs::new());
    let queue = Arc::new(TransferQueue::new(1));
    let blocker = small_upload(&local, &remote, "blocker", &queue);
    assert!(queue.add(&blocker).await);

    let order = Arc::new(Mutex::new(Vec::new()));
    let max_running = Arc::new(AtomicUsize::new(0));
    let listener = |name| {
        Arc::new(OrderListener {
            name,
            order: order.clone(),
            queue: queue.clone(),
            max_running: max_running.clone(),
        })
    };
    let first = small_upload(&local, &remote, "first", &queue).with_listener(listener("first"));
    let second = small_upload(&local, &remote, "second", &queue).with_listener(listener("second"));

    // second 在 first 入队之后才开始排队
    let second_run = async {
        wait_until(|| queue.queued_count() == 1).await;
        second.start(TransferAction::Overwrite).await
    };
    let release = async {
        wait_until(|| queue.queued_count() == 2).await;
        queue.remove(blocker.id());
    };
    let (a, b, ()) = tokio::join!(first.start(TransferAction::Overwrite), second_run, release);

    assert_eq!(a.unwrap().state, TransferState::Complete);
    assert_eq!(b.unwrap().state, TransferState::Complete);
    assert_eq!(
        *order.lock().unwrap(),
        vec!["queued", "queued", "first", "second"]
    );
    assert_eq!(max_running.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_while_queued() {
    let (local, remote) = (MockFs::new(), MockFs::new());
    let queue = Arc::new(TransferQueue::new(1));
    let blocker = small_upload(&local, &remote, "blocker", &queue);
    assert!(queue.add(&blocker).await);

    let waiting = small_upload(&local, &remote, "waiting", &queue);
    let cancel = async {
        wait_until(|| queue.queued_count() == 1).await;
        waiting.cancel();
    };
    let (outcome, ()) = tokio::join!(waiting.start(TransferAction::Overwrite), cancel);

    let outcome = outcome.unwrap();
    assert_eq!(outcome.state, TransferState::Canceled);
    assert!(outcome.files.is_empty());
    assert_eq!(queue.queued_count(), 0);
    assert_eq!(queue.running_count(), 1);
    assert!(!remote.exists("/remote/waiting"));
}

#[tokio::test]
async fn test_engine_uses_configured_default_action() {
    let (local, remote) = (MockFs::new(), MockFs::new());
    local.add_file("/local/a.txt", b"new", 1_000);
    remote.add_file("/remote/a.txt", b"old", 1_000);

    let prefs = MemoryPreferences::new()
        .with("queue.connections", 1)
        .with("queue.action.upload", "skip");
    let engine = Engine::new(std::env::temp_dir(), Arc::new(prefs));
    let source = session(&local);
    let target = Engine::new(std::env::temp_dir(), Arc::new(MemoryPreferences::new()))
        .with_factory(MockFactory::new(remote.clone()))
        .session(mock_host());

    let transfer = engine.transfer(
        TransferKind::Upload,
        source,
        target,
        vec![TransferItem::new(
            Resource::file("/local/a.txt"),
            Resource::file("/remote/a.txt"),
        )],
    );
    let outcome = engine.run(&transfer, None).await.unwrap();

    assert_eq!(outcome.skipped_count(), 1);
    assert_eq!(remote.data("/remote/a.txt"), Some(b"old".to_vec()));
    assert_eq!(engine.queue().running_count(), 0);
    assert_eq!(engine.running_count(), 0);
}
