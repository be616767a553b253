//! 传输队列：进程内唯一的并发准入闸门
//!
//! 运行集合与名额检查在同一把锁内完成，不会超额准入。等待者按 FIFO 放行。

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// 可排队的工作单元
pub trait QueueEntry: Send + Sync {
    fn id(&self) -> Uuid;
    fn cancel_token(&self) -> &CancellationToken;
    /// 进入等待
    fn queued(&self) {}
    /// 等待后获得名额
    fn resumed(&self) {}
}

struct QueueState {
    limit: usize,
    running: HashSet<Uuid>,
    waiting: VecDeque<(Uuid, oneshot::Sender<()>)>,
}

impl QueueState {
    /// 按 FIFO 放行等待者直到名额用尽
    fn admit(&mut self) {
        while self.running.len() < self.limit {
            let Some((id, tx)) = self.waiting.pop_front() else {
                break;
            };
            // 接收端已丢弃说明等待者刚被取消
            if tx.send(()).is_ok() {
                debug!("队列放行: {}", id);
                self.running.insert(id);
            }
        }
    }
}

pub struct TransferQueue {
    state: Mutex<QueueState>,
}

impl TransferQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                limit: limit.max(1),
                running: HashSet::new(),
                waiting: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 申请名额。名额已满时排队等待，等待中被取消返回 false
    pub async fn add(&self, entry: &dyn QueueEntry) -> bool {
        let id = entry.id();
        let admitted = {
            let mut state = self.lock();
            if state.running.len() < state.limit {
                state.running.insert(id);
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiting.push_back((id, tx));
                Some(rx)
            }
        };
        let Some(rx) = admitted else {
            debug!("立即准入: {}", id);
            return true;
        };

        info!("传输排队等待: {} (队列中 {} 个)", id, self.queued_count());
        entry.queued();

        tokio::select! {
            result = rx => {
                if result.is_ok() {
                    entry.resumed();
                    true
                } else {
                    false
                }
            }
            _ = entry.cancel_token().cancelled() => {
                let mut state = self.lock();
                if let Some(pos) = state.waiting.iter().position(|(w, _)| *w == id) {
                    state.waiting.remove(pos);
                } else if state.running.remove(&id) {
                    // 取消与放行同时发生，归还名额
                    state.admit();
                }
                info!("排队中的传输已取消: {}", id);
                false
            }
        }
    }

    /// 释放名额或移出等待队列
    pub fn remove(&self, id: Uuid) {
        let mut state = self.lock();
        if state.running.remove(&id) {
            debug!("释放队列名额: {}", id);
            state.admit();
        } else if let Some(pos) = state.waiting.iter().position(|(w, _)| *w == id) {
            state.waiting.remove(pos);
        }
    }

    /// 配置变更后重新评估并发上限
    pub fn resize(&self, limit: usize) {
        let mut state = self.lock();
        let limit = limit.max(1);
        if state.limit != limit {
            info!("队列并发数: {} -> {}", state.limit, limit);
            state.limit = limit;
        }
        state.admit();
    }

    pub fn limit(&self) -> usize {
        self.lock().limit
    }

    pub fn running_count(&self) -> usize {
        self.lock().running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.lock().waiting.len()
    }

    pub fn is_running(&self, id: Uuid) -> bool {
        self.lock().running.contains(&id)
    }
}

impl Default for TransferQueue {
    fn default() -> Self {
        Self::new(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Entry {
        id: Uuid,
        token: CancellationToken,
        queued: AtomicBool,
        resumed: AtomicBool,
    }

    impl Entry {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: Uuid::new_v4(),
                token: CancellationToken::new(),
                queued: AtomicBool::new(false),
                resumed: AtomicBool::new(false),
            })
        }
    }

    impl QueueEntry for Entry {
        fn id(&self) -> Uuid {
            self.id
        }
        fn cancel_token(&self) -> &CancellationToken {
            &self.token
        }
        fn queued(&self) {
            self.queued.store(true, Ordering::SeqCst);
        }
        fn resumed(&self) {
            self.resumed.store(true, Ordering::SeqCst);
        }
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_cancel_while_queued() {
        let queue = Arc::new(TransferQueue::new(1));
        let first = Entry::new();
        assert!(queue.add(first.as_ref()).await);

        let second = Entry::new();
        let waiter = {
            let queue = queue.clone();
            let second = second.clone();
            tokio::spawn(async move { queue.add(second.as_ref()).await })
        };
        wait_until(|| queue.queued_count() == 1).await;
        assert!(second.queued.load(Ordering::SeqCst));

        second.token.cancel();
        assert!(!waiter.await.unwrap());
        assert_eq!(queue.queued_count(), 0);
        assert_eq!(queue.running_count(), 1);
        assert!(!second.resumed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_resize_admits_waiters() {
        let queue = Arc::new(TransferQueue::new(1));
        let first = Entry::new();
        assert!(queue.add(first.as_ref()).await);

        let second = Entry::new();
        let waiter = {
            let queue = queue.clone();
            let second = second.clone();
            tokio::spawn(async move { queue.add(second.as_ref()).await })
        };
        wait_until(|| queue.queued_count() == 1).await;

        queue.resize(2);
        assert!(waiter.await.unwrap());
        assert!(second.resumed.load(Ordering::SeqCst));
        assert_eq!(queue.running_count(), 2);
    }

    #[tokio::test]
    async fn test_remove_queued_does_not_free_slot() {
        let queue = Arc::new(TransferQueue::new(1));
        let first = Entry::new();
        assert!(queue.add(first.as_ref()).await);

        let second = Entry::new();
        let waiter = {
            let queue = queue.clone();
            let second = second.clone();
            tokio::spawn(async move { queue.add(second.as_ref()).await })
        };
        wait_until(|| queue.queued_count() == 1).await;

        queue.remove(second.id);
        assert!(!waiter.await.unwrap());
        assert_eq!(queue.running_count(), 1);
        assert!(queue.is_running(first.id));
    }
}
