//! FIFO, per-chat-ordered, retrying outbound delivery (§4.5).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, Duration};
use tracing::{error, warn};

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct OutboundItem {
    pub channel_id: String,
    pub chat_id: String,
    pub text: String,
    pub reply_to_id: Option<String>,
}

/// Delivers one outbound item; implemented by the channel-dispatch glue
/// that looks up the adapter and calls `send_text`.
#[async_trait]
pub trait OutboundDeliverer: Send + Sync {
    async fn deliver(&self, item: &OutboundItem) -> Result<(), String>;
}

/// Single shared FIFO. Cross-chat ordering is not guaranteed; within one
/// `(channelId, chatId)` pair, items are delivered in enqueue order because
/// a single worker task drains the channel serially.
pub struct OutboundQueue {
    sender: mpsc::UnboundedSender<OutboundItem>,
    per_chat_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl OutboundQueue {
    /// Spawn the worker loop that drains items and calls `deliverer`.
    pub fn spawn(deliverer: Arc<dyn OutboundDeliverer>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<OutboundItem>();
        let per_chat_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>> = Arc::new(Mutex::new(HashMap::new()));
        let locks_for_worker = Arc::clone(&per_chat_locks);

        tokio::spawn(async move {
            while let Some(item) = receiver.recv().await {
                let chat_lock = {
                    let mut locks = locks_for_worker.lock().await;
                    Arc::clone(locks.entry(chat_key(&item)).or_insert_with(|| Arc::new(Mutex::new(()))))
                };
                let _guard = chat_lock.lock().await;
                deliver_with_backoff(deliverer.as_ref(), &item).await;
            }
        });

        Self { sender, per_chat_locks }
    }

    pub fn enqueue(&self, item: OutboundItem) {
        if self.sender.send(item).is_err() {
            error!("outbound queue worker is gone; item dropped");
        }
    }

    /// Number of distinct chats that have ever enqueued an item (for tests
    /// and metrics; not an indicator of pending work).
    pub async fn known_chats(&self) -> usize {
        self.per_chat_locks.lock().await.len()
    }
}

fn chat_key(item: &OutboundItem) -> String {
    format!("{}:{}", item.channel_id, item.chat_id)
}

async fn deliver_with_backoff(deliverer: &dyn OutboundDeliverer, item: &OutboundItem) {
    let mut delay_ms = RETRY_BASE_MS;
    for attempt in 1..=MAX_RETRIES {
        match deliverer.deliver(item).await {
            Ok(()) => return,
            Err(e) if attempt == MAX_RETRIES => {
                error!(channel = %item.channel_id, chat = %item.chat_id, error = %e, "outbound delivery exhausted retries, dropping item");
                return;
            }
            Err(e) => {
                warn!(channel = %item.channel_id, chat = %item.chat_id, attempt, error = %e, "outbound delivery failed, retrying");
                sleep(Duration::from_millis(delay_ms)).await;
                delay_ms *= 2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct CountingDeliverer {
        calls: Arc<AtomicUsize>,
        order: Arc<Mutex<Vec<String>>>,
        notify: Arc<Notify>,
        target: usize,
    }

    #[async_trait]
    impl OutboundDeliverer for CountingDeliverer {
        async fn deliver(&self, item: &OutboundItem) -> Result<(), String> {
            self.order.lock().await.push(item.text.clone());
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.target {
                self.notify.notify_one();
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn preserves_enqueue_order_within_a_single_chat() {
        let calls = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let notify = Arc::new(Notify::new());
        let deliverer = Arc::new(CountingDeliverer {
            calls: Arc::clone(&calls),
            order: Arc::clone(&order),
            notify: Arc::clone(&notify),
            target: 3,
        });
        let queue = OutboundQueue::spawn(deliverer);

        for i in 0..3 {
            queue.enqueue(OutboundItem {
                channel_id: "telegram".into(),
                chat_id: "chat1".into(),
                text: format!("msg{i}"),
                reply_to_id: None,
            });
        }

        notify.notified().await;
        let order = order.lock().await;
        assert_eq!(*order, vec!["msg0".to_string(), "msg1".to_string(), "msg2".to_string()]);
    }

    struct FailingDeliverer {
        calls: Arc<AtomicUsize>,
        notify: Arc<Notify>,
    }

    #[async_trait]
    impl OutboundDeliverer for FailingDeliverer {
        async fn deliver(&self, _item: &OutboundItem) -> Result<(), String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= MAX_RETRIES as usize {
                self.notify.notify_one();
            }
            Err("boom".to_string())
        }
    }

    #[tokio::test]
    async fn exhausted_retries_drop_the_item_without_panicking() {
        let calls = Arc::new(AtomicUsize::new(0));
        let notify = Arc::new(Notify::new());
        let deliverer = Arc::new(FailingDeliverer { calls: Arc::clone(&calls), notify: Arc::clone(&notify) });
        let queue = OutboundQueue::spawn(deliverer);

        queue.enqueue(OutboundItem {
            channel_id: "telegram".into(),
            chat_id: "chat1".into(),
            text: "hi".into(),
            reply_to_id: None,
        });

        notify.notified().await;
        assert_eq!(calls.load(Ordering::SeqCst), MAX_RETRIES as usize);
    }
}
