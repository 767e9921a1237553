use anyhow::anyhow;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_core::Notifier;
use courier_core::directory::preview;
use courier_types::models::Message;

const QUEUE_DEPTH: usize = 1024;

/// Payload POSTed to the push webhook.
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub preview: String,
    pub recipients: Vec<Uuid>,
}

/// Queues deliveries for a background task; never blocks the append path.
pub struct WebhookNotifier {
    tx: mpsc::Sender<Delivery>,
}

impl WebhookNotifier {
    /// Start the delivery task. With no webhook configured deliveries are
    /// only logged. The task drains until `cancel` fires.
    pub fn spawn(webhook: Option<String>, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let task = tokio::spawn(run_deliveries(rx, webhook, cancel));
        (Self { tx }, task)
    }
}

impl Notifier for WebhookNotifier {
    fn message_delivered(&self, message: &Message, recipients: &[Uuid]) -> anyhow::Result<()> {
        let delivery = Delivery {
            message_id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            preview: preview(message),
            recipients: recipients.to_vec(),
        };

        self.tx.try_send(delivery).map_err(|e| match e {
            TrySendError::Full(_) => anyhow!("notification queue full"),
            TrySendError::Closed(_) => anyhow!("notification task stopped"),
        })
    }
}

async fn run_deliveries(mut rx: mpsc::Receiver<Delivery>, webhook: Option<String>, cancel: CancellationToken) {
    let client = reqwest::Client::new();
    match &webhook {
        Some(url) => info!("Push notifications go to {}", url),
        None => info!("No push webhook configured; notifications are logged only"),
    }

    loop {
        let delivery = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(d) => d,
                None => break,
            },
        };

        let Some(url) = webhook.as_deref() else {
            debug!(
                "Notify {} recipients of message {}",
                delivery.recipients.len(),
                delivery.message_id
            );
            continue;
        };

        match client.post(url).json(&delivery).send().await {
            Ok(res) if res.status().is_success() => {
                debug!("Delivered push for message {}", delivery.message_id);
            }
            Ok(res) => warn!(
                "Push webhook answered {} for message {}",
                res.status(),
                delivery.message_id
            ),
            Err(e) => warn!("Push webhook failed for message {}: {}", delivery.message_id, e),
        }
    }

    info!("Notification task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_types::models::MessageType;

    fn message() -> Message {
        let now = Utc::now();
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: Some(Uuid::new_v4()),
            content: Some("ping".into()),
            message_type: MessageType::Text,
            media_url: None,
            media_type: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn queues_without_webhook_and_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let (notifier, task) = WebhookNotifier::spawn(None, cancel.clone());

        notifier.message_delivered(&message(), &[Uuid::new_v4()]).unwrap();

        cancel.cancel();
        task.await.unwrap();
        assert!(notifier.message_delivered(&message(), &[]).is_err());
    }
}
