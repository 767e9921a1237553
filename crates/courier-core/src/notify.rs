use uuid::Uuid;

use courier_types::models::Message;

/// Outbound hook for push-notification fan-out.
///
/// Called after a message has been stored and published. Implementations must
/// not block; a returned error is logged by the caller and otherwise ignored.
pub trait Notifier: Send + Sync {
    fn message_delivered(&self, message: &Message, recipients: &[Uuid]) -> anyhow::Result<()>;
}

/// Discards every delivery.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn message_delivered(&self, _message: &Message, _recipients: &[Uuid]) -> anyhow::Result<()> {
        Ok(())
    }
}
