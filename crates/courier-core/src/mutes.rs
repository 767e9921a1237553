use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use tracing::debug;
use uuid::Uuid;

use courier_types::models::Mute;
use courier_types::store::MuteStore;

use crate::error::{MessagingError, MessagingResult};
use crate::participants::ParticipantRegistry;

/// Upper bound on a timed mute; longer requests should use an indefinite mute.
pub const MAX_MUTE_HOURS: u32 = 24 * 365;

/// Per-(user, conversation) mute records. Expiry is evaluated when read;
/// expired rows are left in place until the next mute or unmute.
#[derive(Clone)]
pub struct MuteRegistry {
    mutes: Arc<dyn MuteStore>,
    participants: ParticipantRegistry,
}

impl MuteRegistry {
    pub fn new(mutes: Arc<dyn MuteStore>, participants: ParticipantRegistry) -> Self {
        Self { mutes, participants }
    }

    /// Mute for `duration_hours`, or indefinitely when `None`. Replaces any
    /// existing mute for the pair.
    pub fn mute(&self, conversation_id: Uuid, user_id: Uuid, duration_hours: Option<u32>) -> MessagingResult<Mute> {
        if let Some(hours) = duration_hours {
            if hours == 0 || hours > MAX_MUTE_HOURS {
                return Err(MessagingError::validation(format!(
                    "mute duration must be between 1 and {} hours",
                    MAX_MUTE_HOURS
                )));
            }
        }

        self.participants.require_member(conversation_id, user_id)?;

        let mute = Mute {
            user_id,
            conversation_id,
            muted_until: duration_hours
                .map(|h| (Utc::now() + Duration::hours(i64::from(h))).trunc_subsecs(6)),
        };
        self.mutes.upsert_mute(&mute)?;

        debug!(
            "User {} muted conversation {} until {:?}",
            user_id, conversation_id, mute.muted_until
        );
        Ok(mute)
    }

    /// Remove the mute if present. Unmuting an unmuted conversation is not an error.
    pub fn unmute(&self, conversation_id: Uuid, user_id: Uuid) -> MessagingResult<()> {
        if self.mutes.delete_mute(conversation_id, user_id)? {
            debug!("User {} unmuted conversation {}", user_id, conversation_id);
        }
        Ok(())
    }

    pub fn is_muted(&self, conversation_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> MessagingResult<bool> {
        Ok(self
            .mutes
            .get_mute(conversation_id, user_id)?
            .is_some_and(|m| m.is_active(now)))
    }
}
