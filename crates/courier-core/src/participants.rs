use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use courier_types::models::Participant;
use courier_types::store::{MuteStore, ParticipantStore};

use crate::error::{MessagingError, MessagingResult};

/// A participant together with their mute state at a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberState {
    pub participant: Participant,
    pub muted: bool,
}

/// Membership of conversations.
#[derive(Clone)]
pub struct ParticipantRegistry {
    participants: Arc<dyn ParticipantStore>,
    mutes: Arc<dyn MuteStore>,
}

impl ParticipantRegistry {
    pub fn new(participants: Arc<dyn ParticipantStore>, mutes: Arc<dyn MuteStore>) -> Self {
        Self { participants, mutes }
    }

    pub fn members(&self, conversation_id: Uuid) -> MessagingResult<Vec<Participant>> {
        Ok(self.participants.participants(conversation_id)?)
    }

    pub fn member(&self, conversation_id: Uuid, user_id: Uuid) -> MessagingResult<Option<Participant>> {
        Ok(self.participants.get_participant(conversation_id, user_id)?)
    }

    /// The caller's participant row, or `Authorization` if they are not a member.
    pub fn require_member(&self, conversation_id: Uuid, user_id: Uuid) -> MessagingResult<Participant> {
        self.member(conversation_id, user_id)?.ok_or_else(|| {
            MessagingError::authorization(format!(
                "user {} is not a participant of conversation {}",
                user_id, conversation_id
            ))
        })
    }

    /// Every member with mute expiry evaluated at `now`.
    pub fn member_states(&self, conversation_id: Uuid, now: DateTime<Utc>) -> MessagingResult<Vec<MemberState>> {
        let members = self.participants.participants(conversation_id)?;
        let mutes: HashMap<Uuid, bool> = self
            .mutes
            .mutes_for_conversation(conversation_id)?
            .into_iter()
            .map(|m| (m.user_id, m.is_active(now)))
            .collect();

        Ok(members
            .into_iter()
            .map(|participant| MemberState {
                muted: mutes.get(&participant.user_id).copied().unwrap_or(false),
                participant,
            })
            .collect())
    }
}
