use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::info;
use uuid::Uuid;

use courier_types::api::{Category, ConversationOverview};
use courier_types::models::{Conversation, Message, MessageType, Participant};
use courier_types::store::{ConversationStore, MessageStore, ProfileStore};

use crate::error::{MessagingError, MessagingResult};
use crate::participants::ParticipantRegistry;
use crate::receipts::is_unread_since;

const MAX_TITLE_CHARS: usize = 100;
const PREVIEW_CHARS: usize = 80;
const UNKNOWN_HANDLE: &str = "Unknown user";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: Uuid,
    /// `None` when the profile service has no record of the user.
    pub handle: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
}

/// A conversation with its member profiles resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationView {
    pub conversation: Conversation,
    pub members: Vec<Member>,
}

impl ConversationView {
    pub fn member(&self, user_id: Uuid) -> Option<&Member> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    /// Members other than `viewer`, in join order.
    pub fn others(&self, viewer: Uuid) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(move |m| m.user_id != viewer)
    }
}

/// Creates and looks up conversations.
#[derive(Clone)]
pub struct ConversationDirectory {
    conversations: Arc<dyn ConversationStore>,
    messages: Arc<dyn MessageStore>,
    profiles: Arc<dyn ProfileStore>,
    participants: ParticipantRegistry,
}

impl ConversationDirectory {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        messages: Arc<dyn MessageStore>,
        profiles: Arc<dyn ProfileStore>,
        participants: ParticipantRegistry,
    ) -> Self {
        Self {
            conversations,
            messages,
            profiles,
            participants,
        }
    }

    /// Create a conversation between `creator` and `participant_ids`.
    ///
    /// The creator is always a member whether or not they are listed. A 1:1
    /// conversation needs exactly one other user, and asking for a 1:1 that
    /// already exists returns the existing one.
    pub fn create_conversation(
        &self,
        creator: Uuid,
        participant_ids: &[Uuid],
        title: Option<String>,
        is_group: bool,
    ) -> MessagingResult<Conversation> {
        if participant_ids.is_empty() {
            return Err(MessagingError::validation("participant list is empty"));
        }

        let others: BTreeSet<Uuid> = participant_ids
            .iter()
            .copied()
            .filter(|id| *id != creator)
            .collect();
        if others.is_empty() {
            return Err(MessagingError::validation(
                "a conversation needs at least one participant besides the creator",
            ));
        }
        if !is_group && others.len() != 1 {
            return Err(MessagingError::validation(format!(
                "a direct conversation takes exactly one other participant, got {}",
                others.len()
            )));
        }

        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        if title.as_ref().is_some_and(|t| t.chars().count() > MAX_TITLE_CHARS) {
            return Err(MessagingError::validation(format!(
                "title longer than {} characters",
                MAX_TITLE_CHARS
            )));
        }

        let now = Utc::now().trunc_subsecs(6);
        let conversation = Conversation {
            id: Uuid::new_v4(),
            title,
            is_group,
            created_at: now,
            last_message_at: None,
        };
        let participants: Vec<Participant> = std::iter::once(creator)
            .chain(others)
            .map(|user_id| Participant {
                conversation_id: conversation.id,
                user_id,
                created_at: now,
                last_read_at: None,
            })
            .collect();

        if is_group {
            self.conversations.insert_conversation(&conversation, &participants)?;
            info!(
                "Created group conversation {} with {} participants",
                conversation.id,
                participants.len()
            );
            return Ok(conversation);
        }

        let stored = self
            .conversations
            .insert_direct_conversation(&conversation, &participants)?;
        if stored.id == conversation.id {
            info!("Created direct conversation {}", stored.id);
        } else {
            info!("Reusing direct conversation {}", stored.id);
        }
        Ok(stored)
    }

    pub fn get(&self, conversation_id: Uuid) -> MessagingResult<Conversation> {
        self.conversations
            .get_conversation(conversation_id)?
            .ok_or_else(|| MessagingError::not_found(format!("conversation {}", conversation_id)))
    }

    /// The conversation with member profiles, as seen by one of its members.
    pub fn view(&self, conversation_id: Uuid, viewer: Uuid) -> MessagingResult<ConversationView> {
        let conversation = self.get(conversation_id)?;
        self.participants.require_member(conversation_id, viewer)?;
        self.build_view(conversation)
    }

    /// Every conversation of `viewer`, most recent activity first.
    pub fn inbox(&self, viewer: Uuid, now: DateTime<Utc>) -> MessagingResult<Vec<ConversationOverview>> {
        let conversations = self.conversations.conversations_for_user(viewer)?;
        let ids: Vec<Uuid> = conversations.iter().map(|c| c.id).collect();
        let latest = self.messages.latest_messages(&ids)?;
        let following = self.profiles.following(viewer)?;

        let mut overviews = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let id = conversation.id;
            let states = self.participants.member_states(id, now)?;
            let muted = states
                .iter()
                .any(|s| s.participant.user_id == viewer && s.muted);
            let view = self.build_view_from(
                conversation,
                states.into_iter().map(|s| s.participant).collect(),
            )?;

            let last = latest.get(&id);
            let senders = self.messages.sender_ids(id)?;
            let last_read_at = view.member(viewer).and_then(|m| m.last_read_at);

            overviews.push(ConversationOverview {
                id,
                display_name: resolve_display_name(&view, viewer),
                is_group: view.conversation.is_group,
                preview: last.map(preview),
                last_message_at: view.conversation.last_message_at,
                unread: is_unread_since(last_read_at, viewer, last),
                muted,
                category: classify_senders(&view, viewer, senders.iter().copied().map(Some), &following),
            });
        }

        Ok(overviews)
    }

    fn build_view(&self, conversation: Conversation) -> MessagingResult<ConversationView> {
        let participants = self.participants.members(conversation.id)?;
        self.build_view_from(conversation, participants)
    }

    fn build_view_from(
        &self,
        conversation: Conversation,
        participants: Vec<Participant>,
    ) -> MessagingResult<ConversationView> {
        let ids: Vec<Uuid> = participants.iter().map(|p| p.user_id).collect();
        let mut handles = self.profiles.handles(&ids)?;

        let members = participants
            .into_iter()
            .map(|p| Member {
                handle: handles.remove(&p.user_id),
                user_id: p.user_id,
                joined_at: p.created_at,
                last_read_at: p.last_read_at,
            })
            .collect();

        Ok(ConversationView {
            conversation,
            members,
        })
    }
}

/// Title if set; otherwise the other member's handle for 1:1, or the other
/// members' handles comma-joined for groups.
pub fn resolve_display_name(view: &ConversationView, viewer: Uuid) -> String {
    if let Some(title) = &view.conversation.title {
        return title.clone();
    }

    let names: Vec<&str> = view
        .others(viewer)
        .map(|m| m.handle.as_deref().unwrap_or(UNKNOWN_HANDLE))
        .collect();

    if view.conversation.is_group {
        if names.is_empty() {
            return UNKNOWN_HANDLE.to_string();
        }
        names.join(", ")
    } else {
        names.first().copied().unwrap_or(UNKNOWN_HANDLE).to_string()
    }
}

/// `Primary` iff the viewer follows another member or has ever posted into
/// the conversation; everything else is a message request.
pub fn classify(
    view: &ConversationView,
    viewer: Uuid,
    messages: &[Message],
    following: &HashSet<Uuid>,
) -> Category {
    classify_senders(view, viewer, messages.iter().map(|m| m.sender_id), following)
}

pub fn classify_senders(
    view: &ConversationView,
    viewer: Uuid,
    senders: impl IntoIterator<Item = Option<Uuid>>,
    following: &HashSet<Uuid>,
) -> Category {
    let follows_someone = view.others(viewer).any(|m| following.contains(&m.user_id));
    if follows_someone || senders.into_iter().any(|s| s == Some(viewer)) {
        Category::Primary
    } else {
        Category::Other
    }
}

/// Inbox line for a message.
pub fn preview(message: &Message) -> String {
    if message.is_deleted {
        return "Message deleted".to_string();
    }

    match message.message_type {
        MessageType::Image => "Sent an image".to_string(),
        MessageType::Gif => "Sent a GIF".to_string(),
        MessageType::Voice => "Sent a voice message".to_string(),
        MessageType::Text => {
            let content = message.content.as_deref().unwrap_or_default();
            if content.chars().count() > PREVIEW_CHARS {
                let cut: String = content.chars().take(PREVIEW_CHARS).collect();
                format!("{}…", cut.trim_end())
            } else {
                content.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    fn member(user_id: Uuid, handle: Option<&str>) -> Member {
        Member {
            user_id,
            handle: handle.map(str::to_string),
            joined_at: Utc::now(),
            last_read_at: None,
        }
    }

    fn view(title: Option<&str>, is_group: bool, members: Vec<Member>) -> ConversationView {
        ConversationView {
            conversation: Conversation {
                id: Uuid::new_v4(),
                title: title.map(str::to_string),
                is_group,
                created_at: Utc::now(),
                last_message_at: None,
            },
            members,
        }
    }

    #[test]
    fn display_name_prefers_title() {
        let me = Uuid::new_v4();
        let v = view(Some("Book club"), true, vec![member(me, Some("me"))]);
        assert_eq!(resolve_display_name(&v, me), "Book club");
    }

    #[test]
    fn direct_display_name_is_other_handle() {
        let (me, you) = (Uuid::new_v4(), Uuid::new_v4());
        let v = view(None, false, vec![member(me, Some("me")), member(you, Some("you"))]);
        assert_eq!(resolve_display_name(&v, me), "you");
        assert_eq!(resolve_display_name(&v, you), "me");
    }

    #[test]
    fn group_display_name_joins_others() {
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let v = view(
            None,
            true,
            vec![
                member(ids[0], Some("ann")),
                member(ids[1], Some("ben")),
                member(ids[2], None),
            ],
        );
        assert_eq!(resolve_display_name(&v, ids[0]), "ben, Unknown user");
    }

    #[test]
    fn classify_primary_when_following_or_replied() {
        let (me, you) = (Uuid::new_v4(), Uuid::new_v4());
        let v = view(None, false, vec![member(me, None), member(you, None)]);
        let nobody = HashSet::new();

        assert_eq!(classify(&v, me, &[], &nobody), Category::Other);
        assert_eq!(classify(&v, me, &[], &HashSet::from([you])), Category::Primary);
        assert_eq!(
            classify_senders(&v, me, [Some(you), None, Some(me)], &nobody),
            Category::Primary
        );
        assert_eq!(classify_senders(&v, me, [Some(you)], &nobody), Category::Other);
    }

    #[test]
    fn long_text_preview_is_truncated() {
        let fx = Fixture::new();
        let conv = fx.direct(fx.alice, fx.bob);
        let long = "x".repeat(200);
        let msg = fx.text(conv.id, fx.alice, &long);

        let p = preview(&msg);
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 1);
        assert!(p.ends_with('…'));
    }

    #[test]
    fn create_requires_participants() {
        let fx = Fixture::new();
        let err = fx
            .messaging
            .directory
            .create_conversation(fx.alice, &[], None, true)
            .unwrap_err();
        assert!(matches!(err, MessagingError::Validation(_)));

        let err = fx
            .messaging
            .directory
            .create_conversation(fx.alice, &[fx.alice], None, false)
            .unwrap_err();
        assert!(matches!(err, MessagingError::Validation(_)));
    }

    #[test]
    fn direct_conversation_takes_one_other() {
        let fx = Fixture::new();
        let err = fx
            .messaging
            .directory
            .create_conversation(fx.alice, &[fx.bob, fx.carol], None, false)
            .unwrap_err();
        assert!(matches!(err, MessagingError::Validation(_)));
    }

    #[test]
    fn direct_conversation_is_not_duplicated() {
        let fx = Fixture::new();
        let first = fx.direct(fx.alice, fx.bob);
        let second = fx
            .messaging
            .directory
            .create_conversation(fx.bob, &[fx.alice], None, false)
            .unwrap();
        assert_eq!(first.id, second.id);

        let group = fx
            .messaging
            .directory
            .create_conversation(fx.alice, &[fx.bob], None, true)
            .unwrap();
        assert_ne!(group.id, first.id);
    }

    #[test]
    fn creator_is_always_a_member() {
        let fx = Fixture::new();
        let conv = fx
            .messaging
            .directory
            .create_conversation(fx.alice, &[fx.bob, fx.carol, fx.bob], Some("  trip  ".into()), true)
            .unwrap();

        let v = fx.messaging.directory.view(conv.id, fx.alice).unwrap();
        assert_eq!(v.members.len(), 3);
        assert_eq!(v.conversation.title.as_deref(), Some("trip"));
        assert!(v.member(fx.alice).is_some());
    }

    #[test]
    fn view_rejects_outsiders() {
        let fx = Fixture::new();
        let conv = fx.direct(fx.alice, fx.bob);

        let err = fx.messaging.directory.view(conv.id, fx.carol).unwrap_err();
        assert!(matches!(err, MessagingError::Authorization(_)));

        let err = fx.messaging.directory.view(Uuid::new_v4(), fx.alice).unwrap_err();
        assert!(matches!(err, MessagingError::NotFound(_)));
    }

    #[test]
    fn inbox_reports_unread_mute_and_category() {
        let fx = Fixture::new();
        let stranger = fx.direct(fx.carol, fx.alice);
        fx.text(stranger.id, fx.carol, "hello, we haven't met");

        let friend = fx.direct(fx.alice, fx.bob);
        fx.db.add_follow(fx.alice, fx.bob).unwrap();
        fx.text(friend.id, fx.bob, "lunch?");
        fx.messaging.mutes.mute(friend.id, fx.alice, None).unwrap();

        let inbox = fx.messaging.directory.inbox(fx.alice, Utc::now()).unwrap();
        assert_eq!(inbox.len(), 2);

        // Most recent activity first.
        assert_eq!(inbox[0].id, friend.id);
        assert_eq!(inbox[0].display_name, "bob");
        assert_eq!(inbox[0].preview.as_deref(), Some("lunch?"));
        assert!(inbox[0].unread);
        assert!(inbox[0].muted);
        assert_eq!(inbox[0].category, Category::Primary);

        assert_eq!(inbox[1].id, stranger.id);
        assert_eq!(inbox[1].category, Category::Other);
        assert!(!inbox[1].muted);
    }
}
