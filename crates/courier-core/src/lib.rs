pub mod directory;
pub mod error;
pub mod feed;
pub mod message_log;
pub mod mutes;
pub mod notify;
pub mod participants;
pub mod reactions;
pub mod receipts;
pub mod reconcile;
pub mod timeline;

use std::sync::Arc;

use courier_types::store::{
    ConversationStore, MessageStore, MuteStore, ParticipantStore, ProfileStore, ReactionStore,
};

pub use directory::{ConversationDirectory, ConversationView, Member};
pub use error::{MessagingError, MessagingResult};
pub use feed::{ChangeFeed, FeedError, FeedEvent, Subscription};
pub use message_log::{MessageDraft, MessageLog};
pub use mutes::MuteRegistry;
pub use notify::{NoopNotifier, Notifier};
pub use participants::ParticipantRegistry;
pub use reactions::{ReactionIndex, ToggleOutcome};
pub use receipts::ReadReceiptTracker;

/// Every messaging component wired to one backing store.
#[derive(Clone)]
pub struct Messaging {
    pub participants: ParticipantRegistry,
    pub directory: ConversationDirectory,
    pub log: MessageLog,
    pub reactions: ReactionIndex,
    pub mutes: MuteRegistry,
    pub receipts: ReadReceiptTracker,
    pub feed: ChangeFeed,
}

impl Messaging {
    pub fn new<S>(store: Arc<S>, feed: ChangeFeed, notifier: Arc<dyn Notifier>) -> Self
    where
        S: ProfileStore
            + ConversationStore
            + ParticipantStore
            + MessageStore
            + ReactionStore
            + MuteStore
            + 'static,
    {
        let participants = ParticipantRegistry::new(store.clone(), store.clone());
        let directory = ConversationDirectory::new(
            store.clone(),
            store.clone(),
            store.clone(),
            participants.clone(),
        );
        let log = MessageLog::new(
            store.clone(),
            store.clone(),
            participants.clone(),
            feed.clone(),
            notifier,
        );
        let reactions = ReactionIndex::new(store.clone(), store.clone(), participants.clone());
        let mutes = MuteRegistry::new(store.clone(), participants.clone());
        let receipts = ReadReceiptTracker::new(store);

        Self {
            participants,
            directory,
            log,
            reactions,
            mutes,
            receipts,
            feed,
        }
    }
}
