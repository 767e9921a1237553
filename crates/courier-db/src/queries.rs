use std::collections::{HashMap, HashSet};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use rusqlite::{Connection, TransactionBehavior, params, params_from_iter};
use uuid::Uuid;

use courier_types::models::{
    Conversation, Message, Mute, NewMessage, PageCursor, Participant, Reaction,
};
use courier_types::store::{
    ConversationStore, MessageStore, MuteStore, ParticipantStore, ProfileStore, ReactionStore,
};

use crate::Database;
use crate::models::{
    CONVERSATION_COLUMNS, ConversationRow, MESSAGE_COLUMNS, MessageRow, MuteRow,
    PARTICIPANT_COLUMNS, ParticipantRow, ReactionRow, format_ts, parse_id, parse_ts,
};

impl Database {
    // -- Profiles (seeded by the profile service) --

    pub fn upsert_user(&self, id: Uuid, handle: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, handle) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET handle = excluded.handle",
                params![id.to_string(), handle],
            )?;
            Ok(())
        })
    }

    pub fn add_follow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO follows (follower_id, followee_id) VALUES (?1, ?2)",
                params![follower_id.to_string(), followee_id.to_string()],
            )?;
            Ok(())
        })
    }
}

impl ProfileStore for Database {
    fn handles(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, String>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT id, handle FROM users WHERE id IN ({})",
                placeholders(user_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(user_ids.iter().map(Uuid::to_string)), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, handle)| Ok((parse_id(&id)?, handle)))
                .collect()
        })
    }

    fn following(&self, user_id: Uuid) -> Result<HashSet<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT followee_id FROM follows WHERE follower_id = ?1")?;
            let rows = stmt
                .query_map([user_id.to_string()], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.iter().map(|id| parse_id(id)).collect()
        })
    }
}

impl ConversationStore for Database {
    fn insert_conversation(&self, conversation: &Conversation, participants: &[Participant]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            insert_conversation_rows(&tx, conversation, participants)?;
            tx.commit()?;
            Ok(())
        })
    }

    fn insert_direct_conversation(
        &self,
        conversation: &Conversation,
        participants: &[Participant],
    ) -> Result<Conversation> {
        let [a, b] = participants else {
            return Err(anyhow!(
                "Direct conversation needs exactly two participants, got {}",
                participants.len()
            ));
        };

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let existing = tx
                .query_row(
                    &format!(
                        "SELECT {CONVERSATION_COLUMNS} FROM conversations c
                         WHERE c.is_group = 0
                           AND EXISTS (SELECT 1 FROM participants WHERE conversation_id = c.id AND user_id = ?1)
                           AND EXISTS (SELECT 1 FROM participants WHERE conversation_id = c.id AND user_id = ?2)
                           AND (SELECT COUNT(*) FROM participants WHERE conversation_id = c.id) = 2
                         ORDER BY c.created_at ASC
                         LIMIT 1"
                    ),
                    params![a.user_id.to_string(), b.user_id.to_string()],
                    ConversationRow::read,
                )
                .optional()?;

            if let Some(row) = existing {
                return Conversation::try_from(row);
            }

            insert_conversation_rows(&tx, conversation, participants)?;
            tx.commit()?;
            Ok(conversation.clone())
        })
    }

    fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                    [id.to_string()],
                    ConversationRow::read,
                )
                .optional()?;

            row.map(Conversation::try_from).transpose()
        })
    }

    fn conversations_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.title, c.is_group, c.created_at, c.last_message_at
                 FROM conversations c
                 JOIN participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ?1
                 ORDER BY COALESCE(c.last_message_at, c.created_at) DESC, c.id DESC",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], ConversationRow::read)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(Conversation::try_from).collect()
        })
    }
}

impl ParticipantStore for Database {
    fn participants(&self, conversation_id: Uuid) -> Result<Vec<Participant>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants
                 WHERE conversation_id = ?1
                 ORDER BY created_at ASC, user_id ASC"
            ))?;
            let rows = stmt
                .query_map([conversation_id.to_string()], ParticipantRow::read)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(Participant::try_from).collect()
        })
    }

    fn get_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Option<Participant>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {PARTICIPANT_COLUMNS} FROM participants
                         WHERE conversation_id = ?1 AND user_id = ?2"
                    ),
                    params![conversation_id.to_string(), user_id.to_string()],
                    ParticipantRow::read,
                )
                .optional()?;

            row.map(Participant::try_from).transpose()
        })
    }

    fn advance_last_read(&self, conversation_id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            // Single conditional UPDATE: an older watermark never overwrites a newer one.
            let changed = conn.execute(
                "UPDATE participants SET last_read_at = ?3
                 WHERE conversation_id = ?1 AND user_id = ?2
                   AND (last_read_at IS NULL OR last_read_at < ?3)",
                params![
                    conversation_id.to_string(),
                    user_id.to_string(),
                    format_ts(&at.trunc_subsecs(6))
                ],
            )?;
            Ok(changed > 0)
        })
    }
}

impl MessageStore for Database {
    fn append_message(&self, message: &NewMessage) -> Result<Message> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let conversation_id = message.conversation_id.to_string();

            let last: Option<String> = tx
                .query_row(
                    "SELECT last_message_at FROM conversations WHERE id = ?1",
                    [&conversation_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| anyhow!("Conversation not found: {}", message.conversation_id))?;

            // Keep (created_at, id) order equal to append order even if the clock steps back.
            let mut created_at = message.created_at.trunc_subsecs(6);
            if let Some(last) = last.as_deref().map(parse_ts).transpose()? {
                if created_at <= last {
                    created_at = last + Duration::microseconds(1);
                }
            }
            let stamp = format_ts(&created_at);

            tx.execute(
                "INSERT INTO messages
                    (id, conversation_id, sender_id, content, message_type,
                     media_url, media_type, is_deleted, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)",
                params![
                    message.id.to_string(),
                    conversation_id,
                    message.sender_id.map(|id| id.to_string()),
                    message.content,
                    message.message_type.as_str(),
                    message.media_url,
                    message.media_type,
                    stamp,
                ],
            )?;

            tx.execute(
                "UPDATE conversations SET last_message_at = ?2 WHERE id = ?1",
                params![conversation_id, stamp],
            )?;

            tx.commit()?;

            Ok(Message {
                id: message.id,
                conversation_id: message.conversation_id,
                sender_id: message.sender_id,
                content: message.content.clone(),
                message_type: message.message_type,
                media_url: message.media_url.clone(),
                media_type: message.media_type.clone(),
                is_deleted: false,
                created_at,
                updated_at: created_at,
            })
        })
    }

    fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    fn page_messages(&self, conversation_id: Uuid, cursor: Option<PageCursor>, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let cid = conversation_id.to_string();
            let rows = match cursor {
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE conversation_id = ?1
                         ORDER BY created_at DESC, id DESC
                         LIMIT ?2"
                    ))?;
                    stmt.query_map(params![cid, limit], MessageRow::read)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
                Some(PageCursor { before, before_id: None }) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE conversation_id = ?1 AND created_at < ?2
                         ORDER BY created_at DESC, id DESC
                         LIMIT ?3"
                    ))?;
                    stmt.query_map(params![cid, format_ts(&before), limit], MessageRow::read)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
                Some(PageCursor { before, before_id: Some(before_id) }) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE conversation_id = ?1
                           AND (created_at < ?2 OR (created_at = ?2 AND id < ?3))
                         ORDER BY created_at DESC, id DESC
                         LIMIT ?4"
                    ))?;
                    stmt.query_map(
                        params![cid, format_ts(&before), before_id.to_string(), limit],
                        MessageRow::read,
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?
                }
            };

            rows.into_iter().map(Message::try_from).collect()
        })
    }

    fn latest_messages(&self, conversation_ids: &[Uuid]) -> Result<HashMap<Uuid, Message>> {
        if conversation_ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                 WHERE m.conversation_id IN ({})
                   AND m.id = (
                       SELECT id FROM messages
                       WHERE conversation_id = m.conversation_id
                       ORDER BY created_at DESC, id DESC
                       LIMIT 1
                   )",
                placeholders(conversation_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params_from_iter(conversation_ids.iter().map(Uuid::to_string)),
                    MessageRow::read,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|row| {
                    let message = Message::try_from(row)?;
                    Ok((message.conversation_id, message))
                })
                .collect()
        })
    }

    fn sender_ids(&self, conversation_id: Uuid) -> Result<HashSet<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT sender_id FROM messages
                 WHERE conversation_id = ?1 AND sender_id IS NOT NULL",
            )?;
            let rows = stmt
                .query_map([conversation_id.to_string()], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.iter().map(|id| parse_id(id)).collect()
        })
    }

    fn soft_delete_message(&self, id: Uuid, sender_id: Uuid, at: DateTime<Utc>) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            // media_url/media_type stay on the row for audit.
            let changed = conn.execute(
                "UPDATE messages SET content = NULL, is_deleted = 1, updated_at = ?3
                 WHERE id = ?1 AND sender_id = ?2",
                params![id.to_string(), sender_id.to_string(), format_ts(&at.trunc_subsecs(6))],
            )?;

            if changed == 0 {
                return Ok(None);
            }
            query_message(conn, id)
        })
    }
}

impl ReactionStore for Database {
    fn toggle_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str, at: DateTime<Utc>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            // Delete-or-insert in one write transaction: two toggles from the
            // same user are serialised and can never both apply.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mid = message_id.to_string();
            let uid = user_id.to_string();

            let removed = tx.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                params![mid, uid, emoji],
            )?;

            let applied = if removed == 0 {
                tx.execute(
                    "INSERT INTO reactions (message_id, user_id, emoji, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![mid, uid, emoji, format_ts(&at.trunc_subsecs(6))],
                )?;
                true
            } else {
                false
            };

            tx.commit()?;
            Ok(applied)
        })
    }

    fn reactions_for_messages(&self, message_ids: &[Uuid]) -> Result<Vec<Reaction>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT message_id, user_id, emoji, created_at FROM reactions
                 WHERE message_id IN ({})
                 ORDER BY created_at ASC, rowid ASC",
                placeholders(message_ids.len())
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(message_ids.iter().map(Uuid::to_string)), |row| {
                    Ok(ReactionRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                        emoji: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(Reaction::try_from).collect()
        })
    }
}

impl MuteStore for Database {
    fn upsert_mute(&self, mute: &Mute) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO mutes (user_id, conversation_id, muted_until) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id, conversation_id) DO UPDATE SET muted_until = excluded.muted_until",
                params![
                    mute.user_id.to_string(),
                    mute.conversation_id.to_string(),
                    mute.muted_until.map(|until| format_ts(&until)),
                ],
            )?;
            Ok(())
        })
    }

    fn delete_mute(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM mutes WHERE user_id = ?1 AND conversation_id = ?2",
                params![user_id.to_string(), conversation_id.to_string()],
            )?;
            Ok(removed > 0)
        })
    }

    fn get_mute(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Option<Mute>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT user_id, conversation_id, muted_until FROM mutes
                     WHERE user_id = ?1 AND conversation_id = ?2",
                    params![user_id.to_string(), conversation_id.to_string()],
                    read_mute_row,
                )
                .optional()?;

            row.map(Mute::try_from).transpose()
        })
    }

    fn mutes_for_conversation(&self, conversation_id: Uuid) -> Result<Vec<Mute>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, conversation_id, muted_until FROM mutes WHERE conversation_id = ?1",
            )?;
            let rows = stmt
                .query_map([conversation_id.to_string()], read_mute_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(Mute::try_from).collect()
        })
    }
}

fn insert_conversation_rows(conn: &Connection, conversation: &Conversation, participants: &[Participant]) -> Result<()> {
    conn.execute(
        "INSERT INTO conversations (id, title, is_group, created_at, last_message_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            conversation.id.to_string(),
            conversation.title,
            conversation.is_group,
            format_ts(&conversation.created_at),
            conversation.last_message_at.map(|ts| format_ts(&ts)),
        ],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO participants (conversation_id, user_id, created_at, last_read_at)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for p in participants {
        stmt.execute(params![
            p.conversation_id.to_string(),
            p.user_id.to_string(),
            format_ts(&p.created_at),
            p.last_read_at.map(|ts| format_ts(&ts)),
        ])?;
    }

    Ok(())
}

fn query_message(conn: &Connection, id: Uuid) -> Result<Option<Message>> {
    let row = conn
        .query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            [id.to_string()],
            MessageRow::read,
        )
        .optional()?;

    row.map(Message::try_from).transpose()
}

fn read_mute_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MuteRow> {
    Ok(MuteRow {
        user_id: row.get(0)?,
        conversation_id: row.get(1)?,
        muted_until: row.get(2)?,
    })
}

fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::models::MessageType;

    fn conversation(is_group: bool) -> Conversation {
        Conversation {
            id: Uuid::new_v4(),
            title: None,
            is_group,
            created_at: Utc::now().trunc_subsecs(6),
            last_message_at: None,
        }
    }

    fn participant(conversation_id: Uuid, user_id: Uuid) -> Participant {
        Participant {
            conversation_id,
            user_id,
            created_at: Utc::now().trunc_subsecs(6),
            last_read_at: None,
        }
    }

    fn text(conversation_id: Uuid, sender: Uuid, body: &str, at: DateTime<Utc>) -> NewMessage {
        NewMessage {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: Some(sender),
            content: Some(body.to_string()),
            message_type: MessageType::Text,
            media_url: None,
            media_type: None,
            created_at: at,
        }
    }

    fn seeded() -> (Database, Conversation, Uuid, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = conversation(false);
        db.insert_conversation(&conv, &[participant(conv.id, a), participant(conv.id, b)])
            .unwrap();
        (db, conv, a, b)
    }

    #[test]
    fn append_bumps_last_message_at() {
        let (db, conv, a, _) = seeded();
        let msg = db.append_message(&text(conv.id, a, "hi", Utc::now())).unwrap();

        let stored = db.get_conversation(conv.id).unwrap().unwrap();
        assert_eq!(stored.last_message_at, Some(msg.created_at));
        assert_eq!(db.get_message(msg.id).unwrap().unwrap(), msg);
    }

    #[test]
    fn append_to_missing_conversation_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let missing = Uuid::new_v4();
        assert!(db.append_message(&text(missing, Uuid::new_v4(), "hi", Utc::now())).is_err());
        assert!(db.page_messages(missing, None, 10).unwrap().is_empty());
    }

    #[test]
    fn append_clamps_backwards_clock() {
        let (db, conv, a, _) = seeded();
        let now = Utc::now();
        let first = db.append_message(&text(conv.id, a, "one", now)).unwrap();
        let second = db
            .append_message(&text(conv.id, a, "two", now - Duration::seconds(5)))
            .unwrap();
        assert!(second.created_at > first.created_at);
    }

    #[test]
    fn cursor_pages_are_disjoint() {
        let (db, conv, a, _) = seeded();
        let now = Utc::now();
        for i in 0..5 {
            db.append_message(&text(conv.id, a, &i.to_string(), now)).unwrap();
        }

        let first = db.page_messages(conv.id, None, 2).unwrap();
        let oldest = first.last().unwrap();
        let second = db.page_messages(conv.id, Some(oldest.cursor()), 10).unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 3);
        for m in &second {
            assert!(!first.iter().any(|f| f.id == m.id));
        }
    }

    #[test]
    fn toggle_reaction_flips() {
        let (db, conv, a, b) = seeded();
        let msg = db.append_message(&text(conv.id, a, "hi", Utc::now())).unwrap();

        assert!(db.toggle_reaction(msg.id, b, "👍", Utc::now()).unwrap());
        assert!(!db.toggle_reaction(msg.id, b, "👍", Utc::now()).unwrap());
        assert!(db.reactions_for_messages(&[msg.id]).unwrap().is_empty());
    }

    #[test]
    fn direct_conversation_is_reused() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let first = conversation(false);
        let created = db
            .insert_direct_conversation(&first, &[participant(first.id, a), participant(first.id, b)])
            .unwrap();
        assert_eq!(created.id, first.id);

        let second = conversation(false);
        let reused = db
            .insert_direct_conversation(&second, &[participant(second.id, b), participant(second.id, a)])
            .unwrap();
        assert_eq!(reused.id, first.id);
        assert!(db.get_conversation(second.id).unwrap().is_none());
    }

    #[test]
    fn last_read_only_moves_forward() {
        let (db, conv, a, _) = seeded();
        let now = Utc::now();

        assert!(db.advance_last_read(conv.id, a, now).unwrap());
        assert!(!db.advance_last_read(conv.id, a, now - Duration::minutes(1)).unwrap());

        let p = db.get_participant(conv.id, a).unwrap().unwrap();
        assert_eq!(p.last_read_at, Some(now.trunc_subsecs(6)));
    }

    #[test]
    fn soft_delete_requires_sender() {
        let (db, conv, a, b) = seeded();
        let msg = db.append_message(&text(conv.id, a, "hi", Utc::now())).unwrap();

        assert!(db.soft_delete_message(msg.id, b, Utc::now()).unwrap().is_none());
        let deleted = db.soft_delete_message(msg.id, a, Utc::now()).unwrap().unwrap();
        assert!(deleted.is_deleted);
        assert_eq!(deleted.content, None);
    }
}
