//! Two-phase client updates: apply a tentative transition locally, then
//! settle it against the server's answer.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use courier_types::api::ReactionSummary;
use courier_types::models::Mute;

use crate::reactions::ToggleOutcome;

/// A local transition that has not been confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tentative<T> {
    pub correlation_id: Uuid,
    pub before: T,
    pub after: T,
}

impl<T: Clone> Tentative<T> {
    pub fn new(before: T, transition: impl FnOnce(&T) -> T) -> Self {
        let after = transition(&before);
        Self {
            correlation_id: Uuid::new_v4(),
            before,
            after,
        }
    }
}

/// Settle `tentative` against the authoritative result.
///
/// Success replaces the local value. Failure restores `before`, unless the
/// local value has since moved away from `after`, in which case the newer
/// local state wins.
pub fn reconcile<T, E>(local: &T, tentative: &Tentative<T>, authoritative: Result<T, E>) -> T
where
    T: Clone + PartialEq,
{
    match authoritative {
        Ok(value) => value,
        Err(_) if *local == tentative.after => tentative.before.clone(),
        Err(_) => local.clone(),
    }
}

/// Flip the viewer's `emoji` reaction in a summary list.
pub fn toggle_locally(summaries: &[ReactionSummary], emoji: &str) -> Vec<ReactionSummary> {
    let reacted = summaries.iter().any(|s| s.emoji == emoji && s.viewer_reacted);
    set_reacted(summaries, emoji, !reacted)
}

/// Make the viewer's `emoji` reaction present or absent, adjusting counts.
/// Entries that drop to zero are removed; new emoji go last.
pub fn set_reacted(summaries: &[ReactionSummary], emoji: &str, reacted: bool) -> Vec<ReactionSummary> {
    let mut out: Vec<ReactionSummary> = summaries.to_vec();
    match out.iter().position(|s| s.emoji == emoji) {
        Some(idx) => {
            let entry = &mut out[idx];
            if entry.viewer_reacted != reacted {
                entry.viewer_reacted = reacted;
                if reacted {
                    entry.count += 1;
                } else {
                    entry.count = entry.count.saturating_sub(1);
                }
            }
            if entry.count == 0 {
                out.remove(idx);
            }
        }
        None if reacted => out.push(ReactionSummary {
            emoji: emoji.to_string(),
            count: 1,
            viewer_reacted: true,
        }),
        None => {}
    }
    out
}

pub fn optimistic_toggle(summaries: &[ReactionSummary], emoji: &str) -> Tentative<Vec<ReactionSummary>> {
    Tentative::new(summaries.to_vec(), |before| toggle_locally(before, emoji))
}

/// Settle a reaction toggle. The server reports only the viewer's final
/// state, so on success that state is applied to whatever is local now.
pub fn reconcile_toggle<E>(
    local: &[ReactionSummary],
    tentative: &Tentative<Vec<ReactionSummary>>,
    emoji: &str,
    result: Result<ToggleOutcome, E>,
) -> Vec<ReactionSummary> {
    let authoritative = result.map(|outcome| set_reacted(local, emoji, outcome.applied));
    reconcile(&local.to_vec(), tentative, authoritative)
}

pub fn optimistic_mute(
    current: Option<Mute>,
    conversation_id: Uuid,
    user_id: Uuid,
    duration_hours: Option<u32>,
    now: DateTime<Utc>,
) -> Tentative<Option<Mute>> {
    Tentative::new(current, |_| {
        Some(Mute {
            user_id,
            conversation_id,
            muted_until: duration_hours.map(|h| now + Duration::hours(i64::from(h))),
        })
    })
}

pub fn optimistic_unmute(current: Option<Mute>) -> Tentative<Option<Mute>> {
    Tentative::new(current, |_| None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(emoji: &str, count: usize, viewer_reacted: bool) -> ReactionSummary {
        ReactionSummary {
            emoji: emoji.to_string(),
            count,
            viewer_reacted,
        }
    }

    #[test]
    fn success_replaces_local() {
        let t = Tentative::new(1, |n| n + 1);
        assert_eq!(reconcile::<_, ()>(&2, &t, Ok(5)), 5);
    }

    #[test]
    fn failure_rolls_back_only_the_tentative_value() {
        let t = Tentative::new(1, |n| n + 1);
        assert_eq!(reconcile(&2, &t, Err("offline")), 1);
        // Something else changed the value meanwhile; keep it.
        assert_eq!(reconcile(&7, &t, Err("offline")), 7);
    }

    #[test]
    fn local_toggle_adjusts_counts() {
        let start = vec![summary("👍", 2, false), summary("🎉", 1, true)];

        let added = toggle_locally(&start, "👍");
        assert_eq!(added[0], summary("👍", 3, true));

        let removed = toggle_locally(&start, "🎉");
        assert_eq!(removed, vec![summary("👍", 2, false)]);

        let fresh = toggle_locally(&start, "❤️");
        assert_eq!(fresh.last(), Some(&summary("❤️", 1, true)));
    }

    #[test]
    fn failed_toggle_restores_summary() {
        let start = vec![summary("👍", 1, false)];
        let t = optimistic_toggle(&start, "👍");
        assert_eq!(t.after, vec![summary("👍", 2, true)]);

        let settled = reconcile_toggle(&t.after, &t, "👍", Err::<ToggleOutcome, _>("timeout"));
        assert_eq!(settled, start);
    }

    #[test]
    fn confirmed_toggle_applies_server_state() {
        let start = vec![summary("👍", 1, false)];
        let t = optimistic_toggle(&start, "👍");

        // Server says the reaction ended up removed (a concurrent toggle won).
        let settled = reconcile_toggle::<()>(&t.after, &t, "👍", Ok(ToggleOutcome { applied: false }));
        assert_eq!(settled, start);
    }

    #[test]
    fn failed_mute_restores_previous_state() {
        let (conv, user) = (Uuid::new_v4(), Uuid::new_v4());
        let t = optimistic_mute(None, conv, user, Some(1), Utc::now());
        assert!(t.after.is_some());

        let settled = reconcile(&t.after, &t, Err::<Option<Mute>, _>("503"));
        assert_eq!(settled, None);

        let unmute = optimistic_unmute(t.after.clone());
        assert_eq!(reconcile::<_, ()>(&unmute.after, &unmute, Ok(None)), None);
    }
}
