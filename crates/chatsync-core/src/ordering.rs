//! Total order over messages
//!
//! Messages are ordered by `sequence_num` first (a missing number sorts
//! last), then by `created_at` (missing sorts last). Sorting is stable, so
//! messages that compare equal keep their original relative order.

use std::cmp::Ordering;

use crate::models::Message;

/// Compare two messages by sequence number, then creation time
pub fn compare(a: &Message, b: &Message) -> Ordering {
    compare_missing_last(a.sequence_num, b.sequence_num)
        .then_with(|| compare_missing_last(a.created_at, b.created_at))
}

fn compare_missing_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Stable sort in place
pub fn sort_by_sequence(messages: &mut [Message]) {
    messages.sort_by(compare);
}

/// Check whether messages are already in order
pub fn is_sorted_by_sequence(messages: &[Message]) -> bool {
    messages
        .windows(2)
        .all(|pair| compare(&pair[0], &pair[1]) != Ordering::Greater)
}

/// Highest sequence number present, 0 when there is none
pub fn max_sequence(messages: &[Message]) -> u64 {
    messages
        .iter()
        .filter_map(|m| m.sequence_num)
        .max()
        .unwrap_or(0)
}

/// Give every message lacking a sequence number `max+1, max+2, ...` in array order
///
/// Returns how many numbers were assigned. Existing numbers are never touched.
pub fn assign_sequence_numbers(messages: &mut [Message]) -> usize {
    let mut next = max_sequence(messages) + 1;
    let mut assigned = 0;

    for message in messages.iter_mut().filter(|m| m.sequence_num.is_none()) {
        message.sequence_num = Some(next);
        next += 1;
        assigned += 1;
    }

    assigned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::{TimeZone, Utc};

    fn msg(id: &str, seq: Option<u64>) -> Message {
        let mut m = Message::with_id(id, Role::User, id);
        m.sequence_num = seq;
        m.created_at = None;
        m
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_missing_sequence_sorts_last() {
        let mut messages = vec![msg("a", None), msg("b", Some(2)), msg("c", Some(1))];
        sort_by_sequence(&mut messages);
        assert_eq!(ids(&messages), vec!["c", "b", "a"]);
        assert!(is_sorted_by_sequence(&messages));
    }

    #[test]
    fn test_created_at_breaks_ties() {
        let mut early = msg("early", Some(1));
        early.created_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mut late = msg("late", Some(1));
        late.created_at = Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());

        let mut messages = vec![late, early];
        assert!(!is_sorted_by_sequence(&messages));
        sort_by_sequence(&mut messages);
        assert_eq!(ids(&messages), vec!["early", "late"]);
    }

    #[test]
    fn test_sort_is_stable() {
        let mut messages = vec![msg("x", None), msg("y", None), msg("z", None)];
        sort_by_sequence(&mut messages);
        assert_eq!(ids(&messages), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_assign_keeps_existing_numbers() {
        let mut messages = vec![
            msg("a", Some(7)),
            msg("b", None),
            msg("c", Some(3)),
            msg("d", None),
        ];
        let assigned = assign_sequence_numbers(&mut messages);

        assert_eq!(assigned, 2);
        assert_eq!(messages[0].sequence_num, Some(7));
        assert_eq!(messages[2].sequence_num, Some(3));
        assert_eq!(messages[1].sequence_num, Some(8));
        assert_eq!(messages[3].sequence_num, Some(9));
    }

    #[test]
    fn test_assign_on_unsequenced_log_starts_at_one() {
        let mut messages = vec![msg("a", None), msg("b", None)];
        assign_sequence_numbers(&mut messages);
        assert_eq!(messages[0].sequence_num, Some(1));
        assert_eq!(messages[1].sequence_num, Some(2));
    }

    #[test]
    fn test_empty_log_is_sorted() {
        assert!(is_sorted_by_sequence(&[]));
        assert_eq!(max_sequence(&[]), 0);
    }
}
