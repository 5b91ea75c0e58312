//! List operations on the canonical message list. The chat engine applies
//! these to the list as it stands when each event is processed.

use std::collections::HashSet;
use std::time::Duration;

use ringside_types::models::Message;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Appended,
    /// A message with this id is already present.
    KnownId,
    /// Same author and body within the echo window as `existing_id`.
    Echo { existing_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// The optimistic entry now carries the canonical id.
    Rewritten,
    /// The canonical id was already present; the optimistic entry was dropped.
    Superseded,
    /// No entry with the temporary id remains.
    Missing,
}

/// Which existing message, if any, makes `candidate` redundant.
pub fn find_duplicate(list: &[Message], candidate: &Message, echo_window: Duration) -> Option<MergeOutcome> {
    if list.iter().any(|m| m.id == candidate.id) {
        return Some(MergeOutcome::KnownId);
    }

    list.iter()
        .find(|m| is_echo(m, candidate, echo_window))
        .map(|m| MergeOutcome::Echo {
            existing_id: m.id.clone(),
        })
}

/// Append `candidate` unless it duplicates something already in the list.
pub fn merge_incoming(list: &mut Vec<Message>, candidate: Message, echo_window: Duration) -> MergeOutcome {
    match find_duplicate(list, &candidate, echo_window) {
        Some(outcome) => outcome,
        None => {
            list.push(candidate);
            MergeOutcome::Appended
        }
    }
}

/// Give the optimistic entry `temp_id` its canonical identity.
pub fn reconcile(
    list: &mut Vec<Message>,
    temp_id: &str,
    canonical_id: &str,
    timestamp: Option<String>,
) -> Reconciled {
    let Some(pos) = list.iter().position(|m| m.id == temp_id) else {
        return Reconciled::Missing;
    };

    if temp_id != canonical_id && list.iter().any(|m| m.id == canonical_id) {
        list.remove(pos);
        return Reconciled::Superseded;
    }

    let entry = &mut list[pos];
    entry.id = canonical_id.to_string();
    if let Some(ts) = timestamp.filter(|t| !t.is_empty()) {
        entry.timestamp = ts;
    }
    Reconciled::Rewritten
}

/// Remove the optimistic entry `temp_id`. Returns whether it was present.
pub fn roll_back(list: &mut Vec<Message>, temp_id: &str) -> bool {
    let before = list.len();
    list.retain(|m| m.id != temp_id);
    list.len() != before
}

/// Build the list after a full reload: the loaded rows in timestamp order,
/// followed by the current entries selected by `keep` that the load does not
/// already cover.
pub fn merge_reload<F>(current: &[Message], mut loaded: Vec<Message>, keep: F, echo_window: Duration) -> Vec<Message>
where
    F: Fn(&Message) -> bool,
{
    loaded.sort_by_key(|m| m.timestamp_millis());

    let mut seen = HashSet::new();
    loaded.retain(|m| seen.insert(m.id.clone()));

    for m in current.iter().filter(|m| keep(m)) {
        if find_duplicate(&loaded, m, echo_window).is_none() {
            loaded.push(m.clone());
        }
    }
    loaded
}

fn is_echo(existing: &Message, candidate: &Message, echo_window: Duration) -> bool {
    if existing.author != candidate.author || existing.body != candidate.body {
        return false;
    }
    match (existing.timestamp_millis(), candidate.timestamp_millis()) {
        (Some(a), Some(b)) => a.abs_diff(b) < echo_window.as_millis() as u64,
        _ => false,
    }
}
