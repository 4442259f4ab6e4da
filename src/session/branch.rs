//! Cascade (sibling) group management
//!
//! Alternative completions for the same user turn form a cascade group with
//! exactly one selected member. Groups are tracked through a secondary index
//! from group id to member positions in the message list; the index is built
//! once on load and maintained incrementally across this module's own
//! mutations instead of rescanning the whole list.
//!
//! Selection tie-break: the last member in insertion order wins, both when a
//! new alternative is added and when normalization repairs a broken group.

use crate::error::Result;
use crate::session::conversation::{Conversation, Message, ModelMessage};
use anyhow::bail;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// Sibling navigation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Move selection to the previous member
    Prev,
    /// Move selection to the next member
    Next,
}

/// Maintains cascade groups and the single-selected invariant
pub struct BranchManager {
    /// group id -> member indices in insertion order
    index: HashMap<String, Vec<usize>>,
}

impl BranchManager {
    /// Builds the group index with one scan of the message list
    pub fn build(messages: &[Message]) -> Self {
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, message) in messages.iter().enumerate() {
            if let Some(model) = message.as_model() {
                if let Some(group_id) = &model.sibling_group_id {
                    index.entry(group_id.clone()).or_default().push(position);
                }
            }
        }
        Self { index }
    }

    /// Member positions for a group, in insertion order
    pub fn group_members(&self, group_id: &str) -> Option<&[usize]> {
        self.index.get(group_id).map(|v| v.as_slice())
    }

    /// Records a freshly generated alternative for the turn that already has
    /// a completion at `prior_index`.
    ///
    /// If the prior completion(s) have no group yet, a new group id is
    /// assigned to all of them plus the new one; otherwise the new completion
    /// joins the existing group. The new member is inserted directly after
    /// the last member and becomes selected. Returns the insertion position.
    ///
    /// # Errors
    ///
    /// Fails when `prior_index` does not point at a model message.
    pub fn add_alternative(
        &mut self,
        conversation: &mut Conversation,
        prior_index: usize,
        mut new_message: ModelMessage,
    ) -> Result<usize> {
        let Some(prior) = conversation
            .messages
            .get(prior_index)
            .and_then(Message::as_model)
        else {
            bail!("message at index {prior_index} is not a model message");
        };

        let (group_id, members) = match prior.sibling_group_id.clone() {
            Some(group_id) => {
                let members = self
                    .index
                    .get(&group_id)
                    .cloned()
                    .unwrap_or_else(|| vec![prior_index]);
                (group_id, members)
            }
            None => {
                // First regenerate for this turn: group the run of adjacent
                // ungrouped completions around the prior one.
                let group_id = Uuid::new_v4().to_string();
                let mut start = prior_index;
                while start > 0 && conversation.messages[start - 1].as_model().is_some() {
                    start -= 1;
                }
                let mut end = prior_index;
                while end + 1 < conversation.messages.len()
                    && conversation.messages[end + 1].as_model().is_some()
                {
                    end += 1;
                }
                (group_id, (start..=end).collect())
            }
        };

        for &member in &members {
            if let Some(model) = conversation.messages[member].as_model_mut() {
                model.is_cascaded = true;
                model.sibling_group_id = Some(group_id.clone());
                model.is_selected = false;
            }
        }

        new_message.is_cascaded = true;
        new_message.is_selected = true;
        new_message.sibling_group_id = Some(group_id.clone());

        let insert_at = members.last().copied().unwrap_or(prior_index) + 1;
        conversation
            .messages
            .insert(insert_at, Message::Model(new_message));

        // Shift every tracked position at or past the insertion point
        for positions in self.index.values_mut() {
            for position in positions.iter_mut() {
                if *position >= insert_at {
                    *position += 1;
                }
            }
        }
        let entry = self.index.entry(group_id.clone()).or_default();
        *entry = members;
        entry.push(insert_at);

        debug!(group_id = %group_id, insert_at, "added cascade alternative");
        Ok(insert_at)
    }

    /// Moves the selected flag to the previous/next member in insertion
    /// order, clamped at the ends. Returns true when the selection moved.
    pub fn select(
        &self,
        conversation: &mut Conversation,
        group_id: &str,
        direction: Direction,
    ) -> bool {
        let Some(members) = self.index.get(group_id) else {
            return false;
        };
        if members.is_empty() {
            return false;
        }

        let current = members
            .iter()
            .position(|&m| {
                conversation.messages[m]
                    .as_model()
                    .map(|model| model.is_selected)
                    .unwrap_or(false)
            })
            .unwrap_or(members.len() - 1);

        let target = match direction {
            Direction::Prev => current.saturating_sub(1),
            Direction::Next => (current + 1).min(members.len() - 1),
        };

        if target == current {
            return false;
        }

        for (position, &member) in members.iter().enumerate() {
            if let Some(model) = conversation.messages[member].as_model_mut() {
                model.is_selected = position == target;
            }
        }
        true
    }

    /// Removes the group member at `message_index` from the conversation.
    ///
    /// If the removed member was selected, selection falls to the new last
    /// member of the remaining group. An emptied group's id is discarded
    /// from the index.
    ///
    /// # Errors
    ///
    /// Fails when the index does not point at a cascaded model message.
    pub fn remove_sibling(
        &mut self,
        conversation: &mut Conversation,
        message_index: usize,
    ) -> Result<()> {
        let Some(model) = conversation
            .messages
            .get(message_index)
            .and_then(Message::as_model)
        else {
            bail!("message at index {message_index} is not a model message");
        };
        let Some(group_id) = model.sibling_group_id.clone() else {
            bail!("message at index {message_index} is not part of a cascade group");
        };
        let was_selected = model.is_selected;

        conversation.messages.remove(message_index);

        for positions in self.index.values_mut() {
            positions.retain(|&p| p != message_index);
            for position in positions.iter_mut() {
                if *position > message_index {
                    *position -= 1;
                }
            }
        }

        match self.index.get(&group_id).and_then(|m| m.last().copied()) {
            None => {
                self.index.remove(&group_id);
            }
            Some(last) if was_selected => {
                if let Some(model) = conversation.messages[last].as_model_mut() {
                    model.is_selected = true;
                }
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Repairs any group with zero or more than one selected member by
    /// selecting the last member in insertion order and clearing the rest.
    ///
    /// Idempotent. Returns true when any flag changed, so the caller can
    /// schedule an extra persistence write for the repair alone.
    pub fn normalize(&self, conversation: &mut Conversation) -> bool {
        let mut changed = false;

        for (group_id, members) in &self.index {
            let Some(&last) = members.last() else {
                continue;
            };
            let selected: Vec<usize> = members
                .iter()
                .copied()
                .filter(|&m| {
                    conversation.messages[m]
                        .as_model()
                        .map(|model| model.is_selected)
                        .unwrap_or(false)
                })
                .collect();

            if selected.len() == 1 {
                continue;
            }

            warn!(
                group_id = %group_id,
                selected = selected.len(),
                "repairing cascade group selection"
            );
            for &member in members {
                if let Some(model) = conversation.messages[member].as_model_mut() {
                    let should_select = member == last;
                    if model.is_selected != should_select {
                        model.is_selected = should_select;
                        changed = true;
                    }
                }
            }
        }

        changed
    }

    /// Builds the index for `conversation` and runs [`normalize`] on it
    ///
    /// [`normalize`]: BranchManager::normalize
    pub fn normalize_conversation(conversation: &mut Conversation) -> bool {
        Self::build(&conversation.messages).normalize(conversation)
    }
}
