//! Plain-text transcript export and import
//!
//! A transcript is a sequence of blocks, one per message:
//!
//! ```text
//! <|#|role|#| attr1 attr2="value">content<|#|/role|#|>
//! ```
//!
//! for role in system, user, model. Recognized attributes are `isCascaded`
//! and `isSelected` on model blocks and `attachments="a;b"` on user blocks
//! (names only; binary payloads do not round-trip). Tool and error messages
//! are protocol-internal and are not exported. Import rebuilds cascade
//! groups from runs of consecutive `isCascaded` model blocks and then runs
//! selection normalization, so a hand-edited transcript always loads into a
//! valid conversation.

use crate::error::{EngineError, Result};
use crate::session::branch::BranchManager;
use crate::session::conversation::{Attachment, Conversation, Message, ModelMessage};
use regex::Regex;
use std::collections::HashMap;
use std::fmt::Write as _;
use tracing::debug;
use uuid::Uuid;

const BLOCK_PATTERN: &str =
    r"(?s)<\|#\|(system|user|model)\|#\|([^>]*)>(.*?)<\|#\|/(system|user|model)\|#\|>";
const ATTR_PATTERN: &str = r#"([A-Za-z]+)(?:="([^"]*)")?"#;

fn write_block(out: &mut String, role: &str, attributes: &str, content: &str) {
    let _ = writeln!(out, "<|#|{role}|#|{attributes}>{content}<|#|/{role}|#|>");
}

/// Renders a conversation as transcript text
///
/// The system prompt, when present, becomes a leading `system` block. Tool
/// and error messages are skipped.
pub fn export(conversation: &Conversation) -> String {
    let mut out = String::new();

    if !conversation.system_prompt.is_empty() {
        write_block(&mut out, "system", "", &conversation.system_prompt);
    }

    for message in &conversation.messages {
        match message {
            Message::User(user) => {
                let mut attributes = String::new();
                if !user.attachments.is_empty() {
                    let names: Vec<&str> =
                        user.attachments.iter().map(|a| a.name.as_str()).collect();
                    let _ = write!(attributes, r#" attachments="{}""#, names.join(";"));
                }
                write_block(&mut out, "user", &attributes, &user.content);
            }
            Message::Model(model) => {
                let mut attributes = String::new();
                if model.is_cascaded {
                    attributes.push_str(" isCascaded");
                }
                if model.is_selected {
                    attributes.push_str(" isSelected");
                }
                write_block(&mut out, "model", &attributes, &model.content);
            }
            Message::Tool(_) | Message::Error(_) => {}
        }
    }

    out
}

/// Parses transcript text into a fresh, unsaved conversation
///
/// Text between blocks is ignored, so surrounding whitespace and stray
/// notes do not break a hand-edited file. Imported attachments carry names
/// only; their data is empty.
///
/// # Errors
///
/// Returns `EngineError::Transcript` when a block's opening and closing
/// role tags disagree.
pub fn import(text: &str) -> Result<Conversation> {
    let block_re = Regex::new(BLOCK_PATTERN)
        .map_err(|e| EngineError::Transcript(format!("bad block pattern: {e}")))?;
    let attr_re = Regex::new(ATTR_PATTERN)
        .map_err(|e| EngineError::Transcript(format!("bad attribute pattern: {e}")))?;

    let mut conversation = Conversation::new();
    // Group id shared by the current run of consecutive cascaded blocks
    let mut cascade_run: Option<String> = None;

    for capture in block_re.captures_iter(text) {
        let (open_role, close_role) = (&capture[1], &capture[4]);
        if open_role != close_role {
            return Err(EngineError::Transcript(format!(
                "block opened as '{open_role}' but closed as '{close_role}'"
            ))
            .into());
        }
        let attributes = parse_attributes(&attr_re, &capture[2]);
        let content = capture[3].to_string();

        match open_role {
            "system" => {
                cascade_run = None;
                conversation.system_prompt = content;
            }
            "user" => {
                cascade_run = None;
                let attachments = attributes
                    .get("attachments")
                    .map(|names| parse_attachment_names(names))
                    .unwrap_or_default();
                conversation
                    .messages
                    .push(Message::user(content, attachments));
            }
            "model" => {
                let mut model = ModelMessage::new(content);
                model.is_selected = attributes.contains_key("isSelected");
                if attributes.contains_key("isCascaded") {
                    model.is_cascaded = true;
                    let group_id = cascade_run
                        .get_or_insert_with(|| Uuid::new_v4().to_string())
                        .clone();
                    model.sibling_group_id = Some(group_id);
                } else {
                    cascade_run = None;
                }
                conversation.messages.push(Message::Model(model));
            }
            _ => unreachable!("role constrained by the block pattern"),
        }
    }

    let repaired = BranchManager::normalize_conversation(&mut conversation);
    debug!(
        messages = conversation.messages.len(),
        repaired, "transcript imported"
    );
    Ok(conversation)
}

fn parse_attributes(attr_re: &Regex, raw: &str) -> HashMap<String, String> {
    attr_re
        .captures_iter(raw)
        .map(|c| {
            let key = c[1].to_string();
            let value = c.get(2).map(|v| v.as_str().to_string()).unwrap_or_default();
            (key, value)
        })
        .collect()
}

fn parse_attachment_names(names: &str) -> Vec<Attachment> {
    names
        .split(';')
        .filter(|name| !name.is_empty())
        .map(|name| Attachment {
            name: name.to_string(),
            mime_type: "application/octet-stream".to_string(),
            data: String::new(),
            size: 0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selected_contents(conversation: &Conversation) -> Vec<&str> {
        conversation
            .messages
            .iter()
            .filter_map(Message::as_model)
            .filter(|m| m.is_selected)
            .map(|m| m.content.as_str())
            .collect()
    }

    #[test]
    fn test_export_simple_turn() {
        let mut conversation = Conversation::new();
        conversation.system_prompt = "Be terse".to_string();
        conversation.messages.push(Message::user("Hi", Vec::new()));
        conversation.messages.push(Message::model("Hello"));

        let text = export(&conversation);
        assert_eq!(
            text,
            "<|#|system|#|>Be terse<|#|/system|#|>\n\
             <|#|user|#|>Hi<|#|/user|#|>\n\
             <|#|model|#|>Hello<|#|/model|#|>\n"
        );
    }

    #[test]
    fn test_export_skips_tool_and_error_messages() {
        let mut conversation = Conversation::new();
        conversation.messages.push(Message::user("Go", Vec::new()));
        conversation
            .messages
            .push(Message::tool("probe", serde_json::json!({"ok": true})));
        conversation.messages.push(Message::error("boom"));
        conversation.messages.push(Message::model("done"));

        let text = export(&conversation);
        assert!(!text.contains("probe"));
        assert!(!text.contains("boom"));
        assert!(text.contains("done"));
    }

    #[test]
    fn test_export_cascade_and_attachment_attributes() {
        let mut conversation = Conversation::new();
        conversation.messages.push(Message::user(
            "look",
            vec![
                Attachment {
                    name: "a.png".to_string(),
                    mime_type: "image/png".to_string(),
                    data: "xxxx".to_string(),
                    size: 3,
                },
                Attachment {
                    name: "b.txt".to_string(),
                    mime_type: "text/plain".to_string(),
                    data: "yyyy".to_string(),
                    size: 3,
                },
            ],
        ));
        let mut first = ModelMessage::new("A");
        first.is_cascaded = true;
        first.sibling_group_id = Some("g".to_string());
        let mut second = ModelMessage::new("B");
        second.is_cascaded = true;
        second.is_selected = true;
        second.sibling_group_id = Some("g".to_string());
        conversation.messages.push(Message::Model(first));
        conversation.messages.push(Message::Model(second));

        let text = export(&conversation);
        assert!(text.contains(r#"<|#|user|#| attachments="a.png;b.txt">look<|#|/user|#|>"#));
        assert!(text.contains("<|#|model|#| isCascaded>A<|#|/model|#|>"));
        assert!(text.contains("<|#|model|#| isCascaded isSelected>B<|#|/model|#|>"));
        // Binary payloads never leave through this format
        assert!(!text.contains("xxxx"));
    }

    #[test]
    fn test_import_reconstructs_cascade_group() {
        let text = "<|#|user|#|>Hi<|#|/user|#|>\n\
                    <|#|model|#| isCascaded>A<|#|/model|#|>\n\
                    <|#|model|#| isCascaded isSelected>B<|#|/model|#|>";
        let conversation = import(text).expect("import failed");

        assert_eq!(conversation.messages.len(), 3);
        assert_eq!(conversation.messages[0].role(), "user");
        let first = conversation.messages[1].as_model().expect("model");
        let second = conversation.messages[2].as_model().expect("model");
        assert!(first.is_cascaded && second.is_cascaded);
        assert!(first.sibling_group_id.is_some());
        assert_eq!(first.sibling_group_id, second.sibling_group_id);
        assert_eq!(selected_contents(&conversation), vec!["B"]);
    }

    #[test]
    fn test_import_separates_cascade_runs() {
        let text = "<|#|user|#|>q1<|#|/user|#|>\n\
                    <|#|model|#| isCascaded isSelected>a1<|#|/model|#|>\n\
                    <|#|user|#|>q2<|#|/user|#|>\n\
                    <|#|model|#| isCascaded isSelected>a2<|#|/model|#|>";
        let conversation = import(text).expect("import failed");

        let first = conversation.messages[1].as_model().expect("model");
        let second = conversation.messages[3].as_model().expect("model");
        assert_ne!(first.sibling_group_id, second.sibling_group_id);
    }

    #[test]
    fn test_import_normalizes_missing_selection() {
        let text = "<|#|user|#|>Hi<|#|/user|#|>\n\
                    <|#|model|#| isCascaded>A<|#|/model|#|>\n\
                    <|#|model|#| isCascaded>B<|#|/model|#|>";
        let conversation = import(text).expect("import failed");
        // No block claimed selection; the last member wins
        assert_eq!(selected_contents(&conversation), vec!["B"]);
    }

    #[test]
    fn test_import_system_and_attachments() {
        let text = "<|#|system|#|>Be kind<|#|/system|#|>\n\
                    <|#|user|#| attachments=\"x.png;y.pdf\">see attached<|#|/user|#|>";
        let conversation = import(text).expect("import failed");

        assert_eq!(conversation.system_prompt, "Be kind");
        let Message::User(user) = &conversation.messages[0] else {
            panic!("expected user message");
        };
        let names: Vec<&str> = user.attachments.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["x.png", "y.pdf"]);
        assert!(user.attachments.iter().all(|a| a.data.is_empty()));
    }

    #[test]
    fn test_import_rejects_mismatched_tags() {
        let err = import("<|#|user|#|>Hi<|#|/model|#|>").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::Transcript(_))
        ));
    }

    #[test]
    fn test_import_ignores_text_between_blocks() {
        let text = "exported 2026-01-01\n\
                    <|#|user|#|>Hi<|#|/user|#|>\n\
                    -- a note --\n\
                    <|#|model|#|>Hello<|#|/model|#|>";
        let conversation = import(text).expect("import failed");
        assert_eq!(conversation.messages.len(), 2);
    }

    #[test]
    fn test_import_preserves_multiline_content() {
        let text = "<|#|user|#|>line one\nline two<|#|/user|#|>";
        let conversation = import(text).expect("import failed");
        assert_eq!(conversation.messages[0].content(), "line one\nline two");
    }

    #[test]
    fn test_round_trip_preserves_roles_content_and_cascades() {
        let original = "<|#|system|#|>sys<|#|/system|#|>\n\
                        <|#|user|#| attachments=\"f.bin\">Hi<|#|/user|#|>\n\
                        <|#|model|#| isCascaded>A<|#|/model|#|>\n\
                        <|#|model|#| isCascaded isSelected>B<|#|/model|#|>\n\
                        <|#|user|#|>more<|#|/user|#|>\n\
                        <|#|model|#|>done<|#|/model|#|>\n";
        let conversation = import(original).expect("import failed");
        let exported = export(&conversation);
        assert_eq!(exported, original);
    }

    #[test]
    fn test_import_empty_text() {
        let conversation = import("").expect("import failed");
        assert!(conversation.messages.is_empty());
        assert!(conversation.system_prompt.is_empty());
    }
}
