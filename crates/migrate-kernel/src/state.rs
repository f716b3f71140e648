//! Append-only shared state threaded through a run
//!
//! The engine is the single writer; stages only ever see `&SharedState`.

use crate::types::{CodeRecord, Message, RunId, ToolRecord};
use serde::Serialize;

/// Ordered message history of one run
#[derive(Debug, Clone, Serialize)]
pub struct SharedState {
    run_id: RunId,
    messages: Vec<Message>,
}

impl SharedState {
    /// Start a history with the seed message
    #[must_use]
    pub fn seeded(initial_message: impl Into<String>) -> Self {
        Self {
            run_id: RunId::new(),
            messages: vec![Message::seed(initial_message)],
        }
    }

    /// Append a batch of messages
    pub(crate) fn append(&mut self, batch: Vec<Message>) {
        self.messages.extend(batch);
    }

    /// Run identifier
    #[inline]
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// All messages, seed first
    #[inline]
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The seed message
    #[inline]
    #[must_use]
    pub fn seed(&self) -> &Message {
        &self.messages[0]
    }

    /// Most recent message
    #[inline]
    #[must_use]
    pub fn latest(&self) -> &Message {
        // never empty: constructed with the seed and only grows
        &self.messages[self.messages.len() - 1]
    }

    /// Total messages including the seed
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Always false; kept for API symmetry with collections
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages appended after the seed
    #[inline]
    #[must_use]
    pub fn appended_count(&self) -> usize {
        self.messages.len() - 1
    }

    /// Messages written by a given stage
    pub fn by_author<'a>(&'a self, author: &'a str) -> impl Iterator<Item = &'a Message> + 'a {
        self.messages.iter().filter(move |m| m.author == author)
    }

    /// Render the history as `[author] content` blocks
    ///
    /// Each block lists the tool calls and code runs behind the message,
    /// so later stages see failures that the content itself omits.
    #[must_use]
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| {
                let mut block = format!("[{}] {}", m.author, m.content);
                let records = m
                    .tool_records
                    .iter()
                    .map(ToolRecord::summary)
                    .chain(m.code_records.iter().map(CodeRecord::summary));
                for line in records {
                    block.push_str("\n  ");
                    block.push_str(&line);
                }
                block
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ToolCall, ToolResult};
    use crate::types::Reply;

    #[test]
    fn append_preserves_order() {
        let mut state = SharedState::seeded("start");
        state.append(vec![
            Message::from_reply("a", Reply::text("one")),
            Message::from_reply("b", Reply::text("two")),
        ]);
        let authors: Vec<_> = state.messages().iter().map(|m| m.author.as_str()).collect();
        assert_eq!(authors, vec!["user", "a", "b"]);
        assert_eq!(state.appended_count(), 2);
        assert_eq!(state.latest().content, "two");
        assert_eq!(state.seed().content, "start");
    }

    #[test]
    fn by_author_filters() {
        let mut state = SharedState::seeded("start");
        state.append(vec![Message::from_reply("a", Reply::text("x"))]);
        state.append(vec![Message::from_reply("b", Reply::text("y"))]);
        state.append(vec![Message::from_reply("a", Reply::text("z"))]);
        assert_eq!(state.by_author("a").count(), 2);
        assert!(state.transcript().contains("[b] y"));
    }

    #[test]
    fn transcript_lists_failed_tool_calls() {
        let mut state = SharedState::seeded("start");
        let record = ToolRecord {
            call: ToolCall::new("checksum").with_param("table_name", "salaries"),
            result: ToolResult::error("connection reset"),
        };
        state.append(vec![Message::from_reply(
            "schema_conversion",
            Reply::text("Schema reviewed.").with_tool_records(vec![record]),
        )]);
        assert_eq!(
            state.transcript(),
            "[user] start\n\n[schema_conversion] Schema reviewed.\n  \
             tool checksum {\"table_name\":\"salaries\"} -> error: connection reset"
        );
    }
}
