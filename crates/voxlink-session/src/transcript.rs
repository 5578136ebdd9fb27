use voxlink_core::{Message, MessageKind, Role};

/// Ordered conversation history built from streamed deltas and finished items.
///
/// At most one turn is open at a time and it is always the last one. Deltas
/// from the same role extend it; a delta from another role closes it and
/// opens a fresh turn. Closed turns are never touched again.
#[derive(Debug, Clone, Default)]
pub struct TranscriptAssembler {
    turns: Vec<Message>,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append streamed text for `role`. Empty deltas are ignored.
    pub fn apply_delta(&mut self, role: Role, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(last) = self.turns.last_mut() {
            if !last.closed && last.role == role {
                last.content.push_str(text);
                return;
            }
        }
        self.close_turn();
        self.turns.push(Message::new(role, text, MessageKind::Audio));
    }

    pub fn close_turn(&mut self) {
        if let Some(last) = self.turns.last_mut() {
            last.closed = true;
        }
    }

    /// Record a finished turn. Any open turn is closed first.
    pub fn push_turn(&mut self, role: Role, content: impl Into<String>, kind: MessageKind) {
        self.close_turn();
        let mut message = Message::new(role, content, kind);
        message.closed = true;
        self.turns.push(message);
    }

    pub fn turns(&self) -> &[Message] {
        &self.turns
    }

    pub fn open_turn(&self) -> Option<&Message> {
        self.turns.last().filter(|m| !m.closed)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
