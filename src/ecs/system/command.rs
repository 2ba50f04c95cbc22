//! Deferred command buffers: the only channel through which a worker may
//! request a structural mutation (creating or deleting an entity, attaching
//! or detaching a component) while systems are running.
//!
//! One mutex per buffer, held only for the duration of a single append, so
//! workers can enqueue commands concurrently without contending on a
//! buffer they aren't touching.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::ecs::id::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    CreateEntity,
    DeleteEntity,
    AttachComponent,
    DetachComponent,
}

#[derive(Debug, Clone, Copy)]
pub struct Command {
    pub kind: CommandKind,
    pub arg0: Id,
    pub arg1: Id,
}

/// Placeholders are minted from the top of the `u32` range, counting down,
/// so they can never collide with a real entity id (which starts at 1 and
/// counts up). This is what lets command application tell "this argument is
/// a placeholder local to this buffer" apart from "this argument is already
/// a real id" without threading extra state through every command.
const FIRST_PLACEHOLDER: u32 = u32::MAX;

pub struct CommandBuffer {
    next_placeholder: AtomicU32,
    commands: Mutex<VecDeque<Command>>,
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self {
            next_placeholder: AtomicU32::new(FIRST_PLACEHOLDER),
            commands: Mutex::new(VecDeque::new()),
        }
    }

    /// Mint a placeholder entity id and enqueue its creation.
    pub fn create_entity(&self) -> Id {
        let placeholder = Id::from_raw(self.next_placeholder.fetch_sub(1, Ordering::Relaxed));
        self.commands.lock().expect("command buffer poisoned").push_back(Command {
            kind: CommandKind::CreateEntity,
            arg0: placeholder,
            arg1: Id::NONE,
        });
        placeholder
    }

    pub fn delete_entity(&self, entity: Id) {
        self.push(Command {
            kind: CommandKind::DeleteEntity,
            arg0: entity,
            arg1: Id::NONE,
        });
    }

    pub fn add_component(&self, entity: Id, type_id: Id) {
        self.push(Command {
            kind: CommandKind::AttachComponent,
            arg0: entity,
            arg1: type_id,
        });
    }

    pub fn remove_component(&self, entity: Id, type_id: Id) {
        self.push(Command {
            kind: CommandKind::DetachComponent,
            arg0: entity,
            arg1: type_id,
        });
    }

    fn push(&self, command: Command) {
        self.commands.lock().expect("command buffer poisoned").push_back(command);
    }

    pub fn is_empty(&self) -> bool {
        self.commands.lock().expect("command buffer poisoned").is_empty()
    }

    /// Remove and return every pending command, in FIFO order, leaving the
    /// buffer empty. Does not reset the placeholder counter: a buffer is
    /// normally discarded after one application, but draining it this way
    /// rather than requiring a fresh allocation keeps reuse safe too.
    pub fn drain(&self) -> Vec<Command> {
        self.commands
            .lock()
            .expect("command buffer poisoned")
            .drain(..)
            .collect()
    }

    /// `true` if `id` was minted by this buffer's `create_entity`.
    pub fn is_placeholder(id: Id) -> bool {
        id.value() > FIRST_PLACEHOLDER.saturating_sub(1_000_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_distinguishable_from_real_entity_ids() {
        let buffer = CommandBuffer::new();
        let placeholder = buffer.create_entity();
        assert!(CommandBuffer::is_placeholder(placeholder));
        assert!(!CommandBuffer::is_placeholder(Id::from_raw(1)));
    }

    #[test]
    fn drain_returns_commands_in_fifo_order() {
        let buffer = CommandBuffer::new();
        let placeholder = buffer.create_entity();
        buffer.add_component(placeholder, Id::from_raw(42));
        buffer.delete_entity(Id::from_raw(7));

        let commands = buffer.drain();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].kind, CommandKind::CreateEntity);
        assert_eq!(commands[1].kind, CommandKind::AttachComponent);
        assert_eq!(commands[1].arg0, placeholder);
        assert_eq!(commands[2].kind, CommandKind::DeleteEntity);
        assert_eq!(commands[2].arg0, Id::from_raw(7));
        assert!(buffer.is_empty());
    }

    #[test]
    fn distinct_buffers_mint_independent_placeholders() {
        let a = CommandBuffer::new();
        let b = CommandBuffer::new();
        assert_eq!(a.create_entity(), b.create_entity());
    }
}
