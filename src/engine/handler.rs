use std::{fmt::Display, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::error::FillyError;
use crate::vm::{
    opcode::OpCode,
    sequencer::{GroupId, TimingMode},
};

/// Events a `mes()` block can listen to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Time,
    MidiTime,
    MidiEnd,
    Key,
    Click,
    #[serde(rename = "RBDOWN")]
    RbDown,
    #[serde(rename = "RBDBLCLK")]
    RbDblClk,
    User,
}

impl EventType {
    pub const ALL: [EventType; 8] = [
        EventType::Time,
        EventType::MidiTime,
        EventType::MidiEnd,
        EventType::Key,
        EventType::Click,
        EventType::RbDown,
        EventType::RbDblClk,
        EventType::User,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EventType::Time => "TIME",
            EventType::MidiTime => "MIDI_TIME",
            EventType::MidiEnd => "MIDI_END",
            EventType::Key => "KEY",
            EventType::Click => "CLICK",
            EventType::RbDown => "RBDOWN",
            EventType::RbDblClk => "RBDBLCLK",
            EventType::User => "USER",
        }
    }

    /// Clock the handler's tasks run on.
    pub fn timing_mode(&self) -> TimingMode {
        match self {
            EventType::MidiTime => TimingMode::MidiTime,
            _ => TimingMode::Time,
        }
    }

    /// Clock-driven handlers start a task as soon as they are registered;
    /// the others wait for their event to be delivered.
    pub fn spawns_on_register(&self) -> bool {
        matches!(self, EventType::Time | EventType::MidiTime)
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for EventType {
    type Err = FillyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|event| event.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| FillyError::Type(format!("unknown event type '{}'", s)))
    }
}

/// A registered `mes()` block.
#[derive(Debug, Clone, PartialEq)]
pub struct EventHandler {
    pub event_type: EventType,
    pub body: Arc<[OpCode]>,
    pub mode: TimingMode,
    /// Group shared by every task this handler spawns.
    pub group: GroupId,
    /// Group of the task that registered the handler.
    pub parent_group: GroupId,
    /// `USER` handlers only fire for this message id; `None` accepts any id.
    pub user_filter: Option<i64>,
}

impl EventHandler {
    pub fn accepts(&self, event_type: EventType, user_id: Option<i64>) -> bool {
        if self.event_type != event_type {
            return false;
        }
        match (self.user_filter, user_id) {
            (Some(filter), Some(id)) => filter == id,
            _ => true,
        }
    }
}
