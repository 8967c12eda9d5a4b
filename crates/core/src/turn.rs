//! Per-turn phase tracking.

use std::fmt;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TurnPhase {
    NotStarted,
    AwaitingRetrieval,
    RetrievalComplete,
    AwaitingFinalResponse,
    Streaming,
    Completed,
    Interrupted,
    Errored,
}

impl TurnPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TurnPhase::Completed | TurnPhase::Interrupted | TurnPhase::Errored
        )
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Records the phase of one turn. Phases only move forward and a terminal
/// phase is final.
#[derive(Debug)]
pub struct TurnTracker {
    conversation_id: Uuid,
    turn: u64,
    phase: TurnPhase,
}

impl TurnTracker {
    pub fn new(conversation_id: Uuid, turn: u64) -> Self {
        Self {
            conversation_id,
            turn,
            phase: TurnPhase::NotStarted,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn advance(&mut self, next: TurnPhase) {
        if self.phase.is_terminal() || next <= self.phase {
            warn!(
                conversation_id = %self.conversation_id,
                turn = self.turn,
                from = %self.phase,
                to = %next,
                "Ignoring turn phase transition"
            );
            return;
        }
        info!(
            conversation_id = %self.conversation_id,
            turn = self.turn,
            from = %self.phase,
            to = %next,
            "Turn phase changed"
        );
        self.phase = next;
    }
}
