//! Session Manager
//!
//! Owns the one backend connection of a conversation. Connections are opened
//! with exponential backoff, reused while active, and closed idempotently.

use crate::events::Modality;
use crate::live::{LiveConnection, LiveConnector, LiveSetup};
use crate::tools::ToolDeclaration;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 2;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Our service is currently down. Please try again later.")]
    ServiceUnavailable { attempts: u32 },
    #[error("no active session")]
    NoActiveSession,
    #[error("backend transport failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// One logical backend session.
pub struct Session {
    id: Uuid,
    modality: Modality,
    state: SessionState,
    retries: u32,
    connection: Option<Box<dyn LiveConnection>>,
}

impl Session {
    fn new(modality: Modality) -> Self {
        Self {
            id: Uuid::new_v4(),
            modality,
            state: SessionState::Connecting,
            retries: 0,
            connection: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Failed connection attempts before this session became active.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    // States only move forward.
    fn set_state(&mut self, next: SessionState) {
        if next < self.state {
            warn!(session_id = %self.id, from = ?self.state, to = ?next, "Ignoring backwards session transition");
            return;
        }
        if next != self.state {
            info!(session_id = %self.id, from = ?self.state, to = ?next, "Session state changed");
            self.state = next;
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("modality", &self.modality)
            .field("state", &self.state)
            .field("retries", &self.retries)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

pub struct SessionManager {
    connector: Arc<dyn LiveConnector>,
    tools: Vec<ToolDeclaration>,
    system_instruction: Option<String>,
    backoff_base_secs: u64,
    session: Option<Session>,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn LiveConnector>, tools: Vec<ToolDeclaration>) -> Self {
        Self {
            connector,
            tools,
            system_instruction: None,
            backoff_base_secs: DEFAULT_BACKOFF_BASE_SECS,
            session: None,
        }
    }

    pub fn with_backoff_base(mut self, secs: u64) -> Self {
        self.backoff_base_secs = secs;
        self
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_active)
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.backoff_base_secs.saturating_pow(attempt))
    }

    /// Returns the active session, opening one if needed.
    ///
    /// Each failed attempt is followed by a delay of `base^attempt` seconds,
    /// so `max_retries` failures cost `max_retries` delays before
    /// [`SessionError::ServiceUnavailable`] is returned.
    pub async fn acquire(
        &mut self,
        modality: Modality,
        max_retries: u32,
    ) -> Result<&Session, SessionError> {
        if !self.is_active() {
            self.open(modality, max_retries).await?;
        }
        self.session.as_ref().ok_or(SessionError::NoActiveSession)
    }

    async fn open(&mut self, modality: Modality, max_retries: u32) -> Result<(), SessionError> {
        // A session that is no longer active may still hold a transport.
        self.release().await;

        let mut session = Session::new(modality);
        let setup = LiveSetup {
            modality,
            tools: self.tools.clone(),
            system_instruction: self.system_instruction.clone(),
        };

        for attempt in 1..=max_retries {
            info!(session_id = %session.id, attempt, max_retries, "Connecting to live backend");
            match self.connector.connect(&setup).await {
                Ok(connection) => {
                    session.connection = Some(connection);
                    session.set_state(SessionState::Active);
                    self.session = Some(session);
                    return Ok(());
                }
                Err(e) => {
                    session.retries = attempt;
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        attempt,
                        error = %e,
                        delay_secs = delay.as_secs(),
                        "Live backend connection failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        error!(attempts = max_retries, "Giving up on the live backend");
        session.set_state(SessionState::Closed);
        self.session = Some(session);
        Err(SessionError::ServiceUnavailable {
            attempts: max_retries,
        })
    }

    /// Closes the active connection. Safe to call at any time, any number of
    /// times.
    pub async fn release(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(mut connection) = session.connection.take() {
            session.set_state(SessionState::Closing);
            if let Err(e) = connection.close().await {
                warn!(session_id = %session.id, error = %e, "Error while closing live connection");
            }
        }
        session.set_state(SessionState::Closed);
    }

    /// The connection of the active session, for driving one turn.
    pub fn connection_mut(&mut self) -> Result<&mut dyn LiveConnection, SessionError> {
        match self
            .session
            .as_mut()
            .filter(|session| session.is_active())
            .and_then(|session| session.connection.as_deref_mut())
        {
            Some(connection) => Ok(connection),
            None => Err(SessionError::NoActiveSession),
        }
    }

    /// Checks the transport after a turn. A lost connection closes the session
    /// so the next `acquire` opens a fresh one.
    pub fn reconcile(&mut self) -> Result<(), SessionError> {
        let Some(session) = self.session.as_mut().filter(|session| session.is_active()) else {
            return Ok(());
        };
        if session.connection.as_ref().is_some_and(|c| c.is_open()) {
            return Ok(());
        }
        warn!(session_id = %session.id, "Live backend connection was lost");
        session.connection = None;
        session.set_state(SessionState::Closed);
        Err(SessionError::Transport(
            "the live backend connection was lost".to_string(),
        ))
    }
}
