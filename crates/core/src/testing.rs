//! Scripted live backend used by the unit tests.

use crate::context::ConversationContext;
use crate::events::Modality;
use crate::live::{LiveConnection, LiveConnector, LiveFrame, LiveSetup};
use crate::product::{RetrievedProduct, Retriever};
use crate::store::StoreContext;
use crate::tools::ToolBridge;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Frame(LiveFrame),
    /// The transport errors out (and is no longer usable).
    Fail(String),
    /// The transport closes without finishing the turn.
    Close,
}

impl From<LiveFrame> for Step {
    fn from(frame: LiveFrame) -> Self {
        Step::Frame(frame)
    }
}

#[derive(Default)]
struct Script {
    failures_remaining: u32,
    attempts: Vec<Instant>,
    setups: Vec<LiveSetup>,
    turns: VecDeque<Vec<Step>>,
    prompts: Vec<String>,
    closes: u32,
    fail_next_send: bool,
}

/// Replays one scripted turn per prompt, across however many connections it
/// hands out.
#[derive(Clone, Default)]
pub(crate) struct ScriptedConnector {
    script: Arc<Mutex<Script>>,
}

impl ScriptedConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The first `n` connection attempts fail.
    pub(crate) fn failing_first(self, n: u32) -> Self {
        self.script.lock().unwrap().failures_remaining = n;
        self
    }

    pub(crate) fn turn(self, steps: Vec<Step>) -> Self {
        self.script.lock().unwrap().turns.push_back(steps);
        self
    }

    pub(crate) fn frames(self, frames: Vec<LiveFrame>) -> Self {
        self.turn(frames.into_iter().map(Step::from).collect())
    }

    pub(crate) fn fail_next_send(&self) {
        self.script.lock().unwrap().fail_next_send = true;
    }

    pub(crate) fn attempts(&self) -> Vec<Instant> {
        self.script.lock().unwrap().attempts.clone()
    }

    pub(crate) fn setups(&self) -> Vec<LiveSetup> {
        self.script.lock().unwrap().setups.clone()
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.script.lock().unwrap().prompts.clone()
    }

    pub(crate) fn closes(&self) -> u32 {
        self.script.lock().unwrap().closes
    }
}

#[async_trait]
impl LiveConnector for ScriptedConnector {
    async fn connect(&self, setup: &LiveSetup) -> Result<Box<dyn LiveConnection>> {
        let mut script = self.script.lock().unwrap();
        script.attempts.push(Instant::now());
        if script.failures_remaining > 0 {
            script.failures_remaining -= 1;
            return Err(anyhow!("connection refused"));
        }
        script.setups.push(setup.clone());
        Ok(Box::new(ScriptedConnection {
            script: self.script.clone(),
            current: VecDeque::new(),
            open: true,
        }))
    }
}

struct ScriptedConnection {
    script: Arc<Mutex<Script>>,
    current: VecDeque<Step>,
    open: bool,
}

#[async_trait]
impl LiveConnection for ScriptedConnection {
    async fn send_prompt(&mut self, prompt: &str) -> Result<()> {
        let mut script = self.script.lock().unwrap();
        if script.fail_next_send {
            script.fail_next_send = false;
            self.open = false;
            return Err(anyhow!("socket is closed"));
        }
        script.prompts.push(prompt.to_string());
        self.current = script.turns.pop_front().unwrap_or_default().into();
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<LiveFrame>> {
        match self.current.pop_front() {
            Some(Step::Frame(frame)) => Some(Ok(frame)),
            Some(Step::Fail(reason)) => {
                self.open = false;
                Some(Err(anyhow!(reason)))
            }
            Some(Step::Close) => {
                self.open = false;
                None
            }
            None => Some(Ok(LiveFrame::TurnComplete)),
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        self.script.lock().unwrap().closes += 1;
        Ok(())
    }
}

pub(crate) fn context(retriever: impl Retriever + 'static, modality: Modality) -> ConversationContext {
    ConversationContext::new(
        StoreContext::new("acme-42"),
        Arc::new(ToolBridge::new(Arc::new(retriever))),
        modality,
    )
}

pub(crate) fn product(sku: &str, name: &str, price: f64) -> RetrievedProduct {
    serde_json::from_value(serde_json::json!({
        "sku": sku,
        "name": name,
        "price": price,
        "location": {"aisle": "7", "section": "Kitchen", "shelf": "2"}
    }))
    .unwrap()
}
