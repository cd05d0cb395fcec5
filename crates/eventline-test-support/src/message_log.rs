//! Scripted message-log doubles.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eventline_core::error::BrokerError;
use eventline_core::event::LogPosition;
use eventline_core::message::{LogConsumer, LogMessage, LogPublisher};

type DrainedHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct ConsumerState {
    script: VecDeque<Result<Vec<LogMessage>, BrokerError>>,
    subscriptions: Vec<Vec<String>>,
    committed: Vec<LogPosition>,
    failing_commits: usize,
    commit_attempts: usize,
    polls: usize,
    closed: bool,
    on_drained: Option<DrainedHook>,
}

/// A consumer that replays a scripted sequence of poll results.
///
/// Clones share state, so a test can hand one clone to the code under test
/// and inspect commits through another. Once the script is exhausted every
/// poll returns an empty batch and the drained hook, if any, fires.
#[derive(Clone, Default)]
pub struct ScriptedLogConsumer {
    state: Arc<Mutex<ConsumerState>>,
}

impl fmt::Debug for ScriptedLogConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("ScriptedLogConsumer")
            .field("remaining", &state.script.len())
            .field("committed", &state.committed)
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

impl ScriptedLogConsumer {
    /// Creates a consumer with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a poll returning `messages`.
    #[must_use]
    pub fn then_messages(self, messages: Vec<LogMessage>) -> Self {
        self.state.lock().unwrap().script.push_back(Ok(messages));
        self
    }

    /// Appends a poll failing with `error`.
    #[must_use]
    pub fn then_error(self, error: BrokerError) -> Self {
        self.state.lock().unwrap().script.push_back(Err(error));
        self
    }

    /// Makes the next `n` commit calls fail transiently.
    #[must_use]
    pub fn failing_commits(self, n: usize) -> Self {
        self.state.lock().unwrap().failing_commits = n;
        self
    }

    /// Registers `hook` to run on every poll after the script is exhausted.
    #[must_use]
    pub fn on_drained(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.state.lock().unwrap().on_drained = Some(Arc::new(hook));
        self
    }

    /// Positions committed so far, in commit order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn committed(&self) -> Vec<LogPosition> {
        self.state.lock().unwrap().committed.clone()
    }

    /// Number of commit calls, successful or not.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn commit_attempts(&self) -> usize {
        self.state.lock().unwrap().commit_attempts
    }

    /// Topic lists passed to `subscribe`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn subscriptions(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().subscriptions.clone()
    }

    /// Number of poll calls.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn polls(&self) -> usize {
        self.state.lock().unwrap().polls
    }

    /// Whether `close` was called.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl LogConsumer for ScriptedLogConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .push(topics.to_vec());
        Ok(())
    }

    async fn poll(&mut self, max_messages: usize) -> Result<Vec<LogMessage>, BrokerError> {
        let hook = {
            let mut state = self.state.lock().unwrap();
            state.polls += 1;
            match state.script.pop_front() {
                Some(Ok(mut batch)) => {
                    if batch.len() > max_messages {
                        let rest = batch.split_off(max_messages);
                        state.script.push_front(Ok(rest));
                    }
                    return Ok(batch);
                }
                Some(Err(e)) => return Err(e),
                None => state.on_drained.clone(),
            }
        };
        if let Some(hook) = hook {
            hook();
        }
        Ok(Vec::new())
    }

    async fn commit(&mut self, message: &LogMessage) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.commit_attempts += 1;
        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            return Err(BrokerError::Transient("commit timed out".into()));
        }
        state.committed.push(message.position());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

/// One message handed to [`RecordingLogPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Target topic.
    pub topic: String,
    /// Partitioning key.
    pub key: Option<String>,
    /// Message body.
    pub value: Vec<u8>,
}

#[derive(Debug, Default)]
struct PublisherState {
    published: Vec<PublishedMessage>,
    fail_after: Option<usize>,
}

/// A publisher that records messages instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct RecordingLogPublisher {
    state: Arc<Mutex<PublisherState>>,
}

impl RecordingLogPublisher {
    /// Creates a publisher that accepts every message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a publisher that accepts `n` messages and rejects the rest.
    #[must_use]
    pub fn failing_after(n: usize) -> Self {
        let publisher = Self::new();
        publisher.state.lock().unwrap().fail_after = Some(n);
        publisher
    }

    /// Messages accepted so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().unwrap().published.clone()
    }
}

#[async_trait]
impl LogPublisher for RecordingLogPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        value: &[u8],
    ) -> Result<LogPosition, BrokerError> {
        let mut state = self.state.lock().unwrap();
        if state
            .fail_after
            .is_some_and(|limit| state.published.len() >= limit)
        {
            return Err(BrokerError::Transient("broker unavailable".into()));
        }
        state.published.push(PublishedMessage {
            topic: topic.to_owned(),
            key: key.map(str::to_owned),
            value: value.to_vec(),
        });
        Ok(LogPosition {
            topic: topic.to_owned(),
            partition: 0,
            offset: i64::try_from(state.published.len()).unwrap_or(i64::MAX) - 1,
        })
    }
}
