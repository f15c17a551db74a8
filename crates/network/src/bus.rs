//! Bus abstraction shared by every transport

use async_trait::async_trait;
use std::borrow::Cow;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Prefix of private reply subjects
pub const INBOX_PREFIX: &str = "_INBOX";

/// Bus errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("invalid subject: {0:?}")]
    InvalidSubject(String),
    #[error("no responders available for request on {subject}")]
    NoResponders { subject: String },
    #[error("request on {subject} timed out after {timeout:?}")]
    Timeout { subject: String, timeout: Duration },
    #[error("connection closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
}

/// A message as seen by a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    /// Where the publisher expects an answer, if anywhere
    pub reply: Option<String>,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(subject: impl Into<String>, reply: Option<String>, payload: Vec<u8>) -> Self {
        Self {
            subject: subject.into(),
            reply,
            payload,
        }
    }

    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Stream of messages for one subscription
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    subject: String,
    receiver: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub fn new(id: u64, subject: impl Into<String>, receiver: mpsc::UnboundedReceiver<Message>) -> Self {
        Self {
            id,
            subject: subject.into(),
            receiver,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Next message, or `None` once the subscription is closed
    pub async fn next(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }
}

/// Fresh private reply subject
pub fn new_inbox() -> String {
    format!("{INBOX_PREFIX}.{:016x}{:016x}", rand::random::<u64>(), rand::random::<u64>())
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish to a subject; returns how many subscribers received it.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<usize, BusError>;

    /// Publish with a reply subject attached.
    async fn publish_request(
        &self,
        subject: &str,
        reply: &str,
        payload: Vec<u8>,
    ) -> Result<usize, BusError>;

    /// Subscribe to a subject pattern. Subscribers sharing a queue group
    /// split the traffic between them.
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> Result<Subscription, BusError>;

    async fn unsubscribe(&self, id: u64) -> Result<(), BusError>;

    /// Send a request and wait for the first reply.
    ///
    /// Single attempt: fails with [`BusError::NoResponders`] if nobody is
    /// listening and [`BusError::Timeout`] if nobody answers in time.
    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Message, BusError> {
        let inbox = new_inbox();
        let mut replies = self.subscribe(&inbox, None).await?;

        let outcome = match self.publish_request(subject, &inbox, payload).await {
            Ok(0) => Err(BusError::NoResponders {
                subject: subject.to_string(),
            }),
            Ok(_) => match tokio::time::timeout(timeout, replies.next()).await {
                Ok(Some(reply)) => Ok(reply),
                Ok(None) => Err(BusError::Closed),
                Err(_) => Err(BusError::Timeout {
                    subject: subject.to_string(),
                    timeout,
                }),
            },
            Err(err) => Err(err),
        };

        if let Err(err) = self.unsubscribe(replies.id()).await {
            debug!("Failed to drop reply inbox {}: {}", inbox, err);
        }
        outcome
    }

    /// Answer a message on its reply subject. Messages without one are
    /// silently skipped.
    async fn respond(&self, message: &Message, payload: Vec<u8>) -> Result<(), BusError> {
        match &message.reply {
            Some(reply) => self.publish(reply, payload).await.map(|_| ()),
            None => Ok(()),
        }
    }
}
