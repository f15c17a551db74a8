//! Message bus layer
//!
//! The access service never talks to a transport directly; it goes through
//! the [`MessageBus`] trait.
//!
//! ## Modules
//! - `bus`: the trait, messages, subscriptions and bus errors
//! - `subject`: dot-token subjects with `*` and `>` wildcards
//! - `local`: in-process bus with queue groups and request/reply
//! - `metrics`: publish/delivery counters

pub mod bus;
pub mod local;
pub mod metrics;
pub mod subject;

pub use bus::{new_inbox, BusError, Message, MessageBus, Subscription, INBOX_PREFIX};
pub use local::LocalBus;
pub use metrics::{BusMetrics, BusMetricsSnapshot};
pub use subject::{is_valid_pattern, is_valid_subject, subject_matches};
