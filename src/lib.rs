//! Daily Deploy Notifier Library
//!
//! This library queries an Elasticsearch index of deploy events for one day,
//! aggregates them into a report and posts it to a chat webhook.

pub mod config;
pub mod deploys;
pub mod errors;
pub mod job;
pub mod notifier;
pub mod query;
pub mod report;
pub mod retry;
pub mod search;

pub use config::{BusinessHours, Config};
pub use deploys::{Document, Environment, Stats, User};
pub use errors::{NotifierError, Result};
pub use job::{DeliveryMode, NotificationJob};
pub use notifier::{MessageTemplate, WebhookNotifier, WebhookPayload};
pub use report::ReportBuilder;
pub use search::{ElasticClient, SearchBackend, SearchResponse};
