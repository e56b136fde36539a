//! Deploy documents and the aggregated daily statistics

use crate::errors::Result;
use crate::search::TermsBucket;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Users that are not people and never count towards the report
pub const EXCLUDED_USERS: [&str; 2] = ["Unknown", "ci"];

/// State bucket key of a successful deploy
pub const STATE_SUCCESSFUL: &str = "successful";

/// State bucket key of a failed deploy
pub const STATE_FAIL: &str = "fail";

/// Number of users listed per environment
pub const TOP_USERS: usize = 3;

/// A single deploy event as indexed in Elasticsearch
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Document {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "finish_timestamp", default)]
    pub finish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub build: String,
    #[serde(default)]
    pub datacenter: String,
    #[serde(default)]
    pub annotags: String,
    #[serde(default)]
    pub apps: Vec<String>,
    #[serde(default)]
    pub production: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub namespace: String,
}

impl Document {
    pub fn is_production(&self) -> bool {
        self.production == "true"
    }

    pub fn environment(&self) -> Environment {
        if self.is_production() {
            Environment::Production
        } else {
            Environment::Development
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Environment {
    Production,
    Development,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Production => write!(f, "production"),
            Environment::Development => write!(f, "development"),
        }
    }
}

/// Deploy counts of one user within an environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub count: u64,
    pub success: u64,
    pub fail: u64,
}

impl User {
    pub fn new(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            count,
            success: 0,
            fail: 0,
        }
    }

    /// Build a user from a `user` terms bucket with a nested `state` aggregation
    pub fn from_bucket(bucket: &TermsBucket, state_aggregation: &str) -> Result<Self> {
        let mut user = User::new(bucket.key_as_string(), bucket.doc_count);

        if let Some(states) = bucket.terms(state_aggregation)? {
            for state in &states.buckets {
                match state.key_as_string().as_str() {
                    STATE_SUCCESSFUL => user.success = state.doc_count,
                    STATE_FAIL => user.fail = state.doc_count,
                    _ => {}
                }
            }
        }

        Ok(user)
    }
}

/// Order by deploy count descending, then name, and keep the top entries
pub fn rank_users(mut users: Vec<User>) -> Vec<User> {
    users.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    users.truncate(TOP_USERS);
    users
}

/// Total and top users of one environment
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvironmentDeploys {
    pub total: u64,
    pub users: Vec<User>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Production {
    pub total: u64,
    pub users: Vec<User>,
    /// Deploys outside business hours, oldest first
    pub after_work: Vec<Document>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Development {
    pub total: u64,
    pub users: Vec<User>,
}

/// Everything the daily report shows
#[derive(Clone, Debug, PartialEq)]
pub struct Stats {
    pub date: NaiveDate,
    pub total: u64,
    pub production: Production,
    pub development: Development,
    /// Set when an off-hours query failed and `after_work` may be missing entries
    pub off_hours_incomplete: bool,
}

impl Stats {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            total: 0,
            production: Production::default(),
            development: Development::default(),
            off_hours_incomplete: false,
        }
    }

    pub fn set_environment(&mut self, environment: Environment, deploys: EnvironmentDeploys) {
        match environment {
            Environment::Production => {
                self.production.total = deploys.total;
                self.production.users = deploys.users;
            }
            Environment::Development => {
                self.development.total = deploys.total;
                self.development.users = deploys.users;
            }
        }
    }
}
