//! Builds the daily deploy statistics from the search backend

use crate::config::{BusinessHours, Config};
use crate::deploys::{
    Document, EXCLUDED_USERS, Environment, EnvironmentDeploys, Stats, TOP_USERS, User, rank_users,
};
use crate::errors::{NotifierError, Result};
use crate::query::{BoolQuery, Query, RangeQuery, SearchRequest, TermQuery, TermsAggregation};
use crate::search::SearchBackend;
use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use tracing::{debug, info, instrument, warn};

pub const USER_FIELD: &str = "user.keyword";
pub const STATE_FIELD: &str = "state.keyword";
pub const PRODUCTION_FIELD: &str = "production.keyword";
pub const TIMESTAMP_FIELD: &str = "@timestamp";

const USER_AGGREGATION: &str = "user";
const STATE_AGGREGATION: &str = "state";

/// Upper bound on off-hours documents fetched per window
pub const MAX_OFF_HOURS_DOCUMENTS: usize = 100;

/// Name of the daily index holding `date`'s deploys
pub fn index_name(prefix: &str, date: NaiveDate) -> String {
    format!("{}-{}", prefix, date.format("%Y.%m.%d"))
}

/// The report date for a run at `now`: yesterday in the report timezone
pub fn report_date(now: DateTime<Utc>, utc_offset: FixedOffset) -> NaiveDate {
    let today = now.with_timezone(&utc_offset).date_naive();
    today.pred_opt().unwrap_or(today)
}

/// A half-open `[from, to)` time range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.from && at < self.to
    }

    /// UTC calendar dates touched by the window
    pub fn utc_dates(&self) -> Vec<NaiveDate> {
        let first = self.from.date_naive();
        let last = if self.to > self.from {
            (self.to - TimeDelta::nanoseconds(1)).date_naive()
        } else {
            first
        };

        first.iter_days().take_while(|day| *day <= last).collect()
    }
}

/// Queries one day's deploys and assembles them into [`Stats`]
pub struct ReportBuilder {
    backend: Box<dyn SearchBackend>,
    index_prefix: String,
    utc_offset: FixedOffset,
    business_hours: BusinessHours,
}

impl ReportBuilder {
    pub fn new(backend: Box<dyn SearchBackend>, config: &Config) -> Self {
        Self {
            backend,
            index_prefix: config.index_prefix.clone(),
            utc_offset: config.utc_offset,
            business_hours: config.business_hours,
        }
    }

    /// Index of a single report date
    pub fn index_for(&self, date: NaiveDate) -> Vec<String> {
        vec![index_name(&self.index_prefix, date)]
    }

    /// Indices covering every UTC day a window touches
    pub fn indices_for(&self, window: &TimeWindow) -> Vec<String> {
        window
            .utc_dates()
            .into_iter()
            .map(|date| index_name(&self.index_prefix, date))
            .collect()
    }

    fn local_instant(&self, date: NaiveDate, time: NaiveTime) -> Result<DateTime<Utc>> {
        let local = NaiveDateTime::new(date, time);
        let utc = local
            .checked_sub_signed(TimeDelta::seconds(i64::from(self.utc_offset.local_minus_utc())))
            .ok_or_else(|| {
                NotifierError::Other(format!("{} {} is out of the supported range", date, time))
            })?;
        Ok(DateTime::from_naive_utc_and_offset(utc, Utc))
    }

    /// From the end of business hours to the end of the local day
    pub fn after_hours_window(&self, date: NaiveDate) -> Result<TimeWindow> {
        let next_day = date.checked_add_days(Days::new(1)).ok_or_else(|| {
            NotifierError::Other(format!("no day follows {}", date))
        })?;

        Ok(TimeWindow {
            from: self.local_instant(date, self.business_hours.end)?,
            to: self.local_instant(next_day, NaiveTime::MIN)?,
        })
    }

    /// From the start of the local day to the start of business hours
    pub fn before_hours_window(&self, date: NaiveDate) -> Result<TimeWindow> {
        Ok(TimeWindow {
            from: self.local_instant(date, NaiveTime::MIN)?,
            to: self.local_instant(date, self.business_hours.start)?,
        })
    }

    fn without_excluded_users(&self) -> BoolQuery {
        EXCLUDED_USERS
            .iter()
            .fold(BoolQuery::new(), |query, user| {
                query.must_not(TermQuery::new(USER_FIELD, *user))
            })
    }

    fn environment_query(&self, environment: Environment) -> BoolQuery {
        let production = TermQuery::new(PRODUCTION_FIELD, "true");
        match environment {
            Environment::Production => self.without_excluded_users().must(production),
            Environment::Development => self.without_excluded_users().must_not(production),
        }
    }

    /// Deploys on `date`, synthetic users excluded
    #[instrument(skip(self))]
    pub async fn get_total_count(&self, date: NaiveDate) -> Result<u64> {
        let query: Query = self.without_excluded_users().into();
        let count = self.backend.count(&self.index_for(date), &query).await?;
        debug!("Total deploys on {}: {}", date, count);
        Ok(count)
    }

    /// Total and top users of one environment on `date`
    #[instrument(skip(self))]
    pub async fn get_environment_deploys(
        &self,
        date: NaiveDate,
        environment: Environment,
    ) -> Result<EnvironmentDeploys> {
        let indices = self.index_for(date);
        let query: Query = self.environment_query(environment).into();

        let aggregation = TermsAggregation::new(USER_FIELD)
            .size(TOP_USERS)
            .sub_aggregation(STATE_AGGREGATION, TermsAggregation::new(STATE_FIELD));
        let request = SearchRequest::new()
            .query(query.clone())
            .size(0)
            .aggregation(USER_AGGREGATION, aggregation);

        let response = self.backend.search(&indices, &request).await?;
        let total = self.backend.count(&indices, &query).await?;

        let terms = response.terms(USER_AGGREGATION)?.ok_or_else(|| {
            NotifierError::Search(format!(
                "response for {} has no {} aggregation",
                indices.join(","),
                USER_AGGREGATION
            ))
        })?;
        let users = terms
            .buckets
            .iter()
            .map(|bucket| User::from_bucket(bucket, STATE_AGGREGATION))
            .collect::<Result<Vec<User>>>()?;

        debug!("{} deploys on {}: {}", environment, date, total);
        Ok(EnvironmentDeploys {
            total,
            users: rank_users(users),
        })
    }

    async fn production_deploys_in(&self, window: &TimeWindow) -> Result<Vec<Document>> {
        let query = self.environment_query(Environment::Production).filter(
            RangeQuery::new(TIMESTAMP_FIELD)
                .gte(window.from)
                .lt(window.to)
                .time_zone("UTC"),
        );
        let request = SearchRequest::new()
            .query(query)
            .size(MAX_OFF_HOURS_DOCUMENTS)
            .sort(TIMESTAMP_FIELD, true);

        let response = self.backend.search(&self.indices_for(window), &request).await?;
        response.documents()
    }

    /// Production deploys after business hours on `date`
    #[instrument(skip(self))]
    pub async fn get_after_hours_deploys(&self, date: NaiveDate) -> Result<Vec<Document>> {
        self.production_deploys_in(&self.after_hours_window(date)?).await
    }

    /// Production deploys before business hours on `date`
    #[instrument(skip(self))]
    pub async fn get_before_hours_deploys(&self, date: NaiveDate) -> Result<Vec<Document>> {
        self.production_deploys_in(&self.before_hours_window(date)?).await
    }

    /// Run every query for `date` and assemble the statistics
    #[instrument(skip(self))]
    pub async fn build_report(&self, date: NaiveDate) -> Result<Stats> {
        let mut stats = Stats::new(date);

        stats.total = self.get_total_count(date).await?;

        for environment in [Environment::Production, Environment::Development] {
            let deploys = self.get_environment_deploys(date, environment).await?;
            stats.set_environment(environment, deploys);
        }

        let before_hours = self.before_hours_window(date)?;
        let after_hours = self.after_hours_window(date)?;
        let mut off_hours = Vec::new();

        match self.production_deploys_in(&before_hours).await {
            Ok(documents) => off_hours.extend(documents),
            Err(e) => {
                warn!("Before-hours deploys for {} unavailable: {}", date, e);
                stats.off_hours_incomplete = true;
            }
        }

        match self.production_deploys_in(&after_hours).await {
            Ok(documents) => off_hours.extend(documents),
            Err(e) => {
                warn!("After-hours deploys for {} unavailable: {}", date, e);
                stats.off_hours_incomplete = true;
            }
        }

        off_hours.sort_by_key(|doc| doc.timestamp);
        stats.production.after_work = off_hours;

        info!(
            "Report for {}: {} total, {} production, {} development, {} off-hours",
            date,
            stats.total,
            stats.production.total,
            stats.development.total,
            stats.production.after_work.len()
        );

        Ok(stats)
    }
}
