//! One run of the daily deploy notification

use crate::config::Config;
use crate::deploys::Stats;
use crate::errors::{NotifierError, Result};
use crate::notifier::WebhookNotifier;
use crate::report::{ReportBuilder, report_date};
use crate::search::{ElasticClient, SearchBackend};
use chrono::{DateTime, NaiveDate, Utc};
use tokio::time::timeout;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

/// What to do with the rendered report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Post to the webhook
    Post,
    /// Only render it
    DryRun,
}

/// Builds a report and delivers it
pub struct NotificationJob {
    config: Config,
    reporter: ReportBuilder,
    notifier: WebhookNotifier,
    run_id: String,
}

impl NotificationJob {
    /// Validate `config` and connect to the search backend
    pub async fn new(config: Config) -> Result<Self> {
        config.validate().map_err(NotifierError::Config)?;
        let client = ElasticClient::connect(&config).await?;
        Self::with_backend(config, Box::new(client))
    }

    /// Build a job on top of an existing search backend
    pub fn with_backend(config: Config, backend: Box<dyn SearchBackend>) -> Result<Self> {
        config.validate().map_err(NotifierError::Config)?;

        if let Some(kibana_index) = &config.kibana_index {
            info!("Kibana index {} configured; not used for the report", kibana_index);
        }

        let reporter = ReportBuilder::new(backend, &config);
        let notifier = WebhookNotifier::from_config(&config)?;

        Ok(Self {
            config,
            reporter,
            notifier,
            run_id: Uuid::new_v4().to_string(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Yesterday in the report timezone
    pub fn default_report_date(&self, now: DateTime<Utc>) -> NaiveDate {
        report_date(now, self.config.utc_offset)
    }

    /// Build the statistics for `date` within the query deadline
    pub async fn build_report(&self, date: NaiveDate) -> Result<Stats> {
        timeout(self.config.query_timeout, self.reporter.build_report(date))
            .await
            .map_err(|_| {
                NotifierError::Timeout(format!(
                    "report queries for {} exceeded {}s",
                    date,
                    self.config.query_timeout.as_secs()
                ))
            })?
    }

    /// Build the report for `date` and deliver it, returning the rendered text
    ///
    /// A failed report aborts the run before anything is posted.
    pub async fn run(&self, date: NaiveDate, mode: DeliveryMode) -> Result<String> {
        let span = info_span!("notification_run", run_id = %self.run_id, %date);

        async {
            info!("Building deploy report for {}", date);
            let stats = self.build_report(date).await?;

            if stats.off_hours_incomplete {
                warn!("Off-hours section is incomplete for {}", date);
            }

            let payload = self
                .notifier
                .payload(&stats, &self.config.channel, &self.config.sender_name);

            match mode {
                DeliveryMode::Post => self.notifier.send(&payload).await?,
                DeliveryMode::DryRun => info!("Dry run, report not posted"),
            }

            Ok::<String, NotifierError>(payload.text)
        }
        .instrument(span)
        .await
    }
}
