//! Configuration management for the deploy notifier

use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use reqwest::Url;
use std::env;
use std::time::Duration;

/// Local business-hours window used to classify off-hours deploys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            end: NaiveTime::from_hms_opt(21, 0, 0).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Elasticsearch endpoints, tried in order
    pub elasticsearch_urls: Vec<String>,

    /// Prefix of the daily deploy indices (`{prefix}-YYYY.MM.DD`)
    pub index_prefix: String,

    /// Secondary Kibana index, carried for compatibility
    pub kibana_index: Option<String>,

    /// Chat webhook receiving the report
    pub webhook_url: String,

    /// Channel the report is posted to
    pub channel: String,

    /// Display name of the message sender
    pub sender_name: String,

    /// Timezone the report is rendered and bucketed in
    pub utc_offset: FixedOffset,

    /// Business hours in the report timezone
    pub business_hours: BusinessHours,

    /// Overall deadline for all search queries of one run
    pub query_timeout: Duration,

    /// Timeout of a single HTTP request
    pub http_timeout: Duration,

    /// Ping the search endpoints before querying
    pub healthcheck: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            elasticsearch_urls: vec!["http://localhost:9200".to_string()],
            index_prefix: "deploys".to_string(),
            kibana_index: None,
            webhook_url: String::new(),
            channel: String::new(),
            sender_name: "deploy-notifier".to_string(),
            utc_offset: FixedOffset::east_opt(7 * 3600).unwrap_or_else(|| Utc.fix()),
            business_hours: BusinessHours::default(),
            query_timeout: Duration::from_secs(60),
            http_timeout: Duration::from_secs(30),
            healthcheck: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(urls) = lookup("ELASTICSEARCH") {
            config.elasticsearch_urls = urls
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Some(index) = lookup("INDEX") {
            config.index_prefix = index;
        }

        if let Some(kibana_index) = lookup("KIBANA_INDEX") {
            if !kibana_index.is_empty() {
                config.kibana_index = Some(kibana_index);
            }
        }

        if let Some(webhook_url) = lookup("SLACK") {
            config.webhook_url = webhook_url;
        }

        if let Some(channel) = lookup("CHANNEL") {
            config.channel = channel;
        }

        if let Some(sender_name) = lookup("SENDER_NAME") {
            config.sender_name = sender_name;
        }

        if let Some(offset) = lookup("REPORT_UTC_OFFSET") {
            config.utc_offset = parse_utc_offset(&offset)?;
        }

        if let Some(start) = lookup("BUSINESS_HOURS_START") {
            config.business_hours.start = parse_clock_time("BUSINESS_HOURS_START", &start)?;
        }

        if let Some(end) = lookup("BUSINESS_HOURS_END") {
            config.business_hours.end = parse_clock_time("BUSINESS_HOURS_END", &end)?;
        }

        if let Some(timeout) = lookup("QUERY_TIMEOUT_SECONDS") {
            config.query_timeout = parse_seconds("QUERY_TIMEOUT_SECONDS", &timeout)?;
        }

        if let Some(timeout) = lookup("HTTP_TIMEOUT_SECONDS") {
            config.http_timeout = parse_seconds("HTTP_TIMEOUT_SECONDS", &timeout)?;
        }

        if let Some(healthcheck) = lookup("ELASTICSEARCH_HEALTHCHECK") {
            config.healthcheck = healthcheck.to_lowercase() == "true";
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.elasticsearch_urls.is_empty() {
            return Err("at least one elasticsearch endpoint must be specified".to_string());
        }

        for url in &self.elasticsearch_urls {
            check_http_url("elasticsearch endpoint", url)?;
        }

        if self.index_prefix.is_empty() {
            return Err("index_prefix cannot be empty".to_string());
        }

        if self.webhook_url.is_empty() {
            return Err("webhook_url cannot be empty".to_string());
        }
        check_http_url("webhook_url", &self.webhook_url)?;

        if self.channel.is_empty() {
            return Err("channel cannot be empty".to_string());
        }

        if self.sender_name.is_empty() {
            return Err("sender_name cannot be empty".to_string());
        }

        if self.business_hours.start >= self.business_hours.end {
            return Err(format!(
                "business hours start {} must be before end {}",
                self.business_hours.start.format("%H:%M"),
                self.business_hours.end.format("%H:%M")
            ));
        }

        if self.query_timeout.is_zero() {
            return Err("query_timeout must be greater than 0".to_string());
        }

        if self.http_timeout.is_zero() {
            return Err("http_timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

fn check_http_url(what: &str, value: &str) -> Result<(), String> {
    let url = Url::parse(value).map_err(|e| format!("invalid {} '{}': {}", what, value, e))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(format!("invalid {} '{}': unsupported scheme {}", what, value, scheme)),
    }
}

fn parse_seconds(key: &str, value: &str) -> Result<Duration, String> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| format!("{} must be a number of seconds, got '{}': {}", key, value, e))
}

fn parse_clock_time(key: &str, value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|e| format!("{} must be HH:MM, got '{}': {}", key, value, e))
}

/// Parse `Z`, `UTC`, `+HH`, `+HHMM` or `+HH:MM` into a fixed offset
pub fn parse_utc_offset(value: &str) -> Result<FixedOffset, String> {
    let value = value.trim();
    let invalid = || format!("invalid UTC offset '{}', expected e.g. +07:00", value);

    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return Ok(Utc.fix());
    }

    let (sign, rest) = match value.chars().next() {
        Some('+') => (1, &value[1..]),
        Some('-') => (-1, &value[1..]),
        _ => return Err(invalid()),
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse::<i32>().map_err(|_| invalid())?, 0),
        4 => (
            digits[..2].parse::<i32>().map_err(|_| invalid())?,
            digits[2..].parse::<i32>().map_err(|_| invalid())?,
        ),
        _ => return Err(invalid()),
    };

    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn valid_pairs() -> Vec<(&'static str, &'static str)> {
        vec![
            ("ELASTICSEARCH", "http://es-1:9200, http://es-2:9200"),
            ("INDEX", "deploy"),
            ("SLACK", "https://hooks.example.com/services/T000/B000/XXX"),
            ("CHANNEL", "#deploys"),
        ]
    }

    #[test]
    fn test_from_lookup_reads_all_keys() {
        let mut pairs = valid_pairs();
        pairs.push(("KIBANA_INDEX", ".kibana"));
        pairs.push(("SENDER_NAME", "Maxim"));
        pairs.push(("REPORT_UTC_OFFSET", "+03:00"));
        pairs.push(("BUSINESS_HOURS_START", "08:30"));
        pairs.push(("BUSINESS_HOURS_END", "20:00"));
        pairs.push(("QUERY_TIMEOUT_SECONDS", "15"));
        pairs.push(("ELASTICSEARCH_HEALTHCHECK", "false"));

        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();

        assert_eq!(
            config.elasticsearch_urls,
            vec!["http://es-1:9200".to_string(), "http://es-2:9200".to_string()]
        );
        assert_eq!(config.index_prefix, "deploy");
        assert_eq!(config.kibana_index.as_deref(), Some(".kibana"));
        assert_eq!(config.sender_name, "Maxim");
        assert_eq!(config.utc_offset.local_minus_utc(), 3 * 3600);
        assert_eq!(
            config.business_hours.start,
            NaiveTime::from_hms_opt(8, 30, 0).unwrap()
        );
        assert_eq!(config.query_timeout, Duration::from_secs(15));
        assert!(!config.healthcheck);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&valid_pairs())).unwrap();

        assert_eq!(config.utc_offset.local_minus_utc(), 7 * 3600);
        assert_eq!(config.business_hours, BusinessHours::default());
        assert_eq!(config.query_timeout, Duration::from_secs(60));
        assert!(config.healthcheck);
        assert!(config.kibana_index.is_none());
    }

    #[test]
    fn test_missing_webhook_is_rejected() {
        let config = Config::from_lookup(lookup_from(&[("CHANNEL", "#deploys")])).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("webhook_url"));
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        let mut pairs = valid_pairs();
        pairs[0] = ("ELASTICSEARCH", "es-1:9200");
        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_business_hours_rejected() {
        let mut pairs = valid_pairs();
        pairs.push(("BUSINESS_HOURS_START", "22:00"));
        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("business hours"));
    }

    #[test]
    fn test_unparseable_values_fail_loading() {
        let mut pairs = valid_pairs();
        pairs.push(("QUERY_TIMEOUT_SECONDS", "soon"));
        assert!(Config::from_lookup(lookup_from(&pairs)).is_err());

        let mut pairs = valid_pairs();
        pairs.push(("BUSINESS_HOURS_END", "9pm"));
        assert!(Config::from_lookup(lookup_from(&pairs)).is_err());
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("+07:00").unwrap().local_minus_utc(), 25200);
        assert_eq!(parse_utc_offset("-0330").unwrap().local_minus_utc(), -12600);
        assert_eq!(parse_utc_offset("+5").unwrap().local_minus_utc(), 18000);
        assert_eq!(parse_utc_offset("UTC").unwrap().local_minus_utc(), 0);
        assert!(parse_utc_offset("Asia/Bangkok").is_err());
        assert!(parse_utc_offset("+25:00").is_err());
    }
}
