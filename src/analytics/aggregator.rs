//! Stats queries over recorded visit events.
//!
//! Events are loaded for a time window and reduced into frequency tables.
//! Tables are sorted by count, descending; equal counts keep first-seen order
//! so identical inputs always produce identical output.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ShortenerError;
use crate::models::{Event, UNKNOWN};
use crate::storage::Storage;

const HOUR_MILLIS: i64 = 60 * 60 * 1000;
const DAY_MILLIS: i64 = 24 * HOUR_MILLIS;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "24h")]
    Day,
    #[default]
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::Day => "24h",
            TimeRange::Week => "7d",
            TimeRange::Month => "30d",
            TimeRange::Quarter => "90d",
        }
    }

    pub fn duration_millis(&self) -> i64 {
        match self {
            TimeRange::Day => DAY_MILLIS,
            TimeRange::Week => 7 * DAY_MILLIS,
            TimeRange::Month => 30 * DAY_MILLIS,
            TimeRange::Quarter => 90 * DAY_MILLIS,
        }
    }

    /// Inclusive `(since, until)` window ending at `now`.
    pub fn window(&self, now: i64) -> (i64, i64) {
        (now - self.duration_millis(), now)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "24h" => Ok(TimeRange::Day),
            "7d" => Ok(TimeRange::Week),
            "30d" => Ok(TimeRange::Month),
            "90d" => Ok(TimeRange::Quarter),
            other => Err(format!(
                "invalid time range '{other}' (expected 24h, 7d, 30d or 90d)"
            )),
        }
    }
}

/// Whose events a stats query covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsScope {
    Url(String),
    Owner(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub key: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    /// UTC calendar day, `YYYY-MM-DD`.
    pub date: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub time_range: TimeRange,
    pub total_visits: u64,
    /// Distinct non-empty IP addresses.
    pub unique_visitors: u64,
    pub countries: Vec<Bucket>,
    pub cities: Vec<Bucket>,
    pub regions: Vec<Bucket>,
    pub timezones: Vec<Bucket>,
    pub browsers: Vec<Bucket>,
    pub operating_systems: Vec<Bucket>,
    pub devices: Vec<Bucket>,
    /// Keyed by referrer host.
    pub referrers: Vec<Bucket>,
    pub sources: Vec<Bucket>,
    pub mediums: Vec<Bucket>,
    pub campaigns: Vec<Bucket>,
    pub time_series: Vec<DailyCount>,
}

#[derive(Default)]
struct FrequencyTable {
    index: HashMap<String, usize>,
    buckets: Vec<Bucket>,
}

impl FrequencyTable {
    fn add(&mut self, key: &str) {
        match self.index.get(key) {
            Some(&i) => self.buckets[i].count += 1,
            None => {
                self.index.insert(key.to_string(), self.buckets.len());
                self.buckets.push(Bucket {
                    key: key.to_string(),
                    count: 1,
                });
            }
        }
    }

    fn add_opt(&mut self, key: Option<&str>) {
        if let Some(key) = key.filter(|k| !k.is_empty()) {
            self.add(key);
        }
    }

    fn into_sorted(self) -> Vec<Bucket> {
        let mut buckets = self.buckets;
        // sort_by is stable: ties stay in first-seen order
        buckets.sort_by(|a, b| b.count.cmp(&a.count));
        buckets
    }
}

fn known(value: &str) -> Option<&str> {
    (!value.is_empty() && value != UNKNOWN).then_some(value)
}

fn city_key(event: &Event) -> String {
    match (known(&event.geo.city), known(&event.geo.country)) {
        (Some(city), Some(country)) => format!("{city}, {country}"),
        (Some(city), None) => city.to_string(),
        (None, Some(country)) => country.to_string(),
        (None, None) => UNKNOWN.to_string(),
    }
}

fn versioned_key(name: &str, version: &str) -> String {
    match (known(name), known(version)) {
        (Some(name), Some(version)) => format!("{name} {version}"),
        _ => name.to_string(),
    }
}

fn referrer_host(referrer: &str) -> Option<String> {
    let referrer = referrer.trim();
    if referrer.is_empty() {
        return None;
    }
    match url::Url::parse(referrer) {
        Ok(url) => url.host_str().map(str::to_string),
        Err(_) => Some(referrer.to_string()),
    }
}

fn day_of(millis: i64) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}

fn zero_filled_days(since: i64, until: i64) -> Vec<(NaiveDate, u64)> {
    let (Some(mut day), Some(last)) = (day_of(since), day_of(until)) else {
        return Vec::new();
    };
    let mut days = Vec::new();
    while day <= last {
        days.push((day, 0));
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    days
}

/// Reduce `events` inside `range` ending at `now` into [`Stats`].
///
/// Events outside the window are ignored. Input order does not matter.
pub fn aggregate(events: &[Event], range: TimeRange, now: i64) -> Stats {
    let (since, until) = range.window(now);

    let mut in_window: Vec<&Event> = events
        .iter()
        .filter(|e| e.occurred_at >= since && e.occurred_at <= until)
        .collect();
    in_window.sort_by_key(|e| (e.occurred_at, e.id));

    let mut visitors = HashSet::new();
    let mut countries = FrequencyTable::default();
    let mut cities = FrequencyTable::default();
    let mut regions = FrequencyTable::default();
    let mut timezones = FrequencyTable::default();
    let mut browsers = FrequencyTable::default();
    let mut operating_systems = FrequencyTable::default();
    let mut devices = FrequencyTable::default();
    let mut referrers = FrequencyTable::default();
    let mut sources = FrequencyTable::default();
    let mut mediums = FrequencyTable::default();
    let mut campaigns = FrequencyTable::default();

    let mut series = zero_filled_days(since, until);
    let first_day = series.first().map(|(day, _)| *day);

    for event in &in_window {
        if !event.ip_address.is_empty() {
            visitors.insert(event.ip_address.as_str());
        }

        countries.add(&event.geo.country);
        cities.add(&city_key(event));
        regions.add(&event.geo.region);
        timezones.add(&event.geo.timezone);

        browsers.add(&versioned_key(
            &event.device.browser,
            &event.device.browser_version,
        ));
        operating_systems.add(&versioned_key(&event.device.os, &event.device.os_version));
        devices.add(&event.device.device_type);

        referrers.add_opt(referrer_host(&event.referrer).as_deref());
        sources.add_opt(event.utm.source.as_deref());
        mediums.add_opt(event.utm.medium.as_deref());
        campaigns.add_opt(event.utm.campaign.as_deref());

        if let (Some(first), Some(day)) = (first_day, day_of(event.occurred_at)) {
            let offset = (day - first).num_days();
            if let Some((_, count)) = usize::try_from(offset).ok().and_then(|i| series.get_mut(i)) {
                *count += 1;
            }
        }
    }

    Stats {
        time_range: range,
        total_visits: in_window.len() as u64,
        unique_visitors: visitors.len() as u64,
        countries: countries.into_sorted(),
        cities: cities.into_sorted(),
        regions: regions.into_sorted(),
        timezones: timezones.into_sorted(),
        browsers: browsers.into_sorted(),
        operating_systems: operating_systems.into_sorted(),
        devices: devices.into_sorted(),
        referrers: referrers.into_sorted(),
        sources: sources.into_sorted(),
        mediums: mediums.into_sorted(),
        campaigns: campaigns.into_sorted(),
        time_series: series
            .into_iter()
            .map(|(day, count)| DailyCount {
                date: day.format("%Y-%m-%d").to_string(),
                count,
            })
            .collect(),
    }
}

/// Answers stats queries from the event store.
pub struct Aggregator {
    storage: Arc<dyn Storage>,
}

impl Aggregator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Stats for one short URL or one owner over `range` ending at `now`.
    ///
    /// A URL scope fails with `NotFound` when the URL does not exist. An owner
    /// without URLs gets empty stats.
    pub async fn query(
        &self,
        scope: &StatsScope,
        range: TimeRange,
        now: i64,
    ) -> Result<Stats, ShortenerError> {
        let (since, until) = range.window(now);

        let events = match scope {
            StatsScope::Url(short_id) => {
                if self.storage.get(short_id).await?.is_none() {
                    return Err(ShortenerError::NotFound);
                }
                self.storage.events_for_url(short_id, since, until).await?
            }
            StatsScope::Owner(owner_id) => {
                self.storage
                    .events_for_owner(owner_id, since, until)
                    .await?
            }
        };

        debug!(scope = ?scope, range = %range, events = events.len(), "Aggregating stats");
        Ok(aggregate(&events, range, now))
    }
}
