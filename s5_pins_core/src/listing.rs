//! Filtering and ordering of pin records for list requests.
//!
//! Results are always newest-first. `count` is the number of matching
//! records before `limit` is applied.

use crate::matcher::{TextMatchingStrategy, TimeRange};
use crate::pin::{PinMeta, PinRecord, Status, UnknownStatus};
use crate::Cid;
use chrono::{DateTime, SecondsFormat, Utc};

pub const DEFAULT_LIST_LIMIT: usize = 10;
pub const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Only records pinning one of these CIDs. Empty means any.
    pub cids: Vec<Cid>,
    pub name: Option<String>,
    pub match_strategy: TextMatchingStrategy,
    /// Allowed statuses. Empty means any.
    pub status: Vec<Status>,
    pub before: Option<i64>,
    pub after: Option<i64>,
    pub limit: Option<usize>,
    /// Every entry must be present in the record's metadata.
    pub meta: PinMeta,
}

impl ListQuery {
    pub fn with_name(mut self, name: impl Into<String>, strategy: TextMatchingStrategy) -> Self {
        self.name = Some(name.into());
        self.match_strategy = strategy;
        self
    }

    pub fn with_status(mut self, status: impl IntoIterator<Item = Status>) -> Self {
        self.status = status.into_iter().collect();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn before(mut self, before: i64) -> Self {
        self.before = Some(before);
        self
    }

    pub fn after(mut self, after: i64) -> Self {
        self.after = Some(after);
        self
    }

    /// Page size after applying the default and the hard ceiling.
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }

    pub fn matches(&self, record: &PinRecord) -> bool {
        if !self.cids.is_empty() && !self.cids.contains(&record.pin.cid) {
            return false;
        }
        if let Some(name) = &self.name
            && !self.match_strategy.matches(name, record.pin.name.as_deref())
        {
            return false;
        }
        if !self.status.is_empty() && !self.status.contains(&record.status) {
            return false;
        }
        let range = TimeRange {
            before: self.before,
            after: self.after,
        };
        if !range.contains(record.created) {
            return false;
        }
        self.meta
            .iter()
            .all(|(k, v)| record.pin.meta.get(k) == Some(v))
    }
}

/// Parses a comma separated status allow-list such as `queued,pinning`.
pub fn parse_status_list(input: &str) -> Result<Vec<Status>, UnknownStatus> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListResult<T> {
    pub count: usize,
    pub results: Vec<T>,
}

/// Applies `query` to `records` and returns the total match count together
/// with the newest `limit` matches.
pub fn filter_records(
    records: impl IntoIterator<Item = PinRecord>,
    query: &ListQuery,
) -> ListResult<PinRecord> {
    let mut results: Vec<PinRecord> = records.into_iter().filter(|r| query.matches(r)).collect();
    let count = results.len();
    results.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.id.cmp(&a.id)));
    results.truncate(query.effective_limit());
    ListResult { count, results }
}

/// Formats a millisecond timestamp as RFC 3339 with millisecond precision.
pub fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(input: &str) -> Result<i64, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(input)?.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin::Pin;

    fn record(id: &str, created: i64, name: Option<&str>, status: Status) -> PinRecord {
        let cid =
            Cid::parse("bafkreibm6jg3ux5qumhcn2b3flc3tyu6dmlb4xa7u5bf44yegnrjhc4yeq").unwrap();
        let mut pin = Pin::new(cid);
        pin.name = name.map(str::to_owned);
        let mut record = PinRecord::new(id.into(), "owner".into(), created, pin);
        record.status = status;
        record
    }

    #[test]
    fn count_ignores_limit_and_results_are_newest_first() {
        let records = (0..25).map(|i| record(&format!("id{i:02}"), i, None, Status::Queued));
        let result = filter_records(records, &ListQuery::default().with_limit(5));
        assert_eq!(result.count, 25);
        let created: Vec<i64> = result.results.iter().map(|r| r.created).collect();
        assert_eq!(created, vec![24, 23, 22, 21, 20]);
    }

    #[test]
    fn default_limit_and_ceiling() {
        assert_eq!(ListQuery::default().effective_limit(), DEFAULT_LIST_LIMIT);
        assert_eq!(
            ListQuery::default().with_limit(5000).effective_limit(),
            MAX_LIST_LIMIT
        );
    }

    #[test]
    fn name_scenarios() {
        let stored_a = vec![record("1", 1, Some("a"), Status::Pinned)];
        let query = ListQuery::default().with_name("A", TextMatchingStrategy::IExact);
        assert_eq!(filter_records(stored_a, &query).count, 1);

        let stored_abc = vec![record("1", 1, Some("abc"), Status::Pinned)];
        let partial = ListQuery::default().with_name("a", TextMatchingStrategy::Partial);
        assert_eq!(filter_records(stored_abc.clone(), &partial).count, 1);
        let exact = ListQuery::default().with_name("x", TextMatchingStrategy::Exact);
        assert_eq!(filter_records(stored_abc, &exact).count, 0);
    }

    #[test]
    fn status_and_time_filters() {
        let records = vec![
            record("1", 10, None, Status::Queued),
            record("2", 20, None, Status::Pinning),
            record("3", 30, None, Status::Pinned),
            record("4", 40, None, Status::Failed),
        ];
        let query = ListQuery::default().with_status(parse_status_list("queued,pinned").unwrap());
        let ids: Vec<_> = filter_records(records.clone(), &query)
            .results
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["3", "1"]);

        let query = ListQuery::default().before(40).after(10);
        let ids: Vec<_> = filter_records(records, &query)
            .results
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["3", "2"]);
    }

    #[test]
    fn meta_filter_requires_every_entry() {
        let mut tagged = record("1", 1, None, Status::Pinned);
        tagged.pin.meta.insert("app".into(), "x".into());
        tagged.pin.meta.insert("env".into(), "prod".into());
        let plain = record("2", 2, None, Status::Pinned);

        let mut query = ListQuery::default();
        query.meta.insert("app".into(), "x".into());
        let result = filter_records(vec![tagged.clone(), plain], &query);
        assert_eq!(result.count, 1);

        query.meta.insert("env".into(), "dev".into());
        assert_eq!(filter_records(vec![tagged], &query).count, 0);
    }

    #[test]
    fn bad_status_list() {
        assert!(parse_status_list("queued,done").is_err());
        assert_eq!(parse_status_list("").unwrap(), vec![]);
    }

    #[test]
    fn timestamps() {
        let formatted = format_timestamp(1_700_000_000_123);
        assert_eq!(formatted, "2023-11-14T22:13:20.123Z");
        assert_eq!(parse_timestamp(&formatted).unwrap(), 1_700_000_000_123);
        assert_eq!(
            parse_timestamp("2023-11-14T23:13:20.123+01:00").unwrap(),
            1_700_000_000_123
        );
    }
}
