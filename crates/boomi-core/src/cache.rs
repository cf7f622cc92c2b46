// crates/boomi-core/src/cache.rs
use std::collections::{BTreeMap, BTreeSet, HashMap};

use boomi_parser::Row;
use tracing::debug;

pub const ANOMALY_KEY_FIELD: &str = "anomaly_key";

/// Canonical lookup key: each part trimmed and lowercased, joined with `|`.
pub fn identity_key<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(|part| part.as_ref().trim().to_lowercase())
        .collect::<Vec<_>>()
        .join("|")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// Keep every distinct row seen for a key.
    MergeIntoSet,
    /// Last row wins.
    Overwrite,
    /// First row wins; later rows are returned as anomalies.
    FlagAnomaly,
}

#[derive(Debug)]
pub struct CacheBuilder {
    name: String,
    policy: CollisionPolicy,
    entries: HashMap<String, Vec<Row>>,
    anomalies: Vec<Row>,
}

impl CacheBuilder {
    pub fn new(name: impl Into<String>, policy: CollisionPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            entries: HashMap::new(),
            anomalies: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insert(&mut self, key: String, row: Row) {
        let entry = self.entries.entry(key.clone()).or_default();
        match self.policy {
            CollisionPolicy::MergeIntoSet => {
                if !entry.contains(&row) {
                    entry.push(row);
                }
            }
            CollisionPolicy::Overwrite => {
                entry.clear();
                entry.push(row);
            }
            CollisionPolicy::FlagAnomaly => {
                if entry.is_empty() {
                    entry.push(row);
                } else {
                    debug!(cache = %self.name, key = %key, "duplicate key flagged");
                    self.anomalies.push(row.with(ANOMALY_KEY_FIELD, key));
                }
            }
        }
    }

    pub fn finish(self) -> BuiltCache {
        BuiltCache {
            cache: LookupCache {
                name: self.name,
                policy: self.policy,
                entries: self.entries,
            },
            anomalies: self.anomalies,
        }
    }
}

#[derive(Debug)]
pub struct BuiltCache {
    pub cache: LookupCache,
    pub anomalies: Vec<Row>,
}

/// Immutable key → rows index produced by a cache phase.
#[derive(Debug, Clone)]
pub struct LookupCache {
    name: String,
    policy: CollisionPolicy,
    entries: HashMap<String, Vec<Row>>,
}

impl LookupCache {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> &[Row] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first(&self, key: &str) -> Option<&Row> {
        self.get(key).first()
    }

    /// Distinct non-blank renderings of `field` across every row under `key`.
    pub fn values(&self, key: &str, field: &str) -> BTreeSet<String> {
        self.get(key)
            .iter()
            .filter_map(|row| row.get(field))
            .filter(|value| !value.is_blank())
            .map(|value| value.to_string())
            .collect()
    }
}

/// The caches of a run, handed to the main phase once every cache phase
/// has finished.
#[derive(Debug, Clone, Default)]
pub struct CacheSet {
    caches: BTreeMap<String, LookupCache>,
}

impl CacheSet {
    pub fn insert(&mut self, cache: LookupCache) {
        self.caches.insert(cache.name.clone(), cache);
    }

    pub fn get(&self, name: &str) -> Option<&LookupCache> {
        self.caches.get(name)
    }

    /// Rows for `key` in cache `name`; empty when either is unknown.
    pub fn lookup(&self, name: &str, key: &str) -> &[Row] {
        self.get(name).map(|cache| cache.get(key)).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.caches.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn badge(id: &str) -> Row {
        Row::new().with("badge_id", id)
    }

    #[test]
    fn identity_key_normalises_parts() {
        assert_eq!(identity_key(&[" Doe ", "JANE"]), "doe|jane");
        assert_eq!(identity_key(&[String::from("Smith")]), "smith");
    }

    #[test]
    fn merge_keeps_distinct_rows() {
        let mut builder = CacheBuilder::new("badges", CollisionPolicy::MergeIntoSet);
        builder.insert("doe|jane".into(), badge("50066"));
        builder.insert("doe|jane".into(), badge("7"));
        builder.insert("doe|jane".into(), badge("7"));
        let built = builder.finish();

        let ids = built.cache.values("doe|jane", "badge_id");
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["50066", "7"]);
        assert!(built.anomalies.is_empty());
    }

    #[test]
    fn overwrite_keeps_last() {
        let mut builder = CacheBuilder::new("desks", CollisionPolicy::Overwrite);
        builder.insert("1001".into(), Row::new().with("desk", "SF101"));
        builder.insert("1001".into(), Row::new().with("desk", "SF102"));
        let cache = builder.finish().cache;
        assert_eq!(cache.get("1001").len(), 1);
        assert_eq!(cache.first("1001").unwrap().text("desk"), "SF102");
    }

    #[test]
    fn flag_anomaly_keeps_first_and_reports_rest() {
        let mut builder = CacheBuilder::new("accounts", CollisionPolicy::FlagAnomaly);
        builder.insert("222".into(), Row::new().with("account_name", "prod"));
        builder.insert("222".into(), Row::new().with("account_name", "shadow"));
        let built = builder.finish();

        assert_eq!(built.cache.first("222").unwrap().text("account_name"), "prod");
        assert_eq!(built.anomalies.len(), 1);
        assert_eq!(built.anomalies[0].text(ANOMALY_KEY_FIELD), "222");
    }

    #[test]
    fn cache_set_lookup_of_unknown_is_empty() {
        let mut caches = CacheSet::default();
        let mut builder = CacheBuilder::new("dates", CollisionPolicy::Overwrite);
        builder.insert("2016-09-01".into(), Row::new().with("date_sk", 20160901_i64));
        caches.insert(builder.finish().cache);

        assert_eq!(caches.lookup("dates", "2016-09-01").len(), 1);
        assert!(caches.lookup("dates", "2016-09-02").is_empty());
        assert!(caches.lookup("nope", "2016-09-01").is_empty());
        assert_eq!(caches.names().collect::<Vec<_>>(), vec!["dates"]);
    }
}
