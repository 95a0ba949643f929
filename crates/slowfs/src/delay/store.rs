//! Live delay configuration shared between filesystem operations and the
//! control plane.
//!
//! # Publication
//!
//! Every update builds a fresh [`ConfigTable`] and publishes it with a single
//! pointer swap. Readers load the current `Arc` without taking a lock, so a
//! filesystem operation never waits on the control plane and never observes a
//! half-written table. Writers serialize on a mutex so concurrent updates to
//! different categories cannot lose each other.

use arc_swap::ArcSwap;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::model::{DelayModel, OperationCategory};
use crate::error::{Error, Result};

/// One [`DelayModel`] per [`OperationCategory`], always fully populated.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConfigTable {
    models: [DelayModel; OperationCategory::COUNT],
}

impl ConfigTable {
    /// Table with the no-op model for every category.
    pub fn new() -> Self {
        Self::default()
    }

    /// Model for `category`.
    pub fn get(&self, category: OperationCategory) -> DelayModel {
        self.models[category.index()]
    }

    /// Replace the model for `category`.
    pub fn set(&mut self, category: OperationCategory, model: DelayModel) {
        self.models[category.index()] = model;
    }

    /// Builder-style [`ConfigTable::set`].
    pub fn with(mut self, category: OperationCategory, model: DelayModel) -> Self {
        self.set(category, model);
        self
    }

    /// Iterate over `(category, model)` in table order.
    pub fn iter(&self) -> impl Iterator<Item = (OperationCategory, DelayModel)> + '_ {
        OperationCategory::ALL
            .iter()
            .map(move |category| (*category, self.get(*category)))
    }

    /// Validate every entry, naming the first offending category.
    pub fn validate(&self) -> Result<()> {
        for (category, model) in self.iter() {
            model.validate().map_err(|err| match err {
                Error::InvalidConfig(msg) => Error::InvalidConfig(format!("{category}: {msg}")),
                other => other,
            })?;
        }
        Ok(())
    }

    /// Parse and validate a JSON table.
    ///
    /// Missing categories take the no-op model; unknown categories are
    /// rejected.
    pub fn from_json(json: &str) -> Result<Self> {
        let table: ConfigTable = serde_json::from_str(json)
            .map_err(|e| Error::invalid_config(format!("malformed config table: {e}")))?;
        table.validate()?;
        Ok(table)
    }
}

impl Serialize for ConfigTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(OperationCategory::COUNT))?;
        for (category, model) in self.iter() {
            map.serialize_entry(&category, &model)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ConfigTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(TableVisitor)
    }
}

struct TableVisitor;

impl<'de> Visitor<'de> for TableVisitor {
    type Value = ConfigTable;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map from operation category to delay model")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<ConfigTable, A::Error> {
        let mut table = ConfigTable::default();
        let mut seen = [false; OperationCategory::COUNT];
        while let Some(name) = map.next_key::<Cow<'de, str>>()? {
            let category = name
                .parse::<OperationCategory>()
                .map_err(|_| de::Error::custom(format!("unknown operation category: {name}")))?;
            if std::mem::replace(&mut seen[category.index()], true) {
                return Err(de::Error::custom(format!("duplicate operation category: {name}")));
            }
            table.set(category, map.next_value()?);
        }
        Ok(table)
    }
}

/// Process-wide holder of the current [`ConfigTable`].
pub struct ConfigStore {
    current: ArcSwap<ConfigTable>,
    writer: Mutex<()>,
    enabled: AtomicBool,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    /// Store with the no-op model for every category.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(ConfigTable::default()),
            writer: Mutex::new(()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Store seeded with `table`.
    pub fn with_table(table: ConfigTable) -> Result<Self> {
        table.validate()?;
        let store = Self::new();
        store.current.store(Arc::new(table));
        Ok(store)
    }

    /// Current table. The returned value never changes under the caller.
    pub fn snapshot(&self) -> Arc<ConfigTable> {
        self.current.load_full()
    }

    /// Copy of the current model for `category`.
    pub fn get(&self, category: OperationCategory) -> DelayModel {
        self.current.load().get(category)
    }

    /// Replace one category.
    ///
    /// # Errors
    /// - `InvalidConfig` if `model` fails validation; the store is unchanged.
    pub fn set_category(&self, category: OperationCategory, model: DelayModel) -> Result<()> {
        model.validate()?;
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = **self.current.load();
        next.set(category, model);
        self.current.store(Arc::new(next));
        tracing::debug!(%category, ?model, "delay model updated");
        Ok(())
    }

    /// Replace the whole table.
    ///
    /// # Errors
    /// - `InvalidConfig` if any entry fails validation; the store is unchanged.
    pub fn set_all(&self, table: ConfigTable) -> Result<()> {
        table.validate()?;
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.current.store(Arc::new(table));
        tracing::debug!("config table replaced");
        Ok(())
    }

    /// Publish the all-default table.
    pub fn reset(&self) {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.current.store(Arc::new(ConfigTable::default()));
        tracing::debug!("config table reset");
    }

    /// Turn injection on or off without discarding the table.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        tracing::debug!(enabled, "delay injection toggled");
    }

    /// Whether injection is active.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::ErrorCode;
    use pretty_assertions::assert_eq;
    use std::thread;

    #[test]
    fn test_new_store_is_all_noop() {
        let store = ConfigStore::new();
        let table = store.snapshot();
        assert_eq!(table.iter().count(), OperationCategory::COUNT);
        assert!(table.iter().all(|(_, model)| model.is_noop()));
        assert!(store.is_enabled());
    }

    #[test]
    fn test_set_category_replaces_only_that_entry() {
        let store = ConfigStore::new();
        let model = DelayModel::fixed(0.2);
        store
            .set_category(OperationCategory::Read, model)
            .expect("valid model");

        assert_eq!(store.get(OperationCategory::Read), model);
        for (category, entry) in store.snapshot().iter() {
            if category != OperationCategory::Read {
                assert_eq!(entry, DelayModel::default());
            }
        }
    }

    #[test]
    fn test_invalid_update_leaves_store_unchanged() {
        let store = ConfigStore::new();
        let before = DelayModel::range(0.1, 0.2);
        store
            .set_category(OperationCategory::Write, before)
            .expect("valid model");

        let err = store
            .set_category(OperationCategory::Write, DelayModel::range(0.3, 0.1))
            .expect_err("min > max");
        assert!(matches!(err, Error::InvalidConfig(_)));
        let err = store
            .set_category(
                OperationCategory::Write,
                DelayModel::new().with_failure(2.0, ErrorCode::Io),
            )
            .expect_err("probability > 1");
        assert!(matches!(err, Error::InvalidConfig(_)));

        assert_eq!(store.get(OperationCategory::Write), before);
    }

    #[test]
    fn test_set_all_is_all_or_nothing() {
        let store = ConfigStore::new();
        let mut table = ConfigTable::new().with(OperationCategory::Open, DelayModel::fixed(1.0));
        table.set(OperationCategory::Mknod, DelayModel::range(2.0, 1.0));

        let err = store.set_all(table).expect_err("mknod entry is invalid");
        assert!(err.to_string().contains("mknod"));
        assert_eq!(store.get(OperationCategory::Open), DelayModel::default());

        table.set(OperationCategory::Mknod, DelayModel::default());
        store.set_all(table).expect("valid table");
        assert_eq!(*store.snapshot(), table);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let store = ConfigStore::new();
        let before = store.snapshot();
        store
            .set_category(OperationCategory::Rename, DelayModel::fixed(3.0))
            .expect("valid model");
        assert_eq!(before.get(OperationCategory::Rename), DelayModel::default());
        assert_eq!(store.get(OperationCategory::Rename), DelayModel::fixed(3.0));
    }

    #[test]
    fn test_reset_and_enable_switch() {
        let store = ConfigStore::new();
        store
            .set_category(OperationCategory::Read, DelayModel::fixed(1.0))
            .expect("valid model");
        store.set_enabled(false);
        assert!(!store.is_enabled());
        assert_eq!(store.get(OperationCategory::Read), DelayModel::fixed(1.0));

        store.reset();
        assert_eq!(*store.snapshot(), ConfigTable::default());
    }

    #[test]
    fn test_table_json_is_fully_populated() {
        let table = ConfigTable::new().with(OperationCategory::Read, DelayModel::fixed(0.5));
        let json = serde_json::to_value(table).expect("serialize");
        let object = json.as_object().expect("object");
        assert_eq!(object.len(), OperationCategory::COUNT);
        assert_eq!(object["read"]["minDelaySeconds"], 0.5);
        assert_eq!(object["statfs"]["maxDelaySeconds"], 0.0);
    }

    #[test]
    fn test_table_from_json_partial_and_unknown() {
        let table = ConfigTable::from_json(r#"{"write": {"maxDelaySeconds": 1.5}}"#)
            .expect("partial table");
        assert_eq!(table.get(OperationCategory::Write), DelayModel::range(0.0, 1.5));
        assert_eq!(table.get(OperationCategory::Read), DelayModel::default());

        let err = ConfigTable::from_json(r#"{"create": {}}"#).expect_err("unknown category");
        assert!(err.to_string().contains("create"));

        let err = ConfigTable::from_json(r#"{"read": {"minDelaySeconds": 2, "maxDelaySeconds": 1}}"#)
            .expect_err("invalid range");
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_table_from_json_rejects_duplicate_category() {
        let err = ConfigTable::from_json(
            r#"{"read": {"maxDelaySeconds": 1}, "read": {"maxDelaySeconds": 2}}"#,
        )
        .expect_err("duplicate category");
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(err.to_string().contains("duplicate operation category: read"));

        assert!(ConfigTable::from_json("[]").is_err());
    }

    #[test]
    fn test_concurrent_writers_and_readers_never_tear() {
        let store = Arc::new(ConfigStore::new());
        let rounds = 200;

        let writers: Vec<_> = OperationCategory::ALL
            .iter()
            .copied()
            .map(|category| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for round in 1..=rounds {
                        let seconds = round as f64;
                        store
                            .set_category(category, DelayModel::fixed(seconds))
                            .expect("valid model");
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let table = store.snapshot();
                        assert_eq!(table.iter().count(), OperationCategory::COUNT);
                        for (_, model) in table.iter() {
                            assert_eq!(model.min_delay_seconds, model.max_delay_seconds);
                            assert!(model.validate().is_ok());
                        }
                    }
                })
            })
            .collect();

        for handle in writers.into_iter().chain(readers) {
            handle.join().expect("thread panicked");
        }

        // No writer lost another writer's final update.
        for (_, model) in store.snapshot().iter() {
            assert_eq!(model, DelayModel::fixed(rounds as f64));
        }
    }
}
