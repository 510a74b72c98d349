//! Reader configuration.

use avrorpc_schema::{Name, Record, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Builds the runtime value for a decoded record from its fields.
pub type RecordFactory = Arc<dyn Fn(&Name, BTreeMap<String, Value>) -> Value + Send + Sync>;

/// Registry deciding how decoded records are represented.
///
/// Records with a registered factory are built by it. Everything else
/// becomes a [`Value::Map`], or a [`Value::Record`] tagged with its fullname
/// when typed records are enabled.
#[derive(Clone, Default)]
pub struct RecordInstantiator {
    factories: HashMap<String, RecordFactory>,
    typed_records: bool,
}

impl RecordInstantiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for the record with the given fullname.
    pub fn register<F>(&mut self, fullname: impl Into<String>, factory: F)
    where
        F: Fn(&Name, BTreeMap<String, Value>) -> Value + Send + Sync + 'static,
    {
        self.factories.insert(fullname.into(), Arc::new(factory));
    }

    pub fn is_registered(&self, fullname: &str) -> bool {
        self.factories.contains_key(fullname)
    }

    pub fn instantiate(&self, name: &Name, fields: BTreeMap<String, Value>) -> Value {
        match self.factories.get(name.fullname()) {
            Some(factory) => factory(name, fields),
            None if self.typed_records => Value::Record(Record::from_fields(name.fullname(), fields)),
            None => Value::Map(fields),
        }
    }
}

impl fmt::Debug for RecordInstantiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("RecordInstantiator")
            .field("factories", &names)
            .field("typed_records", &self.typed_records)
            .finish()
    }
}

/// Options for [`crate::DatumReader`].
#[derive(Debug, Clone, Default)]
pub struct ReaderConfig {
    instantiator: RecordInstantiator,
}

impl ReaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes unregistered records as [`Value::Record`] instead of maps.
    pub fn typed_records(mut self, enabled: bool) -> Self {
        self.instantiator.typed_records = enabled;
        self
    }

    pub fn with_instantiator(mut self, instantiator: RecordInstantiator) -> Self {
        let typed = self.instantiator.typed_records;
        self.instantiator = instantiator;
        self.instantiator.typed_records |= typed;
        self
    }

    pub fn instantiator(&self) -> &RecordInstantiator {
        &self.instantiator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> BTreeMap<String, Value> {
        let mut m = BTreeMap::new();
        m.insert("x".to_string(), Value::Int(1));
        m
    }

    #[test]
    fn test_default_is_map() {
        let name = Name::new("P", Some("ns"), None).unwrap();
        let value = ReaderConfig::new().instantiator().instantiate(&name, fields());
        assert_eq!(value, Value::Map(fields()));
    }

    #[test]
    fn test_typed_records() {
        let name = Name::new("P", Some("ns"), None).unwrap();
        let config = ReaderConfig::new().typed_records(true);
        let value = config.instantiator().instantiate(&name, fields());
        assert_eq!(value, Value::Record(Record::from_fields("ns.P", fields())));
    }

    #[test]
    fn test_registered_factory() {
        let mut instantiator = RecordInstantiator::new();
        instantiator.register("ns.P", |_, f| Value::Int(f.len() as i32));
        assert!(instantiator.is_registered("ns.P"));

        let config = ReaderConfig::new().with_instantiator(instantiator);
        let name = Name::new("P", Some("ns"), None).unwrap();
        assert_eq!(config.instantiator().instantiate(&name, fields()), Value::Int(1));

        let other = Name::new("Q", Some("ns"), None).unwrap();
        assert_eq!(
            config.instantiator().instantiate(&other, fields()),
            Value::Map(fields())
        );
    }
}
