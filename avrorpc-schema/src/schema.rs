//! Schema graph types.
//!
//! Named schemas live in a [`Schemata`] arena. Every other schema refers to
//! them through [`Schema::Ref`], a lookup key resolved at use time, so
//! self-referential and mutually recursive records need no cyclic pointers.

use crate::error::SchemaError;
use crate::name::Name;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An Avro schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Array(Box<Schema>),
    Map(Box<Schema>),
    Union(UnionSchema),
    /// Reference to a named schema held in a [`Schemata`].
    Ref(Name),
    /// Anonymous record of message request parameters.
    Request(Vec<Field>),
}

impl Schema {
    /// Returns the primitive schema for a type name.
    pub fn primitive(type_name: &str) -> Option<Schema> {
        match type_name {
            "null" => Some(Schema::Null),
            "boolean" => Some(Schema::Boolean),
            "int" => Some(Schema::Int),
            "long" => Some(Schema::Long),
            "float" => Some(Schema::Float),
            "double" => Some(Schema::Double),
            "bytes" => Some(Schema::Bytes),
            "string" => Some(Schema::String),
            _ => None,
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Schema::Null
                | Schema::Boolean
                | Schema::Int
                | Schema::Long
                | Schema::Float
                | Schema::Double
                | Schema::Bytes
                | Schema::String
        )
    }

    /// Type name of the schema; named references report their fullname.
    pub fn type_name(&self) -> &str {
        match self {
            Schema::Null => "null",
            Schema::Boolean => "boolean",
            Schema::Int => "int",
            Schema::Long => "long",
            Schema::Float => "float",
            Schema::Double => "double",
            Schema::Bytes => "bytes",
            Schema::String => "string",
            Schema::Array(_) => "array",
            Schema::Map(_) => "map",
            Schema::Union(_) => "union",
            Schema::Ref(name) => name.fullname(),
            Schema::Request(_) => "request",
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schema::Array(items) => write!(f, "array<{}>", items),
            Schema::Map(values) => write!(f, "map<{}>", values),
            Schema::Union(union) => {
                f.write_str("[")?;
                for (i, branch) in union.branches().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", branch)?;
                }
                f.write_str("]")
            }
            other => f.write_str(other.type_name()),
        }
    }
}

/// A union of branch schemas.
///
/// Branches never nest another union and never repeat an unnamed type.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionSchema {
    branches: Vec<Schema>,
}

impl UnionSchema {
    pub fn new(branches: Vec<Schema>) -> Result<Self, SchemaError> {
        let mut seen: Vec<&str> = Vec::with_capacity(branches.len());
        for branch in &branches {
            if let Schema::Union(_) = branch {
                return Err(SchemaError::InvalidUnion(
                    "unions may not immediately contain other unions".to_string(),
                ));
            }
            let key = branch.type_name();
            if seen.contains(&key) {
                return Err(SchemaError::InvalidUnion(format!(
                    "duplicate type in union: {}",
                    key
                )));
            }
            seen.push(key);
        }
        Ok(Self { branches })
    }

    pub fn branches(&self) -> &[Schema] {
        &self.branches
    }

    pub fn branch(&self, index: usize) -> Option<&Schema> {
        self.branches.get(index)
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}

/// Sort order of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
    Ignore,
}

impl SortOrder {
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        match s {
            "ascending" => Ok(SortOrder::Ascending),
            "descending" => Ok(SortOrder::Descending),
            "ignore" => Ok(SortOrder::Ignore),
            other => Err(SchemaError::InvalidOrder(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ascending",
            SortOrder::Descending => "descending",
            SortOrder::Ignore => "ignore",
        }
    }
}

/// A record field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub schema: Schema,
    /// Raw JSON default, interpreted against `schema` only when needed.
    pub default: Option<serde_json::Value>,
    /// `None` when the definition did not specify an order.
    pub order: Option<SortOrder>,
    pub doc: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            default: None,
            order: None,
            doc: None,
        }
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

/// A record (or error) schema.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    pub name: Name,
    pub doc: Option<String>,
    pub fields: Vec<Field>,
    /// Declared with `"type": "error"`.
    pub is_error: bool,
}

impl RecordSchema {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// An enum schema.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumSchema {
    pub name: Name,
    pub doc: Option<String>,
    pub symbols: Vec<String>,
}

impl EnumSchema {
    pub fn symbol_index(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }
}

/// A fixed-size byte string schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedSchema {
    pub name: Name,
    pub doc: Option<String>,
    pub size: usize,
}

/// A schema registered under a name.
#[derive(Debug, Clone, PartialEq)]
pub enum NamedSchema {
    Record(RecordSchema),
    Enum(EnumSchema),
    Fixed(FixedSchema),
}

impl NamedSchema {
    pub fn name(&self) -> &Name {
        match self {
            NamedSchema::Record(r) => &r.name,
            NamedSchema::Enum(e) => &e.name,
            NamedSchema::Fixed(f) => &f.name,
        }
    }

    /// Schema kind as written in a definition's `type` attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            NamedSchema::Record(r) if r.is_error => "error",
            NamedSchema::Record(_) => "record",
            NamedSchema::Enum(_) => "enum",
            NamedSchema::Fixed(_) => "fixed",
        }
    }
}

/// Registry of named schemas for one parse.
///
/// A name is reserved before its definition's children are parsed, so a
/// field may refer to the record that contains it. Once reserved, a name
/// can never be redefined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schemata {
    defs: Vec<Option<NamedSchema>>,
    index: HashMap<String, usize>,
}

impl Schemata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a slot for `name`, returning its handle.
    pub fn reserve(&mut self, name: &Name) -> Result<usize, SchemaError> {
        if crate::name::is_primitive_type(name.name()) {
            return Err(SchemaError::ReservedName(name.fullname().to_string()));
        }
        if self.index.contains_key(name.fullname()) {
            return Err(SchemaError::DuplicateName(name.fullname().to_string()));
        }
        let slot = self.defs.len();
        self.defs.push(None);
        self.index.insert(name.fullname().to_string(), slot);
        Ok(slot)
    }

    /// Fills a reserved slot.
    pub fn define(&mut self, slot: usize, schema: NamedSchema) {
        if let Some(entry) = self.defs.get_mut(slot) {
            *entry = Some(schema);
        }
    }

    /// Reserves and defines a schema in one step.
    pub fn register(&mut self, schema: NamedSchema) -> Result<usize, SchemaError> {
        let slot = self.reserve(schema.name())?;
        self.define(slot, schema);
        Ok(slot)
    }

    /// Returns whether `fullname` is reserved, defined or not.
    pub fn contains(&self, fullname: &str) -> bool {
        self.index.contains_key(fullname)
    }

    pub fn get(&self, fullname: &str) -> Option<&NamedSchema> {
        self.index
            .get(fullname)
            .and_then(|&slot| self.defs.get(slot))
            .and_then(Option::as_ref)
    }

    pub fn lookup(&self, name: &Name) -> Option<&NamedSchema> {
        self.get(name.fullname())
    }

    /// Defined schemas in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &NamedSchema> {
        self.defs.iter().filter_map(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

/// A root schema together with the registry its references resolve in.
#[derive(Debug, Clone, PartialEq)]
pub struct AvroSchema {
    root: Schema,
    names: Arc<Schemata>,
}

impl AvroSchema {
    pub fn new(root: Schema, names: Arc<Schemata>) -> Self {
        Self { root, names }
    }

    /// Wraps a schema that contains no named references.
    pub fn anonymous(root: Schema) -> Self {
        Self::new(root, Arc::new(Schemata::new()))
    }

    /// Parses a schema from JSON text.
    pub fn parse(json: &str) -> Result<Self, SchemaError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::parse_value(&value)
    }

    /// Parses a schema from a decoded JSON value.
    pub fn parse_value(value: &serde_json::Value) -> Result<Self, SchemaError> {
        let mut names = Schemata::new();
        let root = crate::parse::Parser::new(&mut names).parse(value, None)?;
        Ok(Self::new(root, Arc::new(names)))
    }

    pub fn root(&self) -> &Schema {
        &self.root
    }

    pub fn names(&self) -> &Arc<Schemata> {
        &self.names
    }

    /// Returns a schema rooted at `root` sharing this registry.
    pub fn with_root(&self, root: Schema) -> Self {
        Self::new(root, Arc::clone(&self.names))
    }

    /// Canonical JSON: named schemas appear in full once, then by name.
    pub fn to_json(&self) -> serde_json::Value {
        crate::canonical::SchemaJsonWriter::new(&self.names).schema_to_json(&self.root, None)
    }

    pub fn is_valid_datum(&self, datum: &Value) -> bool {
        crate::validate::is_valid_datum(&self.root, &self.names, datum)
    }
}

impl fmt::Display for AvroSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        Name::new(s, None, None).unwrap()
    }

    #[test]
    fn test_union_rejects_nested_union() {
        let inner = UnionSchema::new(vec![Schema::Null, Schema::Int]).unwrap();
        let result = UnionSchema::new(vec![Schema::String, Schema::Union(inner)]);
        assert!(matches!(result, Err(SchemaError::InvalidUnion(_))));
    }

    #[test]
    fn test_union_rejects_duplicate_unnamed() {
        let result = UnionSchema::new(vec![Schema::Int, Schema::Int]);
        assert!(matches!(result, Err(SchemaError::InvalidUnion(_))));

        let result = UnionSchema::new(vec![
            Schema::Array(Box::new(Schema::Int)),
            Schema::Array(Box::new(Schema::String)),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_union_allows_distinct_named() {
        let union =
            UnionSchema::new(vec![Schema::Ref(name("A")), Schema::Ref(name("B"))]).unwrap();
        assert_eq!(union.len(), 2);
        assert_eq!(union.branch(1), Some(&Schema::Ref(name("B"))));
    }

    #[test]
    fn test_schemata_reserve_then_define() {
        let mut names = Schemata::new();
        let slot = names.reserve(&name("Link")).unwrap();
        assert!(names.contains("Link"));
        assert!(names.get("Link").is_none());

        names.define(
            slot,
            NamedSchema::Fixed(FixedSchema {
                name: name("Link"),
                doc: None,
                size: 4,
            }),
        );
        assert_eq!(names.get("Link").map(NamedSchema::kind), Some("fixed"));
    }

    #[test]
    fn test_schemata_duplicate_name() {
        let mut names = Schemata::new();
        names.reserve(&name("Link")).unwrap();
        let result = names.reserve(&name("Link"));
        assert!(matches!(result, Err(SchemaError::DuplicateName(_))));
    }

    #[test]
    fn test_schemata_reserved_name() {
        let mut names = Schemata::new();
        let reserved = Name::new("int", Some("ns"), None).unwrap();
        assert!(matches!(
            names.reserve(&reserved),
            Err(SchemaError::ReservedName(_))
        ));
    }

    #[test]
    fn test_schema_display() {
        let union = UnionSchema::new(vec![Schema::Null, Schema::Map(Box::new(Schema::Bytes))])
            .unwrap();
        assert_eq!(Schema::Union(union).to_string(), "[null, map<bytes>]");
    }

    #[test]
    fn test_sort_order() {
        assert_eq!(SortOrder::parse("descending").unwrap(), SortOrder::Descending);
        assert!(SortOrder::parse("sideways").is_err());
    }
}
