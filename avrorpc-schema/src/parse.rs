//! JSON schema definition parser.
//!
//! Named schemas are reserved in the registry before their children are
//! parsed, which is what lets a record field name its own record or a type
//! declared later in the same definition refer back to an earlier one.

use crate::error::SchemaError;
use crate::name::{is_valid_identifier, Name};
use crate::schema::{
    EnumSchema, Field, FixedSchema, NamedSchema, RecordSchema, Schema, Schemata, SortOrder,
    UnionSchema,
};
use serde_json::{Map, Value as Json};

/// Parses schema JSON into a [`Schemata`] shared by every schema it reads.
pub struct Parser<'a> {
    names: &'a mut Schemata,
}

impl<'a> Parser<'a> {
    pub fn new(names: &'a mut Schemata) -> Self {
        Self { names }
    }

    /// Parses one schema definition.
    pub fn parse(
        &mut self,
        json: &Json,
        default_namespace: Option<&str>,
    ) -> Result<Schema, SchemaError> {
        match json {
            Json::String(type_name) => self.resolve_reference(type_name, default_namespace),
            Json::Object(obj) => self.parse_object(obj, default_namespace),
            Json::Array(branches) => self.parse_union(branches, default_namespace),
            other => Err(SchemaError::UnknownType(other.to_string())),
        }
    }

    /// Resolves a type name to a primitive or to an already registered
    /// named schema.
    ///
    /// Unqualified names are looked up in the default namespace first, then
    /// in the null namespace.
    pub fn resolve_reference(
        &self,
        type_name: &str,
        default_namespace: Option<&str>,
    ) -> Result<Schema, SchemaError> {
        if let Some(primitive) = Schema::primitive(type_name) {
            return Ok(primitive);
        }

        let unknown = || SchemaError::UnknownType(type_name.to_string());
        let candidate = Name::new(type_name, None, default_namespace).map_err(|_| unknown())?;
        if self.names.contains(candidate.fullname()) {
            return Ok(Schema::Ref(candidate));
        }

        if default_namespace.is_some() && !type_name.contains(crate::name::NAME_SEPARATOR) {
            let bare = Name::new(type_name, None, None).map_err(|_| unknown())?;
            if self.names.contains(bare.fullname()) {
                return Ok(Schema::Ref(bare));
            }
        }

        Err(unknown())
    }

    /// Parses the `fields` list of a record or message request.
    pub fn parse_fields(
        &mut self,
        fields: &[Json],
        owner: &str,
        default_namespace: Option<&str>,
    ) -> Result<Vec<Field>, SchemaError> {
        let mut parsed: Vec<Field> = Vec::with_capacity(fields.len());

        for field in fields {
            let obj = field.as_object().ok_or_else(|| SchemaError::InvalidAttribute {
                attr: "fields",
                reason: format!("field of {} is not an object", owner),
            })?;

            let name = required_str(obj, "name", owner)?;
            if !is_valid_identifier(name) {
                return Err(SchemaError::InvalidFieldName(name.to_string()));
            }
            if parsed.iter().any(|f| f.name == name) {
                return Err(SchemaError::DuplicateField {
                    record: owner.to_string(),
                    field: name.to_string(),
                });
            }

            let type_json = obj
                .get("type")
                .ok_or_else(|| SchemaError::MissingAttribute {
                    attr: "type",
                    context: format!("field {}.{}", owner, name),
                })?;
            let schema = self.parse(type_json, default_namespace)?;

            let order = optional_str(obj, "order")?
                .map(SortOrder::parse)
                .transpose()?;

            parsed.push(Field {
                name: name.to_string(),
                schema,
                default: obj.get("default").cloned(),
                order,
                doc: optional_str(obj, "doc")?.map(str::to_string),
            });
        }

        Ok(parsed)
    }

    fn parse_object(
        &mut self,
        obj: &Map<String, Json>,
        default_namespace: Option<&str>,
    ) -> Result<Schema, SchemaError> {
        let type_json = obj
            .get("type")
            .ok_or_else(|| SchemaError::MissingAttribute {
                attr: "type",
                context: "schema object".to_string(),
            })?;

        match type_json {
            Json::String(kind) => match kind.as_str() {
                "record" | "error" | "enum" | "fixed" => {
                    self.parse_named(kind, obj, default_namespace)
                }
                "array" => {
                    let items = obj.get("items").ok_or_else(|| SchemaError::MissingAttribute {
                        attr: "items",
                        context: "array".to_string(),
                    })?;
                    Ok(Schema::Array(Box::new(self.parse(items, default_namespace)?)))
                }
                "map" => {
                    let values = obj.get("values").ok_or_else(|| SchemaError::MissingAttribute {
                        attr: "values",
                        context: "map".to_string(),
                    })?;
                    Ok(Schema::Map(Box::new(self.parse(values, default_namespace)?)))
                }
                other => self.resolve_reference(other, default_namespace),
            },
            nested @ (Json::Object(_) | Json::Array(_)) => self.parse(nested, default_namespace),
            other => Err(SchemaError::UnknownType(other.to_string())),
        }
    }

    fn parse_named(
        &mut self,
        kind: &str,
        obj: &Map<String, Json>,
        default_namespace: Option<&str>,
    ) -> Result<Schema, SchemaError> {
        let name = Name::new(
            required_str(obj, "name", kind)?,
            optional_str(obj, "namespace")?,
            default_namespace,
        )?;
        let doc = optional_str(obj, "doc")?.map(str::to_string);

        let slot = self.names.reserve(&name)?;
        tracing::trace!("reserved named schema {} ({})", name, kind);

        let named = match kind {
            "fixed" => NamedSchema::Fixed(FixedSchema {
                size: parse_size(obj, &name)?,
                name: name.clone(),
                doc,
            }),
            "enum" => NamedSchema::Enum(EnumSchema {
                symbols: parse_symbols(obj, &name)?,
                name: name.clone(),
                doc,
            }),
            _ => {
                let fields = obj
                    .get("fields")
                    .and_then(Json::as_array)
                    .ok_or_else(|| SchemaError::MissingAttribute {
                        attr: "fields",
                        context: format!("{} {}", kind, name),
                    })?;
                let fields = self.parse_fields(fields, name.fullname(), name.namespace())?;
                NamedSchema::Record(RecordSchema {
                    name: name.clone(),
                    doc,
                    fields,
                    is_error: kind == "error",
                })
            }
        };

        self.names.define(slot, named);
        Ok(Schema::Ref(name))
    }

    fn parse_union(
        &mut self,
        branches: &[Json],
        default_namespace: Option<&str>,
    ) -> Result<Schema, SchemaError> {
        let schemas = branches
            .iter()
            .map(|branch| self.parse(branch, default_namespace))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Schema::Union(UnionSchema::new(schemas)?))
    }
}

fn required_str<'j>(
    obj: &'j Map<String, Json>,
    attr: &'static str,
    context: &str,
) -> Result<&'j str, SchemaError> {
    match obj.get(attr) {
        Some(Json::String(s)) => Ok(s),
        Some(other) => Err(SchemaError::InvalidAttribute {
            attr,
            reason: format!("expected a string, got {}", other),
        }),
        None => Err(SchemaError::MissingAttribute {
            attr,
            context: context.to_string(),
        }),
    }
}

fn optional_str<'j>(
    obj: &'j Map<String, Json>,
    attr: &'static str,
) -> Result<Option<&'j str>, SchemaError> {
    match obj.get(attr) {
        Some(Json::String(s)) => Ok(Some(s)),
        Some(Json::Null) | None => Ok(None),
        Some(other) => Err(SchemaError::InvalidAttribute {
            attr,
            reason: format!("expected a string, got {}", other),
        }),
    }
}

fn parse_size(obj: &Map<String, Json>, name: &Name) -> Result<usize, SchemaError> {
    let size = obj.get("size").ok_or_else(|| SchemaError::MissingAttribute {
        attr: "size",
        context: format!("fixed {}", name),
    })?;
    size.as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| SchemaError::InvalidSize {
            name: name.fullname().to_string(),
            value: size.to_string(),
        })
}

fn parse_symbols(obj: &Map<String, Json>, name: &Name) -> Result<Vec<String>, SchemaError> {
    let invalid = |reason: &str| SchemaError::InvalidSymbols {
        name: name.fullname().to_string(),
        reason: reason.to_string(),
    };

    let symbols = obj
        .get("symbols")
        .and_then(Json::as_array)
        .ok_or_else(|| invalid("symbols must be a list"))?;
    if symbols.is_empty() {
        return Err(invalid("symbols must not be empty"));
    }

    let mut parsed: Vec<String> = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let symbol = symbol
            .as_str()
            .ok_or_else(|| invalid("symbols must be strings"))?;
        if symbol.is_empty() {
            return Err(invalid("symbols must not be empty strings"));
        }
        if parsed.iter().any(|s| s == symbol) {
            return Err(invalid(&format!("duplicate symbol {}", symbol)));
        }
        parsed.push(symbol.to_string());
    }
    Ok(parsed)
}
