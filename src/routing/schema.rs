//! Message shapes the transcoder binds into.
//!
//! A message is a flat map of field name → declared type. Field types are
//! written as `"int64"`, `"repeated string"`, or a message name such as
//! `"queue.Entity"` / `"repeated queue.Entity"`.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use thiserror::Error;

/// Scalar field types the gateway can convert from text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    String,
    Bool,
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float,
    Double,
    /// Base64 text in JSON.
    Bytes,
}

impl ScalarKind {
    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::String => "string",
            ScalarKind::Bool => "bool",
            ScalarKind::Int32 => "int32",
            ScalarKind::Int64 => "int64",
            ScalarKind::UInt32 => "uint32",
            ScalarKind::UInt64 => "uint64",
            ScalarKind::Float => "float",
            ScalarKind::Double => "double",
            ScalarKind::Bytes => "bytes",
        }
    }
}

impl FromStr for ScalarKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "string" => ScalarKind::String,
            "bool" => ScalarKind::Bool,
            "int32" | "sint32" | "sfixed32" => ScalarKind::Int32,
            "int64" | "sint64" | "sfixed64" => ScalarKind::Int64,
            "uint32" | "fixed32" => ScalarKind::UInt32,
            "uint64" | "fixed64" => ScalarKind::UInt64,
            "float" => ScalarKind::Float,
            "double" => ScalarKind::Double,
            "bytes" => ScalarKind::Bytes,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(ScalarKind),
    /// Nested message, by fully-qualified name.
    Message(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub repeated: bool,
}

impl FieldDescriptor {
    pub fn scalar(&self) -> Option<ScalarKind> {
        match self.kind {
            FieldKind::Scalar(kind) => Some(kind),
            FieldKind::Message(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDescriptor {
    pub name: String,
    pub fields: BTreeMap<String, FieldDescriptor>,
}

impl MessageDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("message '{message}' field '{field}': unknown type '{ty}'")]
    UnknownType {
        message: String,
        field: String,
        ty: String,
    },

    #[error("field '{path}' not found in message '{message}'")]
    UnknownField { message: String, path: String },

    #[error("field '{path}' in message '{message}' cannot be traversed: '{segment}' is not a singular message")]
    NotTraversable {
        message: String,
        path: String,
        segment: String,
    },

    #[error("unknown message type '{0}'")]
    UnknownMessage(String),
}

/// All message shapes of a service description. Read-only after build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    messages: HashMap<String, MessageDescriptor>,
}

impl Schema {
    /// Build from `message name → field name → type` declarations.
    pub fn build(declared: &BTreeMap<String, BTreeMap<String, String>>) -> Result<Self, SchemaError> {
        let mut messages = HashMap::new();

        for (message, fields) in declared {
            let mut descriptors = BTreeMap::new();
            for (field, ty) in fields {
                let descriptor = parse_field(message, field, ty, declared)?;
                descriptors.insert(field.clone(), descriptor);
            }
            messages.insert(
                message.clone(),
                MessageDescriptor {
                    name: message.clone(),
                    fields: descriptors,
                },
            );
        }

        Ok(Self { messages })
    }

    pub fn message(&self, name: &str) -> Option<&MessageDescriptor> {
        self.messages.get(name)
    }

    /// Walk a dotted field path from `message`.
    ///
    /// Every segment but the last must be a singular message field.
    pub fn resolve(&self, message: &str, path: &[String]) -> Result<&FieldDescriptor, SchemaError> {
        let unknown = || SchemaError::UnknownField {
            message: message.to_string(),
            path: path.join("."),
        };

        let mut current = self
            .message(message)
            .ok_or_else(|| SchemaError::UnknownMessage(message.to_string()))?;
        let (last, parents) = path.split_last().ok_or_else(unknown)?;

        for segment in parents {
            let field = current.field(segment).ok_or_else(unknown)?;
            current = match (&field.kind, field.repeated) {
                (FieldKind::Message(name), false) => self
                    .message(name)
                    .ok_or_else(|| SchemaError::UnknownMessage(name.clone()))?,
                _ => {
                    return Err(SchemaError::NotTraversable {
                        message: message.to_string(),
                        path: path.join("."),
                        segment: segment.clone(),
                    })
                }
            };
        }

        current.field(last).ok_or_else(unknown)
    }
}

fn parse_field(
    message: &str,
    field: &str,
    ty: &str,
    declared: &BTreeMap<String, BTreeMap<String, String>>,
) -> Result<FieldDescriptor, SchemaError> {
    let ty = ty.trim();
    let (repeated, base) = match ty.strip_prefix("repeated ") {
        Some(rest) => (true, rest.trim()),
        None => (false, ty),
    };

    let kind = if let Ok(scalar) = base.parse::<ScalarKind>() {
        FieldKind::Scalar(scalar)
    } else if declared.contains_key(base) {
        FieldKind::Message(base.to_string())
    } else {
        return Err(SchemaError::UnknownType {
            message: message.to_string(),
            field: field.to_string(),
            ty: ty.to_string(),
        });
    };

    Ok(FieldDescriptor {
        name: field.to_string(),
        kind,
        repeated,
    })
}
