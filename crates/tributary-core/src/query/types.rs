//! Column and table descriptors used by the query AST.
//!
//! - [`FieldType`]: semantic type of a column
//! - [`LosslessFieldType`]: a field type that can carry a bound parameter
//!   without losing information on the wire
//! - [`FieldTypeMapper`]: maps source column metadata to a [`FieldType`]

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use super::QueryError;

/// Semantic type of a source column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// `BOOLEAN` / `BIT`
    Boolean,
    /// 8-bit integer
    Byte,
    /// 16-bit integer
    Short,
    /// 32-bit integer
    Int,
    /// Arbitrary precision integer (`BIGINT`)
    BigInteger,
    /// 32-bit float
    Float,
    /// 64-bit float
    Double,
    /// Arbitrary precision decimal
    BigDecimal,
    /// Character data
    String,
    /// National character data
    NString,
    /// Date without time zone
    LocalDate,
    /// Time of day without time zone
    LocalTime,
    /// Timestamp without time zone
    LocalDateTime,
    /// Time of day with offset
    OffsetTime,
    /// Timestamp with offset
    OffsetDateTime,
    /// Binary data, carried base64-encoded
    Bytes,
    /// Large binary object, carried base64-encoded
    BinaryStream,
    /// Character large object
    Clob,
    /// National character large object
    NClob,
    /// URL / datalink
    Url,
    /// XML document
    Xml,
    /// Array of the element type
    Array(Box<FieldType>),
    /// Column that only ever holds `NULL`
    Null,
    /// Catch-all for types the mapper does not recognize. Values are read as
    /// best-effort strings and cannot be bound as query parameters.
    Unknown,
}

impl FieldType {
    /// Returns `true` if values of this type round-trip exactly through a
    /// bound query parameter.
    #[must_use]
    pub fn is_lossless(&self) -> bool {
        match self {
            Self::Null | Self::Unknown => false,
            Self::Array(element) => element.is_lossless(),
            _ => true,
        }
    }

    /// Returns `true` if `value` is a valid representation of this type.
    ///
    /// `NULL` is never accepted: a comparison against `NULL` matches nothing.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Boolean => value.is_boolean(),
            Self::Byte | Self::Short | Self::Int | Self::BigInteger => {
                value.is_i64() || value.is_u64()
            }
            Self::Float | Self::Double => value.is_number(),
            Self::BigDecimal => value.is_number() || value.is_string(),
            Self::String
            | Self::NString
            | Self::LocalDate
            | Self::LocalTime
            | Self::LocalDateTime
            | Self::OffsetTime
            | Self::OffsetDateTime
            | Self::Bytes
            | Self::BinaryStream
            | Self::Clob
            | Self::NClob
            | Self::Url
            | Self::Xml => value.is_string(),
            Self::Array(element) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|v| element.accepts(v))),
            Self::Null | Self::Unknown => false,
        }
    }

    /// Returns `true` for integer types whose values support range arithmetic.
    #[must_use]
    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            Self::Byte | Self::Short | Self::Int | Self::BigInteger
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => write!(f, "boolean"),
            Self::Byte => write!(f, "byte"),
            Self::Short => write!(f, "short"),
            Self::Int => write!(f, "int"),
            Self::BigInteger => write!(f, "big_integer"),
            Self::Float => write!(f, "float"),
            Self::Double => write!(f, "double"),
            Self::BigDecimal => write!(f, "big_decimal"),
            Self::String => write!(f, "string"),
            Self::NString => write!(f, "nstring"),
            Self::LocalDate => write!(f, "local_date"),
            Self::LocalTime => write!(f, "local_time"),
            Self::LocalDateTime => write!(f, "local_date_time"),
            Self::OffsetTime => write!(f, "offset_time"),
            Self::OffsetDateTime => write!(f, "offset_date_time"),
            Self::Bytes => write!(f, "bytes"),
            Self::BinaryStream => write!(f, "binary_stream"),
            Self::Clob => write!(f, "clob"),
            Self::NClob => write!(f, "nclob"),
            Self::Url => write!(f, "url"),
            Self::Xml => write!(f, "xml"),
            Self::Array(element) => write!(f, "array<{element}>"),
            Self::Null => write!(f, "null"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A [`FieldType`] proven to be lossless.
///
/// Only obtainable through [`TryFrom<FieldType>`], so every
/// [`Binding`](super::Binding) carries a type the query executor can
/// serialize exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LosslessFieldType(FieldType);

impl LosslessFieldType {
    /// Returns the underlying field type.
    #[must_use]
    pub fn field_type(&self) -> &FieldType {
        &self.0
    }
}

impl TryFrom<FieldType> for LosslessFieldType {
    type Error = FieldType;

    fn try_from(field_type: FieldType) -> Result<Self, Self::Error> {
        if field_type.is_lossless() {
            Ok(Self(field_type))
        } else {
            Err(field_type)
        }
    }
}

impl fmt::Display for LosslessFieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    /// Column identifier as it appears in SQL.
    pub id: String,
    /// Semantic type.
    pub field_type: FieldType,
}

impl Field {
    /// Creates a new field.
    #[must_use]
    pub fn new(id: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            id: id.into(),
            field_type,
        }
    }

    /// Checks that `value` can be bound against this field.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::TypeMismatch`] if the field type is lossy or does
    /// not accept the value.
    pub fn lossless_type_for(&self, value: &Value) -> Result<LosslessFieldType, QueryError> {
        let lossless = LosslessFieldType::try_from(self.field_type.clone()).map_err(|ft| {
            QueryError::TypeMismatch {
                column: self.id.clone(),
                field_type: ft.to_string(),
                message: "type has no lossless representation".into(),
            }
        })?;
        if !self.field_type.accepts(value) {
            return Err(QueryError::TypeMismatch {
                column: self.id.clone(),
                field_type: self.field_type.to_string(),
                message: format!("cannot bind {value}"),
            });
        }
        Ok(lossless)
    }
}

/// A table, optionally qualified by a schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    /// Schema (namespace), if any.
    pub schema: Option<String>,
    /// Table name.
    pub name: String,
}

impl TableName {
    /// Creates a table name.
    #[must_use]
    pub fn new(schema: Option<String>, name: impl Into<String>) -> Self {
        Self {
            schema,
            name: name.into(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Standard SQL type codes, as reported by source metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum JdbcType {
    Bit,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Real,
    Double,
    Numeric,
    Decimal,
    Char,
    VarChar,
    LongVarChar,
    Date,
    Time,
    Timestamp,
    Binary,
    VarBinary,
    LongVarBinary,
    Null,
    Other,
    JavaObject,
    Distinct,
    Struct,
    Array,
    Blob,
    Clob,
    Ref,
    DataLink,
    Boolean,
    RowId,
    NChar,
    NVarChar,
    LongNVarChar,
    NClob,
    SqlXml,
    RefCursor,
    TimeWithTimezone,
    TimestampWithTimezone,
}

impl JdbcType {
    /// Resolves a vendor type number.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        let ty = match code {
            -7 => Self::Bit,
            -6 => Self::TinyInt,
            5 => Self::SmallInt,
            4 => Self::Integer,
            -5 => Self::BigInt,
            6 => Self::Float,
            7 => Self::Real,
            8 => Self::Double,
            2 => Self::Numeric,
            3 => Self::Decimal,
            1 => Self::Char,
            12 => Self::VarChar,
            -1 => Self::LongVarChar,
            91 => Self::Date,
            92 => Self::Time,
            93 => Self::Timestamp,
            -2 => Self::Binary,
            -3 => Self::VarBinary,
            -4 => Self::LongVarBinary,
            0 => Self::Null,
            1111 => Self::Other,
            2000 => Self::JavaObject,
            2001 => Self::Distinct,
            2002 => Self::Struct,
            2003 => Self::Array,
            2004 => Self::Blob,
            2005 => Self::Clob,
            2006 => Self::Ref,
            70 => Self::DataLink,
            16 => Self::Boolean,
            -8 => Self::RowId,
            -15 => Self::NChar,
            -9 => Self::NVarChar,
            -16 => Self::LongNVarChar,
            2011 => Self::NClob,
            2009 => Self::SqlXml,
            2012 => Self::RefCursor,
            2013 => Self::TimeWithTimezone,
            2014 => Self::TimestampWithTimezone,
            _ => return None,
        };
        Some(ty)
    }
}

/// Column metadata reported by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    /// Column name.
    pub name: String,
    /// Vendor type name (e.g. `DATETIME2`), if known.
    pub type_name: Option<String>,
    /// Standard type, if the vendor type number is recognized.
    pub jdbc_type: Option<JdbcType>,
}

impl ColumnMetadata {
    /// Creates column metadata from a vendor type number.
    #[must_use]
    pub fn new(name: impl Into<String>, type_code: i32) -> Self {
        Self {
            name: name.into(),
            type_name: None,
            jdbc_type: JdbcType::from_code(type_code),
        }
    }

    /// Attaches a vendor type name.
    #[must_use]
    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }
}

/// Maps source column metadata to a semantic [`FieldType`].
pub trait FieldTypeMapper: Send + Sync {
    /// Returns the field type for a column.
    fn to_field_type(&self, column: &ColumnMetadata) -> FieldType;

    /// Returns the typed field for a column.
    fn to_field(&self, column: &ColumnMetadata) -> Field {
        Field::new(column.name.clone(), self.to_field_type(column))
    }
}

/// Default mapping from standard SQL types, with optional per-vendor
/// type-name overrides that take precedence.
#[derive(Debug, Clone, Default)]
pub struct StandardFieldTypeMapper {
    overrides: HashMap<String, FieldType>,
}

impl StandardFieldTypeMapper {
    /// Creates a mapper with no overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps the vendor type name (case-insensitive) to `field_type`.
    #[must_use]
    pub fn with_type_name(mut self, type_name: &str, field_type: FieldType) -> Self {
        self.overrides
            .insert(type_name.to_ascii_uppercase(), field_type);
        self
    }
}

impl FieldTypeMapper for StandardFieldTypeMapper {
    fn to_field_type(&self, column: &ColumnMetadata) -> FieldType {
        if let Some(ft) = column
            .type_name
            .as_deref()
            .and_then(|name| self.overrides.get(&name.to_ascii_uppercase()))
        {
            return ft.clone();
        }
        let Some(jdbc_type) = column.jdbc_type else {
            return FieldType::Unknown;
        };
        match jdbc_type {
            JdbcType::Bit | JdbcType::Boolean => FieldType::Boolean,
            JdbcType::TinyInt => FieldType::Byte,
            JdbcType::SmallInt => FieldType::Short,
            JdbcType::Integer => FieldType::Int,
            JdbcType::BigInt => FieldType::BigInteger,
            JdbcType::Float => FieldType::Float,
            JdbcType::Double => FieldType::Double,
            JdbcType::Real | JdbcType::Numeric | JdbcType::Decimal => FieldType::BigDecimal,
            JdbcType::Char | JdbcType::VarChar | JdbcType::LongVarChar => FieldType::String,
            JdbcType::NChar | JdbcType::NVarChar | JdbcType::LongNVarChar => FieldType::NString,
            JdbcType::Date => FieldType::LocalDate,
            JdbcType::Time => FieldType::LocalTime,
            JdbcType::Timestamp => FieldType::LocalDateTime,
            JdbcType::TimeWithTimezone => FieldType::OffsetTime,
            JdbcType::TimestampWithTimezone => FieldType::OffsetDateTime,
            JdbcType::Blob => FieldType::BinaryStream,
            JdbcType::Binary | JdbcType::VarBinary | JdbcType::LongVarBinary => FieldType::Bytes,
            JdbcType::Clob => FieldType::Clob,
            JdbcType::NClob => FieldType::NClob,
            JdbcType::DataLink => FieldType::Url,
            JdbcType::SqlXml => FieldType::Xml,
            JdbcType::Array => FieldType::Array(Box::new(FieldType::String)),
            JdbcType::Null => FieldType::Null,
            JdbcType::Other
            | JdbcType::JavaObject
            | JdbcType::Distinct
            | JdbcType::Struct
            | JdbcType::Ref
            | JdbcType::RowId
            | JdbcType::RefCursor => FieldType::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lossless_classification() {
        assert!(FieldType::Int.is_lossless());
        assert!(FieldType::Array(Box::new(FieldType::String)).is_lossless());
        assert!(!FieldType::Unknown.is_lossless());
        assert!(!FieldType::Null.is_lossless());
        assert!(!FieldType::Array(Box::new(FieldType::Unknown)).is_lossless());

        assert!(LosslessFieldType::try_from(FieldType::Double).is_ok());
        assert_eq!(
            LosslessFieldType::try_from(FieldType::Unknown),
            Err(FieldType::Unknown)
        );
    }

    #[test]
    fn test_accepts() {
        assert!(FieldType::Int.accepts(&json!(5)));
        assert!(!FieldType::Int.accepts(&json!(5.5)));
        assert!(!FieldType::Int.accepts(&json!("5")));
        assert!(FieldType::Double.accepts(&json!(5)));
        assert!(FieldType::BigDecimal.accepts(&json!("12.50")));
        assert!(FieldType::LocalDateTime.accepts(&json!("2024-01-01T00:00:00")));
        assert!(FieldType::Boolean.accepts(&json!(true)));
        assert!(!FieldType::String.accepts(&Value::Null));
        assert!(FieldType::Array(Box::new(FieldType::Int)).accepts(&json!([1, 2])));
        assert!(!FieldType::Array(Box::new(FieldType::Int)).accepts(&json!([1, "x"])));
    }

    #[test]
    fn test_field_lossless_type_for() {
        let id = Field::new("id", FieldType::Int);
        assert_eq!(
            id.lossless_type_for(&json!(1)).unwrap().field_type(),
            &FieldType::Int
        );

        let err = id.lossless_type_for(&json!("one")).unwrap_err();
        assert!(matches!(err, QueryError::TypeMismatch { ref column, .. } if column == "id"));

        let blob = Field::new("geom", FieldType::Unknown);
        assert!(blob.lossless_type_for(&json!("POINT(0 0)")).is_err());
    }

    #[test]
    fn test_table_name_display() {
        assert_eq!(TableName::new(Some("dbo".into()), "users").to_string(), "dbo.users");
        assert_eq!(TableName::new(None, "users").to_string(), "users");
    }

    #[test]
    fn test_jdbc_type_codes() {
        assert_eq!(JdbcType::from_code(4), Some(JdbcType::Integer));
        assert_eq!(JdbcType::from_code(-5), Some(JdbcType::BigInt));
        assert_eq!(JdbcType::from_code(2014), Some(JdbcType::TimestampWithTimezone));
        assert_eq!(JdbcType::from_code(424_242), None);
    }

    #[test]
    fn test_standard_mapper() {
        let mapper = StandardFieldTypeMapper::new();
        assert_eq!(mapper.to_field_type(&ColumnMetadata::new("a", 4)), FieldType::Int);
        assert_eq!(
            mapper.to_field_type(&ColumnMetadata::new("b", 12)),
            FieldType::String
        );
        assert_eq!(
            mapper.to_field_type(&ColumnMetadata::new("c", 2002)),
            FieldType::Unknown
        );
        assert_eq!(
            mapper.to_field_type(&ColumnMetadata::new("d", 99_999)),
            FieldType::Unknown
        );
    }

    #[test]
    fn test_mapper_type_name_override() {
        let mapper = StandardFieldTypeMapper::new()
            .with_type_name("datetime2", FieldType::LocalDateTime)
            .with_type_name("GEOGRAPHY", FieldType::Unknown);

        let column = ColumnMetadata::new("created_at", 12).with_type_name("DATETIME2");
        let field = mapper.to_field(&column);
        assert_eq!(field.id, "created_at");
        assert_eq!(field.field_type, FieldType::LocalDateTime);

        let geo = ColumnMetadata::new("area", 4).with_type_name("geography");
        assert_eq!(mapper.to_field_type(&geo), FieldType::Unknown);
    }
}
