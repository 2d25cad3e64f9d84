//! Field descriptors: explicit runtime records describing model attributes.
//!
//! A model declares its attributes as a list of [`FieldDescriptor`] values,
//! one per attribute, built by ordinary constructor and builder calls. Each
//! descriptor is exactly one of four kinds: a scalar column, a foreign key
//! (owning a synthetic local column), the non-owning reverse side of a
//! relationship, or a many-to-many relation realized through a junction
//! table. Relationship descriptors gain derived attributes (counterpart
//! field, target column, synthetic column name) during resolution.

use crate::value::Value;
use serde::Serialize;

/// Referential action for ON DELETE / ON UPDATE clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ReferentialAction {
    /// NO ACTION (default)
    #[default]
    NoAction,
    /// RESTRICT - prevent deletion/update of parent
    Restrict,
    /// CASCADE - propagate deletion/update to children
    Cascade,
    /// SET NULL - set child references to NULL
    SetNull,
    /// SET DEFAULT - set child references to their default value
    SetDefault,
}

impl ReferentialAction {
    /// Get the SQL representation of this action.
    pub const fn as_sql(self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// Storage type for a column: the value-type-to-storage mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StorageType {
    Bool,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    /// Arbitrary precision decimal
    Decimal { precision: u8, scale: u8 },
    /// Variable-length string with optional maximum length
    Text { max_length: Option<u32> },
    /// Unbounded text
    LongText,
    Bytes,
    Date,
    Time,
    Timestamp,
    Uuid,
    /// Structured/collection values serialized as JSON
    Json,
    /// Array of a simple inner scalar type
    Array(Box<StorageType>),
    /// A declared type with no storage mapping; rejected at
    /// materialization time with a field-type error naming it
    Unmapped(&'static str),
}

impl StorageType {
    /// Shorthand for a bounded string column.
    pub fn varchar(max_length: u32) -> Self {
        StorageType::Text {
            max_length: Some(max_length),
        }
    }

    /// Shorthand for an unbounded string column.
    pub const fn text() -> Self {
        StorageType::Text { max_length: None }
    }

    /// Whether this type has a storage mapping.
    pub fn is_mapped(&self) -> bool {
        match self {
            StorageType::Unmapped(_) => false,
            StorageType::Array(inner) => inner.is_mapped(),
            _ => true,
        }
    }

    /// The declared type name, for error messages.
    pub fn declared_name(&self) -> String {
        match self {
            StorageType::Unmapped(name) => (*name).to_string(),
            StorageType::Array(inner) => format!("[{}]", inner.declared_name()),
            other => format!("{other:?}"),
        }
    }
}

/// One declared model attribute.
///
/// # Example
///
/// ```ignore
/// let fields = vec![
///     FieldDescriptor::scalar("id", StorageType::BigInt)
///         .primary_key()
///         .autoincrement(),
///     FieldDescriptor::scalar("name", StorageType::varchar(30)).unique(),
///     FieldDescriptor::foreign_key("school", "School").nullable(true),
/// ];
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Attribute name on the model
    pub name: &'static str,
    /// Whether NULL / absent related rows are permitted
    pub nullable: bool,
    /// Exactly one kind per field
    pub kind: FieldKind,
}

/// The four field kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Scalar(ScalarField),
    ForeignKey(ForeignKeyField),
    ReverseRelation(ReverseField),
    ManyToMany(ManyToManyField),
}

/// A plain column.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField {
    pub storage: StorageType,
    pub primary_key: bool,
    pub autoincrement: bool,
    pub index: bool,
    pub unique: bool,
    pub default: Option<Value>,
    /// Regex the value must match, checked by the write-path validator
    pub pattern: Option<&'static str>,
}

/// The owning side of a one-to-one / many-to-one relationship.
///
/// Owns a synthetic local column named `{related_table}_{target_column}`,
/// derived during resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyField {
    /// Registered name of the related model
    pub related_model: &'static str,
    /// Counterpart field on the related model; inferred when absent
    pub related_field_name: Option<&'static str>,
    /// Target column on the related table; defaults to its sole primary key
    pub target_column: Option<&'static str>,
    pub on_update: Option<ReferentialAction>,
    pub on_delete: Option<ReferentialAction>,
    /// Derived: the synthetic local column name
    pub column_name: Option<String>,
    /// Derived: storage type mirroring the target column
    pub storage: Option<StorageType>,
}

/// The non-owning side of a one-to-many or one-to-one relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct ReverseField {
    pub related_model: &'static str,
    pub related_field_name: Option<&'static str>,
    /// Sequence (one-to-many) vs single/optional (one-to-one)
    pub is_list: bool,
    pub on_update: Option<ReferentialAction>,
    pub on_delete: Option<ReferentialAction>,
}

/// One side of a many-to-many relationship through a shared junction table.
#[derive(Debug, Clone, PartialEq)]
pub struct ManyToManyField {
    pub related_model: &'static str,
    pub related_field_name: Option<&'static str>,
    /// Local join key; defaults to this model's sole primary key
    pub join_key: Option<&'static str>,
    pub on_update: Option<ReferentialAction>,
    pub on_delete: Option<ReferentialAction>,
    /// Derived: this side's column in the junction table
    pub junction_column: Option<String>,
    /// Derived: the shared junction table name
    pub junction_table: Option<String>,
    /// Derived: storage type mirroring the join key column
    pub storage: Option<StorageType>,
}

impl FieldDescriptor {
    /// Declare a scalar column.
    pub fn scalar(name: &'static str, storage: StorageType) -> Self {
        Self {
            name,
            nullable: false,
            kind: FieldKind::Scalar(ScalarField {
                storage,
                primary_key: false,
                autoincrement: false,
                index: false,
                unique: false,
                default: None,
                pattern: None,
            }),
        }
    }

    /// Declare a foreign key to `related_model`.
    pub fn foreign_key(name: &'static str, related_model: &'static str) -> Self {
        Self {
            name,
            nullable: false,
            kind: FieldKind::ForeignKey(ForeignKeyField {
                related_model,
                related_field_name: None,
                target_column: None,
                on_update: None,
                on_delete: None,
                column_name: None,
                storage: None,
            }),
        }
    }

    /// Declare the single-valued reverse side of a relationship.
    pub fn reverse_one(name: &'static str, related_model: &'static str) -> Self {
        Self {
            name,
            nullable: true,
            kind: FieldKind::ReverseRelation(ReverseField {
                related_model,
                related_field_name: None,
                is_list: false,
                on_update: None,
                on_delete: None,
            }),
        }
    }

    /// Declare the list-valued reverse side of a relationship.
    pub fn reverse_list(name: &'static str, related_model: &'static str) -> Self {
        Self {
            name,
            nullable: true,
            kind: FieldKind::ReverseRelation(ReverseField {
                related_model,
                related_field_name: None,
                is_list: true,
                on_update: None,
                on_delete: None,
            }),
        }
    }

    /// Declare a many-to-many relation to `related_model`.
    pub fn many_to_many(name: &'static str, related_model: &'static str) -> Self {
        Self {
            name,
            nullable: true,
            kind: FieldKind::ManyToMany(ManyToManyField {
                related_model,
                related_field_name: None,
                join_key: None,
                on_update: None,
                on_delete: None,
                junction_column: None,
                junction_table: None,
                storage: None,
            }),
        }
    }

    // ==================== Builder methods ====================

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Mark this column as (part of) the primary key. Scalar only.
    pub fn primary_key(mut self) -> Self {
        debug_assert!(matches!(self.kind, FieldKind::Scalar(_)));
        if let FieldKind::Scalar(s) = &mut self.kind {
            s.primary_key = true;
        }
        self
    }

    /// Backend-generated key values on insert. Scalar only.
    pub fn autoincrement(mut self) -> Self {
        debug_assert!(matches!(self.kind, FieldKind::Scalar(_)));
        if let FieldKind::Scalar(s) = &mut self.kind {
            s.autoincrement = true;
        }
        self
    }

    pub fn index(mut self) -> Self {
        debug_assert!(matches!(self.kind, FieldKind::Scalar(_)));
        if let FieldKind::Scalar(s) = &mut self.kind {
            s.index = true;
        }
        self
    }

    pub fn unique(mut self) -> Self {
        debug_assert!(matches!(self.kind, FieldKind::Scalar(_)));
        if let FieldKind::Scalar(s) = &mut self.kind {
            s.unique = true;
        }
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        debug_assert!(matches!(self.kind, FieldKind::Scalar(_)));
        if let FieldKind::Scalar(s) = &mut self.kind {
            s.default = Some(value);
        }
        self
    }

    /// Regex the value must match on writes. Scalar only.
    pub fn pattern(mut self, pattern: &'static str) -> Self {
        debug_assert!(matches!(self.kind, FieldKind::Scalar(_)));
        if let FieldKind::Scalar(s) = &mut self.kind {
            s.pattern = Some(pattern);
        }
        self
    }

    /// Name the counterpart field on the related model explicitly.
    pub fn related_field(mut self, name: &'static str) -> Self {
        match &mut self.kind {
            FieldKind::ForeignKey(f) => f.related_field_name = Some(name),
            FieldKind::ReverseRelation(f) => f.related_field_name = Some(name),
            FieldKind::ManyToMany(f) => f.related_field_name = Some(name),
            FieldKind::Scalar(_) => debug_assert!(false, "scalar fields have no counterpart"),
        }
        self
    }

    /// Name the target column on the related table. ForeignKey only.
    pub fn target_column(mut self, column: &'static str) -> Self {
        debug_assert!(matches!(self.kind, FieldKind::ForeignKey(_)));
        if let FieldKind::ForeignKey(f) = &mut self.kind {
            f.target_column = Some(column);
        }
        self
    }

    /// Name this side's join key explicitly. ManyToMany only.
    pub fn join_key(mut self, column: &'static str) -> Self {
        debug_assert!(matches!(self.kind, FieldKind::ManyToMany(_)));
        if let FieldKind::ManyToMany(f) = &mut self.kind {
            f.join_key = Some(column);
        }
        self
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        match &mut self.kind {
            FieldKind::ForeignKey(f) => f.on_update = Some(action),
            FieldKind::ReverseRelation(f) => f.on_update = Some(action),
            FieldKind::ManyToMany(f) => f.on_update = Some(action),
            FieldKind::Scalar(_) => debug_assert!(false, "scalar fields have no actions"),
        }
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        match &mut self.kind {
            FieldKind::ForeignKey(f) => f.on_delete = Some(action),
            FieldKind::ReverseRelation(f) => f.on_delete = Some(action),
            FieldKind::ManyToMany(f) => f.on_delete = Some(action),
            FieldKind::Scalar(_) => debug_assert!(false, "scalar fields have no actions"),
        }
        self
    }

    // ==================== Accessors ====================

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, FieldKind::Scalar(_))
    }

    pub fn is_relationship(&self) -> bool {
        !self.is_scalar()
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            FieldKind::Scalar(_) => "scalar",
            FieldKind::ForeignKey(_) => "foreign key",
            FieldKind::ReverseRelation(_) => "reverse relation",
            FieldKind::ManyToMany(_) => "many-to-many",
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarField> {
        match &self.kind {
            FieldKind::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_foreign_key(&self) -> Option<&ForeignKeyField> {
        match &self.kind {
            FieldKind::ForeignKey(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_foreign_key_mut(&mut self) -> Option<&mut ForeignKeyField> {
        match &mut self.kind {
            FieldKind::ForeignKey(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_reverse(&self) -> Option<&ReverseField> {
        match &self.kind {
            FieldKind::ReverseRelation(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_reverse_mut(&mut self) -> Option<&mut ReverseField> {
        match &mut self.kind {
            FieldKind::ReverseRelation(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_many_to_many(&self) -> Option<&ManyToManyField> {
        match &self.kind {
            FieldKind::ManyToMany(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_many_to_many_mut(&mut self) -> Option<&mut ManyToManyField> {
        match &mut self.kind {
            FieldKind::ManyToMany(f) => Some(f),
            _ => None,
        }
    }

    /// The related model name for relationship fields.
    pub fn related_model(&self) -> Option<&'static str> {
        match &self.kind {
            FieldKind::Scalar(_) => None,
            FieldKind::ForeignKey(f) => Some(f.related_model),
            FieldKind::ReverseRelation(f) => Some(f.related_model),
            FieldKind::ManyToMany(f) => Some(f.related_model),
        }
    }

    /// The counterpart field name, if declared or resolved.
    pub fn related_field_name(&self) -> Option<&'static str> {
        match &self.kind {
            FieldKind::Scalar(_) => None,
            FieldKind::ForeignKey(f) => f.related_field_name,
            FieldKind::ReverseRelation(f) => f.related_field_name,
            FieldKind::ManyToMany(f) => f.related_field_name,
        }
    }

    pub fn set_related_field_name(&mut self, name: &'static str) {
        match &mut self.kind {
            FieldKind::Scalar(_) => {}
            FieldKind::ForeignKey(f) => f.related_field_name = Some(name),
            FieldKind::ReverseRelation(f) => f.related_field_name = Some(name),
            FieldKind::ManyToMany(f) => f.related_field_name = Some(name),
        }
    }

    /// Declared referential actions, if any (relationship fields).
    pub fn actions(&self) -> (Option<ReferentialAction>, Option<ReferentialAction>) {
        match &self.kind {
            FieldKind::Scalar(_) => (None, None),
            FieldKind::ForeignKey(f) => (f.on_update, f.on_delete),
            FieldKind::ReverseRelation(f) => (f.on_update, f.on_delete),
            FieldKind::ManyToMany(f) => (f.on_update, f.on_delete),
        }
    }
}
