//! Fixture models shared by the unit tests in this crate.

use orchard_core::{
    Error, FieldDescriptor, Model, ModelConfig, RelatedValues, Result, Row, StorageType, Value,
    rows_into,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct School {
    pub id: Option<i64>,
    pub name: String,
    pub students: Option<Vec<Student>>,
    pub related: RelatedValues,
}

impl Model for School {
    const MODEL_NAME: &'static str = "School";
    const TABLE_NAME: &'static str = "schools";

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::scalar("id", StorageType::BigInt)
                .primary_key()
                .autoincrement(),
            FieldDescriptor::scalar("name", StorageType::varchar(30)),
            FieldDescriptor::reverse_list("students", "Student"),
        ]
    }

    fn to_row(&self) -> Result<Vec<(&'static str, Value)>> {
        Ok(vec![
            ("id", self.id.map_or(Value::Null, Value::BigInt)),
            ("name", Value::Text(self.name.clone())),
        ])
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            name: row.get_named("name")?,
            students: None,
            related: RelatedValues::new(),
        })
    }

    fn primary_key_value(&self) -> Vec<Value> {
        vec![self.id.map_or(Value::Null, Value::BigInt)]
    }

    fn set_primary_key(&mut self, value: Value) {
        self.id = value.as_i64();
    }

    fn related_values(&self) -> &RelatedValues {
        &self.related
    }

    fn related_values_mut(&mut self) -> &mut RelatedValues {
        &mut self.related
    }

    fn attach_related(&mut self, field: &str, rows: Vec<Row>) -> Result<()> {
        match field {
            "students" => {
                self.students = Some(rows_into(rows)?);
                Ok(())
            }
            other => Err(Error::Custom(format!(
                "School has no relationship field '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Student {
    pub id: Option<i64>,
    pub name: String,
    pub age: i32,
    pub school: Option<Box<School>>,
    pub related: RelatedValues,
}

impl Model for Student {
    const MODEL_NAME: &'static str = "Student";
    const TABLE_NAME: &'static str = "students";

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::scalar("id", StorageType::BigInt)
                .primary_key()
                .autoincrement(),
            FieldDescriptor::scalar("name", StorageType::varchar(30)),
            FieldDescriptor::scalar("age", StorageType::Int),
            FieldDescriptor::foreign_key("school", "School"),
        ]
    }

    fn to_row(&self) -> Result<Vec<(&'static str, Value)>> {
        let school_key = match &self.school {
            Some(school) => school
                .id
                .map(Value::BigInt)
                .ok_or_else(|| Error::MissingForeignKey {
                    model: "Student".to_string(),
                    field: "school".to_string(),
                })?,
            None => match self.related.get("school") {
                Some(value) => value.clone(),
                None => {
                    return Err(Error::MissingForeignKey {
                        model: "Student".to_string(),
                        field: "school".to_string(),
                    });
                }
            },
        };
        Ok(vec![
            ("id", self.id.map_or(Value::Null, Value::BigInt)),
            ("name", Value::Text(self.name.clone())),
            ("age", Value::Int(self.age)),
            ("schools_id", school_key),
        ])
    }

    fn from_row(row: &Row) -> Result<Self> {
        let mut related = RelatedValues::new();
        if row.contains_column("schools_id") {
            related.set("school", row.get_named("schools_id")?);
        }
        Ok(Self {
            id: row.get_named("id")?,
            name: row.get_named("name")?,
            age: row.get_named("age")?,
            school: None,
            related,
        })
    }

    fn primary_key_value(&self) -> Vec<Value> {
        vec![self.id.map_or(Value::Null, Value::BigInt)]
    }

    fn set_primary_key(&mut self, value: Value) {
        self.id = value.as_i64();
    }

    fn related_values(&self) -> &RelatedValues {
        &self.related
    }

    fn related_values_mut(&mut self) -> &mut RelatedValues {
        &mut self.related
    }

    fn attach_related(&mut self, field: &str, rows: Vec<Row>) -> Result<()> {
        match field {
            "school" => {
                self.school = rows_into(rows)?.into_iter().next().map(Box::new);
                Ok(())
            }
            other => Err(Error::Custom(format!(
                "Student has no relationship field '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    pub id: Option<i64>,
    pub name: String,
    pub posts: Option<Vec<Post>>,
    pub related: RelatedValues,
}

impl Model for Tag {
    const MODEL_NAME: &'static str = "Tag";
    const TABLE_NAME: &'static str = "tags";

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::scalar("id", StorageType::BigInt)
                .primary_key()
                .autoincrement(),
            FieldDescriptor::scalar("name", StorageType::varchar(30)),
            FieldDescriptor::many_to_many("posts", "Post"),
        ]
    }

    fn to_row(&self) -> Result<Vec<(&'static str, Value)>> {
        Ok(vec![
            ("id", self.id.map_or(Value::Null, Value::BigInt)),
            ("name", Value::Text(self.name.clone())),
        ])
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            name: row.get_named("name")?,
            posts: None,
            related: RelatedValues::new(),
        })
    }

    fn primary_key_value(&self) -> Vec<Value> {
        vec![self.id.map_or(Value::Null, Value::BigInt)]
    }

    fn set_primary_key(&mut self, value: Value) {
        self.id = value.as_i64();
    }

    fn related_values(&self) -> &RelatedValues {
        &self.related
    }

    fn related_values_mut(&mut self) -> &mut RelatedValues {
        &mut self.related
    }

    fn attach_related(&mut self, field: &str, rows: Vec<Row>) -> Result<()> {
        match field {
            "posts" => {
                self.posts = Some(rows_into(rows)?);
                Ok(())
            }
            other => Err(Error::Custom(format!(
                "Tag has no relationship field '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Post {
    pub id: Option<i64>,
    pub title: String,
    pub tags: Option<Vec<Tag>>,
    pub related: RelatedValues,
}

impl Model for Post {
    const MODEL_NAME: &'static str = "Post";
    const TABLE_NAME: &'static str = "posts";

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::scalar("id", StorageType::BigInt)
                .primary_key()
                .autoincrement(),
            FieldDescriptor::scalar("title", StorageType::varchar(100)),
            FieldDescriptor::many_to_many("tags", "Tag"),
        ]
    }

    fn to_row(&self) -> Result<Vec<(&'static str, Value)>> {
        Ok(vec![
            ("id", self.id.map_or(Value::Null, Value::BigInt)),
            ("title", Value::Text(self.title.clone())),
        ])
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            title: row.get_named("title")?,
            tags: None,
            related: RelatedValues::new(),
        })
    }

    fn primary_key_value(&self) -> Vec<Value> {
        vec![self.id.map_or(Value::Null, Value::BigInt)]
    }

    fn set_primary_key(&mut self, value: Value) {
        self.id = value.as_i64();
    }

    fn related_values(&self) -> &RelatedValues {
        &self.related
    }

    fn related_values_mut(&mut self) -> &mut RelatedValues {
        &mut self.related
    }

    fn attach_related(&mut self, field: &str, rows: Vec<Row>) -> Result<()> {
        match field {
            "tags" => {
                self.tags = Some(rows_into(rows)?);
                Ok(())
            }
            other => Err(Error::Custom(format!(
                "Post has no relationship field '{other}'"
            ))),
        }
    }
}

/// Abstract base; materialization must reject it.
#[derive(Debug, Clone, Default)]
pub struct AuditBase {
    pub related: RelatedValues,
}

impl Model for AuditBase {
    const MODEL_NAME: &'static str = "AuditBase";
    const TABLE_NAME: &'static str = "audit_base";

    fn fields() -> Vec<FieldDescriptor> {
        vec![FieldDescriptor::scalar("created_at", StorageType::Timestamp)]
    }

    fn config() -> ModelConfig {
        ModelConfig {
            abstract_model: true,
            indexes: Vec::new(),
        }
    }

    fn to_row(&self) -> Result<Vec<(&'static str, Value)>> {
        Ok(Vec::new())
    }

    fn from_row(_row: &Row) -> Result<Self> {
        Ok(Self::default())
    }

    fn primary_key_value(&self) -> Vec<Value> {
        Vec::new()
    }

    fn set_primary_key(&mut self, _value: Value) {}

    fn related_values(&self) -> &RelatedValues {
        &self.related
    }

    fn related_values_mut(&mut self) -> &mut RelatedValues {
        &mut self.related
    }

    fn attach_related(&mut self, _field: &str, _rows: Vec<Row>) -> Result<()> {
        Ok(())
    }
}
