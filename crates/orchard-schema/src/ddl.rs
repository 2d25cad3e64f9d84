//! DDL emission for materialized tables.

use crate::registry::SchemaRegistry;
use crate::table::{ColumnDef, TableDef};
use orchard_core::{Result, StorageType, Value, quote_ident};

/// SQL type name for a storage type.
pub fn sql_type(storage: &StorageType) -> String {
    match storage {
        StorageType::Bool => "BOOLEAN".to_string(),
        StorageType::SmallInt => "SMALLINT".to_string(),
        StorageType::Int => "INTEGER".to_string(),
        StorageType::BigInt => "BIGINT".to_string(),
        StorageType::Float => "REAL".to_string(),
        StorageType::Double => "DOUBLE PRECISION".to_string(),
        StorageType::Decimal { precision, scale } => format!("DECIMAL({precision}, {scale})"),
        StorageType::Text {
            max_length: Some(n),
        } => format!("VARCHAR({n})"),
        StorageType::Text { max_length: None } | StorageType::LongText => "TEXT".to_string(),
        StorageType::Bytes => "BYTEA".to_string(),
        StorageType::Date => "DATE".to_string(),
        StorageType::Time => "TIME".to_string(),
        StorageType::Timestamp => "TIMESTAMP".to_string(),
        StorageType::Uuid => "UUID".to_string(),
        StorageType::Json => "JSON".to_string(),
        StorageType::Array(inner) => format!("{}[]", sql_type(inner)),
        StorageType::Unmapped(name) => (*name).to_string(),
    }
}

fn default_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::SmallInt(n) => n.to_string(),
        Value::Int(n) => n.to_string(),
        Value::BigInt(n) => n.to_string(),
        Value::Float(n) => n.to_string(),
        Value::Double(n) => n.to_string(),
        Value::Decimal(s) => s.clone(),
        other => format!("'{other:?}'"),
    }
}

fn column_sql(column: &ColumnDef) -> String {
    let type_name = if column.autoincrement {
        match column.storage {
            StorageType::BigInt => "BIGSERIAL".to_string(),
            _ => "SERIAL".to_string(),
        }
    } else {
        sql_type(&column.storage)
    };

    let mut sql = format!("{} {type_name}", quote_ident(&column.name));
    if !column.nullable && !column.autoincrement {
        sql.push_str(" NOT NULL");
    }
    if column.unique && !column.primary_key {
        sql.push_str(" UNIQUE");
    }
    if let Some(default) = &column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(&default_literal(default));
    }
    sql
}

/// CREATE TABLE IF NOT EXISTS for one table.
pub fn create_table_sql(table: &TableDef) -> String {
    let mut parts: Vec<String> = table.columns.iter().map(column_sql).collect();

    let pk = table.primary_key_columns();
    if !pk.is_empty() {
        let cols: Vec<String> = pk.iter().map(|c| quote_ident(c)).collect();
        parts.push(format!("PRIMARY KEY ({})", cols.join(", ")));
    }

    for column in &table.columns {
        if let Some(fk) = &column.references {
            parts.push(format!(
                "FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
                quote_ident(&column.name),
                quote_ident(&fk.table),
                quote_ident(&fk.column),
                fk.on_update.as_sql(),
                fk.on_delete.as_sql(),
            ));
        }
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(&table.name),
        parts.join(", ")
    )
}

/// CREATE INDEX statements for one table: single-column indexes declared
/// on fields plus composite indexes declared on the model.
pub fn create_index_sql(table: &TableDef) -> Vec<String> {
    let mut statements = Vec::new();

    for column in &table.columns {
        if column.index && !column.unique && !column.primary_key {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&format!("ix_{}_{}", table.name, column.name)),
                quote_ident(&table.name),
                quote_ident(&column.name),
            ));
        }
    }

    for index in &table.indexes {
        let cols: Vec<String> = index.columns.iter().map(|c| quote_ident(c)).collect();
        let unique = if index.unique { "UNIQUE " } else { "" };
        statements.push(format!(
            "CREATE {unique}INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(index.name.as_str()),
            quote_ident(&table.name),
            cols.join(", "),
        ));
    }

    statements
}

/// DROP TABLE IF EXISTS for one table.
pub fn drop_table_sql(table: &TableDef) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(&table.name))
}

/// All CREATE statements for a materialized registry, model tables first
/// (registration order), then junction tables.
pub fn create_all_sql(registry: &SchemaRegistry) -> Result<Vec<String>> {
    let mut statements = Vec::new();
    for name in registry.model_names() {
        let schema = registry.get(name)?;
        if let Some(table) = &schema.table {
            statements.push(create_table_sql(table));
            statements.extend(create_index_sql(table));
        }
    }
    for junction in registry.junctions() {
        statements.push(create_table_sql(junction));
    }
    Ok(statements)
}

/// All DROP statements: junction tables first, then model tables in
/// reverse registration order.
pub fn drop_all_sql(registry: &SchemaRegistry) -> Result<Vec<String>> {
    let mut statements = Vec::new();
    for junction in registry.junctions() {
        statements.push(drop_table_sql(junction));
    }
    for name in registry.model_names().iter().rev() {
        let schema = registry.get(name)?;
        if let Some(table) = &schema.table {
            statements.push(drop_table_sql(table));
        }
    }
    Ok(statements)
}
