//! In-memory metadata catalog.
//!
//! A small object graph of data sources, schemas, tables and columns that a
//! worker can host. Children hold their parents weakly so the graph is freed
//! with its data source.

use std::sync::{Arc, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use dpi_core::{
    InvokeError, LocalRef, LocalValue, Remotable, Value, local::PropertyMap, local::text_arg,
    model::names,
};

fn snapshot<T>(children: &RwLock<Vec<Arc<T>>>) -> Vec<Arc<T>> {
    children.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn object_list<T: Remotable + 'static>(children: Vec<Arc<T>>) -> LocalValue {
    Value::List(
        children
            .into_iter()
            .map(|child| Value::Object(child as LocalRef))
            .collect(),
    )
}

fn parent_value<T: Remotable + 'static>(parent: &Weak<T>) -> LocalValue {
    parent
        .upgrade()
        .map_or(Value::Null, |parent| Value::Object(parent as LocalRef))
}

fn parent_container<T: Remotable + 'static>(accessor: &str, parent: &Weak<T>) -> Vec<(String, LocalRef)> {
    parent
        .upgrade()
        .map(|parent| (accessor.to_string(), parent as LocalRef))
        .into_iter()
        .collect()
}

/// A data source with named schemas.
pub struct MemoryDataSource {
    name: String,
    driver: String,
    schemas: RwLock<Vec<Arc<MemorySchema>>>,
}

impl MemoryDataSource {
    #[must_use]
    pub fn new(name: impl Into<String>, driver: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            driver: driver.into(),
            schemas: RwLock::default(),
        })
    }

    /// Add a schema and return it.
    pub fn add_schema(self: &Arc<Self>, name: impl Into<String>) -> Arc<MemorySchema> {
        let schema = Arc::new(MemorySchema {
            name: name.into(),
            data_source: Arc::downgrade(self),
            tables: RwLock::default(),
        });
        self.schemas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&schema));
        schema
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn schema(&self, name: &str) -> Option<Arc<MemorySchema>> {
        snapshot(&self.schemas).into_iter().find(|s| s.name == name)
    }
}

#[async_trait]
impl Remotable for MemoryDataSource {
    fn type_name(&self) -> &str {
        "MemoryDataSource"
    }

    fn interfaces(&self) -> &[&str] {
        &[names::DATA_SOURCE]
    }

    fn display(&self) -> String {
        self.name.clone()
    }

    fn properties(&self) -> Option<PropertyMap> {
        Some(vec![
            ("name".to_string(), Value::from(self.name.as_str())),
            ("driverName".to_string(), Value::from(self.driver.as_str())),
        ])
    }

    async fn invoke(&self, method: &str, args: Vec<LocalValue>) -> Result<LocalValue, InvokeError> {
        match (method, args.len()) {
            ("getName", 0) => Ok(Value::from(self.name.as_str())),
            ("getDriverName", 0) => Ok(Value::from(self.driver.as_str())),
            ("getSchemas", 0) => Ok(object_list(snapshot(&self.schemas))),
            ("getSchema", 1) => {
                let name = text_arg(&args, 0)?;
                Ok(self
                    .schema(name)
                    .map_or(Value::Null, |schema| Value::Object(schema as LocalRef)))
            }
            _ => Err(InvokeError::NoSuchOperation),
        }
    }
}

/// A schema with named tables.
pub struct MemorySchema {
    name: String,
    data_source: Weak<MemoryDataSource>,
    tables: RwLock<Vec<Arc<MemoryTable>>>,
}

impl MemorySchema {
    /// Add a table and return it.
    pub fn add_table(self: &Arc<Self>, name: impl Into<String>, row_count: i64) -> Arc<MemoryTable> {
        let table = Arc::new(MemoryTable {
            name: name.into(),
            row_count,
            schema: Arc::downgrade(self),
            columns: RwLock::default(),
        });
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&table));
        table
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn table(&self, name: &str) -> Option<Arc<MemoryTable>> {
        snapshot(&self.tables).into_iter().find(|t| t.name == name)
    }
}

#[async_trait]
impl Remotable for MemorySchema {
    fn type_name(&self) -> &str {
        "MemorySchema"
    }

    fn interfaces(&self) -> &[&str] {
        &[names::SCHEMA]
    }

    fn display(&self) -> String {
        self.name.clone()
    }

    fn properties(&self) -> Option<PropertyMap> {
        Some(vec![("name".to_string(), Value::from(self.name.as_str()))])
    }

    fn containers(&self) -> Vec<(String, LocalRef)> {
        parent_container("getDataSource", &self.data_source)
    }

    async fn invoke(&self, method: &str, args: Vec<LocalValue>) -> Result<LocalValue, InvokeError> {
        match (method, args.len()) {
            ("getName", 0) => Ok(Value::from(self.name.as_str())),
            ("getDataSource", 0) => Ok(parent_value(&self.data_source)),
            ("getTables", 0) => Ok(object_list(snapshot(&self.tables))),
            ("getTable", 1) => {
                let name = text_arg(&args, 0)?;
                Ok(self
                    .table(name)
                    .map_or(Value::Null, |table| Value::Object(table as LocalRef)))
            }
            _ => Err(InvokeError::NoSuchOperation),
        }
    }
}

/// A table with ordered columns.
pub struct MemoryTable {
    name: String,
    row_count: i64,
    schema: Weak<MemorySchema>,
    columns: RwLock<Vec<Arc<MemoryColumn>>>,
}

impl MemoryTable {
    /// Add a column and return it.
    pub fn add_column(
        self: &Arc<Self>,
        name: impl Into<String>,
        type_name: impl Into<String>,
        nullable: bool,
    ) -> Arc<MemoryColumn> {
        let column = Arc::new(MemoryColumn {
            name: name.into(),
            type_name: type_name.into(),
            nullable,
            table: Arc::downgrade(self),
        });
        self.columns
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&column));
        column
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Remotable for MemoryTable {
    fn type_name(&self) -> &str {
        "MemoryTable"
    }

    fn interfaces(&self) -> &[&str] {
        &[names::TABLE]
    }

    fn display(&self) -> String {
        self.name.clone()
    }

    fn properties(&self) -> Option<PropertyMap> {
        Some(vec![
            ("name".to_string(), Value::from(self.name.as_str())),
            ("rowCount".to_string(), Value::Int(self.row_count)),
        ])
    }

    fn containers(&self) -> Vec<(String, LocalRef)> {
        parent_container("getSchema", &self.schema)
    }

    async fn invoke(&self, method: &str, args: Vec<LocalValue>) -> Result<LocalValue, InvokeError> {
        match (method, args.len()) {
            ("getName", 0) => Ok(Value::from(self.name.as_str())),
            ("getRowCount", 0) => Ok(Value::Int(self.row_count)),
            ("getSchema", 0) => Ok(parent_value(&self.schema)),
            ("getColumns", 0) => Ok(object_list(snapshot(&self.columns))),
            _ => Err(InvokeError::NoSuchOperation),
        }
    }
}

/// A table column.
pub struct MemoryColumn {
    name: String,
    type_name: String,
    nullable: bool,
    table: Weak<MemoryTable>,
}

#[async_trait]
impl Remotable for MemoryColumn {
    fn type_name(&self) -> &str {
        "MemoryColumn"
    }

    fn interfaces(&self) -> &[&str] {
        &[names::COLUMN]
    }

    fn display(&self) -> String {
        self.name.clone()
    }

    fn properties(&self) -> Option<PropertyMap> {
        Some(vec![
            ("name".to_string(), Value::from(self.name.as_str())),
            ("typeName".to_string(), Value::from(self.type_name.as_str())),
            ("nullable".to_string(), Value::Bool(self.nullable)),
        ])
    }

    fn containers(&self) -> Vec<(String, LocalRef)> {
        parent_container("getTable", &self.table)
    }

    async fn invoke(&self, method: &str, _args: Vec<LocalValue>) -> Result<LocalValue, InvokeError> {
        match method {
            "getName" => Ok(Value::from(self.name.as_str())),
            "getTypeName" => Ok(Value::from(self.type_name.as_str())),
            "isNullable" => Ok(Value::Bool(self.nullable)),
            "getTable" => Ok(parent_value(&self.table)),
            _ => Err(InvokeError::NoSuchOperation),
        }
    }
}

/// The catalog served by the demo worker.
#[must_use]
pub fn sample_catalog() -> Arc<MemoryDataSource> {
    let data_source = MemoryDataSource::new("pg-main", "postgres");

    let public = data_source.add_schema("public");
    let users = public.add_table("users", 1_204);
    users.add_column("id", "int8", false);
    users.add_column("email", "text", false);
    users.add_column("nickname", "text", true);
    let orders = public.add_table("orders", 8_311);
    orders.add_column("id", "int8", false);
    orders.add_column("user_id", "int8", false);
    orders.add_column("placed_at", "timestamptz", true);

    let audit = data_source.add_schema("audit");
    let events = audit.add_table("events", 52_017);
    events.add_column("id", "int8", false);
    events.add_column("payload", "jsonb", true);

    data_source
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_navigation_follows_the_graph() {
        let data_source = sample_catalog();

        let schema = data_source
            .invoke("getSchema", vec![Value::from("public")])
            .await
            .unwrap()
            .into_object()
            .unwrap();
        assert_eq!(schema.display(), "public");

        let tables = schema.invoke("getTables", Vec::new()).await.unwrap().into_list().unwrap();
        assert_eq!(tables.len(), 2);

        let parent = schema.invoke("getDataSource", Vec::new()).await.unwrap();
        assert!(Arc::ptr_eq(
            parent.as_object().unwrap(),
            &(Arc::clone(&data_source) as LocalRef)
        ));
    }

    #[tokio::test]
    async fn test_missing_schema_is_null() {
        let data_source = sample_catalog();
        let result = data_source
            .invoke("getSchema", vec![Value::from("nope")])
            .await
            .unwrap();
        assert!(result.is_null());
    }

    #[tokio::test]
    async fn test_bad_arguments_and_unknown_methods() {
        let data_source = sample_catalog();

        assert!(matches!(
            data_source.invoke("getSchema", vec![Value::Int(1)]).await,
            Err(InvokeError::InvalidArguments(_))
        ));
        assert!(matches!(
            data_source.invoke("dropDatabase", Vec::new()).await,
            Err(InvokeError::NoSuchOperation)
        ));
    }

    #[test]
    fn test_children_declare_their_parents() {
        let data_source = sample_catalog();
        let schema = data_source.schema("public").unwrap();
        let table = schema.table("users").unwrap();

        let containers = table.containers();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].0, "getSchema");
        assert!(Arc::ptr_eq(&containers[0].1, &(schema as LocalRef)));
        assert!(data_source.containers().is_empty());
    }
}
