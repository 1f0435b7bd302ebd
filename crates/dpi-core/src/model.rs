//! Capability interfaces of the metadata browser.
//!
//! Each interface has a marker type carrying its forwarding table, a domain
//! trait, and an implementation of that trait on the typed stub.

use async_trait::async_trait;

use crate::{
    error::{DpiError, DpiResult},
    interface::{InterfaceCatalog, InterfaceDescriptor, OperationDescriptor, RemoteInterface},
    stub::RemoteHandle,
    value::Value,
};

/// Interface names as they appear on the wire.
pub mod names {
    pub const DATA_SOURCE: &str = "DataSource";
    pub const SCHEMA: &str = "Schema";
    pub const TABLE: &str = "Table";
    pub const COLUMN: &str = "Column";
}

const DATA_SOURCE: InterfaceDescriptor = InterfaceDescriptor {
    name: names::DATA_SOURCE,
    extends: &[],
    operations: &[
        OperationDescriptor::accessor("getName"),
        OperationDescriptor::accessor("getDriverName"),
        OperationDescriptor::navigation("getSchemas", 0, names::SCHEMA),
        OperationDescriptor::navigation("getSchema", 1, names::SCHEMA),
    ],
};

const SCHEMA: InterfaceDescriptor = InterfaceDescriptor {
    name: names::SCHEMA,
    extends: &[],
    operations: &[
        OperationDescriptor::accessor("getName"),
        OperationDescriptor::navigation("getDataSource", 0, names::DATA_SOURCE),
        OperationDescriptor::navigation("getTables", 0, names::TABLE),
        OperationDescriptor::navigation("getTable", 1, names::TABLE),
    ],
};

const TABLE: InterfaceDescriptor = InterfaceDescriptor {
    name: names::TABLE,
    extends: &[],
    operations: &[
        OperationDescriptor::accessor("getName"),
        OperationDescriptor::accessor("getRowCount"),
        OperationDescriptor::navigation("getSchema", 0, names::SCHEMA),
        OperationDescriptor::navigation("getColumns", 0, names::COLUMN),
    ],
};

const COLUMN: InterfaceDescriptor = InterfaceDescriptor {
    name: names::COLUMN,
    extends: &[],
    operations: &[
        OperationDescriptor::accessor("getName"),
        OperationDescriptor::accessor("getTypeName"),
        OperationDescriptor::accessor("isNullable"),
        OperationDescriptor::navigation("getTable", 0, names::TABLE),
    ],
};

pub enum DataSourceInterface {}
pub enum SchemaInterface {}
pub enum TableInterface {}
pub enum ColumnInterface {}

impl RemoteInterface for DataSourceInterface {
    const DESCRIPTOR: &'static InterfaceDescriptor = &DATA_SOURCE;
}

impl RemoteInterface for SchemaInterface {
    const DESCRIPTOR: &'static InterfaceDescriptor = &SCHEMA;
}

impl RemoteInterface for TableInterface {
    const DESCRIPTOR: &'static InterfaceDescriptor = &TABLE;
}

impl RemoteInterface for ColumnInterface {
    const DESCRIPTOR: &'static InterfaceDescriptor = &COLUMN;
}

pub type DataSourceStub = RemoteHandle<DataSourceInterface>;
pub type SchemaStub = RemoteHandle<SchemaInterface>;
pub type TableStub = RemoteHandle<TableInterface>;
pub type ColumnStub = RemoteHandle<ColumnInterface>;

/// Catalog with every interface of this module registered.
#[must_use]
pub fn standard_catalog() -> InterfaceCatalog {
    InterfaceCatalog::new()
        .with::<DataSourceInterface>()
        .with::<SchemaInterface>()
        .with::<TableInterface>()
        .with::<ColumnInterface>()
}

fn required<T>(parent: Option<T>, method: &str) -> DpiResult<T> {
    parent.ok_or_else(|| DpiError::Protocol(format!("{method} returned null")))
}

#[async_trait]
pub trait DataSource: Send + Sync {
    async fn name(&self) -> DpiResult<String>;
    async fn driver_name(&self) -> DpiResult<String>;
    async fn schemas(&self) -> DpiResult<Vec<SchemaStub>>;
    async fn schema(&self, name: &str) -> DpiResult<Option<SchemaStub>>;
}

#[async_trait]
pub trait Schema: Send + Sync {
    async fn name(&self) -> DpiResult<String>;
    async fn data_source(&self) -> DpiResult<DataSourceStub>;
    async fn tables(&self) -> DpiResult<Vec<TableStub>>;
    async fn table(&self, name: &str) -> DpiResult<Option<TableStub>>;
}

#[async_trait]
pub trait Table: Send + Sync {
    async fn name(&self) -> DpiResult<String>;
    async fn row_count(&self) -> DpiResult<i64>;
    async fn schema(&self) -> DpiResult<SchemaStub>;
    async fn columns(&self) -> DpiResult<Vec<ColumnStub>>;
}

#[async_trait]
pub trait Column: Send + Sync {
    async fn name(&self) -> DpiResult<String>;
    async fn data_type(&self) -> DpiResult<String>;
    async fn nullable(&self) -> DpiResult<bool>;
    async fn table(&self) -> DpiResult<TableStub>;
}

#[async_trait]
impl DataSource for DataSourceStub {
    async fn name(&self) -> DpiResult<String> {
        self.text("getName").await
    }

    async fn driver_name(&self) -> DpiResult<String> {
        self.text("getDriverName").await
    }

    async fn schemas(&self) -> DpiResult<Vec<SchemaStub>> {
        self.navigate_all("getSchemas", Vec::new()).await
    }

    async fn schema(&self, name: &str) -> DpiResult<Option<SchemaStub>> {
        self.navigate("getSchema", vec![Value::from(name)]).await
    }
}

#[async_trait]
impl Schema for SchemaStub {
    async fn name(&self) -> DpiResult<String> {
        self.text("getName").await
    }

    async fn data_source(&self) -> DpiResult<DataSourceStub> {
        required(self.navigate("getDataSource", Vec::new()).await?, "getDataSource")
    }

    async fn tables(&self) -> DpiResult<Vec<TableStub>> {
        self.navigate_all("getTables", Vec::new()).await
    }

    async fn table(&self, name: &str) -> DpiResult<Option<TableStub>> {
        self.navigate("getTable", vec![Value::from(name)]).await
    }
}

#[async_trait]
impl Table for TableStub {
    async fn name(&self) -> DpiResult<String> {
        self.text("getName").await
    }

    async fn row_count(&self) -> DpiResult<i64> {
        self.integer("getRowCount").await
    }

    async fn schema(&self) -> DpiResult<SchemaStub> {
        required(self.navigate("getSchema", Vec::new()).await?, "getSchema")
    }

    async fn columns(&self) -> DpiResult<Vec<ColumnStub>> {
        self.navigate_all("getColumns", Vec::new()).await
    }
}

#[async_trait]
impl Column for ColumnStub {
    async fn name(&self) -> DpiResult<String> {
        self.text("getName").await
    }

    async fn data_type(&self) -> DpiResult<String> {
        self.text("getTypeName").await
    }

    async fn nullable(&self) -> DpiResult<bool> {
        self.flag("isNullable").await
    }

    async fn table(&self) -> DpiResult<TableStub> {
        required(self.navigate("getTable", Vec::new()).await?, "getTable")
    }
}
