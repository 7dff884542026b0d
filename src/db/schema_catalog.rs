use crate::db::{DatabaseGateway, GatewayError, TableColumns};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// The tables and columns generated SQL may reference, in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaWhitelist {
    schema: String,
    tables: Vec<TableColumns>,
}

impl SchemaWhitelist {
    pub fn new(schema: impl Into<String>, tables: Vec<TableColumns>) -> Self {
        Self {
            schema: schema.into(),
            tables,
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn tables(&self) -> &[TableColumns] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// `table: col1, col2, ...`, one line per table.
    pub fn render(&self) -> String {
        self.tables
            .iter()
            .map(|t| format!("{}: {}", t.table, t.columns.join(", ")))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Reads the whitelist from the live database. Nothing is cached; every
/// pipeline run sees the current catalog.
pub struct SchemaCatalog {
    gateway: Arc<dyn DatabaseGateway>,
    schema: String,
}

impl SchemaCatalog {
    pub fn new(gateway: Arc<dyn DatabaseGateway>, schema: Option<String>) -> Self {
        let schema = schema.unwrap_or_else(|| gateway.default_schema().to_string());
        Self { gateway, schema }
    }

    pub async fn fetch(&self) -> Result<SchemaWhitelist, GatewayError> {
        let rows = self.gateway.fetch_columns(&self.schema).await?;

        // Rows may arrive split per column batch; fold them back per table
        let mut tables: Vec<TableColumns> = Vec::new();
        for row in rows {
            match tables.iter_mut().find(|t| t.table == row.table) {
                Some(existing) => existing.columns.extend(row.columns),
                None => tables.push(row),
            }
        }

        info!(
            "Fetched whitelist for schema {}: {} tables",
            self.schema,
            tables.len()
        );
        debug!("Whitelist tables: {:?}", tables.iter().map(|t| &t.table).collect::<Vec<_>>());

        Ok(SchemaWhitelist::new(self.schema.clone(), tables))
    }
}
