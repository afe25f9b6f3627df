use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashMap;
use log::info;
use serde::{Deserialize, Serialize};

use crate::buffer::PageCache;
use crate::config::StorageConfig;
use crate::error::{DbError, DbResult};
use crate::file::FileId;
use crate::record::{RecordError, Schema};
use crate::storage::{BTreeFile, HeapFile, StorageFile, StorageKind};

/// Tables are identified by the id of their storage file
pub type TableId = FileId;

/// One registered table
#[derive(Clone)]
pub struct CatalogEntry {
    pub name: String,
    pub file: Arc<dyn StorageFile>,
    pub primary_key: Option<String>,
}

impl CatalogEntry {
    pub fn schema(&self) -> &Schema {
        self.file.schema()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    pub storage: StorageKind,
    pub path: PathBuf,
    pub fields: Schema,
    pub primary_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogMetadata {
    pub tables: Vec<TableMetadata>,
}

/// Registry of the tables known to one engine instance
#[derive(Default)]
pub struct Catalog {
    tables: AHashMap<TableId, CatalogEntry>,
    names: AHashMap<String, TableId>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `file` under `name`. `schema` must match the file's own schema.
    pub fn add_table(
        &mut self,
        name: impl Into<String>,
        file: Arc<dyn StorageFile>,
        schema: &Schema,
        primary_key: Option<&str>,
    ) -> DbResult<TableId> {
        let name = name.into();
        if file.schema() != schema {
            return Err(RecordError::SchemaMismatch(format!(
                "table {} was declared with a schema its file does not have",
                name
            ))
            .into());
        }
        if let Some(pk) = primary_key {
            if schema.find_field(pk).is_none() {
                return Err(RecordError::UnknownField(pk.to_string()).into());
            }
        }

        let id = file.id();
        if self.names.contains_key(&name) || self.tables.contains_key(&id) {
            return Err(DbError::DuplicateTable(name));
        }

        self.names.insert(name.clone(), id);
        self.tables.insert(
            id,
            CatalogEntry {
                name,
                file,
                primary_key: primary_key.map(str::to_string),
            },
        );
        Ok(id)
    }

    /// Id of the table registered as `name`
    pub fn table_id(&self, name: &str) -> DbResult<TableId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    /// Everything registered for table `id`
    pub fn entry(&self, id: TableId) -> DbResult<&CatalogEntry> {
        self.tables
            .get(&id)
            .ok_or_else(|| DbError::TableNotFound(id.to_string()))
    }

    /// Storage file backing table `id`
    pub fn file(&self, id: TableId) -> DbResult<Arc<dyn StorageFile>> {
        Ok(Arc::clone(&self.entry(id)?.file))
    }

    /// Record layout of table `id`
    pub fn schema(&self, id: TableId) -> DbResult<&Schema> {
        Ok(self.entry(id)?.schema())
    }

    pub fn table_name(&self, id: TableId) -> DbResult<&str> {
        Ok(&self.entry(id)?.name)
    }

    /// Primary key field name, if one was declared
    pub fn primary_key(&self, id: TableId) -> DbResult<Option<&str>> {
        Ok(self.entry(id)?.primary_key.as_deref())
    }

    /// Ids of every registered table, in no particular order
    pub fn table_ids(&self) -> impl Iterator<Item = TableId> + '_ {
        self.tables.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Serialisable description of every table, sorted by name
    pub fn metadata(&self) -> CatalogMetadata {
        let mut tables: Vec<TableMetadata> = self
            .tables
            .values()
            .map(|entry| TableMetadata {
                name: entry.name.clone(),
                storage: entry.file.kind(),
                path: entry.file.path().to_path_buf(),
                fields: entry.schema().clone(),
                primary_key: entry.primary_key.clone(),
            })
            .collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        CatalogMetadata { tables }
    }

    /// Write table metadata as JSON
    pub fn save(&self, path: &Path) -> DbResult<()> {
        let content = serde_json::to_string_pretty(&self.metadata())?;
        fs::write(path, content)?;
        info!("Saved catalog with {} tables to {}", self.len(), path.display());
        Ok(())
    }

    /// Reopen every table listed in a metadata file and register it with `cache`
    pub fn load(path: &Path, cache: &Arc<PageCache>, config: &StorageConfig) -> DbResult<Self> {
        let content = fs::read_to_string(path)?;
        let metadata: CatalogMetadata = serde_json::from_str(&content)?;

        let mut catalog = Self::new();
        for table in metadata.tables {
            let file: Arc<dyn StorageFile> = match table.storage {
                StorageKind::Heap => Arc::new(HeapFile::open(
                    Arc::clone(cache),
                    &table.path,
                    table.fields.clone(),
                )?),
                StorageKind::BTree { key_field } => Arc::new(BTreeFile::open(
                    Arc::clone(cache),
                    &table.path,
                    table.fields.clone(),
                    key_field,
                    &config.btree,
                )?),
            };
            catalog.add_table(table.name, file, &table.fields, table.primary_key.as_deref())?;
        }

        info!("Loaded catalog with {} tables from {}", catalog.len(), path.display());
        Ok(catalog)
    }
}
