//! Class metadata keyed by (api, package, class name).
//!
//! Every mutation runs inside a single LMDB write transaction, so lookups that
//! create a stub and upserts from parse workers never produce two records for
//! one key, no matter how many threads race on it. Same-key writes within one
//! ingestion are last-writer-wins.

use heed::Env;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{ApiRecord, ClassRecord};
use crate::parser::{ClassDeclaration, package_of, simple_name_of};
use crate::store::StrDb;

#[derive(Debug, Clone)]
pub struct ClassIndex {
    env: Arc<Env>,
    classes: StrDb,
}

impl ClassIndex {
    pub fn new(env: Arc<Env>, classes: StrDb) -> Self {
        Self { env, classes }
    }

    pub fn find(
        &self,
        api: &ApiRecord,
        package: &str,
        class_name: &str,
    ) -> Result<Option<ClassRecord>> {
        let key = class_key(api.id, package, class_name);
        let rtxn = self.env.read_txn()?;
        match self.classes.get(&rtxn, key.as_str())? {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    /// Returns the record for the key, persisting a stub first if there is none.
    pub fn get_or_create(
        &self,
        api: &ApiRecord,
        package: &str,
        class_name: &str,
    ) -> Result<ClassRecord> {
        let key = class_key(api.id, package, class_name);
        let mut wtxn = self.env.write_txn()?;
        if let Some(raw) = self.classes.get(&wtxn, key.as_str())? {
            return Ok(serde_json::from_str(raw)?);
        }

        let record = ClassRecord::stub(api, package, class_name);
        let payload = serde_json::to_string(&record)?;
        self.classes.put(&mut wtxn, key.as_str(), payload.as_str())?;
        wtxn.commit()?;
        Ok(record)
    }

    /// Query-side lookup by fully qualified name, e.g. `java.lang.String`.
    pub fn get_class(&self, api: &ApiRecord, qualified_name: &str) -> Result<ClassRecord> {
        let package = package_of(qualified_name);
        let name = simple_name_of(qualified_name);
        self.get_or_create(api, package, name)
    }

    /// Stores parsed detail for the declaration's key. An existing record keeps
    /// its identity; its content is replaced wholesale.
    pub fn upsert(&self, api: &ApiRecord, declaration: &ClassDeclaration) -> Result<ClassRecord> {
        let key = class_key(api.id, &declaration.package, &declaration.name);
        let mut wtxn = self.env.write_txn()?;

        let id = match self.classes.get(&wtxn, key.as_str())? {
            Some(raw) => serde_json::from_str::<ClassRecord>(raw)?.id,
            None => Uuid::new_v4(),
        };
        let record = ClassRecord {
            id,
            api_id: api.id,
            package: declaration.package.clone(),
            name: declaration.name.clone(),
            kind: Some(declaration.kind.as_str().to_string()),
            declaration: Some(declaration.declaration.clone()),
            methods: declaration.methods.clone(),
            nested: declaration.nested.clone(),
            source_hash: Some(declaration.source_hash.clone()),
            parsed: true,
        };
        let payload = serde_json::to_string(&record)?;
        self.classes.put(&mut wtxn, key.as_str(), payload.as_str())?;
        wtxn.commit()?;
        Ok(record)
    }

    pub fn classes(&self, api_id: Uuid) -> Result<Vec<ClassRecord>> {
        let prefix = api_prefix(api_id);
        let rtxn = self.env.read_txn()?;
        let mut records = Vec::new();
        for item in self.classes.prefix_iter(&rtxn, prefix.as_str())? {
            let (_, raw) = item?;
            records.push(serde_json::from_str::<ClassRecord>(raw)?);
        }
        Ok(records)
    }

    pub fn count(&self, api_id: Uuid) -> Result<usize> {
        let prefix = api_prefix(api_id);
        let rtxn = self.env.read_txn()?;
        let mut count = 0usize;
        for item in self.classes.prefix_iter(&rtxn, prefix.as_str())? {
            let _ = item?;
            count += 1;
        }
        Ok(count)
    }

    /// Drops every class stored under `api_id`.
    pub fn purge(&self, api_id: Uuid) -> Result<usize> {
        let prefix = api_prefix(api_id);
        let mut wtxn = self.env.write_txn()?;
        let mut keys = Vec::new();
        for item in self.classes.prefix_iter(&wtxn, prefix.as_str())? {
            let (key, _) = item?;
            keys.push(key.to_string());
        }
        for key in keys.iter() {
            self.classes.delete(&mut wtxn, key.as_str())?;
        }
        wtxn.commit()?;
        Ok(keys.len())
    }
}

fn api_prefix(api_id: Uuid) -> String {
    format!("{api_id}:")
}

fn class_key(api_id: Uuid, package: &str, class_name: &str) -> String {
    format!("{api_id}:{package}:{class_name}")
}
