use heed::Env;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{ApiRecord, ApiTarget};
use crate::store::StrDb;

/// Registered APIs keyed by id, with an upper-cased name index enforcing
/// case-insensitive uniqueness.
#[derive(Debug, Clone)]
pub struct ApiRegistry {
    env: Arc<Env>,
    apis: StrDb,
    names: StrDb,
}

impl ApiRegistry {
    pub fn new(env: Arc<Env>, apis: StrDb, names: StrDb) -> Self {
        Self { env, apis, names }
    }

    /// Inserts or replaces `api`. Fails with `DuplicateName` if a different
    /// record already holds the same name in any letter case.
    pub fn save(&self, api: &ApiRecord) -> Result<()> {
        let upper = api.upper_name();
        let id = api.id.to_string();
        let payload = serde_json::to_string(api)?;

        let mut wtxn = self.env.write_txn()?;
        if let Some(owner) = self.names.get(&wtxn, upper.as_str())?
            && owner != id
        {
            return Err(Error::DuplicateName {
                name: api.name.clone(),
            });
        }

        // a re-save under a new name must release the old one
        if let Some(previous) = self.apis.get(&wtxn, id.as_str())? {
            let previous: ApiRecord = serde_json::from_str(previous)?;
            let previous_upper = previous.upper_name();
            if previous_upper != upper {
                self.names.delete(&mut wtxn, previous_upper.as_str())?;
            }
        }

        self.apis.put(&mut wtxn, id.as_str(), payload.as_str())?;
        self.names.put(&mut wtxn, upper.as_str(), id.as_str())?;
        wtxn.commit()?;

        tracing::debug!(api = %api.name, id = %api.id, "saved api");
        Ok(())
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<ApiRecord>> {
        let rtxn = self.env.read_txn()?;
        let key = id.to_string();
        match self.apis.get(&rtxn, key.as_str())? {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<ApiRecord>> {
        let rtxn = self.env.read_txn()?;
        let upper = name.to_uppercase();
        let Some(id) = self.names.get(&rtxn, upper.as_str())? else {
            return Ok(None);
        };
        match self.apis.get(&rtxn, id)? {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    /// Id first, then name.
    pub fn resolve(&self, target: &ApiTarget) -> Result<Option<ApiRecord>> {
        if let Some(id) = target.id
            && let Some(api) = self.find_by_id(id)?
        {
            return Ok(Some(api));
        }
        match target.name.as_deref() {
            Some(name) => self.find_by_name(name),
            None => Ok(None),
        }
    }

    /// Removes the record and its name entry. Returns `false` when absent.
    pub fn delete(&self, id: Uuid) -> Result<bool> {
        let key = id.to_string();
        let mut wtxn = self.env.write_txn()?;
        let Some(raw) = self.apis.get(&wtxn, key.as_str())? else {
            return Ok(false);
        };
        let api: ApiRecord = serde_json::from_str(raw)?;
        let upper = api.upper_name();

        self.apis.delete(&mut wtxn, key.as_str())?;
        if self.names.get(&wtxn, upper.as_str())? == Some(key.as_str()) {
            self.names.delete(&mut wtxn, upper.as_str())?;
        }
        wtxn.commit()?;

        tracing::debug!(api = %api.name, id = %api.id, "deleted api");
        Ok(true)
    }

    pub fn list(&self) -> Result<Vec<ApiRecord>> {
        let rtxn = self.env.read_txn()?;
        let mut apis = Vec::new();
        for item in self.apis.iter(&rtxn)? {
            let (_, raw) = item?;
            apis.push(serde_json::from_str::<ApiRecord>(raw)?);
        }
        apis.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(apis)
    }
}
