//! Relationship resolution on top of the identity map.

use super::{RecordArray, Store, StoreError};
use crate::adapter::AdapterError;
use crate::record::{Id, Record, RecordKey};
use crate::schema::RelationshipDef;

impl Store {
    fn relationship(
        &self,
        record: &Record,
        name: &str,
        has_many: bool,
    ) -> Result<RelationshipDef, StoreError> {
        record
            .schema()
            .relationship_named(name)
            .filter(|rel| rel.is_has_many() == has_many)
            .cloned()
            .ok_or_else(|| StoreError::UnknownRelationship {
                model: record.model().to_string(),
                relationship: name.to_string(),
                kind: if has_many { "has_many" } else { "belongs_to" },
            })
    }

    /// The owner a `belongs_to` link points at, fetched if not cached.
    ///
    /// An empty link and an owner the server does not know both resolve to
    /// `None`; other adapter failures are returned.
    pub async fn resolve_belongs_to(
        &self,
        record: &Record,
        relationship: &str,
    ) -> Result<Option<Record>, StoreError> {
        let rel = self.relationship(record, relationship, false)?;
        let Some(owner) = record.belongs_to_id(&rel.name) else {
            return Ok(None);
        };
        let id = match owner {
            Id::Pending(_) => {
                let key = RecordKey {
                    model: rel.target.clone(),
                    id: owner,
                };
                return Ok(self.lookup(&key));
            }
            Id::Server(id) => id,
        };

        match self.find_loaded(rel.target.clone(), id.clone()).await {
            Ok(owner) => Ok(Some(owner)),
            Err(StoreError::Adapter(AdapterError::NotFound { .. })) => {
                tracing::debug!(
                    key = %record.key(),
                    relationship = %rel.name,
                    owner = %id,
                    "Owner not found, resolving to none"
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Cached owner of a `belongs_to` link; never touches the network.
    pub fn peek_belongs_to(&self, record: &Record, relationship: &str) -> Result<Option<Record>, StoreError> {
        let rel = self.relationship(record, relationship, false)?;
        Ok(record.belongs_to_id(&rel.name).and_then(|id| {
            self.lookup(&RecordKey {
                model: rel.target.clone(),
                id,
            })
        }))
    }

    /// Live view over the records whose inverse `belongs_to` points at
    /// `record`. Membership follows the store; nothing is fetched.
    pub fn resolve_has_many(&self, record: &Record, relationship: &str) -> Result<RecordArray, StoreError> {
        let rel = self.relationship(record, relationship, true)?;
        let inverse = rel.inverse.clone().ok_or_else(|| StoreError::UnknownRelationship {
            model: rel.target.to_string(),
            relationship: format!("inverse of {}", rel.name),
            kind: "belongs_to",
        })?;
        Ok(RecordArray::owned_by(
            self.clone(),
            rel.target.clone(),
            inverse,
            record.clone(),
        ))
    }
}
