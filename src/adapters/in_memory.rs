//! In-memory implementation of GeoProvider for testing and development

use crate::core::auth::AuthContext;
use crate::core::entity::{EntityDraft, EntityKind, GeoEntity, SourceSystem};
use crate::core::error::GeoError;
use crate::core::query::GeoFilter;
use crate::core::service::{Fetched, GeoProvider};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// In-memory provider implementation
///
/// Keeps insertion order. Uses RwLock for thread-safe access.
#[derive(Clone)]
pub struct InMemoryProvider {
    name: String,
    entities: Arc<RwLock<IndexMap<String, GeoEntity>>>,
}

impl InMemoryProvider {
    /// Create an empty provider registered as `memory`
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entities: Arc::new(RwLock::new(IndexMap::new())),
        }
    }

    /// Seed with existing entities; later duplicates replace earlier ones
    pub fn with_entities(self, entities: impl IntoIterator<Item = GeoEntity>) -> Self {
        {
            let mut map = self
                .entities
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for entity in entities {
                map.insert(entity.id.clone(), entity);
            }
        }
        self
    }

    pub fn get(&self, id: &str) -> Result<Option<GeoEntity>, GeoError> {
        let entities = self
            .entities
            .read()
            .map_err(|e| GeoError::Internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(entities.get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn list(&self, filter: &GeoFilter) -> Result<Vec<GeoEntity>, GeoError> {
        let entities = self
            .entities
            .read()
            .map_err(|e| GeoError::Internal(format!("Failed to acquire read lock: {}", e)))?;

        let category = filter.category_id.map(|c| c.to_string());
        let text = filter.text().map(str::to_lowercase);

        Ok(entities
            .values()
            .filter(|entity| {
                category
                    .as_deref()
                    .is_none_or(|c| entity.attribute("category_id") == Some(c))
            })
            .filter(|entity| {
                text.as_deref()
                    .is_none_or(|t| entity.title().to_lowercase().contains(t))
            })
            .filter(|entity| match &filter.bounds {
                Some(bounds) => entity.location().is_some_and(|p| bounds.contains(&p)),
                None => true,
            })
            .cloned()
            .collect())
    }

    /// Apply the draft's non-empty parts to `entity`
    fn apply(entity: GeoEntity, draft: EntityDraft) -> GeoEntity {
        let mut entity = entity;
        if let Some(kind) = draft.kind {
            entity.kind = kind;
        }
        if let Some(point) = draft.location() {
            entity.latitude = Some(point.lat);
            entity.longitude = Some(point.lng);
        }
        if let Some(title) = draft.title {
            entity.attributes.insert("title".to_string(), title);
        }
        if let Some(category_id) = draft.category_id {
            entity
                .attributes
                .insert("category_id".to_string(), category_id.to_string());
        }
        entity.attributes.extend(draft.attributes);
        match draft.shape {
            Some(shape) => entity.with_shape(shape),
            None => entity,
        }
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GeoProvider for InMemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_system(&self) -> SourceSystem {
        SourceSystem::Local
    }

    async fn fetch_entities(&self, _auth: &AuthContext, filter: &GeoFilter) -> Fetched<GeoEntity> {
        Fetched::from_result(&self.name, self.list(filter))
    }

    async fn create_entity(
        &self,
        _auth: &AuthContext,
        draft: EntityDraft,
    ) -> Result<GeoEntity, GeoError> {
        draft.validate()?;
        let kind = draft.kind.unwrap_or(EntityKind::Point);
        let entity = Self::apply(
            GeoEntity::new(Uuid::new_v4().to_string(), SourceSystem::Local, kind),
            draft,
        );

        let mut entities = self
            .entities
            .write()
            .map_err(|e| GeoError::Internal(format!("Failed to acquire write lock: {}", e)))?;

        entities.insert(entity.id.clone(), entity.clone());

        Ok(entity)
    }

    async fn update_entity(
        &self,
        _auth: &AuthContext,
        id: &str,
        draft: EntityDraft,
    ) -> Result<GeoEntity, GeoError> {
        draft.validate()?;
        let mut entities = self
            .entities
            .write()
            .map_err(|e| GeoError::Internal(format!("Failed to acquire write lock: {}", e)))?;

        let current = entities.get(id).cloned().ok_or_else(|| GeoError::NotFound {
            provider: self.name.clone(),
            id: id.to_string(),
        })?;
        let updated = Self::apply(current, draft);

        entities.insert(id.to_string(), updated.clone());

        Ok(updated)
    }

    async fn delete_entity(&self, _auth: &AuthContext, id: &str) -> Result<(), GeoError> {
        let mut entities = self
            .entities
            .write()
            .map_err(|e| GeoError::Internal(format!("Failed to acquire write lock: {}", e)))?;

        entities
            .shift_remove(id)
            .map(|_| ())
            .ok_or_else(|| GeoError::NotFound {
                provider: self.name.clone(),
                id: id.to_string(),
            })
    }
}
