use std::any::type_name;
use std::borrow::Cow;

use bevy::ecs::component::Mutable;
use bevy::ecs::query::QueryFilter;
use bevy::prelude::*;

use crate::error::MapError;

/// Entity bookkeeping on top of the bevy world, with errors instead of panics.
pub trait EntityStore {
    fn create_entity(&mut self, name: impl Into<Cow<'static, str>>) -> Entity;

    fn add_component(&mut self, entity: Entity, bundle: impl Bundle) -> Result<(), MapError>;

    fn remove_component<C: Component>(&mut self, entity: Entity) -> Result<Option<C>, MapError>;

    fn entities_with<F: QueryFilter>(&mut self) -> Vec<Entity>;

    /// The only entity carrying `C`. Zero or several carriers are an error.
    fn singleton_entity<C: Component>(&mut self) -> Result<Entity, MapError>;

    fn get_singleton<C: Component>(&mut self) -> Result<&C, MapError>;

    fn get_singleton_mut<C: Component<Mutability = Mutable>>(&mut self) -> Result<Mut<'_, C>, MapError>;

    fn count<C: Component>(&mut self) -> usize;
}

impl EntityStore for World {
    fn create_entity(&mut self, name: impl Into<Cow<'static, str>>) -> Entity {
        self.spawn(Name::new(name)).id()
    }

    fn add_component(&mut self, entity: Entity, bundle: impl Bundle) -> Result<(), MapError> {
        self.get_entity_mut(entity)
            .map_err(|_| MapError::NoSuchEntity(entity))?
            .insert(bundle);
        Ok(())
    }

    fn remove_component<C: Component>(&mut self, entity: Entity) -> Result<Option<C>, MapError> {
        Ok(self
            .get_entity_mut(entity)
            .map_err(|_| MapError::NoSuchEntity(entity))?
            .take::<C>())
    }

    fn entities_with<F: QueryFilter>(&mut self) -> Vec<Entity> {
        let mut query = self.query_filtered::<Entity, F>();
        query.iter(self).collect()
    }

    fn singleton_entity<C: Component>(&mut self) -> Result<Entity, MapError> {
        let mut query = self.query_filtered::<Entity, With<C>>();
        let mut carriers = query.iter(self);
        match (carriers.next(), carriers.next()) {
            (Some(entity), None) => Ok(entity),
            _ => Err(MapError::MissingSingleton(type_name::<C>())),
        }
    }

    fn get_singleton<C: Component>(&mut self) -> Result<&C, MapError> {
        let mut query = self.query::<&C>();
        let mut carriers = query.iter(self);
        match (carriers.next(), carriers.next()) {
            (Some(component), None) => Ok(component),
            _ => Err(MapError::MissingSingleton(type_name::<C>())),
        }
    }

    fn get_singleton_mut<C: Component<Mutability = Mutable>>(&mut self) -> Result<Mut<'_, C>, MapError> {
        let entity = self.singleton_entity::<C>()?;
        self.get_mut::<C>(entity)
            .ok_or(MapError::MissingSingleton(type_name::<C>()))
    }

    fn count<C: Component>(&mut self) -> usize {
        let mut query = self.query_filtered::<(), With<C>>();
        query.iter(self).count()
    }
}
