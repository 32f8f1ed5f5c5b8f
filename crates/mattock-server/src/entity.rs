//! Non-player entities and the entity manager.

use crate::player::Player;
use bytes::BytesMut;
use mattock_inventory::Slot;
use mattock_protocol::{EntityMetadataEntry, Packet};
use mattock_types::Vec3d;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Protocol entity type ids.
pub const ENTITY_TYPE_PLAYER: i32 = 128;
pub const ENTITY_TYPE_ITEM: i32 = 58;

/// Ticks an item entity waits before it may be picked up.
pub const ITEM_PICKUP_DELAY_TICKS: i32 = 10;

/// A dropped item stack.
pub struct ItemEntity {
    pub entity_id: i32,
    pub uuid: Uuid,
    pub item: Slot,
    pub position: Mutex<Vec3d>,
    pub velocity: Mutex<Vec3d>,
    /// Remaining ticks until pickup eligibility.
    pub pickup_delay: AtomicI32,
    /// Per-tick horizontal and vertical velocity decay.
    pub drag: (f64, f64),
}

impl ItemEntity {
    pub fn new(entity_id: i32, item: Slot, position: Vec3d, velocity: Vec3d) -> Self {
        Self {
            entity_id,
            uuid: Uuid::new_v4(),
            item,
            position: Mutex::new(position),
            velocity: Mutex::new(velocity),
            pickup_delay: AtomicI32::new(ITEM_PICKUP_DELAY_TICKS),
            drag: (0.98, 0.98),
        }
    }

    pub fn can_be_picked_up(&self) -> bool {
        self.pickup_delay.load(Ordering::Relaxed) <= 0
    }

    /// Gravity plus drag, once per tick.
    pub fn tick_motion(&self) {
        let delay = self.pickup_delay.load(Ordering::Relaxed);
        if delay > 0 {
            self.pickup_delay.store(delay - 1, Ordering::Relaxed);
        }
        let mut velocity = self.velocity.lock().unwrap();
        velocity.y -= 0.04;
        velocity.x *= self.drag.0;
        velocity.y *= self.drag.1;
        velocity.z *= self.drag.0;
        let mut position = self.position.lock().unwrap();
        position.x += velocity.x;
        position.y += velocity.y;
        position.z += velocity.z;
    }

    pub fn spawn_packet(&self) -> Packet {
        let position = *self.position.lock().unwrap();
        let velocity = *self.velocity.lock().unwrap();
        Packet::SpawnEntity {
            entity_id: self.entity_id,
            entity_uuid: self.uuid,
            entity_type: ENTITY_TYPE_ITEM,
            x: position.x,
            y: position.y,
            z: position.z,
            pitch: 0,
            yaw: 0,
            head_yaw: 0,
            data: 0,
            velocity_x: (velocity.x * 8000.0) as i16,
            velocity_y: (velocity.y * 8000.0) as i16,
            velocity_z: (velocity.z * 8000.0) as i16,
        }
    }

    /// Metadata carrying the displayed item stack (index 8, slot type).
    pub fn metadata_packet(&self) -> Packet {
        let mut data = BytesMut::new();
        mattock_protocol::write_slot(&mut data, &self.item.to_wire());
        Packet::SetEntityMetadata {
            entity_id: self.entity_id,
            metadata: vec![EntityMetadataEntry {
                index: 8,
                type_id: 7,
                data: data.to_vec(),
            }],
        }
    }
}

/// Shared attributes factor into the variants; dynamic dispatch is a match.
#[derive(Clone)]
pub enum Entity {
    Player(Arc<Player>),
    Item(Arc<ItemEntity>),
}

impl Entity {
    pub fn entity_id(&self) -> i32 {
        match self {
            Entity::Player(p) => p.entity_id,
            Entity::Item(i) => i.entity_id,
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            Entity::Player(p) => p.uuid,
            Entity::Item(i) => i.uuid,
        }
    }

    pub fn entity_type(&self) -> i32 {
        match self {
            Entity::Player(_) => ENTITY_TYPE_PLAYER,
            Entity::Item(_) => ENTITY_TYPE_ITEM,
        }
    }
}

#[derive(Default)]
struct EntityMaps {
    by_id: HashMap<i32, Entity>,
    by_uuid: HashMap<String, i32>,
}

/// Id allocation and uuid mapping. Both maps live behind one mutex;
/// snapshots tolerate concurrent removal of observed entities.
pub struct EntityManager {
    next_id: AtomicI32,
    maps: Mutex<EntityMaps>,
}

impl Default for EntityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI32::new(1000),
            maps: Mutex::new(EntityMaps::default()),
        }
    }

    pub fn next_entity_id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn uuid_key(uuid: &Uuid) -> String {
        uuid.simple().to_string()
    }

    pub fn add(&self, entity: Entity) {
        let mut maps = self.maps.lock().unwrap();
        let key = Self::uuid_key(&entity.uuid());
        maps.by_uuid.insert(key, entity.entity_id());
        maps.by_id.insert(entity.entity_id(), entity);
    }

    /// Remove by uuid, returning the entity so the caller can broadcast
    /// its removal before dropping the reference.
    pub fn remove(&self, uuid: &Uuid) -> Option<Entity> {
        let mut maps = self.maps.lock().unwrap();
        let key = Self::uuid_key(uuid);
        let entity_id = maps.by_uuid.remove(&key)?;
        maps.by_id.remove(&entity_id)
    }

    pub fn get_by_uuid(&self, uuid: &Uuid) -> Option<Entity> {
        let maps = self.maps.lock().unwrap();
        let entity_id = maps.by_uuid.get(&Self::uuid_key(uuid))?;
        maps.by_id.get(entity_id).cloned()
    }

    pub fn get_by_id(&self, entity_id: i32) -> Option<Entity> {
        self.maps.lock().unwrap().by_id.get(&entity_id).cloned()
    }

    /// Snapshot of every entity. References stay valid after a concurrent
    /// remove; they just point at an entity no longer in the maps.
    pub fn get_all(&self) -> Vec<Entity> {
        self.maps.lock().unwrap().by_id.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(manager: &EntityManager) -> Arc<ItemEntity> {
        let entity = Arc::new(ItemEntity::new(
            manager.next_entity_id(),
            Slot::new(7, 3),
            Vec3d::new(0.5, -59.0, 0.5),
            Vec3d::new(0.0, 0.2, 0.0),
        ));
        manager.add(Entity::Item(entity.clone()));
        entity
    }

    #[test]
    fn test_ids_start_at_1000_and_increase() {
        let manager = EntityManager::new();
        assert_eq!(manager.next_entity_id(), 1000);
        assert_eq!(manager.next_entity_id(), 1001);
    }

    #[test]
    fn test_add_get_remove() {
        let manager = EntityManager::new();
        let entity = item(&manager);
        assert_eq!(
            manager.get_by_uuid(&entity.uuid).map(|e| e.entity_id()),
            Some(entity.entity_id)
        );
        assert_eq!(
            manager.get_by_id(entity.entity_id).map(|e| e.uuid()),
            Some(entity.uuid)
        );

        let removed = manager.remove(&entity.uuid).unwrap();
        assert_eq!(removed.entity_id(), entity.entity_id);
        assert!(manager.get_by_uuid(&entity.uuid).is_none());
        assert!(manager.get_by_id(entity.entity_id).is_none());
    }

    #[test]
    fn test_snapshot_survives_concurrent_remove() {
        let manager = EntityManager::new();
        let entity = item(&manager);
        let snapshot = manager.get_all();
        manager.remove(&entity.uuid);
        // The snapshot still holds a live reference.
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].entity_id(), entity.entity_id);
    }

    #[test]
    fn test_item_pickup_delay_counts_down() {
        let entity = ItemEntity::new(1000, Slot::new(7, 1), Vec3d::new(0.0, 0.0, 0.0), Vec3d::new(0.0, 0.0, 0.0));
        assert!(!entity.can_be_picked_up());
        for _ in 0..ITEM_PICKUP_DELAY_TICKS {
            entity.tick_motion();
        }
        assert!(entity.can_be_picked_up());
    }

    #[test]
    fn test_item_gravity_applies() {
        let entity = ItemEntity::new(1000, Slot::new(7, 1), Vec3d::new(0.0, 10.0, 0.0), Vec3d::new(0.0, 0.0, 0.0));
        entity.tick_motion();
        let position = *entity.position.lock().unwrap();
        assert!(position.y < 10.0);
    }
}
