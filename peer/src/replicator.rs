//! Replicated tower and platform transforms
//!
//! The authority computes new absolute transforms and returns them as push
//! messages; every peer applies pushes as they arrive. Platform rotations are
//! owned by the seed stream, so a platform push only moves the platform.
//!
//! Balls are integrated on the authority only: a ground contact launches the
//! ball upward and gravity pulls it down again, one push per tick in flight.

use crate::config::MatchConfig;
use crate::random_sync::{DerivedPlatform, PlatformLayout};
use log::{debug, warn};
use shared::{
    EntityKind, EntityRef, RpcMessage, Slot, Vec3, BALL_SPAWN_HEIGHT, PLATFORMS_PER_TOWER,
};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub position: Vec3,
    /// Yaw in degrees.
    pub rotation: f32,
}

#[derive(Debug)]
pub struct EntityStateReplicator {
    entities: HashMap<EntityRef, Transform>,
    layouts: HashMap<EntityRef, PlatformLayout>,
    last_trigger: HashMap<Slot, u64>,
    next_platform_y: [f32; 2],
    pending_jumps: [bool; 2],
    /// Vertical ball velocity, set once the ball has first jumped.
    ball_velocity: [Option<f32>; 2],
    cooldown_ticks: u64,
    rotation_speed: f32,
    platform_spacing: f32,
    jump_speed: f32,
    gravity: f32,
}

impl EntityStateReplicator {
    pub fn new(config: &MatchConfig) -> Self {
        Self {
            entities: HashMap::new(),
            layouts: HashMap::new(),
            last_trigger: HashMap::new(),
            next_platform_y: [0.0; 2],
            pending_jumps: [false; 2],
            ball_velocity: [None; 2],
            cooldown_ticks: config.reposition_cooldown_ticks,
            rotation_speed: config.rotation_speed,
            platform_spacing: config.platform_spacing,
            jump_speed: config.jump_speed,
            gravity: config.gravity,
        }
    }

    /// Registers the slot's tower, platforms and ball at their spawn transforms.
    ///
    /// Returns the platforms in derivation order. Spawning an already
    /// spawned slot leaves its entities untouched.
    pub fn spawn(&mut self, slot: Slot) -> Vec<EntityRef> {
        let origin = slot.spawn_position();
        let platforms: Vec<EntityRef> = (0..PLATFORMS_PER_TOWER)
            .map(|i| EntityRef::platform(slot, i))
            .collect();

        if self.entities.contains_key(&EntityRef::tower(slot)) {
            return platforms;
        }

        self.entities.insert(
            EntityRef::tower(slot),
            Transform {
                position: origin,
                rotation: 0.0,
            },
        );
        for (i, platform) in platforms.iter().enumerate() {
            let y = origin.y + self.platform_spacing * (1.0 - i as f32);
            self.entities.insert(
                *platform,
                Transform {
                    position: origin.with_y(y),
                    rotation: 0.0,
                },
            );
        }
        self.entities.insert(
            EntityRef::ball(slot),
            Transform {
                position: origin.offset_y(BALL_SPAWN_HEIGHT),
                rotation: 0.0,
            },
        );
        self.next_platform_y[slot.index()] = origin.y - self.platform_spacing;

        debug!("Spawned {} entities for {}", platforms.len() + 2, slot);
        platforms
    }

    pub fn is_spawned(&self, slot: Slot) -> bool {
        self.entities.contains_key(&EntityRef::tower(slot))
    }

    pub fn transform(&self, entity: EntityRef) -> Option<Transform> {
        self.entities.get(&entity).copied()
    }

    pub fn layout(&self, entity: EntityRef) -> Option<&PlatformLayout> {
        self.layouts.get(&entity)
    }

    pub fn next_platform_y(&self, slot: Slot) -> f32 {
        self.next_platform_y[slot.index()]
    }

    /// Applies an absolute transform. Unknown entities are skipped.
    pub fn apply_push(&mut self, entity: EntityRef, position: Vec3, rotation: f32) -> bool {
        let Some(current) = self.entities.get_mut(&entity) else {
            warn!("Push for unknown entity {}, ignoring", entity);
            return false;
        };

        current.position = position;
        if !matches!(entity.kind, EntityKind::Platform(_)) {
            current.rotation = rotation;
        }
        true
    }

    pub fn apply_derived(&mut self, derived: &[DerivedPlatform]) {
        for platform in derived {
            match self.entities.get_mut(&platform.target) {
                Some(current) => {
                    current.rotation = f32::from(platform.rotation);
                    self.layouts.insert(platform.target, platform.layout);
                }
                None => warn!("Derived values for unknown entity {}", platform.target),
            }
        }
    }

    /// Cooldown gate for repositioning triggers, evaluated by the authority.
    pub fn accept_trigger(&mut self, slot: Slot, tick: u64) -> bool {
        if let Some(&last) = self.last_trigger.get(&slot) {
            if tick.saturating_sub(last) < self.cooldown_ticks {
                debug!("Reposition trigger for {} inside cooldown", slot);
                return false;
            }
        }
        self.last_trigger.insert(slot, tick);
        true
    }

    /// Shifts the tower and its platforms by `delta_y` and returns the pushes.
    pub fn reposition(&mut self, slot: Slot, delta_y: f32) -> Vec<RpcMessage> {
        let mut pushes = Vec::new();
        let tower = std::iter::once(EntityRef::tower(slot));
        let platforms = (0..PLATFORMS_PER_TOWER).map(|i| EntityRef::platform(slot, i));

        for entity in tower.chain(platforms) {
            if let Some(current) = self.entities.get_mut(&entity) {
                current.position = current.position.offset_y(delta_y);
                pushes.push(push_message(entity, *current));
            }
        }
        self.next_platform_y[slot.index()] += delta_y;

        debug!("Repositioned {} by {}", slot, delta_y);
        pushes
    }

    /// Integrates one input sample into the tower's yaw.
    pub fn rotate(&mut self, slot: Slot, rotation_delta: f32, dt: f32) -> Option<RpcMessage> {
        let entity = EntityRef::tower(slot);
        let current = self.entities.get_mut(&entity)?;

        current.rotation =
            (current.rotation - rotation_delta * self.rotation_speed * dt).rem_euclid(360.0);
        Some(push_message(entity, *current))
    }

    /// The ball passed platform `passed`; the other platform drops to the next depth.
    pub fn advance_platform(&mut self, slot: Slot, passed: u8) -> Option<RpcMessage> {
        if passed >= PLATFORMS_PER_TOWER {
            warn!("{} has no platform {}", slot, passed);
            return None;
        }

        let entity = EntityRef::platform(slot, (passed + 1) % PLATFORMS_PER_TOWER);
        let next_y = &mut self.next_platform_y[slot.index()];
        let current = self.entities.get_mut(&entity)?;

        current.position = current.position.with_y(*next_y);
        *next_y -= self.platform_spacing;
        Some(push_message(entity, *current))
    }

    /// Marks the slot's ball to jump on the next `step_balls`.
    pub fn request_jump(&mut self, slot: Slot) -> bool {
        if !self.entities.contains_key(&EntityRef::ball(slot)) {
            warn!("{} has no ball to jump", slot);
            return false;
        }
        self.pending_jumps[slot.index()] = true;
        true
    }

    /// Applies pending jumps and advances every ball in flight by `dt`.
    pub fn step_balls(&mut self, dt: f32) -> Vec<RpcMessage> {
        let mut pushes = Vec::new();

        for slot in Slot::ALL {
            let i = slot.index();
            if std::mem::take(&mut self.pending_jumps[i]) {
                debug!("{} ball jumps", slot);
                self.ball_velocity[i] = Some(self.jump_speed);
            }

            let Some(velocity) = self.ball_velocity[i].as_mut() else {
                continue;
            };
            let entity = EntityRef::ball(slot);
            let Some(current) = self.entities.get_mut(&entity) else {
                continue;
            };

            *velocity -= self.gravity * dt;
            current.position = current.position.offset_y(*velocity * dt);
            pushes.push(push_message(entity, *current));
        }
        pushes
    }
}

fn push_message(entity: EntityRef, transform: Transform) -> RpcMessage {
    RpcMessage::PushEntityPosition {
        entity,
        position: transform.position,
        rotation: transform.rotation,
    }
}
