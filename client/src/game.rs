//! Client-side entity roster.
//!
//! The roster is the client's picture of the room: one [`Entity`] per player
//! the server has told us about, plus the locally controlled player. Inbound
//! pulses and position updates are merged in with a drift/teleport policy,
//! and [`Roster::step`] advances everything by one simulation tick.

use crate::config::PlayerInfo;
use log::{debug, info, warn};
use shared::{
    resolve_strike, AttackContact, Candidate, Facing, HealthUpdate, PlayerAttack, PositionUpdate,
    PulseUpdate, Strike, Vec2, DEFAULT_HITBOX_RADIUS, DEFAULT_MAX_HP, IMPACT_DECAY,
    IMPACT_REST_THRESHOLD, IMPACT_VELOCITY, MAX_STEP_SECONDS, MOVEMENT_SPEED, RECONCILE_RADIUS,
};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: String,
    pub position: Vec2,
    /// Unit length or zero.
    pub trajectory: Vec2,
    pub destination: Option<Vec2>,
    pub current_hp: i32,
    pub max_hp: i32,
    pub facing: Facing,
    pub hitbox_radius: f64,
    pub impact_trajectory: Vec2,
    pub impact_velocity: f64,
}

impl Entity {
    pub fn new(id: impl Into<String>, position: Vec2, health: HealthUpdate) -> Self {
        Self {
            id: id.into(),
            position,
            trajectory: Vec2::ZERO,
            destination: None,
            current_hp: health.current,
            max_hp: health.max,
            facing: Facing::default(),
            hitbox_radius: DEFAULT_HITBOX_RADIUS,
            impact_trajectory: Vec2::ZERO,
            impact_velocity: 0.0,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.current_hp <= 0
    }

    pub fn strike_origin(&self) -> Vec2 {
        self.facing.strike_origin(self.position)
    }

    fn set_health(&mut self, health: HealthUpdate) {
        self.current_hp = health.current;
        self.max_hp = health.max;
    }

    fn set_trajectory(&mut self, trajectory: Vec2) {
        self.trajectory = trajectory.normalized();
        self.facing = Facing::from_trajectory(self.trajectory, self.facing);
    }

    /// Merges an authoritative position into a tracked remote entity.
    ///
    /// Depends only on `self` and `update`, so applying the same update twice
    /// lands in the same state as applying it once.
    fn reconcile(&mut self, update: &PositionUpdate) {
        let distance = self.position.distance(update.position);
        if distance == 0.0 {
            self.trajectory = Vec2::ZERO;
            self.destination = None;
        } else if distance <= RECONCILE_RADIUS {
            self.set_trajectory(update.trajectory);
            self.destination = Some(update.position);
        } else {
            debug!(
                "Entity {} is {:.1} units off; teleporting",
                self.id, distance
            );
            self.position = update.position;
            self.trajectory = Vec2::ZERO;
            self.destination = None;
        }
    }

    pub fn knock_back(&mut self, direction: Vec2) {
        self.impact_trajectory = direction.normalized();
        self.impact_velocity = IMPACT_VELOCITY;
    }

    /// Advances one frame. A non-zero trajectory takes priority over the
    /// destination, which is only walked toward while standing still.
    /// Knockback applies on top of either.
    fn step(&mut self, dt: f64) {
        if !self.trajectory.is_zero() {
            self.position = self.position.stepped(self.trajectory, dt, MOVEMENT_SPEED);
        } else if let Some(destination) = self.destination {
            self.facing =
                Facing::from_trajectory(self.position.direction_to(destination), self.facing);
            self.position = self.position.step_toward(destination, dt, MOVEMENT_SPEED);
            if self.position == destination {
                self.destination = None;
            }
        }

        if self.impact_velocity > 0.0 {
            self.position = self
                .position
                .stepped(self.impact_trajectory, dt, self.impact_velocity);
            self.impact_velocity *= IMPACT_DECAY;
            if self.impact_velocity < IMPACT_REST_THRESHOLD {
                self.impact_velocity = 0.0;
                self.impact_trajectory = Vec2::ZERO;
            }
        }
    }
}

/// What a pulse batch changed, for the renderer and the account layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PulseReport {
    pub spawned: Vec<String>,
    pub removed: Vec<String>,
    /// Newly spawned ids with no cached [`PlayerInfo`].
    pub needs_metadata: Vec<String>,
    /// The local player's health just dropped to zero.
    pub local_died: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Ignored,
    Reconciled,
    Spawned,
}

/// One contact of a strike, as seen by the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct CombatHit {
    pub attacker_id: String,
    pub victim_id: String,
    pub strength: f64,
    /// The victim is the local player.
    pub local_victim: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Roster {
    local_id: String,
    entities: HashMap<String, Entity>,
    metadata: HashMap<String, PlayerInfo>,
    local_dead: bool,
}

impl Roster {
    pub fn new(local_id: impl Into<String>, spawn: Vec2) -> Self {
        let local_id = local_id.into();
        let local = Entity::new(
            local_id.clone(),
            spawn,
            HealthUpdate {
                current: DEFAULT_MAX_HP,
                max: DEFAULT_MAX_HP,
            },
        );
        let mut entities = HashMap::new();
        entities.insert(local_id.clone(), local);
        Self {
            local_id,
            entities,
            metadata: HashMap::new(),
            local_dead: false,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn local(&self) -> Option<&Entity> {
        self.entities.get(&self.local_id)
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn is_local_dead(&self) -> bool {
        self.local_dead
    }

    pub fn player_info(&self, id: &str) -> Option<&PlayerInfo> {
        self.metadata.get(id)
    }

    /// Caches metadata for a tracked entity. Untracked ids are refused so the
    /// cache can never outlive the roster entries it describes.
    pub fn set_player_info(&mut self, id: &str, info: PlayerInfo) -> bool {
        if !self.entities.contains_key(id) {
            debug!("Ignoring player info for untracked id {}", id);
            return false;
        }
        self.metadata.insert(id.to_string(), info);
        true
    }

    /// All entities, ordered by id.
    pub fn snapshot(&self) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self.entities.values().cloned().collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        entities
    }

    /// Merges a full-roster pulse.
    ///
    /// Every entry is handled on its own, so the batch order never matters.
    /// An id that appears more than once is ambiguous: it keeps its entity
    /// alive but is otherwise ignored.
    pub fn apply_pulse(&mut self, batch: &[PulseUpdate]) -> PulseReport {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut duplicates: HashSet<&str> = HashSet::new();
        for update in batch {
            if !seen.insert(update.owner_id.as_str()) {
                duplicates.insert(update.owner_id.as_str());
            }
        }
        if !duplicates.is_empty() {
            warn!("Pulse lists ids more than once: {:?}", duplicates);
        }

        let mut report = PulseReport::default();
        for update in batch {
            let id = update.owner_id.as_str();
            if duplicates.contains(id) {
                continue;
            }

            if id == self.local_id {
                report.local_died = self.apply_local_health(update.health);
                continue;
            }

            match self.entities.get_mut(id) {
                Some(entity) => {
                    entity.reconcile(&update.position);
                    entity.set_health(update.health);
                }
                None => {
                    self.entities.insert(
                        id.to_string(),
                        Entity::new(id, update.position.position, update.health),
                    );
                    report.spawned.push(id.to_string());
                    if !self.metadata.contains_key(id) {
                        report.needs_metadata.push(id.to_string());
                    }
                }
            }
        }

        let local_id = &self.local_id;
        let expired: Vec<String> = self
            .entities
            .keys()
            .filter(|id| *id != local_id && !seen.contains(id.as_str()))
            .cloned()
            .collect();
        for id in expired {
            self.entities.remove(&id);
            self.metadata.remove(&id);
            report.removed.push(id);
        }

        report.spawned.sort();
        report.needs_metadata.sort();
        report.removed.sort();
        if !report.spawned.is_empty() || !report.removed.is_empty() {
            info!(
                "Roster: {} joined, {} left, {} tracked",
                report.spawned.len(),
                report.removed.len(),
                self.entities.len()
            );
        }
        report
    }

    /// Returns true on the transition into zero health.
    fn apply_local_health(&mut self, health: HealthUpdate) -> bool {
        let Some(local) = self.entities.get_mut(&self.local_id) else {
            return false;
        };
        local.set_health(health);
        let died = local.is_dead() && !self.local_dead;
        self.local_dead = local.is_dead();
        if died {
            info!("Local player died");
        }
        died
    }

    /// Merges a single direct position update.
    pub fn apply_position_update(&mut self, update: &PositionUpdate) -> UpdateOutcome {
        let Some(id) = update.owner_id.as_deref() else {
            debug!("Position update without owner; ignoring");
            return UpdateOutcome::Ignored;
        };
        if id == self.local_id {
            return UpdateOutcome::Ignored;
        }

        match self.entities.get_mut(id) {
            Some(entity) => {
                entity.reconcile(update);
                UpdateOutcome::Reconciled
            }
            None => {
                let health = HealthUpdate {
                    current: DEFAULT_MAX_HP,
                    max: DEFAULT_MAX_HP,
                };
                self.entities
                    .insert(id.to_string(), Entity::new(id, update.position, health));
                UpdateOutcome::Spawned
            }
        }
    }

    /// Applies a strike broadcast by another player.
    pub fn apply_attack(&mut self, attack: &PlayerAttack) -> Vec<CombatHit> {
        let remote = attack.attacker_id != self.local_id;
        let mut hits = Vec::with_capacity(attack.contacts.len());
        for contact in &attack.contacts {
            // Our own strikes were knocked back when they were resolved.
            if remote {
                if let Some(victim) = self.entities.get_mut(&contact.victim_id) {
                    victim.knock_back(contact.vector);
                }
            }
            hits.push(CombatHit {
                attacker_id: attack.attacker_id.clone(),
                victim_id: contact.victim_id.clone(),
                strength: contact.strength,
                local_victim: contact.victim_id == self.local_id,
            });
        }
        hits
    }

    /// Resolves a melee strike by the local player against everyone else in
    /// the room and knocks the victims back. The contacts are what gets
    /// broadcast.
    pub fn local_strike(&mut self) -> Vec<AttackContact> {
        let Some(local) = self.entities.get(&self.local_id) else {
            return Vec::new();
        };
        let strike = Strike::new(
            self.local_id.clone(),
            local.strike_origin(),
            local.facing.vector(),
        );
        let candidates = self.entities.values().map(|entity| Candidate {
            id: entity.id.as_str(),
            position: entity.position,
            hitbox_radius: entity.hitbox_radius,
        });
        let mut contacts = resolve_strike(&strike, candidates);
        contacts.sort_by(|a, b| a.victim_id.cmp(&b.victim_id));

        for contact in &contacts {
            if let Some(victim) = self.entities.get_mut(&contact.victim_id) {
                victim.knock_back(contact.vector);
            }
        }
        contacts
    }

    pub fn set_local_trajectory(&mut self, trajectory: Vec2) {
        if let Some(local) = self.entities.get_mut(&self.local_id) {
            local.set_trajectory(trajectory);
        }
    }

    /// Advances every entity by `dt` seconds, capped at one second.
    pub fn step(&mut self, dt: f64) {
        let dt = dt.clamp(0.0, MAX_STEP_SECONDS);
        for entity in self.entities.values_mut() {
            entity.step(dt);
        }
    }

    /// Forgets every remote entity, keeping only the local player.
    pub fn clear_remote(&mut self) {
        let local_id = &self.local_id;
        self.entities.retain(|id, _| id == local_id);
        self.metadata.retain(|id, _| id == local_id);
    }
}
