use shared::{PLATFORM_SPACING, REPOSITION_OFFSET, ROTATION_SPEED};

pub const DEFAULT_TICK_RATE: u32 = 60;
pub const DEFAULT_POINTS_PER_GOAL: u32 = 2;
pub const DEFAULT_PENALTY_PER_MISS: u32 = 1;
pub const DEFAULT_WIN_THRESHOLD: u32 = 50;
pub const DEFAULT_JUMP_SPEED: f32 = 12.0;
pub const DEFAULT_GRAVITY: f32 = 30.0;

const WAIT_TIMEOUT_SECS: f32 = 200.0;
const WAIT_POLL_SECS: f32 = 0.5;
const REPOSITION_COOLDOWN_SECS: f32 = 0.5;
const RESULT_SETTLE_SECS: f32 = 5.0;

/// Tunables for one match. Durations are expressed in network ticks.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub tick_rate: u32,
    pub points_per_goal: u32,
    pub penalty_per_miss: u32,
    pub win_threshold: u32,
    pub wait_timeout_ticks: u64,
    pub wait_poll_ticks: u64,
    pub reposition_cooldown_ticks: u64,
    pub result_settle_ticks: u64,
    pub reposition_offset: f32,
    pub platform_spacing: f32,
    pub rotation_speed: f32,
    /// Upward ball speed right after a ground contact, units per second.
    pub jump_speed: f32,
    pub gravity: f32,
}

impl MatchConfig {
    /// Derives tick-based durations for the given tick rate.
    pub fn with_tick_rate(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        let ticks = |secs: f32| ((secs * tick_rate as f32).ceil() as u64).max(1);

        Self {
            tick_rate,
            points_per_goal: DEFAULT_POINTS_PER_GOAL,
            penalty_per_miss: DEFAULT_PENALTY_PER_MISS,
            win_threshold: DEFAULT_WIN_THRESHOLD,
            wait_timeout_ticks: ticks(WAIT_TIMEOUT_SECS),
            wait_poll_ticks: ticks(WAIT_POLL_SECS),
            reposition_cooldown_ticks: ticks(REPOSITION_COOLDOWN_SECS),
            result_settle_ticks: ticks(RESULT_SETTLE_SECS),
            reposition_offset: REPOSITION_OFFSET,
            platform_spacing: PLATFORM_SPACING,
            rotation_speed: ROTATION_SPEED,
            jump_speed: DEFAULT_JUMP_SPEED,
            gravity: DEFAULT_GRAVITY,
        }
    }

    pub fn tick_seconds(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self::with_tick_rate(DEFAULT_TICK_RATE)
    }
}
