use serde::{Deserialize, Serialize};

/// What to do when a card crosses the leech threshold.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeechAction {
    Suspend,
    TagOnly,
}

/// Scheduling policy. Every constant here is a product choice, not a
/// structural invariant, so callers may override any of it per collection.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SchedConfig {
    /// Learning steps in minutes, shortest first.
    pub learn_steps_mins: Vec<u32>,
    /// Steps a lapsed review card goes back through.
    pub relearn_steps_mins: Vec<u32>,
    /// Interval in days when a card graduates with Good.
    pub graduating_interval: i32,
    /// Interval in days when a card graduates with Easy.
    pub easy_interval: i32,
    pub initial_factor: u32,
    /// Multiplier applied on Hard instead of the ease factor.
    pub hard_multiplier: f32,
    /// Extra multiplier applied on Easy.
    pub easy_bonus: f32,
    /// Fraction of the previous interval kept after a lapse.
    pub lapse_multiplier: f32,
    pub min_lapse_interval: i32,
    pub max_interval: i32,
    /// Relative fuzz span; 0 disables fuzz entirely.
    pub fuzz_span: f32,
    /// Lapses before a card is flagged as a leech; 0 disables detection.
    pub leech_threshold: u32,
    pub leech_action: LeechAction,
    pub new_per_day: u32,
    pub rev_per_day: u32,
    pub new_order: NewOrder,
    /// How many seconds past due a learning card may be fetched early
    /// when nothing else is left.
    pub learn_ahead_secs: i64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NewOrder {
    Creation,
    Random,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            learn_steps_mins: vec![1, 10],
            relearn_steps_mins: vec![10],
            graduating_interval: 1,
            easy_interval: 4,
            initial_factor: crate::FACTOR_INITIAL,
            hard_multiplier: 1.2,
            easy_bonus: 1.3,
            lapse_multiplier: 0.0,
            min_lapse_interval: 1,
            max_interval: 36_500,
            fuzz_span: 0.05,
            leech_threshold: 8,
            leech_action: LeechAction::Suspend,
            new_per_day: 20,
            rev_per_day: 100,
            new_order: NewOrder::Creation,
            learn_ahead_secs: 20 * 60,
        }
    }
}

/// Collection-wide configuration persisted as a JSON blob in the `col`
/// row.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CollectionConfig {
    pub sched: SchedConfig,
    /// Currently selected deck in the hosting application.
    pub current_deck_id: Option<i64>,
}
