//! Actions: named, weighted, possibly failing operations against the
//! application.
//!
//! Two flavours share one trait:
//! - message actions implement [`Action`] directly and declare a
//!   [`Frequency`] tier
//! - legacy operations implement [`Operation`] and are wrapped in a
//!   [`WeightedOperation`] carrying a raw integer weight, which the registry
//!   buckets into the nearest tier
//!
//! Queued (future) operations use the same [`Operation`] trait.

use crate::context::SimCtx;
use crate::error::ActionError;
use crate::queue::Schedule;
use crate::stats::EventStats;

use blockfuzz_env::Application;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;
use std::time::SystemTime;

/// How often an action should be picked, relative to the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Rare,
    Infrequent,
    Common,
    Frequent,
}

impl Frequency {
    /// All tiers, lowest first.
    pub fn all() -> [Frequency; 4] {
        [
            Frequency::Rare,
            Frequency::Infrequent,
            Frequency::Common,
            Frequency::Frequent,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Frequency::Rare => "rare",
            Frequency::Infrequent => "infrequent",
            Frequency::Common => "common",
            Frequency::Frequent => "frequent",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Integer weight of each frequency tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightTable {
    pub rare: u32,
    pub infrequent: u32,
    pub common: u32,
    pub frequent: u32,
}

impl Default for WeightTable {
    fn default() -> Self {
        Self {
            rare: 5,
            infrequent: 15,
            common: 35,
            frequent: 65,
        }
    }
}

impl WeightTable {
    /// Weight of a tier.
    pub fn weight(&self, frequency: Frequency) -> u32 {
        match frequency {
            Frequency::Rare => self.rare,
            Frequency::Infrequent => self.infrequent,
            Frequency::Common => self.common,
            Frequency::Frequent => self.frequent,
        }
    }

    /// Maps a raw legacy weight to the tier with the nearest weight.
    ///
    /// Ties go to the lower tier.
    pub fn bucket(&self, raw: u32) -> Frequency {
        let mut best = Frequency::Rare;
        let mut best_distance = u32::MAX;

        for frequency in Frequency::all() {
            let distance = self.weight(frequency).abs_diff(raw);
            if distance < best_distance {
                best = frequency;
                best_distance = distance;
            }
        }

        best
    }
}

/// Outcome record of one executed action, used for logs and statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMsg {
    /// Owning module (e.g. "bank")
    pub route: String,

    /// Action name (e.g. "transfer")
    pub name: String,

    /// Human-readable note; explains the skip for no-ops
    pub comment: String,

    /// Whether a message was actually delivered
    pub ok: bool,

    /// The delivered message
    pub msg: serde_json::Value,

    pub gas_wanted: u64,
    pub gas_used: u64,
}

impl OperationMsg {
    pub fn new(route: &str, name: &str, msg: serde_json::Value, comment: &str) -> Self {
        Self {
            route: route.to_string(),
            name: name.to_string(),
            comment: comment.to_string(),
            ok: true,
            msg,
            gas_wanted: 0,
            gas_used: 0,
        }
    }

    /// A recoverable skip: nothing was delivered.
    pub fn no_op(route: &str, name: &str, comment: &str) -> Self {
        Self {
            route: route.to_string(),
            name: name.to_string(),
            comment: comment.to_string(),
            ok: false,
            msg: serde_json::Value::Null,
            gas_wanted: 0,
            gas_used: 0,
        }
    }

    pub fn with_gas(mut self, gas_wanted: u64, gas_used: u64) -> Self {
        self.gas_wanted = gas_wanted;
        self.gas_used = gas_used;
        self
    }

    /// Tallies this outcome as `route/name/{ok,failure}`.
    pub fn log_event(&self, stats: &mut EventStats) {
        let result = if self.ok { "ok" } else { "failure" };
        stats.tally(&self.route, &self.name, result);
    }
}

/// An operation deferred to a later height or time.
pub struct FutureOperation<A> {
    pub schedule: Schedule,
    pub operation: Box<dyn Operation<A>>,
}

impl<A> FutureOperation<A> {
    pub fn at_height(height: u64, operation: impl Operation<A> + 'static) -> Self {
        Self {
            schedule: Schedule::AtHeight(height),
            operation: Box::new(operation),
        }
    }

    pub fn at_time(time: SystemTime, operation: impl Operation<A> + 'static) -> Self {
        Self {
            schedule: Schedule::AtTime(time),
            operation: Box::new(operation),
        }
    }
}

impl<A> fmt::Debug for FutureOperation<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureOperation")
            .field("schedule", &self.schedule)
            .field("operation", &self.operation.name())
            .finish()
    }
}

/// Everything an action reports back to the driver.
pub struct OperationOutput<A> {
    pub msg: OperationMsg,

    /// Operations to run later; only honoured for top-level actions
    pub future_ops: Vec<FutureOperation<A>>,

    /// Raw result payload returned by the application
    pub result_data: Vec<u8>,
}

impl<A> OperationOutput<A> {
    pub fn new(msg: OperationMsg) -> Self {
        Self {
            msg,
            future_ops: Vec::new(),
            result_data: Vec::new(),
        }
    }

    pub fn no_op(route: &str, name: &str, comment: &str) -> Self {
        Self::new(OperationMsg::no_op(route, name, comment))
    }

    pub fn with_result_data(mut self, data: Vec<u8>) -> Self {
        self.result_data = data;
        self
    }

    pub fn with_future_op(mut self, op: FutureOperation<A>) -> Self {
        self.future_ops.push(op);
        self
    }
}

impl<A> fmt::Debug for OperationOutput<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationOutput")
            .field("msg", &self.msg)
            .field("future_ops", &self.future_ops)
            .field("result_data", &hex::encode(&self.result_data))
            .finish()
    }
}

/// A message-generating action.
///
/// Implementations must only draw randomness from `sim`, so that replays
/// with the same seed generate the same messages.
pub trait Action<A> {
    fn name(&self) -> &str;

    fn frequency(&self) -> Frequency;

    /// Raw integer weight for legacy operations.
    fn raw_weight(&self) -> Option<u32> {
        None
    }

    /// Generates and delivers one message.
    ///
    /// Returns a no-op output when the current state makes the action
    /// impossible; returns `Err` only for hard failures.
    fn execute(&self, sim: &mut SimCtx<'_>, app: &mut A) -> Result<OperationOutput<A>, ActionError>;
}

/// A plain operation: legacy weighted operations and queued operations.
pub trait Operation<A> {
    fn name(&self) -> &str;

    fn run(&self, sim: &mut SimCtx<'_>, app: &mut A) -> Result<OperationOutput<A>, ActionError>;
}

/// Adapts a legacy operation with a raw weight into an [`Action`].
pub struct WeightedOperation<A> {
    weight: u32,
    operation: Rc<dyn Operation<A>>,
}

impl<A> WeightedOperation<A> {
    pub fn new(weight: u32, operation: impl Operation<A> + 'static) -> Self {
        Self {
            weight,
            operation: Rc::new(operation),
        }
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }
}

impl<A> Clone for WeightedOperation<A> {
    fn clone(&self) -> Self {
        Self {
            weight: self.weight,
            operation: Rc::clone(&self.operation),
        }
    }
}

impl<A> Action<A> for WeightedOperation<A> {
    fn name(&self) -> &str {
        self.operation.name()
    }

    fn frequency(&self) -> Frequency {
        WeightTable::default().bucket(self.weight)
    }

    fn raw_weight(&self) -> Option<u32> {
        Some(self.weight)
    }

    fn execute(
        &self,
        sim: &mut SimCtx<'_>,
        app: &mut A,
    ) -> Result<OperationOutput<A>, ActionError> {
        self.operation.run(sim, app)
    }
}

/// An action plus the module it belongs to.
///
/// The module name is for attribution only. A frequency override set with
/// [`ActionsWithMetadata::with_frequency`] replaces the declared tier.
pub struct ActionsWithMetadata<A> {
    action: Rc<dyn Action<A>>,
    module: String,
    frequency: Option<Frequency>,
}

impl<A> ActionsWithMetadata<A> {
    pub fn new(module: &str, action: impl Action<A> + 'static) -> Self {
        Self::from_rc(module, Rc::new(action))
    }

    pub fn from_rc(module: &str, action: Rc<dyn Action<A>>) -> Self {
        Self {
            action,
            module: module.to_string(),
            frequency: None,
        }
    }

    /// Returns a copy with the frequency replaced.
    pub fn with_frequency(&self, frequency: Frequency) -> Self {
        Self {
            action: Rc::clone(&self.action),
            module: self.module.clone(),
            frequency: Some(frequency),
        }
    }

    pub fn action(&self) -> &dyn Action<A> {
        self.action.as_ref()
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        self.action.name()
    }

    /// Effective tier under `table`.
    pub fn frequency(&self, table: &WeightTable) -> Frequency {
        if let Some(frequency) = self.frequency {
            return frequency;
        }
        match self.action.raw_weight() {
            Some(raw) => table.bucket(raw),
            None => self.action.frequency(),
        }
    }

    /// Effective integer weight under `table`.
    pub fn weight(&self, table: &WeightTable) -> u32 {
        table.weight(self.frequency(table))
    }
}

impl<A> Clone for ActionsWithMetadata<A> {
    fn clone(&self) -> Self {
        Self {
            action: Rc::clone(&self.action),
            module: self.module.clone(),
            frequency: self.frequency,
        }
    }
}

impl<A> fmt::Debug for ActionsWithMetadata<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionsWithMetadata")
            .field("module", &self.module)
            .field("name", &self.action.name())
            .field("frequency", &self.frequency)
            .finish()
    }
}

/// Wraps legacy weighted operations as actions of `module`.
pub fn actions_from_weighted_operations<A: 'static>(
    module: &str,
    operations: Vec<WeightedOperation<A>>,
) -> Vec<ActionsWithMetadata<A>> {
    operations
        .into_iter()
        .map(|op| ActionsWithMetadata::new(module, op))
        .collect()
}

/// Encodes `msg` as JSON, delivers it, and builds the output record.
///
/// Rejections by the application are hard failures: actions are expected
/// to only generate messages the current state accepts.
pub fn deliver_msg<A, M>(
    app: &mut A,
    route: &str,
    name: &str,
    msg: &M,
) -> Result<OperationOutput<A>, ActionError>
where
    A: Application,
    M: Serialize,
{
    let value = serde_json::to_value(msg)?;
    let tx = serde_json::to_vec(&value)?;
    let res = app.deliver(&tx)?;

    let msg =
        OperationMsg::new(route, name, value, &res.log).with_gas(res.gas_wanted, res.gas_used);
    Ok(OperationOutput::new(msg).with_result_data(res.data))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Operation<()> for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn run(
            &self,
            _sim: &mut SimCtx<'_>,
            _app: &mut (),
        ) -> Result<OperationOutput<()>, ActionError> {
            Ok(OperationOutput::no_op("test", "noop", "nothing to do"))
        }
    }

    #[test]
    fn test_default_weights() {
        let table = WeightTable::default();
        assert_eq!(table.weight(Frequency::Rare), 5);
        assert_eq!(table.weight(Frequency::Infrequent), 15);
        assert_eq!(table.weight(Frequency::Common), 35);
        assert_eq!(table.weight(Frequency::Frequent), 65);
        assert!(Frequency::Rare < Frequency::Frequent);
    }

    #[test]
    fn test_bucket_nearest_tier() {
        let table = WeightTable::default();
        assert_eq!(table.bucket(0), Frequency::Rare);
        assert_eq!(table.bucket(12), Frequency::Infrequent);
        assert_eq!(table.bucket(20), Frequency::Infrequent);
        assert_eq!(table.bucket(40), Frequency::Common);
        assert_eq!(table.bucket(1000), Frequency::Frequent);
    }

    #[test]
    fn test_bucket_ties_go_lower() {
        let table = WeightTable::default();
        // Halfway between Rare (5) and Infrequent (15)
        assert_eq!(table.bucket(10), Frequency::Rare);
        // Halfway between Common (35) and Frequent (65)
        assert_eq!(table.bucket(50), Frequency::Common);
    }

    #[test]
    fn test_weighted_operation_adapter() {
        let op = WeightedOperation::new(60, Noop);
        assert_eq!(op.name(), "noop");
        assert_eq!(op.raw_weight(), Some(60));
        assert_eq!(op.frequency(), Frequency::Frequent);

        let actions = actions_from_weighted_operations("test", vec![op]);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].module(), "test");
    }

    #[test]
    fn test_raw_weight_buckets_with_custom_table() {
        let actions =
            actions_from_weighted_operations("test", vec![WeightedOperation::new(60, Noop)]);
        let table = WeightTable {
            rare: 1,
            infrequent: 2,
            common: 58,
            frequent: 100,
        };

        assert_eq!(actions[0].frequency(&table), Frequency::Common);
        assert_eq!(actions[0].weight(&table), 58);
    }

    #[test]
    fn test_with_frequency_returns_copy() {
        let original = ActionsWithMetadata::new("test", WeightedOperation::new(5, Noop));
        let table = WeightTable::default();

        let boosted = original.with_frequency(Frequency::Frequent);

        assert_eq!(original.frequency(&table), Frequency::Rare);
        assert_eq!(boosted.frequency(&table), Frequency::Frequent);
        assert_eq!(boosted.weight(&table), 65);
    }

    #[test]
    fn test_operation_msg_log_event() {
        let mut stats = EventStats::new();
        OperationMsg::new("bank", "send", serde_json::Value::Null, "").log_event(&mut stats);
        OperationMsg::no_op("bank", "send", "no funds").log_event(&mut stats);
        OperationMsg::no_op("bank", "send", "no funds").log_event(&mut stats);

        assert_eq!(stats.get("bank", "send", "ok"), 1);
        assert_eq!(stats.get("bank", "send", "failure"), 2);
    }
}
