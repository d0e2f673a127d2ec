//! Property-based test generators using proptest.

use crate::reference::{normalize, ScriptOp};
use outbox_codec::{Document, Value};
use outbox_core::EntityId;
use proptest::prelude::*;

/// Strategy for generating entity IDs.
pub fn entity_id_strategy() -> impl Strategy<Value = EntityId> {
    prop::array::uniform16(any::<u8>()).prop_map(EntityId::from_bytes)
}

/// Strategy for generating collection names.
pub fn collection_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating scalar field values.
///
/// Floats are left out so generated documents compare equal to themselves.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-z ]{0,12}".prop_map(Value::Text),
    ]
}

/// Strategy for generating documents over a small set of field names.
///
/// A small key space makes updates of the same row overlap often.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    prop::collection::btree_map("[a-d]", value_strategy(), 1..4)
}

/// Strategy for one script step over `slots` rows.
pub fn script_op_strategy(slots: usize) -> impl Strategy<Value = ScriptOp> {
    let slot = 0..slots.max(1);
    prop_oneof![
        3 => (slot.clone(), document_strategy()).prop_map(|(slot, data)| ScriptOp::Create { slot, data }),
        4 => (slot.clone(), document_strategy()).prop_map(|(slot, data)| ScriptOp::Update { slot, data }),
        2 => slot.prop_map(|slot| ScriptOp::Delete { slot }),
        1 => Just(ScriptOp::Drain),
    ]
}

/// Strategy for a valid script of up to `max_len` steps over `slots` rows.
///
/// Steps that make no sense at their position (an update of a row that
/// does not exist, a second create of a live row) are dropped.
pub fn script_strategy(slots: usize, max_len: usize) -> impl Strategy<Value = Vec<ScriptOp>> {
    prop::collection::vec(script_op_strategy(slots), 0..max_len.max(1))
        .prop_map(|ops| normalize(&ops))
}
