use crate::event::AttrVal;
use crate::identity::Identity;
use proptest::prelude::*;

/// Identities at every length the wire format can carry, with non-zero ids.
pub fn valid_identity() -> impl Strategy<Value = Identity> {
    (
        prop_oneof![Just(4usize), Just(8), Just(12), Just(20)],
        prop_oneof![Just(4usize), Just(8)],
    )
        .prop_flat_map(|(task_len, op_len)| {
            (
                non_zero_bytes(task_len),
                non_zero_bytes(op_len),
            )
        })
        .prop_map(|(task, op)| {
            Identity::from_raw_parts(&task, &op).expect("lengths are within bounds")
        })
}

fn non_zero_bytes(len: usize) -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), len).prop_filter("all zero", |v| v.iter().any(|b| *b != 0))
}

pub fn attr_val() -> impl Strategy<Value = AttrVal> {
    prop_oneof![
        any::<String>().prop_map_into(),
        any::<Vec<u8>>().prop_map(AttrVal::Binary),
        any::<i64>().prop_map_into(),
        any::<f64>().prop_map_into(),
        any::<bool>().prop_map_into(),
    ]
}
