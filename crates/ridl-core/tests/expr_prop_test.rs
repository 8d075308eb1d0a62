//! Property tests for constant expression evaluation

use proptest::prelude::*;
use ridl_core::arena::Arena;
use ridl_core::expr::{BinaryOp, ExprNode};
use ridl_core::scalar::{self, ScalarKind};

fn eval_binary(op: BinaryOp, lhs: (u64, ScalarKind), rhs: (u64, ScalarKind)) -> (u64, ScalarKind) {
    let mut arena = Arena::new();
    let l = arena.alloc_expr(ExprNode::value_of(lhs.0, lhs.1));
    let r = arena.alloc_expr(ExprNode::value_of(rhs.0, rhs.1));
    let e = arena.new_binary_expr(op, l, r);
    arena.evaluate_expr(e).expect("evaluates");
    let eval = arena.expr(e).evaluated();
    (eval.value, eval.kind)
}

proptest! {
    #[test]
    fn prop_int32_addition_wraps(a: i32, b: i32) {
        let (value, kind) = eval_binary(
            BinaryOp::Add,
            (a as u64, ScalarKind::Int32),
            (b as u64, ScalarKind::Int32),
        );
        prop_assert_eq!(kind, ScalarKind::Int32);
        prop_assert_eq!(value, a.wrapping_add(b) as i32 as u64);
    }

    #[test]
    fn prop_comparisons_produce_bool(a: u32, b: u32) {
        for op in [BinaryOp::Lt, BinaryOp::Gt, BinaryOp::Le, BinaryOp::Ge, BinaryOp::Eq, BinaryOp::Ne] {
            let (value, kind) = eval_binary(
                op,
                (a as u64, ScalarKind::UInt32),
                (b as u64, ScalarKind::UInt32),
            );
            prop_assert_eq!(kind, ScalarKind::Bool);
            prop_assert!(value <= 1);
        }
    }

    #[test]
    fn prop_negative_shift_flips_direction(v: u32, count in 1u32..31) {
        let negated = (-(count as i64)) as u64;
        let left_by_negative = eval_binary(
            BinaryOp::Shl,
            (v as u64, ScalarKind::UInt32),
            (negated, ScalarKind::Int64),
        );
        let right = eval_binary(
            BinaryOp::Shr,
            (v as u64, ScalarKind::UInt32),
            (count as u64, ScalarKind::Int64),
        );
        prop_assert_eq!(left_by_negative, right);
    }

    #[test]
    fn prop_decimal_literals_round_trip(v in 0u64..=i64::MAX as u64) {
        let text = scalar::format_value(v, ScalarKind::UInt64);
        let (parsed, _) = scalar::parse_literal(&text).expect("formatted value parses");
        prop_assert_eq!(parsed, v);
    }

    #[test]
    fn prop_cast_is_idempotent(v: u64) {
        for kind in [
            ScalarKind::Int8,
            ScalarKind::UInt8,
            ScalarKind::Int16,
            ScalarKind::UInt16,
            ScalarKind::Int32,
            ScalarKind::UInt32,
            ScalarKind::Int64,
            ScalarKind::UInt64,
        ] {
            let once = scalar::cast_value(v, kind);
            prop_assert_eq!(scalar::cast_value(once, kind), once);
        }
    }
}
