//! Constant expressions
//!
//! Expression nodes mirror the C expression grammar over the integral
//! scalar kinds: literals with suffixes, unary and binary operators with
//! integral promotion and the usual arithmetic conversion, `?:`, references
//! to enum values, and the `Type#len` attribute form. Evaluation stores the
//! result as a `u64` bit pattern with signed kinds sign-extended, matching
//! the casting rules in [`crate::scalar`].

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::arena::{Arena, ExprId, IdentRefId, TypeRefId};
use crate::error::{CoreError, Result};
use crate::scalar::{self, ScalarKind};
use crate::types::TypeKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Plus,
    Negate,
    LogicalNot,
    BitNot,
}

impl UnaryOp {
    fn token(self) -> &'static str {
        match self {
            UnaryOp::Plus => "+",
            UnaryOp::Negate => "-",
            UnaryOp::LogicalNot => "!",
            UnaryOp::BitNot => "~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    fn token(self) -> &'static str {
        use BinaryOp::*;
        match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            Mod => "%",
            BitAnd => "&",
            BitOr => "|",
            BitXor => "^",
            Shl => "<<",
            Shr => ">>",
            Lt => "<",
            Gt => ">",
            Le => "<=",
            Ge => ">=",
            Eq => "==",
            Ne => "!=",
            LogicalAnd => "&&",
            LogicalOr => "||",
        }
    }

    fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr)
    }

    fn is_logical(self) -> bool {
        matches!(self, BinaryOp::LogicalAnd | BinaryOp::LogicalOr)
    }

    fn is_comparison(self) -> bool {
        use BinaryOp::*;
        matches!(self, Lt | Gt | Le | Ge | Eq | Ne)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExprKind {
    /// The source text of the literal lives in [`ExprNode::text`].
    Literal,
    Unary {
        op: UnaryOp,
        operand: ExprId,
    },
    Binary {
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    Ternary {
        cond: ExprId,
        then_val: ExprId,
        else_val: ExprId,
    },
    /// A named enum value.
    Reference { ident: IdentRefId },
    /// `Type#tag`; only `len` on enums is supported.
    Attribute { target: TypeRefId, tag: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluated {
    pub kind: ScalarKind,
    pub value: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExprNode {
    pub kind: ExprKind,
    /// Source form, kept for diagnostics and emitted comments.
    pub text: String,
    /// A trivial text adds nothing over the printed value.
    pub trivial: bool,
    pub eval: Option<Evaluated>,
    pub post_parse_completed: bool,
}

impl ExprNode {
    fn new(kind: ExprKind, text: String, trivial: bool) -> Self {
        Self {
            kind,
            text,
            trivial,
            eval: None,
            post_parse_completed: false,
        }
    }

    /// A literal as written in the source, evaluated later.
    pub fn literal(text: impl Into<String>) -> Self {
        Self::new(ExprKind::Literal, text.into(), true)
    }

    /// A synthesized constant, already evaluated.
    pub fn value_of(value: u64, kind: ScalarKind) -> Self {
        let mut node = Self::new(ExprKind::Literal, scalar::format_value(value, kind), true);
        node.eval = Some(Evaluated { kind, value });
        node
    }

    pub fn evaluated(&self) -> &Evaluated {
        self.eval.as_ref().expect("expression evaluated")
    }

    /// The value truncated to `kind`, rendered as a decimal string.
    pub fn value_string(&self, kind: ScalarKind) -> String {
        scalar::format_value(self.evaluated().value, kind)
    }

    /// The value as a C++ literal of `kind`, with the source expression
    /// appended as a comment when it carries extra information.
    pub fn cpp_value(&self, kind: ScalarKind) -> String {
        let literal = scalar::format_cpp_literal(self.evaluated().value, kind);
        if self.trivial {
            literal
        } else {
            format!("{} /* {} */", literal, self.text)
        }
    }
}

impl Arena {
    pub fn new_unary_expr(&mut self, op: UnaryOp, operand: ExprId) -> ExprId {
        let text = format!("({}{})", op.token(), self.expr(operand).text);
        self.alloc_expr(ExprNode::new(ExprKind::Unary { op, operand }, text, false))
    }

    pub fn new_binary_expr(&mut self, op: BinaryOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        let text = format!(
            "({} {} {})",
            self.expr(lhs).text,
            op.token(),
            self.expr(rhs).text
        );
        self.alloc_expr(ExprNode::new(ExprKind::Binary { op, lhs, rhs }, text, false))
    }

    pub fn new_ternary_expr(&mut self, cond: ExprId, then_val: ExprId, else_val: ExprId) -> ExprId {
        let text = format!(
            "({}?{}:{})",
            self.expr(cond).text,
            self.expr(then_val).text,
            self.expr(else_val).text
        );
        self.alloc_expr(ExprNode::new(
            ExprKind::Ternary {
                cond,
                then_val,
                else_val,
            },
            text,
            false,
        ))
    }

    pub fn new_reference_expr(&mut self, ident: IdentRefId) -> ExprId {
        let text = self.ident_ref(ident).lookup().to_string();
        self.alloc_expr(ExprNode::new(ExprKind::Reference { ident }, text, false))
    }

    pub fn new_attribute_expr(&mut self, target: TypeRefId, tag: impl Into<String>) -> ExprId {
        let tag = tag.into();
        let name = self
            .type_ref(target)
            .lookup()
            .map(|fq| fq.to_string())
            .unwrap_or_default();
        let text = format!("{}#{}", name, tag);
        self.alloc_expr(ExprNode::new(ExprKind::Attribute { target, tag }, text, false))
    }

    /// The expressions this one depends on, including the defining
    /// expression behind a resolved enum value reference.
    pub fn expr_children(&self, id: ExprId) -> Vec<ExprId> {
        match &self.expr(id).kind {
            ExprKind::Literal | ExprKind::Attribute { .. } => Vec::new(),
            ExprKind::Unary { operand, .. } => vec![*operand],
            ExprKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            ExprKind::Ternary {
                cond,
                then_val,
                else_val,
            } => vec![*cond, *then_val, *else_val],
            ExprKind::Reference { ident } => {
                match self.ident_ref(*ident).target() {
                    Some((enum_id, index)) => match &self.ty(enum_id).kind {
                        TypeKind::Enum(data) => data.values[index].expr.into_iter().collect(),
                        _ => Vec::new(),
                    },
                    None => Vec::new(),
                }
            }
        }
    }

    /// Structural checks that need resolved references but not values.
    pub fn validate_expr(&self, id: ExprId) -> Result<()> {
        if let ExprKind::Attribute { target, tag } = &self.expr(id).kind {
            let text = &self.expr(id).text;
            if tag != "len" {
                return Err(CoreError::Invalid(format!(
                    "'{}' is not a supported tag",
                    text
                )));
            }
            let target = self
                .type_ref(*target)
                .target()
                .ok_or_else(|| CoreError::Internal(format!("'{}' not resolved", text)))?;
            if !self.ty(self.strip_typedefs(target)).kind.is_enum() {
                return Err(CoreError::Invalid(format!(
                    "'{}' should refer to an enum",
                    text
                )));
            }
        }
        Ok(())
    }

    /// Reject reference cycles before evaluation, reporting the cycle as a
    /// breadcrumb trail of expression texts.
    pub fn check_expr_acyclic(
        &self,
        id: ExprId,
        visited: &mut HashSet<ExprId>,
        stack: &mut HashSet<ExprId>,
    ) -> Result<()> {
        if self.expr(id).post_parse_completed {
            return Ok(());
        }
        if stack.contains(&id) {
            return Err(CoreError::CyclicExpression(format!(
                "'{}'",
                self.expr(id).text
            )));
        }
        if !visited.insert(id) {
            return Ok(());
        }
        stack.insert(id);
        for child in self.expr_children(id) {
            self.check_expr_acyclic(child, visited, stack)
                .map_err(|e| match e {
                    CoreError::CyclicExpression(trail) => CoreError::CyclicExpression(format!(
                        "{} referenced from '{}'",
                        trail,
                        self.expr(id).text
                    )),
                    other => other,
                })?;
        }
        stack.remove(&id);
        Ok(())
    }

    /// Evaluate an expression and everything it depends on. Idempotent;
    /// callers must have run the acyclic check first.
    pub fn evaluate_expr(&mut self, id: ExprId) -> Result<()> {
        if self.expr(id).eval.is_some() {
            return Ok(());
        }
        for child in self.expr_children(id) {
            self.evaluate_expr(child)?;
        }
        let eval = self.compute(id)?;
        self.expr_mut(id).eval = Some(eval);
        Ok(())
    }

    fn compute(&self, id: ExprId) -> Result<Evaluated> {
        let node = self.expr(id);
        match &node.kind {
            ExprKind::Literal => {
                let (value, kind) = scalar::parse_literal(&node.text).ok_or_else(|| {
                    CoreError::Invalid(format!("invalid integer literal '{}'", node.text))
                })?;
                Ok(Evaluated { kind, value })
            }
            ExprKind::Unary { op, operand } => {
                let operand = *self.expr(*operand).evaluated();
                let kind = operand.kind;
                let value = match op {
                    UnaryOp::Plus => operand.value,
                    UnaryOp::Negate => operand.value.wrapping_neg(),
                    UnaryOp::LogicalNot => (operand.value == 0) as u64,
                    UnaryOp::BitNot => !operand.value,
                };
                Ok(Evaluated {
                    kind,
                    value: scalar::cast_value(value, kind),
                })
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = *self.expr(*lhs).evaluated();
                let rhs = *self.expr(*rhs).evaluated();
                self.compute_binary(&node.text, *op, lhs, rhs)
            }
            ExprKind::Ternary {
                cond,
                then_val,
                else_val,
            } => {
                let cond = *self.expr(*cond).evaluated();
                let then_val = *self.expr(*then_val).evaluated();
                let else_val = *self.expr(*else_val).evaluated();
                // no integral promotion for ?:
                let kind =
                    ScalarKind::usual_arithmetic_conversion(then_val.kind, else_val.kind);
                let picked = if cond.value != 0 { then_val } else { else_val };
                Ok(Evaluated {
                    kind,
                    value: scalar::cast_value(picked.value, kind),
                })
            }
            ExprKind::Reference { ident } => {
                let (enum_id, index) = self
                    .ident_ref(*ident)
                    .target()
                    .ok_or_else(|| CoreError::Internal(format!("'{}' not resolved", node.text)))?;
                let TypeKind::Enum(data) = &self.ty(enum_id).kind else {
                    return Err(CoreError::Internal(format!(
                        "'{}' does not name an enum value",
                        node.text
                    )));
                };
                let expr = data.values[index]
                    .expr
                    .ok_or_else(|| CoreError::Internal(format!("'{}' has no value", node.text)))?;
                Ok(*self.expr(expr).evaluated())
            }
            ExprKind::Attribute { target, .. } => {
                let target = self
                    .type_ref(*target)
                    .target()
                    .ok_or_else(|| CoreError::Internal(format!("'{}' not resolved", node.text)))?;
                let count = self.enum_value_count(self.strip_typedefs(target)) as u64;
                let kind = if count <= i32::MAX as u64 {
                    ScalarKind::Int32
                } else {
                    ScalarKind::Int64
                };
                Ok(Evaluated { kind, value: count })
            }
        }
    }

    fn compute_binary(
        &self,
        text: &str,
        op: BinaryOp,
        lhs: Evaluated,
        rhs: Evaluated,
    ) -> Result<Evaluated> {
        use BinaryOp::*;

        if op.is_logical() {
            let l = lhs.value != 0;
            let r = rhs.value != 0;
            let out = match op {
                LogicalAnd => l && r,
                LogicalOr => l || r,
                _ => unreachable!(),
            };
            return Ok(Evaluated {
                kind: ScalarKind::Bool,
                value: out as u64,
            });
        }

        if op.is_shift() {
            let kind = lhs.kind.promoted();
            // shift count is simply cast to a signed 64-bit quantity; a
            // negative count shifts the other way
            let mut count = scalar::cast_value(rhs.value, rhs.kind) as i64;
            let mut op = op;
            if count < 0 {
                op = if op == Shl { Shr } else { Shl };
                count = -count;
            }
            let value = shift_in_kind(scalar::cast_value(lhs.value, kind), kind, op, count as u32);
            return Ok(Evaluated {
                kind,
                value: scalar::cast_value(value, kind),
            });
        }

        let promoted =
            ScalarKind::usual_arithmetic_conversion(lhs.kind.promoted(), rhs.kind.promoted());
        let l = scalar::cast_value(lhs.value, promoted);
        let r = scalar::cast_value(rhs.value, promoted);

        if matches!(op, Div | Mod) && r == 0 {
            return Err(CoreError::Invalid(format!("division by zero in {}", text)));
        }

        let (value, kind) = if op.is_comparison() {
            let out = if promoted.is_signed() {
                compare(op, l as i64, r as i64)
            } else {
                compare(op, l, r)
            };
            (out as u64, ScalarKind::Bool)
        } else {
            let out = if promoted.is_signed() {
                arithmetic_signed(op, l as i64, r as i64) as u64
            } else {
                arithmetic_unsigned(op, l, r)
            };
            (scalar::cast_value(out, promoted), promoted)
        };
        Ok(Evaluated { kind, value })
    }

    /// Shortcut for evaluated dimensions and similar counts.
    pub fn expr_value_usize(&self, id: ExprId) -> usize {
        let eval = self.expr(id).evaluated();
        scalar::cast_value(eval.value, eval.kind) as usize
    }
}

fn compare<T: PartialOrd + PartialEq>(op: BinaryOp, l: T, r: T) -> bool {
    use BinaryOp::*;
    match op {
        Lt => l < r,
        Gt => l > r,
        Le => l <= r,
        Ge => l >= r,
        Eq => l == r,
        Ne => l != r,
        _ => unreachable!(),
    }
}

fn arithmetic_signed(op: BinaryOp, l: i64, r: i64) -> i64 {
    use BinaryOp::*;
    match op {
        Add => l.wrapping_add(r),
        Sub => l.wrapping_sub(r),
        Mul => l.wrapping_mul(r),
        Div => l.wrapping_div(r),
        Mod => l.wrapping_rem(r),
        BitAnd => l & r,
        BitOr => l | r,
        BitXor => l ^ r,
        _ => unreachable!(),
    }
}

fn arithmetic_unsigned(op: BinaryOp, l: u64, r: u64) -> u64 {
    use BinaryOp::*;
    match op {
        Add => l.wrapping_add(r),
        Sub => l.wrapping_sub(r),
        Mul => l.wrapping_mul(r),
        Div => l / r,
        Mod => l % r,
        BitAnd => l & r,
        BitOr => l | r,
        BitXor => l ^ r,
        _ => unreachable!(),
    }
}

// Shift counts wrap at the width of the promoted kind, as the native
// instruction does: `1 << 32` in a 32-bit kind is 1.
fn shift_in_kind(value: u64, kind: ScalarKind, op: BinaryOp, count: u32) -> u64 {
    macro_rules! shift {
        ($t:ty) => {{
            let v = value as $t;
            let out = match op {
                BinaryOp::Shl => v.wrapping_shl(count),
                BinaryOp::Shr => v.wrapping_shr(count),
                _ => unreachable!(),
            };
            out as u64
        }};
    }
    use ScalarKind::*;
    match kind {
        Int32 => shift!(i32),
        UInt32 => shift!(u32),
        Int64 => shift!(i64),
        UInt64 => shift!(u64),
        _ => unreachable!("shift in unpromoted kind"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(arena: &mut Arena, text: &str) -> ExprId {
        arena.alloc_expr(ExprNode::literal(text))
    }

    fn eval(arena: &mut Arena, id: ExprId) -> Evaluated {
        arena.evaluate_expr(id).unwrap();
        *arena.expr(id).evaluated()
    }

    #[test]
    fn test_literal_kinds() {
        let mut arena = Arena::new();
        let e = lit(&mut arena, "0x80000000");
        assert_eq!(
            eval(&mut arena, e),
            Evaluated {
                kind: ScalarKind::UInt32,
                value: 0x8000_0000
            }
        );
    }

    #[test]
    fn test_promotion_in_binary() {
        let mut arena = Arena::new();
        // uint8 + uint8 promotes to int32
        let a = arena.alloc_expr(ExprNode::value_of(200, ScalarKind::UInt8));
        let b = arena.alloc_expr(ExprNode::value_of(100, ScalarKind::UInt8));
        let sum = arena.new_binary_expr(BinaryOp::Add, a, b);
        assert_eq!(
            eval(&mut arena, sum),
            Evaluated {
                kind: ScalarKind::Int32,
                value: 300
            }
        );
    }

    #[test]
    fn test_signed_overflow_wraps() {
        let mut arena = Arena::new();
        let a = arena.alloc_expr(ExprNode::value_of(i32::MAX as u64, ScalarKind::Int32));
        let b = lit(&mut arena, "1");
        let sum = arena.new_binary_expr(BinaryOp::Add, a, b);
        let out = eval(&mut arena, sum);
        assert_eq!(out.kind, ScalarKind::Int32);
        assert_eq!(out.value as i64, i32::MIN as i64);
    }

    #[test]
    fn test_negative_shift_flips_direction() {
        let mut arena = Arena::new();
        let a = lit(&mut arena, "16");
        let b = arena.alloc_expr(ExprNode::value_of(-2i64 as u64, ScalarKind::Int32));
        let e = arena.new_binary_expr(BinaryOp::Shl, a, b);
        assert_eq!(eval(&mut arena, e).value, 4);
    }

    #[test]
    fn test_shift_count_wraps_at_width() {
        let mut arena = Arena::new();
        let a = lit(&mut arena, "1");
        let b = lit(&mut arena, "32");
        let e = arena.new_binary_expr(BinaryOp::Shl, a, b);
        assert_eq!(eval(&mut arena, e).value, 1);
    }

    #[test]
    fn test_comparison_yields_bool() {
        let mut arena = Arena::new();
        let a = lit(&mut arena, "3");
        let b = lit(&mut arena, "4");
        let e = arena.new_binary_expr(BinaryOp::Lt, a, b);
        assert_eq!(
            eval(&mut arena, e),
            Evaluated {
                kind: ScalarKind::Bool,
                value: 1
            }
        );
    }

    #[test]
    fn test_ternary_skips_promotion() {
        let mut arena = Arena::new();
        let cond = lit(&mut arena, "1");
        let a = arena.alloc_expr(ExprNode::value_of(1, ScalarKind::UInt8));
        let b = arena.alloc_expr(ExprNode::value_of(2, ScalarKind::UInt8));
        let e = arena.new_ternary_expr(cond, a, b);
        assert_eq!(eval(&mut arena, e).kind, ScalarKind::UInt8);
    }

    #[test]
    fn test_division_by_zero_rejected() {
        let mut arena = Arena::new();
        let a = lit(&mut arena, "1");
        let b = lit(&mut arena, "0");
        let e = arena.new_binary_expr(BinaryOp::Div, a, b);
        assert!(arena.evaluate_expr(e).is_err());
    }

    #[test]
    fn test_unary_keeps_kind() {
        let mut arena = Arena::new();
        let a = arena.alloc_expr(ExprNode::value_of(1, ScalarKind::UInt8));
        let e = arena.new_unary_expr(UnaryOp::Negate, a);
        assert_eq!(
            eval(&mut arena, e),
            Evaluated {
                kind: ScalarKind::UInt8,
                value: 255
            }
        );
    }

    #[test]
    fn test_cpp_value_keeps_source_text() {
        let mut arena = Arena::new();
        let a = lit(&mut arena, "1");
        let b = lit(&mut arena, "4");
        let e = arena.new_binary_expr(BinaryOp::Shl, a, b);
        arena.evaluate_expr(e).unwrap();
        assert_eq!(arena.expr(e).cpp_value(ScalarKind::Int32), "16 /* (1 << 4) */");
        assert_eq!(arena.expr(a).cpp_value(ScalarKind::Int32), "1");
    }
}
