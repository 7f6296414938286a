//! Induction value and loop-exit analysis.
//!
//! Two related proofs over the same memoized implication relation:
//!
//! 1. [`collect_induction_values`] finds loop phi parameters that are affine
//!    functions of the iteration counter (`offset + factor * i`), plus the
//!    boolean continue-flag phi that is true for as long as the loop runs.
//! 2. [`collect_loop_exit_conditions`] derives, where possible, the concrete
//!    value such a phi (and therefore the loop counter) must hold when the
//!    loop exits, by proving that the loop condition being false is exactly
//!    equivalent to a linear inequality on the phi and solving it.
//!
//! Both proofs fail closed: anything unprovable simply yields no information
//! and the checkpointing policy falls back to storage. The memo table is
//! seeded `Falsified` before recursing so self-referential proofs terminate
//! with a negative answer instead of looping.

use std::collections::HashMap;

use crate::ir::{BlockId, Func, InstId, Opcode};

/// Result of one implication proof, forming a three-way join lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImplicationResult {
    /// The value is not a constant offset from the induction variable while
    /// the condition is true, or nothing could be proven.
    Falsified,
    /// The condition is false on this path, so the value's relationship to
    /// the induction variable does not matter.
    AntecedentHolds,
    /// The value is the previous value plus the carried constant.
    ConsequentHolds(i64),
}

/// Joins implication results from two predecessor paths.
///
/// `AntecedentHolds` is the identity; differing factors falsify.
pub fn join(a: ImplicationResult, b: ImplicationResult) -> ImplicationResult {
    use ImplicationResult::{AntecedentHolds, ConsequentHolds, Falsified};
    match (a, b) {
        (Falsified, _) | (_, Falsified) => Falsified,
        (AntecedentHolds, x) => x,
        (x, AntecedentHolds) => x,
        (ConsequentHolds(fa), ConsequentHolds(fb)) => {
            if fa == fb {
                a
            } else {
                Falsified
            }
        }
    }
}

/// Memo key: one implication query at one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ImplicationKey {
    condition: InstId,
    inductive: InstId,
    block: BlockId,
}

type ImplicationMemo = HashMap<ImplicationKey, ImplicationResult>;

/// Recognizes `operand + constant` / `operand - constant` with an integer
/// literal on either side. Rejects a subtraction of `i64::MIN`, whose
/// negation is unrepresentable.
fn unpack_constant_addition(func: &Func, inst: InstId) -> Option<(InstId, i64)> {
    let op = func.inst(inst).op();
    if op != Opcode::Add && op != Opcode::Sub {
        return None;
    }
    let negate = op == Opcode::Sub;

    let mut operand = func.inst_operand(inst, 0);
    let mut constant_inst = func.inst_operand(inst, 1);
    if func.inst(constant_inst).as_int_lit().is_none() {
        std::mem::swap(&mut operand, &mut constant_inst);
    }
    let constant = func.inst(constant_inst).as_int_lit()?;
    if negate && constant == i64::MIN {
        return None;
    }
    Some((operand, if negate { -constant } else { constant }))
}

/// Proves `condition => inductive == prev + factor` when `inductive` is a
/// constant addition over something provably related to `prev`.
fn is_addition_of(
    func: &Func,
    memo: &mut ImplicationMemo,
    inductive_val: InstId,
    prev_val: InstId,
    condition_val: InstId,
) -> Option<i64> {
    let (operand, constant) = unpack_constant_addition(func, inductive_val)?;
    let block = func
        .inst(inductive_val)
        .parent()
        .expect("addition inst must be placed");

    match induction_implication_holds(func, memo, prev_val, condition_val, operand, block) {
        ImplicationResult::ConsequentHolds(factor) => Some(factor.wrapping_add(constant)),
        _ => None,
    }
}

/// Returns `true` if `inst` is provably false whenever control is in `block`.
///
/// Beyond a literal `false`, this recognizes blocks reachable only through
/// the false edge of a conditional branching on `inst`.
fn is_always_false_in_block(func: &Func, inst: InstId, block: BlockId) -> bool {
    if let Some(b) = func.inst(inst).as_bool_lit() {
        return !b;
    }
    let preds = func.predecessors(block);
    !preds.is_empty()
        && preds.iter().all(|&pred| {
            let Some(term) = func.terminator(pred) else {
                return false;
            };
            func.inst(term).op() == Opcode::IfElse
                && func.if_else_condition(term) == inst
                && func.if_else_false_block(term) == block
        })
}

/// Proves that at the end of `block`, `condition => inductive == prev + f`
/// for some constant `f`.
///
/// The memo is seeded `Falsified` for the query before recursing, so a proof
/// that depends on itself fails closed rather than recursing forever.
fn induction_implication_holds(
    func: &Func,
    memo: &mut ImplicationMemo,
    prev_val: InstId,
    condition_val: InstId,
    inductive_val: InstId,
    block: BlockId,
) -> ImplicationResult {
    let key = ImplicationKey {
        condition: condition_val,
        inductive: inductive_val,
        block,
    };
    if let Some(&memoized) = memo.get(&key) {
        return memoized;
    }
    memo.insert(key, ImplicationResult::Falsified);

    // The most general solution: the antecedent is false here, so the
    // implication holds vacuously.
    if is_always_false_in_block(func, condition_val, block) {
        memo.insert(key, ImplicationResult::AntecedentHolds);
        return ImplicationResult::AntecedentHolds;
    }

    // Trivial solution: the inductive value *is* the previous value.
    if prev_val == inductive_val {
        memo.insert(key, ImplicationResult::ConsequentHolds(0));
        return ImplicationResult::ConsequentHolds(0);
    }

    // Additive case: a constant step over something already proven related.
    if let Some(factor) = is_addition_of(func, memo, inductive_val, prev_val, condition_val) {
        memo.insert(key, ImplicationResult::ConsequentHolds(factor));
        return ImplicationResult::ConsequentHolds(factor);
    }

    // Last resort: if the inductive value is a parameter of this block we
    // can recurse into the predecessors, replacing the parameter and the
    // condition with their branch arguments where applicable.
    if func.inst(inductive_val).op() != Opcode::Param {
        return ImplicationResult::Falsified;
    }
    let inductive_index = func
        .inst(inductive_val)
        .parent()
        .and_then(|b| func.param_index(b, inductive_val).filter(|_| b == block));
    let condition_index = func
        .inst(condition_val)
        .parent()
        .and_then(|b| func.param_index(b, condition_val).filter(|_| b == block));

    // With no predecessors, every possible value (none) of the condition is
    // false and the antecedent holds.
    let mut result = ImplicationResult::AntecedentHolds;
    for pred in func.predecessors(block) {
        let term = func
            .terminator(pred)
            .expect("predecessor must be terminated");
        // A parameter can only be traced through a branch-like edge that
        // actually carries arguments.
        let branch_like = matches!(func.inst(term).op(), Opcode::Branch | Opcode::Loop);
        if !branch_like && (inductive_index.is_some() || condition_index.is_some()) {
            result = ImplicationResult::Falsified;
            break;
        }

        let next_inductive = match inductive_index {
            Some(index) => func.branch_arg(term, index),
            None => inductive_val,
        };
        let next_condition = match condition_index {
            Some(index) => func.branch_arg(term, index),
            None => condition_val,
        };

        let pred_result =
            induction_implication_holds(func, memo, prev_val, next_condition, next_inductive, pred);
        result = join(result, pred_result);
        if result == ImplicationResult::Falsified {
            break;
        }
    }

    memo.insert(key, result);
    result
}

/// What is known about a loop phi relative to the iteration counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopInductionValueInfo {
    /// A boolean phi that is true throughout the loop body.
    AlwaysTrue,
    /// The phi equals `counter_offset + counter_factor * counter` on each
    /// iteration.
    AffineFunctionOfCounter {
        /// The loop terminator whose counter the relation refers to.
        loop_inst: InstId,
        /// Value at iteration zero (the loop entry argument).
        counter_offset: InstId,
        /// Per-iteration step.
        counter_factor: i64,
    },
}

/// Finds, for every loop in `func`, the continue-flag phi and all integer
/// phis provably affine in the iteration counter.
#[must_use]
pub fn collect_induction_values(func: &Func) -> HashMap<InstId, LoopInductionValueInfo> {
    let mut result = HashMap::new();

    for block in func.block_ids() {
        let Some(loop_inst) = func.terminator(block) else {
            continue;
        };
        if func.inst(loop_inst).op() != Opcode::Loop {
            continue;
        }
        let target_block = func.loop_target(loop_inst);
        let Some(if_else) = func.terminator(target_block) else {
            continue;
        };
        if func.inst(if_else).op() != Opcode::IfElse {
            continue;
        }
        let condition = func.if_else_condition(if_else);

        // The continue flag is easy to identify: a bool phi of the condition
        // block used directly as the branch condition. It is true for every
        // iteration the loop actually runs.
        let mut condition_param_index = None;
        for (index, &param) in func.block(target_block).params().iter().enumerate() {
            let Some(ty) = func.inst(param).ty() else {
                continue;
            };
            if func.types().kind(ty) == &crate::ir::TypeKind::Bool && condition == param {
                result.insert(param, LoopInductionValueInfo::AlwaysTrue);
                condition_param_index = Some(index);
            }
        }
        let Some(condition_param_index) = condition_param_index else {
            continue;
        };

        // An inductive parameter is initialized to anything on the entry
        // edge and stepped by a constant on every other edge, except on
        // paths where the continue flag is false (where the carried value is
        // never observed).
        for (param_index, &param) in func.block(target_block).params().iter().enumerate() {
            let Some(ty) = func.inst(param).ty() else {
                continue;
            };
            if !func.types().is_scalar_integer(ty) {
                continue;
            }
            if func.is_loop_counter(param) {
                continue;
            }

            let mut memo = ImplicationMemo::new();
            let mut implication = ImplicationResult::AntecedentHolds;
            for pred in func.predecessors(target_block) {
                let term = func
                    .terminator(pred)
                    .expect("predecessor must be terminated");
                // The entry edge is the base case and may carry anything.
                if term == loop_inst {
                    continue;
                }

                let condition_arg = func.branch_arg(term, condition_param_index);
                let inductive_arg = func.branch_arg(term, param_index);
                let pred_result = induction_implication_holds(
                    func,
                    &mut memo,
                    param,
                    condition_arg,
                    inductive_arg,
                    pred,
                );
                implication = join(implication, pred_result);
                if implication == ImplicationResult::Falsified {
                    break;
                }
            }

            if let ImplicationResult::ConsequentHolds(factor) = implication {
                result.insert(
                    param,
                    LoopInductionValueInfo::AffineFunctionOfCounter {
                        loop_inst,
                        counter_offset: func.branch_arg(loop_inst, param_index),
                        counter_factor: factor,
                    },
                );
            }
        }
    }

    result
}

// ---------------------------------------------------------------------------
// Loop exit values
// ---------------------------------------------------------------------------

/// Direction of an integer relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Comparator {
    /// `subject >= value`
    Geq,
    /// `subject <= value`
    Leq,
    /// `subject == value`
    Eq,
    /// `subject != value`
    Neq,
}

/// A relation a single value is known to satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SimpleRelation {
    /// The value is the given boolean.
    Bool(bool),
    /// The value satisfies `cmp value`.
    Integer {
        /// Relation direction.
        cmp: Comparator,
        /// Right-hand side.
        value: i64,
    },
}

impl SimpleRelation {
    /// Returns the exact logical negation, or `None` when the negation is
    /// unrepresentable (integer boundary overflow).
    pub(crate) fn negated(self) -> Option<Self> {
        Some(match self {
            Self::Bool(b) => Self::Bool(!b),
            Self::Integer {
                cmp: Comparator::Geq,
                value,
            } => Self::Integer {
                cmp: Comparator::Leq,
                value: value.checked_sub(1)?,
            },
            Self::Integer {
                cmp: Comparator::Leq,
                value,
            } => Self::Integer {
                cmp: Comparator::Geq,
                value: value.checked_add(1)?,
            },
            Self::Integer {
                cmp: Comparator::Eq,
                value,
            } => Self::Integer {
                cmp: Comparator::Neq,
                value,
            },
            Self::Integer {
                cmp: Comparator::Neq,
                value,
            } => Self::Integer {
                cmp: Comparator::Eq,
                value,
            },
        })
    }
}

/// Returns `true` if relation `a` logically implies relation `b`.
pub(crate) fn does_relation_imply(a: SimpleRelation, b: SimpleRelation) -> bool {
    use Comparator::{Eq, Geq, Leq, Neq};
    match (a, b) {
        (SimpleRelation::Bool(x), SimpleRelation::Bool(y)) => x == y,
        (
            SimpleRelation::Integer { cmp: ca, value: va },
            SimpleRelation::Integer { cmp: cb, value: vb },
        ) => match (ca, cb) {
            (Geq, Geq) => va >= vb,
            (Leq, Leq) => va <= vb,
            (Eq, Geq) => va >= vb,
            (Eq, Leq) => va <= vb,
            (Eq, Eq) => va == vb,
            (Eq, Neq) | (Neq, Neq) => va != vb,
            (Geq, Neq) => vb < va,
            (Leq, Neq) => vb > va,
            _ => false,
        },
        _ => false,
    }
}

/// Maps a comparison opcode with a right-hand literal into the relation the
/// left operand satisfies when the comparison evaluates to `assumed`.
fn relation_from_comparison(op: Opcode, literal: i64, assumed: bool) -> Option<SimpleRelation> {
    let relation = match (op, assumed) {
        (Opcode::Less, true) => SimpleRelation::Integer {
            cmp: Comparator::Leq,
            value: literal.checked_sub(1)?,
        },
        (Opcode::Less, false) => SimpleRelation::Integer {
            cmp: Comparator::Geq,
            value: literal,
        },
        (Opcode::Leq, true) => SimpleRelation::Integer {
            cmp: Comparator::Leq,
            value: literal,
        },
        (Opcode::Leq, false) => SimpleRelation::Integer {
            cmp: Comparator::Geq,
            value: literal.checked_add(1)?,
        },
        (Opcode::Greater, true) => SimpleRelation::Integer {
            cmp: Comparator::Geq,
            value: literal.checked_add(1)?,
        },
        (Opcode::Greater, false) => SimpleRelation::Integer {
            cmp: Comparator::Leq,
            value: literal,
        },
        (Opcode::Geq, true) => SimpleRelation::Integer {
            cmp: Comparator::Geq,
            value: literal,
        },
        (Opcode::Geq, false) => SimpleRelation::Integer {
            cmp: Comparator::Leq,
            value: literal.checked_sub(1)?,
        },
        (Opcode::Eql, true) | (Opcode::Neq, false) => SimpleRelation::Integer {
            cmp: Comparator::Eq,
            value: literal,
        },
        (Opcode::Eql, false) | (Opcode::Neq, true) => SimpleRelation::Integer {
            cmp: Comparator::Neq,
            value: literal,
        },
        _ => return None,
    };
    Some(relation)
}

/// Mirrors a comparison so the literal moves to the right-hand side.
fn mirrored(op: Opcode) -> Opcode {
    match op {
        Opcode::Less => Opcode::Greater,
        Opcode::Greater => Opcode::Less,
        Opcode::Leq => Opcode::Geq,
        Opcode::Geq => Opcode::Leq,
        other => other,
    }
}

/// Collects relations on the parameters of `block` implied by assuming the
/// boolean parameter `cond_param` has value `assumed` on entry.
///
/// Per feasible predecessor edge, a parameter learns `== k` from an integer
/// literal branch argument, or an inequality when the condition's branch
/// argument is a comparison of the parameter's own argument against a
/// literal. Edges whose condition argument is the opposite literal are
/// infeasible under the assumption and constrain nothing. The result joins
/// all feasible edges, weakening to whichever relation the others imply.
fn collect_implications(
    func: &Func,
    block: BlockId,
    cond_param: InstId,
    assumed: bool,
) -> HashMap<InstId, SimpleRelation> {
    let cond_index = func
        .param_index(block, cond_param)
        .expect("condition must be a parameter of the block");
    let params = func.block(block).params().to_vec();

    let mut joined: Option<HashMap<InstId, SimpleRelation>> = None;
    for pred in func.predecessors(block) {
        let term = func
            .terminator(pred)
            .expect("predecessor must be terminated");
        if func.branch_arg_count(term) <= cond_index {
            return HashMap::new();
        }
        let cond_arg = func.branch_arg(term, cond_index);

        // Edge infeasible under the assumption: no constraint contributed.
        if func.inst(cond_arg).as_bool_lit() == Some(!assumed) {
            continue;
        }

        let mut edge: HashMap<InstId, SimpleRelation> = HashMap::new();
        for (index, &param) in params.iter().enumerate() {
            let arg = func.branch_arg(term, index);
            if let Some(lit) = func.inst(arg).as_int_lit() {
                edge.insert(
                    param,
                    SimpleRelation::Integer {
                        cmp: Comparator::Eq,
                        value: lit,
                    },
                );
                continue;
            }
            // A comparison feeding the condition slot constrains the
            // parameter whose argument it compares.
            let cond_op = func.inst(cond_arg).op();
            if matches!(
                cond_op,
                Opcode::Less | Opcode::Leq | Opcode::Greater | Opcode::Geq | Opcode::Eql | Opcode::Neq
            ) {
                let lhs = func.inst_operand(cond_arg, 0);
                let rhs = func.inst_operand(cond_arg, 1);
                let relation = if lhs == arg {
                    func.inst(rhs)
                        .as_int_lit()
                        .and_then(|k| relation_from_comparison(cond_op, k, assumed))
                } else if rhs == arg {
                    func.inst(lhs)
                        .as_int_lit()
                        .and_then(|k| relation_from_comparison(mirrored(cond_op), k, assumed))
                } else {
                    None
                };
                if let Some(relation) = relation {
                    edge.insert(param, relation);
                }
            }
        }

        joined = Some(match joined {
            None => edge,
            Some(current) => {
                let mut merged = HashMap::new();
                for (param, a) in current {
                    if let Some(&b) = edge.get(&param) {
                        if a == b || does_relation_imply(b, a) {
                            merged.insert(param, a);
                        } else if does_relation_imply(a, b) {
                            merged.insert(param, b);
                        }
                    }
                }
                merged
            }
        });
    }

    joined.unwrap_or_default()
}

/// Derives closed-form loop-exit values for affine induction phis and, from
/// them, the loop counter's exit value.
///
/// Returns a map from phi (or counter) to the literal instruction holding
/// its value at loop exit.
///
/// # Panics
///
/// Panics if two induction phis of the same loop derive contradictory exit
/// values for the shared loop counter; that is an internal-consistency
/// defect, not an input condition.
pub fn collect_loop_exit_conditions(
    func: &mut Func,
    induction: &HashMap<InstId, LoopInductionValueInfo>,
) -> HashMap<InstId, InstId> {
    let mut exits: HashMap<InstId, InstId> = HashMap::new();

    for block in func.block_ids() {
        let Some(loop_inst) = func.terminator(block) else {
            continue;
        };
        if func.inst(loop_inst).op() != Opcode::Loop {
            continue;
        }
        let target_block = func.loop_target(loop_inst);
        let Some(if_else) = func.terminator(target_block) else {
            continue;
        };
        if func.inst(if_else).op() != Opcode::IfElse {
            continue;
        }
        let cond = func.if_else_condition(if_else);
        if func.inst(cond).op() != Opcode::Param || func.inst(cond).parent() != Some(target_block) {
            continue;
        }

        let Some(loop_counter) = func
            .block(target_block)
            .params()
            .iter()
            .copied()
            .find(|&p| func.is_loop_counter(p))
        else {
            continue;
        };

        for &param in &func.block(target_block).params().to_vec() {
            let Some(&LoopInductionValueInfo::AffineFunctionOfCounter {
                counter_offset,
                counter_factor,
                ..
            }) = induction.get(&param)
            else {
                continue;
            };
            // A known constant offset is required to compute the exit value.
            let Some(offset) = func.inst(counter_offset).as_int_lit() else {
                continue;
            };

            // A statement that holds exactly when the loop exits: the
            // false-condition implication must be the negation of the
            // true-condition implication (in either direction).
            let false_statements = collect_implications(func, target_block, cond, false);
            let Some(&statement) = false_statements.get(&param) else {
                continue;
            };
            let true_statements = collect_implications(func, target_block, cond, true);
            let Some(&inverse) = true_statements.get(&param) else {
                continue;
            };
            let Some(negated_inverse) = inverse.negated() else {
                continue;
            };
            let statement = if does_relation_imply(statement, negated_inverse) {
                statement
            } else if does_relation_imply(negated_inverse, statement) {
                negated_inverse
            } else {
                continue;
            };

            let SimpleRelation::Integer { cmp, value } = statement else {
                panic!("loop exit statement must be an integer relation");
            };

            // Solve `factor*i + offset (cmp) value` for the boundary
            // iteration, then evaluate the phi there.
            let solved = if counter_factor > 0 && cmp == Comparator::Geq {
                // Smallest i satisfying the relation.
                value
                    .checked_sub(offset)
                    .and_then(|d| d.checked_add(counter_factor - 1))
                    .map(|n| n / counter_factor)
                    .and_then(|i| {
                        let p = offset.checked_add(counter_factor.checked_mul(i - 1)?)?;
                        Some((i, p))
                    })
            } else if counter_factor < 0 && cmp == Comparator::Leq {
                // Largest i satisfying the relation.
                value
                    .checked_sub(offset)
                    .and_then(|d| d.checked_add(counter_factor + 1))
                    .map(|n| n / counter_factor)
                    .and_then(|i| {
                        let p = offset.checked_add(counter_factor.checked_mul(i)?)?;
                        Some((i, p))
                    })
            } else {
                None
            };
            let Some((exit_iter, exit_param_value)) = solved else {
                continue;
            };

            let param_ty = func.inst(param).ty().expect("phi must be typed");
            if func.types().value_in_range(exit_param_value, param_ty) {
                let lit = func.get_int_value(param_ty, exit_param_value);
                exits.insert(param, lit);
            }

            // The phi is a bijective function of the counter, so the counter
            // exit value follows. Independent derivations through different
            // phis must agree.
            if let Some(&existing) = exits.get(&loop_counter) {
                let existing_value = func
                    .inst(existing)
                    .as_int_lit()
                    .expect("counter exit value is a literal");
                assert_eq!(
                    existing_value, exit_iter,
                    "contradictory loop exit values for loop counter"
                );
            } else {
                let counter_ty = func.inst(loop_counter).ty().expect("counter is typed");
                if func.types().value_in_range(exit_iter, counter_ty) {
                    let lit = func.get_int_value(counter_ty, exit_iter);
                    exits.insert(loop_counter, lit);
                }
            }
        }
    }

    exits
}

#[cfg(test)]
mod tests {
    use super::*;
    use ImplicationResult::{AntecedentHolds, ConsequentHolds, Falsified};

    #[test]
    fn test_join_identity() {
        for x in [Falsified, AntecedentHolds, ConsequentHolds(3)] {
            assert_eq!(join(AntecedentHolds, x), x);
            assert_eq!(join(x, AntecedentHolds), x);
        }
    }

    #[test]
    fn test_join_mismatched_factors_falsify() {
        assert_eq!(join(ConsequentHolds(1), ConsequentHolds(2)), Falsified);
        assert_eq!(join(ConsequentHolds(2), ConsequentHolds(2)), ConsequentHolds(2));
    }

    #[test]
    fn test_join_commutative_associative() {
        let elems = [Falsified, AntecedentHolds, ConsequentHolds(1), ConsequentHolds(2)];
        for &a in &elems {
            for &b in &elems {
                assert_eq!(join(a, b), join(b, a));
                for &c in &elems {
                    assert_eq!(join(join(a, b), c), join(a, join(b, c)));
                }
            }
        }
    }

    #[test]
    fn test_relation_negation_roundtrip() {
        let geq = SimpleRelation::Integer {
            cmp: Comparator::Geq,
            value: 5,
        };
        let neg = geq.negated().unwrap();
        assert_eq!(
            neg,
            SimpleRelation::Integer {
                cmp: Comparator::Leq,
                value: 4,
            }
        );
        assert_eq!(neg.negated().unwrap(), geq);
    }

    #[test]
    fn test_relation_negation_overflow_is_rejected() {
        let rel = SimpleRelation::Integer {
            cmp: Comparator::Geq,
            value: i64::MIN,
        };
        assert!(rel.negated().is_none());
    }

    #[test]
    fn test_relation_implication() {
        let geq5 = SimpleRelation::Integer {
            cmp: Comparator::Geq,
            value: 5,
        };
        let geq3 = SimpleRelation::Integer {
            cmp: Comparator::Geq,
            value: 3,
        };
        let eq0 = SimpleRelation::Integer {
            cmp: Comparator::Eq,
            value: 0,
        };
        let leq4 = SimpleRelation::Integer {
            cmp: Comparator::Leq,
            value: 4,
        };
        assert!(does_relation_imply(geq5, geq3));
        assert!(!does_relation_imply(geq3, geq5));
        assert!(does_relation_imply(eq0, leq4));
        assert!(!does_relation_imply(leq4, eq0));
        assert!(does_relation_imply(geq5, geq5));
    }

    #[test]
    fn test_collect_induction_values_canonical_loop() {
        let mut fixture = crate::autodiff::testutil::build_paired_loop_func(5);
        // Counters must exist so the counter-exclusion path is exercised.
        let _ = crate::autodiff::index::build_indexed_blocks(&mut fixture.func);
        let induction = collect_induction_values(&fixture.func);

        assert_eq!(
            induction.get(&fixture.flag_phi),
            Some(&LoopInductionValueInfo::AlwaysTrue)
        );
        match induction.get(&fixture.i_phi) {
            Some(&LoopInductionValueInfo::AffineFunctionOfCounter {
                loop_inst,
                counter_offset,
                counter_factor,
            }) => {
                assert_eq!(loop_inst, fixture.primal_loop);
                assert_eq!(fixture.func.inst(counter_offset).as_int_lit(), Some(0));
                assert_eq!(counter_factor, 1);
            }
            other => panic!("expected affine induction info, got {other:?}"),
        }
        // The float accumulator is not an induction value.
        assert!(!induction.contains_key(&fixture.sum_phi));
    }

    #[test]
    fn test_collect_loop_exit_conditions_canonical_loop() {
        let mut fixture = crate::autodiff::testutil::build_paired_loop_func(5);
        let _ = crate::autodiff::index::build_indexed_blocks(&mut fixture.func);
        let induction = collect_induction_values(&fixture.func);
        let exits = collect_loop_exit_conditions(&mut fixture.func, &induction);

        // i exits with the boundary-iteration value; the counter exit value
        // is the first iteration index failing `i < 5`.
        let i_exit = exits.get(&fixture.i_phi).expect("exit value for i");
        assert_eq!(fixture.func.inst(*i_exit).as_int_lit(), Some(4));

        let counter = fixture
            .func
            .block(fixture.primal_cond)
            .params()
            .iter()
            .copied()
            .find(|&p| fixture.func.is_loop_counter(p))
            .expect("counter param");
        let counter_exit = exits.get(&counter).expect("counter exit value");
        assert_eq!(fixture.func.inst(*counter_exit).as_int_lit(), Some(5));
    }
}
