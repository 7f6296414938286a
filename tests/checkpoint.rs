//! Checkpointing pipeline integration tests.
//!
//! These tests drive the public API end to end:
//! 1. Build a function with matched primal/differential regions
//! 2. Run `apply_checkpoint_policy`
//! 3. Verify the classification sets, the synthesized storage and the
//!    rewritten differential uses

use glaze::autodiff::{
    build_indexed_blocks, collect_induction_values, collect_loop_exit_conditions,
    lower_checkpoint_object_insts, LoopInductionValueInfo,
};
use glaze::prelude::*;

/// Handles into the canonical `for (i = 0; i < 5; i++) sum += x[i]` loop pair.
struct LoopPair {
    func: Func,
    primal_cond: BlockId,
    diff_cond: BlockId,
    diff_loop: InstId,
    primal_loop: InstId,
    i_phi: InstId,
    j_phi: Option<InstId>,
    d_add: InstId,
}

/// Builds the normalized loop pair; `extra_phi` adds a second integer phi
/// fed the same stepped value as `i` but usable with a fabricated induction
/// claim.
fn build_loop_pair(max_iters: Option<u32>, extra_phi: bool) -> LoopPair {
    let mut func = Func::new();
    let float = func.types_mut().float();
    let int = func.types_mut().int();
    let bool_ty = func.types_mut().bool();
    let arr = func.types_mut().array(float, 5);
    let x_ty = func.types_mut().const_ref(arr);

    let entry = func.alloc_block();
    let prelude = func.alloc_block();
    let init = func.alloc_block();
    let cond = func.alloc_block();
    let body = func.alloc_block();
    let brk = func.alloc_block();
    let d_init = func.alloc_block();
    let d_cond = func.alloc_block();
    let d_body = func.alloc_block();
    let d_break = func.alloc_block();
    for block in [
        entry, prelude, init, cond, body, brk, d_init, d_cond, d_body, d_break,
    ] {
        func.insert_block_at_end(block);
    }

    let true_lit = func.get_bool_value(true);
    let zero_i = func.get_int_value(int, 0);
    let one_i = func.get_int_value(int, 1);
    let five_i = func.get_int_value(int, 5);
    let zero_f = func.get_float_value(float, 0.0);

    let mut builder = Builder::new(&mut func);
    let x_param = builder.emit_param(entry, x_ty);
    builder.set_insert_into(entry);
    builder.emit_branch(prelude, &[]);
    builder.set_insert_into(prelude);
    builder.emit_branch(init, &[]);

    let mut entry_args = vec![true_lit, zero_i, zero_f];
    if extra_phi {
        entry_args.push(zero_i);
    }
    builder.set_insert_into(init);
    let primal_loop = builder.emit_loop(cond, brk, body, &entry_args);

    let flag_phi = builder.emit_param(cond, bool_ty);
    let i_phi = builder.emit_param(cond, int);
    let sum_phi = builder.emit_param(cond, float);
    let j_phi = extra_phi.then(|| builder.emit_param(cond, int));
    builder.set_insert_into(cond);
    builder.emit_if_else(flag_phi, body, brk, brk);

    builder.set_insert_into(body);
    let addr = builder.emit_element_address(x_param, i_phi);
    let xi = builder.emit_load(addr);
    let sum_next = builder.emit_add(float, sum_phi, xi);
    let i_next = builder.emit_add(int, i_phi, one_i);
    let flag_next = builder.emit_less(i_next, five_i);
    let mut back_args = vec![flag_next, i_next, sum_next];
    if extra_phi {
        back_args.push(i_next);
    }
    builder.emit_branch(cond, &back_args);

    builder.set_insert_into(brk);
    builder.emit_branch(d_init, &[]);

    builder.set_insert_into(d_init);
    let diff_loop = builder.emit_loop(d_cond, d_break, d_body, &[true_lit, zero_f]);

    let dflag_phi = builder.emit_param(d_cond, bool_ty);
    let dsum_phi = builder.emit_param(d_cond, float);
    builder.set_insert_into(d_cond);
    builder.emit_if_else(dflag_phi, d_body, d_break, d_break);

    builder.set_insert_into(d_body);
    let d_add = builder.emit_add(float, sum_phi, xi);
    builder.emit_branch(d_cond, &[true_lit, d_add]);

    builder.set_insert_into(d_break);
    builder.emit_return(Some(dsum_phi));

    if let Some(n) = max_iters {
        func.add_decoration(primal_loop, Decoration::LoopMaxIters(n));
    }
    func.add_decoration(
        diff_loop,
        Decoration::Differential {
            primal: Some(PrimalLink::Inst(primal_loop)),
        },
    );
    for (diff_block, primal_block) in [
        (d_init, init),
        (d_cond, cond),
        (d_body, body),
        (d_break, brk),
    ] {
        func.add_block_decoration(
            diff_block,
            Decoration::Differential {
                primal: Some(PrimalLink::Block(primal_block)),
            },
        );
    }

    LoopPair {
        func,
        primal_cond: cond,
        diff_cond: d_cond,
        diff_loop,
        primal_loop,
        i_phi,
        j_phi,
        d_add,
    }
}

fn root_addr(func: &Func, mut addr: InstId) -> InstId {
    while func.inst(addr).op() == Opcode::ElementAddr {
        addr = func.inst_operand(addr, 0);
    }
    addr
}

#[test]
fn test_simple_loop_sum_checkpointing() {
    let mut lp = build_loop_pair(Some(5), false);
    let hoisted = apply_checkpoint_policy(&mut lp.func).expect("pipeline succeeds");
    let func = &lp.func;

    // Partition invariant: nothing is both stored and recomputed.
    for inst in hoisted.store_set.iter() {
        assert!(
            !hoisted.recompute_set.contains(inst),
            "{inst:?} in both sets"
        );
    }

    // The final store set holds synthesized local variables only.
    for inst in hoisted.store_set.iter() {
        assert_eq!(func.inst(inst).op(), Opcode::Var);
    }

    // The accumulator is stored into a per-iteration indexed array sized
    // max_iters + 1.
    let sum_storage = hoisted.store_set.iter().find(|&var| {
        let ty = func.inst(var).ty().unwrap();
        let pointee = func.types().pointee(ty).unwrap();
        matches!(
            func.types().kind(pointee),
            TypeKind::Array { count: 6, .. }
        )
    });
    assert!(sum_storage.is_some(), "no indexed accumulator storage");

    // The loop counter's storage carries the counter tag.
    let counter_storage = hoisted.store_set.iter().find(|&var| {
        func.inst(var)
            .decorations()
            .iter()
            .any(|d| matches!(d, Decoration::LoopCounter))
    });
    assert!(counter_storage.is_some(), "no counter storage");

    // x[i] is recomputed: the recompute set holds a load placed in a
    // recompute block.
    assert!(hoisted.recompute_set.iter().any(|inst| {
        func.inst(inst).op() == Opcode::Load
            && func.is_recompute_block(func.inst(inst).parent().unwrap())
    }));

    // The differential add now reads the stored accumulator through an
    // indexed load rooted at a store-set variable...
    let sum_read = func.inst_operand(lp.d_add, 0);
    assert_eq!(func.inst(sum_read).op(), Opcode::Load);
    let sum_addr = func.inst_operand(sum_read, 0);
    assert_eq!(func.inst(sum_addr).op(), Opcode::ElementAddr);
    assert!(hoisted.store_set.contains(root_addr(func, sum_addr)));

    // ...and the recomputed element load from the recompute block.
    let xi_read = func.inst_operand(lp.d_add, 1);
    assert_eq!(func.inst(xi_read).op(), Opcode::Load);
    assert!(func.is_recompute_block(func.inst(xi_read).parent().unwrap()));

    // The reverse counter is seeded from the stored final forward count,
    // never from the raw (out-of-scope) primal phi.
    let diff_counter_index = func
        .block(lp.diff_cond)
        .params()
        .iter()
        .position(|&p| func.is_loop_counter(p))
        .expect("reverse counter phi");
    let seed = func.branch_arg(lp.diff_loop, diff_counter_index);
    assert_eq!(func.inst(seed).op(), Opcode::Sub);
    assert_eq!(func.inst(func.inst_operand(seed, 0)).op(), Opcode::Load);
}

#[test]
fn test_unbounded_loop_storage_fails_loudly() {
    let mut lp = build_loop_pair(None, false);
    match apply_checkpoint_policy(&mut lp.func) {
        Err(Error::UnboundedLoop { .. }) => {}
        other => panic!("expected UnboundedLoop, got {other:?}"),
    }
}

#[test]
fn test_counter_monotonicity() {
    let mut lp = build_loop_pair(Some(5), false);
    let indexed = build_indexed_blocks(&mut lp.func);
    let func = &lp.func;
    let tracking = &indexed[&lp.primal_cond][0];

    // Forward counter: 0 on entry, +1 per iteration.
    let entry_index = func
        .param_index(lp.primal_cond, tracking.primal_count_param)
        .unwrap();
    let entry_arg = func.branch_arg(lp.primal_loop, entry_index);
    assert_eq!(func.inst(entry_arg).as_int_lit(), Some(0));

    // Reverse counter: primal_count - 1 on entry, -1 per iteration, exits
    // at counter >= 0.
    let diff_index = func
        .param_index(lp.diff_cond, tracking.diff_count_param)
        .unwrap();
    let diff_entry = func.branch_arg(lp.diff_loop, diff_index);
    assert_eq!(func.inst(diff_entry).op(), Opcode::Sub);
    assert_eq!(
        func.inst_operand(diff_entry, 0),
        tracking.primal_count_param
    );
    assert_eq!(
        func.inst(func.inst_operand(diff_entry, 1)).as_int_lit(),
        Some(1)
    );

    let diff_if = func.terminator(lp.diff_cond).unwrap();
    let exit_cond = func.if_else_condition(diff_if);
    assert_eq!(func.inst(exit_cond).op(), Opcode::Geq);
    assert_eq!(func.inst_operand(exit_cond, 0), tracking.diff_count_param);
}

#[test]
fn test_call_with_side_effect_is_stored() {
    let (mut func, call, d_use) = build_call_func(vec![]);
    let hoisted = apply_checkpoint_policy(&mut func).unwrap();

    // The call is not recomputed anywhere.
    assert!(!hoisted.recompute_set.contains(call));
    for inst in hoisted.recompute_set.iter() {
        assert_ne!(func.inst(inst).op(), Opcode::Call);
    }
    // Its value reaches the differential user through stored memory.
    assert_eq!(hoisted.store_set.len(), 1);
    let replacement = func.inst_operand(d_use, 0);
    assert_eq!(func.inst(replacement).op(), Opcode::Load);
}

#[test]
fn test_read_none_call_is_recomputed() {
    let (mut func, call, d_use) = build_call_func(vec![Decoration::ReadNone]);
    let hoisted = apply_checkpoint_policy(&mut func).unwrap();

    assert!(hoisted.store_set.is_empty());
    assert!(hoisted
        .recompute_set
        .iter()
        .any(|inst| func.inst(inst).op() == Opcode::Call));
    // The differential user reads the recompute-block clone, not the
    // original call.
    let replacement = func.inst_operand(d_use, 0);
    assert_ne!(replacement, call);
    assert_eq!(func.inst(replacement).op(), Opcode::Call);
    assert!(func.is_recompute_block(func.inst(replacement).parent().unwrap()));
}

/// Builds: entry -> prelude -> compute (call) -> differential block using
/// the call result. Returns the function, the call and the differential
/// user.
fn build_call_func(callee_decorations: Vec<Decoration>) -> (Func, InstId, InstId) {
    let mut func = Func::new();
    let float = func.types_mut().float();

    let entry = func.alloc_block();
    let prelude = func.alloc_block();
    let compute = func.alloc_block();
    let d_block = func.alloc_block();
    for block in [entry, prelude, compute, d_block] {
        func.insert_block_at_end(block);
    }

    let callee = func.create_func_ref(callee_decorations);

    let mut builder = Builder::new(&mut func);
    builder.set_insert_into(entry);
    builder.emit_branch(prelude, &[]);
    builder.set_insert_into(prelude);
    builder.emit_branch(compute, &[]);
    builder.set_insert_into(compute);
    let call = builder.emit_call(Some(float), callee, &[]);
    builder.emit_branch(d_block, &[]);
    builder.set_insert_into(d_block);
    let d_use = builder.emit_add(float, call, call);
    builder.emit_return(Some(d_use));

    func.add_block_decoration(d_block, Decoration::Differential { primal: None });

    (func, call, d_use)
}

#[test]
#[should_panic(expected = "contradictory loop exit values")]
fn test_contradictory_exit_values_abort() {
    let mut lp = build_loop_pair(Some(5), true);
    let _ = build_indexed_blocks(&mut lp.func);
    let mut induction = collect_induction_values(&lp.func);

    // `i` derives naturally (factor 1, exit counter 5). Claim that `j` —
    // which observes the same stepped value — advances by 2 per iteration:
    // its exit inequality then solves to a different counter exit value.
    let j_phi = lp.j_phi.unwrap();
    let j_index = lp.func.param_index(lp.primal_cond, j_phi).unwrap();
    let j_offset = lp.func.branch_arg(lp.primal_loop, j_index);
    induction.insert(
        j_phi,
        LoopInductionValueInfo::AffineFunctionOfCounter {
            loop_inst: lp.primal_loop,
            counter_offset: j_offset,
            counter_factor: 2,
        },
    );
    assert!(matches!(
        induction.get(&lp.i_phi),
        Some(LoopInductionValueInfo::AffineFunctionOfCounter { .. })
    ));

    let _ = collect_loop_exit_conditions(&mut lp.func, &induction);
}

#[test]
fn test_lowering_is_idempotent_without_markers() {
    let mut lp = build_loop_pair(Some(5), false);
    let before = lp.func.dump();
    lower_checkpoint_object_insts(&mut lp.func);
    assert_eq!(lp.func.dump(), before);
}

#[test]
fn test_process_module_skips_non_differentiated_funcs() {
    let mut module = Module::new("shader");
    module.funcs.push(build_loop_pair(Some(5), false).func);
    module.funcs.push(build_loop_pair(Some(5), false).func);

    // A function with no differential region is left untouched.
    let mut plain = Func::new();
    let block = plain.alloc_block();
    plain.insert_block_at_end(block);
    let mut builder = Builder::new(&mut plain);
    builder.set_insert_into(block);
    builder.emit_return(None);
    module.funcs.push(plain);

    let results = process_module(&mut module).unwrap();
    assert_eq!(results.len(), 2);
}
