//! Shared test fixture: a normalized primal/differential loop pair.
//!
//! Builds the canonical shape the checkpointing pipeline consumes, modeling
//! `for (i = 0; i < 5; i++) sum += x[i]` and its reverse loop:
//!
//! ```text
//! entry(x):            branch prelude
//! prelude:             branch init
//! init:                loop cond(true, 0, 0.0) [break exit_blk, continue body]
//! cond(flag, i, sum):  if flag then body else exit_blk
//! body:                xi = load &x[i]; sum2 = sum + xi
//!                      i2 = i + 1; flag2 = i2 < 5
//!                      branch cond(flag2, i2, sum2)
//! exit_blk:            branch d_init
//! d_init:              loop d_cond(true, 0.0)            [differential]
//! d_cond(dflag, dsum): if dflag then d_body else d_break [differential]
//! d_body:              d2 = sum + xi                     [differential]
//!                      branch d_cond(true, d2)
//! d_break:             return dsum                       [differential]
//! ```
//!
//! The differential body deliberately reads both `sum` (a loop-carried phi
//! that must be stored per iteration) and `xi` (a cheap load that should be
//! recomputed).

use crate::ir::{BlockId, Builder, Decoration, Func, InstId, PrimalLink};

/// Handles into the fixture function.
pub struct PairedLoopFixture {
    pub func: Func,
    pub primal_entry: BlockId,
    pub prelude: BlockId,
    pub primal_init: BlockId,
    pub primal_cond: BlockId,
    pub primal_body: BlockId,
    pub primal_break: BlockId,
    pub diff_init: BlockId,
    pub diff_cond: BlockId,
    pub diff_body: BlockId,
    pub diff_break: BlockId,
    pub primal_loop: InstId,
    pub diff_loop: InstId,
    pub x_param: InstId,
    pub flag_phi: InstId,
    pub i_phi: InstId,
    pub sum_phi: InstId,
    pub elem_addr: InstId,
    pub xi_load: InstId,
    pub sum_add: InstId,
    pub dsum_phi: InstId,
    pub d_add: InstId,
}

fn build(max_iters: Option<u32>) -> PairedLoopFixture {
    let mut func = Func::new();
    let float = func.types_mut().float();
    let int = func.types_mut().int();
    let bool_ty = func.types_mut().bool();
    let arr = func.types_mut().array(float, 5);
    let x_ty = func.types_mut().const_ref(arr);

    let primal_entry = func.alloc_block();
    let prelude = func.alloc_block();
    let primal_init = func.alloc_block();
    let primal_cond = func.alloc_block();
    let primal_body = func.alloc_block();
    let primal_break = func.alloc_block();
    let diff_init = func.alloc_block();
    let diff_cond = func.alloc_block();
    let diff_body = func.alloc_block();
    let diff_break = func.alloc_block();
    for block in [
        primal_entry,
        prelude,
        primal_init,
        primal_cond,
        primal_body,
        primal_break,
        diff_init,
        diff_cond,
        diff_body,
        diff_break,
    ] {
        func.insert_block_at_end(block);
    }

    let true_lit = func.get_bool_value(true);
    let zero_i = func.get_int_value(int, 0);
    let one_i = func.get_int_value(int, 1);
    let five_i = func.get_int_value(int, 5);
    let zero_f = func.get_float_value(float, 0.0);

    let mut builder = Builder::new(&mut func);
    let x_param = builder.emit_param(primal_entry, x_ty);

    builder.set_insert_into(primal_entry);
    builder.emit_branch(prelude, &[]);
    builder.set_insert_into(prelude);
    builder.emit_branch(primal_init, &[]);

    builder.set_insert_into(primal_init);
    let primal_loop = builder.emit_loop(
        primal_cond,
        primal_break,
        primal_body,
        &[true_lit, zero_i, zero_f],
    );

    let flag_phi = builder.emit_param(primal_cond, bool_ty);
    let i_phi = builder.emit_param(primal_cond, int);
    let sum_phi = builder.emit_param(primal_cond, float);
    builder.set_insert_into(primal_cond);
    builder.emit_if_else(flag_phi, primal_body, primal_break, primal_break);

    builder.set_insert_into(primal_body);
    let elem_addr = builder.emit_element_address(x_param, i_phi);
    let xi_load = builder.emit_load(elem_addr);
    let sum_add = builder.emit_add(float, sum_phi, xi_load);
    let i_next = builder.emit_add(int, i_phi, one_i);
    let flag_next = builder.emit_less(i_next, five_i);
    builder.emit_branch(primal_cond, &[flag_next, i_next, sum_add]);

    builder.set_insert_into(primal_break);
    builder.emit_branch(diff_init, &[]);

    builder.set_insert_into(diff_init);
    let diff_loop = builder.emit_loop(diff_cond, diff_break, diff_body, &[true_lit, zero_f]);

    let dflag_phi = builder.emit_param(diff_cond, bool_ty);
    let dsum_phi = builder.emit_param(diff_cond, float);
    builder.set_insert_into(diff_cond);
    builder.emit_if_else(dflag_phi, diff_body, diff_break, diff_break);

    builder.set_insert_into(diff_body);
    let d_add = builder.emit_add(float, sum_phi, xi_load);
    builder.emit_branch(diff_cond, &[true_lit, d_add]);

    builder.set_insert_into(diff_break);
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
        (diff_init, primal_init),
        (diff_cond, primal_cond),
        (diff_body, primal_body),
        (diff_break, primal_break),
    ] {
        func.add_block_decoration(
            diff_block,
            Decoration::Differential {
                primal: Some(PrimalLink::Block(primal_block)),
            },
        );
    }

    PairedLoopFixture {
        func,
        primal_entry,
        prelude,
        primal_init,
        primal_cond,
        primal_body,
        primal_break,
        diff_init,
        diff_cond,
        diff_body,
        diff_break,
        primal_loop,
        diff_loop,
        x_param,
        flag_phi,
        i_phi,
        sum_phi,
        elem_addr,
        xi_load,
        sum_add,
        dsum_phi,
        d_add,
    }
}

/// Builds the paired-loop fixture with a static iteration bound.
pub fn build_paired_loop_func(max_iters: u32) -> PairedLoopFixture {
    build(Some(max_iters))
}

/// Builds the paired-loop fixture without an iteration bound.
pub fn build_paired_loop_func_unbounded() -> PairedLoopFixture {
    build(None)
}
