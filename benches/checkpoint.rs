//! Checkpointing pipeline benchmark.
//!
//! Measures the full pipeline over the canonical bounded loop pair. The
//! pass is destructive, so each iteration rebuilds the input function.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use glaze::prelude::*;

fn build_loop_pair() -> Func {
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

    builder.set_insert_into(init);
    let primal_loop = builder.emit_loop(cond, brk, body, &[true_lit, zero_i, zero_f]);

    let flag_phi = builder.emit_param(cond, bool_ty);
    let i_phi = builder.emit_param(cond, int);
    let sum_phi = builder.emit_param(cond, float);
    builder.set_insert_into(cond);
    builder.emit_if_else(flag_phi, body, brk, brk);

    builder.set_insert_into(body);
    let addr = builder.emit_element_address(x_param, i_phi);
    let xi = builder.emit_load(addr);
    let sum_next = builder.emit_add(float, sum_phi, xi);
    let i_next = builder.emit_add(int, i_phi, one_i);
    let flag_next = builder.emit_less(i_next, five_i);
    builder.emit_branch(cond, &[flag_next, i_next, sum_next]);

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

    func.add_decoration(primal_loop, Decoration::LoopMaxIters(5));
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

    func
}

fn bench_checkpoint_policy(c: &mut Criterion) {
    c.bench_function("apply_checkpoint_policy/loop_sum", |b| {
        b.iter_batched(
            build_loop_pair,
            |mut func| apply_checkpoint_policy(&mut func).unwrap(),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_checkpoint_policy);
criterion_main!(benches);
