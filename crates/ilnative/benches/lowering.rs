use criterion::{criterion_group, criterion_main, Criterion};
use ilnative::bytecode::{BinaryOp, Instruction, Label, MethodBody, Opcode};
use ilnative::types::{PointerWidth, PrimitiveKind, TypeTable};
use ilnative::{lower_method, LowerOptions};
use std::hint::black_box;

/// `count` diamonds in a row, each merging a value carried on the stack.
fn diamond_chain(types: &TypeTable, count: u32) -> MethodBody {
    let i32_ty = types.primitive(PrimitiveKind::I32);
    let mut body = MethodBody::new("Bench::Diamonds");
    body.params = vec![i32_ty];
    body.return_type = Some(i32_ty);

    let mut ins = |label: u32, op: Opcode| {
        body.instructions
            .push(Instruction::new(Label(label), op))
    };
    ins(0, Opcode::LdcI4(0));
    for i in 0..count {
        let base = 1 + i * 16;
        let merge = base + 16;
        ins(base, Opcode::Ldarg(0));
        ins(base + 1, Opcode::Brtrue(Label(base + 8)));
        ins(base + 3, Opcode::LdcI4(1));
        ins(base + 4, Opcode::Binary(BinaryOp::Add));
        ins(base + 5, Opcode::Br(Label(merge)));
        ins(base + 8, Opcode::LdcI4(2));
        ins(base + 9, Opcode::Binary(BinaryOp::Mul));
        ins(base + 10, Opcode::Br(Label(merge)));
    }
    ins(1 + count * 16, Opcode::Ret);
    body
}

fn diamonds_100_bench(c: &mut Criterion) {
    let types = TypeTable::new(PointerWidth::Bits64);
    let body = diamond_chain(&types, 100);
    let options = LowerOptions::default();
    c.bench_function("lower 100 diamonds", |b| {
        b.iter(|| lower_method(black_box(&body), &types, &options))
    });
}

fn diamonds_1000_bench(c: &mut Criterion) {
    let types = TypeTable::new(PointerWidth::Bits64);
    let body = diamond_chain(&types, 1000);
    let options = LowerOptions {
        validate_generation_order: false,
        ..LowerOptions::default()
    };
    c.bench_function("lower 1000 diamonds", |b| {
        b.iter(|| lower_method(black_box(&body), &types, &options))
    });
}

criterion_group!(benches, diamonds_100_bench, diamonds_1000_bench);
criterion_main!(benches);
