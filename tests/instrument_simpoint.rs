//! Structural checks on the SimPoint instrumentation pass: callback
//! placement, tick density, and sidecar emission.

use dgtrace::exec;
use dgtrace::instrument::{interface, Pass, SimPointPass};
use dgtrace::ir::{
    BinOp, Callee, Instr, InstrKind, IrBlock, IrFunctionBuilder, IrModule, Operand,
};
use dgtrace::trace;

fn callback_name(instr: &Instr) -> Option<&str> {
    match &instr.kind {
        InstrKind::Call {
            callee: Callee::Direct(name),
            ..
        } if interface::is_callback_symbol(name) => Some(name),
        _ => None,
    }
}

fn count_callbacks(block: &IrBlock, symbol: &str) -> usize {
    block
        .instrs
        .iter()
        .filter(|i| callback_name(i) == Some(symbol))
        .count()
}

fn build_two_block_module() -> IrModule {
    let mut module = IrModule::new("simpoint_test");
    let mut b = IrFunctionBuilder::new("main", 0);
    let entry = b.create_block(Some("entry"));
    let exit = b.create_block(Some("exit"));
    b.set_current_block(entry);
    let v = b.fresh_value();
    b.push(InstrKind::BinOp {
        result: v,
        op: BinOp::Add,
        lhs: Operand::Imm(1),
        rhs: Operand::Imm(2),
    });
    b.push(InstrKind::DbgMarker);
    b.push(InstrKind::Br { dest: exit });
    b.set_current_block(exit);
    b.push(InstrKind::Ret {
        value: Some(Operand::Value(v)),
    });
    module.add_function(b.build()).unwrap();
    module
}

#[test]
fn inserts_bb_enter_and_one_tick_per_executable_instruction() {
    let mut module = build_two_block_module();
    let original_exec: Vec<Vec<_>> = module.functions()[0]
        .blocks()
        .iter()
        .map(exec::executable_instrs)
        .collect();

    let dir = tempfile::tempdir().unwrap();
    let uid_path = dir.path().join("m.uid");
    SimPointPass::new(Some(uid_path.clone()))
        .run(&mut module)
        .unwrap();

    let func = module.function_by_name("main").unwrap();
    for (b, block) in func.blocks().iter().enumerate() {
        // One BB-enter callback per block, as the first inserted call.
        assert_eq!(count_callbacks(block, interface::RECORD_BASIC_BLOCK), 1);
        // One tick per original executable instruction.
        assert_eq!(
            count_callbacks(block, interface::INC_DYNAMIC_INST_COUNT),
            original_exec[b].len()
        );
        // Every original executable instruction is immediately preceded by
        // its tick.
        for &orig in &original_exec[b] {
            let pos = block.position_of(orig).unwrap();
            assert_eq!(
                callback_name(&block.instrs[pos - 1]),
                Some(interface::INC_DYNAMIC_INST_COUNT),
                "instruction {} lacks a preceding tick",
                orig
            );
        }
    }

    // The entry flag distinguishes the function's entry block.
    let entry_args = func.entry_block().instrs.iter().find_map(|i| match &i.kind {
        InstrKind::Call {
            callee: Callee::Direct(name),
            args,
            ..
        } if name == interface::RECORD_BASIC_BLOCK => Some(args.clone()),
        _ => None,
    });
    assert_eq!(entry_args.unwrap()[1], Operand::Imm(1));

    // Sidecar written with one record per block.
    let records = trace::read_sidecar(&uid_path).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].function_name, "main");
    assert_eq!(records[0].bb_name, "entry");
}

#[test]
fn bb_enter_precedes_the_first_tick() {
    let mut module = build_two_block_module();
    SimPointPass::new(None).run(&mut module).unwrap();

    let func = module.function_by_name("main").unwrap();
    for block in func.blocks() {
        let first_bb_enter = block
            .instrs
            .iter()
            .position(|i| callback_name(i) == Some(interface::RECORD_BASIC_BLOCK))
            .unwrap();
        let first_tick = block
            .instrs
            .iter()
            .position(|i| callback_name(i) == Some(interface::INC_DYNAMIC_INST_COUNT))
            .unwrap();
        assert!(first_bb_enter < first_tick);
    }
}

#[test]
fn sidecar_matches_a_fresh_build_of_the_same_module() {
    // The SimPoint pass writes the sidecar before rewriting anything, so it
    // must reload cleanly against an uninstrumented build — that is the
    // contract between the two passes.
    let mut instrumented = build_two_block_module();
    let dir = tempfile::tempdir().unwrap();
    let uid_path = dir.path().join("m.uid");
    SimPointPass::new(Some(uid_path.clone()))
        .run(&mut instrumented)
        .unwrap();

    let fresh = build_two_block_module();
    let reloaded = dgtrace::uid::CanonicalId::from_sidecar(&fresh, &uid_path)
        .expect("sidecar applies to a fresh build");
    let assigned = dgtrace::uid::CanonicalId::assign(&fresh);
    assert_eq!(reloaded.num_insts(), assigned.num_insts());
    assert_eq!(reloaded.num_bbs(), assigned.num_bbs());
}
