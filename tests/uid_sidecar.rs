//! Canonical-ID assignment and sidecar round-trips.

use dgtrace::error::SidecarError;
use dgtrace::exec;
use dgtrace::ir::{BinOp, BlockId, Callee, InstrKind, IrFunctionBuilder, IrModule, Operand};
use dgtrace::trace;
use dgtrace::uid::{BBId, CanonicalId, InstId};

/// Two functions, three blocks, with markers mixed in so executable and
/// total instruction counts differ.
fn build_module() -> IrModule {
    let mut module = IrModule::new("uid_test");

    let mut b = IrFunctionBuilder::new("main", 0);
    let entry = b.create_block(Some("entry"));
    let exit = b.create_block(Some("exit"));
    b.set_current_block(entry);
    let slot = b.fresh_value();
    b.push(InstrKind::Alloca { result: slot });
    b.push(InstrKind::DbgMarker);
    b.push(InstrKind::Store {
        addr: Operand::Value(slot),
        value: Operand::Imm(1),
    });
    let r = b.fresh_value();
    b.push(InstrKind::Call {
        result: Some(r),
        callee: Callee::Direct("helper".into()),
        args: vec![],
    });
    b.push(InstrKind::Br { dest: exit });
    b.set_current_block(exit);
    b.push(InstrKind::Ret {
        value: Some(Operand::Value(r)),
    });
    module.add_function(b.build()).unwrap();

    let mut b = IrFunctionBuilder::new("helper", 0);
    let entry = b.create_block(Some("entry"));
    b.set_current_block(entry);
    let v = b.fresh_value();
    b.push(InstrKind::BinOp {
        result: v,
        op: BinOp::Add,
        lhs: Operand::Imm(20),
        rhs: Operand::Imm(22),
    });
    b.push(InstrKind::Ret {
        value: Some(Operand::Value(v)),
    });
    module.add_function(b.build()).unwrap();

    module
}

#[test]
fn assignment_is_deterministic() {
    let module = build_module();
    let a = CanonicalId::assign(&module);
    let b = CanonicalId::assign(&module);

    assert_eq!(a.num_bbs(), b.num_bbs());
    assert_eq!(a.num_insts(), b.num_insts());
    for func in module.functions() {
        for block in func.blocks() {
            assert_eq!(a.bb_id(func.id, block.id), b.bb_id(func.id, block.id));
            for instr in exec::executable_instrs(block) {
                assert_eq!(a.inst_id(func.id, instr), b.inst_id(func.id, instr));
            }
        }
    }
}

#[test]
fn ids_are_dense_and_start_at_one() {
    let module = build_module();
    let cid = CanonicalId::assign(&module);

    // main: entry has 4 executable instructions (alloca, store, call, br),
    // exit has 1; helper has 2. The dbg marker gets no id.
    assert_eq!(cid.num_bbs(), 3);
    assert_eq!(cid.num_insts(), 7);
    assert!(!cid.has_bb(BBId::INVALID));
    assert!(!cid.has_inst(InstId::INVALID));
    for id in 1..=7 {
        assert!(cid.has_inst(InstId(id)));
    }
    for id in 1..=3 {
        assert!(cid.has_bb(BBId(id)));
    }

    let main = module.function_by_name("main").unwrap();
    assert_eq!(cid.bb_id(main.id, BlockId(0)), BBId(1));
    let (func, block) = cid.get_bb(BBId(1));
    assert_eq!((func, block), (main.id, BlockId(0)));
}

#[test]
fn sidecar_roundtrip_restores_the_same_mapping() {
    let module = build_module();
    let cid = CanonicalId::assign(&module);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("module.uid");
    cid.serialize(&module, &path).unwrap();

    let reloaded = CanonicalId::from_sidecar(&module, &path).expect("reload against same IR");
    assert_eq!(reloaded.num_bbs(), cid.num_bbs());
    assert_eq!(reloaded.num_insts(), cid.num_insts());
    for func in module.functions() {
        for block in func.blocks() {
            assert_eq!(reloaded.bb_id(func.id, block.id), cid.bb_id(func.id, block.id));
            for instr in exec::executable_instrs(block) {
                assert_eq!(
                    reloaded.inst_id(func.id, instr),
                    cid.inst_id(func.id, instr)
                );
            }
        }
    }
}

#[test]
fn sidecar_records_satisfy_the_progression_invariant() {
    let module = build_module();
    let cid = CanonicalId::assign(&module);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("module.uid");
    cid.serialize(&module, &path).unwrap();

    let records = trace::read_sidecar(&path).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].bb_id, 1);
    assert_eq!(records[0].first_inst_id, 1);

    // first_inst_id advances by the executable-instruction count of the
    // preceding block.
    let exec_counts: Vec<u64> = module
        .functions()
        .iter()
        .flat_map(|f| f.blocks().iter().map(|b| exec::executable_instrs(b).len() as u64))
        .collect();
    for (i, pair) in records.windows(2).enumerate() {
        assert_eq!(pair[1].bb_id, pair[0].bb_id + 1);
        assert_eq!(pair[1].first_inst_id, pair[0].first_inst_id + exec_counts[i]);
    }
}

#[test]
fn sidecar_against_unknown_function_is_fatal() {
    let module = build_module();
    let cid = CanonicalId::assign(&module);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("module.uid");
    cid.serialize(&module, &path).unwrap();

    // Same shape, but the second function has a different name.
    let mut other = IrModule::new("other");
    let main = module.function_by_name("main").unwrap().clone();
    other.add_function(main).unwrap();
    let mut b = IrFunctionBuilder::new("renamed", 0);
    let entry = b.create_block(Some("entry"));
    b.set_current_block(entry);
    let v = b.fresh_value();
    b.push(InstrKind::BinOp {
        result: v,
        op: BinOp::Add,
        lhs: Operand::Imm(0),
        rhs: Operand::Imm(0),
    });
    b.push(InstrKind::Ret { value: None });
    other.add_function(b.build()).unwrap();

    let err = CanonicalId::from_sidecar(&other, &path).unwrap_err();
    assert!(matches!(err, SidecarError::UnknownFunction { .. }));
}

#[test]
fn sidecar_with_diverged_instruction_counts_is_fatal() {
    let module = build_module();
    let cid = CanonicalId::assign(&module);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("module.uid");
    cid.serialize(&module, &path).unwrap();

    // Same function and block names, one extra executable instruction in
    // main's entry block.
    let mut other = IrModule::new("other");
    let mut b = IrFunctionBuilder::new("main", 0);
    let entry = b.create_block(Some("entry"));
    let exit = b.create_block(Some("exit"));
    b.set_current_block(entry);
    let slot = b.fresh_value();
    b.push(InstrKind::Alloca { result: slot });
    b.push(InstrKind::Store {
        addr: Operand::Value(slot),
        value: Operand::Imm(1),
    });
    b.push(InstrKind::Store {
        addr: Operand::Value(slot),
        value: Operand::Imm(2),
    });
    let r = b.fresh_value();
    b.push(InstrKind::Call {
        result: Some(r),
        callee: Callee::Direct("helper".into()),
        args: vec![],
    });
    b.push(InstrKind::Br { dest: exit });
    b.set_current_block(exit);
    b.push(InstrKind::Ret {
        value: Some(Operand::Value(r)),
    });
    other.add_function(b.build()).unwrap();

    let mut b = IrFunctionBuilder::new("helper", 0);
    let entry = b.create_block(Some("entry"));
    b.set_current_block(entry);
    let v = b.fresh_value();
    b.push(InstrKind::BinOp {
        result: v,
        op: BinOp::Add,
        lhs: Operand::Imm(20),
        rhs: Operand::Imm(22),
    });
    b.push(InstrKind::Ret {
        value: Some(Operand::Value(v)),
    });
    other.add_function(b.build()).unwrap();

    let err = CanonicalId::from_sidecar(&other, &path).unwrap_err();
    assert!(matches!(err, SidecarError::InstStartMismatch { .. }));
}

#[test]
fn sidecar_with_missing_blocks_is_fatal() {
    let module = build_module();
    let cid = CanonicalId::assign(&module);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("module.uid");
    cid.serialize(&module, &path).unwrap();

    // A module with one extra function has more blocks than the sidecar.
    let mut other = build_module();
    let mut b = IrFunctionBuilder::new("extra", 0);
    let entry = b.create_block(None);
    b.set_current_block(entry);
    b.push(InstrKind::Ret { value: None });
    other.add_function(b.build()).unwrap();

    let err = CanonicalId::from_sidecar(&other, &path).unwrap_err();
    assert!(matches!(err, SidecarError::RecordCountMismatch { .. }));
}
