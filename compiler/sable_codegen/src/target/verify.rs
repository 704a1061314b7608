//! Structural verification of a target module.
//!
//! Runs after generation and before any downstream emission. A failure is
//! fatal for the whole compilation unit; each diagnostic carries the
//! rendered text of the offending function so the malformed module can be
//! inspected without re-running generation.

use rustc_hash::FxHashSet;

use super::instr::{BlockId, CalleeRef, FuncId, Instr, ValueId, ValueKind};
use super::module::{TargetFunction, TargetModule};
use super::types::TyKind;

/// One structural defect found in a function.
#[derive(Debug, thiserror::Error)]
#[error("verification of `{function}` failed: {message}\n{dump}")]
pub struct VerifyError {
    pub function: String,
    pub message: String,
    /// Rendered text of the malformed function.
    pub dump: String,
}

/// Verify the whole module, collecting every defect.
pub fn verify_module(module: &TargetModule) -> Vec<VerifyError> {
    let mut errors = Vec::new();
    for (i, func) in module.functions.iter().enumerate() {
        if func.is_external {
            continue;
        }
        let id = FuncId::new(u32::try_from(i).unwrap_or(u32::MAX));
        verify_function(module, id, func, &mut errors);
    }
    errors
}

fn verify_function(
    module: &TargetModule,
    id: FuncId,
    func: &TargetFunction,
    errors: &mut Vec<VerifyError>,
) {
    let mut report = |message: String| {
        errors.push(VerifyError {
            function: func.name.clone(),
            message,
            dump: module.render_function(id),
        });
    };

    if func.blocks.is_empty() {
        report("defined function has no basic blocks".into());
        return;
    }

    // Unwind targets of invokes; these and only these may start with a
    // landingpad (modulo dead cleanup blocks, which are Unreachable-only).
    let mut unwind_targets: FxHashSet<BlockId> = FxHashSet::default();
    for value in &func.values {
        if let ValueKind::Instr {
            instr: Instr::Invoke { unwind, .. },
            ..
        } = &value.kind
        {
            unwind_targets.insert(*unwind);
        }
    }

    for (bi, block) in func.blocks.iter().enumerate() {
        let block_id = BlockId::new(u32::try_from(bi).unwrap_or(u32::MAX));
        if block.instrs.is_empty() {
            report(format!("block {}#{bi} is empty", block.name));
            continue;
        }
        for (pos, &vid) in block.instrs.iter().enumerate() {
            if vid.index() >= func.values.len() {
                report(format!("block {}#{bi} lists out-of-range value", block.name));
                continue;
            }
            let ValueKind::Instr { instr, block: home } = &func.value(vid).kind else {
                report(format!(
                    "block {}#{bi} lists a non-instruction value %{}",
                    block.name,
                    vid.raw()
                ));
                continue;
            };
            if *home != block_id {
                report(format!(
                    "instruction %{} recorded in block {} but listed in {}#{bi}",
                    vid.raw(),
                    home.raw(),
                    block.name
                ));
            }
            let last = pos + 1 == block.instrs.len();
            if instr.is_terminator() != last {
                report(format!(
                    "block {}#{bi}: terminator position violated at %{}",
                    block.name,
                    vid.raw()
                ));
            }
            if pos == 0 {
                // A landingpad must open its block and be an unwind target.
                if matches!(instr, Instr::Landingpad { .. }) && !unwind_targets.contains(&block_id)
                {
                    report(format!(
                        "block {}#{bi}: landingpad is not an invoke unwind target",
                        block.name
                    ));
                }
            } else if matches!(instr, Instr::Landingpad { .. }) {
                report(format!(
                    "block {}#{bi}: landingpad is not the first instruction",
                    block.name
                ));
            }
            for message in verify_instr(module, func, instr) {
                report(message);
            }
        }
    }
}

/// Check one instruction, returning the defects found.
fn verify_instr(module: &TargetModule, func: &TargetFunction, instr: &Instr) -> Vec<String> {
    let mut msgs = Vec::new();
    let valid_block = |b: BlockId| b.index() < func.blocks.len();
    let valid_value = |v: ValueId| v.index() < func.values.len();

    // Generic operand and target validity, collected first so the
    // instruction-specific checks below can push diagnostics freely.
    let mut values: Vec<(ValueId, &str)> = Vec::new();
    let mut blocks: Vec<(BlockId, &str)> = Vec::new();

    match instr {
        Instr::Bin { lhs, rhs, .. }
        | Instr::ICmp { lhs, rhs, .. }
        | Instr::FCmp { lhs, rhs, .. } => {
            values.push((*lhs, "binary lhs"));
            values.push((*rhs, "binary rhs"));
        }
        Instr::Cast { value, .. } => values.push((*value, "cast")),
        Instr::Select {
            cond,
            if_true,
            if_false,
        } => {
            values.push((*cond, "select cond"));
            values.push((*if_true, "select true"));
            values.push((*if_false, "select false"));
        }
        Instr::Alloca { .. } | Instr::Unreachable | Instr::Landingpad { .. } => {}
        Instr::Load { ptr, .. } => values.push((*ptr, "load ptr")),
        Instr::Store { value, ptr, .. } => {
            values.push((*value, "store value"));
            values.push((*ptr, "store ptr"));
        }
        Instr::Memset { ptr, .. } => values.push((*ptr, "memset ptr")),
        Instr::Gep { base, index, .. } => {
            values.push((*base, "gep base"));
            values.push((*index, "gep index"));
        }
        Instr::StructGep {
            base,
            struct_ty,
            index,
        } => {
            values.push((*base, "struct-gep base"));
            match module.types.kind(*struct_ty) {
                TyKind::Struct(fields) => {
                    if *index as usize >= fields.len() {
                        msgs.push("struct-gep field index out of range".into());
                    }
                }
                _ => msgs.push("struct-gep on a non-struct type".into()),
            }
        }
        Instr::ExtractValue { agg, .. } => values.push((*agg, "extract agg")),
        Instr::Phi { incoming, .. } => {
            for (b, v) in incoming {
                blocks.push((*b, "phi incoming"));
                values.push((*v, "phi incoming"));
            }
        }
        Instr::Call { callee, args, .. } | Instr::Invoke { callee, args, .. } => {
            for &a in args {
                values.push((a, "call argument"));
            }
            if let CalleeRef::Direct(f) = callee {
                if f.index() >= module.functions.len() {
                    msgs.push("call to out-of-range function".into());
                } else {
                    let callee_fn = module.function(*f);
                    if callee_fn.sig.params.len() != args.len() {
                        msgs.push(format!(
                            "call to `{}` passes {} arguments, expected {}",
                            callee_fn.name,
                            args.len(),
                            callee_fn.sig.params.len()
                        ));
                    }
                }
            }
            if let Instr::Invoke { normal, unwind, .. } = instr {
                blocks.push((*normal, "invoke normal"));
                blocks.push((*unwind, "invoke unwind"));
                if valid_block(*unwind) {
                    let target = &func.blocks[unwind.index()];
                    let opens_with_landingpad = target.instrs.first().is_some_and(|&v| {
                        valid_value(v)
                            && matches!(
                                func.value(v).kind,
                                ValueKind::Instr {
                                    instr: Instr::Landingpad { .. },
                                    ..
                                }
                            )
                    });
                    if !opens_with_landingpad {
                        msgs.push(format!(
                            "invoke unwind target {}#{} does not start with a landingpad",
                            target.name,
                            unwind.raw()
                        ));
                    }
                }
            }
        }
        Instr::Resume { value } => values.push((*value, "resume")),
        Instr::Br(b) => blocks.push((*b, "br")),
        Instr::CondBr {
            cond,
            if_true,
            if_false,
        } => {
            values.push((*cond, "condbr cond"));
            blocks.push((*if_true, "condbr true"));
            blocks.push((*if_false, "condbr false"));
        }
        Instr::Switch {
            value,
            default,
            cases,
        } => {
            values.push((*value, "switch value"));
            blocks.push((*default, "switch default"));
            for (_, b) in cases {
                blocks.push((*b, "switch case"));
            }
        }
        Instr::Ret(Some(v)) => {
            values.push((*v, "ret"));
            if func.sig.ret.is_none() {
                msgs.push("ret with a value in a void function".into());
            }
        }
        Instr::Ret(None) => {
            if func.sig.ret.is_some() {
                msgs.push("ret void in a value-returning function".into());
            }
        }
        Instr::CmpXchg {
            ptr, expected, new, ..
        } => {
            values.push((*ptr, "cmpxchg ptr"));
            values.push((*expected, "cmpxchg expected"));
            values.push((*new, "cmpxchg new"));
        }
        Instr::AtomicRmw { ptr, value, .. } => {
            values.push((*ptr, "atomicrmw ptr"));
            values.push((*value, "atomicrmw value"));
        }
    }

    for (v, what) in values {
        if !valid_value(v) {
            msgs.push(format!("{what} operand out of range"));
        }
    }
    for (b, what) in blocks {
        if !valid_block(b) {
            msgs.push(format!("{what} target out of range"));
        }
    }
    msgs
}
