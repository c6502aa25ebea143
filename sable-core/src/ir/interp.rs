//! An evaluator for generated modules.
//!
//! Executes a linked module starting from an exported entry function.
//! This is the collaborator behind the CLI's `--run` flag and the test
//! suites' end-to-end assertions; it is not a performance-oriented VM.
//!
//! Storage follows the memory-form IR directly: `StackAlloc` produces a
//! shared mutable slot, `Load`/`Store` go through it, and struct values
//! are shared so class instances behave as references.

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

use super::module::{BinOp, Function, HostFunc, Inst, IrType, Module, UnOp};

const MAX_CALL_DEPTH: usize = 10_000;

#[derive(Debug, Error, PartialEq)]
pub enum RuntimeError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("negative exponent in integer power")]
    NegativeExponent,
    #[error("integer power exponent too large")]
    ExponentOverflow,
    #[error("call stack exhausted")]
    StackOverflow,
    #[error("call to unresolved external function `{0}`")]
    UnresolvedExternal(String),
    #[error("entry function `{0}` not found")]
    MissingEntry(String),
}

/// Result of running a module to completion.
#[derive(Debug, PartialEq)]
pub struct Outcome {
    pub exit_code: i64,
    pub stdout: String,
}

/// A mutable storage slot produced by `StackAlloc` or `FieldPtr`.
type Slot = Rc<RefCell<RtValue>>;

#[derive(Debug, Clone)]
enum RtValue {
    Unit,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Rc<str>),
    Ptr(Slot),
    Struct(Rc<Vec<Slot>>),
}

impl RtValue {
    fn default_for(ty: &IrType) -> RtValue {
        match ty {
            IrType::Unit => RtValue::Unit,
            IrType::Bool => RtValue::Bool(false),
            IrType::Int { .. } => RtValue::Int(0),
            IrType::Float { .. } => RtValue::Float(0.0),
            IrType::Str => RtValue::Str(Rc::from("")),
            IrType::Ptr(inner) => {
                RtValue::Ptr(Rc::new(RefCell::new(RtValue::default_for(inner))))
            }
            IrType::Struct { fields, .. } => RtValue::Struct(Rc::new(
                fields
                    .iter()
                    .map(|f| Rc::new(RefCell::new(RtValue::default_for(f))))
                    .collect(),
            )),
        }
    }

    fn as_int(&self) -> i64 {
        match self {
            RtValue::Int(v) => *v,
            RtValue::Bool(b) => *b as i64,
            other => panic!("expected integer value, got {other:?}"),
        }
    }

    fn as_float(&self) -> f64 {
        match self {
            RtValue::Float(v) => *v,
            other => panic!("expected float value, got {other:?}"),
        }
    }

    fn as_bool(&self) -> bool {
        match self {
            RtValue::Bool(v) => *v,
            other => panic!("expected bool value, got {other:?}"),
        }
    }

    fn as_slot(&self) -> Slot {
        match self {
            RtValue::Ptr(slot) => Rc::clone(slot),
            other => panic!("expected pointer value, got {other:?}"),
        }
    }
}

/// What a function invocation produced.
enum Flow {
    Return(RtValue),
    Exit(i64),
}

/// Run `entry` (which must take no parameters) and collect its outcome.
///
/// The exit code is the entry function's integer return value, or the
/// argument of the first `exit` host call, whichever happens first.
pub fn run(module: &Module, entry: &str) -> Result<Outcome, RuntimeError> {
    let function = module
        .find_function(entry)
        .ok_or_else(|| RuntimeError::MissingEntry(entry.to_string()))?;
    let mut interp = Interp {
        module,
        stdout: String::new(),
        depth: 0,
    };
    let flow = interp.call(function, Vec::new())?;
    let exit_code = match flow {
        Flow::Exit(code) => code,
        Flow::Return(RtValue::Int(v)) => v,
        Flow::Return(_) => 0,
    };
    Ok(Outcome {
        exit_code,
        stdout: interp.stdout,
    })
}

struct Interp<'m> {
    module: &'m Module,
    stdout: String,
    depth: usize,
}

impl<'m> Interp<'m> {
    fn call(&mut self, function: &Function, args: Vec<RtValue>) -> Result<Flow, RuntimeError> {
        if let Some(host) = function.host {
            return self.host_call(host, &args);
        }
        if function.is_declaration() {
            return Err(RuntimeError::UnresolvedExternal(function.name.clone()));
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(RuntimeError::StackOverflow);
        }
        self.depth += 1;
        let result = self.run_body(function, args);
        self.depth -= 1;
        result
    }

    fn run_body(
        &mut self,
        function: &Function,
        args: Vec<RtValue>,
    ) -> Result<Flow, RuntimeError> {
        // Frame: one value per instruction id, preloaded with arguments.
        let mut frame: Vec<RtValue> = vec![RtValue::Unit; function.insts.len()];
        for (i, arg) in args.into_iter().enumerate() {
            frame[i] = arg;
        }

        let mut block = &function.blocks[0];
        'blocks: loop {
            for &id in &block.insts {
                match function.inst(id) {
                    Inst::Param(_) => {}
                    Inst::ConstInt(v, _) => frame[id.0 as usize] = RtValue::Int(*v),
                    Inst::ConstFloat(v, _) => frame[id.0 as usize] = RtValue::Float(*v),
                    Inst::ConstBool(v) => frame[id.0 as usize] = RtValue::Bool(*v),
                    Inst::ConstStr(v) => {
                        frame[id.0 as usize] = RtValue::Str(Rc::from(v.as_str()))
                    }
                    Inst::ConstUnit => frame[id.0 as usize] = RtValue::Unit,
                    Inst::StackAlloc(ty) => {
                        frame[id.0 as usize] =
                            RtValue::Ptr(Rc::new(RefCell::new(RtValue::default_for(ty))))
                    }
                    Inst::Load(ptr) => {
                        let slot = frame[ptr.0 as usize].as_slot();
                        let value = slot.borrow().clone();
                        frame[id.0 as usize] = value;
                    }
                    Inst::Store { ptr, value } => {
                        let slot = frame[ptr.0 as usize].as_slot();
                        *slot.borrow_mut() = frame[value.0 as usize].clone();
                    }
                    Inst::Binary { op, lhs, rhs } => {
                        frame[id.0 as usize] = binary(
                            *op,
                            &frame[lhs.0 as usize],
                            &frame[rhs.0 as usize],
                        )?;
                    }
                    Inst::Unary { op, value } => {
                        frame[id.0 as usize] = match (op, &frame[value.0 as usize]) {
                            (UnOp::Neg, RtValue::Int(v)) => RtValue::Int(v.wrapping_neg()),
                            (UnOp::Neg, RtValue::Float(v)) => RtValue::Float(-v),
                            (UnOp::Not, RtValue::Bool(v)) => RtValue::Bool(!v),
                            (op, v) => panic!("bad unary operand: {op:?} on {v:?}"),
                        };
                    }
                    Inst::Cast { value, to } => {
                        frame[id.0 as usize] = cast(&frame[value.0 as usize], to);
                    }
                    Inst::FieldPtr { base, index } => {
                        let fields = match &frame[base.0 as usize] {
                            RtValue::Struct(fields) => Rc::clone(fields),
                            RtValue::Ptr(slot) => match &*slot.borrow() {
                                RtValue::Struct(fields) => Rc::clone(fields),
                                other => panic!("field access on non-struct: {other:?}"),
                            },
                            other => panic!("field access on non-struct: {other:?}"),
                        };
                        frame[id.0 as usize] = RtValue::Ptr(Rc::clone(&fields[*index]));
                    }
                    Inst::Call { callee, args } => {
                        let target = self
                            .module
                            .find_function(callee)
                            .ok_or_else(|| RuntimeError::UnresolvedExternal(callee.clone()))?;
                        let arg_values: Vec<RtValue> = args
                            .iter()
                            .map(|a| frame[a.0 as usize].clone())
                            .collect();
                        match self.call(target, arg_values)? {
                            Flow::Return(v) => frame[id.0 as usize] = v,
                            Flow::Exit(code) => return Ok(Flow::Exit(code)),
                        }
                    }
                    Inst::Br(dest) => {
                        block = function.block(*dest);
                        continue 'blocks;
                    }
                    Inst::CondBr {
                        cond,
                        then_block,
                        else_block,
                    } => {
                        let dest = if frame[cond.0 as usize].as_bool() {
                            then_block
                        } else {
                            else_block
                        };
                        block = function.block(*dest);
                        continue 'blocks;
                    }
                    Inst::Ret(None) => return Ok(Flow::Return(RtValue::Unit)),
                    Inst::Ret(Some(v)) => {
                        return Ok(Flow::Return(frame[v.0 as usize].clone()))
                    }
                }
            }
            // Every block the generator builds ends in a terminator.
            unreachable!("block without terminator in `{}`", function.name);
        }
    }

    fn host_call(&mut self, host: HostFunc, args: &[RtValue]) -> Result<Flow, RuntimeError> {
        match host {
            HostFunc::Exit => Ok(Flow::Exit(args[0].as_int())),
            HostFunc::PrintInt => {
                self.stdout.push_str(&format!("{}\n", args[0].as_int()));
                Ok(Flow::Return(RtValue::Unit))
            }
            HostFunc::PrintFloat => {
                self.stdout.push_str(&format!("{}\n", args[0].as_float()));
                Ok(Flow::Return(RtValue::Unit))
            }
            HostFunc::PrintBool => {
                self.stdout.push_str(&format!("{}\n", args[0].as_bool()));
                Ok(Flow::Return(RtValue::Unit))
            }
            HostFunc::PrintStr => {
                match &args[0] {
                    RtValue::Str(s) => self.stdout.push_str(&format!("{s}\n")),
                    other => panic!("expected string argument, got {other:?}"),
                }
                Ok(Flow::Return(RtValue::Unit))
            }
        }
    }
}

fn binary(op: BinOp, lhs: &RtValue, rhs: &RtValue) -> Result<RtValue, RuntimeError> {
    use RtValue::*;
    Ok(match (op, lhs, rhs) {
        (BinOp::Add, Int(a), Int(b)) => Int(a.wrapping_add(*b)),
        (BinOp::Sub, Int(a), Int(b)) => Int(a.wrapping_sub(*b)),
        (BinOp::Mul, Int(a), Int(b)) => Int(a.wrapping_mul(*b)),
        (BinOp::Div, Int(a), Int(b)) => {
            if *b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            Int(a.wrapping_div(*b))
        }
        (BinOp::Rem, Int(a), Int(b)) => {
            if *b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            Int(a.wrapping_rem(*b))
        }
        (BinOp::Pow, Int(a), Int(b)) => {
            if *b < 0 {
                return Err(RuntimeError::NegativeExponent);
            }
            let exp = u32::try_from(*b).map_err(|_| RuntimeError::ExponentOverflow)?;
            Int(a.wrapping_pow(exp))
        }
        (BinOp::Add, Float(a), Float(b)) => Float(a + b),
        (BinOp::Sub, Float(a), Float(b)) => Float(a - b),
        (BinOp::Mul, Float(a), Float(b)) => Float(a * b),
        (BinOp::Div, Float(a), Float(b)) => Float(a / b),
        (BinOp::Rem, Float(a), Float(b)) => Float(a % b),
        (BinOp::Pow, Float(a), Float(b)) => Float(a.powf(*b)),
        (BinOp::And, Bool(a), Bool(b)) => Bool(*a && *b),
        (BinOp::Or, Bool(a), Bool(b)) => Bool(*a || *b),
        (BinOp::Eq, Int(a), Int(b)) => Bool(a == b),
        (BinOp::Ne, Int(a), Int(b)) => Bool(a != b),
        (BinOp::Lt, Int(a), Int(b)) => Bool(a < b),
        (BinOp::Le, Int(a), Int(b)) => Bool(a <= b),
        (BinOp::Gt, Int(a), Int(b)) => Bool(a > b),
        (BinOp::Ge, Int(a), Int(b)) => Bool(a >= b),
        (BinOp::Eq, Float(a), Float(b)) => Bool(a == b),
        (BinOp::Ne, Float(a), Float(b)) => Bool(a != b),
        (BinOp::Lt, Float(a), Float(b)) => Bool(a < b),
        (BinOp::Le, Float(a), Float(b)) => Bool(a <= b),
        (BinOp::Gt, Float(a), Float(b)) => Bool(a > b),
        (BinOp::Ge, Float(a), Float(b)) => Bool(a >= b),
        (BinOp::Eq, Bool(a), Bool(b)) => Bool(a == b),
        (BinOp::Ne, Bool(a), Bool(b)) => Bool(a != b),
        (BinOp::Eq, Str(a), Str(b)) => Bool(a == b),
        (BinOp::Ne, Str(a), Str(b)) => Bool(a != b),
        // Reference and class-instance equality is identity, not shape.
        (BinOp::Eq, Struct(a), Struct(b)) => Bool(Rc::ptr_eq(a, b)),
        (BinOp::Ne, Struct(a), Struct(b)) => Bool(!Rc::ptr_eq(a, b)),
        (BinOp::Eq, Ptr(a), Ptr(b)) => Bool(Rc::ptr_eq(a, b)),
        (BinOp::Ne, Ptr(a), Ptr(b)) => Bool(!Rc::ptr_eq(a, b)),
        (op, a, b) => panic!("bad binary operands: {op:?} on {a:?}, {b:?}"),
    })
}

fn cast(value: &RtValue, to: &IrType) -> RtValue {
    match to {
        IrType::Int { bits, signed } => {
            let raw = match value {
                RtValue::Int(v) => *v,
                RtValue::Float(v) => *v as i64,
                RtValue::Bool(b) => *b as i64,
                other => panic!("bad cast operand: {other:?}"),
            };
            RtValue::Int(truncate(raw, *bits, *signed))
        }
        IrType::Float { bits } => {
            let raw = match value {
                RtValue::Int(v) => *v as f64,
                RtValue::Float(v) => *v,
                RtValue::Bool(b) => *b as i64 as f64,
                other => panic!("bad cast operand: {other:?}"),
            };
            if *bits == 32 {
                RtValue::Float(raw as f32 as f64)
            } else {
                RtValue::Float(raw)
            }
        }
        IrType::Bool => match value {
            RtValue::Bool(b) => RtValue::Bool(*b),
            RtValue::Int(v) => RtValue::Bool(*v != 0),
            other => panic!("bad cast operand: {other:?}"),
        },
        other => panic!("unsupported cast target: {other:?}"),
    }
}

/// Reduce an i64 to the value range of an `bits`-wide integer.
fn truncate(value: i64, bits: u32, signed: bool) -> i64 {
    match (bits, signed) {
        (8, true) => value as i8 as i64,
        (8, false) => value as u8 as i64,
        (16, true) => value as i16 as i64,
        (16, false) => value as u16 as i64,
        (32, true) => value as i32 as i64,
        (32, false) => value as u32 as i64,
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::module::Linkage;

    fn int() -> IrType {
        IrType::Int {
            bits: 64,
            signed: true,
        }
    }

    #[test]
    fn runs_a_store_load_return_sequence() {
        let mut b = Builder::new("test");
        let f = b.declare_function("main", Vec::new(), int(), Linkage::Export, false, None);
        let entry = b.create_block(f, "entry");
        b.position_at_end(f, entry);
        let slot = b.stack_alloc(int());
        let hundred = b.const_int(100, int());
        b.store(slot, hundred);
        let updated = b.const_int(101, int());
        b.store(slot, updated);
        let value = b.load(slot);
        b.ret(Some(value));

        let outcome = run(&b.finish(), "main").expect("run");
        assert_eq!(outcome.exit_code, 101);
    }

    #[test]
    fn conditional_branch_selects_block() {
        let mut b = Builder::new("test");
        let f = b.declare_function("main", Vec::new(), int(), Linkage::Export, false, None);
        let entry = b.create_block(f, "entry");
        let then_block = b.create_block(f, "then");
        let else_block = b.create_block(f, "else");
        b.position_at_end(f, entry);
        let cond = b.const_bool(false);
        b.cond_br(cond, then_block, else_block);
        b.position_at_end(f, then_block);
        let one = b.const_int(1, int());
        b.ret(Some(one));
        b.position_at_end(f, else_block);
        let two = b.const_int(2, int());
        b.ret(Some(two));

        let outcome = run(&b.finish(), "main").expect("run");
        assert_eq!(outcome.exit_code, 2);
    }

    #[test]
    fn exit_host_call_stops_the_program() {
        let mut b = Builder::new("test");
        b.declare_function(
            "exit",
            vec![("code".into(), int())],
            IrType::Unit,
            Linkage::Export,
            false,
            Some(HostFunc::Exit),
        );
        let f = b.declare_function("main", Vec::new(), int(), Linkage::Export, false, None);
        let entry = b.create_block(f, "entry");
        b.position_at_end(f, entry);
        let code = b.const_int(7, int());
        b.call("exit", vec![code]);
        let zero = b.const_int(0, int());
        b.ret(Some(zero));

        let outcome = run(&b.finish(), "main").expect("run");
        assert_eq!(outcome.exit_code, 7);
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let mut b = Builder::new("test");
        let f = b.declare_function("main", Vec::new(), int(), Linkage::Export, false, None);
        let entry = b.create_block(f, "entry");
        b.position_at_end(f, entry);
        let a = b.const_int(4, int());
        let z = b.const_int(0, int());
        let q = b.binary(BinOp::Div, a, z);
        b.ret(Some(q));

        let err = run(&b.finish(), "main").expect_err("divide by zero");
        assert_eq!(err, RuntimeError::DivisionByZero);
    }

    #[test]
    fn oversized_integer_exponent_is_a_runtime_error() {
        let mut b = Builder::new("test");
        let f = b.declare_function("main", Vec::new(), int(), Linkage::Export, false, None);
        let entry = b.create_block(f, "entry");
        b.position_at_end(f, entry);
        let base = b.const_int(2, int());
        let exp = b.const_int(i64::from(u32::MAX) + 1, int());
        let p = b.binary(BinOp::Pow, base, exp);
        b.ret(Some(p));

        let err = run(&b.finish(), "main").expect_err("exponent overflow");
        assert_eq!(err, RuntimeError::ExponentOverflow);
    }

    #[test]
    fn unresolved_external_call_is_reported() {
        let mut b = Builder::new("test");
        b.declare_function("puts", Vec::new(), IrType::Unit, Linkage::Export, true, None);
        let f = b.declare_function("main", Vec::new(), int(), Linkage::Export, false, None);
        let entry = b.create_block(f, "entry");
        b.position_at_end(f, entry);
        b.call("puts", Vec::new());
        let zero = b.const_int(0, int());
        b.ret(Some(zero));

        let err = run(&b.finish(), "main").expect_err("unresolved");
        assert_eq!(err, RuntimeError::UnresolvedExternal("puts".into()));
    }

    #[test]
    fn struct_fields_share_storage_through_pointers() {
        let mut b = Builder::new("test");
        let point = IrType::Struct {
            name: "Point".into(),
            fields: vec![int(), int()],
        };
        let f = b.declare_function("main", Vec::new(), int(), Linkage::Export, false, None);
        let entry = b.create_block(f, "entry");
        b.position_at_end(f, entry);
        let obj = b.stack_alloc(point);
        let x = b.field_ptr(obj, 0);
        let five = b.const_int(5, int());
        b.store(x, five);
        let x_again = b.field_ptr(obj, 0);
        let value = b.load(x_again);
        b.ret(Some(value));

        let outcome = run(&b.finish(), "main").expect("run");
        assert_eq!(outcome.exit_code, 5);
    }

    #[test]
    fn print_collects_stdout() {
        let mut b = Builder::new("test");
        b.declare_function(
            "print",
            vec![("v".into(), int())],
            IrType::Unit,
            Linkage::Export,
            false,
            Some(HostFunc::PrintInt),
        );
        let f = b.declare_function("main", Vec::new(), int(), Linkage::Export, false, None);
        let entry = b.create_block(f, "entry");
        b.position_at_end(f, entry);
        let v = b.const_int(42, int());
        b.call("print", vec![v]);
        let zero = b.const_int(0, int());
        b.ret(Some(zero));

        let outcome = run(&b.finish(), "main").expect("run");
        assert_eq!(outcome.stdout, "42\n");
        assert_eq!(outcome.exit_code, 0);
    }
}
