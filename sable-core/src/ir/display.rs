//! Textual form of generated modules, emitted by `--emit ir`.

use std::fmt;

use super::module::{BinOp, Function, Inst, IrType, Linkage, Module, UnOp};

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Unit => write!(f, "unit"),
            IrType::Bool => write!(f, "bool"),
            IrType::Int { bits, signed } => {
                write!(f, "{}{bits}", if *signed { "i" } else { "u" })
            }
            IrType::Float { bits } => write!(f, "f{bits}"),
            IrType::Str => write!(f, "str"),
            IrType::Ptr(inner) => write!(f, "ptr<{inner}>"),
            IrType::Struct { name, .. } => write!(f, "%{name}"),
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Rem => "rem",
            BinOp::Pow => "pow",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Eq => "eq",
            BinOp::Ne => "ne",
            BinOp::Lt => "lt",
            BinOp::Le => "le",
            BinOp::Gt => "gt",
            BinOp::Ge => "ge",
        };
        write!(f, "{name}")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {}", self.name)?;
        for function in &self.functions {
            writeln!(f)?;
            self.fmt_function(function, f)?;
        }
        Ok(())
    }
}

impl Module {
    fn fmt_function(&self, function: &Function, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let linkage = match function.linkage {
            Linkage::Export => " export",
            Linkage::Private => "",
        };
        let kind = if function.host.is_some() {
            "host "
        } else if function.is_declaration() {
            "extern "
        } else {
            ""
        };
        write!(f, "{kind}func @{}(", function.name)?;
        for (i, (name, ty)) in function.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {ty}")?;
        }
        if function.variadic {
            if !function.params.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "...")?;
        }
        writeln!(f, ") -> {}{linkage}", function.ret)?;

        for block in &function.blocks {
            writeln!(f, "{}:", block.label)?;
            for &id in &block.insts {
                let inst = function.inst(id);
                if matches!(inst, Inst::Param(_)) {
                    continue;
                }
                write!(f, "    ")?;
                match inst {
                    Inst::Param(_) => {}
                    Inst::ConstInt(v, ty) => writeln!(f, "%{} = const.{ty} {v}", id.0)?,
                    Inst::ConstFloat(v, ty) => writeln!(f, "%{} = const.{ty} {v}", id.0)?,
                    Inst::ConstBool(v) => writeln!(f, "%{} = const.bool {v}", id.0)?,
                    Inst::ConstStr(v) => writeln!(f, "%{} = const.str {v:?}", id.0)?,
                    Inst::ConstUnit => writeln!(f, "%{} = const.unit", id.0)?,
                    Inst::StackAlloc(ty) => writeln!(f, "%{} = alloc {ty}", id.0)?,
                    Inst::Load(ptr) => writeln!(f, "%{} = load %{}", id.0, ptr.0)?,
                    Inst::Store { ptr, value } => {
                        writeln!(f, "store %{} -> %{}", value.0, ptr.0)?
                    }
                    Inst::Binary { op, lhs, rhs } => {
                        writeln!(f, "%{} = {op} %{}, %{}", id.0, lhs.0, rhs.0)?
                    }
                    Inst::Unary { op, value } => {
                        let name = match op {
                            UnOp::Neg => "neg",
                            UnOp::Not => "not",
                        };
                        writeln!(f, "%{} = {name} %{}", id.0, value.0)?
                    }
                    Inst::Cast { value, to } => {
                        writeln!(f, "%{} = cast %{} to {to}", id.0, value.0)?
                    }
                    Inst::FieldPtr { base, index } => {
                        writeln!(f, "%{} = field %{}, {index}", id.0, base.0)?
                    }
                    Inst::Call { callee, args } => {
                        write!(f, "%{} = call @{callee}(", id.0)?;
                        for (i, arg) in args.iter().enumerate() {
                            if i > 0 {
                                write!(f, ", ")?;
                            }
                            write!(f, "%{}", arg.0)?;
                        }
                        writeln!(f, ")")?
                    }
                    Inst::Br(dest) => {
                        writeln!(f, "br {}", function.block(*dest).label)?
                    }
                    Inst::CondBr {
                        cond,
                        then_block,
                        else_block,
                    } => writeln!(
                        f,
                        "condbr %{}, {}, {}",
                        cond.0,
                        function.block(*then_block).label,
                        function.block(*else_block).label
                    )?,
                    Inst::Ret(None) => writeln!(f, "ret")?,
                    Inst::Ret(Some(v)) => writeln!(f, "ret %{}", v.0)?,
                }
            }
        }
        Ok(())
    }
}
