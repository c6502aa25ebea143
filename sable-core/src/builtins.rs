//! Built-in functions available in every program without an import.
//!
//! Each entry is bound in the root scope like an ordinary overloaded
//! function and declared in the output module as a host function, so
//! calls to them generate plain `Call` instructions that the evaluator
//! dispatches natively.

use crate::ir::{Builder, HostFunc, IrType, Linkage};
use crate::symbol::{MangledName, ParamInfo, SymbolTable, Value};
use crate::types::TypeDescriptor;

/// The compilation unit label used in built-in symbol names.
const UNIT: &str = "builtin";

struct Builtin {
    name: &'static str,
    params: &'static [(&'static str, fn() -> TypeDescriptor)],
    ret: fn() -> TypeDescriptor,
    host: HostFunc,
}

fn bool_ty() -> TypeDescriptor {
    TypeDescriptor::Bool
}

fn str_ty() -> TypeDescriptor {
    TypeDescriptor::Str
}

fn void_ty() -> TypeDescriptor {
    TypeDescriptor::Void
}

const BUILTINS: &[Builtin] = &[
    Builtin {
        name: "exit",
        params: &[("code", TypeDescriptor::int)],
        ret: void_ty,
        host: HostFunc::Exit,
    },
    Builtin {
        name: "print",
        params: &[("value", TypeDescriptor::int)],
        ret: void_ty,
        host: HostFunc::PrintInt,
    },
    Builtin {
        name: "print",
        params: &[("value", TypeDescriptor::float)],
        ret: void_ty,
        host: HostFunc::PrintFloat,
    },
    Builtin {
        name: "print",
        params: &[("value", bool_ty)],
        ret: void_ty,
        host: HostFunc::PrintBool,
    },
    Builtin {
        name: "print",
        params: &[("value", str_ty)],
        ret: void_ty,
        host: HostFunc::PrintStr,
    },
];

/// Bind every builtin in the (root) current scope of `symbols` and
/// declare its host function in the module under construction.
pub fn register(symbols: &mut SymbolTable, builder: &mut Builder) {
    for builtin in BUILTINS {
        let param_types: Vec<TypeDescriptor> =
            builtin.params.iter().map(|(_, ty)| ty()).collect();
        let mangled = MangledName::new(UNIT, None, builtin.name, param_types.clone());

        builder.declare_function(
            mangled.symbol(),
            builtin
                .params
                .iter()
                .zip(&param_types)
                .map(|((name, _), ty)| (name.to_string(), lower(ty)))
                .collect(),
            lower(&(builtin.ret)()),
            Linkage::Private,
            false,
            Some(builtin.host),
        );

        let infos = builtin
            .params
            .iter()
            .zip(&param_types)
            .map(|((name, _), ty)| ParamInfo {
                name: name.to_string(),
                ty: ty.clone(),
                has_default: false,
            })
            .collect();
        let value = Value::function(
            mangled,
            TypeDescriptor::Function {
                params: param_types,
                ret: Box::new((builtin.ret)()),
                variadic: false,
            },
            infos,
        );
        symbols
            .insert_overload(value)
            .unwrap_or_else(|v| panic!("duplicate builtin `{}`", v.name));
    }
}

fn lower(ty: &TypeDescriptor) -> IrType {
    match ty {
        TypeDescriptor::Void => IrType::Unit,
        TypeDescriptor::Bool => IrType::Bool,
        TypeDescriptor::Int { width, signed } => IrType::Int {
            bits: width.bits(),
            signed: *signed,
        },
        TypeDescriptor::Float { width } => IrType::Float { bits: width.bits() },
        TypeDescriptor::Str => IrType::Str,
        other => unreachable!("builtin signature uses {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_overloads_cover_the_primitive_types() {
        let mut symbols = SymbolTable::new("main");
        let mut builder = Builder::new("main");
        register(&mut symbols, &mut builder);

        assert!(symbols.resolve_call("print", &[TypeDescriptor::int()]).is_ok());
        assert!(symbols
            .resolve_call("print", &[TypeDescriptor::float()])
            .is_ok());
        assert!(symbols.resolve_call("print", &[TypeDescriptor::Bool]).is_ok());
        assert!(symbols.resolve_call("print", &[TypeDescriptor::Str]).is_ok());
        assert!(symbols.resolve_call("exit", &[TypeDescriptor::int()]).is_ok());

        let module = builder.finish();
        let exit = module.find_function("builtin.exit$i64").expect("declared");
        assert_eq!(exit.host, Some(HostFunc::Exit));
    }
}
