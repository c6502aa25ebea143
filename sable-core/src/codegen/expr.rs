//! Expression generation.
//!
//! Every visitor returns the emitted value together with its source-level
//! type. Dot access is resolved statically when the base names a module
//! alias, class, or enum, and dynamically (field or method on the runtime
//! instance) otherwise. Numeric binary operators widen both sides to the
//! promoted common type before the operation is emitted; reference,
//! class-instance, enum, and string equality bypass promotion.

use std::rc::Rc;

use crate::ast::{BinaryOp, Expr, ExprKind, UnaryOp};
use crate::error::CoreError;
use crate::ir::{BinOp, UnOp, ValueId};
use crate::span::Span;
use crate::symbol::{self, CodeHandle, InitState, LookupError, Value};
use crate::types::{self, ClassType, TypeDescriptor};

use super::Generator;

/// A resolved assignment target.
pub(crate) struct Place {
    pub ptr: ValueId,
    pub ty: TypeDescriptor,
    pub mutable: bool,
    /// Variable name whose init state flips on assignment, if any.
    pub binding: Option<String>,
}

/// A dot base that names a namespace rather than a value.
enum StaticBase {
    Module(String),
    Class(Rc<ClassType>),
    Enum(Rc<crate::types::EnumType>),
}

impl<'s> Generator<'s> {
    pub(crate) fn gen_expr(&mut self, expr: &Expr) -> Result<(ValueId, TypeDescriptor), CoreError> {
        match &expr.kind {
            ExprKind::Integer(v) => {
                let ty = TypeDescriptor::int();
                let lowered = self.lower(&ty);
                Ok((self.builder.const_int(*v, lowered), ty))
            }
            ExprKind::Float(v) => {
                let ty = TypeDescriptor::float();
                let lowered = self.lower(&ty);
                Ok((self.builder.const_float(*v, lowered), ty))
            }
            ExprKind::Bool(v) => Ok((self.builder.const_bool(*v), TypeDescriptor::Bool)),
            ExprKind::Str(v) => Ok((self.builder.const_str(v.clone()), TypeDescriptor::Str)),
            ExprKind::Identifier(name) => self.gen_identifier(name, expr.span),
            ExprKind::Binary { op, lhs, rhs } => {
                let (lv, lt) = self.gen_expr(lhs)?;
                let (rv, rt) = self.gen_expr(rhs)?;
                self.emit_binary(*op, lv, lt, rv, rt, expr.span)
            }
            ExprKind::Unary { op, operand } => self.gen_unary(*op, operand, expr.span),
            ExprKind::Dot { base, member } => self.gen_dot(base, &member.name, member.span),
            ExprKind::Cast { value, ty } => {
                let (v, from) = self.gen_expr(value)?;
                let to = self.resolve_type(ty)?;
                self.emit_cast(v, &from, &to, expr.span)
            }
            ExprKind::TypeTest { value, ty } => {
                let (_, actual) = self.gen_expr(value)?;
                let tested = self.resolve_type(ty)?;
                // Types are fully known here, so the test is a constant.
                Ok((
                    self.builder.const_bool(actual == tested),
                    TypeDescriptor::Bool,
                ))
            }
            ExprKind::Call { callee, args } => self.gen_call(callee, args, expr.span),
            ExprKind::ElseMarker => unreachable!("else marker outside an if clause"),
        }
    }

    fn gen_identifier(
        &mut self,
        name: &str,
        span: Span,
    ) -> Result<(ValueId, TypeDescriptor), CoreError> {
        let (scope, value) = self
            .symbols
            .lookup_with_scope(name)
            .ok_or_else(|| CoreError::generate(format!("unknown identifier `{name}`"), span))?;
        match &value.handle {
            CodeHandle::Slot(slot) => {
                let slot = *slot;
                let ty = value.ty.clone();
                let state = value.state;
                if !self.symbols.is_within(scope, self.current_fn_scope()) {
                    return Err(CoreError::generate(
                        format!("cannot capture `{name}` from an enclosing function"),
                        span,
                    ));
                }
                if state == InitState::Declared {
                    return Err(CoreError::generate(
                        format!("variable `{name}` is used before it is initialized"),
                        span,
                    ));
                }
                Ok((self.builder.load(slot), ty))
            }
            CodeHandle::Func(_) => Err(CoreError::generate(
                format!("function `{name}` must be called"),
                span,
            )),
            CodeHandle::None => Err(CoreError::generate(
                format!("`{name}` cannot be used as a value"),
                span,
            )),
        }
    }

    fn gen_unary(
        &mut self,
        op: UnaryOp,
        operand: &Expr,
        span: Span,
    ) -> Result<(ValueId, TypeDescriptor), CoreError> {
        match op {
            UnaryOp::Neg => {
                let (v, ty) = self.gen_expr(operand)?;
                if !ty.is_integer() && !ty.is_float() {
                    return Err(CoreError::generate(
                        format!("cannot negate a value of type `{ty}`"),
                        span,
                    ));
                }
                Ok((self.builder.unary(UnOp::Neg, v), ty))
            }
            UnaryOp::Not => {
                let (v, ty) = self.gen_expr(operand)?;
                if ty != TypeDescriptor::Bool {
                    return Err(CoreError::generate(
                        format!("`not` needs a boolean, found `{ty}`"),
                        span,
                    ));
                }
                Ok((self.builder.unary(UnOp::Not, v), TypeDescriptor::Bool))
            }
            UnaryOp::Deref => {
                let (v, ty) = self.gen_expr(operand)?;
                match ty {
                    TypeDescriptor::Reference(inner) => Ok((self.builder.load(v), *inner)),
                    other => Err(CoreError::generate(
                        format!("cannot dereference a value of type `{other}`"),
                        span,
                    )),
                }
            }
            UnaryOp::AddrOf => {
                let place = self.gen_lvalue(operand)?;
                Ok((place.ptr, TypeDescriptor::reference(place.ty)))
            }
        }
    }

    pub(crate) fn emit_binary(
        &mut self,
        op: BinaryOp,
        lv: ValueId,
        lt: TypeDescriptor,
        rv: ValueId,
        rt: TypeDescriptor,
        span: Span,
    ) -> Result<(ValueId, TypeDescriptor), CoreError> {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                if lt != TypeDescriptor::Bool || rt != TypeDescriptor::Bool {
                    return Err(CoreError::generate(
                        format!("`{}` needs boolean operands, found `{lt}` and `{rt}`", op.symbol()),
                        span,
                    ));
                }
                let ir_op = if op == BinaryOp::And {
                    BinOp::And
                } else {
                    BinOp::Or
                };
                Ok((self.builder.binary(ir_op, lv, rv), TypeDescriptor::Bool))
            }
            BinaryOp::Eq | BinaryOp::Ne if lt == rt && identity_compared(&lt) => {
                // Same-type references, class instances, enum
                // discriminants, strings, and bools compare directly.
                let ir_op = if op == BinaryOp::Eq { BinOp::Eq } else { BinOp::Ne };
                Ok((self.builder.binary(ir_op, lv, rv), TypeDescriptor::Bool))
            }
            _ => {
                let common = types::promote(&lt, &rt).ok_or_else(|| {
                    CoreError::generate(
                        format!("invalid operands for `{}`: `{lt}` and `{rt}`", op.symbol()),
                        span,
                    )
                })?;
                let lowered = self.lower(&common);
                let lv = if lt == common {
                    lv
                } else {
                    self.builder.cast(lv, lowered.clone())
                };
                let rv = if rt == common {
                    rv
                } else {
                    self.builder.cast(rv, lowered)
                };
                let ir_op = arith_op(op);
                let result = self.builder.binary(ir_op, lv, rv);
                let ty = if op.is_comparison() {
                    TypeDescriptor::Bool
                } else {
                    common
                };
                Ok((result, ty))
            }
        }
    }

    fn emit_cast(
        &mut self,
        v: ValueId,
        from: &TypeDescriptor,
        to: &TypeDescriptor,
        span: Span,
    ) -> Result<(ValueId, TypeDescriptor), CoreError> {
        if from == to {
            return Ok((v, to.clone()));
        }
        let castable = (from.is_numeric() && to.is_numeric())
            || (matches!(from, TypeDescriptor::Enum(_)) && to.is_integer());
        if !castable {
            return Err(CoreError::generate(
                format!("unsupported cast from `{from}` to `{to}`"),
                span,
            ));
        }
        let lowered = self.lower(to);
        Ok((self.builder.cast(v, lowered), to.clone()))
    }

    // ------------------------------------------------------------------
    // Dot access
    // ------------------------------------------------------------------

    /// Resolve a dot base that names a namespace, if it does.
    fn static_base(&self, base: &Expr) -> Option<StaticBase> {
        let marker = |value: &Value| -> Option<StaticBase> {
            if value.is_function() || !matches!(value.handle, CodeHandle::None) {
                return None;
            }
            match &value.ty {
                TypeDescriptor::Module(alias) => Some(StaticBase::Module(alias.clone())),
                TypeDescriptor::Class(class) => Some(StaticBase::Class(Rc::clone(class))),
                TypeDescriptor::Enum(en) => Some(StaticBase::Enum(Rc::clone(en))),
                _ => None,
            }
        };
        match &base.kind {
            ExprKind::Identifier(name) => self.symbols.lookup(name).and_then(marker),
            // `alias.Type`, so enum variants and constructors reach
            // through whole-module imports.
            ExprKind::Dot { base: inner, member } => match self.static_base(inner)? {
                StaticBase::Module(alias) => self
                    .symbols
                    .lookup(&format!("{alias}.{}", member.name))
                    .and_then(marker),
                _ => None,
            },
            _ => None,
        }
    }

    fn gen_dot(
        &mut self,
        base: &Expr,
        member: &str,
        span: Span,
    ) -> Result<(ValueId, TypeDescriptor), CoreError> {
        if let Some(static_base) = self.static_base(base) {
            return match static_base {
                StaticBase::Enum(en) => {
                    let index = en.variant_index(member).ok_or_else(|| {
                        CoreError::generate(
                            format!("enum `{}` has no variant `{member}`", en.name),
                            span,
                        )
                    })?;
                    let ty = TypeDescriptor::Enum(Rc::clone(&en));
                    let lowered = self.lower(&ty);
                    Ok((self.builder.const_int(index as i64, lowered), ty))
                }
                StaticBase::Module(alias) => Err(CoreError::generate(
                    format!("module member `{alias}.{member}` must be called"),
                    span,
                )),
                StaticBase::Class(class) => Err(CoreError::generate(
                    format!("`{}.{member}` needs an instance", class.name),
                    span,
                )),
            };
        }

        let (base_value, base_ty) = self.gen_expr(base)?;
        let (instance, class) = self.as_instance(base_value, &base_ty, base.span)?;
        let index = class.field_index(member).ok_or_else(|| {
            if self
                .symbols
                .lookup(&symbol::method_key(class.layout, member))
                .is_some()
            {
                CoreError::generate(
                    format!("method `{member}` of class `{}` must be called", class.name),
                    span,
                )
            } else {
                CoreError::generate(
                    format!("class `{}` has no field `{member}`", class.name),
                    span,
                )
            }
        })?;
        let field_ty = class.fields[index].ty.clone();
        let ptr = self.builder.field_ptr(instance, index);
        Ok((self.builder.load(ptr), field_ty))
    }

    /// Unwrap a value to a class instance, looking through one reference.
    fn as_instance(
        &mut self,
        value: ValueId,
        ty: &TypeDescriptor,
        span: Span,
    ) -> Result<(ValueId, Rc<ClassType>), CoreError> {
        match ty {
            TypeDescriptor::Class(class) => Ok((value, Rc::clone(class))),
            TypeDescriptor::Reference(inner) => match inner.as_ref() {
                TypeDescriptor::Class(class) => {
                    Ok((self.builder.load(value), Rc::clone(class)))
                }
                other => Err(CoreError::generate(
                    format!("type `{other}` has no fields"),
                    span,
                )),
            },
            other => Err(CoreError::generate(
                format!("type `{other}` has no fields"),
                span,
            )),
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn gen_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        span: Span,
    ) -> Result<(ValueId, TypeDescriptor), CoreError> {
        let mut values = Vec::with_capacity(args.len());
        let mut arg_types = Vec::with_capacity(args.len());
        for arg in args {
            let (v, t) = self.gen_expr(arg)?;
            values.push(v);
            arg_types.push(t);
        }

        match &callee.kind {
            ExprKind::Identifier(name) => {
                if let Some(value) = self.symbols.lookup(name) {
                    if let TypeDescriptor::Class(class) = &value.ty {
                        if !value.is_function() {
                            let class = Rc::clone(class);
                            return self.construct(&class, values, &arg_types, span);
                        }
                    }
                }
                let resolved = self
                    .symbols
                    .resolve_call(name, &arg_types)
                    .map_err(|e| lookup_failure(name, &arg_types, e, span))?
                    .clone();
                self.emit_call(&resolved, None, values, span)
            }
            ExprKind::Dot { base, member } => {
                if let Some(static_base) = self.static_base(base) {
                    return match static_base {
                        StaticBase::Module(alias) => {
                            let qualified = format!("{alias}.{}", member.name);
                            if let Some(value) = self.symbols.lookup(&qualified) {
                                if let TypeDescriptor::Class(class) = &value.ty {
                                    if !value.is_function() {
                                        let class = Rc::clone(class);
                                        return self
                                            .construct(&class, values, &arg_types, span);
                                    }
                                }
                            }
                            let resolved = self
                                .symbols
                                .resolve_call(&qualified, &arg_types)
                                .map_err(|e| lookup_failure(&qualified, &arg_types, e, span))?
                                .clone();
                            self.emit_call(&resolved, None, values, span)
                        }
                        StaticBase::Class(class) => {
                            if member.name == "new" {
                                self.construct(&class, values, &arg_types, span)
                            } else {
                                Err(CoreError::generate(
                                    format!(
                                        "method `{}` of class `{}` needs an instance",
                                        member.name, class.name
                                    ),
                                    span,
                                ))
                            }
                        }
                        StaticBase::Enum(en) => Err(CoreError::generate(
                            format!("enum variant `{}.{}` is not callable", en.name, member.name),
                            span,
                        )),
                    };
                }

                let (base_value, base_ty) = self.gen_expr(base)?;
                let (instance, class) = self.as_instance(base_value, &base_ty, base.span)?;
                let key = symbol::method_key(class.layout, &member.name);
                let candidates = self.symbols.lookup_all(&key).ok_or_else(|| {
                    CoreError::generate(
                        format!("class `{}` has no method `{}`", class.name, member.name),
                        span,
                    )
                })?;
                let resolved = symbol::resolve_among(candidates, &arg_types)
                    .map_err(|e| lookup_failure(&member.name, &arg_types, e, span))?
                    .clone();
                self.emit_call(&resolved, Some(instance), values, span)
            }
            _ => Err(CoreError::generate("expression is not callable", span)),
        }
    }

    /// Emit the call itself: fill defaulted parameters, prepend the
    /// instance for methods, and type the result.
    fn emit_call(
        &mut self,
        resolved: &Value,
        instance: Option<ValueId>,
        mut values: Vec<ValueId>,
        span: Span,
    ) -> Result<(ValueId, TypeDescriptor), CoreError> {
        let symbol = resolved
            .symbol()
            .expect("resolved callable without a symbol")
            .to_string();
        let params = resolved.params.as_ref().expect("callable without params");

        if values.len() < params.len() {
            let param_types: Vec<TypeDescriptor> =
                params[values.len()..].iter().map(|p| p.ty.clone()).collect();
            let defaults: Vec<Option<Expr>> = self
                .session
                .defaults(&symbol)
                .map(|d| d[values.len()..].to_vec())
                .unwrap_or_default();
            for (expr, param_ty) in defaults.into_iter().zip(param_types) {
                let expr = expr.ok_or_else(|| {
                    CoreError::generate("missing argument without a default", span)
                })?;
                let (v, ty) = self.gen_expr(&expr)?;
                let v = self.coerce_init(&expr, v, &ty, &param_ty)?;
                values.push(v);
            }
        }
        if let Some(instance) = instance {
            values.insert(0, instance);
        }
        let result = self.builder.call(symbol, values);
        Ok((result, resolved.return_type().clone()))
    }

    /// Allocate an instance, run its field initializers, and call `new`.
    pub(crate) fn construct(
        &mut self,
        class: &Rc<ClassType>,
        values: Vec<ValueId>,
        arg_types: &[TypeDescriptor],
        span: Span,
    ) -> Result<(ValueId, TypeDescriptor), CoreError> {
        let ty = TypeDescriptor::Class(Rc::clone(class));
        let lowered = self.lower(&ty);
        let slot = self.builder.stack_alloc(lowered);
        let instance = self.builder.load(slot);

        for (index, init) in self.session.class_inits(class.layout).to_vec() {
            let field_ty = class.fields[index].ty.clone();
            let (v, from) = self.gen_expr(&init)?;
            let v = self.coerce_init(&init, v, &from, &field_ty)?;
            let ptr = self.builder.field_ptr(instance, index);
            self.builder.store(ptr, v);
        }

        let key = symbol::method_key(class.layout, "new");
        let candidates = self.symbols.lookup_all(&key).ok_or_else(|| {
            CoreError::generate(
                format!("class `{}` has no constructor `new`", class.name),
                span,
            )
        })?;
        let resolved = symbol::resolve_among(candidates, arg_types)
            .map_err(|e| lookup_failure("new", arg_types, e, span))?
            .clone();
        self.emit_call(&resolved, Some(instance), values, span)?;
        Ok((instance, ty))
    }

    // ------------------------------------------------------------------
    // Assignment targets
    // ------------------------------------------------------------------

    pub(crate) fn gen_lvalue(&mut self, expr: &Expr) -> Result<Place, CoreError> {
        match &expr.kind {
            ExprKind::Identifier(name) => {
                let (scope, value) = self.symbols.lookup_with_scope(name).ok_or_else(|| {
                    CoreError::generate(format!("unknown identifier `{name}`"), expr.span)
                })?;
                let CodeHandle::Slot(slot) = &value.handle else {
                    return Err(CoreError::generate(
                        format!("cannot assign to `{name}`"),
                        expr.span,
                    ));
                };
                let slot = *slot;
                let ty = value.ty.clone();
                let mutable = value.mutable;
                if !self.symbols.is_within(scope, self.current_fn_scope()) {
                    return Err(CoreError::generate(
                        format!("cannot capture `{name}` from an enclosing function"),
                        expr.span,
                    ));
                }
                Ok(Place {
                    ptr: slot,
                    ty,
                    mutable,
                    binding: Some(name.clone()),
                })
            }
            ExprKind::Dot { base, member } => {
                if self.static_base(base).is_some() {
                    return Err(CoreError::generate(
                        "cannot assign to this expression",
                        expr.span,
                    ));
                }
                let (base_value, base_ty) = self.gen_expr(base)?;
                let (instance, class) = self.as_instance(base_value, &base_ty, base.span)?;
                let index = class.field_index(&member.name).ok_or_else(|| {
                    CoreError::generate(
                        format!("class `{}` has no field `{}`", class.name, member.name),
                        member.span,
                    )
                })?;
                let field = &class.fields[index];
                // `let` fields accept writes only while the class's own
                // constructor establishes them.
                let mutable = field.mutable || self.in_constructor_of(class.layout);
                Ok(Place {
                    ptr: self.builder.field_ptr(instance, index),
                    ty: field.ty.clone(),
                    mutable,
                    binding: None,
                })
            }
            ExprKind::Unary {
                op: UnaryOp::Deref,
                operand,
            } => {
                let (v, ty) = self.gen_expr(operand)?;
                match ty {
                    TypeDescriptor::Reference(inner) => Ok(Place {
                        ptr: v,
                        ty: *inner,
                        mutable: true,
                        binding: None,
                    }),
                    other => Err(CoreError::generate(
                        format!("cannot assign through a value of type `{other}`"),
                        expr.span,
                    )),
                }
            }
            _ => Err(CoreError::generate("invalid assignment target", expr.span)),
        }
    }
}

/// Types whose `==`/`!=` compares identity or content directly, without
/// numeric promotion.
fn identity_compared(ty: &TypeDescriptor) -> bool {
    matches!(
        ty,
        TypeDescriptor::Reference(_)
            | TypeDescriptor::Class(_)
            | TypeDescriptor::Enum(_)
            | TypeDescriptor::Str
            | TypeDescriptor::Bool
    )
}

fn arith_op(op: BinaryOp) -> BinOp {
    match op {
        BinaryOp::Add => BinOp::Add,
        BinaryOp::Sub => BinOp::Sub,
        BinaryOp::Mul => BinOp::Mul,
        BinaryOp::Div => BinOp::Div,
        BinaryOp::Mod => BinOp::Rem,
        BinaryOp::Pow => BinOp::Pow,
        BinaryOp::Eq => BinOp::Eq,
        BinaryOp::Ne => BinOp::Ne,
        BinaryOp::Lt => BinOp::Lt,
        BinaryOp::Le => BinOp::Le,
        BinaryOp::Gt => BinOp::Gt,
        BinaryOp::Ge => BinOp::Ge,
        BinaryOp::And | BinaryOp::Or => unreachable!("logical ops emitted separately"),
    }
}

fn lookup_failure(
    name: &str,
    arg_types: &[TypeDescriptor],
    error: LookupError,
    span: Span,
) -> CoreError {
    let signature = arg_types
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    match error {
        LookupError::Unknown => {
            CoreError::generate(format!("unknown identifier `{name}`"), span)
        }
        LookupError::NotCallable => {
            CoreError::generate(format!("`{name}` is not a function"), span)
        }
        LookupError::NoMatch { .. } => CoreError::generate(
            format!("no overload of `{name}` matches the argument types ({signature})"),
            span,
        ),
        LookupError::Ambiguous { .. } => CoreError::generate(
            format!("ambiguous call to `{name}`: multiple overloads match ({signature})"),
            span,
        ),
    }
}
