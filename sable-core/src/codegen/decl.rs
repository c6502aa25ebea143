//! Declarations: functions, externs, classes, enums, imports.
//!
//! Prototypes are registered before any body is generated, so recursive
//! and mutually-recursive calls resolve. Imports re-enter the whole
//! pipeline through the session; a path already seen in this compilation
//! is not compiled again, only its exported names are re-bound.

use std::rc::Rc;

use crate::ast::{ClassDecl, EnumDecl, Expr, ExprKind, ExternFuncDecl, FuncDecl, ImportItems,
    ImportKind, ImportStmt, ImportTarget, UnaryOp};
use crate::error::CoreError;
use crate::ir::Linkage;
use crate::span::Span;
use crate::symbol::{self, CodeHandle, InitState, MangledName, ParamInfo, Value};
use crate::types::{ClassField, ClassType, EnumType, TypeDescriptor};

use super::Generator;

impl<'s> Generator<'s> {
    /// Register a function prototype: symbol-table overload entry, IR
    /// declaration, and default-argument table.
    ///
    /// For methods `owner` carries the class and whether the class is
    /// exported; the implicit `self` parameter exists only in the IR
    /// signature, never in the overload key.
    pub(crate) fn prototype_function(
        &mut self,
        decl: &FuncDecl,
        owner: Option<(&Rc<ClassType>, bool)>,
    ) -> Result<(), CoreError> {
        let (param_infos, defaults) = self.resolve_params(&decl.params)?;
        let param_types: Vec<TypeDescriptor> = param_infos.iter().map(|p| p.ty.clone()).collect();
        let ret = decl
            .ret
            .as_ref()
            .map(|t| self.resolve_type(t))
            .transpose()?
            .unwrap_or(TypeDescriptor::Void);

        if let Some((class, _)) = owner {
            if decl.name.name == "new" && !ret.is_void() {
                return Err(CoreError::generate(
                    format!(
                        "constructor `new` of class `{}` must not declare a return type",
                        class.name
                    ),
                    decl.name.span,
                ));
            }
        }

        let mangled = MangledName::new(
            &self.unit,
            owner.map(|(class, _)| class.name.as_str()),
            &decl.name.name,
            param_types.clone(),
        );
        let symbol = mangled.symbol();
        let exported = owner.map(|(_, e)| e).unwrap_or(decl.exported);
        let mut value = Value::function(
            mangled,
            TypeDescriptor::Function {
                params: param_types,
                ret: Box::new(ret.clone()),
                variadic: false,
            },
            param_infos.clone(),
        );
        if exported {
            value = value.exported();
        }
        if let Some((class, _)) = owner {
            value = value.renamed(symbol::method_key(class.layout, &decl.name.name));
        }
        self.symbols.insert_overload(value).map_err(|v| {
            CoreError::generate(
                format!("duplicate definition of `{}` with the same signature", v.name),
                decl.name.span,
            )
        })?;

        let mut ir_params = Vec::with_capacity(param_infos.len() + 1);
        if let Some((class, _)) = owner {
            let self_ty = TypeDescriptor::Class(Rc::clone(class));
            ir_params.push(("self".to_string(), self.lower(&self_ty)));
        }
        for info in &param_infos {
            ir_params.push((info.name.clone(), self.lower(&info.ty)));
        }
        let linkage = if exported {
            Linkage::Export
        } else {
            Linkage::Private
        };
        let lowered_ret = self.lower(&ret);
        let func = self
            .builder
            .declare_function(&symbol, ir_params, lowered_ret, linkage, false, None);
        self.protos.insert(symbol.clone(), func);
        self.session.set_defaults(symbol, defaults);
        Ok(())
    }

    pub(crate) fn declare_extern(&mut self, decl: &ExternFuncDecl) -> Result<(), CoreError> {
        let (param_infos, defaults) = self.resolve_params(&decl.params)?;
        let param_types: Vec<TypeDescriptor> = param_infos.iter().map(|p| p.ty.clone()).collect();
        let ret = decl
            .ret
            .as_ref()
            .map(|t| self.resolve_type(t))
            .transpose()?
            .unwrap_or(TypeDescriptor::Void);

        let mangled = MangledName::new(&self.unit, None, &decl.name.name, param_types.clone());
        let mut value = Value::function(
            mangled,
            TypeDescriptor::Function {
                params: param_types,
                ret: Box::new(ret.clone()),
                variadic: decl.variadic,
            },
            param_infos.clone(),
        );
        // Extern symbols link by their written name, unmangled.
        let symbol = decl.name.name.clone();
        value.handle = CodeHandle::Func(symbol.clone());
        self.symbols.insert_overload(value).map_err(|v| {
            CoreError::generate(
                format!("duplicate definition of `{}` with the same signature", v.name),
                decl.name.span,
            )
        })?;

        let ir_params = param_infos
            .iter()
            .map(|info| (info.name.clone(), self.lower(&info.ty)))
            .collect();
        let lowered_ret = self.lower(&ret);
        self.builder.declare_function(
            &symbol,
            ir_params,
            lowered_ret,
            Linkage::Export,
            decl.variadic,
            None,
        );
        self.session.set_defaults(symbol, defaults);
        Ok(())
    }

    /// Resolve parameter declarations to typed infos plus their default
    /// expressions. Parameter types come from the annotation or, failing
    /// that, the default value's literal type.
    fn resolve_params(
        &mut self,
        params: &[crate::ast::Param],
    ) -> Result<(Vec<ParamInfo>, Vec<Option<Expr>>), CoreError> {
        let mut infos = Vec::with_capacity(params.len());
        let mut defaults = Vec::with_capacity(params.len());
        let mut seen_default = false;
        for param in params {
            let annotated = param.ty.as_ref().map(|t| self.resolve_type(t)).transpose()?;
            let ty = match (&annotated, &param.default) {
                (Some(t), _) => t.clone(),
                (None, Some(default)) => literal_type(default).ok_or_else(|| {
                    CoreError::generate(
                        format!("parameter `{}` needs a type annotation", param.name.name),
                        param.span,
                    )
                })?,
                (None, None) => {
                    return Err(CoreError::generate(
                        format!("parameter `{}` needs a type annotation", param.name.name),
                        param.span,
                    ));
                }
            };
            if ty.is_void() {
                return Err(CoreError::generate(
                    format!("parameter `{}` cannot have type void", param.name.name),
                    param.span,
                ));
            }
            if let Some(default) = &param.default {
                check_default(default, &ty, &param.name.name)?;
                seen_default = true;
            } else if seen_default {
                return Err(CoreError::generate(
                    format!(
                        "parameter `{}` without a default follows a defaulted parameter",
                        param.name.name
                    ),
                    param.span,
                ));
            }
            infos.push(ParamInfo {
                name: param.name.name.clone(),
                ty,
                has_default: param.default.is_some(),
            });
            defaults.push(param.default.clone());
        }
        Ok((infos, defaults))
    }

    /// Generate a function's body against its already-declared prototype.
    pub(crate) fn generate_function_body(
        &mut self,
        decl: &FuncDecl,
        owner: Option<&Rc<ClassType>>,
    ) -> Result<(), CoreError> {
        let (param_infos, _) = self.resolve_params(&decl.params)?;
        let param_types: Vec<TypeDescriptor> = param_infos.iter().map(|p| p.ty.clone()).collect();
        let ret = decl
            .ret
            .as_ref()
            .map(|t| self.resolve_type(t))
            .transpose()?
            .unwrap_or(TypeDescriptor::Void);
        let symbol = MangledName::new(
            &self.unit,
            owner.map(|class| class.name.as_str()),
            &decl.name.name,
            param_types,
        )
        .symbol();
        let func = *self
            .protos
            .get(&symbol)
            .expect("body generated before prototype");

        let saved_cursor = self.entry.then(|| {
            (
                self.builder.current_function(),
                self.builder.current_block(),
            )
        });
        let entry_block = self.builder.create_block(func, "entry");
        self.builder.position_at_end(func, entry_block);
        let ctor = owner
            .filter(|_| decl.name.name == "new")
            .map(|class| class.layout);
        self.enter_function(&decl.name.name, ret.clone(), ctor);

        let mut index = 0;
        if let Some(class) = owner {
            let self_ty = TypeDescriptor::Class(Rc::clone(class));
            self.bind_param("self", self_ty, func, index, false, decl.name.span)?;
            index += 1;
        }
        for info in &param_infos {
            self.bind_param(&info.name, info.ty.clone(), func, index, true, decl.span)?;
            index += 1;
        }

        self.generate_stmts(&decl.body.statements)?;

        if !self.builder.is_terminated() {
            if ret.is_void() {
                self.replay_defers()?;
                self.builder.ret(None);
            } else {
                self.exit_function();
                if let Some((f, b)) = saved_cursor {
                    self.builder.position_at_end(f, b);
                }
                return Err(CoreError::generate(
                    format!(
                        "function `{}` is missing a return on some path",
                        decl.name.name
                    ),
                    decl.name.span,
                ));
            }
        }

        self.exit_function();
        if let Some((f, b)) = saved_cursor {
            self.builder.position_at_end(f, b);
        }
        Ok(())
    }

    /// Copy an incoming parameter into a stack slot and bind it.
    fn bind_param(
        &mut self,
        name: &str,
        ty: TypeDescriptor,
        func: crate::ir::FuncId,
        index: usize,
        mutable: bool,
        span: Span,
    ) -> Result<(), CoreError> {
        let slot = self.builder.stack_alloc(self.lower(&ty));
        let incoming = self.builder.param(func, index);
        self.builder.store(slot, incoming);
        let mut value = Value::variable(name, ty, mutable);
        value.handle = CodeHandle::Slot(slot);
        value.state = InitState::Initialized;
        self.symbols.insert(value).map_err(|v| {
            CoreError::generate(format!("duplicate parameter `{}`", v.name), span)
        })
    }

    // ------------------------------------------------------------------
    // Classes and enums
    // ------------------------------------------------------------------

    pub(crate) fn declare_class(&mut self, decl: &ClassDecl) -> Result<(), CoreError> {
        let mut fields = Vec::with_capacity(decl.fields.len());
        let mut inits = Vec::new();
        for (index, field) in decl.fields.iter().enumerate() {
            if fields.iter().any(|f: &ClassField| f.name == field.name.name) {
                return Err(CoreError::generate(
                    format!("duplicate field `{}`", field.name.name),
                    field.name.span,
                ));
            }
            let annotated = field.ty.as_ref().map(|t| self.resolve_type(t)).transpose()?;
            let ty = match (&annotated, &field.init) {
                (Some(t), _) => t.clone(),
                (None, Some(init)) => literal_type(init).ok_or_else(|| {
                    CoreError::generate(
                        format!("field `{}` needs a type annotation", field.name.name),
                        field.span,
                    )
                })?,
                (None, None) => {
                    return Err(CoreError::generate(
                        format!("field `{}` needs a type annotation", field.name.name),
                        field.span,
                    ));
                }
            };
            if ty.is_void() {
                return Err(CoreError::generate(
                    format!("field `{}` cannot have type void", field.name.name),
                    field.span,
                ));
            }
            if let Some(init) = &field.init {
                check_default(init, &ty, &field.name.name)?;
                inits.push((index, init.clone()));
            }
            fields.push(ClassField {
                name: field.name.name.clone(),
                ty,
                mutable: field.mutable,
            });
        }

        // A class without `new` cannot be instantiated at all; treat the
        // declaration itself as the error.
        if !decl.methods.iter().any(|m| m.name.name == "new") {
            return Err(CoreError::generate(
                format!("class `{}` must declare a constructor `new`", decl.name.name),
                decl.name.span,
            ));
        }

        let layout = self.session.alloc_layout();
        let class = Rc::new(ClassType {
            name: decl.name.name.clone(),
            layout,
            fields,
        });
        let mut marker = Value::marker(&decl.name.name, TypeDescriptor::Class(Rc::clone(&class)));
        if decl.exported {
            marker = marker.exported();
        }
        self.symbols.insert(marker).map_err(|v| {
            CoreError::generate(
                format!("the name `{}` is already defined in this scope", v.name),
                decl.name.span,
            )
        })?;
        self.session.set_class_inits(layout, inits);

        for method in &decl.methods {
            self.prototype_function(method, Some((&class, decl.exported)))?;
        }
        Ok(())
    }

    pub(crate) fn generate_methods(&mut self, decl: &ClassDecl) -> Result<(), CoreError> {
        let class = match self.symbols.lookup(&decl.name.name).map(|v| &v.ty) {
            Some(TypeDescriptor::Class(class)) => Rc::clone(class),
            _ => unreachable!("class declared in an earlier pass"),
        };
        for method in &decl.methods {
            self.generate_function_body(method, Some(&class))?;
        }
        Ok(())
    }

    pub(crate) fn declare_enum(&mut self, decl: &EnumDecl) -> Result<(), CoreError> {
        let mut variants = Vec::with_capacity(decl.variants.len());
        for variant in &decl.variants {
            if variants.contains(&variant.name) {
                return Err(CoreError::generate(
                    format!("duplicate variant `{}`", variant.name),
                    variant.span,
                ));
            }
            variants.push(variant.name.clone());
        }
        let layout = self.session.alloc_layout();
        let en = Rc::new(EnumType {
            name: decl.name.name.clone(),
            layout,
            variants,
        });
        let mut marker = Value::marker(&decl.name.name, TypeDescriptor::Enum(en));
        if decl.exported {
            marker = marker.exported();
        }
        self.symbols.insert(marker).map_err(|v| {
            CoreError::generate(
                format!("the name `{}` is already defined in this scope", v.name),
                decl.name.span,
            )
        })
    }

    // ------------------------------------------------------------------
    // Imports
    // ------------------------------------------------------------------

    pub(crate) fn generate_import(&mut self, imp: &ImportStmt) -> Result<(), CoreError> {
        let span = imp.span;
        let raw = match &imp.target {
            ImportTarget::Std(name) => self.session.stdlib_root().join(format!("{name}.sbl")),
            ImportTarget::Path(path) => self.dir.join(path),
        };
        let resolved = std::fs::canonicalize(&raw)
            .map_err(|e| CoreError::import(raw.clone(), span, CoreError::SourceIo(e)))?;
        let (exports, module) = self
            .session
            .import_unit(&resolved)
            .map_err(|e| CoreError::import(resolved.clone(), span, e))?;
        if let Some(module) = module {
            self.pending.push(module);
        }

        let default_name = match &imp.target {
            ImportTarget::Std(name) => name.clone(),
            ImportTarget::Path(path) => std::path::Path::new(path)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "module".to_string()),
        };

        match &imp.kind {
            ImportKind::Module { alias } => {
                let alias = alias
                    .as_ref()
                    .map(|i| i.name.clone())
                    .unwrap_or(default_name);
                self.bind_import(
                    Value::marker(alias.clone(), TypeDescriptor::Module(alias.clone())),
                    span,
                )?;
                for value in exports {
                    if value.name.contains('#') {
                        // Method entries keep their layout-keyed names.
                        self.bind_import(value, span)?;
                    } else {
                        let qualified = format!("{alias}.{}", value.name);
                        self.bind_import(value.renamed(qualified), span)?;
                    }
                }
            }
            ImportKind::Selective {
                items: ImportItems::All,
            } => {
                for value in exports {
                    self.bind_import(value, span)?;
                }
            }
            ImportKind::Selective {
                items: ImportItems::List(list),
            } => {
                for (name, rename) in list {
                    let matched: Vec<Value> = exports
                        .iter()
                        .filter(|v| v.name == name.name)
                        .cloned()
                        .collect();
                    if matched.is_empty() {
                        return Err(CoreError::generate(
                            format!(
                                "module `{default_name}` has no exported member `{}`",
                                name.name
                            ),
                            name.span,
                        ));
                    }
                    for value in matched {
                        // A class brings its method entries along; they
                        // are found by layout, so aliasing the class name
                        // does not affect them.
                        if let TypeDescriptor::Class(class) = &value.ty {
                            if !value.is_function() {
                                let prefix = format!("{}#", class.layout.0);
                                for entry in
                                    exports.iter().filter(|v| v.name.starts_with(&prefix))
                                {
                                    self.bind_import(entry.clone(), span)?;
                                }
                            }
                        }
                        let value = match rename {
                            Some(rename) => value.renamed(&rename.name),
                            None => value,
                        };
                        self.bind_import(value, span)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Insert an imported value, tolerating an exact re-import.
    fn bind_import(&mut self, value: Value, span: Span) -> Result<(), CoreError> {
        if let Some(existing) = self.symbols.bound_in_current(&value.name) {
            if existing.iter().any(|v| v == &value) {
                return Ok(());
            }
        }
        let result = if value.is_function() {
            self.symbols.insert_overload(value)
        } else {
            self.symbols.insert(value)
        };
        result.map_err(|v| {
            CoreError::generate(format!("the name `{}` is already bound", v.name), span)
        })
    }
}

/// The type of a literal expression, if it is one. Used where a type
/// must be known without generating code: parameter defaults and field
/// initializers.
fn literal_type(expr: &Expr) -> Option<TypeDescriptor> {
    match &expr.kind {
        ExprKind::Integer(_) => Some(TypeDescriptor::int()),
        ExprKind::Float(_) => Some(TypeDescriptor::float()),
        ExprKind::Bool(_) => Some(TypeDescriptor::Bool),
        ExprKind::Str(_) => Some(TypeDescriptor::Str),
        ExprKind::Unary {
            op: UnaryOp::Neg,
            operand,
        } => literal_type(operand).filter(TypeDescriptor::is_numeric),
        _ => None,
    }
}

/// Defaults and field initializers must be literals whose type fits the
/// declared one; integer and float literals adapt to any width.
fn check_default(expr: &Expr, ty: &TypeDescriptor, name: &str) -> Result<(), CoreError> {
    let found = literal_type(expr).ok_or_else(|| {
        CoreError::generate(
            format!("default value for `{name}` must be a literal"),
            expr.span,
        )
    })?;
    let fits = found == *ty
        || (found.is_integer() && ty.is_integer())
        || (found.is_float() && ty.is_float());
    if fits {
        Ok(())
    } else {
        Err(CoreError::generate(
            format!("default value for `{name}` does not match its type `{ty}`"),
            expr.span,
        ))
    }
}
