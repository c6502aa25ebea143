//! Single-pass AST-to-IR generation.
//!
//! One [`Generator`] runs per compilation unit. It walks the parsed tree
//! top-down, resolving names against the scope arena and emitting
//! instructions through the [`Builder`] as it goes; there is no separate
//! type-checking pass. Visitors return a `(value, type)` pair directly,
//! so sibling calls share no mutable result state.
//!
//! Per function the shape is fixed: prototype first (so recursion and
//! mutual recursion resolve), then the body in a child scope with a fresh
//! defer frame, then the fall-through exit where the defer frame replays
//! and an implicit return is synthesized for void functions. A non-void
//! function with an unterminated path is an error at that point.
//!
//! The unit entry (`main`) is synthesized: top-level executable
//! statements are emitted into it in order, and it returns 0 unless an
//! `exit` call ends the program earlier. Imported units may only declare.

mod decl;
mod expr;

use std::collections::HashMap;
use std::path::PathBuf;

use crate::ast::{Block, Expr, ExprKind, Stmt, StmtKind};
use crate::builtins;
use crate::compiler::Session;
use crate::error::CoreError;
use crate::ir::{self, BlockId, Builder, FuncId, IrType, Linkage, Module, ValueId};
use crate::span::Span;
use crate::symbol::{ScopeId, SymbolTable, Value};
use crate::types::{LayoutId, TypeDescriptor};

pub struct Generator<'s> {
    pub(crate) session: &'s mut Session,
    pub(crate) symbols: SymbolTable,
    pub(crate) builder: Builder,
    /// Compilation unit label, folded into every symbol this unit emits.
    pub(crate) unit: String,
    /// Directory of the source file, for resolving relative imports.
    pub(crate) dir: PathBuf,
    /// Whether this unit is the program entry (gets a synthesized `main`).
    entry: bool,
    /// Function prototypes declared so far, by rendered symbol.
    pub(crate) protos: HashMap<String, FuncId>,
    /// One frame per function being generated, innermost last.
    defers: Vec<Vec<Stmt>>,
    /// Declared return types, innermost function last.
    ret_types: Vec<TypeDescriptor>,
    /// For each function being generated, the class layout whose `new`
    /// it is, if any; `let` field writes are legal only there.
    ctor_layouts: Vec<Option<LayoutId>>,
    /// Scope at the root of each function being generated; variable
    /// lookups must not escape the innermost one.
    fn_scopes: Vec<ScopeId>,
    breaks: Vec<BlockId>,
    continues: Vec<BlockId>,
    /// Imported modules waiting to be linked into this unit's output.
    pub(crate) pending: Vec<Module>,
}

impl<'s> Generator<'s> {
    pub fn new(session: &'s mut Session, unit: String, dir: PathBuf, entry: bool) -> Generator<'s> {
        let mut symbols = SymbolTable::new(&unit);
        let mut builder = Builder::new(&unit);
        builtins::register(&mut symbols, &mut builder);
        Generator {
            session,
            symbols,
            builder,
            unit,
            dir,
            entry,
            protos: HashMap::new(),
            defers: Vec::new(),
            ret_types: Vec::new(),
            ctor_layouts: Vec::new(),
            fn_scopes: Vec::new(),
            breaks: Vec::new(),
            continues: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Generate the whole unit.
    ///
    /// Declarations are processed in passes so later code can refer to
    /// earlier kinds: imports first, then enum and class types, then
    /// function and method prototypes, then bodies and executable
    /// statements in source order.
    pub fn compile(&mut self, ast: &Block) -> Result<(), CoreError> {
        if self.entry {
            let main = self.builder.declare_function(
                "main",
                Vec::new(),
                IrType::Int {
                    bits: 64,
                    signed: true,
                },
                Linkage::Export,
                false,
                None,
            );
            let entry_block = self.builder.create_block(main, "entry");
            self.builder.position_at_end(main, entry_block);
            self.protos.insert("main".to_string(), main);
            self.defers.push(Vec::new());
            self.fn_scopes.push(self.symbols.current());
        }

        // Imports bind names only, so they run before any declaration
        // pass; an imported class is then usable in local signatures.
        for stmt in &ast.statements {
            if let StmtKind::Import(imp) = &stmt.kind {
                self.generate_import(imp)?;
            }
        }
        for stmt in &ast.statements {
            if let StmtKind::Enum(decl) = &stmt.kind {
                self.declare_enum(decl)?;
            }
        }
        for stmt in &ast.statements {
            if let StmtKind::Class(decl) = &stmt.kind {
                self.declare_class(decl)?;
            }
        }
        for stmt in &ast.statements {
            match &stmt.kind {
                StmtKind::FuncDecl(decl) => {
                    self.prototype_function(decl, None)?;
                }
                StmtKind::ExternFuncDecl(decl) => self.declare_extern(decl)?,
                _ => {}
            }
        }

        for stmt in &ast.statements {
            match &stmt.kind {
                StmtKind::Enum(_) | StmtKind::ExternFuncDecl(_) | StmtKind::Import(_) => {}
                StmtKind::Class(decl) => self.generate_methods(decl)?,
                StmtKind::FuncDecl(decl) => self.generate_function_body(decl, None)?,
                _ => {
                    if !self.entry {
                        return Err(CoreError::generate(
                            "imported modules may only declare functions, classes, and enums",
                            stmt.span,
                        ));
                    }
                    self.generate_stmt(stmt)?;
                }
            }
        }

        if self.entry && !self.builder.is_terminated() {
            self.replay_defers()?;
            let int = IrType::Int {
                bits: 64,
                signed: true,
            };
            let zero = self.builder.const_int(0, int);
            self.builder.ret(Some(zero));
        }
        Ok(())
    }

    /// Finish the unit: link every imported module into the output.
    pub fn finish(self) -> Result<(Module, Vec<Value>), CoreError> {
        let exports = self.symbols.exports_of(ScopeId(0));
        let mut module = self.builder.finish();
        for imported in self.pending {
            ir::link(&mut module, imported)?;
        }
        Ok((module, exports))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    pub(crate) fn generate_stmt(&mut self, stmt: &Stmt) -> Result<(), CoreError> {
        match &stmt.kind {
            StmtKind::VarDecl {
                name,
                mutable,
                ty,
                init,
            } => self.generate_var_decl(name, *mutable, ty.as_ref(), init.as_ref(), stmt.span),
            StmtKind::Assign { target, op, value } => self.generate_assign(target, *op, value),
            StmtKind::If { clauses } => self.generate_if(clauses),
            StmtKind::While { condition, block } => self.generate_while(condition, block),
            StmtKind::For { .. } => Err(CoreError::generate(
                "`for` loops are not supported",
                stmt.span,
            )),
            StmtKind::FuncDecl(_) => Err(CoreError::generate(
                "function declarations are only allowed at the top level or inside a class",
                stmt.span,
            )),
            StmtKind::ExternFuncDecl(_) => Err(CoreError::generate(
                "extern declarations are only allowed at the top level",
                stmt.span,
            )),
            StmtKind::Import(_) => Err(CoreError::generate(
                "imports are only allowed at the top level",
                stmt.span,
            )),
            StmtKind::Class(_) | StmtKind::Enum(_) => Err(CoreError::generate(
                "type declarations are only allowed at the top level",
                stmt.span,
            )),
            StmtKind::Break => match self.breaks.last() {
                Some(target) => {
                    let target = *target;
                    self.builder.br(target);
                    Ok(())
                }
                None => Err(CoreError::generate("`break` outside of a loop", stmt.span)),
            },
            StmtKind::Continue => match self.continues.last() {
                Some(target) => {
                    let target = *target;
                    self.builder.br(target);
                    Ok(())
                }
                None => Err(CoreError::generate(
                    "`continue` outside of a loop",
                    stmt.span,
                )),
            },
            StmtKind::Return(value) => self.generate_return(value.as_ref(), stmt.span),
            StmtKind::Defer(inner) => {
                let frame = self
                    .defers
                    .last_mut()
                    .expect("defer frame missing inside a function");
                frame.push((**inner).clone());
                Ok(())
            }
            StmtKind::Expression(expr) => {
                self.gen_expr(expr)?;
                Ok(())
            }
        }
    }

    /// Generate an indented block's statements inside a fresh child scope.
    /// Stops early once a statement terminates the current basic block.
    fn generate_block(&mut self, block: &Block, label: &str) -> Result<(), CoreError> {
        self.symbols.enter(label);
        let result = self.generate_stmts(&block.statements);
        self.symbols.exit();
        result
    }

    fn generate_stmts(&mut self, statements: &[Stmt]) -> Result<(), CoreError> {
        for stmt in statements {
            if self.builder.is_terminated() {
                break;
            }
            self.generate_stmt(stmt)?;
        }
        Ok(())
    }

    fn generate_var_decl(
        &mut self,
        name: &crate::ast::Ident,
        mutable: bool,
        ty: Option<&crate::ast::TypeExpr>,
        init: Option<&Expr>,
        span: Span,
    ) -> Result<(), CoreError> {
        let declared = ty.map(|t| self.resolve_type(t)).transpose()?;
        if let Some(declared) = &declared {
            if declared.is_void() {
                return Err(CoreError::generate(
                    format!("cannot declare `{}` with type void", name.name),
                    span,
                ));
            }
        }

        let initializer = init.map(|e| self.gen_expr(e).map(|v| (e, v))).transpose()?;
        let storage = match (&declared, &initializer) {
            (Some(t), _) => t.clone(),
            (None, Some((_, (_, inferred)))) => {
                if inferred.is_void() {
                    return Err(CoreError::generate(
                        format!("initializer of `{}` has no value", name.name),
                        span,
                    ));
                }
                inferred.clone()
            }
            (None, None) => {
                return Err(CoreError::generate(
                    format!("`{}` needs a type annotation or an initializer", name.name),
                    span,
                ));
            }
        };

        let slot = self.builder.stack_alloc(self.lower(&storage));
        let mut value = Value::variable(&name.name, storage.clone(), mutable);
        value.handle = crate::symbol::CodeHandle::Slot(slot);
        if let Some((expr, (id, from))) = initializer {
            let coerced = self.coerce_init(expr, id, &from, &storage)?;
            self.builder.store(slot, coerced);
            value.state = crate::symbol::InitState::Initialized;
        }
        self.symbols.insert(value).map_err(|v| {
            CoreError::generate(
                format!("the name `{}` is already defined in this scope", v.name),
                name.span,
            )
        })
    }

    fn generate_assign(
        &mut self,
        target: &Expr,
        op: crate::ast::AssignOp,
        value: &Expr,
    ) -> Result<(), CoreError> {
        use crate::ast::{AssignOp, BinaryOp};
        let place = self.gen_lvalue(target)?;
        if !place.mutable {
            return Err(CoreError::generate(
                "cannot assign to an immutable binding",
                target.span,
            ));
        }

        let (rhs, rhs_ty) = self.gen_expr(value)?;
        let stored = match op {
            AssignOp::Set => self.coerce_init(value, rhs, &rhs_ty, &place.ty)?,
            compound => {
                let binop = match compound {
                    AssignOp::Add => BinaryOp::Add,
                    AssignOp::Sub => BinaryOp::Sub,
                    AssignOp::Mul => BinaryOp::Mul,
                    AssignOp::Div => BinaryOp::Div,
                    AssignOp::Set => unreachable!(),
                };
                let current = self.builder.load(place.ptr);
                let (combined, combined_ty) =
                    self.emit_binary(binop, current, place.ty.clone(), rhs, rhs_ty, target.span)?;
                self.coerce_init(value, combined, &combined_ty, &place.ty)?
            }
        };
        self.builder.store(place.ptr, stored);

        if let Some(name) = &place.binding {
            if let Some(bound) = self.symbols.lookup_mut(name) {
                bound.state = crate::symbol::InitState::Initialized;
            }
        }
        Ok(())
    }

    fn generate_if(&mut self, clauses: &[crate::ast::IfClause]) -> Result<(), CoreError> {
        let func = self.builder.current_function();
        let join = self.builder.create_block(func, "endif");
        let mut join_used = false;
        for (i, clause) in clauses.iter().enumerate() {
            let last = i + 1 == clauses.len();
            if matches!(clause.condition.kind, ExprKind::ElseMarker) {
                self.generate_block(&clause.block, "else")?;
                if !self.builder.is_terminated() {
                    self.builder.br(join);
                    join_used = true;
                }
            } else {
                let (cond, cond_ty) = self.gen_expr(&clause.condition)?;
                if cond_ty != TypeDescriptor::Bool {
                    return Err(CoreError::generate(
                        format!("condition must be a boolean, found `{cond_ty}`"),
                        clause.condition.span,
                    ));
                }
                let then_block = self.builder.create_block(func, "then");
                let next = if last {
                    join_used = true;
                    join
                } else {
                    self.builder.create_block(func, "else")
                };
                self.builder.cond_br(cond, then_block, next);
                self.builder.position_at_end(func, then_block);
                self.generate_block(&clause.block, "if")?;
                if !self.builder.is_terminated() {
                    self.builder.br(join);
                    join_used = true;
                }
                if next != join {
                    self.builder.position_at_end(func, next);
                }
            }
        }

        // When every clause terminated and an `else` exists nothing
        // branches to the join point; leaving the cursor on the last
        // terminated block lets the missing-return check see the truth.
        if join_used {
            self.builder.position_at_end(func, join);
        }
        Ok(())
    }

    fn generate_while(&mut self, condition: &Expr, block: &Block) -> Result<(), CoreError> {
        let func = self.builder.current_function();
        let cond_block = self.builder.create_block(func, "loop.cond");
        let body_block = self.builder.create_block(func, "loop.body");
        let exit_block = self.builder.create_block(func, "loop.exit");

        self.builder.br(cond_block);
        self.builder.position_at_end(func, cond_block);
        let (cond, cond_ty) = self.gen_expr(condition)?;
        if cond_ty != TypeDescriptor::Bool {
            return Err(CoreError::generate(
                format!("condition must be a boolean, found `{cond_ty}`"),
                condition.span,
            ));
        }
        self.builder.cond_br(cond, body_block, exit_block);

        self.breaks.push(exit_block);
        self.continues.push(cond_block);
        self.builder.position_at_end(func, body_block);
        let body = self.generate_block(block, "while");
        self.breaks.pop();
        self.continues.pop();
        body?;

        if !self.builder.is_terminated() {
            self.builder.br(cond_block);
        }
        self.builder.position_at_end(func, exit_block);
        Ok(())
    }

    fn generate_return(&mut self, value: Option<&Expr>, span: Span) -> Result<(), CoreError> {
        let Some(expected) = self.ret_types.last().cloned() else {
            return Err(CoreError::generate(
                "`return` is not allowed at the top level",
                span,
            ));
        };

        let result = value.map(|e| self.gen_expr(e)).transpose()?;
        self.replay_defers()?;
        match (result, expected.is_void()) {
            (None, true) => {
                self.builder.ret(None);
                Ok(())
            }
            (Some(_), true) => Err(CoreError::generate(
                "this function does not return a value",
                span,
            )),
            (None, false) => Err(CoreError::generate(
                format!("expected a return value of type `{expected}`"),
                span,
            )),
            // Return types match exactly; no implicit widening here.
            (Some((id, actual)), false) => {
                if actual != expected {
                    return Err(CoreError::generate(
                        format!("return type mismatch: expected `{expected}`, found `{actual}`"),
                        span,
                    ));
                }
                self.builder.ret(Some(id));
                Ok(())
            }
        }
    }

    /// Replay the innermost defer frame in reverse registration order.
    pub(crate) fn replay_defers(&mut self) -> Result<(), CoreError> {
        let frame = self.defers.last().cloned().unwrap_or_default();
        for stmt in frame.iter().rev() {
            self.generate_stmt(stmt)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    pub(crate) fn enter_function(&mut self, label: &str, ret: TypeDescriptor, ctor: Option<LayoutId>) {
        self.symbols.enter(label);
        self.fn_scopes.push(self.symbols.current());
        self.defers.push(Vec::new());
        self.ret_types.push(ret);
        self.ctor_layouts.push(ctor);
    }

    pub(crate) fn exit_function(&mut self) {
        self.ctor_layouts.pop();
        self.ret_types.pop();
        self.defers.pop();
        self.fn_scopes.pop();
        self.symbols.exit();
    }

    /// Whether generation is currently inside `new` of the given class.
    pub(crate) fn in_constructor_of(&self, layout: LayoutId) -> bool {
        self.ctor_layouts.last().copied().flatten() == Some(layout)
    }

    pub(crate) fn current_fn_scope(&self) -> ScopeId {
        *self
            .fn_scopes
            .last()
            .expect("expression outside any function")
    }

    /// Lower a source-level type to its storage shape.
    pub(crate) fn lower(&self, ty: &TypeDescriptor) -> IrType {
        match ty {
            TypeDescriptor::Void => IrType::Unit,
            TypeDescriptor::Bool => IrType::Bool,
            TypeDescriptor::Int { width, signed } => IrType::Int {
                bits: width.bits(),
                signed: *signed,
            },
            TypeDescriptor::Float { width } => IrType::Float { bits: width.bits() },
            TypeDescriptor::Str => IrType::Str,
            TypeDescriptor::Reference(inner) => IrType::ptr(self.lower(inner)),
            TypeDescriptor::Class(class) => IrType::Struct {
                name: class.name.clone(),
                fields: class.fields.iter().map(|f| self.lower(&f.ty)).collect(),
            },
            // Enums are a bare discriminant at runtime.
            TypeDescriptor::Enum(_) => IrType::Int {
                bits: 32,
                signed: false,
            },
            TypeDescriptor::Invalid | TypeDescriptor::Function { .. } | TypeDescriptor::Module(_) => {
                unreachable!("type `{ty}` has no storage shape")
            }
        }
    }

    /// Resolve a written type annotation against the current scope.
    pub(crate) fn resolve_type(
        &self,
        ty: &crate::ast::TypeExpr,
    ) -> Result<TypeDescriptor, CoreError> {
        use crate::ast::TypeExprKind;
        match &ty.kind {
            TypeExprKind::Int { width, signed } => Ok(TypeDescriptor::Int {
                width: *width,
                signed: *signed,
            }),
            TypeExprKind::Float { width } => Ok(TypeDescriptor::Float { width: *width }),
            TypeExprKind::Bool => Ok(TypeDescriptor::Bool),
            TypeExprKind::Str => Ok(TypeDescriptor::Str),
            TypeExprKind::Void => Ok(TypeDescriptor::Void),
            TypeExprKind::Named(name) => match self.symbols.lookup(name) {
                Some(value)
                    if matches!(
                        value.ty,
                        TypeDescriptor::Class(_) | TypeDescriptor::Enum(_)
                    ) =>
                {
                    Ok(value.ty.clone())
                }
                _ => Err(CoreError::generate(
                    format!("unknown type `{name}`"),
                    ty.span,
                )),
            },
            TypeExprKind::Reference(inner) => {
                Ok(TypeDescriptor::reference(self.resolve_type(inner)?))
            }
        }
    }

    /// Coerce an initializer or assigned value into a storage type.
    ///
    /// Exact matches pass through, numeric widening inserts a cast, and a
    /// bare literal adapts to any integer or float storage width.
    pub(crate) fn coerce_init(
        &mut self,
        expr: &Expr,
        id: ValueId,
        from: &TypeDescriptor,
        to: &TypeDescriptor,
    ) -> Result<ValueId, CoreError> {
        if from == to {
            return Ok(id);
        }
        if from.is_numeric() && to.is_numeric() {
            let widens = crate::types::promote(from, to).as_ref() == Some(to);
            let literal = matches!(expr.kind, ExprKind::Integer(_)) && to.is_integer()
                || matches!(expr.kind, ExprKind::Float(_)) && to.is_float();
            if widens || literal {
                let lowered = self.lower(to);
                return Ok(self.builder.cast(id, lowered));
            }
        }
        Err(CoreError::generate(
            format!("type mismatch: expected `{to}`, found `{from}`"),
            expr.span,
        ))
    }
}
