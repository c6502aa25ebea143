//! Scopes and name binding.
//!
//! Scopes form an arena of parent-linked frames; each frame maps a source
//! name to the list of values bound under it. Variables occupy a list of
//! one, functions accumulate one entry per overload. Lookup walks the
//! parent chain and stops at the first frame that knows the name, so inner
//! declarations shadow outer ones wholesale.
//!
//! Function overloads are keyed by a structured [`MangledName`] holding
//! the compilation unit, the owning class for methods, and the ordered
//! parameter types. The key is compared field-by-field; its string
//! rendering exists only as the symbol name in the generated module.

use std::collections::HashMap;
use std::fmt;

use crate::ir::ValueId;
use crate::types::TypeDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

/// Structured identity of one function overload.
#[derive(Debug, Clone, PartialEq)]
pub struct MangledName {
    /// Compilation unit label (`main`, an import's stem, `builtin`).
    pub module: String,
    /// Owning class for methods and constructors.
    pub owner: Option<String>,
    pub name: String,
    pub params: Vec<TypeDescriptor>,
}

impl MangledName {
    pub fn new(
        module: impl Into<String>,
        owner: Option<&str>,
        name: impl Into<String>,
        params: Vec<TypeDescriptor>,
    ) -> MangledName {
        MangledName {
            module: module.into(),
            owner: owner.map(str::to_string),
            name: name.into(),
            params,
        }
    }

    /// Render the symbol used for this overload in the output module,
    /// e.g. `math.clamp$i64$i64$i64`.
    pub fn symbol(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MangledName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.", self.module)?;
        if let Some(owner) = &self.owner {
            write!(f, "{owner}.")?;
        }
        write!(f, "{}", self.name)?;
        for param in &self.params {
            write!(f, "${}", mangle_type(param))?;
        }
        Ok(())
    }
}

/// Scope-binding key for a class method. Keyed by layout identity, not
/// by the written class name, so importing a class under an alias (or two
/// same-named classes from different units) cannot collide.
pub fn method_key(layout: crate::types::LayoutId, name: &str) -> String {
    format!("{}#{name}", layout.0)
}

/// Compact type spelling used inside rendered symbols.
pub fn mangle_type(ty: &TypeDescriptor) -> String {
    match ty {
        TypeDescriptor::Invalid => "invalid".to_string(),
        TypeDescriptor::Bool => "bool".to_string(),
        TypeDescriptor::Int { width, signed } => {
            format!("{}{}", if *signed { "i" } else { "u" }, width.bits())
        }
        TypeDescriptor::Float { width } => format!("f{}", width.bits()),
        TypeDescriptor::Str => "str".to_string(),
        TypeDescriptor::Void => "void".to_string(),
        TypeDescriptor::Reference(inner) => format!("ref.{}", mangle_type(inner)),
        TypeDescriptor::Function { .. } => "fn".to_string(),
        TypeDescriptor::Class(class) => format!("class.{}", class.name),
        TypeDescriptor::Enum(en) => format!("enum.{}", en.name),
        TypeDescriptor::Module(alias) => format!("module.{alias}"),
    }
}

/// Where a bound name lives in generated code.
#[derive(Debug, Clone, PartialEq)]
pub enum CodeHandle {
    /// Not materialized (types, modules, enum namespaces).
    None,
    /// A stack slot holding the variable's current value.
    Slot(ValueId),
    /// A function in the output module, by rendered symbol name.
    Func(String),
}

/// Tracks the use-before-initialization check for `var x: int` bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Declared,
    Initialized,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamInfo {
    pub name: String,
    pub ty: TypeDescriptor,
    pub has_default: bool,
}

/// One bound name: a variable, function overload, type, or module alias.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub name: String,
    pub ty: TypeDescriptor,
    pub handle: CodeHandle,
    pub mutable: bool,
    pub exported: bool,
    pub state: InitState,
    /// Present for functions only.
    pub mangled: Option<MangledName>,
    /// Present for functions; drives default completion during resolution.
    pub params: Option<Vec<ParamInfo>>,
}

impl Value {
    pub fn variable(name: impl Into<String>, ty: TypeDescriptor, mutable: bool) -> Value {
        Value {
            name: name.into(),
            ty,
            handle: CodeHandle::None,
            mutable,
            exported: false,
            state: InitState::Declared,
            mangled: None,
            params: None,
        }
    }

    pub fn function(
        mangled: MangledName,
        ty: TypeDescriptor,
        params: Vec<ParamInfo>,
    ) -> Value {
        Value {
            name: mangled.name.clone(),
            handle: CodeHandle::Func(mangled.symbol()),
            ty,
            mutable: false,
            exported: false,
            state: InitState::Initialized,
            mangled: Some(mangled),
            params: Some(params),
        }
    }

    /// A type name (class or enum) or module alias. Not callable, not
    /// assignable; exists so expressions can name it.
    pub fn marker(name: impl Into<String>, ty: TypeDescriptor) -> Value {
        Value {
            name: name.into(),
            ty,
            handle: CodeHandle::None,
            mutable: false,
            exported: false,
            state: InitState::Initialized,
            mangled: None,
            params: None,
        }
    }

    pub fn exported(mut self) -> Value {
        self.exported = true;
        self
    }

    /// Rebind under a new source name, for selective-import aliasing.
    pub fn renamed(mut self, name: impl Into<String>) -> Value {
        self.name = name.into();
        self
    }

    pub fn is_function(&self) -> bool {
        self.params.is_some()
    }

    /// The rendered output-module symbol, for functions.
    pub fn symbol(&self) -> Option<&str> {
        match &self.handle {
            CodeHandle::Func(symbol) => Some(symbol),
            _ => None,
        }
    }

    pub fn return_type(&self) -> &TypeDescriptor {
        match &self.ty {
            TypeDescriptor::Function { ret, .. } => ret,
            other => other,
        }
    }

    pub fn is_variadic(&self) -> bool {
        matches!(&self.ty, TypeDescriptor::Function { variadic: true, .. })
    }
}

#[derive(Debug)]
struct Scope {
    label: String,
    parent: Option<ScopeId>,
    bindings: HashMap<String, Vec<Value>>,
    /// Counts labels handed to direct children, so two `if` blocks in the
    /// same function get distinct labels (`if`, `if.1`).
    child_labels: HashMap<String, u32>,
}

/// How a function lookup ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupError {
    Unknown,
    /// The name exists but is not a function.
    NotCallable,
    /// No overload accepts the given argument types.
    NoMatch { candidates: Vec<String> },
    /// Two overloads fit equally well after default substitution.
    Ambiguous { candidates: Vec<String> },
}

pub struct SymbolTable {
    scopes: Vec<Scope>,
    current: ScopeId,
}

impl SymbolTable {
    pub fn new(root_label: impl Into<String>) -> SymbolTable {
        SymbolTable {
            scopes: vec![Scope {
                label: root_label.into(),
                parent: None,
                bindings: HashMap::new(),
                child_labels: HashMap::new(),
            }],
            current: ScopeId(0),
        }
    }

    pub fn current(&self) -> ScopeId {
        self.current
    }

    pub fn label(&self, scope: ScopeId) -> &str {
        &self.scopes[scope.0 as usize].label
    }

    /// Push a child scope and make it current. The label is made unique
    /// among this parent's children by a numeric suffix.
    pub fn enter(&mut self, label: &str) -> ScopeId {
        let parent = self.current;
        let counter = self.scopes[parent.0 as usize]
            .child_labels
            .entry(label.to_string())
            .or_insert(0);
        let unique = if *counter == 0 {
            label.to_string()
        } else {
            format!("{label}.{counter}")
        };
        *counter += 1;
        let full = format!("{}.{}", self.scopes[parent.0 as usize].label, unique);
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            label: full,
            parent: Some(parent),
            bindings: HashMap::new(),
            child_labels: HashMap::new(),
        });
        self.current = id;
        id
    }

    pub fn exit(&mut self) {
        self.current = self.scopes[self.current.0 as usize]
            .parent
            .expect("exiting the root scope");
    }

    /// Temporarily make `scope` current; the caller restores the old one.
    pub fn switch_to(&mut self, scope: ScopeId) -> ScopeId {
        std::mem::replace(&mut self.current, scope)
    }

    /// Bind a variable, type, or module alias in the current scope. Fails
    /// if the current scope already binds the name.
    pub fn insert(&mut self, value: Value) -> Result<(), Value> {
        let scope = &mut self.scopes[self.current.0 as usize];
        match scope.bindings.get(&value.name) {
            Some(_) => Err(value),
            None => {
                scope.bindings.insert(value.name.clone(), vec![value]);
                Ok(())
            }
        }
    }

    /// Add a function overload in the current scope. Fails if the name is
    /// already bound to a non-function, or if an overload with the same
    /// parameter-type signature exists.
    pub fn insert_overload(&mut self, value: Value) -> Result<(), Value> {
        let scope = &mut self.scopes[self.current.0 as usize];
        match scope.bindings.get_mut(&value.name) {
            None => {
                scope.bindings.insert(value.name.clone(), vec![value]);
                Ok(())
            }
            Some(existing) => {
                if existing.iter().any(|v| !v.is_function()) {
                    return Err(value);
                }
                let same_signature = |v: &Value| match (&v.mangled, &value.mangled) {
                    (Some(a), Some(b)) => a.owner == b.owner && a.params == b.params,
                    _ => false,
                };
                if existing.iter().any(same_signature) {
                    return Err(value);
                }
                existing.push(value);
                Ok(())
            }
        }
    }

    /// First-match lookup along the parent chain. For overloaded names
    /// this returns the first overload; callers resolving a call use
    /// [`SymbolTable::resolve_call`] instead.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.lookup_all(name).and_then(|values| values.first())
    }

    /// Like [`SymbolTable::lookup`], also reporting which scope bound the
    /// name. The generator uses the scope to reject cross-function
    /// variable captures.
    pub fn lookup_with_scope(&self, name: &str) -> Option<(ScopeId, &Value)> {
        let mut scope = Some(self.current);
        while let Some(id) = scope {
            let frame = &self.scopes[id.0 as usize];
            if let Some(values) = frame.bindings.get(name) {
                return values.first().map(|v| (id, v));
            }
            scope = frame.parent;
        }
        None
    }

    /// Whether `scope` is `ancestor` or nested somewhere inside it.
    pub fn is_within(&self, scope: ScopeId, ancestor: ScopeId) -> bool {
        let mut walk = Some(scope);
        while let Some(id) = walk {
            if id == ancestor {
                return true;
            }
            walk = self.scopes[id.0 as usize].parent;
        }
        false
    }

    /// Values bound under `name` directly in the current scope.
    pub fn bound_in_current(&self, name: &str) -> Option<&[Value]> {
        self.scopes[self.current.0 as usize]
            .bindings
            .get(name)
            .map(|values| values.as_slice())
    }

    /// All values bound under `name` in the nearest scope that has it.
    pub fn lookup_all(&self, name: &str) -> Option<&[Value]> {
        let mut scope = Some(self.current);
        while let Some(id) = scope {
            let frame = &self.scopes[id.0 as usize];
            if let Some(values) = frame.bindings.get(name) {
                return Some(values);
            }
            scope = frame.parent;
        }
        None
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Value> {
        let mut scope = Some(self.current);
        while let Some(id) = scope {
            if self.scopes[id.0 as usize].bindings.contains_key(name) {
                return self.scopes[id.0 as usize]
                    .bindings
                    .get_mut(name)
                    .and_then(|values| values.first_mut());
            }
            scope = self.scopes[id.0 as usize].parent;
        }
        None
    }

    /// Exported functions and markers bound directly in `scope`, in no
    /// particular order. Used when merging an import's public surface.
    pub fn exports_of(&self, scope: ScopeId) -> Vec<Value> {
        self.scopes[scope.0 as usize]
            .bindings
            .values()
            .flatten()
            .filter(|v| v.exported)
            .cloned()
            .collect()
    }

    /// Pick the overload of `name` that accepts `args`.
    ///
    /// A candidate fits when every supplied argument type equals the
    /// parameter type at its position and the remainder is covered by
    /// defaults, or by a variadic tail for extern declarations. Among
    /// fitting candidates the one needing the fewest default
    /// substitutions wins, with non-variadic preferred over variadic at
    /// equal cost; a tie is ambiguous and reported as such.
    pub fn resolve_call(
        &self,
        name: &str,
        args: &[TypeDescriptor],
    ) -> Result<&Value, LookupError> {
        let candidates = self.lookup_all(name).ok_or(LookupError::Unknown)?;
        if candidates.iter().any(|v| !v.is_function()) {
            return Err(LookupError::NotCallable);
        }
        resolve_among(candidates, args)
    }
}

/// Overload selection over an explicit candidate list, shared between
/// free-function calls, method calls, and constructor lookup.
pub fn resolve_among<'v>(
    candidates: &'v [Value],
    args: &[TypeDescriptor],
) -> Result<&'v Value, LookupError> {
    let mut best: Option<(&Value, usize)> = None;
    let mut tied = false;
    for candidate in candidates {
        let Some(cost) = fit_cost(candidate, args) else {
            continue;
        };
        match best {
            None => best = Some((candidate, cost)),
            Some((_, best_cost)) if cost < best_cost => {
                best = Some((candidate, cost));
                tied = false;
            }
            Some((_, best_cost)) if cost == best_cost => tied = true,
            Some(_) => {}
        }
    }

    let signatures = || {
        candidates
            .iter()
            .filter_map(|v| v.symbol().map(str::to_string))
            .collect()
    };
    match best {
        Some(_) if tied => Err(LookupError::Ambiguous {
            candidates: signatures(),
        }),
        Some((value, _)) => Ok(value),
        None => Err(LookupError::NoMatch {
            candidates: signatures(),
        }),
    }
}

/// Cost of calling `candidate` with `args`: the number of defaults that
/// must be substituted, plus a variadic penalty so a fixed-arity overload
/// beats a variadic one covering the same call. `None` means no fit.
fn fit_cost(candidate: &Value, args: &[TypeDescriptor]) -> Option<usize> {
    let params = candidate.params.as_ref()?;
    let variadic = candidate.is_variadic();

    if args.len() > params.len() {
        // Extra arguments only a variadic tail can absorb.
        if !variadic {
            return None;
        }
        for (param, arg) in params.iter().zip(args) {
            if &param.ty != arg {
                return None;
            }
        }
        return Some(1000);
    }

    for (param, arg) in params.iter().zip(args) {
        if &param.ty != arg {
            return None;
        }
    }
    // Every uncovered trailing parameter needs a default.
    let missing = &params[args.len()..];
    if missing.iter().any(|p| !p.has_default) {
        return None;
    }
    Some(missing.len() + if variadic { 1000 } else { 0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeDescriptor as T;

    fn func_value(name: &str, params: Vec<(T, bool)>, variadic: bool) -> Value {
        let param_types: Vec<T> = params.iter().map(|(t, _)| t.clone()).collect();
        let mangled = MangledName::new("main", None, name, param_types.clone());
        let infos = params
            .into_iter()
            .enumerate()
            .map(|(i, (ty, has_default))| ParamInfo {
                name: format!("p{i}"),
                ty,
                has_default,
            })
            .collect();
        Value::function(
            mangled,
            T::Function {
                params: param_types,
                ret: Box::new(T::Void),
                variadic,
            },
            infos,
        )
    }

    #[test]
    fn inner_scopes_shadow_outer_bindings() {
        let mut table = SymbolTable::new("main");
        table
            .insert(Value::variable("x", T::int(), true))
            .expect("outer");
        table.enter("if");
        table
            .insert(Value::variable("x", T::float(), false))
            .expect("inner");
        assert!(table.lookup("x").map(|v| v.ty.is_float()).unwrap_or(false));
        table.exit();
        assert!(table.lookup("x").map(|v| v.ty.is_integer()).unwrap_or(false));
    }

    #[test]
    fn duplicate_binding_in_one_scope_is_rejected() {
        let mut table = SymbolTable::new("main");
        table
            .insert(Value::variable("x", T::int(), true))
            .expect("first");
        assert!(table.insert(Value::variable("x", T::int(), true)).is_err());
    }

    #[test]
    fn sibling_scopes_get_distinct_labels() {
        let mut table = SymbolTable::new("main");
        let a = table.enter("if");
        table.exit();
        let b = table.enter("if");
        table.exit();
        assert_eq!(table.label(a), "main.if");
        assert_eq!(table.label(b), "main.if.1");
    }

    #[test]
    fn overloads_resolve_by_argument_type() {
        let mut table = SymbolTable::new("main");
        table
            .insert_overload(func_value("f", vec![(T::int(), false)], false))
            .expect("int overload");
        table
            .insert_overload(func_value("f", vec![(T::float(), false)], false))
            .expect("float overload");

        let hit = table.resolve_call("f", &[T::float()]).expect("resolve");
        assert_eq!(hit.symbol(), Some("main.f$f64"));
        let hit = table.resolve_call("f", &[T::int()]).expect("resolve");
        assert_eq!(hit.symbol(), Some("main.f$i64"));
    }

    #[test]
    fn duplicate_signature_is_rejected() {
        let mut table = SymbolTable::new("main");
        table
            .insert_overload(func_value("f", vec![(T::int(), false)], false))
            .expect("first");
        assert!(table
            .insert_overload(func_value("f", vec![(T::int(), false)], false))
            .is_err());
    }

    #[test]
    fn defaults_complete_missing_trailing_arguments() {
        let mut table = SymbolTable::new("main");
        table
            .insert_overload(func_value(
                "f",
                vec![(T::int(), false), (T::int(), true)],
                false,
            ))
            .expect("overload");

        assert!(table.resolve_call("f", &[T::int()]).is_ok());
        assert!(table.resolve_call("f", &[T::int(), T::int()]).is_ok());
        assert!(matches!(
            table.resolve_call("f", &[]),
            Err(LookupError::NoMatch { .. })
        ));
    }

    #[test]
    fn exact_arity_beats_default_substitution() {
        let mut table = SymbolTable::new("main");
        table
            .insert_overload(func_value(
                "f",
                vec![(T::int(), false), (T::int(), true)],
                false,
            ))
            .expect("two-arg");
        table
            .insert_overload(func_value("f", vec![(T::int(), false)], false))
            .expect("one-arg");

        // Both fit a one-argument call; the exact-arity form wins.
        let hit = table.resolve_call("f", &[T::int()]).expect("resolve");
        assert_eq!(hit.symbol(), Some("main.f$i64"));
    }

    #[test]
    fn equally_cheap_overloads_are_ambiguous() {
        let mut table = SymbolTable::new("main");
        table
            .insert_overload(func_value(
                "f",
                vec![(T::int(), false), (T::int(), true)],
                false,
            ))
            .expect("first");
        table
            .insert_overload(func_value(
                "f",
                vec![(T::int(), false), (T::float(), true)],
                false,
            ))
            .expect("second");

        assert!(matches!(
            table.resolve_call("f", &[T::int()]),
            Err(LookupError::Ambiguous { .. })
        ));
    }

    #[test]
    fn variadic_tail_absorbs_extra_arguments() {
        let mut table = SymbolTable::new("main");
        table
            .insert_overload(func_value("printf", vec![(T::Str, false)], true))
            .expect("variadic");

        assert!(table.resolve_call("printf", &[T::Str]).is_ok());
        assert!(table
            .resolve_call("printf", &[T::Str, T::int(), T::float()])
            .is_ok());
        assert!(matches!(
            table.resolve_call("printf", &[T::int()]),
            Err(LookupError::NoMatch { .. })
        ));
    }

    #[test]
    fn fixed_overload_beats_variadic_for_the_same_call() {
        let mut table = SymbolTable::new("main");
        table
            .insert_overload(func_value("f", vec![(T::Str, false)], true))
            .expect("variadic");
        table
            .insert_overload(func_value(
                "f",
                vec![(T::Str, false), (T::int(), false)],
                false,
            ))
            .expect("fixed");

        let hit = table.resolve_call("f", &[T::Str, T::int()]).expect("resolve");
        assert!(!hit.is_variadic());
    }

    #[test]
    fn symbols_fold_in_unit_owner_and_parameters() {
        let free = MangledName::new("math", None, "clamp", vec![T::int(), T::int(), T::int()]);
        assert_eq!(free.symbol(), "math.clamp$i64$i64$i64");
        let method = MangledName::new("main", Some("Point"), "new", vec![T::float()]);
        assert_eq!(method.symbol(), "main.Point.new$f64");
    }

    #[test]
    fn calling_a_variable_is_not_callable() {
        let mut table = SymbolTable::new("main");
        table
            .insert(Value::variable("x", T::int(), true))
            .expect("variable");
        assert_eq!(table.resolve_call("x", &[]), Err(LookupError::NotCallable));
    }
}
