//! In-memory representation of generated code.
//!
//! A [`Module`] is a flat list of functions. Each function owns an arena
//! of instructions addressed by [`ValueId`]; basic blocks hold ordered
//! lists of those ids and always end in a terminator. Function parameters
//! occupy the first ids of the arena as [`Inst::Param`] entries, so every
//! operand anywhere in a function body is a plain index.

/// Index of a function within its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

/// Index of a basic block within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

/// Index of an instruction result within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

/// Types at the generated-code level.
///
/// Deliberately smaller than the front-end's descriptors: classes lower to
/// structs, enums to their discriminant integer, references to pointers.
#[derive(Debug, Clone, PartialEq)]
pub enum IrType {
    Unit,
    Bool,
    Int { bits: u32, signed: bool },
    Float { bits: u32 },
    Str,
    Ptr(Box<IrType>),
    Struct { name: String, fields: Vec<IrType> },
}

impl IrType {
    pub fn ptr(inner: IrType) -> IrType {
        IrType::Ptr(Box::new(inner))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    /// Visible to importing modules and to the host.
    Export,
    /// Module-private.
    Private,
}

/// Host-implemented functions the interpreter can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostFunc {
    Exit,
    PrintInt,
    PrintFloat,
    PrintBool,
    PrintStr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    /// The i-th function parameter.
    Param(usize),
    ConstInt(i64, IrType),
    ConstFloat(f64, IrType),
    ConstBool(bool),
    ConstStr(String),
    ConstUnit,
    /// Allocate one typed slot of storage; yields a pointer.
    StackAlloc(IrType),
    Load(ValueId),
    Store { ptr: ValueId, value: ValueId },
    Binary { op: BinOp, lhs: ValueId, rhs: ValueId },
    Unary { op: UnOp, value: ValueId },
    Cast { value: ValueId, to: IrType },
    /// Pointer to the `index`-th field of a struct (or struct pointer).
    FieldPtr { base: ValueId, index: usize },
    /// Call by symbol name; resolution happens at link/run time.
    Call { callee: String, args: Vec<ValueId> },
    Br(BlockId),
    CondBr {
        cond: ValueId,
        then_block: BlockId,
        else_block: BlockId,
    },
    Ret(Option<ValueId>),
}

impl Inst {
    pub fn is_terminator(&self) -> bool {
        matches!(self, Inst::Br(_) | Inst::CondBr { .. } | Inst::Ret(_))
    }
}

#[derive(Debug, Clone)]
pub struct BlockData {
    pub label: String,
    pub insts: Vec<ValueId>,
}

#[derive(Debug, Clone)]
pub struct Function {
    /// Mangled symbol name; unique within a linked module.
    pub name: String,
    pub params: Vec<(String, IrType)>,
    pub ret: IrType,
    pub linkage: Linkage,
    pub variadic: bool,
    /// `Some` for functions the host provides; such functions have no
    /// blocks.
    pub host: Option<HostFunc>,
    /// Instruction arena; `ValueId` indexes into it. The first
    /// `params.len()` entries are [`Inst::Param`].
    pub insts: Vec<Inst>,
    pub blocks: Vec<BlockData>,
}

impl Function {
    /// Whether this is only a declaration (extern or host function).
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn inst(&self, id: ValueId) -> &Inst {
        &self.insts[id.0 as usize]
    }

    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id.0 as usize]
    }
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Module {
        Module {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn find_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}
