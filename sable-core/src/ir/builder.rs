//! The instruction builder.
//!
//! A [`Builder`] owns the module under construction plus an insertion
//! point (current function and block). The generator drives it through a
//! small surface: declare/define functions, create blocks, append typed
//! instructions. Appending to a block that already ended in a terminator
//! is a caller bug and panics; the generator guards against it by opening
//! a fresh block for unreachable tails.

use super::module::{
    BinOp, BlockData, BlockId, FuncId, Function, HostFunc, Inst, IrType, Linkage, Module, UnOp,
    ValueId,
};

#[derive(Debug)]
pub struct Builder {
    module: Module,
    /// Insertion point; `None` until the first `position_at_end`.
    cursor: Option<(FuncId, BlockId)>,
}

impl Builder {
    pub fn new(module_name: impl Into<String>) -> Builder {
        Builder {
            module: Module::new(module_name),
            cursor: None,
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn finish(self) -> Module {
        self.module
    }

    // ------------------------------------------------------------------
    // Functions and blocks
    // ------------------------------------------------------------------

    /// Declare a function. Definitions add blocks afterwards; extern and
    /// host functions stay block-less declarations.
    pub fn declare_function(
        &mut self,
        name: impl Into<String>,
        params: Vec<(String, IrType)>,
        ret: IrType,
        linkage: Linkage,
        variadic: bool,
        host: Option<HostFunc>,
    ) -> FuncId {
        let mut insts = Vec::with_capacity(params.len());
        for i in 0..params.len() {
            insts.push(Inst::Param(i));
        }
        let id = FuncId(self.module.functions.len() as u32);
        self.module.functions.push(Function {
            name: name.into(),
            params,
            ret,
            linkage,
            variadic,
            host,
            insts,
            blocks: Vec::new(),
        });
        id
    }

    pub fn create_block(&mut self, func: FuncId, label: impl Into<String>) -> BlockId {
        let function = &mut self.module.functions[func.0 as usize];
        let id = BlockId(function.blocks.len() as u32);
        function.blocks.push(BlockData {
            label: label.into(),
            insts: Vec::new(),
        });
        id
    }

    pub fn position_at_end(&mut self, func: FuncId, block: BlockId) {
        self.cursor = Some((func, block));
    }

    pub fn current_function(&self) -> FuncId {
        self.cursor.expect("builder has an insertion point").0
    }

    pub fn current_block(&self) -> BlockId {
        self.cursor.expect("builder has an insertion point").1
    }

    /// The i-th parameter of `func` as a value.
    pub fn param(&self, func: FuncId, index: usize) -> ValueId {
        debug_assert!(index < self.module.function(func).params.len());
        ValueId(index as u32)
    }

    /// Whether the current block already ends in a terminator.
    pub fn is_terminated(&self) -> bool {
        let Some((func, block)) = self.cursor else {
            return false;
        };
        let function = self.module.function(func);
        function
            .block(block)
            .insts
            .last()
            .is_some_and(|&id| function.inst(id).is_terminator())
    }

    fn append(&mut self, inst: Inst) -> ValueId {
        let (func, block) = self.cursor.expect("builder has an insertion point");
        let function = &mut self.module.functions[func.0 as usize];
        let last_terminated = function.blocks[block.0 as usize]
            .insts
            .last()
            .is_some_and(|&id| function.insts[id.0 as usize].is_terminator());
        assert!(
            !last_terminated,
            "appending to a terminated block in `{}`",
            function.name
        );
        let id = ValueId(function.insts.len() as u32);
        function.insts.push(inst);
        function.blocks[block.0 as usize].insts.push(id);
        id
    }

    // ------------------------------------------------------------------
    // Instructions
    // ------------------------------------------------------------------

    pub fn const_int(&mut self, value: i64, ty: IrType) -> ValueId {
        self.append(Inst::ConstInt(value, ty))
    }

    pub fn const_float(&mut self, value: f64, ty: IrType) -> ValueId {
        self.append(Inst::ConstFloat(value, ty))
    }

    pub fn const_bool(&mut self, value: bool) -> ValueId {
        self.append(Inst::ConstBool(value))
    }

    pub fn const_str(&mut self, value: impl Into<String>) -> ValueId {
        self.append(Inst::ConstStr(value.into()))
    }

    pub fn const_unit(&mut self) -> ValueId {
        self.append(Inst::ConstUnit)
    }

    pub fn stack_alloc(&mut self, ty: IrType) -> ValueId {
        self.append(Inst::StackAlloc(ty))
    }

    pub fn load(&mut self, ptr: ValueId) -> ValueId {
        self.append(Inst::Load(ptr))
    }

    pub fn store(&mut self, ptr: ValueId, value: ValueId) -> ValueId {
        self.append(Inst::Store { ptr, value })
    }

    pub fn binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.append(Inst::Binary { op, lhs, rhs })
    }

    pub fn unary(&mut self, op: UnOp, value: ValueId) -> ValueId {
        self.append(Inst::Unary { op, value })
    }

    pub fn cast(&mut self, value: ValueId, to: IrType) -> ValueId {
        self.append(Inst::Cast { value, to })
    }

    pub fn field_ptr(&mut self, base: ValueId, index: usize) -> ValueId {
        self.append(Inst::FieldPtr { base, index })
    }

    pub fn call(&mut self, callee: impl Into<String>, args: Vec<ValueId>) -> ValueId {
        self.append(Inst::Call {
            callee: callee.into(),
            args,
        })
    }

    pub fn br(&mut self, dest: BlockId) -> ValueId {
        self.append(Inst::Br(dest))
    }

    pub fn cond_br(&mut self, cond: ValueId, then_block: BlockId, else_block: BlockId) -> ValueId {
        self.append(Inst::CondBr {
            cond,
            then_block,
            else_block,
        })
    }

    pub fn ret(&mut self, value: Option<ValueId>) -> ValueId {
        self.append(Inst::Ret(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_function_with_params_and_blocks() {
        let mut b = Builder::new("test");
        let int = IrType::Int {
            bits: 64,
            signed: true,
        };
        let f = b.declare_function(
            "add",
            vec![("a".into(), int.clone()), ("b".into(), int.clone())],
            int.clone(),
            Linkage::Export,
            false,
            None,
        );
        let entry = b.create_block(f, "entry");
        b.position_at_end(f, entry);
        let lhs = b.param(f, 0);
        let rhs = b.param(f, 1);
        let sum = b.binary(BinOp::Add, lhs, rhs);
        b.ret(Some(sum));
        assert!(b.is_terminated());

        let module = b.finish();
        let function = module.find_function("add").expect("function exists");
        assert_eq!(function.params.len(), 2);
        assert_eq!(function.blocks.len(), 1);
        // Two params + binary + ret.
        assert_eq!(function.insts.len(), 4);
    }

    #[test]
    #[should_panic(expected = "terminated block")]
    fn appending_after_a_terminator_panics() {
        let mut b = Builder::new("test");
        let f = b.declare_function(
            "f",
            Vec::new(),
            IrType::Unit,
            Linkage::Private,
            false,
            None,
        );
        let entry = b.create_block(f, "entry");
        b.position_at_end(f, entry);
        b.ret(None);
        b.const_bool(true);
    }

    #[test]
    fn declarations_have_no_blocks() {
        let mut b = Builder::new("test");
        b.declare_function(
            "exit",
            vec![(
                "code".into(),
                IrType::Int {
                    bits: 64,
                    signed: true,
                },
            )],
            IrType::Unit,
            Linkage::Export,
            false,
            Some(HostFunc::Exit),
        );
        let module = b.finish();
        assert!(module.find_function("exit").unwrap().is_declaration());
    }
}
