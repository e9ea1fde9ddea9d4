//! Function-body lowering to WebAssembly bytecode
//!
//! Expressions emit their operands post-order followed by one opcode.
//! Control flow uses the structured block/loop/if instructions with a
//! hand-maintained depth counter, so `br` targets are computed as
//! relative depths. Each non-void function gets a return-value local:
//! `return` stores to it and branches to the function's outermost block,
//! and the epilogue reads it back.

use super::opcodes as op;
use super::{valtype_of, ValType, WasmBackend};
use super::leb128::{write_sleb128, write_uleb128};
use hashbrown::HashMap;
use scc_common::{SccError, SccResult};
use scc_parser::{
    BinOp, Expr, ExprKind, Function, IncDecOp, Initializer, LogicalOp, Program, ScopeId, Stmt,
    StmtKind, UnOp, VarRef,
};
use scc_types::{FuncSig, TypeRef};

/// Lowers one function body into its Code-section entry
pub struct FuncEmitter<'a> {
    backend: &'a WasmBackend,
    program: &'a Program,
    code: Vec<u8>,
    locals: HashMap<(ScopeId, usize), u32>,
    /// Types of the non-parameter locals, in index order.
    local_types: Vec<ValType>,
    param_count: u32,
    ret_local: Option<u32>,
    /// Scratch local holding the active switch discriminant.
    switch_tmp: Option<u32>,
    /// Number of currently open structured blocks.
    depth: u32,
    /// Absolute levels break/continue branch to.
    break_stack: Vec<u32>,
    continue_stack: Vec<u32>,
}

impl<'a> FuncEmitter<'a> {
    pub fn lower(
        backend: &'a WasmBackend,
        program: &'a Program,
        func: &Function,
        sig: &FuncSig,
    ) -> SccResult<Vec<u8>> {
        let body = func
            .body
            .as_ref()
            .ok_or_else(|| SccError::internal_error("cannot lower a function without a body"))?;

        let mut emitter = FuncEmitter {
            backend,
            program,
            code: Vec::new(),
            locals: HashMap::new(),
            local_types: Vec::new(),
            param_count: func.params.len() as u32,
            ret_local: None,
            switch_tmp: None,
            depth: 0,
            break_stack: Vec::new(),
            continue_stack: Vec::new(),
        };

        // Dense local indices: parameters first, then locals in
        // declaration order.
        for (i, param) in func.params.iter().enumerate() {
            emitter.locals.insert((param.scope, param.index), i as u32);
        }
        let mut declared = Vec::new();
        collect_locals(body, &mut declared);
        for (scope, index) in declared {
            if emitter.locals.contains_key(&(scope, index)) {
                continue;
            }
            let var = program.scopes.var(scope, index);
            let valtype = valtype_of(&backend.layout(), &var.ty).map_err(|_| {
                SccError::codegen_error(format!(
                    "local '{}' has type '{}', which the WebAssembly target cannot hold",
                    var.name, var.ty
                ))
            })?;
            let index_in_func = emitter.param_count + emitter.local_types.len() as u32;
            emitter.local_types.push(valtype);
            emitter.locals.insert((scope, index), index_in_func);
        }

        if !sig.ret.is_void() {
            let valtype = valtype_of(&backend.layout(), &sig.ret)?;
            emitter.ret_local = Some(emitter.alloc_scratch(valtype));
        }
        if contains_switch(body) {
            emitter.switch_tmp = Some(emitter.alloc_scratch(ValType::I32));
        }

        // The whole body sits in one outer block so `return` can branch
        // to its end.
        let outer = emitter.open_block(op::BLOCK);
        emitter.gen_stmt(body)?;
        emitter.close_block();
        debug_assert_eq!(outer, 0);
        if let Some(ret_local) = emitter.ret_local {
            emitter.code.push(op::LOCAL_GET);
            write_uleb128(&mut emitter.code, ret_local as u64);
        }
        emitter.code.push(op::END);

        // Code entry: local group declarations, then the bytecode.
        let mut body_bytes = Vec::new();
        let mut groups: Vec<(u32, ValType)> = Vec::new();
        for valtype in &emitter.local_types {
            match groups.last_mut() {
                Some((count, ty)) if *ty == *valtype => *count += 1,
                _ => groups.push((1, *valtype)),
            }
        }
        write_uleb128(&mut body_bytes, groups.len() as u64);
        for (count, valtype) in groups {
            write_uleb128(&mut body_bytes, count as u64);
            body_bytes.push(valtype.byte());
        }
        body_bytes.extend_from_slice(&emitter.code);
        Ok(body_bytes)
    }

    fn alloc_scratch(&mut self, valtype: ValType) -> u32 {
        let index = self.param_count + self.local_types.len() as u32;
        self.local_types.push(valtype);
        index
    }

    // Structured control-flow bookkeeping

    /// Open a block/loop; returns its absolute level.
    fn open_block(&mut self, opcode: u8) -> u32 {
        self.code.push(opcode);
        self.code.push(op::BLOCK_VOID);
        let level = self.depth;
        self.depth += 1;
        level
    }

    fn close_block(&mut self) {
        self.code.push(op::END);
        self.depth -= 1;
    }

    /// Relative depth for a branch to the block at `level`.
    fn rel_depth(&self, level: u32) -> u32 {
        self.depth - level - 1
    }

    fn br(&mut self, level: u32) {
        let depth = self.rel_depth(level);
        self.code.push(op::BR);
        write_uleb128(&mut self.code, depth as u64);
    }

    fn br_if(&mut self, level: u32) {
        let depth = self.rel_depth(level);
        self.code.push(op::BR_IF);
        write_uleb128(&mut self.code, depth as u64);
    }

    // Helpers

    fn valtype(&self, ty: &TypeRef) -> SccResult<ValType> {
        valtype_of(&self.backend.layout(), ty)
    }

    fn local_of(&self, var: &VarRef) -> Option<u32> {
        self.locals.get(&(var.scope, var.index)).copied()
    }

    fn unsupported<T>(&self, what: &str) -> SccResult<T> {
        Err(SccError::codegen_error(format!(
            "{} is not supported by the WebAssembly target",
            what
        )))
    }

    fn push_i32_const(&mut self, value: i32) {
        self.code.push(op::I32_CONST);
        write_sleb128(&mut self.code, value as i64);
    }

    /// Emit a value and leave a 0/1 i32 on the stack.
    fn gen_bool_value(&mut self, expr: &Expr) -> SccResult<()> {
        self.gen_expr(expr)?;
        match self.valtype(&expr.ty)? {
            ValType::I32 => {
                self.code.push(op::I32_EQZ);
                self.code.push(op::I32_EQZ);
            }
            ValType::I64 => {
                self.code.push(op::I64_EQZ);
                self.code.push(op::I32_EQZ);
            }
            ValType::F32 => {
                self.code.push(op::F32_CONST);
                self.code.extend_from_slice(&0f32.to_le_bytes());
                self.code.push(op::F32_NE);
            }
            ValType::F64 => {
                self.code.push(op::F64_CONST);
                self.code.extend_from_slice(&0f64.to_le_bytes());
                self.code.push(op::F64_NE);
            }
        }
        Ok(())
    }

    /// Emit a condition as an i32 usable by `if`/`br_if` (nonzero taken).
    fn gen_condition(&mut self, expr: &Expr) -> SccResult<()> {
        match self.valtype(&expr.ty)? {
            ValType::I32 => self.gen_expr(expr),
            _ => self.gen_bool_value(expr),
        }
    }

    // Expressions

    fn gen_expr(&mut self, expr: &Expr) -> SccResult<()> {
        match &expr.kind {
            ExprKind::IntLit(v) => {
                match self.valtype(&expr.ty)? {
                    ValType::I32 => self.push_i32_const(*v as i32),
                    ValType::I64 => {
                        self.code.push(op::I64_CONST);
                        write_sleb128(&mut self.code, *v);
                    }
                    _ => return Err(SccError::internal_error("integer literal with float type")),
                }
                Ok(())
            }
            ExprKind::FloatLit(v) => {
                match self.valtype(&expr.ty)? {
                    ValType::F32 => {
                        self.code.push(op::F32_CONST);
                        self.code.extend_from_slice(&(*v as f32).to_le_bytes());
                    }
                    ValType::F64 => {
                        self.code.push(op::F64_CONST);
                        self.code.extend_from_slice(&v.to_le_bytes());
                    }
                    _ => return Err(SccError::internal_error("float literal with integer type")),
                }
                Ok(())
            }
            ExprKind::Var(var) => {
                if let Some(local) = self.local_of(var) {
                    self.code.push(op::LOCAL_GET);
                    write_uleb128(&mut self.code, local as u64);
                    return Ok(());
                }
                if let Some(global) = self.backend.global_index(var.scope, var.index) {
                    self.code.push(op::GLOBAL_GET);
                    write_uleb128(&mut self.code, global as u64);
                    return Ok(());
                }
                self.unsupported(&format!("variable '{}' without a wasm location", var.name))
            }
            ExprKind::Assign { lhs, rhs } => self.gen_assign(lhs, rhs),
            ExprKind::CompoundAssign { op: bin_op, lhs, rhs } => {
                self.gen_compound_assign(*bin_op, lhs, rhs)
            }
            ExprKind::IncDec { op: idop, target } => self.gen_incdec(*idop, target),
            ExprKind::Unary { op: un_op, operand } => self.gen_unary(*un_op, operand, expr),
            ExprKind::Binary { op: bin_op, lhs, rhs } => self.gen_binary(*bin_op, lhs, rhs),
            ExprKind::Logical { op: log_op, lhs, rhs } => self.gen_logical(*log_op, lhs, rhs),
            ExprKind::Ternary { cond, then_expr, else_expr } => {
                self.gen_condition(cond)?;
                self.code.push(op::IF);
                let blocktype = if expr.ty.is_void() {
                    op::BLOCK_VOID
                } else {
                    self.valtype(&expr.ty)?.byte()
                };
                self.code.push(blocktype);
                self.depth += 1;
                self.gen_expr(then_expr)?;
                self.code.push(op::ELSE);
                self.gen_expr(else_expr)?;
                self.code.push(op::END);
                self.depth -= 1;
                Ok(())
            }
            ExprKind::Call { callee, args } => self.gen_call(callee, args),
            ExprKind::Cast { inner, .. } => {
                self.gen_expr(inner)?;
                self.gen_conversion(&inner.ty, &expr.ty)
            }
            ExprKind::Comma { lhs, rhs } => {
                self.gen_expr(lhs)?;
                if !lhs.ty.is_void() {
                    self.code.push(op::DROP);
                }
                self.gen_expr(rhs)
            }
            ExprKind::StrLit(_) => self.unsupported("string data"),
            ExprKind::Member { .. } => self.unsupported("struct member access"),
            ExprKind::Deref(_) => self.unsupported("pointer dereference"),
            ExprKind::Addr(_) => self.unsupported("taking an address"),
            ExprKind::CompoundLit { var, init } => {
                // A scalar compound literal is just its hidden local.
                let Initializer::Single(value) = init.as_ref() else {
                    return self.unsupported("aggregate compound literal");
                };
                let Some(local) = self.local_of(var) else {
                    return self.unsupported("compound literal without a local");
                };
                self.gen_expr(value)?;
                self.code.push(op::LOCAL_TEE);
                write_uleb128(&mut self.code, local as u64);
                Ok(())
            }
        }
    }

    fn gen_assign(&mut self, lhs: &Expr, rhs: &Expr) -> SccResult<()> {
        let ExprKind::Var(var) = &lhs.kind else {
            return self.unsupported("assignment through memory");
        };
        self.gen_expr(rhs)?;
        if let Some(local) = self.local_of(var) {
            self.code.push(op::LOCAL_TEE);
            write_uleb128(&mut self.code, local as u64);
            return Ok(());
        }
        if let Some(global) = self.backend.global_index(var.scope, var.index) {
            self.code.push(op::GLOBAL_SET);
            write_uleb128(&mut self.code, global as u64);
            self.code.push(op::GLOBAL_GET);
            write_uleb128(&mut self.code, global as u64);
            return Ok(());
        }
        self.unsupported(&format!("assignment to '{}'", var.name))
    }

    fn gen_compound_assign(&mut self, bin_op: BinOp, lhs: &Expr, rhs: &Expr) -> SccResult<()> {
        let ExprKind::Var(var) = &lhs.kind else {
            return self.unsupported("compound assignment through memory");
        };
        let valtype = self.valtype(&lhs.ty)?;

        // load, combine, store, keeping the result as the value.
        if let Some(local) = self.local_of(var) {
            self.code.push(op::LOCAL_GET);
            write_uleb128(&mut self.code, local as u64);
            self.gen_expr(rhs)?;
            self.push_binop(bin_op, valtype, lhs.ty.is_unsigned())?;
            self.narrow_if_needed(&lhs.ty)?;
            self.code.push(op::LOCAL_TEE);
            write_uleb128(&mut self.code, local as u64);
            return Ok(());
        }
        if let Some(global) = self.backend.global_index(var.scope, var.index) {
            self.code.push(op::GLOBAL_GET);
            write_uleb128(&mut self.code, global as u64);
            self.gen_expr(rhs)?;
            self.push_binop(bin_op, valtype, lhs.ty.is_unsigned())?;
            self.narrow_if_needed(&lhs.ty)?;
            self.code.push(op::GLOBAL_SET);
            write_uleb128(&mut self.code, global as u64);
            self.code.push(op::GLOBAL_GET);
            write_uleb128(&mut self.code, global as u64);
            return Ok(());
        }
        self.unsupported(&format!("compound assignment to '{}'", var.name))
    }

    fn gen_incdec(&mut self, idop: IncDecOp, target: &Expr) -> SccResult<()> {
        let ExprKind::Var(var) = &target.kind else {
            return self.unsupported("increment/decrement through memory");
        };
        let valtype = self.valtype(&target.ty)?;
        let add = matches!(idop, IncDecOp::PreInc | IncDecOp::PostInc);
        let post = matches!(idop, IncDecOp::PostInc | IncDecOp::PostDec);
        let bin = if add { BinOp::Add } else { BinOp::Sub };

        let get_set: (Vec<u8>, Vec<u8>, Vec<u8>) = if let Some(local) = self.local_of(var) {
            let mut get = vec![op::LOCAL_GET];
            write_uleb128(&mut get, local as u64);
            let mut set = vec![op::LOCAL_SET];
            write_uleb128(&mut set, local as u64);
            let mut tee = vec![op::LOCAL_TEE];
            write_uleb128(&mut tee, local as u64);
            (get, set, tee)
        } else if let Some(global) = self.backend.global_index(var.scope, var.index) {
            let mut get = vec![op::GLOBAL_GET];
            write_uleb128(&mut get, global as u64);
            let mut set = vec![op::GLOBAL_SET];
            write_uleb128(&mut set, global as u64);
            // Globals have no tee; set-then-get stands in.
            let mut tee = set.clone();
            tee.extend_from_slice(&get);
            (get, set, tee)
        } else {
            return self.unsupported(&format!("increment of '{}'", var.name));
        };
        let (get, set, tee) = get_set;

        if post {
            // Old value stays on the stack.
            self.code.extend_from_slice(&get);
            self.code.extend_from_slice(&get);
            self.push_one(valtype)?;
            self.push_binop(bin, valtype, target.ty.is_unsigned())?;
            self.narrow_if_needed(&target.ty)?;
            self.code.extend_from_slice(&set);
        } else {
            self.code.extend_from_slice(&get);
            self.push_one(valtype)?;
            self.push_binop(bin, valtype, target.ty.is_unsigned())?;
            self.narrow_if_needed(&target.ty)?;
            self.code.extend_from_slice(&tee);
        }
        Ok(())
    }

    fn push_one(&mut self, valtype: ValType) -> SccResult<()> {
        match valtype {
            ValType::I32 => self.push_i32_const(1),
            ValType::I64 => {
                self.code.push(op::I64_CONST);
                write_sleb128(&mut self.code, 1);
            }
            ValType::F32 => {
                self.code.push(op::F32_CONST);
                self.code.extend_from_slice(&1f32.to_le_bytes());
            }
            ValType::F64 => {
                self.code.push(op::F64_CONST);
                self.code.extend_from_slice(&1f64.to_le_bytes());
            }
        }
        Ok(())
    }

    fn gen_unary(&mut self, un_op: UnOp, operand: &Expr, expr: &Expr) -> SccResult<()> {
        match un_op {
            UnOp::Neg => match self.valtype(&expr.ty)? {
                ValType::I32 => {
                    self.push_i32_const(0);
                    self.gen_expr(operand)?;
                    self.code.push(op::I32_SUB);
                    Ok(())
                }
                ValType::I64 => {
                    self.code.push(op::I64_CONST);
                    write_sleb128(&mut self.code, 0);
                    self.gen_expr(operand)?;
                    self.code.push(op::I64_SUB);
                    Ok(())
                }
                ValType::F32 => {
                    self.gen_expr(operand)?;
                    self.code.push(op::F32_NEG);
                    Ok(())
                }
                ValType::F64 => {
                    self.gen_expr(operand)?;
                    self.code.push(op::F64_NEG);
                    Ok(())
                }
            },
            UnOp::BitNot => {
                self.gen_expr(operand)?;
                match self.valtype(&expr.ty)? {
                    ValType::I32 => {
                        self.push_i32_const(-1);
                        self.code.push(op::I32_XOR);
                    }
                    ValType::I64 => {
                        self.code.push(op::I64_CONST);
                        write_sleb128(&mut self.code, -1);
                        self.code.push(op::I64_XOR);
                    }
                    _ => return Err(SccError::internal_error("bitwise not of a float")),
                }
                Ok(())
            }
            UnOp::Not => {
                self.gen_expr(operand)?;
                match self.valtype(&operand.ty)? {
                    ValType::I32 => self.code.push(op::I32_EQZ),
                    ValType::I64 => self.code.push(op::I64_EQZ),
                    ValType::F32 => {
                        self.code.push(op::F32_CONST);
                        self.code.extend_from_slice(&0f32.to_le_bytes());
                        self.code.push(op::F32_EQ);
                    }
                    ValType::F64 => {
                        self.code.push(op::F64_CONST);
                        self.code.extend_from_slice(&0f64.to_le_bytes());
                        self.code.push(op::F64_EQ);
                    }
                }
                Ok(())
            }
        }
    }

    fn gen_binary(&mut self, bin_op: BinOp, lhs: &Expr, rhs: &Expr) -> SccResult<()> {
        self.gen_expr(lhs)?;
        self.gen_expr(rhs)?;
        let valtype = self.valtype(&lhs.ty)?;
        let unsigned = lhs.ty.is_unsigned();
        if bin_op.is_comparison() {
            self.push_compare(bin_op, valtype, unsigned)
        } else {
            self.push_binop(bin_op, valtype, unsigned)
        }
    }

    fn push_binop(&mut self, bin_op: BinOp, valtype: ValType, unsigned: bool) -> SccResult<()> {
        let opcode = match (valtype, bin_op, unsigned) {
            (ValType::I32, BinOp::Add, _) => op::I32_ADD,
            (ValType::I32, BinOp::Sub, _) => op::I32_SUB,
            (ValType::I32, BinOp::Mul, _) => op::I32_MUL,
            (ValType::I32, BinOp::Div, false) => op::I32_DIV_S,
            (ValType::I32, BinOp::Div, true) => op::I32_DIV_U,
            (ValType::I32, BinOp::Mod, false) => op::I32_REM_S,
            (ValType::I32, BinOp::Mod, true) => op::I32_REM_U,
            (ValType::I32, BinOp::BitAnd, _) => op::I32_AND,
            (ValType::I32, BinOp::BitOr, _) => op::I32_OR,
            (ValType::I32, BinOp::BitXor, _) => op::I32_XOR,
            (ValType::I32, BinOp::Shl, _) => op::I32_SHL,
            (ValType::I32, BinOp::Shr, false) => op::I32_SHR_S,
            (ValType::I32, BinOp::Shr, true) => op::I32_SHR_U,
            (ValType::I64, BinOp::Add, _) => op::I64_ADD,
            (ValType::I64, BinOp::Sub, _) => op::I64_SUB,
            (ValType::I64, BinOp::Mul, _) => op::I64_MUL,
            (ValType::I64, BinOp::Div, false) => op::I64_DIV_S,
            (ValType::I64, BinOp::Div, true) => op::I64_DIV_U,
            (ValType::I64, BinOp::Mod, false) => op::I64_REM_S,
            (ValType::I64, BinOp::Mod, true) => op::I64_REM_U,
            (ValType::I64, BinOp::BitAnd, _) => op::I64_AND,
            (ValType::I64, BinOp::BitOr, _) => op::I64_OR,
            (ValType::I64, BinOp::BitXor, _) => op::I64_XOR,
            (ValType::I64, BinOp::Shl, _) => op::I64_SHL,
            (ValType::I64, BinOp::Shr, false) => op::I64_SHR_S,
            (ValType::I64, BinOp::Shr, true) => op::I64_SHR_U,
            (ValType::F32, BinOp::Add, _) => op::F32_ADD,
            (ValType::F32, BinOp::Sub, _) => op::F32_SUB,
            (ValType::F32, BinOp::Mul, _) => op::F32_MUL,
            (ValType::F32, BinOp::Div, _) => op::F32_DIV,
            (ValType::F64, BinOp::Add, _) => op::F64_ADD,
            (ValType::F64, BinOp::Sub, _) => op::F64_SUB,
            (ValType::F64, BinOp::Mul, _) => op::F64_MUL,
            (ValType::F64, BinOp::Div, _) => op::F64_DIV,
            _ => {
                return Err(SccError::internal_error(
                    "invalid operator/type combination in wasm lowering",
                ))
            }
        };
        self.code.push(opcode);
        Ok(())
    }

    fn push_compare(&mut self, bin_op: BinOp, valtype: ValType, unsigned: bool) -> SccResult<()> {
        let opcode = match (valtype, bin_op, unsigned) {
            (ValType::I32, BinOp::Eq, _) => op::I32_EQ,
            (ValType::I32, BinOp::Ne, _) => op::I32_NE,
            (ValType::I32, BinOp::Lt, false) => op::I32_LT_S,
            (ValType::I32, BinOp::Lt, true) => op::I32_LT_U,
            (ValType::I32, BinOp::Le, false) => op::I32_LE_S,
            (ValType::I32, BinOp::Le, true) => op::I32_LE_U,
            (ValType::I32, BinOp::Gt, false) => op::I32_GT_S,
            (ValType::I32, BinOp::Gt, true) => op::I32_GT_U,
            (ValType::I32, BinOp::Ge, false) => op::I32_GE_S,
            (ValType::I32, BinOp::Ge, true) => op::I32_GE_U,
            (ValType::I64, BinOp::Eq, _) => op::I64_EQ,
            (ValType::I64, BinOp::Ne, _) => op::I64_NE,
            (ValType::I64, BinOp::Lt, false) => op::I64_LT_S,
            (ValType::I64, BinOp::Lt, true) => op::I64_LT_U,
            (ValType::I64, BinOp::Le, false) => op::I64_LE_S,
            (ValType::I64, BinOp::Le, true) => op::I64_LE_U,
            (ValType::I64, BinOp::Gt, false) => op::I64_GT_S,
            (ValType::I64, BinOp::Gt, true) => op::I64_GT_U,
            (ValType::I64, BinOp::Ge, false) => op::I64_GE_S,
            (ValType::I64, BinOp::Ge, true) => op::I64_GE_U,
            (ValType::F32, BinOp::Eq, _) => op::F32_EQ,
            (ValType::F32, BinOp::Ne, _) => op::F32_NE,
            (ValType::F32, BinOp::Lt, _) => op::F32_LT,
            (ValType::F32, BinOp::Le, _) => op::F32_LE,
            (ValType::F32, BinOp::Gt, _) => op::F32_GT,
            (ValType::F32, BinOp::Ge, _) => op::F32_GE,
            (ValType::F64, BinOp::Eq, _) => op::F64_EQ,
            (ValType::F64, BinOp::Ne, _) => op::F64_NE,
            (ValType::F64, BinOp::Lt, _) => op::F64_LT,
            (ValType::F64, BinOp::Le, _) => op::F64_LE,
            (ValType::F64, BinOp::Gt, _) => op::F64_GT,
            (ValType::F64, BinOp::Ge, _) => op::F64_GE,
            _ => {
                return Err(SccError::internal_error(
                    "invalid comparison/type combination in wasm lowering",
                ))
            }
        };
        self.code.push(opcode);
        Ok(())
    }

    fn gen_logical(&mut self, log_op: LogicalOp, lhs: &Expr, rhs: &Expr) -> SccResult<()> {
        self.gen_condition(lhs)?;
        self.code.push(op::IF);
        self.code.push(ValType::I32.byte());
        self.depth += 1;
        match log_op {
            LogicalOp::And => {
                self.gen_bool_value(rhs)?;
                self.code.push(op::ELSE);
                self.push_i32_const(0);
            }
            LogicalOp::Or => {
                self.push_i32_const(1);
                self.code.push(op::ELSE);
                self.gen_bool_value(rhs)?;
            }
        }
        self.code.push(op::END);
        self.depth -= 1;
        Ok(())
    }

    fn gen_call(&mut self, callee: &Expr, args: &[Box<Expr>]) -> SccResult<()> {
        // The parser wraps a direct callee in a decay cast; unwrap it.
        let target = match &callee.kind {
            ExprKind::Var(var) => Some(var),
            ExprKind::Cast { inner, .. } => match &inner.kind {
                ExprKind::Var(var) if self.program.scopes.var(var.scope, var.index).ty.is_func() => {
                    Some(var)
                }
                _ => None,
            },
            _ => None,
        };
        let Some(var) = target else {
            return self.unsupported("indirect function call");
        };
        let Some(index) = self.backend.func_index(&var.name) else {
            return Err(SccError::link_error(format!(
                "call to '{}' which is not reachable from any export",
                var.name
            )));
        };

        for arg in args {
            self.gen_expr(arg)?;
        }
        self.code.push(op::CALL);
        write_uleb128(&mut self.code, index as u64);
        Ok(())
    }

    /// Numeric conversion from `from` to `to`, applied to the stack top.
    fn gen_conversion(&mut self, from: &TypeRef, to: &TypeRef) -> SccResult<()> {
        if to.is_void() {
            if !from.is_void() {
                self.code.push(op::DROP);
            }
            return Ok(());
        }
        let from_vt = self.valtype(from)?;
        let to_vt = self.valtype(to)?;
        match (from_vt, to_vt) {
            (ValType::I32, ValType::I32) => self.narrow_if_needed(to),
            (ValType::I64, ValType::I64) => Ok(()),
            (ValType::I32, ValType::I64) => {
                let opcode = if from.is_unsigned() {
                    op::I64_EXTEND_I32_U
                } else {
                    op::I64_EXTEND_I32_S
                };
                self.code.push(opcode);
                Ok(())
            }
            (ValType::I64, ValType::I32) => {
                self.code.push(op::I32_WRAP_I64);
                self.narrow_if_needed(to)
            }
            (ValType::I32, ValType::F32) => {
                self.code.push(if from.is_unsigned() {
                    op::F32_CONVERT_I32_U
                } else {
                    op::F32_CONVERT_I32_S
                });
                Ok(())
            }
            (ValType::I32, ValType::F64) => {
                self.code.push(if from.is_unsigned() {
                    op::F64_CONVERT_I32_U
                } else {
                    op::F64_CONVERT_I32_S
                });
                Ok(())
            }
            (ValType::I64, ValType::F32) => {
                self.code.push(op::F32_CONVERT_I64_S);
                Ok(())
            }
            (ValType::I64, ValType::F64) => {
                self.code.push(op::F64_CONVERT_I64_S);
                Ok(())
            }
            (ValType::F32, ValType::I32) => {
                self.code.push(op::I32_TRUNC_F32_S);
                self.narrow_if_needed(to)
            }
            (ValType::F64, ValType::I32) => {
                self.code.push(op::I32_TRUNC_F64_S);
                self.narrow_if_needed(to)
            }
            (ValType::F32, ValType::I64) => {
                self.code.push(op::I64_TRUNC_F32_S);
                Ok(())
            }
            (ValType::F64, ValType::I64) => {
                self.code.push(op::I64_TRUNC_F64_S);
                Ok(())
            }
            (ValType::F32, ValType::F64) => {
                self.code.push(op::F64_PROMOTE_F32);
                Ok(())
            }
            (ValType::F64, ValType::F32) => {
                self.code.push(op::F32_DEMOTE_F64);
                Ok(())
            }
            (ValType::F32, ValType::F32) | (ValType::F64, ValType::F64) => Ok(()),
        }
    }

    /// Re-normalize an i32 that holds a sub-int type (char, short) after
    /// a wrap or narrowing conversion.
    fn narrow_if_needed(&mut self, ty: &TypeRef) -> SccResult<()> {
        let size = self.backend.layout().size_of(ty);
        if size >= 4 || !ty.is_integer() {
            return Ok(());
        }
        let bits = 32 - (size as i32) * 8;
        if ty.is_unsigned() {
            let mask = (1i64 << (size * 8)) - 1;
            self.push_i32_const(mask as i32);
            self.code.push(op::I32_AND);
        } else {
            self.push_i32_const(bits);
            self.code.push(op::I32_SHL);
            self.push_i32_const(bits);
            self.code.push(op::I32_SHR_S);
        }
        Ok(())
    }

    // Statements

    fn gen_stmt(&mut self, stmt: &Stmt) -> SccResult<()> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.gen_expr(expr)?;
                if !expr.ty.is_void() {
                    self.code.push(op::DROP);
                }
                Ok(())
            }
            StmtKind::Block { stmts, .. } => {
                for s in stmts {
                    self.gen_stmt(s)?;
                }
                Ok(())
            }
            StmtKind::If { cond, then_branch, else_branch } => {
                self.gen_condition(cond)?;
                self.code.push(op::IF);
                self.code.push(op::BLOCK_VOID);
                self.depth += 1;
                self.gen_stmt(then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.code.push(op::ELSE);
                    self.gen_stmt(else_branch)?;
                }
                self.code.push(op::END);
                self.depth -= 1;
                Ok(())
            }
            StmtKind::While { cond, body } => {
                let exit = self.open_block(op::BLOCK);
                let header = self.open_block(op::LOOP);
                self.gen_condition(cond)?;
                self.code.push(op::I32_EQZ);
                self.br_if(exit);
                self.break_stack.push(exit);
                self.continue_stack.push(header);
                self.gen_stmt(body)?;
                self.continue_stack.pop();
                self.break_stack.pop();
                self.br(header);
                self.close_block();
                self.close_block();
                Ok(())
            }
            StmtKind::DoWhile { body, cond } => {
                let exit = self.open_block(op::BLOCK);
                let header = self.open_block(op::LOOP);
                let cont = self.open_block(op::BLOCK);
                self.break_stack.push(exit);
                self.continue_stack.push(cont);
                self.gen_stmt(body)?;
                self.continue_stack.pop();
                self.break_stack.pop();
                self.close_block();
                self.gen_condition(cond)?;
                self.br_if(header);
                self.close_block();
                self.close_block();
                Ok(())
            }
            StmtKind::For { pre, cond, post, body, .. } => {
                if let Some(pre) = pre {
                    self.gen_stmt(pre)?;
                }
                let exit = self.open_block(op::BLOCK);
                let header = self.open_block(op::LOOP);
                if let Some(cond) = cond {
                    self.gen_condition(cond)?;
                    self.code.push(op::I32_EQZ);
                    self.br_if(exit);
                }
                let cont = self.open_block(op::BLOCK);
                self.break_stack.push(exit);
                self.continue_stack.push(cont);
                self.gen_stmt(body)?;
                self.continue_stack.pop();
                self.break_stack.pop();
                self.close_block();
                if let Some(post) = post {
                    self.gen_expr(post)?;
                    if !post.ty.is_void() {
                        self.code.push(op::DROP);
                    }
                }
                self.br(header);
                self.close_block();
                self.close_block();
                Ok(())
            }
            StmtKind::Switch { value, body, cases, has_default } => {
                self.gen_switch(value, body, cases, *has_default)
            }
            StmtKind::Break => {
                let level = *self
                    .break_stack
                    .last()
                    .ok_or_else(|| SccError::internal_error("break outside loop or switch"))?;
                self.br(level);
                Ok(())
            }
            StmtKind::Continue => {
                let level = *self
                    .continue_stack
                    .last()
                    .ok_or_else(|| SccError::internal_error("continue outside loop"))?;
                self.br(level);
                Ok(())
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.gen_expr(value)?;
                    let ret_local = self
                        .ret_local
                        .ok_or_else(|| SccError::internal_error("return value in void function"))?;
                    self.code.push(op::LOCAL_SET);
                    write_uleb128(&mut self.code, ret_local as u64);
                }
                // Branch out of the function's outermost block.
                self.br(0);
                Ok(())
            }
            StmtKind::VarDecl(items) => {
                for item in items {
                    let Some(init) = &item.init else { continue };
                    let Initializer::Single(expr) = init else {
                        return self.unsupported("aggregate initializer");
                    };
                    let Some(local) = self.local_of(&item.var) else {
                        return self.unsupported("initializer for a non-local");
                    };
                    self.gen_expr(expr)?;
                    self.code.push(op::LOCAL_SET);
                    write_uleb128(&mut self.code, local as u64);
                }
                Ok(())
            }
            StmtKind::Case { .. } | StmtKind::Default { .. } => {
                // Reached only when nested below the switch body's top
                // level, which the segmented lowering cannot express.
                self.unsupported("a case label nested inside another statement")
            }
            StmtKind::Goto(_) | StmtKind::Label { .. } => self.unsupported("goto"),
            StmtKind::Asm(_) => self.unsupported("inline assembly"),
            StmtKind::Empty => Ok(()),
        }
    }

    /// Switch lowering: one nested block per entry point plus an exit
    /// block. The dispatch chain branches into the block whose end marks
    /// the entry's segment; fallthrough between segments is the natural
    /// instruction order.
    fn gen_switch(
        &mut self,
        value: &Expr,
        body: &Stmt,
        _cases: &[i64],
        has_default: bool,
    ) -> SccResult<()> {
        let tmp = self
            .switch_tmp
            .ok_or_else(|| SccError::internal_error("switch without scratch local"))?;
        let segments = segment_switch_body(body)?;

        self.gen_expr(value)?;
        if self.valtype(&value.ty)? == ValType::I64 {
            self.code.push(op::I32_WRAP_I64);
        }
        self.code.push(op::LOCAL_SET);
        write_uleb128(&mut self.code, tmp as u64);

        let exit = self.open_block(op::BLOCK);
        let mut levels = vec![0u32; segments.len()];
        for i in (0..segments.len()).rev() {
            levels[i] = self.open_block(op::BLOCK);
        }

        // Dispatch chain.
        let mut default_level = if has_default { None } else { Some(exit) };
        for (i, segment) in segments.iter().enumerate() {
            for entry in &segment.entries {
                match entry {
                    SwitchEntry::Case(case_value) => {
                        self.code.push(op::LOCAL_GET);
                        write_uleb128(&mut self.code, tmp as u64);
                        self.push_i32_const(*case_value as i32);
                        self.code.push(op::I32_EQ);
                        self.br_if(levels[i]);
                    }
                    SwitchEntry::Default => default_level = Some(levels[i]),
                }
            }
        }
        let default_level = default_level.unwrap_or(exit);
        self.br(default_level);

        // Segments in source order; each block's end is the entry point.
        self.break_stack.push(exit);
        for segment in &segments {
            self.close_block();
            for s in &segment.stmts {
                self.gen_stmt(s)?;
            }
        }
        self.break_stack.pop();
        self.close_block();
        Ok(())
    }
}

/// Entry points into a switch segment
enum SwitchEntry {
    Case(i64),
    Default,
}

struct Segment<'a> {
    entries: Vec<SwitchEntry>,
    stmts: Vec<&'a Stmt>,
}

/// Partition a switch body into fallthrough segments led by case/default
/// labels. Labels must sit at the top level of the body block.
fn segment_switch_body(body: &Stmt) -> SccResult<Vec<Segment<'_>>> {
    let StmtKind::Block { stmts, .. } = &body.kind else {
        return Err(SccError::codegen_error(
            "the WebAssembly target requires a braced switch body",
        ));
    };

    let mut segments: Vec<Segment<'_>> = Vec::new();
    for stmt in stmts {
        let mut entries = Vec::new();
        let mut inner = stmt;
        loop {
            match &inner.kind {
                StmtKind::Case { value, body } => {
                    entries.push(SwitchEntry::Case(*value));
                    inner = body;
                }
                StmtKind::Default { body } => {
                    entries.push(SwitchEntry::Default);
                    inner = body;
                }
                _ => break,
            }
        }
        if !entries.is_empty() {
            segments.push(Segment { entries, stmts: vec![inner] });
        } else if let Some(current) = segments.last_mut() {
            current.stmts.push(stmt);
        }
        // Statements before the first label are unreachable and dropped.
    }
    Ok(segments)
}

/// Locals declared anywhere in the body, in declaration order.
fn collect_locals(stmt: &Stmt, out: &mut Vec<(ScopeId, usize)>) {
    match &stmt.kind {
        StmtKind::Expr(e) => collect_locals_expr(e, out),
        StmtKind::Block { stmts, .. } => {
            for s in stmts {
                collect_locals(s, out);
            }
        }
        StmtKind::If { cond, then_branch, else_branch } => {
            collect_locals_expr(cond, out);
            collect_locals(then_branch, out);
            if let Some(e) = else_branch {
                collect_locals(e, out);
            }
        }
        StmtKind::Switch { value, body, .. } => {
            collect_locals_expr(value, out);
            collect_locals(body, out);
        }
        StmtKind::While { cond, body } => {
            collect_locals_expr(cond, out);
            collect_locals(body, out);
        }
        StmtKind::DoWhile { body, cond } => {
            collect_locals(body, out);
            collect_locals_expr(cond, out);
        }
        StmtKind::For { pre, cond, post, body, .. } => {
            if let Some(pre) = pre {
                collect_locals(pre, out);
            }
            if let Some(cond) = cond {
                collect_locals_expr(cond, out);
            }
            if let Some(post) = post {
                collect_locals_expr(post, out);
            }
            collect_locals(body, out);
        }
        StmtKind::Return(Some(e)) => collect_locals_expr(e, out),
        StmtKind::Case { body, .. } | StmtKind::Default { body } | StmtKind::Label { body, .. } => {
            collect_locals(body, out);
        }
        StmtKind::VarDecl(items) => {
            for item in items {
                out.push((item.var.scope, item.var.index));
                if let Some(Initializer::Single(e)) = &item.init {
                    collect_locals_expr(e, out);
                }
            }
        }
        _ => {}
    }
}

fn collect_locals_expr(expr: &Expr, out: &mut Vec<(ScopeId, usize)>) {
    match &expr.kind {
        ExprKind::CompoundLit { var, init } => {
            out.push((var.scope, var.index));
            if let Initializer::Single(e) = init.as_ref() {
                collect_locals_expr(e, out);
            }
        }
        ExprKind::Member { base, .. } => collect_locals_expr(base, out),
        ExprKind::Deref(e)
        | ExprKind::Addr(e)
        | ExprKind::Unary { operand: e, .. }
        | ExprKind::Cast { inner: e, .. }
        | ExprKind::IncDec { target: e, .. } => collect_locals_expr(e, out),
        ExprKind::Binary { lhs, rhs, .. }
        | ExprKind::Logical { lhs, rhs, .. }
        | ExprKind::Assign { lhs, rhs }
        | ExprKind::CompoundAssign { lhs, rhs, .. }
        | ExprKind::Comma { lhs, rhs } => {
            collect_locals_expr(lhs, out);
            collect_locals_expr(rhs, out);
        }
        ExprKind::Call { callee, args } => {
            collect_locals_expr(callee, out);
            for arg in args {
                collect_locals_expr(arg, out);
            }
        }
        ExprKind::Ternary { cond, then_expr, else_expr } => {
            collect_locals_expr(cond, out);
            collect_locals_expr(then_expr, out);
            collect_locals_expr(else_expr, out);
        }
        _ => {}
    }
}

/// Whether any switch statement occurs in the body.
fn contains_switch(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Switch { .. } => true,
        StmtKind::Block { stmts, .. } => stmts.iter().any(contains_switch),
        StmtKind::If { then_branch, else_branch, .. } => {
            contains_switch(then_branch)
                || else_branch.as_ref().map(|e| contains_switch(e)).unwrap_or(false)
        }
        StmtKind::While { body, .. }
        | StmtKind::DoWhile { body, .. }
        | StmtKind::For { body, .. }
        | StmtKind::Case { body, .. }
        | StmtKind::Default { body }
        | StmtKind::Label { body, .. } => contains_switch(body),
        _ => false,
    }
}
