//! AST to IR lowering for the native backend
//!
//! One function at a time, top-down over statements. A cursor tracks the
//! current append block; new blocks open at branch targets, after
//! unconditional branches, and at labels. Scalar locals whose address is
//! never taken live in vregs; everything else gets a frame slot.

use crate::ir::{
    BasicBlock, CallTarget, Cond, Ir, IrBinOp, IrFunction, IrUnOp, Konst, Label, VRegFlags,
    VRegId, VType,
};
use hashbrown::{HashMap, HashSet};
use log::trace;
use scc_common::{SccError, SccResult};
use scc_parser::{
    BinOp, Expr, ExprKind, Function, IncDecOp, Initializer, LogicalOp, Program, ScopeId, Stmt,
    StmtKind, StorageClass, UnOp, VarRef,
};
use scc_types::{TargetLayout, Type, TypeRef};

/// Number of integer argument registers in the System-V ABI.
pub const INT_ARG_REG_COUNT: usize = 6;
/// Number of floating-point argument registers.
pub const FLOAT_ARG_REG_COUNT: usize = 8;

/// Label used for string-pool entries, shared with the emitter.
pub fn string_label(index: usize) -> String {
    format!(".Lstr{}", index)
}

/// Where a local variable lives
#[derive(Debug, Clone)]
enum Slot {
    /// In a virtual register.
    Reg(VRegId),
    /// At a frame offset (negative: local area; positive: stack params).
    Frame(i32),
    /// Behind a label (globals, statics, externs).
    Static(String),
}

struct SwitchFrame {
    case_labels: HashMap<i64, Label>,
    default_label: Label,
}

/// Lowers one function body into basic blocks of IR
pub struct IrBuilder<'a> {
    program: &'a Program,
    layout: TargetLayout,
    func: IrFunction,
    cur: usize,
    next_label: Label,
    slots: HashMap<(ScopeId, usize), Slot>,
    addr_taken: HashSet<(ScopeId, usize)>,
    break_stack: Vec<Label>,
    continue_stack: Vec<Label>,
    switch_stack: Vec<SwitchFrame>,
    named_labels: HashMap<String, Label>,
    /// Hidden struct-return pointer, when the function returns a record.
    sret: Option<VRegId>,
}

impl<'a> IrBuilder<'a> {
    /// Lower `func` into an `IrFunction` ready for register allocation.
    pub fn build(
        program: &'a Program,
        layout: TargetLayout,
        func: &Function,
    ) -> SccResult<IrFunction> {
        let body = func
            .body
            .as_ref()
            .ok_or_else(|| SccError::internal_error("cannot lower a function without a body"))?;

        let mut builder = IrBuilder {
            program,
            layout,
            func: IrFunction::new(func.name.clone(), func.is_static),
            cur: 0,
            next_label: 0,
            slots: HashMap::new(),
            addr_taken: HashSet::new(),
            break_stack: Vec::new(),
            continue_stack: Vec::new(),
            switch_stack: Vec::new(),
            named_labels: HashMap::new(),
            sret: None,
        };

        let entry = builder.new_label();
        builder.func.blocks.push(BasicBlock::new(entry));

        builder.find_address_taken(body);
        builder.lower_params(func)?;
        builder.gen_stmt(body)?;

        // A body that falls off the end returns nothing.
        if !builder.block_terminated() {
            builder.emit(Ir::Ret { value: None });
        }

        trace!(
            "lowered '{}': {} blocks, {} vregs",
            func.name,
            builder.func.blocks.len(),
            builder.func.vregs.len()
        );
        Ok(builder.func)
    }

    // Block management

    fn new_label(&mut self) -> Label {
        let label = self.next_label;
        self.next_label += 1;
        label
    }

    fn block_terminated(&self) -> bool {
        self.func.blocks[self.cur].irs.last().map(Ir::is_terminator).unwrap_or(false)
    }

    /// Open a new block with `label`; the previous block falls through
    /// explicitly.
    fn start_block(&mut self, label: Label) {
        if !self.block_terminated() {
            self.emit(Ir::Jmp { target: label });
        }
        self.func.blocks.push(BasicBlock::new(label));
        self.cur = self.func.blocks.len() - 1;
    }

    fn emit(&mut self, ir: Ir) {
        self.func.blocks[self.cur].irs.push(ir);
    }

    // Types

    fn vtype_of(&self, ty: &TypeRef) -> VType {
        if ty.is_flonum() {
            VType::flonum(self.layout.size_of(ty) as u8)
        } else if ty.is_scalar() || ty.is_func() {
            VType::int(self.layout.size_of(ty).clamp(1, 8) as u8, ty.is_unsigned())
        } else {
            // Aggregates are handled through address vregs.
            VType::int(self.layout.pointer_bytes as u8, false)
        }
    }

    fn ptr_vtype(&self) -> VType {
        VType::int(self.layout.pointer_bytes as u8, false)
    }

    fn const_int(&mut self, value: i64, vtype: VType) -> VRegId {
        self.func.vregs.alloc_const(Konst::Int(value), vtype)
    }

    /// Zero constant matching a value type's register file.
    fn zero_const(&mut self, vtype: VType) -> VRegId {
        if vtype.is_flonum() {
            self.func.vregs.alloc_const(Konst::Float(0.0), vtype)
        } else {
            self.const_int(0, vtype)
        }
    }

    // Parameters and locals

    fn lower_params(&mut self, func: &Function) -> SccResult<()> {
        let sig = func
            .ty
            .as_func()
            .cloned()
            .ok_or_else(|| SccError::internal_error("function without function type"))?;

        let mut int_idx = 0usize;
        let mut float_idx = 0usize;
        let mut stack_idx = 0usize;

        if sig.ret.is_struct() {
            // Hidden pointer to the caller's return temporary.
            let vreg = self.func.vregs.alloc(self.ptr_vtype());
            let reg = self.func.vregs.get_mut(vreg);
            reg.flags |= VRegFlags::PARAM;
            reg.param_index = Some(0);
            int_idx = 1;
            self.sret = Some(vreg);
        }

        for var in &func.params {
            let info = self.program.scopes.var(var.scope, var.index);
            if info.ty.is_struct() {
                return Err(SccError::codegen_error(format!(
                    "passing a struct by value is not supported (parameter '{}')",
                    var.name
                )));
            }
            let vtype = self.vtype_of(&info.ty);
            let is_float = vtype.is_flonum();
            let reg_index = if is_float { &mut float_idx } else { &mut int_idx };
            let reg_limit = if is_float { FLOAT_ARG_REG_COUNT } else { INT_ARG_REG_COUNT };

            if *reg_index < reg_limit {
                let vreg = self.func.vregs.alloc(vtype);
                let reg = self.func.vregs.get_mut(vreg);
                reg.flags |= VRegFlags::PARAM;
                reg.param_index = Some(*reg_index as u8);
                *reg_index += 1;

                if self.addr_taken.contains(&(var.scope, var.index)) {
                    // Give it a home in memory and copy on entry.
                    let size = self.layout.size_of(&info.ty);
                    let align = self.layout.align_of(&info.ty);
                    let offset = self.func.alloc_frame_slot(size, align);
                    let addr = self.func.vregs.alloc(self.ptr_vtype());
                    self.emit(Ir::FrameAddr { dst: addr, offset });
                    self.emit(Ir::Store { addr, src: vreg });
                    self.slots.insert((var.scope, var.index), Slot::Frame(offset));
                } else {
                    self.slots.insert((var.scope, var.index), Slot::Reg(vreg));
                }
            } else {
                // Spilled to the caller's frame: above the saved base
                // pointer and return address.
                let offset = 16 + 8 * stack_idx as i32;
                stack_idx += 1;
                self.slots.insert((var.scope, var.index), Slot::Frame(offset));
            }
        }
        Ok(())
    }

    /// Slot for a variable, created on first sight for locals.
    fn slot_of(&mut self, var: &VarRef) -> Slot {
        if let Some(slot) = self.slots.get(&(var.scope, var.index)) {
            return slot.clone();
        }
        let info = self.program.scopes.var(var.scope, var.index);
        let slot = match (&info.storage, &info.label) {
            (StorageClass::Static, Some(label)) | (StorageClass::Extern, Some(label)) => {
                Slot::Static(label.clone())
            }
            (StorageClass::Extern, None) | (StorageClass::Static, None) => {
                Slot::Static(info.name.clone())
            }
            _ => {
                let scalar = info.ty.is_scalar();
                let taken = self.addr_taken.contains(&(var.scope, var.index));
                if scalar && !taken {
                    let vreg = self.func.vregs.alloc(self.vtype_of(&info.ty));
                    Slot::Reg(vreg)
                } else {
                    let size = self.layout.size_of(&info.ty).max(1);
                    let align = self.layout.align_of(&info.ty);
                    Slot::Frame(self.func.alloc_frame_slot(size, align))
                }
            }
        };
        self.slots.insert((var.scope, var.index), slot.clone());
        slot
    }

    // Address-taken analysis

    fn find_address_taken(&mut self, stmt: &Stmt) {
        let mut found = HashSet::new();
        scan_stmt_for_addr(stmt, &mut found);
        self.addr_taken = found;
    }

    // Expressions

    /// Lower an expression to a value vreg. Aggregate-typed expressions
    /// produce the address of their storage.
    fn gen_expr(&mut self, expr: &Expr) -> SccResult<Option<VRegId>> {
        match &expr.kind {
            ExprKind::IntLit(v) => {
                let vtype = self.vtype_of(&expr.ty);
                Ok(Some(self.const_int(*v, vtype)))
            }
            ExprKind::FloatLit(v) => {
                let vtype = self.vtype_of(&expr.ty);
                Ok(Some(self.func.vregs.alloc_const(Konst::Float(*v), vtype)))
            }
            ExprKind::StrLit(index) => {
                let dst = self.func.vregs.alloc(self.ptr_vtype());
                self.emit(Ir::LabelAddr { dst, label: string_label(*index) });
                Ok(Some(dst))
            }
            ExprKind::Var(var) => self.gen_var_value(var, &expr.ty),
            ExprKind::Member { .. } | ExprKind::Deref(_) => {
                if is_aggregate(&expr.ty) {
                    return Ok(Some(self.gen_addr(expr)?));
                }
                let addr = self.gen_addr(expr)?;
                if let ExprKind::Member { member, .. } = &expr.kind {
                    if let Some(bf) = member.bitfield {
                        let vtype = self.vtype_of(&expr.ty);
                        return Ok(Some(self.bitfield_read(addr, vtype, bf)));
                    }
                }
                let dst = self.func.vregs.alloc(self.vtype_of(&expr.ty));
                self.emit(Ir::Load { dst, addr });
                Ok(Some(dst))
            }
            ExprKind::Addr(inner) => Ok(Some(self.gen_addr(inner)?)),
            ExprKind::Unary { op, operand } => self.gen_unary(*op, operand).map(Some),
            ExprKind::Binary { op, lhs, rhs } => self.gen_binary_expr(*op, lhs, rhs).map(Some),
            ExprKind::Logical { .. } => self.gen_logical_value(expr).map(Some),
            ExprKind::Assign { lhs, rhs } => self.gen_assign(lhs, rhs),
            ExprKind::CompoundAssign { op, lhs, rhs } => {
                self.gen_compound_assign(*op, lhs, rhs).map(Some)
            }
            ExprKind::IncDec { op, target } => self.gen_incdec(*op, target).map(Some),
            ExprKind::Call { callee, args } => self.gen_call(expr, callee, args),
            ExprKind::Cast { inner, .. } => self.gen_cast(expr, inner),
            ExprKind::Ternary { cond, then_expr, else_expr } => {
                self.gen_ternary(expr, cond, then_expr, else_expr)
            }
            ExprKind::Comma { lhs, rhs } => {
                self.gen_expr(lhs)?;
                self.gen_expr(rhs)
            }
            ExprKind::CompoundLit { var, init } => {
                let slot = self.slot_of(var);
                self.gen_local_init(&slot, &self.var_type(var), init)?;
                let var_expr = Expr::new(ExprKind::Var(var.clone()), expr.ty.clone(), expr.span);
                self.gen_expr(&var_expr)
            }
        }
    }

    fn var_type(&self, var: &VarRef) -> TypeRef {
        self.program.scopes.var(var.scope, var.index).ty.clone()
    }

    fn gen_var_value(&mut self, var: &VarRef, ty: &TypeRef) -> SccResult<Option<VRegId>> {
        let slot = self.slot_of(var);
        match slot {
            Slot::Reg(vreg) => Ok(Some(vreg)),
            Slot::Frame(offset) => {
                let addr = self.func.vregs.alloc(self.ptr_vtype());
                self.emit(Ir::FrameAddr { dst: addr, offset });
                if is_aggregate(ty) || ty.is_func() {
                    return Ok(Some(addr));
                }
                let dst = self.func.vregs.alloc(self.vtype_of(ty));
                self.emit(Ir::Load { dst, addr });
                Ok(Some(dst))
            }
            Slot::Static(label) => {
                let addr = self.func.vregs.alloc(self.ptr_vtype());
                self.emit(Ir::LabelAddr { dst: addr, label });
                if is_aggregate(ty) || ty.is_func() {
                    return Ok(Some(addr));
                }
                let dst = self.func.vregs.alloc(self.vtype_of(ty));
                self.emit(Ir::Load { dst, addr });
                Ok(Some(dst))
            }
        }
    }

    /// Lower an lvalue (or aggregate value) to the vreg holding its
    /// address.
    fn gen_addr(&mut self, expr: &Expr) -> SccResult<VRegId> {
        match &expr.kind {
            ExprKind::Var(var) => {
                let slot = self.slot_of(var);
                match slot {
                    Slot::Frame(offset) => {
                        let dst = self.func.vregs.alloc(self.ptr_vtype());
                        self.emit(Ir::FrameAddr { dst, offset });
                        Ok(dst)
                    }
                    Slot::Static(label) => {
                        let dst = self.func.vregs.alloc(self.ptr_vtype());
                        self.emit(Ir::LabelAddr { dst, label });
                        Ok(dst)
                    }
                    Slot::Reg(_) => Err(SccError::internal_error(format!(
                        "address taken of register variable '{}'",
                        var.name
                    ))),
                }
            }
            ExprKind::Deref(inner) => self
                .gen_expr(inner)?
                .ok_or_else(|| SccError::internal_error("dereference of void value")),
            ExprKind::Member { base, member } => {
                let base_addr = self.gen_addr(base)?;
                if member.offset == 0 {
                    return Ok(base_addr);
                }
                let off = self.const_int(member.offset as i64, self.ptr_vtype());
                let dst = self.func.vregs.alloc(self.ptr_vtype());
                self.emit(Ir::Bin { op: IrBinOp::Add, dst, lhs: base_addr, rhs: off });
                Ok(dst)
            }
            ExprKind::StrLit(index) => {
                let dst = self.func.vregs.alloc(self.ptr_vtype());
                self.emit(Ir::LabelAddr { dst, label: string_label(*index) });
                Ok(dst)
            }
            ExprKind::CompoundLit { .. } | ExprKind::Call { .. } => {
                // Aggregate temporaries evaluate to their address.
                self.gen_expr(expr)?
                    .ok_or_else(|| SccError::internal_error("aggregate value without storage"))
            }
            ExprKind::Cast { inner, .. } => self.gen_addr(inner),
            other => Err(SccError::internal_error(format!(
                "expression is not addressable: {:?}",
                std::mem::discriminant(other)
            ))),
        }
    }

    fn gen_unary(&mut self, op: UnOp, operand: &Expr) -> SccResult<VRegId> {
        match op {
            UnOp::Not => {
                let value = self.require_value(operand)?;
                let vtype = self.func.vregs.get(value).vtype;
                let zero = self.zero_const(vtype);
                self.emit(Ir::Cmp { lhs: value, rhs: zero });
                let dst = self.func.vregs.alloc(VType::int(4, false));
                self.emit(Ir::SetCond { cond: Cond::Eq, dst });
                Ok(dst)
            }
            UnOp::Neg | UnOp::BitNot => {
                let src = self.require_value(operand)?;
                let dst = self.func.vregs.alloc(self.func.vregs.get(src).vtype);
                let ir_op = if op == UnOp::Neg { IrUnOp::Neg } else { IrUnOp::BitNot };
                self.emit(Ir::Un { op: ir_op, dst, src });
                Ok(dst)
            }
        }
    }

    fn gen_binary_expr(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> SccResult<VRegId> {
        if op.is_comparison() {
            let cond = compare_cond(op, &lhs.ty);
            let l = self.require_value(lhs)?;
            let r = self.require_value(rhs)?;
            self.emit(Ir::Cmp { lhs: l, rhs: r });
            let dst = self.func.vregs.alloc(VType::int(4, false));
            self.emit(Ir::SetCond { cond, dst });
            return Ok(dst);
        }

        let ir_op = match op {
            BinOp::Add => IrBinOp::Add,
            BinOp::Sub => IrBinOp::Sub,
            BinOp::Mul => IrBinOp::Mul,
            BinOp::Div => IrBinOp::Div,
            BinOp::Mod => IrBinOp::Mod,
            BinOp::BitAnd => IrBinOp::BitAnd,
            BinOp::BitOr => IrBinOp::BitOr,
            BinOp::BitXor => IrBinOp::BitXor,
            BinOp::Shl => IrBinOp::Shl,
            BinOp::Shr => IrBinOp::Shr,
            _ => return Err(SccError::internal_error("comparison handled above")),
        };
        let l = self.require_value(lhs)?;
        let r = self.require_value(rhs)?;
        let dst = self.func.vregs.alloc(self.func.vregs.get(l).vtype);
        self.emit(Ir::Bin { op: ir_op, dst, lhs: l, rhs: r });
        Ok(dst)
    }

    /// `&&`/`||` in value position: a branch diamond writing 0/1.
    fn gen_logical_value(&mut self, expr: &Expr) -> SccResult<VRegId> {
        let true_label = self.new_label();
        let false_label = self.new_label();
        let join_label = self.new_label();
        let dst = self.func.vregs.alloc(VType::int(4, false));

        self.gen_cond(expr, true_label, false_label)?;

        self.start_block(true_label);
        let one = self.const_int(1, VType::int(4, false));
        self.emit(Ir::Mov { dst, src: one });
        self.emit(Ir::Jmp { target: join_label });

        self.start_block(false_label);
        let zero = self.const_int(0, VType::int(4, false));
        self.emit(Ir::Mov { dst, src: zero });

        self.start_block(join_label);
        Ok(dst)
    }

    fn gen_assign(&mut self, lhs: &Expr, rhs: &Expr) -> SccResult<Option<VRegId>> {
        // Struct assignment copies storage.
        if is_aggregate(&lhs.ty) {
            let dst_addr = self.gen_addr(lhs)?;
            let src_addr = self.require_value(rhs)?;
            let size = self.layout.size_of(&lhs.ty);
            self.gen_mem_copy(dst_addr, src_addr, size);
            return Ok(Some(dst_addr));
        }

        if let ExprKind::Member { member, .. } = &lhs.kind {
            if let Some(bf) = member.bitfield {
                let value = self.require_value(rhs)?;
                let addr = self.gen_addr(lhs)?;
                let vtype = self.vtype_of(&lhs.ty);
                self.bitfield_write(addr, vtype, bf, value);
                return Ok(Some(value));
            }
        }

        let value = self.require_value(rhs)?;
        match &lhs.kind {
            ExprKind::Var(var) => match self.slot_of(var) {
                Slot::Reg(dst) => {
                    self.emit(Ir::Mov { dst, src: value });
                    Ok(Some(dst))
                }
                _ => {
                    let addr = self.gen_addr(lhs)?;
                    self.emit(Ir::Store { addr, src: value });
                    Ok(Some(value))
                }
            },
            _ => {
                let addr = self.gen_addr(lhs)?;
                self.emit(Ir::Store { addr, src: value });
                Ok(Some(value))
            }
        }
    }

    fn gen_compound_assign(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> SccResult<VRegId> {
        let ir_op = match op {
            BinOp::Add => IrBinOp::Add,
            BinOp::Sub => IrBinOp::Sub,
            BinOp::Mul => IrBinOp::Mul,
            BinOp::Div => IrBinOp::Div,
            BinOp::Mod => IrBinOp::Mod,
            BinOp::BitAnd => IrBinOp::BitAnd,
            BinOp::BitOr => IrBinOp::BitOr,
            BinOp::BitXor => IrBinOp::BitXor,
            BinOp::Shl => IrBinOp::Shl,
            BinOp::Shr => IrBinOp::Shr,
            _ => return Err(SccError::internal_error("invalid compound assignment")),
        };
        let rhs_value = self.require_value(rhs)?;

        if let ExprKind::Member { member, .. } = &lhs.kind {
            if let Some(bf) = member.bitfield {
                let addr = self.gen_addr(lhs)?;
                let vtype = self.vtype_of(&lhs.ty);
                let old = self.bitfield_read(addr, vtype, bf);
                let dst = self.func.vregs.alloc(vtype);
                self.emit(Ir::Bin { op: ir_op, dst, lhs: old, rhs: rhs_value });
                self.bitfield_write(addr, vtype, bf, dst);
                return Ok(dst);
            }
        }

        match &lhs.kind {
            ExprKind::Var(var) => {
                if let Slot::Reg(dst) = self.slot_of(var) {
                    self.emit(Ir::Bin { op: ir_op, dst, lhs: dst, rhs: rhs_value });
                    return Ok(dst);
                }
                let addr = self.gen_addr(lhs)?;
                self.rmw(ir_op, addr, rhs_value, lhs)
            }
            _ => {
                // Compute the address once, then load-combine-store.
                let addr = self.gen_addr(lhs)?;
                self.rmw(ir_op, addr, rhs_value, lhs)
            }
        }
    }

    /// Read-modify-write through an address vreg.
    fn rmw(&mut self, op: IrBinOp, addr: VRegId, rhs: VRegId, lhs: &Expr) -> SccResult<VRegId> {
        let loaded = self.func.vregs.alloc(self.vtype_of(&lhs.ty));
        self.emit(Ir::Load { dst: loaded, addr });
        let dst = self.func.vregs.alloc(self.vtype_of(&lhs.ty));
        self.emit(Ir::Bin { op, dst, lhs: loaded, rhs });
        self.emit(Ir::Store { addr, src: dst });
        Ok(dst)
    }

    fn gen_incdec(&mut self, op: IncDecOp, target: &Expr) -> SccResult<VRegId> {
        // Pointer steps scale by the pointee size.
        let step = match target.ty.pointee() {
            Some(pointee) => self.layout.size_of(pointee).max(1) as i64,
            None => 1,
        };
        let vtype = self.vtype_of(&target.ty);
        let step_reg = if vtype.is_flonum() {
            self.func.vregs.alloc_const(Konst::Float(step as f64), vtype)
        } else {
            self.const_int(step, vtype)
        };
        let ir_op = match op {
            IncDecOp::PreInc | IncDecOp::PostInc => IrBinOp::Add,
            IncDecOp::PreDec | IncDecOp::PostDec => IrBinOp::Sub,
        };
        let is_post = matches!(op, IncDecOp::PostInc | IncDecOp::PostDec);

        if let ExprKind::Var(var) = &target.kind {
            if let Slot::Reg(reg) = self.slot_of(var) {
                let result = if is_post {
                    let old = self.func.vregs.alloc(vtype);
                    self.emit(Ir::Mov { dst: old, src: reg });
                    old
                } else {
                    reg
                };
                self.emit(Ir::Bin { op: ir_op, dst: reg, lhs: reg, rhs: step_reg });
                return Ok(result);
            }
        }

        if let ExprKind::Member { member, .. } = &target.kind {
            if let Some(bf) = member.bitfield {
                let addr = self.gen_addr(target)?;
                let old = self.bitfield_read(addr, vtype, bf);
                let updated = self.func.vregs.alloc(vtype);
                self.emit(Ir::Bin { op: ir_op, dst: updated, lhs: old, rhs: step_reg });
                self.bitfield_write(addr, vtype, bf, updated);
                return Ok(if is_post { old } else { updated });
            }
        }

        let addr = self.gen_addr(target)?;
        let old = self.func.vregs.alloc(vtype);
        self.emit(Ir::Load { dst: old, addr });
        let updated = self.func.vregs.alloc(vtype);
        self.emit(Ir::Bin { op: ir_op, dst: updated, lhs: old, rhs: step_reg });
        self.emit(Ir::Store { addr, src: updated });
        Ok(if is_post { old } else { updated })
    }

    fn gen_cast(&mut self, expr: &Expr, inner: &Expr) -> SccResult<Option<VRegId>> {
        let Some(src) = self.gen_expr(inner)? else {
            return Ok(None);
        };
        // Array/function decay and pointer-to-pointer casts are free.
        let src_vt = self.func.vregs.get(src).vtype;
        let dst_vt = self.vtype_of(&expr.ty);
        if expr.ty.is_void() {
            return Ok(None);
        }
        if src_vt == dst_vt || inner.ty.is_array() || inner.ty.is_func() {
            return Ok(Some(src));
        }
        let dst = self.func.vregs.alloc(dst_vt);
        self.emit(Ir::Cast { dst, src });
        Ok(Some(dst))
    }

    fn gen_ternary(
        &mut self,
        expr: &Expr,
        cond: &Expr,
        then_expr: &Expr,
        else_expr: &Expr,
    ) -> SccResult<Option<VRegId>> {
        let then_label = self.new_label();
        let else_label = self.new_label();
        let join_label = self.new_label();
        let dst = if expr.ty.is_void() {
            None
        } else {
            Some(self.func.vregs.alloc(self.vtype_of(&expr.ty)))
        };

        self.gen_cond(cond, then_label, else_label)?;

        self.start_block(then_label);
        let v = self.gen_expr(then_expr)?;
        if let (Some(dst), Some(v)) = (dst, v) {
            self.emit(Ir::Mov { dst, src: v });
        }
        self.emit(Ir::Jmp { target: join_label });

        self.start_block(else_label);
        let v = self.gen_expr(else_expr)?;
        if let (Some(dst), Some(v)) = (dst, v) {
            self.emit(Ir::Mov { dst, src: v });
        }

        self.start_block(join_label);
        Ok(dst)
    }

    // Calls

    fn gen_call(
        &mut self,
        expr: &Expr,
        callee: &Expr,
        args: &[Box<Expr>],
    ) -> SccResult<Option<VRegId>> {
        self.func.has_calls = true;

        // Struct results go to a caller-allocated temporary through a
        // hidden first argument.
        let sret_slot = if expr.ty.is_struct() {
            let size = self.layout.size_of(&expr.ty).max(1);
            let align = self.layout.align_of(&expr.ty);
            Some(self.func.alloc_frame_slot(size, align))
        } else {
            None
        };

        // Funarg simplification: any argument whose evaluation could
        // clobber argument registers is hoisted into a frame temporary
        // before marshalling starts.
        let mut hoisted: Vec<Option<i32>> = Vec::with_capacity(args.len());
        for arg in args {
            if needs_funarg_hoist(arg) {
                let size = self.layout.size_of(&arg.ty).max(1);
                let align = self.layout.align_of(&arg.ty).max(1);
                let offset = self.func.alloc_frame_slot(size.max(8), align.max(8));
                let value = self.require_value(arg)?;
                let addr = self.func.vregs.alloc(self.ptr_vtype());
                self.emit(Ir::FrameAddr { dst: addr, offset });
                self.emit(Ir::Store { addr, src: value });
                hoisted.push(Some(offset));
            } else {
                hoisted.push(None);
            }
        }

        // The callee itself may contain calls; evaluate before marshalling
        // unless it is a plain symbol.
        let target = match &callee.kind {
            ExprKind::Var(var) if self.var_type(var).is_func() => {
                CallTarget::Direct(var.name.clone())
            }
            ExprKind::Cast { inner, .. } => match &inner.kind {
                ExprKind::Var(var) if self.var_type(var).is_func() => {
                    CallTarget::Direct(var.name.clone())
                }
                _ => CallTarget::Indirect(self.require_value(callee)?),
            },
            _ => CallTarget::Indirect(self.require_value(callee)?),
        };

        // Assign argument positions: register args per file, the rest on
        // the stack.
        let mut int_idx = if sret_slot.is_some() { 1 } else { 0 };
        let mut float_idx = 0usize;
        let mut stack_slots = 0usize;
        let mut plans: Vec<(usize, Option<u8>)> = Vec::with_capacity(args.len());
        for arg in args {
            let is_float = arg.ty.is_flonum();
            if is_float && float_idx < FLOAT_ARG_REG_COUNT {
                plans.push((float_idx, Some(float_idx as u8)));
                float_idx += 1;
            } else if !is_float && int_idx < INT_ARG_REG_COUNT {
                plans.push((int_idx, Some(int_idx as u8)));
                int_idx += 1;
            } else {
                plans.push((stack_slots, None));
                stack_slots += 1;
            }
        }

        let stack_bytes = (stack_slots * 8 + 15) & !15;
        self.func.max_call_stack = self.func.max_call_stack.max(stack_bytes);
        self.emit(Ir::Precall { arg_count: args.len(), stack_bytes });
        if stack_bytes > 0 {
            self.emit(Ir::SubSp { bytes: -(stack_bytes as i32) });
        }

        // Arguments evaluate right to left into their assigned slots.
        for (i, arg) in args.iter().enumerate().rev() {
            let value = match hoisted[i] {
                Some(offset) => {
                    let addr = self.func.vregs.alloc(self.ptr_vtype());
                    self.emit(Ir::FrameAddr { dst: addr, offset });
                    let dst = self.func.vregs.alloc(self.vtype_of(&arg.ty));
                    self.emit(Ir::Load { dst, addr });
                    dst
                }
                None => self.require_value(arg)?,
            };
            let (index, reg) = plans[i];
            self.emit(Ir::PushArg { src: value, index, reg });
        }

        // The hidden return pointer is argument zero.
        if let Some(offset) = sret_slot {
            let addr = self.func.vregs.alloc(self.ptr_vtype());
            self.emit(Ir::FrameAddr { dst: addr, offset });
            self.emit(Ir::PushArg { src: addr, index: 0, reg: Some(0) });
        }

        let ret = if expr.ty.is_void() { None } else { Some(self.vtype_of(&expr.ty)) };
        let reg_args = int_idx + float_idx;
        self.emit(Ir::Call {
            target,
            reg_args,
            float_reg_args: float_idx,
            total_args: args.len(),
            ret,
        });
        if stack_bytes > 0 {
            self.emit(Ir::SubSp { bytes: stack_bytes as i32 });
        }

        if expr.ty.is_void() {
            return Ok(None);
        }
        let dst = self.func.vregs.alloc(self.vtype_of(&expr.ty));
        self.emit(Ir::Result { dst });
        Ok(Some(dst))
    }

    // Bitfields

    /// Extract a bitfield from the storage unit at `addr`: shift the
    /// field to the top, then shift back down so the extension matches
    /// the field's signedness.
    fn bitfield_read(&mut self, addr: VRegId, vtype: VType, bf: scc_types::Bitfield) -> VRegId {
        let unit_bits = (vtype.size as u32) * 8;
        let loaded = self.func.vregs.alloc(vtype);
        self.emit(Ir::Load { dst: loaded, addr });

        let up = self.const_int((unit_bits - bf.position - bf.width) as i64, vtype);
        let shifted = self.func.vregs.alloc(vtype);
        self.emit(Ir::Bin { op: IrBinOp::Shl, dst: shifted, lhs: loaded, rhs: up });
        let down = self.const_int((unit_bits - bf.width) as i64, vtype);
        let dst = self.func.vregs.alloc(vtype);
        self.emit(Ir::Bin { op: IrBinOp::Shr, dst, lhs: shifted, rhs: down });
        dst
    }

    /// Merge `value` into the bitfield's bits of the storage unit:
    /// new = (old & ~(mask << pos)) | ((value & mask) << pos).
    fn bitfield_write(
        &mut self,
        addr: VRegId,
        vtype: VType,
        bf: scc_types::Bitfield,
        value: VRegId,
    ) {
        let field_mask = if bf.width >= 64 { -1i64 } else { (1i64 << bf.width) - 1 };

        let old = self.func.vregs.alloc(vtype);
        self.emit(Ir::Load { dst: old, addr });
        let hole = self.const_int(!(field_mask << bf.position), vtype);
        let cleared = self.func.vregs.alloc(vtype);
        self.emit(Ir::Bin { op: IrBinOp::BitAnd, dst: cleared, lhs: old, rhs: hole });

        let mask = self.const_int(field_mask, vtype);
        let masked = self.func.vregs.alloc(vtype);
        self.emit(Ir::Bin { op: IrBinOp::BitAnd, dst: masked, lhs: value, rhs: mask });
        let pos = self.const_int(bf.position as i64, vtype);
        let placed = self.func.vregs.alloc(vtype);
        self.emit(Ir::Bin { op: IrBinOp::Shl, dst: placed, lhs: masked, rhs: pos });

        let merged = self.func.vregs.alloc(vtype);
        self.emit(Ir::Bin { op: IrBinOp::BitOr, dst: merged, lhs: cleared, rhs: placed });
        self.emit(Ir::Store { addr, src: merged });
    }

    /// Copy `size` bytes between addresses in descending power-of-two
    /// chunks.
    fn gen_mem_copy(&mut self, dst: VRegId, src: VRegId, size: usize) {
        let mut offset = 0usize;
        let mut remaining = size;
        for chunk in [8usize, 4, 2, 1] {
            while remaining >= chunk {
                let vtype = VType::int(chunk as u8, true);
                let (src_addr, dst_addr) = if offset == 0 {
                    (src, dst)
                } else {
                    let off = self.const_int(offset as i64, self.ptr_vtype());
                    let sa = self.func.vregs.alloc(self.ptr_vtype());
                    self.emit(Ir::Bin { op: IrBinOp::Add, dst: sa, lhs: src, rhs: off });
                    let off2 = self.const_int(offset as i64, self.ptr_vtype());
                    let da = self.func.vregs.alloc(self.ptr_vtype());
                    self.emit(Ir::Bin { op: IrBinOp::Add, dst: da, lhs: dst, rhs: off2 });
                    (sa, da)
                };
                let tmp = self.func.vregs.alloc(vtype);
                self.emit(Ir::Load { dst: tmp, addr: src_addr });
                self.emit(Ir::Store { addr: dst_addr, src: tmp });
                offset += chunk;
                remaining -= chunk;
            }
        }
    }

    fn require_value(&mut self, expr: &Expr) -> SccResult<VRegId> {
        self.gen_expr(expr)?
            .ok_or_else(|| SccError::internal_error("expected a value, found void"))
    }

    // Conditions

    /// Lower `expr` as a branch: jump to `on_true` or `on_false`.
    fn gen_cond(&mut self, expr: &Expr, on_true: Label, on_false: Label) -> SccResult<()> {
        match &expr.kind {
            ExprKind::IntLit(v) => {
                let target = if *v != 0 { on_true } else { on_false };
                self.emit(Ir::Jmp { target });
                Ok(())
            }
            ExprKind::Binary { op, lhs, rhs } if op.is_comparison() => {
                let cond = compare_cond(*op, &lhs.ty);
                let l = self.require_value(lhs)?;
                let r = self.require_value(rhs)?;
                self.emit(Ir::Cmp { lhs: l, rhs: r });
                self.emit(Ir::CondJmp { cond, target: on_true });
                self.emit(Ir::Jmp { target: on_false });
                Ok(())
            }
            ExprKind::Logical { op: LogicalOp::And, lhs, rhs } => {
                let mid = self.new_label();
                self.gen_cond(lhs, mid, on_false)?;
                self.start_block(mid);
                self.gen_cond(rhs, on_true, on_false)
            }
            ExprKind::Logical { op: LogicalOp::Or, lhs, rhs } => {
                let mid = self.new_label();
                self.gen_cond(lhs, on_true, mid)?;
                self.start_block(mid);
                self.gen_cond(rhs, on_true, on_false)
            }
            ExprKind::Unary { op: UnOp::Not, operand } => {
                self.gen_cond(operand, on_false, on_true)
            }
            _ => {
                let value = self.require_value(expr)?;
                let vtype = self.func.vregs.get(value).vtype;
                let zero = self.zero_const(vtype);
                self.emit(Ir::Cmp { lhs: value, rhs: zero });
                self.emit(Ir::CondJmp { cond: Cond::Ne, target: on_true });
                self.emit(Ir::Jmp { target: on_false });
                Ok(())
            }
        }
    }

    // Statements

    fn gen_stmt(&mut self, stmt: &Stmt) -> SccResult<()> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.gen_expr(expr)?;
                Ok(())
            }
            StmtKind::Block { stmts, .. } => {
                for s in stmts {
                    self.gen_stmt(s)?;
                }
                Ok(())
            }
            StmtKind::If { cond, then_branch, else_branch } => {
                let then_label = self.new_label();
                let else_label = self.new_label();
                let next_label =
                    if else_branch.is_some() { self.new_label() } else { else_label };

                self.gen_cond(cond, then_label, else_label)?;
                self.start_block(then_label);
                self.gen_stmt(then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.emit_jump_if_open(next_label);
                    self.start_block(else_label);
                    self.gen_stmt(else_branch)?;
                }
                self.start_block(next_label);
                Ok(())
            }
            StmtKind::While { cond, body } => {
                let header = self.new_label();
                let body_label = self.new_label();
                let exit = self.new_label();

                self.start_block(header);
                self.gen_cond(cond, body_label, exit)?;

                self.start_block(body_label);
                self.break_stack.push(exit);
                self.continue_stack.push(header);
                self.gen_stmt(body)?;
                self.continue_stack.pop();
                self.break_stack.pop();
                self.emit_jump_if_open(header);

                self.start_block(exit);
                Ok(())
            }
            StmtKind::DoWhile { body, cond } => {
                let body_label = self.new_label();
                let cond_label = self.new_label();
                let exit = self.new_label();

                self.start_block(body_label);
                self.break_stack.push(exit);
                self.continue_stack.push(cond_label);
                self.gen_stmt(body)?;
                self.continue_stack.pop();
                self.break_stack.pop();

                self.start_block(cond_label);
                self.gen_cond(cond, body_label, exit)?;
                self.start_block(exit);
                Ok(())
            }
            StmtKind::For { pre, cond, post, body, .. } => {
                if let Some(pre) = pre {
                    self.gen_stmt(pre)?;
                }
                let header = self.new_label();
                let body_label = self.new_label();
                let post_label = self.new_label();
                let exit = self.new_label();

                self.start_block(header);
                match cond {
                    Some(cond) => self.gen_cond(cond, body_label, exit)?,
                    None => self.emit(Ir::Jmp { target: body_label }),
                }

                self.start_block(body_label);
                self.break_stack.push(exit);
                self.continue_stack.push(post_label);
                self.gen_stmt(body)?;
                self.continue_stack.pop();
                self.break_stack.pop();

                self.start_block(post_label);
                if let Some(post) = post {
                    self.gen_expr(post)?;
                }
                self.emit(Ir::Jmp { target: header });
                self.start_block(exit);
                Ok(())
            }
            StmtKind::Switch { value, body, cases, has_default } => {
                self.gen_switch(value, body, cases, *has_default)
            }
            StmtKind::Case { value, body } => {
                let label = self
                    .switch_stack
                    .last()
                    .and_then(|f| f.case_labels.get(value).copied())
                    .ok_or_else(|| SccError::internal_error("case outside switch"))?;
                self.start_block(label);
                self.gen_stmt(body)
            }
            StmtKind::Default { body } => {
                let label = self
                    .switch_stack
                    .last()
                    .map(|f| f.default_label)
                    .ok_or_else(|| SccError::internal_error("default outside switch"))?;
                self.start_block(label);
                self.gen_stmt(body)
            }
            StmtKind::Break => {
                let target = *self
                    .break_stack
                    .last()
                    .ok_or_else(|| SccError::internal_error("break outside loop or switch"))?;
                self.emit(Ir::Jmp { target });
                let dead = self.new_label();
                self.start_block(dead);
                Ok(())
            }
            StmtKind::Continue => {
                let target = *self
                    .continue_stack
                    .last()
                    .ok_or_else(|| SccError::internal_error("continue outside loop"))?;
                self.emit(Ir::Jmp { target });
                let dead = self.new_label();
                self.start_block(dead);
                Ok(())
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) if expr.ty.is_struct() => {
                        // Copy into the hidden return buffer; the pointer
                        // itself is the machine-level result.
                        let src = self.require_value(expr)?;
                        let dst = self.sret.ok_or_else(|| {
                            SccError::internal_error("struct return without hidden pointer")
                        })?;
                        let size = self.layout.size_of(&expr.ty);
                        self.gen_mem_copy(dst, src, size);
                        Some(dst)
                    }
                    Some(expr) => Some(self.require_value(expr)?),
                    None => None,
                };
                self.emit(Ir::Ret { value });
                let dead = self.new_label();
                self.start_block(dead);
                Ok(())
            }
            StmtKind::Goto(name) => {
                let target = self.named_label(name);
                self.emit(Ir::Jmp { target });
                let dead = self.new_label();
                self.start_block(dead);
                Ok(())
            }
            StmtKind::Label { name, body } => {
                let label = self.named_label(name);
                self.start_block(label);
                self.gen_stmt(body)
            }
            StmtKind::VarDecl(items) => {
                for item in items {
                    let slot = self.slot_of(&item.var);
                    if let Some(init) = &item.init {
                        let ty = self.var_type(&item.var);
                        self.gen_local_init(&slot, &ty, init)?;
                    }
                }
                Ok(())
            }
            StmtKind::Asm(text) => {
                self.emit(Ir::Asm { text: text.clone() });
                Ok(())
            }
            StmtKind::Empty => Ok(()),
        }
    }

    fn emit_jump_if_open(&mut self, target: Label) {
        if !self.block_terminated() {
            self.emit(Ir::Jmp { target });
        }
    }

    fn named_label(&mut self, name: &str) -> Label {
        if let Some(label) = self.named_labels.get(name) {
            return *label;
        }
        let label = self.new_label();
        self.named_labels.insert(name.to_string(), label);
        label
    }

    fn gen_switch(
        &mut self,
        value: &Expr,
        body: &Stmt,
        cases: &[i64],
        has_default: bool,
    ) -> SccResult<()> {
        let exit = self.new_label();
        let default_label = if has_default { self.new_label() } else { exit };
        let case_labels: HashMap<i64, Label> =
            cases.iter().map(|c| (*c, self.next_fresh_label())).collect();

        let discr = self.require_value(value)?;
        let vtype = self.func.vregs.get(discr).vtype;

        if let Some((min, max)) = dense_range(cases) {
            // Jump table: bias to zero, bounds-check, then branch.
            let min_reg = self.const_int(min, vtype);
            let index = self.func.vregs.alloc(vtype);
            self.emit(Ir::Bin { op: IrBinOp::Sub, dst: index, lhs: discr, rhs: min_reg });
            let range = self.const_int(max - min, vtype);
            self.emit(Ir::Cmp { lhs: index, rhs: range });
            self.emit(Ir::CondJmp { cond: Cond::UGt, target: default_label });
            let targets = (min..=max)
                .map(|v| case_labels.get(&v).copied().unwrap_or(default_label))
                .collect();
            self.emit(Ir::TableJmp { index, targets });
        } else {
            // Compare-and-branch chain.
            for case in cases {
                let c = self.const_int(*case, vtype);
                self.emit(Ir::Cmp { lhs: discr, rhs: c });
                self.emit(Ir::CondJmp { cond: Cond::Eq, target: case_labels[case] });
            }
            self.emit(Ir::Jmp { target: default_label });
        }

        self.switch_stack.push(SwitchFrame { case_labels, default_label });
        self.break_stack.push(exit);
        // The body starts in an unreachable block; case labels open blocks.
        let dead = self.new_label();
        self.start_block(dead);
        self.gen_stmt(body)?;
        self.break_stack.pop();
        self.switch_stack.pop();

        self.start_block(exit);
        Ok(())
    }

    /// `new_label` usable inside iterator chains.
    fn next_fresh_label(&mut self) -> Label {
        self.new_label()
    }

    // Local initialization

    fn gen_local_init(&mut self, slot: &Slot, ty: &TypeRef, init: &Initializer) -> SccResult<()> {
        match (slot, init) {
            (Slot::Reg(dst), Initializer::Single(expr)) => {
                let value = self.require_value(expr)?;
                self.emit(Ir::Mov { dst: *dst, src: value });
                Ok(())
            }
            (Slot::Frame(offset), _) => {
                let addr = self.func.vregs.alloc(self.ptr_vtype());
                self.emit(Ir::FrameAddr { dst: addr, offset: *offset });
                self.gen_init_at(addr, ty, init)
            }
            (Slot::Static(_), _) => {
                // Static locals are initialized at load time, not here.
                Ok(())
            }
            (Slot::Reg(_), Initializer::List(_)) => {
                Err(SccError::internal_error("brace initializer for scalar register local"))
            }
        }
    }

    fn gen_init_at(&mut self, addr: VRegId, ty: &TypeRef, init: &Initializer) -> SccResult<()> {
        match (ty.as_ref(), init) {
            (Type::Array { elem, len }, Initializer::List(items)) => {
                let elem_size = self.layout.size_of(elem).max(1);
                let count = len.unwrap_or(items.len());
                for i in 0..count {
                    let elem_addr = self.addr_plus(addr, (i * elem_size) as i64);
                    match items.get(i) {
                        Some(item) => self.gen_init_at(elem_addr, elem, item)?,
                        None => self.gen_zero_at(elem_addr, elem)?,
                    }
                }
                Ok(())
            }
            (Type::Array { elem, len }, Initializer::Single(expr))
                if matches!(expr.kind, ExprKind::StrLit(_)) =>
            {
                // Character array from a string literal, byte by byte.
                let ExprKind::StrLit(index) = expr.kind else { unreachable!() };
                let bytes: Vec<u8> = {
                    let text = &self.program.strings[index];
                    text.bytes().collect()
                };
                let total = len.unwrap_or(bytes.len() + 1);
                let vtype = self.vtype_of(elem);
                for i in 0..total {
                    let value = bytes.get(i).copied().unwrap_or(0) as i64;
                    let elem_addr = self.addr_plus(addr, i as i64);
                    let v = self.const_int(value, vtype);
                    self.emit(Ir::Store { addr: elem_addr, src: v });
                }
                Ok(())
            }
            (Type::Struct(def), Initializer::List(items)) => {
                let members = def.members.borrow().clone();
                for (i, member) in members.iter().enumerate() {
                    let member_addr = self.addr_plus(addr, member.offset as i64);
                    match items.get(i) {
                        Some(item) => self.gen_init_at(member_addr, &member.ty, item)?,
                        None => self.gen_zero_at(member_addr, &member.ty)?,
                    }
                    if def.is_union {
                        break;
                    }
                }
                Ok(())
            }
            (_, Initializer::Single(expr)) => {
                if is_aggregate(ty) {
                    let src = self.require_value(expr)?;
                    let size = self.layout.size_of(ty);
                    self.gen_mem_copy(addr, src, size);
                } else {
                    let value = self.require_value(expr)?;
                    self.emit(Ir::Store { addr, src: value });
                }
                Ok(())
            }
            (_, Initializer::List(items)) => {
                // Scalar in braces: `int x = {1};`
                match items.first() {
                    Some(item) => self.gen_init_at(addr, ty, item),
                    None => self.gen_zero_at(addr, ty),
                }
            }
        }
    }

    fn gen_zero_at(&mut self, addr: VRegId, ty: &TypeRef) -> SccResult<()> {
        if is_aggregate(ty) {
            let size = self.layout.size_of(ty);
            let mut offset = 0usize;
            let mut remaining = size;
            for chunk in [8usize, 4, 2, 1] {
                while remaining >= chunk {
                    let vtype = VType::int(chunk as u8, true);
                    let dst_addr = self.addr_plus(addr, offset as i64);
                    let z = self.const_int(0, vtype);
                    self.emit(Ir::Store { addr: dst_addr, src: z });
                    offset += chunk;
                    remaining -= chunk;
                }
            }
            Ok(())
        } else {
            let vtype = self.vtype_of(ty);
            let z = if vtype.is_flonum() {
                self.func.vregs.alloc_const(Konst::Float(0.0), vtype)
            } else {
                self.const_int(0, vtype)
            };
            self.emit(Ir::Store { addr, src: z });
            Ok(())
        }
    }

    fn addr_plus(&mut self, addr: VRegId, offset: i64) -> VRegId {
        if offset == 0 {
            return addr;
        }
        let off = self.const_int(offset, self.ptr_vtype());
        let dst = self.func.vregs.alloc(self.ptr_vtype());
        self.emit(Ir::Bin { op: IrBinOp::Add, dst, lhs: addr, rhs: off });
        dst
    }
}

/// Aggregates are operated on through their address.
fn is_aggregate(ty: &Type) -> bool {
    ty.is_struct() || ty.is_array()
}

/// Resolve a comparison operator to a condition with signedness and
/// floatness baked in, based on the already-converted operand type.
fn compare_cond(op: BinOp, operand_ty: &TypeRef) -> Cond {
    // Floats and unsigned integers both use the unordered/below family.
    let unsigned = operand_ty.is_unsigned() || operand_ty.is_flonum() || operand_ty.is_ptr();
    match (op, unsigned) {
        (BinOp::Eq, _) => Cond::Eq,
        (BinOp::Ne, _) => Cond::Ne,
        (BinOp::Lt, false) => Cond::Lt,
        (BinOp::Le, false) => Cond::Le,
        (BinOp::Gt, false) => Cond::Gt,
        (BinOp::Ge, false) => Cond::Ge,
        (BinOp::Lt, true) => Cond::ULt,
        (BinOp::Le, true) => Cond::ULe,
        (BinOp::Gt, true) => Cond::UGt,
        (BinOp::Ge, true) => Cond::UGe,
        _ => Cond::Eq,
    }
}

/// Dense enough for a jump table: at least 4 cases covering at least half
/// of their value range.
fn dense_range(cases: &[i64]) -> Option<(i64, i64)> {
    if cases.len() < 4 {
        return None;
    }
    let min = *cases.iter().min()?;
    let max = *cases.iter().max()?;
    let range = max.checked_sub(min)? as u64;
    if range <= 2 * cases.len() as u64 {
        Some((min, max))
    } else {
        None
    }
}

/// Arguments whose evaluation performs a call, or a divide/modulo that
/// clobbers fixed registers, are hoisted before marshalling.
fn needs_funarg_hoist(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Call { .. } => true,
        ExprKind::Binary { op: BinOp::Div | BinOp::Mod, .. } => true,
        ExprKind::CompoundAssign { op: BinOp::Div | BinOp::Mod, .. } => true,
        ExprKind::Member { base, .. } => needs_funarg_hoist(base),
        ExprKind::Deref(e)
        | ExprKind::Addr(e)
        | ExprKind::Unary { operand: e, .. }
        | ExprKind::Cast { inner: e, .. }
        | ExprKind::IncDec { target: e, .. } => needs_funarg_hoist(e),
        ExprKind::Binary { lhs, rhs, .. }
        | ExprKind::Logical { lhs, rhs, .. }
        | ExprKind::Assign { lhs, rhs }
        | ExprKind::CompoundAssign { lhs, rhs, .. }
        | ExprKind::Comma { lhs, rhs } => needs_funarg_hoist(lhs) || needs_funarg_hoist(rhs),
        ExprKind::Ternary { cond, then_expr, else_expr } => {
            needs_funarg_hoist(cond)
                || needs_funarg_hoist(then_expr)
                || needs_funarg_hoist(else_expr)
        }
        _ => false,
    }
}

/// Collect locals whose address is taken anywhere in the body.
fn scan_stmt_for_addr(stmt: &Stmt, out: &mut HashSet<(ScopeId, usize)>) {
    match &stmt.kind {
        StmtKind::Expr(e) => scan_expr_for_addr(e, out),
        StmtKind::Block { stmts, .. } => {
            for s in stmts {
                scan_stmt_for_addr(s, out);
            }
        }
        StmtKind::If { cond, then_branch, else_branch } => {
            scan_expr_for_addr(cond, out);
            scan_stmt_for_addr(then_branch, out);
            if let Some(e) = else_branch {
                scan_stmt_for_addr(e, out);
            }
        }
        StmtKind::Switch { value, body, .. } => {
            scan_expr_for_addr(value, out);
            scan_stmt_for_addr(body, out);
        }
        StmtKind::While { cond, body } => {
            scan_expr_for_addr(cond, out);
            scan_stmt_for_addr(body, out);
        }
        StmtKind::DoWhile { body, cond } => {
            scan_stmt_for_addr(body, out);
            scan_expr_for_addr(cond, out);
        }
        StmtKind::For { pre, cond, post, body, .. } => {
            if let Some(pre) = pre {
                scan_stmt_for_addr(pre, out);
            }
            if let Some(cond) = cond {
                scan_expr_for_addr(cond, out);
            }
            if let Some(post) = post {
                scan_expr_for_addr(post, out);
            }
            scan_stmt_for_addr(body, out);
        }
        StmtKind::Return(Some(e)) => scan_expr_for_addr(e, out),
        StmtKind::Case { body, .. } | StmtKind::Default { body } | StmtKind::Label { body, .. } => {
            scan_stmt_for_addr(body, out);
        }
        StmtKind::VarDecl(items) => {
            for item in items {
                if let Some(init) = &item.init {
                    scan_init_for_addr(init, out);
                }
            }
        }
        _ => {}
    }
}

fn scan_init_for_addr(init: &Initializer, out: &mut HashSet<(ScopeId, usize)>) {
    match init {
        Initializer::Single(e) => scan_expr_for_addr(e, out),
        Initializer::List(items) => {
            for item in items {
                scan_init_for_addr(item, out);
            }
        }
    }
}

fn scan_expr_for_addr(expr: &Expr, out: &mut HashSet<(ScopeId, usize)>) {
    if let ExprKind::Addr(inner) = &expr.kind {
        if let ExprKind::Var(var) = &inner.kind {
            out.insert((var.scope, var.index));
        }
    }
    match &expr.kind {
        ExprKind::Member { base, .. } => scan_expr_for_addr(base, out),
        ExprKind::Deref(e)
        | ExprKind::Addr(e)
        | ExprKind::Unary { operand: e, .. }
        | ExprKind::Cast { inner: e, .. }
        | ExprKind::IncDec { target: e, .. } => scan_expr_for_addr(e, out),
        ExprKind::Binary { lhs, rhs, .. }
        | ExprKind::Logical { lhs, rhs, .. }
        | ExprKind::Assign { lhs, rhs }
        | ExprKind::CompoundAssign { lhs, rhs, .. }
        | ExprKind::Comma { lhs, rhs } => {
            scan_expr_for_addr(lhs, out);
            scan_expr_for_addr(rhs, out);
        }
        ExprKind::Call { callee, args } => {
            scan_expr_for_addr(callee, out);
            for arg in args {
                scan_expr_for_addr(arg, out);
            }
        }
        ExprKind::Ternary { cond, then_expr, else_expr } => {
            scan_expr_for_addr(cond, out);
            scan_expr_for_addr(then_expr, out);
            scan_expr_for_addr(else_expr, out);
        }
        ExprKind::CompoundLit { init, .. } => scan_init_for_addr(init, out),
        _ => {}
    }
}
