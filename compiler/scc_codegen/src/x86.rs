//! System-V x86-64 assembly emission (AT&T syntax)
//!
//! Walks allocated IR blocks in order, expanding each IR into one to
//! three instructions. Integer vreg values are kept extended to 64 bits
//! according to their value type, so register-to-register moves and
//! compares can use the full-width forms. rax and xmm0/xmm1 are the
//! staging scratch registers and are never allocated.

use crate::builder::{string_label, IrBuilder};
use crate::ir::{
    CallTarget, Cond, Ir, IrBinOp, IrFunction, IrUnOp, Konst, Label, VRegFlags, VRegId, VType,
};
use crate::regalloc::{self, INT_CALLEE_SAVED};
use crate::Backend;
use log::debug;
use scc_common::{SccError, SccResult};
use scc_parser::{Initializer, Program, StorageClass, VarInfo};
use scc_types::{FloatKind, TargetLayout, Type, TypeRef};
use std::fmt::Write as _;

/// 64-bit names of the integer register file, by allocation index.
const INT_REG64: [&str; 13] = [
    "r10", "r11", "rbx", "r12", "r13", "r14", "r15", "rdi", "rsi", "rdx", "rcx", "r8", "r9",
];
const INT_REG32: [&str; 13] = [
    "r10d", "r11d", "ebx", "r12d", "r13d", "r14d", "r15d", "edi", "esi", "edx", "ecx", "r8d",
    "r9d",
];
const INT_REG16: [&str; 13] = [
    "r10w", "r11w", "bx", "r12w", "r13w", "r14w", "r15w", "di", "si", "dx", "cx", "r8w", "r9w",
];
const INT_REG8: [&str; 13] = [
    "r10b", "r11b", "bl", "r12b", "r13b", "r14b", "r15b", "dil", "sil", "dl", "cl", "r8b", "r9b",
];

/// ABI name of integer argument `n`.
const ABI_INT_ARGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

fn int_reg(phys: u8, size: u8) -> &'static str {
    let i = phys as usize;
    match size {
        8 => INT_REG64[i],
        4 => INT_REG32[i],
        2 => INT_REG16[i],
        _ => INT_REG8[i],
    }
}

/// Float file allocation index to xmm name: 0 and 1 are the spill temps
/// xmm14/xmm15, the rest map identically.
fn float_reg(phys: u8) -> String {
    match phys {
        0 => "xmm14".to_string(),
        1 => "xmm15".to_string(),
        n => format!("xmm{}", n),
    }
}

/// Native assembly backend
pub struct X86Backend {
    layout: TargetLayout,
    out: String,
    /// Decorate global symbols with a leading underscore (Mach-O hosts).
    underscore: bool,
    /// Float literals of the current function: (label, bits, is_f32).
    float_consts: Vec<(String, u64, bool)>,
    /// Jump tables of the current function: (label, entries).
    jump_tables: Vec<(String, Vec<String>)>,
    const_counter: usize,
}

impl X86Backend {
    pub fn new(underscore: bool) -> Self {
        Self {
            layout: TargetLayout::X86_64,
            out: String::new(),
            underscore,
            float_consts: Vec::new(),
            jump_tables: Vec::new(),
            const_counter: 0,
        }
    }

    fn sym(&self, name: &str) -> String {
        if self.underscore {
            format!("_{}", name)
        } else {
            name.to_string()
        }
    }

    fn line(&mut self, text: &str) {
        self.out.push_str("\t");
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn raw(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn local_label(&self, func: &IrFunction, label: Label) -> String {
        format!(".L{}_{}", func.name, label)
    }

    fn float_const_label(&mut self, bits: u64, is_f32: bool) -> String {
        if let Some((label, _, _)) =
            self.float_consts.iter().find(|(_, b, f)| *b == bits && *f == is_f32)
        {
            return label.clone();
        }
        self.const_counter += 1;
        let label = format!(".LC{}", self.const_counter);
        self.float_consts.push((label.clone(), bits, is_f32));
        label
    }

    // Operand staging

    /// Move a vreg's value into rax (integers) honoring constants.
    fn stage_int(&mut self, func: &IrFunction, id: VRegId) -> SccResult<()> {
        let vreg = func.vregs.get(id);
        match vreg.konst {
            Some(Konst::Int(v)) => self.mov_imm("rax", v),
            Some(Konst::Float(_)) => {
                return Err(SccError::internal_error("float constant in integer context"))
            }
            None => {
                let phys = vreg
                    .phys
                    .ok_or_else(|| SccError::internal_error("vreg without register"))?;
                self.line(&format!("movq %{}, %rax", int_reg(phys, 8)));
            }
        }
        Ok(())
    }

    /// Move a float vreg into the given scratch xmm register.
    fn stage_float(&mut self, func: &IrFunction, id: VRegId, scratch: &str) -> SccResult<()> {
        let vreg = func.vregs.get(id);
        let mov = if vreg.vtype.size == 4 { "movss" } else { "movsd" };
        match vreg.konst {
            Some(Konst::Float(v)) => {
                let is_f32 = vreg.vtype.size == 4;
                let bits = if is_f32 { (v as f32).to_bits() as u64 } else { v.to_bits() };
                let label = self.float_const_label(bits, is_f32);
                self.line(&format!("{} {}(%rip), %{}", mov, label, scratch));
            }
            Some(Konst::Int(_)) => {
                return Err(SccError::internal_error("integer constant in float context"))
            }
            None => {
                let phys = vreg
                    .phys
                    .ok_or_else(|| SccError::internal_error("float vreg without register"))?;
                self.line(&format!("{} %{}, %{}", mov, float_reg(phys), scratch));
            }
        }
        Ok(())
    }

    fn mov_imm(&mut self, reg64: &str, value: i64) {
        if value >= i32::MIN as i64 && value <= i32::MAX as i64 {
            self.line(&format!("movq ${}, %{}", value, reg64));
        } else {
            self.line(&format!("movabsq ${}, %{}", value, reg64));
        }
    }

    /// Re-extend rax to 64 bits according to a value type, keeping the
    /// canonical-extension convention.
    fn canonicalize_rax(&mut self, vtype: VType) {
        match (vtype.size, vtype.is_unsigned()) {
            (8, _) => {}
            (4, false) => self.line("movslq %eax, %rax"),
            (4, true) => self.line("movl %eax, %eax"),
            (2, false) => self.line("movswq %ax, %rax"),
            (2, true) => self.line("movzwq %ax, %rax"),
            (_, false) => self.line("movsbq %al, %rax"),
            (_, true) => self.line("movzbq %al, %rax"),
        }
    }

    /// Move rax into a vreg's assigned register.
    fn store_rax(&mut self, func: &IrFunction, id: VRegId) -> SccResult<()> {
        let vreg = func.vregs.get(id);
        let phys =
            vreg.phys.ok_or_else(|| SccError::internal_error("destination without register"))?;
        self.line(&format!("movq %rax, %{}", int_reg(phys, 8)));
        Ok(())
    }

    fn store_xmm0(&mut self, func: &IrFunction, id: VRegId) -> SccResult<()> {
        let vreg = func.vregs.get(id);
        let phys = vreg
            .phys
            .ok_or_else(|| SccError::internal_error("float destination without register"))?;
        let mov = if vreg.vtype.size == 4 { "movss" } else { "movsd" };
        self.line(&format!("{} %xmm0, %{}", mov, float_reg(phys)));
        Ok(())
    }

    // Function emission

    pub fn emit_function(&mut self, func: &IrFunction) -> SccResult<()> {
        debug!("emitting x86-64 for '{}'", func.name);
        self.float_consts.clear();
        self.jump_tables.clear();

        let name = self.sym(&func.name);
        self.raw("\t.text");
        if !func.is_static {
            self.raw(&format!("\t.globl {}", name));
        }
        self.raw(&format!("{}:", name));
        self.line("pushq %rbp");
        self.line("movq %rsp, %rbp");

        // Save used callee-saved registers.
        let saved: Vec<u8> = (0..regalloc::INT_REG_COUNT as u8)
            .filter(|r| {
                func.used_int_regs & (1 << r) != 0 && INT_CALLEE_SAVED & (1 << r) != 0
            })
            .collect();
        for r in &saved {
            self.line(&format!("pushq %{}", int_reg(*r, 8)));
        }

        // Frame: locals + spills, padded so rsp is 16-byte aligned at
        // call sites.
        let mut frame = (func.frame_size + 7) & !7;
        if (frame + 8 * saved.len()) % 16 != 0 {
            frame += 8;
        }
        if frame > 0 {
            self.line(&format!("subq ${}, %rsp", frame));
        }

        self.emit_param_moves(func)?;

        for (i, block) in func.blocks.iter().enumerate() {
            if i != 0 {
                self.raw(&format!("{}:", self.local_label(func, block.label)));
            }
            for ir in &block.irs {
                self.emit_ir(func, ir)?;
            }
        }

        // Epilogue.
        self.raw(&format!(".Lret_{}:", func.name));
        if frame > 0 {
            self.line(&format!("addq ${}, %rsp", frame));
        }
        for r in saved.iter().rev() {
            self.line(&format!("popq %{}", int_reg(*r, 8)));
        }
        self.line("popq %rbp");
        self.line("ret");

        // Per-function constant pools and jump tables.
        if !self.float_consts.is_empty() || !self.jump_tables.is_empty() {
            self.raw("\t.section .rodata");
            for (label, bits, is_f32) in std::mem::take(&mut self.float_consts) {
                if is_f32 {
                    self.raw(&format!("{}:", label));
                    self.raw(&format!("\t.long {}", bits as u32));
                } else {
                    self.raw("\t.align 8");
                    self.raw(&format!("{}:", label));
                    self.raw(&format!("\t.quad {}", bits));
                }
            }
            for (label, entries) in std::mem::take(&mut self.jump_tables) {
                self.raw("\t.align 8");
                self.raw(&format!("{}:", label));
                for entry in entries {
                    self.raw(&format!("\t.quad {}", entry));
                }
            }
            self.raw("\t.text");
        }
        self.out.push('\n');
        Ok(())
    }

    /// Move register parameters from their ABI registers into their
    /// assigned homes. Uses push/pop pairs so overlapping sources and
    /// destinations cannot trample each other.
    fn emit_param_moves(&mut self, func: &IrFunction) -> SccResult<()> {
        struct Move {
            abi: String,
            is_float: bool,
            dst_phys: Option<u8>,
            dst_frame: Option<i32>,
            size: u8,
        }

        let mut moves = Vec::new();
        for vreg in func.vregs.iter() {
            if !vreg.flags.contains(VRegFlags::PARAM) {
                continue;
            }
            let Some(position) = vreg.param_index else { continue };
            let is_float = vreg.vtype.is_flonum();
            let abi = if is_float {
                format!("xmm{}", position)
            } else {
                ABI_INT_ARGS[position as usize].to_string()
            };
            if vreg.flags.contains(VRegFlags::SPILLED) {
                moves.push(Move {
                    abi,
                    is_float,
                    dst_phys: None,
                    dst_frame: vreg.frame_offset,
                    size: vreg.vtype.size,
                });
                continue;
            }
            let Some(phys) = vreg.phys else { continue };
            let same = if is_float {
                float_reg(phys) == abi
            } else {
                int_reg(phys, 8) == abi
            };
            if !same {
                moves.push(Move {
                    abi,
                    is_float,
                    dst_phys: Some(phys),
                    dst_frame: None,
                    size: vreg.vtype.size,
                });
            }
        }

        // Stage all sources on the stack, then pop into destinations in
        // reverse.
        for m in &moves {
            if m.is_float {
                self.line("subq $8, %rsp");
                self.line(&format!("movsd %{}, (%rsp)", m.abi));
            } else {
                self.line(&format!("pushq %{}", m.abi));
            }
        }
        for m in moves.iter().rev() {
            match (m.is_float, m.dst_phys, m.dst_frame) {
                (false, Some(phys), _) => self.line(&format!("popq %{}", int_reg(phys, 8))),
                (false, None, Some(offset)) => {
                    self.line("popq %rax");
                    self.line(&format!("movq %rax, {}(%rbp)", offset));
                }
                (true, Some(phys), _) => {
                    let mov = if m.size == 4 { "movss" } else { "movsd" };
                    self.line(&format!("{} (%rsp), %{}", mov, float_reg(phys)));
                    self.line("addq $8, %rsp");
                }
                (true, None, Some(offset)) => {
                    self.line("movsd (%rsp), %xmm0");
                    self.line("addq $8, %rsp");
                    self.line(&format!("movsd %xmm0, {}(%rbp)", offset));
                }
                _ => return Err(SccError::internal_error("parameter without a home")),
            }
        }
        Ok(())
    }

    fn emit_ir(&mut self, func: &IrFunction, ir: &Ir) -> SccResult<()> {
        match ir {
            Ir::Mov { dst, src } => {
                let dst_reg = func.vregs.get(*dst);
                if dst_reg.vtype.is_flonum() {
                    self.stage_float(func, *src, "xmm0")?;
                    self.store_xmm0(func, *dst)
                } else {
                    self.stage_int(func, *src)?;
                    self.store_rax(func, *dst)
                }
            }
            Ir::Load { dst, addr } => self.emit_load(func, *dst, *addr),
            Ir::Store { addr, src } => self.emit_store(func, *addr, *src),
            Ir::Bin { op, dst, lhs, rhs } => self.emit_bin(func, *op, *dst, *lhs, *rhs),
            Ir::Un { op, dst, src } => self.emit_un(func, *op, *dst, *src),
            Ir::Cmp { lhs, rhs } => self.emit_cmp(func, *lhs, *rhs),
            Ir::SetCond { cond, dst } => {
                self.line(&format!("set{} %al", cond_suffix(*cond)));
                self.line("movzbq %al, %rax");
                self.store_rax(func, *dst)
            }
            Ir::CondJmp { cond, target } => {
                let label = self.local_label(func, *target);
                self.line(&format!("j{} {}", cond_suffix(*cond), label));
                Ok(())
            }
            Ir::Jmp { target } => {
                let label = self.local_label(func, *target);
                self.line(&format!("jmp {}", label));
                Ok(())
            }
            Ir::TableJmp { index, targets } => self.emit_table_jmp(func, *index, targets),
            Ir::Cast { dst, src } => self.emit_cast(func, *dst, *src),
            Ir::FrameAddr { dst, offset } => {
                self.line(&format!("leaq {}(%rbp), %rax", offset));
                self.store_rax(func, *dst)
            }
            Ir::LabelAddr { dst, label } => {
                let symbol =
                    if label.starts_with(".L") { label.clone() } else { self.sym(label) };
                self.line(&format!("leaq {}(%rip), %rax", symbol));
                self.store_rax(func, *dst)
            }
            Ir::StackAddr { dst, offset } => {
                self.line(&format!("leaq {}(%rsp), %rax", offset));
                self.store_rax(func, *dst)
            }
            Ir::Precall { .. } => Ok(()),
            Ir::PushArg { src, index, reg } => self.emit_push_arg(func, *src, *index, *reg),
            Ir::Call { target, float_reg_args, .. } => {
                self.line(&format!("movl ${}, %eax", float_reg_args));
                match target {
                    CallTarget::Direct(name) => {
                        let symbol = self.sym(name);
                        self.line(&format!("call {}", symbol));
                    }
                    CallTarget::Indirect(reg) => {
                        let vreg = func.vregs.get(*reg);
                        let phys = vreg.phys.ok_or_else(|| {
                            SccError::internal_error("indirect callee without register")
                        })?;
                        self.line(&format!("call *%{}", int_reg(phys, 8)));
                    }
                }
                Ok(())
            }
            Ir::Result { dst } => {
                let vreg = func.vregs.get(*dst);
                if vreg.vtype.is_flonum() {
                    self.store_xmm0(func, *dst)
                } else {
                    self.canonicalize_rax(vreg.vtype);
                    self.store_rax(func, *dst)
                }
            }
            Ir::SubSp { bytes } => {
                if *bytes < 0 {
                    self.line(&format!("subq ${}, %rsp", -bytes));
                } else {
                    self.line(&format!("addq ${}, %rsp", bytes));
                }
                Ok(())
            }
            Ir::Asm { text } => {
                self.line(text);
                Ok(())
            }
            Ir::LoadSpill { dst, src } => {
                let spilled = func.vregs.get(*src);
                let offset = spilled
                    .frame_offset
                    .ok_or_else(|| SccError::internal_error("spilled vreg without slot"))?;
                let tmp = func.vregs.get(*dst);
                let phys = tmp
                    .phys
                    .ok_or_else(|| SccError::internal_error("fix-up temp without register"))?;
                if tmp.vtype.is_flonum() {
                    self.line(&format!("movsd {}(%rbp), %{}", offset, float_reg(phys)));
                } else {
                    self.line(&format!("movq {}(%rbp), %{}", offset, int_reg(phys, 8)));
                }
                Ok(())
            }
            Ir::StoreSpill { dst, src } => {
                let spilled = func.vregs.get(*dst);
                let offset = spilled
                    .frame_offset
                    .ok_or_else(|| SccError::internal_error("spilled vreg without slot"))?;
                let tmp = func.vregs.get(*src);
                let phys = tmp
                    .phys
                    .ok_or_else(|| SccError::internal_error("fix-up temp without register"))?;
                if tmp.vtype.is_flonum() {
                    self.line(&format!("movsd %{}, {}(%rbp)", float_reg(phys), offset));
                } else {
                    self.line(&format!("movq %{}, {}(%rbp)", int_reg(phys, 8), offset));
                }
                Ok(())
            }
            Ir::Ret { value } => {
                if let Some(value) = value {
                    let vreg = func.vregs.get(*value);
                    if vreg.vtype.is_flonum() {
                        self.stage_float(func, *value, "xmm0")?;
                    } else {
                        self.stage_int(func, *value)?;
                    }
                }
                self.line(&format!("jmp .Lret_{}", func.name));
                Ok(())
            }
        }
    }

    fn emit_load(&mut self, func: &IrFunction, dst: VRegId, addr: VRegId) -> SccResult<()> {
        self.stage_int(func, addr)?;
        let vreg = func.vregs.get(dst);
        if vreg.vtype.is_flonum() {
            let mov = if vreg.vtype.size == 4 { "movss" } else { "movsd" };
            self.line(&format!("{} (%rax), %xmm0", mov));
            return self.store_xmm0(func, dst);
        }
        // Load with extension so the register stays canonical.
        let inst = match (vreg.vtype.size, vreg.vtype.is_unsigned()) {
            (8, _) => "movq (%rax), %rax",
            (4, false) => "movslq (%rax), %rax",
            (4, true) => "movl (%rax), %eax",
            (2, false) => "movswq (%rax), %rax",
            (2, true) => "movzwq (%rax), %rax",
            (_, false) => "movsbq (%rax), %rax",
            (_, true) => "movzbq (%rax), %rax",
        };
        self.line(inst);
        self.store_rax(func, dst)
    }

    fn emit_store(&mut self, func: &IrFunction, addr: VRegId, src: VRegId) -> SccResult<()> {
        let src_reg = func.vregs.get(src);
        if src_reg.vtype.is_flonum() {
            self.stage_float(func, src, "xmm0")?;
            self.stage_int(func, addr)?;
            let mov = if src_reg.vtype.size == 4 { "movss" } else { "movsd" };
            self.line(&format!("{} %xmm0, (%rax)", mov));
            return Ok(());
        }
        let size = src_reg.vtype.size;
        // Address in rax; source directly from its register or as an
        // immediate through r11 is not available, so stage via the
        // two-scratch sequence: value into rax first, address via r10 is
        // also allocatable. Use rax for the value and push the address.
        match (src_reg.konst, src_reg.phys) {
            (Some(Konst::Int(v)), _)
                if size < 8 || (v >= i32::MIN as i64 && v <= i32::MAX as i64) =>
            {
                self.stage_int(func, addr)?;
                let op = match size {
                    8 => "movq",
                    4 => "movl",
                    2 => "movw",
                    _ => "movb",
                };
                self.line(&format!("{} ${}, (%rax)", op, truncate_imm(v, size)));
                Ok(())
            }
            (Some(Konst::Int(v)), _) => {
                // 64-bit immediate store: build the value in rax with the
                // address parked on the stack, preserving rcx.
                self.line("pushq %rcx");
                self.stage_int(func, addr)?;
                self.line("pushq %rax");
                self.mov_imm("rax", v);
                self.line("popq %rcx");
                self.line("movq %rax, (%rcx)");
                self.line("popq %rcx");
                Ok(())
            }
            (None, Some(phys)) => {
                self.stage_int(func, addr)?;
                let op = match size {
                    8 => "movq",
                    4 => "movl",
                    2 => "movw",
                    _ => "movb",
                };
                self.line(&format!("{} %{}, (%rax)", op, int_reg(phys, size)));
                Ok(())
            }
            _ => Err(SccError::internal_error("store source without register")),
        }
    }

    fn emit_bin(
        &mut self,
        func: &IrFunction,
        op: IrBinOp,
        dst: VRegId,
        lhs: VRegId,
        rhs: VRegId,
    ) -> SccResult<()> {
        let dst_vt = func.vregs.get(dst).vtype;
        if dst_vt.is_flonum() {
            let op_name = match op {
                IrBinOp::Add => "add",
                IrBinOp::Sub => "sub",
                IrBinOp::Mul => "mul",
                IrBinOp::Div => "div",
                _ => return Err(SccError::internal_error("invalid float operation")),
            };
            let s = if dst_vt.size == 4 { "ss" } else { "sd" };
            self.stage_float(func, lhs, "xmm0")?;
            self.stage_float(func, rhs, "xmm1")?;
            self.line(&format!("{}{} %xmm1, %xmm0", op_name, s));
            return self.store_xmm0(func, dst);
        }

        match op {
            IrBinOp::Add | IrBinOp::Sub | IrBinOp::Mul | IrBinOp::BitAnd | IrBinOp::BitOr
            | IrBinOp::BitXor => {
                let mnemonic = match op {
                    IrBinOp::Add => "addq",
                    IrBinOp::Sub => "subq",
                    IrBinOp::Mul => "imulq",
                    IrBinOp::BitAnd => "andq",
                    IrBinOp::BitOr => "orq",
                    _ => "xorq",
                };
                self.stage_int(func, lhs)?;
                let rhs_reg = func.vregs.get(rhs);
                match (rhs_reg.konst, rhs_reg.phys) {
                    (Some(Konst::Int(v)), _)
                        if v >= i32::MIN as i64 && v <= i32::MAX as i64 =>
                    {
                        self.line(&format!("{} ${}, %rax", mnemonic, v));
                    }
                    (Some(Konst::Int(v)), _) => {
                        self.line("pushq %rcx");
                        self.mov_imm("rcx", v);
                        self.line(&format!("{} %rcx, %rax", mnemonic));
                        self.line("popq %rcx");
                    }
                    (None, Some(phys)) => {
                        self.line(&format!("{} %{}, %rax", mnemonic, int_reg(phys, 8)));
                    }
                    _ => return Err(SccError::internal_error("operand without register")),
                }
                self.canonicalize_rax(dst_vt);
                self.store_rax(func, dst)
            }
            IrBinOp::Shl | IrBinOp::Shr => {
                self.stage_int(func, lhs)?;
                let mnemonic = match (op, dst_vt.is_unsigned()) {
                    (IrBinOp::Shl, _) => "salq",
                    (IrBinOp::Shr, true) => "shrq",
                    (IrBinOp::Shr, false) => "sarq",
                    _ => unreachable!("guarded by outer match to Shl | Shr"),
                };
                let rhs_reg = func.vregs.get(rhs);
                match (rhs_reg.konst, rhs_reg.phys) {
                    (Some(Konst::Int(v)), _) => {
                        self.line(&format!("{} ${}, %rax", mnemonic, v & 63));
                    }
                    (None, Some(phys)) => {
                        self.line("pushq %rcx");
                        if int_reg(phys, 8) != "rcx" {
                            self.line(&format!("movq %{}, %rcx", int_reg(phys, 8)));
                        }
                        self.line(&format!("{} %cl, %rax", mnemonic));
                        self.line("popq %rcx");
                    }
                    _ => return Err(SccError::internal_error("shift count without register")),
                }
                self.canonicalize_rax(dst_vt);
                self.store_rax(func, dst)
            }
            IrBinOp::Div | IrBinOp::Mod => {
                // rdx is preserved around the divide; the divisor lives on
                // the stack so rdx-allocated operands stay reachable.
                self.line("pushq %rdx");
                let rhs_reg = func.vregs.get(rhs);
                match (rhs_reg.konst, rhs_reg.phys) {
                    (Some(Konst::Int(v)), _)
                        if v >= i32::MIN as i64 && v <= i32::MAX as i64 =>
                    {
                        self.line(&format!("pushq ${}", v));
                    }
                    (Some(Konst::Int(v)), _) => {
                        self.mov_imm("rax", v);
                        self.line("pushq %rax");
                    }
                    (None, Some(phys)) => self.line(&format!("pushq %{}", int_reg(phys, 8))),
                    _ => return Err(SccError::internal_error("divisor without register")),
                }
                // The dividend; if it lived in rdx, reload the saved copy.
                let lhs_reg = func.vregs.get(lhs);
                match (lhs_reg.konst, lhs_reg.phys) {
                    (Some(Konst::Int(v)), _) => self.mov_imm("rax", v),
                    (None, Some(phys)) if int_reg(phys, 8) == "rdx" => {
                        self.line("movq 8(%rsp), %rax");
                    }
                    (None, Some(phys)) => {
                        self.line(&format!("movq %{}, %rax", int_reg(phys, 8)));
                    }
                    _ => return Err(SccError::internal_error("dividend without register")),
                }
                if dst_vt.is_unsigned() {
                    self.line("xorl %edx, %edx");
                    self.line("divq (%rsp)");
                } else {
                    self.line("cqto");
                    self.line("idivq (%rsp)");
                }
                if op == IrBinOp::Mod {
                    self.line("movq %rdx, %rax");
                }
                self.line("addq $8, %rsp");
                self.line("popq %rdx");
                self.canonicalize_rax(dst_vt);
                self.store_rax(func, dst)
            }
        }
    }

    fn emit_un(
        &mut self,
        func: &IrFunction,
        op: IrUnOp,
        dst: VRegId,
        src: VRegId,
    ) -> SccResult<()> {
        let dst_vt = func.vregs.get(dst).vtype;
        if dst_vt.is_flonum() {
            if op != IrUnOp::Neg {
                return Err(SccError::internal_error("bitwise complement of a float"));
            }
            self.stage_float(func, src, "xmm1")?;
            let s = if dst_vt.size == 4 { "ss" } else { "sd" };
            self.line(&format!("xorp{} %xmm0, %xmm0", if dst_vt.size == 4 { "s" } else { "d" }));
            self.line(&format!("sub{} %xmm1, %xmm0", s));
            return self.store_xmm0(func, dst);
        }
        self.stage_int(func, src)?;
        match op {
            IrUnOp::Neg => self.line("negq %rax"),
            IrUnOp::BitNot => self.line("notq %rax"),
        }
        self.canonicalize_rax(dst_vt);
        self.store_rax(func, dst)
    }

    fn emit_cmp(&mut self, func: &IrFunction, lhs: VRegId, rhs: VRegId) -> SccResult<()> {
        let lhs_reg = func.vregs.get(lhs);
        if lhs_reg.vtype.is_flonum() {
            let cmp = if lhs_reg.vtype.size == 4 { "ucomiss" } else { "ucomisd" };
            self.stage_float(func, lhs, "xmm0")?;
            self.stage_float(func, rhs, "xmm1")?;
            self.line(&format!("{} %xmm1, %xmm0", cmp));
            return Ok(());
        }
        self.stage_int(func, lhs)?;
        let rhs_reg = func.vregs.get(rhs);
        match (rhs_reg.konst, rhs_reg.phys) {
            (Some(Konst::Int(v)), _) if v >= i32::MIN as i64 && v <= i32::MAX as i64 => {
                self.line(&format!("cmpq ${}, %rax", v));
            }
            (Some(Konst::Int(v)), _) => {
                self.line("pushq %rcx");
                self.mov_imm("rcx", v);
                self.line("cmpq %rcx, %rax");
                self.line("popq %rcx");
            }
            (None, Some(phys)) => {
                self.line(&format!("cmpq %{}, %rax", int_reg(phys, 8)));
            }
            _ => return Err(SccError::internal_error("compare operand without register")),
        }
        Ok(())
    }

    fn emit_cast(&mut self, func: &IrFunction, dst: VRegId, src: VRegId) -> SccResult<()> {
        let dst_vt = func.vregs.get(dst).vtype;
        let src_vt = func.vregs.get(src).vtype;

        match (src_vt.is_flonum(), dst_vt.is_flonum()) {
            (false, false) => {
                self.stage_int(func, src)?;
                self.canonicalize_rax(dst_vt);
                self.store_rax(func, dst)
            }
            (false, true) => {
                self.stage_int(func, src)?;
                let cvt = if dst_vt.size == 4 { "cvtsi2ssq" } else { "cvtsi2sdq" };
                self.line(&format!("{} %rax, %xmm0", cvt));
                self.store_xmm0(func, dst)
            }
            (true, false) => {
                self.stage_float(func, src, "xmm0")?;
                let cvt = if src_vt.size == 4 { "cvttss2si" } else { "cvttsd2si" };
                self.line(&format!("{} %xmm0, %rax", cvt));
                self.canonicalize_rax(dst_vt);
                self.store_rax(func, dst)
            }
            (true, true) => {
                self.stage_float(func, src, "xmm0")?;
                if src_vt.size == 4 && dst_vt.size == 8 {
                    self.line("cvtss2sd %xmm0, %xmm0");
                } else if src_vt.size == 8 && dst_vt.size == 4 {
                    self.line("cvtsd2ss %xmm0, %xmm0");
                }
                self.store_xmm0(func, dst)
            }
        }
    }

    fn emit_push_arg(
        &mut self,
        func: &IrFunction,
        src: VRegId,
        index: usize,
        reg: Option<u8>,
    ) -> SccResult<()> {
        let src_reg = func.vregs.get(src);
        match reg {
            Some(position) if src_reg.vtype.is_flonum() => {
                self.stage_float(func, src, &format!("xmm{}", position))
            }
            Some(position) => {
                let abi = ABI_INT_ARGS[position as usize];
                match (src_reg.konst, src_reg.phys) {
                    (Some(Konst::Int(v)), _) => {
                        self.mov_imm(abi, v);
                        Ok(())
                    }
                    (None, Some(phys)) => {
                        if int_reg(phys, 8) != abi {
                            self.line(&format!("movq %{}, %{}", int_reg(phys, 8), abi));
                        }
                        Ok(())
                    }
                    _ => Err(SccError::internal_error("argument without register")),
                }
            }
            None => {
                // Stack argument at its slot in the outgoing area.
                if src_reg.vtype.is_flonum() {
                    self.stage_float(func, src, "xmm0")?;
                    self.line(&format!("movsd %xmm0, {}(%rsp)", index * 8));
                } else {
                    self.stage_int(func, src)?;
                    self.line(&format!("movq %rax, {}(%rsp)", index * 8));
                }
                Ok(())
            }
        }
    }

    fn emit_table_jmp(
        &mut self,
        func: &IrFunction,
        index: VRegId,
        targets: &[Label],
    ) -> SccResult<()> {
        self.const_counter += 1;
        let table = format!(".Ltab{}", self.const_counter);
        let entries = targets.iter().map(|t| self.local_label(func, *t)).collect();
        self.jump_tables.push((table.clone(), entries));

        // The index keeps its own register; rax holds the table base.
        let phys = func
            .vregs
            .get(index)
            .phys
            .ok_or_else(|| SccError::internal_error("table index without register"))?;
        self.line(&format!("leaq {}(%rip), %rax", table));
        self.line(&format!("movq (%rax,%{},8), %rax", int_reg(phys, 8)));
        self.line("jmp *%rax");
        Ok(())
    }

    // Data emission

    fn emit_globals(&mut self, program: &Program) -> SccResult<()> {
        // Globals live in the global scope; block-scope statics live in
        // inner scopes but carry labels.
        let mut statics: Vec<VarInfo> = Vec::new();
        for scope_id in 0..program.scopes.len() as u32 {
            for var in &program.scopes.get(scope_id).vars {
                let static_storage = matches!(var.storage, StorageClass::Static);
                if static_storage && var.defined && !var.ty.is_func() && var.label.is_some() {
                    statics.push(var.clone());
                }
            }
        }

        for var in &statics {
            let label = var.label.clone().unwrap_or_else(|| var.name.clone());
            let symbol =
                if label.starts_with(".L") { label.clone() } else { self.sym(&label) };
            let size = self.layout.size_of(&var.ty).max(1);
            let align = self.layout.align_of(&var.ty).max(1);

            match &var.init {
                Some(init) => {
                    self.raw("\t.data");
                    if !var.internal {
                        self.raw(&format!("\t.globl {}", symbol));
                    }
                    self.raw(&format!("\t.align {}", align));
                    self.raw(&format!("{}:", symbol));
                    self.emit_init_data(program, &var.ty, init)?;
                }
                None => {
                    self.raw("\t.bss");
                    if !var.internal {
                        self.raw(&format!("\t.globl {}", symbol));
                    }
                    self.raw(&format!("\t.align {}", align));
                    self.raw(&format!("{}:", symbol));
                    self.raw(&format!("\t.zero {}", size));
                }
            }
        }
        Ok(())
    }

    fn emit_init_data(
        &mut self,
        program: &Program,
        ty: &TypeRef,
        init: &Initializer,
    ) -> SccResult<()> {
        use scc_parser::ExprKind;
        match (ty.as_ref(), init) {
            (Type::Array { len, .. }, Initializer::Single(expr))
                if matches!(expr.kind, ExprKind::StrLit(_)) =>
            {
                // Character array initialized from a string literal.
                let ExprKind::StrLit(index) = expr.kind else { unreachable!() };
                let text = program.strings[index].clone();
                let total = len.unwrap_or(text.len() + 1);
                for i in 0..total {
                    let byte = text.as_bytes().get(i).copied().unwrap_or(0);
                    self.raw(&format!("\t.byte {}", byte));
                }
                Ok(())
            }
            (Type::Array { elem, len }, Initializer::List(items)) => {
                let count = len.unwrap_or(items.len());
                let elem_size = self.layout.size_of(elem).max(1);
                for i in 0..count {
                    match items.get(i) {
                        Some(item) => self.emit_init_data(program, elem, item)?,
                        None => self.raw(&format!("\t.zero {}", elem_size)),
                    }
                }
                Ok(())
            }
            (Type::Struct(def), Initializer::List(items)) => {
                let members = def.members.borrow().clone();
                let mut offset = 0usize;
                for (i, member) in members.iter().enumerate() {
                    if member.offset > offset {
                        self.raw(&format!("\t.zero {}", member.offset - offset));
                        offset = member.offset;
                    }
                    match items.get(i) {
                        Some(item) => self.emit_init_data(program, &member.ty, item)?,
                        None => {
                            let size = self.layout.size_of(&member.ty).max(1);
                            self.raw(&format!("\t.zero {}", size));
                        }
                    }
                    offset += self.layout.size_of(&member.ty);
                    if def.is_union {
                        break;
                    }
                }
                let total = def.size.get();
                if total > offset {
                    self.raw(&format!("\t.zero {}", total - offset));
                }
                Ok(())
            }
            (_, Initializer::Single(expr)) => self.emit_scalar_data(ty, expr),
            (_, Initializer::List(items)) => match items.first() {
                Some(item) => self.emit_init_data(program, ty, item),
                None => {
                    self.raw(&format!("\t.zero {}", self.layout.size_of(ty).max(1)));
                    Ok(())
                }
            },
        }
    }

    fn emit_scalar_data(&mut self, ty: &TypeRef, expr: &scc_parser::Expr) -> SccResult<()> {
        use scc_parser::ExprKind;
        // Initializers were folded and converted by the parser.
        match (&expr.kind, ty.as_ref()) {
            (ExprKind::IntLit(v), _) => {
                let size = self.layout.size_of(ty).max(1);
                let directive = match size {
                    8 => ".quad",
                    4 => ".long",
                    2 => ".value",
                    _ => ".byte",
                };
                self.raw(&format!("\t{} {}", directive, truncate_imm(*v, size as u8)));
                Ok(())
            }
            (ExprKind::FloatLit(v), Type::Float(FloatKind::F32)) => {
                self.raw(&format!("\t.long {}", (*v as f32).to_bits()));
                Ok(())
            }
            (ExprKind::FloatLit(v), _) => {
                self.raw(&format!("\t.quad {}", v.to_bits()));
                Ok(())
            }
            (ExprKind::Cast { inner, .. }, Type::Ptr(_)) => {
                if let ExprKind::StrLit(index) = inner.kind {
                    self.raw(&format!("\t.quad {}", string_label(index)));
                    Ok(())
                } else {
                    Err(SccError::codegen_error("unsupported constant initializer"))
                }
            }
            _ => Err(SccError::codegen_error("unsupported constant initializer")),
        }
    }

    fn emit_strings(&mut self, program: &Program) {
        if program.strings.is_empty() {
            return;
        }
        self.raw("\t.section .rodata");
        for (i, text) in program.strings.iter().enumerate() {
            self.raw(&format!("{}:", string_label(i)));
            let mut escaped = String::new();
            for byte in text.bytes() {
                match byte {
                    b'"' => escaped.push_str("\\\""),
                    b'\\' => escaped.push_str("\\\\"),
                    0x20..=0x7e => escaped.push(byte as char),
                    b => {
                        let _ = write!(escaped, "\\{:03o}", b);
                    }
                }
            }
            self.raw(&format!("\t.string \"{}\"", escaped));
        }
    }
}

impl Backend for X86Backend {
    fn lower_function(&mut self, program: &Program, name: &str) -> SccResult<()> {
        let func = program
            .find_function(name)
            .filter(|f| f.is_defined())
            .ok_or_else(|| SccError::internal_error(format!("no definition for '{}'", name)))?;
        let mut ir = IrBuilder::build(program, self.layout, func)?;
        regalloc::allocate(&mut ir)?;
        self.emit_function(&ir)
    }

    fn finalize(mut self: Box<Self>, program: &Program) -> SccResult<Vec<u8>> {
        self.emit_globals(program)?;
        self.emit_strings(program);
        Ok(self.out.into_bytes())
    }
}

fn cond_suffix(cond: Cond) -> &'static str {
    match cond {
        Cond::Eq => "e",
        Cond::Ne => "ne",
        Cond::Lt => "l",
        Cond::Le => "le",
        Cond::Gt => "g",
        Cond::Ge => "ge",
        Cond::ULt => "b",
        Cond::ULe => "be",
        Cond::UGt => "a",
        Cond::UGe => "ae",
    }
}

/// Truncate an immediate to the width a sized store or directive expects.
fn truncate_imm(value: i64, size: u8) -> i64 {
    match size {
        8 => value,
        4 => value as i32 as i64,
        2 => value as i16 as i64,
        _ => value as i8 as i64,
    }
}
