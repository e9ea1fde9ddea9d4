//! Three-address intermediate representation
//!
//! A function is a container of basic blocks over virtual registers. Each
//! IR carries at most two operand vregs and one destination vreg; control
//! transfers name block labels. Fallthrough is implicit in block order,
//! but the builder always ends a block with an explicit terminator so the
//! CFG can be walked without position bookkeeping.

use bitflags::bitflags;
use hashbrown::HashSet;

/// Virtual register id, stable within one function
pub type VRegId = u32;

/// Basic-block label, unique within one function
pub type Label = u32;

bitflags! {
    /// Properties of a vreg's value type
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VTypeFlags: u8 {
        const UNSIGNED = 1 << 0;
        const FLONUM = 1 << 1;
    }
}

bitflags! {
    /// Allocation state flags of a vreg
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VRegFlags: u8 {
        /// Lives in a frame slot, not a register.
        const SPILLED = 1 << 0;
        /// Spill-fixup temporary; must never itself be spilled.
        const NO_SPILL = 1 << 1;
        /// Address taken; kept in memory by the builder.
        const REF = 1 << 2;
        /// Function parameter; its interval starts at function entry.
        const PARAM = 1 << 3;
    }
}

/// Value-type descriptor of a vreg
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VType {
    pub size: u8,
    pub align: u8,
    pub flags: VTypeFlags,
}

impl VType {
    pub fn int(size: u8, unsigned: bool) -> Self {
        let mut flags = VTypeFlags::empty();
        if unsigned {
            flags |= VTypeFlags::UNSIGNED;
        }
        Self { size, align: size, flags }
    }

    pub fn flonum(size: u8) -> Self {
        Self { size, align: size, flags: VTypeFlags::FLONUM }
    }

    pub fn is_flonum(&self) -> bool {
        self.flags.contains(VTypeFlags::FLONUM)
    }

    pub fn is_unsigned(&self) -> bool {
        self.flags.contains(VTypeFlags::UNSIGNED)
    }
}

/// A compile-time constant value bound to a vreg
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Konst {
    Int(i64),
    Float(f64),
}

/// A virtual register
#[derive(Debug, Clone)]
pub struct VReg {
    pub id: VRegId,
    pub vtype: VType,
    /// Constant vregs never receive a physical register; the emitter
    /// materializes them as immediates.
    pub konst: Option<Konst>,
    pub flags: VRegFlags,
    /// Argument position for register-passed parameters, counted per
    /// register file.
    pub param_index: Option<u8>,
    /// Physical register index, assigned by the allocator.
    pub phys: Option<u8>,
    /// Frame offset for spilled vregs, relative to the frame base.
    pub frame_offset: Option<i32>,
}

/// Per-function table of virtual registers
#[derive(Debug, Default)]
pub struct VRegTable {
    regs: Vec<VReg>,
}

impl VRegTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, vtype: VType) -> VRegId {
        let id = self.regs.len() as VRegId;
        self.regs.push(VReg {
            id,
            vtype,
            konst: None,
            flags: VRegFlags::empty(),
            param_index: None,
            phys: None,
            frame_offset: None,
        });
        id
    }

    pub fn alloc_const(&mut self, konst: Konst, vtype: VType) -> VRegId {
        let id = self.alloc(vtype);
        self.regs[id as usize].konst = Some(konst);
        id
    }

    /// A fresh temporary the allocator must keep in a register.
    pub fn alloc_no_spill(&mut self, vtype: VType) -> VRegId {
        let id = self.alloc(vtype);
        self.regs[id as usize].flags |= VRegFlags::NO_SPILL;
        id
    }

    pub fn get(&self, id: VRegId) -> &VReg {
        &self.regs[id as usize]
    }

    pub fn get_mut(&mut self, id: VRegId) -> &mut VReg {
        &mut self.regs[id as usize]
    }

    pub fn len(&self) -> usize {
        self.regs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VReg> {
        self.regs.iter()
    }
}

/// Comparison condition; signedness and float-ness were resolved when the
/// compare was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    ULt,
    ULe,
    UGt,
    UGe,
}

impl Cond {
    pub fn negate(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Le => Cond::Gt,
            Cond::Gt => Cond::Le,
            Cond::Ge => Cond::Lt,
            Cond::ULt => Cond::UGe,
            Cond::ULe => Cond::UGt,
            Cond::UGt => Cond::ULe,
            Cond::UGe => Cond::ULt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrBinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrUnOp {
    Neg,
    BitNot,
}

/// Call destination
#[derive(Debug, Clone)]
pub enum CallTarget {
    Direct(String),
    Indirect(VRegId),
}

/// One IR instruction
#[derive(Debug, Clone)]
pub enum Ir {
    /// Register copy (or immediate materialization for const sources).
    Mov { dst: VRegId, src: VRegId },
    /// Load `dst.vtype.size` bytes from the address in `addr`.
    Load { dst: VRegId, addr: VRegId },
    /// Store `src` to the address in `addr`.
    Store { addr: VRegId, src: VRegId },
    Bin { op: IrBinOp, dst: VRegId, lhs: VRegId, rhs: VRegId },
    Un { op: IrUnOp, dst: VRegId, src: VRegId },
    /// Set condition flags from `lhs ? rhs`.
    Cmp { lhs: VRegId, rhs: VRegId },
    /// Materialize the last compare's outcome as 0/1.
    SetCond { cond: Cond, dst: VRegId },
    CondJmp { cond: Cond, target: Label },
    Jmp { target: Label },
    /// Indexed branch through a label table; the index has already been
    /// biased to zero and bounds-checked.
    TableJmp { index: VRegId, targets: Vec<Label> },
    /// Width/sign/float conversion from `src`'s vtype to `dst`'s.
    Cast { dst: VRegId, src: VRegId },
    /// Address of a frame slot: frame base + offset.
    FrameAddr { dst: VRegId, offset: i32 },
    /// Address of a global or string-pool symbol.
    LabelAddr { dst: VRegId, label: String },
    /// Address relative to the outgoing-argument area (stack pointer).
    StackAddr { dst: VRegId, offset: i32 },
    /// Opens a call sequence; lets the allocator account for argument
    /// registers before the matching `Call`.
    Precall { arg_count: usize, stack_bytes: usize },
    /// Pass `src` as argument `index`; `reg` is the physical argument
    /// register in the operand's register file, or `None` for a stack
    /// argument at slot `index`.
    PushArg { src: VRegId, index: usize, reg: Option<u8> },
    Call {
        target: CallTarget,
        reg_args: usize,
        /// Float arguments passed in vector registers, for the variadic
        /// AL convention.
        float_reg_args: usize,
        total_args: usize,
        /// Value type of the result, if any.
        ret: Option<VType>,
    },
    /// Capture the machine return value into `dst`.
    Result { dst: VRegId },
    /// Adjust the stack pointer by `bytes` (negative grows the stack).
    SubSp { bytes: i32 },
    /// Opaque inline assembly, emitted verbatim.
    Asm { text: String },
    /// Reload a spilled vreg into its fix-up temporary.
    LoadSpill { dst: VRegId, src: VRegId },
    /// Write a fix-up temporary back to its spill slot.
    StoreSpill { dst: VRegId, src: VRegId },
    /// Function return.
    Ret { value: Option<VRegId> },
}

impl Ir {
    /// Operand vregs read by this IR, in a fixed-size buffer.
    pub fn uses(&self) -> [Option<VRegId>; 2] {
        match self {
            Ir::Mov { src, .. }
            | Ir::Load { addr: src, .. }
            | Ir::Un { src, .. }
            | Ir::Cast { src, .. }
            | Ir::PushArg { src, .. }
            | Ir::LoadSpill { src, .. } => [Some(*src), None],
            Ir::Store { addr, src } => [Some(*addr), Some(*src)],
            Ir::Bin { lhs, rhs, .. } | Ir::Cmp { lhs, rhs } => [Some(*lhs), Some(*rhs)],
            Ir::TableJmp { index, .. } => [Some(*index), None],
            Ir::Call { target: CallTarget::Indirect(reg), .. } => [Some(*reg), None],
            Ir::StoreSpill { src, .. } => [Some(*src), None],
            Ir::Ret { value } => [*value, None],
            _ => [None, None],
        }
    }

    /// Vreg defined (written) by this IR.
    pub fn def(&self) -> Option<VRegId> {
        match self {
            Ir::Mov { dst, .. }
            | Ir::Load { dst, .. }
            | Ir::Bin { dst, .. }
            | Ir::Un { dst, .. }
            | Ir::SetCond { dst, .. }
            | Ir::Cast { dst, .. }
            | Ir::FrameAddr { dst, .. }
            | Ir::LabelAddr { dst, .. }
            | Ir::StackAddr { dst, .. }
            | Ir::Result { dst }
            | Ir::LoadSpill { dst, .. } => Some(*dst),
            Ir::StoreSpill { dst, .. } => Some(*dst),
            _ => None,
        }
    }

    /// Whether this IR unconditionally leaves the block.
    pub fn is_terminator(&self) -> bool {
        matches!(self, Ir::Jmp { .. } | Ir::TableJmp { .. } | Ir::Ret { .. })
    }
}

/// A basic block: a label, straight-line IRs, and the liveness sets the
/// allocator computes across jumps
#[derive(Debug, Default)]
pub struct BasicBlock {
    pub label: Label,
    pub irs: Vec<Ir>,
    pub live_in: HashSet<VRegId>,
    pub live_out: HashSet<VRegId>,
}

impl BasicBlock {
    pub fn new(label: Label) -> Self {
        Self { label, irs: Vec::new(), live_in: HashSet::new(), live_out: HashSet::new() }
    }

    /// Successor labels of this block; `next` is the fallthrough target.
    pub fn successors(&self, next: Option<Label>) -> Vec<Label> {
        let mut out = Vec::new();
        let mut falls_through = true;
        for ir in &self.irs {
            match ir {
                Ir::Jmp { target } => {
                    out.push(*target);
                    falls_through = false;
                }
                Ir::CondJmp { target, .. } => out.push(*target),
                Ir::TableJmp { targets, .. } => {
                    out.extend(targets.iter().copied());
                    falls_through = false;
                }
                Ir::Ret { .. } => falls_through = false,
                _ => {}
            }
        }
        if falls_through {
            if let Some(next) = next {
                out.push(next);
            }
        }
        out
    }
}

/// Lowered form of one function, ready for allocation and emission
#[derive(Debug)]
pub struct IrFunction {
    pub name: String,
    pub blocks: Vec<BasicBlock>,
    pub vregs: VRegTable,
    /// Bytes of frame space for memory locals and spill slots.
    pub frame_size: usize,
    /// Largest outgoing stack-argument area of any call in the body.
    pub max_call_stack: usize,
    pub has_calls: bool,
    pub is_static: bool,
    /// Register-file usage mask filled by the allocator, for
    /// callee-saved bookkeeping.
    pub used_int_regs: u32,
    pub used_float_regs: u32,
}

impl IrFunction {
    pub fn new(name: String, is_static: bool) -> Self {
        Self {
            name,
            blocks: Vec::new(),
            vregs: VRegTable::new(),
            frame_size: 0,
            max_call_stack: 0,
            has_calls: false,
            is_static,
            used_int_regs: 0,
            used_float_regs: 0,
        }
    }

    /// Reserve an 8-byte-aligned frame slot and return its offset from
    /// the frame base (negative, rbp-relative).
    pub fn alloc_frame_slot(&mut self, size: usize, align: usize) -> i32 {
        let align = align.max(1);
        self.frame_size = (self.frame_size + size).div_ceil(align) * align;
        -(self.frame_size as i32)
    }
}
