//! Linear-scan register allocation
//!
//! Runs separately over the integer and floating-point register files.
//! IRs are numbered in program order across all blocks; block live-in and
//! live-out sets (computed by backward dataflow) extend intervals across
//! jumps. Argument registers and caller-saved registers are recorded as
//! occupied on intervals that overlap marshalling sequences and calls, so
//! the scan never parks a long-lived value in a register a call will
//! clobber.

use crate::ir::{
    Ir, IrFunction, VRegFlags, VRegId, VRegTable, VType,
};
use hashbrown::{HashMap, HashSet};
use log::{debug, trace};
use scc_common::{SccError, SccResult};
use std::cmp::Reverse;

/// Integer register file, in allocation-index order:
/// 0-1 spill-fixup temporaries (r10, r11), 2-6 callee-saved
/// (rbx, r12-r15), 7-12 argument registers (rdi, rsi, rdx, rcx, r8, r9).
pub const INT_REG_COUNT: usize = 13;
/// Low range reserved for spill fix-ups.
pub const SPILL_TEMP_COUNT: usize = 2;
/// Allocation index of each integer argument register.
pub const INT_ARG_REGS: [u8; 6] = [7, 8, 9, 10, 11, 12];
/// Caller-saved integer registers: the temps and the argument registers.
pub const INT_CALLER_SAVED: u32 = 0b1_1111_1000_0011;
/// Callee-saved integer registers: rbx, r12-r15.
pub const INT_CALLEE_SAVED: u32 = 0b0_0000_0111_1100;

/// Float register file: indices 2-13 are xmm2-xmm13; the spill-temp
/// indices 0 and 1 map to xmm14 and xmm15. xmm0/xmm1 stay out of the
/// allocator as scratch and result registers. All are caller-saved.
pub const FLOAT_REG_COUNT: usize = 14;

/// Allocation index of the integer argument register for position `n`.
pub fn int_arg_phys(n: usize) -> Option<u8> {
    INT_ARG_REGS.get(n).copied()
}

/// Allocation index holding float argument `n` (ABI register xmm`n`).
/// xmm0 and xmm1 are scratch, so the first two positions have no
/// allocatable home.
pub fn float_arg_phys(n: usize) -> Option<u8> {
    if (2..8).contains(&n) {
        Some(n as u8)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntervalState {
    Normal,
    /// Constant vregs never receive a physical register.
    Const,
    Spilled,
}

/// Live range of one vreg over global IR indices
#[derive(Debug)]
struct LiveInterval {
    vreg: VRegId,
    start: usize,
    end: usize,
    state: IntervalState,
    /// Physical registers unavailable anywhere in this interval.
    occupied: u32,
    phys: Option<u8>,
}

/// Allocate physical registers for every vreg of `func`.
///
/// Iterates to a fixed point: spill materialization inserts new IRs and
/// new fix-up vregs, which changes interval numbering, so intervals are
/// rebuilt and rescanned until no further spills occur.
pub fn allocate(func: &mut IrFunction) -> SccResult<()> {
    let mut round = 0usize;
    loop {
        round += 1;
        if round > 8 {
            return Err(SccError::internal_error(
                "register allocation failed to reach a fixed point",
            ));
        }

        compute_block_liveness(func);
        let mut intervals = build_intervals(func);
        annotate_occupancy(func, &mut intervals);

        let mut used_int = func.used_int_regs;
        let mut used_float = func.used_float_regs;
        scan_file(&mut intervals, &func.vregs, false, &mut used_int)?;
        scan_file(&mut intervals, &func.vregs, true, &mut used_float)?;
        func.used_int_regs = used_int;
        func.used_float_regs = used_float;

        // Commit assignments and collect fresh spills.
        let mut new_spills = Vec::new();
        for interval in &intervals {
            let vreg = func.vregs.get_mut(interval.vreg);
            match interval.state {
                IntervalState::Spilled => {
                    if !vreg.flags.contains(VRegFlags::SPILLED) {
                        new_spills.push(interval.vreg);
                    }
                }
                IntervalState::Normal => vreg.phys = interval.phys,
                IntervalState::Const => {}
            }
        }

        if new_spills.is_empty() {
            debug!(
                "regalloc '{}': {} rounds, frame {} bytes",
                func.name, round, func.frame_size
            );
            return Ok(());
        }

        for vreg_id in new_spills {
            let size = func.vregs.get(vreg_id).vtype.size.max(1) as usize;
            let offset = func.alloc_frame_slot(size.max(8), 8);
            let vreg = func.vregs.get_mut(vreg_id);
            vreg.flags |= VRegFlags::SPILLED;
            vreg.frame_offset = Some(offset);
            vreg.phys = None;
        }
        let inserted = materialize_spills(func);
        trace!("regalloc '{}': round {} inserted {} fix-ups", func.name, round, inserted);
    }
}

/// Backward dataflow for block-level liveness.
fn compute_block_liveness(func: &mut IrFunction) {
    let n = func.blocks.len();
    let mut uses: Vec<HashSet<VRegId>> = vec![HashSet::new(); n];
    let mut defs: Vec<HashSet<VRegId>> = vec![HashSet::new(); n];

    for (i, block) in func.blocks.iter().enumerate() {
        for ir in &block.irs {
            for use_reg in ir.uses().into_iter().flatten() {
                if !is_allocatable(&func.vregs, use_reg) {
                    continue;
                }
                if !defs[i].contains(&use_reg) {
                    uses[i].insert(use_reg);
                }
            }
            if let Some(def_reg) = ir.def() {
                if is_allocatable(&func.vregs, def_reg) {
                    defs[i].insert(def_reg);
                }
            }
        }
    }

    let labels: Vec<_> = func.blocks.iter().map(|b| b.label).collect();
    let index_of: HashMap<_, _> = labels.iter().enumerate().map(|(i, l)| (*l, i)).collect();
    let successors: Vec<Vec<usize>> = func
        .blocks
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let next = labels.get(i + 1).copied();
            b.successors(next).into_iter().filter_map(|l| index_of.get(&l).copied()).collect()
        })
        .collect();

    let mut live_in: Vec<HashSet<VRegId>> = vec![HashSet::new(); n];
    let mut live_out: Vec<HashSet<VRegId>> = vec![HashSet::new(); n];
    let mut changed = true;
    while changed {
        changed = false;
        for i in (0..n).rev() {
            let mut out: HashSet<VRegId> = HashSet::new();
            for &succ in &successors[i] {
                out.extend(live_in[succ].iter().copied());
            }
            let mut inn: HashSet<VRegId> = uses[i].clone();
            inn.extend(out.difference(&defs[i]).copied());
            if inn != live_in[i] || out != live_out[i] {
                changed = true;
                live_in[i] = inn;
                live_out[i] = out;
            }
        }
    }

    for (i, block) in func.blocks.iter_mut().enumerate() {
        block.live_in = std::mem::take(&mut live_in[i]);
        block.live_out = std::mem::take(&mut live_out[i]);
    }
}

fn is_allocatable(vregs: &VRegTable, id: VRegId) -> bool {
    let vreg = vregs.get(id);
    vreg.konst.is_none() && !vreg.flags.contains(VRegFlags::SPILLED)
}

/// Build one interval per allocatable vreg from global IR numbering.
fn build_intervals(func: &IrFunction) -> Vec<LiveInterval> {
    let mut map: HashMap<VRegId, LiveInterval> = HashMap::new();

    let mut touch = |id: VRegId, idx: usize, vregs: &VRegTable, is_def: bool| {
        if !is_allocatable(vregs, id) {
            return;
        }
        let vreg = vregs.get(id);
        let entry = map.entry(id).or_insert_with(|| LiveInterval {
            vreg: id,
            // Parameters are live from function entry.
            start: if vreg.flags.contains(VRegFlags::PARAM) { 0 } else { idx },
            end: idx,
            state: if vreg.konst.is_some() { IntervalState::Const } else { IntervalState::Normal },
            occupied: 0,
            phys: None,
        });
        if is_def {
            entry.start = entry.start.min(idx);
        }
        entry.end = entry.end.max(idx);
    };

    let mut idx = 0usize;
    for block in &func.blocks {
        let first = idx;
        let last = idx + block.irs.len().saturating_sub(1);
        for id in &block.live_in {
            touch(*id, first, &func.vregs, false);
        }
        for ir in &block.irs {
            for use_reg in ir.uses().into_iter().flatten() {
                touch(use_reg, idx, &func.vregs, false);
            }
            if let Some(def_reg) = ir.def() {
                touch(def_reg, idx, &func.vregs, true);
            }
            idx += 1;
        }
        for id in &block.live_out {
            touch(*id, last, &func.vregs, false);
        }
    }

    // Deterministic order: ties in the scan's (start, end) sort fall back
    // to vreg id, so repeated runs assign identically.
    let mut intervals: Vec<LiveInterval> = map.into_values().collect();
    intervals.sort_by_key(|iv| iv.vreg);
    intervals
}

/// Record argument-register and caller-saved pressure on overlapping
/// intervals.
///
/// An argument register is occupied from the `PushArg` that loads it
/// until the matching `Call`, so nothing allocated in between can
/// clobber a marshalled argument; caller-saved registers are occupied
/// for every interval that spans a call.
fn annotate_occupancy(func: &IrFunction, intervals: &mut [LiveInterval]) {
    // (is_float, phys, pusharg index) pending until the next Call.
    let mut pending: Vec<(bool, u8, usize)> = Vec::new();
    let mut idx = 0usize;
    for block in &func.blocks {
        for ir in &block.irs {
            match ir {
                Ir::PushArg { src, reg: Some(position), .. } => {
                    let is_float = func.vregs.get(*src).vtype.is_flonum();
                    let phys = if is_float {
                        float_arg_phys(*position as usize)
                    } else {
                        int_arg_phys(*position as usize)
                    };
                    if let Some(phys) = phys {
                        pending.push((is_float, phys, idx));
                    }
                }
                Ir::Call { .. } => {
                    for (is_float, phys, pushed_at) in pending.drain(..) {
                        for interval in intervals.iter_mut() {
                            let same_file =
                                func.vregs.get(interval.vreg).vtype.is_flonum() == is_float;
                            if same_file && interval.start <= idx && pushed_at <= interval.end {
                                interval.occupied |= 1 << phys;
                            }
                        }
                    }
                    for interval in intervals.iter_mut() {
                        if interval.start < idx && idx < interval.end {
                            let is_float = func.vregs.get(interval.vreg).vtype.is_flonum();
                            interval.occupied |= if is_float {
                                (1u32 << FLOAT_REG_COUNT) - 1
                            } else {
                                INT_CALLER_SAVED
                            };
                        }
                    }
                }
                _ => {}
            }
            idx += 1;
        }
    }
}

/// One linear scan over a single register file.
fn scan_file(
    intervals: &mut [LiveInterval],
    vregs: &VRegTable,
    float_file: bool,
    used_mask: &mut u32,
) -> SccResult<()> {
    let reg_count = if float_file { FLOAT_REG_COUNT } else { INT_REG_COUNT };

    let mut order: Vec<usize> = (0..intervals.len())
        .filter(|&i| {
            let iv = &intervals[i];
            iv.state == IntervalState::Normal
                && vregs.get(iv.vreg).vtype.is_flonum() == float_file
        })
        .collect();
    order.sort_by_key(|&i| (intervals[i].start, Reverse(intervals[i].end)));

    let mut active: Vec<usize> = Vec::new();
    let mut in_use: u32 = 0;

    for &i in &order {
        let start = intervals[i].start;
        // Expire finished intervals.
        active.retain(|&a| {
            if intervals[a].end <= start {
                if let Some(phys) = intervals[a].phys {
                    in_use &= !(1 << phys);
                }
                false
            } else {
                true
            }
        });

        let vreg = vregs.get(intervals[i].vreg);
        let occupied = intervals[i].occupied;
        let mut chosen: Option<u8> = None;

        // A register parameter prefers its ABI register.
        if vreg.flags.contains(VRegFlags::PARAM) {
            if let Some(position) = vreg.param_index {
                let pref = if float_file {
                    float_arg_phys(position as usize)
                } else {
                    int_arg_phys(position as usize)
                };
                if let Some(pref) = pref {
                    if in_use & (1 << pref) == 0 && occupied & (1 << pref) == 0 {
                        chosen = Some(pref);
                    }
                }
            }
        }

        // Otherwise the lowest free register outside the reserved
        // spill-temp range; fix-up temporaries may also use the temps.
        if chosen.is_none() {
            let lowest = if vreg.flags.contains(VRegFlags::NO_SPILL) { 0 } else { SPILL_TEMP_COUNT };
            for r in lowest..reg_count {
                let bit = 1u32 << r;
                if in_use & bit == 0 && occupied & bit == 0 {
                    chosen = Some(r as u8);
                    break;
                }
            }
        }

        match chosen {
            Some(phys) => {
                intervals[i].phys = Some(phys);
                in_use |= 1 << phys;
                *used_mask |= 1 << phys;
                active.push(i);
            }
            None => {
                // Pressure: spill the latest-ending candidate among the
                // active set and the current interval.
                let mut victim = i;
                let mut latest = intervals[i].end;
                for &a in &active {
                    if vregs.get(intervals[a].vreg).flags.contains(VRegFlags::NO_SPILL) {
                        continue;
                    }
                    if intervals[a].end > latest {
                        latest = intervals[a].end;
                        victim = a;
                    }
                }
                if victim == i {
                    if vregs.get(intervals[i].vreg).flags.contains(VRegFlags::NO_SPILL) {
                        return Err(SccError::internal_error(
                            "spill fix-up temporary cannot be spilled",
                        ));
                    }
                    intervals[i].state = IntervalState::Spilled;
                } else {
                    // The evicted interval's register moves to the
                    // current one.
                    let phys = intervals[victim]
                        .phys
                        .ok_or_else(|| SccError::internal_error("active interval without register"))?;
                    intervals[victim].state = IntervalState::Spilled;
                    intervals[victim].phys = None;
                    active.retain(|&a| a != victim);
                    if occupied & (1 << phys) != 0 {
                        // The freed register is unusable here; give up on
                        // the current interval instead.
                        in_use &= !(1 << phys);
                        intervals[i].state = IntervalState::Spilled;
                    } else {
                        intervals[i].phys = Some(phys);
                        *used_mask |= 1 << phys;
                        active.push(i);
                    }
                }
            }
        }
    }
    Ok(())
}

/// Bracket every occurrence of a spilled vreg with loads and stores
/// through fresh `NO_SPILL` temporaries. Returns the number of inserted
/// IRs.
fn materialize_spills(func: &mut IrFunction) -> usize {
    let spilled: HashSet<VRegId> = func
        .vregs
        .iter()
        .filter(|v| v.flags.contains(VRegFlags::SPILLED))
        .map(|v| v.id)
        .collect();
    if spilled.is_empty() {
        return 0;
    }

    let mut inserted = 0usize;
    let mut vreg_types: HashMap<VRegId, VType> =
        func.vregs.iter().map(|v| (v.id, v.vtype)).collect();

    for block_idx in 0..func.blocks.len() {
        let old = std::mem::take(&mut func.blocks[block_idx].irs);
        let mut new = Vec::with_capacity(old.len());
        for mut ir in old {
            // Existing fix-ups are the sanctioned accessors of spill
            // slots; they must not be bracketed again.
            if matches!(ir, Ir::LoadSpill { .. } | Ir::StoreSpill { .. }) {
                new.push(ir);
                continue;
            }
            // Reload spilled operands.
            for use_reg in ir.uses().into_iter().flatten() {
                if spilled.contains(&use_reg) {
                    let vtype = vreg_types[&use_reg];
                    let tmp = func.vregs.alloc_no_spill(vtype);
                    vreg_types.insert(tmp, vtype);
                    new.push(Ir::LoadSpill { dst: tmp, src: use_reg });
                    replace_use(&mut ir, use_reg, tmp);
                    inserted += 1;
                }
            }
            // Write back a spilled destination.
            match ir.def() {
                Some(def_reg) if spilled.contains(&def_reg) => {
                    let vtype = vreg_types[&def_reg];
                    let tmp = func.vregs.alloc_no_spill(vtype);
                    vreg_types.insert(tmp, vtype);
                    replace_def(&mut ir, def_reg, tmp);
                    new.push(ir);
                    new.push(Ir::StoreSpill { dst: def_reg, src: tmp });
                    inserted += 1;
                }
                _ => new.push(ir),
            }
        }
        func.blocks[block_idx].irs = new;
    }
    inserted
}

fn replace_use(ir: &mut Ir, from: VRegId, to: VRegId) {
    let patch = |reg: &mut VRegId| {
        if *reg == from {
            *reg = to;
        }
    };
    match ir {
        Ir::Mov { src, .. }
        | Ir::Load { addr: src, .. }
        | Ir::Un { src, .. }
        | Ir::Cast { src, .. }
        | Ir::PushArg { src, .. }
        | Ir::StoreSpill { src, .. } => patch(src),
        Ir::Store { addr, src } => {
            patch(addr);
            patch(src);
        }
        Ir::Bin { lhs, rhs, .. } | Ir::Cmp { lhs, rhs } => {
            patch(lhs);
            patch(rhs);
        }
        Ir::TableJmp { index, .. } => patch(index),
        Ir::Call { target: crate::ir::CallTarget::Indirect(reg), .. } => patch(reg),
        Ir::Ret { value: Some(reg) } => patch(reg),
        _ => {}
    }
}

fn replace_def(ir: &mut Ir, from: VRegId, to: VRegId) {
    let patch = |reg: &mut VRegId| {
        if *reg == from {
            *reg = to;
        }
    };
    match ir {
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
        | Ir::LoadSpill { dst, .. } => patch(dst),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, IrBinOp, Konst};

    fn small_func(vreg_count: usize) -> IrFunction {
        let mut func = IrFunction::new("t".to_string(), false);
        let mut block = BasicBlock::new(0);
        let mut ids = Vec::new();
        for _ in 0..vreg_count {
            ids.push(func.vregs.alloc(VType::int(8, false)));
        }
        let one = func.vregs.alloc_const(Konst::Int(1), VType::int(8, false));
        // Define everything up front, then use everything at the end, so
        // all intervals overlap.
        for &id in &ids {
            block.irs.push(Ir::Mov { dst: id, src: one });
        }
        let sum = func.vregs.alloc(VType::int(8, false));
        block.irs.push(Ir::Mov { dst: sum, src: one });
        for &id in &ids {
            block.irs.push(Ir::Bin { op: IrBinOp::Add, dst: sum, lhs: sum, rhs: id });
        }
        block.irs.push(Ir::Ret { value: Some(sum) });
        func.blocks.push(block);
        func
    }

    #[test]
    fn no_two_live_vregs_share_a_register() {
        let mut func = small_func(8);
        allocate(&mut func).expect("allocation should succeed");
        // All eight overlap, so all eight must have distinct registers.
        let mut seen = HashSet::new();
        for id in 0..8u32 {
            let phys = func.vregs.get(id).phys.expect("vreg should have a register");
            assert!(seen.insert(phys), "register {} assigned twice", phys);
        }
    }

    #[test]
    fn pressure_forces_spills_and_fixups() {
        let mut func = small_func(32);
        allocate(&mut func).expect("allocation should succeed");

        let spilled: Vec<_> = func
            .vregs
            .iter()
            .filter(|v| v.flags.contains(VRegFlags::SPILLED))
            .collect();
        assert!(!spilled.is_empty(), "32 overlapping values must spill");
        // Every spilled vreg has a frame slot, and the frame grew by at
        // least 8 bytes per spill.
        for v in &spilled {
            assert!(v.frame_offset.is_some());
        }
        assert!(func.frame_size >= spilled.len() * 8);

        // No IR references a spilled vreg directly; accesses go through
        // LoadSpill/StoreSpill.
        for block in &func.blocks {
            for ir in &block.irs {
                match ir {
                    Ir::LoadSpill { .. } | Ir::StoreSpill { .. } => {}
                    other => {
                        for reg in other.uses().into_iter().flatten().chain(other.def()) {
                            assert!(
                                !func.vregs.get(reg).flags.contains(VRegFlags::SPILLED),
                                "spilled vreg referenced directly by {:?}",
                                other
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn constants_never_get_registers() {
        let mut func = small_func(4);
        allocate(&mut func).expect("allocation should succeed");
        for v in func.vregs.iter() {
            if v.konst.is_some() {
                assert_eq!(v.phys, None);
            }
        }
    }
}
