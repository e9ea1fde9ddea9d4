//! WebAssembly backend
//!
//! A distinct code path that lowers the typed AST directly into
//! stack-machine bytecode, bypassing the IR and the register allocator.
//! The module is assembled from in-memory section buffers; function
//! signatures deduplicate into the Type section in first-encounter order,
//! and imported functions occupy the first function indices.

pub mod func;
pub mod leb128;
pub mod opcodes;

use crate::Backend;
use func::FuncEmitter;
use hashbrown::HashMap;
use leb128::{write_sleb128, write_uleb128};
use log::debug;
use opcodes as op;
use scc_common::{SccError, SccResult};
use scc_parser::{
    ExprKind, Initializer, Program, Reachability, ScopeId, StorageClass,
};
use scc_types::{FloatKind, FuncSig, Qualifiers, TargetLayout, Type, TypeRef};
use std::rc::Rc;

/// Module name all imported functions are bound under.
pub const IMPORT_MODULE: &str = "c";

/// Wasm value type (encoded representation)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValType {
    I32 = 0x7f,
    I64 = 0x7e,
    F32 = 0x7d,
    F64 = 0x7c,
}

impl ValType {
    pub fn byte(self) -> u8 {
        self as u8
    }
}

/// Map a C scalar type onto a wasm value type under the wasm32 layout.
pub fn valtype_of(layout: &TargetLayout, ty: &TypeRef) -> SccResult<ValType> {
    match ty.as_ref() {
        Type::Float(FloatKind::F32) => Ok(ValType::F32),
        Type::Float(FloatKind::F64) => Ok(ValType::F64),
        t if t.is_integer() => {
            if layout.size_of(t) == 8 {
                Ok(ValType::I64)
            } else {
                Ok(ValType::I32)
            }
        }
        other => Err(SccError::codegen_error(format!(
            "type '{}' is not supported by the WebAssembly target",
            other
        ))),
    }
}

/// One module global
struct GlobalEntry {
    valtype: ValType,
    mutable: bool,
    init_int: i64,
    init_float: f64,
}

/// WebAssembly backend state
pub struct WasmBackend {
    layout: TargetLayout,
    reach: Reachability,
    exports: Vec<String>,
    /// Signature-to-index table; structural equality over `FuncSig` gives
    /// O(1) lookup and first-encounter ordering.
    sig_indices: HashMap<Rc<FuncSig>, u32>,
    sig_order: Vec<Rc<FuncSig>>,
    /// Variable (scope, index) to global index.
    global_indices: HashMap<(ScopeId, usize), u32>,
    globals: Vec<GlobalEntry>,
    /// Per-function code bodies, in defined-function index order.
    codes: Vec<Vec<u8>>,
}

impl WasmBackend {
    pub fn new(
        program: &Program,
        reach: Reachability,
        exports: Vec<String>,
    ) -> SccResult<Self> {
        let layout = TargetLayout::WASM32;
        let mut backend = Self {
            layout,
            reach,
            exports,
            sig_indices: HashMap::new(),
            sig_order: Vec::new(),
            global_indices: HashMap::new(),
            globals: Vec::new(),
            codes: Vec::new(),
        };

        // Imports occupy the first function indices, so their signatures
        // are also the first entries considered for the Type section.
        for name in backend.reach.imports.clone() {
            let func = program.find_function(&name).ok_or_else(|| {
                SccError::link_error(format!("imported symbol '{}' is not declared", name))
            })?;
            let sig = func
                .ty
                .as_func()
                .cloned()
                .ok_or_else(|| SccError::link_error(format!("'{}' is not a function", name)))?;
            backend.check_signature(&sig)?;
            backend.sig_index(&sig);
        }

        backend.collect_globals(program)?;
        Ok(backend)
    }

    /// Deduplicated index of a signature in the Type section.
    pub fn sig_index(&mut self, sig: &Rc<FuncSig>) -> u32 {
        if let Some(index) = self.sig_indices.get(sig) {
            return *index;
        }
        let index = self.sig_order.len() as u32;
        self.sig_order.push(sig.clone());
        self.sig_indices.insert(sig.clone(), index);
        index
    }

    fn check_signature(&self, sig: &FuncSig) -> SccResult<()> {
        if sig.varargs {
            return Err(SccError::codegen_error(
                "variadic functions are not supported by the WebAssembly target",
            ));
        }
        for param in &sig.params {
            valtype_of(&self.layout, param)?;
        }
        if !sig.ret.is_void() {
            valtype_of(&self.layout, &sig.ret)?;
        }
        Ok(())
    }

    /// Register every non-extern static-storage scalar as a module
    /// global; mutability follows `const`-ness.
    fn collect_globals(&mut self, program: &Program) -> SccResult<()> {
        for scope_id in 0..program.scopes.len() as ScopeId {
            for (index, var) in program.scopes.get(scope_id).vars.iter().enumerate() {
                if !matches!(var.storage, StorageClass::Static) || !var.defined {
                    continue;
                }
                if var.ty.is_func() {
                    continue;
                }
                let valtype = valtype_of(&self.layout, &var.ty).map_err(|_| {
                    SccError::codegen_error(format!(
                        "global '{}' has type '{}', which the WebAssembly target cannot hold",
                        var.name, var.ty
                    ))
                })?;

                let (mut init_int, mut init_float) = (0i64, 0f64);
                if let Some(Initializer::Single(expr)) = &var.init {
                    match &expr.kind {
                        ExprKind::IntLit(v) => init_int = *v,
                        ExprKind::FloatLit(v) => init_float = *v,
                        _ => {
                            return Err(SccError::codegen_error(format!(
                                "global '{}' has a non-constant initializer",
                                var.name
                            )))
                        }
                    }
                }

                let global_index = self.globals.len() as u32;
                self.globals.push(GlobalEntry {
                    valtype,
                    mutable: !var.quals.contains(Qualifiers::CONST),
                    init_int,
                    init_float,
                });
                self.global_indices.insert((scope_id, index), global_index);
            }
        }
        Ok(())
    }

    pub(crate) fn global_index(&self, scope: ScopeId, index: usize) -> Option<u32> {
        self.global_indices.get(&(scope, index)).copied()
    }

    pub(crate) fn func_index(&self, name: &str) -> Option<u32> {
        self.reach.index_of(name)
    }

    pub(crate) fn layout(&self) -> TargetLayout {
        self.layout
    }

    // Section assembly helpers

    fn section(out: &mut Vec<u8>, id: u8, body: &[u8]) {
        if body.is_empty() {
            return;
        }
        out.push(id);
        write_uleb128(out, body.len() as u64);
        out.extend_from_slice(body);
    }

    fn write_name(out: &mut Vec<u8>, name: &str) {
        write_uleb128(out, name.len() as u64);
        out.extend_from_slice(name.as_bytes());
    }

    fn sig_bytes(&self, sig: &FuncSig) -> SccResult<Vec<u8>> {
        let mut out = vec![op::FUNC_TYPE];
        write_uleb128(&mut out, sig.params.len() as u64);
        for param in &sig.params {
            out.push(valtype_of(&self.layout, param)?.byte());
        }
        if sig.ret.is_void() {
            write_uleb128(&mut out, 0);
        } else {
            write_uleb128(&mut out, 1);
            out.push(valtype_of(&self.layout, &sig.ret)?.byte());
        }
        Ok(out)
    }
}

impl Backend for WasmBackend {
    fn lower_function(&mut self, program: &Program, name: &str) -> SccResult<()> {
        let func = program
            .find_function(name)
            .filter(|f| f.is_defined())
            .ok_or_else(|| SccError::internal_error(format!("no definition for '{}'", name)))?;
        let sig = func
            .ty
            .as_func()
            .cloned()
            .ok_or_else(|| SccError::internal_error("function without function type"))?;
        self.check_signature(&sig)?;
        self.sig_index(&sig);

        debug!("lowering '{}' for wasm", name);
        let body = FuncEmitter::lower(self, program, func, &sig)?;
        self.codes.push(body);
        Ok(())
    }

    fn finalize(self: Box<Self>, program: &Program) -> SccResult<Vec<u8>> {
        // Type section.
        let mut types = Vec::new();
        write_uleb128(&mut types, self.sig_order.len() as u64);
        for sig in &self.sig_order {
            types.extend_from_slice(&self.sig_bytes(sig)?);
        }

        // Import section: one function entry per undefined reachable
        // function, under the fixed module name.
        let mut imports = Vec::new();
        if !self.reach.imports.is_empty() {
            write_uleb128(&mut imports, self.reach.imports.len() as u64);
            for name in &self.reach.imports {
                let func = program.find_function(name).ok_or_else(|| {
                    SccError::link_error(format!("imported symbol '{}' is not declared", name))
                })?;
                let sig = func.ty.as_func().cloned().ok_or_else(|| {
                    SccError::link_error(format!("imported symbol '{}' is not a function", name))
                })?;
                let sig_idx = self.sig_indices[&sig];
                Self::write_name(&mut imports, IMPORT_MODULE);
                Self::write_name(&mut imports, name);
                imports.push(op::KIND_FUNC);
                write_uleb128(&mut imports, sig_idx as u64);
            }
        }

        // Function section: the type index of each defined function.
        let mut functions = Vec::new();
        if !self.reach.defined.is_empty() {
            write_uleb128(&mut functions, self.reach.defined.len() as u64);
            for name in &self.reach.defined {
                let func = program.find_function(name).ok_or_else(|| {
                    SccError::internal_error(format!("lost definition of '{}'", name))
                })?;
                let sig = func.ty.as_func().cloned().ok_or_else(|| {
                    SccError::internal_error(format!("'{}' lost its function type", name))
                })?;
                write_uleb128(&mut functions, self.sig_indices[&sig] as u64);
            }
        }

        // Global section.
        let mut globals = Vec::new();
        if !self.globals.is_empty() {
            write_uleb128(&mut globals, self.globals.len() as u64);
            for global in &self.globals {
                globals.push(global.valtype.byte());
                globals.push(global.mutable as u8);
                match global.valtype {
                    ValType::I32 => {
                        globals.push(op::I32_CONST);
                        write_sleb128(&mut globals, global.init_int as i32 as i64);
                    }
                    ValType::I64 => {
                        globals.push(op::I64_CONST);
                        write_sleb128(&mut globals, global.init_int);
                    }
                    ValType::F32 => {
                        globals.push(op::F32_CONST);
                        globals
                            .extend_from_slice(&(global.init_float as f32).to_le_bytes());
                    }
                    ValType::F64 => {
                        globals.push(op::F64_CONST);
                        globals.extend_from_slice(&global.init_float.to_le_bytes());
                    }
                }
                globals.push(op::END);
            }
        }

        // Export section: every requested symbol, function kind.
        let mut exports = Vec::new();
        write_uleb128(&mut exports, self.exports.len() as u64);
        for name in &self.exports {
            let index = self.reach.index_of(name).ok_or_else(|| {
                SccError::link_error(format!("exported symbol '{}' is not defined", name))
            })?;
            Self::write_name(&mut exports, name);
            exports.push(op::KIND_FUNC);
            write_uleb128(&mut exports, index as u64);
        }

        // Code section: size-prefixed bodies.
        let mut code = Vec::new();
        if !self.codes.is_empty() {
            write_uleb128(&mut code, self.codes.len() as u64);
            for body in &self.codes {
                write_uleb128(&mut code, body.len() as u64);
                code.extend_from_slice(body);
            }
        }

        // Module: magic + version, then sections in canonical id order.
        let mut out = Vec::new();
        out.extend_from_slice(b"\0asm");
        out.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]);
        Self::section(&mut out, op::SEC_TYPE, &types);
        Self::section(&mut out, op::SEC_IMPORT, &imports);
        Self::section(&mut out, op::SEC_FUNCTION, &functions);
        Self::section(&mut out, op::SEC_GLOBAL, &globals);
        Self::section(&mut out, op::SEC_EXPORT, &exports);
        Self::section(&mut out, op::SEC_CODE, &code);
        Ok(out)
    }
}
