//! Declaration parsing and symbol registration
//!
//! A declaration is a base type (storage class + specifiers + qualifiers)
//! followed by declarators. Declarators parse outside-in: the pointer
//! prefix wraps the base, suffixes fold right-to-left, and parenthesized
//! inner declarators are skipped and re-parsed once the outer type is
//! known.

use crate::ast::{Expr, ExprKind, Function, Initializer, Stmt, StmtKind, VarDeclItem, VarRef};
use crate::scope::{ScopeKind, StorageClass, VarInfo, GLOBAL_SCOPE};
use crate::Parser;
use scc_common::{SccError, SccResult, Spanned};
use scc_lexer::TokenKind;
use scc_types::{
    layout_struct, Bitfield, EnumDef, FloatKind, IntKind, Member, Qualifiers, StructDef, Type,
    TypeRef,
};

/// Storage-class specifier attached to a declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StorageSpec {
    Typedef,
    Static,
    Extern,
}

/// Parsed declaration specifiers
pub(crate) struct DeclSpec {
    pub ty: TypeRef,
    pub quals: Qualifiers,
    pub storage: Option<StorageSpec>,
}

/// One parameter of a function declarator, already decayed
pub(crate) struct ParamDecl {
    pub name: Option<Spanned<String>>,
    pub ty: TypeRef,
}

enum Suffix {
    Array(Option<usize>),
    Func { params: Vec<ParamDecl>, varargs: bool },
}

impl Parser {
    pub(crate) fn parse_top_level(&mut self) -> SccResult<()> {
        if self.eat(&TokenKind::Semicolon) {
            return Ok(());
        }
        let spec = self.parse_decl_specifiers()?;

        // Tag-only declaration: `struct s { ... };`
        if self.eat(&TokenKind::Semicolon) {
            return Ok(());
        }

        loop {
            let (name, ty, params) = self.parse_declarator(spec.ty.clone())?;
            let Some(name) = name else {
                return Err(self.syntax_error("declarator requires a name"));
            };

            if ty.is_func() && self.check(&TokenKind::LBrace) {
                return self.parse_function_definition(name, ty, &spec, params);
            }
            self.declare_name(&name, ty, &spec, true)?;

            if self.eat(&TokenKind::Comma) {
                continue;
            }
            self.expect(TokenKind::Semicolon)?;
            return Ok(());
        }
    }

    /// A declaration statement inside a block.
    pub(crate) fn parse_declaration_stmt(&mut self) -> SccResult<Stmt> {
        let start = self.cur_span();
        let spec = self.parse_decl_specifiers()?;

        if self.eat(&TokenKind::Semicolon) {
            return Ok(Stmt { kind: StmtKind::Empty, span: start });
        }

        let mut items = Vec::new();
        loop {
            let (name, ty, _params) = self.parse_declarator(spec.ty.clone())?;
            let Some(name) = name else {
                return Err(self.syntax_error("declarator requires a name"));
            };
            if let Some(item) = self.declare_name(&name, ty, &spec, false)? {
                items.push(item);
            }
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            self.expect(TokenKind::Semicolon)?;
            break;
        }

        let span = start.combine(self.prev_span());
        if items.is_empty() {
            Ok(Stmt { kind: StmtKind::Empty, span })
        } else {
            Ok(Stmt { kind: StmtKind::VarDecl(items), span })
        }
    }

    /// Register one declared name. Returns a declaration item when the
    /// variable is a block-scope automatic that code must initialize.
    fn declare_name(
        &mut self,
        name: &Spanned<String>,
        ty: TypeRef,
        spec: &DeclSpec,
        global: bool,
    ) -> SccResult<Option<VarDeclItem>> {
        if spec.storage == Some(StorageSpec::Typedef) {
            self.scopes
                .get_mut(self.scope)
                .typedefs
                .insert(name.value.clone(), ty);
            return Ok(None);
        }

        if ty.is_func() {
            let is_static = spec.storage == Some(StorageSpec::Static);
            self.declare_function(name, ty, is_static, None);
            return Ok(None);
        }

        let is_extern = spec.storage == Some(StorageSpec::Extern);
        let is_static_storage = global || spec.storage == Some(StorageSpec::Static);

        let mut init = None;
        if self.eat(&TokenKind::Assign) {
            let parsed = self.parse_initializer()?;
            // A single scalar initializer converts like an assignment, so
            // the cast-insertion invariant holds for initializers too.
            init = Some(match parsed {
                Initializer::Single(expr) if !ty.is_array() && !ty.is_struct() => {
                    let expr = self.decay(expr);
                    Initializer::Single(self.convert_for_assign(ty.clone(), expr))
                }
                other => other,
            });
        }
        if is_extern && init.is_some() {
            self.sema_error("'extern' declaration cannot have an initializer", name.span);
            init = None;
        }

        let ty = self.complete_array_from_init(ty, init.as_ref());
        // An extern declaration may stay incomplete; a definition cannot.
        if !is_extern && self.layout.size_of(&ty) == 0 {
            self.sema_error(
                format!("variable '{}' has incomplete type '{}'", name.value, ty),
                name.span,
            );
        }

        if is_static_storage {
            if let Some(init) = &init {
                self.check_const_initializer(init);
            }
            let label = if global {
                name.value.clone()
            } else {
                let func = self.func_name.clone().unwrap_or_default();
                self.anon_counter += 1;
                format!("{}.{}.{}", func, name.value, self.anon_counter)
            };

            let storage =
                if is_extern { StorageClass::Extern } else { StorageClass::Static };
            let target = if global { GLOBAL_SCOPE } else { self.scope };
            if global {
                if let Some(prev) = self.scopes.find_local(GLOBAL_SCOPE, &name.value) {
                    let (conflicting, redefined) = {
                        let prev_var = self.scopes.var(GLOBAL_SCOPE, prev);
                        (prev_var.ty != ty, prev_var.init.is_some() && init.is_some())
                    };
                    if conflicting {
                        self.sema_error(
                            format!("conflicting types for '{}'", name.value),
                            name.span,
                        );
                    } else if redefined {
                        self.sema_error(format!("redefinition of '{}'", name.value), name.span);
                    }
                    // Tentative redeclaration: merge the initializer in.
                    if init.is_some() {
                        let var = self.scopes.var_mut(GLOBAL_SCOPE, prev);
                        var.init = init;
                        var.defined = true;
                    }
                    return Ok(None);
                }
            }
            self.scopes.add_var(
                target,
                VarInfo {
                    name: name.value.clone(),
                    ty,
                    quals: spec.quals,
                    storage,
                    label: Some(label),
                    init,
                    param_index: None,
                    internal: spec.storage == Some(StorageSpec::Static),
                    defined: !is_extern,
                    span: name.span,
                },
            );
            return Ok(None);
        }

        // Block-scope automatic.
        if self.scopes.find_local(self.scope, &name.value).is_some() {
            self.sema_error(format!("redefinition of '{}'", name.value), name.span);
        }
        let index = self.scopes.add_var(
            self.scope,
            VarInfo {
                name: name.value.clone(),
                ty,
                quals: spec.quals,
                storage: StorageClass::Auto,
                label: None,
                init: None,
                param_index: None,
                internal: false,
                defined: true,
                span: name.span,
            },
        );
        let var = VarRef { name: name.value.clone(), scope: self.scope, index };
        Ok(Some(VarDeclItem { var, init }))
    }

    pub(crate) fn declare_function(
        &mut self,
        name: &Spanned<String>,
        ty: TypeRef,
        is_static: bool,
        body: Option<(crate::scope::ScopeId, Vec<VarRef>, Stmt)>,
    ) {
        let defined = body.is_some();
        let (conflicting, redefined) = self
            .functions
            .iter()
            .find(|f| f.name == name.value)
            .map(|f| (f.ty != ty, f.is_defined() && defined))
            .unwrap_or((false, false));
        if conflicting {
            self.sema_error(format!("conflicting types for '{}'", name.value), name.span);
        } else if redefined {
            self.sema_error(format!("redefinition of '{}'", name.value), name.span);
        }

        let (param_scope, params, body_stmt) = match body {
            Some((scope, params, stmt)) => (scope, params, Some(stmt)),
            None => (GLOBAL_SCOPE, Vec::new(), None),
        };
        self.functions.push(Function {
            name: name.value.clone(),
            ty: ty.clone(),
            param_scope,
            params,
            body: body_stmt,
            is_static,
            span: name.span,
        });

        match self.scopes.find_local(GLOBAL_SCOPE, &name.value) {
            None => {
                self.scopes.add_var(
                    GLOBAL_SCOPE,
                    VarInfo {
                        name: name.value.clone(),
                        ty,
                        quals: Qualifiers::empty(),
                        storage: if is_static {
                            StorageClass::Static
                        } else {
                            StorageClass::Extern
                        },
                        label: Some(name.value.clone()),
                        init: None,
                        param_index: None,
                        internal: is_static,
                        defined,
                        span: name.span,
                    },
                );
            }
            Some(index) if defined => {
                self.scopes.var_mut(GLOBAL_SCOPE, index).defined = true;
            }
            Some(_) => {}
        }
    }

    fn parse_function_definition(
        &mut self,
        name: Spanned<String>,
        ty: TypeRef,
        spec: &DeclSpec,
        params: Vec<ParamDecl>,
    ) -> SccResult<()> {
        let param_scope = self.enter_scope(ScopeKind::Params);
        let mut param_refs = Vec::new();
        for (i, param) in params.iter().enumerate() {
            let Some(pname) = &param.name else {
                self.sema_error(format!("parameter {} requires a name", i + 1), name.span);
                continue;
            };
            let index = self.scopes.add_var(
                param_scope,
                VarInfo {
                    name: pname.value.clone(),
                    ty: param.ty.clone(),
                    quals: Qualifiers::empty(),
                    storage: StorageClass::Auto,
                    label: None,
                    init: None,
                    param_index: Some(i),
                    internal: false,
                    defined: true,
                    span: pname.span,
                },
            );
            param_refs.push(VarRef { name: pname.value.clone(), scope: param_scope, index });
        }

        let Some(sig) = ty.as_func().cloned() else {
            return Err(SccError::internal_error("function definition without function type"));
        };
        self.ret_type = Some(sig.ret.clone());
        self.func_name = Some(name.value.clone());
        self.labels.clear();
        self.gotos.clear();

        let body = self.parse_block()?;

        for goto in std::mem::take(&mut self.gotos) {
            if !self.labels.contains(&goto.value) {
                self.sema_error(format!("use of undeclared label '{}'", goto.value), goto.span);
            }
        }

        self.leave_scope();
        self.ret_type = None;
        self.func_name = None;

        let is_static = spec.storage == Some(StorageSpec::Static);
        self.declare_function(&name, ty, is_static, Some((param_scope, param_refs, body)));
        Ok(())
    }

    // Specifiers

    pub(crate) fn parse_decl_specifiers(&mut self) -> SccResult<DeclSpec> {
        let mut storage: Option<StorageSpec> = None;
        let mut quals = Qualifiers::empty();
        let mut base: Option<TypeRef> = None;
        let mut signedness: Option<bool> = None;
        let mut short_count = 0u32;
        let mut long_count = 0u32;
        let mut saw_any = false;

        loop {
            let span = self.cur_span();
            match self.peek_kind().clone() {
                TokenKind::KwConst => {
                    quals |= Qualifiers::CONST;
                    self.advance();
                }
                TokenKind::KwTypedef | TokenKind::KwStatic | TokenKind::KwExtern => {
                    let new = match self.peek_kind() {
                        TokenKind::KwTypedef => StorageSpec::Typedef,
                        TokenKind::KwStatic => StorageSpec::Static,
                        _ => StorageSpec::Extern,
                    };
                    if storage.is_some() {
                        self.sema_error("multiple storage classes in declaration", span);
                    }
                    storage = Some(new);
                    self.advance();
                }
                TokenKind::KwVoid => {
                    self.set_base(&mut base, Type::void(), span);
                    self.advance();
                }
                TokenKind::KwChar => {
                    self.set_base(&mut base, Type::char_type(), span);
                    self.advance();
                }
                TokenKind::KwInt => {
                    self.set_base(&mut base, Type::plain_int(), span);
                    self.advance();
                }
                TokenKind::KwFloat => {
                    self.set_base(&mut base, Type::float(FloatKind::F32), span);
                    self.advance();
                }
                TokenKind::KwDouble => {
                    self.set_base(&mut base, Type::float(FloatKind::F64), span);
                    self.advance();
                }
                TokenKind::KwShort => {
                    short_count += 1;
                    self.advance();
                }
                TokenKind::KwLong => {
                    long_count += 1;
                    self.advance();
                }
                TokenKind::KwSigned => {
                    signedness = Some(true);
                    self.advance();
                }
                TokenKind::KwUnsigned => {
                    signedness = Some(false);
                    self.advance();
                }
                TokenKind::KwStruct | TokenKind::KwUnion => {
                    let is_union = matches!(self.peek_kind(), TokenKind::KwUnion);
                    self.advance();
                    let ty = self.parse_struct_spec(is_union)?;
                    self.set_base(&mut base, ty, span);
                }
                TokenKind::KwEnum => {
                    self.advance();
                    let ty = self.parse_enum_spec()?;
                    self.set_base(&mut base, ty, span);
                }
                TokenKind::Ident(name)
                    if base.is_none()
                        && signedness.is_none()
                        && short_count == 0
                        && long_count == 0 =>
                {
                    match self.scopes.lookup_typedef(self.scope, &name) {
                        Some(ty) => {
                            self.set_base(&mut base, ty, span);
                            self.advance();
                        }
                        None => break,
                    }
                }
                _ => break,
            }
            saw_any = true;
        }

        if !saw_any {
            return Err(self.syntax_error(format!(
                "expected declaration specifiers, found '{}'",
                self.peek_kind()
            )));
        }

        let ty = match base {
            Some(ty) => {
                if short_count > 0 || long_count > 0 || signedness.is_some() {
                    match ty.as_ref() {
                        Type::Int { .. } => self.combine_int(signedness, short_count, long_count),
                        _ => {
                            self.sema_error(
                                "type modifiers on a non-integer base type",
                                self.prev_span(),
                            );
                            ty
                        }
                    }
                } else {
                    ty
                }
            }
            // Bare modifiers default the base to int, as in `unsigned x;`.
            None => self.combine_int(signedness, short_count, long_count),
        };

        Ok(DeclSpec { ty, quals, storage })
    }

    fn set_base(&mut self, base: &mut Option<TypeRef>, ty: TypeRef, span: scc_common::Span) {
        if base.is_some() {
            self.sema_error("two or more base types in declaration specifiers", span);
        }
        *base = Some(ty);
    }

    fn combine_int(&mut self, signedness: Option<bool>, short: u32, long: u32) -> TypeRef {
        let signed = signedness.unwrap_or(true);
        let kind = if short > 0 {
            IntKind::Short
        } else if long >= 2 {
            IntKind::LongLong
        } else if long == 1 {
            IntKind::Long
        } else {
            IntKind::Int
        };
        Type::int(kind, signed)
    }

    fn parse_struct_spec(&mut self, is_union: bool) -> SccResult<TypeRef> {
        let tag = match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Some(name)
            }
            _ => None,
        };

        if !self.check(&TokenKind::LBrace) {
            // Reference: find or forward-declare the tag.
            let Some(tag) = tag else {
                return Err(self.syntax_error("expected struct tag or member list"));
            };
            if let Some(ty) = self.scopes.lookup_tag(self.scope, &tag) {
                return Ok(ty);
            }
            let def = StructDef::incomplete(Some(tag.clone()), is_union);
            let ty: TypeRef = std::rc::Rc::new(Type::Struct(def));
            self.scopes.get_mut(self.scope).tags.insert(tag, ty.clone());
            return Ok(ty);
        }

        // Definition: reuse an incomplete tag declared in this scope.
        let def = match tag
            .as_ref()
            .and_then(|t| self.scopes.find_tag_local(self.scope, t))
        {
            Some(existing) => match existing.as_struct() {
                Some(def) if !def.is_complete.get() && def.is_union == is_union => def.clone(),
                _ => {
                    self.sema_error(
                        format!("redefinition of '{}'", tag.as_deref().unwrap_or("?")),
                        self.cur_span(),
                    );
                    StructDef::incomplete(tag.clone(), is_union)
                }
            },
            None => StructDef::incomplete(tag.clone(), is_union),
        };
        let ty: TypeRef = std::rc::Rc::new(Type::Struct(def.clone()));
        if let Some(tag) = &tag {
            self.scopes.get_mut(self.scope).tags.insert(tag.clone(), ty.clone());
        }

        self.expect(TokenKind::LBrace)?;
        let mut members = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.at_eof() {
            self.parse_member_declaration(&mut members)?;
        }
        self.expect(TokenKind::RBrace)?;

        *def.members.borrow_mut() = members;
        layout_struct(&def, &self.layout);
        Ok(ty)
    }

    fn parse_member_declaration(&mut self, members: &mut Vec<Member>) -> SccResult<()> {
        let spec = self.parse_decl_specifiers()?;
        if spec.storage.is_some() {
            self.sema_error("storage class in struct member", self.prev_span());
        }

        loop {
            let span = self.cur_span();
            let (name, ty) = if self.check(&TokenKind::Colon) {
                // Anonymous bitfield.
                (None, spec.ty.clone())
            } else {
                let (name, ty, _) = self.parse_declarator(spec.ty.clone())?;
                (name, ty)
            };

            let bitfield = if self.eat(&TokenKind::Colon) {
                let width = self.const_int_expr()? as u32;
                if !ty.is_integer() {
                    self.sema_error("bitfield has non-integer type", span);
                }
                Some(Bitfield { width, position: 0 })
            } else {
                None
            };

            if name.is_none() && bitfield.is_none() {
                self.sema_error("member declaration without a name", span);
            }
            members.push(Member {
                name: name.map(|n| n.value).unwrap_or_default(),
                ty,
                quals: spec.quals,
                offset: 0,
                bitfield,
            });

            if self.eat(&TokenKind::Comma) {
                continue;
            }
            self.expect(TokenKind::Semicolon)?;
            return Ok(());
        }
    }

    fn parse_enum_spec(&mut self) -> SccResult<TypeRef> {
        let tag = match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Some(name)
            }
            _ => None,
        };

        if !self.check(&TokenKind::LBrace) {
            let Some(tag) = tag else {
                return Err(self.syntax_error("expected enum tag or enumerator list"));
            };
            if let Some(ty) = self.scopes.lookup_tag(self.scope, &tag) {
                return Ok(ty);
            }
            let ty: TypeRef = std::rc::Rc::new(Type::Enum(EnumDef::incomplete(Some(tag.clone()))));
            self.scopes.get_mut(self.scope).tags.insert(tag, ty.clone());
            return Ok(ty);
        }

        let def = EnumDef::incomplete(tag.clone());
        def.is_complete.set(true);
        let ty: TypeRef = std::rc::Rc::new(Type::Enum(def));
        if let Some(tag) = &tag {
            self.scopes.get_mut(self.scope).tags.insert(tag.clone(), ty.clone());
        }

        self.expect(TokenKind::LBrace)?;
        let mut next_value = 0i64;
        while !self.check(&TokenKind::RBrace) {
            let name = self.expect_ident()?;
            if self.eat(&TokenKind::Assign) {
                next_value = self.const_int_expr()?;
            }
            if self.scopes.find_local(self.scope, &name.value).is_some() {
                self.sema_error(format!("redefinition of '{}'", name.value), name.span);
            }
            self.scopes.add_var(
                self.scope,
                VarInfo {
                    name: name.value.clone(),
                    ty: ty.clone(),
                    quals: Qualifiers::empty(),
                    storage: StorageClass::EnumConst(next_value),
                    label: None,
                    init: None,
                    param_index: None,
                    internal: false,
                    defined: true,
                    span: name.span,
                },
            );
            next_value += 1;
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(ty)
    }

    // Declarators

    pub(crate) fn parse_declarator(
        &mut self,
        base: TypeRef,
    ) -> SccResult<(Option<Spanned<String>>, TypeRef, Vec<ParamDecl>)> {
        let mut ty = base;
        while self.eat(&TokenKind::Star) {
            while self.eat(&TokenKind::KwConst) {}
            ty = Type::ptr_to(ty);
        }

        if self.check(&TokenKind::LParen) && self.is_nested_declarator() {
            self.advance(); // '('
            let inner_start = self.token_pos();
            self.skip_declarator_tokens()?;
            self.expect(TokenKind::RParen)?;
            let (ty, _) = self.parse_declarator_suffix(ty)?;
            let resume = self.token_pos();
            self.set_token_pos(inner_start);
            let result = self.parse_declarator(ty)?;
            self.set_token_pos(resume);
            return Ok(result);
        }

        let name = match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                let span = self.cur_span();
                self.advance();
                Some(Spanned::new(name, span))
            }
            _ => None,
        };
        let (ty, params) = self.parse_declarator_suffix(ty)?;
        Ok((name, ty, params))
    }

    /// Distinguish `(*f)(...)` from a parameter list after the cursor's `(`.
    fn is_nested_declarator(&self) -> bool {
        match self.peek_at(1) {
            TokenKind::Star | TokenKind::LParen => true,
            TokenKind::Ident(name) => self.scopes.lookup_typedef(self.scope, name).is_none(),
            _ => false,
        }
    }

    fn skip_declarator_tokens(&mut self) -> SccResult<()> {
        let mut depth = 0i32;
        loop {
            match self.peek_kind() {
                TokenKind::LParen | TokenKind::LBracket => depth += 1,
                TokenKind::RParen if depth == 0 => return Ok(()),
                TokenKind::RParen | TokenKind::RBracket => depth -= 1,
                TokenKind::Eof => return Err(self.syntax_error("unterminated declarator")),
                _ => {}
            }
            self.advance();
        }
    }

    fn parse_declarator_suffix(
        &mut self,
        base: TypeRef,
    ) -> SccResult<(TypeRef, Vec<ParamDecl>)> {
        let mut suffixes = Vec::new();
        loop {
            if self.eat(&TokenKind::LBracket) {
                let len = if self.check(&TokenKind::RBracket) {
                    None
                } else {
                    Some(self.const_int_expr()?.max(0) as usize)
                };
                self.expect(TokenKind::RBracket)?;
                suffixes.push(Suffix::Array(len));
            } else if self.check(&TokenKind::LParen) {
                self.advance();
                let (params, varargs) = self.parse_param_list()?;
                suffixes.push(Suffix::Func { params, varargs });
            } else {
                break;
            }
        }

        // Suffixes apply left-to-right in source order, so fold from the
        // right: `x[2][3]` is array-2 of array-3. The leftmost function
        // suffix is the one whose parameters a definition binds.
        let mut params_out = Vec::new();
        let mut ty = base;
        for suffix in suffixes.into_iter().rev() {
            match suffix {
                Suffix::Array(len) => ty = Type::array_of(ty, len),
                Suffix::Func { params, varargs } => {
                    let param_types = params.iter().map(|p| p.ty.clone()).collect();
                    ty = Type::func(ty, param_types, varargs);
                    params_out = params;
                }
            }
        }
        Ok((ty, params_out))
    }

    fn parse_param_list(&mut self) -> SccResult<(Vec<ParamDecl>, bool)> {
        if self.eat(&TokenKind::RParen) {
            return Ok((Vec::new(), false));
        }
        if self.check(&TokenKind::KwVoid) && self.peek_at(1) == &TokenKind::RParen {
            self.advance();
            self.advance();
            return Ok((Vec::new(), false));
        }

        let mut params = Vec::new();
        let mut varargs = false;
        loop {
            if self.eat(&TokenKind::Ellipsis) {
                varargs = true;
                break;
            }
            let spec = self.parse_decl_specifiers()?;
            if spec.storage.is_some() {
                self.sema_error("storage class in parameter declaration", self.prev_span());
            }
            let (name, ty, _) = self.parse_declarator(spec.ty)?;
            // Arrays and functions decay in parameter position.
            let ty = match ty.as_ref() {
                Type::Array { elem, .. } => Type::ptr_to(elem.clone()),
                Type::Func(_) => Type::ptr_to(ty.clone()),
                _ => ty,
            };
            params.push(ParamDecl { name, ty });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok((params, varargs))
    }

    /// A type name for casts and `sizeof`: specifiers + abstract declarator.
    pub(crate) fn parse_type_name(&mut self) -> SccResult<TypeRef> {
        let spec = self.parse_decl_specifiers()?;
        if spec.storage.is_some() {
            self.sema_error("storage class in type name", self.prev_span());
        }
        let (name, ty, _) = self.parse_declarator(spec.ty)?;
        if let Some(name) = name {
            self.sema_error(format!("unexpected name '{}' in type name", name.value), name.span);
        }
        Ok(ty)
    }

    // Initializers

    pub(crate) fn parse_initializer(&mut self) -> SccResult<Initializer> {
        if self.eat(&TokenKind::LBrace) {
            let mut items = Vec::new();
            while !self.check(&TokenKind::RBrace) {
                items.push(self.parse_initializer()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RBrace)?;
            Ok(Initializer::List(items))
        } else {
            let expr = self.parse_assign_expr()?;
            Ok(Initializer::Single(expr))
        }
    }

    /// Static-storage initializers must fold to literals.
    fn check_const_initializer(&mut self, init: &Initializer) {
        match init {
            Initializer::Single(expr) => match expr.kind {
                ExprKind::IntLit(_) | ExprKind::FloatLit(_) | ExprKind::StrLit(_) => {}
                ExprKind::Cast { ref inner, .. }
                    if matches!(inner.kind, ExprKind::StrLit(_)) => {}
                _ => {
                    self.sema_error("initializer element is not a constant", expr.span);
                }
            },
            Initializer::List(items) => {
                for item in items {
                    self.check_const_initializer(item);
                }
            }
        }
    }

    /// Complete `T[]` from its initializer: element count, or string length
    /// plus the terminator for a char array.
    fn complete_array_from_init(&self, ty: TypeRef, init: Option<&Initializer>) -> TypeRef {
        let Type::Array { elem, len: None } = ty.as_ref() else {
            return ty;
        };
        let Some(init) = init else { return ty };
        let len = match init {
            Initializer::List(items) => Some(items.len()),
            Initializer::Single(Expr { kind: ExprKind::StrLit(idx), .. }) => {
                Some(self.strings[*idx].len() + 1)
            }
            Initializer::Single(Expr { kind: ExprKind::Cast { inner, .. }, .. }) => {
                match inner.kind {
                    ExprKind::StrLit(idx) => Some(self.strings[idx].len() + 1),
                    _ => None,
                }
            }
            _ => None,
        };
        match len {
            Some(len) => Type::array_of(elem.clone(), Some(len)),
            None => ty,
        }
    }
}
