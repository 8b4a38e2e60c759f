//! AST 定义
//!
//! 节点存放在 `Ast` 的 arena 中，通过稳定索引互相引用。
//! 每个节点头部带有源码区间。

use crate::kit::SourceRange;

macro_rules! arena_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(ExprId);
arena_id!(StmtId);
arena_id!(DeclId);
arena_id!(FnId);

/// 带位置的名字
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub range: SourceRange,
}

// ===== 类型表达式 =====

#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub range: SourceRange,
    pub kind: TypeExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExprKind {
    /// `T`, `mod.T`, `T!(A, B)`
    Named { path: Vec<String>, params: Vec<TypeExpr> },
    /// `T[N]`
    FixedArray { elem: Box<TypeExpr>, size: ExprId },
    /// `T[]`，等价于 `array!(T)`
    DynArray(Box<TypeExpr>),
    /// `(T1, ..., Tn)`
    Tuple(Vec<TypeExpr>),
    /// `fn(T...): R`
    Function {
        params: Vec<TypeExpr>,
        ret: Option<Box<TypeExpr>>,
    },
    /// `$T`
    Param(String),
}

impl TypeExpr {
    /// 收集出现的泛型参数名（按首次出现顺序）
    pub fn collect_params(&self, out: &mut Vec<String>) {
        match &self.kind {
            TypeExprKind::Named { params, .. } => params.iter().for_each(|p| p.collect_params(out)),
            TypeExprKind::FixedArray { elem, .. } | TypeExprKind::DynArray(elem) => {
                elem.collect_params(out)
            }
            TypeExprKind::Tuple(items) => items.iter().for_each(|p| p.collect_params(out)),
            TypeExprKind::Function { params, ret } => {
                params.iter().for_each(|p| p.collect_params(out));
                if let Some(ret) = ret {
                    ret.collect_params(out);
                }
            }
            TypeExprKind::Param(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
        }
    }

    pub fn mentions_param(&self) -> bool {
        let mut out = Vec::new();
        self.collect_params(&mut out);
        !out.is_empty()
    }
}

// ===== 注解 =====

#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationArg {
    Ident(String),
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub name: String,
    pub args: Vec<AnnotationArg>,
    pub range: SourceRange,
}

pub fn find_annotation<'a>(annotations: &'a [Annotation], name: &str) -> Option<&'a Annotation> {
    annotations.iter().find(|a| a.name == name)
}

// ===== 表达式 =====

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i32),
    Float(f32),
    Bool(bool),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
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

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BraceInitKind {
    /// `{a, b, c}`
    List,
    /// `{x = 1, y = 2}`
    Field,
    /// `{k: v}`
    KeyValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BraceItem {
    /// Field 模式下为字段名，KeyValue 模式下为键表达式
    pub key: Option<BraceKey>,
    pub value: ExprId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BraceKey {
    Field(Ident),
    Expr(ExprId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    Text(String),
    Expr(ExprId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub range: SourceRange,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Identifier(String),
    /// `base.member`
    Path { base: ExprId, member: Ident },
    Binary { op: BinaryOp, lhs: ExprId, rhs: ExprId },
    Logical { op: LogicalOp, lhs: ExprId, rhs: ExprId },
    Comparison { op: CompareOp, lhs: ExprId, rhs: ExprId },
    Unary { op: UnaryOp, operand: ExprId },
    Conditional { cond: ExprId, then: ExprId, otherwise: ExprId },
    /// `op` 为 None 表示普通赋值；`target` 为 Tuple 时是解构赋值
    Assign { op: Option<BinaryOp>, target: ExprId, value: ExprId },
    Call { callee: ExprId, args: Vec<ExprId> },
    Index { target: ExprId, index: ExprId },
    Grouping(ExprId),
    BraceInit {
        ty: Option<TypeExpr>,
        kind: BraceInitKind,
        items: Vec<BraceItem>,
    },
    Tuple(Vec<ExprId>),
    FString(Vec<FStringPart>),
    Cast { expr: ExprId, ty: TypeExpr },
    TypeCheck { expr: ExprId, ty: TypeExpr },
    /// 匿名函数
    Closure(FnId),
    /// `name!(T, ...)` 显式泛型实参
    GenericInst { base: ExprId, args: Vec<TypeExpr> },
    /// 语法错误占位
    Error,
}

// ===== 语句 =====

#[derive(Debug, Clone, PartialEq)]
pub struct ForBinder {
    pub name: Ident,
    pub ty: Option<TypeExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LabelKind {
    /// `case <expr>:`
    Value(ExprId),
    /// `case Ctor(a, b):`；`expr` 是整个调用表达式，必要时退化为等值比较
    Pattern {
        ctor: ExprId,
        bindings: Vec<Ident>,
        expr: ExprId,
    },
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JumpKind {
    Break,
    Continue,
    Return(Vec<ExprId>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub range: SourceRange,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Block(Vec<StmtId>),
    Expr(ExprId),
    Decl(DeclId),
    If {
        cond: ExprId,
        then: StmtId,
        otherwise: Option<StmtId>,
    },
    /// C 风格 / while 风格 / 无限循环
    For {
        init: Option<StmtId>,
        cond: Option<ExprId>,
        step: Option<ExprId>,
        body: StmtId,
    },
    /// `for (x in xs)` / `for (k, v in m)`
    ForEach {
        first: ForBinder,
        second: Option<ForBinder>,
        iterable: ExprId,
        body: StmtId,
    },
    Switch { scrutinee: ExprId, cases: Vec<StmtId> },
    Label {
        kind: LabelKind,
        guard: Option<ExprId>,
        body: Vec<StmtId>,
    },
    Jump(JumpKind),
    Empty,
}

// ===== 声明 =====

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Ident,
    pub ty: TypeExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub name: Ident,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    /// None 表示 extern/native 声明
    pub body: Option<StmtId>,
    pub annotations: Vec<Annotation>,
    pub range: SourceRange,
    /// 签名中出现的 `$T`，按出现顺序
    pub generic_params: Vec<String>,
    pub is_closure: bool,
}

impl FunctionDefinition {
    pub fn is_generic(&self) -> bool {
        !self.generic_params.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub is_const: bool,
    pub names: Vec<Ident>,
    pub ty: Option<TypeExpr>,
    pub inits: Vec<ExprId>,
}

/// 同类型字段列表：`x, y: float;`
#[derive(Debug, Clone, PartialEq)]
pub struct DeclList {
    pub names: Vec<Ident>,
    pub ty: TypeExpr,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub name: Ident,
    pub generic_params: Vec<String>,
    pub fields: Vec<DeclList>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantDecl {
    pub name: Ident,
    pub payload: Vec<TypeExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SumDecl {
    pub name: Ident,
    pub generic_params: Vec<String>,
    pub variants: Vec<VariantDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decl {
    pub range: SourceRange,
    pub annotations: Vec<Annotation>,
    pub kind: DeclKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclKind {
    Var(VarDecl),
    Function(FnId),
    Struct(StructDecl),
    Newtype {
        name: Ident,
        generic_params: Vec<String>,
        wrapped: TypeExpr,
    },
    Sum(SumDecl),
    Opaque { name: Ident },
    Alias {
        name: Ident,
        generic_params: Vec<String>,
        target: TypeExpr,
    },
    AliasedImport { path: Vec<String>, alias: Ident },
    SelectiveImport { path: Vec<String>, names: Vec<Ident> },
}

impl Decl {
    /// 声明引入的顶层名字
    pub fn name<'a>(&'a self, ast: &'a Ast) -> Option<&'a Ident> {
        match &self.kind {
            DeclKind::Function(id) => Some(&ast.function(*id).name),
            DeclKind::Struct(s) => Some(&s.name),
            DeclKind::Newtype { name, .. }
            | DeclKind::Opaque { name }
            | DeclKind::Alias { name, .. } => Some(name),
            DeclKind::Sum(s) => Some(&s.name),
            DeclKind::AliasedImport { alias, .. } => Some(alias),
            DeclKind::Var(_) | DeclKind::SelectiveImport { .. } => None,
        }
    }
}

/// 一个模块的完整 AST
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ast {
    pub exprs: Vec<Expr>,
    pub stmts: Vec<Stmt>,
    pub decls: Vec<Decl>,
    pub functions: Vec<FunctionDefinition>,
    /// 顶层声明，按源码顺序
    pub items: Vec<DeclId>,
}

impl Ast {
    pub fn add_expr(&mut self, kind: ExprKind, range: SourceRange) -> ExprId {
        self.exprs.push(Expr { range, kind });
        ExprId(self.exprs.len() as u32 - 1)
    }

    pub fn add_stmt(&mut self, kind: StmtKind, range: SourceRange) -> StmtId {
        self.stmts.push(Stmt { range, kind });
        StmtId(self.stmts.len() as u32 - 1)
    }

    pub fn add_decl(&mut self, decl: Decl) -> DeclId {
        self.decls.push(decl);
        DeclId(self.decls.len() as u32 - 1)
    }

    pub fn add_function(&mut self, func: FunctionDefinition) -> FnId {
        self.functions.push(func);
        FnId(self.functions.len() as u32 - 1)
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index()]
    }

    pub fn decl(&self, id: DeclId) -> &Decl {
        &self.decls[id.index()]
    }

    pub fn function(&self, id: FnId) -> &FunctionDefinition {
        &self.functions[id.index()]
    }

    /// 剥掉括号
    pub fn strip_grouping(&self, mut id: ExprId) -> ExprId {
        while let ExprKind::Grouping(inner) = &self.expr(id).kind {
            id = *inner;
        }
        id
    }
}
