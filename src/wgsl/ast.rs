//! Declaration-level syntax tree. Function bodies are not represented.

use super::lexer::Span;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Bool(bool),
    Ident(String),
    Unary {
        op: char,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `u32(4)`, `vec2<f32>(1.0)` and other constructor or builtin calls.
    Call {
        callee: TypeExpr,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    And,
    Or,
    Xor,
}

/// A type expression such as `f32`, `vec3<f32>` or `array<Particle, N>`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub name: String,
    pub args: Vec<TemplateArg>,
    pub span: Span,
}

impl TypeExpr {
    pub fn simple(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateArg {
    Type(TypeExpr),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub args: Vec<Expr>,
    pub span: Span,
}

pub trait Attributed {
    fn attributes(&self) -> &[Attribute];

    fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes().iter().find(|a| a.name == name)
    }

    fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructMember {
    pub attributes: Vec<Attribute>,
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub name: String,
    pub members: Vec<StructMember>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AliasDecl {
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstDecl {
    pub attributes: Vec<Attribute>,
    pub name: String,
    pub ty: Option<TypeExpr>,
    /// `None` when the initializer is absent (`override`) or was not a
    /// constant expression this parser understands.
    pub init: Option<Expr>,
    pub is_override: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVar {
    pub attributes: Vec<Attribute>,
    pub name: String,
    /// The `<address_space, access>` template of `var`, empty for handles.
    pub qualifiers: Vec<String>,
    pub ty: Option<TypeExpr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub attributes: Vec<Attribute>,
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub attributes: Vec<Attribute>,
    pub name: String,
    pub params: Vec<Param>,
    pub return_attributes: Vec<Attribute>,
    pub return_type: Option<TypeExpr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Struct(StructDecl),
    Alias(AliasDecl),
    Const(ConstDecl),
    Var(GlobalVar),
    Function(Function),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub decls: Vec<Decl>,
}

impl Module {
    pub fn structs(&self) -> impl Iterator<Item = &StructDecl> {
        self.decls.iter().filter_map(|d| match d {
            Decl::Struct(s) => Some(s),
            _ => None,
        })
    }

    pub fn aliases(&self) -> impl Iterator<Item = &AliasDecl> {
        self.decls.iter().filter_map(|d| match d {
            Decl::Alias(a) => Some(a),
            _ => None,
        })
    }

    pub fn consts(&self) -> impl Iterator<Item = &ConstDecl> {
        self.decls.iter().filter_map(|d| match d {
            Decl::Const(c) => Some(c),
            _ => None,
        })
    }

    pub fn vars(&self) -> impl Iterator<Item = &GlobalVar> {
        self.decls.iter().filter_map(|d| match d {
            Decl::Var(v) => Some(v),
            _ => None,
        })
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.decls.iter().filter_map(|d| match d {
            Decl::Function(f) => Some(f),
            _ => None,
        })
    }
}

macro_rules! impl_attributed {
    ($($ty:ty),*) => {
        $(impl Attributed for $ty {
            fn attributes(&self) -> &[Attribute] {
                &self.attributes
            }
        })*
    };
}

impl_attributed!(StructMember, ConstDecl, GlobalVar, Param, Function);
