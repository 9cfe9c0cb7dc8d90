//! Symbolic expression handles.
//!
//! The engine's expression language is out of scope for the bridge; scripts
//! only see an opaque handle that can be printed, asked for its bit width
//! and, when it is constant, its value.

use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
enum ExprKind {
    Constant(u64),
    Symbol(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    kind: ExprKind,
    width: u32,
}

pub type ExprRef = Arc<Expr>;

impl Expr {
    pub fn constant(value: u64, width: u32) -> ExprRef {
        Arc::new(Self {
            kind: ExprKind::Constant(value),
            width,
        })
    }

    pub fn symbol(name: impl Into<String>, width: u32) -> ExprRef {
        Arc::new(Self {
            kind: ExprKind::Symbol(name.into()),
            width,
        })
    }

    /// Width in bits.
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn as_constant(&self) -> Option<u64> {
        match self.kind {
            ExprKind::Constant(v) => Some(v),
            ExprKind::Symbol(_) => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.as_constant().is_some()
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Constant(v) => write!(f, "(w{} {:#x})", self.width, v),
            ExprKind::Symbol(name) => write!(f, "(w{} {})", self.width, name),
        }
    }
}
