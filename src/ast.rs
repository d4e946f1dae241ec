//! Abstract Syntax Tree for loop heads and binding expressions

use crate::lexer::Span;
use crate::value::JsString;

/// Identity of an expression node inside one compiled script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub u32);

/// A compiled `for (<head>) <yield-to-body>()` statement
#[derive(Debug, Clone)]
pub struct LoopScript {
    /// The loop-head text as written on the element
    pub head_source: String,
    /// The full loop statement, for diagnostics
    pub loop_source: String,
    pub head: HeadClause,
    /// Number of expression nodes allocated while parsing
    pub node_count: u32,
}

/// `<let|const|var>? <pattern> of <expression>`
#[derive(Debug, Clone)]
pub struct HeadClause {
    pub kind: Option<VariableKind>,
    pub pattern: Pattern,
    pub source: Expression,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Let,
    Const,
    Var,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Identifier {
    pub name: JsString,
    pub span: Span,
}

/// Binding pattern on the left of `of`
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Identifier(Identifier),
    /// `[a, , b]`; holes are `None`
    Array(Vec<Option<Pattern>>),
    /// `{ key, key: pattern }`
    Object(Vec<ObjectPatternProperty>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectPatternProperty {
    pub key: Identifier,
    pub value: Pattern,
}

impl Pattern {
    /// Names introduced by this pattern, in source order
    pub fn bound_names(&self) -> Vec<JsString> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names(&self, names: &mut Vec<JsString>) {
        match self {
            Pattern::Identifier(id) => names.push(id.name.clone()),
            Pattern::Array(elements) => {
                for element in elements.iter().flatten() {
                    element.collect_names(names);
                }
            }
            Pattern::Object(properties) => {
                for property in properties {
                    property.value.collect_names(names);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub id: ExprId,
    pub kind: ExpressionKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExpressionKind {
    Identifier(JsString),
    Literal(LiteralValue),
    Array(Vec<Expression>),
    Member {
        object: Box<Expression>,
        property: MemberProperty,
    },
    Call {
        callee: Box<Expression>,
        arguments: Vec<Expression>,
    },
    Not(Box<Expression>),
}

#[derive(Debug, Clone)]
pub enum MemberProperty {
    Identifier(JsString),
    Computed(Box<Expression>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Number(f64),
    String(JsString),
    Boolean(bool),
    Null,
}
