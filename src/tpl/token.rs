use crate::tpl::ast::BlockMode;

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

/// 属性原文：值保持为未求值的表达式文本
#[derive(Debug, Clone, PartialEq)]
pub struct RawAttr {
    pub name: String,
    pub value: Option<String>,
    pub escaped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Indent,
    Outdent,
    Newline,
    Eos,
    Doctype(String),
    Extends(String),
    Include(String),
    /// 名称为空表示混入体内的 `block` 占位
    Block {
        mode: BlockMode,
        name: String,
    },
    Mixin {
        name: String,
        params: String,
    },
    Call {
        name: String,
        args: String,
    },
    Each {
        value: String,
        key: Option<String>,
        expr: String,
    },
    If(String),
    ElseIf(String),
    Else,
    Unless(String),
    Case(String),
    When(String),
    Default,
    Code {
        buffered: bool,
        escape: bool,
        value: String,
    },
    Comment {
        text: String,
        buffered: bool,
    },
    Filter {
        name: String,
        options: Vec<RawAttr>,
    },
    Tag(String),
    Id(String),
    Class(String),
    Attrs(Vec<RawAttr>),
    SelfClose,
    /// `tag: child` 块展开
    Colon,
    Text(String),
    TextBlock(Vec<String>),
}
