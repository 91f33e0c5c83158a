use crate::filter::FilterOptions;

/// 继承块的合并方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockMode {
    #[default]
    Replace,
    Append,
    Prepend,
}

/// 文本片段：字面量、`#{}` 转义插值、`!{}` 原样插值
#[derive(Debug, Clone, PartialEq)]
pub enum Span {
    Literal(String),
    Escaped(String),
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// 无值属性，如 `checked`
    Implicit,
    Expr(String),
    /// 含 `#{}` 的引号字符串
    Interpolated(Vec<Span>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub name: String,
    pub value: AttrValue,
    pub escaped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    pub attrs: Vec<Attr>,
    pub self_closing: bool,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mixin {
    pub name: String,
    pub params: Vec<Param>,
    /// `...rest` 收集多余参数
    pub rest: Option<String>,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub test: String,
    pub negate: bool,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct When {
    pub value: String,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Code {
    If {
        branches: Vec<Branch>,
        otherwise: Option<Vec<Node>>,
    },
    Each {
        value: String,
        key: Option<String>,
        collection: String,
        body: Vec<Node>,
        fallback: Option<Vec<Node>>,
    },
    Case {
        subject: String,
        whens: Vec<When>,
        default: Option<Vec<Node>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Doctype(String),
    Tag(Tag),
    Text(Vec<Span>),
    Output {
        expr: String,
        escape: bool,
    },
    Assign {
        name: String,
        expr: String,
    },
    Code(Code),
    Comment {
        text: String,
        buffered: bool,
    },
    Mixin(Mixin),
    MixinCall {
        name: String,
        args: Vec<String>,
        body: Option<Vec<Node>>,
    },
    /// 混入体内的 `block`，渲染调用方传入的内容
    MixinBlock,
    Block {
        name: String,
        mode: BlockMode,
        children: Vec<Node>,
    },
    FilterBlock {
        name: String,
        content: String,
        options: FilterOptions,
    },
}

impl Node {
    /// 直接子节点序列
    pub fn child_lists(&self) -> Vec<&Vec<Node>> {
        match self {
            Node::Tag(tag) => vec![&tag.children],
            Node::Mixin(mixin) => vec![&mixin.body],
            Node::MixinCall { body, .. } => body.iter().collect(),
            Node::Block { children, .. } => vec![children],
            Node::Code(code) => match code {
                Code::If {
                    branches,
                    otherwise,
                } => branches
                    .iter()
                    .map(|b| &b.body)
                    .chain(otherwise.iter())
                    .collect(),
                Code::Each { body, fallback, .. } => {
                    std::iter::once(body).chain(fallback.iter()).collect()
                }
                Code::Case { whens, default, .. } => whens
                    .iter()
                    .map(|w| &w.body)
                    .chain(default.iter())
                    .collect(),
            },
            _ => Vec::new(),
        }
    }

    pub fn child_lists_mut(&mut self) -> Vec<&mut Vec<Node>> {
        match self {
            Node::Tag(tag) => vec![&mut tag.children],
            Node::Mixin(mixin) => vec![&mut mixin.body],
            Node::MixinCall { body, .. } => body.iter_mut().collect(),
            Node::Block { children, .. } => vec![children],
            Node::Code(code) => match code {
                Code::If {
                    branches,
                    otherwise,
                } => branches
                    .iter_mut()
                    .map(|b| &mut b.body)
                    .chain(otherwise.iter_mut())
                    .collect(),
                Code::Each { body, fallback, .. } => {
                    std::iter::once(body).chain(fallback.iter_mut()).collect()
                }
                Code::Case { whens, default, .. } => whens
                    .iter_mut()
                    .map(|w| &mut w.body)
                    .chain(default.iter_mut())
                    .collect(),
            },
            _ => Vec::new(),
        }
    }
}

/// 深度优先遍历收集所有命名块
pub fn collect_blocks<'a>(nodes: &'a [Node], out: &mut Vec<&'a Node>) {
    for node in nodes {
        if let Node::Block { .. } = node {
            out.push(node);
        }
        for children in node.child_lists() {
            collect_blocks(children, out);
        }
    }
}
