use crate::error::{Result, TemplateError};
use crate::expr::ExpressionHandler;
use crate::filter::FilterOptions;
use crate::loader::TemplateLoader;
use crate::tpl::ast::{
    Attr, AttrValue, BlockMode, Branch, Code, Mixin, Node, Param, Span, Tag, When, collect_blocks,
};
use crate::tpl::lexer::{self, split_top_level};
use crate::tpl::token::{RawAttr, Token, TokenKind};
use std::collections::HashMap;
use std::sync::Arc;

/// 解析结果：合并继承后的节点树以及可见的混入
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub nodes: Vec<Node>,
    pub mixins: HashMap<String, Arc<Mixin>>,
}

/// 解析模板，递归解析 `extends` / `include` 引用的模板
pub fn parse(name: &str, loader: &dyn TemplateLoader, expressions: ExpressionHandler) -> Result<Document> {
    Resolver {
        loader,
        expressions,
        chain: Vec::new(),
    }
    .parse(name)
}

struct Resolver<'l> {
    loader: &'l dyn TemplateLoader,
    expressions: ExpressionHandler,
    /// 正在解析的模板链，用于检测循环引用
    chain: Vec<String>,
}

impl Resolver<'_> {
    fn parse(&mut self, name: &str) -> Result<Document> {
        if self.chain.iter().any(|n| n == name) {
            let mut cycle = self.chain.clone();
            cycle.push(name.to_string());
            return Err(TemplateError::Parse {
                template: name.to_string(),
                line: 0,
                message: format!("cyclic template reference: {}", cycle.join(" -> ")),
            });
        }

        let source = self.loader.content(name)?;
        let tokens = lexer::tokenize(name, &source)?;
        self.chain.push(name.to_string());
        let result = Parser {
            resolver: self,
            name: name.to_string(),
            tokens,
            pos: 0,
            mixins: HashMap::new(),
        }
        .document();
        self.chain.pop();
        result
    }
}

/// 解析 include / extends 目标：相对当前模板目录，`/` 开头相对加载器根目录
pub(crate) fn resolve_name(current: &str, target: &str) -> String {
    let target = target.trim().trim_matches(|c| c == '"' || c == '\'');
    let joined = match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => match current.rfind('/') {
            Some(i) => format!("{}/{}", &current[..i], target),
            None => target.to_string(),
        },
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    parts.join("/")
}

/// 带有非 `.jade` 扩展名的 include 按原样插入
fn is_raw_include(name: &str) -> bool {
    let file = name.rsplit('/').next().unwrap_or(name);
    match file.rsplit_once('.') {
        Some((stem, ext)) => !stem.is_empty() && ext != "jade",
        None => false,
    }
}

/// 引号包裹的完整字符串字面量，返回反转义后的内容
fn string_literal(src: &str) -> Option<String> {
    let quote = src.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let mut out = String::new();
    let mut chars = src[1..].char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, other)) => out.push(other),
                None => return None,
            },
            c if c == quote => {
                return if i + 2 == src.len() { Some(out) } else { None };
            }
            c => out.push(c),
        }
    }
    None
}

struct Parser<'r, 'l> {
    resolver: &'r mut Resolver<'l>,
    name: String,
    tokens: Vec<Token>,
    pos: usize,
    mixins: HashMap<String, Arc<Mixin>>,
}

impl Parser<'_, '_> {
    fn peek(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eos)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(0)
    }

    fn next(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn error(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::Parse {
            template: self.name.clone(),
            line: self.line(),
            message: message.into(),
        }
    }

    /// 编译期校验表达式语法
    fn check(&self, source: &str) -> Result<String> {
        self.resolver
            .expressions
            .compile(source)
            .map_err(|e| self.error(e.to_string()))?;
        Ok(source.to_string())
    }

    fn document(mut self) -> Result<Document> {
        while let TokenKind::Newline = self.peek() {
            self.next();
        }
        let extends = match self.peek() {
            TokenKind::Extends(target) => {
                let target = target.clone();
                let line = self.line();
                self.next();
                self.leaf()?;
                Some((target, line))
            }
            _ => None,
        };

        let nodes = self.body()?;
        let Some((target, line)) = extends else {
            return Ok(Document {
                nodes,
                mixins: self.mixins,
            });
        };

        let parent_name = resolve_name(&self.name, &target);
        let mut parent = self.load(&parent_name, line)?;
        let mut found = Vec::new();
        collect_blocks(&nodes, &mut found);
        let mut overrides: HashMap<&str, (BlockMode, &[Node])> = HashMap::new();
        for node in found {
            if let Node::Block {
                name,
                mode,
                children,
            } = node
            {
                overrides
                    .entry(name.as_str())
                    .or_insert((*mode, children.as_slice()));
            }
        }
        apply_overrides(&mut parent.nodes, &overrides);
        parent.mixins.extend(self.mixins);
        Ok(parent)
    }

    fn load(&mut self, name: &str, line: usize) -> Result<Document> {
        self.resolver.parse(name).map_err(|e| match e {
            TemplateError::NotFound(_) => TemplateError::Parse {
                template: self.name.clone(),
                line,
                message: format!("cannot resolve template `{}`", name),
            },
            other => other,
        })
    }

    /// 解析到当前缩进层结束（Outdent 或 Eos）
    fn body(&mut self) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Newline => {
                    self.next();
                }
                TokenKind::Outdent => {
                    self.next();
                    return Ok(nodes);
                }
                TokenKind::Eos => return Ok(nodes),
                _ => {
                    for node in self.statement()? {
                        push_node(&mut nodes, node);
                    }
                }
            }
        }
    }

    fn end_of_line(&mut self) -> Result<()> {
        match self.peek() {
            TokenKind::Newline => {
                self.next();
                Ok(())
            }
            TokenKind::Eos => Ok(()),
            other => Err(self.error(format!("unexpected {:?}", other))),
        }
    }

    /// 行结束后若有缩进块则解析为子节点
    fn children(&mut self) -> Result<Vec<Node>> {
        self.end_of_line()?;
        if let TokenKind::Indent = self.peek() {
            self.next();
            return self.body();
        }
        Ok(Vec::new())
    }

    /// 不允许带子块的语句
    fn leaf(&mut self) -> Result<()> {
        self.end_of_line()?;
        if let TokenKind::Indent = self.peek() {
            return Err(self.error("unexpected indentation"));
        }
        Ok(())
    }

    fn statement(&mut self) -> Result<Vec<Node>> {
        let node = match self.next() {
            TokenKind::Doctype(value) => {
                self.leaf()?;
                Node::Doctype(value)
            }
            TokenKind::Tag(name) => Node::Tag(self.tag(name)?),
            TokenKind::Text(text) => {
                let spans = self.interpolate(&text)?;
                self.leaf()?;
                Node::Text(spans)
            }
            TokenKind::Code {
                buffered: true,
                escape,
                value,
            } => {
                let expr = self.check(&value)?;
                self.leaf()?;
                Node::Output { expr, escape }
            }
            TokenKind::Code {
                buffered: false,
                value,
                ..
            } => {
                let node = self.assignment(&value)?;
                self.leaf()?;
                node
            }
            TokenKind::Comment { text, buffered } => {
                let text = match self.peek() {
                    TokenKind::TextBlock(lines) => {
                        let text = format!("{}\n{}\n", text, lines.join("\n"));
                        self.next();
                        text
                    }
                    _ => text,
                };
                self.leaf()?;
                Node::Comment { text, buffered }
            }
            TokenKind::If(test) => self.conditional(test, false)?,
            TokenKind::Unless(test) => self.conditional(test, true)?,
            TokenKind::Each { value, key, expr } => {
                let collection = self.check(&expr)?;
                let body = self.children()?;
                let fallback = match self.peek() {
                    TokenKind::Else => {
                        self.next();
                        Some(self.children()?)
                    }
                    _ => None,
                };
                Node::Code(Code::Each {
                    value,
                    key,
                    collection,
                    body,
                    fallback,
                })
            }
            TokenKind::Case(subject) => self.case(subject)?,
            TokenKind::Mixin { name, params } => {
                let mixin = Arc::new(self.mixin(name, &params)?);
                self.mixins.insert(mixin.name.clone(), mixin.clone());
                Node::Mixin(Mixin::clone(&mixin))
            }
            TokenKind::Call { name, args } => {
                let args = split_top_level(&args)
                    .iter()
                    .map(|a| self.check(a))
                    .collect::<Result<Vec<_>>>()?;
                let body = if let TokenKind::Colon = self.peek() {
                    self.next();
                    self.statement()?
                } else {
                    self.children()?
                };
                Node::MixinCall {
                    name,
                    args,
                    body: (!body.is_empty()).then_some(body),
                }
            }
            TokenKind::Block { name, .. } if name.is_empty() => {
                self.leaf()?;
                Node::MixinBlock
            }
            TokenKind::Block { name, mode } => Node::Block {
                name,
                mode,
                children: self.children()?,
            },
            TokenKind::Filter { name, options } => {
                let content = match self.peek() {
                    TokenKind::TextBlock(lines) => {
                        let content = lines.join("\n");
                        self.next();
                        content
                    }
                    _ => String::new(),
                };
                self.leaf()?;
                Node::FilterBlock {
                    name,
                    content,
                    options: filter_options(options),
                }
            }
            TokenKind::Include(target) => return self.include(&target),
            TokenKind::Extends(_) => {
                return Err(self.error("`extends` must be the first statement of a template"));
            }
            TokenKind::Else | TokenKind::ElseIf(_) => {
                return Err(self.error("`else` without a preceding `if`, `unless` or `each`"));
            }
            TokenKind::When(_) | TokenKind::Default => {
                return Err(self.error("`when` / `default` outside of `case`"));
            }
            TokenKind::Indent => return Err(self.error("unexpected indentation")),
            other => return Err(self.error(format!("unexpected {:?}", other))),
        };
        Ok(vec![node])
    }

    fn tag(&mut self, name: String) -> Result<Tag> {
        let mut tag = Tag {
            name,
            attrs: Vec::new(),
            self_closing: false,
            children: Vec::new(),
        };

        loop {
            match self.peek().clone() {
                TokenKind::Id(id) => {
                    self.next();
                    tag.attrs.push(Attr {
                        name: "id".to_string(),
                        value: AttrValue::Interpolated(vec![Span::Literal(id)]),
                        escaped: true,
                    });
                }
                TokenKind::Class(class) => {
                    self.next();
                    tag.attrs.push(Attr {
                        name: "class".to_string(),
                        value: AttrValue::Interpolated(vec![Span::Literal(class)]),
                        escaped: true,
                    });
                }
                TokenKind::Attrs(raw) => {
                    self.next();
                    for attr in raw {
                        tag.attrs.push(self.attr(attr)?);
                    }
                }
                _ => break,
            }
        }

        match self.peek().clone() {
            TokenKind::SelfClose => {
                self.next();
                tag.self_closing = true;
                self.leaf()?;
                return Ok(tag);
            }
            TokenKind::Colon => {
                self.next();
                tag.children = self.statement()?;
                return Ok(tag);
            }
            TokenKind::Text(text) => {
                self.next();
                tag.children.push(Node::Text(self.interpolate(&text)?));
            }
            TokenKind::TextBlock(lines) => {
                self.next();
                tag.children
                    .push(Node::Text(self.interpolate(&lines.join("\n"))?));
            }
            TokenKind::Code {
                buffered: true,
                escape,
                value,
            } => {
                self.next();
                tag.children.push(Node::Output {
                    expr: self.check(&value)?,
                    escape,
                });
            }
            _ => {}
        }

        for node in self.children()? {
            push_node(&mut tag.children, node);
        }
        Ok(tag)
    }

    fn attr(&self, raw: RawAttr) -> Result<Attr> {
        let value = match raw.value {
            None => AttrValue::Implicit,
            Some(src) => match string_literal(&src) {
                Some(text) if text.contains("#{") || text.contains("!{") => {
                    AttrValue::Interpolated(self.interpolate(&text)?)
                }
                Some(text) => AttrValue::Interpolated(vec![Span::Literal(text)]),
                None => AttrValue::Expr(self.check(&src)?),
            },
        };
        Ok(Attr {
            name: raw.name,
            value,
            escaped: raw.escaped,
        })
    }

    /// `- var name = expr` 或 `- name = expr`
    fn assignment(&self, code: &str) -> Result<Node> {
        let code = code.trim().trim_end_matches(';');
        let code = code.strip_prefix("var ").unwrap_or(code).trim();
        let eq = code
            .char_indices()
            .find(|(i, c)| {
                *c == '='
                    && !code[i + 1..].starts_with('=')
                    && !code[..*i].ends_with(['=', '!', '<', '>'])
            })
            .map(|(i, _)| i)
            .ok_or_else(|| self.error(format!("unsupported code statement `{}`", code)))?;
        let name = code[..eq].trim();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
            && !name.starts_with(|c: char| c.is_ascii_digit());
        if !valid {
            return Err(self.error(format!("invalid assignment target `{}`", name)));
        }
        Ok(Node::Assign {
            name: name.to_string(),
            expr: self.check(code[eq + 1..].trim())?,
        })
    }

    fn conditional(&mut self, test: String, negate: bool) -> Result<Node> {
        let mut branches = vec![Branch {
            test: self.check(&test)?,
            negate,
            body: self.children()?,
        }];
        let mut otherwise = None;
        loop {
            match self.peek().clone() {
                TokenKind::ElseIf(test) => {
                    self.next();
                    let test = self.check(&test)?;
                    branches.push(Branch {
                        test,
                        negate: false,
                        body: self.children()?,
                    });
                }
                TokenKind::Else => {
                    self.next();
                    otherwise = Some(self.children()?);
                    break;
                }
                _ => break,
            }
        }
        Ok(Node::Code(Code::If {
            branches,
            otherwise,
        }))
    }

    fn case(&mut self, subject: String) -> Result<Node> {
        let subject = self.check(&subject)?;
        self.end_of_line()?;
        let mut whens = Vec::new();
        let mut default = None;
        if let TokenKind::Indent = self.peek() {
            self.next();
            loop {
                match self.next() {
                    TokenKind::Newline => {}
                    TokenKind::Outdent | TokenKind::Eos => break,
                    TokenKind::When(value) => {
                        let value = self.check(&value)?;
                        whens.push(When {
                            value,
                            body: self.children()?,
                        });
                    }
                    TokenKind::Default => {
                        if default.is_some() {
                            return Err(self.error("duplicate `default` in `case`"));
                        }
                        default = Some(self.children()?);
                    }
                    other => {
                        return Err(self.error(format!(
                            "expected `when` or `default` inside `case`, found {:?}",
                            other
                        )));
                    }
                }
            }
        }
        Ok(Node::Code(Code::Case {
            subject,
            whens,
            default,
        }))
    }

    fn mixin(&mut self, name: String, params: &str) -> Result<Mixin> {
        let mut mixin = Mixin {
            name,
            params: Vec::new(),
            rest: None,
            body: Vec::new(),
        };
        for param in split_top_level(params) {
            if mixin.rest.is_some() {
                return Err(self.error("rest parameter must be the last mixin parameter"));
            }
            if let Some(rest) = param.strip_prefix("...") {
                mixin.rest = Some(rest.trim().to_string());
                continue;
            }
            match param.split_once('=') {
                Some((name, default)) => mixin.params.push(Param {
                    name: name.trim().to_string(),
                    default: Some(self.check(default.trim())?),
                }),
                None => mixin.params.push(Param {
                    name: param,
                    default: None,
                }),
            }
        }
        mixin.body = self.children()?;
        Ok(mixin)
    }

    fn include(&mut self, target: &str) -> Result<Vec<Node>> {
        let line = self.line();
        self.leaf()?;
        let name = resolve_name(&self.name, target);
        if is_raw_include(&name) {
            let content = self.resolver.loader.content(&name).map_err(|e| match e {
                TemplateError::NotFound(_) => TemplateError::Parse {
                    template: self.name.clone(),
                    line,
                    message: format!("cannot resolve include `{}`", name),
                },
                other => other,
            })?;
            return Ok(vec![Node::Text(vec![Span::Literal(content)])]);
        }
        let included = self.load(&name, line)?;
        self.mixins.extend(included.mixins);
        Ok(included.nodes)
    }

    /// 拆分 `#{}` / `!{}` 插值，`\#{` 保留为字面量
    fn interpolate(&self, text: &str) -> Result<Vec<Span>> {
        let mut spans = Vec::new();
        let mut literal = String::new();
        let mut rest = text;
        while !rest.is_empty() {
            if let Some(escaped) = rest.strip_prefix("\\#{").or_else(|| rest.strip_prefix("\\!{")) {
                literal.push_str(&rest[1..3]);
                rest = escaped;
                continue;
            }
            let raw = rest.starts_with("!{");
            if rest.starts_with("#{") || raw {
                let end = closing_brace(&rest[2..])
                    .ok_or_else(|| self.error("unterminated interpolation"))?;
                let expr = self.check(rest[2..2 + end].trim())?;
                if !literal.is_empty() {
                    spans.push(Span::Literal(std::mem::take(&mut literal)));
                }
                spans.push(if raw { Span::Raw(expr) } else { Span::Escaped(expr) });
                rest = &rest[2 + end + 1..];
                continue;
            }
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                literal.push(c);
            }
            rest = chars.as_str();
        }
        if !literal.is_empty() || spans.is_empty() {
            spans.push(Span::Literal(literal));
        }
        Ok(spans)
    }
}

/// 找到与插值开头匹配的 `}`，跳过字符串与嵌套括号
fn closing_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '{' => depth += 1,
            '}' if depth == 0 => return Some(i),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

fn filter_options(raw: Vec<RawAttr>) -> FilterOptions {
    raw.into_iter()
        .map(|attr| {
            let value = match attr.value {
                Some(v) => string_literal(&v).unwrap_or(v),
                None => "true".to_string(),
            };
            (attr.name, value)
        })
        .collect()
}

/// 相邻文本行以换行合并
fn push_node(nodes: &mut Vec<Node>, node: Node) {
    if let (Some(Node::Text(prev)), Node::Text(next)) = (nodes.last_mut(), &node) {
        prev.push(Span::Literal("\n".to_string()));
        prev.extend(next.iter().cloned());
        return;
    }
    nodes.push(node);
}

/// 用派生模板的同名块替换、追加或前置到父模板的块中
fn apply_overrides(nodes: &mut [Node], overrides: &HashMap<&str, (BlockMode, &[Node])>) {
    for node in nodes.iter_mut() {
        if let Node::Block { name, children, .. } = node {
            if let Some((mode, content)) = overrides.get(name.as_str()) {
                match mode {
                    BlockMode::Replace => *children = content.to_vec(),
                    BlockMode::Append => {
                        apply_overrides(children, overrides);
                        children.extend(content.iter().cloned());
                    }
                    BlockMode::Prepend => {
                        apply_overrides(children, overrides);
                        let mut merged = content.to_vec();
                        merged.append(children);
                        *children = merged;
                    }
                }
                continue;
            }
        }
        for children in node.child_lists_mut() {
            apply_overrides(children, overrides);
        }
    }
}
