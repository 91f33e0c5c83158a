use crate::error::{Result, TemplateError};
use crate::tpl::ast::BlockMode;
use crate::tpl::token::{RawAttr, Token, TokenKind};

enum PendingBlock {
    Text,
    Discard,
}

/// 将模板源码切分为带缩进信息的记号流
pub fn tokenize(template: &str, source: &str) -> Result<Vec<Token>> {
    Lexer {
        template,
        lines: source.lines().collect(),
        next_line: 0,
        indents: vec![0],
        indent_char: None,
        tokens: Vec::new(),
        line: 0,
        column: 1,
        pending: None,
    }
    .run()
}

struct Lexer<'a> {
    template: &'a str,
    lines: Vec<&'a str>,
    next_line: usize,
    indents: Vec<usize>,
    indent_char: Option<char>,
    tokens: Vec<Token>,
    line: usize,
    column: usize,
    pending: Option<PendingBlock>,
}

fn leading_ws(line: &str) -> &str {
    let rest = line.trim_start_matches(|c| c == ' ' || c == '\t');
    &line[..line.len() - rest.len()]
}

/// 标识符长度：字母、数字、`_`、`-`
fn ident_len(s: &str) -> usize {
    s.bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-')
        .count()
}

fn is_ident(s: &str) -> bool {
    !s.is_empty()
        && ident_len(s) == s.len()
        && s.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_' || c == '$')
}

const OPERATOR_CHARS: &[char] = &['+', '-', '*', '/', '%', '<', '>', '=', '!', '&', '|', '?', ':'];

/// 按顶层逗号拆分（忽略引号和括号内部的逗号）
pub(crate) fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut current = String::new();

    for c in s.chars() {
        if let Some(q) = quote {
            current.push(c);
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
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

impl<'a> Lexer<'a> {
    fn run(mut self) -> Result<Vec<Token>> {
        while self.next_line < self.lines.len() {
            let raw = self.lines[self.next_line];
            self.next_line += 1;
            self.line = self.next_line;
            if raw.trim().is_empty() {
                continue;
            }

            let width = self.indentation(raw)?;
            self.column = width + 1;
            self.adjust_indent(width)?;
            self.lex_line(raw[width..].trim_end().to_string())?;
            self.finish_line(width);
        }

        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Outdent);
        }
        self.push(TokenKind::Eos);
        Ok(self.tokens)
    }

    fn error(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::Lex {
            template: self.template.to_string(),
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }

    fn push(&mut self, kind: TokenKind) {
        self.tokens.push(Token {
            kind,
            line: self.line,
            column: self.column,
        });
    }

    /// 计算缩进宽度；首个缩进行确定缩进字符，之后不得混用
    fn indentation(&mut self, raw: &str) -> Result<usize> {
        let ws = leading_ws(raw);
        if ws.is_empty() {
            return Ok(0);
        }
        let has_tab = ws.contains('\t');
        if has_tab && ws.contains(' ') {
            self.column = 1;
            return Err(self.error("mixed tabs and spaces in indentation"));
        }
        let unit = if has_tab { '\t' } else { ' ' };
        match self.indent_char {
            None => self.indent_char = Some(unit),
            Some(expected) if expected != unit => {
                self.column = 1;
                let expected = if expected == '\t' { "tabs" } else { "spaces" };
                return Err(self.error(format!(
                    "inconsistent indentation: this template is indented with {}",
                    expected
                )));
            }
            Some(_) => {}
        }
        Ok(ws.len())
    }

    fn adjust_indent(&mut self, width: usize) -> Result<()> {
        let top = self.indents.last().copied().unwrap_or(0);
        if width > top {
            self.indents.push(width);
            self.push(TokenKind::Indent);
        } else if width < top {
            while self.indents.last().is_some_and(|t| *t > width) {
                self.indents.pop();
                self.push(TokenKind::Outdent);
            }
            if self.indents.last() != Some(&width) {
                return Err(self.error("inconsistent outdent: no enclosing block at this level"));
            }
        }
        Ok(())
    }

    fn finish_line(&mut self, width: usize) {
        if let Some(pending) = self.pending.take() {
            let lines = self.collect_block(width);
            if let PendingBlock::Text = pending {
                if !lines.is_empty() {
                    self.push(TokenKind::TextBlock(lines));
                }
            }
        }
        self.push(TokenKind::Newline);
    }

    /// 收集比 `width` 缩进更深的后续行作为原始文本
    fn collect_block(&mut self, width: usize) -> Vec<String> {
        let mut end = self.next_line;
        let mut i = self.next_line;
        while i < self.lines.len() {
            let line = self.lines[i];
            i += 1;
            if line.trim().is_empty() {
                continue;
            }
            if leading_ws(line).len() <= width {
                break;
            }
            end = i;
        }

        let taken = &self.lines[self.next_line..end];
        let base = taken
            .iter()
            .filter(|l| !l.trim().is_empty())
            .map(|l| leading_ws(l).len())
            .min()
            .unwrap_or(0);
        let block = taken
            .iter()
            .map(|l| {
                if l.trim().is_empty() {
                    String::new()
                } else {
                    l[base..].trim_end().to_string()
                }
            })
            .collect();
        self.next_line = end;
        block
    }

    /// 属性列表跨行时拼接下一物理行
    fn extend(&mut self, src: &mut String) -> bool {
        match self.lines.get(self.next_line) {
            Some(next) => {
                src.push(' ');
                src.push_str(next.trim());
                self.next_line += 1;
                true
            }
            None => false,
        }
    }

    fn lex_line(&mut self, src: String) -> Result<()> {
        let s = src.as_str();

        if s.starts_with("//-") {
            self.pending = Some(PendingBlock::Discard);
            return Ok(());
        }
        if let Some(rest) = s.strip_prefix("//") {
            self.push(TokenKind::Comment {
                text: rest.to_string(),
                buffered: true,
            });
            self.pending = Some(PendingBlock::Text);
            return Ok(());
        }
        if s.starts_with('<') {
            self.push(TokenKind::Text(s.to_string()));
            return Ok(());
        }
        if let Some(rest) = s.strip_prefix('|') {
            let text = rest.strip_prefix(' ').unwrap_or(rest);
            self.push(TokenKind::Text(text.to_string()));
            return Ok(());
        }
        if let Some(rest) = s.strip_prefix("!!!") {
            self.push(TokenKind::Doctype(rest.trim().to_string()));
            return Ok(());
        }
        if let Some(rest) = s.strip_prefix("!=") {
            return self.lex_code(rest, true, false);
        }
        if let Some(rest) = s.strip_prefix('=') {
            return self.lex_code(rest, true, true);
        }
        if let Some(rest) = s.strip_prefix('-') {
            return self.lex_code(rest, false, false);
        }
        if s.starts_with(':') {
            return self.lex_filter(src);
        }
        if s.starts_with('+') {
            return self.lex_call(src);
        }
        if s.starts_with('#') || s.starts_with('.') {
            return self.lex_tag(src);
        }

        let word_len = ident_len(s);
        if word_len == 0 {
            let c = s.chars().next().unwrap_or(' ');
            return Err(self.error(format!("unexpected character `{}`", c)));
        }
        let word = &s[..word_len];
        let after = &s[word_len..];
        if after.is_empty() || after.starts_with(char::is_whitespace) {
            let arg = after.trim();
            let kind = match word {
                "doctype" => Some(TokenKind::Doctype(arg.to_string())),
                "extends" => Some(TokenKind::Extends(self.required(arg, word)?)),
                "include" => Some(TokenKind::Include(self.required(arg, word)?)),
                "block" => Some(self.block(arg)?),
                "append" if !arg.is_empty() => Some(TokenKind::Block {
                    mode: BlockMode::Append,
                    name: arg.to_string(),
                }),
                "prepend" if !arg.is_empty() => Some(TokenKind::Block {
                    mode: BlockMode::Prepend,
                    name: arg.to_string(),
                }),
                "mixin" => Some(self.mixin(arg)?),
                "each" | "for" => Some(self.each(arg)?),
                "if" => Some(TokenKind::If(self.required(arg, word)?)),
                "unless" => Some(TokenKind::Unless(self.required(arg, word)?)),
                "else" if arg.is_empty() => Some(TokenKind::Else),
                "else" => match arg.strip_prefix("if") {
                    Some(cond) if cond.starts_with(char::is_whitespace) => {
                        Some(TokenKind::ElseIf(cond.trim().to_string()))
                    }
                    _ => return Err(self.error(format!("unexpected `{}` after else", arg))),
                },
                "case" => Some(TokenKind::Case(self.required(arg, word)?)),
                "when" => Some(TokenKind::When(self.required(arg, word)?)),
                "default" if arg.is_empty() => Some(TokenKind::Default),
                _ => None,
            };
            if let Some(kind) = kind {
                self.push(kind);
                return Ok(());
            }
        }

        self.lex_tag(src)
    }

    fn required(&self, arg: &str, keyword: &str) -> Result<String> {
        if arg.is_empty() {
            return Err(self.error(format!("`{}` requires an argument", keyword)));
        }
        Ok(arg.to_string())
    }

    fn lex_code(&mut self, rest: &str, buffered: bool, escape: bool) -> Result<()> {
        let value = rest.trim();
        if value.is_empty() {
            return Err(self.error("missing code after `-`, `=` or `!=`"));
        }
        self.push(TokenKind::Code {
            buffered,
            escape,
            value: value.to_string(),
        });
        Ok(())
    }

    fn block(&self, arg: &str) -> Result<TokenKind> {
        let (mode, name) = match arg.split_once(char::is_whitespace) {
            Some(("append", name)) => (BlockMode::Append, name.trim()),
            Some(("prepend", name)) => (BlockMode::Prepend, name.trim()),
            Some(_) => return Err(self.error(format!("invalid block declaration `{}`", arg))),
            None => (BlockMode::Replace, arg),
        };
        Ok(TokenKind::Block {
            mode,
            name: name.to_string(),
        })
    }

    fn mixin(&mut self, arg: &str) -> Result<TokenKind> {
        let name_len = ident_len(arg);
        if name_len == 0 {
            return Err(self.error("mixin requires a name"));
        }
        let name = arg[..name_len].to_string();
        let rest = &arg[name_len..];
        let params = if rest.starts_with('(') {
            let mut src = rest.to_string();
            let mut pos = 0;
            let inner = self.balanced(&mut src, &mut pos)?;
            if !src[pos..].trim().is_empty() {
                return Err(self.error("unexpected text after mixin parameters"));
            }
            inner
        } else if rest.trim().is_empty() {
            String::new()
        } else {
            return Err(self.error(format!("invalid mixin declaration `{}`", arg)));
        };
        Ok(TokenKind::Mixin { name, params })
    }

    fn each(&self, arg: &str) -> Result<TokenKind> {
        let (names, expr) = arg
            .split_once(" in ")
            .ok_or_else(|| self.error("expected `each <item>[, <key>] in <expression>`"))?;
        let mut names = names.split(',').map(str::trim);
        let value = names.next().unwrap_or_default().to_string();
        let key = names.next().map(str::to_string);
        if names.next().is_some()
            || !is_ident(&value)
            || key.as_deref().is_some_and(|k| !is_ident(k))
        {
            return Err(self.error(format!("invalid loop variables in `{}`", arg)));
        }
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(self.error("missing collection expression in loop"));
        }
        Ok(TokenKind::Each {
            value,
            key,
            expr: expr.to_string(),
        })
    }

    fn lex_filter(&mut self, mut src: String) -> Result<()> {
        let len = ident_len(&src[1..]);
        if len == 0 {
            return Err(self.error("expected filter name after `:`"));
        }
        let name = src[1..1 + len].to_string();
        let mut pos = 1 + len;
        let options = if src[pos..].starts_with('(') {
            self.attrs(&mut src, &mut pos)?
        } else {
            Vec::new()
        };
        if !src[pos..].trim().is_empty() {
            return Err(self.error("filter content must be an indented block"));
        }
        self.push(TokenKind::Filter { name, options });
        self.pending = Some(PendingBlock::Text);
        Ok(())
    }

    fn lex_call(&mut self, mut src: String) -> Result<()> {
        let len = ident_len(&src[1..]);
        if len == 0 {
            return Err(self.error("expected mixin name after `+`"));
        }
        let name = src[1..1 + len].to_string();
        let mut pos = 1 + len;
        let args = if src[pos..].starts_with('(') {
            self.balanced(&mut src, &mut pos)?
        } else {
            String::new()
        };
        self.push(TokenKind::Call { name, args });

        let rest = src[pos..].to_string();
        match rest.strip_prefix(':') {
            Some(child) if child.starts_with(char::is_whitespace) => {
                self.push(TokenKind::Colon);
                self.lex_line(child.trim().to_string())
            }
            _ if rest.trim().is_empty() => Ok(()),
            _ => Err(self.error("unexpected text after mixin call")),
        }
    }

    fn lex_tag(&mut self, mut src: String) -> Result<()> {
        let mut pos = 0;
        if src.starts_with(|c: char| c.is_ascii_alphabetic()) {
            let mut len = ident_len(&src);
            while src[len..].starts_with(':')
                && src[len + 1..].starts_with(|c: char| c.is_ascii_alphabetic())
            {
                len += 1 + ident_len(&src[len + 1..]);
            }
            self.push(TokenKind::Tag(src[..len].to_string()));
            pos = len;
        } else {
            self.push(TokenKind::Tag("div".to_string()));
        }

        loop {
            let rest = &src[pos..];
            if let Some(id) = rest.strip_prefix('#') {
                let len = ident_len(id);
                if len == 0 {
                    return Err(self.error("expected id after `#`"));
                }
                self.push(TokenKind::Id(id[..len].to_string()));
                pos += 1 + len;
            } else if let Some(class) = rest
                .strip_prefix('.')
                .filter(|c| c.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_' || c == '-'))
            {
                let len = ident_len(class);
                self.push(TokenKind::Class(class[..len].to_string()));
                pos += 1 + len;
            } else if rest.starts_with('(') {
                let attrs = self.attrs(&mut src, &mut pos)?;
                self.push(TokenKind::Attrs(attrs));
            } else {
                break;
            }
        }

        let rest = src[pos..].to_string();
        if rest.is_empty() {
            return Ok(());
        }
        if let Some(tail) = rest.strip_prefix('/') {
            if tail.trim().is_empty() {
                self.push(TokenKind::SelfClose);
                return Ok(());
            }
        }
        if let Some(tail) = rest.strip_prefix('.') {
            if tail.trim().is_empty() {
                self.pending = Some(PendingBlock::Text);
                return Ok(());
            }
        }
        if let Some(child) = rest.strip_prefix(':') {
            if child.starts_with(char::is_whitespace) {
                self.push(TokenKind::Colon);
                return self.lex_line(child.trim().to_string());
            }
        }
        if let Some(code) = rest.strip_prefix("!=") {
            return self.lex_code(code, true, false);
        }
        if let Some(code) = rest.strip_prefix('=') {
            return self.lex_code(code, true, true);
        }
        if let Some(text) = rest.strip_prefix([' ', '\t']) {
            if !text.is_empty() {
                self.push(TokenKind::Text(text.to_string()));
            }
            return Ok(());
        }
        let c = rest.chars().next().unwrap_or(' ');
        Err(self.error(format!("unexpected `{}` after tag", c)))
    }

    /// 读取 `(`...`)` 中的内容，必要时拼接后续行
    fn balanced(&mut self, src: &mut String, pos: &mut usize) -> Result<String> {
        let start = *pos + 1;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut escaped = false;
        loop {
            let Some(c) = src[*pos..].chars().next() else {
                if quote.is_some() {
                    return Err(self.error("unterminated string"));
                }
                if !self.extend(src) {
                    return Err(self.error("unterminated parenthesis"));
                }
                continue;
            };
            *pos += c.len_utf8();
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
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(src[start..*pos - 1].trim().to_string());
                    }
                }
                _ => {}
            }
        }
    }

    fn attrs(&mut self, src: &mut String, pos: &mut usize) -> Result<Vec<RawAttr>> {
        *pos += 1;
        let mut attrs = Vec::new();
        loop {
            // 跳过分隔符
            loop {
                match src[*pos..].chars().next() {
                    Some(c) if c.is_whitespace() || c == ',' => *pos += c.len_utf8(),
                    Some(_) => break,
                    None => {
                        if !self.extend(src) {
                            return Err(self.error("unterminated attribute list"));
                        }
                    }
                }
            }
            if src[*pos..].starts_with(')') {
                *pos += 1;
                return Ok(attrs);
            }

            let name = self.attr_name(src, pos)?;
            while src[*pos..].starts_with([' ', '\t']) {
                *pos += 1;
            }
            let (value, escaped) = if src[*pos..].starts_with("!=") {
                *pos += 2;
                (Some(self.attr_value(src, pos)?), false)
            } else if src[*pos..].starts_with('=') {
                *pos += 1;
                (Some(self.attr_value(src, pos)?), true)
            } else {
                (None, true)
            };
            attrs.push(RawAttr {
                name,
                value,
                escaped,
            });
        }
    }

    fn attr_name(&mut self, src: &str, pos: &mut usize) -> Result<String> {
        let rest = &src[*pos..];
        if let Some(q) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') {
            let end = rest[1..]
                .find(q)
                .ok_or_else(|| self.error("unterminated attribute name"))?;
            *pos += end + 2;
            return Ok(rest[1..1 + end].to_string());
        }
        let len = rest
            .char_indices()
            .find(|(i, c)| {
                c.is_whitespace()
                    || matches!(*c, '=' | ',' | '(' | ')')
                    || (*c == '!' && rest[i + 1..].starts_with('='))
            })
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        if len == 0 {
            let c = rest.chars().next().unwrap_or(' ');
            return Err(self.error(format!("unexpected `{}` in attribute list", c)));
        }
        *pos += len;
        Ok(rest[..len].to_string())
    }

    /// 读取属性值表达式，遇到顶层的 `,`、`)` 或空白（且表达式未以运算符续接）结束
    fn attr_value(&mut self, src: &mut String, pos: &mut usize) -> Result<String> {
        loop {
            match src[*pos..].chars().next() {
                Some(' ') | Some('\t') => *pos += 1,
                Some(_) => break,
                None => {
                    if !self.extend(src) {
                        return Err(self.error("missing attribute value"));
                    }
                }
            }
        }

        let start = *pos;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut escaped = false;
        loop {
            let Some(c) = src[*pos..].chars().next() else {
                if quote.is_some() {
                    return Err(self.error("unterminated string in attribute value"));
                }
                if depth > 0 {
                    if !self.extend(src) {
                        return Err(self.error("unterminated attribute list"));
                    }
                    continue;
                }
                break;
            };
            if let Some(q) = quote {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                *pos += c.len_utf8();
                continue;
            }
            match c {
                '"' | '\'' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                ',' if depth == 0 => break,
                c if c.is_whitespace() && depth == 0 => {
                    let before = src[start..*pos].trim_end();
                    let after = src[*pos..].trim_start();
                    if !(before.ends_with(OPERATOR_CHARS) || after.starts_with(OPERATOR_CHARS)) {
                        break;
                    }
                }
                _ => {}
            }
            *pos += c.len_utf8();
        }

        let value = src[start..*pos].trim().to_string();
        if value.is_empty() {
            return Err(self.error("missing attribute value"));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize("test", src)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_indent_outdent() {
        let k = kinds("ul\n  li a\n  li b\np");
        assert_eq!(
            k,
            vec![
                TokenKind::Tag("ul".into()),
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Tag("li".into()),
                TokenKind::Text("a".into()),
                TokenKind::Newline,
                TokenKind::Tag("li".into()),
                TokenKind::Text("b".into()),
                TokenKind::Newline,
                TokenKind::Outdent,
                TokenKind::Tag("p".into()),
                TokenKind::Newline,
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    fn test_multiple_outdents_at_eof() {
        let k = kinds("a\n  b\n    c");
        let outdents = k.iter().filter(|t| **t == TokenKind::Outdent).count();
        assert_eq!(outdents, 2);
        assert_eq!(k.last(), Some(&TokenKind::Eos));
    }

    #[test]
    fn test_mixed_tabs_and_spaces_fails() {
        let err = tokenize("t", "div\n \tp").unwrap_err();
        assert!(matches!(err, TemplateError::Lex { line: 2, .. }));

        let err = tokenize("t", "div\n  p\nul\n\tli").unwrap_err();
        assert!(matches!(err, TemplateError::Lex { line: 4, .. }));
    }

    #[test]
    fn test_tabs_only_is_fine() {
        assert!(tokenize("t", "div\n\tp\n\t\tspan").is_ok());
    }

    #[test]
    fn test_ambiguous_outdent_fails() {
        let err = tokenize("t", "div\n    p\n  span").unwrap_err();
        assert!(matches!(err, TemplateError::Lex { line: 3, .. }));
    }

    #[test]
    fn test_tag_with_id_classes_and_attrs() {
        let k = kinds("a#main.nav.big(href='/x?a=1', title=t + 'x' data-on) Go");
        assert_eq!(k[0], TokenKind::Tag("a".into()));
        assert_eq!(k[1], TokenKind::Id("main".into()));
        assert_eq!(k[2], TokenKind::Class("nav".into()));
        assert_eq!(k[3], TokenKind::Class("big".into()));
        assert_eq!(
            k[4],
            TokenKind::Attrs(vec![
                RawAttr {
                    name: "href".into(),
                    value: Some("'/x?a=1'".into()),
                    escaped: true
                },
                RawAttr {
                    name: "title".into(),
                    value: Some("t + 'x'".into()),
                    escaped: true
                },
                RawAttr {
                    name: "data-on".into(),
                    value: None,
                    escaped: true
                },
            ])
        );
        assert_eq!(k[5], TokenKind::Text("Go".into()));
    }

    #[test]
    fn test_implicit_div_and_unescaped_attr() {
        let k = kinds(".box(html!=raw)");
        assert_eq!(k[0], TokenKind::Tag("div".into()));
        assert_eq!(k[1], TokenKind::Class("box".into()));
        assert_eq!(
            k[2],
            TokenKind::Attrs(vec![RawAttr {
                name: "html".into(),
                value: Some("raw".into()),
                escaped: false
            }])
        );
    }

    #[test]
    fn test_multiline_attributes() {
        let k = kinds("input(\n  type='text'\n  name='q'\n)\np");
        match &k[1] {
            TokenKind::Attrs(a) => assert_eq!(a.len(), 2),
            other => panic!("expected attrs, got {:?}", other),
        }
        assert_eq!(k[3], TokenKind::Tag("p".into()));
    }

    #[test]
    fn test_unterminated_attribute_list() {
        assert!(matches!(
            tokenize("t", "a(href='x'"),
            Err(TemplateError::Lex { .. })
        ));
        assert!(matches!(
            tokenize("t", "a(href='x)"),
            Err(TemplateError::Lex { .. })
        ));
    }

    #[test]
    fn test_text_block() {
        let k = kinds("script.\n  if (a) {\n    b();\n  }\np");
        assert_eq!(k[0], TokenKind::Tag("script".into()));
        assert_eq!(
            k[1],
            TokenKind::TextBlock(vec!["if (a) {".into(), "  b();".into(), "}".into()])
        );
        assert_eq!(k[3], TokenKind::Tag("p".into()));
    }

    #[test]
    fn test_filter_block() {
        let k = kinds(":cdata(x=1)\n  <raw>\n  stuff");
        assert_eq!(
            k[0],
            TokenKind::Filter {
                name: "cdata".into(),
                options: vec![RawAttr {
                    name: "x".into(),
                    value: Some("1".into()),
                    escaped: true
                }]
            }
        );
        assert_eq!(
            k[1],
            TokenKind::TextBlock(vec!["<raw>".into(), "stuff".into()])
        );
    }

    #[test]
    fn test_silent_comment_drops_block() {
        let k = kinds("//- hidden\n  also hidden\np");
        assert_eq!(k[0], TokenKind::Newline);
        assert_eq!(k[1], TokenKind::Tag("p".into()));
    }

    #[test]
    fn test_keywords() {
        let k = kinds("extends layout\nblock append scripts\neach v, k in items\nelse if x > 1\n+card('a', 2)");
        assert_eq!(k[0], TokenKind::Extends("layout".into()));
        assert_eq!(
            k[2],
            TokenKind::Block {
                mode: BlockMode::Append,
                name: "scripts".into()
            }
        );
        assert_eq!(
            k[4],
            TokenKind::Each {
                value: "v".into(),
                key: Some("k".into()),
                expr: "items".into()
            }
        );
        assert_eq!(k[6], TokenKind::ElseIf("x > 1".into()));
        assert_eq!(
            k[8],
            TokenKind::Call {
                name: "card".into(),
                args: "'a', 2".into()
            }
        );
    }

    #[test]
    fn test_block_expansion() {
        let k = kinds("li: a(href='/') Home");
        assert_eq!(k[0], TokenKind::Tag("li".into()));
        assert_eq!(k[1], TokenKind::Colon);
        assert_eq!(k[2], TokenKind::Tag("a".into()));
        assert_eq!(k[4], TokenKind::Text("Home".into()));
    }

    #[test]
    fn test_keyword_prefixed_tag_name() {
        let k = kinds("blockquote text");
        assert_eq!(k[0], TokenKind::Tag("blockquote".into()));
    }

    #[test]
    fn test_split_top_level() {
        assert_eq!(
            split_top_level("a, fn(b, c), 'x,y', [1, 2]"),
            vec!["a", "fn(b, c)", "'x,y'", "[1, 2]"]
        );
        assert!(split_top_level("").is_empty());
    }
}
