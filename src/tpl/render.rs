use crate::error::{Result, TemplateError};
use crate::expr::ExpressionHandler;
use crate::html::{INLINE_ELEMENTS, VOID_ELEMENTS, doctype_declaration, escape_html};
use crate::model::{Model, Value};
use crate::models::Mode;
use crate::tpl::ast::{Attr, AttrValue, Code, Node, Span, Tag};
use crate::tpl::render_context::Scope;
use crate::tpl::template::CompiledTemplate;
use std::collections::BTreeMap;
use std::fmt;

/// 混入嵌套调用的最大深度
const MAX_MIXIN_DEPTH: usize = 32;

/// 混入调用方传入的内容，以及调用时的作用域深度
struct CallerBlock<'t> {
    body: Option<&'t [Node]>,
    depth: usize,
}

struct Renderer<'t, 'm, 'o> {
    template: &'t CompiledTemplate,
    model: &'m Model<'m>,
    expressions: ExpressionHandler,
    scope: Scope<'m>,
    out: &'o mut dyn fmt::Write,
    callers: Vec<CallerBlock<'t>>,
    depth: usize,
    started: bool,
    block_emitted: bool,
}

/// 深度优先遍历 AST 输出标记文本
pub(crate) fn render(template: &CompiledTemplate, model: &Model<'_>, out: &mut dyn fmt::Write) -> Result<()> {
    let mut renderer = Renderer {
        template,
        model,
        expressions: model.expression_handler(),
        scope: Scope::new(model),
        out,
        callers: Vec::new(),
        depth: 0,
        started: false,
        block_emitted: false,
    };
    renderer.nodes(template.root())
}

fn loop_value(index: usize, length: usize) -> Value {
    let mut info = BTreeMap::new();
    info.insert("index".to_string(), Value::from(index));
    info.insert("length".to_string(), Value::from(length));
    info.insert("first".to_string(), Value::Bool(index == 0));
    info.insert("last".to_string(), Value::Bool(index + 1 == length));
    Value::Map(info)
}

impl<'t, 'm, 'o> Renderer<'t, 'm, 'o> {
    fn fail(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::render(self.template.name(), message)
    }

    /// 渲染期的表达式错误统一报告为渲染错误
    fn eval(&self, source: &str) -> Result<Value> {
        self.expressions
            .evaluate(source, &self.scope)
            .map_err(|e| self.fail(e.to_string()))
    }

    fn write(&mut self, s: &str) -> Result<()> {
        if s.is_empty() {
            return Ok(());
        }
        self.started = true;
        self.out
            .write_str(s)
            .map_err(|_| self.fail("failed to write output"))
    }

    fn newline(&mut self) -> Result<()> {
        if !self.template.pretty_print() || !self.started {
            return Ok(());
        }
        let indent = "  ".repeat(self.depth);
        self.write(&format!("\n{}", indent))
    }

    fn nodes(&mut self, nodes: &'t [Node]) -> Result<()> {
        for node in nodes {
            self.node(node)?;
        }
        Ok(())
    }

    fn node(&mut self, node: &'t Node) -> Result<()> {
        match node {
            Node::Doctype(value) => {
                self.newline()?;
                self.write(&doctype_declaration(value))?;
                self.block_emitted = true;
                Ok(())
            }
            Node::Tag(tag) => self.tag(tag),
            Node::Text(spans) => {
                let text = self.spans(spans, false)?;
                self.write(&text)
            }
            Node::Output { expr, escape } => {
                let text = self.eval(expr)?.to_string();
                if *escape {
                    self.write(&escape_html(&text))
                } else {
                    self.write(&text)
                }
            }
            Node::Assign { name, expr } => {
                let value = self.eval(expr)?;
                self.scope.set(name.as_str(), value);
                Ok(())
            }
            Node::Code(code) => self.code(code),
            Node::Comment { text, buffered } => {
                if *buffered {
                    self.newline()?;
                    self.write(&format!("<!--{}-->", text))?;
                    self.block_emitted = true;
                }
                Ok(())
            }
            Node::Mixin(_) => Ok(()),
            Node::MixinCall { name, args, body } => self.call(name, args, body.as_deref()),
            Node::MixinBlock => self.caller_block(),
            Node::Block { children, .. } => self.nodes(children),
            Node::FilterBlock {
                name,
                content,
                options,
            } => {
                let filter = self
                    .model
                    .filters()
                    .get(name)
                    .ok_or_else(|| self.fail(format!("unknown filter `{}`", name)))?;
                let output = filter.convert(content, options);
                self.write(&output)
            }
        }
    }

    fn spans(&self, spans: &[Span], escape_literals: bool) -> Result<String> {
        let mut text = String::new();
        for span in spans {
            match span {
                Span::Literal(s) if escape_literals => text.push_str(&escape_html(s)),
                Span::Literal(s) => text.push_str(s),
                Span::Escaped(expr) => text.push_str(&escape_html(&self.eval(expr)?.to_string())),
                Span::Raw(expr) => text.push_str(&self.eval(expr)?.to_string()),
            }
        }
        Ok(text)
    }

    fn tag(&mut self, tag: &'t Tag) -> Result<()> {
        let inline = INLINE_ELEMENTS.contains(&tag.name.as_str());
        if !inline {
            self.newline()?;
        }
        let attrs = self.attributes(&tag.attrs)?;
        self.write(&format!("<{}{}", tag.name, attrs))?;

        let mode = self.template.mode();
        let void = VOID_ELEMENTS.contains(&tag.name.as_str());
        if tag.self_closing || (tag.children.is_empty() && (void || mode == Mode::Xml)) {
            if tag.self_closing || mode != Mode::Html {
                self.write("/>")?;
            } else {
                self.write(">")?;
            }
            self.block_emitted |= !inline;
            return Ok(());
        }

        self.write(">")?;
        let outer = std::mem::replace(&mut self.block_emitted, false);
        self.depth += 1;
        let result = self.nodes(&tag.children);
        self.depth -= 1;
        result?;
        // 含块级子元素时闭合标签另起一行
        if self.block_emitted {
            self.newline()?;
        }
        self.write(&format!("</{}>", tag.name))?;
        self.block_emitted = outer || !inline;
        Ok(())
    }

    fn attributes(&self, attrs: &[Attr]) -> Result<String> {
        let mode = self.template.mode();
        let mut entries: Vec<(&str, Option<String>)> = Vec::new();
        let mut classes: Vec<String> = Vec::new();
        let mut class_slot = None;

        for attr in attrs {
            let interpolated = matches!(attr.value, AttrValue::Interpolated(_));
            let value = match &attr.value {
                AttrValue::Implicit => Value::Bool(true),
                AttrValue::Expr(src) => self.eval(src)?,
                AttrValue::Interpolated(spans) => Value::Str(self.spans(spans, attr.escaped)?),
            };
            let escape = |s: String| {
                if attr.escaped && !interpolated {
                    escape_html(&s)
                } else {
                    s
                }
            };

            // shorthand 与属性中的 class 合并输出
            if attr.name == "class" {
                if class_slot.is_none() {
                    class_slot = Some(entries.len());
                    entries.push(("class", None));
                }
                match value {
                    Value::List(items) => classes.extend(
                        items
                            .iter()
                            .filter(|v| v.is_truthy())
                            .map(|v| escape(v.to_string())),
                    ),
                    Value::Null | Value::Bool(_) => {}
                    other => {
                        let s = other.to_string();
                        if !s.is_empty() {
                            classes.push(escape(s));
                        }
                    }
                }
                continue;
            }

            match value {
                Value::Null | Value::Bool(false) => {}
                Value::Bool(true) => match mode {
                    Mode::Html => entries.push((attr.name.as_str(), None)),
                    Mode::Xhtml | Mode::Xml => entries.push((attr.name.as_str(), Some(attr.name.clone()))),
                },
                Value::Map(style) if attr.name == "style" => {
                    let css: String = style
                        .iter()
                        .map(|(k, v)| format!("{}:{};", k, v))
                        .collect();
                    entries.push((attr.name.as_str(), Some(escape(css))));
                }
                other => entries.push((attr.name.as_str(), Some(escape(other.to_string())))),
            }
        }

        if let Some(slot) = class_slot {
            if classes.is_empty() {
                entries.remove(slot);
            } else {
                entries[slot].1 = Some(classes.join(" "));
            }
        }

        let mut out = String::new();
        for (name, value) in entries {
            match value {
                Some(v) => out.push_str(&format!(" {}=\"{}\"", name, v)),
                None => out.push_str(&format!(" {}", name)),
            }
        }
        Ok(out)
    }

    fn code(&mut self, code: &'t Code) -> Result<()> {
        match code {
            Code::If {
                branches,
                otherwise,
            } => {
                for branch in branches {
                    if self.eval(&branch.test)?.is_truthy() != branch.negate {
                        return self.nodes(&branch.body);
                    }
                }
                match otherwise {
                    Some(body) => self.nodes(body),
                    None => Ok(()),
                }
            }
            Code::Each {
                value,
                key,
                collection,
                body,
                fallback,
            } => {
                let items: Vec<(Value, Value)> = match self.eval(collection)? {
                    Value::Null => Vec::new(),
                    Value::List(list) => list
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| (v, Value::from(i)))
                        .collect(),
                    Value::Map(map) => map.into_iter().map(|(k, v)| (v, Value::Str(k))).collect(),
                    other => {
                        return Err(self.fail(format!(
                            "cannot iterate over {} `{}`",
                            other.type_name(),
                            collection
                        )));
                    }
                };

                if items.is_empty() {
                    return match fallback {
                        Some(body) => self.nodes(body),
                        None => Ok(()),
                    };
                }

                let length = items.len();
                for (index, (item, item_key)) in items.into_iter().enumerate() {
                    self.scope.push_frame();
                    self.scope.set(value.as_str(), item);
                    if let Some(key) = key {
                        self.scope.set(key.as_str(), item_key);
                    }
                    self.scope.set("loop", loop_value(index, length));
                    let result = self.nodes(body);
                    self.scope.pop_frame();
                    result?;
                }
                Ok(())
            }
            Code::Case {
                subject,
                whens,
                default,
            } => {
                let subject = self.eval(subject)?;
                for when in whens {
                    if subject.loose_eq(&self.eval(&when.value)?) {
                        return self.nodes(&when.body);
                    }
                }
                match default {
                    Some(body) => self.nodes(body),
                    None => Ok(()),
                }
            }
        }
    }

    fn call(&mut self, name: &str, args: &'t [String], body: Option<&'t [Node]>) -> Result<()> {
        let template = self.template;
        let mixin = template
            .mixin(name)
            .ok_or_else(|| self.fail(format!("unknown mixin `{}`", name)))?;
        if self.callers.len() >= MAX_MIXIN_DEPTH {
            return Err(self.fail(format!(
                "mixin `{}` exceeded the maximum call depth of {}",
                name, MAX_MIXIN_DEPTH
            )));
        }

        // 参数在调用方作用域中求值
        let mut bindings = Vec::with_capacity(mixin.params.len() + 1);
        for (i, param) in mixin.params.iter().enumerate() {
            let value = match (args.get(i), &param.default) {
                (Some(arg), _) => self.eval(arg)?,
                (None, Some(default)) => self.eval(default)?,
                (None, None) => Value::Null,
            };
            bindings.push((param.name.as_str(), value));
        }
        if let Some(rest) = &mixin.rest {
            let extra = args
                .iter()
                .skip(mixin.params.len())
                .map(|arg| self.eval(arg))
                .collect::<Result<Vec<_>>>()?;
            bindings.push((rest.as_str(), Value::List(extra)));
        }

        let depth = self.scope.depth();
        self.scope.push_frame();
        for (name, value) in bindings {
            self.scope.set(name, value);
        }
        self.callers.push(CallerBlock { body, depth });
        let result = self.nodes(&mixin.body);
        self.callers.pop();
        self.scope.pop_frame();
        result
    }

    /// 在调用方作用域中渲染传入混入的内容
    fn caller_block(&mut self) -> Result<()> {
        let Some(caller) = self.callers.pop() else {
            return Ok(());
        };
        let result = match caller.body {
            Some(body) => {
                let saved = self.scope.split_off(caller.depth);
                let result = self.nodes(body);
                self.scope.restore(saved);
                result
            }
            None => Ok(()),
        };
        self.callers.push(caller);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterRegistry;
    use crate::loader::MemoryTemplateLoader;
    use crate::models::TemplateOptions;
    use std::collections::HashMap;

    fn compile(source: &str, options: TemplateOptions) -> CompiledTemplate {
        let loader = MemoryTemplateLoader::new();
        loader.insert("index", source);
        CompiledTemplate::compile("index", &loader, &options).unwrap()
    }

    fn render_with(source: &str, options: TemplateOptions, vars: &[(&str, Value)]) -> Result<String> {
        let template = compile(source, options);
        let filters = FilterRegistry::default();
        let mut model = Model::new(&filters);
        for (k, v) in vars {
            model.insert(*k, v.clone());
        }
        template.render(&model)
    }

    fn render_src(source: &str) -> String {
        render_with(source, TemplateOptions::default(), &[]).unwrap()
    }

    #[test]
    fn test_literal_text_verbatim() {
        assert_eq!(render_src("| just some text"), "just some text");
    }

    #[test]
    fn test_escaped_and_raw_interpolation() {
        assert_eq!(
            render_src("p #{\"<b>\"} !{\"<b>\"}"),
            "<p>&lt;b&gt; <b></p>"
        );
    }

    #[test]
    fn test_buffered_code() {
        let out = render_with(
            "p= html\np!= html",
            TemplateOptions::default(),
            &[("html", Value::from("<i>x</i>"))],
        )
        .unwrap();
        assert_eq!(out, "<p>&lt;i&gt;x&lt;/i&gt;</p><p><i>x</i></p>");
    }

    #[test]
    fn test_attributes_and_class_merge() {
        let out = render_with(
            "a.btn(href=url, class=['x', 'y'], title=\"go #{name}\") Go",
            TemplateOptions::default(),
            &[("url", Value::from("/home")), ("name", Value::from("<me>"))],
        )
        .unwrap();
        assert_eq!(
            out,
            "<a class=\"btn x y\" href=\"/home\" title=\"go &lt;me&gt;\">Go</a>"
        );
    }

    #[test]
    fn test_boolean_attributes_by_mode() {
        let src = "input(type='checkbox', checked=true, disabled=false)";
        assert_eq!(render_src(src), "<input type=\"checkbox\" checked>");
        let xhtml = render_with(src, TemplateOptions::new().mode(Mode::Xhtml), &[]).unwrap();
        assert_eq!(xhtml, "<input type=\"checkbox\" checked=\"checked\"/>");
    }

    #[test]
    fn test_void_and_empty_elements_by_mode() {
        assert_eq!(render_src("br\ndiv"), "<br><div></div>");
        let xml = render_with("item\nbr", TemplateOptions::new().mode(Mode::Xml), &[]).unwrap();
        assert_eq!(xml, "<item/><br/>");
        assert_eq!(render_src("foo/"), "<foo/>");
    }

    #[test]
    fn test_each_renders_in_order() {
        assert_eq!(render_src("each item in [1, 2, 3]\n  = item"), "123");
    }

    #[test]
    fn test_each_over_map_with_loop_info() {
        let out = render_src("each v, k in {b: 2, a: 1}\n  | #{k}=#{v}#{loop.last ? '' : ','}");
        assert_eq!(out, "a=1,b=2");
    }

    #[test]
    fn test_each_fallback_and_null() {
        assert_eq!(render_src("each x in []\n  = x\nelse\n  | none"), "none");
        assert_eq!(render_src("each x in missing\n  = x"), "");
    }

    #[test]
    fn test_each_over_scalar_fails() {
        let err = render_with("each x in 5\n  = x", TemplateOptions::default(), &[]).unwrap_err();
        assert!(matches!(err, TemplateError::Render { .. }));
    }

    #[test]
    fn test_loop_bindings_are_scoped() {
        let out = render_with(
            "each item in [1]\n  = item\n= item",
            TemplateOptions::default(),
            &[("item", Value::from("outer"))],
        )
        .unwrap();
        assert_eq!(out, "1outer");
    }

    #[test]
    fn test_case_first_match_only() {
        let src = "case 2\n  when 1\n    | one\n  when 2\n    | first\n  when 2\n    | second\n  default\n    | other";
        assert_eq!(render_src(src), "first");
        assert_eq!(render_src("case 9\n  when 1\n    | one\n  default\n    | other"), "other");
    }

    #[test]
    fn test_conditionals() {
        let src = "if n > 5\n  | big\nelse if n > 1\n  | medium\nelse\n  | small\nunless n\n  | zero";
        let render = |n: i64| render_with(src, TemplateOptions::default(), &[("n", Value::Int(n))]).unwrap();
        assert_eq!(render(9), "big");
        assert_eq!(render(3), "medium");
        assert_eq!(render(0), "smallzero");
    }

    #[test]
    fn test_assignment() {
        assert_eq!(render_src("- var x = 2\np= x * 3"), "<p>6</p>");
    }

    #[test]
    fn test_mixin_with_default_and_block() {
        let src = "mixin card(title, size=2)\n  .card(data-size=size)\n    h1= title\n    block\n+card('Hi')\n  p body";
        assert_eq!(
            render_src(src),
            "<div class=\"card\" data-size=\"2\"><h1>Hi</h1><p>body</p></div>"
        );
    }

    #[test]
    fn test_mixin_params_shadow_outer_scope() {
        let src = "mixin show(title)\n  = title\n+show('inner')\n= title";
        let out = render_with(src, TemplateOptions::default(), &[("title", Value::from("outer"))]).unwrap();
        assert_eq!(out, "innerouter");
    }

    #[test]
    fn test_mixin_block_uses_caller_scope() {
        let src = "mixin wrap(x)\n  div\n    block\n- var x = 'caller'\n+wrap('param')\n  = x";
        assert_eq!(render_src(src), "<div>caller</div>");
    }

    #[test]
    fn test_mixin_rest_arguments() {
        let src = "mixin list(first, ...items)\n  = first\n  each i in items\n    = i\n+list(0, 1, 2)";
        assert_eq!(render_src(src), "012");
    }

    #[test]
    fn test_unknown_mixin_and_recursion_limit() {
        let err = render_with("+nope()", TemplateOptions::default(), &[]).unwrap_err();
        assert!(matches!(err, TemplateError::Render { .. }));

        let err = render_with("mixin again()\n  +again()\n+again()", TemplateOptions::default(), &[])
            .unwrap_err();
        match err {
            TemplateError::Render { message, .. } => assert!(message.contains("maximum call depth")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_recursion_through_tags_and_conditionals_is_bounded() {
        let src = "mixin again(n)\n  div\n    if n >= 0\n      +again(n + 1)\n+again(0)";
        let err = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || render_with(src, TemplateOptions::default(), &[]))
            .unwrap()
            .join()
            .unwrap()
            .unwrap_err();
        match err {
            TemplateError::Render { message, .. } => {
                assert!(message.contains("maximum call depth of 32"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_mixin_default_uses_caller_scope() {
        let src = "mixin m(a, b=x)\n  = b\n- var x = 'caller'\n+m(1)\n= b";
        let out = render_with(src, TemplateOptions::default(), &[("b", Value::from("outer"))]).unwrap();
        assert_eq!(out, "callerouter");
        // 参数不会泄漏到调用之后
        assert_eq!(render_src("mixin m(a, b=x)\n  = b\n- var x = 'caller'\n+m(1)\n= b"), "caller");
    }

    #[test]
    fn test_filters() {
        assert_eq!(render_src(":cdata\n  a < b"), "<![CDATA[\na < b\n]]>");
        let err = render_with(":unknownFilter\n  text", TemplateOptions::default(), &[]).unwrap_err();
        assert!(matches!(err, TemplateError::Render { .. }));
    }

    #[test]
    fn test_filter_options_reach_filter() {
        let template = compile(":wrap(tag='em')\n  hi", TemplateOptions::default());
        let filters = FilterRegistry::default();
        filters.register("wrap", |src: &str, opts: &crate::filter::FilterOptions| {
            let tag = opts.get("tag").cloned().unwrap_or_default();
            format!("<{0}>{1}</{0}>", tag, src)
        });
        let model = Model::new(&filters);
        assert_eq!(template.render(&model).unwrap(), "<em>hi</em>");
    }

    #[test]
    fn test_doctype_and_comments() {
        assert_eq!(
            render_src("doctype html\n// note\n//- hidden\np"),
            "<!DOCTYPE html><!-- note--><p></p>"
        );
    }

    #[test]
    fn test_text_block() {
        assert_eq!(
            render_src("script.\n  if (a) {\n    b();\n  }"),
            "<script>if (a) {\n  b();\n}</script>"
        );
    }

    #[test]
    fn test_pretty_print() {
        let src = "html\n  body\n    p hi\n    p\n      span x";
        let out = render_with(src, TemplateOptions::new().pretty_print(true), &[]).unwrap();
        assert_eq!(
            out,
            "<html>\n  <body>\n    <p>hi</p>\n    <p><span>x</span></p>\n  </body>\n</html>"
        );
        assert_eq!(
            render_src(src),
            "<html><body><p>hi</p><p><span>x</span></p></body></html>"
        );
    }

    #[test]
    fn test_render_error_leaves_template_usable() {
        let template = compile("= items.join(', ')\n= 1 / d", TemplateOptions::default());
        let filters = FilterRegistry::default();
        let locals: HashMap<String, Value> =
            HashMap::from([("items".to_string(), Value::from(vec!["a", "b"]))]);
        let shared: HashMap<String, Value> = HashMap::new();

        let mut model = Model::new(&filters).with_variables(&shared, locals.clone());
        model.insert("d", 0);
        assert!(matches!(template.render(&model), Err(TemplateError::Render { .. })));

        let mut model = Model::new(&filters).with_variables(&shared, locals);
        model.insert("d", 2);
        assert_eq!(template.render(&model).unwrap(), "a, b0.5");
    }

    #[test]
    fn test_render_to_writer() {
        let template = compile("p hi", TemplateOptions::default());
        let filters = FilterRegistry::default();
        let model = Model::new(&filters);
        let mut buf: Vec<u8> = Vec::new();
        template.render_to(&model, &mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "<p>hi</p>");
    }
}
