use jadeite::{Configuration, TemplateLoader, Value};
use std::collections::HashMap;

// 在 main 之前注册 tests/resources 下的模板
jadeite::template_assets!("tests/resources/**/*.jade");

#[test]
fn test_templates_are_embedded() {
    let loader = jadeite::loader::embedded();
    assert!(loader.exists("layout"));
    assert!(loader.exists("pages/home"));
    assert!(loader.exists("partials/nav"));
    assert!(loader.content("layout").unwrap().contains("block content"));
}

#[test]
fn test_render_embedded_page() {
    let config = Configuration::embedded();
    let mut link = HashMap::new();
    link.insert("url".to_string(), Value::from("/docs"));
    link.insert("label".to_string(), Value::from("Docs"));
    let locals = HashMap::from([
        ("title".to_string(), Value::from("Home")),
        ("links".to_string(), Value::List(vec![Value::from(link)])),
    ]);
    let template = config.get_template("pages/home").unwrap();
    let out = config.render_template(&template, locals).unwrap();
    assert_eq!(
        out,
        "<!DOCTYPE html><html><head><title>Home</title></head><body>\
         <nav><a href=\"/docs\">Docs</a></nav><h1>Home</h1>footer!</body></html>"
    );
}
