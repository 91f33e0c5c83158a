use anyhow::{Context, bail};
use clap::Parser;
use jadeite::{Configuration, FileTemplateLoader, Mode, TemplateOptions, Value};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt};

/// 渲染目录中的 Jade 模板并输出到标准输出
#[derive(Parser)]
#[command(name = "jadeite")]
#[command(about = "Render a jade template from a directory")]
struct Cli {
    /// 模板根目录
    dir: PathBuf,

    /// 模板名称（不含扩展名）
    name: String,

    /// 局部变量，格式为 key=value
    vars: Vec<String>,

    /// 缩进输出
    #[arg(long)]
    pretty: bool,

    /// 输出模式：html、xhtml 或 xml
    #[arg(long, default_value = "html")]
    mode: Mode,

    /// 预编译目录中的全部模板
    #[arg(long)]
    precompile: bool,
}

/// 按 整数、浮点、布尔、字符串 的顺序推断值类型
fn parse_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::Float(f);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::from(raw),
    }
}

fn parse_vars(vars: &[String]) -> anyhow::Result<HashMap<String, Value>> {
    let mut locals = HashMap::new();
    for var in vars {
        let Some((key, value)) = var.split_once('=') else {
            bail!("invalid variable `{}`, expected key=value", var);
        };
        locals.insert(key.trim().to_string(), parse_value(value));
    }
    Ok(locals)
}

fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let options = TemplateOptions::new().pretty_print(cli.pretty).mode(cli.mode);
    let config = Configuration::with_options(FileTemplateLoader::new(&cli.dir), options);

    if cli.precompile {
        let count = config
            .precompile()
            .with_context(|| format!("failed to precompile templates in {}", cli.dir.display()))?;
        tracing::info!(count, "precompile finished");
    }

    let locals = parse_vars(&cli.vars)?;
    let template = config
        .get_template(&cli.name)
        .with_context(|| format!("failed to compile template `{}`", cli.name))?;
    let mut stdout = io::stdout().lock();
    config
        .render_template_to(&template, locals, &mut stdout)
        .with_context(|| format!("failed to render template `{}`", cli.name))?;
    writeln!(stdout)?;
    Ok(())
}
