#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

const PUNCTS: &[&str] = &[
    "===", "!==", "...", "==", "!=", "<=", ">=", "&&", "||", "+", "-", "*", "/", "%", "<", ">",
    "!", "?", ":", ".", ",", "(", ")", "[", "]", "{", "}",
];

/// 将表达式文本切分为记号，返回 (记号, 字节偏移)
pub(crate) fn tokenize(src: &str) -> Result<Vec<(Tok, usize)>, String> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        if c.is_ascii_digit() {
            let start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            let mut is_float = false;
            if pos + 1 < bytes.len() && bytes[pos] == b'.' && bytes[pos + 1].is_ascii_digit() {
                is_float = true;
                pos += 1;
                while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                    pos += 1;
                }
            }
            let text = &src[start..pos];
            let tok = if is_float {
                Tok::Float(text.parse().map_err(|_| format!("invalid number `{}`", text))?)
            } else {
                match text.parse::<i64>() {
                    Ok(i) => Tok::Int(i),
                    Err(_) => {
                        Tok::Float(text.parse().map_err(|_| format!("invalid number `{}`", text))?)
                    }
                }
            };
            out.push((tok, start));
            continue;
        }

        if c == b'"' || c == b'\'' {
            let start = pos;
            let (s, end) = read_string(src, pos)?;
            out.push((Tok::Str(s), start));
            pos = end;
            continue;
        }

        if c == b'_' || c == b'$' || c.is_ascii_alphabetic() {
            let start = pos;
            while pos < bytes.len()
                && (bytes[pos] == b'_' || bytes[pos] == b'$' || bytes[pos].is_ascii_alphanumeric())
            {
                pos += 1;
            }
            out.push((Tok::Ident(src[start..pos].to_string()), start));
            continue;
        }

        match PUNCTS.iter().find(|p| src[pos..].starts_with(**p)) {
            Some(p) => {
                out.push((Tok::Punct(p), pos));
                pos += p.len();
            }
            None => {
                let ch = src[pos..].chars().next().unwrap_or('?');
                return Err(format!("unexpected character `{}` at offset {}", ch, pos));
            }
        }
    }

    Ok(out)
}

/// 读取以 `start` 处引号开头的字符串字面量，返回内容与结束位置
fn read_string(src: &str, start: usize) -> Result<(String, usize), String> {
    let mut chars = src[start..].char_indices();
    let (_, quote) = chars.next().ok_or("empty string literal")?;
    let mut out = String::new();

    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            c if c == quote => return Ok((out, start + i + c.len_utf8())),
            c => out.push(c),
        }
    }

    Err(format!("unterminated string literal at offset {}", start))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_mixed() {
        let toks: Vec<Tok> = tokenize("a.b >= 10 && name == 'x\\'y'")
            .unwrap()
            .into_iter()
            .map(|(t, _)| t)
            .collect();
        assert_eq!(
            toks,
            vec![
                Tok::Ident("a".into()),
                Tok::Punct("."),
                Tok::Ident("b".into()),
                Tok::Punct(">="),
                Tok::Int(10),
                Tok::Punct("&&"),
                Tok::Ident("name".into()),
                Tok::Punct("=="),
                Tok::Str("x'y".into()),
            ]
        );
    }

    #[test]
    fn test_float_and_member() {
        let toks = tokenize("1.5 + list.0").unwrap();
        assert_eq!(toks[0].0, Tok::Float(1.5));
        assert_eq!(toks[3].0, Tok::Punct("."));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(tokenize("'abc").is_err());
    }

    #[test]
    fn test_unknown_character() {
        assert!(tokenize("a # b").is_err());
    }
}
