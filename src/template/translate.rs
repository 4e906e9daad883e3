//! Go template actions rewritten as Handlebars.
//!
//! Field references become `lookup` calls, so any key works, including
//! names Handlebars reserves for itself (`this`, helper names). Trim
//! markers are applied here, on the text around the action.

use handlebars::to_json;

use crate::error::{Error, Result};

/// Whitespace removed by `{{-` and `-}}`
const SPACE: &[char] = &[' ', '\t', '\r', '\n'];

/// Empty expression placed after block tags. Handlebars drops the whole
/// line around a block tag that stands alone on it; Go keeps it.
const KEEP_LINE: &str = "{{print}}";

/// Go builtins without a counterpart in the renderer
const UNSUPPORTED_FUNCS: [&str; 7] = ["call", "html", "js", "printf", "println", "slice", "urlquery"];

fn syntax(message: impl Into<String>) -> Error {
    Error::TemplateSyntax(message.into())
}

fn is_space(c: char) -> bool {
    SPACE.contains(&c)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Dot,
    Field(Vec<String>),
    Ident(String),
    Str(String),
    Number(String),
    Bool(bool),
    Nil,
    LParen,
    RParen,
    Pipe,
}

/// One `{{ ... }}` action.
struct Action {
    /// `None` for a comment
    tokens: Option<Vec<Token>>,
    trim_left: bool,
    trim_right: bool,
    /// Bytes after the opening `{{`, up to and including the closing `}}`
    len: usize,
}

/// `}}` or ` -}}` at the start of `s`, with its length.
fn right_delim(s: &str) -> Option<(bool, usize)> {
    if s.starts_with("}}") {
        return Some((false, 2));
    }
    match s.chars().next() {
        Some(c) if is_space(c) && s[1..].starts_with("-}}") => Some((true, 4)),
        _ => None,
    }
}

fn lex_action(src: &str) -> Result<Action> {
    let trim_left = src.starts_with('-') && src[1..].starts_with(is_space);
    let mut pos = if trim_left { 2 } else { 0 };

    if src[pos..].starts_with("/*") {
        let close = src[pos..]
            .find("*/")
            .ok_or_else(|| syntax("unclosed comment"))?;
        let end = pos + close + 2;
        let (trim_right, len) =
            right_delim(&src[end..]).ok_or_else(|| syntax("comment ends before closing delimiter"))?;
        return Ok(Action {
            tokens: None,
            trim_left,
            trim_right,
            len: end + len,
        });
    }

    let mut tokens = Vec::new();
    loop {
        let rest = &src[pos..];
        if let Some((trim_right, len)) = right_delim(rest) {
            return Ok(Action {
                tokens: Some(tokens),
                trim_left,
                trim_right,
                len: pos + len,
            });
        }

        let c = rest.chars().next().ok_or_else(|| syntax("unclosed action"))?;
        if is_space(c) {
            pos += 1;
            continue;
        }

        let (token, len) = lex_token(rest)?;
        tokens.push(token);
        pos += len;
    }
}

fn ident_len(s: &str) -> usize {
    let mut len = 0;
    for (i, c) in s.char_indices() {
        let allowed = c == '_' || c.is_alphabetic() || (i > 0 && c.is_numeric());
        if !allowed {
            break;
        }
        len = i + c.len_utf8();
    }
    len
}

fn lex_token(s: &str) -> Result<(Token, usize)> {
    let Some(c) = s.chars().next() else {
        return Err(syntax("unclosed action"));
    };
    let starts_number = |rest: &str| rest.starts_with(|d: char| d.is_ascii_digit());

    match c {
        '(' => Ok((Token::LParen, 1)),
        ')' => Ok((Token::RParen, 1)),
        '|' => Ok((Token::Pipe, 1)),
        '"' => lex_quoted(s),
        '`' => {
            let end = s[1..]
                .find('`')
                .ok_or_else(|| syntax("unterminated raw quoted string"))?;
            Ok((Token::Str(s[1..1 + end].to_string()), end + 2))
        }
        '.' => {
            let mut names = Vec::new();
            let mut pos = 0;
            while s[pos..].starts_with('.') {
                let len = ident_len(&s[pos + 1..]);
                if len == 0 {
                    break;
                }
                names.push(s[pos + 1..pos + 1 + len].to_string());
                pos += 1 + len;
            }
            if names.is_empty() {
                Ok((Token::Dot, 1))
            } else {
                Ok((Token::Field(names), pos))
            }
        }
        '$' => Err(syntax("template variables are not supported")),
        '\'' => Err(syntax("character constants are not supported")),
        d if d.is_ascii_digit() => lex_number(s),
        '-' | '+' if starts_number(&s[1..]) => lex_number(s),
        w if w == '_' || w.is_alphabetic() => {
            let len = ident_len(s);
            let token = match &s[..len] {
                "true" => Token::Bool(true),
                "false" => Token::Bool(false),
                "nil" => Token::Nil,
                word => Token::Ident(word.to_string()),
            };
            Ok((token, len))
        }
        other => Err(syntax(format!("unexpected {:?} in action", other))),
    }
}

fn lex_number(s: &str) -> Result<(Token, usize)> {
    let len = s
        .char_indices()
        .skip(1)
        .find(|&(_, c)| !(c.is_ascii_alphanumeric() || c == '.' || c == '_'))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let text = &s[..len];
    let digits = text.replace('_', "");

    let literal = if let Ok(n) = digits.parse::<i64>() {
        n.to_string()
    } else {
        match digits.parse::<f64>() {
            Ok(f) if f.is_finite() => f.to_string(),
            _ => return Err(syntax(format!("bad number syntax: {}", text))),
        }
    };
    Ok((Token::Number(literal), len))
}

fn lex_quoted(s: &str) -> Result<(Token, usize)> {
    let unterminated = || syntax("unterminated quoted string");
    let mut value = String::new();
    let mut chars = s.char_indices().skip(1);

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((Token::Str(value), i + 1)),
            '\n' => return Err(unterminated()),
            '\\' => {
                let (_, escaped) = chars.next().ok_or_else(unterminated)?;
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '\\' => '\\',
                    '"' => '"',
                    '\'' => '\'',
                    other => {
                        return Err(syntax(format!("unknown escape sequence: \\{}", other)));
                    }
                });
            }
            c => value.push(c),
        }
    }
    Err(unterminated())
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    /// The current context, `.`
    Dot,
    /// A literal already written in Handlebars syntax
    Literal(String),
    Call(&'static str, Vec<Expr>),
}

impl Expr {
    fn string(value: &str) -> Self {
        Expr::Literal(to_json(value).to_string())
    }

    fn field(base: Expr, name: &str) -> Self {
        Expr::Call("lookup", vec![base, Expr::string(name)])
    }

    /// Helper parameter form.
    fn param(&self) -> String {
        match self {
            Expr::Dot => "this".to_string(),
            Expr::Literal(literal) => literal.clone(),
            Expr::Call(name, args) => format!("({})", invocation(name, args)),
        }
    }

    /// Body of an output action. Plain values go through `print`.
    fn output(&self) -> String {
        match self {
            Expr::Call(name, args) => invocation(name, args),
            value => invocation("print", std::slice::from_ref(value)),
        }
    }
}

fn invocation(name: &str, args: &[Expr]) -> String {
    let mut text = name.to_string();
    for arg in args {
        text.push(' ');
        text.push_str(&arg.param());
    }
    text
}

fn fixed_arity(name: &str, helper: &'static str, arity: usize, args: Vec<Expr>) -> Result<Expr> {
    if args.len() != arity {
        return Err(syntax(format!(
            "wrong number of args for {}: want {} got {}",
            name,
            arity,
            args.len()
        )));
    }
    Ok(Expr::Call(helper, args))
}

/// Map a Go builtin call onto the registered helpers.
fn call(name: &str, args: Vec<Expr>) -> Result<Expr> {
    match name {
        "and" | "or" if args.is_empty() => Err(syntax(format!(
            "wrong number of args for {}: want at least 1 got 0",
            name
        ))),
        "and" => Ok(Expr::Call("and", args)),
        "or" => Ok(Expr::Call("or", args)),
        "not" => fixed_arity(name, "not", 1, args),
        "eq" => fixed_arity(name, "eq", 2, args),
        "ne" => fixed_arity(name, "ne", 2, args),
        "lt" => fixed_arity(name, "lt", 2, args),
        "le" => fixed_arity(name, "lte", 2, args),
        "gt" => fixed_arity(name, "gt", 2, args),
        "ge" => fixed_arity(name, "gte", 2, args),
        "len" => fixed_arity(name, "len", 1, args),
        "index" => {
            let mut args = args.into_iter();
            let base = args
                .next()
                .ok_or_else(|| syntax("wrong number of args for index: want at least 1 got 0"))?;
            Ok(args.fold(base, |collection, key| {
                Expr::Call("lookup", vec![collection, key])
            }))
        }
        "print" => Ok(Expr::Call("print", args)),
        _ if UNSUPPORTED_FUNCS.contains(&name) => {
            Err(syntax(format!("function \"{}\" is not supported", name)))
        }
        _ => Err(syntax(format!("function \"{}\" not defined", name))),
    }
}

enum Operand {
    Func(String),
    Value(Expr),
}

/// Parser for the pipeline inside one action.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn parse(tokens: Vec<Token>) -> Result<Expr> {
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.pipeline()?;
        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(syntax(format!("unexpected {:?} in action", token))),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn pipeline(&mut self) -> Result<Expr> {
        let mut expr = self.command(None)?;
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            expr = self.command(Some(expr))?;
        }
        Ok(expr)
    }

    /// One command. A piped value becomes the final argument.
    fn command(&mut self, piped: Option<Expr>) -> Result<Expr> {
        let mut operands = Vec::new();
        while let Some(token) = self.peek() {
            if matches!(token, Token::Pipe | Token::RParen) {
                break;
            }
            operands.push(self.operand()?);
        }

        let mut operands = operands.into_iter();
        match operands.next() {
            Some(Operand::Func(name)) => {
                let mut args = operands
                    .map(|operand| match operand {
                        Operand::Value(expr) => Ok(expr),
                        Operand::Func(f) => {
                            Err(syntax(format!("function \"{}\" used as an argument", f)))
                        }
                    })
                    .collect::<Result<Vec<_>>>()?;
                args.extend(piped);
                call(&name, args)
            }
            Some(Operand::Value(value)) => {
                if piped.is_some() {
                    return Err(syntax("non-function in pipeline"));
                }
                if operands.next().is_some() {
                    return Err(syntax("can't give argument to non-function"));
                }
                Ok(value)
            }
            None => Err(syntax("missing value for command")),
        }
    }

    fn operand(&mut self) -> Result<Operand> {
        let token = self.next().ok_or_else(|| syntax("missing value for command"))?;
        let value = match token {
            Token::Dot => Expr::Dot,
            Token::Field(names) => names
                .iter()
                .fold(Expr::Dot, |base, name| Expr::field(base, name)),
            Token::Ident(name) => return Ok(Operand::Func(name)),
            Token::Str(value) => Expr::string(&value),
            Token::Number(number) => Expr::Literal(number),
            Token::Bool(flag) => Expr::Literal(flag.to_string()),
            Token::Nil => Expr::Literal("null".to_string()),
            Token::LParen => {
                let inner = self.pipeline()?;
                if self.next() != Some(Token::RParen) {
                    return Err(syntax("unclosed left paren"));
                }
                inner
            }
            Token::RParen | Token::Pipe => {
                return Err(syntax(format!("unexpected {:?} in operand", token)));
            }
        };
        Ok(Operand::Value(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    If,
    With,
    Range,
}

impl Block {
    fn keyword(self) -> &'static str {
        match self {
            Block::If => "if",
            Block::With => "with",
            Block::Range => "range",
        }
    }

    fn helper(self) -> &'static str {
        match self {
            Block::If => "if",
            Block::With => "with",
            Block::Range => "each",
        }
    }
}

fn translate_action(tokens: Vec<Token>, blocks: &mut Vec<Block>) -> Result<String> {
    let keyword = match tokens.first() {
        Some(Token::Ident(word)) => word.clone(),
        _ => String::new(),
    };

    match keyword.as_str() {
        "if" | "with" | "range" => {
            let block = match keyword.as_str() {
                "if" => Block::If,
                "with" => Block::With,
                _ => Block::Range,
            };
            let condition = Parser::parse(tokens[1..].to_vec())?;
            blocks.push(block);
            Ok(format!("{{{{#{} {}}}}}{}", block.helper(), condition.param(), KEEP_LINE))
        }
        "else" => {
            let block = *blocks.last().ok_or_else(|| syntax("unexpected {{else}}"))?;
            match tokens.get(1) {
                None => Ok(format!("{{{{else}}}}{}", KEEP_LINE)),
                Some(Token::Ident(word))
                    if (word == "if" && block == Block::If)
                        || (word == "with" && block == Block::With) =>
                {
                    let condition = Parser::parse(tokens[2..].to_vec())?;
                    Ok(format!(
                        "{{{{else {} {}}}}}{}",
                        block.helper(),
                        condition.param(),
                        KEEP_LINE
                    ))
                }
                Some(_) => Err(syntax("unexpected token after {{else}}")),
            }
        }
        "end" => {
            if tokens.len() > 1 {
                return Err(syntax("unexpected token in {{end}}"));
            }
            let block = blocks.pop().ok_or_else(|| syntax("unexpected {{end}}"))?;
            Ok(format!("{{{{/{}}}}}{}", block.helper(), KEEP_LINE))
        }
        "template" | "define" | "block" | "break" | "continue" => Err(syntax(format!(
            "{{{{{}}}}} actions are not supported",
            keyword
        ))),
        _ => Ok(format!("{{{{{}}}}}", Parser::parse(tokens)?.output())),
    }
}

fn push_text(out: &mut String, text: &str) {
    let kept = text.trim_end_matches('\\');
    out.push_str(kept);
    let slashes = &text[kept.len()..];
    if !slashes.is_empty() {
        // a backslash in front of `{{` would escape the next expression
        out.push_str(&format!("{{{{print {}}}}}", to_json(slashes)));
    }
}

/// Rewrite a Go template as Handlebars source.
pub fn translate(source: &str) -> Result<String> {
    let mut out = String::with_capacity(source.len());
    let mut blocks = Vec::new();
    let mut rest = source;
    let mut trim_next = false;

    while let Some(start) = rest.find("{{") {
        let action = lex_action(&rest[start + 2..])?;

        let mut text = &rest[..start];
        if trim_next {
            text = text.trim_start_matches(SPACE);
        }
        if action.trim_left {
            text = text.trim_end_matches(SPACE);
        }
        push_text(&mut out, text);

        if let Some(tokens) = action.tokens {
            out.push_str(&translate_action(tokens, &mut blocks)?);
        }
        trim_next = action.trim_right;
        rest = &rest[start + 2 + action.len..];
    }

    let text = if trim_next {
        rest.trim_start_matches(SPACE)
    } else {
        rest
    };
    push_text(&mut out, text);

    if let Some(block) = blocks.last() {
        return Err(syntax(format!(
            "unexpected EOF: unclosed {{{{{}}}}}",
            block.keyword()
        )));
    }
    Ok(out)
}
