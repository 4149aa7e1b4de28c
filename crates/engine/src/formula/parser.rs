// Formula parser - converts formula strings into AST
// Supports: numbers, identifiers (child names / self), functions (priority),
// basic math (+, -, *, /), exponentiation (^) and percent postfix (%)

/// Expression AST over a node's children.
///
/// Identifiers are left unresolved here; binding to child series happens
/// at evaluation time, and name checking happens in `validate`.
#[derive(Debug, Clone)]
pub enum Expr {
    Number(f64),
    /// A child name or the self-reference keyword.
    Ident(String),
    Function {
        name: String,
        args: Vec<Expr>,
    },
    BinaryOp {
        op: Op,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    // Exponentiation
    Pow, // ^
}

/// Parse a formula string into an AST.
///
/// An empty formula is a parse error here; "no formula" is represented
/// upstream by the node holding an empty string and never calling parse.
pub fn parse(formula: &str) -> Result<Expr, String> {
    let tokens = tokenize(formula)?;
    if tokens.is_empty() {
        return Err("Empty formula".to_string());
    }
    let (expr, pos) = parse_add_sub(&tokens, 0)?;
    if pos != tokens.len() {
        return Err(format!("Unexpected trailing input at position {}", pos));
    }
    Ok(expr)
}

#[derive(Debug, Clone)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
    // Exponentiation and percent
    Caret,   // ^
    Percent, // %
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => { chars.next(); }
            '+' => { tokens.push(Token::Plus); chars.next(); }
            '-' => { tokens.push(Token::Minus); chars.next(); }
            '*' => { tokens.push(Token::Star); chars.next(); }
            '/' => { tokens.push(Token::Slash); chars.next(); }
            '(' => { tokens.push(Token::LParen); chars.next(); }
            ')' => { tokens.push(Token::RParen); chars.next(); }
            ',' => { tokens.push(Token::Comma); chars.next(); }
            '^' => { tokens.push(Token::Caret); chars.next(); }
            '%' => { tokens.push(Token::Percent); chars.next(); }
            'A'..='Z' | 'a'..='z' | '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            '0'..='9' | '.' => {
                let mut num_str = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        num_str.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let num: f64 = num_str
                    .parse()
                    .map_err(|_| format!("Invalid number: {}", num_str))?;
                tokens.push(Token::Number(num));
            }
            _ => return Err(format!("Unexpected character: {}", c)),
        }
    }

    Ok(tokens)
}

fn parse_add_sub(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_mul_div(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Plus => Op::Add,
            Token::Minus => Op::Sub,
            _ => break,
        };
        let (right, new_pos) = parse_mul_div(tokens, pos + 1)?;
        left = Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_mul_div(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_power(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Star => Op::Mul,
            Token::Slash => Op::Div,
            _ => break,
        };
        let (right, new_pos) = parse_power(tokens, pos + 1)?;
        left = Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
        pos = new_pos;
    }

    Ok((left, pos))
}

// Exponentiation (^) - right-associative, higher precedence than * /
fn parse_power(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (base, pos) = parse_percent(tokens, pos)?;

    if pos < tokens.len() {
        if let Token::Caret = &tokens[pos] {
            // Right-associative: recurse into parse_power for the exponent
            let (exponent, new_pos) = parse_power(tokens, pos + 1)?;
            return Ok((
                Expr::BinaryOp {
                    op: Op::Pow,
                    left: Box::new(base),
                    right: Box::new(exponent),
                },
                new_pos,
            ));
        }
    }

    Ok((base, pos))
}

// Percent postfix (%) - highest precedence operator, desugars to * 0.01
fn parse_percent(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (mut expr, mut pos) = parse_primary(tokens, pos)?;

    while pos < tokens.len() {
        if let Token::Percent = &tokens[pos] {
            expr = Expr::BinaryOp {
                op: Op::Mul,
                left: Box::new(expr),
                right: Box::new(Expr::Number(0.01)),
            };
            pos += 1;
        } else {
            break;
        }
    }

    Ok((expr, pos))
}

fn parse_primary(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    if pos >= tokens.len() {
        return Err("Unexpected end of expression".to_string());
    }

    match &tokens[pos] {
        Token::Number(n) => Ok((Expr::Number(*n), pos + 1)),
        Token::Ident(name) => {
            // Function call
            if pos + 1 < tokens.len() {
                if let Token::LParen = &tokens[pos + 1] {
                    let (args, new_pos) = parse_function_args(tokens, pos + 2)?;
                    return Ok((
                        Expr::Function {
                            name: name.clone(),
                            args,
                        },
                        new_pos,
                    ));
                }
            }
            Ok((Expr::Ident(name.clone()), pos + 1))
        }
        Token::LParen => {
            let (expr, pos) = parse_add_sub(tokens, pos + 1)?;
            if pos >= tokens.len() {
                return Err("Missing closing parenthesis".to_string());
            }
            match &tokens[pos] {
                Token::RParen => Ok((expr, pos + 1)),
                _ => Err("Expected closing parenthesis".to_string()),
            }
        }
        Token::Plus => {
            // Unary plus (no-op, just parse the next expression)
            parse_primary(tokens, pos + 1)
        }
        Token::Minus => {
            // Unary minus
            let (expr, pos) = parse_primary(tokens, pos + 1)?;
            Ok((
                Expr::BinaryOp {
                    op: Op::Sub,
                    left: Box::new(Expr::Number(0.0)),
                    right: Box::new(expr),
                },
                pos,
            ))
        }
        _ => Err(format!("Unexpected token at position {}", pos)),
    }
}

fn parse_function_args(tokens: &[Token], pos: usize) -> Result<(Vec<Expr>, usize), String> {
    let mut args = Vec::new();
    let mut pos = pos;

    // Handle empty call f()
    if pos < tokens.len() {
        if let Token::RParen = &tokens[pos] {
            return Ok((args, pos + 1));
        }
    }

    loop {
        let (arg, new_pos) = parse_add_sub(tokens, pos)?;
        args.push(arg);
        pos = new_pos;

        if pos >= tokens.len() {
            return Err("Missing closing parenthesis in function call".to_string());
        }

        match &tokens[pos] {
            Token::RParen => return Ok((args, pos + 1)),
            Token::Comma => pos += 1,
            _ => return Err("Expected comma or closing parenthesis".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ident() {
        let expr = parse("sunk").unwrap();
        match expr {
            Expr::Ident(name) => assert_eq!(name, "sunk"),
            _ => panic!("Expected Ident, got {:?}", expr),
        }
    }

    #[test]
    fn test_parse_add() {
        let expr = parse("sunk + be").unwrap();
        match expr {
            Expr::BinaryOp { op: Op::Add, left, right } => {
                assert!(matches!(*left, Expr::Ident(ref n) if n == "sunk"));
                assert!(matches!(*right, Expr::Ident(ref n) if n == "be"));
            }
            _ => panic!("Expected Add op, got {:?}", expr),
        }
    }

    #[test]
    fn test_parse_precedence() {
        // a + b * 2 groups the multiplication under the addition
        let expr = parse("a + b * 2").unwrap();
        match expr {
            Expr::BinaryOp { op: Op::Add, right, .. } => {
                assert!(matches!(*right, Expr::BinaryOp { op: Op::Mul, .. }));
            }
            _ => panic!("Expected Add at top, got {:?}", expr),
        }
    }

    #[test]
    fn test_parse_parens_override_precedence() {
        let expr = parse("(a + b) * 2").unwrap();
        match expr {
            Expr::BinaryOp { op: Op::Mul, left, .. } => {
                assert!(matches!(*left, Expr::BinaryOp { op: Op::Add, .. }));
            }
            _ => panic!("Expected Mul at top, got {:?}", expr),
        }
    }

    #[test]
    fn test_parse_power_right_associative() {
        // 2 ^ 3 ^ 2 parses as 2 ^ (3 ^ 2)
        let expr = parse("2 ^ 3 ^ 2").unwrap();
        match expr {
            Expr::BinaryOp { op: Op::Pow, right, .. } => {
                assert!(matches!(*right, Expr::BinaryOp { op: Op::Pow, .. }));
            }
            _ => panic!("Expected Pow op, got {:?}", expr),
        }
    }

    #[test]
    fn test_parse_percent_desugars() {
        let expr = parse("50%").unwrap();
        match expr {
            Expr::BinaryOp { op: Op::Mul, ref right, .. } => match right.as_ref() {
                Expr::Number(n) => assert_eq!(*n, 0.01),
                _ => panic!("Expected Number(0.01), got {:?}", right),
            },
            _ => panic!("Expected Mul op (desugared percent), got {:?}", expr),
        }
    }

    #[test]
    fn test_parse_unary_minus() {
        let expr = parse("-a").unwrap();
        match expr {
            Expr::BinaryOp { op: Op::Sub, left, right } => {
                assert!(matches!(*left, Expr::Number(n) if n == 0.0));
                assert!(matches!(*right, Expr::Ident(ref n) if n == "a"));
            }
            _ => panic!("Expected Sub op (unary minus), got {:?}", expr),
        }
    }

    #[test]
    fn test_parse_function_call() {
        let expr = parse("priority(actuals, forecast)").unwrap();
        match expr {
            Expr::Function { name, args } => {
                assert_eq!(name, "priority");
                assert_eq!(args.len(), 2);
            }
            _ => panic!("Expected Function, got {:?}", expr),
        }
    }

    #[test]
    fn test_parse_function_no_args() {
        let expr = parse("priority()").unwrap();
        match expr {
            Expr::Function { args, .. } => assert!(args.is_empty()),
            _ => panic!("Expected Function, got {:?}", expr),
        }
    }

    #[test]
    fn test_parse_nested_function() {
        let expr = parse("priority(minimum(a, b), c) + 1").unwrap();
        assert!(matches!(expr, Expr::BinaryOp { op: Op::Add, .. }));
    }

    #[test]
    fn test_parse_empty_is_error() {
        assert!(parse("").is_err());
        assert!(parse("   ").is_err());
    }

    #[test]
    fn test_parse_malformed() {
        assert!(parse("a +").is_err());
        assert!(parse("(a + b").is_err());
        assert!(parse("a b").is_err());
        assert!(parse("f(a,").is_err());
        assert!(parse("1.2.3").is_err());
        assert!(parse("a ? b").is_err());
    }
}
