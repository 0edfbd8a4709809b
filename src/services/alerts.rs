//! Alert conditions such as `score >= 70 and cloud_cover < 30`.
//!
//! Conditions are parsed once into a small expression tree and evaluated
//! against a flat map of named values. Only the names in [`VARIABLE_NAMES`]
//! are accepted; anything else is a parse error.

use crate::services::series::ScoredPoint;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

pub const VARIABLE_NAMES: [&str; 7] = [
    "score",
    "cloud_cover",
    "wind_speed",
    "humidity",
    "temperature",
    "moon_illumination",
    "moon_altitude",
];

/// Values a condition can refer to. Moon values are bound only when the moon state is known.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AlertVariables(BTreeMap<&'static str, f64>);

impl AlertVariables {
    pub fn from_point(point: &ScoredPoint) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert("score", f64::from(point.score.overall));
        vars.insert("cloud_cover", point.sample.cloud_cover);
        vars.insert("wind_speed", point.sample.wind_speed);
        vars.insert("humidity", point.sample.humidity);
        vars.insert("temperature", point.sample.temperature);
        if let Some(moon) = &point.moon {
            vars.insert("moon_illumination", moon.illumination);
            vars.insert("moon_altitude", moon.altitude);
        }
        AlertVariables(vars)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.keys().copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertError {
    UnexpectedChar { position: usize, found: char },
    UnexpectedToken { position: usize, found: String },
    UnexpectedEnd,
    InvalidNumber(String),
    UnknownVariable(String),
    /// A known variable with no value in this evaluation.
    Unbound(String),
}

impl Display for AlertError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AlertError::UnexpectedChar { position, found } => {
                write!(f, "unexpected character '{}' at {}", found, position)
            }
            AlertError::UnexpectedToken { position, found } => {
                write!(f, "unexpected '{}' at {}", found, position)
            }
            AlertError::UnexpectedEnd => write!(f, "condition ends unexpectedly"),
            AlertError::InvalidNumber(s) => write!(f, "invalid number '{}'", s),
            AlertError::UnknownVariable(name) => write!(
                f,
                "unknown variable '{}' (expected one of: {})",
                name,
                VARIABLE_NAMES.join(", ")
            ),
            AlertError::Unbound(name) => write!(f, "'{}' has no value for this forecast hour", name),
        }
    }
}

impl std::error::Error for AlertError {}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    fn apply(self, a: f64, b: f64) -> bool {
        match self {
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Cmp(CmpOp),
    And,
    Or,
    Not,
    Open,
    Close,
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Ident(s) => f.write_str(s),
            Token::Cmp(op) => f.write_str(match op {
                CmpOp::Lt => "<",
                CmpOp::Le => "<=",
                CmpOp::Gt => ">",
                CmpOp::Ge => ">=",
                CmpOp::Eq => "==",
                CmpOp::Ne => "!=",
            }),
            Token::And => f.write_str("and"),
            Token::Or => f.write_str("or"),
            Token::Not => f.write_str("not"),
            Token::Open => f.write_str("("),
            Token::Close => f.write_str(")"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, AlertError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let next = chars.get(i + 1).map(|&(_, c)| c);
        let token = match (c, next) {
            ('(', _) => Token::Open,
            (')', _) => Token::Close,
            ('<', Some('=')) | ('>', Some('=')) | ('=', Some('=')) | ('!', Some('=')) => {
                i += 1;
                Token::Cmp(match c {
                    '<' => CmpOp::Le,
                    '>' => CmpOp::Ge,
                    '=' => CmpOp::Eq,
                    _ => CmpOp::Ne,
                })
            }
            ('<', _) => Token::Cmp(CmpOp::Lt),
            ('>', _) => Token::Cmp(CmpOp::Gt),
            _ if c.is_ascii_digit() || c == '.' || (c == '-' && next.is_some_and(|n| n.is_ascii_digit() || n == '.')) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|&(_, c)| c).collect();
                let n = text.parse::<f64>().map_err(|_| AlertError::InvalidNumber(text.clone()))?;
                tokens.push((pos, Token::Number(n)));
                continue;
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_ascii_alphanumeric() || chars[i].1 == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().map(|&(_, c)| c).collect();
                let token = match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word.to_ascii_lowercase()),
                };
                tokens.push((pos, token));
                continue;
            }
            _ => return Err(AlertError::UnexpectedChar { position: pos, found: c }),
        };
        tokens.push((pos, token));
        i += 1;
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Number(f64),
    Variable(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Compare(Operand, CmpOp, Operand),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn next(&mut self) -> Result<(usize, Token), AlertError> {
        let t = self.tokens.get(self.pos).cloned().ok_or(AlertError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(t)
    }

    fn or_expr(&mut self) -> Result<Expr, AlertError> {
        let mut lhs = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            lhs = Expr::Or(Box::new(lhs), Box::new(self.and_expr()?));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, AlertError> {
        let mut lhs = self.not_expr()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            lhs = Expr::And(Box::new(lhs), Box::new(self.not_expr()?));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr, AlertError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, AlertError> {
        if self.peek() == Some(&Token::Open) {
            self.pos += 1;
            let inner = self.or_expr()?;
            return match self.next()? {
                (_, Token::Close) => Ok(inner),
                (position, t) => Err(AlertError::UnexpectedToken {
                    position,
                    found: t.to_string(),
                }),
            };
        }
        let lhs = self.operand()?;
        let op = match self.next()? {
            (_, Token::Cmp(op)) => op,
            (position, t) => {
                return Err(AlertError::UnexpectedToken {
                    position,
                    found: t.to_string(),
                });
            }
        };
        let rhs = self.operand()?;
        Ok(Expr::Compare(lhs, op, rhs))
    }

    fn operand(&mut self) -> Result<Operand, AlertError> {
        match self.next()? {
            (_, Token::Number(n)) => Ok(Operand::Number(n)),
            (_, Token::Ident(name)) => VARIABLE_NAMES
                .iter()
                .find(|v| **v == name.as_str())
                .map(|v| Operand::Variable(*v))
                .ok_or(AlertError::UnknownVariable(name)),
            (position, t) => Err(AlertError::UnexpectedToken {
                position,
                found: t.to_string(),
            }),
        }
    }
}

/// A parsed alert condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, AlertError> {
        let mut parser = Parser {
            tokens: tokenize(source)?,
            pos: 0,
        };
        let expr = parser.or_expr()?;
        if let Some((position, t)) = parser.tokens.get(parser.pos) {
            return Err(AlertError::UnexpectedToken {
                position: *position,
                found: t.to_string(),
            });
        }
        Ok(Condition {
            source: source.trim().to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, vars: &AlertVariables) -> Result<bool, AlertError> {
        eval(&self.expr, vars)
    }
}

impl Display for Condition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn value(operand: &Operand, vars: &AlertVariables) -> Result<f64, AlertError> {
    match operand {
        Operand::Number(n) => Ok(*n),
        Operand::Variable(name) => vars.get(name).ok_or_else(|| AlertError::Unbound(name.to_string())),
    }
}

fn eval(expr: &Expr, vars: &AlertVariables) -> Result<bool, AlertError> {
    match expr {
        Expr::Compare(a, op, b) => Ok(op.apply(value(a, vars)?, value(b, vars)?)),
        Expr::And(a, b) => Ok(eval(a, vars)? && eval(b, vars)?),
        Expr::Or(a, b) => Ok(eval(a, vars)? || eval(b, vars)?),
        Expr::Not(a) => Ok(!eval(a, vars)?),
    }
}

/// Parses every condition, failing on the first malformed one.
pub fn parse_all(sources: &[String]) -> Result<Vec<Condition>, (String, AlertError)> {
    sources
        .iter()
        .map(|s| Condition::parse(s).map_err(|e| (s.clone(), e)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&'static str, f64)]) -> AlertVariables {
        AlertVariables(pairs.iter().copied().collect())
    }

    fn check(condition: &str, v: &AlertVariables) -> bool {
        Condition::parse(condition).unwrap().evaluate(v).unwrap()
    }

    #[test]
    fn evaluates_comparisons_and_logic() {
        let v = vars(&[("score", 78.0), ("cloud_cover", 12.0), ("wind_speed", 4.0), ("humidity", 65.0)]);
        assert!(check("score >= 75 and cloud_cover < 20", &v));
        assert!(!check("score > 80 or humidity >= 70", &v));
        assert!(check("not (wind_speed > 5)", &v));
        assert!(check("score == 78 and humidity != 60", &v));
        assert!(check("SCORE >= 70 AND Cloud_Cover <= 12", &v));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let v = vars(&[("score", 10.0), ("cloud_cover", 90.0), ("humidity", 20.0)]);
        // score > 50 or (cloud_cover > 80 and humidity < 30)
        assert!(check("score > 50 or cloud_cover > 80 and humidity < 30", &v));
        assert!(!check("(score > 50 or cloud_cover > 80) and humidity > 30", &v));
    }

    #[test]
    fn literals_may_appear_on_either_side() {
        let v = vars(&[("temperature", -3.5)]);
        assert!(check("-5 < temperature", &v));
        assert!(check("temperature <= -3.5", &v));
    }

    #[test]
    fn unknown_variables_are_rejected() {
        assert_eq!(
            Condition::parse("seeing > 3"),
            Err(AlertError::UnknownVariable("seeing".to_string()))
        );
    }

    #[test]
    fn syntax_errors_are_rejected() {
        assert_eq!(Condition::parse("score >="), Err(AlertError::UnexpectedEnd));
        assert!(matches!(
            Condition::parse("score > 5 score"),
            Err(AlertError::UnexpectedToken { .. })
        ));
        assert!(matches!(
            Condition::parse("__import__('os')"),
            Err(AlertError::UnknownVariable(_)) | Err(AlertError::UnexpectedChar { .. })
        ));
        assert!(matches!(
            Condition::parse("score > 5; humidity < 3"),
            Err(AlertError::UnexpectedChar { found: ';', .. })
        ));
        assert!(matches!(Condition::parse("(score > 5"), Err(AlertError::UnexpectedEnd)));
        assert!(matches!(Condition::parse("score > 1.2.3"), Err(AlertError::InvalidNumber(_))));
    }

    #[test]
    fn moon_variables_unbound_without_moon_state() {
        let v = vars(&[("score", 80.0)]);
        let c = Condition::parse("moon_illumination < 50").unwrap();
        assert_eq!(c.evaluate(&v), Err(AlertError::Unbound("moon_illumination".to_string())));
    }

    #[test]
    fn variables_from_point_use_exact_names() {
        use crate::models::astro::MoonState;
        use crate::services::series::tests::series_from_scores;

        let mut series = series_from_scores(&[Some(72)]);
        let point = &mut series.points[0];
        let without_moon: Vec<_> = AlertVariables::from_point(point).names().collect();
        assert_eq!(without_moon, vec!["cloud_cover", "humidity", "score", "temperature", "wind_speed"]);

        point.moon = Some(MoonState {
            illumination: 40.0,
            altitude: 12.0,
            angular_separation: None,
        });
        let v = AlertVariables::from_point(point);
        assert_eq!(v.names().count(), VARIABLE_NAMES.len());
        assert_eq!(v.get("score"), Some(72.0));
        assert_eq!(v.get("moon_altitude"), Some(12.0));
    }

    #[test]
    fn parse_all_names_the_bad_condition() {
        let sources = vec!["score > 60".to_string(), "clouds < 3".to_string()];
        let (bad, err) = parse_all(&sources).unwrap_err();
        assert_eq!(bad, "clouds < 3");
        assert_eq!(err, AlertError::UnknownVariable("clouds".to_string()));
    }
}
