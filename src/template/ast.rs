//! Template expression trees

/// A parsed template expression.
///
/// Plain text parses to a string literal; `{{ ... }}` segments parse to
/// parameter expressions; mixed content folds into left-associative `Add`
/// chains in source order.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// String literal (including the text between template delimiters)
    Str(String),
    /// Integer literal; kept raw so overflow surfaces at execution time
    Int(String),
    Ident(String),
    /// `base.name`
    Selector { x: Box<Expr>, sel: String },
    /// `base[key]`
    Index { x: Box<Expr>, index: Box<Expr> },
    /// `f(a, b, ...)`
    Call { fun: Box<Expr>, args: Vec<Expr> },
    /// A `{{ ... }}` segment; `x` is `None` for the empty template and
    /// `quoted` records single quotes consumed from the surrounding text
    Param { x: Option<Box<Expr>>, quoted: bool },
    /// String concatenation
    Add { x: Box<Expr>, y: Box<Expr> },
    /// `{{f <-}}` followed by the argument template
    LeftArrow { fun: Box<Expr>, arg: Box<Expr> },
}

impl Expr {
    /// Dotted path rendering for lookup error messages
    pub fn path(&self) -> String {
        match self {
            Expr::Ident(name) => format!(".{name}"),
            Expr::Selector { x, sel } => format!("{}.{sel}", x.path()),
            Expr::Index { x, index } => {
                let key = match index.as_ref() {
                    Expr::Int(v) => v.clone(),
                    Expr::Str(v) => v.clone(),
                    _ => "?".to_string(),
                };
                format!("{}[{key}]", x.path())
            }
            _ => String::new(),
        }
    }
}
