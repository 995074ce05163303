//! Análisis sintáctico.
//!
//! El parser consume el flujo de tokens y construye un árbol de
//! declaraciones de nivel superior: `typedef`s, `enum`s anónimos y
//! prototipos o definiciones de funciones con sus listas de atributos.
//! No existe recuperación de errores, el primer error aborta la unidad.
//!
//! La resolución de nombres de tipo no ocurre aquí. Un nombre de tipo
//! definido por `typedef` se conserva como [`TypeSpec::Named`] y se
//! resuelve durante análisis semántico.

use std::{iter::Peekable, marker::PhantomData, rc::Rc};
use thiserror::Error;

use crate::{
    error::{Classify, ErrorKind},
    lex::{Identifier, Keyword, Operator, Token},
    source::{Located, Location},
};

#[derive(Debug)]
pub struct Ast {
    pub declarations: Vec<Declaration>,
    pub eof: Location,
}

#[derive(Debug)]
pub enum Declaration {
    Typedef(Typedef),
    Enum(Enum),
    Function(Function),
}

/// `typedef <type> <attrs>* <alias> ['[' ']'];`
#[derive(Debug)]
pub struct Typedef {
    pub name: Located<Identifier>,
    pub of: Located<TypeSpec>,
    pub attributes: Vec<Located<Attribute>>,
    pub array: bool,
}

#[derive(Debug)]
pub struct Enum {
    pub members: Vec<EnumMember>,
}

#[derive(Debug)]
pub struct EnumMember {
    pub name: Located<Identifier>,
    pub value: Option<Located<Expr>>,
}

#[derive(Debug)]
pub struct Function {
    pub name: Located<Identifier>,
    pub is_static: bool,
    pub attributes: Vec<Located<Attribute>>,
    pub returns: Located<TypeSpec>,
    pub parameters: Vec<Parameter>,
    pub body: Option<Block>,
}

#[derive(Debug)]
pub struct Parameter {
    pub name: Option<Located<Identifier>>,
    pub of: Located<TypeSpec>,
    pub attributes: Vec<Located<Attribute>>,
    pub array: bool,
}

/// Especificador de tipo tal como aparece en el código fuente.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSpec {
    Builtin(Builtin),
    Named(Identifier),
    Pointer(Box<TypeSpec>),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Builtin {
    pub base: Base,
    pub unsigned: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Base {
    Void,
    Bool,
    Char,
    Short,
    Int,
    Long,
    Int64,
    String,
}

/// `__attribute(name[(args...)])`
#[derive(Debug)]
pub struct Attribute {
    pub name: Located<Identifier>,
    pub args: Vec<Located<AttributeArg>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeArg {
    Str(Rc<str>),
    Id(Identifier),
    Int(u64),
}

pub type Block = Vec<Located<Statement>>;

#[derive(Debug)]
pub enum Statement {
    Expr(Located<Expr>),

    Local {
        of: Located<TypeSpec>,
        name: Located<Identifier>,
        init: Option<Located<Expr>>,
    },

    Assign {
        target: Located<Identifier>,
        value: Located<Expr>,
    },

    /// `x op= value`, también `x++` y `x--`.
    Update {
        target: Located<Identifier>,
        op: Operator,
        value: Located<Expr>,
    },

    Return(Option<Located<Expr>>),

    If {
        condition: Located<Expr>,
        then: Box<Located<Statement>>,
        otherwise: Option<Box<Located<Statement>>>,
    },

    While {
        condition: Located<Expr>,
        body: Box<Located<Statement>>,
    },

    DoWhile {
        body: Box<Located<Statement>>,
        condition: Located<Expr>,
    },

    For {
        init: Option<Box<Located<Statement>>>,
        condition: Option<Located<Expr>>,
        step: Option<Box<Located<Statement>>>,
        body: Box<Located<Statement>>,
    },

    Break,
    Continue,
    Block(Block),

    Empty,
}

#[derive(Debug)]
pub enum Expr {
    Integer(u64),
    Negate(Box<Located<Expr>>),

    /// `!`
    Not(Box<Located<Expr>>),

    /// `~`
    Complement(Box<Located<Expr>>),

    Str(Rc<str>),
    WideStr(Rc<str>),
    Name(Identifier),

    Call {
        callee: Located<Identifier>,
        args: Vec<Located<Expr>>,
    },

    /// Lista entre llaves, construye un arreglo abierto en línea.
    Pack(Vec<Located<Expr>>),

    Arith(Box<Located<Expr>>, Operator, Box<Located<Expr>>),
    Compare(Box<Located<Expr>>, CmpOp, Box<Located<Expr>>),
    Logical(Box<Located<Expr>>, LogicalOp, Box<Located<Expr>>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Ge,
    Le,
    Gt,
    Lt,
    Ne,
    Eq,
}

/// `&&` o `||`, con evaluación en cortocircuito.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Operador binario según su familia.
#[derive(Copy, Clone)]
enum Binary {
    Arith(Operator),
    Compare(CmpOp),
    Logical(LogicalOp),
}

impl Binary {
    fn from_token(token: &Token) -> Option<Self> {
        let op = match token {
            Token::LogicalOr => Binary::Logical(LogicalOp::Or),
            Token::LogicalAnd => Binary::Logical(LogicalOp::And),
            Token::Pipe => Binary::Arith(Operator::Or),
            Token::Caret => Binary::Arith(Operator::Xor),
            Token::Ampersand => Binary::Arith(Operator::And),
            Token::Equal => Binary::Compare(CmpOp::Eq),
            Token::NotEqual => Binary::Compare(CmpOp::Ne),
            Token::Less => Binary::Compare(CmpOp::Lt),
            Token::Greater => Binary::Compare(CmpOp::Gt),
            Token::LessOrEqual => Binary::Compare(CmpOp::Le),
            Token::GreaterOrEqual => Binary::Compare(CmpOp::Ge),
            Token::ShiftLeft => Binary::Arith(Operator::Shl),
            Token::ShiftRight => Binary::Arith(Operator::Shr),
            Token::Plus => Binary::Arith(Operator::Add),
            Token::Minus => Binary::Arith(Operator::Sub),
            Token::Star => Binary::Arith(Operator::Mul),
            Token::Slash => Binary::Arith(Operator::Div),
            Token::Percent => Binary::Arith(Operator::Mod),
            _ => return None,
        };

        Some(op)
    }

    /// Precedencia de C, mayor valor liga más fuerte.
    fn precedence(self) -> u8 {
        use Operator::*;

        match self {
            Binary::Logical(LogicalOp::Or) => 1,
            Binary::Logical(LogicalOp::And) => 2,
            Binary::Arith(Or) => 3,
            Binary::Arith(Xor) => 4,
            Binary::Arith(And) => 5,
            Binary::Compare(CmpOp::Eq | CmpOp::Ne) => 6,
            Binary::Compare(_) => 7,
            Binary::Arith(Shl | Shr) => 8,
            Binary::Arith(Add | Sub) => 9,
            Binary::Arith(Mul | Div | Mod) => 10,
        }
    }
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Expected {0}, found {1} instead")]
    UnexpectedToken(Token, Token),

    #[error("Expected {0}, none was found instead")]
    MissingToken(Token),

    #[error("Expected identifier, found {0} instead")]
    ExpectedId(Token),

    #[error("Expected a type, found {0} instead")]
    ExpectedType(Token),

    #[error("Expected an expression, found {0} instead")]
    ExpectedExpr(Token),

    #[error("Expected a string, identifier or integer attribute argument, found {0} instead")]
    ExpectedAttributeArgument(Token),

    #[error("Abrupt end of program")]
    UnexpectedEof,
}

impl Classify for ParserError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Parse
    }
}

pub trait TokenStream<'a>: Iterator<Item = &'a Located<Token>> + Clone {}

impl<'a, I> TokenStream<'a> for I where I: Iterator<Item = &'a Located<Token>> + Clone {}

/// Construye el AST de una unidad de compilación.
///
/// `start` es la ubicación inicial del archivo, se utiliza para
/// reportar errores en unidades vacías.
pub fn parse<'a>(
    tokens: impl TokenStream<'a>,
    start: Location,
) -> Result<Ast, Located<ParserError>> {
    let mut parser = Parser {
        tokens: tokens.peekable(),
        last_known: start,
        lifetime_hack: PhantomData,
    };

    parser.program().map_err(Failure::coerce)
}

#[derive(Clone)]
struct Parser<'a, I: TokenStream<'a>> {
    tokens: Peekable<I>,
    last_known: Location,
    lifetime_hack: PhantomData<&'a ()>,
}

enum Failure {
    Weak(Located<ParserError>),
    Strict(Located<ParserError>),
}

impl Failure {
    fn weak(self) -> Self {
        Failure::Weak(self.coerce())
    }

    fn coerce(self) -> Located<ParserError> {
        match self {
            Failure::Weak(error) => error,
            Failure::Strict(error) => error,
        }
    }
}

type Parse<T> = Result<T, Failure>;

impl<'a, I: TokenStream<'a>> Parser<'a, I> {
    fn program(&mut self) -> Parse<Ast> {
        let mut declarations = Vec::new();
        while self.peek().is_some() {
            declarations.push(self.declaration()?);
        }

        Ok(Ast {
            declarations,
            eof: self.last_known.clone(),
        })
    }

    fn declaration(&mut self) -> Parse<Declaration> {
        match self.peek() {
            Some(Token::Keyword(Keyword::Typedef)) => self.typedef().map(Declaration::Typedef),
            Some(Token::Keyword(Keyword::Enum)) => self.enumeration().map(Declaration::Enum),
            _ => self.function().map(Declaration::Function),
        }
    }

    fn typedef(&mut self) -> Parse<Typedef> {
        self.keyword(Keyword::Typedef)?;

        let mut attributes = self.attributes()?;
        let of = self.type_spec(&mut attributes)?;
        let name = self.id()?;
        let array = self.array_suffix()?;
        self.expect(Token::Semicolon)?;

        Ok(Typedef {
            name,
            of,
            attributes,
            array,
        })
    }

    fn enumeration(&mut self) -> Parse<Enum> {
        self.keyword(Keyword::Enum)?;

        // Una etiqueta opcional no introduce ningún nombre
        if let Some(Token::Id(_)) = self.peek() {
            self.next()?;
        }

        self.expect(Token::OpenCurly)?;

        let mut members = Vec::new();
        while let Some(Token::Id(_)) = self.peek() {
            let name = self.id()?;
            let value = match self.peek() {
                Some(Token::Assign) => {
                    self.next()?;
                    Some(self.expr()?)
                }

                _ => None,
            };

            members.push(EnumMember { name, value });
            match self.peek() {
                Some(Token::Comma) => {
                    self.next()?;
                }

                _ => break,
            }
        }

        self.expect(Token::CloseCurly)?;
        self.expect(Token::Semicolon)?;

        Ok(Enum { members })
    }

    fn function(&mut self) -> Parse<Function> {
        let mut is_static = false;
        let mut attributes = Vec::new();

        loop {
            match self.peek() {
                Some(Token::Keyword(Keyword::Static)) => {
                    self.next()?;
                    is_static = true;
                }

                Some(Token::Keyword(Keyword::Extern)) => {
                    self.next()?;
                }

                Some(Token::Keyword(Keyword::Attribute)) => attributes.push(self.attribute()?),
                _ => break,
            }
        }

        let returns = self.type_spec(&mut attributes)?;
        let name = self.id()?;

        self.expect(Token::OpenParen)?;
        let parameters = self.parameters()?;
        self.expect(Token::CloseParen)?;

        attributes.extend(self.attributes()?);

        let body = match self.peek() {
            Some(Token::Semicolon) => {
                self.next()?;
                None
            }

            _ => Some(self.block()?),
        };

        Ok(Function {
            name,
            is_static,
            attributes,
            returns,
            parameters,
            body,
        })
    }

    fn parameters(&mut self) -> Parse<Vec<Parameter>> {
        match self.peek() {
            Some(Token::CloseParen) => return Ok(Vec::new()),

            // `(void)` es una lista vacía
            Some(Token::Keyword(Keyword::Void)) => {
                let only_void = self
                    .lookahead(|s| {
                        s.keyword(Keyword::Void)?;
                        s.expect(Token::CloseParen)
                    })
                    .is_ok();

                if only_void {
                    self.next()?;
                    return Ok(Vec::new());
                }
            }

            _ => (),
        }

        self.comma_separated(Parser::parameter, false)
    }

    fn parameter(&mut self) -> Parse<Parameter> {
        let mut attributes = self.attributes()?;
        let of = self.type_spec(&mut attributes)?;

        let name = match self.peek() {
            Some(Token::Id(_)) => Some(self.id()?),
            _ => None,
        };

        let array = self.array_suffix()?;

        Ok(Parameter {
            name,
            of,
            attributes,
            array,
        })
    }

    fn array_suffix(&mut self) -> Parse<bool> {
        match self.peek() {
            Some(Token::OpenSquare) => {
                self.next()?;
                self.expect(Token::CloseSquare)?;
                Ok(true)
            }

            _ => Ok(false),
        }
    }

    /// Especificador de tipo seguido de `*` y atributos en cualquier orden.
    ///
    /// Los atributos encontrados se agregan a `attributes`, ya que en
    /// este dialecto pueden aparecer entre el tipo y el declarador.
    fn type_spec(&mut self, attributes: &mut Vec<Located<Attribute>>) -> Parse<Located<TypeSpec>> {
        let mut spec = self.located(|s| {
            while let Some(Token::Keyword(Keyword::Const)) = s.peek() {
                s.next()?;
            }

            s.base_type()
        })?;

        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.next()?;

                    let (location, inner) = spec.split();
                    let location = Location::span(location, &self.last_known);
                    spec = Located::at(TypeSpec::Pointer(Box::new(inner)), location);
                }

                Some(Token::Keyword(Keyword::Const)) => {
                    self.next()?;
                }

                Some(Token::Keyword(Keyword::Attribute)) => attributes.push(self.attribute()?),
                _ => break Ok(spec),
            }
        }
    }

    fn base_type(&mut self) -> Parse<TypeSpec> {
        let (_, token) = self.next()?.split();

        let (base, unsigned) = match token {
            Token::Keyword(Keyword::Unsigned) | Token::Keyword(Keyword::Signed) => {
                let unsigned = token == Token::Keyword(Keyword::Unsigned);
                let base = match self.peek().and_then(|token| builtin_base(&token)) {
                    Some(base) if base != Base::Void && base != Base::Bool => {
                        self.next()?;
                        base
                    }

                    _ => Base::Int,
                };

                (base, unsigned)
            }

            Token::Id(id) => return Ok(TypeSpec::Named(id)),

            token => match builtin_base(&token) {
                Some(base) => (base, false),
                None => return self.fail(ParserError::ExpectedType(token)).map_err(Failure::weak),
            },
        };

        // `short int`, `long int`
        let int = matches!(self.peek(), Some(Token::Keyword(Keyword::Int)));
        if int && matches!(base, Base::Short | Base::Long) {
            self.next()?;
        }

        Ok(TypeSpec::Builtin(Builtin { base, unsigned }))
    }

    fn attributes(&mut self) -> Parse<Vec<Located<Attribute>>> {
        let mut attributes = Vec::new();
        while let Some(Token::Keyword(Keyword::Attribute)) = self.peek() {
            attributes.push(self.attribute()?);
        }

        Ok(attributes)
    }

    fn attribute(&mut self) -> Parse<Located<Attribute>> {
        self.located(|s| {
            s.keyword(Keyword::Attribute)?;
            s.expect(Token::OpenParen)?;

            let name = s.id()?;
            let args = match s.peek() {
                Some(Token::OpenParen) => {
                    s.next()?;
                    let args = s.comma_separated(Parser::attribute_arg, true)?;
                    s.expect(Token::CloseParen)?;
                    args
                }

                _ => Vec::new(),
            };

            s.expect(Token::CloseParen)?;
            Ok(Attribute { name, args })
        })
    }

    fn attribute_arg(&mut self) -> Parse<Located<AttributeArg>> {
        let (location, token) = self.next()?.split();
        let arg = match token {
            Token::StrLiteral(string) | Token::WideStrLiteral(string) => AttributeArg::Str(string),
            Token::Id(id) => AttributeArg::Id(id),
            Token::IntLiteral(integer) => AttributeArg::Int(integer),
            token => {
                return self
                    .fail(ParserError::ExpectedAttributeArgument(token))
                    .map_err(Failure::weak)
            }
        };

        Ok(Located::at(arg, location))
    }

    fn block(&mut self) -> Parse<Block> {
        self.expect(Token::OpenCurly)?;

        let mut statements = Vec::new();
        loop {
            match self.peek() {
                Some(Token::CloseCurly) => {
                    self.next()?;
                    break Ok(statements);
                }

                _ => statements.push(self.statement()?),
            }
        }
    }

    fn statement(&mut self) -> Parse<Located<Statement>> {
        self.located(|s| match s.peek() {
            Some(Token::OpenCurly) => s.block().map(Statement::Block),

            Some(Token::Semicolon) => {
                s.next()?;
                Ok(Statement::Empty)
            }

            Some(Token::Keyword(Keyword::Return)) => {
                s.next()?;
                let value = match s.peek() {
                    Some(Token::Semicolon) => None,
                    _ => Some(s.expr()?),
                };

                s.expect(Token::Semicolon)?;
                Ok(Statement::Return(value))
            }

            Some(Token::Keyword(Keyword::Break)) => {
                s.next()?;
                s.expect(Token::Semicolon)?;
                Ok(Statement::Break)
            }

            Some(Token::Keyword(Keyword::Continue)) => {
                s.next()?;
                s.expect(Token::Semicolon)?;
                Ok(Statement::Continue)
            }

            Some(Token::Keyword(Keyword::If)) => s.if_statement(),
            Some(Token::Keyword(Keyword::While)) => s.while_statement(),
            Some(Token::Keyword(Keyword::Do)) => s.do_while_statement(),
            Some(Token::Keyword(Keyword::For)) => s.for_statement(),

            _ => {
                let statement = s.simple()?;
                s.expect(Token::Semicolon)?;
                Ok(statement)
            }
        })
    }

    fn if_statement(&mut self) -> Parse<Statement> {
        self.keyword(Keyword::If)?;
        let condition = self.condition()?;
        let then = Box::new(self.statement()?);

        let otherwise = match self.peek() {
            Some(Token::Keyword(Keyword::Else)) => {
                self.next()?;
                Some(Box::new(self.statement()?))
            }

            _ => None,
        };

        Ok(Statement::If {
            condition,
            then,
            otherwise,
        })
    }

    fn while_statement(&mut self) -> Parse<Statement> {
        self.keyword(Keyword::While)?;
        let condition = self.condition()?;
        let body = Box::new(self.statement()?);

        Ok(Statement::While { condition, body })
    }

    fn do_while_statement(&mut self) -> Parse<Statement> {
        self.keyword(Keyword::Do)?;
        let body = Box::new(self.statement()?);

        self.keyword(Keyword::While)?;
        let condition = self.condition()?;
        self.expect(Token::Semicolon)?;

        Ok(Statement::DoWhile { body, condition })
    }

    /// `for ([init]; [condition]; [step]) body`
    fn for_statement(&mut self) -> Parse<Statement> {
        self.keyword(Keyword::For)?;
        self.expect(Token::OpenParen)?;

        let init = match self.peek() {
            Some(Token::Semicolon) => None,
            _ => Some(Box::new(self.located(Parser::simple)?)),
        };

        self.expect(Token::Semicolon)?;

        let condition = match self.peek() {
            Some(Token::Semicolon) => None,
            _ => Some(self.expr()?),
        };

        self.expect(Token::Semicolon)?;

        let step = match self.peek() {
            Some(Token::CloseParen) => None,
            _ => Some(Box::new(self.located(Parser::simple)?)),
        };

        self.expect(Token::CloseParen)?;
        let body = Box::new(self.statement()?);

        Ok(Statement::For {
            init,
            condition,
            step,
            body,
        })
    }

    fn condition(&mut self) -> Parse<Located<Expr>> {
        self.expect(Token::OpenParen)?;
        let condition = self.expr()?;
        self.expect(Token::CloseParen)?;

        Ok(condition)
    }

    /// Declaración local, asignación o expresión, sin el `;` final.
    fn simple(&mut self) -> Parse<Statement> {
        let head = self.attempt(|s| {
            let mut attributes = Vec::new();
            let of = s.type_spec(&mut attributes).map_err(Failure::weak)?;
            let name = s.id().map_err(Failure::weak)?;

            Ok((of, name))
        });

        match head {
            Ok((of, name)) => {
                let init = match self.peek() {
                    Some(Token::Assign) => {
                        self.next()?;
                        Some(self.expr()?)
                    }

                    _ => None,
                };

                Ok(Statement::Local { of, name, init })
            }

            Err(Failure::Weak(_)) => self.assignment_or_expr(),
            Err(error) => Err(error),
        }
    }

    fn assignment_or_expr(&mut self) -> Parse<Statement> {
        // `++x` y `--x`
        if let Some(op) = self.peek().as_ref().and_then(step_op) {
            self.next()?;
            let target = self.id()?;
            let value = Located::at(Expr::Integer(1), target.location().clone());

            return Ok(Statement::Update { target, op, value });
        }

        let follow = self
            .lookahead(|s| {
                s.id()?;
                s.next().map(Located::into_inner)
            })
            .ok();

        let postfix = follow.as_ref().and_then(step_op);

        match (follow, postfix) {
            (Some(Token::Assign), _) => {
                let target = self.id()?;
                self.next()?;
                let value = self.expr()?;

                Ok(Statement::Assign { target, value })
            }

            (Some(Token::OpAssign(op)), _) => {
                let target = self.id()?;
                self.next()?;
                let value = self.expr()?;

                Ok(Statement::Update { target, op, value })
            }

            // `x++` y `x--`
            (_, Some(op)) => {
                let target = self.id()?;
                let (location, _) = self.next()?.split();
                let value = Located::at(Expr::Integer(1), location);

                Ok(Statement::Update { target, op, value })
            }

            _ => Ok(Statement::Expr(self.expr()?)),
        }
    }

    fn expr(&mut self) -> Parse<Located<Expr>> {
        self.binary(0)
    }

    /// Cadena de operadores binarios con precedencia de al menos `min`.
    fn binary(&mut self, min: u8) -> Parse<Located<Expr>> {
        let mut lhs = self.unary()?;

        loop {
            let op = match self.peek().as_ref().and_then(Binary::from_token) {
                Some(op) if op.precedence() >= min => op,
                _ => break Ok(lhs),
            };

            self.next()?;
            let rhs = self
                .binary(op.precedence() + 1)
                .map_err(|error| Failure::Strict(error.coerce()))?;

            let location = Location::span(lhs.location().clone(), rhs.location());
            let (lhs_box, rhs_box) = (Box::new(lhs), Box::new(rhs));

            let expr = match op {
                Binary::Arith(op) => Expr::Arith(lhs_box, op, rhs_box),
                Binary::Compare(op) => Expr::Compare(lhs_box, op, rhs_box),
                Binary::Logical(op) => Expr::Logical(lhs_box, op, rhs_box),
            };

            lhs = Located::at(expr, location);
        }
    }

    fn unary(&mut self) -> Parse<Located<Expr>> {
        let wrap: fn(Box<Located<Expr>>) -> Expr = match self.peek() {
            Some(Token::Minus) => Expr::Negate,
            Some(Token::Bang) => Expr::Not,
            Some(Token::Tilde) => Expr::Complement,
            _ => return self.primary(),
        };

        self.located(|s| {
            s.next()?;
            let inner = s.unary().map_err(|error| Failure::Strict(error.coerce()))?;
            Ok(wrap(Box::new(inner)))
        })
    }

    fn primary(&mut self) -> Parse<Located<Expr>> {
        self.located(|s| {
            let (location, token) = s.next()?.split();
            match token {
                Token::IntLiteral(integer) => Ok(Expr::Integer(integer)),
                Token::StrLiteral(string) => Ok(Expr::Str(string)),
                Token::WideStrLiteral(string) => Ok(Expr::WideStr(string)),

                Token::Id(id) => match s.peek() {
                    Some(Token::OpenParen) => {
                        s.next()?;
                        let args = s.comma_separated(Parser::expr, true)?;
                        s.expect(Token::CloseParen)?;

                        Ok(Expr::Call {
                            callee: Located::at(id, location),
                            args,
                        })
                    }

                    _ => Ok(Expr::Name(id)),
                },

                Token::OpenParen => {
                    let inner = s.expr()?;
                    s.expect(Token::CloseParen)?;

                    Ok(inner.into_inner())
                }

                Token::OpenCurly => {
                    let elements = s.comma_separated(Parser::expr, true)?;
                    s.expect(Token::CloseCurly)?;

                    Ok(Expr::Pack(elements))
                }

                token => s.fail(ParserError::ExpectedExpr(token)).map_err(Failure::weak),
            }
        })
    }

    fn located<T, F>(&mut self, rule: F) -> Parse<Located<T>>
    where
        F: FnOnce(&mut Self) -> Parse<T>,
    {
        let start = match self.tokens.peek() {
            Some(token) => token.location().clone(),
            None => return self.fail(ParserError::UnexpectedEof),
        };

        let value = rule(self)?;
        Ok(Located::at(value, Location::span(start, &self.last_known)))
    }

    fn attempt<T, F>(&mut self, rule: F) -> Parse<T>
    where
        F: FnOnce(&mut Self) -> Parse<T>,
    {
        let mut fork = self.clone();

        let result = rule(&mut fork);
        if result.is_ok() {
            *self = fork;
        }

        result
    }

    fn lookahead<T, F>(&mut self, rule: F) -> Parse<T>
    where
        F: FnOnce(&mut Self) -> Parse<T>,
    {
        rule(&mut self.clone())
    }

    fn comma_separated<T, F>(&mut self, mut rule: F, allow_empty: bool) -> Parse<Vec<T>>
    where
        F: FnMut(&mut Self) -> Parse<T>,
    {
        let mut items = match self.attempt(|s| rule(s)) {
            Err(Failure::Weak(_)) if allow_empty => return Ok(Vec::new()),
            item => vec![item.map_err(|error| Failure::Strict(error.coerce()))?],
        };

        loop {
            match self.peek() {
                Some(Token::Comma) => {
                    self.next()?;
                    items.push(rule(self).map_err(|error| Failure::Strict(error.coerce()))?);
                }

                _ => break Ok(items),
            }
        }
    }

    fn id(&mut self) -> Parse<Located<Identifier>> {
        let (location, token) = self.next()?.split();
        match token {
            Token::Id(id) => Ok(Located::at(id, location)),
            token => self.fail(ParserError::ExpectedId(token)),
        }
    }

    fn keyword(&mut self, keyword: Keyword) -> Parse<()> {
        self.expect(Token::Keyword(keyword))
    }

    fn expect(&mut self, token: Token) -> Parse<()> {
        match self.next().map(Located::into_inner) {
            Ok(found) if found == token => Ok(()),
            Ok(found) => self.fail(ParserError::UnexpectedToken(token, found)),
            Err(_) => self.fail(ParserError::MissingToken(token)),
        }
    }

    fn peek(&mut self) -> Option<Token> {
        self.tokens.peek().map(|token| token.val().clone())
    }

    fn next(&mut self) -> Parse<Located<Token>> {
        match self.tokens.next() {
            Some(token) => {
                self.last_known = token.location().clone();
                Ok(token.clone())
            }

            None => self.fail(ParserError::UnexpectedEof),
        }
    }

    fn fail<T>(&self, error: ParserError) -> Parse<T> {
        Err(Failure::Strict(Located::at(error, self.last_known.clone())))
    }
}

/// Operador de `++` y `--`.
fn step_op(token: &Token) -> Option<Operator> {
    match token {
        Token::Increment => Some(Operator::Add),
        Token::Decrement => Some(Operator::Sub),
        _ => None,
    }
}

fn builtin_base(token: &Token) -> Option<Base> {
    let base = match token {
        Token::Keyword(Keyword::Void) => Base::Void,
        Token::Keyword(Keyword::Bool) => Base::Bool,
        Token::Keyword(Keyword::Char) => Base::Char,
        Token::Keyword(Keyword::Short) => Base::Short,
        Token::Keyword(Keyword::Int) => Base::Int,
        Token::Keyword(Keyword::Long) => Base::Long,
        Token::Keyword(Keyword::Int64) => Base::Int64,
        Token::Keyword(Keyword::String) => Base::String,
        _ => return None,
    };

    Some(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, source};

    fn parse_str(text: &str) -> Result<Ast, Located<ParserError>> {
        let (start, stream) = source::consume(text, "<test>");
        let tokens = Lexer::new(start.clone(), stream)
            .try_exhaustive()
            .expect("lexing failed");

        parse(tokens.iter(), start)
    }

    fn functions(ast: &Ast) -> Vec<&Function> {
        ast.declarations
            .iter()
            .filter_map(|declaration| match declaration {
                Declaration::Function(function) => Some(function),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn open_array_typedef() {
        let source = "typedef void * PVOID;\ntypedef PVOID __attribute(__open) ArrOfConst[];";
        let ast = parse_str(source).expect("parsing failed");

        match &ast.declarations[..] {
            [Declaration::Typedef(pvoid), Declaration::Typedef(open)] => {
                assert_eq!(
                    pvoid.of.val(),
                    &TypeSpec::Pointer(Box::new(TypeSpec::Builtin(Builtin {
                        base: Base::Void,
                        unsigned: false
                    })))
                );

                assert_eq!(open.name.val().as_ref(), "ArrOfConst");
                assert_eq!(open.of.val(), &TypeSpec::Named(Identifier::new("PVOID")));
                assert_eq!(open.attributes.len(), 1);
                assert_eq!(open.attributes[0].val().name.val().as_ref(), "__open");
                assert!(open.array);
            }

            other => panic!("unexpected declarations: {:?}", other),
        }
    }

    #[test]
    fn unsigned_builtins() {
        let ast = parse_str(
            "typedef unsigned __int64 u64; typedef unsigned u32; typedef unsigned __String PWSTR;",
        )
        .expect("parsing failed");

        let specs: Vec<_> = ast
            .declarations
            .iter()
            .map(|declaration| match declaration {
                Declaration::Typedef(typedef) => typedef.of.val().clone(),
                other => panic!("unexpected declaration: {:?}", other),
            })
            .collect();

        let unsigned = |base| TypeSpec::Builtin(Builtin { base, unsigned: true });
        assert_eq!(
            specs,
            vec![unsigned(Base::Int64), unsigned(Base::Int), unsigned(Base::String)]
        );
    }

    #[test]
    fn enum_members() {
        let ast = parse_str("enum { false = 0, true = 1 };\nenum { A, B = 0xC0000001, };")
            .expect("parsing failed");

        match &ast.declarations[..] {
            [Declaration::Enum(first), Declaration::Enum(second)] => {
                assert_eq!(first.members.len(), 2);
                assert_eq!(first.members[1].name.val().as_ref(), "true");

                assert!(second.members[0].value.is_none());
                assert!(matches!(
                    second.members[1].value.as_ref().map(Located::val),
                    Some(Expr::Integer(0xC000_0001))
                ));
            }

            other => panic!("unexpected declarations: {:?}", other),
        }
    }

    #[test]
    fn dll_import_prototype() {
        let ast = parse_str(
            r#"static void __attribute(__dll("kernelbase.dll", "ExitProcess"))
               __attribute(__stdcall) ExitProcess(u32 uExitCode);"#,
        )
        .expect("parsing failed");

        let function = functions(&ast)[0];
        assert!(function.is_static);
        assert!(function.body.is_none());
        assert_eq!(function.name.val().as_ref(), "ExitProcess");
        assert_eq!(function.parameters.len(), 1);

        let names: Vec<_> = function
            .attributes
            .iter()
            .map(|attribute| attribute.val().name.val().to_string())
            .collect();

        assert_eq!(names, vec!["__dll", "__stdcall"]);

        let args: Vec<_> = function.attributes[0]
            .val()
            .args
            .iter()
            .map(|arg| arg.val().clone())
            .collect();

        assert_eq!(
            args,
            vec![
                AttributeArg::Str(Rc::from("kernelbase.dll")),
                AttributeArg::Str(Rc::from("ExitProcess")),
            ]
        );
    }

    #[test]
    fn call_with_brace_list() {
        let ast = parse_str(
            r#"BOOLEAN InitializeUninstall() {
                MsgBox(Format(L"Hello %s %d", { L"world", 1337 }), MB_OK, mbInformation);
                return false;
            }"#,
        )
        .expect("parsing failed");

        let function = functions(&ast)[0];
        let body = function.body.as_ref().expect("definition has a body");
        assert_eq!(body.len(), 2);

        let args = match body[0].val() {
            Statement::Expr(expr) => match expr.val() {
                Expr::Call { callee, args } => {
                    assert_eq!(callee.val().as_ref(), "MsgBox");
                    args
                }

                other => panic!("expected call, found {:?}", other),
            },

            other => panic!("expected expression statement, found {:?}", other),
        };

        match args[0].val() {
            Expr::Call { args, .. } => match args[1].val() {
                Expr::Pack(elements) => assert_eq!(elements.len(), 2),
                other => panic!("expected brace list, found {:?}", other),
            },

            other => panic!("expected nested call, found {:?}", other),
        }

        assert!(matches!(body[1].val(), Statement::Return(Some(_))));
    }

    #[test]
    fn locals_assignments_and_control_flow() {
        let ast = parse_str(
            r#"void f(void) {
                s32 x = 1;
                PVOID * p;
                x = -2;
                if (x == 3) { g(); } else ;
                while (x != 0) x = 0;
            }"#,
        )
        .expect("parsing failed");

        let function = functions(&ast)[0];
        assert!(function.parameters.is_empty());

        let body = function.body.as_ref().expect("definition has a body");
        assert!(matches!(body[0].val(), Statement::Local { init: Some(_), .. }));
        match body[1].val() {
            Statement::Local { of, init: None, .. } => {
                assert!(matches!(of.val(), TypeSpec::Pointer(_)))
            }

            other => panic!("expected local declaration, found {:?}", other),
        }

        assert!(matches!(body[2].val(), Statement::Assign { .. }));
        assert!(matches!(body[3].val(), Statement::If { otherwise: Some(_), .. }));
        assert!(matches!(body[4].val(), Statement::While { .. }));
    }

    fn body_of(text: &str) -> Vec<Located<Statement>> {
        let mut ast = parse_str(text).expect("parsing failed");
        match ast.declarations.pop() {
            Some(Declaration::Function(Function {
                body: Some(body), ..
            })) => body,
            other => panic!("expected a function definition, found {:?}", other),
        }
    }

    /// Reconstruye una expresión con paréntesis explícitos.
    fn grouped(expr: &Located<Expr>) -> String {
        match expr.val() {
            Expr::Integer(integer) => integer.to_string(),
            Expr::Name(name) => name.to_string(),
            Expr::Negate(inner) => format!("-{}", grouped(inner)),
            Expr::Not(inner) => format!("!{}", grouped(inner)),
            Expr::Complement(inner) => format!("~{}", grouped(inner)),
            Expr::Arith(lhs, op, rhs) => format!("({} {} {})", grouped(lhs), op, grouped(rhs)),
            Expr::Compare(lhs, op, rhs) => format!("({} {:?} {})", grouped(lhs), op, grouped(rhs)),
            Expr::Logical(lhs, op, rhs) => format!("({} {:?} {})", grouped(lhs), op, grouped(rhs)),
            other => format!("{:?}", other),
        }
    }

    #[test]
    fn operator_precedence() {
        let body = body_of(
            "void f() { a + b * c - d; a << 1 + 2 & 3; a || b && !c == ~d; (a - b) - c % 2; }",
        );

        let exprs: Vec<_> = body
            .iter()
            .map(|statement| match statement.val() {
                Statement::Expr(expr) => grouped(expr),
                other => panic!("expected expression, found {:?}", other),
            })
            .collect();

        assert_eq!(
            exprs,
            vec![
                "((a + (b * c)) - d)",
                "((a << (1 + 2)) & 3)",
                "(a Or (b And (!c Eq ~d)))",
                "((a - b) - (c % 2))",
            ]
        );
    }

    #[test]
    fn loops_and_updates() {
        let body = body_of(
            r#"void f() {
                for (s32 i = 0; i < 10; i++) { if (i == 5) continue; break; }
                for (;;) ;
                do x -= 2; while (x > 0);
                ++x;
                x <<= 1;
            }"#,
        );

        match body[0].val() {
            Statement::For {
                init: Some(init),
                condition: Some(_),
                step: Some(step),
                body,
            } => {
                assert!(matches!(init.val(), Statement::Local { .. }));
                assert!(matches!(
                    step.val(),
                    Statement::Update {
                        op: Operator::Add,
                        ..
                    }
                ));

                match body.val() {
                    Statement::Block(statements) => {
                        assert!(matches!(statements[1].val(), Statement::Break))
                    }
                    other => panic!("expected block, found {:?}", other),
                }
            }

            other => panic!("expected for loop, found {:?}", other),
        }

        assert!(matches!(
            body[1].val(),
            Statement::For {
                init: None,
                condition: None,
                step: None,
                ..
            }
        ));

        assert!(matches!(body[2].val(), Statement::DoWhile { .. }));
        assert!(matches!(body[3].val(), Statement::Update { op: Operator::Add, .. }));
        assert!(matches!(body[4].val(), Statement::Update { op: Operator::Shl, .. }));
    }

    #[test]
    fn dangling_operator_is_a_hard_error() {
        let error = parse_str("void f() { g(a +); }").expect_err("operand is missing");
        assert!(matches!(error.val(), ParserError::ExpectedExpr(Token::CloseParen)));
    }

    #[test]
    fn unexpected_token_reports_expected_and_found() {
        let error = parse_str("void f() { MsgBox(L\"x\" 1); }").expect_err("missing comma");

        match error.val() {
            ParserError::UnexpectedToken(expected, found) => {
                assert_eq!(expected, &Token::CloseParen);
                assert_eq!(found, &Token::IntLiteral(1));
            }

            other => panic!("unexpected error: {:?}", other),
        }

        assert_eq!(error.location().start().line(), 1);
        assert_eq!(error.location().start().column(), 24);
    }

    #[test]
    fn missing_semicolon_at_eof() {
        let error = parse_str("typedef int s32").expect_err("missing semicolon");
        assert!(matches!(error.val(), ParserError::MissingToken(Token::Semicolon)));
    }
}
