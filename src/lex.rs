//! Análisis léxico.
//!
//! # Tokenization
//! Esta es la primera fase del compilador. Descompone un [`InputStream`]
//! (flujo de caracteres) en unidades léxicas denominadas tokens. Los espacios
//! en blanco y los comentarios (`//` y `/* */`) se descartan durante esta
//! operación. Cada token emitido esta asociado a una ubicación en el código
//! fuente original, lo cual permite rastrear errores en tanto los mismos como
//! constructos más elevados de fases posteriores.
//!
//! # Contenido de un token
//! Operadores, puntuación y palabras clave se identifican por el hecho de lo
//! que son y no incluyen lexemas. Los identificadores sí incluyen su lexema
//! original. Las constantes literales se resuelven a sus valores: los enteros
//! a `u64` (decimal, `0x` hexadecimal u octal con `0` inicial) y las cadenas
//! a su contenido ya sin secuencias de escape. Una cadena precedida por `L`
//! es una cadena ancha.
//!
//! # Reglas importantes del lenguaje
//! - A diferencia de otros dialectos, este lenguaje es case-sensitive tal
//!   como C.
//! - `__attribute` (o `__attribute__`) introduce atributos de declaración.
//! - Los sufijos enteros `u`, `U`, `l` y `L` se aceptan y se ignoran.
//!
//! # Errores
//! El lexer se detiene en el primer error. Después de emitir un error, el
//! iterador no produce más elementos.

use crate::{
    error::{Classify, ErrorKind},
    source::{InputStream, Located, Location},
};
use std::{
    borrow::Borrow,
    fmt::{self, Display},
    rc::Rc,
    str::FromStr,
};

use thiserror::Error;

/// Error de escaneo.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LexerError {
    /// Carácter desconocido o inesperado en el flujo de entrada.
    #[error("Bad character {0:?} in input stream")]
    BadChar(char),

    /// Una constante entera no cabe en 64 bits.
    #[error("Integer literal overflow, valid range is [0, {}]", u64::MAX)]
    IntOverflow,

    /// Un prefijo `0x` sin dígitos.
    #[error("Hexadecimal literal has no digits")]
    EmptyHexLiteral,

    /// Una cadena no se cerró antes del fin de línea.
    #[error("Unterminated string literal")]
    UnterminatedString,

    /// Un comentario `/*` no se cerró antes del fin de archivo.
    #[error("Unterminated block comment")]
    UnterminatedComment,

    /// Secuencia de escape desconocida.
    #[error("Unknown escape sequence '\\{0}'")]
    BadEscape(char),
}

impl Classify for LexerError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Lex
    }
}

/// Un identificador.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(Rc<str>);

impl Identifier {
    /// Construye un identificador a partir de su lexema.
    pub fn new(name: &str) -> Self {
        Identifier(Rc::from(name))
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Identifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Display for Identifier {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

/// Objeto resultante del análisis léxico.
///
/// Un token contiene suficiente información para describir completamente
/// a una entidad léxica en el programa fuente.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Identificador.
    Id(Identifier),

    /// Palabra clave.
    Keyword(Keyword),

    /// Literal de entero.
    IntLiteral(u64),

    /// Literal de cadena angosta, `"..."`.
    StrLiteral(Rc<str>),

    /// Literal de cadena ancha, `L"..."`.
    WideStrLiteral(Rc<str>),

    /// `=`
    Assign,

    /// `,`
    Comma,

    /// `;`
    Semicolon,

    /// Asignación compuesta, `+=`, `<<=`, etc.
    OpAssign(Operator),

    /// `+`
    Plus,

    /// `-`
    Minus,

    /// `*`
    Star,

    /// `/`
    Slash,

    /// `%`
    Percent,

    /// `&`
    Ampersand,

    /// `|`
    Pipe,

    /// `^`
    Caret,

    /// `~`
    Tilde,

    /// `!`
    Bang,

    /// `<<`
    ShiftLeft,

    /// `>>`
    ShiftRight,

    /// `&&`
    LogicalAnd,

    /// `||`
    LogicalOr,

    /// `++`
    Increment,

    /// `--`
    Decrement,

    /// `(`
    OpenParen,

    /// `)`
    CloseParen,

    /// `{`
    OpenCurly,

    /// `}`
    CloseCurly,

    /// `[`
    OpenSquare,

    /// `]`
    CloseSquare,

    /// `==`
    Equal,

    /// `!=`
    NotEqual,

    /// `<`
    Less,

    /// `>`
    Greater,

    /// `<=`
    LessOrEqual,

    /// `>=`
    GreaterOrEqual,
}

impl Display for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Token::*;

        match self {
            Id(id) => write!(fmt, "identifier `{}`", id),
            Keyword(keyword) => write!(fmt, "keyword `{}`", keyword),
            IntLiteral(integer) => write!(fmt, "literal `{}`", integer),
            StrLiteral(string) => write!(fmt, "string literal {:?}", string),
            WideStrLiteral(string) => write!(fmt, "wide string literal L{:?}", string),
            Assign => fmt.write_str("`=`"),
            Comma => fmt.write_str("`,`"),
            Semicolon => fmt.write_str("`;`"),
            OpAssign(op) => write!(fmt, "`{}=`", op),
            Plus => fmt.write_str("`+`"),
            Minus => fmt.write_str("`-`"),
            Star => fmt.write_str("`*`"),
            Slash => fmt.write_str("`/`"),
            Percent => fmt.write_str("`%`"),
            Ampersand => fmt.write_str("`&`"),
            Pipe => fmt.write_str("`|`"),
            Caret => fmt.write_str("`^`"),
            Tilde => fmt.write_str("`~`"),
            Bang => fmt.write_str("`!`"),
            ShiftLeft => fmt.write_str("`<<`"),
            ShiftRight => fmt.write_str("`>>`"),
            LogicalAnd => fmt.write_str("`&&`"),
            LogicalOr => fmt.write_str("`||`"),
            Increment => fmt.write_str("`++`"),
            Decrement => fmt.write_str("`--`"),
            OpenParen => fmt.write_str("`(`"),
            CloseParen => fmt.write_str("`)`"),
            OpenCurly => fmt.write_str("`{`"),
            CloseCurly => fmt.write_str("`}`"),
            OpenSquare => fmt.write_str("`[`"),
            CloseSquare => fmt.write_str("`]`"),
            Equal => fmt.write_str("`==`"),
            NotEqual => fmt.write_str("`!=`"),
            Less => fmt.write_str("`<`"),
            Greater => fmt.write_str("`>`"),
            LessOrEqual => fmt.write_str("`<=`"),
            GreaterOrEqual => fmt.write_str("`>=`"),
        }
    }
}

/// Operador aritmético o de bits con dos operandos.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    And,
    Or,
    Xor,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        use Operator::*;

        match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            Mod => "%",
            Shl => "<<",
            Shr => ">>",
            And => "&",
            Or => "|",
            Xor => "^",
        }
    }
}

impl Display for Operator {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.symbol())
    }
}

/// Una palabra clave.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    Typedef,
    Enum,
    Static,
    Extern,
    Const,
    Unsigned,
    Signed,
    Void,
    Char,
    Short,
    Int,
    Long,
    Int64,
    String,
    Bool,
    Return,
    If,
    Else,
    While,
    Do,
    For,
    Break,
    Continue,
    Attribute,
}

const KEYWORDS: &[(&str, Keyword)] = &[
    ("typedef", Keyword::Typedef),
    ("enum", Keyword::Enum),
    ("static", Keyword::Static),
    ("extern", Keyword::Extern),
    ("const", Keyword::Const),
    ("unsigned", Keyword::Unsigned),
    ("signed", Keyword::Signed),
    ("void", Keyword::Void),
    ("char", Keyword::Char),
    ("short", Keyword::Short),
    ("int", Keyword::Int),
    ("long", Keyword::Long),
    ("__int64", Keyword::Int64),
    ("__String", Keyword::String),
    ("_Bool", Keyword::Bool),
    ("return", Keyword::Return),
    ("if", Keyword::If),
    ("else", Keyword::Else),
    ("while", Keyword::While),
    ("do", Keyword::Do),
    ("for", Keyword::For),
    ("break", Keyword::Break),
    ("continue", Keyword::Continue),
    ("__attribute", Keyword::Attribute),
    ("__attribute__", Keyword::Attribute),
];

impl Display for Keyword {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let string = KEYWORDS
            .iter()
            .find(|(_, keyword)| keyword == self)
            .map(|(name, _)| *name)
            .unwrap_or("?");

        fmt.write_str(string)
    }
}

impl FromStr for Keyword {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        KEYWORDS
            .iter()
            .find(|&&(name, _)| name == string)
            .map(|&(_, keyword)| keyword)
            .ok_or(())
    }
}

/// Máquina de estados para análisis léxico.
///
/// Un lexer puede encontrarse en uno de diversos estados. La
/// salida del lexer, así como su siguiente estado, se define
/// a partir de tanto su estado actual como el siguiente carácter
/// encontrado en el flujo de entrada.
pub struct Lexer<S: Iterator> {
    source: std::iter::Peekable<S>,
    state: State,
    start: Location,
    next: Location,
}

/// Posibles estados del lexer.
enum State {
    /// Estado que ocurre antes de encontrar el inicio de un token.
    Start,

    /// Ya se emitió un error, no se emite nada más.
    Failed,

    /// Estado de completitud; siempre emite el token incluido,
    /// consume la entrada actual y pasa a [`State::Start`].
    Complete(Token),

    /// Se encontró `/`, puede iniciar un comentario.
    Slash,

    /// Comentario de línea.
    ///
    /// Este estado vuelve a [`State::Start`] al encontrar `'\n'`.
    LineComment,

    /// Comentario de bloque. `star` indica si el último carácter fue `*`.
    BlockComment { star: bool },

    /// Operador que puede extenderse con el siguiente carácter.
    Punct(char),

    /// `<<` o `>>`, puede seguir `=`.
    Shift(Operator),

    /// Un `0` inicial, que puede preceder a `x` u octales.
    Zero,

    /// Constante entera en la base indicada.
    Integer { value: u64, radix: u32, digits: bool },

    /// Sufijos de una constante entera ya completa.
    Suffix(u64),

    /// Término que puede ser un identificador o una palabra clave.
    Word(String),

    /// Interior de una cadena.
    Str { wide: bool, text: String },

    /// Se encontró `\` dentro de una cadena.
    Escape { wide: bool, text: String },

    /// Secuencia `\x` en progreso.
    HexEscape {
        wide: bool,
        text: String,
        value: u32,
        digits: u8,
    },
}

impl<S: InputStream> Lexer<S> {
    /// Crea un lexer en estado inicial a partir de un flujo.
    pub fn new(start: Location, source: S) -> Self {
        let next = start.clone();
        Lexer {
            source: source.peekable(),
            state: State::Start,
            start,
            next,
        }
    }

    /// Reduce la entrada a una secuencia completa de tokens, o bien
    /// al primer error encontrado.
    pub fn try_exhaustive(self) -> Result<Vec<Located<Token>>, Located<LexerError>> {
        self.collect()
    }

    /// Intenta construir un siguiente token.
    fn lex(&mut self) -> Result<Option<(Token, Location)>, LexerError> {
        use {State::*, Token::*};

        let mut last_accepted = self.start.clone();
        let token = loop {
            let next_char = self.source.peek().map(|(c, _)| *c);

            // La posición de origen se mueve junto a la posición
            // siguiente siempre que no se haya encontrado una
            // frontera de token
            if let Start = self.state {
                self.start = self.next.clone();
            }

            // Switch table principal, determina cambios de estado
            // y de salida del lexer a partir de combinaciones del
            // estado actual y el siguiente carácter
            match (&mut self.state, next_char) {
                (Failed, _) => return Ok(None),

                // Tokens triviales
                (Start, None) => return Ok(None),
                (Start, Some(',')) => self.state = Complete(Comma),
                (Start, Some(';')) => self.state = Complete(Semicolon),
                (Start, Some('~')) => self.state = Complete(Tilde),
                (Start, Some('(')) => self.state = Complete(OpenParen),
                (Start, Some(')')) => self.state = Complete(CloseParen),
                (Start, Some('{')) => self.state = Complete(OpenCurly),
                (Start, Some('}')) => self.state = Complete(CloseCurly),
                (Start, Some('[')) => self.state = Complete(OpenSquare),
                (Start, Some(']')) => self.state = Complete(CloseSquare),
                (Start, Some('/')) => self.state = State::Slash,
                (Start, Some(c)) if single(c).is_some() => self.state = State::Punct(c),
                (Start, Some('"')) => {
                    self.state = Str {
                        wide: false,
                        text: String::new(),
                    }
                }

                // Identificadores y palabras clave
                (Start, Some(c)) if c.is_ascii_alphabetic() || c == '_' => {
                    self.state = Word(c.to_string())
                }

                (Start, Some('0')) => self.state = Zero,

                // Inicio de una constante decimal. No se consume el dígito,
                // ya que esta lógica ya está implementada en el respectivo
                // caso para un estado de constante entera.
                (Start, Some(c)) if c.is_ascii_digit() => {
                    self.state = Integer {
                        value: 0,
                        radix: 10,
                        digits: false,
                    };

                    continue;
                }

                // Espacios en blanco y caracteres inesperados
                (Start, Some(c)) if c.is_whitespace() => (),
                (Start, Some(c)) => break Err(LexerError::BadChar(c)),

                // Emisión retardada de tokens cualesquiera
                (Complete(value), _) => break Ok(std::mem::replace(value, Comma)),

                (State::Slash, Some('/')) => self.state = LineComment,
                (State::Slash, Some('*')) => self.state = BlockComment { star: false },
                (State::Slash, Some('=')) => self.state = Complete(OpAssign(Operator::Div)),
                (State::Slash, _) => break Ok(Token::Slash),

                (LineComment, Some('\n')) | (LineComment, None) => self.state = Start,
                (LineComment, Some(_)) => (),

                (BlockComment { .. }, None) => break Err(LexerError::UnterminatedComment),
                (BlockComment { star: true }, Some('/')) => self.state = Start,
                (BlockComment { star }, Some(c)) => *star = c == '*',

                // Operadores de uno, dos o tres caracteres
                (State::Punct('<'), Some('<')) => self.state = Shift(Operator::Shl),
                (State::Punct('>'), Some('>')) => self.state = Shift(Operator::Shr),

                (State::Punct(first), next) => {
                    let first = *first;
                    match next.and_then(|second| pair(first, second)) {
                        Some(token) => self.state = Complete(token),
                        None => match single(first) {
                            Some(token) => break Ok(token),
                            None => break Err(LexerError::BadChar(first)),
                        },
                    }
                }

                (Shift(op), Some('=')) => self.state = Complete(OpAssign(*op)),
                (Shift(Operator::Shl), _) => break Ok(ShiftLeft),
                (Shift(_), _) => break Ok(ShiftRight),

                // `0x...`, `0...` (octal) o simplemente `0`
                (Zero, Some('x')) | (Zero, Some('X')) => {
                    self.state = Integer {
                        value: 0,
                        radix: 16,
                        digits: false,
                    }
                }

                (Zero, Some(c)) if c.is_digit(8) => {
                    self.state = Integer {
                        value: 0,
                        radix: 8,
                        digits: false,
                    };

                    continue;
                }

                (Zero, _) => {
                    self.state = Suffix(0);
                    continue;
                }

                // Acumulación dígito por dígito de constantes enteras
                (
                    Integer {
                        value,
                        radix,
                        digits,
                    },
                    Some(c),
                ) if c.is_digit(*radix) => {
                    let digit = match c.to_digit(*radix) {
                        Some(digit) => u64::from(digit),
                        None => unreachable!(),
                    };

                    match value
                        .checked_mul(u64::from(*radix))
                        .and_then(|n| n.checked_add(digit))
                    {
                        Some(result) => *value = result,
                        None => break Err(LexerError::IntOverflow),
                    }

                    *digits = true;
                }

                (Integer { digits: false, .. }, _) => break Err(LexerError::EmptyHexLiteral),

                // Si sigue algo que no es un dígito, la constante ha terminado
                (Integer { value, .. }, _) => {
                    self.state = Suffix(*value);
                    continue;
                }

                (Suffix(_), Some('u' | 'U' | 'l' | 'L')) => (),
                (Suffix(_), Some(c)) if is_word_char(c) => break Err(LexerError::BadChar(c)),
                (Suffix(value), _) => break Ok(IntLiteral(*value)),

                // `L"..."` es una cadena ancha
                (Word(word), Some('"')) if word == "L" => {
                    self.state = Str {
                        wide: true,
                        text: String::new(),
                    }
                }

                // Extensión de términos
                (Word(word), Some(c)) if is_word_char(c) => word.push(c),

                // Si sigue algo que no puede formar parte del término, ha terminado
                (Word(word), _) => {
                    if let Ok(keyword) = self::Keyword::from_str(word) {
                        break Ok(Keyword(keyword));
                    } else {
                        break Ok(Id(Identifier::new(word)));
                    }
                }

                // Cadenas
                (Str { .. }, None) | (Str { .. }, Some('\n')) => {
                    break Err(LexerError::UnterminatedString)
                }

                (Str { wide, text }, Some('"')) => {
                    let text = Rc::from(std::mem::take(text).as_str());
                    self.state = Complete(if *wide {
                        WideStrLiteral(text)
                    } else {
                        StrLiteral(text)
                    });
                }

                (Str { wide, text }, Some('\\')) => {
                    self.state = Escape {
                        wide: *wide,
                        text: std::mem::take(text),
                    }
                }

                (Str { text, .. }, Some(c)) => text.push(c),

                (Escape { .. }, None) | (Escape { .. }, Some('\n')) => {
                    break Err(LexerError::UnterminatedString)
                }

                (Escape { wide, text }, Some(c)) => {
                    let wide = *wide;
                    let mut text = std::mem::take(text);

                    let escaped = match c {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        '0' => '\0',
                        '\\' | '\'' | '"' => c,
                        'x' => {
                            self.state = HexEscape {
                                wide,
                                text,
                                value: 0,
                                digits: 0,
                            };

                            self.accept(&mut last_accepted);
                            continue;
                        }

                        _ => break Err(LexerError::BadEscape(c)),
                    };

                    text.push(escaped);
                    self.state = Str { wide, text };
                }

                (
                    HexEscape {
                        wide,
                        value,
                        digits,
                        ..
                    },
                    Some(c),
                ) if c.is_ascii_hexdigit() && *digits < max_hex_digits(*wide) => {
                    *value = *value * 16 + c.to_digit(16).unwrap_or(0);
                    *digits += 1;
                }

                (HexEscape { digits: 0, .. }, _) => break Err(LexerError::BadEscape('x')),

                (
                    HexEscape {
                        wide, text, value, ..
                    },
                    _,
                ) => {
                    let escaped = match char::from_u32(*value) {
                        Some(escaped) => escaped,
                        None => break Err(LexerError::BadEscape('x')),
                    };

                    let mut text = std::mem::take(text);
                    text.push(escaped);

                    self.state = Str { wide: *wide, text };
                    continue;
                }
            }

            // Si no hubo `continue`, aquí se consume el carácter que
            // se observó con lookahead anteriormente
            self.accept(&mut last_accepted);
        };

        token.map(|token| Some((token, last_accepted)))
    }

    /// Consume el carácter observado por lookahead.
    fn accept(&mut self, last_accepted: &mut Location) {
        if let Some((_, next_position)) = self.source.next() {
            *last_accepted = std::mem::replace(&mut self.next, next_position);
        }
    }
}

impl<S: InputStream> Iterator for Lexer<S> {
    type Item = Result<Located<Token>, Located<LexerError>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.lex() {
            Ok(None) => None,
            Ok(Some((token, last_accepted))) => {
                self.state = State::Start;

                let location = Location::span(self.start.clone(), &last_accepted);
                Some(Ok(Located::at(token, location)))
            }

            Err(error) => {
                let location = match error {
                    LexerError::UnterminatedString | LexerError::UnterminatedComment => {
                        self.start.clone()
                    }

                    _ => self.next.clone(),
                };

                self.state = State::Failed;
                Some(Err(Located::at(error, location)))
            }
        }
    }
}

/// Determina si un carácter puede pertenecer a un término.
fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Operador de un único carácter.
fn single(c: char) -> Option<Token> {
    let token = match c {
        '=' => Token::Assign,
        '!' => Token::Bang,
        '<' => Token::Less,
        '>' => Token::Greater,
        '+' => Token::Plus,
        '-' => Token::Minus,
        '*' => Token::Star,
        '%' => Token::Percent,
        '&' => Token::Ampersand,
        '|' => Token::Pipe,
        '^' => Token::Caret,
        _ => return None,
    };

    Some(token)
}

/// Operador de dos caracteres.
fn pair(first: char, second: char) -> Option<Token> {
    let token = match (first, second) {
        ('=', '=') => Token::Equal,
        ('!', '=') => Token::NotEqual,
        ('<', '=') => Token::LessOrEqual,
        ('>', '=') => Token::GreaterOrEqual,
        ('+', '+') => Token::Increment,
        ('-', '-') => Token::Decrement,
        ('&', '&') => Token::LogicalAnd,
        ('|', '|') => Token::LogicalOr,
        ('+', '=') => Token::OpAssign(Operator::Add),
        ('-', '=') => Token::OpAssign(Operator::Sub),
        ('*', '=') => Token::OpAssign(Operator::Mul),
        ('%', '=') => Token::OpAssign(Operator::Mod),
        ('&', '=') => Token::OpAssign(Operator::And),
        ('|', '=') => Token::OpAssign(Operator::Or),
        ('^', '=') => Token::OpAssign(Operator::Xor),
        _ => return None,
    };

    Some(token)
}

/// Las cadenas anchas admiten unidades UTF-16 completas en `\x`.
fn max_hex_digits(wide: bool) -> u8 {
    if wide {
        4
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source;

    fn lex(text: &str) -> Result<Vec<Token>, Located<LexerError>> {
        let (start, stream) = source::consume(text, "<test>");
        Lexer::new(start, stream)
            .try_exhaustive()
            .map(|tokens| tokens.into_iter().map(Located::into_inner).collect())
    }

    fn id(name: &str) -> Token {
        Token::Id(Identifier::new(name))
    }

    #[test]
    fn typedef_with_attribute() {
        let tokens = lex("typedef PVOID __attribute(__open) ArrOfConst[]; // array of const")
            .expect("lexing failed");

        assert_eq!(
            tokens,
            vec![
                Token::Keyword(Keyword::Typedef),
                id("PVOID"),
                Token::Keyword(Keyword::Attribute),
                Token::OpenParen,
                id("__open"),
                Token::CloseParen,
                id("ArrOfConst"),
                Token::OpenSquare,
                Token::CloseSquare,
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn wide_and_narrow_strings() {
        let tokens = lex(r#"L"Hello %s" "plain\n" Lx"#).expect("lexing failed");

        assert_eq!(
            tokens,
            vec![
                Token::WideStrLiteral(Rc::from("Hello %s")),
                Token::StrLiteral(Rc::from("plain\n")),
                id("Lx"),
            ]
        );
    }

    #[test]
    fn integer_radixes_and_suffixes() {
        let tokens = lex("0xC0000001 1337 017 0 42u").expect("lexing failed");

        assert_eq!(
            tokens,
            vec![
                Token::IntLiteral(0xC000_0001),
                Token::IntLiteral(1337),
                Token::IntLiteral(0o17),
                Token::IntLiteral(0),
                Token::IntLiteral(42),
            ]
        );
    }

    #[test]
    fn operators() {
        let tokens = lex("a == b != c <= d >= e < f > g = -1").expect("lexing failed");
        let operators: Vec<_> = tokens
            .into_iter()
            .filter(|token| !matches!(token, Token::Id(_) | Token::IntLiteral(_)))
            .collect();

        assert_eq!(
            operators,
            vec![
                Token::Equal,
                Token::NotEqual,
                Token::LessOrEqual,
                Token::GreaterOrEqual,
                Token::Less,
                Token::Greater,
                Token::Assign,
                Token::Minus,
            ]
        );
    }

    #[test]
    fn arithmetic_and_logical_operators() {
        let tokens = lex("+ ++ += - -- -= * *= / /= % & && &= | || ^ ^= ~ ! << <<= >> >>=")
            .expect("lexing failed");

        assert_eq!(
            tokens,
            vec![
                Token::Plus,
                Token::Increment,
                Token::OpAssign(Operator::Add),
                Token::Minus,
                Token::Decrement,
                Token::OpAssign(Operator::Sub),
                Token::Star,
                Token::OpAssign(Operator::Mul),
                Token::Slash,
                Token::OpAssign(Operator::Div),
                Token::Percent,
                Token::Ampersand,
                Token::LogicalAnd,
                Token::OpAssign(Operator::And),
                Token::Pipe,
                Token::LogicalOr,
                Token::Caret,
                Token::OpAssign(Operator::Xor),
                Token::Tilde,
                Token::Bang,
                Token::ShiftLeft,
                Token::OpAssign(Operator::Shl),
                Token::ShiftRight,
                Token::OpAssign(Operator::Shr),
            ]
        );

        // Un operador al final de la entrada también se emite
        assert_eq!(lex("x/").expect("lexing failed"), vec![id("x"), Token::Slash]);
        assert_eq!(lex("!x").expect("lexing failed"), vec![Token::Bang, id("x")]);
    }

    #[test]
    fn loop_keywords() {
        let tokens = lex("for do break continue").expect("lexing failed");
        let keyword = Token::Keyword;

        assert_eq!(
            tokens,
            vec![
                keyword(Keyword::For),
                keyword(Keyword::Do),
                keyword(Keyword::Break),
                keyword(Keyword::Continue),
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        let tokens = lex("/* block\n comment */ static // tail\nenum").expect("lexing failed");

        assert_eq!(
            tokens,
            vec![
                Token::Keyword(Keyword::Static),
                Token::Keyword(Keyword::Enum),
            ]
        );
    }

    #[test]
    fn hex_escapes() {
        let tokens = lex(r#"L"\x263A" "\x41\t""#).expect("lexing failed");

        assert_eq!(
            tokens,
            vec![
                Token::WideStrLiteral(Rc::from("\u{263A}")),
                Token::StrLiteral(Rc::from("A\t")),
            ]
        );
    }

    #[test]
    fn unterminated_string_reports_position() {
        let error = lex("int x;\n  L\"oops\n").expect_err("string should be unterminated");

        assert!(matches!(error.val(), LexerError::UnterminatedString));
        assert_eq!(error.location().start().line(), 2);
        assert_eq!(error.location().start().column(), 3);
    }

    #[test]
    fn bad_character() {
        let error = lex("int @x;").expect_err("`@` is not valid");

        assert!(matches!(error.val(), LexerError::BadChar('@')));
        assert_eq!(error.location().start().column(), 5);
    }

    #[test]
    fn unterminated_block_comment() {
        let error = lex("/* never closed").expect_err("comment should be unterminated");
        assert!(matches!(error.val(), LexerError::UnterminatedComment));
    }

    #[test]
    fn integer_overflow() {
        let error = lex("0x1FFFFFFFFFFFFFFFF").expect_err("literal exceeds 64 bits");
        assert!(matches!(error.val(), LexerError::IntOverflow));
    }

    #[test]
    fn token_locations() {
        let (start, stream) = source::consume("  MsgBox(", "<test>");
        let tokens = Lexer::new(start, stream).try_exhaustive().expect("lexing failed");

        let first = tokens[0].location();
        assert_eq!(first.start().column(), 3);
        assert_eq!(first.end().column(), 9);
    }
}
