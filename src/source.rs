//! Ubicaciones en el código fuente.
//!
//! Todo lo que se construye a partir de una unidad (tokens, nodos del
//! AST, errores) conserva el rango de posiciones que ocupaba en el
//! archivo original. Los diagnósticos usan ese rango para citar las
//! líneas afectadas.

use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::Range,
    rc::Rc,
};

/// Ancho de los divisores de tabulador.
const TAB_STOP: u32 = 4;

/// Flujo de caracteres de una unidad.
///
/// Cada carácter viene acompañado de la ubicación del carácter que le
/// sigue, la cual es la frontera del token que lo acepte.
pub trait InputStream: Iterator<Item = (char, Location)> {}

impl<I> InputStream for I where I: Iterator<Item = (char, Location)> {}

/// Un valor junto al rango de código que lo originó.
#[derive(Debug, Clone)]
pub struct Located<T> {
    location: Location,
    value: T,
}

impl<T> Located<T> {
    pub fn at(value: T, location: Location) -> Self {
        Located { value, location }
    }

    pub fn val(&self) -> &T {
        &self.value
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    pub fn split(self) -> (Location, T) {
        (self.location, self.value)
    }

    /// Transforma el valor conservando la ubicación.
    pub fn map<U, F>(self, map: F) -> Located<U>
    where
        F: FnOnce(T) -> U,
    {
        Located::at(map(self.value), self.location)
    }
}

impl<T> AsRef<T> for Located<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

/// Rango de posiciones dentro de una unidad.
#[derive(Clone)]
pub struct Location {
    source: Rc<Source>,
    range: Range<Position>,
}

impl Location {
    /// Rango que cubre desde el inicio de `from` hasta el final de `to`.
    pub fn span(from: Location, to: &Location) -> Self {
        Location {
            source: from.source,
            range: from.range.start..to.range.end,
        }
    }

    pub fn start(&self) -> Position {
        self.range.start
    }

    /// Primera posición fuera del rango.
    pub fn end(&self) -> Position {
        self.range.end
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    fn point(source: &Rc<Source>, at: Position) -> Self {
        Location {
            source: Rc::clone(source),
            range: at..at.step(' '),
        }
    }
}

impl Display for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        let Range { start, end } = self.range;
        let single = end.line != start.line || end.column <= start.column + 1;

        if single {
            write!(formatter, "{}:{}", self.source.name, start)
        } else {
            let last = Position {
                column: end.column - 1,
                ..end
            };

            write!(formatter, "{}:[{}-{}]", self.source.name, start, last)
        }
    }
}

impl Debug for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, formatter)
    }
}

/// Línea y columna, ambas a partir de 1.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Position {
    line: u32,
    column: u32,
}

impl Position {
    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    /// Posición que sigue a `c`.
    fn step(self, c: char) -> Position {
        match c {
            '\n' => Position {
                line: self.line + 1,
                column: 1,
            },

            '\t' => Position {
                column: 1 + ((self.column - 1) / TAB_STOP + 1) * TAB_STOP,
                ..self
            },

            _ => Position {
                column: self.column + 1,
                ..self
            },
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position { line: 1, column: 1 }
    }
}

impl Display for Position {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.line, self.column)
    }
}

/// Texto completo de una unidad junto al nombre que la identifica.
pub struct Source {
    name: String,
    text: String,
}

impl Source {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Contenido de una línea sin su terminador.
    pub fn line(&self, number: u32) -> Option<&str> {
        let index = number.checked_sub(1)?;
        self.text.lines().nth(index as usize)
    }
}

/// Prepara el texto de una unidad para el lexer.
///
/// Devuelve la ubicación del primer carácter y el flujo de caracteres.
/// Los finales de línea `\r\n` se reducen a `\n`, y siempre se emite un
/// `\n` final aunque el texto no lo tenga.
pub fn consume<T, S>(text: T, name: S) -> (Location, impl InputStream)
where
    T: Into<String>,
    S: Into<String>,
{
    let mut text = text.into();
    if !text.ends_with('\n') {
        text.push('\n');
    }

    let source = Rc::new(Source {
        name: name.into(),
        text,
    });

    let start = Location::point(&source, Position::default());
    let cursor = Cursor {
        source,
        offset: 0,
        position: Position::default(),
    };

    (start, cursor)
}

/// Recorrido carácter por carácter de un [`Source`].
struct Cursor {
    source: Rc<Source>,
    offset: usize,
    position: Position,
}

impl Iterator for Cursor {
    type Item = (char, Location);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.source.text[self.offset..];
        let mut chars = rest.chars();

        let c = match chars.next()? {
            '\r' if chars.as_str().starts_with('\n') => {
                self.offset += 1;
                '\n'
            }

            c => c,
        };

        self.offset += c.len_utf8();
        self.position = self.position.step(c);

        Some((c, Location::point(&self.source, self.position)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_follow_lines_and_tabs() {
        let (start, stream) = consume("a\tb\r\nc", "<test>");
        assert_eq!(start.to_string(), "<test>:1:1");

        let chars: Vec<_> = stream.map(|(c, next)| (c, next.to_string())).collect();
        assert_eq!(
            chars,
            vec![
                ('a', "<test>:1:2".to_owned()),
                ('\t', "<test>:1:5".to_owned()),
                ('b', "<test>:1:6".to_owned()),
                ('\n', "<test>:2:1".to_owned()),
                ('c', "<test>:2:2".to_owned()),
                ('\n', "<test>:3:1".to_owned()),
            ]
        );
    }

    #[test]
    fn spans_and_lines() {
        let (start, stream) = consume("first\nsecond line\n", "unit.c");
        let locations: Vec<_> = stream.map(|(_, next)| next).collect();

        let word = Location::span(locations[5].clone(), &locations[11]);
        assert_eq!(word.to_string(), "unit.c:[2:1-2:6]");

        assert_eq!(start.source().line(2), Some("second line"));
        assert_eq!(start.source().line(3), None);
        assert_eq!(start.source().line(0), None);
    }
}
