//! Reporte de errores.
//!
//! Todas las fases delanteras producen errores con ubicación
//! ([`Located`]). Este módulo los agrupa en [`Diagnostics`], que
//! además de clasificar cada error según [`ErrorKind`] sabe
//! dibujarlos con el extracto de código fuente correspondiente.

use crate::source::{Located, Location};
use std::{
    error::Error,
    fmt::{self, Display},
};

/// Categoría de un error de compilación.
///
/// Es estable y observable desde afuera, a diferencia del texto
/// del mensaje.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Lex,
    Parse,
    Redefinition,
    UnknownType,
    DuplicateEnumMember,
    UnknownIntrinsic,
    ConflictingBinding,
    UnresolvedCall,
    LiteralRange,
    ConstantPoolOverflow,
    MissingEntryPoint,

    /// Cualquier otro error semántico sin categoría propia.
    Semantic,
}

impl Display for ErrorKind {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Lex => "LexError",
            ErrorKind::Parse => "ParseError",
            ErrorKind::Redefinition => "Redefinition",
            ErrorKind::UnknownType => "UnknownType",
            ErrorKind::DuplicateEnumMember => "DuplicateEnumMember",
            ErrorKind::UnknownIntrinsic => "UnknownIntrinsic",
            ErrorKind::ConflictingBinding => "ConflictingBinding",
            ErrorKind::UnresolvedCall => "UnresolvedCall",
            ErrorKind::LiteralRange => "LiteralRange",
            ErrorKind::ConstantPoolOverflow => "ConstantPoolOverflow",
            ErrorKind::MissingEntryPoint => "MissingEntryPoint",
            ErrorKind::Semantic => "SemanticError",
        };

        fmt.write_str(name)
    }
}

/// Errores que conocen su propia categoría.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

mod sealed {
    pub trait Sealed {}
}

pub trait LocatedError: sealed::Sealed {
    fn source(&self) -> &(dyn Error + 'static);
    fn location(&self) -> &Location;
    fn kind(&self) -> ErrorKind;
}

pub struct Diagnostics {
    stage: &'static str,
    errors: Vec<Box<dyn 'static + LocatedError>>,
}

impl Diagnostics {
    /// Cambia el prefijo que se muestra antes de cada error.
    pub fn stage(self, stage: &'static str) -> Self {
        Diagnostics { stage, ..self }
    }

    /// Categorías de los errores reportados, en orden.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        self.errors.iter().map(|error| error.kind()).collect()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Diagnostics {
            stage: "error",
            errors: Default::default(),
        }
    }
}

impl<E: 'static + LocatedError> From<E> for Diagnostics {
    fn from(error: E) -> Self {
        Diagnostics {
            errors: vec![Box::new(error)],
            ..Default::default()
        }
    }
}

impl Display for Diagnostics {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Diagnostics { stage, errors } = self;

        if errors.is_empty() {
            return writeln!(fmt, "No errors were reported");
        }

        for error in errors {
            writeln!(fmt, "{}[{}]: {}", stage, error.kind(), error.source())?;

            let location = error.location();
            writeln!(fmt, " --> {}", location)?;

            let digits = location.end().line().to_string().chars().count();
            writeln!(fmt, "{:digits$} |", "", digits = digits)?;

            for line_number in location.start().line()..=location.end().line() {
                if let Some(line) = location.source().line(line_number) {
                    writeln!(fmt, "{:>digits$} | {}", line_number, line, digits = digits)?;
                }
            }

            let (from, to) = (
                location.start().column(),
                location.end().column().saturating_sub(1).max(1),
            );

            let min = from.min(to);
            let max = from.max(to);

            let skip = (min - 1) as usize;
            let highlight = (max - min + 1) as usize;

            writeln!(
                fmt,
                "{:digits$} | {:skip$}{:^<highlight$}",
                "",
                "",
                "",
                digits = digits,
                skip = skip,
                highlight = highlight
            )?;

            writeln!(fmt)?;
        }

        let error_or_errors = if errors.len() == 1 { "error" } else { "errors" };
        writeln!(
            fmt,
            "Build failed with {} {}",
            errors.len(),
            error_or_errors
        )
    }
}

impl<E: Error + Classify + 'static> sealed::Sealed for Located<E> {}

impl<E: Error + Classify + 'static> LocatedError for Located<E> {
    fn source(&self) -> &(dyn Error + 'static) {
        self.as_ref()
    }

    fn location(&self) -> &Location {
        Located::location(self)
    }

    fn kind(&self) -> ErrorKind {
        self.val().kind()
    }
}
