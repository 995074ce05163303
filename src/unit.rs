//! Unidades de compilación.
//!
//! Una unidad corresponde a un archivo fuente y produce exactamente un
//! archivo de salida, ya sea el contenedor binario o su listado
//! desensamblado. La salida se escribe primero a un archivo temporal
//! junto al destino y solo se renombra al destino final cuando la
//! emisión completa tuvo éxito.

use std::{
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    str,
};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    bytecode::Container,
    codegen::{self, EmitError, Limits},
    disasm,
    error::{Classify, Diagnostics, ErrorKind},
    ir,
    lex::Lexer,
    parse, semantic,
    source,
};

/// Formato del archivo de salida.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Contenedor de bytecode.
    Binary,

    /// Listado textual del contenedor.
    Disassembly,
}

/// Opciones que aplican a cada unidad.
#[derive(Clone, Debug)]
pub struct Options {
    pub entry: String,
    pub format: OutputFormat,
    pub limits: Limits,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            entry: semantic::Options::default().entry,
            format: OutputFormat::Binary,
            limits: Limits::default(),
        }
    }
}

/// Error de una unidad.
///
/// A diferencia de [`Diagnostics`], este tipo es `Send`: los
/// diagnósticos se dibujan antes de cruzar la frontera del hilo.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum UnitError {
    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{rendered}")]
    Compile { kind: ErrorKind, rendered: String },

    #[error("Failed to emit {}: {source}", path.display())]
    Emit {
        path: PathBuf,
        #[source]
        source: EmitError,
    },
}

impl UnitError {
    /// Categoría del primer error, si se trata de uno de compilación.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            UnitError::Io { .. } => None,
            UnitError::Compile { kind, .. } => Some(*kind),
            UnitError::Emit { source, .. } => Some(source.kind()),
        }
    }
}

/// Compila código fuente hasta IR.
///
/// Ver [`decode`] para obtener el texto a partir de otras codificaciones.
pub fn compile_source<T, S>(text: T, name: S, options: &Options) -> Result<ir::Program, Diagnostics>
where
    T: Into<String>,
    S: Into<String>,
{
    let (start, stream) = source::consume(text, name);

    let tokens = Lexer::new(start.clone(), stream)
        .try_exhaustive()
        .map_err(|error| Diagnostics::from(error).stage("lex"))?;

    let ast = parse::parse(tokens.iter(), start)
        .map_err(|error| Diagnostics::from(error).stage("parse"))?;

    let options = semantic::Options {
        entry: options.entry.clone(),
    };

    ast.resolve(&options)
        .map_err(|error| Diagnostics::from(error).stage("semantic"))
}

/// Compila un archivo y devuelve la salida completa en memoria.
pub fn compile_unit(input: &Path, options: &Options) -> Result<Vec<u8>, UnitError> {
    let io_error = |source| UnitError::Io {
        path: input.to_owned(),
        source,
    };

    let text = decode(&fs::read(input).map_err(io_error)?).map_err(io_error)?;
    let name = input.display().to_string();

    let program = compile_source(text, name, options).map_err(|diagnostics| {
        let kind = diagnostics.kinds().first().copied().unwrap_or(ErrorKind::Semantic);
        UnitError::Compile {
            kind,
            rendered: diagnostics.to_string(),
        }
    })?;

    let emit_error = |source| UnitError::Emit {
        path: input.to_owned(),
        source,
    };

    let mut bytes = Vec::new();
    codegen::emit_with(&program, &options.limits, &mut bytes).map_err(emit_error)?;

    match options.format {
        OutputFormat::Binary => Ok(bytes),

        OutputFormat::Disassembly => {
            // Se desensambla lo que efectivamente se emitió
            let container = Container::read(&bytes).map_err(|error| {
                io_error(io::Error::new(io::ErrorKind::InvalidData, error))
            })?;

            let mut listing = Vec::new();
            disasm::disassemble(&container, &mut listing).map_err(io_error)?;
            Ok(listing)
        }
    }
}

/// Compila `input` y escribe el resultado en `output`.
///
/// Si la compilación falla, `output` no se crea ni se modifica.
pub fn compile_file(input: &Path, output: &Path, options: &Options) -> Result<PathBuf, UnitError> {
    let bytes = compile_unit(input, options)?;

    let io_error = |source| UnitError::Io {
        path: output.to_owned(),
        source,
    };

    let mut file = Output::create(output).map_err(io_error)?;
    file.writer().write_all(&bytes).map_err(io_error)?;
    file.finish().map_err(io_error)?;

    info!(
        input = %input.display(),
        output = %output.display(),
        bytes = bytes.len(),
        "unit written"
    );
    Ok(output.to_owned())
}

/// Decodifica el contenido de un archivo fuente a UTF-8.
///
/// Un BOM UTF-8 se descarta. Los BOM de UTF-16 seleccionan el orden de
/// bytes correspondiente. Sin BOM se asume UTF-8.
pub fn decode(bytes: &[u8]) -> io::Result<String> {
    let invalid = |message: &str| io::Error::new(io::ErrorKind::InvalidData, message.to_owned());

    let wide = |bytes: &[u8], from: fn([u8; 2]) -> u16| {
        if bytes.len() % 2 != 0 {
            return Err(invalid("UTF-16 source has an odd number of bytes"));
        }

        let units = bytes.chunks_exact(2).map(|pair| from([pair[0], pair[1]]));
        char::decode_utf16(units)
            .collect::<Result<String, _>>()
            .map_err(|_| invalid("UTF-16 source contains an unpaired surrogate"))
    };

    let narrow = |bytes: &[u8]| {
        str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| invalid("Source is not valid UTF-8"))
    };

    match bytes {
        [0xef, 0xbb, 0xbf, rest @ ..] => {
            debug!("skipping UTF-8 byte order mark");
            narrow(rest)
        }

        [0xff, 0xfe, rest @ ..] => {
            debug!("decoding UTF-16LE source");
            wide(rest, u16::from_le_bytes)
        }

        [0xfe, 0xff, rest @ ..] => {
            debug!("decoding UTF-16BE source");
            wide(rest, u16::from_be_bytes)
        }

        _ => narrow(bytes),
    }
}

/// Archivo de salida pendiente de confirmar.
///
/// Se escribe a un temporal en el mismo directorio que el destino. Si se
/// descarta sin llamar a [`Output::finish()`], el temporal se elimina.
pub struct Output {
    path: PathBuf,
    temporary: BufWriter<NamedTempFile>,
}

impl Output {
    pub fn create(path: &Path) -> io::Result<Self> {
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let temporary = tempfile::Builder::new()
            .prefix(".ifpscc-")
            .tempfile_in(directory)?;

        Ok(Output {
            path: path.to_owned(),
            temporary: BufWriter::new(temporary),
        })
    }

    pub fn writer(&mut self) -> &mut impl Write {
        &mut self.temporary
    }

    /// Vacía los búferes y mueve el temporal a su destino.
    pub fn finish(self) -> io::Result<()> {
        let temporary = self.temporary.into_inner().map_err(|error| error.into_error())?;
        temporary.persist(&self.path).map_err(|error| error.error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = r#"
        typedef int s32;
        typedef unsigned char u8;
        typedef unsigned __String PWSTR;
        static s32 __attribute(__internal) MsgBox(PWSTR Text, s32 Type, s32 Buttons);

        u8 InitializeUninstall() {
            MsgBox(L"Hi", 0, 0);
            return 0;
        }
    "#;

    #[test]
    fn byte_order_marks() {
        let mut utf8 = vec![0xef, 0xbb, 0xbf];
        utf8.extend_from_slice("int x;".as_bytes());
        assert_eq!(decode(&utf8).unwrap(), "int x;");

        let mut le = vec![0xff, 0xfe];
        le.extend("añ".encode_utf16().flat_map(u16::to_le_bytes));
        assert_eq!(decode(&le).unwrap(), "añ");

        let mut be = vec![0xfe, 0xff];
        be.extend("añ".encode_utf16().flat_map(u16::to_be_bytes));
        assert_eq!(decode(&be).unwrap(), "añ");

        assert!(decode(&[0xff, 0xfe, 0x41]).is_err());
        assert!(decode(&[0xc3]).is_err());
    }

    #[test]
    fn source_to_program() {
        let program = compile_source(HELLO, "hello.c", &Options::default())
            .unwrap_or_else(|diagnostics| panic!("{}", diagnostics));

        assert_eq!(program.intrinsics.len(), 1);
        assert_eq!(program.entry, Some(0));
    }

    #[test]
    fn diagnostics_carry_the_stage() {
        let diagnostics = compile_source("int x(", "bad.c", &Options::default())
            .err()
            .expect("parsing should fail");

        assert_eq!(diagnostics.kinds(), vec![ErrorKind::Parse]);
        assert!(diagnostics.to_string().starts_with("parse[ParseError]"));
    }

    #[test]
    fn dropped_output_leaves_nothing() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("out.bin");

        let mut output = Output::create(&path).unwrap();
        output.writer().write_all(b"partial").unwrap();
        drop(output);

        assert!(!path.exists());
        assert_eq!(fs::read_dir(directory.path()).unwrap().count(), 0);
    }

    #[test]
    fn finished_output_is_persisted() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("out.bin");

        let mut output = Output::create(&path).unwrap();
        output.writer().write_all(b"IFCB").unwrap();
        output.finish().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"IFCB");
    }
}
