//! Representación intermedia.
//!
//! El IR describe una unidad completa tal como la consumirá la
//! máquina virtual de pila: tablas de constantes, importaciones e
//! intrínsecos, y una lista de funciones locales con sus flujos de
//! instrucciones. Los saltos todavía se expresan con etiquetas
//! simbólicas, que [`crate::codegen`] traduce a desplazamientos.

use std::{
    fmt::{self, Display},
    rc::Rc,
};

use bitflags::bitflags;

use crate::lex::Identifier;

pub struct Program {
    pub constants: Vec<Constant>,
    pub imports: Vec<Import>,
    pub intrinsics: Vec<Intrinsic>,
    pub functions: Vec<Function>,
    pub entry: Option<u32>,
}

/// Una cadena literal del pool de constantes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Constant {
    Narrow(Rc<str>),
    Wide(Rc<str>),
}

/// Una exportación de biblioteca nativa.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Import {
    pub name: Identifier,
    pub library: Rc<str>,
    pub export: Rc<str>,
    pub convention: Convention,
    pub flags: ImportFlags,
    pub signature: Signature,
}

/// Referencia a un intrínseco del host.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Intrinsic {
    pub id: u16,
    pub name: &'static str,
}

pub struct Function {
    pub name: Identifier,
    pub signature: Signature,
    pub body: Vec<Instruction>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub returns: Option<PrimitiveType>,
    pub parameters: Vec<ParameterType>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParameterType {
    Value(PrimitiveType),

    /// Arreglo abierto de constantes heterogéneas.
    Open,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    S8,
    U8,
    S16,
    U16,
    S32,
    U32,
    S64,
    U64,
    Pointer,
    String,
    WideString,
    Boolean,
}

impl PrimitiveType {
    pub fn is_integer(self) -> bool {
        use PrimitiveType::*;
        matches!(self, S8 | U8 | S16 | U16 | S32 | U32 | S64 | U64)
    }

    pub fn is_string(self) -> bool {
        matches!(self, PrimitiveType::String | PrimitiveType::WideString)
    }

    /// Rango de valores enteros representables, si aplica.
    pub fn range(self) -> Option<(i128, i128)> {
        use PrimitiveType::*;

        let range = match self {
            S8 => (i8::MIN.into(), i8::MAX.into()),
            U8 | Boolean => (0, u8::MAX.into()),
            S16 => (i16::MIN.into(), i16::MAX.into()),
            U16 => (0, u16::MAX.into()),
            S32 => (i32::MIN.into(), i32::MAX.into()),
            U32 | Pointer => (0, u32::MAX.into()),
            S64 => (i64::MIN.into(), i64::MAX.into()),
            U64 => (0, u64::MAX.into()),
            String | WideString => return None,
        };

        Some(range)
    }

    /// Ancho en bytes de un valor inmediato de este tipo.
    pub fn width(self) -> usize {
        use PrimitiveType::*;

        match self {
            S8 | U8 | Boolean => 1,
            S16 | U16 => 2,
            S32 | U32 | Pointer => 4,
            S64 | U64 => 8,
            String | WideString => 0,
        }
    }
}

impl Display for PrimitiveType {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use PrimitiveType::*;

        let name = match self {
            S8 => "s8",
            U8 => "u8",
            S16 => "s16",
            U16 => "u16",
            S32 => "s32",
            U32 => "u32",
            S64 => "s64",
            U64 => "u64",
            Pointer => "pointer",
            String => "string",
            WideString => "wide string",
            Boolean => "boolean",
        };

        fmt.write_str(name)
    }
}

/// Convención de llamada nativa de una importación.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Convention {
    Fastcall,
    Pascal,
    Cdecl,
    Stdcall,
}

impl Display for Convention {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Convention::Fastcall => "fastcall",
            Convention::Pascal => "pascal",
            Convention::Cdecl => "cdecl",
            Convention::Stdcall => "stdcall",
        };

        fmt.write_str(name)
    }
}

bitflags! {
    /// Opciones de carga de una biblioteca importada.
    pub struct ImportFlags: u8 {
        /// La biblioteca se carga en la primera llamada.
        const DELAY_LOAD = 0x01;

        /// Se busca la biblioteca con `LOAD_WITH_ALTERED_SEARCH_PATH`.
        const ALTERED_SEARCH_PATH = 0x02;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    /// Ranura de pila relativa a la base del marco.
    Local(u32),

    Argument(u32),

    /// Ranura de retorno de la función en curso.
    Result,

    Int { ty: PrimitiveType, value: i128 },

    Constant(u32),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackElement {
    pub tag: PrimitiveType,
    pub value: Operand,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Callee {
    Intrinsic(u32),
    Import(u32),
    Local(u32),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Comparison {
    Ge,
    Le,
    Gt,
    Lt,
    Ne,
    Eq,
}

/// Operación aritmética o de bits sobre una ranura, `into op= value`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Arithmetic {
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

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    PushType(PrimitiveType),
    Push(Operand),
    PushVar(Operand),
    PushPack(Vec<PackElement>),
    Pop,
    Assign(Operand, Operand),

    Compare {
        op: Comparison,
        into: Operand,
        lhs: Operand,
        rhs: Operand,
    },

    Calculate {
        op: Arithmetic,
        into: Operand,
        value: Operand,
    },

    /// Negación aritmética en sitio.
    Neg(Operand),

    /// Complemento de bits en sitio.
    Not(Operand),

    Call(Callee),
    SetLabel(Label),
    Jump(Label),
    JumpIfZero(Operand, Label),
    JumpIfNonZero(Operand, Label),
    Ret,
}
