//! Formato del contenedor de bytecode.
//!
//! Todos los enteros son little-endian. Una cadena (`str`) se
//! codifica como su longitud en bytes (`u32`) seguida de UTF-8.
//!
//! ```text
//! magic      "IFCB"
//! version    u32
//! counts     u32 constantes, u32 importaciones, u32 intrínsecos, u32 funciones
//! entry      i32 (índice de función, -1 si no hay)
//! constants  u8 tipo (0 angosta, 1 ancha), str o u32 unidades + UTF-16LE
//! imports    str nombre, str biblioteca, str exportación, u8 convención, u8 banderas, firma
//! intrinsics u16 id, str nombre
//! functions  str nombre, firma, u32 longitud, código
//! ```
//!
//! Una firma es un `u8` con el tipo de retorno ([`VOID`] si no hay),
//! un `u8` con la cantidad de parámetros y un `u8` por parámetro
//! ([`OPEN`] para arreglos abiertos).
//!
//! Este módulo también sabe leer un contenedor de vuelta, lo cual
//! utiliza el desensamblador.

use std::rc::Rc;

use thiserror::Error;

use crate::{
    ir::{
        Arithmetic, Callee, Comparison, Constant, Convention, Import, ImportFlags, Operand,
        PackElement, ParameterType, PrimitiveType, Signature,
    },
    lex::Identifier,
};

pub const MAGIC: &[u8; 4] = b"IFCB";
pub const VERSION: u32 = 1;

/// Tipo de retorno de una función sin valor.
pub const VOID: u8 = 0xFF;

/// Código de parámetro de arreglo abierto.
pub const OPEN: u8 = 0xFE;

pub mod opcode {
    pub const ASSIGN: u8 = 0x00;
    pub const CALCULATE: u8 = 0x01;
    pub const PUSH: u8 = 0x02;
    pub const PUSH_VAR: u8 = 0x03;
    pub const POP: u8 = 0x04;
    pub const CALL: u8 = 0x05;
    pub const JUMP: u8 = 0x06;
    pub const JUMP_NONZERO: u8 = 0x07;
    pub const JUMP_ZERO: u8 = 0x08;
    pub const RET: u8 = 0x09;
    pub const PUSH_TYPE: u8 = 0x0B;
    pub const COMPARE: u8 = 0x0C;
    pub const NEG: u8 = 0x10;
    pub const NOT: u8 = 0x15;
    pub const PUSH_PACK: u8 = 0x1B;
}

pub mod operand {
    pub const LOCAL: u8 = 0x00;
    pub const ARGUMENT: u8 = 0x01;
    pub const RESULT: u8 = 0x02;
    pub const INT: u8 = 0x03;
    pub const CONSTANT: u8 = 0x04;
}

pub mod callee {
    pub const INTRINSIC: u8 = 0;
    pub const IMPORT: u8 = 1;
    pub const LOCAL: u8 = 2;
}

pub const NARROW_CONSTANT: u8 = 0;
pub const WIDE_CONSTANT: u8 = 1;

/// Códigos de tipo según la numeración de PascalScript.
pub fn type_code(ty: PrimitiveType) -> u8 {
    use PrimitiveType::*;

    match ty {
        U8 => 1,
        S8 => 2,
        U16 => 3,
        S16 => 4,
        U32 => 5,
        S32 => 6,
        String => 10,
        Pointer => 13,
        S64 => 17,
        WideString => 28,
        U64 => 29,
        Boolean => 30,
    }
}

pub fn type_from_code(code: u8) -> Option<PrimitiveType> {
    use PrimitiveType::*;

    let ty = match code {
        1 => U8,
        2 => S8,
        3 => U16,
        4 => S16,
        5 => U32,
        6 => S32,
        10 => String,
        13 => Pointer,
        17 => S64,
        28 => WideString,
        29 => U64,
        30 => Boolean,
        _ => return None,
    };

    Some(ty)
}

pub fn convention_code(convention: Convention) -> u8 {
    match convention {
        Convention::Fastcall => 0,
        Convention::Pascal => 1,
        Convention::Cdecl => 2,
        Convention::Stdcall => 3,
    }
}

pub fn convention_from_code(code: u8) -> Option<Convention> {
    let convention = match code {
        0 => Convention::Fastcall,
        1 => Convention::Pascal,
        2 => Convention::Cdecl,
        3 => Convention::Stdcall,
        _ => return None,
    };

    Some(convention)
}

pub fn comparison_code(op: Comparison) -> u8 {
    match op {
        Comparison::Ge => 0,
        Comparison::Le => 1,
        Comparison::Gt => 2,
        Comparison::Lt => 3,
        Comparison::Ne => 4,
        Comparison::Eq => 5,
    }
}

pub fn comparison_from_code(code: u8) -> Option<Comparison> {
    let op = match code {
        0 => Comparison::Ge,
        1 => Comparison::Le,
        2 => Comparison::Gt,
        3 => Comparison::Lt,
        4 => Comparison::Ne,
        5 => Comparison::Eq,
        _ => return None,
    };

    Some(op)
}

/// Códigos de operación aritmética, en el orden de PascalScript.
pub fn arithmetic_code(op: Arithmetic) -> u8 {
    use Arithmetic::*;

    match op {
        Add => 0,
        Sub => 1,
        Mul => 2,
        Div => 3,
        Mod => 4,
        Shl => 5,
        Shr => 6,
        And => 7,
        Or => 8,
        Xor => 9,
    }
}

pub fn arithmetic_from_code(code: u8) -> Option<Arithmetic> {
    use Arithmetic::*;

    let op = match code {
        0 => Add,
        1 => Sub,
        2 => Mul,
        3 => Div,
        4 => Mod,
        5 => Shl,
        6 => Shr,
        7 => And,
        8 => Or,
        9 => Xor,
        _ => return None,
    };

    Some(op)
}

#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReadError {
    #[error("Unexpected end of container at offset {0:#x}")]
    Truncated(usize),

    #[error("Bad magic number, not a bytecode container")]
    BadMagic,

    #[error("Unsupported container version {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid UTF-8 string at offset {0:#x}")]
    BadString(usize),

    #[error("Invalid UTF-16 constant at offset {0:#x}")]
    BadWideString(usize),

    #[error("Unknown constant kind {0:#04x}")]
    BadConstantKind(u8),

    #[error("Unknown type code {0:#04x}")]
    BadTypeCode(u8),

    #[error("Unknown calling convention {0:#04x}")]
    BadConvention(u8),

    #[error("Unknown import flags {0:#04x}")]
    BadFlags(u8),

    #[error("Unknown opcode {opcode:#04x} at code offset {offset:#x}")]
    BadOpcode { offset: usize, opcode: u8 },

    #[error("Unknown operand tag {0:#04x}")]
    BadOperand(u8),

    #[error("Unknown comparison {0:#04x}")]
    BadComparison(u8),

    #[error("Unknown arithmetic operation {0:#04x}")]
    BadArithmetic(u8),

    #[error("Unknown call kind {0:#04x}")]
    BadCallKind(u8),

    #[error("Trailing bytes after the last function")]
    TrailingBytes,
}

/// Instrucción decodificada, con destinos de salto ya resueltos.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
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

    Neg(Operand),
    Not(Operand),
    Call(Callee),
    Jump(u32),
    JumpIfZero(Operand, u32),
    JumpIfNonZero(Operand, u32),
    Ret,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntrinsicEntry {
    pub id: u16,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionEntry {
    pub name: String,
    pub signature: Signature,

    /// Instrucciones con su desplazamiento dentro del código.
    pub code: Vec<(u32, Op)>,
}

/// Un contenedor leído de vuelta.
#[derive(Clone, Debug)]
pub struct Container {
    pub version: u32,
    pub entry: Option<u32>,
    pub constants: Vec<Constant>,
    pub imports: Vec<Import>,
    pub intrinsics: Vec<IntrinsicEntry>,
    pub functions: Vec<FunctionEntry>,
}

impl Container {
    pub fn read(bytes: &[u8]) -> Result<Self, ReadError> {
        let mut cursor = Cursor { bytes, offset: 0 };

        if cursor.take(MAGIC.len())? != &MAGIC[..] {
            return Err(ReadError::BadMagic);
        }

        let version = cursor.u32()?;
        if version != VERSION {
            return Err(ReadError::UnsupportedVersion(version));
        }

        let constant_count = cursor.u32()?;
        let import_count = cursor.u32()?;
        let intrinsic_count = cursor.u32()?;
        let function_count = cursor.u32()?;

        let entry = match cursor.i32()? {
            -1 => None,
            entry => Some(entry as u32),
        };

        let constants = (0..constant_count)
            .map(|_| cursor.constant())
            .collect::<Result<_, _>>()?;

        let imports = (0..import_count)
            .map(|_| cursor.import())
            .collect::<Result<_, _>>()?;

        let intrinsics = (0..intrinsic_count)
            .map(|_| -> Result<_, ReadError> {
                Ok(IntrinsicEntry {
                    id: cursor.u16()?,
                    name: cursor.str()?,
                })
            })
            .collect::<Result<_, _>>()?;

        let functions = (0..function_count)
            .map(|_| cursor.function())
            .collect::<Result<_, _>>()?;

        if cursor.offset != bytes.len() {
            return Err(ReadError::TrailingBytes);
        }

        Ok(Container {
            version,
            entry,
            constants,
            imports,
            intrinsics,
            functions,
        })
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, length: usize) -> Result<&'a [u8], ReadError> {
        let end = self
            .offset
            .checked_add(length)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(ReadError::Truncated(self.offset))?;

        let bytes = &self.bytes[self.offset..end];
        self.offset = end;

        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ReadError> {
        let offset = self.offset;
        self.take(N)?
            .try_into()
            .map_err(|_| ReadError::Truncated(offset))
    }

    fn u8(&mut self) -> Result<u8, ReadError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, ReadError> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32, ReadError> {
        self.array().map(u32::from_le_bytes)
    }

    fn i32(&mut self) -> Result<i32, ReadError> {
        self.array().map(i32::from_le_bytes)
    }

    fn str(&mut self) -> Result<String, ReadError> {
        let offset = self.offset;
        let length = self.u32()? as usize;
        let bytes = self.take(length)?;

        String::from_utf8(bytes.to_vec()).map_err(|_| ReadError::BadString(offset))
    }

    fn primitive(&mut self) -> Result<PrimitiveType, ReadError> {
        let code = self.u8()?;
        type_from_code(code).ok_or(ReadError::BadTypeCode(code))
    }

    fn constant(&mut self) -> Result<Constant, ReadError> {
        match self.u8()? {
            NARROW_CONSTANT => Ok(Constant::Narrow(self.str()?.into())),

            WIDE_CONSTANT => {
                let offset = self.offset;
                let units = self.u32()? as usize;
                let units = (0..units)
                    .map(|_| self.u16())
                    .collect::<Result<Vec<_>, _>>()?;

                let string =
                    String::from_utf16(&units).map_err(|_| ReadError::BadWideString(offset))?;
                Ok(Constant::Wide(string.into()))
            }

            kind => Err(ReadError::BadConstantKind(kind)),
        }
    }

    fn import(&mut self) -> Result<Import, ReadError> {
        let name = Identifier::new(&self.str()?);
        let library: Rc<str> = self.str()?.into();
        let export: Rc<str> = self.str()?.into();

        let code = self.u8()?;
        let convention = convention_from_code(code).ok_or(ReadError::BadConvention(code))?;

        let bits = self.u8()?;
        let flags = ImportFlags::from_bits(bits).ok_or(ReadError::BadFlags(bits))?;

        Ok(Import {
            name,
            library,
            export,
            convention,
            flags,
            signature: self.signature()?,
        })
    }

    fn signature(&mut self) -> Result<Signature, ReadError> {
        let returns = match self.u8()? {
            VOID => None,
            code => Some(type_from_code(code).ok_or(ReadError::BadTypeCode(code))?),
        };

        let count = self.u8()?;
        let parameters = (0..count)
            .map(|_| -> Result<_, ReadError> {
                match self.u8()? {
                    OPEN => Ok(ParameterType::Open),
                    code => type_from_code(code)
                        .map(ParameterType::Value)
                        .ok_or(ReadError::BadTypeCode(code)),
                }
            })
            .collect::<Result<_, _>>()?;

        Ok(Signature { returns, parameters })
    }

    fn function(&mut self) -> Result<FunctionEntry, ReadError> {
        let name = self.str()?;
        let signature = self.signature()?;

        let length = self.u32()? as usize;
        let code = self.take(length)?;

        let mut code_cursor = Cursor {
            bytes: code,
            offset: 0,
        };

        let mut ops = Vec::new();
        while code_cursor.offset < code.len() {
            let offset = code_cursor.offset as u32;
            ops.push((offset, code_cursor.op()?));
        }

        Ok(FunctionEntry {
            name,
            signature,
            code: ops,
        })
    }

    fn op(&mut self) -> Result<Op, ReadError> {
        let offset = self.offset;

        let op = match self.u8()? {
            opcode::ASSIGN => Op::Assign(self.operand()?, self.operand()?),

            opcode::CALCULATE => {
                let code = self.u8()?;
                let op = arithmetic_from_code(code).ok_or(ReadError::BadArithmetic(code))?;

                Op::Calculate {
                    op,
                    into: self.operand()?,
                    value: self.operand()?,
                }
            }

            opcode::PUSH => Op::Push(self.operand()?),
            opcode::PUSH_VAR => Op::PushVar(self.operand()?),
            opcode::POP => Op::Pop,

            opcode::CALL => {
                let kind = self.u8()?;
                let index = self.u16()? as u32;

                let callee = match kind {
                    callee::INTRINSIC => Callee::Intrinsic(index),
                    callee::IMPORT => Callee::Import(index),
                    callee::LOCAL => Callee::Local(index),
                    kind => return Err(ReadError::BadCallKind(kind)),
                };

                Op::Call(callee)
            }

            opcode::JUMP => Op::Jump(self.u32()?),
            opcode::JUMP_NONZERO => Op::JumpIfNonZero(self.operand()?, self.u32()?),
            opcode::JUMP_ZERO => Op::JumpIfZero(self.operand()?, self.u32()?),
            opcode::RET => Op::Ret,
            opcode::PUSH_TYPE => Op::PushType(self.primitive()?),
            opcode::NEG => Op::Neg(self.operand()?),
            opcode::NOT => Op::Not(self.operand()?),

            opcode::COMPARE => {
                let code = self.u8()?;
                let op = comparison_from_code(code).ok_or(ReadError::BadComparison(code))?;

                Op::Compare {
                    op,
                    into: self.operand()?,
                    lhs: self.operand()?,
                    rhs: self.operand()?,
                }
            }

            opcode::PUSH_PACK => {
                let count = self.u16()?;
                let elements = (0..count)
                    .map(|_| -> Result<_, ReadError> {
                        Ok(PackElement {
                            tag: self.primitive()?,
                            value: self.operand()?,
                        })
                    })
                    .collect::<Result<_, _>>()?;

                Op::PushPack(elements)
            }

            opcode => return Err(ReadError::BadOpcode { offset, opcode }),
        };

        Ok(op)
    }

    fn operand(&mut self) -> Result<Operand, ReadError> {
        let operand = match self.u8()? {
            operand::LOCAL => Operand::Local(self.u32()?),
            operand::ARGUMENT => Operand::Argument(self.u32()?),
            operand::RESULT => Operand::Result,
            operand::CONSTANT => Operand::Constant(self.u16()? as u32),

            operand::INT => {
                let ty = self.primitive()?;
                let bytes = self.take(ty.width())?;

                let mut buffer = [0; 16];
                buffer[..bytes.len()].copy_from_slice(bytes);
                let unsigned = u128::from_le_bytes(buffer);

                // Extensión de signo según el ancho del tipo
                let value = match ty.range() {
                    Some((min, _)) if min < 0 => {
                        let shift = 128 - 8 * bytes.len() as u32;
                        ((unsigned << shift) as i128) >> shift
                    }

                    _ => unsigned as i128,
                };

                Operand::Int { ty, value }
            }

            tag => return Err(ReadError::BadOperand(tag)),
        };

        Ok(operand)
    }
}
