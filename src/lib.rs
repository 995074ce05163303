//! Compilador de un dialecto de C hacia bytecode de una máquina
//! virtual de pila al estilo de PascalScript.
//!
//! # Front end
//! Cada unidad deriva de un único archivo de código fuente. Este
//! archivo se somete primero a análisis léxico en [`lex`], de lo cual
//! se obtiene un flujo de tokens. El flujo de tokens se dispone en un
//! AST por medio de análisis sintáctico en [`parse`]. El árbol
//! sintáctico es procesado por análisis semántico en [`semantic`]:
//! ahí se resuelven typedefs, enumeraciones y el enlace de cada
//! función (intrínseca, importación nativa o local) y se baja cada
//! cuerpo a la representación intermedia de [`ir`].
//!
//! # Back end
//! [`codegen`] serializa el IR en el contenedor binario que describe
//! [`bytecode`], el cual también sabe leerlo de vuelta para su
//! desensamblado en [`disasm`]. La orquestación de una unidad
//! completa, incluyendo la escritura atómica de la salida, ocurre
//! en [`unit`].

#[macro_use]
mod macros;

pub mod bytecode;
pub mod codegen;
pub mod disasm;
pub mod error;
pub mod ir;
pub mod lex;
pub mod parse;
pub mod semantic;
pub mod source;
pub mod unit;
