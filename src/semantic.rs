//! Análisis semántico.
//!
//! La resolución ocurre en dos pasadas sobre el AST. La primera
//! registra en orden todas las declaraciones de nivel superior en
//! una [`SymbolTable`]: alias de tipos, constantes de enumeraciones
//! y funciones con su [`Binding`]. La segunda pasada recorre los
//! cuerpos de las funciones definidas y los traduce a IR de pila.
//! Gracias a esto, el orden en que se declaran las funciones no
//! afecta a los sitios de llamada.

use thiserror::Error;
use tracing::debug;

use crate::{
    error::{Classify, ErrorKind},
    ir::{self, PrimitiveType},
    lex::Identifier,
    parse,
    source::Located,
};

mod binding;
mod lower;
mod table;

pub use binding::{intrinsic, Binding, NativeImport, INTRINSICS};
pub use table::{FunctionEntry, Symbol, SymbolTable, Type, TypeBinding};

pub type Semantic<T> = Result<T, Located<SemanticError>>;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SemanticError {
    #[error("Symbol `{0}` is already defined with a different meaning")]
    Redefinition(Identifier),

    #[error("Unknown type `{0}`")]
    UnknownType(Identifier),

    #[error("Duplicate enumeration member `{0}`")]
    DuplicateEnumMember(Identifier),

    #[error("`{0}` is not a known intrinsic")]
    UnknownIntrinsic(Identifier),

    #[error("Function `{0}` has conflicting bindings")]
    ConflictingBinding(Identifier),

    #[error("Call to undeclared function `{0}`")]
    UnresolvedCall(Identifier),

    #[error("Integer {value} is out of range for `{target}`")]
    LiteralRange { value: i128, target: PrimitiveType },

    #[error("Unknown attribute `{0}`")]
    UnknownAttribute(Identifier),

    #[error("Attribute `{0}` is not allowed here")]
    MisplacedAttribute(Identifier),

    #[error("Attribute `{attribute}` takes {expected} arguments, found {found}")]
    AttributeArity {
        attribute: Identifier,
        expected: &'static str,
        found: usize,
    },

    #[error("Attribute `{0}` expects string literals for library and export names")]
    AttributeArgument(Identifier),

    #[error("Unknown `__dll` option, expected `delayload` or `alteredsearchpath`")]
    UnknownDllOption,

    #[error("More than one calling convention was specified")]
    MultipleConventions,

    #[error("Function `{0}` is declared but never defined")]
    MissingDefinition(Identifier),

    #[error(
        "Open arrays require both `__attribute(__open)` and `[]`, \
         and may only appear as the last parameter"
    )]
    MisplacedOpenArray,

    #[error("Arrays are only supported as open arrays of const")]
    UnsupportedArray,

    #[error("Expression has no value")]
    VoidValue,

    #[error("Type mismatch: expected `{expected}`, found `{found}`")]
    TypeMismatch {
        expected: PrimitiveType,
        found: PrimitiveType,
    },

    #[error("Integer found where `{0}` was expected")]
    UnexpectedInteger(PrimitiveType),

    #[error("Function `{callee}` takes {expected} arguments, {found} were given")]
    ArgumentCount {
        callee: Identifier,
        expected: usize,
        found: usize,
    },

    #[error("Function `{callee}` takes at least {expected} arguments, {found} were given")]
    TooFewArguments {
        callee: Identifier,
        expected: usize,
        found: usize,
    },

    #[error("`{0}` is not a function")]
    NotCallable(Identifier),

    #[error("`{0}` is not a value")]
    NotAValue(Identifier),

    #[error("Symbol `{0}` is undefined")]
    Undefined(Identifier),

    #[error("Cannot assign to `{0}`")]
    NotAssignable(Identifier),

    #[error("Expected a constant integer expression")]
    ExpectedConstant,

    #[error("Operator `{op}` cannot be applied to `{ty}`")]
    InvalidOperand { op: &'static str, ty: PrimitiveType },

    #[error("Division by zero in a constant expression")]
    DivisionByZero,

    #[error("Constant expression overflows 64 bits")]
    ConstantOverflow,

    #[error("`{0}` outside of a loop")]
    OutsideLoop(&'static str),

    #[error("Function must return a value")]
    MissingReturnValue,

    #[error("Function returns `void` but a value was given")]
    UnexpectedReturnValue,

    #[error("Brace lists are only allowed as open array arguments")]
    UnexpectedPack,

    #[error("Entry point not found, define a function named `{0}`")]
    MissingEntryPoint(String),
}

impl Classify for SemanticError {
    fn kind(&self) -> ErrorKind {
        use SemanticError::*;

        match self {
            Redefinition(_) => ErrorKind::Redefinition,
            UnknownType(_) => ErrorKind::UnknownType,
            DuplicateEnumMember(_) => ErrorKind::DuplicateEnumMember,
            UnknownIntrinsic(_) => ErrorKind::UnknownIntrinsic,
            ConflictingBinding(_) => ErrorKind::ConflictingBinding,
            UnresolvedCall(_) => ErrorKind::UnresolvedCall,
            LiteralRange { .. } => ErrorKind::LiteralRange,
            MissingEntryPoint(_) => ErrorKind::MissingEntryPoint,
            _ => ErrorKind::Semantic,
        }
    }
}

/// Opciones de resolución.
#[derive(Clone, Debug)]
pub struct Options {
    /// Nombre de la función que se marca como punto de entrada.
    pub entry: String,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            entry: String::from("InitializeUninstall"),
        }
    }
}

impl parse::Ast {
    pub fn resolve(self, options: &Options) -> Semantic<ir::Program> {
        let mut table = SymbolTable::default();
        for declaration in &self.declarations {
            match declaration {
                parse::Declaration::Typedef(typedef) => table.define(typedef)?,
                parse::Declaration::Enum(enumeration) => table.define_enum(&enumeration.members)?,
                parse::Declaration::Function(function) => table.declare_function(function)?,
            }
        }

        let mut pools = lower::Pools::default();
        let mut lowered: Vec<Option<ir::Function>> = table.locals().map(|_| None).collect();

        for declaration in &self.declarations {
            let (function, body) = match declaration {
                parse::Declaration::Function(function) => match &function.body {
                    Some(body) => (function, body),
                    None => continue,
                },

                _ => continue,
            };

            let entry = match table.function(function.name.val()) {
                Some(entry) => entry,
                None => unreachable!("defined function was not declared"),
            };

            let code = lower::lower_function(&table, &mut pools, entry, function, body)?;
            lowered[entry.index as usize] = Some(code);
        }

        let functions = lowered
            .into_iter()
            .zip(table.locals())
            .map(|(function, entry)| {
                function.ok_or_else(|| {
                    Located::at(
                        SemanticError::MissingDefinition(entry.name.val().clone()),
                        entry.name.location().clone(),
                    )
                })
            })
            .collect::<Semantic<Vec<_>>>()?;

        let entry = match table.function(&Identifier::new(&options.entry)) {
            Some(FunctionEntry {
                binding: Binding::Local,
                index,
                ..
            }) => *index,

            _ => {
                return Err(Located::at(
                    SemanticError::MissingEntryPoint(options.entry.clone()),
                    self.eof,
                ))
            }
        };

        let imports = table.imports().collect::<Vec<_>>();
        let lower::Pools {
            constants,
            intrinsics,
            ..
        } = pools;

        debug!(
            constants = constants.len(),
            imports = imports.len(),
            intrinsics = intrinsics.len(),
            functions = functions.len(),
            "unit resolved"
        );

        Ok(ir::Program {
            constants,
            imports,
            intrinsics,
            functions,
            entry: Some(entry),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, source};

    pub(super) fn resolve_str(text: &str) -> Semantic<ir::Program> {
        let (start, stream) = source::consume(text, "<test>");
        let tokens = Lexer::new(start.clone(), stream)
            .try_exhaustive()
            .expect("lexing failed");

        let ast = parse::parse(tokens.iter(), start).expect("parsing failed");
        ast.resolve(&Options::default())
    }

    pub(super) const PRELUDE: &str = r#"
        typedef char s8;
        typedef unsigned char u8;
        typedef short s16;
        typedef int s32;
        typedef unsigned int u32;
        typedef __int64 s64;
        typedef unsigned __String PWSTR;
        typedef u8 BOOLEAN;
        typedef void * PVOID;
        typedef PVOID __attribute(__open) ArrOfConst[];
        enum { false = 0, true = 1 };
    "#;

    fn with_prelude(body: &str) -> String {
        format!("{}\n{}", PRELUDE, body)
    }

    #[test]
    fn missing_entry_point() {
        let error = resolve_str(&with_prelude("void f() {}")).err().expect("no entry point");
        assert!(matches!(
            error.val(),
            SemanticError::MissingEntryPoint(name) if name == "InitializeUninstall"
        ));
    }

    #[test]
    fn declared_but_never_defined() {
        let error = resolve_str(&with_prelude(
            "void helper(); BOOLEAN InitializeUninstall() { helper(); return true; }",
        ))
        .err()
        .expect("helper has no body");

        assert!(matches!(
            error.val(),
            SemanticError::MissingDefinition(name) if name.as_ref() == "helper"
        ));
    }

    #[test]
    fn forward_declaration_then_definition() {
        let program = resolve_str(&with_prelude(
            r#"
            void helper(s32 x);
            BOOLEAN InitializeUninstall() { helper(1); return true; }
            void helper(s32 x) { }
            "#,
        ))
        .expect("resolution failed");

        let names: Vec<_> = program
            .functions
            .iter()
            .map(|function| function.name.to_string())
            .collect();

        assert_eq!(names, vec!["helper", "InitializeUninstall"]);
        assert_eq!(program.entry, Some(1));
        assert!(program.functions[1].body.contains(&ir::Instruction::Call(ir::Callee::Local(0))));
    }

    #[test]
    fn conflicting_redeclaration() {
        let error = resolve_str(&with_prelude(
            "void helper(s32 x); void helper(u8 x); BOOLEAN InitializeUninstall() { return true; }",
        ))
        .err()
        .expect("signatures differ");

        assert!(matches!(error.val(), SemanticError::Redefinition(_)));
    }

    #[test]
    fn second_definition() {
        let error = resolve_str(&with_prelude(
            "BOOLEAN InitializeUninstall() { return true; } \
             BOOLEAN InitializeUninstall() { return false; }",
        ))
        .err()
        .expect("defined twice");

        assert!(matches!(error.val(), SemanticError::Redefinition(_)));
    }

    #[test]
    fn error_kinds() {
        assert_eq!(
            SemanticError::UnresolvedCall(Identifier::new("f")).kind(),
            ErrorKind::UnresolvedCall
        );

        assert_eq!(SemanticError::VoidValue.kind(), ErrorKind::Semantic);
    }
}
