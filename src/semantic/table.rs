//! Tabla de símbolos de una unidad.
//!
//! Existe un único espacio de nombres plano por unidad, donde
//! conviven alias de tipos, constantes de enumeraciones y funciones.

use std::collections::HashMap;

use super::{binding, lower, Binding, Semantic, SemanticError};
use crate::{
    ir::{self, ParameterType, PrimitiveType, Signature},
    lex::Identifier,
    parse::{self, Attribute, Base, Builtin, EnumMember, Expr, TypeSpec},
    source::{Located, Location},
};

/// Tipo canónico de una declaración.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Void,
    Value(PrimitiveType),

    /// Marcador de arreglo abierto de constantes.
    Open,
}

/// Destino de un `typedef`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeBinding {
    Alias(Identifier),
    Resolved(Type),
}

#[derive(Debug)]
pub enum Symbol {
    Type(TypeBinding),
    Constant(i128),
    Function(usize),
}

#[derive(Debug)]
pub struct FunctionEntry {
    pub name: Located<Identifier>,
    pub signature: Signature,
    pub binding: Binding,

    /// Índice en la tabla de importaciones o de funciones locales,
    /// según el binding. No se usa para intrínsecos.
    pub index: u32,

    pub defined: bool,
}

#[derive(Default)]
pub struct SymbolTable {
    symbols: HashMap<Identifier, Symbol>,
    functions: Vec<FunctionEntry>,
    imports: u32,
    locals: u32,
}

impl SymbolTable {
    pub fn lookup(&self, name: &Identifier) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn function(&self, name: &Identifier) -> Option<&FunctionEntry> {
        match self.symbols.get(name) {
            Some(Symbol::Function(index)) => self.functions.get(*index),
            _ => None,
        }
    }

    pub fn function_at(&self, index: usize) -> &FunctionEntry {
        &self.functions[index]
    }

    /// Funciones locales en orden de índice.
    pub fn locals(&self) -> impl Iterator<Item = &FunctionEntry> {
        self.functions
            .iter()
            .filter(|entry| entry.binding == Binding::Local)
    }

    /// Tabla de importaciones en orden de declaración.
    pub fn imports(&self) -> impl Iterator<Item = ir::Import> + '_ {
        self.functions.iter().filter_map(|entry| match &entry.binding {
            Binding::Import(import) => Some(ir::Import {
                name: entry.name.val().clone(),
                library: import.library.clone(),
                export: import.export.clone(),
                convention: import.convention,
                flags: import.flags,
                signature: entry.signature.clone(),
            }),

            _ => None,
        })
    }

    /// Registra un `typedef` del AST.
    pub fn define(&mut self, typedef: &parse::Typedef) -> Semantic<()> {
        let target = match (typedef.of.val(), typedef.attributes.is_empty(), typedef.array) {
            (TypeSpec::Named(id), true, false) => TypeBinding::Alias(id.clone()),
            _ => TypeBinding::Resolved(self.declarator_type(
                &typedef.of,
                &typedef.attributes,
                typedef.array,
            )?),
        };

        self.define_typedef(&typedef.name, target, typedef.of.location())
    }

    /// Liga `alias` a `target`.
    ///
    /// Repetir un `typedef` con el mismo destino canónico es
    /// válido y conserva la primera definición.
    pub fn define_typedef(
        &mut self,
        alias: &Located<Identifier>,
        target: TypeBinding,
        at: &Location,
    ) -> Semantic<()> {
        let canonical = self.canonical(&target, at)?;

        match self.symbols.get(alias.val()) {
            Some(Symbol::Type(existing)) => {
                if self.canonical(existing, alias.location())? == canonical {
                    Ok(())
                } else {
                    Err(redefinition(alias))
                }
            }

            Some(_) => Err(redefinition(alias)),

            None => {
                self.symbols.insert(alias.val().clone(), Symbol::Type(target));
                Ok(())
            }
        }
    }

    /// Resuelve un nombre de tipo hasta su forma canónica.
    pub fn resolve(&self, name: &Located<Identifier>) -> Semantic<Type> {
        let unknown = || {
            Located::at(
                SemanticError::UnknownType(name.val().clone()),
                name.location().clone(),
            )
        };

        let mut current = name.val();

        // Una cadena más larga que la tabla solo puede ser un ciclo
        for _ in 0..=self.symbols.len() {
            match self.symbols.get(current) {
                Some(Symbol::Type(TypeBinding::Resolved(ty))) => return Ok(*ty),
                Some(Symbol::Type(TypeBinding::Alias(next))) => current = next,
                _ => return Err(unknown()),
            }
        }

        Err(unknown())
    }

    fn canonical(&self, binding: &TypeBinding, at: &Location) -> Semantic<Type> {
        match binding {
            TypeBinding::Resolved(ty) => Ok(*ty),
            TypeBinding::Alias(name) => self.resolve(&Located::at(name.clone(), at.clone())),
        }
    }

    /// Tipo de un especificador sin modificadores de declarador.
    pub fn resolve_spec(&self, spec: &Located<TypeSpec>) -> Semantic<Type> {
        self.resolve_spec_at(spec.val(), spec.location())
    }

    fn resolve_spec_at(&self, spec: &TypeSpec, at: &Location) -> Semantic<Type> {
        match spec {
            TypeSpec::Builtin(builtin) => Ok(builtin_type(*builtin)),
            TypeSpec::Named(name) => self.resolve(&Located::at(name.clone(), at.clone())),

            TypeSpec::Pointer(inner) => {
                self.resolve_spec_at(inner, at)?;
                Ok(Type::Value(PrimitiveType::Pointer))
            }
        }
    }

    /// Tipo de un declarador, considerando `__open` y `[]`.
    pub fn declarator_type(
        &self,
        of: &Located<TypeSpec>,
        attributes: &[Located<Attribute>],
        array: bool,
    ) -> Semantic<Type> {
        let mut open = false;
        for attribute in attributes {
            let Attribute { name, args } = attribute.val();
            match name.val().as_ref() {
                "__open" if args.is_empty() => open = true,

                "__open" => {
                    return Err(Located::at(
                        SemanticError::AttributeArity {
                            attribute: name.val().clone(),
                            expected: "no",
                            found: args.len(),
                        },
                        attribute.location().clone(),
                    ))
                }

                other if binding::is_function_attribute(other) => {
                    return Err(Located::at(
                        SemanticError::MisplacedAttribute(name.val().clone()),
                        name.location().clone(),
                    ))
                }

                _ => {
                    return Err(Located::at(
                        SemanticError::UnknownAttribute(name.val().clone()),
                        name.location().clone(),
                    ))
                }
            }
        }

        let base = self.resolve_spec(of)?;
        match (open, array) {
            (true, true) => Ok(Type::Open),
            (false, false) => Ok(base),
            (true, false) => Err(Located::at(
                SemanticError::MisplacedOpenArray,
                of.location().clone(),
            )),

            (false, true) => Err(Located::at(
                SemanticError::UnsupportedArray,
                of.location().clone(),
            )),
        }
    }

    /// Registra los miembros de una enumeración.
    ///
    /// Un miembro sin valor explícito toma el valor anterior más uno,
    /// iniciando en cero.
    pub fn define_enum(&mut self, members: &[EnumMember]) -> Semantic<()> {
        let mut next = 0;

        for member in members {
            let value = match &member.value {
                Some(expr) => self.constant_value(expr)?,
                None => next,
            };

            let name = member.name.val();
            if self.symbols.contains_key(name) {
                return Err(Located::at(
                    SemanticError::DuplicateEnumMember(name.clone()),
                    member.name.location().clone(),
                ));
            }

            self.symbols.insert(name.clone(), Symbol::Constant(value));
            next = value + 1;
        }

        Ok(())
    }

    fn constant_value(&self, expr: &Located<Expr>) -> Semantic<i128> {
        let at = |error| Located::at(error, expr.location().clone());

        match expr.val() {
            Expr::Integer(integer) => Ok(*integer as i128),
            Expr::Negate(inner) => self.constant_value(inner).map(|value| -value),
            Expr::Complement(inner) => self.constant_value(inner).map(|value| !value),
            Expr::Not(inner) => self.constant_value(inner).map(|value| i128::from(value == 0)),

            Expr::Arith(lhs, op, rhs) => {
                let lhs = self.constant_value(lhs)?;
                let rhs = self.constant_value(rhs)?;
                lower::fold(*op, lhs, rhs).map_err(at)
            }

            Expr::Name(name) => match self.symbols.get(name) {
                Some(Symbol::Constant(value)) => Ok(*value),
                None => Err(at(SemanticError::Undefined(name.clone()))),
                Some(_) => Err(at(SemanticError::ExpectedConstant)),
            },

            _ => Err(at(SemanticError::ExpectedConstant)),
        }
    }

    /// Registra una declaración o definición de función.
    ///
    /// Las declaraciones repetidas se combinan siempre que
    /// coincidan en firma y binding. Solo puede existir una
    /// definición.
    pub fn declare_function(&mut self, function: &parse::Function) -> Semantic<()> {
        let binding = binding::classify(function)?;
        let signature = self.signature(function)?;
        let defined = function.body.is_some();

        let name = &function.name;
        match self.symbols.get(name.val()) {
            Some(Symbol::Function(index)) => {
                let entry = &mut self.functions[*index];
                if entry.signature != signature || entry.binding != binding {
                    return Err(redefinition(name));
                } else if defined && entry.defined {
                    return Err(redefinition(name));
                }

                entry.defined |= defined;
                Ok(())
            }

            Some(_) => Err(redefinition(name)),

            None => {
                let index = match binding {
                    Binding::Import(_) => post_increment(&mut self.imports),
                    Binding::Local => post_increment(&mut self.locals),
                    Binding::Intrinsic(_) => 0,
                };

                self.symbols
                    .insert(name.val().clone(), Symbol::Function(self.functions.len()));

                self.functions.push(FunctionEntry {
                    name: name.clone(),
                    signature,
                    binding,
                    index,
                    defined,
                });

                Ok(())
            }
        }
    }

    fn signature(&self, function: &parse::Function) -> Semantic<Signature> {
        let returns = match self.resolve_spec(&function.returns)? {
            Type::Void => None,
            Type::Value(ty) => Some(ty),
            Type::Open => {
                return Err(Located::at(
                    SemanticError::MisplacedOpenArray,
                    function.returns.location().clone(),
                ))
            }
        };

        let last = function.parameters.len().saturating_sub(1);
        let parameters = function
            .parameters
            .iter()
            .enumerate()
            .map(|(index, parameter)| {
                let location = parameter.of.location().clone();
                match self.declarator_type(&parameter.of, &parameter.attributes, parameter.array)? {
                    Type::Value(ty) => Ok(ParameterType::Value(ty)),
                    Type::Open if index == last => Ok(ParameterType::Open),
                    Type::Open => Err(Located::at(SemanticError::MisplacedOpenArray, location)),
                    Type::Void => Err(Located::at(SemanticError::VoidValue, location)),
                }
            })
            .collect::<Semantic<Vec<_>>>()?;

        Ok(Signature { returns, parameters })
    }
}

fn builtin_type(Builtin { base, unsigned }: Builtin) -> Type {
    use PrimitiveType::*;

    let ty = match (base, unsigned) {
        (Base::Void, _) => return Type::Void,
        (Base::Bool, _) => Boolean,
        (Base::Char, false) => S8,
        (Base::Char, true) => U8,
        (Base::Short, false) => S16,
        (Base::Short, true) => U16,
        (Base::Int | Base::Long, false) => S32,
        (Base::Int | Base::Long, true) => U32,
        (Base::Int64, false) => S64,
        (Base::Int64, true) => U64,
        (Base::String, false) => String,
        (Base::String, true) => WideString,
    };

    Type::Value(ty)
}

fn redefinition(name: &Located<Identifier>) -> Located<SemanticError> {
    Located::at(
        SemanticError::Redefinition(name.val().clone()),
        name.location().clone(),
    )
}

fn post_increment(counter: &mut u32) -> u32 {
    let value = *counter;
    *counter += 1;
    value
}
