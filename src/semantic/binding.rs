//! Clasificación de funciones según sus atributos.
//!
//! Toda función termina ligada a exactamente uno de tres destinos:
//! un intrínseco del host (`__internal`), una exportación de una
//! biblioteca nativa (`__dll`) o una función local con cuerpo.

use std::rc::Rc;

use tracing::{debug, warn};
use unicase::UniCase;

use super::{Semantic, SemanticError};
use crate::{
    ir::{Convention, ImportFlags, Intrinsic},
    lex::Identifier,
    parse::{self, Attribute, AttributeArg},
    source::{Located, Location},
};

/// Intrínsecos que el host expone, en orden de identificador.
pub const INTRINSICS: &[&str] = &[
    "MsgBox",
    "Format",
    "IntToStr",
    "StrToInt",
    "Length",
    "Copy",
    "Pos",
    "UpperCase",
    "LowerCase",
    "VarType",
    "SetArrayLength",
    "GetArrayLength",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Binding {
    Intrinsic(Intrinsic),
    Import(NativeImport),
    Local,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeImport {
    pub library: Rc<str>,
    pub export: Rc<str>,
    pub convention: Convention,
    pub flags: ImportFlags,
}

/// Busca un intrínseco por nombre, sin distinguir mayúsculas.
pub fn intrinsic(name: &str) -> Option<Intrinsic> {
    let name = UniCase::new(name);
    INTRINSICS
        .iter()
        .position(|candidate| UniCase::new(*candidate) == name)
        .map(|id| Intrinsic {
            id: id as u16,
            name: INTRINSICS[id],
        })
}

pub(super) fn is_function_attribute(name: &str) -> bool {
    name == "__internal" || name == "__dll" || convention(name).is_some()
}

fn convention(name: &str) -> Option<Convention> {
    let convention = match name {
        "__fastcall" => Convention::Fastcall,
        "__pascal" => Convention::Pascal,
        "__cdecl" => Convention::Cdecl,
        "__stdcall" => Convention::Stdcall,
        _ => return None,
    };

    Some(convention)
}

pub(super) fn classify(function: &parse::Function) -> Semantic<Binding> {
    let name = &function.name;

    let mut internal = false;
    let mut dll: Option<NativeImport> = None;
    let mut conflicting = false;
    let mut calling: Option<Convention> = None;

    for attribute in &function.attributes {
        let Attribute {
            name: attribute_name,
            args,
        } = attribute.val();

        match attribute_name.val().as_ref() {
            "__internal" => {
                expect_no_args(attribute)?;
                conflicting |= internal || dll.is_some();
                internal = true;
            }

            "__dll" => {
                conflicting |= internal || dll.is_some();
                dll = Some(native_import(attribute_name, args, attribute.location())?);
            }

            "__open" => {
                return Err(Located::at(
                    SemanticError::MisplacedAttribute(attribute_name.val().clone()),
                    attribute_name.location().clone(),
                ))
            }

            other => match convention(other) {
                Some(_) if calling.is_some() => {
                    return Err(Located::at(
                        SemanticError::MultipleConventions,
                        attribute.location().clone(),
                    ))
                }

                Some(convention) => {
                    expect_no_args(attribute)?;
                    calling = Some(convention);
                }

                None => {
                    return Err(Located::at(
                        SemanticError::UnknownAttribute(attribute_name.val().clone()),
                        attribute_name.location().clone(),
                    ))
                }
            },
        }
    }

    let conflict = || {
        Located::at(
            SemanticError::ConflictingBinding(name.val().clone()),
            name.location().clone(),
        )
    };

    let external = internal || dll.is_some();
    if conflicting || (external && function.body.is_some()) {
        return Err(conflict());
    }

    let binding = match (internal, dll) {
        (true, _) => {
            let intrinsic = intrinsic(name.val().as_ref()).ok_or_else(|| {
                Located::at(
                    SemanticError::UnknownIntrinsic(name.val().clone()),
                    name.location().clone(),
                )
            })?;

            if let Some(convention) = calling {
                warn!(
                    function = %name.val(),
                    %convention,
                    "calling convention ignored on intrinsic"
                );
            }

            Binding::Intrinsic(intrinsic)
        }

        (false, Some(mut import)) => {
            if let Some(convention) = calling {
                import.convention = convention;
            }

            Binding::Import(import)
        }

        (false, None) => {
            if let Some(convention) = calling {
                warn!(
                    function = %name.val(),
                    %convention,
                    "calling convention ignored on local function"
                );
            }

            Binding::Local
        }
    };

    debug!(function = %name.val(), ?binding, "binding resolved");
    Ok(binding)
}

fn expect_no_args(attribute: &Located<Attribute>) -> Semantic<()> {
    let Attribute { name, args } = attribute.val();
    if args.is_empty() {
        Ok(())
    } else {
        Err(Located::at(
            SemanticError::AttributeArity {
                attribute: name.val().clone(),
                expected: "no",
                found: args.len(),
            },
            attribute.location().clone(),
        ))
    }
}

/// `__dll(library, export[, delayload][, alteredsearchpath])`
fn native_import(
    name: &Located<Identifier>,
    args: &[Located<AttributeArg>],
    location: &Location,
) -> Semantic<NativeImport> {
    if !(2..=4).contains(&args.len()) {
        return Err(Located::at(
            SemanticError::AttributeArity {
                attribute: name.val().clone(),
                expected: "2 to 4",
                found: args.len(),
            },
            location.clone(),
        ));
    }

    let string = |arg: &Located<AttributeArg>| match arg.val() {
        AttributeArg::Str(string) => Ok(string.clone()),
        _ => Err(Located::at(
            SemanticError::AttributeArgument(name.val().clone()),
            arg.location().clone(),
        )),
    };

    let library = string(&args[0])?;
    let export = string(&args[1])?;

    let mut flags = ImportFlags::empty();
    let is = |id: &Identifier, option: &str| UniCase::new(id.as_ref()) == UniCase::new(option);

    for option in &args[2..] {
        let flag = match option.val() {
            AttributeArg::Id(id) if is(id, "delayload") => ImportFlags::DELAY_LOAD,
            AttributeArg::Id(id) if is(id, "alteredsearchpath") => ImportFlags::ALTERED_SEARCH_PATH,

            _ => {
                return Err(Located::at(
                    SemanticError::UnknownDllOption,
                    option.location().clone(),
                ))
            }
        };

        flags |= flag;
    }

    Ok(NativeImport {
        library,
        export,
        convention: Convention::Cdecl,
        flags,
    })
}
