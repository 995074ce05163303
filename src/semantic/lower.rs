//! Traducción de cuerpos de función a IR de pila.
//!
//! Cada ranura de la pila del marco actual se direcciona por su
//! índice desde la base. El lowering lleva cuenta de la profundidad
//! de pila para saber qué ranura ocupa cada variable local y cada
//! temporal. Los temporales se liberan al final de cada sentencia y
//! las variables locales al final de su bloque.
//!
//! Una llamada sigue siempre la misma secuencia:
//!
//! 1. `pushtype R` reserva la ranura de retorno, si la hay.
//! 2. Se evalúan los argumentos. Las llamadas anidadas dejan su
//!    ranura de retorno en la pila como temporal.
//! 3. Se empujan los argumentos del último al primero, y un arreglo
//!    abierto como un único `pushpack`.
//! 4. `pushvar` empuja una referencia a la ranura de retorno.
//! 5. `call`, seguido de un `pop` por cada valor empujado en 3 y 4.

use std::{collections::HashMap, slice};

use super::{Binding, FunctionEntry, Semantic, SemanticError, Symbol, SymbolTable, Type};
use crate::{
    ir::{
        Arithmetic, Callee, Comparison, Constant, Function, Instruction, Intrinsic, Label,
        Operand, PackElement, ParameterType, PrimitiveType,
    },
    lex::{Identifier, Operator},
    parse::{self, CmpOp, Expr, LogicalOp, Statement},
    source::{Located, Location},
};

/// Tablas compartidas por todas las funciones de una unidad.
#[derive(Default)]
pub(super) struct Pools {
    pub constants: Vec<Constant>,
    pub intrinsics: Vec<Intrinsic>,
    interned: HashMap<Constant, u32>,
    used_intrinsics: HashMap<u16, u32>,
}

impl Pools {
    fn intern(&mut self, constant: Constant) -> u32 {
        let constants = &mut self.constants;
        *self.interned.entry(constant).or_insert_with_key(|constant| {
            constants.push(constant.clone());
            (constants.len() - 1) as u32
        })
    }

    fn intrinsic(&mut self, intrinsic: Intrinsic) -> u32 {
        let intrinsics = &mut self.intrinsics;
        *self
            .used_intrinsics
            .entry(intrinsic.id)
            .or_insert_with(|| {
                intrinsics.push(intrinsic);
                (intrinsics.len() - 1) as u32
            })
    }
}

pub(super) fn lower_function(
    table: &SymbolTable,
    pools: &mut Pools,
    entry: &FunctionEntry,
    definition: &parse::Function,
    body: &parse::Block,
) -> Semantic<Function> {
    let mut parameters = HashMap::new();
    let types = definition.parameters.iter().zip(&entry.signature.parameters);

    for (index, (parameter, ty)) in types.enumerate() {
        let name = match &parameter.name {
            Some(name) => name,
            None => continue,
        };

        let ty = match ty {
            ParameterType::Value(ty) => Type::Value(*ty),
            ParameterType::Open => Type::Open,
        };

        let variable = Variable {
            operand: Operand::Argument(index as u32),
            ty,
        };

        if parameters.insert(name.val().clone(), variable).is_some() {
            return Err(Located::at(
                SemanticError::Redefinition(name.val().clone()),
                name.location().clone(),
            ));
        }
    }

    let mut lowering = Lowering {
        table,
        pools,
        returns: entry.signature.returns,
        scopes: vec![parameters],
        loops: Vec::new(),
        body: Vec::new(),
        depth: 0,
        next_label: 0,
    };

    lowering.block(body)?;
    if lowering.body.last() != Some(&Instruction::Ret) {
        lowering.body.push(Instruction::Ret);
    }

    Ok(Function {
        name: entry.name.val().clone(),
        signature: entry.signature.clone(),
        body: lowering.body,
    })
}

#[derive(Clone)]
struct Variable {
    operand: Operand,
    ty: Type,
}

/// Resultado de evaluar una expresión.
enum Value {
    Void,

    /// Entero aún sin tipo, se fija al conocer su destino.
    Literal(i128),

    Typed(PrimitiveType, Operand),
}

/// Destinos de `break` y `continue` del ciclo más interno.
struct Loop {
    exit: Label,
    next: Label,

    /// Profundidad de pila al entrar al cuerpo.
    depth: u32,
}

struct Lowering<'a> {
    table: &'a SymbolTable,
    pools: &'a mut Pools,
    returns: Option<PrimitiveType>,
    scopes: Vec<HashMap<Identifier, Variable>>,
    loops: Vec<Loop>,
    body: Vec<Instruction>,
    depth: u32,
    next_label: u32,
}

impl Lowering<'_> {
    fn block(&mut self, statements: &[Located<Statement>]) -> Semantic<()> {
        let base = self.depth;
        self.scopes.push(HashMap::new());

        for statement in statements {
            self.statement(statement)?;
        }

        self.scopes.pop();
        self.pop_to(base);

        Ok(())
    }

    /// Cuerpo de un `if` o de un ciclo, siempre en su propio alcance.
    fn nested(&mut self, statement: &Located<Statement>) -> Semantic<()> {
        self.block(slice::from_ref(statement))
    }

    fn statement(&mut self, statement: &Located<Statement>) -> Semantic<()> {
        let base = self.depth;

        match statement.val() {
            Statement::Empty => (),
            Statement::Block(statements) => self.block(statements)?,

            Statement::Expr(expr) => {
                self.eval(expr)?;
            }

            Statement::Local { of, name, init } => {
                let misplaced = |error| Err(Located::at(error, of.location().clone()));
                let ty = match self.table.resolve_spec(of)? {
                    Type::Value(ty) => ty,
                    Type::Void => return misplaced(SemanticError::VoidValue),
                    Type::Open => return misplaced(SemanticError::MisplacedOpenArray),
                };

                let slot = self.push_slot(ty);
                if let Some(init) = init {
                    let value = self.eval(init)?;
                    let operand = self.coerce(value, ty, init.location())?;

                    self.body.push(Instruction::Assign(Operand::Local(slot), operand));
                    self.pop_to(slot + 1);
                }

                let variable = Variable {
                    operand: Operand::Local(slot),
                    ty: Type::Value(ty),
                };

                let shadowed = self
                    .scopes
                    .last_mut()
                    .and_then(|scope| scope.insert(name.val().clone(), variable));

                if shadowed.is_some() {
                    return Err(Located::at(
                        SemanticError::Redefinition(name.val().clone()),
                        name.location().clone(),
                    ));
                }

                // La variable sobrevive hasta el final del bloque
                return Ok(());
            }

            Statement::Assign { target, value } => {
                let (into, ty) = self.assignable(target)?;
                let value_location = value.location();
                let value = self.eval(value)?;
                let operand = self.coerce(value, ty, value_location)?;

                self.body.push(Instruction::Assign(into, operand));
            }

            Statement::Update { target, op, value } => {
                let (into, ty) = self.assignable(target)?;
                if !accepts(*op, ty) {
                    return Err(Located::at(
                        SemanticError::InvalidOperand {
                            op: op.symbol(),
                            ty,
                        },
                        statement.location().clone(),
                    ));
                }

                let value_location = value.location();
                let value = self.eval(value)?;
                let operand = self.coerce(value, ty, value_location)?;

                self.body.push(Instruction::Calculate {
                    op: arithmetic(*op),
                    into,
                    value: operand,
                });
            }

            Statement::Return(value) => match (self.returns, value) {
                (Some(ty), Some(value)) => {
                    let location = value.location();
                    let value = self.eval(value)?;
                    let operand = self.coerce(value, ty, location)?;

                    self.body.push(Instruction::Assign(Operand::Result, operand));
                    self.body.push(Instruction::Ret);
                }

                (None, None) => self.body.push(Instruction::Ret),

                (Some(_), None) => {
                    return Err(Located::at(
                        SemanticError::MissingReturnValue,
                        statement.location().clone(),
                    ))
                }

                (None, Some(value)) => {
                    return Err(Located::at(
                        SemanticError::UnexpectedReturnValue,
                        value.location().clone(),
                    ))
                }
            },

            Statement::If {
                condition,
                then,
                otherwise,
            } => {
                let otherwise_label = self.label();
                let end_label = self.label();

                let after_condition = self.branch_unless(condition, otherwise_label)?;
                self.nested(then)?;
                self.body.push(Instruction::Jump(end_label));

                self.land(otherwise_label, after_condition);
                if let Some(otherwise) = otherwise {
                    self.nested(otherwise)?;
                }

                self.body.push(Instruction::SetLabel(end_label));
            }

            Statement::While { condition, body } => {
                let top_label = self.label();
                let exit_label = self.label();
                let done_label = self.label();

                self.body.push(Instruction::SetLabel(top_label));
                let after_condition = self.branch_unless(condition, exit_label)?;

                self.looped(body, done_label, top_label)?;
                self.body.push(Instruction::Jump(top_label));

                self.land(exit_label, after_condition);
                self.body.push(Instruction::SetLabel(done_label));
            }

            Statement::DoWhile { body, condition } => {
                let top_label = self.label();
                let check_label = self.label();
                let exit_label = self.label();
                let done_label = self.label();

                self.body.push(Instruction::SetLabel(top_label));
                self.looped(body, done_label, check_label)?;

                self.body.push(Instruction::SetLabel(check_label));
                let after_condition = self.branch_unless(condition, exit_label)?;
                self.body.push(Instruction::Jump(top_label));

                self.land(exit_label, after_condition);
                self.body.push(Instruction::SetLabel(done_label));
            }

            Statement::For {
                init,
                condition,
                step,
                body,
            } => {
                // Las variables de `init` viven durante todo el ciclo
                self.scopes.push(HashMap::new());
                if let Some(init) = init {
                    self.statement(init)?;
                }

                let top_label = self.label();
                let next_label = self.label();
                let exit_label = self.label();
                let done_label = self.label();

                self.body.push(Instruction::SetLabel(top_label));
                let after_condition = match condition {
                    Some(condition) => Some(self.branch_unless(condition, exit_label)?),
                    None => None,
                };

                self.looped(body, done_label, next_label)?;

                self.body.push(Instruction::SetLabel(next_label));
                if let Some(step) = step {
                    self.nested(step)?;
                }

                self.body.push(Instruction::Jump(top_label));

                if let Some(after_condition) = after_condition {
                    self.land(exit_label, after_condition);
                }

                self.body.push(Instruction::SetLabel(done_label));
                self.scopes.pop();
            }

            Statement::Break => self.leave(statement, |target| target.exit, "break")?,
            Statement::Continue => self.leave(statement, |target| target.next, "continue")?,
        }

        self.pop_to(base);
        Ok(())
    }

    /// Evalúa una condición y salta a `exit` si es falsa.
    ///
    /// Los temporales de la condición se liberan en ambos caminos. Se
    /// devuelve la profundidad con la que se llega a `exit`, que luego
    /// recibe [`Lowering::land`].
    fn branch_unless(&mut self, condition: &Located<Expr>, exit: Label) -> Semantic<u32> {
        let base = self.depth;

        let condition = self.condition(condition)?;
        self.body.push(Instruction::JumpIfZero(condition, exit));

        let after_condition = self.depth;
        self.pop_to(base);

        Ok(after_condition)
    }

    fn land(&mut self, label: Label, depth: u32) {
        let base = self.depth;

        self.body.push(Instruction::SetLabel(label));
        self.depth = depth;
        self.pop_to(base);
    }

    fn looped(&mut self, body: &Located<Statement>, exit: Label, next: Label) -> Semantic<()> {
        self.loops.push(Loop {
            exit,
            next,
            depth: self.depth,
        });

        let result = self.nested(body);
        self.loops.pop();

        result
    }

    /// `break` o `continue`.
    ///
    /// Se liberan las ranuras del cuerpo del ciclo antes de saltar. La
    /// profundidad rastreada no cambia, ya que lo que sigue en el bloque
    /// es inalcanzable y se cierra como cualquier otro camino.
    fn leave(
        &mut self,
        statement: &Located<Statement>,
        target: fn(&Loop) -> Label,
        keyword: &'static str,
    ) -> Semantic<()> {
        let (label, depth) = match self.loops.last() {
            Some(innermost) => (target(innermost), innermost.depth),
            None => {
                return Err(Located::at(
                    SemanticError::OutsideLoop(keyword),
                    statement.location().clone(),
                ))
            }
        };

        for _ in depth..self.depth {
            self.body.push(Instruction::Pop);
        }

        self.body.push(Instruction::Jump(label));
        Ok(())
    }

    fn assignable(&self, target: &Located<Identifier>) -> Semantic<(Operand, PrimitiveType)> {
        match self.variable(target.val()) {
            Some(Variable {
                operand,
                ty: Type::Value(ty),
            }) => Ok((operand.clone(), *ty)),

            _ => Err(Located::at(
                SemanticError::NotAssignable(target.val().clone()),
                target.location().clone(),
            )),
        }
    }

    fn condition(&mut self, condition: &Located<Expr>) -> Semantic<Operand> {
        match self.eval(condition)? {
            Value::Typed(ty, operand) if is_numeric(ty) => Ok(operand),

            Value::Typed(found, _) => Err(Located::at(
                SemanticError::TypeMismatch {
                    expected: PrimitiveType::Boolean,
                    found,
                },
                condition.location().clone(),
            )),

            value => self
                .typed(value, condition.location())
                .map(|(_, operand)| operand),
        }
    }

    fn eval(&mut self, expr: &Located<Expr>) -> Semantic<Value> {
        match expr.val() {
            Expr::Integer(integer) => Ok(Value::Literal(*integer as i128)),

            Expr::Negate(inner) => match self.eval(inner)? {
                Value::Literal(value) => Ok(Value::Literal(-value)),
                value => self.in_place(value, inner.location(), "-", Instruction::Neg),
            },

            Expr::Complement(inner) => match self.eval(inner)? {
                Value::Literal(value) => Ok(Value::Literal(!value)),
                value => self.in_place(value, inner.location(), "~", Instruction::Not),
            },

            Expr::Not(inner) => match self.eval(inner)? {
                Value::Literal(value) => Ok(Value::Literal(i128::from(value == 0))),

                value => {
                    let (ty, operand) = self.numeric(value, inner.location(), "!")?;
                    let slot = self.push_slot(PrimitiveType::Boolean);
                    let into = Operand::Local(slot);

                    self.body.push(Instruction::Compare {
                        op: Comparison::Eq,
                        into: into.clone(),
                        lhs: operand,
                        rhs: Operand::Int { ty, value: 0 },
                    });

                    Ok(Value::Typed(PrimitiveType::Boolean, into))
                }
            },

            Expr::Str(string) => {
                let index = self.pools.intern(Constant::Narrow(string.clone()));
                Ok(Value::Typed(PrimitiveType::String, Operand::Constant(index)))
            }

            Expr::WideStr(string) => {
                let index = self.pools.intern(Constant::Wide(string.clone()));
                Ok(Value::Typed(PrimitiveType::WideString, Operand::Constant(index)))
            }

            Expr::Name(name) => self.read(name, expr.location()),
            Expr::Call { callee, args } => self.call(callee, args, expr.location()),

            Expr::Pack(_) => Err(Located::at(
                SemanticError::UnexpectedPack,
                expr.location().clone(),
            )),

            Expr::Arith(lhs, op, rhs) => {
                let lhs_value = self.eval(lhs)?;
                let rhs_value = self.eval(rhs)?;

                if let (Value::Literal(lhs), Value::Literal(rhs)) = (&lhs_value, &rhs_value) {
                    return fold(*op, *lhs, *rhs)
                        .map(Value::Literal)
                        .map_err(|error| Located::at(error, expr.location().clone()));
                }

                let (ty, lhs, rhs) =
                    self.unify(lhs_value, lhs.location(), rhs_value, rhs.location())?;

                if !accepts(*op, ty) {
                    return Err(Located::at(
                        SemanticError::InvalidOperand {
                            op: op.symbol(),
                            ty,
                        },
                        expr.location().clone(),
                    ));
                }

                let slot = self.push_slot(ty);
                let into = Operand::Local(slot);

                self.body.push(Instruction::Assign(into.clone(), lhs));
                self.body.push(Instruction::Calculate {
                    op: arithmetic(*op),
                    into: into.clone(),
                    value: rhs,
                });

                Ok(Value::Typed(ty, into))
            }

            Expr::Compare(lhs, op, rhs) => {
                let lhs_value = self.eval(lhs)?;
                let rhs_value = self.eval(rhs)?;

                if let (Value::Literal(lhs), Value::Literal(rhs)) = (&lhs_value, &rhs_value) {
                    let result = match op {
                        CmpOp::Ge => lhs >= rhs,
                        CmpOp::Le => lhs <= rhs,
                        CmpOp::Gt => lhs > rhs,
                        CmpOp::Lt => lhs < rhs,
                        CmpOp::Ne => lhs != rhs,
                        CmpOp::Eq => lhs == rhs,
                    };

                    return Ok(Value::Literal(i128::from(result)));
                }

                let (_, lhs, rhs) =
                    self.unify(lhs_value, lhs.location(), rhs_value, rhs.location())?;

                let op = match op {
                    CmpOp::Ge => Comparison::Ge,
                    CmpOp::Le => Comparison::Le,
                    CmpOp::Gt => Comparison::Gt,
                    CmpOp::Lt => Comparison::Lt,
                    CmpOp::Ne => Comparison::Ne,
                    CmpOp::Eq => Comparison::Eq,
                };

                let slot = self.push_slot(PrimitiveType::Boolean);
                let into = Operand::Local(slot);

                self.body.push(Instruction::Compare {
                    op,
                    into: into.clone(),
                    lhs,
                    rhs,
                });

                Ok(Value::Typed(PrimitiveType::Boolean, into))
            }

            // El resultado se decide con el primer operando si es posible
            Expr::Logical(lhs, op, rhs) => {
                let slot = self.push_slot(PrimitiveType::Boolean);
                let into = Operand::Local(slot);
                let end_label = self.label();

                let symbol = match op {
                    LogicalOp::And => "&&",
                    LogicalOp::Or => "||",
                };

                self.truth(lhs, &into, symbol)?;
                self.body.push(match op {
                    LogicalOp::And => Instruction::JumpIfZero(into.clone(), end_label),
                    LogicalOp::Or => Instruction::JumpIfNonZero(into.clone(), end_label),
                });

                self.truth(rhs, &into, symbol)?;
                self.body.push(Instruction::SetLabel(end_label));

                Ok(Value::Typed(PrimitiveType::Boolean, into))
            }
        }
    }

    /// Guarda en `into` si `expr` es distinta de cero.
    fn truth(&mut self, expr: &Located<Expr>, into: &Operand, op: &'static str) -> Semantic<()> {
        let base = self.depth;

        let value = self.eval(expr)?;
        let (ty, operand) = self.numeric(value, expr.location(), op)?;

        self.body.push(Instruction::Compare {
            op: Comparison::Ne,
            into: into.clone(),
            lhs: operand,
            rhs: Operand::Int { ty, value: 0 },
        });

        self.pop_to(base);
        Ok(())
    }

    /// Copia un entero a un temporal y le aplica una instrucción en sitio.
    fn in_place(
        &mut self,
        value: Value,
        location: &Location,
        op: &'static str,
        apply: fn(Operand) -> Instruction,
    ) -> Semantic<Value> {
        let (ty, operand) = self.typed(value, location)?;
        if !ty.is_integer() {
            return Err(Located::at(
                SemanticError::InvalidOperand { op, ty },
                location.clone(),
            ));
        }

        let slot = self.push_slot(ty);
        let into = Operand::Local(slot);

        self.body.push(Instruction::Assign(into.clone(), operand));
        self.body.push(apply(into.clone()));

        Ok(Value::Typed(ty, into))
    }

    fn numeric(
        &self,
        value: Value,
        location: &Location,
        op: &'static str,
    ) -> Semantic<(PrimitiveType, Operand)> {
        match self.typed(value, location)? {
            (ty, operand) if is_numeric(ty) => Ok((ty, operand)),
            (ty, _) => Err(Located::at(
                SemanticError::InvalidOperand { op, ty },
                location.clone(),
            )),
        }
    }

    /// Lleva dos operandos a un tipo común.
    ///
    /// Un literal toma el tipo del otro operando. Entre dos valores con
    /// tipo gana el más ancho, y entre cadenas la ancha.
    fn unify(
        &self,
        lhs: Value,
        lhs_location: &Location,
        rhs: Value,
        rhs_location: &Location,
    ) -> Semantic<(PrimitiveType, Operand, Operand)> {
        match (lhs, rhs) {
            (Value::Typed(lhs_ty, lhs), Value::Typed(rhs_ty, rhs)) => {
                let wider = rhs_ty == PrimitiveType::WideString || rhs_ty.width() > lhs_ty.width();
                let ty = if wider { rhs_ty } else { lhs_ty };

                let lhs = self.coerce(Value::Typed(lhs_ty, lhs), ty, lhs_location)?;
                let rhs = self.coerce(Value::Typed(rhs_ty, rhs), ty, rhs_location)?;
                Ok((ty, lhs, rhs))
            }

            (Value::Typed(ty, lhs), rhs) => Ok((ty, lhs, self.coerce(rhs, ty, rhs_location)?)),
            (lhs, Value::Typed(ty, rhs)) => Ok((ty, self.coerce(lhs, ty, lhs_location)?, rhs)),

            (lhs, rhs) => {
                let (ty, lhs) = self.typed(lhs, lhs_location)?;
                let rhs = self.coerce(rhs, ty, rhs_location)?;
                Ok((ty, lhs, rhs))
            }
        }
    }

    fn read(&mut self, name: &Identifier, location: &Location) -> Semantic<Value> {
        if let Some(variable) = self.variable(name) {
            return match variable.ty {
                Type::Value(ty) => Ok(Value::Typed(ty, variable.operand.clone())),
                _ => Err(Located::at(SemanticError::NotAValue(name.clone()), location.clone())),
            };
        }

        match self.table.lookup(name) {
            Some(Symbol::Constant(value)) => Ok(Value::Literal(*value)),
            Some(_) => Err(Located::at(SemanticError::NotAValue(name.clone()), location.clone())),
            None => Err(Located::at(SemanticError::Undefined(name.clone()), location.clone())),
        }
    }

    fn call(
        &mut self,
        callee: &Located<Identifier>,
        args: &[Located<Expr>],
        location: &Location,
    ) -> Semantic<Value> {
        let table = self.table;
        let name = callee.val();

        let entry = match (self.variable(name), table.lookup(name)) {
            (None, Some(Symbol::Function(index))) => table.function_at(*index),

            (None, None) => {
                return Err(Located::at(
                    SemanticError::UnresolvedCall(name.clone()),
                    callee.location().clone(),
                ))
            }

            _ => {
                return Err(Located::at(
                    SemanticError::NotCallable(name.clone()),
                    callee.location().clone(),
                ))
            }
        };

        let signature = &entry.signature;
        let open = signature.parameters.last() == Some(&ParameterType::Open);
        let fixed = signature.parameters.len() - open as usize;

        // Un arreglo abierto acepta una lista entre llaves o bien
        // cualquier cantidad de argumentos sobrantes
        let (fixed_args, pack) = if open {
            if args.len() < fixed {
                return Err(Located::at(
                    SemanticError::TooFewArguments {
                        callee: name.clone(),
                        expected: fixed,
                        found: args.len(),
                    },
                    location.clone(),
                ));
            }

            let (fixed_args, rest) = args.split_at(fixed);
            let pack = match rest {
                [single] => match single.val() {
                    Expr::Pack(elements) => &elements[..],
                    _ => rest,
                },

                _ => rest,
            };

            (fixed_args, Some(pack))
        } else if args.len() != fixed {
            return Err(Located::at(
                SemanticError::ArgumentCount {
                    callee: name.clone(),
                    expected: fixed,
                    found: args.len(),
                },
                location.clone(),
            ));
        } else {
            (args, None)
        };

        let result = signature.returns.map(|ty| self.push_slot(ty));

        let mut operands = Vec::with_capacity(fixed_args.len());
        for (arg, parameter) in fixed_args.iter().zip(&signature.parameters) {
            let ty = match parameter {
                ParameterType::Value(ty) => *ty,
                ParameterType::Open => {
                    return Err(Located::at(
                        SemanticError::MisplacedOpenArray,
                        arg.location().clone(),
                    ))
                }
            };

            let value = self.eval(arg)?;
            operands.push(self.coerce(value, ty, arg.location())?);
        }

        let mut pushed = 0;
        if let Some(pack) = pack {
            let mut elements = Vec::with_capacity(pack.len());
            for element in pack {
                let value = self.eval(element)?;
                let (tag, value) = self.typed(value, element.location())?;
                elements.push(PackElement { tag, value });
            }

            self.body.push(Instruction::PushPack(elements));
            pushed += 1;
        }

        for operand in operands.into_iter().rev() {
            self.body.push(Instruction::Push(operand));
            pushed += 1;
        }

        if let Some(slot) = result {
            self.body.push(Instruction::PushVar(Operand::Local(slot)));
            pushed += 1;
        }

        let target = match &entry.binding {
            Binding::Intrinsic(intrinsic) => Callee::Intrinsic(self.pools.intrinsic(*intrinsic)),
            Binding::Import(_) => Callee::Import(entry.index),
            Binding::Local => Callee::Local(entry.index),
        };

        self.depth += pushed;
        self.body.push(Instruction::Call(target));
        self.pop_to(self.depth - pushed);

        match (signature.returns, result) {
            (Some(ty), Some(slot)) => Ok(Value::Typed(ty, Operand::Local(slot))),
            _ => Ok(Value::Void),
        }
    }

    /// Ajusta un valor al tipo de destino.
    fn coerce(
        &self,
        value: Value,
        target: PrimitiveType,
        location: &Location,
    ) -> Semantic<Operand> {
        let fail = |error| Err(Located::at(error, location.clone()));

        match value {
            Value::Void => fail(SemanticError::VoidValue),

            Value::Literal(value) => match target.range() {
                Some((min, max)) if (min..=max).contains(&value) => {
                    Ok(Operand::Int { ty: target, value })
                }

                Some(_) => fail(SemanticError::LiteralRange { value, target }),
                None => fail(SemanticError::UnexpectedInteger(target)),
            },

            Value::Typed(found, operand) => {
                let compatible = (is_numeric(found) && is_numeric(target))
                    || (found.is_string() && target.is_string())
                    || (found == PrimitiveType::Pointer && target == PrimitiveType::Pointer);

                if compatible {
                    Ok(operand)
                } else {
                    fail(SemanticError::TypeMismatch {
                        expected: target,
                        found,
                    })
                }
            }
        }
    }

    /// Fija el tipo de un valor sin destino conocido.
    ///
    /// Un literal toma el primero de `s32`, `u32`, `s64` y `u64`
    /// que lo pueda representar.
    fn typed(&self, value: Value, location: &Location) -> Semantic<(PrimitiveType, Operand)> {
        use PrimitiveType::*;

        match value {
            Value::Typed(ty, operand) => Ok((ty, operand)),
            Value::Void => Err(Located::at(SemanticError::VoidValue, location.clone())),

            Value::Literal(value) => {
                let fits = |ty: &PrimitiveType| match ty.range() {
                    Some((min, max)) => (min..=max).contains(&value),
                    None => false,
                };

                match [S32, U32, S64, U64].into_iter().find(fits) {
                    Some(ty) => Ok((ty, Operand::Int { ty, value })),
                    None => Err(Located::at(
                        SemanticError::LiteralRange { value, target: U64 },
                        location.clone(),
                    )),
                }
            }
        }
    }

    fn variable(&self, name: &Identifier) -> Option<&Variable> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn push_slot(&mut self, ty: PrimitiveType) -> u32 {
        let slot = self.depth;
        self.body.push(Instruction::PushType(ty));
        self.depth += 1;

        slot
    }

    fn pop_to(&mut self, depth: u32) {
        while self.depth > depth {
            self.body.push(Instruction::Pop);
            self.depth -= 1;
        }
    }

    fn label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;

        label
    }
}

fn is_numeric(ty: PrimitiveType) -> bool {
    ty.is_integer() || ty == PrimitiveType::Boolean
}

/// Determina si un operador binario aplica sobre valores de un tipo.
///
/// Las cadenas solo admiten concatenación, los booleanos solo
/// operaciones de bits.
fn accepts(op: Operator, ty: PrimitiveType) -> bool {
    use Operator::*;

    match ty {
        PrimitiveType::Boolean => matches!(op, And | Or | Xor),
        ty if ty.is_string() => op == Add,
        ty => ty.is_integer(),
    }
}

fn arithmetic(op: Operator) -> Arithmetic {
    match op {
        Operator::Add => Arithmetic::Add,
        Operator::Sub => Arithmetic::Sub,
        Operator::Mul => Arithmetic::Mul,
        Operator::Div => Arithmetic::Div,
        Operator::Mod => Arithmetic::Mod,
        Operator::Shl => Arithmetic::Shl,
        Operator::Shr => Arithmetic::Shr,
        Operator::And => Arithmetic::And,
        Operator::Or => Arithmetic::Or,
        Operator::Xor => Arithmetic::Xor,
    }
}

/// Evalúa un operador sobre dos constantes enteras.
///
/// El resultado debe caber en 64 bits, con o sin signo.
pub(super) fn fold(op: Operator, lhs: i128, rhs: i128) -> Result<i128, SemanticError> {
    use Operator::*;

    let shift = || u32::try_from(rhs).ok().filter(|amount| *amount < 64);
    let value = match op {
        Div | Mod if rhs == 0 => return Err(SemanticError::DivisionByZero),

        Add => lhs.checked_add(rhs),
        Sub => lhs.checked_sub(rhs),
        Mul => lhs.checked_mul(rhs),
        Div => lhs.checked_div(rhs),
        Mod => lhs.checked_rem(rhs),
        Shl => shift().and_then(|amount| lhs.checked_shl(amount)),
        Shr => shift().map(|amount| lhs >> amount),
        And => Some(lhs & rhs),
        Or => Some(lhs | rhs),
        Xor => Some(lhs ^ rhs),
    };

    let range = i128::from(i64::MIN)..=i128::from(u64::MAX);
    value
        .filter(|value| range.contains(value))
        .ok_or(SemanticError::ConstantOverflow)
}
