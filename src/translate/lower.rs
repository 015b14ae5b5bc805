//! Stack machine to expression IR.
//!
//! The evaluation stack is simulated with IR operands. Pure instructions grow operand
//! trees lazily; anything with a side effect, or anything whose inputs a statement is about
//! to overwrite, is materialized into a `temp_N` first so every instruction's effect happens
//! exactly once and in bytecode order.

use std::collections::{BTreeMap, BTreeSet};

use crate::code_attribute::{code_parser, Instruction};
use crate::constant_info::{FieldRef, MethodRef};
use crate::metadata::MetadataReader;
use crate::type_info::TypeSig;

use super::descriptor::{BodyDescriptor, DescriptorModel, MethodDescriptor, ModuleDescriptor, TypeDescriptor};
use super::error::{LowerError, LowerErrorKind, ResolveError};
use super::ir::*;
use super::naming;

/// Read-only state shared by every method lowered from one module.
pub struct LowerContext<'a> {
    pub model: &'a DescriptorModel,
    pub reader: &'a dyn MetadataReader,
}

#[derive(Clone, Debug)]
struct Entry {
    operand: Operand,
    ty: TypeSig,
}

/// What a statement is about to overwrite.
#[derive(Clone, Copy, Default)]
struct Effect {
    local: Option<u16>,
    arg: Option<u16>,
    memory: bool,
}

impl Effect {
    const CONTROL: Effect = Effect {
        local: None,
        arg: None,
        memory: false,
    };
    const MEMORY: Effect = Effect {
        local: None,
        arg: None,
        memory: true,
    };

    fn of_slot(slot: &Slot) -> Effect {
        match slot {
            Slot::Local(i) => Effect {
                local: Some(*i),
                ..Effect::default()
            },
            Slot::Arg(i) => Effect {
                arg: Some(*i),
                ..Effect::default()
            },
            Slot::Temp(_) => Effect::CONTROL,
            Slot::Field { .. } | Slot::StaticField(_) | Slot::Indirect(_) => Effect::MEMORY,
        }
    }

    fn forces(&self, operand: &Operand) -> bool {
        operand.has_side_effects()
            || self.local.map(|i| operand.reads_local(i)).unwrap_or(false)
            || self.arg.map(|i| operand.reads_arg(i)).unwrap_or(false)
            || (self.memory && operand.reads_memory())
    }
}

struct Lowerer<'a> {
    ctx: &'a LowerContext<'a>,
    ty: &'a TypeDescriptor,
    method: &'a MethodDescriptor,
    body: &'a BodyDescriptor,
    offset: u32,
    stack: Vec<Entry>,
    ops: Vec<Operation>,
    temps: Vec<TypeSig>,
    /// Temporaries receiving the stack at each branch target; empty for empty-stack joins.
    joins: BTreeMap<u32, Vec<u32>>,
    /// Join temporaries that so far have only received `ldnull`.
    null_joins: BTreeSet<u32>,
    targets: BTreeSet<u32>,
    reachable: bool,
}

/// Lower every bytecode body of a module.
pub fn lower_module(
    model: &DescriptorModel,
    module: &ModuleDescriptor,
    reader: &dyn MetadataReader,
) -> Result<LoweredModule, LowerError> {
    let ctx = LowerContext { model, reader };
    let mut methods = BTreeMap::new();
    for ty in &module.types {
        if ty.native.is_some() || ty.is_enum() {
            continue;
        }
        for method in &ty.methods {
            if method.is_abstract {
                continue;
            }
            if let Some(body) = &method.body {
                let lowered = lower_method(&ctx, ty, method, body)?;
                tracing::debug!(
                    method = %method.display_name(),
                    operations = lowered.operations.len(),
                    temps = lowered.temps.len(),
                    "lowered"
                );
                methods.insert(method.token, lowered);
            }
        }
    }
    Ok(LoweredModule {
        scope: module.scope.clone(),
        methods,
    })
}

pub fn lower_method(
    ctx: &LowerContext<'_>,
    ty: &TypeDescriptor,
    method: &MethodDescriptor,
    body: &BodyDescriptor,
) -> Result<LoweredMethod, LowerError> {
    let mut lowerer = Lowerer {
        ctx,
        ty,
        method,
        body,
        offset: 0,
        stack: Vec::new(),
        ops: Vec::new(),
        temps: Vec::new(),
        joins: BTreeMap::new(),
        null_joins: BTreeSet::new(),
        targets: BTreeSet::new(),
        reachable: true,
    };
    lowerer.run()?;

    let Lowerer { ops, temps, .. } = lowerer;
    let (initializers, operations) = if method.is_constructor {
        split_initializers(ops)
    } else {
        (Vec::new(), ops)
    };

    Ok(LoweredMethod {
        token: method.token,
        name: method.display_name(),
        initializers,
        operations,
        locals: body
            .locals
            .iter()
            .map(|l| LocalSlot {
                index: l.index,
                name: l.name.clone(),
                ty: l.ty.clone(),
            })
            .collect(),
        temps,
        init_locals: body.init_locals,
    })
}

fn initializer_target(op: &Operation) -> Option<InitializerTarget> {
    match op {
        Operation::Eval(call) if call.method.is_constructor() => match &call.receiver {
            Some(Operand::This) => Some(InitializerTarget::Base(call.method.parent.clone())),
            Some(Operand::FieldAddress { receiver, field, .. }) if **receiver == Operand::This => {
                Some(InitializerTarget::Member(field.clone()))
            }
            _ => None,
        },
        _ => None,
    }
}

/// Field initializers store into `this` before the base constructor runs.
fn is_pure_field_store(op: &Operation) -> bool {
    match op {
        Operation::Assign {
            target: Slot::Field { receiver, .. },
            value,
        } => *receiver == Operand::This && !value.has_side_effects() && !value.reads_memory(),
        _ => false,
    }
}

/// Split the leading constructor calls of a constructor body into an initializer list.
/// The first operation that is not such a call ends the prefix. Pure stores into `this`
/// fields ahead of the base constructor call stay in the body, after the list.
pub fn split_initializers(mut operations: Vec<Operation>) -> (Vec<Initializer>, Vec<Operation>) {
    let stores = operations.iter().take_while(|op| is_pure_field_store(op)).count();
    let hoist = stores > 0
        && matches!(
            operations.get(stores).and_then(initializer_target),
            Some(InitializerTarget::Base(_))
        );
    let field_stores: Vec<Operation> = if hoist {
        operations.drain(..stores).collect()
    } else {
        Vec::new()
    };

    let targets: Vec<InitializerTarget> = operations.iter().map_while(initializer_target).collect();
    let mut operations = operations.into_iter();
    let initializers = targets
        .into_iter()
        .zip(operations.by_ref())
        .map(|(target, op)| Initializer {
            target,
            args: match op {
                Operation::Eval(call) => call.args,
                _ => Vec::new(),
            },
        })
        .collect();
    (initializers, field_stores.into_iter().chain(operations).collect())
}

fn is_void(sig: &TypeSig) -> bool {
    *sig == TypeSig::Void
}

fn binary_result(left: &TypeSig, right: &TypeSig) -> TypeSig {
    if left.is_indirection() {
        return left.clone();
    }
    if right.is_indirection() {
        return right.clone();
    }
    if left.is_float() || right.is_float() {
        return if *left == TypeSig::R8 || *right == TypeSig::R8 {
            TypeSig::R8
        } else {
            TypeSig::R4
        };
    }
    match (left.integer_rank(), right.integer_rank()) {
        (Some(a), Some(b)) if a == 8 || b == 8 => {
            if left.is_unsigned() {
                TypeSig::U8
            } else {
                TypeSig::I8
            }
        }
        (Some(a), Some(b)) if a == 0 || b == 0 => {
            if left.is_unsigned() {
                TypeSig::UIntPtr
            } else {
                TypeSig::IntPtr
            }
        }
        (Some(_), Some(_)) => {
            if left.is_unsigned() && right.is_unsigned() {
                TypeSig::U4
            } else {
                TypeSig::I4
            }
        }
        _ => left.clone(),
    }
}

/// Width-preserving unsigned view of a 4-byte-or-smaller stack value.
fn unsigned_of(sig: &TypeSig) -> TypeSig {
    match sig {
        TypeSig::I1 | TypeSig::I2 | TypeSig::I4 => TypeSig::U4,
        other if other.is_signed_integer() => other.flip_signedness(),
        other => other.clone(),
    }
}

fn signed_of(sig: &TypeSig) -> TypeSig {
    match sig {
        TypeSig::Boolean | TypeSig::Char | TypeSig::U1 | TypeSig::U2 | TypeSig::U4 => TypeSig::I4,
        other if other.is_unsigned() => other.flip_signedness(),
        other => other.clone(),
    }
}

impl<'a> Lowerer<'a> {
    fn fail(&self, kind: LowerErrorKind) -> LowerError {
        LowerError {
            method: self.method.display_name(),
            offset: self.offset,
            kind,
        }
    }

    fn run(&mut self) -> Result<(), LowerError> {
        let instructions = code_parser(&self.body.code).map_err(|e| LowerError {
            method: self.method.display_name(),
            offset: e.offset,
            kind: e.into(),
        })?;
        let end = self.body.code.len() as u32;
        let boundaries: BTreeSet<u32> = instructions.iter().map(|(offset, _)| *offset).collect();

        for (i, (offset, instruction)) in instructions.iter().enumerate() {
            self.offset = *offset;
            let next = instructions.get(i + 1).map(|(o, _)| *o).unwrap_or(end);
            for relative in instruction.branch_offsets() {
                let target = next as i64 + relative as i64;
                if target < 0 || !boundaries.contains(&(target as u32)) {
                    return Err(self.fail(LowerErrorKind::InvalidBranchTarget(target.max(0) as u32)));
                }
                self.targets.insert(target as u32);
            }
        }

        for (i, (offset, instruction)) in instructions.iter().enumerate() {
            self.offset = *offset;
            let next = instructions.get(i + 1).map(|(o, _)| *o).unwrap_or(end);
            if self.targets.contains(offset) {
                self.enter_label(*offset)?;
            } else if !self.reachable {
                self.stack.clear();
                self.reachable = true;
            }
            self.lower_instruction(instruction, next)?;
        }

        if self.reachable {
            self.offset = end;
            return Err(self.fail(LowerErrorKind::FallsThrough));
        }
        Ok(())
    }

    fn new_temp(&mut self, ty: TypeSig) -> u32 {
        self.temps.push(ty);
        (self.temps.len() - 1) as u32
    }

    fn temp_entry(&self, temp: u32) -> Entry {
        Entry {
            operand: Operand::Temp(temp),
            ty: self.temps[temp as usize].clone(),
        }
    }

    fn pop(&mut self) -> Result<Entry, LowerError> {
        self.stack
            .pop()
            .ok_or_else(|| self.fail(LowerErrorKind::StackUnderflow))
    }

    fn pop_n(&mut self, count: usize) -> Result<Vec<Entry>, LowerError> {
        if self.stack.len() < count {
            return Err(self.fail(LowerErrorKind::StackUnderflow));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn push(&mut self, operand: Operand, ty: TypeSig) {
        self.stack.push(Entry { operand, ty });
    }

    /// Push a computed value; side-effecting values first flush pending work below them.
    fn push_value(&mut self, operand: Operand, ty: TypeSig) {
        if operand.has_side_effects() {
            self.spill(Effect::MEMORY);
        }
        self.push(operand, ty);
    }

    fn materialize_at(&mut self, index: usize) {
        if matches!(self.stack[index].operand, Operand::Temp(_)) {
            return;
        }
        let temp = self.new_temp(self.stack[index].ty.clone());
        let value = std::mem::replace(&mut self.stack[index].operand, Operand::Temp(temp));
        self.ops.push(Operation::Assign {
            target: Slot::Temp(temp),
            value,
        });
    }

    /// Evaluate into temporaries every pending stack entry the coming statement could disturb.
    fn spill(&mut self, effect: Effect) {
        for index in 0..self.stack.len() {
            if effect.forces(&self.stack[index].operand) {
                self.materialize_at(index);
            }
        }
    }

    /// Evaluate a value into a fresh temporary and push the temporary.
    fn push_materialized(&mut self, value: Operand, ty: TypeSig) {
        let temp = self.new_temp(ty.clone());
        self.ops.push(Operation::Assign {
            target: Slot::Temp(temp),
            value,
        });
        self.push(Operand::Temp(temp), ty);
    }

    fn assign(&mut self, target: Slot, value: Operand) {
        let mut effect = Effect::of_slot(&target);
        effect.memory |= value.has_side_effects();
        self.spill(effect);
        self.ops.push(Operation::Assign { target, value });
    }

    /// Move the current stack into the join temporaries of `target`.
    fn store_join(&mut self, target: u32) -> Result<(), LowerError> {
        let depth = self.stack.len();
        let temps = match self.joins.get(&target) {
            Some(existing) if existing.len() != depth => {
                return Err(self.fail(LowerErrorKind::StackMismatch {
                    target,
                    expected: existing.len(),
                    found: depth,
                }))
            }
            Some(existing) => {
                let existing = existing.clone();
                self.refine_null_joins(&existing);
                existing
            }
            None => {
                let entries: Vec<(TypeSig, bool)> = self
                    .stack
                    .iter()
                    .map(|e| (e.ty.clone(), self.is_null_entry(e)))
                    .collect();
                let mut temps = Vec::with_capacity(entries.len());
                for (ty, null) in entries {
                    let temp = self.new_temp(ty);
                    if null {
                        self.null_joins.insert(temp);
                    }
                    temps.push(temp);
                }
                self.joins.insert(target, temps.clone());
                temps
            }
        };
        if temps.is_empty() {
            return Ok(());
        }

        // Entries reading another join slot must be read before that slot is overwritten.
        for index in 0..self.stack.len() {
            let own = Operand::Temp(temps[index]);
            let operand = &self.stack[index].operand;
            if *operand != own && temps.iter().any(|&t| operand.any(&|op| *op == Operand::Temp(t))) {
                let temp = self.new_temp(self.stack[index].ty.clone());
                let value = std::mem::replace(&mut self.stack[index].operand, Operand::Temp(temp));
                self.ops.push(Operation::Assign {
                    target: Slot::Temp(temp),
                    value,
                });
            }
        }

        let entries = std::mem::take(&mut self.stack);
        for (entry, &temp) in entries.into_iter().zip(&temps) {
            if entry.operand != Operand::Temp(temp) {
                self.ops.push(Operation::Assign {
                    target: Slot::Temp(temp),
                    value: entry.operand,
                });
            }
        }
        self.stack = temps.iter().map(|&t| self.temp_entry(t)).collect();
        Ok(())
    }

    /// A null reference carries no type of its own; only `Object` until another store says more.
    fn is_null_entry(&self, entry: &Entry) -> bool {
        match entry.operand {
            Operand::Null => true,
            Operand::Temp(t) => self.null_joins.contains(&t),
            _ => false,
        }
    }

    /// Retype join temporaries that were first reached with a null reference.
    fn refine_null_joins(&mut self, temps: &[u32]) {
        let refined: Vec<(u32, TypeSig)> = self
            .stack
            .iter()
            .zip(temps)
            .filter(|(entry, temp)| self.null_joins.contains(*temp) && !self.is_null_entry(entry))
            .map(|(entry, &temp)| (temp, entry.ty.clone()))
            .collect();
        for (temp, ty) in refined {
            tracing::trace!(temp, ty = %ty, "retyped null join");
            self.temps[temp as usize] = ty;
            self.null_joins.remove(&temp);
        }
    }

    fn enter_label(&mut self, offset: u32) -> Result<(), LowerError> {
        if self.reachable {
            self.store_join(offset)?;
        }
        self.ops.push(Operation::Label(Label(offset)));
        let temps = self.joins.entry(offset).or_default().clone();
        self.stack = temps.iter().map(|&t| self.temp_entry(t)).collect();
        self.reachable = true;
        Ok(())
    }

    fn branch(&mut self, target: u32) -> Result<(), LowerError> {
        self.store_join(target)?;
        self.ops.push(Operation::Branch(Label(target)));
        self.stack.clear();
        self.reachable = false;
        Ok(())
    }

    fn branch_if(&mut self, condition: Condition, target: u32) -> Result<(), LowerError> {
        self.store_join(target)?;
        self.ops.push(Operation::BranchIf {
            condition,
            target: Label(target),
        });
        Ok(())
    }

    fn resolve_method(&self, token: u32) -> Result<MethodRef, LowerError> {
        self.ctx
            .reader
            .resolve_method(token)
            .ok_or_else(|| self.fail(ResolveError::Method(token).into()))
    }

    fn resolve_field(&self, token: u32) -> Result<FieldRef, LowerError> {
        self.ctx
            .reader
            .resolve_field(token)
            .ok_or_else(|| self.fail(ResolveError::Field(token).into()))
    }

    fn resolve_type(&self, token: u32) -> Result<TypeSig, LowerError> {
        self.ctx
            .reader
            .resolve_type(token)
            .ok_or_else(|| self.fail(ResolveError::Type(token).into()))
    }

    fn this_type(&self) -> TypeSig {
        match self.ty.signature() {
            TypeSig::Class(name) => TypeSig::Class(name),
            value => TypeSig::ByRef(Box::new(value)),
        }
    }

    fn load_arg(&mut self, index: u16, address: bool) -> Result<(), LowerError> {
        let index = if self.method.has_this() {
            if index == 0 {
                let ty = self.this_type();
                self.push(Operand::This, ty);
                return Ok(());
            }
            index - 1
        } else {
            index
        };
        let param = self
            .method
            .params
            .get(index as usize)
            .ok_or_else(|| self.fail(LowerErrorKind::InvalidArgument(index)))?;
        let ty = param.ty.clone();
        if address {
            self.push(Operand::ArgAddress(index), TypeSig::ByRef(Box::new(ty)));
        } else {
            self.push(Operand::Arg(index), ty);
        }
        Ok(())
    }

    fn store_arg(&mut self, index: u16) -> Result<(), LowerError> {
        let index = if self.method.has_this() {
            if index == 0 {
                return Err(self.fail(LowerErrorKind::StoreToThis));
            }
            index - 1
        } else {
            index
        };
        if self.method.params.len() <= index as usize {
            return Err(self.fail(LowerErrorKind::InvalidArgument(index)));
        }
        let value = self.pop()?;
        self.assign(Slot::Arg(index), value.operand);
        Ok(())
    }

    fn local_type(&self, index: u16) -> Result<TypeSig, LowerError> {
        self.body
            .locals
            .get(index as usize)
            .map(|l| l.ty.clone())
            .ok_or_else(|| self.fail(LowerErrorKind::InvalidLocal(index)))
    }

    fn load_local(&mut self, index: u16, address: bool) -> Result<(), LowerError> {
        let ty = self.local_type(index)?;
        if address {
            self.push(Operand::LocalAddress(index), TypeSig::ByRef(Box::new(ty)));
        } else {
            self.push(Operand::Local(index), ty);
        }
        Ok(())
    }

    fn store_local(&mut self, index: u16) -> Result<(), LowerError> {
        self.local_type(index)?;
        let value = self.pop()?;
        self.assign(Slot::Local(index), value.operand);
        Ok(())
    }

    /// Receiver of a member access: addresses of storage become the storage itself.
    fn receiver(&self, entry: Entry) -> (Operand, Accessor) {
        match entry.operand {
            Operand::LocalAddress(i) => (Operand::Local(i), Accessor::Dot),
            Operand::ArgAddress(i) => (Operand::Arg(i), Accessor::Dot),
            Operand::FieldAddress {
                receiver,
                accessor,
                field,
            } => (
                Operand::Field {
                    receiver,
                    accessor,
                    field,
                },
                Accessor::Dot,
            ),
            Operand::This => (Operand::This, Accessor::Arrow),
            other => {
                let accessor = if naming::is_pointer_like(&entry.ty, self.ctx.model) {
                    Accessor::Arrow
                } else {
                    Accessor::Dot
                };
                (other, accessor)
            }
        }
    }

    fn slot_at(address: Operand) -> Slot {
        match address {
            Operand::LocalAddress(i) => Slot::Local(i),
            Operand::ArgAddress(i) => Slot::Arg(i),
            Operand::FieldAddress {
                receiver,
                accessor,
                field,
            } => Slot::Field {
                receiver: *receiver,
                accessor,
                field,
            },
            Operand::StaticFieldAddress(field) => Slot::StaticField(field),
            other => Slot::Indirect(other),
        }
    }

    fn convert(entry: Entry, to: TypeSig) -> Entry {
        Entry {
            operand: Operand::Convert {
                to: to.clone(),
                operand: Box::new(entry.operand),
            },
            ty: to,
        }
    }

    fn as_unsigned(entry: Entry) -> Entry {
        if entry.ty.is_signed_integer() {
            let to = unsigned_of(&entry.ty);
            Self::convert(entry, to)
        } else {
            entry
        }
    }

    fn as_signed(entry: Entry) -> Entry {
        if entry.ty.is_unsigned() {
            let to = signed_of(&entry.ty);
            Self::convert(entry, to)
        } else {
            entry
        }
    }

    fn binary(&mut self, op: BinaryOp, unsigned: bool) -> Result<(), LowerError> {
        let right = self.pop()?;
        let left = self.pop()?;
        let (left, right) = match (op, unsigned) {
            (BinaryOp::Shr, true) => (Self::as_unsigned(left), right),
            (BinaryOp::Shr, false) => (Self::as_signed(left), right),
            (_, true) => (Self::as_unsigned(left), Self::as_unsigned(right)),
            _ => (left, right),
        };
        let ty = match op {
            BinaryOp::Shl | BinaryOp::Shr => left.ty.clone(),
            _ => binary_result(&left.ty, &right.ty),
        };
        self.push_value(
            Operand::Binary {
                op,
                left: Box::new(left.operand),
                right: Box::new(right.operand),
            },
            ty,
        );
        Ok(())
    }

    fn unary(&mut self, op: UnaryOp) -> Result<(), LowerError> {
        let value = self.pop()?;
        self.push_value(
            Operand::Unary {
                op,
                operand: Box::new(value.operand),
            },
            value.ty,
        );
        Ok(())
    }

    /// Pop two comparands, converting integers to unsigned for the `.un` forms.
    /// `cgt.un` against a reference is the `!= null` test; other unsigned
    /// comparisons mixing references or pointers with integers compare addresses.
    fn comparands(&mut self, op: CompareOp, unsigned: bool) -> Result<(CompareOp, Operand, Operand), LowerError> {
        let right = self.pop()?;
        let left = self.pop()?;
        if !unsigned {
            return Ok((op, left.operand, right.operand));
        }
        let reference = |e: &Entry| e.operand == Operand::Null || e.ty.is_reference();
        let references = reference(&left) || reference(&right);
        if references && op == CompareOp::Gt {
            return Ok((CompareOp::Ne, left.operand, right.operand));
        }
        if references || left.ty.is_indirection() != right.ty.is_indirection() {
            return Ok((
                op,
                Self::convert(left, TypeSig::UIntPtr).operand,
                Self::convert(right, TypeSig::UIntPtr).operand,
            ));
        }
        if left.ty.is_integer() && right.ty.is_integer() {
            Ok((op, Self::as_unsigned(left).operand, Self::as_unsigned(right).operand))
        } else {
            Ok((op, left.operand, right.operand))
        }
    }

    fn compare(&mut self, op: CompareOp, unsigned: bool) -> Result<(), LowerError> {
        let (op, left, right) = self.comparands(op, unsigned)?;
        self.push_value(
            Operand::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            TypeSig::I4,
        );
        Ok(())
    }

    fn compare_branch(&mut self, op: CompareOp, unsigned: bool, target: u32) -> Result<(), LowerError> {
        let (op, left, right) = self.comparands(op, unsigned)?;
        self.branch_if(Condition::Compare { op, left, right }, target)
    }

    fn conv(&mut self, to: TypeSig) -> Result<(), LowerError> {
        let value = self.pop()?;
        let converted = Self::convert(value, to);
        self.push_value(converted.operand, converted.ty);
        Ok(())
    }

    fn call(&mut self, token: u32, virtual_call: bool) -> Result<(), LowerError> {
        let method = self.resolve_method(token)?;
        let args = self.pop_n(method.params.len())?;
        let receiver = if method.has_this {
            Some(self.pop()?.operand)
        } else {
            None
        };
        let kind = match (method.has_this, virtual_call) {
            (false, _) => CallKind::Static,
            (true, false) => CallKind::Direct,
            (true, true) => CallKind::Virtual,
        };
        let return_type = method.return_type.clone();
        let call = Call {
            kind,
            method,
            receiver,
            args: args.into_iter().map(|e| e.operand).collect(),
        };
        if is_void(&return_type) {
            self.spill(Effect::MEMORY);
            self.ops.push(Operation::Eval(call));
        } else {
            self.push_value(Operand::Call(Box::new(call)), return_type);
        }
        Ok(())
    }

    fn new_object(&mut self, token: u32) -> Result<(), LowerError> {
        let ctor = self.resolve_method(token)?;
        let args = self.pop_n(ctor.params.len())?;
        self.spill(Effect::MEMORY);
        let ty = ctor.parent.clone();
        self.push_materialized(
            Operand::New {
                ty: ty.clone(),
                ctor,
                args: args.into_iter().map(|e| e.operand).collect(),
            },
            ty,
        );
        Ok(())
    }

    fn lower_instruction(&mut self, instruction: &Instruction, next: u32) -> Result<(), LowerError> {
        let target = |relative: i32| (next as i64 + relative as i64) as u32;
        match instruction {
            Instruction::Nop => {}

            Instruction::Ldarg0 => self.load_arg(0, false)?,
            Instruction::Ldarg1 => self.load_arg(1, false)?,
            Instruction::Ldarg2 => self.load_arg(2, false)?,
            Instruction::Ldarg3 => self.load_arg(3, false)?,
            Instruction::LdargS(i) => self.load_arg(*i as u16, false)?,
            Instruction::Ldarg(i) => self.load_arg(*i, false)?,
            Instruction::LdargaS(i) => self.load_arg(*i as u16, true)?,
            Instruction::Ldarga(i) => self.load_arg(*i, true)?,
            Instruction::StargS(i) => self.store_arg(*i as u16)?,
            Instruction::Starg(i) => self.store_arg(*i)?,

            Instruction::Ldloc0 => self.load_local(0, false)?,
            Instruction::Ldloc1 => self.load_local(1, false)?,
            Instruction::Ldloc2 => self.load_local(2, false)?,
            Instruction::Ldloc3 => self.load_local(3, false)?,
            Instruction::LdlocS(i) => self.load_local(*i as u16, false)?,
            Instruction::Ldloc(i) => self.load_local(*i, false)?,
            Instruction::LdlocaS(i) => self.load_local(*i as u16, true)?,
            Instruction::Ldloca(i) => self.load_local(*i, true)?,
            Instruction::Stloc0 => self.store_local(0)?,
            Instruction::Stloc1 => self.store_local(1)?,
            Instruction::Stloc2 => self.store_local(2)?,
            Instruction::Stloc3 => self.store_local(3)?,
            Instruction::StlocS(i) => self.store_local(*i as u16)?,
            Instruction::Stloc(i) => self.store_local(*i)?,

            Instruction::Ldnull => self.push(Operand::Null, TypeSig::Object),
            Instruction::LdcI4M1 => self.push(Operand::Int32(-1), TypeSig::I4),
            Instruction::LdcI4_0 => self.push(Operand::Int32(0), TypeSig::I4),
            Instruction::LdcI4_1 => self.push(Operand::Int32(1), TypeSig::I4),
            Instruction::LdcI4_2 => self.push(Operand::Int32(2), TypeSig::I4),
            Instruction::LdcI4_3 => self.push(Operand::Int32(3), TypeSig::I4),
            Instruction::LdcI4_4 => self.push(Operand::Int32(4), TypeSig::I4),
            Instruction::LdcI4_5 => self.push(Operand::Int32(5), TypeSig::I4),
            Instruction::LdcI4_6 => self.push(Operand::Int32(6), TypeSig::I4),
            Instruction::LdcI4_7 => self.push(Operand::Int32(7), TypeSig::I4),
            Instruction::LdcI4_8 => self.push(Operand::Int32(8), TypeSig::I4),
            Instruction::LdcI4S(v) => self.push(Operand::Int32(*v as i32), TypeSig::I4),
            Instruction::LdcI4(v) => self.push(Operand::Int32(*v), TypeSig::I4),
            Instruction::LdcI8(v) => self.push(Operand::Int64(*v), TypeSig::I8),
            Instruction::LdcR4(v) => self.push(Operand::Float32(*v), TypeSig::R4),
            Instruction::LdcR8(v) => self.push(Operand::Float64(*v), TypeSig::R8),
            Instruction::Ldstr(token) => {
                let value = self
                    .ctx
                    .reader
                    .user_string(*token)
                    .ok_or_else(|| self.fail(ResolveError::String(*token).into()))?
                    .to_string();
                self.push(Operand::String(value), TypeSig::String);
            }

            Instruction::Dup => {
                let index = self
                    .stack
                    .len()
                    .checked_sub(1)
                    .ok_or_else(|| self.fail(LowerErrorKind::StackUnderflow))?;
                if !self.stack[index].operand.is_trivial() {
                    self.materialize_at(index);
                }
                let top = self.stack[index].clone();
                self.stack.push(top);
            }
            Instruction::Pop => {
                let value = self.pop()?;
                match value.operand {
                    Operand::Call(call) => {
                        self.spill(Effect::MEMORY);
                        self.ops.push(Operation::Eval(*call));
                    }
                    other if other.has_side_effects() => {
                        self.spill(Effect::MEMORY);
                        self.push_materialized(other, value.ty);
                        self.stack.pop();
                    }
                    _ => {}
                }
            }

            Instruction::Call(token) => self.call(*token, false)?,
            Instruction::Callvirt(token) => self.call(*token, true)?,
            Instruction::Newobj(token) => self.new_object(*token)?,

            Instruction::Ret => {
                let value = if is_void(&self.method.return_type) || self.method.is_constructor {
                    None
                } else {
                    Some(self.pop()?.operand)
                };
                if !self.stack.is_empty() {
                    return Err(self.fail(LowerErrorKind::StackNotEmpty {
                        depth: self.stack.len(),
                    }));
                }
                self.ops.push(Operation::Return(value));
                self.reachable = false;
            }
            Instruction::Throw => {
                let exception = self.pop()?;
                self.spill(Effect::MEMORY);
                self.stack.clear();
                self.ops.push(Operation::Throw(exception.operand));
                self.reachable = false;
            }

            Instruction::BrS(o) => self.branch(target(*o as i32))?,
            Instruction::Br(o) => self.branch(target(*o))?,
            Instruction::LeaveS(o) => {
                self.spill(Effect::CONTROL);
                self.stack.clear();
                self.branch(target(*o as i32))?
            }
            Instruction::Leave(o) => {
                self.spill(Effect::CONTROL);
                self.stack.clear();
                self.branch(target(*o))?
            }
            Instruction::BrfalseS(o) | Instruction::BrtrueS(o) => {
                let value = self.pop()?.operand;
                let condition = if matches!(instruction, Instruction::BrtrueS(_)) {
                    Condition::True(value)
                } else {
                    Condition::False(value)
                };
                self.branch_if(condition, target(*o as i32))?
            }
            Instruction::Brfalse(o) | Instruction::Brtrue(o) => {
                let value = self.pop()?.operand;
                let condition = if matches!(instruction, Instruction::Brtrue(_)) {
                    Condition::True(value)
                } else {
                    Condition::False(value)
                };
                self.branch_if(condition, target(*o))?
            }
            Instruction::BeqS(o) => self.compare_branch(CompareOp::Eq, false, target(*o as i32))?,
            Instruction::BgeS(o) => self.compare_branch(CompareOp::Ge, false, target(*o as i32))?,
            Instruction::BgtS(o) => self.compare_branch(CompareOp::Gt, false, target(*o as i32))?,
            Instruction::BleS(o) => self.compare_branch(CompareOp::Le, false, target(*o as i32))?,
            Instruction::BltS(o) => self.compare_branch(CompareOp::Lt, false, target(*o as i32))?,
            Instruction::BneUnS(o) => self.compare_branch(CompareOp::Ne, false, target(*o as i32))?,
            Instruction::BgeUnS(o) => self.compare_branch(CompareOp::Ge, true, target(*o as i32))?,
            Instruction::BgtUnS(o) => self.compare_branch(CompareOp::Gt, true, target(*o as i32))?,
            Instruction::BleUnS(o) => self.compare_branch(CompareOp::Le, true, target(*o as i32))?,
            Instruction::BltUnS(o) => self.compare_branch(CompareOp::Lt, true, target(*o as i32))?,
            Instruction::Beq(o) => self.compare_branch(CompareOp::Eq, false, target(*o))?,
            Instruction::Bge(o) => self.compare_branch(CompareOp::Ge, false, target(*o))?,
            Instruction::Bgt(o) => self.compare_branch(CompareOp::Gt, false, target(*o))?,
            Instruction::Ble(o) => self.compare_branch(CompareOp::Le, false, target(*o))?,
            Instruction::Blt(o) => self.compare_branch(CompareOp::Lt, false, target(*o))?,
            Instruction::BneUn(o) => self.compare_branch(CompareOp::Ne, false, target(*o))?,
            Instruction::BgeUn(o) => self.compare_branch(CompareOp::Ge, true, target(*o))?,
            Instruction::BgtUn(o) => self.compare_branch(CompareOp::Gt, true, target(*o))?,
            Instruction::BleUn(o) => self.compare_branch(CompareOp::Le, true, target(*o))?,
            Instruction::BltUn(o) => self.compare_branch(CompareOp::Lt, true, target(*o))?,
            Instruction::Switch { targets, .. } => {
                let index = self
                    .stack
                    .len()
                    .checked_sub(1)
                    .ok_or_else(|| self.fail(LowerErrorKind::StackUnderflow))?;
                if !self.stack[index].operand.is_trivial() {
                    self.spill(Effect::CONTROL);
                    self.materialize_at(index);
                }
                let selector = self.pop()?.operand;
                for (case, relative) in targets.iter().enumerate() {
                    self.branch_if(
                        Condition::Compare {
                            op: CompareOp::Eq,
                            left: selector.clone(),
                            right: Operand::Int32(case as i32),
                        },
                        target(*relative),
                    )?;
                }
            }

            Instruction::Add => self.binary(BinaryOp::Add, false)?,
            Instruction::Sub => self.binary(BinaryOp::Sub, false)?,
            Instruction::Mul => self.binary(BinaryOp::Mul, false)?,
            Instruction::Div => self.binary(BinaryOp::Div, false)?,
            Instruction::DivUn => self.binary(BinaryOp::Div, true)?,
            Instruction::Rem => self.binary(BinaryOp::Rem, false)?,
            Instruction::RemUn => self.binary(BinaryOp::Rem, true)?,
            Instruction::And => self.binary(BinaryOp::And, false)?,
            Instruction::Or => self.binary(BinaryOp::Or, false)?,
            Instruction::Xor => self.binary(BinaryOp::Xor, false)?,
            Instruction::Shl => self.binary(BinaryOp::Shl, false)?,
            Instruction::Shr => self.binary(BinaryOp::Shr, false)?,
            Instruction::ShrUn => self.binary(BinaryOp::Shr, true)?,
            Instruction::Neg => self.unary(UnaryOp::Neg)?,
            Instruction::Not => self.unary(UnaryOp::Not)?,

            Instruction::Ceq => self.compare(CompareOp::Eq, false)?,
            Instruction::Cgt => self.compare(CompareOp::Gt, false)?,
            Instruction::CgtUn => self.compare(CompareOp::Gt, true)?,
            Instruction::Clt => self.compare(CompareOp::Lt, false)?,
            Instruction::CltUn => self.compare(CompareOp::Lt, true)?,

            Instruction::ConvI1 => self.conv(TypeSig::I1)?,
            Instruction::ConvI2 => self.conv(TypeSig::I2)?,
            Instruction::ConvI4 => self.conv(TypeSig::I4)?,
            Instruction::ConvI8 => self.conv(TypeSig::I8)?,
            Instruction::ConvR4 => self.conv(TypeSig::R4)?,
            Instruction::ConvR8 => self.conv(TypeSig::R8)?,
            Instruction::ConvU1 => self.conv(TypeSig::U1)?,
            Instruction::ConvU2 => self.conv(TypeSig::U2)?,
            Instruction::ConvU4 => self.conv(TypeSig::U4)?,
            Instruction::ConvU8 => self.conv(TypeSig::U8)?,
            Instruction::ConvI => self.conv(TypeSig::IntPtr)?,
            Instruction::ConvU => self.conv(TypeSig::UIntPtr)?,
            Instruction::ConvRUn => {
                let value = Self::as_unsigned(self.pop()?);
                let converted = Self::convert(value, TypeSig::R8);
                self.push_value(converted.operand, converted.ty);
            }

            Instruction::Castclass(token) | Instruction::Isinst(token) => {
                let to = self.resolve_type(*token)?;
                let value = self.pop()?;
                let kind = if to.is_reference() {
                    CastKind::Reference
                } else {
                    CastKind::Value
                };
                self.push_value(
                    Operand::Cast {
                        kind,
                        to: to.clone(),
                        operand: Box::new(value.operand),
                    },
                    to,
                );
            }
            Instruction::Sizeof(token) => {
                let ty = self.resolve_type(*token)?;
                self.push(Operand::SizeOf(ty), TypeSig::U4);
            }

            Instruction::Ldfld(token) => {
                let field = self.resolve_field(*token)?;
                let entry = self.pop()?;
                let (receiver, accessor) = self.receiver(entry);
                let ty = field.signature.clone();
                self.push_value(
                    Operand::Field {
                        receiver: Box::new(receiver),
                        accessor,
                        field,
                    },
                    ty,
                );
            }
            Instruction::Ldflda(token) => {
                let field = self.resolve_field(*token)?;
                let entry = self.pop()?;
                let (receiver, accessor) = self.receiver(entry);
                let ty = TypeSig::ByRef(Box::new(field.signature.clone()));
                self.push_value(
                    Operand::FieldAddress {
                        receiver: Box::new(receiver),
                        accessor,
                        field,
                    },
                    ty,
                );
            }
            Instruction::Stfld(token) => {
                let field = self.resolve_field(*token)?;
                let value = self.pop()?;
                let entry = self.pop()?;
                let (receiver, accessor) = self.receiver(entry);
                self.assign(
                    Slot::Field {
                        receiver,
                        accessor,
                        field,
                    },
                    value.operand,
                );
            }
            Instruction::Ldsfld(token) => {
                let field = self.resolve_field(*token)?;
                let ty = field.signature.clone();
                self.push(Operand::StaticField(field), ty);
            }
            Instruction::Ldsflda(token) => {
                let field = self.resolve_field(*token)?;
                let ty = TypeSig::ByRef(Box::new(field.signature.clone()));
                self.push(Operand::StaticFieldAddress(field), ty);
            }
            Instruction::Stsfld(token) => {
                let field = self.resolve_field(*token)?;
                let value = self.pop()?;
                self.assign(Slot::StaticField(field), value.operand);
            }
            Instruction::Initobj(token) => {
                let ty = self.resolve_type(*token)?;
                let address = self.pop()?;
                self.assign(Self::slot_at(address.operand), Operand::Zero(ty));
            }

            Instruction::Newarr(token) => {
                let element = self.resolve_type(*token)?;
                let length = self.pop()?;
                self.spill(Effect::MEMORY);
                self.push_materialized(
                    Operand::NewArray {
                        element: element.clone(),
                        length: Box::new(length.operand),
                    },
                    TypeSig::SzArray(Box::new(element)),
                );
            }
            Instruction::Localloc => {
                let size = self.pop()?;
                self.spill(Effect::MEMORY);
                self.push_materialized(
                    Operand::StackAlloc(Box::new(size.operand)),
                    TypeSig::Pointer(Box::new(TypeSig::U1)),
                );
            }

            Instruction::Break
            | Instruction::Box(_)
            | Instruction::UnboxAny(_)
            | Instruction::Ldlen
            | Instruction::Endfinally => {
                return Err(self.fail(LowerErrorKind::UnsupportedOpcode(instruction.mnemonic())))
            }
        }
        Ok(())
    }
}
