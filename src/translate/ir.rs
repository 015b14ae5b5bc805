//! Lowered method representation: flat statements over operand expression trees.

use crate::constant_info::{FieldRef, MethodRef};
use crate::type_info::TypeSig;

/// Branch target synthesized from an IL offset.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub u32);

/// Member access operator chosen from the receiver's type when the access was lowered.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Accessor {
    Arrow,
    Dot,
}

impl Accessor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Accessor::Arrow => "->",
            Accessor::Dot => ".",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "~",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CastKind {
    /// `(T)x`
    Value,
    /// `dynamic_cast<T*>(x)`
    Reference,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CallKind {
    Static,
    /// Non-virtual instance call, qualified with the declaring type.
    Direct,
    Virtual,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub kind: CallKind,
    pub method: MethodRef,
    pub receiver: Option<Operand>,
    pub args: Vec<Operand>,
}

/// Expression node. Operands nest to form trees; only `Call`, `New`, `NewArray` and
/// `StackAlloc` have side effects.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    This,
    Arg(u16),
    ArgAddress(u16),
    Local(u16),
    LocalAddress(u16),
    Temp(u32),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Null,
    String(String),
    /// Zero value of any type, used by object initialization.
    Zero(TypeSig),
    Field {
        receiver: Box<Operand>,
        accessor: Accessor,
        field: FieldRef,
    },
    FieldAddress {
        receiver: Box<Operand>,
        accessor: Accessor,
        field: FieldRef,
    },
    StaticField(FieldRef),
    StaticFieldAddress(FieldRef),
    Binary {
        op: BinaryOp,
        left: Box<Operand>,
        right: Box<Operand>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Operand>,
    },
    /// Relational test producing 0 or 1.
    Compare {
        op: CompareOp,
        left: Box<Operand>,
        right: Box<Operand>,
    },
    Convert {
        to: TypeSig,
        operand: Box<Operand>,
    },
    Cast {
        kind: CastKind,
        to: TypeSig,
        operand: Box<Operand>,
    },
    SizeOf(TypeSig),
    Call(Box<Call>),
    New {
        ty: TypeSig,
        ctor: MethodRef,
        args: Vec<Operand>,
    },
    NewArray {
        element: TypeSig,
        length: Box<Operand>,
    },
    StackAlloc(Box<Operand>),
}

impl Operand {
    /// Direct children, left to right.
    pub fn children(&self) -> Vec<&Operand> {
        match self {
            Operand::Field { receiver, .. } | Operand::FieldAddress { receiver, .. } => {
                vec![&**receiver]
            }
            Operand::Binary { left, right, .. } | Operand::Compare { left, right, .. } => {
                vec![&**left, &**right]
            }
            Operand::Unary { operand, .. }
            | Operand::Convert { operand, .. }
            | Operand::Cast { operand, .. }
            | Operand::StackAlloc(operand) => vec![&**operand],
            Operand::NewArray { length, .. } => vec![&**length],
            Operand::Call(call) => call.receiver.iter().chain(call.args.iter()).collect(),
            Operand::New { args, .. } => args.iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn any(&self, predicate: &dyn Fn(&Operand) -> bool) -> bool {
        predicate(self) || self.children().into_iter().any(|c| c.any(predicate))
    }

    pub fn has_side_effects(&self) -> bool {
        self.any(&|op| {
            matches!(
                op,
                Operand::Call(_) | Operand::New { .. } | Operand::NewArray { .. } | Operand::StackAlloc(_)
            )
        })
    }

    /// Reads heap or static storage that a call or field store could change.
    pub fn reads_memory(&self) -> bool {
        self.any(&|op| matches!(op, Operand::Field { .. } | Operand::StaticField(_)))
    }

    pub fn reads_local(&self, index: u16) -> bool {
        self.any(&|op| *op == Operand::Local(index))
    }

    pub fn reads_arg(&self, index: u16) -> bool {
        self.any(&|op| *op == Operand::Arg(index))
    }

    /// Cheap to evaluate twice with no observable difference.
    pub fn is_trivial(&self) -> bool {
        matches!(
            self,
            Operand::This
                | Operand::Arg(_)
                | Operand::ArgAddress(_)
                | Operand::Local(_)
                | Operand::LocalAddress(_)
                | Operand::Temp(_)
                | Operand::Int32(_)
                | Operand::Int64(_)
                | Operand::Float32(_)
                | Operand::Float64(_)
                | Operand::Null
        )
    }
}

/// Storage an assignment writes to.
#[derive(Clone, Debug, PartialEq)]
pub enum Slot {
    Local(u16),
    Arg(u16),
    Temp(u32),
    Field {
        receiver: Operand,
        accessor: Accessor,
        field: FieldRef,
    },
    StaticField(FieldRef),
    /// Target of a pointer or managed reference.
    Indirect(Operand),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    True(Operand),
    False(Operand),
    Compare {
        op: CompareOp,
        left: Operand,
        right: Operand,
    },
}

impl Condition {
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Condition::True(op) | Condition::False(op) => vec![op],
            Condition::Compare { left, right, .. } => vec![left, right],
        }
    }
}

/// Statement in a lowered method's operation list.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    Label(Label),
    Assign { target: Slot, value: Operand },
    /// Call evaluated for its effect only.
    Eval(Call),
    Branch(Label),
    BranchIf { condition: Condition, target: Label },
    Return(Option<Operand>),
    Throw(Operand),
}

impl Operation {
    /// Where this operation stores its result, if anywhere.
    pub fn result_slot(&self) -> Option<&Slot> {
        match self {
            Operation::Assign { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn branch_target(&self) -> Option<Label> {
        match self {
            Operation::Branch(label) | Operation::BranchIf { target: label, .. } => Some(*label),
            _ => None,
        }
    }

    /// Control never reaches the following operation except through a label.
    pub fn is_terminator(&self) -> bool {
        matches!(self, Operation::Branch(_) | Operation::Return(_) | Operation::Throw(_))
    }

    /// Top-level operands, including those inside the result slot.
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Operation::Label(_) | Operation::Branch(_) | Operation::Return(None) => Vec::new(),
            Operation::Assign { target, value } => {
                let mut ops = match target {
                    Slot::Field { receiver, .. } | Slot::Indirect(receiver) => vec![receiver],
                    _ => Vec::new(),
                };
                ops.push(value);
                ops
            }
            Operation::Eval(call) => call.receiver.iter().chain(call.args.iter()).collect(),
            Operation::BranchIf { condition, .. } => condition.operands(),
            Operation::Return(Some(op)) | Operation::Throw(op) => vec![op],
        }
    }
}

/// Who a hoisted constructor call initializes.
#[derive(Clone, Debug, PartialEq)]
pub enum InitializerTarget {
    /// Base class or delegated constructor of the declaring type.
    Base(TypeSig),
    /// Value-type member constructed in place.
    Member(FieldRef),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Initializer {
    pub target: InitializerTarget,
    pub args: Vec<Operand>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LocalSlot {
    pub index: u16,
    pub name: Option<String>,
    pub ty: TypeSig,
}

/// Result of lowering one method body.
#[derive(Clone, Debug, PartialEq)]
pub struct LoweredMethod {
    pub token: u32,
    pub name: String,
    pub initializers: Vec<Initializer>,
    pub operations: Vec<Operation>,
    pub locals: Vec<LocalSlot>,
    /// Temporary types, indexed by temporary number.
    pub temps: Vec<TypeSig>,
    pub init_locals: bool,
}

/// Lowered bodies of one module, keyed by method token.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoweredModule {
    pub scope: String,
    pub methods: std::collections::BTreeMap<u32, LoweredMethod>,
}

/// Everything lowered in one translation run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TranslationUnit {
    pub modules: Vec<LoweredModule>,
}

impl TranslationUnit {
    pub fn methods(&self) -> impl Iterator<Item = &LoweredMethod> {
        self.modules.iter().flat_map(|m| m.methods.values())
    }
}
