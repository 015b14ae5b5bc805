mod common;

use cil2cpp::code_attribute::Instruction;
use cil2cpp::translate::ir::*;
use cil2cpp::translate::{lower_module, verify_method, DescriptorModel, LowerError, LowerErrorKind};
use cil2cpp::{MetadataReader, ModuleImage};
use proptest::prelude::*;

use common::*;

const PROGRAM: &str = "[App]Demo.Program";

fn lower(image: &ModuleImage) -> Result<LoweredModule, LowerError> {
    let model = DescriptorModel::build(&[(image as &dyn MetadataReader, None)], "mscorlib").unwrap();
    lower_module(&model, &model.modules[0], image)
}

fn lower_one(image: &ModuleImage, token: u32) -> LoweredMethod {
    let lowered = lower(image).unwrap();
    let method = lowered.methods[&token].clone();
    verify_method(&method).unwrap();
    method
}

fn program(methods: Vec<cil2cpp::method_info::MethodDef>) -> ModuleImage {
    let mut ty = class(PROGRAM, OBJECT);
    ty.methods = methods;
    module("App", vec![ty])
}

fn lower_error(code: &[Instruction], return_type: &str) -> LowerError {
    let image = program(vec![static_method(
        0x0600_0001,
        "M",
        return_type,
        &[("a", "int32")],
        code,
    )]);
    lower(&image).unwrap_err()
}

#[test]
fn test_forward_branch_gets_label() {
    let image = program(vec![static_method(
        0x0600_0001,
        "Pick",
        "int32",
        &[("a", "int32")],
        &[
            Instruction::Ldarg0,
            Instruction::BrtrueS(2),
            Instruction::LdcI4_0,
            Instruction::Ret,
            Instruction::LdcI4_1,
            Instruction::Ret,
        ],
    )]);
    let method = lower_one(&image, 0x0600_0001);
    assert_eq!(
        method.operations,
        vec![
            Operation::BranchIf {
                condition: Condition::True(Operand::Arg(0)),
                target: Label(5),
            },
            Operation::Return(Some(Operand::Int32(0))),
            Operation::Label(Label(5)),
            Operation::Return(Some(Operand::Int32(1))),
        ]
    );
    assert!(method.temps.is_empty());

    let files = render(vec![image]);
    let source = lines(file(&files, "App/Demo_Program.cpp"));
    assert!(source.contains(&"if (p_a) goto label_0005;"));
    assert!(source.contains(&"label_0005:;"));
}

#[test]
fn test_backward_branch_loop() {
    let image = program(vec![method(
        0x0600_0001,
        "Count",
        0x0016,
        "int32",
        &[("n", "int32")],
        &["int32"],
        &[
            Instruction::LdcI4_0,
            Instruction::Stloc0,
            Instruction::Ldloc0,
            Instruction::LdcI4_1,
            Instruction::Add,
            Instruction::Stloc0,
            Instruction::Ldloc0,
            Instruction::Ldarg0,
            Instruction::BltS(-8),
            Instruction::Ldloc0,
            Instruction::Ret,
        ],
    )]);
    let method = lower_one(&image, 0x0600_0001);
    assert_eq!(method.operations[1], Operation::Label(Label(2)));
    assert_eq!(
        method.operations[3],
        Operation::BranchIf {
            condition: Condition::Compare {
                op: CompareOp::Lt,
                left: Operand::Local(0),
                right: Operand::Arg(0),
            },
            target: Label(2),
        }
    );

    let files = render(vec![image]);
    let source = lines(file(&files, "App/Demo_Program.cpp"));
    assert!(source.contains(&"mscorlib_System_Int32 local0 = {};"));
    assert!(source.contains(&"local0 = local0 + 1;"));
    assert!(source.contains(&"if (local0 < p_n) goto label_0002;"));
}

#[test]
fn test_values_carried_across_join() {
    let image = program(vec![static_method(
        0x0600_0001,
        "Choose",
        "int32",
        &[("a", "int32")],
        &[
            Instruction::Ldarg0,
            Instruction::BrtrueS(3),
            Instruction::LdcI4_1,
            Instruction::BrS(1),
            Instruction::LdcI4_2,
            Instruction::Ret,
        ],
    )]);
    let method = lower_one(&image, 0x0600_0001);
    assert_eq!(method.temps, vec![cil2cpp::type_info::TypeSig::I4]);
    assert_eq!(
        method.operations,
        vec![
            Operation::BranchIf {
                condition: Condition::True(Operand::Arg(0)),
                target: Label(6),
            },
            Operation::Assign {
                target: Slot::Temp(0),
                value: Operand::Int32(1),
            },
            Operation::Branch(Label(7)),
            Operation::Label(Label(6)),
            Operation::Assign {
                target: Slot::Temp(0),
                value: Operand::Int32(2),
            },
            Operation::Label(Label(7)),
            Operation::Return(Some(Operand::Temp(0))),
        ]
    );
}

#[test]
fn test_duplicated_call_evaluates_once() {
    let image = program(vec![
        static_method(0x0600_0001, "Next", "int32", &[], &[Instruction::LdcI4_7, Instruction::Ret]),
        static_method(0x0600_0002, "Sink", "void", &[("v", "int32")], &[Instruction::Ret]),
        static_method(
            0x0600_0003,
            "Twice",
            "void",
            &[],
            &[
                Instruction::Call(0x0600_0001),
                Instruction::Dup,
                Instruction::Add,
                Instruction::Call(0x0600_0002),
                Instruction::Ret,
            ],
        ),
    ]);
    let method = lower_one(&image, 0x0600_0003);
    let calls = method
        .operations
        .iter()
        .flat_map(|op| op.operands())
        .filter(|op| op.any(&|o| matches!(o, Operand::Call(call) if call.method.name == "Next")))
        .count();
    assert_eq!(calls, 1);
    assert!(matches!(
        &method.operations[0],
        Operation::Assign { target: Slot::Temp(0), value: Operand::Call(_) }
    ));

    let files = render(vec![image]);
    let source = lines(file(&files, "App/Demo_Program.cpp"));
    assert!(source.contains(&"temp_0 = App_Demo_Program::Next();"));
    assert!(source.contains(&"App_Demo_Program::Sink(temp_0 + temp_0);"));
}

#[test]
fn test_calls_keep_bytecode_order() {
    let image = program(vec![
        static_method(0x0600_0001, "F", "int32", &[], &[Instruction::LdcI4_1, Instruction::Ret]),
        static_method(0x0600_0002, "G", "int32", &[], &[Instruction::LdcI4_2, Instruction::Ret]),
        static_method(
            0x0600_0003,
            "Diff",
            "int32",
            &[],
            &[
                Instruction::Call(0x0600_0001),
                Instruction::Call(0x0600_0002),
                Instruction::Sub,
                Instruction::Ret,
            ],
        ),
    ]);
    let method = lower_one(&image, 0x0600_0003);
    assert_eq!(method.operations.len(), 2);
    match &method.operations[0] {
        Operation::Assign {
            target: Slot::Temp(0),
            value: Operand::Call(call),
        } => assert_eq!(call.method.name, "F"),
        other => panic!("unexpected {:?}", other),
    }
    match &method.operations[1] {
        Operation::Return(Some(Operand::Binary { op, left, right })) => {
            assert_eq!(*op, BinaryOp::Sub);
            assert_eq!(**left, Operand::Temp(0));
            assert!(matches!(&**right, Operand::Call(call) if call.method.name == "G"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_store_does_not_change_pending_read() {
    let image = program(vec![method(
        0x0600_0001,
        "Swap",
        0x0016,
        "int32",
        &[],
        &["int32"],
        &[
            Instruction::Ldloc0,
            Instruction::LdcI4_5,
            Instruction::Stloc0,
            Instruction::Ret,
        ],
    )]);
    let method = lower_one(&image, 0x0600_0001);
    assert_eq!(
        method.operations,
        vec![
            Operation::Assign {
                target: Slot::Temp(0),
                value: Operand::Local(0),
            },
            Operation::Assign {
                target: Slot::Local(0),
                value: Operand::Int32(5),
            },
            Operation::Return(Some(Operand::Temp(0))),
        ]
    );
}

#[test]
fn test_constructor_prefix_is_hoisted() {
    let mut value = class("[App]Demo.S", VALUE_TYPE);
    value.fields.push(field(0x0400_0001, "v", PUBLIC, "int32"));
    value.methods.push(method(
        0x0600_0002,
        ".ctor",
        PUBLIC | 0x1880,
        "void",
        &[("v", "int32")],
        &[],
        &[
            Instruction::Ldarg0,
            Instruction::Ldarg1,
            Instruction::Stfld(0x0400_0001),
            Instruction::Ret,
        ],
    ));

    let mut holder = class("[App]Demo.Holder", OBJECT);
    holder.fields.push(field(0x0400_0002, "s", PRIVATE, "valuetype [App]Demo.S"));
    holder.fields.push(field(0x0400_0003, "x", PRIVATE, "int32"));
    holder.methods.push(method(
        0x0600_0001,
        ".ctor",
        PUBLIC | 0x1880,
        "void",
        &[],
        &[],
        &[
            Instruction::Ldarg0,
            Instruction::Call(0x0a00_0001),
            Instruction::Ldarg0,
            Instruction::Ldflda(0x0400_0002),
            Instruction::LdcI4_7,
            Instruction::Call(0x0600_0002),
            Instruction::Ldarg0,
            Instruction::LdcI4_5,
            Instruction::Stfld(0x0400_0003),
            Instruction::Ret,
        ],
    ));

    let mut image = module("App", vec![value, holder]);
    image
        .tokens
        .insert(0x0a00_0001, method_ref(&format!("class {}", OBJECT), ".ctor", true, "void", &[]));

    let ctor = lower_one(&image, 0x0600_0001);
    assert_eq!(ctor.initializers.len(), 2);
    assert!(matches!(&ctor.initializers[0].target, InitializerTarget::Base(_)));
    assert!(ctor.initializers[0].args.is_empty());
    assert!(matches!(&ctor.initializers[1].target, InitializerTarget::Member(f) if f.name == "s"));
    assert_eq!(ctor.initializers[1].args, vec![Operand::Int32(7)]);
    assert_eq!(ctor.operations.len(), 2);
    assert_eq!(ctor.operations[1], Operation::Return(None));

    let files = render(vec![image]);
    let source = lines(file(&files, "App/Demo_Holder.cpp"));
    let start = source
        .iter()
        .position(|l| *l == "App_Demo_Holder::App_Demo_Holder() :")
        .unwrap();
    assert_eq!(
        &source[start..start + 7],
        &[
            "App_Demo_Holder::App_Demo_Holder() :",
            "mscorlib_System_Object(),",
            "f_s(7)",
            "{",
            "this->f_x = 5;",
            "return;",
            "}",
        ]
    );

    let value_source = lines(file(&files, "App/Demo_S.cpp"));
    assert!(value_source.contains(&"App_Demo_S::App_Demo_S(mscorlib_System_Int32 p_v)"));
    assert!(value_source.contains(&"this->f_v = p_v;"));
}

#[test]
fn test_unsupported_opcode() {
    let err = lower_error(
        &[
            Instruction::LdcI4_1,
            Instruction::Box(0x1b00_0001),
            Instruction::Pop,
            Instruction::Ret,
        ],
        "void",
    );
    assert_eq!(err.offset, 1);
    assert_eq!(err.kind, LowerErrorKind::UnsupportedOpcode("box"));
}

#[test]
fn test_stack_mismatch_at_join() {
    let err = lower_error(
        &[
            Instruction::Ldarg0,
            Instruction::BrtrueS(1),
            Instruction::LdcI4_1,
            Instruction::Ret,
        ],
        "int32",
    );
    assert_eq!(
        err.kind,
        LowerErrorKind::StackMismatch {
            target: 4,
            expected: 0,
            found: 1
        }
    );
}

#[test]
fn test_malformed_bodies() {
    let err = lower_error(&[Instruction::Nop], "void");
    assert_eq!(err.kind, LowerErrorKind::FallsThrough);

    let err = lower_error(&[Instruction::BrS(5), Instruction::Ret], "void");
    assert_eq!(err.kind, LowerErrorKind::InvalidBranchTarget(7));

    let err = lower_error(&[Instruction::LdcI4_1, Instruction::Ret], "void");
    assert_eq!(err.kind, LowerErrorKind::StackNotEmpty { depth: 1 });

    let err = lower_error(&[Instruction::Add, Instruction::Ret], "void");
    assert_eq!(err.kind, LowerErrorKind::StackUnderflow);

    let err = lower_error(&[Instruction::Call(0x0a00_0099), Instruction::Ret], "void");
    assert!(matches!(err.kind, LowerErrorKind::Resolve(_)));
}

#[test]
fn test_null_first_join_takes_later_reference_type() {
    let mut foo = class("[App]Demo.Foo", OBJECT);
    foo.methods.push(method(0x0600_0002, ".ctor", PUBLIC | 0x1880, "void", &[], &[], &[Instruction::Ret]));
    let mut holder = class(PROGRAM, OBJECT);
    holder.methods.push(method(
        0x0600_0001,
        "Pick",
        0x0016,
        "class [App]Demo.Foo",
        &[("c", "bool")],
        &["class [App]Demo.Foo"],
        &[
            Instruction::Ldarg0,
            Instruction::BrtrueS(3),
            Instruction::Ldnull,
            Instruction::BrS(5),
            Instruction::Newobj(0x0600_0002),
            Instruction::Stloc0,
            Instruction::Ldloc0,
            Instruction::Ret,
        ],
    ));
    let image = module("App", vec![foo, holder]);

    let method = lower_one(&image, 0x0600_0001);
    assert_eq!(method.temps[0], sig("class [App]Demo.Foo"));

    let files = render(vec![image]);
    let source = lines(file(&files, "App/Demo_Program.cpp"));
    assert!(source.contains(&"App_Demo_Foo* temp_0;"));
    assert!(source.contains(&"temp_0 = NULL;"));
    assert!(source.contains(&"local0 = temp_0;"));
    assert!(!source.iter().any(|l| l.starts_with("mscorlib_System_Object*")));
}

#[test]
fn test_unsigned_greater_than_null_is_inequality() {
    let image = program(vec![
        static_method(
            0x0600_0001,
            "HasValue",
            "bool",
            &[("o", "object")],
            &[Instruction::Ldarg0, Instruction::Ldnull, Instruction::CgtUn, Instruction::Ret],
        ),
        static_method(
            0x0600_0002,
            "Pick",
            "int32",
            &[("o", "object")],
            &[
                Instruction::Ldarg0,
                Instruction::Ldnull,
                Instruction::BgtUnS(2),
                Instruction::LdcI4_0,
                Instruction::Ret,
                Instruction::LdcI4_1,
                Instruction::Ret,
            ],
        ),
    ]);
    let method = lower_one(&image, 0x0600_0001);
    assert_eq!(
        method.operations.last(),
        Some(&Operation::Return(Some(Operand::Compare {
            op: CompareOp::Ne,
            left: Box::new(Operand::Arg(0)),
            right: Box::new(Operand::Null),
        })))
    );

    let files = render(vec![image]);
    let source = lines(file(&files, "App/Demo_Program.cpp"));
    assert!(source.contains(&"return (p_o != NULL) ? 1 : 0;"));
    assert!(source.contains(&"if (p_o != NULL) goto label_0006;"));
}

#[test]
fn test_negating_negative_literal() {
    let image = program(vec![static_method(
        0x0600_0001,
        "M",
        "int32",
        &[],
        &[Instruction::LdcI4M1, Instruction::Neg, Instruction::Ret],
    )]);
    let files = render(vec![image]);
    let source = lines(file(&files, "App/Demo_Program.cpp"));
    assert!(source.contains(&"return -(-1);"));
}

#[test]
fn test_shift_and_division_signedness() {
    let image = program(vec![
        static_method(
            0x0600_0001,
            "ShrUnSigned",
            "int32",
            &[("x", "int32")],
            &[Instruction::Ldarg0, Instruction::LdcI4_1, Instruction::ShrUn, Instruction::Ret],
        ),
        static_method(
            0x0600_0002,
            "ShrUnsigned",
            "uint32",
            &[("u", "uint32")],
            &[Instruction::Ldarg0, Instruction::LdcI4_2, Instruction::Shr, Instruction::Ret],
        ),
        static_method(
            0x0600_0003,
            "ShrSigned",
            "int32",
            &[("x", "int32")],
            &[Instruction::Ldarg0, Instruction::LdcI4_1, Instruction::Shr, Instruction::Ret],
        ),
        static_method(
            0x0600_0004,
            "ShrUnUnsigned",
            "uint32",
            &[("u", "uint32")],
            &[Instruction::Ldarg0, Instruction::LdcI4_1, Instruction::ShrUn, Instruction::Ret],
        ),
        static_method(
            0x0600_0005,
            "DivUn",
            "int32",
            &[("a", "int32"), ("b", "int32")],
            &[Instruction::Ldarg0, Instruction::Ldarg1, Instruction::DivUn, Instruction::Ret],
        ),
        static_method(
            0x0600_0006,
            "RemUn",
            "uint32",
            &[("u", "uint32"), ("a", "int32")],
            &[Instruction::Ldarg0, Instruction::Ldarg1, Instruction::RemUn, Instruction::Ret],
        ),
    ]);
    let files = render(vec![image]);
    let source = lines(file(&files, "App/Demo_Program.cpp"));
    assert!(source.contains(&"return ((mscorlib_System_UInt32)p_x) >> 1;"));
    assert!(source.contains(&"return ((mscorlib_System_Int32)p_u) >> 2;"));
    assert!(source.contains(&"return p_x >> 1;"));
    assert!(source.contains(&"return p_u >> 1;"));
    assert!(source.contains(&"return ((mscorlib_System_UInt32)p_a) / ((mscorlib_System_UInt32)p_b);"));
    assert!(source.contains(&"return p_u % ((mscorlib_System_UInt32)p_a);"));
}

#[test]
fn test_stack_allocation_zeroing_and_sizes() {
    let mut value = class("[App]Demo.S", VALUE_TYPE);
    value.fields.push(field(0x0400_0001, "v", PUBLIC, "int32"));
    let mut holder = class(PROGRAM, OBJECT);
    holder.methods.push(method(
        0x0600_0001,
        "Buffer",
        0x0016,
        "void",
        &[("n", "int32")],
        &["uint8*"],
        &[Instruction::Ldarg0, Instruction::Localloc, Instruction::Stloc0, Instruction::Ret],
    ));
    holder.methods.push(method(
        0x0600_0002,
        "Clear",
        0x0016,
        "void",
        &[],
        &["valuetype [App]Demo.S"],
        &[Instruction::LdlocaS(0), Instruction::Initobj(0x1b00_0001), Instruction::Ret],
    ));
    holder.methods.push(static_method(
        0x0600_0003,
        "Size",
        "uint32",
        &[],
        &[Instruction::Sizeof(0x1b00_0001), Instruction::Ret],
    ));
    let mut image = module("App", vec![value, holder]);
    image.tokens.insert(0x1b00_0001, type_spec("valuetype [App]Demo.S"));

    let files = render(vec![image]);
    let source = lines(file(&files, "App/Demo_Program.cpp"));
    assert!(source.contains(&"#include <alloca.h>"));
    assert!(source.contains(&"temp_0 = (mscorlib_System_Byte*)alloca(p_n);"));
    assert!(source.contains(&"local0 = temp_0;"));
    assert!(!source.iter().any(|l| l.contains("new mscorlib_System_Byte[")));
    assert!(source.contains(&"App_Demo_S local0 = {};"));
    assert!(source.contains(&"local0 = {};"));
    assert!(source.contains(&"return sizeof(App_Demo_S);"));
}

#[test]
fn test_field_initializers_run_after_base_constructor() {
    let mut base = class("[App]Demo.Base", OBJECT);
    base.methods.push(method(
        0x0600_0001,
        ".ctor",
        PUBLIC | 0x1880,
        "void",
        &[("n", "int32")],
        &[],
        &[Instruction::Ret],
    ));
    let mut derived = class("[App]Demo.Derived", "[App]Demo.Base");
    derived.fields.push(field(0x0400_0001, "x", PRIVATE, "int32"));
    derived.methods.push(method(
        0x0600_0002,
        ".ctor",
        PUBLIC | 0x1880,
        "void",
        &[("n", "int32")],
        &[],
        &[
            Instruction::Ldarg0,
            Instruction::LdcI4_5,
            Instruction::Stfld(0x0400_0001),
            Instruction::Ldarg0,
            Instruction::Ldarg1,
            Instruction::Call(0x0600_0001),
            Instruction::Ret,
        ],
    ));
    let image = module("App", vec![base, derived]);

    let files = render(vec![image]);
    let source = lines(file(&files, "App/Demo_Derived.cpp"));
    let start = source
        .iter()
        .position(|l| *l == "App_Demo_Derived::App_Demo_Derived(mscorlib_System_Int32 p_n) :")
        .unwrap();
    assert_eq!(
        &source[start..start + 6],
        &["App_Demo_Derived::App_Demo_Derived(mscorlib_System_Int32 p_n) :", "App_Demo_Base(p_n)", "{", "this->f_x = 5;", "return;", "}"]
    );
}

/// Straight-line segments that each leave the stack empty, optionally followed by a
/// branch to the next instruction.
fn segmented_body(segments: &[(Vec<i8>, u8)]) -> (Vec<Instruction>, usize) {
    let mut code = Vec::new();
    let mut branches = 0;
    for (constants, branch) in segments {
        for c in constants {
            code.push(Instruction::LdcI4S(*c));
        }
        for _ in 1..constants.len() {
            code.push(Instruction::Add);
        }
        code.push(Instruction::Stloc0);
        match branch {
            1 => {
                code.push(Instruction::BrS(0));
                branches += 1;
            }
            2 => {
                code.push(Instruction::Ldarg0);
                code.push(Instruction::BrtrueS(0));
                branches += 1;
            }
            _ => {}
        }
    }
    code.push(Instruction::Ret);
    (code, branches)
}

proptest! {
    #[test]
    fn test_balanced_segments_need_no_join_temps(
        segments in prop::collection::vec((prop::collection::vec(any::<i8>(), 1..4), 0u8..3), 1..8)
    ) {
        let (code, branches) = segmented_body(&segments);
        let image = program(vec![method(
            0x0600_0001,
            "M",
            0x0016,
            "void",
            &[("a", "int32")],
            &["int32"],
            &code,
        )]);
        let lowered = lower(&image).unwrap();
        let method = &lowered.methods[&0x0600_0001];
        prop_assert!(verify_method(method).is_ok());
        prop_assert!(method.temps.is_empty());
        let labels = method
            .operations
            .iter()
            .filter(|op| matches!(op, Operation::Label(_)))
            .count();
        prop_assert_eq!(labels, branches);
        let stores = method
            .operations
            .iter()
            .filter(|op| matches!(op, Operation::Assign { target: Slot::Local(0), .. }))
            .count();
        prop_assert_eq!(stores, segments.len());
    }
}
