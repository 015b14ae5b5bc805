use binrw::binrw;

/// One CIL instruction. Branch offsets are relative to the start of the next instruction;
/// tokens are metadata tokens resolved through the module's token table.
#[derive(Clone, Debug, PartialEq)]
#[binrw]
#[br(return_unexpected_error)]
#[brw(little)]
pub enum Instruction {
    #[brw(magic = 0x00u8)]
    Nop,
    #[brw(magic = 0x01u8)]
    Break,
    #[brw(magic = 0x02u8)]
    Ldarg0,
    #[brw(magic = 0x03u8)]
    Ldarg1,
    #[brw(magic = 0x04u8)]
    Ldarg2,
    #[brw(magic = 0x05u8)]
    Ldarg3,
    #[brw(magic = 0x06u8)]
    Ldloc0,
    #[brw(magic = 0x07u8)]
    Ldloc1,
    #[brw(magic = 0x08u8)]
    Ldloc2,
    #[brw(magic = 0x09u8)]
    Ldloc3,
    #[brw(magic = 0x0au8)]
    Stloc0,
    #[brw(magic = 0x0bu8)]
    Stloc1,
    #[brw(magic = 0x0cu8)]
    Stloc2,
    #[brw(magic = 0x0du8)]
    Stloc3,
    #[brw(magic = 0x0eu8)]
    LdargS(u8),
    #[brw(magic = 0x0fu8)]
    LdargaS(u8),
    #[brw(magic = 0x10u8)]
    StargS(u8),
    #[brw(magic = 0x11u8)]
    LdlocS(u8),
    #[brw(magic = 0x12u8)]
    LdlocaS(u8),
    #[brw(magic = 0x13u8)]
    StlocS(u8),
    #[brw(magic = 0x14u8)]
    Ldnull,
    #[brw(magic = 0x15u8)]
    LdcI4M1,
    #[brw(magic = 0x16u8)]
    LdcI4_0,
    #[brw(magic = 0x17u8)]
    LdcI4_1,
    #[brw(magic = 0x18u8)]
    LdcI4_2,
    #[brw(magic = 0x19u8)]
    LdcI4_3,
    #[brw(magic = 0x1au8)]
    LdcI4_4,
    #[brw(magic = 0x1bu8)]
    LdcI4_5,
    #[brw(magic = 0x1cu8)]
    LdcI4_6,
    #[brw(magic = 0x1du8)]
    LdcI4_7,
    #[brw(magic = 0x1eu8)]
    LdcI4_8,
    #[brw(magic = 0x1fu8)]
    LdcI4S(i8),
    #[brw(magic = 0x20u8)]
    LdcI4(i32),
    #[brw(magic = 0x21u8)]
    LdcI8(i64),
    #[brw(magic = 0x22u8)]
    LdcR4(f32),
    #[brw(magic = 0x23u8)]
    LdcR8(f64),
    #[brw(magic = 0x25u8)]
    Dup,
    #[brw(magic = 0x26u8)]
    Pop,
    #[brw(magic = 0x28u8)]
    Call(u32),
    #[brw(magic = 0x2au8)]
    Ret,
    #[brw(magic = 0x2bu8)]
    BrS(i8),
    #[brw(magic = 0x2cu8)]
    BrfalseS(i8),
    #[brw(magic = 0x2du8)]
    BrtrueS(i8),
    #[brw(magic = 0x2eu8)]
    BeqS(i8),
    #[brw(magic = 0x2fu8)]
    BgeS(i8),
    #[brw(magic = 0x30u8)]
    BgtS(i8),
    #[brw(magic = 0x31u8)]
    BleS(i8),
    #[brw(magic = 0x32u8)]
    BltS(i8),
    #[brw(magic = 0x33u8)]
    BneUnS(i8),
    #[brw(magic = 0x34u8)]
    BgeUnS(i8),
    #[brw(magic = 0x35u8)]
    BgtUnS(i8),
    #[brw(magic = 0x36u8)]
    BleUnS(i8),
    #[brw(magic = 0x37u8)]
    BltUnS(i8),
    #[brw(magic = 0x38u8)]
    Br(i32),
    #[brw(magic = 0x39u8)]
    Brfalse(i32),
    #[brw(magic = 0x3au8)]
    Brtrue(i32),
    #[brw(magic = 0x3bu8)]
    Beq(i32),
    #[brw(magic = 0x3cu8)]
    Bge(i32),
    #[brw(magic = 0x3du8)]
    Bgt(i32),
    #[brw(magic = 0x3eu8)]
    Ble(i32),
    #[brw(magic = 0x3fu8)]
    Blt(i32),
    #[brw(magic = 0x40u8)]
    BneUn(i32),
    #[brw(magic = 0x41u8)]
    BgeUn(i32),
    #[brw(magic = 0x42u8)]
    BgtUn(i32),
    #[brw(magic = 0x43u8)]
    BleUn(i32),
    #[brw(magic = 0x44u8)]
    BltUn(i32),
    #[brw(magic = 0x45u8)]
    Switch {
        count: u32,
        #[br(count = count)]
        targets: Vec<i32>,
    },
    #[brw(magic = 0x58u8)]
    Add,
    #[brw(magic = 0x59u8)]
    Sub,
    #[brw(magic = 0x5au8)]
    Mul,
    #[brw(magic = 0x5bu8)]
    Div,
    #[brw(magic = 0x5cu8)]
    DivUn,
    #[brw(magic = 0x5du8)]
    Rem,
    #[brw(magic = 0x5eu8)]
    RemUn,
    #[brw(magic = 0x5fu8)]
    And,
    #[brw(magic = 0x60u8)]
    Or,
    #[brw(magic = 0x61u8)]
    Xor,
    #[brw(magic = 0x62u8)]
    Shl,
    #[brw(magic = 0x63u8)]
    Shr,
    #[brw(magic = 0x64u8)]
    ShrUn,
    #[brw(magic = 0x65u8)]
    Neg,
    #[brw(magic = 0x66u8)]
    Not,
    #[brw(magic = 0x67u8)]
    ConvI1,
    #[brw(magic = 0x68u8)]
    ConvI2,
    #[brw(magic = 0x69u8)]
    ConvI4,
    #[brw(magic = 0x6au8)]
    ConvI8,
    #[brw(magic = 0x6bu8)]
    ConvR4,
    #[brw(magic = 0x6cu8)]
    ConvR8,
    #[brw(magic = 0x6du8)]
    ConvU4,
    #[brw(magic = 0x6eu8)]
    ConvU8,
    #[brw(magic = 0x6fu8)]
    Callvirt(u32),
    #[brw(magic = 0x72u8)]
    Ldstr(u32),
    #[brw(magic = 0x73u8)]
    Newobj(u32),
    #[brw(magic = 0x74u8)]
    Castclass(u32),
    #[brw(magic = 0x75u8)]
    Isinst(u32),
    #[brw(magic = 0x76u8)]
    ConvRUn,
    #[brw(magic = 0x7au8)]
    Throw,
    #[brw(magic = 0x7bu8)]
    Ldfld(u32),
    #[brw(magic = 0x7cu8)]
    Ldflda(u32),
    #[brw(magic = 0x7du8)]
    Stfld(u32),
    #[brw(magic = 0x7eu8)]
    Ldsfld(u32),
    #[brw(magic = 0x7fu8)]
    Ldsflda(u32),
    #[brw(magic = 0x80u8)]
    Stsfld(u32),
    #[brw(magic = 0x8cu8)]
    Box(u32),
    #[brw(magic = 0x8du8)]
    Newarr(u32),
    #[brw(magic = 0x8eu8)]
    Ldlen,
    #[brw(magic = 0xa5u8)]
    UnboxAny(u32),
    #[brw(magic = 0xd1u8)]
    ConvU2,
    #[brw(magic = 0xd2u8)]
    ConvU1,
    #[brw(magic = 0xd3u8)]
    ConvI,
    #[brw(magic = 0xdcu8)]
    Endfinally,
    #[brw(magic = 0xddu8)]
    Leave(i32),
    #[brw(magic = 0xdeu8)]
    LeaveS(i8),
    #[brw(magic = 0xe0u8)]
    ConvU,
    #[brw(magic = b"\xfe\x01")]
    Ceq,
    #[brw(magic = b"\xfe\x02")]
    Cgt,
    #[brw(magic = b"\xfe\x03")]
    CgtUn,
    #[brw(magic = b"\xfe\x04")]
    Clt,
    #[brw(magic = b"\xfe\x05")]
    CltUn,
    #[brw(magic = b"\xfe\x09")]
    Ldarg(u16),
    #[brw(magic = b"\xfe\x0a")]
    Ldarga(u16),
    #[brw(magic = b"\xfe\x0b")]
    Starg(u16),
    #[brw(magic = b"\xfe\x0c")]
    Ldloc(u16),
    #[brw(magic = b"\xfe\x0d")]
    Ldloca(u16),
    #[brw(magic = b"\xfe\x0e")]
    Stloc(u16),
    #[brw(magic = b"\xfe\x0f")]
    Localloc,
    #[brw(magic = b"\xfe\x15")]
    Initobj(u32),
    #[brw(magic = b"\xfe\x1c")]
    Sizeof(u32),
}

impl Instruction {
    /// ILAsm mnemonic, used when reporting instructions without a lowering rule.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::Nop => "nop",
            Instruction::Break => "break",
            Instruction::Ldarg0 => "ldarg.0",
            Instruction::Ldarg1 => "ldarg.1",
            Instruction::Ldarg2 => "ldarg.2",
            Instruction::Ldarg3 => "ldarg.3",
            Instruction::Ldloc0 => "ldloc.0",
            Instruction::Ldloc1 => "ldloc.1",
            Instruction::Ldloc2 => "ldloc.2",
            Instruction::Ldloc3 => "ldloc.3",
            Instruction::Stloc0 => "stloc.0",
            Instruction::Stloc1 => "stloc.1",
            Instruction::Stloc2 => "stloc.2",
            Instruction::Stloc3 => "stloc.3",
            Instruction::LdargS(_) => "ldarg.s",
            Instruction::LdargaS(_) => "ldarga.s",
            Instruction::StargS(_) => "starg.s",
            Instruction::LdlocS(_) => "ldloc.s",
            Instruction::LdlocaS(_) => "ldloca.s",
            Instruction::StlocS(_) => "stloc.s",
            Instruction::Ldnull => "ldnull",
            Instruction::LdcI4M1 => "ldc.i4.m1",
            Instruction::LdcI4_0 => "ldc.i4.0",
            Instruction::LdcI4_1 => "ldc.i4.1",
            Instruction::LdcI4_2 => "ldc.i4.2",
            Instruction::LdcI4_3 => "ldc.i4.3",
            Instruction::LdcI4_4 => "ldc.i4.4",
            Instruction::LdcI4_5 => "ldc.i4.5",
            Instruction::LdcI4_6 => "ldc.i4.6",
            Instruction::LdcI4_7 => "ldc.i4.7",
            Instruction::LdcI4_8 => "ldc.i4.8",
            Instruction::LdcI4S(_) => "ldc.i4.s",
            Instruction::LdcI4(_) => "ldc.i4",
            Instruction::LdcI8(_) => "ldc.i8",
            Instruction::LdcR4(_) => "ldc.r4",
            Instruction::LdcR8(_) => "ldc.r8",
            Instruction::Dup => "dup",
            Instruction::Pop => "pop",
            Instruction::Call(_) => "call",
            Instruction::Ret => "ret",
            Instruction::BrS(_) => "br.s",
            Instruction::BrfalseS(_) => "brfalse.s",
            Instruction::BrtrueS(_) => "brtrue.s",
            Instruction::BeqS(_) => "beq.s",
            Instruction::BgeS(_) => "bge.s",
            Instruction::BgtS(_) => "bgt.s",
            Instruction::BleS(_) => "ble.s",
            Instruction::BltS(_) => "blt.s",
            Instruction::BneUnS(_) => "bne.un.s",
            Instruction::BgeUnS(_) => "bge.un.s",
            Instruction::BgtUnS(_) => "bgt.un.s",
            Instruction::BleUnS(_) => "ble.un.s",
            Instruction::BltUnS(_) => "blt.un.s",
            Instruction::Br(_) => "br",
            Instruction::Brfalse(_) => "brfalse",
            Instruction::Brtrue(_) => "brtrue",
            Instruction::Beq(_) => "beq",
            Instruction::Bge(_) => "bge",
            Instruction::Bgt(_) => "bgt",
            Instruction::Ble(_) => "ble",
            Instruction::Blt(_) => "blt",
            Instruction::BneUn(_) => "bne.un",
            Instruction::BgeUn(_) => "bge.un",
            Instruction::BgtUn(_) => "bgt.un",
            Instruction::BleUn(_) => "ble.un",
            Instruction::BltUn(_) => "blt.un",
            Instruction::Switch { .. } => "switch",
            Instruction::Add => "add",
            Instruction::Sub => "sub",
            Instruction::Mul => "mul",
            Instruction::Div => "div",
            Instruction::DivUn => "div.un",
            Instruction::Rem => "rem",
            Instruction::RemUn => "rem.un",
            Instruction::And => "and",
            Instruction::Or => "or",
            Instruction::Xor => "xor",
            Instruction::Shl => "shl",
            Instruction::Shr => "shr",
            Instruction::ShrUn => "shr.un",
            Instruction::Neg => "neg",
            Instruction::Not => "not",
            Instruction::ConvI1 => "conv.i1",
            Instruction::ConvI2 => "conv.i2",
            Instruction::ConvI4 => "conv.i4",
            Instruction::ConvI8 => "conv.i8",
            Instruction::ConvR4 => "conv.r4",
            Instruction::ConvR8 => "conv.r8",
            Instruction::ConvU4 => "conv.u4",
            Instruction::ConvU8 => "conv.u8",
            Instruction::Callvirt(_) => "callvirt",
            Instruction::Ldstr(_) => "ldstr",
            Instruction::Newobj(_) => "newobj",
            Instruction::Castclass(_) => "castclass",
            Instruction::Isinst(_) => "isinst",
            Instruction::ConvRUn => "conv.r.un",
            Instruction::Throw => "throw",
            Instruction::Ldfld(_) => "ldfld",
            Instruction::Ldflda(_) => "ldflda",
            Instruction::Stfld(_) => "stfld",
            Instruction::Ldsfld(_) => "ldsfld",
            Instruction::Ldsflda(_) => "ldsflda",
            Instruction::Stsfld(_) => "stsfld",
            Instruction::Box(_) => "box",
            Instruction::Newarr(_) => "newarr",
            Instruction::Ldlen => "ldlen",
            Instruction::UnboxAny(_) => "unbox.any",
            Instruction::ConvU2 => "conv.u2",
            Instruction::ConvU1 => "conv.u1",
            Instruction::ConvI => "conv.i",
            Instruction::Endfinally => "endfinally",
            Instruction::Leave(_) => "leave",
            Instruction::LeaveS(_) => "leave.s",
            Instruction::ConvU => "conv.u",
            Instruction::Ceq => "ceq",
            Instruction::Cgt => "cgt",
            Instruction::CgtUn => "cgt.un",
            Instruction::Clt => "clt",
            Instruction::CltUn => "clt.un",
            Instruction::Ldarg(_) => "ldarg",
            Instruction::Ldarga(_) => "ldarga",
            Instruction::Starg(_) => "starg",
            Instruction::Ldloc(_) => "ldloc",
            Instruction::Ldloca(_) => "ldloca",
            Instruction::Stloc(_) => "stloc",
            Instruction::Localloc => "localloc",
            Instruction::Initobj(_) => "initobj",
            Instruction::Sizeof(_) => "sizeof",
        }
    }

    /// Relative branch offsets carried by this instruction.
    pub fn branch_offsets(&self) -> Vec<i32> {
        match self {
            Instruction::BrS(o)
            | Instruction::BrfalseS(o)
            | Instruction::BrtrueS(o)
            | Instruction::BeqS(o)
            | Instruction::BgeS(o)
            | Instruction::BgtS(o)
            | Instruction::BleS(o)
            | Instruction::BltS(o)
            | Instruction::BneUnS(o)
            | Instruction::BgeUnS(o)
            | Instruction::BgtUnS(o)
            | Instruction::BleUnS(o)
            | Instruction::BltUnS(o)
            | Instruction::LeaveS(o) => vec![*o as i32],
            Instruction::Br(o)
            | Instruction::Brfalse(o)
            | Instruction::Brtrue(o)
            | Instruction::Beq(o)
            | Instruction::Bge(o)
            | Instruction::Bgt(o)
            | Instruction::Ble(o)
            | Instruction::Blt(o)
            | Instruction::BneUn(o)
            | Instruction::BgeUn(o)
            | Instruction::BgtUn(o)
            | Instruction::BleUn(o)
            | Instruction::BltUn(o)
            | Instruction::Leave(o) => vec![*o],
            Instruction::Switch { targets, .. } => targets.clone(),
            _ => Vec::new(),
        }
    }
}
