//! Structural checks on lowered methods, run after lowering and again after optimization.

use std::collections::BTreeMap;

use super::error::VerifyError;
use super::ir::{Initializer, LoweredMethod, Operand, Operation, Slot, TranslationUnit};
use super::naming;

pub fn verify_unit(unit: &TranslationUnit) -> Result<(), VerifyError> {
    unit.methods().try_for_each(verify_method)
}

/// Every branch target has exactly one label and every variable reference is declared.
pub fn verify_method(method: &LoweredMethod) -> Result<(), VerifyError> {
    let mut labels = BTreeMap::new();
    for op in &method.operations {
        if let Operation::Label(label) = op {
            *labels.entry(label.0).or_insert(0usize) += 1;
        }
    }
    if let Some((&offset, &count)) = labels.iter().find(|(_, &count)| count > 1) {
        return Err(VerifyError::DuplicateLabel {
            method: method.name.clone(),
            label: naming::label_name(offset),
            count,
        });
    }

    for op in &method.operations {
        if let Some(label) = op.branch_target() {
            if !labels.contains_key(&label.0) {
                return Err(VerifyError::MissingLabel {
                    method: method.name.clone(),
                    label: naming::label_name(label.0),
                });
            }
        }
        if let Some(slot) = op.result_slot() {
            check_slot(method, slot)?;
        }
        for operand in op.operands() {
            check_operand(method, operand)?;
        }
    }

    for Initializer { args, .. } in &method.initializers {
        for arg in args {
            check_operand(method, arg)?;
        }
    }
    Ok(())
}

fn check_slot(method: &LoweredMethod, slot: &Slot) -> Result<(), VerifyError> {
    match slot {
        Slot::Temp(index) => check_temp(method, *index),
        Slot::Local(index) => check_local(method, *index),
        _ => Ok(()),
    }
}

fn check_temp(method: &LoweredMethod, index: u32) -> Result<(), VerifyError> {
    if (index as usize) < method.temps.len() {
        Ok(())
    } else {
        Err(VerifyError::UndeclaredTemp {
            method: method.name.clone(),
            index,
        })
    }
}

fn check_local(method: &LoweredMethod, index: u16) -> Result<(), VerifyError> {
    if method.locals.iter().any(|l| l.index == index) {
        Ok(())
    } else {
        Err(VerifyError::UndeclaredLocal {
            method: method.name.clone(),
            index,
        })
    }
}

fn check_operand(method: &LoweredMethod, operand: &Operand) -> Result<(), VerifyError> {
    match operand {
        Operand::Temp(index) => check_temp(method, *index)?,
        Operand::Local(index) | Operand::LocalAddress(index) => check_local(method, *index)?,
        _ => {}
    }
    operand
        .children()
        .into_iter()
        .try_for_each(|child| check_operand(method, child))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::ir::{Label, LocalSlot};
    use crate::type_info::TypeSig;

    fn method(operations: Vec<Operation>) -> LoweredMethod {
        LoweredMethod {
            token: 0x0600_0001,
            name: "[m]N.A::M".into(),
            initializers: Vec::new(),
            operations,
            locals: vec![LocalSlot {
                index: 0,
                name: None,
                ty: TypeSig::I4,
            }],
            temps: vec![TypeSig::I4],
            init_locals: true,
        }
    }

    #[test]
    fn test_verify_accepts_well_formed() {
        let m = method(vec![
            Operation::Label(Label(0)),
            Operation::Assign {
                target: Slot::Temp(0),
                value: Operand::Local(0),
            },
            Operation::Branch(Label(0)),
        ]);
        assert_eq!(verify_method(&m), Ok(()));
    }

    #[test]
    fn test_verify_missing_label() {
        let m = method(vec![Operation::Branch(Label(0x10)), Operation::Return(None)]);
        assert_eq!(
            verify_method(&m),
            Err(VerifyError::MissingLabel {
                method: "[m]N.A::M".into(),
                label: "label_0010".into(),
            })
        );
    }

    #[test]
    fn test_verify_duplicate_label() {
        let m = method(vec![Operation::Label(Label(2)), Operation::Label(Label(2))]);
        assert!(matches!(
            verify_method(&m),
            Err(VerifyError::DuplicateLabel { count: 2, .. })
        ));
    }

    #[test]
    fn test_verify_undeclared_variables() {
        let m = method(vec![Operation::Return(Some(Operand::Temp(3)))]);
        assert!(matches!(
            verify_method(&m),
            Err(VerifyError::UndeclaredTemp { index: 3, .. })
        ));
        let m = method(vec![Operation::Assign {
            target: Slot::Local(9),
            value: Operand::Int32(1),
        }]);
        assert!(matches!(
            verify_method(&m),
            Err(VerifyError::UndeclaredLocal { index: 9, .. })
        ));
    }
}
