//! Whole-unit IR rewrites run between lowering and emission.
//!
//! Passes must keep every branch target labelled exactly once and must not introduce
//! undeclared variables; the unit is re-verified after the pipeline runs.

use std::collections::BTreeSet;

use super::ir::{LoweredMethod, Operation, TranslationUnit};

pub trait Optimizer {
    fn name(&self) -> &'static str;

    fn optimize(&self, unit: TranslationUnit) -> TranslationUnit;
}

/// Applies a per-method rewrite to every method of the unit.
fn map_methods(mut unit: TranslationUnit, f: impl Fn(&mut LoweredMethod)) -> TranslationUnit {
    for module in &mut unit.modules {
        for method in module.methods.values_mut() {
            f(method);
        }
    }
    unit
}

/// Removes operations that follow a terminator and precede the next label.
pub struct DeadCode;

impl Optimizer for DeadCode {
    fn name(&self) -> &'static str {
        "dead-code"
    }

    fn optimize(&self, unit: TranslationUnit) -> TranslationUnit {
        map_methods(unit, |method| {
            let mut live = true;
            method.operations.retain(|op| {
                if matches!(op, Operation::Label(_)) {
                    live = true;
                    return true;
                }
                let keep = live;
                if op.is_terminator() {
                    live = false;
                }
                keep
            });
        })
    }
}

/// Drops `goto L;` when `L:` is the very next operation.
pub struct RedundantBranch;

impl Optimizer for RedundantBranch {
    fn name(&self) -> &'static str {
        "redundant-branch"
    }

    fn optimize(&self, unit: TranslationUnit) -> TranslationUnit {
        map_methods(unit, |method| {
            let ops = std::mem::take(&mut method.operations);
            let mut kept = Vec::with_capacity(ops.len());
            let mut iter = ops.into_iter().peekable();
            while let Some(op) = iter.next() {
                if let (Operation::Branch(target), Some(Operation::Label(next))) = (&op, iter.peek()) {
                    if target == next {
                        continue;
                    }
                }
                kept.push(op);
            }
            method.operations = kept;
        })
    }
}

/// Removes labels nothing branches to.
pub struct UnreferencedLabel;

impl Optimizer for UnreferencedLabel {
    fn name(&self) -> &'static str {
        "unreferenced-label"
    }

    fn optimize(&self, unit: TranslationUnit) -> TranslationUnit {
        map_methods(unit, |method| {
            let referenced: BTreeSet<_> = method
                .operations
                .iter()
                .filter_map(Operation::branch_target)
                .collect();
            method.operations.retain(|op| match op {
                Operation::Label(label) => referenced.contains(label),
                _ => true,
            });
        })
    }
}

/// Ordered list of passes, itself an optimizer.
pub struct PassPipeline {
    passes: Vec<Box<dyn Optimizer>>,
}

impl PassPipeline {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    pub fn with(mut self, pass: impl Optimizer + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }
}

impl Default for PassPipeline {
    /// The `-O1` pipeline.
    fn default() -> Self {
        PassPipeline::new()
            .with(DeadCode)
            .with(RedundantBranch)
            .with(UnreferencedLabel)
    }
}

impl Optimizer for PassPipeline {
    fn name(&self) -> &'static str {
        "pipeline"
    }

    fn optimize(&self, unit: TranslationUnit) -> TranslationUnit {
        self.passes.iter().fold(unit, |unit, pass| {
            let before: usize = unit.methods().map(|m| m.operations.len()).sum();
            let unit = pass.optimize(unit);
            let after: usize = unit.methods().map(|m| m.operations.len()).sum();
            tracing::debug!(pass = pass.name(), removed = before - after, "optimization pass");
            unit
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::ir::{Label, LoweredModule, Operand, Slot};

    fn unit(operations: Vec<Operation>) -> TranslationUnit {
        let method = LoweredMethod {
            token: 1,
            name: "M".into(),
            initializers: Vec::new(),
            operations,
            locals: Vec::new(),
            temps: Vec::new(),
            init_locals: false,
        };
        let mut module = LoweredModule::default();
        module.methods.insert(1, method);
        TranslationUnit { modules: vec![module] }
    }

    fn ops(unit: &TranslationUnit) -> Vec<Operation> {
        unit.methods().next().map(|m| m.operations.clone()).unwrap_or_default()
    }

    #[test]
    fn test_dead_code_after_terminator() {
        let out = DeadCode.optimize(unit(vec![
            Operation::Return(None),
            Operation::Assign {
                target: Slot::Arg(0),
                value: Operand::Int32(1),
            },
            Operation::Label(Label(4)),
            Operation::Return(None),
        ]));
        assert_eq!(
            ops(&out),
            vec![
                Operation::Return(None),
                Operation::Label(Label(4)),
                Operation::Return(None)
            ]
        );
    }

    #[test]
    fn test_pipeline_removes_fallthrough_goto_and_label() {
        let input = unit(vec![
            Operation::Branch(Label(2)),
            Operation::Label(Label(2)),
            Operation::Return(None),
        ]);
        let out = PassPipeline::default().optimize(input);
        assert_eq!(ops(&out), vec![Operation::Return(None)]);
    }

    #[test]
    fn test_pipeline_is_idempotent() {
        let input = unit(vec![
            Operation::Label(Label(0)),
            Operation::BranchIf {
                condition: crate::translate::ir::Condition::True(Operand::Arg(0)),
                target: Label(0),
            },
            Operation::Branch(Label(9)),
            Operation::Return(None),
            Operation::Label(Label(9)),
            Operation::Return(None),
        ]);
        let once = PassPipeline::default().optimize(input);
        let twice = PassPipeline::default().optimize(once.clone());
        assert_eq!(once, twice);
    }
}
