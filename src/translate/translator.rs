use std::path::{Path, PathBuf};

use crate::metadata::MetadataReader;
use crate::symbols::SymbolTable;
use crate::types::ModuleImage;

use super::descriptor::DescriptorModel;
use super::emitter::{EmitOptions, EmittedFile, Emitter, ModuleKind};
use super::error::TranslateError;
use super::ir::TranslationUnit;
use super::lower::lower_module;
use super::optimize::{Optimizer, PassPipeline};
use super::shims::ShimRegistry;
use super::verify::verify_unit;

/// Options for a translation run.
#[derive(Clone, Debug)]
pub struct TranslateOptions {
    pub kind: ModuleKind,
    /// Run the default pass pipeline between lowering and emission.
    pub optimize: bool,
    /// Module providing primitive types when no loaded module is flagged as core library.
    pub core_library: String,
    pub emit: EmitOptions,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self {
            kind: ModuleKind::Library,
            optimize: false,
            core_library: "mscorlib".into(),
            emit: EmitOptions::default(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Stage {
    Empty,
    Loaded,
    Lowered,
    Optimized,
}

/// Drives one translation: load modules, lower, optionally optimize, emit.
///
/// ```rust
/// use cil2cpp::translate::{Translator, TranslateOptions};
///
/// let mut translator = Translator::new(TranslateOptions::default());
/// // Lowering before anything is loaded is a usage error.
/// assert!(translator.lower().is_err());
/// ```
pub struct Translator {
    options: TranslateOptions,
    shims: ShimRegistry,
    modules: Vec<(ModuleImage, Option<SymbolTable>)>,
    model: Option<DescriptorModel>,
    unit: TranslationUnit,
    stage: Stage,
}

impl Translator {
    pub fn new(options: TranslateOptions) -> Self {
        Self::with_shims(options, ShimRegistry::default())
    }

    pub fn with_shims(options: TranslateOptions, shims: ShimRegistry) -> Self {
        Self {
            options,
            shims,
            modules: Vec::new(),
            model: None,
            unit: TranslationUnit::default(),
            stage: Stage::Empty,
        }
    }

    pub fn options(&self) -> &TranslateOptions {
        &self.options
    }

    /// Descriptors of the loaded modules, available once lowering has run.
    pub fn model(&self) -> Option<&DescriptorModel> {
        self.model.as_ref()
    }

    pub fn unit(&self) -> &TranslationUnit {
        &self.unit
    }

    pub fn load(&mut self, image: ModuleImage, symbols: Option<SymbolTable>) -> Result<(), TranslateError> {
        if !matches!(self.stage, Stage::Empty | Stage::Loaded) {
            return Err(TranslateError::Usage("modules must be loaded before lowering".into()));
        }
        tracing::info!(
            module = %image.name,
            types = image.types.len(),
            symbols = symbols.is_some(),
            "loaded module"
        );
        self.modules.push((image, symbols));
        self.stage = Stage::Loaded;
        Ok(())
    }

    /// Load a module image file and the debug symbols stored beside it, if any.
    pub fn load_path<P: AsRef<Path>>(&mut self, path: P) -> Result<(), TranslateError> {
        let path = path.as_ref();
        let image = crate::load_module(path)?;
        let symbols = crate::load_symbols_beside(path);
        if symbols.is_none() {
            tracing::debug!(module = %image.name, "local names fall back to indices");
        }
        self.load(image, symbols)
    }

    /// Build descriptors and lower every method body of every loaded module.
    pub fn lower(&mut self) -> Result<(), TranslateError> {
        match self.stage {
            Stage::Loaded => {}
            Stage::Empty => return Err(TranslateError::Usage("nothing loaded to lower".into())),
            _ => return Err(TranslateError::Usage("modules are already lowered".into())),
        }

        let readers: Vec<(&dyn MetadataReader, Option<&SymbolTable>)> = self
            .modules
            .iter()
            .map(|(image, symbols)| (image as &dyn MetadataReader, symbols.as_ref()))
            .collect();
        let model = DescriptorModel::build(&readers, &self.options.core_library)?;
        tracing::info!(
            modules = model.modules.len(),
            core_library = model.core_library(),
            "built descriptor model"
        );

        let mut unit = TranslationUnit::default();
        for (module, (reader, _)) in model.modules.iter().zip(&readers) {
            let lowered = lower_module(&model, module, *reader)?;
            tracing::info!(module = %module.name, methods = lowered.methods.len(), "lowered module");
            unit.modules.push(lowered);
        }
        verify_unit(&unit)?;

        self.model = Some(model);
        self.unit = unit;
        self.stage = Stage::Lowered;
        Ok(())
    }

    /// Run the default pass pipeline.
    pub fn optimize(&mut self) -> Result<(), TranslateError> {
        self.optimize_with(&PassPipeline::default())
    }

    /// Run a caller-provided optimizer. At most once per translation, after lowering.
    pub fn optimize_with(&mut self, optimizer: &dyn Optimizer) -> Result<(), TranslateError> {
        match self.stage {
            Stage::Lowered => {}
            Stage::Optimized => return Err(TranslateError::Usage("optimizer already ran".into())),
            _ => return Err(TranslateError::Usage("optimize requires lowered modules".into())),
        }
        let unit = std::mem::take(&mut self.unit);
        self.unit = optimizer.optimize(unit);
        verify_unit(&self.unit)?;
        tracing::info!(optimizer = optimizer.name(), "optimized translation unit");
        self.stage = Stage::Optimized;
        Ok(())
    }

    /// Render every output file without touching the filesystem.
    pub fn render(&self) -> Result<Vec<EmittedFile>, TranslateError> {
        let model = match (&self.model, self.stage) {
            (Some(model), Stage::Lowered | Stage::Optimized) => model,
            _ => return Err(TranslateError::Usage("emit requires lowered modules".into())),
        };
        let emitter = Emitter::new(model, &self.unit, &self.options.emit, &self.shims);
        Ok(emitter.emit(self.options.kind)?)
    }

    /// Render and write every output file under `out_dir`.
    pub fn emit<P: AsRef<Path>>(&self, out_dir: P) -> Result<Vec<PathBuf>, TranslateError> {
        let files = self.render()?;
        let out_dir = out_dir.as_ref();
        std::fs::create_dir_all(out_dir)?;
        let written = Emitter::write_all(&files, out_dir)?;
        tracing::info!(files = written.len(), out = %out_dir.display(), "emitted sources");
        Ok(written)
    }

    /// Load, lower, optionally optimize and emit in one call.
    pub fn run<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        inputs: &[P],
        out_dir: Q,
    ) -> Result<Vec<PathBuf>, TranslateError> {
        for input in inputs {
            self.load_path(input)?;
        }
        self.lower()?;
        if self.options.optimize {
            self.optimize()?;
        }
        self.emit(out_dir)
    }
}
