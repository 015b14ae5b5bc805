mod common;

use std::fs;
use std::path::{Path, PathBuf};

use cil2cpp::code_attribute::Instruction;
use cil2cpp::translate::{EmitError, ModuleKind, TranslateError, TranslateOptions, Translator};
use cil2cpp::{ModuleImage, SymbolTable};

use common::*;

fn write_json<T: serde::Serialize>(path: &Path, value: &T) {
    fs::write(path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
}

/// `Program.Main(string[])` sums 1..=3 into a named local and returns it.
fn app_module() -> ModuleImage {
    let mut program = class("[App]Demo.Program", OBJECT);
    program.methods.push(method(
        0x0600_0001,
        "Main",
        0x0016,
        "int32",
        &[("args", "string[]")],
        &["int32", "int32"],
        &[
            Instruction::LdcI4_0,
            Instruction::Stloc0,
            Instruction::LdcI4_1,
            Instruction::Stloc1,
            Instruction::Ldloc0,
            Instruction::Ldloc1,
            Instruction::Add,
            Instruction::Stloc0,
            Instruction::Ldloc1,
            Instruction::LdcI4_1,
            Instruction::Add,
            Instruction::Stloc1,
            Instruction::Ldloc1,
            Instruction::LdcI4_3,
            Instruction::BleS(-12),
            Instruction::Ldloc0,
            Instruction::Ret,
        ],
    ));
    let mut image = module("App", vec![program]);
    image.entry_point = Some(0x0600_0001);
    image
}

fn app_symbols() -> SymbolTable {
    let mut symbols = SymbolTable::default();
    symbols.insert_local(0x0600_0001, 0, "sum");
    symbols.insert_local(0x0600_0001, 1, "i");
    symbols
}

fn read_tree(root: &Path, files: &[PathBuf]) -> Vec<(String, String)> {
    let mut tree: Vec<(String, String)> = files
        .iter()
        .map(|path| {
            let relative = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
            (relative, fs::read_to_string(path).unwrap())
        })
        .collect();
    tree.sort();
    tree
}

fn run(inputs: &[PathBuf], out: &Path, options: TranslateOptions) -> Result<Vec<PathBuf>, TranslateError> {
    Translator::new(options).run(inputs, out)
}

#[test]
fn test_end_to_end_executable() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("App.json");
    write_json(&input, &app_module());
    write_json(&dir.path().join("App.symbols.json"), &app_symbols());

    let out = dir.path().join("out");
    let written = run(&[input], &out, executable()).unwrap();
    let tree = read_tree(&out, &written);
    let names: Vec<&str> = tree.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "App/Demo_Program.cpp",
            "App/Demo_Program.hpp",
            "App/__ForwardDeclares.hpp",
            "App/__Main.cpp",
        ]
    );

    let main = fs::read_to_string(out.join("App").join("__Main.cpp")).unwrap();
    assert_eq!(
        main,
        "#include \"Demo_Program.hpp\"\n\nint main()\n{\n    return (int)App_Demo_Program::Main(nullptr);\n}\n"
    );

    let source = fs::read_to_string(out.join("App").join("Demo_Program.cpp")).unwrap();
    let source = lines(&source);
    assert!(source.contains(&"mscorlib_System_Int32 App_Demo_Program::Main(mscorlib_System_String** p_args)"));
    assert!(source.contains(&"mscorlib_System_Int32 local_sum = {};"));
    assert!(source.contains(&"local_sum = local_sum + local_i;"));
    assert!(source.contains(&"if (local_i <= 3) goto label_0004;"));
    assert!(source.contains(&"return local_sum;"));
}

#[test]
fn test_identical_runs_write_identical_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("App.json");
    write_json(&input, &app_module());

    let options = TranslateOptions {
        optimize: true,
        ..executable()
    };
    let first_out = dir.path().join("first");
    let second_out = dir.path().join("second");
    let first = run(&[input.clone()], &first_out, options.clone()).unwrap();
    let second = run(&[input], &second_out, options).unwrap();
    assert_eq!(read_tree(&first_out, &first), read_tree(&second_out, &second));
}

#[test]
fn test_optimizer_keeps_targets_labelled() {
    let mut translator = Translator::new(TranslateOptions::default());
    translator.load(app_module(), Some(app_symbols())).unwrap();
    translator.lower().unwrap();
    let before = translator.unit().clone();
    translator.optimize().unwrap();
    let after = translator.unit();

    let labels = |unit: &cil2cpp::translate::TranslationUnit| {
        unit.methods()
            .flat_map(|m| m.operations.iter())
            .filter(|op| matches!(op, cil2cpp::translate::Operation::Label(_)))
            .count()
    };
    assert_eq!(labels(&before), 1);
    assert_eq!(labels(after), 1);
}

#[test]
fn test_library_has_no_main() {
    let files = render(vec![app_module()]);
    assert!(files.iter().all(|f| !f.path.ends_with("__Main.cpp")));
}

#[test]
fn test_dependency_modules_are_emitted() {
    let mut helper = class("[Lib]Util.Helper", OBJECT);
    helper.methods.push(static_method(0x0600_0001, "Seven", "int32", &[], &[Instruction::LdcI4_7, Instruction::Ret]));
    let lib = module("Lib", vec![helper]);

    let mut program = class("[App]Demo.Program", OBJECT);
    program.methods.push(static_method(
        0x0600_0001,
        "Main",
        "void",
        &[],
        &[Instruction::Call(0x0a00_0001), Instruction::Pop, Instruction::Ret],
    ));
    let mut app = module("App", vec![program]);
    app.entry_point = Some(0x0600_0001);
    app.tokens.insert(
        0x0a00_0001,
        method_ref("class [Lib]Util.Helper", "Seven", false, "int32", &[]),
    );

    let files = render_with(vec![app, lib], executable());
    let source = lines(file(&files, "App/Demo_Program.cpp"));
    assert!(source.contains(&"#include \"../Lib/Util_Helper.hpp\""));
    assert!(source.contains(&"Lib_Util_Helper::Seven();"));
    assert!(file(&files, "Lib/Util_Helper.cpp").contains("return 7;"));
    assert_eq!(
        lines(file(&files, "App/__Main.cpp")),
        vec!["#include \"Demo_Program.hpp\"", "", "int main()", "{", "App_Demo_Program::Main();", "return 0;", "}"]
    );
}

#[test]
fn test_static_constructors_run_before_entry_point() {
    let mut config = class("[Lib]Util.Config", OBJECT);
    config.fields.push(field(0x0400_0001, "count", 0x0011, "int32"));
    config.methods.push(method(
        0x0600_0001,
        ".cctor",
        0x1811,
        "void",
        &[],
        &[],
        &[Instruction::LdcI4_3, Instruction::Stsfld(0x0400_0001), Instruction::Ret],
    ));
    let lib = module("Lib", vec![config]);

    let mut program = class("[App]Demo.Program", OBJECT);
    program.fields.push(field(0x0400_0001, "ready", 0x0011, "bool"));
    program.methods.push(method(
        0x0600_0001,
        ".cctor",
        0x1811,
        "void",
        &[],
        &[],
        &[Instruction::LdcI4_1, Instruction::Stsfld(0x0400_0001), Instruction::Ret],
    ));
    program.methods.push(static_method(0x0600_0002, "Main", "void", &[], &[Instruction::Ret]));
    let mut app = module("App", vec![program]);
    app.entry_point = Some(0x0600_0002);

    let files = render_with(vec![app, lib], executable());
    assert_eq!(
        lines(file(&files, "App/__Main.cpp")),
        vec![
            "#include \"Demo_Program.hpp\"",
            "#include \"../Lib/Util_Config.hpp\"",
            "",
            "int main()",
            "{",
            "Lib_Util_Config::_cctor();",
            "App_Demo_Program::_cctor();",
            "App_Demo_Program::Main();",
            "return 0;",
            "}",
        ]
    );
    let header = lines(file(&files, "Lib/Util_Config.hpp"));
    let public = header.iter().position(|l| *l == "public:").unwrap();
    assert!(header[public..].contains(&"static void _cctor();"));
    assert!(file(&files, "Lib/Util_Config.cpp").contains("f_Lib_Util_Config_count = 3;"));
}

#[test]
fn test_missing_entry_point() {
    let mut translator = Translator::new(executable());
    let mut image = app_module();
    image.entry_point = None;
    translator.load(image, None).unwrap();
    translator.lower().unwrap();
    assert!(matches!(
        translator.render(),
        Err(TranslateError::Emit(EmitError::MissingEntryPoint(name))) if name == "App"
    ));

    let mut translator = Translator::new(executable());
    let mut image = app_module();
    image.entry_point = Some(0x0600_0042);
    translator.load(image, None).unwrap();
    translator.lower().unwrap();
    assert!(matches!(
        translator.render(),
        Err(TranslateError::Emit(EmitError::UnknownEntryPoint(0x0600_0042)))
    ));
}

#[test]
fn test_load_errors() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("Missing.json");
    let err = run(&[missing], &dir.path().join("out"), TranslateOptions::default()).unwrap_err();
    assert!(matches!(err, TranslateError::Load(cil2cpp::LoadError::Io { .. })));

    let garbage = dir.path().join("Garbage.json");
    fs::write(&garbage, "{ not json").unwrap();
    let err = run(&[garbage], &dir.path().join("out"), TranslateOptions::default()).unwrap_err();
    assert!(matches!(err, TranslateError::Load(cil2cpp::LoadError::Parse { .. })));
}

#[test]
fn test_unreadable_symbols_fall_back_to_indices() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("App.json");
    write_json(&input, &app_module());
    fs::write(dir.path().join("App.symbols.json"), "{ broken").unwrap();

    let out = dir.path().join("out");
    run(&[input], &out, TranslateOptions::default()).unwrap();
    let source = fs::read_to_string(out.join("App").join("Demo_Program.cpp")).unwrap();
    assert!(source.contains("local0 = local0 + local1;"));
}

#[test]
fn test_lowering_failure_names_method() {
    let mut program = class("[App]Demo.Program", OBJECT);
    program.methods.push(static_method(0x0600_0001, "Broken", "void", &[], &[Instruction::Ldlen, Instruction::Ret]));
    let mut translator = Translator::new(TranslateOptions {
        kind: ModuleKind::Library,
        ..TranslateOptions::default()
    });
    translator.load(module("App", vec![program]), None).unwrap();
    match translator.lower() {
        Err(TranslateError::Lower(err)) => {
            assert_eq!(err.method, "[App]Demo.Program::Broken");
            assert_eq!(err.offset, 0);
            assert!(err.to_string().contains("ldlen"));
        }
        other => panic!("unexpected {:?}", other.err()),
    }
}
