use super::*;
use clap::Parser;
use std::cell::RefCell;
use tsz_watch::VirtualSystem;

#[derive(Clone, Default)]
struct Output(Rc<RefCell<Vec<u8>>>);

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Output {
    fn text(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).unwrap()
    }
}

fn args(argv: &[&str]) -> CliArgs {
    CliArgs::try_parse_from(std::iter::once("tsz").chain(argv.iter().copied())).unwrap()
}

fn build(sys: &Rc<VirtualSystem>, argv: &[&str]) -> (Result<i32>, String) {
    let output = Output::default();
    let system: Rc<dyn System> = Rc::clone(sys) as Rc<dyn System>;
    let status = run_with_system(&args(argv), system, false, output.clone());
    (status, output.text())
}

#[test]
fn test_batch_build_finds_config_in_ancestor() {
    let sys = Rc::new(VirtualSystem::new("/project/src"));
    sys.write("/project/tsconfig.json", "{}");
    sys.write("/project/src/a.ts", "import './missing';");

    let (status, output) = build(&sys, &[]);
    assert_eq!(status.unwrap(), EXIT_DIAGNOSTICS_OUTPUTS_GENERATED);
    assert!(output.contains("a.ts(1,9): error TS2307"), "{output}");
    // No status lines outside watch mode.
    assert!(!output.contains("Starting compilation"));
}

#[test]
fn test_clean_build_exits_successfully() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.write("/project/app/tsconfig.json", r#"{ "compilerOptions": { "noEmit": true } }"#);
    sys.write("/project/app/index.ts", "export const x = 1;");

    let (status, output) = build(&sys, &["-p", "app", "--listFiles"]);
    assert_eq!(status.unwrap(), EXIT_SUCCESS);
    assert_eq!(output, "/project/app/index.ts\n");
}

#[test]
fn test_root_files_without_config() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.write("/project/a.ts", "import './b';");
    sys.write("/project/b.ts", "export {};");

    let (status, output) = build(&sys, &["a.ts", "--listEmittedFiles"]);
    assert_eq!(status.unwrap(), EXIT_SUCCESS);
    assert_eq!(output, "TSFILE: /project/a.js\nTSFILE: /project/b.js\n");
}

#[test]
fn test_missing_config_reports_5081() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    let (status, output) = build(&sys, &[]);
    assert_eq!(status.unwrap(), EXIT_DIAGNOSTICS_OUTPUTS_SKIPPED);
    assert!(output.starts_with("error TS5081: "), "{output}");
}

#[test]
fn test_project_errors() {
    let sys = Rc::new(VirtualSystem::new("/project"));
    sys.write("/project/a.ts", "");

    let (status, _) = build(&sys, &["-p", "missing"]);
    assert!(status.unwrap_err().to_string().contains("tsconfig not found"));

    let (status, _) = build(&sys, &["-p", ".", "a.ts"]);
    assert!(status.is_err());
}

#[test]
fn test_real_file_system_build() {
    let dir = tempfile::TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    std::fs::write(root.join("tsconfig.json"), r#"{ "include": ["src"] }"#).unwrap();
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::write(root.join("src/main.ts"), "import { x } from './dep';").unwrap();
    std::fs::write(root.join("src/dep.ts"), "export const x = 1;").unwrap();

    let output = Output::default();
    let system: Rc<dyn System> = Rc::new(RealSystem::new(root.clone()));
    let status = run_with_system(&args(&["--listFiles"]), system, false, output.clone()).unwrap();
    assert_eq!(status, EXIT_SUCCESS);

    let listed = output.text();
    assert!(listed.contains("src/main.ts"), "{listed}");
    assert!(listed.contains("src/dep.ts"), "{listed}");
}
