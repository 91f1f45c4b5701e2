//! Full-toolchain scenarios. These need a Go installation and build real
//! binaries, so they are ignored by default:
//!
//!     cargo test -p cli -- --ignored
//!
//! Each test sets up a throwaway module, runs the garble binary from this
//! build, and checks the observable contract: program output, exit codes,
//! error messages, and symbol leakage in the stripped binary.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn garble() -> &'static str {
    env!("CARGO_BIN_EXE_garble")
}

fn have_go() -> bool {
    Command::new("go")
        .arg("version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn module(name: &str, files: &[(&str, &str)]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("garble_e2e_{name}"));
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(&dir).unwrap();
    for (path, content) in files {
        let full = dir.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }
    dir
}

fn run_in(dir: &Path, program: &str, args: &[&str], env: &[(&str, &str)]) -> Output {
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(dir);
    for (k, v) in env {
        cmd.env(k, v);
    }
    cmd.output().unwrap()
}

#[test]
#[ignore = "requires a Go toolchain"]
fn test_methods_work_and_unexported_names_vanish() {
    assert!(have_go());
    let dir = module(
        "methods",
        &[
            ("go.mod", "module test/main\n\ngo 1.21\n"),
            (
                "main.go",
                "package main\n\n\
                 import \"fmt\"\n\n\
                 type T string\n\n\
                 func (t T) String() string { return \"String method for \" + string(t) }\n\n\
                 func (t T) unexportedMethod() string { return \"unexported method for \" + string(t) }\n\n\
                 func main() {\n\
                 \tt := T(\"foo\")\n\
                 \tfmt.Println(t)\n\
                 \tfmt.Println(t.unexportedMethod())\n\
                 }\n",
            ),
        ],
    );

    let out = run_in(&dir, garble(), &["build", "-o", "prog", "."], &[]);
    assert!(
        out.status.success(),
        "garble build failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    let run = run_in(&dir, &dir.join("prog").to_string_lossy(), &[], &[]);
    assert_eq!(
        String::from_utf8_lossy(&run.stdout),
        "String method for foo\nunexported method for foo\n"
    );

    let binary = std::fs::read(dir.join("prog")).unwrap();
    let needle = b"unexportedMethod";
    assert!(
        !binary.windows(needle.len()).any(|w| w == needle),
        "binary leaks the unexported method name"
    );

    std::fs::remove_dir_all(dir).ok();
}

#[test]
#[ignore = "requires a Go toolchain"]
fn test_pattern_matching_nothing_fails() {
    assert!(have_go());
    let dir = module(
        "nomatch",
        &[
            ("go.mod", "module test/main\n\ngo 1.21\n"),
            ("main.go", "package main\n\nfunc main() {}\n"),
        ],
    );

    let out = run_in(
        &dir,
        garble(),
        &["build", "."],
        &[("GOPRIVATE", "rsc.io/unmatched")],
    );
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(
        stderr.contains("\"rsc.io/unmatched\" does not match any packages to be built"),
        "unexpected stderr: {stderr}"
    );

    std::fs::remove_dir_all(dir).ok();
}

#[test]
#[ignore = "requires a Go toolchain"]
fn test_public_cannot_depend_on_private() {
    assert!(have_go());
    let dir = module(
        "pubdep",
        &[
            ("go.mod", "module test/main\n\ngo 1.21\n"),
            (
                "importer/main.go",
                "package main\n\n\
                 import \"test/main/imported\"\n\n\
                 func main() { imported.Noop() }\n",
            ),
            (
                "imported/imported.go",
                "package imported\n\nfunc Noop() {}\n",
            ),
        ],
    );

    let out = run_in(
        &dir,
        garble(),
        &["build", "./importer"],
        &[("GOPRIVATE", "test/main/imported")],
    );
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(
        stderr.contains(
            "public package \"test/main/importer\" can't depend on obfuscated package \
             \"test/main/imported\" (matched via \"test/main/imported\")"
        ),
        "unexpected stderr: {stderr}"
    );

    std::fs::remove_dir_all(dir).ok();
}

#[test]
#[ignore = "requires a Go toolchain"]
fn test_universal_match_builds_std_importers() {
    assert!(have_go());
    let dir = module(
        "universal",
        &[
            ("go.mod", "module test/main\n\ngo 1.21\n"),
            (
                "main.go",
                "package main\n\n\
                 import (\n\
                 \t\"encoding/json\"\n\
                 \t\"fmt\"\n\
                 \t\"net/url\"\n\
                 \t\"regexp\"\n\
                 )\n\n\
                 func main() {\n\
                 \tblob, _ := json.Marshal(map[string]int{\"n\": 1})\n\
                 \tu, _ := url.Parse(\"https://example.com/x\")\n\
                 \tre := regexp.MustCompile(`x+`)\n\
                 \tfmt.Println(string(blob), u.Host, re.MatchString(\"xx\"))\n\
                 }\n",
            ),
        ],
    );

    let out = run_in(
        &dir,
        garble(),
        &["build", "-o", "prog", "."],
        &[("GOPRIVATE", "*")],
    );
    assert!(
        out.status.success(),
        "universal-match build failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    let run = run_in(&dir, &dir.join("prog").to_string_lossy(), &[], &[]);
    assert_eq!(
        String::from_utf8_lossy(&run.stdout),
        "{\"n\":1} example.com true\n"
    );

    std::fs::remove_dir_all(dir).ok();
}

#[test]
#[ignore = "requires a Go toolchain"]
fn test_panic_output_reverses() {
    assert!(have_go());
    let dir = module(
        "reverse",
        &[
            ("go.mod", "module test/main\n\ngo 1.21\n"),
            (
                "main.go",
                "package main\n\n\
                 import \"test/main/lib\"\n\n\
                 func main() { unexportedMainFunc() }\n\n\
                 func unexportedMainFunc() { lib.ExportedLibFunc() }\n",
            ),
            (
                "lib/lib.go",
                "package lib\n\n\
                 import \"runtime/debug\"\n\n\
                 func ExportedLibFunc() { debug.PrintStack() }\n",
            ),
        ],
    );

    let out = run_in(&dir, garble(), &["build", "-o", "prog", "."], &[]);
    assert!(
        out.status.success(),
        "garble build failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    let run = run_in(&dir, &dir.join("prog").to_string_lossy(), &[], &[]);
    let trace = String::from_utf8_lossy(&run.stderr).into_owned();
    assert!(trace.contains("goroutine 1 [running]"));
    assert!(!trace.contains("ExportedLibFunc"));
    assert!(!trace.contains("unexportedMainFunc"));
    assert!(!trace.contains("test/main"));
    assert!(!trace.contains("main.go"));

    let trace_file = dir.join("trace.txt");
    std::fs::write(&trace_file, trace).unwrap();
    let reversed = run_in(
        &dir,
        garble(),
        &["reverse", trace_file.to_string_lossy().as_ref()],
        &[],
    );
    assert!(reversed.status.success());
    let text = String::from_utf8_lossy(&reversed.stdout);
    assert_eq!(text.matches("test/main/lib.ExportedLibFunc").count(), 1);
    assert_eq!(text.matches("main.unexportedMainFunc").count(), 1);

    std::fs::remove_dir_all(dir).ok();
}
