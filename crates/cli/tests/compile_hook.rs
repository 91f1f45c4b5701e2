//! End-to-end compile-hook tests against fabricated dependency objects.
//!
//! These drive `transform_compile` the way the orchestrator would, without
//! needing a Go toolchain: dependency archives are fabricated with known
//! build IDs, and the "real compiler" step is simulated by creating the
//! output archive before the post-compile members are appended.

use cli::compile::transform_compile;
use common::hash::{hash_with, rename_key};
use common::{ListedPackage, Options, SharedCache, HEADER_DEBUG_SOURCE, HEADER_NAME_INDEX};
use scribe::NameIndex;
use std::io::Read;
use std::path::{Path, PathBuf};

const LIB_SRC: &str = "package lib\n\n\
// ExportedLibFunc is part of the library's public API.\n\
func ExportedLibFunc() string {\n\
\treturn secretHelper()\n\
}\n\n\
func secretHelper() string {\n\
\treturn \"lib-secret\"\n\
}\n\n\
type Payload struct {\n\
\tData string\n\
\tcount int\n\
}\n";

const MAIN_SRC: &str = "package main\n\n\
import \"corp.example/lib\"\n\n\
func main() {\n\
\tp := lib.Payload{Data: lib.ExportedLibFunc()}\n\
\t_ = p.Data\n\
\tunexportedMainFunc()\n\
}\n\n\
func unexportedMainFunc() {}\n";

struct Fixture {
    dir: PathBuf,
    cache: SharedCache,
}

impl Fixture {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("garble_it_{name}"));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();

        let cache = SharedCache {
            options: Options {
                work_dir: dir.to_string_lossy().into_owned(),
                ..Options::default()
            },
            build_flags: Vec::new(),
            exec_path: "/usr/bin/false".into(),
            go_private: "corp.example,test/main".into(),
            listed: sorted(vec![
                ListedPackage {
                    import_path: "corp.example/lib".into(),
                    name: "lib".into(),
                    private: true,
                    ..ListedPackage::default()
                },
                ListedPackage {
                    import_path: "test/main".into(),
                    name: "main".into(),
                    private: true,
                    ..ListedPackage::default()
                },
            ]),
        };
        Fixture { dir, cache }
    }

    fn write(&self, name: &str, content: &str) -> String {
        let path = self.dir.join(name);
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    /// Simulates one hooked compile: transform, then pretend the real
    /// compiler produced the archive, then append the post members.
    fn compile(
        &self,
        pkg: &str,
        build_id: &str,
        sources: &[String],
        importcfg_lines: &str,
    ) -> (Vec<String>, String) {
        let cfg = self.write(&format!("importcfg-{}", pkg.replace('/', "_")), importcfg_lines);
        let obj = self
            .dir
            .join(format!("{}.a", pkg.replace('/', "_")))
            .to_string_lossy()
            .into_owned();

        let mut args: Vec<String> = vec![
            "-p".into(),
            pkg.into(),
            format!("-buildid={build_id}"),
            format!("-importcfg={cfg}"),
            "-trimpath".into(),
            format!("{}=>;", self.dir.display()),
            "-o".into(),
            obj.clone(),
        ];
        args.extend(sources.iter().cloned());

        let (out_args, post) = transform_compile(&self.cache, &self.dir, &args).unwrap();

        // "Run the compiler": produce the archive the post step augments.
        let pkgdef =
            format!("go object linux amd64 go1.22.1\nbuild id \"{build_id}\"\n\n").into_bytes();
        arx::write_archive(Path::new(&obj), &[("__.PKGDEF", &pkgdef)]).unwrap();
        let post = post.expect("private package must get archive members");
        assert_eq!(post.object, PathBuf::from(&obj));
        for (name, data) in &post.members {
            arx::append_member(&post.object, name, data).unwrap();
        }
        (out_args, obj)
    }
}

fn sorted(mut listed: Vec<ListedPackage>) -> Vec<ListedPackage> {
    listed.sort_by(|a, b| a.import_path.cmp(&b.import_path));
    listed
}

fn emitted_sources(args: &[String]) -> Vec<String> {
    args.iter()
        .filter(|a| a.ends_with(".go"))
        .map(|a| std::fs::read_to_string(a).unwrap())
        .collect()
}

#[test]
fn test_compile_renames_and_indexes() {
    let fx = Fixture::new("lib_compile");
    let lib_go = fx.write("lib.go", LIB_SRC);

    let (args, obj) = fx.compile("corp.example/lib", "TElCQUNUSU9O/rest", &[lib_go], "");

    // The compiler must consume rewritten temp files, not the originals.
    let emitted = emitted_sources(&args);
    assert_eq!(emitted.len(), 1);
    let src = &emitted[0];
    assert!(!src.contains("ExportedLibFunc"));
    assert!(!src.contains("secretHelper"));
    assert!(!src.contains("Payload"));
    assert!(src.starts_with("//line "));
    assert!(args.iter().any(|a| a == "-dwarf=false"));

    // The trimpath now hides the scratch directory first.
    let trimpath = args
        .iter()
        .position(|a| a == "-trimpath")
        .map(|i| args[i + 1].clone())
        .unwrap();
    assert!(trimpath.starts_with(&fx.dir.to_string_lossy().into_owned()));

    // The name index lists post-obfuscation names only.
    let key = rename_key(b"", b"LIBACTION");
    let index_data = arx::extract_member(Path::new(&obj), HEADER_NAME_INDEX)
        .unwrap()
        .unwrap();
    let index = NameIndex::from_text(&String::from_utf8_lossy(&index_data));
    assert!(index.has_name(&hash_with(&key, "ExportedLibFunc")));
    assert!(!index.has_name("ExportedLibFunc"));
    let obf_payload = hash_with(&key, "Payload");
    assert!(index.has_field(&obf_payload, &hash_with(&key, "Data")));

    // The debug-source member holds a gzip'd tar of the rewritten file.
    let debug_src = arx::extract_member(Path::new(&obj), HEADER_DEBUG_SOURCE)
        .unwrap()
        .unwrap();
    let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(&debug_src[..]));
    let mut names = Vec::new();
    let mut content = String::new();
    for entry in tar.entries().unwrap() {
        let mut entry = entry.unwrap();
        names.push(entry.path().unwrap().to_string_lossy().into_owned());
        entry.read_to_string(&mut content).unwrap();
    }
    assert_eq!(names, vec!["lib.go".to_string()]);
    assert!(!content.contains("secretHelper"));

    std::fs::remove_dir_all(&fx.dir).ok();
}

#[test]
fn test_cross_package_consistency() {
    let fx = Fixture::new("cross_pkg");
    let lib_go = fx.write("lib.go", LIB_SRC);
    let (_, lib_obj) = fx.compile("corp.example/lib", "TElCQUNUSU9O/rest", &[lib_go], "");

    let main_go = fx.write("main.go", MAIN_SRC);
    let importcfg = format!("packagefile corp.example/lib={lib_obj}\n");
    let (args, _) = fx.compile("test/main", "TUFJTkFDVElPTg/rest", &[main_go], &importcfg);

    let src = &emitted_sources(&args)[0];
    let lib_key = rename_key(b"", b"LIBACTION");

    // References into the dependency carry the dependency's hashes.
    assert!(src.contains(&format!("lib.{}", hash_with(&lib_key, "ExportedLibFunc"))));
    assert!(src.contains(&format!("lib.{}", hash_with(&lib_key, "Payload"))));
    assert!(src.contains(&hash_with(&lib_key, "Data")));
    assert!(!src.contains("ExportedLibFunc"));
    assert!(!src.contains("Payload"));

    // Local names of the main package hash under its own action ID, and
    // the entry point survives.
    let main_key = rename_key(b"", b"MAINACTION");
    assert!(src.contains("func main()"));
    assert!(src.contains(&hash_with(&main_key, "unexportedMainFunc")));
    assert!(!src.contains("unexportedMainFunc"));

    std::fs::remove_dir_all(&fx.dir).ok();
}

#[test]
fn test_determinism_across_runs() {
    let fx1 = Fixture::new("determinism_a");
    let lib1 = fx1.write("lib.go", LIB_SRC);
    let (args1, _) = fx1.compile("corp.example/lib", "TElCQUNUSU9O/rest", &[lib1], "");

    let fx2 = Fixture::new("determinism_b");
    let lib2 = fx2.write("lib.go", LIB_SRC);
    let (args2, _) = fx2.compile("corp.example/lib", "TElCQUNUSU9O/rest", &[lib2], "");

    assert_eq!(emitted_sources(&args1), emitted_sources(&args2));

    std::fs::remove_dir_all(&fx1.dir).ok();
    std::fs::remove_dir_all(&fx2.dir).ok();
}

#[test]
fn test_public_package_passthrough() {
    let fx = Fixture::new("public_passthrough");
    let src = fx.write("public.go", "package public\nfunc Keep() {}\n");

    let args: Vec<String> = vec![
        "-p".into(),
        "golang.org/x/mod/semver".into(),
        "-o".into(),
        "out.a".into(),
        src.clone(),
    ];
    let (out, post) = transform_compile(&fx.cache, &fx.dir, &args).unwrap();
    assert!(post.is_none());
    assert!(out.contains(&src));
    assert!(out.contains(&"-dwarf=false".to_string()));

    std::fs::remove_dir_all(&fx.dir).ok();
}

#[test]
fn test_missing_trimpath_is_fatal() {
    let fx = Fixture::new("no_trimpath");
    let src = fx.write("main.go", "package main\nfunc main() {}\n");

    let args: Vec<String> = vec![
        "-p".into(),
        "test/main".into(),
        "-buildid=QUJD/x".into(),
        "-o".into(),
        "out.a".into(),
        src,
    ];
    let err = transform_compile(&fx.cache, &fx.dir, &args).unwrap_err();
    assert_eq!(
        err.to_string(),
        "-toolexec=garble should be used alongside -trimpath"
    );

    std::fs::remove_dir_all(&fx.dir).ok();
}

#[test]
fn test_literals_obfuscated_when_enabled() {
    let fx = Fixture::new("literals_on");
    let mut cache = fx.cache.clone();
    cache.options.literals = true;

    let src = fx.write(
        "main.go",
        "package main\nfunc main() { println(\"sentinel-string\") }\n",
    );
    let cfg = fx.write("importcfg", "");
    let args: Vec<String> = vec![
        "-p".into(),
        "test/main".into(),
        "-buildid=QUJD/x".into(),
        format!("-importcfg={cfg}"),
        "-trimpath".into(),
        format!("{}=>;", fx.dir.display()),
        "-o".into(),
        fx.dir.join("main.a").to_string_lossy().into_owned(),
        src,
    ];
    let (out, _) = transform_compile(&cache, &fx.dir, &args).unwrap();
    let emitted = emitted_sources(&out);
    assert!(!emitted[0].contains("sentinel-string"));
    assert!(emitted[0].contains("k[i%len(k)]"));

    std::fs::remove_dir_all(&fx.dir).ok();
}
