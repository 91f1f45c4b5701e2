use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use cli::compile::PostAppend;
use cli::driver::{self, EngineFlags, JustExit, WantHelp};
use cli::{compile, link, reverse, version};
use common::{SharedCache, ENV_SHARED};
use std::path::{Path, PathBuf};
use std::process::Command;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn usage() {
    eprintln!(
        "Garble obfuscates Go code by wrapping the Go toolchain.

Usage:

\tgarble [flags] build [build flags] [packages]

Aside from \"build\", the \"test\" and \"list\" commands mirroring the Go
toolchain are also supported, as is \"reverse\" to de-obfuscate panic output.

garble accepts the following flags:

\t-literals\tObfuscate literals such as strings
\t-tiny\t\tOptimize for binary size, losing the ability to reverse the process
\t-debugdir\tWrite the obfuscated source to a directory, e.g. -debugdir=out
\t-seed\t\tProvide a base64-encoded seed, e.g. -seed=o9WDTZ4CN4w
\t\t\tFor a random seed, provide -seed=random
"
    );
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("GARBLE_LOG"))
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut engine = EngineFlags::default();
    let mut i = 0;
    while i < args.len() {
        let arg = args[i].clone();
        if !arg.starts_with('-') {
            break;
        }
        // In hook mode the first argument is the absolute tool path, which
        // never starts with a dash, so this loop only sees engine flags.
        let trimmed = arg.trim_start_matches('-');
        let (name, inline_value) = match trimmed.split_once('=') {
            Some((n, v)) => (n, Some(v.to_string())),
            None => (trimmed, None),
        };
        let mut value = inline_value;
        let mut needs_value = false;
        match name {
            "literals" => engine.literals = true,
            "tiny" => engine.tiny = true,
            "debugdir" | "seed" => needs_value = true,
            "h" | "help" => {
                usage();
                return 2;
            }
            _ => {
                eprintln!("flag provided but not defined: -{name}");
                usage();
                return 2;
            }
        }
        if needs_value {
            if value.is_none() {
                i += 1;
                value = args.get(i).cloned();
            }
            let Some(value) = value else {
                eprintln!("flag needs an argument: -{name}");
                usage();
                return 2;
            };
            match name {
                "debugdir" => engine.debugdir = Some(PathBuf::from(value)),
                _ => engine.seed = Some(value),
            }
        }
        i += 1;
    }
    let rest = &args[i..];
    if rest.is_empty() {
        usage();
        return 2;
    }

    let command = rest[0].as_str();
    let result = match command {
        "help" => {
            usage();
            return 2;
        }
        "version" => {
            if rest.len() > 1 {
                eprintln!("the version command does not take arguments");
                return 1;
            }
            println!("{VERSION}");
            return 0;
        }
        "reverse" => reverse::run_reverse(&rest[1..], &engine),
        "build" | "test" | "list" => driver::run_toolexec(command, &rest[1..], &engine),
        _ if Path::new(command).is_absolute() => run_hook(rest),
        _ => {
            // -toolexec hands us an absolute tool path; anything else is
            // misuse of the wrapper.
            eprintln!("unknown command: {command:?}");
            return 1;
        }
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            if err.downcast_ref::<JustExit>().is_some() {
                return 1;
            }
            if err.downcast_ref::<WantHelp>().is_some() {
                usage();
                return 2;
            }
            eprintln!("{err}");
            if let Some(seed) = driver::generated_seed() {
                eprintln!("random seed: {}", STANDARD_NO_PAD.encode(seed));
            }
            1
        }
    }
}

/// A tool invocation routed through us by the orchestrator: transform the
/// argv, run the real tool, then apply any post actions.
fn run_hook(args: &[String]) -> anyhow::Result<i32> {
    let shared_dir = std::env::var(ENV_SHARED)
        .map(PathBuf::from)
        .map_err(|_| anyhow::anyhow!("{ENV_SHARED} unset; did you run via 'garble build'?"))?;
    let cache = SharedCache::load(&shared_dir)?;

    let tool_path = &args[0];
    let tool = Path::new(tool_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tool = tool.strip_suffix(".exe").unwrap_or(&tool);

    if args.len() == 2 && args[1] == "-V=full" {
        return version::alter_tool_version(tool_path, &cache.options.seed);
    }

    let (transformed, post): (Vec<String>, Option<PostAppend>) = match tool {
        "compile" => compile::transform_compile(&cache, &shared_dir, &args[1..])?,
        "link" => {
            let flags = link::transform_link(&cache, &args[1..])?;
            (flags, None)
        }
        _ => (args[1..].to_vec(), None),
    };

    let status = Command::new(tool_path).args(&transformed).status()?;
    if !status.success() {
        // The tool already printed its own error output.
        return Ok(status.code().unwrap_or(1));
    }

    if let Some(post) = post {
        for (name, data) in &post.members {
            arx::append_member(&post.object, name, data)?;
        }
    }
    Ok(0)
}
