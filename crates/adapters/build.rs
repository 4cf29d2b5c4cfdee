use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

fn main() {
    if let Err(e) = generate() {
        eprintln!("build script failed: {}", e);
        std::process::exit(1);
    }
}

fn generate() -> io::Result<()> {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").map_err(io::Error::other)?;
    let builtin_dir = Path::new(&manifest_dir).join("builtin");
    let builtin_dir = builtin_dir.canonicalize()?;

    let out_dir = env::var("OUT_DIR").map_err(io::Error::other)?;
    let dest_path = Path::new(&out_dir).join("builtin_adapters.rs");
    let mut f = fs::File::create(&dest_path)?;

    let mut entries: Vec<_> = fs::read_dir(&builtin_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    writeln!(f, "static BUILTIN_ADAPTERS: &[BuiltinAdapter] = &[")?;
    for entry in &entries {
        let name = entry.file_name().to_string_lossy().to_string();
        let manifest_path = entry.path().join("adapter.toml");
        if !manifest_path.exists() {
            continue;
        }
        let abs_path = manifest_path.canonicalize()?;
        writeln!(f, "    BuiltinAdapter {{")?;
        writeln!(f, "        name: \"{}\",", name)?;
        writeln!(
            f,
            "        manifest_toml: include_str!(\"{}\"),",
            abs_path.display()
        )?;
        writeln!(f, "    }},")?;
    }
    writeln!(f, "];")?;

    println!("cargo:rerun-if-changed={}", builtin_dir.display());
    for entry in &entries {
        println!("cargo:rerun-if-changed={}", entry.path().display());
    }

    Ok(())
}
