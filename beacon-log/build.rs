use std::env;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, Stdio};

fn emit_release_var() {
    let version = env::var("CARGO_PKG_VERSION").unwrap_or_default();

    let revision = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .stderr(Stdio::inherit())
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_owned());

    match revision {
        Some(revision) => println!("cargo:rustc-env=BEACON_RELEASE=beacon@{version}+{revision}"),
        None => println!("cargo:rustc-env=BEACON_RELEASE=beacon@{version}"),
    }
}

fn list_crates() -> Vec<String> {
    let mut crates = Vec::new();

    let Ok(entries) = fs::read_dir("../") else {
        return crates;
    };

    for entry in entries.flatten() {
        if !entry.file_type().is_ok_and(|ty| ty.is_dir()) {
            continue;
        }

        if let Some(name) = entry.file_name().to_str()
            && name.starts_with("beacon")
        {
            crates.push(name.replace('-', "_"));
        }
    }

    crates.sort();
    crates
}

fn emit_crate_list() -> io::Result<()> {
    let crates = list_crates();

    let out_dir = env::var("OUT_DIR").map_err(io::Error::other)?;
    let dest_path = Path::new(&out_dir).join("constants.gen.rs");
    let mut f = File::create(dest_path)?;

    write!(f, "const CRATE_NAMES: &[&str] = &[")?;
    for name in &crates {
        write!(f, "\"{name}\",")?;
    }
    writeln!(f, "];")?;

    Ok(())
}

fn main() {
    emit_release_var();
    emit_crate_list().expect("failed to write the crate list");
    println!("cargo:rerun-if-changed=build.rs");
}
