use std::{collections::BTreeMap, env, fs, path::PathBuf};

use serde::Deserialize;

/// Layout of `flags.json`: a `default` table plus optional per-architecture overrides.
#[derive(Deserialize)]
struct FlagFile {
    default: BTreeMap<String, String>,
    #[serde(flatten)]
    arch: BTreeMap<String, BTreeMap<String, String>>,
}

fn main() {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap();
    let flags_path = PathBuf::from(&manifest_dir).join("../../flags.json");
    let flags_str = fs::read_to_string(&flags_path).unwrap();
    let file: FlagFile = serde_json::from_str(&flags_str)
        .unwrap_or_else(|err| panic!("Malformed flags.json: {}", err));

    let mut flags = file.default;
    if let Some(overrides) = file.arch.get(target_arch.as_str()) {
        flags.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    make_flags(&flags);
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../../flags.json");
}

fn make_flags(flagmap: &BTreeMap<String, String>) {
    let mut s = String::new();
    for (key, val) in flagmap {
        let val: usize = val
            .parse()
            .unwrap_or_else(|_| panic!("Flag {} is not a number: {}", key, val));
        s += format!("pub const {}: usize = {};\n", key, val).as_str();
    }
    let out_dir = env::var("OUT_DIR").unwrap();
    let path = PathBuf::from(out_dir).join("build_flags.rs");
    fs::write(path, s).unwrap();
}
