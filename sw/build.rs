use std::io::Write;
use std::path::PathBuf;
use std::{env, fs};

fn main() {
    // Put the linker script somewhere the linker can find it; only the
    // soft-core target links against it.
    let target = env::var("TARGET").unwrap_or_default();
    if target.starts_with("riscv32") {
        let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
        println!("cargo:rustc-link-search={}", out_dir.display());

        fs::File::create(out_dir.join("memory.x"))
            .unwrap()
            .write_all(include_bytes!("memory.x"))
            .unwrap();
    }
    println!("cargo:rerun-if-changed=memory.x");
}
