//! Places the STM32G070RB memory layout where cortex-m-rt's linker script finds it

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

fn main() {
    let out = &PathBuf::from(env::var_os("OUT_DIR").unwrap());

    let memory_x = "MEMORY\n\
            {\n\
            \x20   FLASH : ORIGIN = 0x08000000, LENGTH = 128K\n\
            \x20   RAM   : ORIGIN = 0x20000000, LENGTH = 36K\n\
            }\n";

    let mut f = File::create(out.join("memory.x")).unwrap();
    f.write_all(memory_x.as_bytes()).unwrap();

    println!("cargo:rustc-link-search={}", out.display());
    println!("cargo:rerun-if-changed=build.rs");
}
