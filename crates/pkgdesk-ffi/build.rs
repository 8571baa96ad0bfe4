use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src/lib.rs");

    let crate_dir = PathBuf::from(
        env::var("CARGO_MANIFEST_DIR").expect("cargo sets CARGO_MANIFEST_DIR for build scripts"),
    );
    let include_dir = crate_dir.join("include");
    std::fs::create_dir_all(&include_dir).expect("create include directory");

    match cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("PKGDESK_H")
        .with_documentation(true)
        .generate()
    {
        Ok(bindings) => {
            bindings.write_to_file(include_dir.join("pkgdesk.h"));
        }
        // Header generation failures are reported but never fail the build.
        Err(error) => println!("cargo:warning=unable to generate pkgdesk.h: {error}"),
    }
}
