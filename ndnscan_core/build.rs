fn main() {
    use std::env;
    use std::path::PathBuf;

    println!("cargo:rerun-if-changed=src");
    println!("cargo:rerun-if-changed=cbindgen.toml");

    let Ok(crate_dir) = env::var("CARGO_MANIFEST_DIR") else {
        return;
    };
    let crate_dir = PathBuf::from(crate_dir);
    let out_dir = crate_dir.join("include");

    let config = match cbindgen::Config::from_file(crate_dir.join("cbindgen.toml")) {
        Ok(c) => c,
        Err(e) => {
            println!("cargo:warning=cbindgen.toml unreadable, header not generated: {e}");
            return;
        }
    };

    // The header is a convenience for C callers; never fail the build over it.
    let generated = cbindgen::Builder::new()
        .with_config(config)
        .with_crate(&crate_dir)
        .generate();
    match generated {
        Ok(bindings) => {
            if std::fs::create_dir_all(&out_dir).is_ok() {
                bindings.write_to_file(out_dir.join("ndnscan.h"));
            }
        }
        Err(e) => println!("cargo:warning=unable to generate C bindings: {e}"),
    }
}
