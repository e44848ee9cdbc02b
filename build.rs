//! Build script for proto compilation.
//!
//! The generated module is committed as `src/generated.rs`, so a normal build
//! needs no `protoc`. Regenerate after editing `proto/provider.proto` with:
//!
//! ```bash
//! cargo build --features regenerate-proto
//! ```
//!
//! Only the server side is generated since this crate is always the provider
//! half of the protocol.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(feature = "regenerate-proto")]
    {
        let out_dir = std::path::PathBuf::from("src");
        tonic_prost_build::configure()
            .build_server(true)
            .build_client(false)
            .out_dir(&out_dir)
            .compile_protos(&["proto/provider.proto"], &["proto"])?;

        let generated = out_dir.join("hemmer.provider.v1.rs");
        if generated.exists() {
            std::fs::rename(generated, out_dir.join("generated.rs"))?;
        }
    }

    println!("cargo:rerun-if-changed=proto/provider.proto");

    Ok(())
}
