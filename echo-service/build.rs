use std::io::Result;

fn main() -> Result<()> {
    // The same sources are parsed at runtime by the tests, so they live
    // next to the crate instead of being embedded as a descriptor set.
    let proto_files = &["proto/echo.proto", "proto/greeter.proto"];
    let proto_folder = "proto";

    for file in proto_files {
        println!("cargo:rerun-if-changed={file}");
    }

    tonic_prost_build::configure()
        .build_client(false)
        .compile_protos(proto_files, &[proto_folder])?;

    Ok(())
}
