fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the bundled protoc so the build does not depend on a system install
    let mut config = prost_build::Config::new();
    config.protoc_executable(protoc_bin_vendored::protoc_bin_path()?);

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos_with_config(
            config,
            &["proto/registry.proto", "proto/dht.proto"],
            &["proto"],
        )?;

    Ok(())
}
