use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/");

    // RPC-facing schema: the psdb Database service and the vitess packages it
    // is generated against. The server half is only used by tests.
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/psdb/v1alpha1/database.proto"], &["proto"])
        .map_err(|e| {
            println!("cargo:warning=Failed to compile database.proto: {}", e);
            println!("cargo:warning=protoc must be installed to build the gateway");
            e
        })?;

    // Wire-facing schema: the same query/vtrpc definitions under the package
    // names the MySQL front door works with. Kept in a separate directory so
    // the generated file names can never collide with the RPC side.
    let wire_out = PathBuf::from(env::var("OUT_DIR")?).join("wire");
    std::fs::create_dir_all(&wire_out)?;

    prost_build::Config::new()
        .out_dir(&wire_out)
        .compile_protos(
            &["proto/vitess/query.proto", "proto/vitess/vtrpc.proto"],
            &["proto"],
        )?;

    Ok(())
}
