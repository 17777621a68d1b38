use std::path::PathBuf;
use uprpc_core::descriptor::describe_files;

/// Prints the methods of `protos` as pretty JSON.
pub fn run(protos: &[PathBuf], include_dirs: &[PathBuf]) -> anyhow::Result<()> {
    let files = describe_files(protos, include_dirs)?;
    println!("{}", serde_json::to_string_pretty(&files)?);
    Ok(())
}
