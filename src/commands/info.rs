/// `cpack info` command implementation
///
/// Prints the input schema of a package without extracting it.
use anyhow::Result;
use serde::Serialize;

use crate::cli::{InfoArgs, OutputFormat};
use crate::package::read_manifest;
use crate::workflow::{build_schema, parse, InputField};

#[derive(Serialize)]
struct InfoOutput<'a> {
    python: &'a str,
    comfyui: &'a str,
    models: usize,
    custom_nodes: usize,
    inputs: &'a [InputField],
    outputs: Vec<&'a str>,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let manifest = read_manifest(&args.archive)?;
    let parsed = parse(&manifest.workflow_api);
    let schema = build_schema(&parsed)?;
    let snapshot = &manifest.snapshot;

    match args.format {
        OutputFormat::Json => {
            let output = InfoOutput {
                python: &snapshot.python,
                comfyui: &snapshot.host_commit,
                models: snapshot.models.len(),
                custom_nodes: snapshot.custom_nodes.len(),
                inputs: &schema.fields,
                outputs: parsed.output_names(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!("Python:       {}", snapshot.python);
            println!("ComfyUI:      {}", snapshot.host_commit);
            println!("Models:       {}", snapshot.models.len());
            println!("Custom nodes: {}", snapshot.custom_nodes.len());
            println!("Outputs:      {}", parsed.output_names().join(", "));
            println!();
            if schema.fields.is_empty() {
                println!("No inputs");
            } else {
                print!("{}", schema.render_table());
            }
        }
    }
    Ok(())
}
