// Compiles the background compute shaders to SPIR-V with glslc (Vulkan SDK).
// Missing glslc is not fatal: the engine then runs with the clear colour only.

use std::path::Path;
use std::process::Command;

const SHADERS: [&str; 2] = ["gradient", "sky"];

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    for name in SHADERS {
        let input = format!("shaders/{name}.comp");
        let output = format!("shaders/{name}.comp.spv");
        compile_shader(&input, &output);
    }
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(output);

    let result = Command::new("glslc")
        .arg("--target-env=vulkan1.3")
        .arg(input_path)
        .arg("-o")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            println!(
                "cargo:warning=Failed to compile {input}: exit code {:?}",
                status.code()
            );
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({e}), {input} was not compiled");
        }
    }
}
