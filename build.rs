// Compile the GLSL shaders in shaders/ to SPIR-V with glslc (Vulkan SDK).
// The renderer loads the .spv files at runtime.

use std::path::Path;
use std::process::Command;

const SHADERS: &[(&str, &str)] = &[
    ("shaders/triangle.vert", "shaders/vert.spv"),
    ("shaders/triangle.frag", "shaders/frag.spv"),
];

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    for (source, spv) in SHADERS {
        compile(Path::new(source), Path::new(spv));
    }
}

fn compile(source: &Path, spv: &Path) {
    match Command::new("glslc").arg(source).arg("-o").arg(spv).status() {
        Ok(status) if status.success() => {
            println!("Compiled {} -> {}", source.display(), spv.display());
        }
        Ok(status) => panic!(
            "glslc failed on {} (exit code {:?})",
            source.display(),
            status.code()
        ),
        Err(e) => {
            eprintln!("Warning: glslc not available ({}); compile shaders manually:", e);
            eprintln!("  glslc {} -o {}", source.display(), spv.display());
        }
    }
}
