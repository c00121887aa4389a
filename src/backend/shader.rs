// Shader module loading
//
// The renderer consumes pre-compiled SPIR-V only; build.rs compiles the
// GLSL sources in shaders/ when glslc is available.

use ash::util::read_spv;
use ash::vk;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use super::RenderDevice;
use crate::error::RenderError;

pub const VERTEX_SHADER_PATH: &str = "shaders/vert.spv";
pub const FRAGMENT_SHADER_PATH: &str = "shaders/frag.spv";

/// Read SPIR-V bytecode from disk into aligned words.
pub fn load_spv<P: AsRef<Path>>(path: P) -> Result<Vec<u32>, RenderError> {
    let path = path.as_ref();

    let mut file = File::open(path).map_err(|source| RenderError::ShaderNotFound {
        path: path.to_path_buf(),
        source,
    })?;

    read_spv(&mut file).map_err(|source| RenderError::ShaderInvalid {
        path: path.to_path_buf(),
        source,
    })
}

/// A compiled shader stage. These are temporaries: the pipeline links them
/// in, after which the module is released when this wrapper goes out of
/// scope, on the failure path as much as on success.
pub struct ShaderModule {
    module: vk::ShaderModule,
    device: Arc<RenderDevice>,
}

impl ShaderModule {
    pub fn new(device: Arc<RenderDevice>, code: &[u32]) -> Result<Self, RenderError> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);

        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .map_err(RenderError::PipelineCreation)?;

        Ok(Self { module, device })
    }

    pub fn raw(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.module, None);
        }
    }
}
