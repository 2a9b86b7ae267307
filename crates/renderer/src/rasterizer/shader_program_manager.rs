//! Lazily compiled shader programs, one per draw-object type.

use crate::backend::{GpuDevice, ProgramId, ShaderKind};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ShaderProgramManager {
    programs: HashMap<ShaderKind, ProgramId>,
}

impl ShaderProgramManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Program for `kind`, compiled on first use.
    pub fn get_program(&mut self, gpu: &mut dyn GpuDevice, kind: ShaderKind) -> ProgramId {
        *self.programs.entry(kind).or_insert_with(|| {
            log::debug!(target: "renderer", "compiling {kind:?} program");
            gpu.create_program(kind)
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Delete every compiled program. The context must be current.
    pub fn destroy(&mut self, gpu: &mut dyn GpuDevice) {
        for (_, program) in self.programs.drain() {
            gpu.delete_program(program);
        }
    }
}
