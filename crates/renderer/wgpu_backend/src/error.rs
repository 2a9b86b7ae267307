//! Validation error scopes around GPU work.

use anyhow::{Result as AnyResult, anyhow};
use pollster::block_on;
use std::sync::Arc;
use wgpu::{CommandBuffer, Device, ErrorFilter, Queue};

/// Pushes a validation error scope on creation. `check` pops the scope and
/// reports anything it captured; an unchecked guard pops on drop and logs.
pub struct ErrorScopeGuard {
    device: Arc<Device>,
    label: &'static str,
    checked: bool,
}

impl ErrorScopeGuard {
    pub fn push(device: &Arc<Device>, label: &'static str) -> Self {
        device.push_error_scope(ErrorFilter::Validation);
        Self {
            device: Arc::clone(device),
            label,
            checked: false,
        }
    }

    /// Pop the scope.
    ///
    /// # Errors
    /// Returns the validation error raised inside the scope, if any.
    pub fn check(mut self) -> AnyResult<()> {
        self.checked = true;
        self.pop()
    }

    fn pop(&self) -> AnyResult<()> {
        match block_on(self.device.pop_error_scope()) {
            Some(err) => Err(anyhow!(
                "wgpu validation error in scope '{}': {err}",
                self.label
            )),
            None => Ok(()),
        }
    }
}

impl Drop for ErrorScopeGuard {
    fn drop(&mut self) {
        if self.checked {
            return;
        }
        if let Err(err) = self.pop() {
            log::error!(target: "wgpu_renderer", "{err:#}");
        }
    }
}

/// Submit command buffers inside a validation scope.
///
/// # Errors
/// Returns an error if validation fails during submission.
pub fn submit_with_validation<I>(
    device: &Arc<Device>,
    queue: &Queue,
    label: &'static str,
    submissions: I,
) -> AnyResult<()>
where
    I: IntoIterator<Item = CommandBuffer>,
{
    let scope = ErrorScopeGuard::push(device, label);
    queue.submit(submissions);
    scope.check().inspect_err(|err| {
        log::error!(target: "wgpu_renderer", "submission failed: {err:#}");
    })
}
