//! The default pass: debug-label scopes over the frame's command buffer.
//!
//! Labels must be balanced inside one command buffer, so scopes still open
//! when a command buffer is closed are ended on it and begun again on the
//! next one.

use ash::vk;

use crate::backend::Backend;

#[derive(Debug, Default)]
pub struct Pass {
    command_buffer: Option<vk::CommandBuffer>,
    scopes: Vec<String>,
}

impl Pass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a freshly begun command buffer and reopen the current scopes on it.
    pub fn attach<B: Backend>(&mut self, backend: &B, command_buffer: vk::CommandBuffer) {
        if self.command_buffer == Some(command_buffer) {
            return;
        }
        self.command_buffer = Some(command_buffer);
        for name in &self.scopes {
            backend.cmd_begin_label(command_buffer, name);
        }
    }

    /// Close the open scopes on the bound command buffer before it is ended.
    ///
    /// The scopes stay open on the pass and resume on the next [`attach`](Self::attach).
    pub fn detach<B: Backend>(&mut self, backend: &B) {
        if let Some(command_buffer) = self.command_buffer.take() {
            for _ in &self.scopes {
                backend.cmd_end_label(command_buffer);
            }
        }
    }

    /// Open scopes, outermost first.
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn begin_scope<B: Backend>(&mut self, backend: &B, name: &str) {
        if let Some(command_buffer) = self.command_buffer {
            backend.cmd_begin_label(command_buffer, name);
        }
        self.scopes.push(name.to_string());
    }

    pub fn end_scope<B: Backend>(&mut self, backend: &B) {
        if self.scopes.pop().is_none() {
            tracing::warn!("Ending a pass scope that was never begun");
            return;
        }
        if let Some(command_buffer) = self.command_buffer {
            backend.cmd_end_label(command_buffer);
        }
    }

    /// Close every open scope.
    pub fn close_scopes<B: Backend>(&mut self, backend: &B) {
        while !self.scopes.is_empty() {
            self.end_scope(backend);
        }
    }

    /// Forget the bound command buffer and every scope without recording.
    pub fn reset(&mut self) {
        self.command_buffer = None;
        self.scopes.clear();
    }
}
