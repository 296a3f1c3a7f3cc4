//! Redundant-state elimination across replayed command streams.

use crate::api as gl;
use crate::api::types::*;
use crate::api::Gl;

/// Caches the pieces of GL state the replay touches most, so consecutive
/// draws with the same pipeline cost one `glUseProgram`, not one per draw.
/// Invalidate whenever something outside the replay may have touched the
/// context.
pub struct StateCache {
    program: Option<GLuint>,
    vao: Option<GLuint>,
    draw_fbo: Option<GLuint>,
    blend: Option<bool>,
    depth_test: Option<bool>,
    depth_write: Option<bool>,
    scissor_test: Option<bool>,
}

impl StateCache {
    pub fn new() -> StateCache {
        StateCache {
            program: None,
            vao: None,
            draw_fbo: None,
            blend: None,
            depth_test: None,
            depth_write: None,
            scissor_test: None,
        }
    }

    pub fn invalidate(&mut self) {
        *self = StateCache::new();
    }

    /// Returns true when the program actually changed.
    pub fn set_program(&mut self, gl: &Gl, program: GLuint) -> bool {
        if self.program == Some(program) {
            return false;
        }
        unsafe { gl.UseProgram(program) };
        self.program = Some(program);
        true
    }

    pub fn set_vao(&mut self, gl: &Gl, vao: GLuint) {
        if self.vao != Some(vao) {
            unsafe { gl.BindVertexArray(vao) };
            self.vao = Some(vao);
        }
    }

    pub fn bind_draw_framebuffer(&mut self, gl: &Gl, fbo: GLuint) {
        if self.draw_fbo != Some(fbo) {
            unsafe { gl.BindFramebuffer(gl::DRAW_FRAMEBUFFER, fbo) };
            self.draw_fbo = Some(fbo);
        }
    }

    fn set_cap(gl: &Gl, cap: GLenum, enabled: bool) {
        unsafe {
            if enabled {
                gl.Enable(cap);
            } else {
                gl.Disable(cap);
            }
        }
    }

    pub fn set_blend_enabled(&mut self, gl: &Gl, enabled: bool) {
        if self.blend != Some(enabled) {
            Self::set_cap(gl, gl::BLEND, enabled);
            self.blend = Some(enabled);
        }
    }

    pub fn set_depth_test(&mut self, gl: &Gl, enabled: bool) {
        if self.depth_test != Some(enabled) {
            Self::set_cap(gl, gl::DEPTH_TEST, enabled);
            self.depth_test = Some(enabled);
        }
    }

    pub fn set_depth_write(&mut self, gl: &Gl, enabled: bool) {
        if self.depth_write != Some(enabled) {
            unsafe { gl.DepthMask(enabled as GLboolean) };
            self.depth_write = Some(enabled);
        }
    }

    pub fn set_scissor_test(&mut self, gl: &Gl, enabled: bool) {
        if self.scissor_test != Some(enabled) {
            Self::set_cap(gl, gl::SCISSOR_TEST, enabled);
            self.scissor_test = Some(enabled);
        }
    }
}
